// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/model.rs - 模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::frame::RgbFrame;

pub mod letterbox;
pub mod postprocess;

#[cfg(feature = "model_onnx")]
mod onnx_yolo;
#[cfg(feature = "model_onnx")]
pub use self::onnx_yolo::{OnnxYolo, OnnxYoloBuilder};

#[cfg(feature = "model_rknn")]
mod rknn_yolo;
#[cfg(feature = "model_rknn")]
pub use self::rknn_yolo::{RknnYolo, RknnYoloBuilder};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，相对原图归一化
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectItem> {
    self.items.iter()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("模型推理错误: {0}")]
  Inference(String),
  #[error("模型输出形状无效: {0:?}")]
  InvalidOutputShape(Vec<usize>),
  #[error("模型参数无效: {0}")]
  InvalidParameter(String),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
  #[cfg(feature = "model_rknn")]
  #[error("RKNN 错误: {0}")]
  Rknn(rknpu::Error),
}

#[cfg(feature = "model_rknn")]
impl From<rknpu::Error> for ModelError {
  fn from(err: rknpu::Error) -> Self {
    ModelError::Rknn(err)
  }
}

/// 从 URL 路径中取出文件路径，支持 `file://` 与自定义方案
pub(crate) fn model_path_from_url(url: &Url) -> Result<PathBuf, ModelError> {
  if url.scheme() == "file" {
    return url
      .to_file_path()
      .map_err(|_| ModelError::InvalidParameter(format!("无效的文件路径: {}", url)));
  }
  let path = urlencoding::decode(url.path())
    .map_err(|e| ModelError::InvalidParameter(format!("路径编码错误: {}", e)))?;
  Ok(PathBuf::from(path.into_owned()))
}

/// 按 URL 方案选择推理后端
///
/// - `onnx:///path/to/best.onnx?size=640` 或 `file:///path/to/best.onnx`
/// - `rknn:///path/to/best.rknn`
pub enum ModelWrapper {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxYolo),
  #[cfg(feature = "model_rknn")]
  Rknn(RknnYolo),
}

impl ModelWrapper {
  #[cfg_attr(not(feature = "model_rknn"), allow(unused_variables))]
  pub fn load(url: &Url, num_classes: usize) -> Result<Self, ModelError> {
    match url.scheme() {
      #[cfg(feature = "model_onnx")]
      "onnx" | "file" => {
        use crate::FromUrl;
        Ok(ModelWrapper::Onnx(OnnxYoloBuilder::from_url(url)?.build()?))
      }
      #[cfg(feature = "model_rknn")]
      "rknn" => {
        use crate::FromUrl;
        let model = RknnYoloBuilder::from_url(url)?
          .num_classes(num_classes)
          .build()?;
        Ok(ModelWrapper::Rknn(model))
      }
      other => Err(ModelError::SchemeMismatch(other.to_string())),
    }
  }

  pub fn backend_name(&self) -> &'static str {
    match *self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(_) => "onnx",
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(_) => "rknn",
    }
  }
}

impl Model for ModelWrapper {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.infer(input),
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(model) => model.infer(input),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn custom_scheme_path_is_percent_decoded() {
    let url = Url::parse("onnx:///opt/models/hard%20hat.onnx?size=640").unwrap();
    assert_eq!(
      model_path_from_url(&url).unwrap(),
      PathBuf::from("/opt/models/hard hat.onnx")
    );
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("tflite:///opt/models/best.tflite").unwrap();
    assert!(matches!(
      ModelWrapper::load(&url, 2),
      Err(ModelError::SchemeMismatch(scheme)) if scheme == "tflite"
    ));
  }

  #[cfg(feature = "model_onnx")]
  #[test]
  fn missing_onnx_model_is_reported() {
    let url = Url::parse("onnx:///nonexistent/kuijia/best.onnx").unwrap();
    assert!(matches!(
      ModelWrapper::load(&url, 2),
      Err(ModelError::NotFound(_))
    ));
  }
}
