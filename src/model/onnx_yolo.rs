// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/model/onnx_yolo.rs - ONNX YOLO 检测模型
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

use tract_onnx::prelude::*;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{
    DetectItem, DetectResult, Model, ModelError,
    letterbox::Letterbox,
    model_path_from_url,
    postprocess::{CANDIDATE_SCORE_FLOOR, decode_yolo_output},
  },
};

const ONNX_YOLO_DEFAULT_INPUT_SIZE: u32 = 640;

type YoloPlan = TypedRunnableModel<TypedModel>;

/// 以 tract 运行的 YOLOv8/v9 ONNX 导出模型（单输入 `[1, 3, S, S]`，单输出）
pub struct OnnxYolo {
  plan: YoloPlan,
  input_size: u32,
  score_floor: f32,
}

pub struct OnnxYoloBuilder {
  model_path: PathBuf,
  input_size: u32,
  score_floor: f32,
}

impl FromUrlWithScheme for OnnxYoloBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxYoloBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME && url.scheme() != "file" {
      return Err(ModelError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut builder = OnnxYoloBuilder::new(model_path_from_url(url)?);
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => {
          let size = value
            .parse::<u32>()
            .map_err(|_| ModelError::InvalidParameter(format!("size={}", value)))?;
          builder = builder.input_size(size);
        }
        _ => warn!("忽略未知的模型参数: {}={}", key, value),
      }
    }

    Ok(builder)
  }
}

impl OnnxYoloBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      input_size: ONNX_YOLO_DEFAULT_INPUT_SIZE,
      score_floor: CANDIDATE_SCORE_FLOOR,
    }
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn build(self) -> Result<OnnxYolo, ModelError> {
    if !self.model_path.is_file() {
      return Err(ModelError::NotFound(self.model_path));
    }
    if self.input_size == 0 || self.input_size % 32 != 0 {
      return Err(ModelError::InvalidParameter(format!(
        "输入尺寸必须是 32 的正整数倍, 实际为 {}",
        self.input_size
      )));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let size = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| model.with_input_fact(0, f32::fact([1, 3, size, size]).into()))
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ModelError::Load(format!("{:#}", e)))?;
    info!("模型加载完成, 输入尺寸 {}x{}", size, size);

    Ok(OnnxYolo {
      plan,
      input_size: self.input_size,
      score_floor: self.score_floor,
    })
  }
}

impl Model for OnnxYolo {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let letterbox = Letterbox::new(input.width(), input.height(), self.input_size);
    let canvas = letterbox.apply(&input.to_rgb_image());

    // NCHW, 归一化到 [0, 1]
    let size = self.input_size as usize;
    let tensor: Tensor = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
    .into();

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| ModelError::Inference(format!("{:#}", e)))?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::Inference("模型没有输出".to_string()))?
      .to_array_view::<f32>()
      .map_err(|e| ModelError::Inference(format!("{:#}", e)))?;

    let shape = output.shape().to_vec();
    let data: Vec<f32> = output.iter().copied().collect();
    let candidates = decode_yolo_output(&data, &shape, self.score_floor)?;

    let items: Vec<DetectItem> = candidates
      .into_iter()
      .map(|candidate| DetectItem {
        class_id: candidate.class_id,
        score: candidate.score,
        bbox: letterbox.to_normalized_bbox(candidate.bbox),
      })
      .filter(|item| item.bbox[2] > item.bbox[0] && item.bbox[3] > item.bbox[1])
      .collect();

    debug!("帧 {} 检测到 {} 个候选框", input.index(), items.len());
    Ok(DetectResult::from(items))
  }
}
