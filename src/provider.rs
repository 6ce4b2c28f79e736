// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/provider.rs - 推理提供者
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

//! 把一个媒体文件变成 [`DetectionResult`]：解码、逐帧推理、阈值过滤与 NMS、
//! 类别映射为标签、渲染标注输出。

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  detection::{DetectedObject, DetectionResult},
  frame::RgbFrame,
  input::{InputError, MediaInput, MediaKind},
  label::LabelMap,
  model::{
    DetectResult, Model, ModelError,
    postprocess::{DEFAULT_IOU_THRESHOLD, refine},
  },
  output::{Draw, MediaOutput, OutputError, Render, prune_outputs},
};

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
  #[error("置信度阈值 {0} 超出范围 [0.2, 1.0]")]
  OutOfRange(f32),
  #[error("无效的置信度阈值: {0}")]
  Invalid(String),
}

/// 报告检测结果所需的最低置信度，取值 [0.2, 1.0]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
  pub const MIN: f32 = 0.2;
  pub const MAX: f32 = 1.0;
  pub const DEFAULT: f32 = 0.5;
  /// 页面滑块步长
  pub const STEP: f32 = 0.05;

  pub fn new(value: f32) -> Result<Self, ThresholdError> {
    if !(Self::MIN..=Self::MAX).contains(&value) {
      return Err(ThresholdError::OutOfRange(value));
    }
    Ok(Self(value))
  }

  pub fn value(self) -> f32 {
    self.0
  }
}

impl Default for ConfidenceThreshold {
  fn default() -> Self {
    Self(Self::DEFAULT)
  }
}

impl fmt::Display for ConfidenceThreshold {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}", self.0)
  }
}

impl FromStr for ConfidenceThreshold {
  type Err = ThresholdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let value = s
      .trim()
      .parse::<f32>()
      .map_err(|_| ThresholdError::Invalid(s.to_string()))?;
    if value.is_nan() {
      return Err(ThresholdError::Invalid(s.to_string()));
    }
    Self::new(value)
  }
}

impl TryFrom<f32> for ConfidenceThreshold {
  type Error = ThresholdError;

  fn try_from(value: f32) -> Result<Self, Self::Error> {
    Self::new(value)
  }
}

impl From<ConfidenceThreshold> for f32 {
  fn from(threshold: ConfidenceThreshold) -> Self {
    threshold.0
  }
}

/// 推理失败的类别，页面与 JSON 接口据此区分错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  UnsupportedMedia,
  Decode,
  Model,
  Render,
  Io,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::UnsupportedMedia => "unsupported_media",
      ErrorKind::Decode => "decode",
      ErrorKind::Model => "model",
      ErrorKind::Render => "render",
      ErrorKind::Io => "io",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("不支持的媒体类型: {0}")]
  UnsupportedMedia(String),
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
  #[error("渲染错误: {0}")]
  Render(#[from] OutputError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("没有解码出任何帧: {0}")]
  NoFrames(PathBuf),
}

impl InferenceError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      InferenceError::UnsupportedMedia(_) => ErrorKind::UnsupportedMedia,
      InferenceError::Input(InputError::UnsupportedMedia(_) | InputError::VideoDisabled) => {
        ErrorKind::UnsupportedMedia
      }
      InferenceError::Input(_) | InferenceError::NoFrames(_) => ErrorKind::Decode,
      InferenceError::Model(_) => ErrorKind::Model,
      InferenceError::Render(_) => ErrorKind::Render,
      InferenceError::Io(_) => ErrorKind::Io,
    }
  }
}

pub trait InferenceProvider: Send + Sync {
  /// 检测媒体文件中的目标，只返回置信度不低于阈值的结果
  fn detect(
    &self,
    media: &Path,
    threshold: ConfidenceThreshold,
  ) -> Result<DetectionResult, InferenceError>;
}

/// 以 YOLO 类检测模型实现的推理提供者
pub struct YoloProvider<M> {
  model: M,
  labels: LabelMap,
  iou_threshold: f32,
  max_frames: u64,
  keep_outputs: usize,
  output_dir: PathBuf,
  draw: Arc<Draw>,
}

/// 输出目录默认保留的标注文件数
pub const DEFAULT_KEEP_OUTPUTS: usize = 100;

impl<M> YoloProvider<M>
where
  M: Model<Input = RgbFrame, Output = DetectResult, Error = ModelError>,
{
  pub fn new(model: M, labels: LabelMap, output_dir: impl Into<PathBuf>) -> Self {
    Self {
      model,
      labels,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_frames: 0,
      keep_outputs: DEFAULT_KEEP_OUTPUTS,
      output_dir: output_dir.into(),
      draw: Arc::new(Draw::default()),
    }
  }

  pub fn iou_threshold(mut self, iou_threshold: f32) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  /// 0 表示不限制
  pub fn max_frames(mut self, max_frames: u64) -> Self {
    self.max_frames = max_frames;
    self
  }

  /// 输出目录最多保留的标注文件数，0 表示不清理
  pub fn keep_outputs(mut self, keep_outputs: usize) -> Self {
    self.keep_outputs = keep_outputs;
    self
  }

  pub fn draw(mut self, draw: Draw) -> Self {
    self.draw = Arc::new(draw);
    self
  }

  fn detect_frame(
    &self,
    frame: &RgbFrame,
    threshold: ConfidenceThreshold,
  ) -> Result<Vec<DetectedObject>, InferenceError> {
    let raw = self.model.infer(frame)?;
    let refined = refine(&raw, threshold.value(), self.iou_threshold);
    debug!(
      "帧 {} ({} ms): 候选框 {} 个, 保留 {} 个",
      frame.index(),
      frame.timestamp_ms(),
      raw.len(),
      refined.len()
    );

    Ok(
      refined
        .iter()
        .map(|item| DetectedObject {
          label: self.labels.label(item.class_id),
          confidence: item.score,
          bbox: item.bbox,
          frame_index: frame.index(),
        })
        .collect(),
    )
  }
}

impl<M> InferenceProvider for YoloProvider<M>
where
  M: Model<Input = RgbFrame, Output = DetectResult, Error = ModelError> + Send + Sync,
{
  fn detect(
    &self,
    media: &Path,
    threshold: ConfidenceThreshold,
  ) -> Result<DetectionResult, InferenceError> {
    let kind = MediaKind::from_path(media)
      .ok_or_else(|| InferenceError::UnsupportedMedia(media.display().to_string()))?;

    std::fs::create_dir_all(&self.output_dir)?;
    let mut input = MediaInput::open(media)?;
    let mut output = MediaOutput::create(
      kind,
      &self.output_dir,
      &output_stem(media),
      image_extension(media),
      self.draw.clone(),
    );

    let mut objects = Vec::new();
    let mut frames = 0u64;
    while let Some(frame) = input.next() {
      let frame = frame?;
      if frames == 0
        && let Some(fps) = input.fps()
      {
        output.set_fps(fps);
      }

      let frame_objects = self.detect_frame(&frame, threshold)?;
      output.render_result(&frame, &frame_objects)?;
      objects.extend(frame_objects);
      frames += 1;

      if self.max_frames > 0 && frames >= self.max_frames {
        info!("已达到最大帧数 {}, 停止分析", self.max_frames);
        break;
      }
    }

    if frames == 0 {
      return Err(InferenceError::NoFrames(media.to_path_buf()));
    }

    let rendered = output.finish()?;
    if self.keep_outputs > 0
      && rendered.is_some()
      && let Err(e) = prune_outputs(&self.output_dir, self.keep_outputs)
    {
      warn!("清理旧输出失败: {}", e);
    }
    info!(
      "检测完成: {} 帧, {} 个目标, 阈值 {}",
      frames,
      objects.len(),
      threshold
    );

    Ok(DetectionResult {
      objects,
      rendered,
      frames,
    })
  }
}

static OUTPUT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// 输出文件名：时间戳 + 序号 + 清理后的原文件名
fn output_stem(media: &Path) -> String {
  let stem: String = media
    .file_stem()
    .and_then(|stem| stem.to_str())
    .unwrap_or_default()
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
    .take(48)
    .collect();
  let stem = stem.trim_matches('_');
  let stem = if stem.is_empty() { "upload" } else { stem };

  let seq = OUTPUT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
  format!(
    "{}-{:04}-{}",
    chrono::Local::now().format("%Y%m%d-%H%M%S"),
    seq % 10_000,
    stem
  )
}

fn image_extension(media: &Path) -> &'static str {
  match media
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| ext.to_ascii_lowercase())
    .as_deref()
  {
    Some("jpg") | Some("jpeg") => "jpg",
    _ => "png",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  struct FixedModel(Vec<DetectItem>);

  impl Model for FixedModel {
    type Input = RgbFrame;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Ok(DetectResult::from(self.0.clone()))
    }
  }

  fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  fn provider(dir: &Path, items: Vec<DetectItem>) -> YoloProvider<FixedModel> {
    let labels = LabelMap::from_names(["Helmet", "vest", "head"]).unwrap();
    YoloProvider::new(FixedModel(items), labels, dir.join("out"))
  }

  fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(64, 48, image::Rgb([40, 80, 120]))
      .save(&path)
      .unwrap();
    path
  }

  #[test]
  fn threshold_range_is_enforced() {
    assert!(ConfidenceThreshold::new(0.2).is_ok());
    assert!(ConfidenceThreshold::new(1.0).is_ok());
    assert_eq!(
      ConfidenceThreshold::new(0.1),
      Err(ThresholdError::OutOfRange(0.1))
    );
    assert!(ConfidenceThreshold::new(1.01).is_err());
    assert!("NaN".parse::<ConfidenceThreshold>().is_err());
    assert!("abc".parse::<ConfidenceThreshold>().is_err());
    assert_eq!(
      " 0.35 ".parse::<ConfidenceThreshold>().unwrap().value(),
      0.35
    );
    assert_eq!(ConfidenceThreshold::default().value(), 0.5);
  }

  #[test]
  fn detects_and_renders_an_image() {
    let dir = tempfile::tempdir().unwrap();
    let media = write_png(dir.path(), "worker one.png");
    let provider = provider(
      dir.path(),
      vec![
        item(0, 0.91, [0.1, 0.1, 0.3, 0.3]),
        item(1, 0.40, [0.4, 0.4, 0.8, 0.9]),
        item(7, 0.75, [0.5, 0.1, 0.6, 0.2]),
      ],
    );

    let result = provider
      .detect(&media, ConfidenceThreshold::new(0.5).unwrap())
      .unwrap();

    assert_eq!(result.frames, 1);
    let labels: Vec<&str> = result.objects.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels, vec!["helmet", "class-7"]);

    let rendered = result.rendered.unwrap();
    assert_eq!(rendered.kind, MediaKind::Image);
    assert!(rendered.path.starts_with(dir.path().join("out")));
    assert!(rendered.file_name().unwrap().ends_with("-worker_one.png"));
    assert!(rendered.path.is_file());
  }

  #[test]
  fn output_directory_stays_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let media = write_png(dir.path(), "site.png");
    let provider =
      provider(dir.path(), vec![item(0, 0.9, [0.1, 0.1, 0.5, 0.5])]).keep_outputs(2);

    let mut last = None;
    for _ in 0..5 {
      let result = provider
        .detect(&media, ConfidenceThreshold::default())
        .unwrap();
      last = result.rendered;
    }

    let outputs = std::fs::read_dir(dir.path().join("out")).unwrap().count();
    assert_eq!(outputs, 2);
    assert!(last.unwrap().path.is_file());
  }

  #[test]
  fn scores_equal_to_threshold_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let media = write_png(dir.path(), "edge.png");
    let provider = provider(dir.path(), vec![item(1, 0.5, [0.1, 0.1, 0.9, 0.9])]);

    let result = provider
      .detect(&media, ConfidenceThreshold::new(0.5).unwrap())
      .unwrap();
    assert_eq!(result.objects.len(), 1);
    assert_eq!(result.objects[0].label.as_str(), "vest");
  }

  #[test]
  fn unsupported_media_fails_before_decoding() {
    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join("clip.gif");
    std::fs::write(&media, b"GIF89a").unwrap();

    let err = provider(dir.path(), vec![])
      .detect(&media, ConfidenceThreshold::default())
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedMedia);
  }

  #[test]
  fn corrupt_image_is_a_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join("broken.jpg");
    std::fs::write(&media, b"definitely not a jpeg").unwrap();

    let err = provider(dir.path(), vec![])
      .detect(&media, ConfidenceThreshold::default())
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
  }

  #[test]
  fn output_names_are_unique_and_sanitized() {
    let a = output_stem(Path::new("/tmp/../site camera#1.jpg"));
    let b = output_stem(Path::new("/tmp/../site camera#1.jpg"));
    assert_ne!(a, b);
    assert!(a.ends_with("-site_camera_1"));
    assert!(!a.contains('/'));
    assert!(output_stem(Path::new("/tmp/###.png")).ends_with("-upload"));
  }
}
