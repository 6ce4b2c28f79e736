// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/input.rs - 图像/视频输入
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

use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::frame::RgbFrame;

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

/// 允许上传的文件扩展名，未编译视频解码时不含 `mp4`
#[cfg(feature = "gstreamer_input")]
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "mp4"];
#[cfg(not(feature = "gstreamer_input"))]
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// 扩展名能否被当前构建解码
pub fn is_supported_extension(ext: &str) -> bool {
  let ext = ext.trim_start_matches('.');
  SUPPORTED_EXTENSIONS
    .iter()
    .any(|supported| supported.eq_ignore_ascii_case(ext))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  pub fn from_extension(ext: &str) -> Option<Self> {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
      "jpg" | "jpeg" | "png" => Some(MediaKind::Image),
      "mp4" => Some(MediaKind::Video),
      _ => None,
    }
  }

  pub fn from_path(path: &Path) -> Option<Self> {
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .and_then(Self::from_extension)
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("不支持的媒体类型: {0}")]
  UnsupportedMedia(String),
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("未启用视频解码（需要 gstreamer_input 特性）")]
  VideoDisabled,
}

/// 单个上传文件的帧来源
pub enum MediaInput {
  Image(ImageFileInput),
  #[cfg(feature = "gstreamer_input")]
  Video(GStreamerInput),
}

impl MediaInput {
  pub fn open(path: &Path) -> Result<Self, InputError> {
    let kind = MediaKind::from_path(path)
      .ok_or_else(|| InputError::UnsupportedMedia(path.display().to_string()))?;

    info!("打开输入: {} ({:?})", path.display(), kind);
    match kind {
      MediaKind::Image => Ok(MediaInput::Image(ImageFileInput::open(path)?)),
      #[cfg(feature = "gstreamer_input")]
      MediaKind::Video => Ok(MediaInput::Video(GStreamerInput::open_file(path)?)),
      #[cfg(not(feature = "gstreamer_input"))]
      MediaKind::Video => Err(InputError::VideoDisabled),
    }
  }

  /// 视频帧率，图片或尚未解出首帧时为 `None`
  pub fn fps(&self) -> Option<f64> {
    match self {
      MediaInput::Image(_) => None,
      #[cfg(feature = "gstreamer_input")]
      MediaInput::Video(input) => input.fps(),
    }
  }
}

impl Iterator for MediaInput {
  type Item = Result<RgbFrame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      MediaInput::Image(input) => input.next().map(Ok),
      #[cfg(feature = "gstreamer_input")]
      MediaInput::Video(input) => input.next().map(|frame| frame.map_err(InputError::from)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recognizes_upload_extensions() {
    assert_eq!(MediaKind::from_extension("jpg"), Some(MediaKind::Image));
    assert_eq!(MediaKind::from_extension(".JPEG"), Some(MediaKind::Image));
    assert_eq!(MediaKind::from_extension("png"), Some(MediaKind::Image));
    assert_eq!(MediaKind::from_extension("MP4"), Some(MediaKind::Video));
    assert_eq!(MediaKind::from_extension("gif"), None);
    assert_eq!(MediaKind::from_extension("avi"), None);
  }

  #[test]
  fn classifies_paths() {
    assert_eq!(
      MediaKind::from_path(Path::new("/tmp/site/worker.PNG")),
      Some(MediaKind::Image)
    );
    assert_eq!(MediaKind::from_path(Path::new("clip.mp4")), Some(MediaKind::Video));
    assert_eq!(MediaKind::from_path(Path::new("notes")), None);
  }

  #[cfg(feature = "gstreamer_input")]
  #[test]
  fn video_is_accepted_when_decoder_is_built() {
    assert!(is_supported_extension("mp4"));
    assert!(is_supported_extension(".MP4"));
    if let Err(err) = MediaInput::open(Path::new("/nonexistent/clip.mp4")) {
      assert!(!matches!(err, InputError::UnsupportedMedia(_)));
      assert!(!matches!(err, InputError::VideoDisabled));
    }
  }

  #[cfg(not(feature = "gstreamer_input"))]
  #[test]
  fn video_is_not_offered_without_decoder() {
    assert!(!is_supported_extension("mp4"));
    let err = MediaInput::open(Path::new("/nonexistent/clip.mp4"))
      .err()
      .unwrap();
    assert!(matches!(err, InputError::VideoDisabled));
  }

  #[test]
  fn image_extensions_are_always_supported() {
    for ext in ["jpg", "JPEG", ".png"] {
      assert!(is_supported_extension(ext), "{ext}");
    }
    assert!(!is_supported_extension("gif"));
    assert!(!is_supported_extension(""));
  }

  #[test]
  fn unsupported_file_is_rejected_before_decoding() {
    let err = MediaInput::open(Path::new("/nonexistent/report.pdf"))
      .err()
      .unwrap();
    assert!(matches!(err, InputError::UnsupportedMedia(_)));
  }
}
