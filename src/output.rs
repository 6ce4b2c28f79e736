// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/output.rs - 标注结果输出
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

use std::{fs, io, path::Path, sync::Arc};

use thiserror::Error;
use tracing::debug;

use crate::{
  detection::{DetectedObject, RenderedMedia},
  frame::RgbFrame,
  input::MediaKind,
};

pub trait Render<Frame, Output: ?Sized> {
  type Error;
  fn render_result(&mut self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;
pub use self::draw::{Draw, DrawError};

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
}

/// 按输入类型选择的标注输出
///
/// 视频在未启用 `gstreamer_output` 时退化为首帧预览图。
pub enum MediaOutput {
  Image(SaveImageFileOutput),
  #[cfg(feature = "gstreamer_output")]
  Video(GStreamerVideoOutput),
}

impl MediaOutput {
  /// `image_ext` 为图像输出的扩展名（`png`、`jpg`）
  pub fn create(
    kind: MediaKind,
    dir: &Path,
    stem: &str,
    image_ext: &str,
    draw: Arc<Draw>,
  ) -> Self {
    match kind {
      MediaKind::Image => {
        let path = dir.join(format!("{}.{}", stem, image_ext));
        MediaOutput::Image(SaveImageFileOutput::new(path, draw))
      }
      #[cfg(feature = "gstreamer_output")]
      MediaKind::Video => {
        let path = dir.join(format!("{}.mp4", stem));
        MediaOutput::Video(GStreamerVideoOutput::new(path, draw))
      }
      #[cfg(not(feature = "gstreamer_output"))]
      MediaKind::Video => {
        let path = dir.join(format!("{}-preview.png", stem));
        MediaOutput::Image(SaveImageFileOutput::new(path, draw))
      }
    }
  }

  #[cfg_attr(not(feature = "gstreamer_output"), allow(unused_variables))]
  pub fn set_fps(&mut self, fps: f64) {
    match self {
      MediaOutput::Image(_) => {}
      #[cfg(feature = "gstreamer_output")]
      MediaOutput::Video(output) => output.set_fps(fps),
    }
  }

  /// 结束输出，返回已写入的标注文件
  pub fn finish(self) -> Result<Option<RenderedMedia>, OutputError> {
    match self {
      MediaOutput::Image(output) => Ok(output.is_written().then(|| RenderedMedia {
        path: output.path().to_path_buf(),
        kind: MediaKind::Image,
      })),
      #[cfg(feature = "gstreamer_output")]
      MediaOutput::Video(mut output) => {
        let written = output.finish()?;
        Ok(written.then(|| RenderedMedia {
          path: output.path().to_path_buf(),
          kind: MediaKind::Video,
        }))
      }
    }
  }
}

/// 标注输出的文件名以 `YYYYmmdd-HHMMSS-` 开头
fn is_rendered_output(name: &str) -> bool {
  let bytes = name.as_bytes();
  bytes.len() > 16
    && bytes[..8].iter().all(u8::is_ascii_digit)
    && bytes[8] == b'-'
    && bytes[9..15].iter().all(u8::is_ascii_digit)
    && bytes[15] == b'-'
}

/// 只保留目录中最新的 `keep` 个标注输出，返回删除的文件数
///
/// 不符合输出命名的文件不会被触碰。
pub fn prune_outputs(dir: &Path, keep: usize) -> io::Result<usize> {
  let mut outputs = Vec::new();
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    let name = entry.file_name();
    let Some(name) = name.to_str() else {
      continue;
    };
    if !is_rendered_output(name) || !entry.file_type()?.is_file() {
      continue;
    }
    let modified = entry.metadata()?.modified()?;
    outputs.push((modified, name.to_string(), entry.path()));
  }

  if outputs.len() <= keep {
    return Ok(0);
  }

  outputs.sort();
  let excess = outputs.len() - keep;
  let mut removed = 0;
  for (_, _, path) in outputs.into_iter().take(excess) {
    match fs::remove_file(&path) {
      Ok(()) => {
        debug!("删除旧输出: {}", path.display());
        removed += 1;
      }
      // 并发请求可能已经删除
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(e),
    }
  }
  Ok(removed)
}

impl Render<RgbFrame, [DetectedObject]> for MediaOutput {
  type Error = OutputError;

  fn render_result(
    &mut self,
    frame: &RgbFrame,
    objects: &[DetectedObject],
  ) -> Result<(), Self::Error> {
    match self {
      MediaOutput::Image(output) => output
        .render_result(frame, objects)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      MediaOutput::Video(output) => output
        .render_result(frame, objects)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn image_output_reports_rendered_media() {
    let dir = tempfile::tempdir().unwrap();
    let mut output = MediaOutput::create(
      MediaKind::Image,
      dir.path(),
      "20260101-000000-site",
      "jpg",
      Arc::new(Draw::default()),
    );
    output
      .render_result(&RgbFrame::with_shape(16, 16), &[])
      .unwrap();

    let rendered = output.finish().unwrap().unwrap();
    assert_eq!(rendered.kind, MediaKind::Image);
    assert_eq!(rendered.file_name(), Some("20260101-000000-site.jpg"));
    assert!(rendered.path.is_file());
  }

  #[test]
  fn nothing_rendered_means_no_media() {
    let dir = tempfile::tempdir().unwrap();
    let output = MediaOutput::create(
      MediaKind::Image,
      dir.path(),
      "empty",
      "png",
      Arc::new(Draw::default()),
    );
    assert!(output.finish().unwrap().is_none());
  }

  #[test]
  fn pruning_keeps_newest_outputs_only() {
    let dir = tempfile::tempdir().unwrap();
    for seq in 0..5 {
      let name = format!("20260101-000000-{:04}-site.png", seq);
      fs::write(dir.path().join(name), b"png").unwrap();
    }
    fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();

    assert_eq!(prune_outputs(dir.path(), 2).unwrap(), 3);
    let mut left: Vec<String> = fs::read_dir(dir.path())
      .unwrap()
      .map(|entry| entry.unwrap().file_name().into_string().unwrap())
      .collect();
    left.sort();
    assert_eq!(left.len(), 3);
    assert!(left.contains(&"notes.txt".to_string()));
    assert!(left.contains(&"20260101-000000-0004-site.png".to_string()));

    assert_eq!(prune_outputs(dir.path(), 2).unwrap(), 0);
  }

  #[test]
  fn output_names_are_recognized() {
    assert!(is_rendered_output("20260101-120000-0001-site.png"));
    assert!(!is_rendered_output("site.png"));
    assert!(!is_rendered_output("2026-01-01-site.png"));
  }

  #[cfg(not(feature = "gstreamer_output"))]
  #[test]
  fn video_without_encoder_falls_back_to_preview() {
    let dir = tempfile::tempdir().unwrap();
    let mut output = MediaOutput::create(
      MediaKind::Video,
      dir.path(),
      "clip",
      "png",
      Arc::new(Draw::default()),
    );
    output
      .render_result(&RgbFrame::with_shape(16, 16), &[])
      .unwrap();
    let rendered = output.finish().unwrap().unwrap();
    assert_eq!(rendered.kind, MediaKind::Image);
    assert_eq!(rendered.file_name(), Some("clip-preview.png"));
  }
}
