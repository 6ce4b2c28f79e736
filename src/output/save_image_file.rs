// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像
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

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use thiserror::Error;
use tracing::info;

use crate::{
  detection::DetectedObject,
  frame::RgbFrame,
  output::{Render, draw::Draw},
};

/// 只保存第一帧的标注结果，视频未启用编码时用作预览图
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Arc<Draw>,
  written: bool,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>, draw: Arc<Draw>) -> Self {
    Self {
      path: path.into(),
      draw,
      written: false,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn is_written(&self) -> bool {
    self.written
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;

    info!("保存标注图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render<RgbFrame, [DetectedObject]> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(
    &mut self,
    frame: &RgbFrame,
    objects: &[DetectedObject],
  ) -> Result<(), Self::Error> {
    if self.written {
      return Ok(());
    }

    let image = self.draw.draw_frame(frame, objects);
    self.save_image(image)?;
    self.written = true;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::Label;

  #[test]
  fn saves_only_the_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let mut output = SaveImageFileOutput::new(&path, Arc::new(Draw::default()));

    let objects = vec![DetectedObject {
      label: Label::new("helmet").unwrap(),
      confidence: 0.8,
      bbox: [0.0, 0.0, 0.5, 0.5],
      frame_index: 0,
    }];
    output
      .render_result(&RgbFrame::with_shape(32, 24), &objects)
      .unwrap();
    assert!(output.is_written());

    let first = image::open(&path).unwrap();
    assert_eq!((first.width(), first.height()), (32, 24));

    // 第二帧尺寸不同，文件应保持不变
    output
      .render_result(&RgbFrame::with_shape(8, 8).with_position(1, 40), &[])
      .unwrap();
    let still_first = image::open(&path).unwrap();
    assert_eq!((still_first.width(), still_first.height()), (32, 24));
  }
}
