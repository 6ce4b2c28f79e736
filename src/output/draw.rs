// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{detection::DetectedObject, frame::RgbFrame, label::Label};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 未指定字体时依次尝试的系统字体
const SYSTEM_FONT_PATHS: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(PathBuf),
}

/// 在帧上画检测框与标签
///
/// 没有可用字体时只画框，不画文字。
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Draw {
  pub fn with_font(font: FontArc) -> Self {
    Self {
      font: Some(font),
      ..Self::default()
    }
  }

  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font =
      FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))?;
    info!("加载标签字体: {}", path.display());
    Ok(Self::with_font(font))
  }

  /// 在常见的系统字体位置中寻找一个可用字体
  pub fn discover() -> Self {
    for candidate in SYSTEM_FONT_PATHS {
      let path = Path::new(candidate);
      if !path.is_file() {
        continue;
      }
      match Self::with_font_file(path) {
        Ok(draw) => return draw,
        Err(e) => debug!("跳过字体 {}: {}", candidate, e),
      }
    }

    warn!("未找到可用字体, 标注图中将不显示标签文字");
    Self::default()
  }

  pub fn font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_frame(&self, frame: &RgbFrame, objects: &[DetectedObject]) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_objects(&mut image, objects);
    image
  }

  pub fn draw_objects(&self, image: &mut RgbImage, objects: &[DetectedObject]) {
    for object in objects {
      self.draw_object(image, object);
    }
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_object(&self, image: &mut RgbImage, object: &DetectedObject) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let bbox = &object.bbox;
    let x_min = ((bbox[0] * w as f32).floor() as i32).clamp(0, w - 1);
    let y_min = ((bbox[1] * h as f32).floor() as i32).clamp(0, h - 1);
    let x_max = ((bbox[2] * w as f32).ceil() as i32).clamp(0, w - 1);
    let y_max = ((bbox[3] * h as f32).ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = label_color(&object.label);

    // 加粗边框
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    let text = format!("{} {:.2}", object.label, object.confidence);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &text);
    let label_w = (text_w as i32 + 2 * LABEL_TEXT_PADDING).min(w - x_min);
    let label_h = text_h as i32 + 2 * LABEL_TEXT_PADDING;

    // 标签放在框上方，放不下时放在框内
    let label_y = if y_min >= label_h { y_min - label_h } else { y_min };
    if label_w <= 0 || label_h <= 0 {
      return;
    }

    let rect = Rect::at(x_min, label_y).of_size(label_w as u32, label_h as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      TEXT_COLOR,
      x_min + LABEL_TEXT_PADDING,
      label_y + LABEL_TEXT_PADDING,
      scale,
      font,
      &text,
    );
  }
}

/// 同一标签总是同一颜色
pub fn label_color(label: &Label) -> Rgb<u8> {
  match label.as_str() {
    "helmet" => Rgb([0, 200, 83]),
    "vest" => Rgb([255, 171, 0]),
    other => {
      let hash = other
        .bytes()
        .fold(2166136261u32, |acc, b| (acc ^ b as u32).wrapping_mul(16777619));
      hsv_to_rgb((hash % 360) as f32, 0.8, 0.9)
    }
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
