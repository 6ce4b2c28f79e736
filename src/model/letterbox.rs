// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/model/letterbox.rs - 等比缩放与填充
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};

/// YOLO 训练时使用的灰色填充值
pub const LETTERBOX_FILL: u8 = 114;

/// 把任意尺寸的图像等比缩放到 `size x size` 的正方形输入，并记录反变换参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  src_width: u32,
  src_height: u32,
  size: u32,
  scale: f32,
  new_width: u32,
  new_height: u32,
  pad_x: u32,
  pad_y: u32,
}

impl Letterbox {
  pub fn new(src_width: u32, src_height: u32, size: u32) -> Self {
    let src_w = src_width.max(1);
    let src_h = src_height.max(1);
    let scale = (size as f32 / src_w as f32).min(size as f32 / src_h as f32);
    let new_width = ((src_w as f32 * scale).round() as u32).clamp(1, size);
    let new_height = ((src_h as f32 * scale).round() as u32).clamp(1, size);

    Self {
      src_width: src_w,
      src_height: src_h,
      size,
      scale,
      new_width,
      new_height,
      pad_x: (size - new_width) / 2,
      pad_y: (size - new_height) / 2,
    }
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  pub fn apply(&self, image: &RgbImage) -> RgbImage {
    let resized = imageops::resize(image, self.new_width, self.new_height, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
    canvas
  }

  /// 模型输入坐标系下的 [x_min, y_min, x_max, y_max] 转为相对原图的归一化坐标
  pub fn to_normalized_bbox(&self, bbox: [f32; 4]) -> [f32; 4] {
    let unmap_x =
      |x: f32| ((x - self.pad_x as f32) / self.scale / self.src_width as f32).clamp(0.0, 1.0);
    let unmap_y =
      |y: f32| ((y - self.pad_y as f32) / self.scale / self.src_height as f32).clamp(0.0, 1.0);
    [
      unmap_x(bbox[0]),
      unmap_y(bbox[1]),
      unmap_x(bbox[2]),
      unmap_y(bbox[3]),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn close(a: [f32; 4], b: [f32; 4]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-3)
  }

  #[test]
  fn wide_image_is_padded_vertically() {
    let letterbox = Letterbox::new(1280, 640, 640);
    let canvas = letterbox.apply(&RgbImage::from_pixel(1280, 640, Rgb([255, 0, 0])));

    assert_eq!(canvas.dimensions(), (640, 640));
    assert_eq!(canvas.get_pixel(320, 10), &Rgb([LETTERBOX_FILL; 3]));
    let center = canvas.get_pixel(320, 320);
    assert!(center[0] > 250 && center[1] < 5 && center[2] < 5);
  }

  #[test]
  fn boxes_map_back_to_source_image() {
    // 1280x640 -> 缩放 0.5，上下各填充 160
    let letterbox = Letterbox::new(1280, 640, 640);
    let bbox = letterbox.to_normalized_bbox([160.0, 240.0, 480.0, 400.0]);
    assert!(close(bbox, [0.25, 0.25, 0.75, 0.75]));
  }

  #[test]
  fn boxes_in_padding_are_clamped() {
    let letterbox = Letterbox::new(640, 1280, 640);
    let bbox = letterbox.to_normalized_bbox([0.0, 0.0, 100.0, 640.0]);
    assert_eq!(bbox[0], 0.0);
    assert_eq!(bbox[2], 0.0);
    assert_eq!(bbox[3], 1.0);
  }
}
