// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/detection.rs - 检测结果
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

use serde::Serialize;

use crate::{
  input::MediaKind,
  label::{Label, LabelSet},
};

/// 一个高于阈值的检测框
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedObject {
  pub label: Label,
  pub confidence: f32,
  /// 归一化坐标 [x_min, y_min, x_max, y_max]
  pub bbox: [f32; 4],
  pub frame_index: u64,
}

/// 标注后的输出文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMedia {
  pub path: PathBuf,
  pub kind: MediaKind,
}

impl RenderedMedia {
  pub fn file_name(&self) -> Option<&str> {
    self.path.file_name().and_then(|name| name.to_str())
  }
}

/// 一次检测调用的全部结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionResult {
  pub objects: Vec<DetectedObject>,
  pub rendered: Option<RenderedMedia>,
  pub frames: u64,
}

impl DetectionResult {
  /// 检测到的标签集合，同类多次检测只算一次
  pub fn labels(&self) -> LabelSet {
    self.objects.iter().map(|obj| obj.label.clone()).collect()
  }

  pub fn is_empty(&self) -> bool {
    self.objects.is_empty()
  }
}
