// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/model/postprocess.rs - 检测结果后处理
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

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::{DetectItem, DetectResult, ModelError};

/// 后端输出候选框的最低分数，与页面滑块下限一致
pub const CANDIDATE_SCORE_FLOOR: f32 = 0.2;

/// 默认 NMS IoU 阈值
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// 模型输入坐标系下的候选框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

/// 解析 YOLOv8/v9 导出的单输出张量
///
/// 形状为 `[1, 4 + nc, N]`（通道在前）或 `[1, N, 4 + nc]`，每个框为
/// `cx, cy, w, h` 加各类别分数，无 objectness。
pub fn decode_yolo_output(
  data: &[f32],
  shape: &[usize],
  score_floor: f32,
) -> Result<Vec<Candidate>, ModelError> {
  let (a, b) = match shape {
    [1, a, b] | [a, b] => (*a, *b),
    _ => return Err(ModelError::InvalidOutputShape(shape.to_vec())),
  };

  // 框的数量总是远多于属性数量
  let (attrs, boxes, channels_first) = if a <= b { (a, b, true) } else { (b, a, false) };
  if attrs <= 4 || data.len() != attrs * boxes {
    return Err(ModelError::InvalidOutputShape(shape.to_vec()));
  }

  let value = |box_idx: usize, attr: usize| {
    if channels_first {
      data[attr * boxes + box_idx]
    } else {
      data[box_idx * attrs + attr]
    }
  };

  let mut candidates = Vec::new();
  for i in 0..boxes {
    let (class_id, score) = (4..attrs)
      .map(|attr| ((attr - 4) as u32, value(i, attr)))
      .fold((0u32, f32::MIN), |best, current| {
        if current.1 > best.1 { current } else { best }
      });

    if score < score_floor {
      continue;
    }

    let (cx, cy, w, h) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3));
    candidates.push(Candidate {
      class_id,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }

  debug!("候选框数量: {} / {}", candidates.len(), boxes);
  Ok(candidates)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);

  let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = inter_w * inter_h;
  let union = area(a) + area(b) - inter;

  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按类别分别做非极大值抑制
pub fn nms(items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  let mut class_groups: BTreeMap<u32, Vec<DetectItem>> = BTreeMap::new();
  for item in items {
    class_groups.entry(item.class_id).or_default().push(item);
  }

  let mut kept = Vec::new();
  for (_, mut group) in class_groups {
    group.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut suppressed = vec![false; group.len()];
    for i in 0..group.len() {
      if suppressed[i] {
        continue;
      }
      for j in (i + 1)..group.len() {
        if !suppressed[j] && iou(&group[i].bbox, &group[j].bbox) > iou_threshold {
          suppressed[j] = true;
        }
      }
      kept.push(group[i].clone());
    }
  }

  kept
}

/// 阈值过滤（含等于）+ NMS，结果按分数降序
pub fn refine(result: &DetectResult, threshold: f32, iou_threshold: f32) -> DetectResult {
  let above: Vec<DetectItem> = result
    .iter()
    .filter(|item| item.score >= threshold)
    .cloned()
    .collect();

  let mut kept = nms(above, iou_threshold);
  kept.sort_by(|a, b| b.score.total_cmp(&a.score));
  DetectResult::from(kept)
}
