// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/compliance.rs - 安全装备合规判定
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

//! 合规判定：把检测到的标签集合与必需装备集合比较，得到 SAFE / UNSAFE 结论。
//!
//! 判定只看“是否出现”，不看数量和置信度：
//! `missing = required - detected`，`missing` 为空即 SAFE。

use std::fmt;

use serde::Serialize;

use crate::label::{Label, LabelSet};

/// 默认必需装备
pub const DEFAULT_REQUIRED_EQUIPMENT: [&str; 2] = ["helmet", "vest"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComplianceStatus {
  Safe,
  Unsafe,
}

impl fmt::Display for ComplianceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ComplianceStatus::Safe => f.write_str("SAFE"),
      ComplianceStatus::Unsafe => f.write_str("UNSAFE"),
    }
  }
}

/// 合规结论
///
/// 字段只能通过 [`evaluate`] 生成，保证 `missing = required - detected`
/// 且 `status == Safe` 当且仅当 `missing` 为空。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceVerdict {
  status: ComplianceStatus,
  detected_labels: LabelSet,
  missing_labels: LabelSet,
}

impl ComplianceVerdict {
  pub fn status(&self) -> ComplianceStatus {
    self.status
  }

  pub fn is_safe(&self) -> bool {
    self.status == ComplianceStatus::Safe
  }

  /// 所有检测到的标签，包括不在必需集合中的
  pub fn detected_labels(&self) -> &LabelSet {
    &self.detected_labels
  }

  pub fn missing_labels(&self) -> &LabelSet {
    &self.missing_labels
  }
}

pub fn evaluate(detected: &LabelSet, required: &LabelSet) -> ComplianceVerdict {
  let missing_labels: LabelSet = required.difference(detected).cloned().collect();
  let status = if missing_labels.is_empty() {
    ComplianceStatus::Safe
  } else {
    ComplianceStatus::Unsafe
  };

  ComplianceVerdict {
    status,
    detected_labels: detected.clone(),
    missing_labels,
  }
}

/// 必需装备集合，进程启动时确定，之后只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredEquipment {
  labels: LabelSet,
}

impl Default for RequiredEquipment {
  fn default() -> Self {
    Self {
      labels: DEFAULT_REQUIRED_EQUIPMENT
        .iter()
        .map(|name| Label::from_normalized(name))
        .collect(),
    }
  }
}

impl RequiredEquipment {
  pub fn new(labels: LabelSet) -> Self {
    Self { labels }
  }

  pub fn labels(&self) -> &LabelSet {
    &self.labels
  }

  pub fn evaluate(&self, detected: &LabelSet) -> ComplianceVerdict {
    evaluate(detected, &self.labels)
  }
}

impl FromIterator<Label> for RequiredEquipment {
  fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
    Self {
      labels: iter.into_iter().collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::label_set;

  fn set(labels: &[&str]) -> LabelSet {
    label_set(labels.iter().copied()).unwrap()
  }

  #[test]
  fn nothing_detected_is_unsafe() {
    let verdict = evaluate(&set(&[]), &set(&["helmet", "vest"]));
    assert_eq!(verdict.status(), ComplianceStatus::Unsafe);
    assert_eq!(verdict.missing_labels(), &set(&["helmet", "vest"]));
    assert!(verdict.detected_labels().is_empty());
  }

  #[test]
  fn helmet_only_misses_vest() {
    let verdict = evaluate(&set(&["helmet"]), &set(&["helmet", "vest"]));
    assert!(!verdict.is_safe());
    assert_eq!(verdict.missing_labels(), &set(&["vest"]));
  }

  #[test]
  fn full_gear_is_safe() {
    let verdict = evaluate(&set(&["helmet", "vest"]), &set(&["helmet", "vest"]));
    assert!(verdict.is_safe());
    assert!(verdict.missing_labels().is_empty());
  }

  #[test]
  fn extra_detections_are_kept_but_ignored() {
    let verdict = evaluate(
      &set(&["helmet", "vest", "gloves", "person"]),
      &set(&["helmet", "vest"]),
    );
    assert!(verdict.is_safe());
    assert_eq!(
      verdict.detected_labels(),
      &set(&["gloves", "helmet", "person", "vest"])
    );
  }

  #[test]
  fn negative_classes_do_not_satisfy_requirements() {
    let verdict = evaluate(&set(&["no-helmet", "vest"]), &set(&["helmet", "vest"]));
    assert_eq!(verdict.status(), ComplianceStatus::Unsafe);
    assert_eq!(verdict.missing_labels(), &set(&["helmet"]));
  }

  #[test]
  fn empty_requirement_is_vacuously_safe() {
    assert!(evaluate(&set(&[]), &set(&[])).is_safe());
    assert!(evaluate(&set(&["person"]), &set(&[])).is_safe());
  }

  #[test]
  fn mixed_case_detections_are_normalized() {
    let verdict = RequiredEquipment::default().evaluate(&set(&["Helmet", "VEST"]));
    assert!(verdict.is_safe());
  }

  #[test]
  fn default_requirement_is_helmet_and_vest() {
    assert_eq!(
      RequiredEquipment::default().labels(),
      &set(&["helmet", "vest"])
    );
  }

  #[test]
  fn verdict_serializes_for_api() {
    let verdict = evaluate(&set(&["helmet"]), &set(&["helmet", "vest"]));
    let json = serde_json::to_value(&verdict).unwrap();
    assert_eq!(json["status"], "UNSAFE");
    assert_eq!(json["missing_labels"], serde_json::json!(["vest"]));
    assert_eq!(json["detected_labels"], serde_json::json!(["helmet"]));
  }
}
