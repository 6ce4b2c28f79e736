// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/label.rs - 类别标签
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

//! 类别标签的规范化表示。
//!
//! 模型输出的类别名在进入判定逻辑之前统一经过 [`Label::new`]：去除首尾空白并转为小写。
//! 之后所有比较都基于规范化后的文本，因此 "Helmet"、" HELMET " 与 "helmet" 视为同一类别。

use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
  path::Path,
  str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签不能为空")]
  Empty,
  #[error("读取标签文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("标签文件格式错误: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("标签表为空")]
  EmptyTable,
  #[error("类别编号无效: {0}")]
  InvalidClassId(String),
  #[error("类别 {0} 重复定义")]
  DuplicateClass(u32),
}

/// 规范化后的类别标签（去空白、小写、非空）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

/// 标签集合，有序以保证输出稳定
pub type LabelSet = BTreeSet<Label>;

impl Label {
  pub fn new(raw: impl AsRef<str>) -> Result<Self, LabelError> {
    let normalized = raw.as_ref().trim().to_lowercase();
    if normalized.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Label(normalized))
  }

  /// 调用方保证文本已经是规范形式
  pub(crate) fn from_normalized(text: &str) -> Self {
    debug_assert_eq!(text, text.trim().to_lowercase());
    Label(text.to_string())
  }

  /// 标签表中没有的类别编号
  pub fn unknown_class(class_id: u32) -> Self {
    Label(format!("class-{}", class_id))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for Label {
  type Err = LabelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Label::new(s)
  }
}

impl TryFrom<String> for Label {
  type Error = LabelError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Label::new(value)
  }
}

impl From<Label> for String {
  fn from(label: Label) -> Self {
    label.0
  }
}

impl AsRef<str> for Label {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// 从任意字符串序列构造标签集合，重复项合并
pub fn label_set<I, S>(labels: I) -> Result<LabelSet, LabelError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  labels.into_iter().map(Label::new).collect()
}

/// 把集合渲染成 "a, b, c"，空集合返回 `None`
pub fn join_labels(labels: &LabelSet) -> Option<String> {
  if labels.is_empty() {
    return None;
  }
  Some(
    labels
      .iter()
      .map(Label::as_str)
      .collect::<Vec<_>>()
      .join(", "),
  )
}

#[derive(Deserialize)]
struct LabelFile {
  #[serde(default)]
  names: Vec<String>,
  #[serde(default)]
  labels: BTreeMap<String, String>,
}

/// 类别编号到标签的映射表
///
/// 标签文件为 TOML，支持两种写法：
///
/// ```toml
/// names = ["helmet", "vest", "head", "person"]
/// ```
///
/// ```toml
/// [labels]
/// 0 = "helmet"
/// 1 = "vest"
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
  labels: BTreeMap<u32, Label>,
}

impl LabelMap {
  pub fn from_names<I, S>(names: I) -> Result<Self, LabelError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let labels = names
      .into_iter()
      .enumerate()
      .map(|(idx, name)| Label::new(name).map(|label| (idx as u32, label)))
      .collect::<Result<BTreeMap<_, _>, _>>()?;

    if labels.is_empty() {
      return Err(LabelError::EmptyTable);
    }

    Ok(LabelMap { labels })
  }

  pub fn from_toml_str(text: &str) -> Result<Self, LabelError> {
    let file: LabelFile = toml::from_str(text)?;

    let mut labels = BTreeMap::new();
    for (idx, name) in file.names.iter().enumerate() {
      labels.insert(idx as u32, Label::new(name)?);
    }
    for (key, name) in file.labels.iter() {
      let class_id = key
        .trim()
        .parse::<u32>()
        .map_err(|_| LabelError::InvalidClassId(key.clone()))?;
      if labels.insert(class_id, Label::new(name)?).is_some() {
        return Err(LabelError::DuplicateClass(class_id));
      }
    }

    if labels.is_empty() {
      return Err(LabelError::EmptyTable);
    }

    Ok(LabelMap { labels })
  }

  pub fn load(path: &Path) -> Result<Self, LabelError> {
    debug!("读取标签文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_toml_str(&text)
  }

  pub fn label(&self, class_id: u32) -> Label {
    self
      .labels
      .get(&class_id)
      .cloned()
      .unwrap_or_else(|| Label::unknown_class(class_id))
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// 模型输出所需的类别数（最大编号 + 1）
  pub fn num_classes(&self) -> usize {
    self
      .labels
      .keys()
      .next_back()
      .map(|max| *max as usize + 1)
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn label_is_trimmed_and_lowercased() {
    let label = Label::new("  Safety-VEST ").unwrap();
    assert_eq!(label.as_str(), "safety-vest");
    assert_eq!(label, "safety-vest".parse().unwrap());
  }

  #[test]
  fn blank_label_is_rejected() {
    assert!(matches!(Label::new("   "), Err(LabelError::Empty)));
    assert!(matches!(Label::new(""), Err(LabelError::Empty)));
  }

  #[test]
  fn duplicate_labels_collapse_in_set() {
    let set = label_set(["Helmet", "helmet", "HELMET", "vest"]).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(join_labels(&set).as_deref(), Some("helmet, vest"));
    assert_eq!(join_labels(&LabelSet::new()), None);
  }

  #[test]
  fn label_map_from_name_list() {
    let map = LabelMap::from_toml_str(r#"names = ["Helmet", "Vest", "Person"]"#).unwrap();
    assert_eq!(map.len(), 3);
    assert_eq!(map.num_classes(), 3);
    assert_eq!(map.label(0).as_str(), "helmet");
    assert_eq!(map.label(2).as_str(), "person");
    assert_eq!(map.label(7).as_str(), "class-7");
  }

  #[test]
  fn label_map_from_id_table() {
    let map = LabelMap::from_toml_str(
      r#"
      [labels]
      0 = "head"
      3 = "vest"
      "#,
    )
    .unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map.num_classes(), 4);
    assert_eq!(map.label(3).as_str(), "vest");
    assert_eq!(map.label(1).as_str(), "class-1");
  }

  #[test]
  fn label_map_rejects_bad_tables() {
    assert!(matches!(
      LabelMap::from_toml_str(""),
      Err(LabelError::EmptyTable)
    ));
    assert!(matches!(
      LabelMap::from_toml_str("[labels]\nx = \"helmet\""),
      Err(LabelError::InvalidClassId(_))
    ));
    assert!(matches!(
      LabelMap::from_toml_str("names = [\"helmet\"]\n[labels]\n0 = \"vest\""),
      Err(LabelError::DuplicateClass(0))
    ));
  }

  #[test]
  fn label_serializes_as_plain_string() {
    let label = Label::new("Helmet").unwrap();
    assert_eq!(serde_json::to_string(&label).unwrap(), "\"helmet\"");
    let back: Label = serde_json::from_str("\" VEST\"").unwrap();
    assert_eq!(back.as_str(), "vest");
  }
}
