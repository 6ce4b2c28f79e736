// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/task.rs - 检查任务
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

use std::{path::Path, sync::Arc, time::Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
  compliance::{ComplianceVerdict, RequiredEquipment},
  detection::DetectionResult,
  provider::{ConfidenceThreshold, ErrorKind, InferenceProvider},
};

/// 一次成功的检查
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
  pub detection: DetectionResult,
  pub verdict: ComplianceVerdict,
  pub threshold: ConfidenceThreshold,
  pub elapsed_ms: u64,
}

/// 检查结果，失败与 SAFE / UNSAFE 明确区分
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InspectionOutcome {
  Completed(Inspection),
  Failed { kind: ErrorKind, message: String },
}

impl InspectionOutcome {
  pub fn inspection(&self) -> Option<&Inspection> {
    match self {
      InspectionOutcome::Completed(inspection) => Some(inspection),
      InspectionOutcome::Failed { .. } => None,
    }
  }
}

/// 推理 + 合规判定
#[derive(Clone)]
pub struct InspectionTask {
  provider: Arc<dyn InferenceProvider>,
  required: RequiredEquipment,
}

impl InspectionTask {
  pub fn new(provider: Arc<dyn InferenceProvider>, required: RequiredEquipment) -> Self {
    Self { provider, required }
  }

  pub fn required(&self) -> &RequiredEquipment {
    &self.required
  }

  pub fn run(&self, media: &Path, threshold: ConfidenceThreshold) -> InspectionOutcome {
    info!("开始检查: {} (阈值 {})", media.display(), threshold);
    let now = Instant::now();

    let detection = match self.provider.detect(media, threshold) {
      Ok(detection) => detection,
      Err(e) => {
        warn!("检查失败 ({}): {}", e.kind(), e);
        return InspectionOutcome::Failed {
          kind: e.kind(),
          message: e.to_string(),
        };
      }
    };

    let verdict = self.required.evaluate(&detection.labels());
    let elapsed = now.elapsed();
    info!(
      "检查完成，结论 {}，缺失 {} 项，耗时: {:.2?}",
      verdict.status(),
      verdict.missing_labels().len(),
      elapsed
    );

    InspectionOutcome::Completed(Inspection {
      detection,
      verdict,
      threshold,
      elapsed_ms: elapsed.as_millis() as u64,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    compliance::ComplianceStatus,
    detection::DetectedObject,
    label::{Label, label_set},
    provider::InferenceError,
  };

  struct StubProvider(Vec<&'static str>);

  impl InferenceProvider for StubProvider {
    fn detect(
      &self,
      media: &Path,
      threshold: ConfidenceThreshold,
    ) -> Result<DetectionResult, InferenceError> {
      if media.extension().is_some_and(|ext| ext == "gif") {
        return Err(InferenceError::UnsupportedMedia(media.display().to_string()));
      }
      let objects = self
        .0
        .iter()
        .map(|name| DetectedObject {
          label: Label::new(name).unwrap(),
          confidence: threshold.value(),
          bbox: [0.0, 0.0, 1.0, 1.0],
          frame_index: 0,
        })
        .collect();
      Ok(DetectionResult {
        objects,
        rendered: None,
        frames: 1,
      })
    }
  }

  fn task(labels: Vec<&'static str>) -> InspectionTask {
    InspectionTask::new(Arc::new(StubProvider(labels)), RequiredEquipment::default())
  }

  #[test]
  fn missing_vest_is_unsafe() {
    let outcome = task(vec!["Helmet", "person"])
      .run(Path::new("a.jpg"), ConfidenceThreshold::default());
    let inspection = outcome.inspection().unwrap();
    assert_eq!(inspection.verdict.status(), ComplianceStatus::Unsafe);
    assert_eq!(inspection.verdict.missing_labels(), &label_set(["vest"]).unwrap());
    assert!(inspection.verdict.detected_labels().contains(&Label::new("person").unwrap()));
  }

  #[test]
  fn full_gear_is_safe() {
    let outcome = task(vec!["helmet", "vest", "helmet"])
      .run(Path::new("a.png"), ConfidenceThreshold::default());
    assert!(outcome.inspection().unwrap().verdict.is_safe());
  }

  #[test]
  fn provider_failure_is_not_a_verdict() {
    let outcome = task(vec!["helmet", "vest"])
      .run(Path::new("a.gif"), ConfidenceThreshold::default());
    assert!(outcome.inspection().is_none());
    match outcome {
      InspectionOutcome::Failed { kind, .. } => assert_eq!(kind, ErrorKind::UnsupportedMedia),
      InspectionOutcome::Completed(_) => panic!("expected failure"),
    }
  }

  #[test]
  fn outcome_serializes_with_tag() {
    let outcome = task(vec!["helmet"]).run(Path::new("a.png"), ConfidenceThreshold::default());
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["outcome"], "completed");
    assert_eq!(json["verdict"]["status"], "UNSAFE");
    assert_eq!(json["verdict"]["missing_labels"][0], "vest");
    assert_eq!(json["threshold"], 0.5);

    let failed = task(vec![]).run(Path::new("a.gif"), ConfidenceThreshold::default());
    let json = serde_json::to_value(&failed).unwrap();
    assert_eq!(json["outcome"], "failed");
    assert_eq!(json["kind"], "unsupported_media");
  }
}
