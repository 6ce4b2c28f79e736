// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/main.rs - 命令行检查程序
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

mod args;

use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use kuijia::{
  label::join_labels,
  logging::init_logging,
  task::{InspectionOutcome, InspectionTask},
};

const EXIT_UNSAFE: u8 = 2;
const EXIT_ERROR: u8 = 1;

fn main() -> ExitCode {
  init_logging();
  let args = args::Args::parse();

  match run(&args) {
    Ok(code) => code,
    Err(e) => {
      error!("{:#}", e);
      eprintln!("错误: {:#}", e);
      ExitCode::from(EXIT_ERROR)
    }
  }
}

fn run(args: &args::Args) -> Result<ExitCode> {
  info!("模型地址: {}", args.detector.model);
  info!("输入文件: {}", args.input.display());
  info!("置信度阈值: {}", args.confidence);

  let required = args.detector.required_equipment()?;
  let provider = args.detector.load_provider()?;
  let task = InspectionTask::new(Arc::new(provider), required);

  let outcome = task.run(&args.input, args.confidence);
  if args.json {
    println!("{}", serde_json::to_string_pretty(&outcome)?);
  } else {
    print_outcome(&outcome);
  }

  Ok(match &outcome {
    InspectionOutcome::Completed(inspection) if inspection.verdict.is_safe() => ExitCode::SUCCESS,
    InspectionOutcome::Completed(_) => ExitCode::from(EXIT_UNSAFE),
    InspectionOutcome::Failed { .. } => ExitCode::from(EXIT_ERROR),
  })
}

fn print_outcome(outcome: &InspectionOutcome) {
  match outcome {
    InspectionOutcome::Completed(inspection) => {
      let verdict = &inspection.verdict;
      println!(
        "Detected Objects: {}",
        join_labels(verdict.detected_labels()).unwrap_or_else(|| "None".to_string())
      );
      println!("Status: {}", verdict.status());
      if let Some(missing) = join_labels(verdict.missing_labels()) {
        println!("Missing: {}", missing);
      }
      if let Some(media) = &inspection.detection.rendered {
        println!("Output: {}", media.path.display());
      }
      println!(
        "Frames: {}, Elapsed: {} ms",
        inspection.detection.frames, inspection.elapsed_ms
      );
    }
    InspectionOutcome::Failed { kind, message } => {
      println!("Analysis failed ({}): {}", kind, message);
    }
  }
}
