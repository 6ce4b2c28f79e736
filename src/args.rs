// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use kuijia::{config::DetectorArgs, provider::ConfidenceThreshold};

/// 检查一张图片或一段视频中的人员是否佩戴安全帽与反光背心
///
/// 退出码：0 表示 SAFE，2 表示 UNSAFE，1 表示出错。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,

  /// 待检查的文件（jpg、jpeg、png、mp4）
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,

  /// 置信度阈值 (0.2 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: ConfidenceThreshold,

  /// 以 JSON 输出检查结果
  #[arg(long)]
  pub json: bool,
}
