// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/bin/kuijia_web.rs - web 服务程序
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

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use kuijia::{
  config::{DetectorArgs, ServeArgs},
  logging::init_logging,
  server::{AppState, create_router, serve},
};

/// 安全装备检测 web 服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,

  #[command(flatten)]
  pub serve: ServeArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
  init_logging();
  let args = Args::parse();

  info!("模型地址: {}", args.detector.model);
  info!("必需装备: {}", args.detector.required.join(", "));

  let required = args.detector.required_equipment()?;
  let output_dir = args.detector.output_dir.clone();

  // 模型加载失败时服务照常启动，页面显示错误
  let detector = args.detector.clone();
  let state = match tokio::task::spawn_blocking(move || detector.load_provider()).await? {
    Ok(provider) => AppState::ready(Arc::new(provider), required, output_dir),
    Err(e) => {
      error!("模型加载失败: {}", e);
      AppState::unavailable(e.to_string(), required, output_dir)
    }
  };

  let router = create_router(state, args.serve.max_upload_bytes());
  serve(router, &args.serve.bind_address()).await?;

  Ok(())
}
