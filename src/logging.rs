// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/logging.rs - 日志初始化
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

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_LOG_DIRECTIVE: &str = "info";

fn use_json(value: Option<&str>) -> bool {
  value.is_some_and(|v| v.trim().eq_ignore_ascii_case("json"))
}

/// `RUST_LOG` 控制级别，`LOG_FORMAT=json` 输出 JSON 行
pub fn init_logging() {
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));
  let format = std::env::var("LOG_FORMAT").ok();

  let registry = tracing_subscriber::registry().with(env_filter);
  let result = if use_json(format.as_deref()) {
    registry.with(fmt::layer().json()).try_init()
  } else {
    registry
      .with(fmt::layer().with_target(true).with_thread_ids(false))
      .try_init()
  };

  // 测试中可能被重复调用
  if let Err(e) = result {
    tracing::debug!("日志已初始化: {}", e);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn json_format_is_case_insensitive() {
    assert!(use_json(Some("json")));
    assert!(use_json(Some(" JSON ")));
    assert!(!use_json(Some("pretty")));
    assert!(!use_json(None));
  }
}
