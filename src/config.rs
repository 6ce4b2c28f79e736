// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/config.rs - 命令行与环境变量配置
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

use std::path::{Path, PathBuf};

use clap::Args;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  compliance::{DEFAULT_REQUIRED_EQUIPMENT, RequiredEquipment},
  label::{Label, LabelError, LabelMap},
  model::{ModelError, ModelWrapper, postprocess::DEFAULT_IOU_THRESHOLD},
  output::{Draw, DrawError},
  provider::{DEFAULT_KEEP_OUTPUTS, YoloProvider},
};

/// 未提供标签文件时使用的类别表
pub const DEFAULT_CLASS_NAMES: [&str; 4] = ["helmet", "vest", "head", "person"];

pub const DEFAULT_OUTPUT_DIR: &str = "kuijia-output";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无效的模型地址: {0}")]
  InvalidModelUrl(String),
  #[error("无效的参数: {0}")]
  InvalidParameter(String),
  #[error("标签错误: {0}")]
  Label(#[from] LabelError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
  #[error("字体错误: {0}")]
  Draw(#[from] DrawError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 检测器配置，命令行与 web 服务共用
#[derive(Args, Debug, Clone)]
pub struct DetectorArgs {
  /// 模型地址，例如 onnx:///models/best.onnx、rknn:///models/best.rknn，
  /// 也可以直接给出 ONNX 文件路径
  #[arg(long, env = "KUIJIA_MODEL", value_name = "MODEL")]
  pub model: String,

  /// 类别标签文件 (TOML)
  #[arg(long, env = "KUIJIA_LABELS", value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 模型输入尺寸（正方形边长，32 的倍数）
  #[arg(long, env = "KUIJIA_INPUT_SIZE", default_value_t = 640, value_name = "PIXELS")]
  pub input_size: u32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(
    long,
    env = "KUIJIA_IOU_THRESHOLD",
    default_value_t = DEFAULT_IOU_THRESHOLD,
    value_name = "THRESHOLD"
  )]
  pub iou_threshold: f32,

  /// 视频最多分析的帧数，0 表示无限制
  #[arg(long, env = "KUIJIA_MAX_FRAMES", default_value_t = 0, value_name = "COUNT")]
  pub max_frames: u64,

  /// 标注结果输出目录
  #[arg(long, env = "KUIJIA_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR, value_name = "DIR")]
  pub output_dir: PathBuf,

  /// 输出目录最多保留的标注文件数，0 表示不清理
  #[arg(
    long,
    env = "KUIJIA_KEEP_OUTPUTS",
    default_value_t = DEFAULT_KEEP_OUTPUTS,
    value_name = "COUNT"
  )]
  pub keep_outputs: usize,

  /// 必需装备，逗号分隔
  #[arg(
    long,
    env = "KUIJIA_REQUIRED",
    value_delimiter = ',',
    default_value = "helmet,vest",
    value_name = "LABELS"
  )]
  pub required: Vec<String>,

  /// 标签文字使用的 TTF 字体，不指定时在系统字体中查找
  #[arg(long, env = "KUIJIA_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,
}

impl DetectorArgs {
  pub fn model_url(&self) -> Result<Url, ConfigError> {
    let mut url = parse_model_url(&self.model)?;
    let has_size = url.query_pairs().any(|(key, _)| key == "size");
    if matches!(url.scheme(), "onnx" | "file") && !has_size {
      url
        .query_pairs_mut()
        .append_pair("size", &self.input_size.to_string());
    }
    Ok(url)
  }

  pub fn label_map(&self) -> Result<LabelMap, ConfigError> {
    match &self.labels {
      Some(path) => Ok(LabelMap::load(path)?),
      None => Ok(LabelMap::from_names(DEFAULT_CLASS_NAMES)?),
    }
  }

  pub fn required_equipment(&self) -> Result<RequiredEquipment, ConfigError> {
    self
      .required
      .iter()
      .map(|name| name.trim())
      .filter(|name| !name.is_empty())
      .map(|name| Label::new(name).map_err(ConfigError::from))
      .collect()
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
      return Err(ConfigError::InvalidParameter(format!(
        "IOU 阈值必须在 (0, 1] 之间, 实际为 {}",
        self.iou_threshold
      )));
    }
    if self.input_size == 0 || self.input_size % 32 != 0 {
      return Err(ConfigError::InvalidParameter(format!(
        "输入尺寸必须是 32 的正整数倍, 实际为 {}",
        self.input_size
      )));
    }
    Ok(())
  }

  /// 加载模型并构造推理提供者，任何失败都是启动失败
  pub fn load_provider(&self) -> Result<YoloProvider<ModelWrapper>, ConfigError> {
    self.validate()?;

    let labels = self.label_map()?;
    let url = self.model_url()?;
    info!("模型地址: {}", url);
    info!("类别数: {}", labels.num_classes());

    let model = ModelWrapper::load(&url, labels.num_classes())?;
    info!("推理后端: {}", model.backend_name());

    let draw = match &self.font {
      Some(path) => Draw::with_font_file(path)?,
      None => Draw::discover(),
    };

    std::fs::create_dir_all(&self.output_dir)?;
    info!("输出目录: {}", self.output_dir.display());

    Ok(
      YoloProvider::new(model, labels, &self.output_dir)
        .iou_threshold(self.iou_threshold)
        .max_frames(self.max_frames)
        .keep_outputs(self.keep_outputs)
        .draw(draw),
    )
  }
}

impl Default for DetectorArgs {
  fn default() -> Self {
    Self {
      model: String::new(),
      labels: None,
      input_size: 640,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_frames: 0,
      output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
      keep_outputs: DEFAULT_KEEP_OUTPUTS,
      required: DEFAULT_REQUIRED_EQUIPMENT.iter().map(|s| s.to_string()).collect(),
      font: None,
    }
  }
}

/// web 服务配置
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
  /// 监听地址
  #[arg(long, env = "KUIJIA_HOST", default_value = "0.0.0.0")]
  pub host: String,

  /// 监听端口
  #[arg(long, env = "KUIJIA_PORT", default_value_t = 8501)]
  pub port: u16,

  /// 上传文件大小上限 (MiB)
  #[arg(long, env = "KUIJIA_MAX_UPLOAD_MB", default_value_t = 200, value_name = "MIB")]
  pub max_upload_mb: usize,
}

impl ServeArgs {
  pub fn bind_address(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  pub fn max_upload_bytes(&self) -> usize {
    self.max_upload_mb.saturating_mul(1024 * 1024)
  }
}

/// 解析模型地址
///
/// 带方案的地址原样使用；裸路径转为 `file://`（`.rknn` 文件转为 `rknn://`）。
pub fn parse_model_url(raw: &str) -> Result<Url, ConfigError> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Err(ConfigError::InvalidModelUrl("模型地址为空".to_string()));
  }

  // 单字母方案视为 Windows 盘符
  if let Ok(url) = Url::parse(raw)
    && url.scheme().len() > 1
  {
    return Ok(url);
  }

  let path = Path::new(raw);
  let absolute = if path.is_absolute() {
    path.to_path_buf()
  } else {
    std::env::current_dir()?.join(path)
  };
  let file_url = Url::from_file_path(&absolute)
    .map_err(|_| ConfigError::InvalidModelUrl(raw.to_string()))?;

  let is_rknn = absolute
    .extension()
    .is_some_and(|ext| ext.eq_ignore_ascii_case("rknn"));
  if is_rknn {
    return Url::parse(&format!("rknn://{}", file_url.path()))
      .map_err(|_| ConfigError::InvalidModelUrl(raw.to_string()));
  }

  Ok(file_url)
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct TestCli {
    #[command(flatten)]
    detector: DetectorArgs,
    #[command(flatten)]
    serve: ServeArgs,
  }

  fn parse(args: &[&str]) -> TestCli {
    let mut argv = vec!["kuijia"];
    argv.extend_from_slice(args);
    TestCli::try_parse_from(argv).unwrap()
  }

  #[test]
  fn defaults_match_documented_values() {
    let cli = parse(&["--model", "onnx:///models/best.onnx"]);
    assert_eq!(cli.detector.input_size, 640);
    assert_eq!(cli.detector.iou_threshold, 0.45);
    assert_eq!(cli.detector.max_frames, 0);
    assert_eq!(cli.detector.keep_outputs, DEFAULT_KEEP_OUTPUTS);
    assert_eq!(cli.detector.required, vec!["helmet", "vest"]);
    assert_eq!(cli.serve.bind_address(), "0.0.0.0:8501");
    assert_eq!(cli.serve.max_upload_bytes(), 200 * 1024 * 1024);
  }

  #[test]
  fn required_list_is_normalized() {
    let cli = parse(&["--model", "m.onnx", "--required", "Helmet, VEST,gloves"]);
    let required = cli.detector.required_equipment().unwrap();
    let names: Vec<&str> = required.labels().iter().map(Label::as_str).collect();
    assert_eq!(names, vec!["gloves", "helmet", "vest"]);
  }

  #[test]
  fn empty_required_list_is_allowed() {
    let args = DetectorArgs {
      required: vec![String::new()],
      ..DetectorArgs::default()
    };
    assert!(args.required_equipment().unwrap().labels().is_empty());
  }

  #[test]
  fn model_urls_keep_their_scheme() {
    let url = parse_model_url("rknn:///opt/models/ppe.rknn").unwrap();
    assert_eq!(url.scheme(), "rknn");
    assert_eq!(url.path(), "/opt/models/ppe.rknn");
  }

  #[test]
  fn bare_paths_become_file_urls() {
    let url = parse_model_url("/opt/models/best.onnx").unwrap();
    assert_eq!(url.scheme(), "file");
    assert_eq!(url.to_file_path().unwrap(), PathBuf::from("/opt/models/best.onnx"));

    let relative = parse_model_url("weights/best.onnx").unwrap();
    assert!(relative.path().ends_with("/weights/best.onnx"));

    let rknn = parse_model_url("/opt/models/best.rknn").unwrap();
    assert_eq!(rknn.scheme(), "rknn");
  }

  #[test]
  fn input_size_is_passed_to_onnx_urls() {
    let args = DetectorArgs {
      model: "/opt/models/best.onnx".to_string(),
      input_size: 416,
      ..DetectorArgs::default()
    };
    let url = args.model_url().unwrap();
    assert_eq!(url.query(), Some("size=416"));

    let explicit = DetectorArgs {
      model: "onnx:///opt/models/best.onnx?size=320".to_string(),
      ..DetectorArgs::default()
    };
    assert_eq!(explicit.model_url().unwrap().query(), Some("size=320"));
  }

  #[test]
  fn invalid_parameters_are_rejected() {
    let args = DetectorArgs {
      iou_threshold: 0.0,
      ..DetectorArgs::default()
    };
    assert!(matches!(args.validate(), Err(ConfigError::InvalidParameter(_))));

    let args = DetectorArgs {
      input_size: 500,
      ..DetectorArgs::default()
    };
    assert!(matches!(args.validate(), Err(ConfigError::InvalidParameter(_))));
    assert!(parse_model_url("  ").is_err());
  }

  #[cfg(feature = "model_onnx")]
  #[test]
  fn missing_model_fails_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let args = DetectorArgs {
      model: dir.path().join("absent.onnx").display().to_string(),
      output_dir: dir.path().join("out"),
      ..DetectorArgs::default()
    };
    assert!(matches!(
      args.load_provider(),
      Err(ConfigError::Model(ModelError::NotFound(_)))
    ));
  }
}
