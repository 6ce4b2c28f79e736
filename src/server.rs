// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/server.rs - 单页 web 服务
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

//! # Web 服务
//!
//! | 方法 | 路径 | 说明 |
//! |------|------|------|
//! | GET  | `/` | 上传页面 |
//! | POST | `/inspect` | multipart 上传（`file`、`confidence`），返回结果页面 |
//! | POST | `/api/inspect` | 同上，返回 JSON |
//! | GET  | `/media/:name` | 标注后的图像或视频 |
//! | GET  | `/health` | 存活与模型状态 |
//!
//! 模型在启动时加载失败时，页面显示错误，检查接口返回 503。

use std::{
  io,
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::{
  Json, Router,
  extract::{
    DefaultBodyLimit, Multipart, State,
    multipart::{Field, MultipartError},
    Path as UrlPath,
  },
  http::{StatusCode, header},
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::{
  compliance::RequiredEquipment,
  input::{SUPPORTED_EXTENSIONS, is_supported_extension},
  page::{Page, PageView},
  provider::{ConfidenceThreshold, InferenceProvider},
  task::{InspectionOutcome, InspectionTask},
};

/// multipart 边界与表单字段的额外开销
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
enum Engine {
  Ready(InspectionTask),
  Unavailable(Arc<str>),
}

#[derive(Clone)]
pub struct AppState {
  engine: Engine,
  required: RequiredEquipment,
  output_dir: Arc<Path>,
  default_threshold: ConfidenceThreshold,
}

impl AppState {
  pub fn ready(
    provider: Arc<dyn InferenceProvider>,
    required: RequiredEquipment,
    output_dir: impl Into<PathBuf>,
  ) -> Self {
    Self {
      engine: Engine::Ready(InspectionTask::new(provider, required.clone())),
      required,
      output_dir: Arc::from(output_dir.into()),
      default_threshold: ConfidenceThreshold::default(),
    }
  }

  /// 模型加载失败时使用，页面只显示该错误
  pub fn unavailable(
    reason: impl Into<String>,
    required: RequiredEquipment,
    output_dir: impl Into<PathBuf>,
  ) -> Self {
    Self {
      engine: Engine::Unavailable(Arc::from(reason.into())),
      required,
      output_dir: Arc::from(output_dir.into()),
      default_threshold: ConfidenceThreshold::default(),
    }
  }

  fn page<'a>(&'a self, threshold: ConfidenceThreshold, view: PageView<'a>) -> Html<String> {
    Html(
      Page {
        threshold,
        required: &self.required,
        view,
      }
      .render(),
    )
  }
}

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("请求无效: {0}")]
  BadRequest(String),
  #[error("未找到: {0}")]
  NotFound(String),
  #[error("模型不可用: {0}")]
  Unavailable(String),
  #[error("上传错误: {0}")]
  Multipart(#[from] MultipartError),
  #[error("I/O 错误: {0}")]
  Io(#[from] io::Error),
  #[error("内部错误: {0}")]
  Internal(String),
}

impl ApiError {
  pub fn bad_request(msg: impl Into<String>) -> Self {
    Self::BadRequest(msg.into())
  }

  fn status_code(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Multipart(e) => e.status(),
      ApiError::Io(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

#[derive(Serialize)]
struct ErrorResponse {
  detail: String,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status_code();
    if status.is_server_error() {
      error!("请求失败: {}", self);
    }
    let body = ErrorResponse {
      detail: self.to_string(),
    };
    (status, Json(body)).into_response()
  }
}

pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
  let body_limit = max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

  Router::new()
    .route("/", get(index))
    .route("/inspect", post(inspect_page))
    .route("/api/inspect", post(inspect_json))
    .route("/media/:name", get(media))
    .route("/health", get(health))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(RequestBodyLimitLayer::new(body_limit))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

pub async fn serve(router: Router, address: &str) -> io::Result<()> {
  let listener = tokio::net::TcpListener::bind(address).await?;
  info!("监听地址: {}", listener.local_addr()?);

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("服务已停止");
  Ok(())
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("收到中断信号，准备退出..."),
    Err(e) => {
      error!("无法监听中断信号: {}", e);
      std::future::pending::<()>().await;
    }
  }
}

async fn index(State(state): State<AppState>) -> Html<String> {
  match &state.engine {
    Engine::Ready(_) => state.page(state.default_threshold, PageView::Empty),
    Engine::Unavailable(reason) => {
      state.page(state.default_threshold, PageView::Unavailable(reason))
    }
  }
}

async fn inspect_page(State(state): State<AppState>, multipart: Multipart) -> Response {
  let task = match &state.engine {
    Engine::Ready(task) => task.clone(),
    Engine::Unavailable(reason) => {
      return (
        StatusCode::SERVICE_UNAVAILABLE,
        state.page(state.default_threshold, PageView::Unavailable(reason)),
      )
        .into_response();
    }
  };

  let upload = match read_upload(multipart, state.default_threshold).await {
    Ok(upload) => upload,
    Err(e) => {
      warn!("上传被拒绝: {}", e);
      let message = e.to_string();
      return (
        e.status_code(),
        state.page(state.default_threshold, PageView::Rejected(&message)),
      )
        .into_response();
    }
  };

  let threshold = upload.threshold;
  match run_inspection(task, upload).await {
    Ok(outcome) => state
      .page(threshold, PageView::Outcome(&outcome))
      .into_response(),
    Err(e) => {
      let message = e.to_string();
      (
        e.status_code(),
        state.page(threshold, PageView::Rejected(&message)),
      )
        .into_response()
    }
  }
}

async fn inspect_json(
  State(state): State<AppState>,
  multipart: Multipart,
) -> Result<Json<InspectionOutcome>, ApiError> {
  let task = match &state.engine {
    Engine::Ready(task) => task.clone(),
    Engine::Unavailable(reason) => return Err(ApiError::Unavailable(reason.to_string())),
  };

  let upload = read_upload(multipart, state.default_threshold).await?;
  Ok(Json(run_inspection(task, upload).await?))
}

async fn media(
  State(state): State<AppState>,
  UrlPath(name): UrlPath<String>,
) -> Result<Response, ApiError> {
  if !is_safe_media_name(&name) {
    return Err(ApiError::bad_request(format!("非法的文件名: {}", name)));
  }

  let path = state.output_dir.join(&name);
  let data = match tokio::fs::read(&path).await {
    Ok(data) => data,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ApiError::NotFound(name)),
    Err(e) => return Err(e.into()),
  };

  Ok(([(header::CONTENT_TYPE, content_type(&name))], data).into_response())
}

#[derive(Serialize)]
struct HealthResponse<'a> {
  status: &'static str,
  model_loaded: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<&'a str>,
}

async fn health(State(state): State<AppState>) -> Response {
  let error = match &state.engine {
    Engine::Ready(_) => None,
    Engine::Unavailable(reason) => Some(reason.as_ref()),
  };
  Json(HealthResponse {
    status: "ok",
    model_loaded: error.is_none(),
    error,
  })
  .into_response()
}

struct Upload {
  file: NamedTempFile,
  threshold: ConfidenceThreshold,
}

async fn read_upload(
  mut multipart: Multipart,
  default_threshold: ConfidenceThreshold,
) -> Result<Upload, ApiError> {
  let mut file = None;
  let mut threshold = default_threshold;

  while let Some(field) = multipart.next_field().await? {
    let name = field.name().map(str::to_owned);
    match name.as_deref() {
      Some("file") => {
        let file_name = field.file_name().unwrap_or_default().to_string();
        if !is_supported_extension(&upload_suffix(&file_name)) {
          return Err(ApiError::bad_request(format!(
            "不支持的文件类型: {}，仅支持 {}",
            file_name,
            SUPPORTED_EXTENSIONS.join(", ")
          )));
        }
        file = Some(store_upload(field).await?);
      }
      Some("confidence") => {
        let text = field.text().await?;
        threshold = text
          .parse()
          .map_err(|e: crate::provider::ThresholdError| ApiError::bad_request(e.to_string()))?;
      }
      other => debug!("忽略表单字段: {:?}", other),
    }
  }

  let file = file.ok_or_else(|| ApiError::bad_request("缺少上传文件"))?;
  Ok(Upload { file, threshold })
}

/// 以原扩展名保存到临时文件，请求结束后删除
async fn store_upload(mut field: Field<'_>) -> Result<NamedTempFile, ApiError> {
  let name = field.file_name().unwrap_or_default().to_string();
  let suffix = upload_suffix(&name);

  let temp = tempfile::Builder::new()
    .prefix("upload-")
    .suffix(&suffix)
    .tempfile()?;
  let mut out = tokio::fs::File::from_std(temp.reopen()?);

  let mut size = 0usize;
  while let Some(chunk) = field.chunk().await? {
    size += chunk.len();
    out.write_all(&chunk).await?;
  }
  out.flush().await?;

  if size == 0 {
    return Err(ApiError::bad_request("上传文件为空"));
  }
  info!("收到上传: {} ({} 字节)", name, size);
  Ok(temp)
}

async fn run_inspection(
  task: InspectionTask,
  upload: Upload,
) -> Result<InspectionOutcome, ApiError> {
  let Upload { file, threshold } = upload;
  tokio::task::spawn_blocking(move || task.run(file.path(), threshold))
    .await
    .map_err(|e| ApiError::Internal(format!("检查任务异常退出: {}", e)))
}

fn upload_suffix(file_name: &str) -> String {
  Path::new(file_name)
    .extension()
    .and_then(|ext| ext.to_str())
    .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
    .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
    .unwrap_or_default()
}

fn is_safe_media_name(name: &str) -> bool {
  !name.is_empty()
    && !name.starts_with('.')
    && !name.contains(['/', '\\'])
    && !name.contains("..")
}

fn content_type(name: &str) -> &'static str {
  match Path::new(name)
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| ext.to_ascii_lowercase())
    .as_deref()
  {
    Some("png") => "image/png",
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("mp4") => "video/mp4",
    _ => "application/octet-stream",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn media_names_cannot_escape_output_dir() {
    assert!(is_safe_media_name("20260101-0001-site.png"));
    assert!(!is_safe_media_name("../etc/passwd"));
    assert!(!is_safe_media_name("a/b.png"));
    assert!(!is_safe_media_name("a\\b.png"));
    assert!(!is_safe_media_name(".hidden"));
    assert!(!is_safe_media_name(""));
  }

  #[test]
  fn upload_suffix_keeps_plain_extensions_only() {
    assert_eq!(upload_suffix("Site Photo.JPG"), ".jpg");
    assert_eq!(upload_suffix("clip.mp4"), ".mp4");
    assert_eq!(upload_suffix("weird.p$g"), "");
    assert_eq!(upload_suffix("noext"), "");
  }

  #[test]
  fn content_types_follow_extension() {
    assert_eq!(content_type("a.PNG"), "image/png");
    assert_eq!(content_type("a.jpeg"), "image/jpeg");
    assert_eq!(content_type("a.mp4"), "video/mp4");
    assert_eq!(content_type("a.txt"), "application/octet-stream");
  }
}
