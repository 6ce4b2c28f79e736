// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频输入模块
//!
//! 逐帧解码上传的视频文件，输出紧密排列的 RGB 帧。
//!
//! ## 系统依赖
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! **macOS:**
//! ```bash
//! brew install gstreamer
//! ```
//!
//! ## Cargo 特性
//!
//! ```toml
//! [dependencies]
//! kuijia = { version = "0.1", features = ["gstreamer_input"] }
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use kuijia::input::GStreamerInput;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = GStreamerInput::open_file(Path::new("site.mp4"))?;
//! for frame in input {
//!     let frame = frame?;
//!     println!("帧 {}: {}x{}", frame.index(), frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::{RGB_CHANNELS, RgbFrame};

/// 单次拉取帧的等待时间，超时后检查总线上的错误
const PULL_TIMEOUT_MS: u64 = 100;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// GStreamer 视频文件输入
///
/// 管道为 `filesrc ! decodebin ! videoconvert ! RGB ! appsink`，不丢帧。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  frame_index: u64,
  fps: Option<f64>,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  pub fn open_file(path: &Path) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    // 路径中的引号与反斜杠需要转义后才能放进管道描述
    let location = path
      .display()
      .to_string()
      .replace('\\', "\\\\")
      .replace('"', "\\\"");
    let description = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false",
      location
    );
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      frame_index: 0,
      fps: None,
    })
  }

  pub fn fps(&self) -> Option<f64> {
    self.fps
  }

  fn bus_error(&self) -> Option<GStreamerInputError> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(GStreamerInputError::PipelineError(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      ))),
      _ => None,
    }
  }

  fn convert_sample(&mut self, sample: gst::Sample) -> Result<RgbFrame, GStreamerInputError> {
    let buffer = sample
      .buffer()
      .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
    let caps = sample
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    if self.fps.is_none() {
      let fps = video_info.fps();
      if fps.numer() > 0 && fps.denom() > 0 {
        self.fps = Some(fps.numer() as f64 / fps.denom() as f64);
      }
    }

    let width = video_info.width() as usize;
    let height = video_info.height() as usize;
    // GStreamer 的 RGB 行按 4 字节对齐
    let stride = video_info.stride()[0] as usize;

    let map = buffer.map_readable().map_err(|e| {
      GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
    })?;
    let data = map.as_slice();

    let expected_size = stride * (height.saturating_sub(1)) + width * RGB_CHANNELS;
    if data.len() < expected_size {
      return Err(GStreamerInputError::BufferSizeMismatch {
        expected: expected_size,
        actual: data.len(),
      });
    }

    let mut frame = RgbFrame::with_shape(width as u32, height as u32);
    let row_bytes = width * RGB_CHANNELS;
    {
      let frame_slice = frame.as_mut();
      match video_info.format() {
        gst_video::VideoFormat::Rgb => {
          for h in 0..height {
            let src = &data[h * stride..h * stride + row_bytes];
            frame_slice[h * row_bytes..(h + 1) * row_bytes].copy_from_slice(src);
          }
        }
        gst_video::VideoFormat::Bgr => {
          for h in 0..height {
            for w in 0..width {
              for c in 0..RGB_CHANNELS {
                let src_idx = h * stride + w * RGB_CHANNELS + (2 - c);
                let dst_idx = (h * width + w) * RGB_CHANNELS + c;
                frame_slice[dst_idx] = data[src_idx];
              }
            }
          }
        }
        _ => return Err(GStreamerInputError::UnsupportedFormat),
      }
    }

    let timestamp_ms = buffer.pts().map(|pts| pts.mseconds()).unwrap_or(0);
    let index = self.frame_index;
    self.frame_index += 1;
    debug!("解码第 {} 帧 ({} ms)", index, timestamp_ms);

    Ok(frame.with_position(index, timestamp_ms))
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<RgbFrame, GStreamerInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if let Some(sample) = self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
      {
        return Some(self.convert_sample(sample));
      }
      if self.appsink.is_eos() {
        info!("视频解码结束，共 {} 帧", self.frame_index);
        return None;
      }
      if let Some(err) = self.bus_error() {
        return Some(Err(err));
      }
    }
  }
}
