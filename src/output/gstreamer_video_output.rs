// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 标注视频输出
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

//! # GStreamer 视频文件输出
//!
//! 把标注后的帧编码为 H.264 MP4，浏览器可直接播放。
//!
//! 编码管道在收到第一帧时才创建，分辨率取自该帧：
//!
//! ```text
//! appsrc ! videoconvert ! video/x-raw,format=I420 ! x264enc ! h264parse ! mp4mux ! filesink
//! ```
//!
//! 写完后必须调用 [`GStreamerVideoOutput::finish`]，否则 MP4 文件缺少索引无法播放。

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  detection::DetectedObject,
  frame::{RGB_CHANNELS, RgbFrame},
  output::{Render, draw::Draw},
};

const DEFAULT_FPS: f64 = 25.0;
const EOS_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsrc 元素")]
  AppSrcNotFound,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("帧尺寸变化: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeChanged {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

struct Encoder {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
}

pub struct GStreamerVideoOutput {
  path: PathBuf,
  fps: f64,
  draw: Arc<Draw>,
  encoder: Option<Encoder>,
  frame_count: u64,
}

impl GStreamerVideoOutput {
  pub fn new(path: impl Into<PathBuf>, draw: Arc<Draw>) -> Self {
    Self {
      path: path.into(),
      fps: DEFAULT_FPS,
      draw,
      encoder: None,
      frame_count: 0,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 只在第一帧之前生效
  pub fn set_fps(&mut self, fps: f64) {
    if self.encoder.is_none() && fps.is_finite() && fps > 0.0 {
      self.fps = fps;
    }
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  fn start(&self, width: u32, height: u32) -> Result<Encoder, GStreamerVideoOutputError> {
    gst::init()?;

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let location = self.path.display().to_string().replace('"', "\\\"");
    let pipeline_desc = format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux ! filesink location=\"{}\"",
      location
    );
    info!("创建视频输出管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcNotFound)?;

    let (fps_n, fps_d) = fps_fraction(self.fps);
    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(fps_n, fps_d))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!(
      "视频输出已启动: {}x{} @ {:.2} fps -> {}",
      width,
      height,
      self.fps,
      self.path.display()
    );

    Ok(Encoder {
      pipeline,
      appsrc,
      width,
      height,
    })
  }

  fn push_frame(&mut self, image: &image::RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let (width, height) = image.dimensions();
    if self.encoder.is_none() {
      self.encoder = Some(self.start(width, height)?);
    }
    let encoder = self
      .encoder
      .as_ref()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("编码器未启动".to_string()))?;

    if (encoder.width, encoder.height) != (width, height) {
      return Err(GStreamerVideoOutputError::FrameSizeChanged {
        expected: (encoder.width, encoder.height),
        actual: (width, height),
      });
    }

    let data = pad_rows(image.as_raw(), width as usize, height as usize);
    let mut buffer = gst::Buffer::with_size(data.len())
      .map_err(|_| GStreamerVideoOutputError::PipelineError("无法分配缓冲区".to_string()))?;

    let frame_ns = (1_000_000_000.0 / self.fps) as u64;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| GStreamerVideoOutputError::PipelineError("缓冲区不可写".to_string()))?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_ns));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
      let mut map = buffer_ref
        .map_writable()
        .map_err(|_| GStreamerVideoOutputError::PipelineError("无法映射缓冲区".to_string()))?;
      map.copy_from_slice(&data);
    }

    encoder
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| GStreamerVideoOutputError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;
    self.frame_count += 1;
    debug!("写入第 {} 帧", self.frame_count);

    Ok(())
  }

  /// 发送 EOS 并等待文件写完，没有写入任何帧时返回 `false`
  pub fn finish(&mut self) -> Result<bool, GStreamerVideoOutputError> {
    let Some(encoder) = self.encoder.take() else {
      return Ok(false);
    };

    encoder
      .appsrc
      .end_of_stream()
      .map_err(|e| GStreamerVideoOutputError::PipelineError(format!("发送 EOS 失败: {:?}", e)))?;

    let result = match encoder.pipeline.bus() {
      Some(bus) => {
        let message = bus.timed_pop_filtered(
          gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
          &[gst::MessageType::Eos, gst::MessageType::Error],
        );
        match message.as_ref().map(|msg| msg.view()) {
          Some(gst::MessageView::Eos(..)) => Ok(true),
          Some(gst::MessageView::Error(err)) => Err(GStreamerVideoOutputError::PipelineError(
            format!("{} ({:?})", err.error(), err.debug()),
          )),
          _ => Err(GStreamerVideoOutputError::PipelineError(
            "等待 EOS 超时".to_string(),
          )),
        }
      }
      None => Err(GStreamerVideoOutputError::PipelineError(
        "管道没有消息总线".to_string(),
      )),
    };

    encoder.pipeline.set_state(gst::State::Null)?;
    info!(
      "视频输出已关闭, 共写入 {} 帧: {}",
      self.frame_count,
      self.path.display()
    );
    result
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Some(encoder) = self.encoder.take() {
      warn!("视频输出未正常结束: {}", self.path.display());
      if let Err(e) = encoder.pipeline.set_state(gst::State::Null) {
        error!("停止视频输出管道失败: {}", e);
      }
    }
  }
}

impl Render<RgbFrame, [DetectedObject]> for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(
    &mut self,
    frame: &RgbFrame,
    objects: &[DetectedObject],
  ) -> Result<(), Self::Error> {
    let image = self.draw.draw_frame(frame, objects);
    self.push_frame(&image)
  }
}

/// GStreamer 的 RGB 行宽按 4 字节对齐
fn pad_rows(data: &[u8], width: usize, height: usize) -> Vec<u8> {
  let row = width * RGB_CHANNELS;
  let stride = (row + 3) & !3;
  if stride == row {
    return data.to_vec();
  }

  let mut padded = vec![0u8; stride * height];
  for (src, dst) in data.chunks_exact(row).zip(padded.chunks_exact_mut(stride)) {
    dst[..row].copy_from_slice(src);
  }
  padded
}

fn fps_fraction(fps: f64) -> (i32, i32) {
  let rounded = fps.round();
  if (fps - rounded).abs() < 1e-3 {
    (rounded as i32, 1)
  } else {
    ((fps * 1001.0).round() as i32, 1001)
  }
}
