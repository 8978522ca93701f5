// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/output/gstreamer_output.rs - GStreamer 显示与视频文件输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 输出模块
//!
//! 将标注后的帧推送到本地窗口或编码保存为视频文件。
//!
//! ## URL Scheme
//!
//! - `display://0?show-fps=1`: 本地窗口（autovideosink）
//! - `gstvideo:///output.mp4?fps=30`: 视频文件，按扩展名选择
//!   MP4 (H.264) / MKV / AVI / WebM (VP8) 封装
//!
//! 状态栏文本绘制在帧的左上角；`show-fps` 开启后附带实测帧率。
//! 下游元素停止收帧（如窗口被关闭）后输出端报告不再活跃。

use std::collections::HashMap;
use std::time::Instant;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, frame::Frame, output::draw::Draw};

/// GStreamer 输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
}

const DISPLAY_OUTPUT_SCHEME: &str = "display";
const VIDEO_FILE_OUTPUT_SCHEME: &str = "gstvideo";
const DEFAULT_FPS: i32 = 30;

/// 帧率估计的指数平滑系数
const FPS_SMOOTHING: f64 = 0.9;

/// GStreamer 输出
///
/// 管理编码/显示管道，通过 appsrc 推送 RGB 帧。
pub struct GStreamerOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: i32,
  frame_count: u64,
  caps_set: bool,
  status: String,
  show_fps: bool,
  fps_estimate: f64,
  last_render: Option<Instant>,
  active: bool,
  draw: Draw,
}

impl GStreamerOutput {
  pub fn supports_scheme(scheme: &str) -> bool {
    scheme == DISPLAY_OUTPUT_SCHEME || scheme == VIDEO_FILE_OUTPUT_SCHEME
  }

  /// 注入叠加绘制工具（状态栏文本需要字体）
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn pipeline_description(url: &Url) -> Result<String, GStreamerOutputError> {
    match url.scheme() {
      DISPLAY_OUTPUT_SCHEME => Ok(
        "appsrc name=src ! videoconvert ! autovideosink sync=false".to_string(),
      ),
      VIDEO_FILE_OUTPUT_SCHEME => {
        let file_path = urlencoding::decode(url.path())
          .map(String::from)
          .unwrap_or_else(|_| url.path().to_string());

        // 按扩展名选择封装格式
        let desc = if file_path.ends_with(".mkv") {
          format!(
            "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux ! filesink location={}",
            file_path
          )
        } else if file_path.ends_with(".avi") {
          format!(
            "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux ! filesink location={}",
            file_path
          )
        } else if file_path.ends_with(".webm") {
          format!(
            "appsrc name=src ! videoconvert ! vp8enc ! webmmux ! filesink location={}",
            file_path
          )
        } else {
          // 默认 MP4
          format!(
            "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux ! filesink location={}",
            file_path
          )
        };
        Ok(desc)
      }
      _ => Err(GStreamerOutputError::SchemeMismatch),
    }
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerOutputError> {
    let mut buffer = gst::Buffer::with_size(data.len())
      .map_err(|_| GStreamerOutputError::BufferCreationError)?;

    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerOutputError::BufferCreationError)?;
      let mut buffer_map = buffer_ref
        .map_writable()
        .map_err(|_| GStreamerOutputError::PipelineError("Failed to map buffer".to_string()))?;
      buffer_map.copy_from_slice(data);
    }

    let timestamp = (self.frame_count * 1_000_000_000) / (self.fps as u64);
    self.frame_count += 1;

    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(
        1_000_000_000 / self.fps as u64,
      ));
    }

    if let Err(e) = self.appsrc.push_buffer(buffer) {
      // 下游已停止收帧，标记输出不再活跃
      self.active = false;
      return Err(GStreamerOutputError::PipelineError(format!(
        "Failed to push buffer: {:?}",
        e
      )));
    }

    Ok(())
  }

  fn update_fps_estimate(&mut self, now: Instant) {
    if let Some(prev) = self.last_render {
      let elapsed = now.duration_since(prev).as_secs_f64();
      if elapsed > 0.0 {
        let instant_fps = 1.0 / elapsed;
        self.fps_estimate = if self.fps_estimate > 0.0 {
          self.fps_estimate * FPS_SMOOTHING + instant_fps * (1.0 - FPS_SMOOTHING)
        } else {
          instant_fps
        };
      }
    }
    self.last_render = Some(now);
  }
}

impl FromUrl for GStreamerOutput {
  type Error = GStreamerOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    gst::init()?;

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let fps: i32 = query
      .get("fps")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_FPS);
    let show_fps = query.contains_key("show-fps");

    let pipeline_desc = Self::pipeline_description(url)?;
    info!("Creating output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerOutputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerOutputError::AppSrcConversionFailed)?;

    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerOutput {
      pipeline,
      appsrc,
      fps,
      frame_count: 0,
      caps_set: false,
      status: String::new(),
      show_fps,
      fps_estimate: 0.0,
      last_render: None,
      active: true,
      draw: Draw::without_font(),
    })
  }
}

impl Drop for GStreamerOutput {
  fn drop(&mut self) {
    // 发送 EOS 以正常封口输出文件
    let _ = self.appsrc.end_of_stream();
    std::thread::sleep(std::time::Duration::from_millis(100));

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer output pipeline: {}", e);
    }

    info!("输出关闭，共推送 {} 帧", self.frame_count);
  }
}

impl super::DisplaySink for GStreamerOutput {
  type Error = GStreamerOutputError;

  fn is_active(&self) -> bool {
    self.active
  }

  fn set_status(&mut self, status: &str) {
    self.status = status.to_string();
  }

  fn render(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    // caps 在首帧按实际尺寸设置
    if !self.caps_set {
      let caps = gst::Caps::builder("video/x-raw")
        .field("format", "RGB")
        .field("width", frame.width() as i32)
        .field("height", frame.height() as i32)
        .field("framerate", gst::Fraction::new(self.fps, 1))
        .build();
      self.appsrc.set_caps(Some(&caps));
      self.caps_set = true;
    }

    self.update_fps_estimate(Instant::now());

    // 状态栏绘制是装饰性的，失败不影响推流
    let mut image = frame.image.clone();
    if !self.status.is_empty() {
      let status = if self.show_fps {
        format!("{} | {:.1} FPS", self.status, self.fps_estimate)
      } else {
        self.status.clone()
      };
      self.draw.status_line(&mut image, &status);
    }

    self.push_frame(image.as_raw())
  }
}
