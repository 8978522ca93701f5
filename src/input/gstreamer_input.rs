// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频输入模块
//!
//! 基于 GStreamer 的视频输入，支持：
//! - RTSP 网络流（`rtsp://...?latency=500&codec=h264`）
//! - 摄像头捕获（`gst://camera//dev/video0?width=640&height=480&fps=30`）
//! - 视频文件读取（`gst://file/video.mp4`）
//!
//! 管道末端挂接 appsink，按超时拉取样本；超时返回"本轮无帧"，
//! 由主循环继续轮询，流结束（EOS）后输入源报告不再活跃。
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
//! ## 查询参数
//!
//! - `width`/`height`: 输出帧尺寸（缩放到该尺寸）
//! - `fps`: 摄像头帧率，默认 15
//! - `latency`: RTSP 延迟（毫秒），默认 500
//! - `codec`: RTSP 解码器选择（`h264`/`h265`，留空用 decodebin 自动探测）
//! - `rotate`: 输入旋转（`0`/`90`/`180`/`270`）

use std::collections::HashMap;
use std::time::Instant;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, frame::Frame};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
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

const GSTREAMER_INPUT_SCHEME: &str = "gst";
const RTSP_INPUT_SCHEME: &str = "rtsp";
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_RTSP_LATENCY_MS: u32 = 500;
const CAPTURE_TIMEOUT_MS: u64 = 100;

// 由参数并入查询串的内部键，重建 RTSP 地址时剔除
const INTERNAL_QUERY_KEYS: [&str; 6] = ["width", "height", "fps", "latency", "codec", "rotate"];

enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  RtspSource {
    location: String,
    latency_ms: u32,
    codec: String,
  },
  TargetFormat {
    format: String,
    width: u32,
    height: u32,
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        format,
        width,
        height,
        fps,
      } => {
        format!(
          "v4l2src device={} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::RtspSource {
        location,
        latency_ms,
        codec,
      } => {
        let decode = match codec.as_str() {
          "h264" => "rtph264depay ! h264parse ! avdec_h264",
          "h265" => "rtph265depay ! h265parse ! avdec_h265",
          _ => "decodebin",
        };
        format!(
          "rtspsrc location={} latency={} ! {}",
          location, latency_ms, decode
        )
      }
      GStreamerInputBuilderItem::TargetFormat {
        format,
        width,
        height,
      } => {
        format!(
          "videoconvert ! videoscale ! video/x-raw,format={},width={},height={}",
          format, width, height
        )
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  width: u32,
  height: u32,
  fps: Option<f64>,
}

impl GStreamerInputPipelineBuilder {
  pub fn supports_scheme(scheme: &str) -> bool {
    scheme == GSTREAMER_INPUT_SCHEME || scheme == RTSP_INPUT_SCHEME
  }

  fn build_camera_pipeline(
    path: &str,
    query: &HashMap<String, String>,
    width: u32,
    height: u32,
  ) -> Self {
    let camera = urlencoding::decode(path)
      .map(String::from)
      .unwrap_or_else(|_| path.to_string());
    let format = query
      .get("format")
      .map(String::from)
      .unwrap_or(String::from("YUY2"));
    let fps = query
      .get("fps")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_CAMERA_FPS);

    let items = vec![GStreamerInputBuilderItem::CameraSource {
      camera,
      format,
      width,
      height,
      fps,
    }];

    GStreamerInputPipelineBuilder {
      items,
      width,
      height,
      fps: Some(fps as f64),
    }
  }

  fn build_file_pipeline(path: &str, width: u32, height: u32) -> Self {
    let path = urlencoding::decode(path)
      .map(String::from)
      .unwrap_or_else(|_| path.to_string());

    GStreamerInputPipelineBuilder {
      items: vec![GStreamerInputBuilderItem::FileSource(path)],
      width,
      height,
      fps: None,
    }
  }

  fn build_rtsp_pipeline(
    url: &Url,
    query: &HashMap<String, String>,
    width: u32,
    height: u32,
  ) -> Self {
    let latency_ms = query
      .get("latency")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_RTSP_LATENCY_MS);
    let codec = query.get("codec").map(String::from).unwrap_or_default();

    // 重建不含内部参数的 RTSP 地址，摄像机自身的查询参数保留
    let mut location = url.clone();
    let retained: Vec<(String, String)> = url
      .query_pairs()
      .filter(|(k, _)| !INTERNAL_QUERY_KEYS.contains(&k.as_ref()))
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    location.set_query(None);
    if !retained.is_empty() {
      let mut pairs = location.query_pairs_mut();
      for (k, v) in &retained {
        pairs.append_pair(k, v);
      }
    }

    GStreamerInputPipelineBuilder {
      items: vec![GStreamerInputBuilderItem::RtspSource {
        location: location.to_string(),
        latency_ms,
        codec,
      }],
      width,
      height,
      fps: None,
    }
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    if let Some(rotate) = rotate {
      let (method, direction) = match rotate {
        "0" => (0, 0),
        "90" => (1, 1),
        "180" => (2, 2),
        "270" => (3, 3),
        _ => (0, 0),
      };
      Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
    } else {
      None
    }
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let full_pipeline = format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    );

    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
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
      width: self.width,
      height: self.height,
      fps: self.fps,
      frame_index: 0,
      start_time: Instant::now(),
      eos: false,
    })
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let width = query
      .get("width")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(640);
    let height = query
      .get("height")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(480);

    let mut builder = match url.scheme() {
      RTSP_INPUT_SCHEME => Self::build_rtsp_pipeline(url, &query, width, height),
      GSTREAMER_INPUT_SCHEME => match url.host_str() {
        Some("camera") => Self::build_camera_pipeline(url.path(), &query, width, height),
        Some("file") => Self::build_file_pipeline(url.path(), width, height),
        _ => {
          return Err(GStreamerInputError::SchemeMismatch);
        }
      },
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    if let Some(video_flip) = Self::video_flip(query.get("rotate").map(|s| s.as_ref())) {
      builder.items.push(video_flip);
    }

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
      width,
      height,
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道与 appsink，按超时拉取视频帧。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: Option<f64>,
  frame_index: u64,
  start_time: Instant,
  eos: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl super::CaptureSource for GStreamerInput {
  type Error = GStreamerInputError;

  fn is_active(&self) -> bool {
    !self.eos
  }

  fn capture(&mut self) -> Result<Option<Frame>, Self::Error> {
    let sample = self
      .appsink
      .try_pull_sample(gst::ClockTime::from_mseconds(CAPTURE_TIMEOUT_MS));

    let Some(sample) = sample else {
      if self.appsink.is_eos() {
        info!("输入流结束 (EOS)");
        self.eos = true;
      } else {
        debug!("本轮未拉取到帧");
      }
      return Ok(None);
    };

    let image = convert_sample_to_rgb(&sample)?;
    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(Some(frame))
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = height.saturating_sub(1) * stride + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 行间可能有步长对齐字节，逐行复制有效数据
  let mut image_data = Vec::with_capacity(width * height * 3);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for y in 0..height {
        let row_start = y * stride;
        image_data.extend_from_slice(&data[row_start..row_start + width * 3]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for y in 0..height {
        let row_start = y * stride;
        for x in 0..width {
          let idx = row_start + x * 3;
          image_data.extend_from_slice(&[data[idx + 2], data[idx + 1], data[idx]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  RgbImage::from_raw(width as u32, height as u32, image_data).ok_or(
    GStreamerInputError::PipelineError("Failed to build RGB image".to_string()),
  )
}
