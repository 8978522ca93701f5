// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/input/v4l2_input.rs - V4L2 摄像头输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4l2InputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法打开设备 {0}: {1}")]
  DeviceOpenError(String, std::io::Error),
  #[error("V4L2 错误: {0}")]
  V4l2Error(#[from] std::io::Error),
  #[error("无法创建 RGB 图像")]
  ImageConversionError,
}

/// V4L2 摄像头输入
///
/// v4l 库的 Stream 需要引用 Device，这里用 Pin<Box> 固定 Device
/// 的内存地址，使引用它的 Stream 可以安全存放在同一结构体中。
pub struct V4l2Input {
  /// V4L2 设备（Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
  active: bool,
}

impl FromUrlWithScheme for V4l2Input {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2Input {
  type Error = V4l2InputError;

  /// 形如 `v4l2:///dev/video0?width=640&height=480`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(V4l2InputError::SchemeMismatch);
    }

    let device_path = if url.path().is_empty() {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let width = query
      .get("width")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_WIDTH);
    let height = query
      .get("height")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_HEIGHT);

    Self::open(&device_path, width, height)
  }
}

impl V4l2Input {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4l2InputError> {
    let device = Box::pin(
      Device::with_path(device_path)
        .map_err(|e| V4l2InputError::DeviceOpenError(device_path.to_string(), e))?,
    );

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    // 驱动可能调整到最接近的支持分辨率
    let width = format.width;
    let height = format.height;
    info!("V4L2 输入已打开: {} ({}x{})", device_path, width, height);

    let mut source = Self {
      device,
      stream: None,
      frame_index: 0,
      width,
      height,
      start_time: Instant::now(),
      active: true,
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上，不会移动，引用始终有效；
    // stream 存放在同一结构体中，Drop 时先于 device 释放。
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, STREAM_BUFFERS)?
    };

    source.stream = Some(stream);
    Ok(source)
  }

  /// 将 YUYV 像素转换为 RGB
  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    for chunk in yuyv.chunks(4) {
      if chunk.len() < 4 {
        break;
      }

      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      let r = (y0 + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y0 - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y0 + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);

      let r = (y1 + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y1 - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y1 + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }

    rgb
  }
}

impl Drop for V4l2Input {
  fn drop(&mut self) {
    // stream 必须先于 device 释放
    self.stream.take();
  }
}

impl super::CaptureSource for V4l2Input {
  type Error = V4l2InputError;

  fn is_active(&self) -> bool {
    self.active && self.stream.is_some()
  }

  fn capture(&mut self) -> Result<Option<Frame>, Self::Error> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(None);
    };

    match stream.next() {
      Ok((buffer, _meta)) => {
        let rgb_data = Self::yuyv_to_rgb(buffer, self.width, self.height);
        let image = RgbImage::from_raw(self.width, self.height, rgb_data)
          .ok_or(V4l2InputError::ImageConversionError)?;

        let frame = Frame::new(
          image,
          self.frame_index,
          self.start_time.elapsed().as_millis() as u64,
        );
        self.frame_index += 1;
        Ok(Some(frame))
      }
      Err(e) if matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
      ) =>
      {
        // 瞬时欠载，下一轮重试
        Ok(None)
      }
      Err(e) => {
        warn!("V4L2 捕获失败，停止输入: {}", e);
        self.active = false;
        Err(V4l2InputError::V4l2Error(e))
      }
    }
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    None
  }
}
