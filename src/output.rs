// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame};
#[cfg(feature = "directory_record")]
use crate::FromUrlWithScheme;

/// 显示/输出端
///
/// `set_status` 更新状态栏文本，`render` 推送一帧；
/// `is_active` 为假时输出端已关闭，主循环应退出。
pub trait DisplaySink {
  type Error;

  fn is_active(&self) -> bool;

  fn set_status(&mut self, status: &str);

  fn render(&mut self, frame: &Frame) -> Result<(), Self::Error>;
}

pub mod draw;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_output::{GStreamerOutput, GStreamerOutputError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 输出错误: {0}")]
  GStreamerOutputError(#[from] GStreamerOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "gstreamer_output")]
  GStreamer(GStreamerOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "gstreamer_output")]
      scheme if GStreamerOutput::supports_scheme(scheme) => {
        let output = GStreamerOutput::from_url(url)?;
        Ok(OutputWrapper::GStreamer(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecord(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl OutputWrapper {
  /// 注入叠加绘制工具，供需要绘制状态栏的输出端使用
  pub fn with_draw(self, draw: draw::Draw) -> Self {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamer(output) => OutputWrapper::GStreamer(output.with_draw(draw)),
      #[cfg(feature = "directory_record")]
      other => {
        let _ = draw;
        other
      }
    }
  }
}

impl DisplaySink for OutputWrapper {
  type Error = OutputError;

  fn is_active(&self) -> bool {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamer(output) => output.is_active(),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output.is_active(),
    }
  }

  fn set_status(&mut self, status: &str) {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamer(output) => output.set_status(status),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output.set_status(status),
    }
  }

  fn render(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamer(output) => output.render(frame).map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output.render(frame).map_err(OutputError::from),
    }
  }
}
