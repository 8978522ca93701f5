// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/input.rs - 视频输入
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

use thiserror::Error;

use crate::{FromUrl, frame::Frame};

/// 视频捕获源
///
/// `capture` 返回 `None` 表示本轮暂无帧（瞬时欠载，非错误），
/// 调用方应跳到下一轮；`is_active` 为假时流已结束。
pub trait CaptureSource {
  type Error;

  fn is_active(&self) -> bool;

  fn capture(&mut self) -> Result<Option<Frame>, Self::Error>;

  fn width(&self) -> u32;

  fn height(&self) -> u32;

  fn fps(&self) -> Option<f64>;
}

mod v4l2_input;
pub use self::v4l2_input::{V4l2Input, V4l2InputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("V4L2 输入错误: {0}")]
  V4l2InputError(#[from] V4l2InputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  V4l2(V4l2Input),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4l2Input::SCHEME {
        let input = V4l2Input::from_url(url)?;
        return Ok(InputWrapper::V4l2(input));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      if GStreamerInputPipelineBuilder::supports_scheme(url.scheme()) {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamer(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl CaptureSource for InputWrapper {
  type Error = InputError;

  fn is_active(&self) -> bool {
    match self {
      InputWrapper::V4l2(input) => input.is_active(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.is_active(),
    }
  }

  fn capture(&mut self) -> Result<Option<Frame>, Self::Error> {
    match self {
      InputWrapper::V4l2(input) => input.capture().map_err(InputError::from),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.capture().map_err(InputError::from),
    }
  }

  fn width(&self) -> u32 {
    match self {
      InputWrapper::V4l2(input) => input.width(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.width(),
    }
  }

  fn height(&self) -> u32 {
    match self {
      InputWrapper::V4l2(input) => input.height(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.height(),
    }
  }

  fn fps(&self) -> Option<f64> {
    match self {
      InputWrapper::V4l2(input) => input.fps(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.fps(),
    }
  }
}
