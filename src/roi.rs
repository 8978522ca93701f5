// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/roi.rs - 车牌区域裁剪
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::{frame::Frame, geometry::RoiBox};

#[derive(Error, Debug)]
pub enum RoiError {
  #[error("区域裁剪失败: ({0}, {1}) - ({2}, {3}) 超出帧 {4}x{5}")]
  OutOfBounds(u32, u32, u32, u32, u32, u32),
}

/// 从帧中裁剪矩形区域
///
/// 依次尝试两种裁剪方式：视图裁剪与逐像素复制；全部失败时
/// 返回聚合错误，调用方只见到统一的裁剪操作。
/// 裁剪结果继承原帧的序号与时间戳。
pub fn extract_roi(frame: &Frame, roi: &RoiBox) -> Result<Frame, RoiError> {
  if let Some(image) = crop_view(&frame.image, roi) {
    return Ok(Frame::new(image, frame.index, frame.timestamp_ms));
  }
  debug!("视图裁剪失败，回退到逐像素复制");

  if let Some(image) = crop_copy(&frame.image, roi) {
    return Ok(Frame::new(image, frame.index, frame.timestamp_ms));
  }

  Err(RoiError::OutOfBounds(
    roi.left,
    roi.top,
    roi.right,
    roi.bottom,
    frame.width(),
    frame.height(),
  ))
}

/// 视图裁剪
///
/// `crop_imm` 会静默收缩越界区域，因此校验输出尺寸后才接受结果。
fn crop_view(image: &RgbImage, roi: &RoiBox) -> Option<RgbImage> {
  let out = imageops::crop_imm(image, roi.left, roi.top, roi.width(), roi.height()).to_image();
  (out.width() == roi.width() && out.height() == roi.height()).then_some(out)
}

/// 逐像素复制裁剪
fn crop_copy(image: &RgbImage, roi: &RoiBox) -> Option<RgbImage> {
  if roi.right > image.width() || roi.bottom > image.height() {
    return None;
  }

  let mut out = RgbImage::new(roi.width(), roi.height());
  for y in 0..roi.height() {
    for x in 0..roi.width() {
      out.put_pixel(x, y, *image.get_pixel(roi.left + x, roi.top + y));
    }
  }
  Some(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn gradient_frame(width: u32, height: u32) -> Frame {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 0]));
    Frame::new(image, 7, 1234)
  }

  #[test]
  fn test_extract_dimensions_and_pixels() {
    let frame = gradient_frame(64, 48);
    let roi = RoiBox {
      left: 10,
      top: 20,
      right: 30,
      bottom: 40,
    };

    let cropped = extract_roi(&frame, &roi).unwrap();
    assert_eq!(cropped.width(), 20);
    assert_eq!(cropped.height(), 20);
    // 像素与源图对应位置一致
    assert_eq!(cropped.image.get_pixel(0, 0), &Rgb([10, 20, 0]));
    assert_eq!(cropped.image.get_pixel(19, 19), &Rgb([29, 39, 0]));
    // 序号与时间戳随帧传递
    assert_eq!(cropped.index, 7);
    assert_eq!(cropped.timestamp_ms, 1234);
  }

  #[test]
  fn test_extract_full_frame() {
    let frame = gradient_frame(32, 16);
    let roi = RoiBox {
      left: 0,
      top: 0,
      right: 32,
      bottom: 16,
    };

    let cropped = extract_roi(&frame, &roi).unwrap();
    assert_eq!(cropped.width(), 32);
    assert_eq!(cropped.height(), 16);
  }

  #[test]
  fn test_extract_out_of_bounds_rejected() {
    let frame = gradient_frame(32, 16);
    let roi = RoiBox {
      left: 10,
      top: 4,
      right: 48,
      bottom: 12,
    };

    assert!(extract_roi(&frame, &roi).is_err());
  }

  #[test]
  fn test_crop_copy_matches_view() {
    let frame = gradient_frame(40, 40);
    let roi = RoiBox {
      left: 5,
      top: 6,
      right: 25,
      bottom: 30,
    };

    let view = crop_view(&frame.image, &roi).unwrap();
    let copy = crop_copy(&frame.image, &roi).unwrap();
    assert_eq!(view.as_raw(), copy.as_raw());
  }
}
