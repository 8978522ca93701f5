// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/output/draw.rs - 检测结果与文本叠加绘制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::debug;

use crate::detect::Detection;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const TEXT_COLOR: [u8; 3] = [255, 255, 255]; // 白色
const TEXT_BACKGROUND: [u8; 3] = [0, 0, 0]; // 黑色

/// 叠加样式
///
/// 由自由格式字符串解析而来，逗号分隔 `box`/`labels`/`conf` 标记，
/// 未知标记忽略，空串不绘制任何内容。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayStyle {
  pub boxes: bool,
  pub labels: bool,
  pub conf: bool,
}

impl OverlayStyle {
  pub fn parse(style: &str) -> Self {
    let mut parsed = OverlayStyle::default();
    for token in style.split(',') {
      match token.trim().to_lowercase().as_str() {
        "box" | "boxes" => parsed.boxes = true,
        "label" | "labels" => parsed.labels = true,
        "conf" | "confidence" => parsed.conf = true,
        "" | "none" => {}
        other => debug!("未知叠加标记: {}", other),
      }
    }
    parsed
  }

  pub fn draws_anything(&self) -> bool {
    self.boxes || self.labels || self.conf
  }
}

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体加载错误: {0}")]
  FontLoadError(std::io::Error),
  #[error("字体无效")]
  FontInvalid,
  #[error("未配置字体")]
  NoFont,
  #[error("文本位置超出图像")]
  OutOfImage,
}

/// 叠加绘制工具
///
/// 字体仅在绘制标签与文本时需要；未配置字体时检测框仍可绘制。
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Draw {
  /// 从字体文件创建
  pub fn with_font_file(path: &str) -> Result<Self, DrawError> {
    let font_data = std::fs::read(path).map_err(DrawError::FontLoadError)?;
    let font = FontArc::try_from_vec(font_data).map_err(|_| DrawError::FontInvalid)?;

    Ok(Self {
      font: Some(font),
      ..Self::without_font()
    })
  }

  /// 无字体绘制器，仅能绘制检测框
  pub fn without_font() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }

  /// 按样式在图像上标注检测结果
  pub fn annotate<'a, F>(
    &self,
    image: &mut RgbImage,
    detections: &[Detection],
    label_of: F,
    style: OverlayStyle,
  ) where
    F: Fn(u32) -> Option<&'a str>,
  {
    for det in detections {
      if style.boxes {
        self.draw_box(image, det);
      }

      if style.labels || style.conf {
        let mut label = String::new();
        if style.labels
          && let Some(name) = label_of(det.class_id)
        {
          label.push_str(name);
        }
        if style.conf {
          if !label.is_empty() {
            label.push(' ');
          }
          label.push_str(&format!("{:.2}", det.confidence));
        }
        if !label.is_empty() {
          let x = det.left as i32;
          let y = det.top as i32 - self.label_text_height;
          let _ = self.text_with_background(image, &label, x, y, Rgb(BOX_COLOR));
        }
      }
    }
  }

  /// 绘制检测框（双线加粗）
  fn draw_box(&self, image: &mut RgbImage, det: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);

    let x_min = (det.left as i32).clamp(0, w - 1);
    let y_min = (det.top as i32).clamp(0, h - 1);
    let x_max = (det.right as i32).clamp(0, w - 1);
    let y_max = (det.bottom as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let width = (x_max - x_min) as u32;
    let height = (y_max - y_min) as u32;

    let rect = Rect::at(x_min, y_min).of_size(width, height);
    draw_hollow_rect_mut(image, rect, Rgb(BOX_COLOR));

    // 第二条内框增加可见度
    if width > 2 && height > 2 {
      let inner = Rect::at(x_min + 1, y_min + 1).of_size(width - 2, height - 2);
      draw_hollow_rect_mut(image, inner, Rgb(BOX_COLOR));
    }
  }

  /// 在候选框上方绘制识别出的车牌文本（白字黑底）
  pub fn plate_text(
    &self,
    image: &mut RgbImage,
    text: &str,
    x: i32,
    y: i32,
  ) -> Result<(), DrawError> {
    self.text_with_background(image, text, x, y, Rgb(TEXT_BACKGROUND))
  }

  /// 在图像左上角绘制状态栏文本，失败时静默跳过
  pub fn status_line(&self, image: &mut RgbImage, text: &str) {
    if let Err(e) = self.text_with_background(image, text, 0, 0, Rgb(TEXT_BACKGROUND)) {
      debug!("状态栏绘制失败: {}", e);
    }
  }

  fn text_with_background(
    &self,
    image: &mut RgbImage,
    text: &str,
    x: i32,
    y: i32,
    background: Rgb<u8>,
  ) -> Result<(), DrawError> {
    let font = self.font.as_ref().ok_or(DrawError::NoFont)?;

    let (w, h) = (image.width() as i32, image.height() as i32);
    let x = x.max(0);
    let y = y.max(0);
    if x >= w || y >= h {
      return Err(DrawError::OutOfImage);
    }

    // 文本宽度按字符数粗略估计
    let text_width = (text.chars().count() as f32 * self.label_char_width) as i32;
    let width = text_width.min(w - x).max(0) as u32;
    let height = (self.label_text_height.min(h - y)).max(0) as u32;
    if width == 0 || height == 0 {
      return Err(DrawError::OutOfImage);
    }

    let rect = Rect::at(x, y).of_size(width, height);
    draw_filled_rect_mut(image, rect, background);

    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      x,
      y + self.label_text_vertical_padding,
      PxScale::from(self.font_size),
      font,
      text,
    );

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_overlay_style_parse() {
    let style = OverlayStyle::parse("box,labels,conf");
    assert!(style.boxes && style.labels && style.conf);

    let style = OverlayStyle::parse("box");
    assert!(style.boxes && !style.labels && !style.conf);

    assert!(!OverlayStyle::parse("").draws_anything());
    assert!(!OverlayStyle::parse("none").draws_anything());
  }

  #[test]
  fn test_overlay_style_ignores_unknown_tokens() {
    let style = OverlayStyle::parse("box, Labels , glow");
    assert!(style.boxes && style.labels && !style.conf);
  }

  #[test]
  fn test_plate_text_requires_font() {
    let draw = Draw::without_font();
    let mut image = RgbImage::new(64, 64);
    assert!(matches!(
      draw.plate_text(&mut image, "AB123", 0, 0),
      Err(DrawError::NoFont)
    ));
  }

  #[test]
  fn test_draw_box_marks_pixels() {
    let draw = Draw::without_font();
    let mut image = RgbImage::new(64, 64);
    let det = Detection {
      class_id: 1,
      confidence: 0.9,
      left: 10.0,
      top: 10.0,
      right: 40.0,
      bottom: 30.0,
    };

    draw.annotate(&mut image, &[det], |_| None, OverlayStyle::parse("box"));
    assert_eq!(image.get_pixel(10, 10), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(39, 29), &Rgb(BOX_COLOR));
    // 框外像素不受影响
    assert_eq!(image.get_pixel(50, 50), &Rgb([0, 0, 0]));
  }

  #[test]
  fn test_degenerate_box_skipped() {
    let draw = Draw::without_font();
    let mut image = RgbImage::new(64, 64);
    let det = Detection {
      class_id: 1,
      confidence: 0.9,
      left: 20.0,
      top: 20.0,
      right: 20.0,
      bottom: 20.0,
    };

    draw.annotate(&mut image, &[det], |_| None, OverlayStyle::parse("box"));
    assert_eq!(image.get_pixel(20, 20), &Rgb([0, 0, 0]));
  }
}
