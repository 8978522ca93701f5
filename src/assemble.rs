// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/assemble.rs - 车牌文本组装
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::cmp::Ordering;

use crate::detect::Detection;

/// 将无序的字符检测结果组装为从左到右的车牌文本
///
/// 字符按裁剪区域内中心 x 坐标稳定排序；查不到标签的字符跳过；
/// 标签 `space`/`blank`/`_`（不区分大小写）丢弃，`dash`/`hyphen` 替换为 `-`。
/// 组装后去除所有空格字符，结果可能为空串。
pub fn assemble_plate_text<F>(glyphs: &[Detection], label_of: F) -> String
where
  F: Fn(u32) -> Option<String>,
{
  if glyphs.is_empty() {
    return String::new();
  }

  let mut ordered: Vec<&Detection> = glyphs.iter().collect();
  ordered.sort_by(|a, b| {
    a.center_x()
      .partial_cmp(&b.center_x())
      .unwrap_or(Ordering::Equal)
  });

  let mut pieces: Vec<String> = Vec::with_capacity(ordered.len());
  for glyph in ordered {
    let Some(label) = label_of(glyph.class_id) else {
      continue;
    };
    let label = label.trim();
    let lower = label.to_lowercase();

    if matches!(lower.as_str(), "space" | "blank" | "_") {
      continue;
    }
    if matches!(lower.as_str(), "dash" | "hyphen") {
      pieces.push("-".to_string());
      continue;
    }

    pieces.push(label.to_string());
  }

  // 标签本身可能夹带空格，组装后统一清除
  pieces.concat().replace(' ', "").trim().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn glyph(class_id: u32, center_x: f32) -> Detection {
    Detection {
      class_id,
      confidence: 0.5,
      left: center_x - 2.0,
      top: 0.0,
      right: center_x + 2.0,
      bottom: 10.0,
    }
  }

  fn lookup<'a>(table: &'a [(u32, &'static str)]) -> impl Fn(u32) -> Option<String> + 'a {
    move |id| {
      table
        .iter()
        .find(|(k, _)| *k == id)
        .map(|(_, v)| v.to_string())
    }
  }

  #[test]
  fn test_empty_input() {
    assert_eq!(assemble_plate_text(&[], |_| Some("A".to_string())), "");
  }

  #[test]
  fn test_ordered_by_center_x() {
    let table = [(0, "A"), (1, "B"), (2, "C")];
    let glyphs = vec![glyph(0, 10.0), glyph(1, 20.0), glyph(2, 30.0)];
    assert_eq!(assemble_plate_text(&glyphs, lookup(&table)), "ABC");
  }

  #[test]
  fn test_invariant_under_input_order() {
    let table = [(0, "A"), (1, "B"), (2, "C")];
    // 乱序输入，内部重新排序
    let glyphs = vec![glyph(2, 30.0), glyph(0, 10.0), glyph(1, 20.0)];
    assert_eq!(assemble_plate_text(&glyphs, lookup(&table)), "ABC");
  }

  #[test]
  fn test_dash_label_replaced() {
    let table = [(0, "D"), (1, "dash"), (2, "H")];
    let glyphs = vec![glyph(0, 0.0), glyph(1, 5.0), glyph(2, 10.0)];
    assert_eq!(assemble_plate_text(&glyphs, lookup(&table)), "D-H");

    let table = [(0, "D"), (1, "Hyphen"), (2, "H")];
    assert_eq!(assemble_plate_text(&glyphs, lookup(&table)), "D-H");
  }

  #[test]
  fn test_space_labels_omitted() {
    let table = [(0, "A"), (1, "space"), (2, "B"), (3, "BLANK"), (4, "_")];
    let glyphs = vec![
      glyph(0, 0.0),
      glyph(1, 5.0),
      glyph(2, 10.0),
      glyph(3, 15.0),
      glyph(4, 20.0),
    ];
    assert_eq!(assemble_plate_text(&glyphs, lookup(&table)), "AB");
  }

  #[test]
  fn test_unresolvable_labels_skipped() {
    let table = [(0, "A"), (2, "B")];
    let glyphs = vec![glyph(0, 0.0), glyph(1, 5.0), glyph(2, 10.0)];
    assert_eq!(assemble_plate_text(&glyphs, lookup(&table)), "AB");

    // 全部查不到标签时结果为空串
    let glyphs = vec![glyph(9, 0.0), glyph(8, 5.0)];
    assert_eq!(assemble_plate_text(&glyphs, lookup(&table)), "");
  }

  #[test]
  fn test_multi_char_labels_and_spaces_stripped() {
    let table = [(0, " AB "), (1, "C D")];
    let glyphs = vec![glyph(0, 0.0), glyph(1, 5.0)];
    assert_eq!(assemble_plate_text(&glyphs, lookup(&table)), "ABCD");
  }
}
