// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/select.rs - 车牌候选选取
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::cmp::Ordering;

use crate::detect::Detection;

/// 按面积从大到小排序并截取前 `max_plates` 个候选
///
/// OCR 是每帧开销最大的一步，面积大的车牌通常更近、更清晰，优先处理。
/// `max_plates` 小于 1 时按 1 处理；排序稳定，相同面积保持输入顺序。
pub fn select_plates(mut detections: Vec<Detection>, max_plates: usize) -> Vec<Detection> {
  detections.sort_by(|a, b| {
    b.area()
      .partial_cmp(&a.area())
      .unwrap_or(Ordering::Equal)
  });
  detections.truncate(max_plates.max(1));
  detections
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(class_id: u32, width: f32, height: f32) -> Detection {
    Detection {
      class_id,
      confidence: 0.8,
      left: 0.0,
      top: 0.0,
      right: width,
      bottom: height,
    }
  }

  #[test]
  fn test_empty_input() {
    assert!(select_plates(Vec::new(), 3).is_empty());
  }

  #[test]
  fn test_sorted_by_area_descending() {
    let selected = select_plates(
      vec![det(1, 10.0, 50.0), det(2, 40.0, 30.0), det(3, 20.0, 20.0)],
      10,
    );
    let areas: Vec<f32> = selected.iter().map(Detection::area).collect();
    assert_eq!(areas, vec![1200.0, 500.0, 400.0]);
  }

  #[test]
  fn test_respects_limit() {
    let selected = select_plates(
      vec![det(1, 10.0, 50.0), det(2, 40.0, 30.0), det(3, 20.0, 20.0)],
      2,
    );
    assert_eq!(selected.len(), 2);
    assert_eq!(selected[0].class_id, 2);
    assert_eq!(selected[1].class_id, 1);
  }

  #[test]
  fn test_zero_limit_treated_as_one() {
    let selected = select_plates(vec![det(1, 10.0, 10.0), det(2, 20.0, 20.0)], 0);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].class_id, 2);
  }

  #[test]
  fn test_stable_on_equal_areas() {
    // 面积相同的候选保持输入顺序，重复调用结果一致
    let input = vec![det(7, 30.0, 20.0), det(8, 20.0, 30.0), det(9, 60.0, 10.0)];
    let first = select_plates(input.clone(), 10);
    let second = select_plates(input, 10);

    let ids: Vec<u32> = first.iter().map(|d| d.class_id).collect();
    assert_eq!(ids, vec![7, 8, 9]);
    let ids_again: Vec<u32> = second.iter().map(|d| d.class_id).collect();
    assert_eq!(ids, ids_again);
  }
}
