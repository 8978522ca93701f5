// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/detect/ssd.rs - SSD-MobileNet 检测器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::imageops;
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  detect::{Detection, Detector},
  frame::Frame,
  output::draw::{Draw, OverlayStyle},
};

const SSD_NUM_INPUTS: u32 = 1;
const SSD_NUM_OUTPUTS: u32 = 2;
const SSD_INPUT_W: u32 = 300;
const SSD_INPUT_H: u32 = 300;
const SSD_NMS_THRESH: f32 = 0.5;
// 类别 0 为背景类，不产生检测结果
const SSD_BACKGROUND_CLASS: usize = 0;

#[derive(Error, Debug)]
pub enum SsdDetectorError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("标签文件加载错误 {0}: {1}")]
  LabelsLoadError(String, std::io::Error),
  #[error("标签文件为空: {0}")]
  LabelsEmpty(String),
}

impl From<std::io::Error> for SsdDetectorError {
  fn from(err: std::io::Error) -> Self {
    SsdDetectorError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for SsdDetectorError {
  fn from(err: rknpu::Error) -> Self {
    SsdDetectorError::RknnError(err)
  }
}

impl SsdDetectorError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    SsdDetectorError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct SsdDetectorBuilder {
  model_path: String,
  labels_path: String,
  threshold: f32,
  flags: InitFlags,
  draw: Draw,
}

impl SsdDetectorBuilder {
  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn build(self) -> Result<SsdDetector, SsdDetectorError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;
    info!("模型加载完成");

    let num_inputs = context
      .num_inputs()
      .map_err(|e| SsdDetectorError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| SsdDetectorError::invalid("无法获取输出数量", e))?;

    if num_inputs != SSD_NUM_INPUTS {
      error!("预期模型输入数量为 {}, 实际为 {}", SSD_NUM_INPUTS, num_inputs);
      return Err(SsdDetectorError::invalid(
        &format!("预期模型输入数量为 {}, 实际为 {}", SSD_NUM_INPUTS, num_inputs),
        rknpu::Error::InvalidModel,
      ));
    }

    if num_outputs != SSD_NUM_OUTPUTS {
      error!(
        "预期模型输出数量为 {}, 实际为 {}",
        SSD_NUM_OUTPUTS, num_outputs
      );
      return Err(SsdDetectorError::invalid(
        &format!(
          "预期模型输出数量为 {}, 实际为 {}",
          SSD_NUM_OUTPUTS, num_outputs
        ),
        rknpu::Error::InvalidModel,
      ));
    }

    let labels = load_labels(&self.labels_path)?;
    info!("加载 {} 个类别标签: {}", labels.len(), self.labels_path);

    Ok(SsdDetector {
      context,
      labels,
      threshold: self.threshold,
      draw: self.draw,
    })
  }
}

/// 读取标签文件，每行一个标签，行号即类别编号
fn load_labels(path: &str) -> Result<Vec<String>, SsdDetectorError> {
  let content = std::fs::read_to_string(path)
    .map_err(|e| SsdDetectorError::LabelsLoadError(path.to_string(), e))?;

  let labels: Vec<String> = content
    .lines()
    .map(|line| line.trim_end().to_string())
    .collect();

  if labels.is_empty() {
    return Err(SsdDetectorError::LabelsEmpty(path.to_string()));
  }

  Ok(labels)
}

/// 根据张量大小匹配分类与回归输出
///
/// 不同版本工具链导出的输出顺序可能交换，这里按
/// `N * 类别数` 与 `N * 4` 的大小关系判断哪个是分数、哪个是边界框。
fn match_score_box_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  num_classes: usize,
) -> Option<(&'a [f32], &'a [f32], usize)> {
  if num_classes == 0 {
    return None;
  }

  let as_counts = |scores: &[f32], boxes: &[f32]| -> Option<usize> {
    if boxes.len() % 4 != 0 || scores.len() % num_classes != 0 {
      return None;
    }
    let n = boxes.len() / 4;
    (n > 0 && scores.len() == n * num_classes).then_some(n)
  };

  if let Some(n) = as_counts(tensor1, tensor2) {
    debug!("输出顺序正常 - 索引 0 是分数，索引 1 是边界框, 候选数 {}", n);
    return Some((tensor1, tensor2, n));
  }
  if let Some(n) = as_counts(tensor2, tensor1) {
    debug!("输出顺序交换 - 索引 0 是边界框，索引 1 是分数, 候选数 {}", n);
    return Some((tensor2, tensor1, n));
  }

  error!(
    "输出大小不匹配 - 张量1: {}, 张量2: {}, 类别数: {}",
    tensor1.len(),
    tensor2.len(),
    num_classes
  );
  None
}

/// 基于 RKNN 运行时的 SSD-MobileNet 检测器
///
/// 输出两个张量：逐候选框的类别分数与归一化角点坐标。
pub struct SsdDetector {
  context: Context,
  labels: Vec<String>,
  threshold: f32,
  draw: Draw,
}

impl SsdDetector {
  pub fn builder(model_path: &str, labels_path: &str) -> SsdDetectorBuilder {
    SsdDetectorBuilder {
      model_path: model_path.to_string(),
      labels_path: labels_path.to_string(),
      threshold: 0.5,
      flags: InitFlags::default(),
      draw: Draw::without_font(),
    }
  }

  fn postprocess(&self, output: &rknpu::Output, frame_w: f32, frame_h: f32) -> Vec<Detection> {
    let num_classes = self.labels.len();

    let tensor1 = match output.get_f32(0) {
      Ok(data) => data,
      Err(e) => {
        error!("获取第 0 个输出失败: {}", e);
        return Vec::new();
      }
    };
    let tensor2 = match output.get_f32(1) {
      Ok(data) => data,
      Err(e) => {
        error!("获取第 1 个输出失败: {}", e);
        return Vec::new();
      }
    };

    let Some((scores, boxes, count)) = match_score_box_tensors(tensor1, tensor2, num_classes)
    else {
      return Vec::new();
    };

    let mut items = Vec::new();
    for i in 0..count {
      let candidate_scores = &scores[i * num_classes..(i + 1) * num_classes];

      let (score, class_id) = {
        let mut max_score = f32::MIN;
        let mut cls_idx = SSD_BACKGROUND_CLASS;
        for (c, &s) in candidate_scores.iter().enumerate() {
          if c == SSD_BACKGROUND_CLASS {
            continue;
          }
          if s > max_score {
            max_score = s;
            cls_idx = c;
          }
        }
        (max_score, cls_idx as u32)
      };

      if score <= self.threshold {
        continue;
      }

      // 边界框为归一化角点坐标 [x_min, y_min, x_max, y_max]
      let x_min = boxes[i * 4].clamp(0.0, 1.0);
      let y_min = boxes[i * 4 + 1].clamp(0.0, 1.0);
      let x_max = boxes[i * 4 + 2].clamp(0.0, 1.0);
      let y_max = boxes[i * 4 + 3].clamp(0.0, 1.0);

      if x_max <= x_min || y_max <= y_min {
        continue;
      }

      items.push(Detection {
        class_id,
        confidence: score,
        left: x_min * frame_w,
        top: y_min * frame_h,
        right: x_max * frame_w,
        bottom: y_max * frame_h,
      });
    }

    debug!("检测到 {} 个候选", items.len());
    nms(items, SSD_NMS_THRESH)
  }
}

/// 同类别候选框的非极大值抑制
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| {
    b.confidence
      .partial_cmp(&a.confidence)
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut result: Vec<Detection> = Vec::new();
  'candidates: for det in detections {
    for kept in &result {
      if kept.class_id == det.class_id && iou(kept, &det) >= iou_threshold {
        continue 'candidates;
      }
    }
    result.push(det);
  }

  result
}

fn iou(a: &Detection, b: &Detection) -> f32 {
  let x1 = a.left.max(b.left);
  let y1 = a.top.max(b.top);
  let x2 = a.right.min(b.right);
  let y2 = a.bottom.min(b.bottom);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

impl Detector for SsdDetector {
  type Error = SsdDetectorError;

  fn detect(&mut self, frame: &mut Frame, overlay: &str) -> Result<Vec<Detection>, Self::Error> {
    debug!("设置模型输入");
    let resized = imageops::resize(
      &frame.image,
      SSD_INPUT_W,
      SSD_INPUT_H,
      imageops::FilterType::Triangle,
    );
    self
      .context
      .set_input(0, resized.as_raw(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;

    let detections = self.postprocess(&output, frame.width() as f32, frame.height() as f32);

    let style = OverlayStyle::parse(overlay);
    if style.draws_anything() {
      let labels = &self.labels;
      self.draw.annotate(
        &mut frame.image,
        &detections,
        |id| labels.get(id as usize).map(String::as_str),
        style,
      );
    }

    Ok(detections)
  }

  fn label(&self, class_id: u32) -> Option<&str> {
    self.labels.get(class_id as usize).map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_match_score_box_tensors() {
    // 3 个候选、4 个类别
    let scores = vec![0.0f32; 12];
    let boxes = vec![0.0f32; 12];
    // 大小同为 12 时按第一种解释（索引 0 是分数）
    let (s, b, n) = match_score_box_tensors(&scores, &boxes, 4).unwrap();
    assert_eq!(n, 3);
    assert_eq!(s.len(), 12);
    assert_eq!(b.len(), 12);

    // 5 个类别时大小无法对齐
    assert!(match_score_box_tensors(&scores, &boxes, 5).is_none());

    // 交换顺序: 2 个候选、6 个类别
    let scores = vec![0.0f32; 12];
    let boxes = vec![0.0f32; 8];
    let (s, b, n) = match_score_box_tensors(&boxes, &scores, 6).unwrap();
    assert_eq!(n, 2);
    assert_eq!(s.len(), 12);
    assert_eq!(b.len(), 8);
  }

  #[test]
  fn test_nms_suppresses_same_class_overlap() {
    let near_duplicate = |conf: f32| Detection {
      class_id: 1,
      confidence: conf,
      left: 10.0,
      top: 10.0,
      right: 110.0,
      bottom: 60.0,
    };
    let other_class = Detection {
      class_id: 2,
      ..near_duplicate(0.7)
    };

    let kept = nms(
      vec![near_duplicate(0.6), near_duplicate(0.9), other_class],
      0.5,
    );

    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].confidence, 0.9);
    assert_eq!(kept[0].class_id, 1);
    assert_eq!(kept[1].class_id, 2);
  }

  #[test]
  fn test_iou_disjoint() {
    let a = Detection {
      class_id: 0,
      confidence: 1.0,
      left: 0.0,
      top: 0.0,
      right: 10.0,
      bottom: 10.0,
    };
    let b = Detection {
      class_id: 0,
      confidence: 1.0,
      left: 20.0,
      top: 20.0,
      right: 30.0,
      bottom: 30.0,
    };
    assert_eq!(iou(&a, &b), 0.0);
  }
}
