// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/task.rs - 车牌识别主循环
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{sync::mpsc, thread, time::Duration};

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::{
  assemble::assemble_plate_text,
  detect::Detector,
  geometry::RoiBox,
  input::CaptureSource,
  output::{DisplaySink, draw::Draw},
  report::{Reporter, TEXT_SEPARATOR},
  roi::extract_roi,
  select::select_plates,
};

/// 状态栏固定前缀
const STATUS_LABEL: &str = "ALPR OCR";

/// 车牌文本绘制在候选框上方的偏移（像素）
const PLATE_TEXT_OFFSET: u32 = 20;

/// 车牌识别主循环
///
/// 每轮迭代：采集一帧 → 车牌检测 → 候选选取 → 逐候选
/// （夹取 → 裁剪 → 字符检测 → 文本组装 → 标注）→ 状态栏 → 渲染 → 报告。
/// 输入或输出端停止、或收到中断信号时退出；
/// 管道与设备由各端自身的 Drop 释放。
pub struct AlprTask {
  /// 每帧最多处理的车牌数
  pub max_plates: usize,
  /// 车牌检测叠加样式
  pub plate_overlay: String,
  /// 字符检测叠加样式（作用于裁剪区域）
  pub ocr_overlay: String,
  /// 车牌文本绘制工具
  pub draw: Draw,
}

impl AlprTask {
  pub fn run<I, P, C, O>(
    self,
    mut input: I,
    mut plate_net: P,
    mut ocr_net: C,
    mut output: O,
    mut reporter: Reporter,
  ) -> Result<()>
  where
    I: CaptureSource,
    I::Error: std::error::Error + Sync + Send + 'static,
    P: Detector,
    P::Error: std::error::Error + Sync + Send + 'static,
    C: Detector,
    C::Error: std::error::Error + Sync + Send + 'static,
    O: DisplaySink,
    O::Error: std::error::Error + Sync + Send + 'static,
  {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    if let Err(e) = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    }) {
      warn!("无法设置 Ctrl-C 处理器: {}", e);
    }

    while input.is_active() && output.is_active() {
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      // 本轮无帧是瞬时欠载，直接进入下一轮
      let Some(mut frame) = input.capture()? else {
        continue;
      };
      debug!("处理第 {} 帧图像", frame.index);

      let plates = plate_net.detect(&mut frame, &self.plate_overlay)?;
      let selected = select_plates(plates, self.max_plates);

      let mut texts: Vec<String> = Vec::new();
      for candidate in &selected {
        let Some(roi_box) = RoiBox::clamped(candidate, frame.width(), frame.height()) else {
          debug!("候选区域退化，跳过");
          continue;
        };

        let mut roi = match extract_roi(&frame, &roi_box) {
          Ok(roi) => roi,
          Err(e) => {
            // 单个候选失败不中断整帧处理
            error!("{}", e);
            continue;
          }
        };

        let glyphs = ocr_net.detect(&mut roi, &self.ocr_overlay)?;
        let text = assemble_plate_text(&glyphs, |id| ocr_net.label(id).map(str::to_string));
        if text.is_empty() {
          continue;
        }

        // 文本叠加是装饰性的，绘制失败不影响识别结果
        let text_y = roi_box.top.saturating_sub(PLATE_TEXT_OFFSET) as i32;
        if let Err(e) = self
          .draw
          .plate_text(&mut frame.image, &text, roi_box.left as i32, text_y)
        {
          debug!("车牌文本绘制失败: {}", e);
        }

        texts.push(text);
      }

      let status = if texts.is_empty() {
        STATUS_LABEL.to_string()
      } else {
        format!(
          "{}{}{}",
          STATUS_LABEL,
          TEXT_SEPARATOR,
          texts.join(TEXT_SEPARATOR)
        )
      };
      output.set_status(&status);
      output.render(&frame)?;

      reporter.report(&texts);
    }

    info!("任务完成，退出");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, collections::VecDeque, convert::Infallible, rc::Rc};

  use image::RgbImage;

  use super::*;
  use crate::{detect::Detection, frame::Frame};

  fn frame(width: u32, height: u32, index: u64) -> Frame {
    Frame::new(RgbImage::new(width, height), index, index * 33)
  }

  fn det(left: f32, top: f32, right: f32, bottom: f32) -> Detection {
    Detection {
      class_id: 1,
      confidence: 0.9,
      left,
      top,
      right,
      bottom,
    }
  }

  /// 预先编排好帧序列的输入源，None 表示本轮欠载
  struct ScriptedSource {
    frames: VecDeque<Option<Frame>>,
  }

  impl CaptureSource for ScriptedSource {
    type Error = Infallible;

    fn is_active(&self) -> bool {
      !self.frames.is_empty()
    }

    fn capture(&mut self) -> Result<Option<Frame>, Self::Error> {
      Ok(self.frames.pop_front().flatten())
    }

    fn width(&self) -> u32 {
      640
    }

    fn height(&self) -> u32 {
      480
    }

    fn fps(&self) -> Option<f64> {
      None
    }
  }

  /// 按调用次序返回编排结果的检测器，并记录每次输入帧的尺寸
  struct ScriptedDetector {
    script: VecDeque<Vec<Detection>>,
    labels: Vec<(u32, &'static str)>,
    seen_sizes: Rc<RefCell<Vec<(u32, u32)>>>,
  }

  impl ScriptedDetector {
    fn new(script: Vec<Vec<Detection>>, labels: Vec<(u32, &'static str)>) -> Self {
      Self {
        script: script.into(),
        labels,
        seen_sizes: Rc::new(RefCell::new(Vec::new())),
      }
    }

    fn seen_sizes(&self) -> Rc<RefCell<Vec<(u32, u32)>>> {
      Rc::clone(&self.seen_sizes)
    }
  }

  impl Detector for ScriptedDetector {
    type Error = Infallible;

    fn detect(
      &mut self,
      frame: &mut Frame,
      _overlay: &str,
    ) -> Result<Vec<Detection>, Self::Error> {
      self
        .seen_sizes
        .borrow_mut()
        .push((frame.width(), frame.height()));
      Ok(self.script.pop_front().unwrap_or_default())
    }

    fn label(&self, class_id: u32) -> Option<&str> {
      self
        .labels
        .iter()
        .find(|(id, _)| *id == class_id)
        .map(|(_, label)| *label)
    }
  }

  /// 记录状态栏与渲染次数的输出端
  struct RecordingSink {
    statuses: Rc<RefCell<Vec<String>>>,
    rendered: Rc<RefCell<usize>>,
  }

  impl RecordingSink {
    fn new() -> Self {
      Self {
        statuses: Rc::new(RefCell::new(Vec::new())),
        rendered: Rc::new(RefCell::new(0)),
      }
    }
  }

  impl DisplaySink for RecordingSink {
    type Error = Infallible;

    fn is_active(&self) -> bool {
      true
    }

    fn set_status(&mut self, status: &str) {
      self.statuses.borrow_mut().push(status.to_string());
    }

    fn render(&mut self, _frame: &Frame) -> Result<(), Self::Error> {
      *self.rendered.borrow_mut() += 1;
      Ok(())
    }
  }

  fn task() -> AlprTask {
    AlprTask {
      max_plates: 1,
      plate_overlay: "box".to_string(),
      ocr_overlay: String::new(),
      draw: Draw::without_font(),
    }
  }

  #[test]
  fn test_largest_plate_selected_and_recognized() {
    let input = ScriptedSource {
      frames: VecDeque::from([Some(frame(640, 480, 0))]),
    };

    // 两个车牌候选：面积 500 与 1200，只应处理大的那个
    let plate_net = ScriptedDetector::new(
      vec![vec![
        det(0.0, 0.0, 25.0, 20.0),
        det(100.0, 100.0, 160.0, 120.0),
      ]],
      Vec::new(),
    );

    let ocr_net = ScriptedDetector::new(
      vec![vec![
        Detection {
          class_id: 2,
          ..det(20.0, 0.0, 24.0, 10.0)
        },
        Detection {
          class_id: 0,
          ..det(0.0, 0.0, 4.0, 10.0)
        },
        Detection {
          class_id: 1,
          ..det(10.0, 0.0, 14.0, 10.0)
        },
      ]],
      vec![(0, "A"), (1, "B"), (2, "C")],
    );
    let ocr_sizes = ocr_net.seen_sizes();

    let sink = RecordingSink::new();
    let statuses = Rc::clone(&sink.statuses);

    task()
      .run(
        input,
        plate_net,
        ocr_net,
        sink,
        Reporter::new(Duration::from_millis(400)),
      )
      .unwrap();

    // OCR 只在面积 1200 的候选裁剪区域上运行了一次
    assert_eq!(&*ocr_sizes.borrow(), &[(60, 20)]);
    // 字符按中心 x 排序组装
    assert_eq!(statuses.borrow().last().unwrap(), "ALPR OCR | ABC");
  }

  #[test]
  fn test_transient_underruns_skipped() {
    let input = ScriptedSource {
      frames: VecDeque::from([None, None, Some(frame(640, 480, 2))]),
    };
    let plate_net = ScriptedDetector::new(Vec::new(), Vec::new());
    let ocr_net = ScriptedDetector::new(Vec::new(), Vec::new());
    let ocr_sizes = ocr_net.seen_sizes();

    let sink = RecordingSink::new();
    let rendered = Rc::clone(&sink.rendered);
    let statuses = Rc::clone(&sink.statuses);

    task()
      .run(
        input,
        plate_net,
        ocr_net,
        sink,
        Reporter::new(Duration::from_millis(400)),
      )
      .unwrap();

    // 欠载轮次不渲染，仅有帧的那一轮走完整管线
    assert_eq!(*rendered.borrow(), 1);
    assert!(ocr_sizes.borrow().is_empty());
    assert_eq!(statuses.borrow().as_slice(), ["ALPR OCR"]);
  }

  #[test]
  fn test_degenerate_candidate_excluded() {
    let input = ScriptedSource {
      frames: VecDeque::from([Some(frame(640, 480, 0))]),
    };

    // 夹取后不足 10 像素的候选不进入 OCR
    let plate_net = ScriptedDetector::new(vec![vec![det(630.0, 0.0, 700.0, 100.0)]], Vec::new());
    let ocr_net = ScriptedDetector::new(Vec::new(), Vec::new());
    let ocr_sizes = ocr_net.seen_sizes();

    let sink = RecordingSink::new();
    let statuses = Rc::clone(&sink.statuses);

    task()
      .run(
        input,
        plate_net,
        ocr_net,
        sink,
        Reporter::new(Duration::from_millis(400)),
      )
      .unwrap();

    assert!(ocr_sizes.borrow().is_empty());
    assert_eq!(statuses.borrow().as_slice(), ["ALPR OCR"]);
  }

  #[test]
  fn test_empty_text_omitted_from_status() {
    let input = ScriptedSource {
      frames: VecDeque::from([Some(frame(640, 480, 0))]),
    };

    let plate_net = ScriptedDetector::new(vec![vec![det(100.0, 100.0, 160.0, 120.0)]], Vec::new());
    // 字符标签全部无法解析，组装结果为空串
    let ocr_net = ScriptedDetector::new(vec![vec![det(0.0, 0.0, 4.0, 10.0)]], Vec::new());

    let sink = RecordingSink::new();
    let statuses = Rc::clone(&sink.statuses);

    task()
      .run(
        input,
        plate_net,
        ocr_net,
        sink,
        Reporter::new(Duration::from_millis(400)),
      )
      .unwrap();

    assert_eq!(statuses.borrow().as_slice(), ["ALPR OCR"]);
  }
}
