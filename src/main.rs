// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use chepai::{
  FromUrl,
  detect::SsdDetector,
  input::{CaptureSource, InputWrapper},
  output::{OutputWrapper, draw::Draw},
  report::Reporter,
  task::AlprTask,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  println!("Chepai 车牌识别");
  println!("===============");
  println!("输入来源: {}", args.source);
  println!("输出显示: {}", args.display);
  println!("车牌模型: {}", args.plate_model);
  println!("字符模型: {}", args.ocr_model);
  println!();

  // 叠加字体加载失败时退化为仅绘制检测框
  let draw = match Draw::with_font_file(&args.font) {
    Ok(draw) => draw,
    Err(e) => {
      warn!("无法加载字体 {}: {}，标签与车牌文本将不绘制", args.font, e);
      Draw::without_font()
    }
  };

  info!("正在加载车牌检测模型...");
  let plate_net = SsdDetector::builder(&args.plate_model, &args.plate_labels)
    .threshold(args.plate_threshold)
    .draw(draw.clone())
    .build()
    .with_context(|| format!("无法加载车牌检测模型: {}", args.plate_model))?;

  info!("正在加载字符检测模型...");
  let ocr_net = SsdDetector::builder(&args.ocr_model, &args.ocr_labels)
    .threshold(args.ocr_threshold)
    .draw(draw.clone())
    .build()
    .with_context(|| format!("无法加载字符检测模型: {}", args.ocr_model))?;

  info!("正在打开输入源...");
  let source_url = args.source_url().context("输入源 URI 无效")?;
  let input = InputWrapper::from_url(&source_url).context("无法打开输入源")?;
  println!(
    "输入源已打开: {}x{}{}",
    input.width(),
    input.height(),
    match input.fps() {
      Some(fps) => format!(" @ {:.0} fps", fps),
      None => String::new(),
    }
  );

  info!("正在创建输出...");
  let display_url = args.display_url().context("显示 URI 无效")?;
  let output = OutputWrapper::from_url(&display_url)
    .context("无法创建输出")?
    .with_draw(draw.clone());

  let reporter = Reporter::new(Duration::from_secs_f64(args.print_every.max(0.0)));

  let task = AlprTask {
    max_plates: args.max_plates,
    plate_overlay: args.overlay.clone(),
    ocr_overlay: args.ocr_overlay.clone(),
    draw,
  };

  task.run(input, plate_net, ocr_net, output, reporter)
}
