// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, report::TEXT_SEPARATOR};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("元数据序列化错误: {0}")]
  MetadataError(#[from] serde_json::Error),
}

/// 目录记录输出
///
/// 识别到车牌的帧保存为 PNG，并在旁侧写入 JSON 元数据
/// （帧序号、时间戳、识别文本）。目录按日期分层。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: u16,
  /// 为真时记录每一帧，否则只记录识别到车牌的帧
  always: bool,
  status: String,
  plate_texts: Vec<String>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = url.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(url.path()),
      frame_counter: 0,
      always,
      status: String::new(),
      plate_texts: Vec::new(),
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl super::DisplaySink for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn is_active(&self) -> bool {
    true
  }

  fn set_status(&mut self, status: &str) {
    // 状态栏格式为 "前缀 | 文本1 | 文本2 ..."，前缀之后即识别文本
    self.plate_texts = status
      .split(TEXT_SEPARATOR)
      .skip(1)
      .map(String::from)
      .collect();
    self.status = status.to_string();
  }

  fn render(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    if !self.always && self.plate_texts.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    frame.image.save(&path)?;

    let metadata = serde_json::json!({
      "frame": frame.index,
      "timestamp_ms": frame.timestamp_ms,
      "status": self.status,
      "plates": self.plate_texts,
    });
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_string_pretty(&metadata)?,
    )?;

    debug!("记录帧到 {}", path.display());
    Ok(())
  }
}
