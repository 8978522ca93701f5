// 该文件是 Chepai （车牌识别） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::Parser;
use url::Url;

/// 车牌识别程序参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入视频源 URI
  /// 支持格式:
  /// - RTSP: rtsp://192.168.50.2:8554/cam
  /// - V4L2: v4l2:///dev/video0
  /// - GStreamer: gst://camera//dev/video0 或 gst://file/video.mp4
  #[arg(long, alias = "camera", value_name = "URI")]
  pub source: String,

  /// 输出显示 URI
  /// 支持格式:
  /// - 本地窗口: display://0
  /// - 视频文件: gstvideo:///out.mp4
  /// - 目录记录: folder:///records
  #[arg(long, default_value = "display://0", value_name = "URI")]
  pub display: String,

  /// 帧宽度
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub width: u32,

  /// 帧高度
  #[arg(long, default_value = "480", value_name = "PIXELS")]
  pub height: u32,

  /// RTSP 输入解码（h264/h265，留空自动探测）
  #[arg(long = "input-codec", default_value = "", value_name = "CODEC")]
  pub input_codec: String,

  /// RTSP 延迟（毫秒）
  #[arg(long = "input-rtsp-latency", default_value = "500", value_name = "MS")]
  pub input_rtsp_latency: u32,

  /// 输入旋转（0/90/180/270，留空不旋转）
  #[arg(long = "input-flip", default_value = "", value_name = "DEGREES")]
  pub input_flip: String,

  /// 在状态栏显示实测帧率
  #[arg(long = "show-fps")]
  pub show_fps: bool,

  /// 车牌检测模型文件路径 (RKNN)
  #[arg(
    long = "plate-model",
    default_value = "networks/az_plate/az_plate_ssdmobilenetv1.rknn",
    value_name = "FILE"
  )]
  pub plate_model: String,

  /// 车牌检测标签文件
  #[arg(
    long = "plate-labels",
    default_value = "networks/az_plate/labels.txt",
    value_name = "FILE"
  )]
  pub plate_labels: String,

  /// 车牌检测置信度阈值 (0.0 - 1.0)
  #[arg(long = "plate-threshold", default_value = "0.5", value_name = "THRESHOLD")]
  pub plate_threshold: f32,

  /// 字符检测模型文件路径 (RKNN)
  #[arg(
    long = "ocr-model",
    default_value = "networks/az_ocr/az_ocr_ssdmobilenetv1.rknn",
    value_name = "FILE"
  )]
  pub ocr_model: String,

  /// 字符检测标签文件
  #[arg(
    long = "ocr-labels",
    default_value = "networks/az_ocr/labels.txt",
    value_name = "FILE"
  )]
  pub ocr_labels: String,

  /// 字符检测置信度阈值 (0.0 - 1.0)
  #[arg(long = "ocr-threshold", default_value = "0.35", value_name = "THRESHOLD")]
  pub ocr_threshold: f32,

  /// 车牌检测叠加样式（""、"box" 或 "box,labels,conf"）
  #[arg(long, default_value = "box,labels,conf", value_name = "STYLE")]
  pub overlay: String,

  /// 字符检测叠加样式（作用于裁剪区域）
  #[arg(long = "ocr-overlay", default_value = "box,labels,conf", value_name = "STYLE")]
  pub ocr_overlay: String,

  /// 每帧最多处理的车牌数
  #[arg(long = "max-plates", default_value = "1", value_name = "COUNT")]
  pub max_plates: usize,

  /// 控制台输出最小间隔（秒）
  #[arg(long = "print-every", default_value = "0.4", value_name = "SECONDS")]
  pub print_every: f64,

  /// 叠加文本字体文件路径
  #[arg(
    long,
    default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    value_name = "FILE"
  )]
  pub font: String,
}

impl Args {
  /// 构建输入源 URL，将相关命令行参数并入查询串
  ///
  /// URI 自带的同名查询参数优先于命令行参数。
  pub fn source_url(&self) -> Result<Url, url::ParseError> {
    let mut merge: Vec<(&str, String)> = vec![
      ("width", self.width.to_string()),
      ("height", self.height.to_string()),
    ];

    let url = Url::parse(&self.source)?;
    if url.scheme() == "rtsp" {
      merge.push(("latency", self.input_rtsp_latency.to_string()));
      if !self.input_codec.is_empty() {
        merge.push(("codec", self.input_codec.clone()));
      }
    }
    if !self.input_flip.is_empty() {
      merge.push(("rotate", self.input_flip.clone()));
    }

    Ok(merge_query(url, &merge))
  }

  /// 构建输出 URL，并入尺寸、帧率显示等参数
  pub fn display_url(&self) -> Result<Url, url::ParseError> {
    let mut merge: Vec<(&str, String)> = vec![
      ("width", self.width.to_string()),
      ("height", self.height.to_string()),
    ];
    if self.show_fps {
      merge.push(("show-fps", "1".to_string()));
    }

    Ok(merge_query(Url::parse(&self.display)?, &merge))
  }
}

fn merge_query(mut url: Url, merge: &[(&str, String)]) -> Url {
  let existing: Vec<String> = url.query_pairs().map(|(k, _)| String::from(k)).collect();
  {
    let mut pairs = url.query_pairs_mut();
    for (key, value) in merge {
      if !existing.iter().any(|k| k == key) {
        pairs.append_pair(key, value);
      }
    }
  }
  url
}
