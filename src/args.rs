// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::Parser;

/// Shigu 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入视频文件路径
  #[arg(long, value_name = "FILE")]
  pub video: String,

  /// ONNX 模型文件路径
  /// 主路径不存在时回落到当前目录下的 best.onnx
  #[arg(long, default_value = "models/best.onnx", value_name = "FILE")]
  pub model: String,

  /// 输出视频文件路径
  #[arg(long, default_value = "output.mp4", value_name = "OUTPUT")]
  pub output: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,
}
