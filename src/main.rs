// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use clap::Parser;
use tracing::warn;

use shigu::detector::AccidentDetector;
use shigu::input::create_input_source;
use shigu::output::create_output_writer;
use shigu::pipeline::{self, PipelineOptions};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  println!("Shigu 事故侦测");
  println!("==============");
  println!("模型文件路径: {}", args.model);
  println!("输入视频: {}", args.video);
  println!("输出文件: {}", args.output);
  println!("置信度阈值: {}", args.confidence);
  println!("NMS 阈值: {}", args.nms_threshold);
  println!();

  let model_path = resolve_model_path(&args.model)?;

  // 加载模型并协商输入尺寸
  println!("正在加载模型...");
  let mut detector = AccidentDetector::new(&model_path, args.confidence, args.nms_threshold)?;
  println!(
    "模型加载完成，输入尺寸 {}x{}",
    detector.input_width(),
    detector.input_height()
  );

  // 打开输入视频
  println!("正在打开输入视频...");
  let mut input_source = create_input_source(&args.video)?;
  println!(
    "输入已打开: {}x{} @ {} fps, {} 帧",
    input_source.width(),
    input_source.height(),
    input_source
      .fps()
      .map(|fps| format!("{:.2}", fps))
      .unwrap_or_else(|| "?".to_string()),
    input_source
      .total_frames()
      .map(|n| n.to_string())
      .unwrap_or_else(|| "?".to_string()),
  );

  // 创建输出
  println!("正在创建输出...");
  let mut output_writer = create_output_writer(
    &args.output,
    input_source.width(),
    input_source.height(),
    input_source.fps(),
  )?;

  // Ctrl-C 请求提前结束，循环在帧边界轮询
  let abort = Arc::new(AtomicBool::new(false));
  {
    let abort = Arc::clone(&abort);
    if let Err(e) = ctrlc::set_handler(move || {
      abort.store(true, Ordering::Relaxed);
    }) {
      warn!("无法注册中断处理器: {}", e);
    }
  }

  println!();
  println!("开始处理（Ctrl-C 可提前结束）...");
  let options = PipelineOptions {
    max_frames: args.max_frames,
    ..Default::default()
  };
  let summary = pipeline::run(
    input_source.as_mut(),
    |image| Ok(detector.detect(image)?),
    output_writer.as_mut(),
    &abort,
    &options,
  )?;

  println!();
  if summary.aborted {
    println!("处理被用户中断");
  }
  println!("总帧数: {}", summary.frames);
  println!("总检测数: {}", summary.detections);
  println!("输出文件: {}", args.output);

  Ok(())
}

/// 解析模型文件路径，主路径缺失时回落到当前目录下的 best.onnx
fn resolve_model_path(primary: &str) -> Result<PathBuf> {
  let path = PathBuf::from(primary);
  if path.exists() {
    return Ok(path);
  }

  let fallback = PathBuf::from("best.onnx");
  if fallback.exists() {
    warn!("模型 {} 不存在，改用 {}", primary, fallback.display());
    return Ok(fallback);
  }

  bail!("找不到模型文件: {}（回落路径 best.onnx 也不存在）", primary);
}
