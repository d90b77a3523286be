// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/output/mod.rs - 输出模块
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod video_output;
mod visualizer;

use anyhow::Result;
use image::RgbImage;

pub use video_output::VideoOutput;
pub use visualizer::Visualizer;

use crate::detector::Detection;

/// 输出写入器 trait
pub trait OutputWriter {
  /// 叠加检测结果并写入一帧
  fn write_frame(&mut self, image: &RgbImage, detections: &[Detection]) -> Result<()>;

  /// 完成写入并释放资源，所有退出路径上都必须调用
  fn finish(&mut self) -> Result<()>;
}

/// 创建输出写入器
pub fn create_output_writer(
  output_path: &str,
  width: u32,
  height: u32,
  fps: Option<f64>,
) -> Result<Box<dyn OutputWriter>> {
  Ok(Box::new(VideoOutput::new(
    output_path,
    width,
    height,
    fps.unwrap_or(30.0),
  )?))
}
