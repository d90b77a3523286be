// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/output/video_output.rs - 视频文件输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{Pixel, output};
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video;
use ffmpeg_next::{Rational, codec};
use image::RgbImage;
use tracing::info;

use super::{OutputWriter, Visualizer};
use crate::detector::Detection;

/// 视频文件输出
///
/// 在写入前叠加检测标注，RGB24 经软件缩放器转为 YUV420P 后编码。
/// 输出与输入保持相同的宽高与帧率，编码器优先 H.264，缺失时回落 MPEG-4。
pub struct VideoOutput {
  /// FFmpeg 输出上下文
  output_context: ffmpeg::format::context::Output,
  /// 视频编码器
  encoder: ffmpeg::encoder::Video,
  /// 像素格式转换（RGB24 -> YUV420P）
  scaler: ScalingContext,
  /// 视频宽度
  width: u32,
  /// 视频高度
  height: u32,
  /// 帧率
  fps: f64,
  /// 已写入帧数
  frame_index: u64,
  /// 可视化工具
  visualizer: Visualizer,
  /// 视频流索引
  stream_index: usize,
  /// 输出流时间基准
  time_base: Rational,
  /// 已写入文件尾
  finished: bool,
}

impl VideoOutput {
  /// 创建一个新的视频输出
  pub fn new(output_path: &str, width: u32, height: u32, fps: f64) -> Result<Self> {
    ffmpeg::init().context("无法初始化 FFmpeg")?;

    let mut output_context =
      output(&output_path).with_context(|| format!("无法创建输出文件: {}", output_path))?;

    let codec = ffmpeg::encoder::find(codec::Id::H264)
      .or_else(|| ffmpeg::encoder::find(codec::Id::MPEG4))
      .context("找不到可用的视频编码器")?;

    let mut stream = output_context.add_stream(codec)?;
    let stream_index = stream.index();

    let encoder_context = ffmpeg::codec::context::Context::new_with_codec(codec);
    let mut encoder = encoder_context.encoder().video()?;

    let fps_int = (fps.round() as i32).max(1);
    encoder.set_width(width);
    encoder.set_height(height);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_frame_rate(Some(Rational::new(fps_int, 1)));
    encoder.set_time_base(Rational::new(1, fps_int));
    // MP4 等容器要求编码器参数放在全局头里
    if output_context
      .format()
      .flags()
      .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER)
    {
      encoder.set_flags(codec::flag::Flags::GLOBAL_HEADER);
    }

    let encoder = encoder.open()?;
    stream.set_parameters(&encoder);
    let time_base = stream.time_base();

    output_context.write_header()?;

    let scaler = ScalingContext::get(
      Pixel::RGB24,
      width,
      height,
      Pixel::YUV420P,
      width,
      height,
      Flags::BILINEAR,
    )?;

    info!(
      "输出已创建: {} ({}x{} @ {} fps)",
      output_path, width, height, fps_int
    );

    Ok(Self {
      output_context,
      encoder,
      scaler,
      width,
      height,
      fps,
      frame_index: 0,
      visualizer: Visualizer::new(),
      stream_index,
      time_base,
      finished: false,
    })
  }

  /// 编码一帧，None 表示冲刷编码器
  fn encode_frame(&mut self, frame: Option<&Video>) -> Result<()> {
    if let Some(f) = frame {
      self.encoder.send_frame(f)?;
    } else {
      self.encoder.send_eof()?;
    }

    let fps_int = (self.fps.round() as i32).max(1);
    let mut packet = ffmpeg::Packet::empty();
    while self.encoder.receive_packet(&mut packet).is_ok() {
      packet.set_stream(self.stream_index);
      packet.rescale_ts(Rational::new(1, fps_int), self.time_base);
      packet.write_interleaved(&mut self.output_context)?;
    }

    Ok(())
  }
}

impl OutputWriter for VideoOutput {
  fn write_frame(&mut self, image: &RgbImage, detections: &[Detection]) -> Result<()> {
    // 在工作副本上叠加标注，不修改解码帧本身
    let mut annotated = image.clone();
    self.visualizer.draw_detections(&mut annotated, detections);

    // 填入 RGB 帧，处理行对齐
    let mut rgb_frame = Video::new(Pixel::RGB24, self.width, self.height);
    let data = annotated.as_raw();
    let stride = rgb_frame.stride(0);
    let width = self.width as usize;
    let height = self.height as usize;

    let frame_data = rgb_frame.data_mut(0);
    for y in 0..height {
      let src_start = y * width * 3;
      let dst_start = y * stride;
      frame_data[dst_start..dst_start + width * 3]
        .copy_from_slice(&data[src_start..src_start + width * 3]);
    }

    // 转换为 YUV 并编码
    let mut yuv_frame = Video::empty();
    self.scaler.run(&rgb_frame, &mut yuv_frame)?;

    yuv_frame.set_pts(Some(self.frame_index as i64));
    self.frame_index += 1;

    self.encode_frame(Some(&yuv_frame))
  }

  fn finish(&mut self) -> Result<()> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    // 冲刷编码器并写入文件尾，跳过会导致输出不可播放
    self.encode_frame(None)?;
    self.output_context.write_trailer()?;

    info!("输出已关闭，共写入 {} 帧", self.frame_index);
    Ok(())
  }
}
