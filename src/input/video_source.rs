// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/input/video_source.rs - 视频文件输入源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{Pixel, input};
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video;
use image::RgbImage;
use tracing::debug;

use super::{Frame, InputSource};

/// 视频文件输入源
///
/// 解码视频流并经软件缩放器统一转为 RGB24，按解码顺序逐帧产出。
/// 流结束后产出 None，属正常终止而非错误。
pub struct VideoSource {
  /// FFmpeg 输入上下文
  input_context: ffmpeg::format::context::Input,
  /// 视频流索引
  stream_index: usize,
  /// 视频解码器
  decoder: ffmpeg::decoder::Video,
  /// 像素格式转换（解码格式 -> RGB24）
  scaler: ScalingContext,
  /// 下一帧索引
  frame_index: u64,
  /// 视频宽度
  width: u32,
  /// 视频高度
  height: u32,
  /// 帧率
  fps: f64,
  /// 容器声明的总帧数
  total_frames: Option<u64>,
  /// 时间基准（秒）
  time_base: f64,
  /// 已向解码器发送 EOF
  eof_sent: bool,
  /// 已终止
  finished: bool,
}

impl VideoSource {
  /// 打开视频文件
  pub fn new(path: &str) -> Result<Self> {
    ffmpeg::init().context("无法初始化 FFmpeg")?;

    let input_context = input(&path).with_context(|| format!("无法打开视频文件: {}", path))?;

    let stream = input_context
      .streams()
      .best(Type::Video)
      .context("找不到视频流")?;
    let stream_index = stream.index();

    let fps = {
      let rate = stream.avg_frame_rate();
      if rate.denominator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
      } else {
        0.0
      }
    };

    let total_frames = match stream.frames() {
      n if n > 0 => Some(n as u64),
      _ => None,
    };

    let time_base = {
      let tb = stream.time_base();
      tb.numerator() as f64 / tb.denominator() as f64
    };

    let decoder_context =
      ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
    let decoder = decoder_context.decoder().video()?;

    let width = decoder.width();
    let height = decoder.height();

    let scaler = ScalingContext::get(
      decoder.format(),
      width,
      height,
      Pixel::RGB24,
      width,
      height,
      Flags::BILINEAR,
    )?;

    debug!(
      "视频已打开: {} ({}x{} @ {:.2} fps, {:?} 帧)",
      path, width, height, fps, total_frames
    );

    Ok(Self {
      input_context,
      stream_index,
      decoder,
      scaler,
      frame_index: 0,
      width,
      height,
      fps,
      total_frames,
      time_base,
      eof_sent: false,
      finished: false,
    })
  }

  /// 解码下一帧，流耗尽时返回 None
  fn decode_next_frame(&mut self) -> Result<Option<Video>> {
    let mut decoded = Video::empty();
    loop {
      // 先取解码器中已就绪的帧
      if self.decoder.receive_frame(&mut decoded).is_ok() {
        return Ok(Some(decoded));
      }
      if self.eof_sent {
        return Ok(None);
      }

      // 向解码器送入属于视频流的下一个数据包
      let mut fed = false;
      for (stream, packet) in self.input_context.packets() {
        if stream.index() == self.stream_index {
          self.decoder.send_packet(&packet)?;
          fed = true;
          break;
        }
      }
      if !fed {
        // 数据包耗尽，送 EOF 后继续抽干解码器缓冲
        self.decoder.send_eof()?;
        self.eof_sent = true;
      }
    }
  }

  /// 将 RGB24 帧数据复制为图像，剥离行对齐产生的填充
  fn to_rgb_image(&self, rgb_frame: &Video) -> Result<RgbImage> {
    let data = rgb_frame.data(0);
    let stride = rgb_frame.stride(0);
    let width = self.width as usize;
    let height = self.height as usize;

    let mut image_data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
      let row_start = y * stride;
      image_data.extend_from_slice(&data[row_start..row_start + width * 3]);
    }

    RgbImage::from_raw(self.width, self.height, image_data)
      .context("无法从帧数据构造 RGB 图像")
  }
}

impl Iterator for VideoSource {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.decode_next_frame() {
      Ok(Some(decoded)) => {
        let mut rgb_frame = Video::empty();
        if let Err(e) = self.scaler.run(&decoded, &mut rgb_frame) {
          self.finished = true;
          return Some(Err(e.into()));
        }

        let image = match self.to_rgb_image(&rgb_frame) {
          Ok(image) => image,
          Err(e) => {
            self.finished = true;
            return Some(Err(e));
          }
        };

        let timestamp_ms = decoded
          .timestamp()
          .map_or(0, |ts| (ts as f64 * self.time_base * 1000.0) as u64);

        let frame = Frame {
          image,
          index: self.frame_index,
          timestamp_ms,
        };
        self.frame_index += 1;
        Some(Ok(frame))
      }
      Ok(None) => {
        self.finished = true;
        None
      }
      Err(e) => {
        self.finished = true;
        Some(Err(e))
      }
    }
  }
}

impl InputSource for VideoSource {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    if self.fps > 0.0 { Some(self.fps) } else { None }
  }

  fn total_frames(&self) -> Option<u64> {
    self.total_frames
  }
}
