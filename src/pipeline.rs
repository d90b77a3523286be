// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/pipeline.rs - 逐帧处理驱动
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use image::RgbImage;
use tracing::{debug, info};

use crate::detector::Detection;
use crate::input::InputSource;
use crate::output::OutputWriter;

/// 驱动循环配置
pub struct PipelineOptions {
  /// 最大处理帧数，0 表示不限制
  pub max_frames: u64,
  /// 每处理多少帧打印一次进度
  pub progress_interval: u64,
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self {
      max_frames: 0,
      progress_interval: 10,
    }
  }
}

/// 一次运行的统计结果
#[derive(Debug)]
pub struct PipelineSummary {
  /// 写入输出的帧数
  pub frames: u64,
  /// 所有帧的检测总数
  pub detections: usize,
  /// 是否由用户中断结束
  pub aborted: bool,
}

/// 逐帧驱动循环
///
/// 取帧、检测、写出，严格串行，帧间不保留任何状态。`abort` 在循环内
/// 非阻塞轮询，置位后在下一帧边界提前结束，按正常完成处理。流耗尽
/// 同样是正常结束。无论正常结束、中断还是中途出错，输出写入器的
/// `finish` 都会被调用，否则输出文件可能无法播放。
///
/// 检测以闭包注入，检测器之外的任何实现（包括测试桩）都可以驱动
/// 同一条流水线。
pub fn run<D>(
  input: &mut dyn InputSource,
  mut detect: D,
  output: &mut dyn OutputWriter,
  abort: &AtomicBool,
  options: &PipelineOptions,
) -> Result<PipelineSummary>
where
  D: FnMut(&RgbImage) -> Result<Vec<Detection>>,
{
  let total_frames = input.total_frames();
  let result = run_loop(input, &mut detect, output, abort, options, total_frames);

  // 所有退出路径上都要冲刷输出
  let finish_result = output.finish();
  let summary = result?;
  finish_result?;

  info!(
    "处理完成: {} 帧, {} 个检测{}",
    summary.frames,
    summary.detections,
    if summary.aborted { "（用户中断）" } else { "" }
  );

  Ok(summary)
}

fn run_loop<D>(
  input: &mut dyn InputSource,
  detect: &mut D,
  output: &mut dyn OutputWriter,
  abort: &AtomicBool,
  options: &PipelineOptions,
  total_frames: Option<u64>,
) -> Result<PipelineSummary>
where
  D: FnMut(&RgbImage) -> Result<Vec<Detection>>,
{
  let progress_interval = options.progress_interval.max(1);
  let mut frames = 0u64;
  let mut detections_total = 0usize;
  let mut aborted = false;

  while let Some(frame_result) = input.next() {
    if abort.load(Ordering::Relaxed) {
      info!("收到中断信号，提前结束处理");
      aborted = true;
      break;
    }

    if options.max_frames > 0 && frames >= options.max_frames {
      info!("已达到最大帧数限制: {}", options.max_frames);
      break;
    }

    let frame = frame_result?;

    let detections = detect(&frame.image)?;
    if !detections.is_empty() {
      info!(
        "帧 {} (时间: {}ms): 检测到 {} 个对象",
        frame.index,
        frame.timestamp_ms,
        detections.len()
      );
      for det in &detections {
        debug!(
          "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
          det.class_name,
          det.confidence * 100.0,
          det.x,
          det.y,
          det.width,
          det.height
        );
      }
    }

    output.write_frame(&frame.image, &detections)?;
    frames += 1;
    detections_total += detections.len();

    if frames % progress_interval == 0 {
      match total_frames {
        Some(total) => info!("已处理 {}/{} 帧", frames, total),
        None => info!("已处理 {} 帧", frames),
      }
    }
  }

  Ok(PipelineSummary {
    frames,
    detections: detections_total,
    aborted,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::Frame;
  use anyhow::anyhow;
  use std::collections::VecDeque;

  struct StubSource {
    frames: VecDeque<Result<Frame>>,
  }

  impl StubSource {
    fn with_frames(count: usize) -> Self {
      let frames = (0..count)
        .map(|i| {
          Ok(Frame {
            image: RgbImage::new(64, 48),
            index: i as u64,
            timestamp_ms: i as u64 * 40,
          })
        })
        .collect();
      Self { frames }
    }
  }

  impl Iterator for StubSource {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
      self.frames.pop_front()
    }
  }

  impl InputSource for StubSource {
    fn width(&self) -> u32 {
      64
    }

    fn height(&self) -> u32 {
      48
    }

    fn fps(&self) -> Option<f64> {
      Some(25.0)
    }

    fn total_frames(&self) -> Option<u64> {
      None
    }
  }

  #[derive(Default)]
  struct RecordingWriter {
    detections_per_frame: Vec<usize>,
    finish_calls: usize,
  }

  impl OutputWriter for RecordingWriter {
    fn write_frame(&mut self, _image: &RgbImage, detections: &[Detection]) -> Result<()> {
      self.detections_per_frame.push(detections.len());
      Ok(())
    }

    fn finish(&mut self) -> Result<()> {
      self.finish_calls += 1;
      Ok(())
    }
  }

  fn stub_detection() -> Detection {
    Detection {
      x: 10.0,
      y: 10.0,
      width: 20.0,
      height: 20.0,
      confidence: 0.9,
      class_id: 0,
      class_name: "accident".to_string(),
    }
  }

  #[test]
  fn processes_every_frame_and_flushes_sink() {
    let mut source = StubSource::with_frames(3);
    let mut writer = RecordingWriter::default();
    let abort = AtomicBool::new(false);

    let summary = run(
      &mut source,
      |_| Ok(vec![]),
      &mut writer,
      &abort,
      &PipelineOptions::default(),
    )
    .unwrap();

    assert_eq!(summary.frames, 3);
    assert!(!summary.aborted);
    assert_eq!(writer.detections_per_frame, vec![0, 0, 0]);
    assert_eq!(writer.finish_calls, 1);
  }

  #[test]
  fn forwards_detections_to_the_sink() {
    let mut source = StubSource::with_frames(3);
    let mut writer = RecordingWriter::default();
    let abort = AtomicBool::new(false);

    let mut index = 0u64;
    let summary = run(
      &mut source,
      |_| {
        let detections = if index == 1 { vec![stub_detection()] } else { vec![] };
        index += 1;
        Ok(detections)
      },
      &mut writer,
      &abort,
      &PipelineOptions::default(),
    )
    .unwrap();

    assert_eq!(summary.detections, 1);
    assert_eq!(writer.detections_per_frame, vec![0, 1, 0]);
  }

  #[test]
  fn abort_flag_stops_before_processing_and_still_flushes() {
    let mut source = StubSource::with_frames(10);
    let mut writer = RecordingWriter::default();
    let abort = AtomicBool::new(true);

    let summary = run(
      &mut source,
      |_| Ok(vec![]),
      &mut writer,
      &abort,
      &PipelineOptions::default(),
    )
    .unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.frames, 0);
    assert_eq!(writer.finish_calls, 1);
  }

  #[test]
  fn max_frames_caps_the_run() {
    let mut source = StubSource::with_frames(10);
    let mut writer = RecordingWriter::default();
    let abort = AtomicBool::new(false);

    let options = PipelineOptions {
      max_frames: 2,
      ..Default::default()
    };
    let summary = run(&mut source, |_| Ok(vec![]), &mut writer, &abort, &options).unwrap();

    assert_eq!(summary.frames, 2);
    assert!(!summary.aborted);
    assert_eq!(writer.finish_calls, 1);
  }

  #[test]
  fn detect_error_aborts_run_but_flushes_sink() {
    let mut source = StubSource::with_frames(3);
    let mut writer = RecordingWriter::default();
    let abort = AtomicBool::new(false);

    let result = run(
      &mut source,
      |_| Err(anyhow!("推理失败")),
      &mut writer,
      &abort,
      &PipelineOptions::default(),
    );

    assert!(result.is_err());
    assert_eq!(writer.finish_calls, 1);
  }

  #[test]
  fn source_error_propagates_and_sink_is_flushed() {
    let mut source = StubSource::with_frames(1);
    source.frames.push_back(Err(anyhow!("坏帧")));
    let mut writer = RecordingWriter::default();
    let abort = AtomicBool::new(false);

    let result = run(
      &mut source,
      |_| Ok(vec![]),
      &mut writer,
      &abort,
      &PipelineOptions::default(),
    );

    assert!(result.is_err());
    assert_eq!(writer.detections_per_frame.len(), 1);
    assert_eq!(writer.finish_calls, 1);
  }
}
