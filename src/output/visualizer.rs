// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/output/visualizer.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detector::Detection;

/// 边界框颜色
const BOX_COLOR: Rgb<u8> = Rgb([37, 99, 235]);
/// 内侧高亮边颜色
const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
/// 标签文字颜色
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
/// 外框线宽
const BOX_THICKNESS: i32 = 4;
/// 内侧高亮边线宽
const HIGHLIGHT_THICKNESS: i32 = 2;
/// 标签字体大小
const LABEL_FONT_SIZE: f32 = 20.0;
/// 标签背景高度
const LABEL_TEXT_HEIGHT: i32 = 24;
/// 每字符平均宽度（粗略估计）
const LABEL_CHAR_WIDTH: f32 = 11.0;

/// 可视化工具
pub struct Visualizer {
  /// 字体
  font: FontArc,
  /// 字体大小
  font_scale: PxScale,
}

impl Default for Visualizer {
  fn default() -> Self {
    Self::new()
  }
}

impl Visualizer {
  /// 创建一个新的可视化工具
  pub fn new() -> Self {
    // 使用内置的默认字体数据
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).expect("无法加载字体");

    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  /// 在图像上叠加检测结果
  ///
  /// 每个检测绘制外侧粗边框、内侧高亮边以及框上方带底色的标签文本。
  /// 空检测列表是合法输入，图像保持原样。
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      self.draw_detection(image, detection);
    }
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    let x = detection.x as i32;
    let y = detection.y as i32;
    let width = detection.width as i32;
    let height = detection.height as i32;

    if width <= 0 || height <= 0 {
      return;
    }

    // 外侧边框，逐像素收缩绘制以加粗
    for t in 0..BOX_THICKNESS {
      let w = width - 2 * t;
      let h = height - 2 * t;
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(x + t, y + t).of_size(w as u32, h as u32);
      draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }

    // 内侧高亮边，增加深色画面下的可见度
    for t in 0..HIGHLIGHT_THICKNESS {
      let inset = BOX_THICKNESS + t;
      let w = width - 2 * inset;
      let h = height - 2 * inset;
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(x + inset, y + inset).of_size(w as u32, h as u32);
      draw_hollow_rect_mut(image, rect, HIGHLIGHT_COLOR);
    }

    // 标签锚定在边框上方，顶部放不下时落回框内
    let label = format!("{} {:.2}", detection.class_name, detection.confidence);
    let text_width = (label.len() as f32 * LABEL_CHAR_WIDTH) as i32;
    let label_x = x.max(0);
    let label_y = (y - LABEL_TEXT_HEIGHT).max(0);

    let max_width = image.width() as i32 - label_x;
    let label_width = text_width.min(max_width);
    if label_width > 0 {
      let rect =
        Rect::at(label_x, label_y).of_size(label_width as u32, LABEL_TEXT_HEIGHT as u32);
      draw_filled_rect_mut(image, rect, BOX_COLOR);

      draw_text_mut(
        image,
        TEXT_COLOR,
        label_x + 2,
        label_y + 2,
        self.font_scale,
        &self.font,
        &label,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(x: f32, y: f32, width: f32, height: f32) -> Detection {
    Detection {
      x,
      y,
      width,
      height,
      confidence: 0.87,
      class_id: 0,
      class_name: "accident".to_string(),
    }
  }

  #[test]
  fn empty_detections_leave_image_untouched() {
    let mut image = RgbImage::new(64, 64);
    let original = image.clone();
    Visualizer::new().draw_detections(&mut image, &[]);
    assert_eq!(image.as_raw(), original.as_raw());
  }

  #[test]
  fn detection_draws_border_pixels() {
    let mut image = RgbImage::new(200, 200);
    Visualizer::new().draw_detections(&mut image, &[detection(50.0, 60.0, 80.0, 70.0)]);

    // 外框左上角落在框颜色上
    assert_eq!(*image.get_pixel(50, 60), BOX_COLOR);
    // 框中心不受影响
    assert_eq!(*image.get_pixel(90, 95), Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_detection_is_a_noop() {
    let mut image = RgbImage::new(64, 64);
    let original = image.clone();
    Visualizer::new().draw_detections(&mut image, &[detection(10.0, 40.0, 0.0, 0.0)]);
    assert_eq!(image.as_raw(), original.as_raw());
  }

  #[test]
  fn out_of_bounds_detection_does_not_panic() {
    let mut image = RgbImage::new(64, 64);
    Visualizer::new().draw_detections(&mut image, &[detection(50.0, 50.0, 100.0, 100.0)]);
  }
}
