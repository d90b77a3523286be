// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/detector/decode.rs - 模型原始输出解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use super::nms::BoundingBox;

/// 解码得到的候选集合，三个列表按下标一一对应
#[derive(Debug, Default)]
pub struct Candidates {
  pub boxes: Vec<BoundingBox>,
  pub confidences: Vec<f32>,
  pub class_ids: Vec<usize>,
}

impl Candidates {
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }
}

/// 解码 YOLO 风格的原始输出张量
///
/// `data` 为形如 (1, 4+C, A) 的通道优先布局：每个特征在 A 个锚点上连续存放，
/// 即 `data[f * anchors + a]`。按锚点重新解读为 A 行 (4+C) 值：前 4 个为模型
/// 输入像素空间下的中心式边界框 (x_center, y_center, w, h)，其余 C 个为各
/// 类别得分。
///
/// 类别得分只有一个值时（C == 1，无逐类别展开），该值直接作为置信度，
/// 类别固定为 0；否则取得分最大的类别。置信度阈值在锚点循环内部逐个判定，
/// 通过的候选从模型输入空间换算回原始帧空间。横纵缩放因子相互独立，
/// 因为预处理的缩放不保持宽高比。
pub fn decode_predictions(
  data: &[f32],
  features: usize,
  anchors: usize,
  model_size: (u32, u32),
  frame_size: (u32, u32),
  confidence_threshold: f32,
) -> Candidates {
  let mut candidates = Candidates::default();

  let classes = features - 4;
  let x_scale = frame_size.0 as f32 / model_size.0 as f32;
  let y_scale = frame_size.1 as f32 / model_size.1 as f32;

  for anchor in 0..anchors {
    let at = |feature: usize| data[feature * anchors + anchor];

    let (confidence, class_id) = if classes == 1 {
      (at(4), 0)
    } else {
      let mut best_score = f32::MIN;
      let mut best_class = 0usize;
      for class in 0..classes {
        let score = at(4 + class);
        if score > best_score {
          best_score = score;
          best_class = class;
        }
      }
      (best_score, best_class)
    };

    if confidence < confidence_threshold {
      continue;
    }

    let x_center = at(0);
    let y_center = at(1);
    let width = at(2);
    let height = at(3);

    // 中心式转角点式，再换算回原始帧像素并取整；宽高钳制为非负，
    // 畸形预测不得产生负尺寸
    let x = ((x_center - width / 2.0) * x_scale).round() as i32;
    let y = ((y_center - height / 2.0) * y_scale).round() as i32;
    let w = (width * x_scale).round().max(0.0) as i32;
    let h = (height * y_scale).round().max(0.0) as i32;

    candidates.boxes.push([x, y, w, h]);
    candidates.confidences.push(confidence);
    candidates.class_ids.push(class_id);
  }

  candidates
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 以锚点行形式构造通道优先的原始输出
  fn channel_first(rows: &[&[f32]]) -> (Vec<f32>, usize, usize) {
    let anchors = rows.len();
    let features = rows[0].len();
    let mut data = vec![0.0f32; features * anchors];
    for (a, row) in rows.iter().enumerate() {
      assert_eq!(row.len(), features);
      for (f, value) in row.iter().enumerate() {
        data[f * anchors + a] = *value;
      }
    }
    (data, features, anchors)
  }

  const MODEL: (u32, u32) = (640, 640);
  const FRAME: (u32, u32) = (1280, 720);

  #[test]
  fn threshold_is_checked_per_anchor() {
    // 只有一个锚点超过阈值，无论它在首、中、尾都必须被找到
    let quiet: &[f32] = &[100.0, 100.0, 10.0, 10.0, 0.01];
    let loud: &[f32] = &[320.0, 320.0, 64.0, 64.0, 0.9];

    for position in 0..3usize {
      let mut rows = vec![quiet, quiet, quiet];
      rows[position] = loud;
      let (data, features, anchors) = channel_first(&rows);

      let candidates = decode_predictions(&data, features, anchors, MODEL, FRAME, 0.25);
      assert_eq!(candidates.len(), 1, "锚点位于 {} 时丢失", position);
      assert_eq!(candidates.confidences, vec![0.9]);
    }
  }

  #[test]
  fn single_class_output_uses_value_directly() {
    // C == 1：唯一的得分即置信度，类别固定为 0
    let (data, features, anchors) =
      channel_first(&[&[320.0, 320.0, 64.0, 64.0, 0.7]]);
    let candidates = decode_predictions(&data, features, anchors, MODEL, FRAME, 0.25);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates.confidences, vec![0.7]);
    assert_eq!(candidates.class_ids, vec![0]);
  }

  #[test]
  fn multi_class_output_takes_argmax() {
    let (data, features, anchors) =
      channel_first(&[&[320.0, 320.0, 64.0, 64.0, 0.1, 0.8, 0.3]]);
    let candidates = decode_predictions(&data, features, anchors, MODEL, FRAME, 0.25);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates.class_ids, vec![1]);
    assert!((candidates.confidences[0] - 0.8).abs() < 1e-6);
  }

  #[test]
  fn rescaling_is_anisotropic() {
    // 640x640 -> 1280x720: x_scale = 2.0, y_scale = 1.125
    let (data, features, anchors) =
      channel_first(&[&[320.0, 320.0, 64.0, 64.0, 0.9]]);
    let candidates = decode_predictions(&data, features, anchors, MODEL, FRAME, 0.25);
    assert_eq!(candidates.boxes, vec![[576, 324, 128, 72]]);
  }

  #[test]
  fn below_threshold_yields_no_candidates() {
    let (data, features, anchors) =
      channel_first(&[&[320.0, 320.0, 64.0, 64.0, 0.2], &[100.0, 100.0, 8.0, 8.0, 0.24]]);
    let candidates = decode_predictions(&data, features, anchors, MODEL, FRAME, 0.25);
    assert!(candidates.is_empty());
  }

  #[test]
  fn all_passing_anchors_accumulate() {
    let (data, features, anchors) = channel_first(&[
      &[100.0, 100.0, 32.0, 32.0, 0.9],
      &[300.0, 300.0, 32.0, 32.0, 0.5],
      &[500.0, 500.0, 32.0, 32.0, 0.3],
    ]);
    let candidates = decode_predictions(&data, features, anchors, MODEL, FRAME, 0.25);
    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates.boxes.len(), candidates.confidences.len());
    assert_eq!(candidates.boxes.len(), candidates.class_ids.len());
  }

  #[test]
  fn malformed_extent_is_clamped_to_zero() {
    // 负宽高的畸形预测不得崩溃，也不得产生负尺寸
    let (data, features, anchors) =
      channel_first(&[&[320.0, 320.0, -64.0, -64.0, 0.9]]);
    let candidates = decode_predictions(&data, features, anchors, MODEL, FRAME, 0.25);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates.boxes[0][2], 0);
    assert_eq!(candidates.boxes[0][3], 0);
  }
}
