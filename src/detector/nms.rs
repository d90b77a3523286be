// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/detector/nms.rs - 非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::cmp::Ordering;

/// 边界框，左上角坐标加宽高，单位为像素
pub type BoundingBox = [i32; 4];

/// 计算两个边界框的 IoU（交并比）
///
/// 两框均退化（面积为零）时返回 0，不会除零。
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = (a[0] + a[2]).min(b[0] + b[2]);
  let y2 = (a[1] + a[3]).min(b[1] + b[3]);

  let intersection = ((x2 - x1).max(0) as i64) * ((y2 - y1).max(0) as i64);
  let area_a = (a[2] as i64) * (a[3] as i64);
  let area_b = (b[2] as i64) * (b[3] as i64);
  let union = area_a + area_b - intersection;

  if union > 0 {
    intersection as f32 / union as f32
  } else {
    0.0
  }
}

/// 贪心非极大值抑制
///
/// `boxes` 与 `scores` 为平行列表。低于 `score_threshold` 的候选会再次被过滤
/// （解码阶段已过滤过一次，这里作为兜底）。返回保留候选在输入列表中的下标，
/// 按置信度降序排列；相同置信度保持输入顺序（稳定排序）。
pub fn nms(
  boxes: &[BoundingBox],
  scores: &[f32],
  score_threshold: f32,
  iou_threshold: f32,
) -> Vec<usize> {
  let mut order: Vec<usize> = (0..boxes.len())
    .filter(|&i| scores[i] >= score_threshold)
    .collect();
  order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

  let mut keep = Vec::new();
  while let Some(&best) = order.first() {
    keep.push(best);
    order.retain(|&i| i != best && iou(&boxes[best], &boxes[i]) <= iou_threshold);
  }

  keep
}
