// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/detector/preprocess.rs - 推理前图像预处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use ndarray::Array4;

/// 将 RGB 帧预处理为模型输入张量
///
/// 拉伸缩放到模型输入尺寸（不保持宽高比，解码时按横纵独立的因子还原）、
/// 逐像素除以 255 归一化到 [0,1]、HWC 转 CHW，最后补上 batch 维，
/// 得到 (1, 3, height, width) 的 f32 张量。输入源已统一为 RGB，
/// 此处不做通道重排。
pub fn preprocess(image: &RgbImage, width: u32, height: u32) -> Array4<f32> {
  let resized = image::imageops::resize(
    image,
    width,
    height,
    image::imageops::FilterType::Triangle,
  );

  let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
  for (x, y, pixel) in resized.enumerate_pixels() {
    let (x, y) = (x as usize, y as usize);
    tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
    tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
    tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
  }

  tensor
}
