// 该文件是 Shigu （事故侦测） 项目的一部分。
// src/detector/mod.rs - 事故目标检测器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

pub mod decode;
pub mod nms;
pub mod preprocess;

use std::path::{Path, PathBuf};

use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;
use tracing::{debug, info};

/// 模型输出的类别名称，本模型只训练了一个类别
pub const CLASS_NAMES: [&str; 1] = ["accident"];

/// 检测结果
#[derive(Clone, Debug)]
pub struct Detection {
  /// 边界框左上角 x 坐标
  pub x: f32,
  /// 边界框左上角 y 坐标
  pub y: f32,
  /// 边界框宽度
  pub width: f32,
  /// 边界框高度
  pub height: f32,
  /// 置信度
  pub confidence: f32,
  /// 类别索引
  pub class_id: usize,
  /// 类别名称
  pub class_name: String,
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("模型加载失败: {0}")]
  ModelLoad(#[source] ort::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理失败: {0}")]
  Inference(#[source] ort::Error),
  #[error("模型输出形状不符: 期望三维 (1, 4+C, A)，实际 {0:?}")]
  OutputShapeMismatch(Vec<usize>),
}

/// 事故目标检测器
///
/// 持有 ONNX Runtime 会话，并在加载时与模型协商输入张量名称和输入尺寸，
/// 之后的预处理与解码都使用协商到的尺寸，不做任何硬编码。
pub struct AccidentDetector {
  /// ONNX Runtime 会话
  session: Session,
  /// 输入张量名称
  input_name: String,
  /// 输出张量名称
  output_name: String,
  /// 模型输入宽度
  input_width: u32,
  /// 模型输入高度
  input_height: u32,
  /// 模型声明的输出特征数（4 + C，静态时用于运行期校验）
  declared_features: Option<usize>,
  /// 置信度阈值
  confidence_threshold: f32,
  /// NMS IoU 阈值
  nms_threshold: f32,
}

impl AccidentDetector {
  /// 加载模型并协商输入输出形状
  pub fn new(
    model_path: &Path,
    confidence_threshold: f32,
    nms_threshold: f32,
  ) -> Result<Self, DetectorError> {
    if !model_path.exists() {
      return Err(DetectorError::ModelNotFound(model_path.to_path_buf()));
    }

    info!("加载模型文件: {}", model_path.display());
    let session = Session::builder()
      .map_err(DetectorError::ModelLoad)?
      .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
      .map_err(DetectorError::ModelLoad)?
      .commit_from_file(model_path)
      .map_err(DetectorError::ModelLoad)?;

    // 从模型元数据读取输入张量名称和尺寸
    let input = session
      .inputs
      .first()
      .ok_or_else(|| DetectorError::ModelInvalid("模型没有输入张量".to_string()))?;
    let input_name = input.name.clone();

    let input_dims: Vec<i64> = input
      .input_type
      .tensor_dimensions()
      .ok_or_else(|| DetectorError::ModelInvalid("模型输入不是张量".to_string()))?
      .iter()
      .copied()
      .collect();

    // 期望 (batch, channels, height, width) = (1, 3, H, W)
    if input_dims.len() != 4 {
      return Err(DetectorError::ModelInvalid(format!(
        "期望四维输入张量，实际 {} 维",
        input_dims.len()
      )));
    }
    if input_dims[1] != 3 {
      return Err(DetectorError::ModelInvalid(format!(
        "期望 3 通道输入，实际 {} 通道",
        input_dims[1]
      )));
    }
    if input_dims[2] <= 0 || input_dims[3] <= 0 {
      return Err(DetectorError::ModelInvalid(format!(
        "模型输入尺寸非法: {}x{}",
        input_dims[3], input_dims[2]
      )));
    }
    let input_height = input_dims[2] as u32;
    let input_width = input_dims[3] as u32;

    let output = session
      .outputs
      .first()
      .ok_or_else(|| DetectorError::ModelInvalid("模型没有输出张量".to_string()))?;
    let output_name = output.name.clone();

    let output_dims: Vec<i64> = output
      .output_type
      .tensor_dimensions()
      .ok_or_else(|| DetectorError::ModelInvalid("模型输出不是张量".to_string()))?
      .iter()
      .copied()
      .collect();

    // 期望 (1, 4+C, A)；A 允许为动态维度
    if output_dims.len() != 3 {
      return Err(DetectorError::ModelInvalid(format!(
        "期望三维输出张量，实际 {} 维",
        output_dims.len()
      )));
    }
    let declared_features = if output_dims[1] > 0 {
      if output_dims[1] < 5 {
        return Err(DetectorError::ModelInvalid(format!(
          "输出特征数过小: {}",
          output_dims[1]
        )));
      }
      Some(output_dims[1] as usize)
    } else {
      None
    };

    info!(
      "模型加载完成: 输入 '{}' {}x{}, 输出 '{}' {:?}",
      input_name, input_width, input_height, output_name, output_dims
    );

    Ok(Self {
      session,
      input_name,
      output_name,
      input_width,
      input_height,
      declared_features,
      confidence_threshold,
      nms_threshold,
    })
  }

  /// 模型输入宽度
  pub fn input_width(&self) -> u32 {
    self.input_width
  }

  /// 模型输入高度
  pub fn input_height(&self) -> u32 {
    self.input_height
  }

  /// 对单帧运行检测
  ///
  /// 预处理、推理、解码与抑制全部在调用线程内同步完成。
  pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    let (frame_width, frame_height) = image.dimensions();

    // 预处理
    let tensor = preprocess::preprocess(image, self.input_width, self.input_height);
    let tensor = tensor.as_standard_layout();

    // 推理
    debug!("执行模型推理");
    let input_value = TensorRef::from_array_view(&tensor).map_err(DetectorError::Inference)?;
    let outputs = self
      .session
      .run(ort::inputs![&self.input_name => input_value])
      .map_err(DetectorError::Inference)?;

    let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
      DetectorError::ModelInvalid(format!("找不到输出张量 '{}'", self.output_name))
    })?;
    let (shape, data) = output
      .try_extract_tensor::<f32>()
      .map_err(DetectorError::Inference)?;
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

    // 实际输出必须与启动时协商的形状一致
    if dims.len() != 3 || dims[0] != 1 || dims[1] < 5 {
      return Err(DetectorError::OutputShapeMismatch(dims));
    }
    if let Some(features) = self.declared_features {
      if dims[1] != features {
        return Err(DetectorError::OutputShapeMismatch(dims));
      }
    }
    let (features, anchors) = (dims[1], dims[2]);

    // 解码与抑制
    let candidates = decode::decode_predictions(
      data,
      features,
      anchors,
      (self.input_width, self.input_height),
      (frame_width, frame_height),
      self.confidence_threshold,
    );
    debug!("解码得到 {} 个候选", candidates.len());

    let keep = nms::nms(
      &candidates.boxes,
      &candidates.confidences,
      self.confidence_threshold,
      self.nms_threshold,
    );

    let detections = keep
      .into_iter()
      .map(|i| {
        let [x, y, w, h] = candidates.boxes[i];
        let class_id = candidates.class_ids[i];
        Detection {
          x: x as f32,
          y: y as f32,
          width: w as f32,
          height: h as f32,
          confidence: candidates.confidences[i],
          class_id,
          class_name: CLASS_NAMES.get(class_id).unwrap_or(&"unknown").to_string(),
        }
      })
      .collect();

    Ok(detections)
  }
}
