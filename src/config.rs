// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 解码参数配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::Arc;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::model::{CatalogError, ClassCatalog, DecodeError};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_MAX_DETECTIONS: usize = 100;
pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_MASK_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeConfig {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub class_agnostic: bool,
  /// 0 表示不限制
  pub max_detections: usize,
  /// 模型输入边长 S
  pub input_size: u32,
  /// 框坐标已归一化到 [0, 1]，而不是 [0, S] 像素
  #[serde(default)]
  pub normalized_boxes: bool,
  pub mask_threshold: f32,
}

impl Default for DecodeConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      class_agnostic: false,
      max_detections: DEFAULT_MAX_DETECTIONS,
      input_size: DEFAULT_INPUT_SIZE,
      normalized_boxes: false,
      mask_threshold: DEFAULT_MASK_THRESHOLD,
    }
  }
}

fn check_unit(name: &str, value: f32) -> Result<(), DecodeError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(DecodeError::InvalidConfig(format!(
      "{} 必须位于 [0, 1]，实际为 {}",
      name, value
    )))
  }
}

impl DecodeConfig {
  pub fn validate(&self) -> Result<(), DecodeError> {
    check_unit("confidence_threshold", self.confidence_threshold)?;
    check_unit("iou_threshold", self.iou_threshold)?;
    check_unit("mask_threshold", self.mask_threshold)?;
    if self.input_size == 0 {
      return Err(DecodeError::InvalidConfig(
        "input_size 必须大于 0".to_string(),
      ));
    }
    Ok(())
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_class_agnostic(mut self, agnostic: bool) -> Self {
    self.class_agnostic = agnostic;
    self
  }

  pub fn with_max_detections(mut self, max_detections: usize) -> Self {
    self.max_detections = max_detections;
    self
  }

  pub fn with_input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn with_normalized_boxes(mut self, normalized: bool) -> Self {
    self.normalized_boxes = normalized;
    self
  }

  /// 框坐标所在空间的边长：归一化坐标为 1，否则为 S
  pub fn box_scale(&self) -> u32 {
    if self.normalized_boxes { 1 } else { self.input_size }
  }
}

/// 命令行中的解码参数，可 flatten 进各个可执行程序的参数
#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 不区分类别进行 NMS
  #[arg(long)]
  pub agnostic_nms: bool,

  /// 最多返回的检测数（0 表示不限制）
  #[arg(long, default_value_t = DEFAULT_MAX_DETECTIONS, value_name = "COUNT")]
  pub max_det: usize,

  /// 模型输入边长
  #[arg(long, default_value_t = DEFAULT_INPUT_SIZE, value_name = "PIXELS")]
  pub imgsz: u32,

  /// 模型输出的框坐标为归一化坐标
  #[arg(long)]
  pub normalized_boxes: bool,

  /// 类别标签文件（每行一个），缺省使用 COCO
  #[arg(long, value_name = "FILE")]
  pub labels: Option<std::path::PathBuf>,
}

impl DecodeArgs {
  pub fn to_config(&self) -> DecodeConfig {
    DecodeConfig::default()
      .with_confidence_threshold(self.confidence)
      .with_iou_threshold(self.nms_threshold)
      .with_class_agnostic(self.agnostic_nms)
      .with_max_detections(self.max_det)
      .with_input_size(self.imgsz)
      .with_normalized_boxes(self.normalized_boxes)
  }

  /// 按 `--labels` 加载类别目录，未指定时使用内置 COCO 目录
  pub fn catalog(&self) -> Result<Arc<ClassCatalog>, CatalogError> {
    match &self.labels {
      Some(path) => ClassCatalog::from_label_file(path).map(Arc::new),
      None => Ok(ClassCatalog::coco()),
    }
  }
}
