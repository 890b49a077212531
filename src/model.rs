// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型输出的数据定义与解码
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

use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};
use thiserror::Error;

use crate::frame::InputTensor;

mod backend;
mod catalog;
mod decode;
mod mask;
mod nms;
#[cfg(feature = "onnx")]
mod onnx;
mod replay;
mod tensor;

pub use self::backend::{BackendError, BackendWrapper};
pub use self::catalog::{COCO_CLASSES, CatalogError, ClassCatalog, PALETTE_SEED};
pub use self::decode::RawOutputDecoder;
pub use self::mask::{MaskReconstructor, sigmoid};
pub use self::nms::Suppressor;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxBackend, OnnxBackendError};
pub use self::replay::{ReplayBackend, ReplayBackendError, TensorDump};
pub use self::tensor::{DetectionTensor, PrototypeMasks, TensorLayout};

/// IoU 分母中的平滑项，避免除零
pub const IOU_EPSILON: f32 = 1e-6;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("图像尺寸无效: {width}x{height}")]
  InvalidImage { width: u32, height: u32 },
  #[error("张量形状不匹配: {0}")]
  ShapeMismatch(String),
  #[error("推理失败: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("配置无效: {0}")]
  InvalidConfig(String),
}

impl DecodeError {
  pub fn shape(msg: impl Into<String>) -> Self {
    DecodeError::ShapeMismatch(msg.into())
  }

  /// 该错误是否只影响当前帧（跳过该帧后可继续处理）
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      DecodeError::ShapeMismatch(_) | DecodeError::Inference(_) | DecodeError::InvalidImage { .. }
    )
  }
}

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 推理后端能力抽象，启动时选定一次，解码核心不关心具体后端
pub trait InferenceBackend {
  type Error: std::error::Error + Send + Sync + 'static;

  fn name(&self) -> &str;
  fn infer(&self, input: &InputTensor) -> Result<RawOutputs, Self::Error>;
}

impl<F, E> InferenceBackend for F
where
  F: Fn(&InputTensor) -> Result<RawOutputs, E>,
  E: std::error::Error + Send + Sync + 'static,
{
  type Error = E;

  fn name(&self) -> &str {
    "closure"
  }

  fn infer(&self, input: &InputTensor) -> Result<RawOutputs, Self::Error> {
    self(input)
  }
}

/// 一帧推理的原始输出
#[derive(Debug, Clone)]
pub struct RawOutputs {
  pub detections: DetectionTensor,
  pub prototypes: Option<PrototypeMasks>,
}

impl RawOutputs {
  pub fn new(detections: DetectionTensor, prototypes: Option<PrototypeMasks>) -> Self {
    Self {
      detections,
      prototypes,
    }
  }
}

/// 边界框 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  /// (cx, cy, w, h) -> (x1, y1, x2, y2)
  pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self {
      x1: cx - w / 2.0,
      y1: cy - h / 2.0,
      x2: cx + w / 2.0,
      y2: cy + h / 2.0,
    }
  }

  pub fn to_cxcywh(&self) -> [f32; 4] {
    [
      (self.x1 + self.x2) / 2.0,
      (self.y1 + self.y2) / 2.0,
      self.x2 - self.x1,
      self.y2 - self.y1,
    ]
  }

  /// 交换颠倒的角点，保证 x1 <= x2, y1 <= y2
  pub fn ordered(self) -> Self {
    Self {
      x1: self.x1.min(self.x2),
      y1: self.y1.min(self.y2),
      x2: self.x1.max(self.x2),
      y2: self.y1.max(self.y2),
    }
  }

  pub fn scale(&self, sx: f32, sy: f32) -> Self {
    Self {
      x1: self.x1 * sx,
      y1: self.y1 * sy,
      x2: self.x2 * sx,
      y2: self.y2 * sy,
    }
  }

  pub fn clamp_to(&self, width: f32, height: f32) -> Self {
    Self {
      x1: self.x1.clamp(0.0, width),
      y1: self.y1.clamp(0.0, height),
      x2: self.x2.clamp(0.0, width),
      y2: self.y2.clamp(0.0, height),
    }
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn is_finite(&self) -> bool {
    self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
  }

  /// 交并比，分母带平滑项
  pub fn iou(&self, other: &BBox) -> f32 {
    let ix1 = self.x1.max(other.x1);
    let iy1 = self.y1.max(other.y1);
    let ix2 = self.x2.min(other.x2);
    let iy2 = self.y2.min(other.y2);

    let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    intersection / (self.area() + other.area() - intersection + IOU_EPSILON)
  }
}

/// 置信度过滤后、NMS 之前的候选框
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub bbox: BBox,
  pub class_id: usize,
  pub confidence: f32,
  pub mask_coeffs: Vec<f32>,
}

/// 与原图同尺寸的二值掩码，按行存储，取值 0 或 1
#[derive(Clone, PartialEq, Eq)]
pub struct Mask {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl std::fmt::Debug for Mask {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mask")
      .field("width", &self.width)
      .field("height", &self.height)
      .field("area", &self.area())
      .finish()
  }
}

impl Mask {
  pub fn empty(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      data: vec![0u8; width as usize * height as usize].into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn get(&self, x: u32, y: u32) -> bool {
    if x >= self.width || y >= self.height {
      return false;
    }
    self.data[y as usize * self.width as usize + x as usize] != 0
  }

  pub fn set(&mut self, x: u32, y: u32) {
    if x < self.width && y < self.height {
      self.data[y as usize * self.width as usize + x as usize] = 1;
    }
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.data
  }

  /// 前景像素数
  pub fn area(&self) -> usize {
    self.data.iter().filter(|&&v| v != 0).count()
  }

  pub fn is_empty(&self) -> bool {
    self.data.iter().all(|&v| v == 0)
  }

  /// 前景像素的外接范围 [x_min, y_min, x_max, y_max]（闭区间）
  pub fn extent(&self) -> Option<[u32; 4]> {
    let mut extent: Option<[u32; 4]> = None;
    for (idx, _) in self.data.iter().enumerate().filter(|(_, v)| **v != 0) {
      let x = (idx % self.width as usize) as u32;
      let y = (idx / self.width as usize) as u32;
      extent = Some(match extent {
        None => [x, y, x, y],
        Some([x0, y0, x1, y1]) => [x0.min(x), y0.min(y), x1.max(x), y1.max(y)],
      });
    }
    extent
  }

  /// 按行优先的游程编码：交替记录 0 与 1 的长度，首段总是 0（可为空）
  pub fn run_lengths(&self) -> Vec<u32> {
    let mut counts = Vec::new();
    let mut current = 0u8;
    let mut run = 0u32;
    for &v in self.data.iter() {
      let v = u8::from(v != 0);
      if v != current {
        counts.push(run);
        current = v;
        run = 0;
      }
      run += 1;
    }
    counts.push(run);
    counts
  }

  /// `run_lengths` 的逆过程，总长度与尺寸不符时返回 None
  pub fn from_run_lengths(width: u32, height: u32, counts: &[u32]) -> Option<Self> {
    let total = width as usize * height as usize;
    let mut data = Vec::with_capacity(total);
    for (i, &run) in counts.iter().enumerate() {
      if run as usize > total - data.len() {
        return None;
      }
      data.extend(std::iter::repeat_n((i % 2) as u8, run as usize));
    }
    (data.len() == total).then(|| Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }
}

impl Serialize for Mask {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut state = serializer.serialize_struct("Mask", 5)?;
    state.serialize_field("width", &self.width)?;
    state.serialize_field("height", &self.height)?;
    state.serialize_field("area", &self.area())?;
    state.serialize_field("extent", &self.extent())?;
    state.serialize_field("rle", &self.run_lengths())?;
    state.end()
  }
}

/// 最终检测结果，坐标位于原图像素空间
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub bbox: BBox,
  pub class_id: usize,
  pub class_name: String,
  pub confidence: f32,
  pub mask: Mask,
}
