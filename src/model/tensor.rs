// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/tensor.rs - 检测张量与原型掩码
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

use serde::{Deserialize, Serialize};

use super::DecodeError;

/// 检测张量的内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
  /// [N, 4+K+M]，每行一个候选框
  #[default]
  CandidateMajor,
  /// [4+K+M, N]，常见的 YOLO 导出格式（如 [116, 8400]）
  FeatureMajor,
}

/// 去掉大小为 1 的批次维度
fn strip_batch<'a>(shape: &'a [usize], rank: usize, what: &str) -> Result<&'a [usize], DecodeError> {
  match shape.len() {
    r if r == rank => Ok(shape),
    r if r == rank + 1 && shape[0] == 1 => Ok(&shape[1..]),
    _ => Err(DecodeError::shape(format!(
      "{} 的形状应为 {} 维（可带批次 1），实际为 {:?}",
      what, rank, shape
    ))),
  }
}

/// 各维度之积，溢出时返回 None
fn element_count(dims: &[usize]) -> Option<usize> {
  dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

#[derive(Debug, Clone)]
pub struct DetectionTensor {
  layout: TensorLayout,
  num_candidates: usize,
  num_features: usize,
  data: Box<[f32]>,
}

impl DetectionTensor {
  pub fn new(shape: &[usize], layout: TensorLayout, data: Vec<f32>) -> Result<Self, DecodeError> {
    let dims = strip_batch(shape, 2, "检测张量")?;
    let (num_candidates, num_features) = match layout {
      TensorLayout::CandidateMajor => (dims[0], dims[1]),
      TensorLayout::FeatureMajor => (dims[1], dims[0]),
    };

    if element_count(dims) != Some(data.len()) {
      return Err(DecodeError::shape(format!(
        "检测张量形状 {:?} 与数据长度 {} 不符",
        shape,
        data.len()
      )));
    }

    Ok(Self {
      layout,
      num_candidates,
      num_features,
      data: data.into_boxed_slice(),
    })
  }

  /// 不含任何候选框的张量
  pub fn empty(num_features: usize) -> Self {
    Self {
      layout: TensorLayout::CandidateMajor,
      num_candidates: 0,
      num_features,
      data: Box::new([]),
    }
  }

  /// 由按行排列的候选框构造（每行 4+K+M 个值）
  pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, DecodeError> {
    let num_features = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = rows.iter().position(|r| r.len() != num_features) {
      return Err(DecodeError::shape(format!(
        "第 {} 行长度 {} 与首行长度 {} 不一致",
        bad,
        rows[bad].len(),
        num_features
      )));
    }
    let data = rows.iter().flatten().copied().collect();
    Self::new(&[rows.len(), num_features], TensorLayout::CandidateMajor, data)
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn num_candidates(&self) -> usize {
    self.num_candidates
  }

  pub fn num_features(&self) -> usize {
    self.num_features
  }

  pub fn is_empty(&self) -> bool {
    self.num_candidates == 0
  }

  /// 第 `candidate` 个候选框的第 `feature` 个值
  #[inline]
  pub fn value(&self, candidate: usize, feature: usize) -> f32 {
    match self.layout {
      TensorLayout::CandidateMajor => self.data[candidate * self.num_features + feature],
      TensorLayout::FeatureMajor => self.data[feature * self.num_candidates + candidate],
    }
  }

  /// 将第 `candidate` 个候选框的 `features` 区间写入 `buf`
  pub fn gather(&self, candidate: usize, features: std::ops::Range<usize>, buf: &mut Vec<f32>) {
    buf.clear();
    match self.layout {
      TensorLayout::CandidateMajor => {
        let base = candidate * self.num_features;
        buf.extend_from_slice(&self.data[base + features.start..base + features.end]);
      }
      TensorLayout::FeatureMajor => {
        buf.extend(features.map(|f| self.data[f * self.num_candidates + candidate]));
      }
    }
  }
}

/// M 个 Hp×Wp 的原型掩码平面
#[derive(Debug, Clone)]
pub struct PrototypeMasks {
  num_masks: usize,
  height: usize,
  width: usize,
  data: Box<[f32]>,
}

impl PrototypeMasks {
  pub fn new(shape: &[usize], data: Vec<f32>) -> Result<Self, DecodeError> {
    let dims = strip_batch(shape, 3, "原型掩码")?;
    let (num_masks, height, width) = (dims[0], dims[1], dims[2]);

    if element_count(dims) != Some(data.len()) {
      return Err(DecodeError::shape(format!(
        "原型掩码形状 {:?} 与数据长度 {} 不符",
        shape,
        data.len()
      )));
    }
    if num_masks > 0 && (height == 0 || width == 0) {
      return Err(DecodeError::shape(format!(
        "原型掩码平面尺寸无效: {}x{}",
        width, height
      )));
    }

    Ok(Self {
      num_masks,
      height,
      width,
      data: data.into_boxed_slice(),
    })
  }

  pub fn num_masks(&self) -> usize {
    self.num_masks
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn plane(&self, index: usize) -> &[f32] {
    let size = self.height * self.width;
    &self.data[index * size..(index + 1) * size]
  }
}
