// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/decode.rs - 原始检测张量解码
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

use tracing::debug;

use super::{BBox, Candidate, DecodeError, DetectionTensor};

const BOX_FEATURES: usize = 4;

/// 将 [cx, cy, w, h, score_1..K, coeff_1..M] 行解码为候选框
#[derive(Debug, Clone)]
pub struct RawOutputDecoder {
  num_classes: usize,
  model_side: f32,
  confidence_threshold: f32,
}

/// 非有限分数视为 0（+∞ 视为 1），再截断到 [0, 1]
fn sanitize_score(score: f32) -> f32 {
  if score.is_nan() {
    0.0
  } else {
    score.clamp(0.0, 1.0)
  }
}

impl RawOutputDecoder {
  pub fn new(num_classes: usize, model_side: u32, confidence_threshold: f32) -> Self {
    Self {
      num_classes,
      model_side: model_side as f32,
      confidence_threshold,
    }
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  /// 根据特征数推出每个候选框的掩码系数个数 M
  pub fn num_masks(&self, tensor: &DetectionTensor) -> Result<usize, DecodeError> {
    let head = BOX_FEATURES + self.num_classes;
    tensor.num_features().checked_sub(head).ok_or_else(|| {
      DecodeError::shape(format!(
        "每个候选框需要至少 {} 个特征（4 + {} 类），实际为 {}",
        head,
        self.num_classes,
        tensor.num_features()
      ))
    })
  }

  /// 过滤、再缩放到原图像素空间；结果尚未经过 NMS
  pub fn decode(
    &self,
    tensor: &DetectionTensor,
    orig_width: u32,
    orig_height: u32,
  ) -> Result<Vec<Candidate>, DecodeError> {
    // 没有候选框时特征数可能未知（如空的 from_rows），直接返回空结果
    if tensor.is_empty() {
      return Ok(Vec::new());
    }
    let num_masks = self.num_masks(tensor)?;
    let score_range = BOX_FEATURES..BOX_FEATURES + self.num_classes;
    let coeff_range = score_range.end..score_range.end + num_masks;

    let (width, height) = (orig_width as f32, orig_height as f32);
    let scale_x = width / self.model_side;
    let scale_y = height / self.model_side;

    let mut candidates = Vec::new();
    let mut scores = Vec::with_capacity(self.num_classes);

    for idx in 0..tensor.num_candidates() {
      tensor.gather(idx, score_range.clone(), &mut scores);

      let (class_id, confidence) = scores.iter().map(|&s| sanitize_score(s)).enumerate().fold(
        (0usize, 0.0f32),
        |(best_id, best), (id, score)| {
          if score > best { (id, score) } else { (best_id, best) }
        },
      );

      if self.num_classes == 0 || confidence < self.confidence_threshold {
        continue;
      }

      let bbox = BBox::from_cxcywh(
        tensor.value(idx, 0),
        tensor.value(idx, 1),
        tensor.value(idx, 2),
        tensor.value(idx, 3),
      );
      if !bbox.is_finite() {
        debug!("候选框 {} 坐标非有限值，已丢弃", idx);
        continue;
      }

      let bbox = bbox
        .ordered()
        .scale(scale_x, scale_y)
        .clamp_to(width, height);

      let mut mask_coeffs = Vec::with_capacity(num_masks);
      tensor.gather(idx, coeff_range.clone(), &mut mask_coeffs);

      candidates.push(Candidate {
        bbox,
        class_id,
        confidence,
        mask_coeffs,
      });
    }

    debug!(
      "{} 个候选框中有 {} 个通过置信度阈值 {}",
      tensor.num_candidates(),
      candidates.len(),
      self.confidence_threshold
    );

    Ok(candidates)
  }
}
