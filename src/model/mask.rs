// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/mask.rs - 基于原型掩码的实例掩码重建
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

use super::{BBox, Mask, PrototypeMasks};

/// 逻辑函数，输出截断到 [0, 1]，非有限值记为 0
pub fn sigmoid(x: f32) -> f32 {
  let y = 1.0 / (1.0 + (-x).exp());
  if y.is_nan() { 0.0 } else { y.clamp(0.0, 1.0) }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
  a + (b - a) * t
}

/// 按 OpenCV INTER_LINEAR 的半像素中心约定计算源坐标
#[inline]
fn source_coord(dst: u32, scale: f32, src_len: usize) -> (usize, usize, f32) {
  let s = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
  let i0 = (s.floor() as usize).min(src_len - 1);
  let i1 = (i0 + 1).min(src_len - 1);
  let t = if i0 == i1 { 0.0 } else { s - i0 as f32 };
  (i0, i1, t)
}

/// 单个低分辨率概率平面，按需做双线性采样
struct ProbabilityPlane {
  width: usize,
  height: usize,
  data: Vec<f32>,
}

impl ProbabilityPlane {
  /// sigmoid(Σ coeff_m · prototype_m)
  fn combine(coeffs: &[f32], prototypes: &PrototypeMasks) -> Self {
    let size = prototypes.width() * prototypes.height();
    let mut raw = vec![0.0f32; size];
    for (m, &coeff) in coeffs.iter().enumerate().take(prototypes.num_masks()) {
      for (acc, &p) in raw.iter_mut().zip(prototypes.plane(m)) {
        *acc += coeff * p;
      }
    }
    raw.iter_mut().for_each(|v| *v = sigmoid(*v));

    Self {
      width: prototypes.width(),
      height: prototypes.height(),
      data: raw,
    }
  }

  #[inline]
  fn at(&self, x: usize, y: usize) -> f32 {
    self.data[y * self.width + x]
  }
}

#[derive(Debug, Clone)]
pub struct MaskReconstructor {
  threshold: f32,
}

impl Default for MaskReconstructor {
  fn default() -> Self {
    Self { threshold: 0.5 }
  }
}

impl MaskReconstructor {
  pub fn new(threshold: f32) -> Self {
    Self { threshold }
  }

  /// 重建与原图同尺寸的二值掩码，仅框内可能为 1
  ///
  /// 缺少原型或系数为空时返回全空掩码。
  pub fn reconstruct(
    &self,
    coeffs: &[f32],
    prototypes: Option<&PrototypeMasks>,
    bbox: &BBox,
    width: u32,
    height: u32,
  ) -> Mask {
    let mut mask = Mask::empty(width, height);

    let prototypes = match prototypes {
      Some(p) if !coeffs.is_empty() && p.num_masks() > 0 => p,
      _ => return mask,
    };

    let plane = ProbabilityPlane::combine(coeffs, prototypes);

    // 与参考实现一致：框坐标截断为整数后裁剪
    let bbox = bbox.clamp_to(width as f32, height as f32);
    let (x_start, x_end) = (bbox.x1.floor() as u32, (bbox.x2.floor() as u32).min(width));
    let (y_start, y_end) = (bbox.y1.floor() as u32, (bbox.y2.floor() as u32).min(height));

    let scale_x = plane.width as f32 / width as f32;
    let scale_y = plane.height as f32 / height as f32;

    for y in y_start..y_end {
      let (y0, y1, ty) = source_coord(y, scale_y, plane.height);
      for x in x_start..x_end {
        let (x0, x1, tx) = source_coord(x, scale_x, plane.width);
        let top = lerp(plane.at(x0, y0), plane.at(x1, y0), tx);
        let bottom = lerp(plane.at(x0, y1), plane.at(x1, y1), tx);
        if lerp(top, bottom, ty) > self.threshold {
          mask.set(x, y);
        }
      }
    }

    mask
  }
}
