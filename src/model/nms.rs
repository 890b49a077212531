// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use super::Candidate;

/// 贪心 NMS
#[derive(Debug, Clone)]
pub struct Suppressor {
  iou_threshold: f32,
  class_agnostic: bool,
}

impl Suppressor {
  pub fn new(iou_threshold: f32, class_agnostic: bool) -> Self {
    Self {
      iou_threshold,
      class_agnostic,
    }
  }

  fn same_group(&self, a: &Candidate, b: &Candidate) -> bool {
    self.class_agnostic || a.class_id == b.class_id
  }

  /// 返回保留下来的候选框，按保留顺序（置信度降序）排列
  pub fn suppress(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    // 稳定排序：置信度相同时保持原始顺序
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let n = candidates.len();
    let mut suppressed = vec![false; n];
    let mut keep = Vec::new();

    for i in 0..n {
      if suppressed[i] {
        continue;
      }
      keep.push(i);

      let best = &candidates[i];
      for j in (i + 1)..n {
        if suppressed[j] || !self.same_group(best, &candidates[j]) {
          continue;
        }
        if best.bbox.iou(&candidates[j].bbox) > self.iou_threshold {
          suppressed[j] = true;
        }
      }
    }

    debug!("NMS: {} 个候选框保留 {} 个", n, keep.len());

    let mut kept = Vec::with_capacity(keep.len());
    let mut keep = keep.into_iter().peekable();
    for (idx, candidate) in candidates.into_iter().enumerate() {
      if keep.peek() == Some(&idx) {
        keep.next();
        kept.push(candidate);
      }
    }
    kept
  }
}
