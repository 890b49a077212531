// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/catalog.rs - 类别目录与调色板
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

use std::path::Path;
use std::sync::{Arc, OnceLock};

use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::info;

/// 调色板的固定随机种子
pub const PALETTE_SEED: u64 = 42;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("类别列表为空")]
  Empty,
}

/// 只读的类别目录，颜色在构造时一次性生成
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassCatalog {
  names: Vec<String>,
  colors: Vec<[u8; 3]>,
}

impl ClassCatalog {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Result<Self, CatalogError> {
    Self::with_seed(names, PALETTE_SEED)
  }

  pub fn with_seed<S: Into<String>>(
    names: impl IntoIterator<Item = S>,
    seed: u64,
  ) -> Result<Self, CatalogError> {
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    if names.is_empty() {
      return Err(CatalogError::Empty);
    }
    Ok(Self::build(names, seed))
  }

  fn build(names: Vec<String>, seed: u64) -> Self {
    let mut rng = StdRng::seed_from_u64(seed);
    let colors = names
      .iter()
      .map(|_| [rng.gen_range(0..255), rng.gen_range(0..255), rng.gen_range(0..255)])
      .collect();

    Self { names, colors }
  }

  /// 进程内共享的 COCO 目录
  pub fn coco() -> Arc<ClassCatalog> {
    static COCO: OnceLock<Arc<ClassCatalog>> = OnceLock::new();
    COCO
      .get_or_init(|| {
        let names = COCO_CLASSES.iter().map(|s| s.to_string()).collect();
        Arc::new(Self::build(names, PALETTE_SEED))
      })
      .clone()
  }

  /// 从标签文件加载，每行一个类别名，忽略空行与 `#` 注释
  pub fn from_label_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let names: Vec<&str> = content
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty() && !l.starts_with('#'))
      .collect();
    let catalog = Self::new(names)?;
    info!(
      "从 {} 加载了 {} 个类别",
      path.as_ref().display(),
      catalog.len()
    );
    Ok(catalog)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: usize) -> &str {
    self.names.get(class_id).map(String::as_str).unwrap_or("unknown")
  }

  pub fn color(&self, class_id: usize) -> [u8; 3] {
    self.colors[class_id % self.colors.len()]
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }
}
