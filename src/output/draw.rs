// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 分割结果可视化
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

use std::{path::Path, sync::Arc};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::model::{ClassCatalog, Detection};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: u32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 无字体时的每字符宽度估计
const LABEL_TEXT_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub const DEFAULT_MASK_ALPHA: f32 = 0.4;
pub const DEFAULT_LINE_WIDTH: u32 = 2;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(String),
}

/// 在原图上绘制掩码、边框和标签
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  mask_alpha: f32,
  line_width: u32,
  catalog: Arc<ClassCatalog>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(ClassCatalog::coco())
  }
}

impl Draw {
  pub fn new(catalog: Arc<ClassCatalog>) -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      mask_alpha: DEFAULT_MASK_ALPHA,
      line_width: DEFAULT_LINE_WIDTH,
      catalog,
    }
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("加载字体: {}", path.display());
    Ok(self.with_font(font))
  }

  pub fn with_mask_alpha(mut self, alpha: f32) -> Self {
    self.mask_alpha = alpha.clamp(0.0, 1.0);
    self
  }

  pub fn with_catalog(mut self, catalog: Arc<ClassCatalog>) -> Self {
    self.catalog = catalog;
    self
  }

  pub fn catalog(&self) -> &Arc<ClassCatalog> {
    &self.catalog
  }

  pub fn draw(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.clone();
    // 先画所有掩码，避免后面的掩码盖住前面的边框
    for det in detections {
      self.blend_mask(&mut canvas, det, self.catalog.color(det.class_id));
    }
    for det in detections {
      let color = self.catalog.color(det.class_id);
      self.draw_bbox(&mut canvas, det, color);
      self.draw_label(&mut canvas, det, color);
    }
    canvas
  }

  fn blend_mask(&self, canvas: &mut RgbImage, det: &Detection, color: [u8; 3]) {
    let mask = &det.mask;
    if mask.width() != canvas.width() || mask.height() != canvas.height() {
      return;
    }
    let alpha = self.mask_alpha;
    for (pixel, &set) in canvas.pixels_mut().zip(mask.as_slice()) {
      if set == 0 {
        continue;
      }
      for c in 0..3 {
        let blended = pixel[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
        pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
      }
    }
  }

  fn draw_bbox(&self, canvas: &mut RgbImage, det: &Detection, color: [u8; 3]) {
    let (w, h) = (canvas.width() as i32, canvas.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let x_min = (det.bbox.x1.floor() as i32).clamp(0, w - 1);
    let y_min = (det.bbox.y1.floor() as i32).clamp(0, h - 1);
    let x_max = (det.bbox.x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (det.bbox.y2.ceil() as i32).clamp(0, h - 1);

    // 加粗边框，逐层向内收缩
    for t in 0..self.line_width as i32 {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(canvas, rect, Rgb(color));
    }
  }

  fn draw_label(&self, canvas: &mut RgbImage, det: &Detection, color: [u8; 3]) {
    let label = format!("{}: {:.2}", det.class_name, det.confidence);
    let scale = PxScale::from(self.font_size);

    let (text_width, text_height) = match &self.font {
      Some(font) => {
        let (tw, th) = text_size(scale, font, &label);
        (tw + 2 * LABEL_TEXT_PADDING as u32, th.max(LABEL_TEXT_HEIGHT))
      }
      None => (
        (label.chars().count() as f32 * LABEL_CHAR_WIDTH) as u32,
        LABEL_TEXT_HEIGHT,
      ),
    };

    let (w, h) = (canvas.width() as i32, canvas.height() as i32);
    let label_x = (det.bbox.x1.floor() as i32).clamp(0, (w - 1).max(0));
    // 标签放在边框上方，放不下时贴在边框内侧
    let above = det.bbox.y1.floor() as i32 - text_height as i32;
    let label_y = if above >= 0 {
      above
    } else {
      (det.bbox.y1.floor() as i32).clamp(0, (h - 1).max(0))
    };

    let label_width = text_width.min((w - label_x).max(0) as u32);
    let label_height = text_height.min((h - label_y).max(0) as u32);
    if label_width == 0 || label_height == 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
    draw_filled_rect_mut(canvas, rect, Rgb(color));

    if let Some(font) = &self.font {
      draw_text_mut(
        canvas,
        LABEL_TEXT_COLOR,
        label_x + LABEL_TEXT_PADDING,
        label_y + LABEL_TEXT_PADDING,
        scale,
        font,
        &label,
      );
    }
  }
}

/// 不带字体、默认透明度的绘制
pub fn draw_detections(
  image: &RgbImage,
  detections: &[Detection],
  catalog: &Arc<ClassCatalog>,
) -> RgbImage {
  Draw::new(catalog.clone()).draw(image, detections)
}
