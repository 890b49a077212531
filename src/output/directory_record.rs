// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  path::{Path, PathBuf},
  sync::{Arc, Mutex},
};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{ClassCatalog, Detection},
  output::{
    Render,
    draw::{Draw, DrawError},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("帧计数器锁已损坏")]
  Poisoned,
}

/// 与图像同名的 `.json` 检测记录
#[derive(Serialize)]
struct FrameRecord<'a> {
  frame_id: u16,
  timestamp: DateTime<Utc>,
  width: u32,
  height: u32,
  detections: &'a [Detection],
}

/// `folder:///dir?always&font=/path/font.ttf`
///
/// 按 `YYYY/MM/DD` 存放每帧的标注图像和检测记录，默认只保存有检测结果的帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counters: Arc<Mutex<u16>>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    let mut draw = Draw::default();
    if let Some((_, font)) = uri.query_pairs().find(|(k, _)| k == "font") {
      draw = draw.with_font_file(&*font)?;
    }

    Ok(DirectoryRecordOutput::new(uri.path(), draw, always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>, draw: Draw, always: bool) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      draw,
      frame_counters: Arc::new(Mutex::new(0)),
      always,
    }
  }

  pub fn with_catalog(mut self, catalog: Arc<ClassCatalog>) -> Self {
    self.draw = self.draw.with_catalog(catalog);
    self
  }

  fn frame_id(&self) -> Result<u16, DirectoryRecordOutputError> {
    let mut counter = self
      .frame_counters
      .lock()
      .map_err(|_| DirectoryRecordOutputError::Poisoned)?;
    let id = counter.wrapping_add(1);
    *counter = id;
    Ok(id)
  }

  fn frame_path(&self, now: &DateTime<Utc>, id: u16) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!("{}-{:04X}.png", now.format("%H-%M-%S"), id)))
  }
}

impl Render<RgbImage, Vec<Detection>> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &Vec<Detection>) -> Result<(), Self::Error> {
    let id = self.frame_id()?;
    if !self.always && result.is_empty() {
      debug!("第 {} 帧无检测结果，跳过保存", id);
      return Ok(());
    }

    let now = Utc::now();
    let path = self.frame_path(&now, id)?;

    self.draw.draw(frame, result).save(&path)?;

    let record = FrameRecord {
      frame_id: id,
      timestamp: now,
      width: frame.width(),
      height: frame.height(),
      detections: result,
    };
    std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(&record)?)?;

    debug!("记录第 {} 帧: {}", id, path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BBox, Mask};
  use image::Rgb;

  fn files_with_extension(root: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else if path.extension().is_some_and(|e| e == ext) {
          found.push(path);
        }
      }
    }
    found
  }

  fn detection() -> Detection {
    let mut mask = Mask::empty(8, 8);
    mask.set(3, 3);
    Detection {
      bbox: BBox::new(1.0, 1.0, 6.0, 6.0),
      class_id: 2,
      class_name: "car".to_string(),
      confidence: 0.75,
      mask,
    }
  }

  #[test]
  fn skips_empty_frames_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));

    let url = url::Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &Vec::new()).unwrap();
    assert!(files_with_extension(dir.path(), "png").is_empty());

    let url = url::Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &Vec::new()).unwrap();
    assert_eq!(files_with_extension(dir.path(), "png").len(), 1);
  }

  #[test]
  fn writes_image_and_json_record() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), Draw::default(), false);
    let frame = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
    output.render_result(&frame, &vec![detection()]).unwrap();

    let pngs = files_with_extension(dir.path(), "png");
    assert_eq!(pngs.len(), 1);
    assert!(pngs[0].to_string_lossy().ends_with("-0001.png"));

    let json = std::fs::read_to_string(pngs[0].with_extension("json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["frame_id"], 1);
    assert_eq!(value["detections"][0]["class_name"], "car");
    assert_eq!(value["detections"][0]["mask"]["area"], 1);
  }
}
