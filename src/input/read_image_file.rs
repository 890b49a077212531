// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Invalid repeat count: {0}")]
  InvalidRepeat(String),
}

/// 读取一张图片，可通过 `?repeat=N` 重复输出 N 次
#[derive(Debug, Clone)]
pub struct ImageFileInput {
  image: RgbImage,
  remaining: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let repeat = match url.query_pairs().find(|(k, _)| k == "repeat") {
      Some((_, v)) => v
        .parse::<usize>()
        .map_err(|_| ImageFileInputError::InvalidRepeat(v.to_string()))?,
      None => 1,
    };

    let path = url.path();
    let image = ImageReader::open(path)?.decode()?.into_rgb8();
    info!(
      "读取图像 {}: {}x{}，输出 {} 次",
      path,
      image.width(),
      image.height(),
      repeat
    );

    Ok(Self::new(image, repeat))
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage, repeat: usize) -> Self {
    Self {
      image,
      remaining: repeat,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    Some(self.image.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn reads_and_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    RgbImage::from_pixel(6, 4, Rgb([1, 2, 3])).save(&path).unwrap();

    let url = Url::parse(&format!("image://{}?repeat=3", path.display())).unwrap();
    let input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!((input.width(), input.height()), (6, 4));

    let frames: Vec<RgbImage> = input.collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2].get_pixel(5, 3), &Rgb([1, 2, 3]));
  }

  #[test]
  fn rejects_other_schemes_and_bad_repeat() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));

    let url = Url::parse("image:///tmp/x.png?repeat=many").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::InvalidRepeat(_))
    ));
  }
}
