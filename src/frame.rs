// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - NCHW 输入张量与预处理
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

use image::RgbImage;
use tracing::debug;

use crate::model::DecodeError;

const RGB_CHANNELS: usize = 3;

/// [1, 3, S, S] 的 RGB 浮点张量，取值 [0, 1]，附带原图尺寸
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  data: Box<[f32]>,
  side: u32,
  orig_width: u32,
  orig_height: u32,
}

impl InputTensor {
  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.side as usize, self.side as usize]
  }

  pub fn side(&self) -> u32 {
    self.side
  }

  pub fn orig_width(&self) -> u32 {
    self.orig_width
  }

  pub fn orig_height(&self) -> u32 {
    self.orig_height
  }

  pub fn as_nchw(&self) -> &[f32] {
    &self.data
  }
}

/// 将原图缩放为模型所需的正方形输入
#[derive(Debug, Clone)]
pub struct TensorPreprocessor {
  side: u32,
}

impl TensorPreprocessor {
  pub fn new(side: u32) -> Self {
    Self { side }
  }

  pub fn side(&self) -> u32 {
    self.side
  }

  pub fn preprocess(&self, image: &RgbImage) -> Result<InputTensor, DecodeError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(DecodeError::InvalidImage { width, height });
    }

    let resized = image::imageops::resize(
      image,
      self.side,
      self.side,
      image::imageops::FilterType::Triangle,
    );

    let side = self.side as usize;
    let plane = side * side;
    let mut data = vec![0.0f32; RGB_CHANNELS * plane];

    for (x, y, pixel) in resized.enumerate_pixels() {
      let idx = y as usize * side + x as usize;
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }

    debug!(
      "预处理完成: {}x{} -> {}x{}",
      width, height, self.side, self.side
    );

    Ok(InputTensor {
      data: data.into_boxed_slice(),
      side: self.side,
      orig_width: width,
      orig_height: height,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn produces_normalized_nchw() {
    let image = RgbImage::from_pixel(32, 16, Rgb([255, 0, 51]));
    let tensor = TensorPreprocessor::new(8).preprocess(&image).unwrap();

    assert_eq!(tensor.shape(), [1, 3, 8, 8]);
    assert_eq!((tensor.orig_width(), tensor.orig_height()), (32, 16));

    let data = tensor.as_nchw();
    assert_eq!(data.len(), 3 * 64);
    assert!(data[..64].iter().all(|&v| (v - 1.0).abs() < 1e-6));
    assert!(data[64..128].iter().all(|&v| v.abs() < 1e-6));
    assert!(data[128..].iter().all(|&v| (v - 0.2).abs() < 1e-6));
  }

  #[test]
  fn rejects_empty_image() {
    let image = RgbImage::new(0, 10);
    let err = TensorPreprocessor::new(640).preprocess(&image).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidImage { width: 0, height: 10 }));
  }
}
