// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 预处理、推理、解码、NMS 与掩码重建的编排
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

use std::sync::Arc;

use image::RgbImage;
use tracing::debug;

use crate::{
  config::DecodeConfig,
  frame::{InputTensor, TensorPreprocessor},
  model::{
    ClassCatalog, DecodeError, Detection, InferenceBackend, MaskReconstructor, Model,
    RawOutputDecoder, RawOutputs, Suppressor,
  },
};

/// 单帧解码流水线，无跨帧状态
#[derive(Debug, Clone)]
pub struct DecodePipeline {
  config: DecodeConfig,
  catalog: Arc<ClassCatalog>,
  preprocessor: TensorPreprocessor,
  decoder: RawOutputDecoder,
  suppressor: Suppressor,
  reconstructor: MaskReconstructor,
}

impl DecodePipeline {
  pub fn new(config: DecodeConfig, catalog: Arc<ClassCatalog>) -> Result<Self, DecodeError> {
    config.validate()?;

    Ok(Self {
      preprocessor: TensorPreprocessor::new(config.input_size),
      decoder: RawOutputDecoder::new(
        catalog.len(),
        config.box_scale(),
        config.confidence_threshold,
      ),
      suppressor: Suppressor::new(config.iou_threshold, config.class_agnostic),
      reconstructor: MaskReconstructor::new(config.mask_threshold),
      config,
      catalog,
    })
  }

  pub fn config(&self) -> &DecodeConfig {
    &self.config
  }

  pub fn catalog(&self) -> &Arc<ClassCatalog> {
    &self.catalog
  }

  pub fn preprocess(&self, image: &RgbImage) -> Result<InputTensor, DecodeError> {
    self.preprocessor.preprocess(image)
  }

  /// 完整的一帧：预处理 → 推理 → 解码
  pub fn decode<B: InferenceBackend>(
    &self,
    image: &RgbImage,
    backend: &B,
  ) -> Result<Vec<Detection>, DecodeError> {
    let input = self.preprocess(image)?;
    let outputs = backend
      .infer(&input)
      .map_err(|e| DecodeError::Inference(Box::new(e)))?;
    self.decode_outputs(&outputs, input.orig_width(), input.orig_height())
  }

  /// 推理之后的部分：解码 → NMS → 掩码重建
  pub fn decode_outputs(
    &self,
    outputs: &RawOutputs,
    orig_width: u32,
    orig_height: u32,
  ) -> Result<Vec<Detection>, DecodeError> {
    if orig_width == 0 || orig_height == 0 {
      return Err(DecodeError::InvalidImage {
        width: orig_width,
        height: orig_height,
      });
    }
    if outputs.detections.is_empty() {
      return Ok(Vec::new());
    }

    let num_masks = self.decoder.num_masks(&outputs.detections)?;
    if let Some(prototypes) = &outputs.prototypes
      && prototypes.num_masks() != num_masks
    {
      return Err(DecodeError::shape(format!(
        "掩码系数个数 {} 与原型平面数 {} 不一致",
        num_masks,
        prototypes.num_masks()
      )));
    }

    let candidates = self
      .decoder
      .decode(&outputs.detections, orig_width, orig_height)?;
    let mut kept = self.suppressor.suppress(candidates);
    if self.config.max_detections > 0 {
      kept.truncate(self.config.max_detections);
    }

    let detections: Vec<Detection> = kept
      .into_iter()
      .map(|candidate| {
        let mask = self.reconstructor.reconstruct(
          &candidate.mask_coeffs,
          outputs.prototypes.as_ref(),
          &candidate.bbox,
          orig_width,
          orig_height,
        );
        Detection {
          bbox: candidate.bbox,
          class_id: candidate.class_id,
          class_name: self.catalog.name(candidate.class_id).to_string(),
          confidence: candidate.confidence,
          mask,
        }
      })
      .collect();

    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }
}

/// 解码流水线与推理后端的组合，作为完整的分割模型使用
pub struct SegmentationModel<B> {
  pipeline: DecodePipeline,
  backend: B,
}

impl<B: InferenceBackend> SegmentationModel<B> {
  pub fn new(pipeline: DecodePipeline, backend: B) -> Self {
    Self { pipeline, backend }
  }

  pub fn pipeline(&self) -> &DecodePipeline {
    &self.pipeline
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  pub fn into_parts(self) -> (DecodePipeline, B) {
    (self.pipeline, self.backend)
  }
}

impl<B: InferenceBackend> Model for SegmentationModel<B> {
  type Input = RgbImage;
  type Output = Vec<Detection>;
  type Error = DecodeError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.pipeline.decode(input, &self.backend)
  }
}
