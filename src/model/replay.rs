// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/replay.rs - 回放已录制张量的推理后端
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
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::InputTensor,
  model::{DecodeError, DetectionTensor, InferenceBackend, PrototypeMasks, RawOutputs, TensorLayout},
};

#[derive(Error, Debug)]
pub enum ReplayBackendError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("张量无效: {0}")]
  InvalidTensor(#[from] DecodeError),
}

/// 单个张量的 JSON 表示
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorRecord {
  pub shape: Vec<usize>,
  #[serde(default)]
  pub layout: TensorLayout,
  pub data: Vec<f32>,
}

/// 一帧推理输出的 JSON 转储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorDump {
  pub detections: TensorRecord,
  #[serde(default)]
  pub prototypes: Option<TensorRecord>,
}

impl TensorDump {
  pub fn into_outputs(self) -> Result<RawOutputs, DecodeError> {
    let detections = DetectionTensor::new(
      &self.detections.shape,
      self.detections.layout,
      self.detections.data,
    )?;
    let prototypes = self
      .prototypes
      .map(|p| PrototypeMasks::new(&p.shape, p.data))
      .transpose()?;
    Ok(RawOutputs::new(detections, prototypes))
  }
}

/// 对任意输入都返回同一组录制好的输出
#[derive(Debug, Clone)]
pub struct ReplayBackend {
  outputs: RawOutputs,
}

impl ReplayBackend {
  pub fn new(outputs: RawOutputs) -> Self {
    Self { outputs }
  }

  pub fn from_json(json: &str) -> Result<Self, ReplayBackendError> {
    let dump: TensorDump = serde_json::from_str(json)?;
    Ok(Self::new(dump.into_outputs()?))
  }
}

impl FromUrlWithScheme for ReplayBackend {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayBackend {
  type Error = ReplayBackendError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplayBackendError::SchemeMismatch(url.scheme().to_string()));
    }

    info!("加载张量转储: {}", url.path());
    let json = std::fs::read_to_string(url.path())?;
    let backend = Self::from_json(&json)?;
    debug!(
      "转储包含 {} 个候选框, 每个 {} 个特征",
      backend.outputs.detections.num_candidates(),
      backend.outputs.detections.num_features()
    );
    Ok(backend)
  }
}

impl InferenceBackend for ReplayBackend {
  type Error = std::convert::Infallible;

  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn infer(&self, _input: &InputTensor) -> Result<RawOutputs, Self::Error> {
    Ok(self.outputs.clone())
  }
}
