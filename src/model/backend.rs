// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/backend.rs - 按 URL 选择推理后端
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

use thiserror::Error;
use tracing::info;
use url::Url;

#[cfg(feature = "onnx")]
use super::{OnnxBackend, OnnxBackendError};
use super::{InferenceBackend, RawOutputs, ReplayBackend, ReplayBackendError};
use crate::{FromUrl, FromUrlWithScheme, frame::InputTensor};

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("回放后端错误: {0}")]
  ReplayBackendError(#[from] ReplayBackendError),
  #[cfg(feature = "onnx")]
  #[error("ONNX 后端错误: {0}")]
  OnnxBackendError(#[from] OnnxBackendError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 启动时按 URL 方案选定的推理后端
pub enum BackendWrapper {
  Replay(ReplayBackend),
  #[cfg(feature = "onnx")]
  Onnx(OnnxBackend),
}

impl FromUrl for BackendWrapper {
  type Error = BackendError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let backend = match url.scheme() {
      ReplayBackend::SCHEME => BackendWrapper::Replay(ReplayBackend::from_url(url)?),
      #[cfg(feature = "onnx")]
      OnnxBackend::SCHEME => BackendWrapper::Onnx(OnnxBackend::from_url(url)?),
      other => return Err(BackendError::SchemeMismatch(other.to_string())),
    };
    info!("推理后端: {}", backend.name());
    Ok(backend)
  }
}

impl InferenceBackend for BackendWrapper {
  type Error = BackendError;

  fn name(&self) -> &str {
    match self {
      BackendWrapper::Replay(backend) => backend.name(),
      #[cfg(feature = "onnx")]
      BackendWrapper::Onnx(backend) => backend.name(),
    }
  }

  fn infer(&self, input: &InputTensor) -> Result<RawOutputs, Self::Error> {
    match self {
      BackendWrapper::Replay(backend) => match backend.infer(input) {
        Ok(outputs) => Ok(outputs),
        Err(never) => match never {},
      },
      #[cfg(feature = "onnx")]
      BackendWrapper::Onnx(backend) => backend.infer(input).map_err(BackendError::from),
    }
  }
}
