// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::sync::Mutex;

use ndarray::Array4;
use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::InputTensor,
  model::{DecodeError, DetectionTensor, InferenceBackend, PrototypeMasks, RawOutputs, TensorLayout},
};

const DETECTION_OUTPUT: &str = "output0";
const PROTOTYPE_OUTPUT: &str = "output1";

#[derive(Error, Debug)]
pub enum OnnxBackendError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("输入形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("输出无效: {0}")]
  InvalidOutput(#[from] DecodeError),
  #[error("模型缺少输出节点: {0}")]
  MissingOutput(&'static str),
  #[error("推理会话锁已损坏")]
  Poisoned,
}

/// 运行 YOLO 分割 ONNX 模型，output0 为 [1, 4+K+M, N]，output1 为 [1, M, Hp, Wp]
pub struct OnnxBackend {
  session: Mutex<Session>,
  path: String,
}

impl FromUrlWithScheme for OnnxBackend {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxBackend {
  type Error = OnnxBackendError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxBackendError::SchemeMismatch(url.scheme().to_string()));
    }

    info!("加载 ONNX 模型: {}", url.path());
    let session = Session::builder()?.commit_from_file(url.path())?;
    info!("模型加载完成");

    Ok(Self {
      session: Mutex::new(session),
      path: url.path().to_string(),
    })
  }
}

impl OnnxBackend {
  pub fn path(&self) -> &str {
    &self.path
  }
}

fn to_usize_shape(shape: &[i64]) -> Vec<usize> {
  shape.iter().map(|&d| d.max(0) as usize).collect()
}

impl InferenceBackend for OnnxBackend {
  type Error = OnnxBackendError;

  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn infer(&self, input: &InputTensor) -> Result<RawOutputs, Self::Error> {
    let array = Array4::from_shape_vec(
      {
        let [n, c, h, w] = input.shape();
        (n, c, h, w)
      },
      input.as_nchw().to_vec(),
    )?;
    let value = Tensor::from_array(array)?;

    let mut session = self.session.lock().map_err(|_| OnnxBackendError::Poisoned)?;
    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![value])?;

    let detections = {
      let output = outputs
        .get(DETECTION_OUTPUT)
        .ok_or(OnnxBackendError::MissingOutput(DETECTION_OUTPUT))?;
      let (shape, data) = output.try_extract_tensor::<f32>()?;
      DetectionTensor::new(&to_usize_shape(shape), TensorLayout::FeatureMajor, data.to_vec())?
    };

    let prototypes = match outputs.get(PROTOTYPE_OUTPUT) {
      Some(output) => {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        Some(PrototypeMasks::new(&to_usize_shape(shape), data.to_vec())?)
      }
      None => None,
    };

    Ok(RawOutputs::new(detections, prototypes))
  }
}
