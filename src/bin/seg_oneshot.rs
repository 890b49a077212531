// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/seg_oneshot.rs - 单张图像实例分割
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_seg::{
  DecodeArgs, DecodePipeline, FromUrl,
  input::InputWrapper,
  model::BackendWrapper,
  output::OutputWrapper,
  pipeline::SegmentationModel,
  task::{OneShotTask, Task},
};
use tracing::info;

/// 单张图像实例分割
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理后端，如 onnx:///model.onnx 或 replay:///dump.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，如 image:///out.png?font=/path/font.ttf
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[command(flatten)]
  pub decode: DecodeArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let catalog = args.decode.catalog()?;
  let pipeline = DecodePipeline::new(args.decode.to_config(), catalog.clone())?;
  let backend = BackendWrapper::from_url(&args.model)?;
  let model = SegmentationModel::new(pipeline, backend);

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?.with_catalog(catalog);

  OneShotTask.run_task(input, model, output)?;

  Ok(())
}
