// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/pipeline.rs - 解码流水线端到端测试
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
use proptest::prelude::*;
use shanan_seg::{
  ClassCatalog, DecodeConfig, DecodeError, DecodePipeline, Detection, RawOutputs,
  model::{DetectionTensor, PrototypeMasks, ReplayBackend, TensorLayout},
};

fn pipeline(config: DecodeConfig, names: &[&str]) -> DecodePipeline {
  let catalog = Arc::new(ClassCatalog::new(names.iter().copied()).unwrap());
  DecodePipeline::new(config, catalog).unwrap()
}

fn outputs(rows: &[Vec<f32>], prototypes: Option<PrototypeMasks>) -> RawOutputs {
  RawOutputs::new(DetectionTensor::from_rows(rows).unwrap(), prototypes)
}

#[test]
fn normalized_candidate_is_rescaled_to_the_image() {
  let pipeline = DecodePipeline::new(
    DecodeConfig::default().with_input_size(1),
    ClassCatalog::coco(),
  )
  .unwrap();
  let mut row = vec![0.5, 0.5, 0.2, 0.2];
  row.extend(std::iter::repeat_n(0.0, 80));
  row[4] = 0.9;

  let dets = pipeline.decode_outputs(&outputs(&[row], None), 640, 480).unwrap();
  assert_eq!(dets.len(), 1);
  let det = &dets[0];
  assert_eq!(det.class_id, 0);
  assert_eq!(det.class_name, "person");
  assert!((det.confidence - 0.9).abs() < 1e-6);

  let expected = [256.0, 192.0, 384.0, 288.0];
  let got = [det.bbox.x1, det.bbox.y1, det.bbox.x2, det.bbox.y2];
  for (g, e) in got.iter().zip(expected) {
    assert!((g - e).abs() < 1e-3, "{got:?} != {expected:?}");
  }
}

#[test]
fn overlapping_same_class_keeps_higher_confidence() {
  let pipeline = pipeline(DecodeConfig::default().with_input_size(100), &["thing"]);
  let rows = [
    vec![5.0, 5.0, 10.0, 10.0, 0.8],
    vec![5.0, 4.0, 10.0, 8.0, 0.9],
  ];
  let dets = pipeline.decode_outputs(&outputs(&rows, None), 100, 100).unwrap();
  assert_eq!(dets.len(), 1);
  assert!((dets[0].confidence - 0.9).abs() < 1e-6);
  assert!((dets[0].bbox.y2 - 8.0).abs() < 1e-4);
}

#[test]
fn agnostic_suppression_crosses_classes() {
  let rows = [
    vec![5.0, 5.0, 10.0, 10.0, 0.8, 0.0],
    vec![5.0, 4.0, 10.0, 8.0, 0.0, 0.9],
  ];
  let per_class = pipeline(DecodeConfig::default().with_input_size(100), &["a", "b"]);
  assert_eq!(per_class.decode_outputs(&outputs(&rows, None), 100, 100).unwrap().len(), 2);

  let agnostic = pipeline(
    DecodeConfig::default().with_input_size(100).with_class_agnostic(true),
    &["a", "b"],
  );
  let dets = agnostic.decode_outputs(&outputs(&rows, None), 100, 100).unwrap();
  assert_eq!(dets.len(), 1);
  assert_eq!(dets[0].class_name, "b");
}

#[test]
fn zero_coefficients_give_empty_mask() {
  let pipeline = pipeline(DecodeConfig::default().with_input_size(8), &["a", "b"]);
  let rows = [
    vec![4.0, 4.0, 6.0, 6.0, 0.9, 0.0, 0.0, 0.0],
    vec![4.0, 4.0, 6.0, 6.0, 0.0, 0.8, 1.0, 0.0],
  ];
  let mut data = vec![1.0f32; 16];
  data.extend(vec![-1.0f32; 16]);
  let prototypes = PrototypeMasks::new(&[1, 2, 4, 4], data).unwrap();

  let dets = pipeline.decode_outputs(&outputs(&rows, Some(prototypes)), 8, 8).unwrap();
  assert_eq!(dets.len(), 2);
  assert!(dets[0].mask.is_empty());

  // 正系数作用在全 1 平面上，框内全部为前景
  assert_eq!(dets[1].mask.area(), 36);
  assert_eq!(dets[1].mask.extent(), Some([1, 1, 6, 6]));
}

#[test]
fn missing_mask_channels_give_empty_masks() {
  let pipeline = pipeline(DecodeConfig::default().with_input_size(10), &["a"]);
  let rows = [vec![5.0, 5.0, 4.0, 4.0, 0.7]];

  let no_planes = PrototypeMasks::new(&[0, 4, 4], Vec::new()).unwrap();
  for prototypes in [None, Some(no_planes)] {
    let dets = pipeline.decode_outputs(&outputs(&rows, prototypes), 20, 20).unwrap();
    assert_eq!(dets.len(), 1);
    assert!(dets[0].mask.is_empty());
    assert_eq!((dets[0].mask.width(), dets[0].mask.height()), (20, 20));
  }
}

#[test]
fn empty_tensor_gives_no_detections() {
  let pipeline = DecodePipeline::new(DecodeConfig::default(), ClassCatalog::coco()).unwrap();
  let tensor = DetectionTensor::new(&[0, 84], TensorLayout::CandidateMajor, Vec::new()).unwrap();
  let dets = pipeline
    .decode_outputs(&RawOutputs::new(tensor, None), 640, 640)
    .unwrap();
  assert!(dets.is_empty());
}

#[test]
fn empty_rows_give_no_detections() {
  let pipeline = DecodePipeline::new(DecodeConfig::default(), ClassCatalog::coco()).unwrap();
  let dets = pipeline.decode_outputs(&outputs(&[], None), 640, 480).unwrap();
  assert!(dets.is_empty());
}

#[test]
fn normalized_boxes_keep_the_input_side() {
  let config = DecodeConfig::default().with_normalized_boxes(true);
  assert_eq!(config.input_size, 640);
  let pipeline = DecodePipeline::new(config, ClassCatalog::coco()).unwrap();

  let mut row = vec![0.5, 0.5, 0.2, 0.2];
  row.extend(std::iter::repeat_n(0.0, 80));
  row[4] = 0.9;
  let backend = |input: &shanan_seg::frame::InputTensor| -> Result<RawOutputs, DecodeError> {
    assert_eq!(input.side(), 640);
    Ok(outputs(&[row.clone()], None))
  };

  let dets = pipeline.decode(&RgbImage::new(640, 480), &backend).unwrap();
  assert_eq!(dets.len(), 1);
  let expected = [256.0, 192.0, 384.0, 288.0];
  let got = [dets[0].bbox.x1, dets[0].bbox.y1, dets[0].bbox.x2, dets[0].bbox.y2];
  for (g, e) in got.iter().zip(expected) {
    assert!((g - e).abs() < 1e-3, "{got:?} != {expected:?}");
  }
}

#[test]
fn malformed_tensor_is_a_shape_mismatch() {
  let pipeline = DecodePipeline::new(DecodeConfig::default(), ClassCatalog::coco()).unwrap();
  // 特征数少于 4 + 80
  let err = pipeline
    .decode_outputs(&outputs(&[vec![0.0; 10]], None), 640, 640)
    .unwrap_err();
  assert!(matches!(err, DecodeError::ShapeMismatch(_)));
  assert!(err.is_transient());
}

#[test]
fn decoding_is_deterministic() {
  let pipeline = pipeline(DecodeConfig::default().with_input_size(16), &["a", "b"]);
  let rows: Vec<Vec<f32>> = (0..12)
    .map(|i| {
      let f = i as f32;
      vec![2.0 + f, 3.0 + 0.5 * f, 4.0, 5.0, 0.3 + 0.05 * f, 0.6 - 0.03 * f, 0.5, -0.5]
    })
    .collect();
  let protos = PrototypeMasks::new(&[2, 4, 4], (0..32).map(|v| (v as f32 - 16.0) / 8.0).collect())
    .unwrap();
  let raw = outputs(&rows, Some(protos));

  let first = pipeline.decode_outputs(&raw, 32, 24).unwrap();
  let second = pipeline.decode_outputs(&raw, 32, 24).unwrap();
  assert!(!first.is_empty());
  assert_eq!(first, second);
}

#[test]
fn replay_backend_runs_through_full_decode() {
  // 特征主序：4 个框参数 + 1 个类别分数 + 1 个掩码系数，共 2 个候选
  let dump = r#"{
    "detections": {
      "shape": [1, 6, 2], "layout": "feature_major",
      "data": [16, 48, 16, 48, 8, 8, 8, 8, 0.95, 0.1, 2.0, 2.0]
    },
    "prototypes": { "shape": [1, 1, 2, 2], "data": [1, 1, 1, 1] }
  }"#;
  let backend = ReplayBackend::from_json(dump).unwrap();
  let pipeline = pipeline(DecodeConfig::default().with_input_size(64), &["a"]);

  let dets: Vec<Detection> = pipeline.decode(&RgbImage::new(128, 64), &backend).unwrap();
  assert_eq!(dets.len(), 1);
  let det = &dets[0];
  assert!((det.bbox.x1 - 24.0).abs() < 1e-4);
  assert!((det.bbox.x2 - 40.0).abs() < 1e-4);
  assert!((det.bbox.y1 - 12.0).abs() < 1e-4);
  assert!((det.bbox.y2 - 20.0).abs() < 1e-4);
  assert_eq!(det.mask.area(), 16 * 8);

  let json = serde_json::to_value(&dets).unwrap();
  assert_eq!(json[0]["mask"]["area"], 128);
}

#[test]
fn zero_sized_image_is_rejected() {
  let pipeline = DecodePipeline::new(DecodeConfig::default(), ClassCatalog::coco()).unwrap();
  let backend = ReplayBackend::from_json(r#"{"detections": {"shape": [0, 84], "data": []}}"#)
    .unwrap();
  let err = pipeline.decode(&RgbImage::new(0, 10), &backend).unwrap_err();
  assert!(matches!(err, DecodeError::InvalidImage { .. }));
}

fn candidate_rows() -> impl Strategy<Value = Vec<Vec<f32>>> {
  prop::collection::vec(
    (
      -10.0f32..110.0,
      -10.0f32..110.0,
      0.5f32..60.0,
      0.5f32..60.0,
      0usize..3,
      0.0f32..1.0,
    ),
    0..40,
  )
  .prop_map(|cands| {
    cands
      .into_iter()
      .map(|(cx, cy, w, h, class, conf)| {
        let mut row = vec![cx, cy, w, h, 0.0, 0.0, 0.0];
        row[4 + class] = conf;
        row
      })
      .collect()
  })
}

proptest! {
  #[test]
  fn detections_satisfy_postconditions(rows in candidate_rows(), agnostic in any::<bool>()) {
    let config = DecodeConfig::default()
      .with_input_size(100)
      .with_class_agnostic(agnostic)
      .with_max_detections(0);
    let pipeline = pipeline(config.clone(), &["a", "b", "c"]);
    let (width, height) = (200u32, 150u32);
    let dets = pipeline.decode_outputs(&outputs(&rows, None), width, height).unwrap();

    for det in &dets {
      prop_assert!(det.confidence >= config.confidence_threshold);
      prop_assert!(det.bbox.x1 <= det.bbox.x2 && det.bbox.y1 <= det.bbox.y2);
      prop_assert!(det.bbox.x1 >= 0.0 && det.bbox.x2 <= width as f32);
      prop_assert!(det.bbox.y1 >= 0.0 && det.bbox.y2 <= height as f32);
    }
    for (i, a) in dets.iter().enumerate() {
      for b in &dets[i + 1..] {
        if agnostic || a.class_id == b.class_id {
          prop_assert!(a.bbox.iou(&b.bbox) <= config.iou_threshold);
        }
      }
      if let Some(next) = dets.get(i + 1) {
        prop_assert!(a.confidence >= next.confidence);
      }
    }
  }
}
