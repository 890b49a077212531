// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 任务调度：单帧、连续与双线程流水线
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
  collections::VecDeque,
  sync::{
    Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
  model::{DecodeError, Detection, InferenceBackend, Model, RawOutputs},
  output::Render,
  pipeline::SegmentationModel,
};

pub const DEFAULT_FRAME_WINDOW: usize = 30;
const FORCE_EXIT_DELAY: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 进程级中断标志，Ctrl-C 处理器只注册一次
fn interrupt_flag() -> Arc<AtomicBool> {
  static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
  FLAG
    .get_or_init(|| {
      let flag = Arc::new(AtomicBool::new(false));
      let handler_flag = flag.clone();
      let registered = ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        handler_flag.store(true, Ordering::SeqCst);
        thread::spawn(|| {
          thread::sleep(FORCE_EXIT_DELAY);
          warn!("强制退出程序");
          std::process::exit(1);
        });
      });
      if let Err(e) = registered {
        warn!("无法注册 Ctrl-C 处理器: {}", e);
      }
      flag
    })
    .clone()
}

/// 最近若干帧耗时的滑动窗口
#[derive(Debug, Clone)]
pub struct FrameTimes {
  window: usize,
  samples: VecDeque<Duration>,
}

impl Default for FrameTimes {
  fn default() -> Self {
    Self::new(DEFAULT_FRAME_WINDOW)
  }
}

impl FrameTimes {
  pub fn new(window: usize) -> Self {
    let window = window.max(1);
    Self {
      window,
      samples: VecDeque::with_capacity(window),
    }
  }

  pub fn push(&mut self, elapsed: Duration) {
    if self.samples.len() == self.window {
      self.samples.pop_front();
    }
    self.samples.push_back(elapsed);
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn average(&self) -> Option<Duration> {
    if self.samples.is_empty() {
      return None;
    }
    Some(self.samples.iter().sum::<Duration>() / self.samples.len() as u32)
  }

  pub fn fps(&self) -> Option<f64> {
    self
      .average()
      .filter(|avg| !avg.is_zero())
      .map(|avg| 1.0 / avg.as_secs_f64())
  }
}

struct SlotState<T> {
  value: Option<T>,
  closed: bool,
  dropped: usize,
}

/// 单槽交接：生产者总是覆盖旧值，消费者只拿到最新的一帧
pub struct LatestFrameSlot<T> {
  state: Mutex<SlotState<T>>,
  ready: Condvar,
}

impl<T> Default for LatestFrameSlot<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> LatestFrameSlot<T> {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(SlotState {
        value: None,
        closed: false,
        dropped: 0,
      }),
      ready: Condvar::new(),
    }
  }

  // 槽内只有数据，没有需要维护的不变量，锁中毒时直接继续使用
  fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 放入新值，返回被替换掉的旧值；槽关闭后放入的值原样返回
  pub fn put(&self, value: T) -> Option<T> {
    let mut state = self.lock();
    if state.closed {
      return Some(value);
    }
    let stale = state.value.replace(value);
    if stale.is_some() {
      state.dropped += 1;
    }
    drop(state);
    self.ready.notify_one();
    stale
  }

  /// 阻塞等待下一个值，槽关闭且为空时返回 None
  pub fn take(&self) -> Option<T> {
    let mut state = self.lock();
    loop {
      if let Some(value) = state.value.take() {
        return Some(value);
      }
      if state.closed {
        return None;
      }
      state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
    }
  }

  pub fn try_take(&self) -> Option<T> {
    self.lock().value.take()
  }

  /// 关闭后不再接收新值，已有的值仍可取出
  pub fn close(&self) {
    self.lock().closed = true;
    self.ready.notify_all();
  }

  pub fn is_closed(&self) -> bool {
    self.lock().closed
  }

  /// 被覆盖而未被消费的帧数
  pub fn dropped(&self) -> usize {
    self.lock().dropped
  }
}

struct CloseOnDrop<'a, T>(&'a LatestFrameSlot<T>);

impl<T> Drop for CloseOnDrop<'_, T> {
  fn drop(&mut self) {
    self.0.close();
  }
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("渲染完成，总耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 逐帧推理与渲染，失败的帧记录后跳过
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupted = interrupt_flag();
    let mut times = FrameTimes::default();
    let mut skipped = 0usize;

    for (frame_index, frame) in (1..).zip(input) {
      let now = Instant::now();
      debug!("处理第 {} 帧图像", frame_index);

      match model.infer(&frame) {
        Ok(result) => {
          let elapsed_infer = now.elapsed();
          if let Err(e) = output.render_result(&frame, &result) {
            warn!("第 {} 帧渲染失败，跳过: {}", frame_index, e);
            skipped += 1;
          }
          times.push(now.elapsed());
          debug!(
            "推理完成，耗时: {:.2?} / {:.2?}，平均 {:.1} FPS",
            elapsed_infer,
            now.elapsed(),
            times.fps().unwrap_or_default()
          );
        }
        Err(e) => {
          warn!("第 {} 帧推理失败，跳过: {}", frame_index, e);
          skipped += 1;
        }
      }

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if interrupted.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    if let Some(avg) = times.average() {
      info!("最近 {} 帧平均耗时: {:.2?}", times.len(), avg);
    }
    info!("任务完成，跳过 {} 帧，退出", skipped);
    Ok(())
  }
}

/// 采集与推理在一个线程，解码与渲染在另一个线程，中间只保留最新一帧
#[derive(Default, Debug)]
pub struct PipelinedTask {
  frame_number: Option<usize>,
}

impl PipelinedTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<I, B, O> Task<I, SegmentationModel<B>, O> for PipelinedTask
where
  I: Iterator<Item = RgbImage> + Send,
  B: InferenceBackend + Sync,
  O: Render<RgbImage, Vec<Detection>>,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: SegmentationModel<B>, output: O) -> Result<(), Self::Error> {
    info!("开始流水线任务...");
    let interrupted = interrupt_flag();
    let (pipeline, backend) = model.into_parts();
    let slot: LatestFrameSlot<(RgbImage, RawOutputs)> = LatestFrameSlot::new();
    let frame_number = self.frame_number;

    thread::scope(|scope| {
      scope.spawn(|| {
        let _close = CloseOnDrop(&slot);
        for (frame_index, frame) in (1..).zip(input) {
          let outputs = pipeline
            .preprocess(&frame)
            .and_then(|tensor| {
              backend
                .infer(&tensor)
                .map_err(|e| DecodeError::Inference(Box::new(e)))
            });
          match outputs {
            Ok(outputs) => {
              if slot.put((frame, outputs)).is_some() {
                debug!("消费者未跟上，丢弃旧帧");
              }
            }
            Err(e) => warn!("第 {} 帧推理失败，跳过: {}", frame_index, e),
          }

          if frame_number.is_some_and(|n| frame_index >= n) {
            info!("达到指定帧数 {}, 停止采集", frame_index);
            break;
          }
          if interrupted.load(Ordering::SeqCst) {
            warn!("中断信号接收，停止采集");
            break;
          }
        }
      });

      let mut times = FrameTimes::default();
      let mut last = Instant::now();
      while let Some((frame, outputs)) = slot.take() {
        match pipeline.decode_outputs(&outputs, frame.width(), frame.height()) {
          Ok(detections) => {
            if let Err(e) = output.render_result(&frame, &detections) {
              warn!("渲染失败，跳过: {}", e);
            }
          }
          Err(e) => warn!("解码失败，跳过: {}", e),
        }
        times.push(last.elapsed());
        last = Instant::now();
      }

      if let Some(fps) = times.fps() {
        info!("流水线平均 {:.1} FPS", fps);
      }
    });

    info!("任务完成，丢弃 {} 帧，退出", slot.dropped());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    config::DecodeConfig,
    model::{ClassCatalog, DetectionTensor},
    pipeline::DecodePipeline,
  };
  use std::convert::Infallible;

  struct EveryOther;

  impl Model for EveryOther {
    type Input = u32;
    type Output = u32;
    type Error = DecodeError;

    fn infer(&self, input: &u32) -> Result<u32, DecodeError> {
      if input % 2 == 0 {
        Err(DecodeError::shape("偶数帧"))
      } else {
        Ok(input * 10)
      }
    }
  }

  #[derive(Default)]
  struct Collect<T>(Mutex<Vec<T>>);

  impl<F, T: Clone> Render<F, T> for Collect<T> {
    type Error = Infallible;

    fn render_result(&self, _frame: &F, result: &T) -> Result<(), Self::Error> {
      self.0.lock().unwrap().push(result.clone());
      Ok(())
    }
  }

  impl<F, T: Clone> Render<F, T> for &Collect<T> {
    type Error = Infallible;

    fn render_result(&self, frame: &F, result: &T) -> Result<(), Self::Error> {
      (*self).render_result(frame, result)
    }
  }

  #[test]
  fn frame_times_keep_a_bounded_window() {
    let mut times = FrameTimes::new(3);
    assert!(times.average().is_none());
    for ms in [100, 10, 20, 30] {
      times.push(Duration::from_millis(ms));
    }
    assert_eq!(times.len(), 3);
    assert_eq!(times.average(), Some(Duration::from_millis(20)));
    assert!((times.fps().unwrap() - 50.0).abs() < 1e-6);
    assert_eq!(FrameTimes::default().window, DEFAULT_FRAME_WINDOW);
  }

  #[test]
  fn slot_replaces_stale_frames() {
    let slot = LatestFrameSlot::new();
    assert_eq!(slot.put(1), None);
    assert_eq!(slot.put(2), Some(1));
    assert_eq!(slot.dropped(), 1);
    assert_eq!(slot.take(), Some(2));
    assert_eq!(slot.try_take(), None);
  }

  #[test]
  fn closed_slot_drains_then_ends() {
    let slot = LatestFrameSlot::new();
    slot.put("last");
    slot.close();
    assert!(slot.is_closed());
    assert_eq!(slot.put("late"), Some("late"));
    assert_eq!(slot.take(), Some("last"));
    assert_eq!(slot.take(), None);
  }

  #[test]
  fn slot_wakes_a_waiting_consumer() {
    let slot = LatestFrameSlot::new();
    thread::scope(|scope| {
      let consumer = scope.spawn(|| slot.take());
      thread::sleep(Duration::from_millis(20));
      slot.put(7u32);
      assert_eq!(consumer.join().unwrap(), Some(7));
    });
  }

  #[test]
  fn one_shot_uses_first_frame() {
    let output = Collect::default();
    OneShotTask
      .run_task([3u32, 5].into_iter(), EveryOther, &output)
      .unwrap();
    assert_eq!(*output.0.lock().unwrap(), vec![30]);
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let output = Collect::<u32>::default();
    assert!(
      OneShotTask
        .run_task(std::iter::empty::<u32>(), EveryOther, &output)
        .is_err()
    );
  }

  #[test]
  fn continuous_skips_failed_frames() {
    let output = Collect::default();
    ContinuousTask::default()
      .run_task(1u32..=5, EveryOther, &output)
      .unwrap();
    assert_eq!(*output.0.lock().unwrap(), vec![10, 30, 50]);
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let output = Collect::default();
    ContinuousTask::default()
      .with_frame_number(Some(3))
      .run_task(1u32.., EveryOther, &output)
      .unwrap();
    assert_eq!(*output.0.lock().unwrap(), vec![10, 30]);
  }

  #[test]
  fn pipelined_task_decodes_every_frame_it_receives() {
    let config = DecodeConfig::default().with_input_size(32);
    let catalog = ClassCatalog::new(["only"]).map(Arc::new).unwrap();
    let pipeline = DecodePipeline::new(config, catalog).unwrap();
    let backend = |_: &crate::frame::InputTensor| -> Result<RawOutputs, DecodeError> {
      let rows = vec![vec![16.0, 16.0, 8.0, 8.0, 0.9]];
      Ok(RawOutputs::new(DetectionTensor::from_rows(&rows)?, None))
    };
    let model = SegmentationModel::new(pipeline, backend);

    let frames = (0..4).map(|_| RgbImage::new(32, 32));
    let output = Collect::<Vec<Detection>>::default();
    PipelinedTask::default()
      .run_task(frames, model, &output)
      .unwrap();

    let rendered = output.0.lock().unwrap();
    assert!(!rendered.is_empty() && rendered.len() <= 4);
    for detections in rendered.iter() {
      assert_eq!(detections.len(), 1);
      assert_eq!(detections[0].class_name, "only");
    }
  }
}
