use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{ElementType, InferenceEngine, InputTensor, TensorShape};
use crate::error::{Error, Result};

/// Enter and exit ticks of one `invoke`, from a shared counter.
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    pub enter: u64,
    pub exit: u64,
}

#[derive(Default)]
pub struct Recorder {
    clock: AtomicU64,
    active: AtomicUsize,
    pub overlapped: AtomicBool,
    pub intervals: Mutex<Vec<Interval>>,
}

impl Recorder {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    pub fn intervals(&self) -> Vec<Interval> {
        self.intervals.lock().unwrap().clone()
    }

    /// True when no two recorded intervals overlap.
    pub fn disjoint(&self) -> bool {
        let mut intervals = self.intervals();
        intervals.sort_by_key(|i| i.enter);
        !self.overlapped.load(Ordering::SeqCst)
            && intervals.windows(2).all(|w| w[0].exit < w[1].enter)
    }
}

/// Engine returning a fixed output set, recording every invoke.
pub struct FakeEngine {
    shape: TensorShape,
    outputs: Vec<Vec<f32>>,
    delay: Duration,
    fail_invoke: bool,
    loaded: bool,
    pub recorder: Arc<Recorder>,
}

impl FakeEngine {
    /// 4x4 RGB uint8 input, outputs for a single 0.9 class 0 box.
    pub fn new() -> Self {
        Self::with_outputs(vec![
            vec![0.1, 0.1, 0.5, 0.5],
            vec![0.0],
            vec![0.9],
            vec![1.0],
        ])
    }

    pub fn with_outputs(outputs: Vec<Vec<f32>>) -> Self {
        Self {
            shape: TensorShape {
                height: 4,
                width: 4,
                channels: 3,
                dtype: ElementType::U8,
            },
            outputs,
            delay: Duration::ZERO,
            fail_invoke: false,
            loaded: false,
            recorder: Arc::new(Recorder::default()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_invoke = true;
        self
    }
}

impl InferenceEngine for FakeEngine {
    fn input_shape(&self) -> &TensorShape {
        &self.shape
    }

    fn set_input(&mut self, input: &InputTensor) -> Result<()> {
        if input.len() != self.shape.element_count() {
            return Err(Error::Inference(format!(
                "input has {} elements, expected {}",
                input.len(),
                self.shape.element_count()
            )));
        }
        self.loaded = true;
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        let recorder = &self.recorder;
        if recorder.active.fetch_add(1, Ordering::SeqCst) != 0 {
            recorder.overlapped.store(true, Ordering::SeqCst);
        }
        let enter = recorder.tick();
        std::thread::sleep(self.delay);
        let exit = recorder.tick();
        recorder.active.fetch_sub(1, Ordering::SeqCst);
        recorder.intervals.lock().unwrap().push(Interval { enter, exit });

        if self.fail_invoke {
            return Err(Error::Inference("fake engine failure".into()));
        }
        if !std::mem::take(&mut self.loaded) {
            return Err(Error::Inference("invoke without input".into()));
        }
        Ok(())
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn output(&self, index: usize) -> Result<Vec<f32>> {
        self.outputs
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Inference(format!("no output {index}")))
    }
}
