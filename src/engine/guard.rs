use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::engine::{run_inference, InferenceEngine, InputTensor, TensorShape};
use crate::error::{Error, Result};
use crate::pipeline::RawDetectionBatch;

type SharedEngine = Arc<Mutex<Box<dyn InferenceEngine>>>;

/// Single-flight access to the one shared inference engine.
///
/// Every caller, HTTP request or stream frame, goes through [`execute`]. At
/// most one inference runs at any instant; waiters are served roughly in
/// arrival order.
///
/// [`execute`]: ConcurrencyGuard::execute
#[derive(Clone)]
pub struct ConcurrencyGuard {
    engine: SharedEngine,
    input_shape: TensorShape,
    acquire_timeout: Option<Duration>,
}

/// Exclusive hold on the engine. Dropping it releases the guard.
pub struct EngineLease {
    engine: OwnedMutexGuard<Box<dyn InferenceEngine>>,
}

impl EngineLease {
    /// Set input, invoke and read every output as one unit.
    pub fn run(&mut self, input: &InputTensor) -> Result<RawDetectionBatch> {
        run_inference(&mut **self.engine, input)
    }

    pub fn release(self) {}
}

impl ConcurrencyGuard {
    pub fn new<E: InferenceEngine>(engine: E) -> Self {
        let input_shape = engine.input_shape().clone();
        let engine: Box<dyn InferenceEngine> = Box::new(engine);
        Self {
            engine: Arc::new(Mutex::new(engine)),
            input_shape,
            acquire_timeout: None,
        }
    }

    /// Bounds how long a caller may queue for the engine. `None` waits forever.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn input_shape(&self) -> &TensorShape {
        &self.input_shape
    }

    /// Waits until no other task holds the engine.
    ///
    /// Cancel safe: dropping the future while queued gives up the place in line
    /// without ever holding the engine.
    pub async fn acquire(&self) -> Result<EngineLease> {
        let lock = self.engine.clone().lock_owned();
        let engine = match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, lock).await.map_err(|_| {
                tracing::warn!(?timeout, "timed out waiting for the inference engine");
                Error::Inference("inference engine busy".to_string())
            })?,
            None => lock.await,
        };
        Ok(EngineLease { engine })
    }

    /// Runs one inference while holding the guard.
    ///
    /// The engine call happens on the blocking pool and owns the lease, so if
    /// the caller goes away mid-inference the call still finishes and the
    /// guard is released afterwards. A panicking engine is reported as an
    /// inference error and also releases the guard.
    pub async fn execute(&self, input: InputTensor) -> Result<RawDetectionBatch> {
        let mut lease = self.acquire().await?;
        tracing::trace!("acquired inference engine");
        tokio::task::spawn_blocking(move || {
            let result = lease.run(&input);
            lease.release();
            result
        })
        .await
        .map_err(|err| Error::Inference(format!("inference task failed: {err}")))?
    }
}
