pub mod config;

use std::sync::Arc;

use image::RgbImage;

use crate::app::config::AppConfig;
use crate::engine::{ConcurrencyGuard, InferenceEngine};
use crate::error::{Error, Result};
use crate::media;
use crate::pipeline::{Detections, LabelIndex, Pipeline};
use crate::server::Server;

/// Everything a request handler needs, built once at startup and shared by
/// reference with every HTTP request and stream session.
pub struct AppContext {
    guard: ConcurrencyGuard,
    labels: LabelIndex,
    pipeline: Pipeline,
    min_frame_len: usize,
}

impl AppContext {
    pub fn new(guard: ConcurrencyGuard, labels: LabelIndex, pipeline: Pipeline) -> Self {
        Self {
            guard,
            labels,
            pipeline,
            min_frame_len: 0,
        }
    }

    pub fn with_min_frame_len(mut self, min_frame_len: usize) -> Self {
        self.min_frame_len = min_frame_len;
        self
    }

    pub fn min_frame_len(&self) -> usize {
        self.min_frame_len
    }

    pub async fn decode(&self, image_bytes: Vec<u8>) -> Result<RgbImage> {
        blocking(move || media::decode_image(&image_bytes)).await
    }

    /// Runs the model on `image` and post-processes against its original size.
    ///
    /// Only the inference step takes the engine guard. Resizing runs on the
    /// blocking pool and post-processing on the calling task.
    pub async fn infer(&self, image: RgbImage) -> Result<Detections> {
        let (width, height) = image.dimensions();
        let shape = self.guard.input_shape().clone();
        let input = blocking(move || media::prepare_input(&image, &shape)).await?;
        let batch = self.guard.execute(input).await?;
        self.pipeline.process(&batch, width, height, &self.labels)
    }

    /// Encoded image bytes in, ordered detections out.
    pub async fn detect(&self, image_bytes: Vec<u8>) -> Result<Detections> {
        let image = self.decode(image_bytes).await?;
        self.infer(image).await
    }
}

/// Image work is CPU bound and must stay off the server's event loop.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| Error::Decode(format!("image task failed: {err}")))?
}

macro_rules! handle_err {
    ($what:literal, $expr:expr) => {
        match $expr {
            Ok(ret) => Ok(ret),
            Err(err) => {
                tracing::error!(%err, "failed to {}", $what);
                Err(err)
            }
        }
    };
}

pub struct App {
    server: Server,
}

impl App {
    /// Loads the model and labels named in `config` and starts serving.
    #[cfg(feature = "tflite")]
    pub async fn start(config: AppConfig) -> Result<App> {
        let engine = handle_err!("load model", crate::engine::TFLiteEngine::load(&config.model))?;
        Self::start_with_engine(config, engine).await
    }

    #[cfg(not(feature = "tflite"))]
    pub async fn start(_config: AppConfig) -> Result<App> {
        Err(Error::Model("built without the `tflite` feature, no engine available".to_string()))
    }

    pub async fn start_with_engine<E: InferenceEngine>(config: AppConfig, engine: E) -> Result<App> {
        let labels = handle_err!("load labels", LabelIndex::from_file(&config.model.label_filename))?;
        let context = Arc::new(initialize_context(&config, engine, labels));

        tracing::info!(%config.detection, "detection pipeline ready");
        let server = handle_err!("start server", Server::start(&config.server, context))?;

        Ok(Self { server })
    }

    /// Serves until the server stops on a shutdown signal.
    pub async fn run(self) -> Result<()> {
        self.server.wait().await.map_err(Error::from)
    }
}

fn initialize_context<E: InferenceEngine>(config: &AppConfig, engine: E, labels: LabelIndex) -> AppContext {
    let guard = ConcurrencyGuard::new(engine).with_acquire_timeout(config.detection.acquire_timeout());
    AppContext::new(guard, labels, Pipeline::from_config(&config.detection))
        .with_min_frame_len(config.detection.min_frame_len)
}
