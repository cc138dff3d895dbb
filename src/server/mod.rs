//! actix-web front end: `POST /detect` for single uploads and `/ws/detect`
//! for persistent streaming sessions. Both share one [`AppContext`].

mod detect;
mod stream;
pub use stream::ChannelClosed;
pub use stream::Frame;
pub use stream::FrameChannel;
pub use stream::SessionState;
pub use stream::StreamSession;

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::app::config::Server as ServerConfig;
use crate::app::AppContext;
use crate::error::{Error, ErrorKind, Result};
use crate::pipeline::Detection;

#[derive(Serialize)]
pub(crate) struct DetectionsResponse<'a> {
    pub(crate) detections: &'a [Detection],
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

/// Largest websocket message or uploaded file any handler accepts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PayloadLimits {
    pub(crate) max_frame_bytes: usize,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Client mistakes are logged quieter than engine or post-processing faults.
pub(crate) fn log_failure(err: &Error, what: &str) {
    match err.kind() {
        ErrorKind::Validation | ErrorKind::Decode => tracing::info!(%err, "{what} rejected"),
        ErrorKind::Inference | ErrorKind::Postprocess => tracing::warn!(%err, "{what} failed"),
        ErrorKind::Startup => tracing::error!(%err, "{what} failed"),
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/detect", web::post().to(detect::detect))
        .route("/ws/detect", web::get().to(stream::detect_ws));
}

pub struct Server {
    worker: JoinHandle<io::Result<()>>,
}

impl Server {
    /// Binds and starts serving on the current actix system.
    pub fn start(config: &ServerConfig, context: Arc<AppContext>) -> Result<Server> {
        let context = web::Data::from(context);
        let limits = web::Data::new(PayloadLimits {
            max_frame_bytes: config.max_frame_bytes,
        });
        let allow_any_origin = config.cors_allow_any_origin;

        let server = HttpServer::new(move || {
            let cors = if allow_any_origin {
                Cors::permissive()
            } else {
                Cors::default()
            };
            App::new()
                .wrap(cors)
                .app_data(context.clone())
                .app_data(limits.clone())
                .configure(routes)
        })
        .bind((config.host.as_str(), config.port))?
        .run();

        let worker = actix_web::rt::spawn(server);
        tracing::info!(%config, "serving detections");
        Ok(Self { worker })
    }

    pub async fn wait(self) -> io::Result<()> {
        self.worker.await.map_err(io::Error::other)?
    }
}
