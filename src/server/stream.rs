use std::future::Future;
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{AggregatedMessage, AggregatedMessageStream, CloseReason, Session};
use tracing::Instrument;

use crate::app::AppContext;
use crate::error::{Error, Result};
use crate::media;
use crate::pipeline::Detections;
use crate::server::{log_failure, DetectionsResponse, ErrorResponse, PayloadLimits};

const ENCODE_FAILURE_REPLY: &str = r#"{"error":"failed to encode response"}"#;

/// One inbound message of a streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Base64 encoded image, optionally as a `data:` URL.
    Text(String),
    /// Raw encoded image bytes.
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

/// Duplex message channel a [`StreamSession`] runs over.
pub trait FrameChannel {
    /// Waits for the next frame. `None` means the peer is gone.
    fn recv(&mut self) -> impl Future<Output = Option<Frame>>;

    fn send(&mut self, reply: String) -> impl Future<Output = std::result::Result<(), ChannelClosed>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    ReceiveFrame,
    Validate,
    Decode,
    Infer,
    Respond,
    Closed,
}

/// Drives one persistent connection: read a frame, answer it, repeat.
///
/// Every frame gets exactly one reply, sent before the next frame is read.
/// Per-frame failures become `{"error": ...}` replies and the session keeps
/// going; only the peer going away ends it.
pub struct StreamSession {
    context: Arc<AppContext>,
    state: SessionState,
    frames: u64,
    failures: u64,
}

impl StreamSession {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            context,
            state: SessionState::Open,
            frames: 0,
            failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(from = ?self.state, to = ?next, "stream session");
        self.state = next;
    }

    pub async fn run<C: FrameChannel>(&mut self, channel: &mut C) {
        tracing::debug!("stream session open");
        loop {
            self.transition(SessionState::ReceiveFrame);
            let Some(frame) = channel.recv().await else {
                break;
            };
            self.frames += 1;

            let result = self.process(frame).await;
            self.transition(SessionState::Respond);
            if let Err(err) = &result {
                self.failures += 1;
                log_failure(err, "stream frame");
            }
            if channel.send(encode_reply(&result)).await.is_err() {
                tracing::debug!(frame = self.frames, "peer left before the reply was sent");
                break;
            }
        }
        self.transition(SessionState::Closed);
        tracing::debug!(frames = self.frames, failures = self.failures, "stream session closed");
    }

    async fn process(&mut self, frame: Frame) -> Result<Detections> {
        self.transition(SessionState::Validate);
        let bytes = match frame {
            Frame::Text(text) => {
                let min = self.context.min_frame_len();
                if text.len() < min {
                    return Err(Error::Validation(format!(
                        "frame too short: {} characters, expected at least {min}",
                        text.len()
                    )));
                }
                self.transition(SessionState::Decode);
                media::decode_base64(&text)?
            }
            Frame::Binary(bytes) => {
                if bytes.is_empty() {
                    return Err(Error::Validation("empty binary frame".to_string()));
                }
                self.transition(SessionState::Decode);
                bytes
            }
        };
        let image = self.context.decode(bytes).await?;

        self.transition(SessionState::Infer);
        self.context.infer(image).await
    }
}

fn encode_reply(result: &Result<Detections>) -> String {
    let encoded = match result {
        Ok(detections) => serde_json::to_string(&DetectionsResponse { detections }),
        Err(err) => serde_json::to_string(&ErrorResponse::from(err)),
    };
    encoded.unwrap_or_else(|err| {
        tracing::error!(%err, "failed to encode stream reply");
        ENCODE_FAILURE_REPLY.to_string()
    })
}

/// [`FrameChannel`] over an actix websocket.
pub(crate) struct WsChannel {
    session: Session,
    messages: AggregatedMessageStream,
    close_reason: Option<CloseReason>,
}

impl WsChannel {
    pub(crate) fn new(session: Session, messages: AggregatedMessageStream) -> Self {
        Self {
            session,
            messages,
            close_reason: None,
        }
    }

    /// Completes the close handshake, echoing the peer's reason if it sent one.
    pub(crate) async fn close(self) {
        let _ = self.session.close(self.close_reason).await;
    }
}

impl FrameChannel for WsChannel {
    async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.messages.recv().await? {
                Ok(AggregatedMessage::Text(text)) => return Some(Frame::Text(text.to_string())),
                Ok(AggregatedMessage::Binary(bytes)) => return Some(Frame::Binary(bytes.to_vec())),
                Ok(AggregatedMessage::Ping(bytes)) => {
                    if self.session.pong(&bytes).await.is_err() {
                        return None;
                    }
                }
                Ok(AggregatedMessage::Pong(_)) => {}
                Ok(AggregatedMessage::Close(reason)) => {
                    self.close_reason = reason;
                    return None;
                }
                Err(err) => {
                    tracing::debug!(%err, "websocket protocol error");
                    return None;
                }
            }
        }
    }

    async fn send(&mut self, reply: String) -> std::result::Result<(), ChannelClosed> {
        self.session.text(reply).await.map_err(|_| ChannelClosed)
    }
}

/// `GET /ws/detect`, upgraded to a websocket.
pub(crate) async fn detect_ws(
    req: HttpRequest,
    body: web::Payload,
    context: web::Data<AppContext>,
    limits: Option<web::Data<PayloadLimits>>,
) -> actix_web::Result<HttpResponse> {
    let (response, session, messages) = actix_ws::handle(&req, body)?;
    let limits = limits.map(|l| **l).unwrap_or_default();
    let messages = messages
        .max_frame_size(limits.max_frame_bytes)
        .aggregate_continuations()
        .max_continuation_size(limits.max_frame_bytes);

    let peer = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let context = context.into_inner();
    actix_web::rt::spawn(
        async move {
            let mut channel = WsChannel::new(session, messages);
            StreamSession::new(context).run(&mut channel).await;
            channel.close().await;
        }
        .instrument(tracing::debug_span!("stream", %peer)),
    );

    Ok(response)
}
