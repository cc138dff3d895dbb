use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while serving detections.
///
/// The first four variants are local to a single request or stream frame and
/// never affect the shared engine. The rest only occur while starting up.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("could not post-process detections: {0}")]
    Postprocess(String),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("model error: {0}")]
    Model(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Decode,
    Inference,
    Postprocess,
    Startup,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Decode(_) => ErrorKind::Decode,
            Error::Inference(_) => ErrorKind::Inference,
            Error::Postprocess(_) => ErrorKind::Postprocess,
            Error::Config(_) | Error::Model(_) | Error::Io(_) => ErrorKind::Startup,
        }
    }
}
