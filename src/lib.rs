pub mod app;
pub mod engine;
pub mod media;
pub mod pipeline;
pub mod server;

mod error;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
