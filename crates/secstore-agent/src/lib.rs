//! SecStore agent library
//!
//! HTTP surface (upload, commands, upload status, public download links), the
//! upload pipeline and the command dispatcher, plus application setup.

pub mod command_handlers;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;
pub mod upload;

pub use dispatcher::Dispatcher;
pub use error::HttpAppError;
pub use state::AppState;
