//! SecStore Core Library
//!
//! Domain models, error types and configuration shared by every agent crate.

pub mod config;
pub mod constants;
pub mod encryption;
pub mod error;
pub mod models;
pub mod storage_types;

pub use config::{AgentConfig, BaseConfig, Config};
pub use encryption::EncryptionService;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::{StoreDescriptor, StoreKind};
