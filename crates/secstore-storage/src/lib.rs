//! SecStore Storage Library
//!
//! Object-store backends for secondary storage: S3-compatible stores through
//! `object_store` and OpenStack Swift over its HTTP API.
//!
//! # Key format
//!
//! Object keys mirror the on-disk layout of a mounted store
//! (`template/tmpl/<account>/<id>/...`, `volumes/...`, `snapshots/...`)
//! beneath an optional per-store prefix. Keys must not contain `..` or a
//! leading `/`; see the `keys` module.

pub mod factory;
pub mod keys;
pub mod s3;
pub mod swift;
pub mod traits;

pub use factory::{create_object_storage, DefaultStorageProvider};
pub use s3::S3Storage;
pub use swift::SwiftStorage;
pub use traits::{ObjectEntry, ObjectStorage, StorageError, StorageProvider, StorageResult};
