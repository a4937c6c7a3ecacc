//! HTTP upload pipeline: signatures, entity registry, quota ledger

pub mod pipeline;
pub mod quota;
pub mod registry;
pub mod signature;

pub use pipeline::{UploadHeaders, UploadPipeline};
pub use quota::{QuotaLedger, QuotaReservation};
pub use registry::{UploadGuard, UploadRegistry};
pub use signature::{signed_url, UploadSigner};
