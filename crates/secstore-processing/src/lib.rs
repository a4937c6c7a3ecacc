//! SecStore Processing Library
//!
//! Disk-image format processors (raw, qcow2, vhd, vmdk, ova, tar, iso) and
//! the decompression/unpack steps applied to transferred images.

pub mod error;
pub mod formats;
pub mod registry;
pub mod traits;
pub mod unpack;

pub use error::{FormatError, FormatResult};
pub use registry::ProcessorSet;
pub use traits::{FormatMatch, FormatProcessor, ImageSizes};
