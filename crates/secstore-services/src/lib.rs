//! SecStore Services Layer
//!
//! The storage operations behind each command: moving objects between
//! stores, installing images into the canonical layout, deletion, listings,
//! checksums, capacity figures, URL downloads and public download links.
//! HTTP handling and command routing stay in the agent crate.

pub mod catalog;
pub mod checksum;
pub mod deletion;
pub mod download;
pub mod handoff;
pub mod install;
pub mod layout;
pub mod links;
pub mod mover;
pub mod properties;
pub mod stats;

pub use catalog::list_catalog;
pub use checksum::{compute_checksum, ChecksumAlgorithm};
pub use deletion::{object_location, Deleted, DeletionService};
pub use download::UrlDownloader;
pub use handoff::{handoff, HandoffWaiter, HandoffWorker};
pub use install::{
    discard_install, finalize_in_place, install_image, InstallRequest, InstalledImage, Placement,
};
pub use links::DownloadLinks;
pub use mover::{DataMover, DownloadedImage, ProcessTimeouts};
pub use properties::Properties;
pub use stats::{storage_stats, StorageStats};
