//! SecStore Infrastructure Library
//!
//! Host-facing plumbing shared by the agent:
//! - Middleware (request ID)
//! - Telemetry initialization
//! - External process execution with timeouts
//! - NFS/CIFS mount management
//! - Firewall rule management

#[cfg(feature = "middleware")]
pub mod middleware;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod process;

#[cfg(feature = "mount")]
pub mod mount;

#[cfg(feature = "firewall")]
pub mod firewall;

#[cfg(feature = "middleware")]
pub use middleware::{get_request_id, request_id_middleware, RequestId};

#[cfg(feature = "observability-basic")]
pub use telemetry::init_telemetry;

pub use process::{
    size_proportional_timeout, CommandOutput, CommandRunner, ProcessError, SystemCommandRunner,
};

#[cfg(feature = "mount")]
pub use mount::{MountError, MountManager, MountRecord};

#[cfg(feature = "firewall")]
pub use firewall::{FirewallHelper, RuleChange};
