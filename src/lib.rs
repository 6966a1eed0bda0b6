#![deny(warnings)]
#![deny(clippy::unwrap_used)]

//! Multi-host SSH dispatch core.
//!
//! Runs commands and transfers files across fleets of hosts over SSH,
//! with host-alias resolution, ordered credential fallback, optional
//! known-host verification and bounded per-batch concurrency. Every
//! batch operation returns one result per host; failures are encoded
//! per host and never abort the rest of the batch.
//!
//! ```no_run
//! use ssh_fleet::Dispatcher;
//!
//! # async fn demo() {
//! let fleet = Dispatcher::from_env();
//! let hosts = vec!["web1".to_string(), "web2".to_string()];
//! for result in fleet.run_command(&hosts, "uptime", None, None).await {
//!     println!("{}: {:?}", result.host, result.exit_code);
//! }
//! # }
//! ```

pub mod fleet;

pub use fleet::config::FleetConfig;
pub use fleet::dispatcher::Dispatcher;
pub use fleet::error::FleetError;
pub use fleet::types::{
    AliasInfo, ConnectionOverrides, ExecuteResult, TransferDirection, TransferResult,
};
