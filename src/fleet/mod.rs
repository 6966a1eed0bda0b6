//! Multi-host SSH dispatch: resolve, authenticate, fan out, collect.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Serializable result and override types
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Error taxonomy and retry classification
//! - `resolver`: Host-alias store parsing and override merging
//! - `trust`: Known-host key verification
//! - `auth`: Credential mechanisms and first-available selection
//! - `session`: Connection, authentication and channel I/O
//! - `limiter`: Bounded concurrent fan-out
//! - `command`: Command execution across host batches
//! - `transfer`: Per-host path derivation and SFTP transfer
//! - `dispatcher`: The upward facade

pub(crate) mod auth;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod limiter;
pub mod resolver;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod transfer;
pub mod trust;
pub mod types;

pub use dispatcher::Dispatcher;
