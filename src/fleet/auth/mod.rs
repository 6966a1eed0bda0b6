//! Authentication mechanisms for SSH connections.
//!
//! Three [`AuthStrategy`] implementations cover the supported credential
//! sources:
//!
//! - [`PasswordAuth`]: password from per-call overrides
//! - [`AgentAuth`]: identities held by a local SSH agent
//! - [`KeyAuth`]: a private key file on disk
//!
//! [`select_strategy`] picks exactly one mechanism per connection, in fixed
//! order: a password when present, else a reachable agent, else an identity
//! file that exists on disk. The mechanisms after the selected one are never
//! attempted, so a rejected password does not silently fall back to keys.

mod agent;
mod key;
mod password;
mod traits;

pub use agent::AgentAuth;
pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;

use std::path::{Path, PathBuf};

use crate::fleet::error::FleetError;
use crate::fleet::resolver::EffectiveConnection;

/// Standard agent socket environment variable
pub(crate) const AGENT_ENV_VAR: &str = "SSH_AUTH_SOCK";

/// Locate a reachable SSH agent socket.
///
/// Candidates in order: the explicit configuration override, the standard
/// agent environment variable, then well-known per-platform agent locations.
/// A candidate counts only if it exists; a stale override falls through to
/// the next candidate instead of blocking identity file authentication.
pub(crate) fn probe_agent_socket(configured: Option<&Path>) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = configured {
        candidates.push(path.to_path_buf());
    }
    if let Ok(socket) = std::env::var(AGENT_ENV_VAR)
        && !socket.is_empty()
    {
        candidates.push(PathBuf::from(socket));
    }
    candidates.extend(well_known_agent_paths());

    candidates.into_iter().find(|path| path.exists())
}

#[cfg(windows)]
fn well_known_agent_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(r"\\.\pipe\openssh-ssh-agent"),
        PathBuf::from(r"\\.\pipe\com.1password.agent"),
    ]
}

#[cfg(target_os = "macos")]
fn well_known_agent_paths() -> Vec<PathBuf> {
    match dirs::home_dir() {
        Some(home) => vec![
            home.join("Library/Group Containers/2BUA8C4S2C.com.1password/t/agent.sock"),
            home.join(".1password/agent.sock"),
        ],
        None => Vec::new(),
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn well_known_agent_paths() -> Vec<PathBuf> {
    match dirs::home_dir() {
        Some(home) => vec![home.join(".1password/agent.sock")],
        None => Vec::new(),
    }
}

/// Pick the authentication mechanism for one connection attempt.
///
/// `agent_socket` is the already-probed agent location, if any. Returns an
/// authentication error when no mechanism is viable, before anything touches
/// the network.
pub(crate) fn select_strategy(
    connection: &EffectiveConnection,
    agent_socket: Option<PathBuf>,
) -> Result<Box<dyn AuthStrategy>, FleetError> {
    if let Some(password) = &connection.password {
        return Ok(Box::new(PasswordAuth::new(password.clone())));
    }
    if let Some(socket) = agent_socket {
        return Ok(Box::new(AgentAuth::new(socket)));
    }
    if let Some(identity) = &connection.identity_file
        && identity.exists()
    {
        return Ok(Box::new(KeyAuth::new(identity.clone())));
    }

    Err(FleetError::Auth(format!(
        "no viable mechanism for {}@{}: no password given, no reachable agent, no identity file",
        connection.user, connection.host
    )))
}
