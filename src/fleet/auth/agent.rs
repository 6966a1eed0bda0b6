//! SSH agent authentication.

use std::path::PathBuf;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::{debug, info};

use crate::fleet::error::FleetError;
use crate::fleet::session::TrustHandler;

use super::traits::AuthStrategy;

/// Authenticates through an SSH agent at a known socket.
///
/// The socket has already been probed for reachability; each identity the
/// agent holds is offered in turn until one is accepted. An agent with no
/// acceptable identity is an authentication failure, not a reason to try
/// other mechanisms.
pub struct AgentAuth {
    socket: PathBuf,
}

impl AgentAuth {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for AgentAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TrustHandler>,
        username: &str,
    ) -> Result<bool, FleetError> {
        #[cfg(unix)]
        let mut agent = keys::agent::client::AgentClient::connect_uds(&self.socket)
            .await
            .map_err(|e| {
                FleetError::Auth(format!(
                    "could not reach agent at {}: {e}",
                    self.socket.display()
                ))
            })?;
        #[cfg(windows)]
        let mut agent = keys::agent::client::AgentClient::connect_named_pipe(&self.socket)
            .await
            .map_err(|e| {
                FleetError::Auth(format!(
                    "could not reach agent at {}: {e}",
                    self.socket.display()
                ))
            })?;

        let identities = agent
            .request_identities()
            .await
            .map_err(|e| FleetError::Auth(format!("agent refused to list identities: {e}")))?;

        if identities.is_empty() {
            return Err(FleetError::Auth("agent holds no identities".to_string()));
        }

        // For RSA keys the server picks which signature hash it accepts
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        for identity in identities {
            debug!(comment = identity.comment(), "offering agent identity");

            match handle
                .authenticate_publickey_with(username, identity.clone(), hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => {
                    info!("authenticated through agent");
                    return Ok(true);
                }
                Ok(_) => {
                    debug!("agent identity not accepted");
                }
                Err(e) => {
                    debug!(error = %e, "agent identity errored");
                }
            }
        }

        Err(FleetError::Auth(
            "agent identities were not accepted".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "agent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        let auth = AgentAuth::new("/run/user/1000/ssh-agent.sock");
        assert_eq!(auth.name(), "agent");
    }

    #[test]
    fn test_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AgentAuth>();
    }
}
