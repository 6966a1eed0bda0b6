//! Identity file authentication.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::fleet::error::FleetError;
use crate::fleet::session::TrustHandler;

use super::traits::AuthStrategy;

/// Authenticates with a private key loaded from disk.
///
/// Supports passphrase-less keys; errors carry the file path but never the
/// key material.
pub struct KeyAuth {
    key_path: PathBuf,
}

impl KeyAuth {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TrustHandler>,
        username: &str,
    ) -> Result<bool, FleetError> {
        let key_pair = keys::load_secret_key(&self.key_path, None).map_err(|e| {
            FleetError::Auth(format!(
                "could not load identity file {}: {e}",
                self.key_path.display()
            ))
        })?;

        // For RSA keys the server picks which signature hash it accepts
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!(?hash_alg, "offering identity file");

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| FleetError::Auth(format!("public key exchange failed: {e}")))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        let auth = KeyAuth::new("/path/to/key");
        assert_eq!(auth.name(), "key");
    }

    #[test]
    fn test_path_captured() {
        let auth = KeyAuth::new("/home/user/.ssh/id_ed25519");
        assert_eq!(auth.key_path, PathBuf::from("/home/user/.ssh/id_ed25519"));
    }
}
