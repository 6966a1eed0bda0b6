//! Authentication strategy interface.

use async_trait::async_trait;
use russh::client;

use crate::fleet::error::FleetError;
use crate::fleet::session::TrustHandler;

/// A single authentication mechanism.
///
/// Implementations must be `Send + Sync` so a selected strategy can cross
/// task boundaries. `Ok(false)` means the server rejected the offered
/// credentials; `Err` means the mechanism itself failed before or during
/// the exchange.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate the connection as `username`.
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TrustHandler>,
        username: &str,
    ) -> Result<bool, FleetError>;

    /// Mechanism name, used in logs.
    fn name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
