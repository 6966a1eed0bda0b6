//! Upward facade wiring the fleet components together.
//!
//! `Dispatcher` owns the configuration, the host resolver, the optional
//! trust store and the session factory, and exposes three batch
//! operations:
//!
//! - `list_aliases`: enumerate the host-alias store
//! - `run_command`: run one command across many hosts
//! - `transfer`: copy one file to or from many hosts
//!
//! Batch operations never fail as a whole. A per-host problem is encoded
//! in that host's result entry while the remaining hosts proceed.

use std::sync::Arc;

use crate::fleet::command::CommandRunner;
use crate::fleet::config::FleetConfig;
use crate::fleet::resolver::HostResolver;
use crate::fleet::session::SessionFactory;
use crate::fleet::transfer::TransferPlanner;
use crate::fleet::trust::TrustStore;
use crate::fleet::types::{
    AliasInfo, ConnectionOverrides, ExecuteResult, TransferDirection, TransferResult,
};

pub struct Dispatcher {
    resolver: Arc<HostResolver>,
    runner: CommandRunner,
    planner: TransferPlanner,
}

impl Dispatcher {
    /// Wire up a dispatcher from explicit settings.
    ///
    /// The trust store is only consulted when strict host key checking is
    /// enabled; without it every presented server key is accepted.
    pub fn new(config: FleetConfig) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::new(HostResolver::new(config.config_path.clone()));
        let trust = config
            .strict_host_checking
            .then(|| Arc::new(TrustStore::new(config.known_hosts_path.clone())));
        let factory = Arc::new(SessionFactory::new(config.clone(), resolver.clone(), trust));

        Self {
            resolver,
            runner: CommandRunner::new(factory.clone(), config.clone()),
            planner: TransferPlanner::new(factory, config),
        }
    }

    /// Wire up a dispatcher from environment variables and defaults.
    pub fn from_env() -> Self {
        Self::new(FleetConfig::from_env())
    }

    /// Aliases from the host-alias store, in store order.
    pub fn list_aliases(&self) -> Vec<AliasInfo> {
        self.resolver.aliases()
    }

    /// Run `command` verbatim on every host. Returns one result per host,
    /// index-aligned with `hosts`.
    pub async fn run_command(
        &self,
        hosts: &[String],
        command: &str,
        timeout_ms: Option<u64>,
        overrides: Option<&ConnectionOverrides>,
    ) -> Vec<ExecuteResult> {
        self.runner
            .run_on_hosts(hosts, command, timeout_ms, overrides)
            .await
    }

    /// Copy a file to or from every host. Returns one result per host,
    /// index-aligned with `hosts`.
    pub async fn transfer(
        &self,
        direction: TransferDirection,
        hosts: &[String],
        local_path: &str,
        remote_path: &str,
        overrides: Option<&ConnectionOverrides>,
    ) -> Vec<TransferResult> {
        self.planner
            .run_transfer(direction, hosts, local_path, remote_path, overrides)
            .await
    }
}
