//! Session establishment and remote execution.
//!
//! [`SessionFactory`] turns a host identifier into an authenticated
//! [`Session`]: resolve the identifier, merge overrides, pick exactly one
//! authentication mechanism, then connect with a handshake timeout and
//! exponential backoff for transient failures. Authentication and host key
//! rejections are never retried.
//!
//! Host identity checks live in [`TrustHandler`], the transport callback.
//! In strict mode it consults the trust store and refuses unrecorded or
//! changed keys; otherwise every presented key is accepted.
//!
//! A session maps to one (host, operation) pair. Sessions are never pooled;
//! the caller that obtained one must close it on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use russh::{ChannelMsg, Disconnect, client, keys};
use russh_sftp::client::SftpSession;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fleet::auth::{self, AuthStrategy};
use crate::fleet::config::{FleetConfig, MAX_RETRY_DELAY_SECS};
use crate::fleet::error::FleetError;
use crate::fleet::resolver::{EffectiveConnection, HostResolver};
use crate::fleet::trust::TrustStore;
use crate::fleet::types::ConnectionOverrides;

/// Transport handler deciding host key acceptance.
///
/// Carries the trust store only in strict mode. A rejection is recorded in
/// the shared `rejected` flag so the factory can tell a failed verification
/// apart from other transport errors.
pub struct TrustHandler {
    pub(crate) hostname: String,
    pub(crate) port: u16,
    pub(crate) trust: Option<Arc<TrustStore>>,
    pub(crate) rejected: Arc<AtomicBool>,
}

impl client::Handler for TrustHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let Some(store) = &self.trust else {
            debug!(
                hostname = self.hostname.as_str(),
                algorithm = %server_public_key.algorithm(),
                "host key accepted without verification"
            );
            return Ok(true);
        };

        if store.verify(&self.hostname, self.port, server_public_key) {
            debug!(hostname = self.hostname.as_str(), "host key verified");
            Ok(true)
        } else {
            self.rejected.store(true, Ordering::SeqCst);
            warn!(
                hostname = self.hostname.as_str(),
                port = self.port,
                "host key rejected"
            );
            Ok(false)
        }
    }
}

/// Build the russh client configuration for one connection.
///
/// Keepalives every 30 seconds keep long quiet commands from tripping the
/// inactivity timeout; three missed keepalives drop the transport.
pub(crate) fn build_client_config(timeout: Duration, compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: Some(timeout),
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Collected output of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Absent when the deadline expired before the remote reported one
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// An authenticated connection to one host, alive for one operation.
pub struct Session {
    handle: client::Handle<TrustHandler>,
    host: String,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("host", &self.host).finish_non_exhaustive()
    }
}

impl Session {
    /// Identifier the session was opened for.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Token observed by in-flight execution; cancelling it aborts the
    /// running command.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a command and collect its output.
    ///
    /// The command string goes to the remote side verbatim, with no shell
    /// escaping or interpolation. Deadline expiry returns the partial output
    /// collected so far with `timed_out` set, not an error; a channel that
    /// closes without reporting an exit status is a transport failure.
    pub async fn exec(&self, command: &str, deadline: Duration) -> Result<CommandOutput, FleetError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| FleetError::Exec(format!("could not open channel: {e}")))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| FleetError::Exec(format!("could not start command: {e}")))?;

        let mut stdout = Vec::with_capacity(4096);
        let mut stderr = Vec::with_capacity(1024);
        let mut exit_code: Option<u32> = None;
        let mut timed_out = false;
        let mut cancelled = false;

        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                warn!(host = self.host.as_str(), "command cancelled");
                cancelled = true;
            }

            _ = tokio::time::sleep(deadline) => {
                warn!(
                    host = self.host.as_str(),
                    deadline_ms = deadline.as_millis() as u64,
                    "command deadline expired, returning partial output"
                );
                timed_out = true;
            }

            _ = collect_output(&mut channel, &mut stdout, &mut stderr, &mut exit_code) => {}
        }

        let _ = channel.close().await;

        if cancelled {
            return Err(FleetError::Exec("command cancelled".to_string()));
        }
        if exit_code.is_none() && !timed_out {
            return Err(FleetError::Exec(
                "channel closed without an exit status".to_string(),
            ));
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: exit_code.map(|code| code as i32),
            timed_out,
        })
    }

    /// Open an SFTP subsystem channel on this session.
    pub async fn open_sftp(&self) -> Result<SftpSession, FleetError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| FleetError::Transfer(format!("could not open channel: {e}")))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| FleetError::Transfer(format!("could not start sftp subsystem: {e}")))?;

        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    /// Close the session, cancelling any in-flight work first.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
        {
            debug!(host = self.host.as_str(), error = %e, "disconnect failed");
        }
    }
}

/// Drain channel messages into the output buffers until the channel closes.
async fn collect_output(
    channel: &mut russh::Channel<russh::client::Msg>,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
    exit_code: &mut Option<u32>,
) {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                // ext == 1 is stderr in the SSH protocol
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                *exit_code = Some(exit_status);
            }
            Some(ChannelMsg::Eof) => {
                // Keep waiting for the exit status if it has not arrived yet
                if exit_code.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) => break,
            Some(_) => {}
            None => break,
        }
    }
}

/// Produces authenticated sessions from host identifiers.
pub struct SessionFactory {
    config: Arc<FleetConfig>,
    resolver: Arc<HostResolver>,
    trust: Option<Arc<TrustStore>>,
}

impl SessionFactory {
    /// `trust` is `Some` exactly when strict host key checking is enabled.
    pub fn new(
        config: Arc<FleetConfig>,
        resolver: Arc<HostResolver>,
        trust: Option<Arc<TrustStore>>,
    ) -> Self {
        Self {
            config,
            resolver,
            trust,
        }
    }

    /// Connect and authenticate to `identifier`.
    ///
    /// Transient connection failures are retried with exponential backoff
    /// and jitter; authentication failures and host key rejections surface
    /// immediately.
    pub async fn connect(
        &self,
        identifier: &str,
        overrides: Option<&ConnectionOverrides>,
        timeout_ms: Option<u64>,
    ) -> Result<Session, FleetError> {
        let record = self.resolver.resolve(identifier);
        if let Some(jump) = &record.proxy_jump {
            debug!(
                host = identifier,
                proxy_jump = jump.as_str(),
                "proxy directive recorded for host but not applied"
            );
        }
        let connection = HostResolver::merge_overrides(&record, overrides);
        let timeout = self.config.connect_timeout_with(timeout_ms);

        // Credentials are chosen before anything touches the network
        let agent_socket = auth::probe_agent_socket(self.config.agent_socket.as_deref());
        let strategy = auth::select_strategy(&connection, agent_socket)?;
        info!(
            host = identifier,
            hostname = connection.hostname.as_str(),
            port = connection.port,
            mechanism = strategy.name(),
            "connecting"
        );

        let attempt_counter = AtomicU32::new(0);
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.retry_delay)
            .with_max_delay(Duration::from_secs(MAX_RETRY_DELAY_SECS))
            .with_max_times(self.config.connect_retries as usize)
            .with_jitter();

        let result = (|| async {
            let attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);
            if attempt > 0 {
                warn!(host = identifier, attempt, "retrying connection");
            }
            self.connect_once(&connection, strategy.as_ref(), timeout).await
        })
        .retry(backoff)
        .when(|e: &FleetError| {
            let retryable = e.is_retryable();
            if !retryable {
                debug!(error = %e, "connection error is not retryable");
            }
            retryable
        })
        .notify(|err, delay| {
            warn!(error = %err, delay = ?delay, "connection attempt failed, backing off");
        })
        .await;

        match result {
            Ok(handle) => {
                let attempts = attempt_counter.load(Ordering::SeqCst);
                if attempts > 1 {
                    info!(host = identifier, attempts, "connected after retries");
                }
                Ok(Session {
                    handle,
                    host: identifier.to_string(),
                    cancel: CancellationToken::new(),
                })
            }
            Err(e) => {
                error!(host = identifier, error = %e, "connection failed");
                Err(e)
            }
        }
    }

    async fn connect_once(
        &self,
        connection: &EffectiveConnection,
        strategy: &dyn AuthStrategy,
        timeout: Duration,
    ) -> Result<client::Handle<TrustHandler>, FleetError> {
        let config = build_client_config(timeout, self.config.compression);
        let rejected = Arc::new(AtomicBool::new(false));
        let handler = TrustHandler {
            hostname: connection.hostname.clone(),
            port: connection.port,
            trust: self.trust.clone(),
            rejected: rejected.clone(),
        };

        let connect_future = client::connect(
            config,
            (connection.hostname.as_str(), connection.port),
            handler,
        );

        let mut handle = match tokio::time::timeout(timeout, connect_future).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                if rejected.load(Ordering::SeqCst) {
                    return Err(FleetError::Untrusted(connection.hostname.clone()));
                }
                return Err(e.into());
            }
            Err(_) => return Err(FleetError::Timeout(timeout)),
        };

        let authenticated = strategy.authenticate(&mut handle, &connection.user).await?;
        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(FleetError::Auth(format!(
                "{} authentication rejected for {}@{}",
                strategy.name(),
                connection.user,
                connection.hostname
            )));
        }

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::Handler;
    use std::path::PathBuf;

    const KEY_ONE: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIBRanDK33/M2A9M0Lc/TQ/pF5kfd8rplxF34cupZF1gD";

    fn test_key() -> keys::PublicKey {
        keys::PublicKey::from_openssh(&format!("ssh-ed25519 {KEY_ONE} ops@fleet")).unwrap()
    }

    mod client_config {
        use super::*;

        #[test]
        fn test_timeout_and_keepalive_settings() {
            let config = build_client_config(Duration::from_secs(15), true);

            assert_eq!(config.inactivity_timeout, Some(Duration::from_secs(15)));
            assert_eq!(config.keepalive_interval, Some(Duration::from_secs(30)));
            assert_eq!(config.keepalive_max, 3);
        }
    }

    mod host_key_checks {
        use super::*;

        fn handler(trust: Option<Arc<TrustStore>>) -> (TrustHandler, Arc<AtomicBool>) {
            let rejected = Arc::new(AtomicBool::new(false));
            let handler = TrustHandler {
                hostname: "web1.internal".to_string(),
                port: 22,
                trust,
                rejected: rejected.clone(),
            };
            (handler, rejected)
        }

        #[tokio::test]
        async fn test_any_key_accepted_without_trust_store() {
            let (mut handler, rejected) = handler(None);

            let accepted = handler.check_server_key(&test_key()).await.unwrap();

            assert!(accepted);
            assert!(!rejected.load(Ordering::SeqCst));
        }

        #[tokio::test]
        async fn test_unknown_host_rejected_in_strict_mode() {
            let store = Arc::new(TrustStore::new(PathBuf::from("/nonexistent/known-hosts")));
            let (mut handler, rejected) = handler(Some(store));

            let accepted = handler.check_server_key(&test_key()).await.unwrap();

            assert!(!accepted);
            assert!(rejected.load(Ordering::SeqCst));
        }

        #[tokio::test]
        async fn test_recorded_key_accepted_in_strict_mode() {
            let path = std::env::temp_dir().join(format!("fleet-session-{}", uuid::Uuid::new_v4()));
            std::fs::write(&path, format!("web1.internal ssh-ed25519 {KEY_ONE}\n")).unwrap();
            let store = Arc::new(TrustStore::new(path.clone()));
            let (mut handler, rejected) = handler(Some(store));

            let accepted = handler.check_server_key(&test_key()).await.unwrap();
            std::fs::remove_file(&path).ok();

            assert!(accepted);
            assert!(!rejected.load(Ordering::SeqCst));
        }
    }

    mod factory {
        use super::*;
        use crate::fleet::testing::{self, TestSshServer};

        fn fast_factory() -> SessionFactory {
            let config = FleetConfig {
                config_path: PathBuf::from("/nonexistent/fleet-config"),
                connect_retries: 0,
                retry_delay: Duration::from_millis(10),
                ..FleetConfig::default()
            };
            let resolver = Arc::new(HostResolver::new(config.config_path.clone()));
            SessionFactory::new(Arc::new(config), resolver, None)
        }

        #[tokio::test]
        async fn test_exec_collects_output_and_zero_exit() {
            testing::init_tracing();
            let server = TestSshServer::spawn().await;
            let factory = fast_factory();

            let session = factory
                .connect("127.0.0.1", Some(&server.overrides()), Some(5_000))
                .await
                .unwrap();
            let output = session.exec("uptime", Duration::from_secs(5)).await.unwrap();
            session.close().await;

            assert_eq!(output.exit_code, Some(0));
            assert!(!output.timed_out);
            assert_eq!(output.stdout, format!("{}uptime\n", testing::STDOUT_PREFIX));
            assert_eq!(output.stderr, testing::STDERR_LINE);
        }

        #[tokio::test]
        async fn test_exec_reports_nonzero_exit() {
            testing::init_tracing();
            let server = TestSshServer::spawn().await;
            let factory = fast_factory();

            let session = factory
                .connect("127.0.0.1", Some(&server.overrides()), Some(5_000))
                .await
                .unwrap();
            let output = session.exec("exit 3", Duration::from_secs(5)).await.unwrap();
            session.close().await;

            assert_eq!(output.exit_code, Some(3));
            assert!(!output.timed_out);
        }

        #[tokio::test]
        async fn test_refused_port_is_connection_error() {
            let factory = fast_factory();
            let overrides = ConnectionOverrides {
                username: Some("nobody".to_string()),
                password: Some("sekrit-pw".to_string()),
                port: Some(1),
                ..Default::default()
            };

            let result = factory.connect("127.0.0.1", Some(&overrides), Some(2_000)).await;

            let err = result.unwrap_err();
            assert!(matches!(
                err,
                FleetError::Connection(_) | FleetError::Timeout(_)
            ));
            assert!(!err.to_string().contains("sekrit-pw"));
        }
    }
}
