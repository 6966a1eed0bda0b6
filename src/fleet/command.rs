//! Fan-out command execution.
//!
//! Runs one command string across many hosts through the bounded batch
//! runner, one session per host, and reports one [`ExecuteResult`] per host
//! in input order. Failures stay inside the result payload: a host that
//! cannot be reached or refuses the command never aborts the batch and
//! never raises past this layer.
//!
//! A non-zero exit status is a successful execution whose `success` flag is
//! false; only transport-level failures populate `error`, and those carry
//! no exit code.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use uuid::Uuid;

use crate::fleet::config::FleetConfig;
use crate::fleet::error::{FleetError, scrub_secrets};
use crate::fleet::limiter::run_bounded;
use crate::fleet::session::SessionFactory;
use crate::fleet::types::{ConnectionOverrides, ExecuteResult};

/// Executes commands across host lists.
pub struct CommandRunner {
    factory: Arc<SessionFactory>,
    config: Arc<FleetConfig>,
}

impl CommandRunner {
    pub fn new(factory: Arc<SessionFactory>, config: Arc<FleetConfig>) -> Self {
        Self { factory, config }
    }

    /// Run `command` on every host, at most `max_concurrency` at a time.
    ///
    /// The command is passed to each remote verbatim. Returns one result per
    /// host, index-aligned with `hosts`.
    pub async fn run_on_hosts(
        &self,
        hosts: &[String],
        command: &str,
        timeout_ms: Option<u64>,
        overrides: Option<&ConnectionOverrides>,
    ) -> Vec<ExecuteResult> {
        let batch = Uuid::new_v4();
        info!(
            %batch,
            hosts = hosts.len(),
            command,
            "running command across hosts"
        );

        let results = run_bounded(
            hosts.to_vec(),
            self.config.max_concurrency,
            |host: String| async move {
                let result = self.run_on_host(&host, command, timeout_ms, overrides).await;
                debug!(%batch, host = host.as_str(), success = result.success, "host finished");
                result
            },
        )
        .await;

        info!(
            %batch,
            succeeded = results.iter().filter(|result| result.success).count(),
            total = results.len(),
            "command batch finished"
        );
        results
    }

    async fn run_on_host(
        &self,
        host: &str,
        command: &str,
        timeout_ms: Option<u64>,
        overrides: Option<&ConnectionOverrides>,
    ) -> ExecuteResult {
        let started = Instant::now();

        let outcome = match self.factory.connect(host, overrides, timeout_ms).await {
            Ok(session) => {
                let outcome = session.exec(command, self.config.command_timeout).await;
                session.close().await;
                outcome
            }
            Err(e) => Err(e),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let completed_at = chrono::Utc::now().to_rfc3339();

        match outcome {
            Ok(output) => ExecuteResult {
                host: host.to_string(),
                success: output.exit_code == Some(0) && !output.timed_out,
                exit_code: output.exit_code,
                stdout: Some(output.stdout),
                stderr: Some(output.stderr),
                error: None,
                timed_out: output.timed_out,
                duration_ms,
                completed_at,
            },
            Err(e) => ExecuteResult {
                host: host.to_string(),
                success: false,
                exit_code: None,
                stdout: None,
                stderr: None,
                error: Some(scrub_error(&e, overrides)),
                timed_out: false,
                duration_ms,
                completed_at,
            },
        }
    }
}

/// Error text for a result payload, with any supplied credentials removed.
pub(crate) fn scrub_error(error: &FleetError, overrides: Option<&ConnectionOverrides>) -> String {
    let mut secrets: Vec<&str> = Vec::new();
    if let Some(password) = overrides.and_then(|overrides| overrides.password.as_deref()) {
        secrets.push(password);
    }
    scrub_secrets(&error.to_string(), &secrets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::resolver::HostResolver;
    use std::path::PathBuf;
    use std::time::Duration;

    fn runner() -> CommandRunner {
        let config = Arc::new(FleetConfig {
            config_path: PathBuf::from("/nonexistent/fleet-config"),
            connect_retries: 0,
            retry_delay: Duration::from_millis(10),
            ..FleetConfig::default()
        });
        let resolver = Arc::new(HostResolver::new(config.config_path.clone()));
        let factory = Arc::new(SessionFactory::new(config.clone(), resolver, None));
        CommandRunner::new(factory, config)
    }

    #[tokio::test]
    async fn test_empty_host_list() {
        let results = runner().run_on_hosts(&[], "true", None, None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_inside_result() {
        let hosts = vec!["fleet-nonexistent-host.invalid".to_string()];
        let results = runner().run_on_hosts(&hosts, "uptime", Some(2_000), None).await;

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.host, hosts[0]);
        assert!(!result.success);
        assert!(result.exit_code.is_none());
        assert!(result.stdout.is_none());
        assert!(result.error.as_deref().is_some_and(|error| !error.is_empty()));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_results_align_with_input_order() {
        let hosts = vec![
            "fleet-a.invalid".to_string(),
            "fleet-b.invalid".to_string(),
            "fleet-c.invalid".to_string(),
        ];
        let results = runner().run_on_hosts(&hosts, "true", Some(2_000), None).await;

        let returned: Vec<&str> = results.iter().map(|result| result.host.as_str()).collect();
        assert_eq!(returned, vec!["fleet-a.invalid", "fleet-b.invalid", "fleet-c.invalid"]);
    }

    #[tokio::test]
    async fn test_error_text_never_contains_password() {
        let overrides = ConnectionOverrides {
            password: Some("hunter2-secret".to_string()),
            ..Default::default()
        };
        let hosts = vec!["fleet-nonexistent-host.invalid".to_string()];
        let results = runner()
            .run_on_hosts(&hosts, "true", Some(2_000), Some(&overrides))
            .await;

        let error = results[0].error.as_deref().unwrap_or_default();
        assert!(!error.is_empty());
        assert!(!error.contains("hunter2-secret"));
    }

    mod accepting_hosts {
        use super::*;
        use crate::fleet::testing::{self, TestSshServer};

        fn runner_with_store(store: PathBuf) -> CommandRunner {
            let config = Arc::new(FleetConfig {
                config_path: store,
                connect_retries: 0,
                retry_delay: Duration::from_millis(10),
                ..FleetConfig::default()
            });
            let resolver = Arc::new(HostResolver::new(config.config_path.clone()));
            let factory = Arc::new(SessionFactory::new(config.clone(), resolver, None));
            CommandRunner::new(factory, config)
        }

        fn write_alias_store(port: u16) -> PathBuf {
            let store = std::env::temp_dir().join(format!("fleet-command-{}", Uuid::new_v4()));
            std::fs::write(
                &store,
                format!(
                    "Host web1\n    HostName 127.0.0.1\n    Port {port}\n\n\
                     Host web2\n    HostName 127.0.0.1\n    Port {port}\n"
                ),
            )
            .unwrap();
            store
        }

        /// Auth without a port, so the port comes from the alias store.
        fn auth_only() -> ConnectionOverrides {
            ConnectionOverrides {
                username: Some("fixture".to_string()),
                password: Some("fixture-pw".to_string()),
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn test_accepting_hosts_report_zero_exit_success() {
            testing::init_tracing();
            let server = TestSshServer::spawn().await;
            let store = write_alias_store(server.port);
            let runner = runner_with_store(store.clone());

            let hosts = vec!["web1".to_string(), "web2".to_string()];
            let results = runner
                .run_on_hosts(&hosts, "true", Some(5_000), Some(&auth_only()))
                .await;
            std::fs::remove_file(&store).ok();

            assert_eq!(results.len(), 2);
            for (result, host) in results.iter().zip(&hosts) {
                assert_eq!(&result.host, host);
                assert!(result.success);
                assert_eq!(result.exit_code, Some(0));
                assert_eq!(
                    result.stdout.as_deref(),
                    Some(format!("{}true\n", testing::STDOUT_PREFIX).as_str())
                );
                assert_eq!(result.stderr.as_deref(), Some(testing::STDERR_LINE));
                assert!(result.error.is_none());
                assert!(!result.timed_out);
            }
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_unsuccessful_but_not_an_error() {
            testing::init_tracing();
            let server = TestSshServer::spawn().await;
            let store = write_alias_store(server.port);
            let runner = runner_with_store(store.clone());

            let hosts = vec!["web1".to_string()];
            let results = runner
                .run_on_hosts(&hosts, "exit 2", Some(5_000), Some(&auth_only()))
                .await;
            std::fs::remove_file(&store).ok();

            assert_eq!(results.len(), 1);
            let result = &results[0];
            assert!(!result.success);
            assert_eq!(result.exit_code, Some(2));
            assert!(result.error.is_none());
            assert!(!result.timed_out);
        }
    }

    #[test]
    fn test_scrub_error_removes_supplied_password() {
        let overrides = ConnectionOverrides {
            password: Some("sekrit".to_string()),
            ..Default::default()
        };
        let error = FleetError::Auth("server said: bad password sekrit".to_string());

        let scrubbed = scrub_error(&error, Some(&overrides));

        assert!(!scrubbed.contains("sekrit"));
        assert!(scrubbed.contains("authentication failed"));
    }
}
