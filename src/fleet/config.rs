//! Configuration for the dispatch core.
//!
//! All knobs live in [`FleetConfig`], built once (usually via
//! [`FleetConfig::from_env`]) and injected into the components at
//! construction. Nothing reads configuration from global state after startup.
//!
//! Each value resolves with a two-tier priority: environment variable, then
//! built-in default. Operations that accept a per-call timeout apply it on
//! top through [`FleetConfig::connect_timeout_with`].
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_CONFIG_PATH` | `~/.ssh/config` | Host alias store |
//! | `SSH_KNOWN_HOSTS_PATH` | `~/.ssh/known_hosts` | Trust store |
//! | `SSH_AGENT_SOCK` | unset | Agent socket override |
//! | `SSH_CONNECT_TIMEOUT_MS` | 30000 | Connection handshake timeout |
//! | `SSH_COMMAND_TIMEOUT_MS` | 180000 | Remote command deadline |
//! | `SSH_STRICT_HOST_KEY_CHECKING` | false | Require trust store verification |
//! | `SSH_MAX_CONCURRENCY` | 10 | Per-batch in-flight ceiling |
//! | `SSH_CONNECT_RETRIES` | 2 | Retry attempts for transient connect failures |
//! | `SSH_RETRY_DELAY_MS` | 1000 | Initial retry delay |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default connection handshake timeout in milliseconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default remote command deadline in milliseconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 180_000;

/// Default maximum in-flight operations per batch
pub(crate) const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default retry attempts for transient connection failures
pub(crate) const DEFAULT_CONNECT_RETRIES: u32 = 2;

/// Default initial retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap in seconds
pub(crate) const MAX_RETRY_DELAY_SECS: u64 = 10;

/// Environment variable name for the alias store path
pub(crate) const CONFIG_PATH_ENV_VAR: &str = "SSH_CONFIG_PATH";

/// Environment variable name for the trust store path
pub(crate) const KNOWN_HOSTS_PATH_ENV_VAR: &str = "SSH_KNOWN_HOSTS_PATH";

/// Environment variable name for the agent socket override
pub(crate) const AGENT_SOCK_ENV_VAR: &str = "SSH_AGENT_SOCK";

/// Environment variable name for the connection timeout
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT_MS";

/// Environment variable name for the command deadline
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT_MS";

/// Environment variable name for strict host key checking
pub(crate) const STRICT_HOST_KEY_ENV_VAR: &str = "SSH_STRICT_HOST_KEY_CHECKING";

/// Environment variable name for the concurrency ceiling
pub(crate) const MAX_CONCURRENCY_ENV_VAR: &str = "SSH_MAX_CONCURRENCY";

/// Environment variable name for connect retry attempts
pub(crate) const CONNECT_RETRIES_ENV_VAR: &str = "SSH_CONNECT_RETRIES";

/// Environment variable name for the initial retry delay in milliseconds
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";

/// Environment variable name for compression
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";

/// Immutable configuration for one dispatcher instance.
///
/// Built once at startup and shared by reference; operations that accept a
/// per-call timeout override it through [`FleetConfig::connect_timeout_with`].
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Host alias store (OpenSSH client config subset)
    pub config_path: PathBuf,
    /// Trust store (known-hosts format)
    pub known_hosts_path: PathBuf,
    /// Explicit agent socket path, if any; probing falls back to the
    /// environment and platform locations when unset
    pub agent_socket: Option<PathBuf>,
    /// Bounds TCP connect, handshake and authentication per attempt
    pub connect_timeout: Duration,
    /// Bounds remote command execution; expiry yields partial output
    pub command_timeout: Duration,
    /// When true, every presented host key must pass the trust store
    pub strict_host_checking: bool,
    /// In-flight ceiling for per-host batch operations
    pub max_concurrency: usize,
    /// Retry attempts for transient connection failures (0 disables retry)
    pub connect_retries: u32,
    /// Initial delay between retry attempts (grows exponentially, capped)
    pub retry_delay: Duration,
    /// Prefer zlib compression on the transport
    pub compression: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            config_path: default_ssh_path("config"),
            known_hosts_path: default_ssh_path("known_hosts"),
            agent_socket: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            strict_host_checking: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            compression: true,
        }
    }
}

impl FleetConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for every unset or unparseable variable.
    pub fn from_env() -> Self {
        Self {
            config_path: resolve_config_path(),
            known_hosts_path: resolve_known_hosts_path(),
            agent_socket: resolve_agent_socket(),
            connect_timeout: Duration::from_millis(resolve_connect_timeout_ms()),
            command_timeout: Duration::from_millis(resolve_command_timeout_ms()),
            strict_host_checking: resolve_strict_host_checking(),
            max_concurrency: resolve_max_concurrency(),
            connect_retries: resolve_connect_retries(),
            retry_delay: Duration::from_millis(resolve_retry_delay_ms()),
            compression: resolve_compression(),
        }
    }

    /// Connection timeout for one call: explicit parameter wins over the
    /// configured value.
    pub fn connect_timeout_with(&self, timeout_ms: Option<u64>) -> Duration {
        match timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.connect_timeout,
        }
    }
}

/// Conventional per-user SSH path (`~/.ssh/<file>`); relative to the process
/// working directory when no home directory is known.
fn default_ssh_path(file: &str) -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".ssh").join(file)
}

/// Resolve the alias store path with priority: env var -> default
pub(crate) fn resolve_config_path() -> PathBuf {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV_VAR)
        && !env_path.is_empty()
    {
        return PathBuf::from(env_path);
    }

    default_ssh_path("config")
}

/// Resolve the trust store path with priority: env var -> default
pub(crate) fn resolve_known_hosts_path() -> PathBuf {
    if let Ok(env_path) = env::var(KNOWN_HOSTS_PATH_ENV_VAR)
        && !env_path.is_empty()
    {
        return PathBuf::from(env_path);
    }

    default_ssh_path("known_hosts")
}

/// Resolve the agent socket override from the environment.
///
/// No built-in default; an unset override leaves probing to the
/// authentication layer.
pub(crate) fn resolve_agent_socket() -> Option<PathBuf> {
    if let Ok(env_path) = env::var(AGENT_SOCK_ENV_VAR)
        && !env_path.is_empty()
    {
        return Some(PathBuf::from(env_path));
    }

    None
}

/// Resolve the connection timeout (ms) with priority: env var -> default
pub(crate) fn resolve_connect_timeout_ms() -> u64 {
    if let Ok(env_timeout) = env::var(CONNECT_TIMEOUT_ENV_VAR)
        && let Ok(timeout) = env_timeout.parse::<u64>()
    {
        return timeout;
    }

    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Resolve the command deadline (ms) with priority: env var -> default
pub(crate) fn resolve_command_timeout_ms() -> u64 {
    if let Ok(env_timeout) = env::var(COMMAND_TIMEOUT_ENV_VAR)
        && let Ok(timeout) = env_timeout.parse::<u64>()
    {
        return timeout;
    }

    DEFAULT_COMMAND_TIMEOUT_MS
}

/// Resolve strict host key checking with priority: env var -> default (false)
pub(crate) fn resolve_strict_host_checking() -> bool {
    if let Ok(env_strict) = env::var(STRICT_HOST_KEY_ENV_VAR) {
        return env_strict.eq_ignore_ascii_case("true") || env_strict == "1";
    }

    false
}

/// Resolve the concurrency ceiling with priority: env var -> default
pub(crate) fn resolve_max_concurrency() -> usize {
    if let Ok(env_limit) = env::var(MAX_CONCURRENCY_ENV_VAR)
        && let Ok(limit) = env_limit.parse::<usize>()
    {
        return limit;
    }

    DEFAULT_MAX_CONCURRENCY
}

/// Resolve connect retry attempts with priority: env var -> default
pub(crate) fn resolve_connect_retries() -> u32 {
    if let Ok(env_retries) = env::var(CONNECT_RETRIES_ENV_VAR)
        && let Ok(retries) = env_retries.parse::<u32>()
    {
        return retries;
    }

    DEFAULT_CONNECT_RETRIES
}

/// Resolve the initial retry delay (ms) with priority: env var -> default
pub(crate) fn resolve_retry_delay_ms() -> u64 {
    if let Ok(env_delay) = env::var(RETRY_DELAY_MS_ENV_VAR)
        && let Ok(delay) = env_delay.parse::<u64>()
    {
        return delay;
    }

    DEFAULT_RETRY_DELAY_MS
}

/// Resolve the compression setting with priority: env var -> default (true)
pub(crate) fn resolve_compression() -> bool {
    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}
