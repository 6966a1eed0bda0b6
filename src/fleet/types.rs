//! Serializable types crossing the dispatch boundary.
//!
//! Inputs ([`ConnectionOverrides`], [`TransferDirection`]) and per-host
//! results ([`ExecuteResult`], [`TransferResult`], [`AliasInfo`]) all
//! implement `Serialize`, `Deserialize`, and `JsonSchema` so the calling
//! layer can marshal them without translation.
//!
//! Every result row carries the host it belongs to; `success` plus the
//! populated side (payload or `error`) tells the caller what happened there.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Direction of a file transfer batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Local file pushed to every target host
    Upload,
    /// Remote file fetched from every target host
    Download,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}

/// Per-call credential and endpoint overrides.
///
/// Any present field wins over the resolved alias record; `password` only
/// ever enters a connection through here. The `Debug` impl redacts it.
#[derive(Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionOverrides {
    /// Login user, overriding the alias store and the current-user default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password for password authentication; when set, no other mechanism
    /// is attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Port, overriding the alias store and the default 22
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Identity file path, overriding the alias store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
}

impl std::fmt::Debug for ConnectionOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOverrides")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("port", &self.port)
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

/// One alias from the host alias store
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AliasInfo {
    /// Alias name as written in the store
    pub name: String,
    /// Hostname the alias resolves to
    pub hostname: String,
    pub port: u16,
    pub user: String,
    /// Configured identity file, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    /// Configured jump host, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_jump: Option<String>,
}

/// Outcome of running one command on one host.
///
/// `success` means the remote process ran and exited zero. A non-zero exit
/// still populates `exit_code`/`stdout`/`stderr`; only connection or
/// transport failures leave those empty and set `error` instead.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteResult {
    /// Host identifier as passed by the caller
    pub host: String,
    /// True only for a clean zero exit within the deadline
    pub success: bool,
    /// Exit status of the remote process (absent on transport failure or
    /// timeout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured standard output (absent when the command never ran)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error (absent when the command never ran)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Sanitized failure description (absent when the command ran)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the deadline expired (partial output may be present)
    #[serde(default)]
    pub timed_out: bool,
    /// Wall time spent on this host, connect included
    pub duration_ms: u64,
    /// When this host's operation finished (RFC3339 format)
    pub completed_at: String,
}

/// Outcome of one file transfer on one host
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransferResult {
    /// Host identifier as passed by the caller
    pub host: String,
    pub success: bool,
    pub direction: TransferDirection,
    /// Local side of the transfer; for downloads this is the derived
    /// per-host destination (absent when derivation was rejected)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    /// Remote side of the transfer, identical across the batch
    pub remote_path: String,
    /// Bytes moved (absent on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_transferred: Option<u64>,
    /// Sanitized failure description (absent on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time spent on this host, connect included
    pub duration_ms: u64,
    /// When this host's transfer finished (RFC3339 format)
    pub completed_at: String,
}
