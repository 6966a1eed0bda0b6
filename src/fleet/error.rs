//! Error taxonomy and classification for the dispatch core.
//!
//! Failures are typed by where they happen: connecting, authenticating,
//! verifying the remote identity, executing, or transferring. A missing alias
//! is deliberately *not* an error (resolution falls back to treating the
//! identifier as a hostname), and store parse problems degrade to empty
//! collections at their call sites.
//!
//! Two cross-cutting concerns live here as well:
//!
//! - **Retry classification** ([`FleetError::is_retryable`]): transient
//!   transport failures are worth retrying; authentication, trust and path
//!   failures never are. Authentication patterns take precedence when a
//!   message matches both.
//! - **Credential scrubbing** ([`scrub_secrets`]): any message that ends up in
//!   a per-host result is stripped of supplied secrets and of
//!   `password=...`-style pairs first.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error for one per-host operation.
///
/// Per-host workers catch every variant and encode it into that host's
/// result; nothing here crosses the batch boundary as a panic or process
/// exit.
#[derive(Debug, Error)]
pub enum FleetError {
    /// DNS, TCP or transport-level protocol failure while connecting
    #[error("connection failed: {0}")]
    Connection(String),

    /// Every offered credential mechanism was rejected, or none was viable
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The handshake did not complete within the configured deadline
    #[error("connection timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// Strict mode rejected the presented host key
    #[error("host key verification failed for {0}")]
    Untrusted(String),

    /// Channel or exec request failed at the transport level
    #[error("remote execution failed: {0}")]
    Exec(String),

    /// SFTP open/read/write failure
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Derived local path would escape the destination directory
    #[error("unsafe local path {}: escapes the destination directory", .0.display())]
    PathSafety(PathBuf),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<russh::Error> for FleetError {
    fn from(err: russh::Error) -> Self {
        let message = err.to_string();
        if is_auth_error(&message) {
            FleetError::Auth(message)
        } else {
            FleetError::Connection(message)
        }
    }
}

impl From<russh::keys::Error> for FleetError {
    fn from(err: russh::keys::Error) -> Self {
        FleetError::Auth(err.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for FleetError {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        FleetError::Transfer(err.to_string())
    }
}

impl FleetError {
    /// Whether a fresh connection attempt might succeed.
    ///
    /// Timeouts and transport failures are transient; credential, trust,
    /// path-safety and remote-side failures are permanent for the life of
    /// the call.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            FleetError::Timeout(_) => true,
            FleetError::Connection(message) => is_retryable_message(message),
            FleetError::Io(err) => is_retryable_message(&err.to_string()),
            FleetError::Auth(_)
            | FleetError::Untrusted(_)
            | FleetError::Exec(_)
            | FleetError::Transfer(_)
            | FleetError::PathSafety(_) => false,
        }
    }
}

/// Authentication error patterns that indicate permanent failures.
///
/// These will never succeed by retrying and should fail immediately to avoid
/// wasting time and potentially locking out accounts.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "agent authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
];

/// Connection error patterns that indicate transient failures.
///
/// These may resolve on retry due to temporary network conditions or server
/// load.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
    "would block",
];

/// True when the message matches a known credential-failure pattern.
pub(crate) fn is_auth_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    AUTH_ERRORS.iter().any(|pattern| lower.contains(pattern))
}

/// Classify a raw transport message as transient or permanent.
///
/// Authentication patterns are checked first and win: a message carrying both
/// credential and connection keywords must not be retried with the same bad
/// credentials. Unmatched messages default to retryable unless they look like
/// a protocol-level SSH error without a timeout/connect component.
pub(crate) fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();

    for auth_err in AUTH_ERRORS {
        if lower.contains(auth_err) {
            return false;
        }
    }

    for retryable_err in RETRYABLE_ERRORS {
        if lower.contains(retryable_err) {
            return true;
        }
    }

    !lower.contains("ssh") || lower.contains("timeout") || lower.contains("connect")
}

/// Replacement text for redacted material.
const REDACTED: &str = "[redacted]";

/// Keys whose `key=value` / `key: value` pairs are redacted wherever they
/// appear in a message.
const CREDENTIAL_KEYS: &[&str] = &["password", "passwd", "secret", "token", "auth", "key"];

/// Strip credential material from a message before it reaches a result.
///
/// Two passes: literal occurrences of each supplied secret are replaced
/// first, then anything that reads as a credential assignment
/// (`password=...`, `token: ...`) has its value redacted. The output is what
/// per-host results may carry as `error`.
pub(crate) fn scrub_secrets(message: &str, secrets: &[&str]) -> String {
    let mut scrubbed = message.to_owned();
    for secret in secrets {
        if !secret.is_empty() {
            scrubbed = scrubbed.replace(secret, REDACTED);
        }
    }
    redact_credential_pairs(&scrubbed)
}

/// Redact the value of every `key=value` or `key: value` pair whose key ends
/// with a credential keyword.
fn redact_credential_pairs(message: &str) -> String {
    let bytes = message.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut pos = 0;

    while pos < bytes.len() {
        match next_credential_value(bytes, pos) {
            Some((value_start, value_end)) => {
                out.extend_from_slice(&bytes[pos..value_start]);
                out.extend_from_slice(REDACTED.as_bytes());
                pos = value_end;
            }
            None => {
                out.extend_from_slice(&bytes[pos..]);
                break;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Find the next credential assignment at or after `from`, returning the byte
/// range of its value. Keywords are matched case-insensitively; the value runs
/// to the next whitespace. Ranges always fall on UTF-8 boundaries because the
/// delimiters involved are single ASCII bytes.
fn next_credential_value(bytes: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;

    for keyword in CREDENTIAL_KEYS {
        let mut search = from;
        while let Some(at) = find_ascii_ci(bytes, keyword.as_bytes(), search) {
            let mut cursor = at + keyword.len();
            // Skip spaces between keyword and separator
            while cursor < bytes.len() && bytes[cursor] == b' ' {
                cursor += 1;
            }
            if cursor < bytes.len() && (bytes[cursor] == b'=' || bytes[cursor] == b':') {
                cursor += 1;
                while cursor < bytes.len() && bytes[cursor] == b' ' {
                    cursor += 1;
                }
                let value_start = cursor;
                while cursor < bytes.len() && !bytes[cursor].is_ascii_whitespace() {
                    cursor += 1;
                }
                if cursor > value_start {
                    let candidate = (value_start, cursor);
                    if best.is_none_or(|(start, _)| candidate.0 < start) {
                        best = Some(candidate);
                    }
                    break;
                }
            }
            search = at + 1;
        }
    }

    best
}

/// Case-insensitive ASCII substring search starting at `from`.
fn find_ascii_ci(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}
