//! Host alias resolution.
//!
//! Turns a host identifier into complete connection parameters by merging
//! three sources, highest precedence first:
//!
//! 1. Explicit per-call [`ConnectionOverrides`]
//! 2. The host alias store (an OpenSSH client config subset)
//! 3. Bare-hostname defaults (port 22, current OS user)
//!
//! Resolution never fails: an identifier absent from the store is treated
//! literally as a hostname, which makes direct IPs and configured aliases
//! interchangeable everywhere downstream.
//!
//! The parsed store is cached as an explicit `{path, mtime, hosts}` snapshot
//! owned by the resolver and recomputed whenever the file's modification time
//! changes or cannot be read.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::fleet::types::{AliasInfo, ConnectionOverrides};

/// Login user for hosts that configure none.
static CURRENT_USER: Lazy<String> = Lazy::new(|| {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
});

pub(crate) fn current_user() -> &'static str {
    &CURRENT_USER
}

/// Identity and connection facts for one alias.
///
/// Immutable once parsed; override merging produces a new
/// [`EffectiveConnection`] rather than mutating the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// Alias name, or the raw identifier for synthesized records
    pub name: String,
    /// Never empty; defaults to `name` when the store has no HostName
    pub hostname: String,
    pub port: u16,
    /// Never empty; defaults to the current OS user
    pub user: String,
    pub identity_file: Option<PathBuf>,
    pub proxy_jump: Option<String>,
}

impl HostRecord {
    /// Record for an identifier with no alias entry: the identifier is the
    /// hostname.
    fn direct(identifier: &str) -> Self {
        Self {
            name: identifier.to_string(),
            hostname: identifier.to_string(),
            port: 22,
            user: current_user().to_string(),
            identity_file: None,
            proxy_jump: None,
        }
    }
}

/// Final merged parameters for one connection attempt.
///
/// Transient: lives for the duration of the attempt and is never persisted.
/// `Debug` redacts the password so the value can appear in traces.
#[derive(Clone)]
pub struct EffectiveConnection {
    /// Identifier the caller used (alias name or raw hostname)
    pub host: String,
    pub hostname: String,
    pub port: u16,
    pub user: String,
    /// Only ever populated from per-call overrides
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
}

impl std::fmt::Debug for EffectiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectiveConnection")
            .field("host", &self.host)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("identity_file", &self.identity_file)
            .finish()
    }
}

/// Parsed snapshot of the alias store.
struct AliasSnapshot {
    path: PathBuf,
    mtime: Option<SystemTime>,
    loaded: bool,
    hosts: Vec<HostRecord>,
    index: HashMap<String, usize>,
}

impl AliasSnapshot {
    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            mtime: None,
            loaded: false,
            hosts: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Fresh only while the file's modification time still matches the one
    /// captured at parse; a failed stat always forces a reload.
    fn is_fresh(&self) -> bool {
        if !self.loaded {
            return false;
        }
        match std::fs::metadata(&self.path).and_then(|meta| meta.modified()) {
            Ok(mtime) => self.mtime == Some(mtime),
            Err(_) => false,
        }
    }

    fn reload(&mut self) {
        self.mtime = std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok();
        let content = std::fs::read_to_string(&self.path).unwrap_or_default();
        self.hosts = parse_alias_blocks(&content);
        self.index = self
            .hosts
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.name.clone(), idx))
            .collect();
        self.loaded = true;
        debug!(
            path = %self.path.display(),
            aliases = self.hosts.len(),
            "alias store reloaded"
        );
    }

    fn lookup(&self, identifier: &str) -> Option<&HostRecord> {
        self.index.get(identifier).map(|&idx| &self.hosts[idx])
    }
}

/// Resolves host identifiers against the alias store.
pub struct HostResolver {
    cache: RwLock<AliasSnapshot>,
}

impl HostResolver {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            cache: RwLock::new(AliasSnapshot::empty(config_path)),
        }
    }

    /// Resolve an identifier to connection facts.
    ///
    /// Exact-name store match, else a synthesized direct record. Never
    /// errors; a missing or unreadable store behaves like an empty one.
    pub fn resolve(&self, identifier: &str) -> HostRecord {
        self.with_snapshot(|snapshot| snapshot.lookup(identifier).cloned())
            .unwrap_or_else(|| HostRecord::direct(identifier))
    }

    /// All configured aliases, in store order.
    pub fn aliases(&self) -> Vec<AliasInfo> {
        self.with_snapshot(|snapshot| {
            snapshot
                .hosts
                .iter()
                .map(|record| AliasInfo {
                    name: record.name.clone(),
                    hostname: record.hostname.clone(),
                    port: record.port,
                    user: record.user.clone(),
                    identity_file: record
                        .identity_file
                        .as_ref()
                        .map(|path| path.display().to_string()),
                    proxy_jump: record.proxy_jump.clone(),
                })
                .collect()
        })
    }

    /// Merge per-call overrides on top of a record.
    ///
    /// Present override fields win; absent ones leave the record's values.
    /// The password can only enter through overrides.
    pub fn merge_overrides(
        record: &HostRecord,
        overrides: Option<&ConnectionOverrides>,
    ) -> EffectiveConnection {
        let mut connection = EffectiveConnection {
            host: record.name.clone(),
            hostname: record.hostname.clone(),
            port: record.port,
            user: record.user.clone(),
            password: None,
            identity_file: record.identity_file.clone(),
        };

        if let Some(overrides) = overrides {
            if let Some(username) = &overrides.username {
                connection.user = username.clone();
            }
            if let Some(password) = &overrides.password {
                connection.password = Some(password.clone());
            }
            if let Some(port) = overrides.port {
                connection.port = port;
            }
            if let Some(key_path) = &overrides.private_key_path {
                connection.identity_file = Some(expand_tilde(key_path));
            }
        }

        connection
    }

    /// Run `read` against a fresh snapshot, reloading first if the store
    /// changed on disk.
    fn with_snapshot<T>(&self, read: impl FnOnce(&AliasSnapshot) -> T) -> T {
        {
            let guard = self
                .cache
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if guard.is_fresh() {
                return read(&guard);
            }
        }

        let mut guard = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !guard.is_fresh() {
            guard.reload();
        }
        read(&guard)
    }
}

/// Parse the alias store content into records.
///
/// Consumes the subset of the OpenSSH client config grammar this crate
/// understands: `Host` blocks with `HostName`, `Port`, `User`,
/// `IdentityFile` and `ProxyJump` directives. Keywords are
/// case-insensitive; comments, blank lines, wildcard host patterns and
/// malformed directives are skipped.
fn parse_alias_blocks(content: &str) -> Vec<HostRecord> {
    let mut records: Vec<HostRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    // Indices of the records the current Host block is defining
    let mut open_block: Vec<usize> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = trimmed.splitn(2, char::is_whitespace).collect();
        let keyword = parts[0];
        let value = if parts.len() > 1 {
            parts[1].trim().trim_matches('"')
        } else {
            ""
        };
        if value.is_empty() {
            continue;
        }

        if keyword.eq_ignore_ascii_case("host") {
            open_block.clear();
            for pattern in value.split_whitespace() {
                let pattern = pattern.trim_matches('"');
                if pattern.is_empty() || is_wildcard_pattern(pattern) {
                    continue;
                }
                if index.contains_key(pattern) {
                    // First block wins; later duplicates are ignored
                    debug!(alias = pattern, "duplicate alias block ignored");
                    continue;
                }
                index.insert(pattern.to_string(), records.len());
                open_block.push(records.len());
                records.push(HostRecord::direct(pattern));
            }
        } else if !open_block.is_empty() {
            for &idx in &open_block {
                apply_directive(&mut records[idx], keyword, value);
            }
        }
    }

    records
}

/// Wildcard patterns are matchers, never literal hosts.
fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.starts_with('!')
}

fn apply_directive(record: &mut HostRecord, keyword: &str, value: &str) {
    if keyword.eq_ignore_ascii_case("hostname") {
        record.hostname = value.to_string();
    } else if keyword.eq_ignore_ascii_case("port") {
        match value.parse::<u16>() {
            Ok(port) if port > 0 => record.port = port,
            _ => debug!(alias = %record.name, port = value, "invalid port directive ignored"),
        }
    } else if keyword.eq_ignore_ascii_case("user") {
        record.user = value.to_string();
    } else if keyword.eq_ignore_ascii_case("identityfile") {
        record.identity_file = Some(expand_tilde(value));
    } else if keyword.eq_ignore_ascii_case("proxyjump") {
        record.proxy_jump = Some(value.to_string());
    }
    // Directives outside the consumed subset are ignored
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}
