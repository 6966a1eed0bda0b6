//! Host key trust decisions.
//!
//! Reads an OpenSSH known_hosts style store and answers whether a presented
//! server key is the recorded identity for a host. Each line holds
//!
//! ```text
//! hostpattern[,hostpattern...] key-algorithm base64-key [comment]
//! ```
//!
//! Entries are indexed by each literal host token. Lookup candidates are the
//! bare hostname and, for non-default ports, `[hostname]:port`. The first
//! candidate with any recorded key decides: a matching key means trusted, a
//! mismatch means untrusted with no fall through to the other candidate. A
//! host with no recorded key at all is untrusted; unknown hosts are never
//! auto-accepted.
//!
//! Hashed host tokens (`|1|...`) are indexed under their literal form, which
//! no candidate ever equals, so hashed entries never match. Comment lines,
//! marker lines (`@cert-authority`, `@revoked`) and malformed lines are
//! skipped. The parsed store is cached with the same modification-time
//! snapshot discipline as the alias store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use russh::keys;
use tracing::{debug, warn};

/// One recorded key for a host token. Material stays in its base64 form;
/// matching is an exact string comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredKey {
    algorithm: String,
    material: String,
}

/// Parsed snapshot of the trust store.
struct TrustSnapshot {
    path: PathBuf,
    mtime: Option<SystemTime>,
    loaded: bool,
    index: HashMap<String, Vec<StoredKey>>,
}

impl TrustSnapshot {
    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            mtime: None,
            loaded: false,
            index: HashMap::new(),
        }
    }

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
        self.index = parse_trust_entries(&content);
        self.loaded = true;
        debug!(
            path = %self.path.display(),
            hosts = self.index.len(),
            "trust store reloaded"
        );
    }
}

/// Answers host key verification queries against the trust store.
///
/// Only consulted in strict mode; outside strict mode connections skip
/// host identity verification entirely.
pub struct TrustStore {
    cache: RwLock<TrustSnapshot>,
}

impl TrustStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            cache: RwLock::new(TrustSnapshot::empty(path)),
        }
    }

    /// Whether `key` is the recorded identity for `hostname`/`port`.
    pub fn verify(&self, hostname: &str, port: u16, key: &keys::PublicKey) -> bool {
        match key.to_bytes() {
            Ok(wire) => self.verify_material(hostname, port, &STANDARD.encode(wire)),
            Err(err) => {
                warn!(hostname, error = %err, "presented host key could not be encoded");
                false
            }
        }
    }

    /// Verification against the base64 form of the presented key.
    pub(crate) fn verify_material(&self, hostname: &str, port: u16, presented: &str) -> bool {
        let mut candidates = vec![hostname.to_string()];
        if port != 22 {
            candidates.push(format!("[{hostname}]:{port}"));
        }

        self.with_snapshot(|snapshot| {
            for candidate in &candidates {
                let Some(recorded) = snapshot.index.get(candidate) else {
                    continue;
                };
                // An entry for this host exists: it decides, and remaining
                // candidates are never consulted
                let trusted = recorded.iter().any(|key| key.material == presented);
                if !trusted {
                    let algorithms: Vec<&str> = recorded
                        .iter()
                        .map(|key| key.algorithm.as_str())
                        .collect();
                    warn!(
                        host = candidate.as_str(),
                        recorded = ?algorithms,
                        "presented host key does not match any recorded key"
                    );
                }
                return trusted;
            }
            debug!(hostname, port, "no recorded key for host");
            false
        })
    }

    fn with_snapshot<T>(&self, read: impl FnOnce(&TrustSnapshot) -> T) -> T {
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

/// Index trust store content by host token.
///
/// Lines that do not fit the `hosts algorithm base64-key` grammar are
/// skipped, never fatal: short lines, marker lines and entries whose key
/// material is not valid base64.
fn parse_trust_entries(content: &str) -> HashMap<String, Vec<StoredKey>> {
    let mut index: HashMap<String, Vec<StoredKey>> = HashMap::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('@') {
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() < 3 {
            debug!(line = trimmed, "malformed trust entry skipped");
            continue;
        }
        let (hosts, algorithm, material) = (tokens[0], tokens[1], tokens[2]);
        // Tokens past the key material are a comment

        if STANDARD.decode(material).is_err() {
            debug!(line = trimmed, "trust entry with invalid key material skipped");
            continue;
        }

        for host in hosts.split(',') {
            let host = host.trim();
            if host.is_empty() {
                continue;
            }
            index.entry(host.to_string()).or_default().push(StoredKey {
                algorithm: algorithm.to_string(),
                material: material.to_string(),
            });
        }
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Structurally valid ed25519 public key blob.
    const KEY_ONE: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIBRanDK33/M2A9M0Lc/TQ/pF5kfd8rplxF34cupZF1gD";
    const KEY_TWO: &str = "AQIDBA==";
    const KEY_THREE: &str = "BQYHCA==";

    fn write_store(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("fleet-trust-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    mod key_matching {
        use super::*;

        #[test]
        fn test_exact_match_trusted() {
            let path = write_store(&format!("web1.internal ssh-ed25519 {KEY_ONE}\n"));
            let store = TrustStore::new(path.clone());
            let trusted = store.verify_material("web1.internal", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(trusted);
        }

        #[test]
        fn test_unknown_host_untrusted() {
            let path = write_store(&format!("web1.internal ssh-ed25519 {KEY_ONE}\n"));
            let store = TrustStore::new(path.clone());
            let trusted = store.verify_material("other.internal", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(!trusted);
        }

        #[test]
        fn test_recorded_host_with_different_key_untrusted() {
            let path = write_store(&format!("web1.internal ssh-ed25519 {KEY_ONE}\n"));
            let store = TrustStore::new(path.clone());
            let trusted = store.verify_material("web1.internal", 22, KEY_TWO);
            std::fs::remove_file(&path).ok();

            assert!(!trusted);
        }

        #[test]
        fn test_rotated_keys_any_recorded_key_matches() {
            let path = write_store(&format!(
                "web1 ssh-rsa {KEY_TWO}\nweb1 ssh-ed25519 {KEY_ONE}\n"
            ));
            let store = TrustStore::new(path.clone());
            let old = store.verify_material("web1", 22, KEY_TWO);
            let new = store.verify_material("web1", 22, KEY_ONE);
            let neither = store.verify_material("web1", 22, KEY_THREE);
            std::fs::remove_file(&path).ok();

            assert!(old);
            assert!(new);
            assert!(!neither);
        }

        #[test]
        fn test_comma_separated_tokens_indexed_individually() {
            let path = write_store(&format!("web1,web1.internal ssh-ed25519 {KEY_ONE}\n"));
            let store = TrustStore::new(path.clone());
            let by_alias = store.verify_material("web1", 22, KEY_ONE);
            let by_fqdn = store.verify_material("web1.internal", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(by_alias);
            assert!(by_fqdn);
        }

        #[test]
        fn test_nondefault_port_uses_bracketed_candidate() {
            let path = write_store(&format!("[web1]:2222 ssh-ed25519 {KEY_ONE}\n"));
            let store = TrustStore::new(path.clone());
            let on_2222 = store.verify_material("web1", 2222, KEY_ONE);
            let on_22 = store.verify_material("web1", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(on_2222);
            // Default port never consults the bracketed form
            assert!(!on_22);
        }

        #[test]
        fn test_hostname_entry_stops_lookup_before_port_candidate() {
            // The plain hostname entry holds a different key; the bracketed
            // entry would match, but the first candidate already decided
            let path = write_store(&format!(
                "web1 ssh-ed25519 {KEY_TWO}\n[web1]:2222 ssh-ed25519 {KEY_ONE}\n"
            ));
            let store = TrustStore::new(path.clone());
            let trusted = store.verify_material("web1", 2222, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(!trusted);
        }

        #[test]
        fn test_empty_store_rejects_everyone() {
            let store = TrustStore::new(PathBuf::from("/nonexistent/fleet-known-hosts"));
            assert!(!store.verify_material("web1", 22, KEY_ONE));
        }
    }

    mod store_parsing {
        use super::*;

        #[test]
        fn test_comments_and_blank_lines_skipped() {
            let path = write_store(&format!(
                "# recorded fleet hosts\n\nweb1 ssh-ed25519 {KEY_ONE}\n"
            ));
            let store = TrustStore::new(path.clone());
            let trusted = store.verify_material("web1", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(trusted);
        }

        #[test]
        fn test_short_lines_skipped() {
            let path = write_store(&format!("web1 ssh-ed25519\nweb2 ssh-ed25519 {KEY_ONE}\n"));
            let store = TrustStore::new(path.clone());
            let short = store.verify_material("web1", 22, KEY_ONE);
            let full = store.verify_material("web2", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(!short);
            assert!(full);
        }

        #[test]
        fn test_invalid_key_material_skipped() {
            let path = write_store("web1 ssh-ed25519 not-valid-base64!\n");
            let store = TrustStore::new(path.clone());
            let trusted = store.verify_material("web1", 22, "not-valid-base64!");
            std::fs::remove_file(&path).ok();

            assert!(!trusted);
        }

        #[test]
        fn test_marker_lines_skipped() {
            let path = write_store(&format!(
                "@cert-authority *.internal ssh-rsa {KEY_TWO}\nweb1 ssh-ed25519 {KEY_ONE}\n"
            ));
            let store = TrustStore::new(path.clone());
            let marker = store.verify_material("@cert-authority", 22, "*.internal");
            let normal = store.verify_material("web1", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(!marker);
            assert!(normal);
        }

        #[test]
        fn test_hashed_tokens_never_match() {
            let path = write_store(&format!(
                "|1|kRjF2K7mYQ==|5v6aG1sJ9Q8= ssh-ed25519 {KEY_ONE}\n"
            ));
            let store = TrustStore::new(path.clone());
            let trusted = store.verify_material("web1.internal", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(!trusted);
        }

        #[test]
        fn test_trailing_comment_tokens_ignored() {
            let path = write_store(&format!("web1 ssh-ed25519 {KEY_ONE} root@web1 rotated\n"));
            let store = TrustStore::new(path.clone());
            let trusted = store.verify_material("web1", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(trusted);
        }
    }

    mod presented_keys {
        use super::*;

        #[test]
        fn test_verify_accepts_recorded_identity() {
            let path = write_store(&format!("web1.internal ssh-ed25519 {KEY_ONE}\n"));
            let store = TrustStore::new(path.clone());
            let key = keys::PublicKey::from_openssh(&format!("ssh-ed25519 {KEY_ONE} ops@fleet"))
                .unwrap();
            let known = store.verify("web1.internal", 22, &key);
            let unknown = store.verify("other.internal", 22, &key);
            std::fs::remove_file(&path).ok();

            assert!(known);
            assert!(!unknown);
        }
    }

    mod snapshot_cache {
        use super::*;

        #[test]
        fn test_reload_after_key_rotation() {
            let path = write_store(&format!("web1 ssh-ed25519 {KEY_TWO}\n"));
            let store = TrustStore::new(path.clone());
            assert!(store.verify_material("web1", 22, KEY_TWO));

            std::thread::sleep(std::time::Duration::from_millis(50));
            std::fs::write(&path, format!("web1 ssh-ed25519 {KEY_ONE}\n")).unwrap();

            let old = store.verify_material("web1", 22, KEY_TWO);
            let new = store.verify_material("web1", 22, KEY_ONE);
            std::fs::remove_file(&path).ok();

            assert!(!old);
            assert!(new);
        }
    }
}
