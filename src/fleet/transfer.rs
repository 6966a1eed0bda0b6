//! Per-host file transfer planning and execution.
//!
//! Uploads send the same local file to every host. Downloads derive one
//! local destination per host, in priority order:
//!
//! 1. A literal `{host}` token in the local path is replaced with the
//!    sanitized host identifier, every occurrence.
//! 2. Otherwise, with more than one target host, `_<sanitizedHost>` is
//!    inserted between the base filename and its extension.
//! 3. Otherwise the local path is used unchanged.
//!
//! Sanitizing keeps alphanumerics, dot, underscore and hyphen; everything
//! else becomes an underscore. A derived path whose normalized form escapes
//! upward out of the destination directory fails that host with a
//! path-safety error before anything is written or any connection is made.
//! Hosts fail independently: one bad derivation or dead host never cancels
//! the others.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::fleet::command::scrub_error;
use crate::fleet::config::FleetConfig;
use crate::fleet::error::FleetError;
use crate::fleet::limiter::run_bounded;
use crate::fleet::session::{Session, SessionFactory};
use crate::fleet::types::{ConnectionOverrides, TransferDirection, TransferResult};

/// Token substituted with the sanitized host identifier in download paths
pub(crate) const HOST_PLACEHOLDER: &str = "{host}";

/// Drives per-host uploads and downloads.
pub struct TransferPlanner {
    factory: Arc<SessionFactory>,
    config: Arc<FleetConfig>,
}

impl TransferPlanner {
    pub fn new(factory: Arc<SessionFactory>, config: Arc<FleetConfig>) -> Self {
        Self { factory, config }
    }

    /// Transfer one file to or from every host, at most `max_concurrency`
    /// at a time. Returns one result per host, index-aligned with `hosts`.
    pub async fn run_transfer(
        &self,
        direction: TransferDirection,
        hosts: &[String],
        local_path: &str,
        remote_path: &str,
        overrides: Option<&ConnectionOverrides>,
    ) -> Vec<TransferResult> {
        let batch = Uuid::new_v4();
        let multi_host = hosts.len() > 1;
        info!(
            %batch,
            %direction,
            hosts = hosts.len(),
            remote = remote_path,
            "transferring files"
        );

        let results = run_bounded(
            hosts.to_vec(),
            self.config.max_concurrency,
            |host: String| async move {
                let result = self
                    .transfer_one(direction, &host, local_path, remote_path, multi_host, overrides)
                    .await;
                debug!(%batch, host = host.as_str(), success = result.success, "host finished");
                result
            },
        )
        .await;

        info!(
            %batch,
            succeeded = results.iter().filter(|result| result.success).count(),
            total = results.len(),
            "transfer batch finished"
        );
        results
    }

    async fn transfer_one(
        &self,
        direction: TransferDirection,
        host: &str,
        local_path: &str,
        remote_path: &str,
        multi_host: bool,
        overrides: Option<&ConnectionOverrides>,
    ) -> TransferResult {
        let started = Instant::now();
        let outcome = self
            .transfer_inner(direction, host, local_path, remote_path, multi_host, overrides)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let completed_at = chrono::Utc::now().to_rfc3339();

        match outcome {
            Ok((local, bytes)) => TransferResult {
                host: host.to_string(),
                success: true,
                direction,
                local_path: Some(local),
                remote_path: remote_path.to_string(),
                bytes_transferred: Some(bytes),
                error: None,
                duration_ms,
                completed_at,
            },
            Err(e) => TransferResult {
                host: host.to_string(),
                success: false,
                direction,
                local_path: None,
                remote_path: remote_path.to_string(),
                bytes_transferred: None,
                error: Some(scrub_error(&e, overrides)),
                duration_ms,
                completed_at,
            },
        }
    }

    async fn transfer_inner(
        &self,
        direction: TransferDirection,
        host: &str,
        local_path: &str,
        remote_path: &str,
        multi_host: bool,
        overrides: Option<&ConnectionOverrides>,
    ) -> Result<(String, u64), FleetError> {
        match direction {
            TransferDirection::Download => {
                // Derivation runs before any connection; a rejected path
                // never opens a session and never writes a file
                let local = derive_local_path(local_path, host, multi_host)?;
                if let Some(parent) = local.parent()
                    && !parent.as_os_str().is_empty()
                {
                    tokio::fs::create_dir_all(parent).await?;
                }

                let session = self.factory.connect(host, overrides, None).await?;
                let result = download(&session, remote_path, &local).await;
                session.close().await;
                let bytes = result?;
                Ok((local.display().to_string(), bytes))
            }
            TransferDirection::Upload => {
                let session = self.factory.connect(host, overrides, None).await?;
                let result = upload(&session, local_path, remote_path).await;
                session.close().await;
                let bytes = result?;
                Ok((local_path.to_string(), bytes))
            }
        }
    }
}

async fn download(session: &Session, remote: &str, local: &Path) -> Result<u64, FleetError> {
    let sftp = session.open_sftp().await?;
    let mut remote_file = sftp.open(remote).await?;
    let mut local_file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(local)
        .await?;

    match tokio::io::copy(&mut remote_file, &mut local_file).await {
        Ok(bytes) => {
            local_file.flush().await?;
            Ok(bytes)
        }
        Err(e) => {
            // Stray partial files are worse than no file
            drop(local_file);
            let _ = tokio::fs::remove_file(local).await;
            Err(FleetError::Transfer(format!("download of {remote}: {e}")))
        }
    }
}

async fn upload(session: &Session, local: &str, remote: &str) -> Result<u64, FleetError> {
    let sftp = session.open_sftp().await?;
    let mut local_file = tokio::fs::File::open(local).await?;
    let mut remote_file = sftp.create(remote).await?;

    let bytes = tokio::io::copy(&mut local_file, &mut remote_file)
        .await
        .map_err(|e| FleetError::Transfer(format!("upload to {remote}: {e}")))?;
    remote_file.shutdown().await?;

    Ok(bytes)
}

/// Derive the local destination for one host's download.
pub(crate) fn derive_local_path(
    local_path: &str,
    host: &str,
    multi_host: bool,
) -> Result<PathBuf, FleetError> {
    let derived = if local_path.contains(HOST_PLACEHOLDER) {
        local_path.replace(HOST_PLACEHOLDER, &sanitize_host(host))
    } else if multi_host {
        insert_host_suffix(local_path, &sanitize_host(host))
    } else {
        local_path.to_string()
    };

    let path = PathBuf::from(derived);
    if escapes_destination(&normalize_lexically(&path)) {
        return Err(FleetError::PathSafety(path));
    }
    Ok(path)
}

/// Host identifier reduced to alphanumerics, dot, underscore and hyphen.
fn sanitize_host(host: &str) -> String {
    host.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Insert `_<host>` between the base filename and its extension.
fn insert_host_suffix(local_path: &str, host: &str) -> String {
    let path = Path::new(local_path);
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => {
            let suffixed = match name.rsplit_once('.') {
                Some((stem, extension)) if !stem.is_empty() => {
                    format!("{stem}_{host}.{extension}")
                }
                // Extensionless names, including dotfiles
                _ => format!("{name}_{host}"),
            };
            path.with_file_name(suffixed).display().to_string()
        }
        None => format!("{local_path}_{host}"),
    }
}

/// Fold `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // Root-anchored paths cannot climb above the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(Component::ParentDir),
            },
            component => normalized.push(component),
        }
    }
    normalized
}

/// A normalized path escapes when it still starts with `..`.
fn escapes_destination(normalized: &Path) -> bool {
    matches!(normalized.components().next(), Some(Component::ParentDir))
}
