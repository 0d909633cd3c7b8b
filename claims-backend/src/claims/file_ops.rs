//! File operations for the claims store
//!
//! Reading shard files, atomic writes with retry, and excising a single
//! claim block from a file that no longer owns it.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::format;
use crate::error::ClaimStoreError;

/// Retry policy for atomic writes
#[derive(Debug, Clone, Copy)]
pub struct WritePolicy {
    pub attempts: u32,
    /// Backoff before the second attempt; doubled for each further attempt
    pub initial_backoff: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Read a claims file, returning empty string if not found
pub async fn read_claims_file(path: &Path) -> io::Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// List the markdown shard files in a directory, sorted by name.
///
/// Hidden files and subdirectories are skipped.
pub async fn list_shard_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        if hidden || !entry.file_type().await?.is_file() {
            continue;
        }
        if path.extension().map(|e| e == "md").unwrap_or(false) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write to a sibling temp file, fsync, then rename over the target
pub async fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

/// Atomic write with bounded retries and exponential backoff.
///
/// Returns the number of attempts used on success.
pub async fn write_with_retry(
    path: &Path,
    content: &str,
    policy: WritePolicy,
) -> Result<u32, ClaimStoreError> {
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match write_atomic(path, content).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt < attempts => {
                log::warn!(
                    "[CLAIMS] Write to {} failed (attempt {}/{}): {}, retrying in {:?}",
                    path.display(),
                    attempt,
                    attempts,
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => {
                return Err(ClaimStoreError::WriteFailed {
                    path: path.to_path_buf(),
                    attempts,
                    source: e,
                });
            }
        }
    }
}

/// What happened to a file when a claim block was excised from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// The block was removed and other claims remain
    Removed,
    /// No claims remain, so the file was deleted
    FileDeleted,
    /// The file is missing or holds no block for the id; nothing was touched
    NotFound,
}

/// Remove the block for `id` from `path`, deleting the file once that leaves no claims
pub async fn evict_claim_block(
    path: &Path,
    id: &str,
    policy: WritePolicy,
) -> Result<Eviction, ClaimStoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Eviction::NotFound),
        Err(e) => return Err(ClaimStoreError::io(path, e)),
    };

    // A file without the block is left alone, even if it holds no claims at all
    let Some(updated) = format::remove_claim_block(&content, id) else {
        return Ok(Eviction::NotFound);
    };

    if !format::contains_claim_blocks(&updated) {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| ClaimStoreError::io(path, e))?;
        return Ok(Eviction::FileDeleted);
    }

    write_with_retry(path, &updated, policy).await?;
    Ok(Eviction::Removed)
}

/// Modification time of a file as a UTC timestamp
pub async fn modified_at(path: &Path) -> Option<chrono::DateTime<chrono::Utc>> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    meta.modified().ok().map(chrono::DateTime::<chrono::Utc>::from)
}
