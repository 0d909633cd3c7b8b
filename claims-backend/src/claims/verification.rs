//! Verification status storage.
//!
//! The markdown format has no slot for `verified`, so the flag is owned by a
//! separate store. On load the statuses are applied to the parsed claims; on
//! every persist cycle the current set of verified ids is saved back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use super::file_ops;
use crate::error::ClaimStoreError;

#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Ids currently marked verified
    async fn load(&self) -> Result<HashSet<String>, ClaimStoreError>;

    /// Replace the stored set of verified ids
    async fn save(&self, verified: &BTreeSet<String>) -> Result<(), ClaimStoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VerificationFile {
    verified: BTreeSet<String>,
}

/// Keeps verified ids in a JSON sidecar next to the claim files
pub struct JsonVerificationStore {
    path: PathBuf,
}

impl JsonVerificationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VerificationStore for JsonVerificationStore {
    async fn load(&self) -> Result<HashSet<String>, ClaimStoreError> {
        let content = file_ops::read_claims_file(&self.path)
            .await
            .map_err(|e| ClaimStoreError::io(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(HashSet::new());
        }
        let file: VerificationFile = serde_json::from_str(&content)?;
        Ok(file.verified.into_iter().collect())
    }

    async fn save(&self, verified: &BTreeSet<String>) -> Result<(), ClaimStoreError> {
        let file = VerificationFile {
            verified: verified.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        file_ops::write_atomic(&self.path, &json)
            .await
            .map_err(|e| ClaimStoreError::io(&self.path, e))
    }
}
