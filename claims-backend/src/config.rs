use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::claims::file_ops::WritePolicy;
use crate::claims::reload::DebounceConfig;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const KNOWLEDGE_BASE_DIR: &str = "CLAIMS_KNOWLEDGE_BASE_DIR";
    pub const LITERATURE_DIR: &str = "CLAIMS_LITERATURE_DIR";
    pub const RELOAD_DEBOUNCE_MS: &str = "CLAIMS_RELOAD_DEBOUNCE_MS";
    pub const WRITE_ATTEMPTS: &str = "CLAIMS_WRITE_ATTEMPTS";
    pub const WRITE_BACKOFF_MS: &str = "CLAIMS_WRITE_BACKOFF_MS";
    pub const SOURCE_MATCH_THRESHOLD: &str = "CLAIMS_SOURCE_MATCH_THRESHOLD";
    /// Path of the verification sidecar. Set to "off" to keep verification in memory only.
    pub const VERIFICATION_FILE: &str = "CLAIMS_VERIFICATION_FILE";
}

/// Default values
pub mod defaults {
    pub const KNOWLEDGE_BASE_DIR: &str = "./knowledge_base";
    pub const LITERATURE_DIR: &str = "./literature/ExtractedText";
    pub const RELOAD_DEBOUNCE_MS: u64 = 500;
    pub const WRITE_ATTEMPTS: u32 = 3;
    pub const WRITE_BACKOFF_MS: u64 = 100;
    pub const SOURCE_MATCH_THRESHOLD: f64 = 0.8;
    pub const VERIFICATION_FILE_NAME: &str = ".claim_verification.json";
}

/// Configuration for the claims store
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Root holding `claims/` or the flat claims file (default: ./knowledge_base)
    pub knowledge_base_dir: PathBuf,
    /// Full-text documents used to infer missing citation keys
    pub literature_dir: PathBuf,
    /// Quiet period before an external change triggers a reload (default: 500ms)
    pub reload_debounce_ms: u64,
    /// Atomic write attempts per file (default: 3)
    pub write_attempts: u32,
    /// Backoff before the first retry, doubled each time (default: 100ms)
    pub write_backoff_ms: u64,
    /// Minimum share of a quote's words a document must contain (default: 0.8)
    pub source_match_threshold: f64,
    /// Verification sidecar; `None` keeps statuses in memory only
    pub verification_file: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::for_root(defaults::KNOWLEDGE_BASE_DIR)
    }
}

impl StoreConfig {
    /// Defaults for everything except the knowledge-base root
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let knowledge_base_dir = root.into();
        Self {
            verification_file: Some(knowledge_base_dir.join(defaults::VERIFICATION_FILE_NAME)),
            knowledge_base_dir,
            literature_dir: PathBuf::from(defaults::LITERATURE_DIR),
            reload_debounce_ms: defaults::RELOAD_DEBOUNCE_MS,
            write_attempts: defaults::WRITE_ATTEMPTS,
            write_backoff_ms: defaults::WRITE_BACKOFF_MS,
            source_match_threshold: defaults::SOURCE_MATCH_THRESHOLD,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let knowledge_base_dir = lookup(env_vars::KNOWLEDGE_BASE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(defaults::KNOWLEDGE_BASE_DIR));

        let verification_file = match lookup(env_vars::VERIFICATION_FILE) {
            Some(value) if value.trim().eq_ignore_ascii_case("off") => None,
            Some(value) if !value.trim().is_empty() => Some(PathBuf::from(value.trim())),
            _ => Some(knowledge_base_dir.join(defaults::VERIFICATION_FILE_NAME)),
        };

        let mut source_match_threshold = parse_or_default(
            &lookup,
            env_vars::SOURCE_MATCH_THRESHOLD,
            defaults::SOURCE_MATCH_THRESHOLD,
        );
        if !(0.0..=1.0).contains(&source_match_threshold) {
            log::warn!(
                "{} must be between 0 and 1, using {}",
                env_vars::SOURCE_MATCH_THRESHOLD,
                defaults::SOURCE_MATCH_THRESHOLD
            );
            source_match_threshold = defaults::SOURCE_MATCH_THRESHOLD;
        }

        Self {
            knowledge_base_dir,
            literature_dir: lookup(env_vars::LITERATURE_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(defaults::LITERATURE_DIR)),
            reload_debounce_ms: parse_or_default(
                &lookup,
                env_vars::RELOAD_DEBOUNCE_MS,
                defaults::RELOAD_DEBOUNCE_MS,
            ),
            write_attempts: parse_or_default(&lookup, env_vars::WRITE_ATTEMPTS, defaults::WRITE_ATTEMPTS)
                .max(1),
            write_backoff_ms: parse_or_default(
                &lookup,
                env_vars::WRITE_BACKOFF_MS,
                defaults::WRITE_BACKOFF_MS,
            ),
            source_match_threshold,
            verification_file,
        }
    }

    pub fn write_policy(&self) -> WritePolicy {
        WritePolicy {
            attempts: self.write_attempts.max(1),
            initial_backoff: Duration::from_millis(self.write_backoff_ms),
        }
    }

    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig {
            debounce_ms: self.reload_debounce_ms,
        }
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Invalid value '{}' for {}, using default {}", raw, key, default);
            default
        }),
    }
}
