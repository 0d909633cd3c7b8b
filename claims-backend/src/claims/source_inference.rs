//! Best-effort citation key backfill.
//!
//! Quotes with no source are matched against full-text documents in the
//! literature directory by word overlap. Nothing here is required for
//! correctness: a missing directory or unreadable file just means fewer
//! keys get filled in.

use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::models::ClaimRecord;

/// "Zhang et al. - 2020 - ComBat-seq batch effect adjustment"
static LITERATURE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<authors>.+?)\s+-\s+(?P<year>\d{4})\b").unwrap());

/// Quotes shorter than this (after stop-word removal) are too weak to match
const MIN_QUOTE_WORDS: usize = 4;
const MIN_WORD_LEN: usize = 3;

static STOP_WORDS: LazyLock<HashSet<String>> = LazyLock::new(|| {
    stop_words::get(stop_words::LANGUAGE::English)
        .iter()
        .map(|w| w.to_string())
        .collect()
});

#[derive(Debug, Clone)]
struct CandidateDocument {
    citation_key: String,
    words: HashSet<String>,
}

pub struct SourceInference {
    documents: Vec<CandidateDocument>,
    threshold: f64,
}

impl SourceInference {
    /// Index every `.txt`/`.md` document under `dir`.
    ///
    /// Returns `None` when the directory does not exist.
    pub async fn load(dir: &Path, threshold: f64) -> Option<Self> {
        if !dir.is_dir() {
            log::debug!("[SOURCES] Literature directory {} not found, skipping inference", dir.display());
            return None;
        }

        let dir = dir.to_path_buf();
        let documents = tokio::task::spawn_blocking(move || index_documents(&dir))
            .await
            .map_err(|e| log::warn!("[SOURCES] Literature scan panicked: {}", e))
            .ok()?;

        log::info!("[SOURCES] Indexed {} literature documents", documents.len());
        Some(Self {
            documents,
            threshold,
        })
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Citation key of the document whose words best cover the quote
    pub fn infer(&self, quote_text: &str) -> Option<&str> {
        let quote_words = tokenize(quote_text);
        if quote_words.len() < MIN_QUOTE_WORDS {
            return None;
        }

        let mut best: Option<(&CandidateDocument, f64)> = None;
        for doc in &self.documents {
            let shared = quote_words.iter().filter(|w| doc.words.contains(*w)).count();
            let score = shared as f64 / quote_words.len() as f64;
            if score >= self.threshold && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((doc, score));
            }
        }
        best.map(|(doc, _)| doc.citation_key.as_str())
    }

    /// Fill in missing quote sources (and the claim source when that is
    /// missing too). Returns how many quotes were updated.
    pub fn backfill<'a>(&self, claims: impl IntoIterator<Item = &'a mut ClaimRecord>) -> usize {
        let mut filled = 0;
        for claim in claims {
            let mut inferred_for_claim: Option<String> = None;
            let quotes = claim
                .primary_quote
                .iter_mut()
                .chain(claim.supporting_quotes.iter_mut());
            for quote in quotes {
                if quote.source.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false) {
                    continue;
                }
                if let Some(key) = self.infer(&quote.text) {
                    log::debug!("[SOURCES] Inferred {} for a quote in {}", key, claim.id);
                    quote.source = Some(key.to_string());
                    inferred_for_claim.get_or_insert_with(|| key.to_string());
                    filled += 1;
                }
            }
            if claim.source.is_none() {
                claim.source = inferred_for_claim;
            }
        }
        filled
    }
}

fn index_documents(dir: &Path) -> Vec<CandidateDocument> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|e| e == "txt" || e == "md")
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut documents = Vec::new();
    for path in paths {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("[SOURCES] Skipping unreadable {}: {}", path.display(), e);
                continue;
            }
        };
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        documents.push(CandidateDocument {
            citation_key: citation_key_from_file_name(&stem),
            words: tokenize(&content),
        });
    }
    documents
}

/// Derive an author+year key from a literature file name.
///
/// `"Zhang et al. - 2020 - Title"` becomes `"Zhang2020"`; names that do not
/// follow the convention use the whole stem.
pub fn citation_key_from_file_name(stem: &str) -> String {
    let Some(caps) = LITERATURE_NAME_RE.captures(stem) else {
        return stem.trim().to_string();
    };
    let surname: String = caps["authors"]
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .find(|w| !w.is_empty())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect();
    format!("{}{}", surname, &caps["year"])
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(w))
        .collect()
}
