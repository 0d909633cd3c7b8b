//! Category label <-> shard file name mapping, and the storage layout that
//! turns a category into a concrete path.

use std::path::{Path, PathBuf};

/// Shard that receives every category without an explicit mapping
pub const FALLBACK_FILE: &str = "uncategorized.md";
pub const FALLBACK_LABEL: &str = "Uncategorized";

/// Directory (under the knowledge-base root) holding category shards
pub const SHARD_DIR: &str = "claims";
/// Single flat file used when no shard directory exists
pub const LEGACY_FILE: &str = "claims_and_evidence.md";

/// Known categories and their shard files. Labels and file names are both unique.
const CATEGORY_FILES: &[(&str, &str)] = &[
    ("Application", "applications.md"),
    ("Challenge", "challenges.md"),
    ("Data Source", "data_sources.md"),
    ("Data Trend", "data_trends.md"),
    ("Impact", "impacts.md"),
    ("Method", "methods.md"),
    ("Method - Batch Correction", "methods_batch_correction.md"),
    ("Method - Integration", "methods_integration.md"),
    ("Method - Normalization", "methods_normalization.md"),
    ("Method - Classification", "methods_classification.md"),
    ("Phenomenon", "phenomena.md"),
    ("Result", "results.md"),
];

/// Resolve a category label to its shard file name.
///
/// Matching ignores surrounding whitespace and case; anything unknown
/// (including the empty string) lands in [`FALLBACK_FILE`].
pub fn category_file(category: &str) -> &'static str {
    let wanted = category.trim();
    CATEGORY_FILES
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(wanted))
        .map(|(_, file)| *file)
        .unwrap_or(FALLBACK_FILE)
}

/// Human-readable label for a shard file, used only for generated headers
pub fn category_label(file_name: &str) -> Option<&'static str> {
    if file_name == FALLBACK_FILE {
        return Some(FALLBACK_LABEL);
    }
    CATEGORY_FILES
        .iter()
        .find(|(_, file)| *file == file_name)
        .map(|(label, _)| *label)
}

/// Where claims live on disk; fixed for the lifetime of a store once detected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLayout {
    /// One file per category under `dir`
    Sharded { dir: PathBuf },
    /// Every claim in one flat file
    Legacy { file: PathBuf },
}

impl StorageLayout {
    /// Sharded if `<root>/claims/` exists, legacy flat file otherwise
    pub fn detect(root: &Path) -> Self {
        let dir = root.join(SHARD_DIR);
        if dir.is_dir() {
            StorageLayout::Sharded { dir }
        } else {
            StorageLayout::Legacy {
                file: root.join(LEGACY_FILE),
            }
        }
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self, StorageLayout::Sharded { .. })
    }

    /// Path of the file a claim with this category belongs in
    pub fn resolve(&self, category: &str) -> PathBuf {
        match self {
            StorageLayout::Sharded { dir } => dir.join(category_file(category)),
            StorageLayout::Legacy { file } => file.clone(),
        }
    }

    /// Flat file rewritten as an overview of the shards; `None` for the legacy layout
    pub fn index_file(&self) -> Option<PathBuf> {
        match self {
            StorageLayout::Sharded { dir } => dir.parent().map(|root| root.join(LEGACY_FILE)),
            StorageLayout::Legacy { .. } => None,
        }
    }

    /// Header label for a file, `None` for the legacy file (it gets no header)
    pub fn header_label(&self, path: &Path) -> Option<String> {
        match self {
            StorageLayout::Legacy { .. } => None,
            StorageLayout::Sharded { .. } => {
                let name = path.file_name()?.to_string_lossy();
                Some(
                    category_label(&name)
                        .map(str::to_string)
                        .unwrap_or_else(|| label_from_file_name(&name)),
                )
            }
        }
    }
}

/// Best-effort title for a shard that is not in the table ("cell_types.md" -> "Cell Types")
fn label_from_file_name(name: &str) -> String {
    name.trim_end_matches(".md")
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
