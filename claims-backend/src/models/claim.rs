use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ClaimStoreError;

/// Prefix shared by every claim id (`C_31`)
pub const CLAIM_ID_PREFIX: &str = "C_";

/// A quoted excerpt backing a claim
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quote {
    /// Verbatim excerpt, without surrounding quote marks
    pub text: String,
    /// Citation key (author+year token, e.g. "Clough2023")
    pub source: Option<String>,
    pub source_id: Option<u32>,
    /// Parenthetical position label such as "(Abstract)", kept outside the quoted text
    pub position_prefix: Option<String>,
}

impl Quote {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(text: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            position_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }
}

/// A stored evidentiary statement with its citations.
///
/// `verified` is not part of the markdown format; it is reconciled through a
/// [`VerificationStore`](crate::claims::verification::VerificationStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: String,
    pub text: String,
    pub category: String,
    pub context: Option<String>,
    pub source: Option<String>,
    pub source_id: Option<u32>,
    pub primary_quote: Option<Quote>,
    pub supporting_quotes: Vec<Quote>,
    pub sections: BTreeSet<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ClaimRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>, category: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            text: text.into(),
            category: category.into(),
            context: None,
            source: None,
            source_id: None,
            primary_quote: None,
            supporting_quotes: Vec::new(),
            sections: BTreeSet::new(),
            verified: false,
            created_at: now,
            modified_at: now,
        }
    }

    /// Numeric suffix of the id, used for ordering within a file
    pub fn number(&self) -> Option<u64> {
        claim_number(&self.id)
    }

    /// Reject records missing an id or text before they enter the store
    pub fn validate(&self) -> Result<(), ClaimStoreError> {
        if self.id.trim().is_empty() {
            return Err(ClaimStoreError::Validation("claim id is required".to_string()));
        }
        if claim_number(&self.id).is_none() {
            return Err(ClaimStoreError::Validation(format!(
                "claim id '{}' must have the form {}<number>",
                self.id, CLAIM_ID_PREFIX
            )));
        }
        if self.text.trim().is_empty() {
            return Err(ClaimStoreError::Validation(format!(
                "claim {} has no text",
                self.id
            )));
        }
        Ok(())
    }

    /// Every quote attached to the claim, primary first
    pub fn quotes_mut(&mut self) -> impl Iterator<Item = &mut Quote> {
        self.primary_quote
            .iter_mut()
            .chain(self.supporting_quotes.iter_mut())
    }
}

/// Partial update applied by `ClaimStore::update_claim`.
///
/// `None` leaves a field untouched. `context: Some(None)` clears the context.
#[derive(Debug, Clone, Default)]
pub struct ClaimUpdate {
    pub text: Option<String>,
    pub category: Option<String>,
    pub context: Option<Option<String>>,
    pub source: Option<Option<String>>,
    pub source_id: Option<Option<u32>>,
    pub primary_quote: Option<Option<Quote>>,
    pub supporting_quotes: Option<Vec<Quote>>,
    pub sections: Option<BTreeSet<String>>,
    pub verified: Option<bool>,
}

impl ClaimUpdate {
    pub fn apply(self, claim: &mut ClaimRecord) {
        if let Some(text) = self.text {
            claim.text = text;
        }
        if let Some(category) = self.category {
            claim.category = category;
        }
        if let Some(context) = self.context {
            claim.context = context;
        }
        if let Some(source) = self.source {
            claim.source = source;
        }
        if let Some(source_id) = self.source_id {
            claim.source_id = source_id;
        }
        if let Some(primary_quote) = self.primary_quote {
            claim.primary_quote = primary_quote;
        }
        if let Some(supporting_quotes) = self.supporting_quotes {
            claim.supporting_quotes = supporting_quotes;
        }
        if let Some(sections) = self.sections {
            claim.sections = sections;
        }
        if let Some(verified) = self.verified {
            claim.verified = verified;
        }
    }
}

/// Parse the numeric suffix out of a claim id (`"C_31"` -> `31`)
pub fn claim_number(id: &str) -> Option<u64> {
    let digits = id.strip_prefix(CLAIM_ID_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn format_claim_id(number: u64) -> String {
    format!("{}{}", CLAIM_ID_PREFIX, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_number() {
        assert_eq!(claim_number("C_31"), Some(31));
        assert_eq!(claim_number("C_007"), Some(7));
        assert_eq!(claim_number("C_"), None);
        assert_eq!(claim_number("C_12a"), None);
        assert_eq!(claim_number("X_12"), None);
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let missing_text = ClaimRecord::new("C_1", "   ", "Method");
        assert!(matches!(
            missing_text.validate(),
            Err(ClaimStoreError::Validation(_))
        ));

        let missing_id = ClaimRecord::new("", "Some text", "Method");
        assert!(missing_id.validate().is_err());

        let bad_id = ClaimRecord::new("claim-1", "Some text", "Method");
        assert!(bad_id.validate().is_err());

        assert!(ClaimRecord::new("C_1", "Some text", "Method").validate().is_ok());
    }

    #[test]
    fn test_update_apply_clears_context() {
        let mut claim = ClaimRecord::new("C_2", "Text", "Result");
        claim.context = Some("old".to_string());

        ClaimUpdate {
            text: Some("New text".to_string()),
            context: Some(None),
            ..Default::default()
        }
        .apply(&mut claim);

        assert_eq!(claim.text, "New text");
        assert_eq!(claim.context, None);
        assert_eq!(claim.category, "Result");
    }
}
