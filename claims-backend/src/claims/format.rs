//! Parse and render claim blocks in the knowledge-base markdown format.
//!
//! One block per claim, starting at a `## C_<n>: <text>` header and running
//! to the next `## ` header or end of file. Anything before the first header
//! (shard titles, `---` rules) is preamble and ignored.

use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;

use super::categories::SHARD_DIR;
use crate::models::ClaimRecord;
use crate::models::Quote;
use crate::models::claim_number;

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^## (C_\d+):[ \t]*(.*)$").unwrap());
static SOURCE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*\(Source ID:\s*(\d+)\)\s*$").unwrap());
static PRIMARY_QUOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*Primary Quote\*\*\s*(\([^()]*\))?\s*:\s*$").unwrap());
static POSITION_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(\([^()]*\)):[ \t]*(.*)$").unwrap());

/// Leading indent of context and supporting-quote continuation lines
const CONTINUATION_INDENT: &str = "  ";

/// A block that could not be parsed; the rest of the file still loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSkip {
    /// 1-based line number of the block header
    pub line: usize,
    pub header: String,
    pub reason: String,
}

/// Result of parsing one file
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub claims: Vec<ClaimRecord>,
    pub skipped: Vec<ParseSkip>,
}

#[derive(Clone, Copy, PartialEq)]
enum BlockSection {
    Metadata,
    Context,
    PrimaryQuote,
    SupportingQuotes,
}

/// Parse every claim block in a file's content
pub fn parse_claims(content: &str) -> ParsedFile {
    let mut blocks: Vec<(usize, Vec<&str>)> = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.starts_with("## ") {
            blocks.push((idx + 1, vec![line]));
        } else if let Some((_, lines)) = blocks.last_mut() {
            lines.push(line);
        }
    }

    let mut parsed = ParsedFile::default();
    for (line, lines) in blocks {
        match parse_block(&lines) {
            Ok(claim) => parsed.claims.push(claim),
            Err(reason) => parsed.skipped.push(ParseSkip {
                line,
                header: lines[0].to_string(),
                reason,
            }),
        }
    }
    parsed
}

fn parse_block(lines: &[&str]) -> Result<ClaimRecord, String> {
    let header = lines.first().map(|l| l.trim_end()).unwrap_or_default();
    let caps = HEADER_RE
        .captures(header)
        .ok_or_else(|| "header does not match '## C_<number>: <text>'".to_string())?;
    let id = caps[1].to_string();
    let text = caps[2].trim().to_string();
    if text.is_empty() {
        return Err(format!("claim {} has no text", id));
    }

    let mut claim = ClaimRecord::new(id, text, "");
    let mut section = BlockSection::Metadata;
    let mut context_lines: Vec<String> = Vec::new();
    let mut primary: Option<(Option<String>, Vec<String>)> = None;
    let mut supporting: Vec<String> = Vec::new();
    // Blank lines seen inside the supporting list, kept only if a continuation follows
    let mut blank_run = 0;

    for raw in &lines[1..] {
        let line = raw.trim_end();
        let trimmed = line.trim();

        // Indented lines continue the open context or supporting quote,
        // whatever they start with. A line of just the indent is a blank line.
        if raw.starts_with(CONTINUATION_INDENT) {
            let rest = line.get(CONTINUATION_INDENT.len()..).unwrap_or_default();
            match section {
                BlockSection::Context => {
                    context_lines.push(rest.to_string());
                    continue;
                }
                BlockSection::SupportingQuotes => {
                    if let Some(last) = supporting.last_mut() {
                        for _ in 0..=blank_run {
                            last.push('\n');
                        }
                        last.push_str(rest);
                        blank_run = 0;
                        continue;
                    }
                }
                _ => {}
            }
        }

        if trimmed == "---" {
            section = BlockSection::Metadata;
            continue;
        }
        if let Some(value) = field_value(trimmed, "Category") {
            claim.category = value.to_string();
            section = BlockSection::Metadata;
            continue;
        }
        if let Some(value) = field_value(trimmed, "Source") {
            let (source, source_id) = parse_source(value);
            claim.source = source;
            claim.source_id = source_id;
            section = BlockSection::Metadata;
            continue;
        }
        if let Some(value) = field_value(trimmed, "Sections") {
            claim.sections = parse_sections(value).into_iter().collect();
            section = BlockSection::Metadata;
            continue;
        }
        if let Some(value) = field_value(trimmed, "Context") {
            context_lines = vec![value.to_string()];
            section = BlockSection::Context;
            continue;
        }
        if let Some(caps) = PRIMARY_QUOTE_RE.captures(trimmed) {
            let prefix = caps.get(1).map(|m| m.as_str().to_string());
            primary = Some((prefix, Vec::new()));
            section = BlockSection::PrimaryQuote;
            continue;
        }
        if trimmed.starts_with("**Supporting Quotes**") {
            section = BlockSection::SupportingQuotes;
            continue;
        }
        if trimmed.starts_with("**") {
            // Unknown metadata line; not part of the format
            log::debug!("[CLAIMS] Ignoring unrecognized line in {}: {}", claim.id, trimmed);
            section = BlockSection::Metadata;
            continue;
        }

        match section {
            // Runs until the next field or quote marker; blank lines are paragraph breaks
            BlockSection::Context => context_lines.push(trimmed.to_string()),
            BlockSection::PrimaryQuote => {
                if let Some((_, quote_lines)) = primary.as_mut() {
                    if let Some(rest) = trimmed.strip_prefix('>') {
                        quote_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                    } else if trimmed.is_empty() && !quote_lines.is_empty() {
                        section = BlockSection::Metadata;
                    }
                }
            }
            BlockSection::SupportingQuotes => {
                if let Some(rest) = line.strip_prefix("- ") {
                    supporting.push(rest.to_string());
                    blank_run = 0;
                } else if trimmed.is_empty() {
                    blank_run += 1;
                }
            }
            BlockSection::Metadata => {}
        }
    }

    while context_lines.last().is_some_and(|l| l.is_empty()) {
        context_lines.pop();
    }
    let context = context_lines.join("\n");
    if !context.trim().is_empty() {
        claim.context = Some(context);
    }

    if let Some((prefix, quote_lines)) = primary {
        let text = strip_quotes(&quote_lines.join("\n"));
        let quote = match prefix {
            Some(prefix) => Quote::with_prefix(text, prefix),
            None => split_position_prefix(&text),
        };
        if !quote.text.is_empty() {
            claim.primary_quote = Some(quote);
        }
    }

    claim.supporting_quotes = supporting
        .iter()
        .map(|raw| parse_supporting_quote(raw))
        .filter(|q| !q.text.is_empty())
        .collect();

    // The format has no per-quote citation slot; quotes cite the claim's source
    let (source, source_id) = (claim.source.clone(), claim.source_id);
    for quote in claim.quotes_mut() {
        quote.source = source.clone();
        quote.source_id = source_id;
    }

    let now = Utc::now();
    claim.created_at = now;
    claim.modified_at = now;
    Ok(claim)
}

fn field_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix("**")?
        .strip_prefix(name)?
        .strip_prefix("**:")
        .map(str::trim)
}

fn parse_source(value: &str) -> (Option<String>, Option<u32>) {
    let (source, source_id) = match SOURCE_ID_RE.captures(value) {
        Some(caps) => (caps[1].trim().to_string(), caps[2].parse().ok()),
        None => (value.trim().to_string(), None),
    };
    let source = if source.is_empty() { None } else { Some(source) };
    (source, source_id)
}

/// Parse an inline list like `[intro, methods.batch]`
fn parse_sections(value: &str) -> Vec<String> {
    let value = value.trim();
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);
    inner
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_supporting_quote(raw: &str) -> Quote {
    let raw = raw.trim();
    if let Some(caps) = POSITION_PREFIX_RE.captures(raw) {
        return Quote::with_prefix(strip_quotes(&caps[2]), &caps[1]);
    }
    split_position_prefix(&strip_quotes(raw))
}

/// Split a leading `(Label):` off quote text into the position prefix
pub fn split_position_prefix(text: &str) -> Quote {
    match POSITION_PREFIX_RE.captures(text) {
        Some(caps) => Quote::with_prefix(caps[2].trim(), &caps[1]),
        None => Quote::new(text),
    }
}

/// Remove one pair of surrounding double quotes
fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Normalize a position label to the `(Label)` form the grammar expects
pub fn normalize_position_prefix(prefix: &str) -> Option<String> {
    let inner: String = prefix.chars().filter(|c| !matches!(c, '(' | ')')).collect();
    let inner = inner.trim().trim_end_matches(':').trim();
    if inner.is_empty() {
        None
    } else {
        Some(format!("({})", inner))
    }
}

/// Render one claim as a markdown block (ends with a single newline)
pub fn serialize_claim(claim: &ClaimRecord) -> String {
    let text: Vec<&str> = claim.text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let mut out = format!("## {}: {}\n\n", claim.id, text.join(" "));

    let mut metadata = Vec::new();
    if !claim.category.trim().is_empty() {
        metadata.push(format!("**Category**: {}", claim.category.trim()));
    }
    let source = claim.source.as_deref().map(str::trim).filter(|s| !s.is_empty());
    match (source, claim.source_id) {
        (Some(source), Some(id)) => {
            metadata.push(format!("**Source**: {} (Source ID: {})", source, id))
        }
        (Some(source), None) => metadata.push(format!("**Source**: {}", source)),
        (None, Some(id)) => metadata.push(format!("**Source**: (Source ID: {})", id)),
        (None, None) => {}
    }
    if !claim.sections.is_empty() {
        let sections: Vec<&str> = claim.sections.iter().map(String::as_str).collect();
        metadata.push(format!("**Sections**: [{}]", sections.join(", ")));
    }
    if let Some(context) = claim.context.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        metadata.push(format!("**Context**: {}", indent_continuations(context)));
    }
    if !metadata.is_empty() {
        // Trailing double space is a markdown hard line break
        out.push_str(&metadata.join("  \n"));
        out.push_str("\n\n");
    }

    if let Some(quote) = claim.primary_quote.as_ref().filter(|q| !q.text.is_empty()) {
        match quote.position_prefix.as_deref().and_then(normalize_position_prefix) {
            Some(prefix) => out.push_str(&format!("**Primary Quote** {}:\n", prefix)),
            None => out.push_str("**Primary Quote**:\n"),
        }
        for line in format!("\"{}\"", quote.text).split('\n') {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }

    let supporting: Vec<&Quote> = claim
        .supporting_quotes
        .iter()
        .filter(|q| !q.text.is_empty())
        .collect();
    if !supporting.is_empty() {
        out.push_str("**Supporting Quotes**:\n");
        for quote in supporting {
            out.push_str("- ");
            if let Some(prefix) = quote.position_prefix.as_deref().and_then(normalize_position_prefix) {
                out.push_str(&prefix);
                out.push_str(": ");
            }
            out.push_str(&indent_continuations(&format!("\"{}\"", quote.text)));
            out.push('\n');
        }
    }

    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

/// Indent every line after the first so it cannot be read as a field, header or rule
fn indent_continuations(text: &str) -> String {
    text.replace('\n', &format!("\n{}", CONTINUATION_INDENT))
}

/// Title block written at the top of every category shard
pub fn shard_header(label: &str) -> String {
    format!(
        "# Claims and Evidence: {}\n\nThis file contains all **{}** claims with their supporting evidence.\n\n---\n\n",
        label, label
    )
}

/// Render a whole file: optional shard header, then claims sorted by numeric id
pub fn render_file(claims: &[ClaimRecord], header_label: Option<&str>) -> String {
    let mut sorted: Vec<&ClaimRecord> = claims.iter().collect();
    sorted.sort_by_key(|c| (c.number().unwrap_or(u64::MAX), c.id.clone()));

    let mut out = header_label.map(shard_header).unwrap_or_default();
    for claim in sorted {
        out.push_str(&serialize_claim(claim));
        out.push_str("\n---\n\n");
    }
    out
}

/// One category shard as listed in the master index
#[derive(Debug, Clone)]
pub struct IndexedShard {
    pub label: String,
    pub file_name: String,
    /// Claim ids in numeric order
    pub ids: Vec<String>,
}

/// Overview kept in the flat claims file once claims are sharded: one row per
/// shard, then every claim id with the file that holds it.
///
/// Holds no claim headers, so nothing reads it back as claims.
pub fn render_master_index(shards: &[IndexedShard]) -> String {
    let mut sorted: Vec<&IndexedShard> = shards.iter().collect();
    sorted.sort_by(|a, b| a.label.cmp(&b.label));

    let mut out = String::from(
        "# Claims and Evidence\n\n## Claim Categories and Files\n\nClaims are stored in one file per category.\n\n",
    );
    out.push_str("| Category | File | Claim Count | Claim IDs |\n");
    out.push_str("|----------|------|-------------|-----------|\n");
    for shard in &sorted {
        let range = match (shard.ids.first(), shard.ids.last()) {
            (Some(first), Some(last)) => format!("{} - {}", first, last),
            _ => String::new(),
        };
        out.push_str(&format!(
            "| {} | [`{}`]({}/{}) | {} | {} |\n",
            shard.label,
            shard.file_name,
            SHARD_DIR,
            shard.file_name,
            shard.ids.len(),
            range
        ));
    }

    let mut rows: Vec<(&str, &IndexedShard)> = sorted
        .iter()
        .flat_map(|shard| shard.ids.iter().map(move |id| (id.as_str(), *shard)))
        .collect();
    rows.sort_by_key(|(id, _)| (claim_number(id).unwrap_or(u64::MAX), id.to_string()));

    out.push_str("\n## Claim ID to File Mapping\n\n");
    out.push_str("| Claim ID | Category | File |\n");
    out.push_str("|----------|----------|------|\n");
    for (id, shard) in rows {
        out.push_str(&format!(
            "| {} | {} | [`{}`]({}/{}) |\n",
            id, shard.label, shard.file_name, SHARD_DIR, shard.file_name
        ));
    }
    out
}

/// Remove the block for `id` (`## <id>:` through the next `##` or EOF).
///
/// Returns `None` if the file holds no block for that id.
pub fn remove_claim_block(content: &str, id: &str) -> Option<String> {
    let marker = format!("## {}:", id);
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let start = lines.iter().position(|l| l.starts_with(&marker))?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.starts_with("##"))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    let mut out = String::with_capacity(content.len());
    for line in lines[..start].iter().chain(lines[end..].iter()) {
        out.push_str(line);
    }
    Some(out)
}

/// Whether any line of the content is a well-formed claim header
pub fn contains_claim_blocks(content: &str) -> bool {
    content.lines().any(|line| HEADER_RE.is_match(line.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEO_BLOCK: &str = r#"# Claims and Evidence: Data Source

This file contains all **Data Source** claims with their supporting evidence.

---

## C_31: The Gene Expression Omnibus (GEO) is an international public repository

**Category**: Data Source
**Source**: Clough2023 (Source ID: 17)
**Context**: Handles over 200,000 studies and 6.5 million samples.

**Primary Quote** (Abstract):
> "The Gene Expression Omnibus (GEO) is an international public repository that archives and freely distributes high-throughput gene expression data."

**Supporting Quotes**:
- (Conclusion): "GEO continues to grow as a central resource for functional genomics."

---
"#;

    #[test]
    fn test_parse_geo_block() {
        let parsed = parse_claims(GEO_BLOCK);
        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.claims.len(), 1);

        let claim = &parsed.claims[0];
        assert_eq!(claim.id, "C_31");
        assert_eq!(
            claim.text,
            "The Gene Expression Omnibus (GEO) is an international public repository"
        );
        assert_eq!(claim.category, "Data Source");
        assert_eq!(claim.source.as_deref(), Some("Clough2023"));
        assert_eq!(claim.source_id, Some(17));
        assert_eq!(
            claim.context.as_deref(),
            Some("Handles over 200,000 studies and 6.5 million samples.")
        );

        let primary = claim.primary_quote.as_ref().unwrap();
        assert_eq!(primary.position_prefix.as_deref(), Some("(Abstract)"));
        assert!(primary.text.starts_with("The Gene Expression Omnibus"));
        assert_eq!(primary.source.as_deref(), Some("Clough2023"));

        assert_eq!(claim.supporting_quotes.len(), 1);
        let supporting = &claim.supporting_quotes[0];
        assert_eq!(supporting.position_prefix.as_deref(), Some("(Conclusion)"));
        assert_eq!(
            supporting.text,
            "GEO continues to grow as a central resource for functional genomics."
        );
    }

    #[test]
    fn test_round_trip_preserves_encoded_fields() {
        let mut claim = ClaimRecord::new("C_7", "ComBat adjusts for batch effects", "Method - Batch Correction");
        claim.source = Some("Johnson2007".to_string());
        claim.source_id = Some(3);
        claim.context = Some("Empirical Bayes framework\nrobust for small batches".to_string());
        claim.sections = ["methods.batch".to_string(), "intro".to_string()].into_iter().collect();
        claim.primary_quote = Some(Quote::with_prefix("ComBat uses empirical Bayes.", "(Methods)"));
        claim.supporting_quotes = vec![
            Quote::new("Works with small sample sizes."),
            Quote::with_prefix("Outperforms\nalternatives", "(Results)"),
        ];

        let rendered = serialize_claim(&claim);
        let parsed = parse_claims(&rendered);
        assert_eq!(parsed.claims.len(), 1);
        let back = &parsed.claims[0];

        assert_eq!(back.id, claim.id);
        assert_eq!(back.text, claim.text);
        assert_eq!(back.category, claim.category);
        assert_eq!(back.source, claim.source);
        assert_eq!(back.source_id, claim.source_id);
        assert_eq!(back.context, claim.context);
        assert_eq!(back.sections, claim.sections);

        let primary = back.primary_quote.as_ref().unwrap();
        assert_eq!(primary.text, "ComBat uses empirical Bayes.");
        assert_eq!(primary.position_prefix.as_deref(), Some("(Methods)"));

        let texts: Vec<&str> = back.supporting_quotes.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, vec!["Works with small sample sizes.", "Outperforms\nalternatives"]);
        assert_eq!(back.supporting_quotes[0].position_prefix, None);
        assert_eq!(back.supporting_quotes[1].position_prefix.as_deref(), Some("(Results)"));
    }

    #[test]
    fn test_round_trip_keeps_paragraphs_and_marker_like_lines() {
        let mut claim = ClaimRecord::new("C_8", "Batch effects confound signals", "Challenge");
        claim.context = Some(
            "First paragraph\n\nSecond paragraph\n**Note**: not a field\n## not a header\n---".to_string(),
        );
        claim.primary_quote = Some(Quote::new("Opening line\n\n## Closing line"));
        claim.supporting_quotes = vec![
            Quote::new("line one\n\nline three"),
            Quote::new("**Bold** start\n- not a new item\n---"),
        ];
        claim.sections = ["intro".to_string()].into_iter().collect();

        let rendered = render_file(std::slice::from_ref(&claim), Some("Challenge"));
        let parsed = parse_claims(&rendered);
        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.claims.len(), 1);
        let back = &parsed.claims[0];

        assert_eq!(back.context, claim.context);
        assert_eq!(back.sections, claim.sections);
        assert_eq!(
            back.primary_quote.as_ref().unwrap().text,
            "Opening line\n\n## Closing line"
        );
        let texts: Vec<&str> = back.supporting_quotes.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["line one\n\nline three", "**Bold** start\n- not a new item\n---"]
        );

        // Serializing the parsed claim again is stable
        assert_eq!(serialize_claim(back), serialize_claim(&claim));
    }

    #[test]
    fn test_hand_written_blank_lines_inside_context_and_quotes() {
        let content = "## C_9: Claim\n\n**Category**: Result\n**Context**: First paragraph\n\nSecond paragraph\n\n**Supporting Quotes**:\n- \"line one\n\n  line three\"\n- \"next\"\n";
        let parsed = parse_claims(content);
        let claim = &parsed.claims[0];
        assert_eq!(claim.context.as_deref(), Some("First paragraph\n\nSecond paragraph"));
        let texts: Vec<&str> = claim.supporting_quotes.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, vec!["line one\n\nline three", "next"]);
    }

    #[test]
    fn test_serialize_omits_empty_fields() {
        let claim = ClaimRecord::new("C_2", "Bare claim", "Result");
        let rendered = serialize_claim(&claim);
        assert_eq!(rendered, "## C_2: Bare claim\n\n**Category**: Result\n");
        assert!(!rendered.contains("**Sections**"));
        assert!(!rendered.contains("**Context**"));
        assert!(!rendered.contains("**Source**"));
        assert!(!rendered.contains("Supporting Quotes"));
    }

    #[test]
    fn test_serialize_source_without_id() {
        let mut claim = ClaimRecord::new("C_3", "Claim", "Result");
        claim.source = Some("Leek2010".to_string());
        claim.context = Some("ctx".to_string());
        let rendered = serialize_claim(&claim);
        assert!(rendered.contains("**Category**: Result  \n**Source**: Leek2010  \n**Context**: ctx\n"));
        assert!(!rendered.contains("Source ID"));
    }

    #[test]
    fn test_malformed_header_skips_only_that_block() {
        let content = "## C_1: First claim\n\n**Category**: Result\n\n## Notes: not a claim\n\nfree text\n\n## C_x: bad id\n\n## C_2: Second claim\n\n**Category**: Method\n";
        let parsed = parse_claims(content);
        let ids: Vec<&str> = parsed.claims.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["C_1", "C_2"]);
        assert_eq!(parsed.skipped.len(), 2);
        assert_eq!(parsed.skipped[0].line, 5);
    }

    #[test]
    fn test_inline_prefix_is_split_out_of_quote_text() {
        let content = "## C_4: Claim\n\n**Category**: Result\n\n**Primary Quote**:\n> \"(Abstract): Batch effects are pervasive.\"\n\n**Supporting Quotes**:\n- \"(Discussion): They confound results.\"\n- \"Plain quote\"\n";
        let parsed = parse_claims(content);
        let claim = &parsed.claims[0];

        let primary = claim.primary_quote.as_ref().unwrap();
        assert_eq!(primary.position_prefix.as_deref(), Some("(Abstract)"));
        assert_eq!(primary.text, "Batch effects are pervasive.");

        assert_eq!(claim.supporting_quotes[0].position_prefix.as_deref(), Some("(Discussion)"));
        assert_eq!(claim.supporting_quotes[0].text, "They confound results.");
        assert_eq!(claim.supporting_quotes[1].position_prefix, None);

        // Re-emitted next to the marker, not inside the quoted string
        let rendered = serialize_claim(claim);
        assert!(rendered.contains("**Primary Quote** (Abstract):\n> \"Batch effects are pervasive.\""));
        assert!(rendered.contains("- (Discussion): \"They confound results.\""));
    }

    #[test]
    fn test_normalize_position_prefix() {
        assert_eq!(normalize_position_prefix("Abstract").as_deref(), Some("(Abstract)"));
        assert_eq!(normalize_position_prefix("(Abstract)").as_deref(), Some("(Abstract)"));
        assert_eq!(normalize_position_prefix("(Fig. 2):").as_deref(), Some("(Fig. 2)"));
        assert_eq!(normalize_position_prefix("()"), None);
    }

    #[test]
    fn test_render_file_sorts_by_numeric_id() {
        let claims = vec![
            ClaimRecord::new("C_10", "Ten", "Result"),
            ClaimRecord::new("C_2", "Two", "Result"),
            ClaimRecord::new("C_1", "One", "Result"),
        ];
        let rendered = render_file(&claims, Some("Result"));
        assert!(rendered.starts_with("# Claims and Evidence: Result\n"));

        let one = rendered.find("## C_1:").unwrap();
        let two = rendered.find("## C_2:").unwrap();
        let ten = rendered.find("## C_10:").unwrap();
        assert!(one < two && two < ten);

        let reparsed = parse_claims(&rendered);
        assert_eq!(reparsed.claims.len(), 3);
        assert!(reparsed.skipped.is_empty());
    }

    #[test]
    fn test_master_index_lists_shards_and_ids() {
        let shards = vec![
            IndexedShard {
                label: "Result".to_string(),
                file_name: "results.md".to_string(),
                ids: vec!["C_2".to_string(), "C_10".to_string()],
            },
            IndexedShard {
                label: "Method".to_string(),
                file_name: "methods.md".to_string(),
                ids: vec!["C_3".to_string()],
            },
        ];
        let index = render_master_index(&shards);

        let method_row = index.find("| Method | [`methods.md`](claims/methods.md) | 1 | C_3 - C_3 |").unwrap();
        let result_row = index.find("| Result | [`results.md`](claims/results.md) | 2 | C_2 - C_10 |").unwrap();
        assert!(method_row < result_row);

        let two = index.find("| C_2 | Result |").unwrap();
        let three = index.find("| C_3 | Method | [`methods.md`](claims/methods.md) |").unwrap();
        let ten = index.find("| C_10 | Result |").unwrap();
        assert!(two < three && three < ten);

        assert!(!contains_claim_blocks(&index));
        assert!(parse_claims(&index).claims.is_empty());
    }

    #[test]
    fn test_remove_claim_block() {
        let claims = vec![
            ClaimRecord::new("C_1", "One", "Result"),
            ClaimRecord::new("C_12", "Twelve", "Result"),
        ];
        let rendered = render_file(&claims, Some("Result"));

        let without_one = remove_claim_block(&rendered, "C_1").unwrap();
        assert!(!without_one.contains("## C_1:"));
        assert!(without_one.contains("## C_12: Twelve"));
        assert!(contains_claim_blocks(&without_one));

        let empty = remove_claim_block(&without_one, "C_12").unwrap();
        assert!(!contains_claim_blocks(&empty));
        assert!(empty.starts_with("# Claims and Evidence: Result"));

        assert!(remove_claim_block(&empty, "C_99").is_none());
    }
}
