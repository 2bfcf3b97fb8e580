//! Post-processing: deterministic cleanup of extracted text and model output.
//!
//! Three entry points, one per kind of input:
//!
//! - [`clean_page_text`] for text pulled straight out of the PDF or OCR
//! - [`clean_markdown`] for layout Markdown produced by the vision model
//! - [`parse_json_response`] for JSON answers from the entity extractor and
//!   the structurer
//!
//! Every rule is a pure `&str -> String` pass so rules can be tested and
//! reordered independently.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Clean text extracted from a page (embedded text layer or OCR).
///
/// 1. Normalise line endings
/// 2. Strip invisible Unicode
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of blank lines
pub fn clean_page_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

/// Clean Markdown generated by the vision model for one page.
///
/// Rules (applied in order):
/// 1. Strip outer code fences the model added despite the prompt
/// 2. Normalise line endings
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of blank lines
/// 5. Repair GFM tables (missing header separator, spurious body separators)
/// 6. Replace placeholder image links with their alt text
/// 7. Strip invisible Unicode
/// 8. End with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = repair_tables(&s);
    let s = remove_placeholder_images(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

/// Parse a model answer that should be JSON.
///
/// Accepts the bare value, the value wrapped in a ```json fence, or the
/// outermost `{...}` / `[...]` span of a chatty answer. Anything else is an
/// error carrying the parser message.
pub fn parse_json_response(raw: &str) -> Result<Value, String> {
    let stripped = strip_code_fences(raw);
    let body = stripped.trim();
    if body.is_empty() {
        return Err("empty response".to_string());
    }

    let first_err = match serde_json::from_str::<Value>(body) {
        Ok(v) => return Ok(v),
        Err(e) => e.to_string(),
    };

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (body.find(open), body.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&body[start..=end]) {
                    return Ok(v);
                }
            }
        }
    }

    Err(first_err)
}

// ── Fences ───────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

/// Remove one outer ``` fence (any language tag) if the whole input is fenced.
pub fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Whitespace ───────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").into_owned()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Tables ───────────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Walk each table block once: the header must be followed by exactly one
/// separator row, and no separator may appear further down.
fn repair_tables(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut row_in_table = 0usize;

    for line in input.lines() {
        if !is_table_row(line) {
            row_in_table = 0;
            out.push(line.to_string());
            continue;
        }

        row_in_table += 1;
        let separator = is_separator_row(line);

        match (row_in_table, separator) {
            (1, true) => {
                // Separator without a header row; drop it.
                row_in_table = 0;
            }
            (2, false) => {
                let columns = line.trim().matches('|').count().saturating_sub(1).max(1);
                let mut sep = String::from("|");
                for _ in 0..columns {
                    sep.push_str(" --- |");
                }
                out.push(sep);
                out.push(line.to_string());
                row_in_table = 3;
            }
            (n, true) if n > 2 => {}
            _ => out.push(line.to_string()),
        }
    }

    out.join("\n")
}

// ── Images ───────────────────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
    "placehold.it",
];

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    !(u.starts_with("http://") || u.starts_with("https://"))
        || PLACEHOLDER_HOSTS.iter().any(|h| u.contains(h))
}

/// The model sees a raster page, so any image link it writes is invented.
/// Keep real absolute URLs, turn the rest into an italic caption.
fn remove_placeholder_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_url(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}
