//! Prompts for every model call the pipeline makes.
//!
//! Centralising them keeps behaviour changes to one place and lets unit
//! tests inspect prompt construction without a model.
//!
//! Callers can replace the structuring schema via
//! [`crate::config::ExtractionConfig::schema`]; everything else is fixed.

/// Prompt sent with each extracted image.
pub const IMAGE_DESCRIPTION_PROMPT: &str =
    "Describe this image in detail. If it is a chart or table, output the data in textual format.";

/// Labels suggested to the entity extractor. Models may still emit others.
pub const ENTITY_LABELS: &[&str] = &[
    "ORGANIZATION",
    "LOCATION",
    "PERSON",
    "DATE",
    "POLICY_SCHEME",
    "EDUCATION_TERM",
    "OTHER",
];

/// Built-in schema description for the structurer.
pub const DEFAULT_SCHEMA: &str = r#"{
  "summary": "2-3 sentence summary of the document",
  "document_type": "e.g. report, policy, circular, notification, statistics",
  "education_levels": ["levels mentioned, e.g. primary, secondary, higher education"],
  "states_mentioned": ["Indian states or union territories mentioned"],
  "organizations": ["organizations, ministries, boards and institutions mentioned"],
  "key_statistics": [
    {"metric": "what is measured", "value": "the number", "context": "year, region or scope"}
  ],
  "policies_schemes": [
    {"name": "policy or scheme name", "description": "what it does", "target_audience": "who it is for"}
  ],
  "tables": [
    {"title": "table title", "data": [["header 1", "header 2"], ["row 1 col 1", "row 1 col 2"]]}
  ],
  "key_dates": ["important dates and deadlines"],
  "budget_financials": {
    "total_budget": "total amount if stated",
    "currency": "currency of the amounts",
    "breakdown": {"item": "amount"}
  }
}"#;

/// System prompt for page-level layout Markdown.
pub const LAYOUT_SYSTEM_PROMPT: &str = r#"You are an expert document converter. Convert the PDF page image to clean Markdown.

1. Preserve ALL text content in reading order.
2. Use # / ## / ### for headings that match the visual hierarchy.
3. Convert tables to GFM pipe tables; keep every row and column.
4. Transcribe charts as a short table or list of their data points.
5. Ignore page numbers, repeated headers and footers.
6. Output ONLY the Markdown. No ```markdown fences, no commentary."#;

/// User prompt sent with each rasterised page.
pub const LAYOUT_USER_PROMPT: &str = "Convert this page to Markdown.";

/// Entity extraction prompt for one piece of context.
pub fn entity_prompt(text: &str) -> String {
    format!(
        "Extract named entities from the following text.\n\
         Use these labels: {labels}.\n\
         Return a JSON object of the form \
         {{\"entities\": [{{\"text\": \"entity text\", \"label\": \"LABEL\"}}]}}.\n\
         Return {{\"entities\": []}} if there are none.\n\n\
         Text:\n{text}",
        labels = ENTITY_LABELS.join(", "),
    )
}

/// Structuring prompt embedding the schema description.
pub fn structure_prompt(schema: &str, text: &str) -> String {
    format!(
        "Analyze the following document content and extract structured information.\n\
         Return a single JSON object that follows this schema. Omit nothing: \
         use empty strings, lists or objects when a field has no data.\n\n\
         Schema:\n{schema}\n\n\
         Document content:\n{text}"
    )
}

/// First `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_prompt_lists_labels_and_text() {
        let p = entity_prompt("Bangalore University");
        for label in ENTITY_LABELS {
            assert!(p.contains(label), "missing {label}");
        }
        assert!(p.contains("\"entities\""));
        assert!(p.ends_with("Bangalore University"));
    }

    #[test]
    fn structure_prompt_embeds_schema() {
        let p = structure_prompt(DEFAULT_SCHEMA, "body");
        assert!(p.contains("budget_financials"));
        assert!(p.ends_with("body"));
    }

    #[test]
    fn default_schema_is_valid_json() {
        let v: serde_json::Value = serde_json::from_str(DEFAULT_SCHEMA).unwrap();
        assert!(v.get("key_statistics").is_some());
        assert!(v.get("named_entities").is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("ಬೆಂಗಳೂರು", 2), "ಬೆ");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
