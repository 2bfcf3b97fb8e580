//! Structuring: free text → schema-conformant JSON record.
//!
//! One call, no retry. Any failure (transport, refusal, prose instead of
//! JSON) yields an empty record; the orchestrator merges whatever the other
//! stages produced on top of it.

use crate::error::StageError;
use crate::model::{ModelClient, ModelRequest};
use crate::pipeline::postprocess::parse_json_response;
use crate::pipeline::{malformed, model_failure};
use crate::progress::Stage;
use crate::prompts::{structure_prompt, truncate_chars};
use crate::record::StructuredRecord;
use tracing::{debug, warn};

/// Turn a raw structurer answer into a record.
///
/// Non-mapping JSON is wrapped (see [`StructuredRecord::from_value`]);
/// unparseable text is an error.
pub fn parse_record(raw: &str) -> Result<StructuredRecord, StageError> {
    parse_json_response(raw)
        .map(StructuredRecord::from_value)
        .map_err(|e| malformed(Stage::Structure, e))
}

/// Structure `text` against `schema`, truncating to `char_budget` characters.
///
/// Returns the record (empty on failure) and the error, if any.
pub async fn structure(
    client: &dyn ModelClient,
    model: &str,
    text: &str,
    schema: &str,
    char_budget: usize,
) -> (StructuredRecord, Option<StageError>) {
    let input = truncate_chars(text, char_budget);
    debug!(
        "Structuring {} chars against a {}-char schema",
        input.len(),
        schema.len()
    );

    let request = ModelRequest::text(model, structure_prompt(schema, input)).json();
    let result = match client.complete(request).await {
        Ok(response) => parse_record(&response.content),
        Err(e) => Err(model_failure(Stage::Structure, &e)),
    };

    match result {
        Ok(record) => (record, None),
        Err(err) => {
            warn!("{}", err);
            (StructuredRecord::new(), Some(err))
        }
    }
}
