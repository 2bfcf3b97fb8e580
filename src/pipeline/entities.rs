//! Named-entity extraction.
//!
//! Two modes share one per-call path:
//!
//! - **single**: one call over the first `entity_char_budget` characters
//! - **chunked**: the whole text split into `chunk_chars` pieces, one call
//!   per chunk (at most `concurrency` in flight), results concatenated in
//!   chunk order
//!
//! Every call goes through [`retry_rate_limited`], so a `429` is waited out
//! instead of surfacing. Model answers come in several shapes and are
//! normalised once, by [`EntityPayload`], before anything else sees them.

use crate::config::{ChunkFailurePolicy, EntityMode, ExtractionConfig};
use crate::error::{DocStructError, StageError};
use crate::model::{ModelClient, ModelRequest};
use crate::pipeline::postprocess::parse_json_response;
use crate::pipeline::{malformed, retry_failure};
use crate::progress::{ExtractionProgressCallback, Stage};
use crate::prompts::{entity_prompt, truncate_chars};
use crate::record::{Entity, TextChunk};
use crate::retry::{retry_rate_limited, Deadline, RetryPolicy};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ── Response normalisation ───────────────────────────────────────────────

/// The shapes an entity answer arrives in.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPayload {
    /// `{"entities": [...]}`
    Wrapped(Vec<Value>),
    /// `[...]`
    List(Vec<Value>),
    /// Any other non-empty object, taken as one entity.
    Single(Map<String, Value>),
    /// `{}`, scalars, null.
    Empty,
}

impl EntityPayload {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => match map.remove("entities") {
                Some(Value::Array(items)) => EntityPayload::Wrapped(items),
                Some(Value::Object(single)) if !single.is_empty() => EntityPayload::Single(single),
                Some(_) => EntityPayload::Empty,
                None if map.is_empty() => EntityPayload::Empty,
                None => EntityPayload::Single(map),
            },
            Value::Array(items) => EntityPayload::List(items),
            _ => EntityPayload::Empty,
        }
    }

    pub fn into_entities(self) -> Vec<Entity> {
        match self {
            EntityPayload::Wrapped(items) | EntityPayload::List(items) => {
                items.iter().map(Entity::from_value).collect()
            }
            EntityPayload::Single(map) => vec![Entity::from_value(&Value::Object(map))],
            EntityPayload::Empty => Vec::new(),
        }
    }
}

/// Parse a raw entity answer. Malformed JSON is an error.
pub fn normalize_response(raw: &str) -> Result<Vec<Entity>, StageError> {
    let value = parse_json_response(raw).map_err(|e| malformed(Stage::Entities, e))?;
    Ok(EntityPayload::from_value(value).into_entities())
}

/// Parse a raw entity answer, treating malformed JSON as "no entities".
pub fn parse_entities(raw: &str) -> Vec<Entity> {
    normalize_response(raw).unwrap_or_default()
}

// ── Chunking and de-duplication ──────────────────────────────────────────

/// Split `text` into pieces of at most `chunk_chars` characters.
///
/// Boundaries fall on character counts only; sentences may be cut.
pub fn chunk_text(text: &str, chunk_chars: usize) -> Vec<TextChunk> {
    let size = chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let piece = truncate_chars(rest, size);
        chunks.push(TextChunk {
            index: chunks.len(),
            text: piece.to_string(),
        });
        rest = &rest[piece.len()..];
    }

    chunks
}

/// Drop repeated `(text, label)` pairs, keeping the first occurrence.
pub fn dedup_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::with_capacity(entities.len());
    entities
        .into_iter()
        .filter(|e| seen.insert((e.text.clone(), e.label.clone())))
        .collect()
}

// ── Extractor ────────────────────────────────────────────────────────────

/// Entities found plus the stage errors met along the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityOutcome {
    pub entities: Vec<Entity>,
    pub errors: Vec<StageError>,
}

enum ChunkOutcome {
    Parsed(Vec<Entity>),
    Malformed(StageError),
    Failed(StageError),
}

/// Entity extractor bound to a model client and the run's settings.
#[derive(Clone)]
pub struct EntityExtractor {
    client: Arc<dyn ModelClient>,
    model: String,
    char_budget: usize,
    chunk_chars: usize,
    concurrency: usize,
    chunk_failure: ChunkFailurePolicy,
    dedup: bool,
    retry: RetryPolicy,
}

impl EntityExtractor {
    pub fn new(client: Arc<dyn ModelClient>, config: &ExtractionConfig) -> Self {
        Self {
            client,
            model: config.text_model.clone(),
            char_budget: config.entity_char_budget,
            chunk_chars: config.chunk_chars,
            concurrency: config.concurrency,
            chunk_failure: config.chunk_failure,
            dedup: config.dedup_entities,
            retry: config.retry.clone(),
        }
    }

    pub fn with_chunk_failure(mut self, policy: ChunkFailurePolicy) -> Self {
        self.chunk_failure = policy;
        self
    }

    /// Run the configured mode. Only chunked extraction with the `Abort`
    /// policy can fail.
    pub async fn extract(
        &self,
        mode: EntityMode,
        text: &str,
        deadline: Deadline,
        progress: &dyn ExtractionProgressCallback,
    ) -> Result<EntityOutcome, DocStructError> {
        let mut outcome = match mode {
            EntityMode::Single => self.extract_single(text, deadline, progress).await,
            EntityMode::Chunked => self.extract_chunked(text, deadline, progress).await?,
        };
        if self.dedup {
            let before = outcome.entities.len();
            outcome.entities = dedup_entities(outcome.entities);
            debug!("Dedup removed {} entities", before - outcome.entities.len());
        }
        Ok(outcome)
    }

    /// One call over the first `char_budget` characters. Never fails.
    pub async fn extract_single(
        &self,
        text: &str,
        deadline: Deadline,
        progress: &dyn ExtractionProgressCallback,
    ) -> EntityOutcome {
        if text.trim().is_empty() {
            return EntityOutcome::default();
        }

        let input = truncate_chars(text, self.char_budget);
        if input.len() < text.len() {
            debug!(
                "Entity input truncated to {} of {} chars",
                self.char_budget,
                text.chars().count()
            );
        }

        let outcome = self.call(input, "entities", deadline).await;
        progress.on_item_complete(Stage::Entities, 0, 1);

        match outcome {
            ChunkOutcome::Parsed(entities) => EntityOutcome {
                entities,
                errors: Vec::new(),
            },
            ChunkOutcome::Malformed(err) | ChunkOutcome::Failed(err) => {
                warn!("{}", err);
                progress.on_stage_error(Stage::Entities, &err.to_string());
                EntityOutcome {
                    entities: Vec::new(),
                    errors: vec![err],
                }
            }
        }
    }

    /// Chunked extraction over the whole text.
    ///
    /// A chunk whose call fails for good is skipped or aborts the run,
    /// depending on the chunk failure policy. Malformed answers never abort.
    pub async fn extract_chunked(
        &self,
        text: &str,
        deadline: Deadline,
        progress: &dyn ExtractionProgressCallback,
    ) -> Result<EntityOutcome, DocStructError> {
        let chunks = chunk_text(text, self.chunk_chars);
        let total = chunks.len();
        if total == 0 {
            return Ok(EntityOutcome::default());
        }
        info!("Extracting entities from {} chunks", total);

        let policy = self.chunk_failure;
        let results: Vec<(usize, ChunkOutcome)> = stream::iter(chunks)
            .map(|chunk| async move {
                let label = format!("chunk {}/{}", chunk.index + 1, total);
                let outcome = self.call(&chunk.text, &label, deadline).await;
                progress.on_item_complete(Stage::Entities, chunk.index, total);

                match outcome {
                    ChunkOutcome::Failed(err) if policy == ChunkFailurePolicy::Abort => {
                        Err(DocStructError::EntityExtractionAborted {
                            chunk: chunk.index + 1,
                            total,
                            detail: err.to_string(),
                        })
                    }
                    other => Ok((chunk.index, other)),
                }
            })
            .buffered(self.concurrency.max(1))
            .try_collect()
            .await?;

        let mut outcome = EntityOutcome::default();
        for (index, result) in results {
            match result {
                ChunkOutcome::Parsed(entities) => {
                    debug!("Chunk {}/{}: {} entities", index + 1, total, entities.len());
                    outcome.entities.extend(entities);
                }
                ChunkOutcome::Malformed(err) | ChunkOutcome::Failed(err) => {
                    warn!("Chunk {}/{} skipped: {}", index + 1, total, err);
                    progress.on_stage_error(Stage::Entities, &err.to_string());
                    outcome.errors.push(err);
                }
            }
        }
        Ok(outcome)
    }

    async fn call(&self, text: &str, label: &str, deadline: Deadline) -> ChunkOutcome {
        let request = ModelRequest::text(&self.model, entity_prompt(text)).json();
        let result = retry_rate_limited(&self.retry, deadline, label, || {
            self.client.complete(request.clone())
        })
        .await;

        match result {
            Ok(response) => match normalize_response(&response.content) {
                Ok(entities) => ChunkOutcome::Parsed(entities),
                Err(err) => ChunkOutcome::Malformed(err),
            },
            Err(err) => ChunkOutcome::Failed(retry_failure(Stage::Entities, &err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelError, ModelResponse};
    use crate::progress::NoopProgressCallback;
    use crate::record::EntityLabel;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Answers requests from a fixed script, in call order.
    struct Scripted {
        replies: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(ModelResponse::new))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for Scripted {
        async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
            assert!(request.json, "entity requests ask for JSON");
            self.prompts.lock().unwrap().push(request.prompt);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelResponse::new("{\"entities\": []}")))
        }
    }

    fn rate_limited(secs: u64) -> ModelError {
        ModelError::RateLimited {
            retry_after: Some(Duration::from_secs(secs)),
            message: "429 Too Many Requests".into(),
        }
    }

    fn extractor(client: Arc<Scripted>, config: ExtractionConfig) -> EntityExtractor {
        EntityExtractor::new(client, &config)
    }

    #[test]
    fn wrapped_response() {
        let got = parse_entities(r#"{"entities":[{"text":"Apple","label":"ORGANIZATION"}]}"#);
        assert_eq!(got, vec![Entity::new("Apple", EntityLabel::Organization)]);
    }

    #[test]
    fn bare_array_response() {
        let got = parse_entities(r#"[{"text":"X","label":"Y"}]"#);
        assert_eq!(got, vec![Entity::new("X", "Y")]);
        assert_eq!(
            serde_json::to_value(&got).unwrap(),
            json!([{"text": "X", "label": "Y"}])
        );
    }

    #[test]
    fn single_object_response() {
        let got = parse_entities(r#"{"text":"Kerala","label":"LOCATION"}"#);
        assert_eq!(got, vec![Entity::new("Kerala", EntityLabel::Location)]);
    }

    #[test]
    fn malformed_and_empty_responses() {
        assert!(parse_entities("this is not json").is_empty());
        assert!(parse_entities("{}").is_empty());
        assert!(parse_entities("42").is_empty());
        assert!(parse_entities(r#"{"entities": "none"}"#).is_empty());
        assert!(matches!(
            normalize_response("oops"),
            Err(StageError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn chunking_by_characters() {
        let chunks = chunk_text("abcdefghij", 4);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "efgh", "ij"]);
        assert_eq!(chunks[2].index, 2);
        assert!(chunk_text("", 4).is_empty());
        assert_eq!(chunk_text("ಕರ್ನಾಟಕ", 3).len(), 3);
    }

    #[test]
    fn dedup_keeps_first_by_text_and_label() {
        let got = dedup_entities(vec![
            Entity::new("Kerala", EntityLabel::Location),
            Entity::new("Kerala", EntityLabel::Organization),
            Entity::new("Kerala", EntityLabel::Location),
        ]);
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].label, EntityLabel::Organization);
    }

    #[tokio::test]
    async fn single_mode_truncates_to_budget() {
        let client = Scripted::new(vec![Ok(r#"{"entities":[{"text":"a","label":"OTHER"}]}"#)]);
        let config = ExtractionConfig::builder().entity_char_budget(5).build().unwrap();
        let ex = extractor(client.clone(), config);

        let out = ex
            .extract_single("0123456789", Deadline::none(), &NoopProgressCallback)
            .await;
        assert_eq!(out.entities.len(), 1);
        assert!(client.prompts.lock().unwrap()[0].ends_with("01234"));
    }

    #[tokio::test]
    async fn single_mode_swallows_failures() {
        let client = Scripted::new(vec![Err(ModelError::Status {
            status: 500,
            message: "down".into(),
        })]);
        let ex = extractor(client, ExtractionConfig::default());
        let out = ex
            .extract_single("Bangalore", Deadline::none(), &NoopProgressCallback)
            .await;
        assert!(out.entities.is_empty());
        assert!(matches!(out.errors[0], StageError::Transport { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_chunk_waits_then_succeeds() {
        let client = Scripted::new(vec![
            Err(rate_limited(2)),
            Err(rate_limited(1)),
            Ok(r#"{"entities":[{"text":"Apple","label":"ORGANIZATION"}]}"#),
        ]);
        let ex = extractor(client, ExtractionConfig::default());

        let start = Instant::now();
        let out = ex
            .extract_chunked("Apple opened an office.", Deadline::none(), &NoopProgressCallback)
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(out.entities, vec![Entity::new("Apple", EntityLabel::Organization)]);
        assert!(out.errors.is_empty());
    }

    #[tokio::test]
    async fn skip_policy_continues_past_failed_chunk() {
        let client = Scripted::new(vec![
            Ok(r#"[{"text":"A","label":"PERSON"}]"#),
            Err(ModelError::Status {
                status: 500,
                message: "boom".into(),
            }),
            Ok(r#"[{"text":"C","label":"DATE"}]"#),
        ]);
        let config = ExtractionConfig::builder()
            .chunk_chars(3)
            .concurrency(1)
            .build()
            .unwrap();
        let ex = extractor(client, config);

        let out = ex
            .extract_chunked("aaabbbccc", Deadline::none(), &NoopProgressCallback)
            .await
            .unwrap();
        let texts: Vec<&str> = out.entities.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "C"]);
        assert_eq!(out.errors.len(), 1);
    }

    #[tokio::test]
    async fn abort_policy_fails_the_run() {
        let client = Scripted::new(vec![
            Ok("[]"),
            Err(ModelError::Transport("connection reset".into())),
        ]);
        let config = ExtractionConfig::builder()
            .chunk_chars(3)
            .concurrency(1)
            .chunk_failure(ChunkFailurePolicy::Abort)
            .build()
            .unwrap();
        let ex = extractor(client, config);

        let err = ex
            .extract_chunked("aaabbbccc", Deadline::none(), &NoopProgressCallback)
            .await
            .unwrap_err();
        match err {
            DocStructError::EntityExtractionAborted { chunk, total, .. } => {
                assert_eq!((chunk, total), (2, 3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_chunk_never_aborts() {
        let client = Scripted::new(vec![Ok("definitely not json")]);
        let config = ExtractionConfig::builder()
            .chunk_failure(ChunkFailurePolicy::Abort)
            .build()
            .unwrap();
        let ex = extractor(client, config);
        let out = ex
            .extract_chunked("short text", Deadline::none(), &NoopProgressCallback)
            .await
            .unwrap();
        assert!(out.entities.is_empty());
        assert!(matches!(out.errors[0], StageError::MalformedResponse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_endless_rate_limits() {
        let client = Scripted::new((0..50).map(|_| Err(rate_limited(5))).collect());
        let config = ExtractionConfig::builder()
            .retry(RetryPolicy::unbounded())
            .build()
            .unwrap();
        let ex = extractor(client, config);

        let out = ex
            .extract_single(
                "Delhi",
                Deadline::after(Duration::from_secs(12)),
                &NoopProgressCallback,
            )
            .await;
        assert!(out.entities.is_empty());
        assert!(matches!(out.errors[0], StageError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn extract_dispatches_and_dedups() {
        let client = Scripted::new(vec![Ok(
            r#"{"entities":[{"text":"Goa","label":"LOCATION"},{"text":"Goa","label":"LOCATION"}]}"#,
        )]);
        let config = ExtractionConfig::builder().dedup_entities(true).build().unwrap();
        let ex = extractor(client, config);
        let out = ex
            .extract(EntityMode::Single, "Goa", Deadline::none(), &NoopProgressCallback)
            .await
            .unwrap();
        assert_eq!(out.entities.len(), 1);
    }
}
