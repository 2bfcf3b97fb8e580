//! Data model shared by every stage: documents, images, entities and the
//! final structured record.
//!
//! The record is deliberately loose. Whatever the structurer returns is kept
//! as a JSON mapping; typed views such as [`StructuredRecord::key_statistics`]
//! read it leniently and fall back to `"N/A"` or empty containers instead of
//! failing on a field the model left out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Placeholder for record fields the model left out.
pub const NOT_AVAILABLE: &str = "N/A";

/// Top-level keys the record recognises.
pub mod keys {
    pub const SUMMARY: &str = "summary";
    pub const DOCUMENT_TYPE: &str = "document_type";
    pub const EDUCATION_LEVELS: &str = "education_levels";
    pub const STATES_MENTIONED: &str = "states_mentioned";
    pub const ORGANIZATIONS: &str = "organizations";
    pub const KEY_STATISTICS: &str = "key_statistics";
    pub const POLICIES_SCHEMES: &str = "policies_schemes";
    pub const TABLES: &str = "tables";
    pub const KEY_DATES: &str = "key_dates";
    pub const BUDGET_FINANCIALS: &str = "budget_financials";
    pub const NAMED_ENTITIES: &str = "named_entities";
    pub const ENTITIES_BY_TYPE: &str = "entities_by_type";
    /// Holds non-mapping structurer output.
    pub const RAW_DATA: &str = "raw_data";
}

// ── Documents and images ─────────────────────────────────────────────────

/// Whether a document carries machine-readable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Digital,
    Scanned,
}

impl DocumentKind {
    /// Classify from the number of characters found on the sampled pages.
    ///
    /// Strictly more than `threshold` characters means digital: with the
    /// default threshold of 50, 51 characters is digital and 50 is scanned.
    pub fn classify(sampled_chars: usize, threshold: usize) -> Self {
        if sampled_chars > threshold {
            DocumentKind::Digital
        } else {
            DocumentKind::Scanned
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Digital => f.write_str("digital"),
            DocumentKind::Scanned => f.write_str("scanned"),
        }
    }
}

/// A source document for one run. Its `kind` is decided once at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub page_count: usize,
}

/// An embedded raster image pulled out of a page.
///
/// Images live only for the duration of a run; `path` points into the run's
/// image directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    /// 0-based page index.
    pub page_index: usize,
    /// 0-based index of the image within its page.
    pub image_index: usize,
    /// Where the image was written.
    pub path: PathBuf,
    /// PNG-encoded bytes.
    pub data: Vec<u8>,
}

impl ExtractedImage {
    /// File name used for the image, keyed by page and image index.
    pub fn file_name(page_index: usize, image_index: usize) -> String {
        format!("page_{}_img_{}.png", page_index + 1, image_index)
    }

    /// Identifier used when the image's description is added to the context.
    pub fn identifier(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| Self::file_name(self.page_index, self.image_index))
    }
}

/// A contiguous slice of the assembled context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 0-based position in the chunk sequence.
    pub index: usize,
    pub text: String,
}

// ── Entities ─────────────────────────────────────────────────────────────

/// Entity label as emitted by the model.
///
/// Labels are never validated; anything outside the suggested set is kept
/// verbatim as [`EntityLabel::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityLabel {
    Organization,
    Location,
    Person,
    Date,
    PolicyScheme,
    EducationTerm,
    Other,
    Unknown(String),
}

impl EntityLabel {
    pub fn as_str(&self) -> &str {
        match self {
            EntityLabel::Organization => "ORGANIZATION",
            EntityLabel::Location => "LOCATION",
            EntityLabel::Person => "PERSON",
            EntityLabel::Date => "DATE",
            EntityLabel::PolicyScheme => "POLICY_SCHEME",
            EntityLabel::EducationTerm => "EDUCATION_TERM",
            EntityLabel::Other => "OTHER",
            EntityLabel::Unknown(s) => s,
        }
    }
}

impl Default for EntityLabel {
    fn default() -> Self {
        EntityLabel::Unknown(String::new())
    }
}

impl From<String> for EntityLabel {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORGANIZATION" => EntityLabel::Organization,
            "LOCATION" => EntityLabel::Location,
            "PERSON" => EntityLabel::Person,
            "DATE" => EntityLabel::Date,
            "POLICY_SCHEME" => EntityLabel::PolicyScheme,
            "EDUCATION_TERM" => EntityLabel::EducationTerm,
            "OTHER" => EntityLabel::Other,
            _ => EntityLabel::Unknown(s),
        }
    }
}

impl From<&str> for EntityLabel {
    fn from(s: &str) -> Self {
        EntityLabel::from(s.to_string())
    }
}

impl From<EntityLabel> for String {
    fn from(label: EntityLabel) -> Self {
        match label {
            EntityLabel::Unknown(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named entity. Both fields are always present; missing ones are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub label: EntityLabel,
}

impl Entity {
    pub fn new(text: impl Into<String>, label: impl Into<EntityLabel>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }

    /// Build an entity from one element of a model response.
    ///
    /// Objects contribute their `text` and `label` fields; a bare string is
    /// taken as the entity text with an empty label.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Entity {
                text: lenient_string(map.get("text")).unwrap_or_default(),
                label: lenient_string(map.get("label"))
                    .map(EntityLabel::from)
                    .unwrap_or_default(),
            },
            Value::String(s) => Entity::new(s.clone(), EntityLabel::default()),
            Value::Null => Entity::default(),
            other => Entity::new(other.to_string(), EntityLabel::default()),
        }
    }
}

/// Entity texts grouped into fixed semantic buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBuckets {
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub persons: Vec<String>,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub other: Vec<String>,
}

impl EntityBuckets {
    /// Total number of texts across all buckets.
    pub fn len(&self) -> usize {
        self.organizations.len()
            + self.locations.len()
            + self.persons.len()
            + self.dates.len()
            + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Structured record ────────────────────────────────────────────────────

/// The final output of a run: always a JSON mapping, never null or a bare
/// scalar. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredRecord(Map<String, Value>);

impl StructuredRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap arbitrary model output into a record.
    ///
    /// Mappings are taken as-is, `null` becomes an empty record, and any other
    /// value is kept under [`keys::RAW_DATA`].
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Null => Self::default(),
            other => {
                let mut map = Map::new();
                map.insert(keys::RAW_DATA.to_string(), other);
                Self(map)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Attach the entity list and its buckets. No-op when `entities` is empty,
    /// so a record never carries empty entity keys.
    pub fn attach_entities(&mut self, entities: &[Entity], buckets: &EntityBuckets) {
        if entities.is_empty() {
            return;
        }
        if let Ok(list) = serde_json::to_value(entities) {
            self.0.insert(keys::NAMED_ENTITIES.to_string(), list);
        }
        if let Ok(grouped) = serde_json::to_value(buckets) {
            self.0.insert(keys::ENTITIES_BY_TYPE.to_string(), grouped);
        }
    }

    pub fn summary(&self) -> Option<&str> {
        self.get(keys::SUMMARY).and_then(Value::as_str)
    }

    pub fn document_type(&self) -> Option<&str> {
        self.get(keys::DOCUMENT_TYPE).and_then(Value::as_str)
    }

    pub fn education_levels(&self) -> Vec<String> {
        string_list(self.get(keys::EDUCATION_LEVELS))
    }

    pub fn states_mentioned(&self) -> Vec<String> {
        string_list(self.get(keys::STATES_MENTIONED))
    }

    pub fn organizations(&self) -> Vec<String> {
        string_list(self.get(keys::ORGANIZATIONS))
    }

    pub fn key_dates(&self) -> Vec<String> {
        string_list(self.get(keys::KEY_DATES))
    }

    pub fn key_statistics(&self) -> Vec<StatisticEntry> {
        object_list(self.get(keys::KEY_STATISTICS))
            .map(|m| StatisticEntry {
                metric: text_or_na(m.get("metric")),
                value: text_or_na(m.get("value")),
                context: text_or_na(m.get("context")),
            })
            .collect()
    }

    pub fn policies_schemes(&self) -> Vec<PolicyEntry> {
        object_list(self.get(keys::POLICIES_SCHEMES))
            .map(|m| PolicyEntry {
                name: text_or_na(m.get("name")),
                description: text_or_na(m.get("description")),
                target_audience: text_or_na(m.get("target_audience")),
            })
            .collect()
    }

    pub fn tables(&self) -> Vec<TableEntry> {
        object_list(self.get(keys::TABLES))
            .map(|m| TableEntry {
                title: text_or_na(m.get("title")),
                data: TableData::from_value(m.get("data")),
            })
            .collect()
    }

    pub fn budget_financials(&self) -> Option<BudgetFinancials> {
        let m = self.get(keys::BUDGET_FINANCIALS)?.as_object()?;
        Some(BudgetFinancials {
            total_budget: text_or_na(m.get("total_budget")),
            currency: text_or_na(m.get("currency")),
            breakdown: BudgetLine::list_from_value(m.get("breakdown")),
        })
    }

    /// Entities attached by the pipeline, if any.
    pub fn named_entities(&self) -> Vec<Entity> {
        match self.get(keys::NAMED_ENTITIES) {
            Some(Value::Array(items)) => items.iter().map(Entity::from_value).collect(),
            _ => Vec::new(),
        }
    }

    pub fn entities_by_type(&self) -> Option<EntityBuckets> {
        self.get(keys::ENTITIES_BY_TYPE)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl From<StructuredRecord> for Value {
    fn from(record: StructuredRecord) -> Self {
        record.into_value()
    }
}

/// One entry of `key_statistics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticEntry {
    pub metric: String,
    pub value: String,
    pub context: String,
}

/// One entry of `policies_schemes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyEntry {
    pub name: String,
    pub description: String,
    pub target_audience: String,
}

/// One entry of `tables`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableEntry {
    pub title: String,
    pub data: TableData,
}

/// Table body. Models emit either a list of rows or a block of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TableData {
    Rows(Vec<Vec<String>>),
    Text(String),
    Empty,
}

impl TableData {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Array(rows)) if !rows.is_empty() => TableData::Rows(table_rows(rows)),
            Some(Value::String(s)) if !s.trim().is_empty() => TableData::Text(s.clone()),
            _ => TableData::Empty,
        }
    }
}

/// Rows as cell lists. Object rows share a leading header row built from
/// their keys in first-seen order; cells follow that header.
fn table_rows(rows: &[Value]) -> Vec<Vec<String>> {
    let mut header: Vec<&str> = Vec::new();
    for map in rows.iter().filter_map(Value::as_object) {
        for key in map.keys() {
            if !header.contains(&key.as_str()) {
                header.push(key.as_str());
            }
        }
    }

    let mut out = Vec::with_capacity(rows.len() + 1);
    if !header.is_empty() {
        out.push(header.iter().map(|k| k.to_string()).collect());
    }
    for row in rows {
        out.push(match row {
            Value::Array(cells) => cells.iter().map(|c| text_or_na(Some(c))).collect(),
            Value::Object(map) => header.iter().map(|k| text_or_na(map.get(*k))).collect(),
            scalar => vec![text_or_na(Some(scalar))],
        });
    }
    out
}

/// `budget_financials` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetFinancials {
    pub total_budget: String,
    pub currency: String,
    pub breakdown: Vec<BudgetLine>,
}

/// One line of a budget breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetLine {
    pub item: String,
    pub amount: String,
}

impl BudgetLine {
    /// Breakdowns come as `{"item": amount}` maps or as lists of objects.
    fn list_from_value(value: Option<&Value>) -> Vec<BudgetLine> {
        match value {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| BudgetLine {
                    item: k.clone(),
                    amount: text_or_na(Some(v)),
                })
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Object(m) => BudgetLine {
                        item: text_or_na(
                            m.get("item")
                                .or_else(|| m.get("category"))
                                .or_else(|| m.get("name")),
                        ),
                        amount: text_or_na(m.get("amount").or_else(|| m.get("value"))),
                    },
                    other => BudgetLine {
                        item: text_or_na(Some(other)),
                        amount: NOT_AVAILABLE.to_string(),
                    },
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ── Lenient JSON readers ─────────────────────────────────────────────────

/// String form of a scalar; `None` for null or missing.
fn lenient_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn text_or_na(value: Option<&Value>) -> String {
    match lenient_string(value) {
        Some(s) if !s.trim().is_empty() => s,
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| lenient_string(Some(v)))
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn object_list(value: Option<&Value>) -> impl Iterator<Item = &Map<String, Value>> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}
