//! Entity bucketing by label keywords.
//!
//! Labels come from the model and are never validated, so bucketing is a
//! case-insensitive substring match against fixed keyword lists. The first
//! bucket that matches wins, in the order organizations, locations, persons,
//! dates; everything else lands in `other`.

use crate::record::{Entity, EntityBuckets};

const ORGANIZATION_KEYWORDS: &[&str] = &["org", "organization", "institution", "company"];
const LOCATION_KEYWORDS: &[&str] = &["loc", "location", "place", "state", "city", "country"];
const PERSON_KEYWORDS: &[&str] = &["person", "per", "name"];
const DATE_KEYWORDS: &[&str] = &["date", "time"];

/// Bucket a label belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Organizations,
    Locations,
    Persons,
    Dates,
    Other,
}

/// Classify one label.
pub fn bucket_for(label: &str) -> Bucket {
    let label = label.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| label.contains(k));

    if matches(ORGANIZATION_KEYWORDS) {
        Bucket::Organizations
    } else if matches(LOCATION_KEYWORDS) {
        Bucket::Locations
    } else if matches(PERSON_KEYWORDS) {
        Bucket::Persons
    } else if matches(DATE_KEYWORDS) {
        Bucket::Dates
    } else {
        Bucket::Other
    }
}

/// Group entity texts by bucket. Every entity lands in exactly one bucket,
/// in input order.
pub fn categorize(entities: &[Entity]) -> EntityBuckets {
    let mut buckets = EntityBuckets::default();
    for entity in entities {
        let text = entity.text.clone();
        match bucket_for(entity.label.as_str()) {
            Bucket::Organizations => buckets.organizations.push(text),
            Bucket::Locations => buckets.locations.push(text),
            Bucket::Persons => buckets.persons.push(text),
            Bucket::Dates => buckets.dates.push(text),
            Bucket::Other => buckets.other.push(text),
        }
    }
    buckets
}
