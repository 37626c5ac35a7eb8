//! The knowledge store contract.
//!
//! Anything that can keep topics, capsules, relationships and insights and
//! answer these query shapes can back the engine. `kh-store` provides the
//! SQLite implementation; `MemoryStore` keeps everything in process.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_QUERY_LIMIT;
use crate::error::{CoreError, Result};
use crate::model::{
    Capsule, DomainSubgraph, Insight, Overview, Relationship, SourceRecord, Topic, new_id,
};
use crate::time::{normalize_iso8601, now_iso8601};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicQuery {
    pub domain: Option<String>,
    pub limit: usize,
}

impl Default for TopicQuery {
    fn default() -> Self {
        Self {
            domain: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl TopicQuery {
    pub fn newest(limit: usize) -> Self {
        Self {
            domain: None,
            limit,
        }
    }

    pub fn in_domain(domain: &str, limit: usize) -> Self {
        Self {
            domain: Some(domain.to_string()),
            limit,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapsuleQuery {
    pub domain: Option<String>,
    pub source: Option<String>,
    pub limit: usize,
}

impl Default for CapsuleQuery {
    fn default() -> Self {
        Self {
            domain: None,
            source: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

/// A change recorded against a topic. History tracking is not implemented by
/// the bundled stores, which always report an empty history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicEvent {
    pub topic_id: String,
    pub description: String,
    pub timestamp: String,
}

/// Durable record keeper for the knowledge graph.
///
/// Every call is atomic on its own; no multi-call transactions are assumed.
/// Writes are inserts, apart from the `updated_at`/metadata refresh when a
/// topic id is added twice.
pub trait KnowledgeStore {
    /// Insert a topic, minting an id and timestamps when missing. Fails with
    /// `CoreError::Validation` on a blank title.
    fn add_topic(&mut self, topic: Topic) -> Result<Topic>;

    fn get_topic(&self, id: &str) -> Result<Option<Topic>>;

    /// Newest first by `created_at`, optionally restricted to one domain.
    fn query_topics(&self, query: &TopicQuery) -> Result<Vec<Topic>>;

    /// Ids of every topic reported by `salon_id`.
    fn topic_ids_for_source(&self, salon_id: &str) -> Result<HashSet<String>>;

    fn add_capsule(&mut self, capsule: Capsule) -> Result<Capsule>;

    fn get_capsule(&self, id: &str) -> Result<Option<Capsule>>;

    fn query_capsules(&self, query: &CapsuleQuery) -> Result<Vec<Capsule>>;

    fn add_relationship(&mut self, relationship: Relationship) -> Result<()>;

    /// Topics joined to `topic_id` by a topic-to-topic edge in either direction.
    fn get_related_topics(&self, topic_id: &str) -> Result<Vec<Topic>>;

    fn add_insight(&mut self, insight: Insight) -> Result<Insight>;

    fn query_insights(&self, insight_type: Option<&str>, limit: usize) -> Result<Vec<Insight>>;

    fn get_overview(&self) -> Result<Overview>;

    fn get_domain_subgraph(&self, domain: &str) -> Result<DomainSubgraph>;

    fn get_topic_history(&self, _topic_id: &str) -> Result<Vec<TopicEvent>> {
        Ok(Vec::new())
    }

    /// Record the latest connection attempt for a source, replacing any
    /// previous record for the same salon.
    fn record_source(&mut self, record: SourceRecord) -> Result<()>;

    fn list_sources(&self) -> Result<Vec<SourceRecord>>;
}

/// Look up each distinct id once, in first-seen order. Ids that do not
/// resolve are dropped.
pub fn resolve_topics<S: KnowledgeStore + ?Sized>(store: &S, ids: &[String]) -> Result<Vec<Topic>> {
    let mut seen = HashSet::new();
    let mut topics = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        if let Some(topic) = store.get_topic(id)? {
            topics.push(topic);
        }
    }
    Ok(topics)
}

/// Sort `(domain, count)` pairs count-descending, name-ascending on ties.
pub fn sort_distribution(distribution: &mut [(String, usize)]) {
    distribution.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

fn dedup_in_order(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}

fn check_unit_interval(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "{what} must be within [0, 1], got {value}"
        )))
    }
}

/// Validate a topic and fill in its id and timestamps. Timestamps are stored
/// in canonical UTC form; an unparseable `created_at` becomes now.
pub fn prepare_topic(mut topic: Topic) -> Result<Topic> {
    if topic.title.trim().is_empty() {
        return Err(CoreError::Validation("topic title is required".into()));
    }
    if topic.id.trim().is_empty() {
        topic.id = new_id();
    }
    topic.created_at = normalize_iso8601(&topic.created_at).unwrap_or_else(now_iso8601);
    topic.updated_at =
        normalize_iso8601(&topic.updated_at).unwrap_or_else(|| topic.created_at.clone());
    Ok(topic)
}

pub fn prepare_capsule(mut capsule: Capsule) -> Result<Capsule> {
    if capsule.title.trim().is_empty() {
        return Err(CoreError::Validation("capsule title is required".into()));
    }
    check_unit_interval("capsule score", capsule.score)?;
    if capsule.id.trim().is_empty() {
        capsule.id = new_id();
    }
    capsule.created_at = normalize_iso8601(&capsule.created_at).unwrap_or_else(now_iso8601);
    Ok(capsule)
}

pub fn prepare_relationship(mut rel: Relationship) -> Result<Relationship> {
    if rel.source_id.trim().is_empty() || rel.target_id.trim().is_empty() {
        return Err(CoreError::Validation(
            "relationship endpoints are required".into(),
        ));
    }
    if rel.relationship_type.trim().is_empty() {
        return Err(CoreError::Validation(
            "relationship type is required".into(),
        ));
    }
    check_unit_interval("relationship strength", rel.strength)?;
    if rel.id.trim().is_empty() {
        rel.id = new_id();
    }
    if rel.created_at.is_empty() {
        rel.created_at = now_iso8601();
    }
    Ok(rel)
}

pub fn prepare_insight(mut insight: Insight) -> Result<Insight> {
    if insight.insight_type.trim().is_empty() {
        return Err(CoreError::Validation("insight type is required".into()));
    }
    if insight.id.trim().is_empty() {
        insight.id = new_id();
    }
    if insight.created_at.is_empty() {
        insight.created_at = now_iso8601();
    }
    dedup_in_order(&mut insight.source_topic_ids);
    dedup_in_order(&mut insight.common_keywords);
    Ok(insight)
}
