//! Records of the knowledge graph: topics, capsules, relationships, insights,
//! fusion sessions, and the updates sources report.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::UNKNOWN_DOMAIN;
use crate::error::CoreError;
use crate::time::now_iso8601;

/// Opaque key/value metadata carried by topics and capsules.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Entity type tag on either end of a relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Topic,
    Capsule,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Topic => "topic",
            EntityKind::Capsule => "capsule",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topic" => Ok(EntityKind::Topic),
            "capsule" => Ok(EntityKind::Capsule),
            other => Err(CoreError::Validation(format!("unknown entity type '{other}'"))),
        }
    }
}

/// A discussion item reported by a salon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub source_salon_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Topic {
    pub fn new(title: &str) -> Self {
        let now = now_iso8601();
        Self {
            id: new_id(),
            title: title.to_string(),
            domain: None,
            keywords: Vec::new(),
            source_salon_id: None,
            metadata: Metadata::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_source(mut self, salon_id: &str) -> Self {
        self.source_salon_id = Some(salon_id.to_string());
        self
    }

    pub fn with_created_at(mut self, ts: &str) -> Self {
        self.created_at = ts.to_string();
        self.updated_at = ts.to_string();
        self
    }

    /// Grouping bucket: the domain, or `"unknown"` when absent.
    pub fn domain_bucket(&self) -> &str {
        match self.domain.as_deref() {
            Some(d) if !d.trim().is_empty() => d,
            _ => UNKNOWN_DOMAIN,
        }
    }

    /// Authors listed under `metadata.authors`, if any.
    pub fn authors(&self) -> Vec<String> {
        authors_from(&self.metadata)
    }
}

/// A distilled, scored knowledge artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, alias = "insight")]
    pub insight_text: String,
    #[serde(default)]
    pub source_salon_id: Option<String>,
    #[serde(default)]
    pub source_topic_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub created_at: String,
}

impl Capsule {
    pub fn new(title: &str, insight_text: &str) -> Self {
        Self {
            id: new_id(),
            title: title.to_string(),
            domain: None,
            keywords: Vec::new(),
            insight_text: insight_text.to_string(),
            source_salon_id: None,
            source_topic_id: None,
            metadata: Metadata::new(),
            score: 0.0,
            created_at: now_iso8601(),
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn authors(&self) -> Vec<String> {
        authors_from(&self.metadata)
    }
}

fn authors_from(metadata: &Metadata) -> Vec<String> {
    metadata
        .get("authors")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Directed, typed, append-only edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub id: String,
    pub source_type: EntityKind,
    pub source_id: String,
    pub target_type: EntityKind,
    pub target_id: String,
    pub relationship_type: String,
    pub strength: f64,
    #[serde(default)]
    pub created_at: String,
}

impl Relationship {
    pub fn new(
        source: (EntityKind, &str),
        target: (EntityKind, &str),
        relationship_type: &str,
        strength: f64,
    ) -> Self {
        Self {
            id: new_id(),
            source_type: source.0,
            source_id: source.1.to_string(),
            target_type: target.0,
            target_id: target.1.to_string(),
            relationship_type: relationship_type.to_string(),
            strength,
            created_at: now_iso8601(),
        }
    }

    /// The id at the opposite end from `topic_id`, when that end is a topic.
    pub fn other_topic(&self, topic_id: &str) -> Option<&str> {
        if self.source_type == EntityKind::Topic
            && self.source_id == topic_id
            && self.target_type == EntityKind::Topic
        {
            Some(&self.target_id)
        } else if self.target_type == EntityKind::Topic
            && self.target_id == topic_id
            && self.source_type == EntityKind::Topic
        {
            Some(&self.source_id)
        } else {
            None
        }
    }

    pub fn touches(&self, id: &str) -> bool {
        self.source_id == id || self.target_id == id
    }
}

/// Aggregate finding over two or more topics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub insight_type: String,
    #[serde(default)]
    pub source_topic_ids: Vec<String>,
    #[serde(default)]
    pub common_keywords: Vec<String>,
    #[serde(default)]
    pub common_domain: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub created_at: String,
}

impl Insight {
    pub fn new(insight_type: &str, summary: &str) -> Self {
        Self {
            id: new_id(),
            insight_type: insight_type.to_string(),
            source_topic_ids: Vec::new(),
            common_keywords: Vec::new(),
            common_domain: None,
            summary: summary.to_string(),
            recommendations: Vec::new(),
            created_at: now_iso8601(),
        }
    }
}

/// An item a source reports during a poll.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Stable id for the resulting topic; a fresh one is minted when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub salon_id: String,
    /// Topic ids this update refers to.
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insight: Option<String>,
}

impl Update {
    /// Build the topic that records this update. `domain` comes from the
    /// active scenario's classifier.
    pub fn to_topic(&self, domain: Option<String>) -> Topic {
        let mut topic = Topic::new(&self.title);
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            topic.id = id.to_string();
        }
        topic.domain = domain;
        topic.keywords = self.keywords.clone();
        topic.source_salon_id = Some(self.salon_id.clone());
        if !self.timestamp.is_empty() {
            topic.created_at = self.timestamp.clone();
            topic.updated_at = self.timestamp.clone();
        }

        let meta = &mut topic.metadata;
        if !self.content.is_empty() {
            meta.insert("content".into(), self.content.clone().into());
        }
        if !self.topics.is_empty() {
            meta.insert("references".into(), self.topics.clone().into());
        }
        if !self.authors.is_empty() {
            meta.insert("authors".into(), self.authors.clone().into());
        }
        if let Some(conclusion) = &self.conclusion {
            meta.insert("conclusion".into(), conclusion.clone().into());
        }
        if let Some(insight) = &self.insight {
            meta.insert("insight".into(), insight.clone().into());
        }
        topic
    }
}

impl From<&Topic> for Update {
    fn from(topic: &Topic) -> Self {
        Self {
            id: Some(topic.id.clone()),
            salon_id: topic.source_salon_id.clone().unwrap_or_default(),
            topics: vec![topic.id.clone()],
            title: topic.title.clone(),
            content: topic
                .metadata
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            keywords: topic.keywords.clone(),
            domain: topic.domain.clone(),
            authors: topic.authors(),
            timestamp: topic.created_at.clone(),
            conclusion: None,
            insight: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Resolved,
}

pub const FUSION_SESSION_TYPE: &str = "cross_salon_fusion";

/// A proposed joint synthesis across sources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionSession {
    pub id: String,
    #[serde(rename = "type")]
    pub session_type: String,
    pub source_updates: Vec<Update>,
    pub related_salon_ids: Vec<String>,
    pub status: SessionStatus,
    pub created_at: String,
}

/// Counts and domain spread of the whole graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub topic_count: usize,
    pub capsule_count: usize,
    pub relationship_count: usize,
    pub domain_distribution: Vec<(String, usize)>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainSubgraph {
    pub domain: String,
    pub topics: Vec<Topic>,
    pub capsules: Vec<Capsule>,
    pub relationships: Vec<Relationship>,
}

/// Seed data a source hands over when first connected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialData {
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub capsules: Vec<Capsule>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Connected,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Connected => "connected",
            SourceStatus::Failed => "failed",
        }
    }
}

impl FromStr for SourceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(SourceStatus::Connected),
            "failed" => Ok(SourceStatus::Failed),
            other => Err(CoreError::Validation(format!("unknown source status '{other}'"))),
        }
    }
}

/// Last known connection attempt for a source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub salon_id: String,
    pub kind: String,
    pub location: String,
    pub status: SourceStatus,
    pub error: Option<String>,
    pub updated_at: String,
}
