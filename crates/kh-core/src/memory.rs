//! In-process `KnowledgeStore`. Nothing survives the process; useful for
//! tests, dry runs, and embedding the engine without SQLite.

use std::collections::{HashMap, HashSet};

use crate::constants::SUBGRAPH_LIMIT;
use crate::error::Result;
use crate::model::{
    Capsule, DomainSubgraph, Insight, Overview, Relationship, SourceRecord, Topic,
};
use crate::store::{
    CapsuleQuery, KnowledgeStore, TopicQuery, prepare_capsule, prepare_insight,
    prepare_relationship, prepare_topic, sort_distribution,
};
use crate::time::now_iso8601;

#[derive(Default)]
pub struct MemoryStore {
    topics: Vec<Topic>,
    topic_index: HashMap<String, usize>,
    capsules: Vec<Capsule>,
    capsule_index: HashMap<String, usize>,
    relationships: Vec<Relationship>,
    insights: Vec<Insight>,
    sources: Vec<SourceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Indices of `items` ordered newest-first: `created_at` descending, later
/// insertion first on ties.
fn newest_first<T>(items: &[T], created_at: impl Fn(&T) -> &str) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        created_at(&items[b])
            .cmp(created_at(&items[a]))
            .then_with(|| b.cmp(&a))
    });
    order
}

impl KnowledgeStore for MemoryStore {
    fn add_topic(&mut self, topic: Topic) -> Result<Topic> {
        let topic = prepare_topic(topic)?;
        if let Some(&idx) = self.topic_index.get(&topic.id) {
            let existing = &mut self.topics[idx];
            existing.metadata.extend(topic.metadata);
            existing.updated_at = now_iso8601();
            return Ok(existing.clone());
        }
        self.topic_index.insert(topic.id.clone(), self.topics.len());
        self.topics.push(topic.clone());
        Ok(topic)
    }

    fn get_topic(&self, id: &str) -> Result<Option<Topic>> {
        Ok(self.topic_index.get(id).map(|&i| self.topics[i].clone()))
    }

    fn query_topics(&self, query: &TopicQuery) -> Result<Vec<Topic>> {
        Ok(newest_first(&self.topics, |t| t.created_at.as_str())
            .into_iter()
            .map(|i| &self.topics[i])
            .filter(|t| match &query.domain {
                Some(domain) => t.domain.as_deref() == Some(domain.as_str()),
                None => true,
            })
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn topic_ids_for_source(&self, salon_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .topics
            .iter()
            .filter(|t| t.source_salon_id.as_deref() == Some(salon_id))
            .map(|t| t.id.clone())
            .collect())
    }

    fn add_capsule(&mut self, capsule: Capsule) -> Result<Capsule> {
        let capsule = prepare_capsule(capsule)?;
        if let Some(&idx) = self.capsule_index.get(&capsule.id) {
            return Ok(self.capsules[idx].clone());
        }
        self.capsule_index
            .insert(capsule.id.clone(), self.capsules.len());
        self.capsules.push(capsule.clone());
        Ok(capsule)
    }

    fn get_capsule(&self, id: &str) -> Result<Option<Capsule>> {
        Ok(self.capsule_index.get(id).map(|&i| self.capsules[i].clone()))
    }

    fn query_capsules(&self, query: &CapsuleQuery) -> Result<Vec<Capsule>> {
        Ok(newest_first(&self.capsules, |c| c.created_at.as_str())
            .into_iter()
            .map(|i| &self.capsules[i])
            .filter(|c| match &query.domain {
                Some(domain) => c.domain.as_deref() == Some(domain.as_str()),
                None => true,
            })
            .filter(|c| match &query.source {
                Some(source) => c.source_salon_id.as_deref() == Some(source.as_str()),
                None => true,
            })
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn add_relationship(&mut self, relationship: Relationship) -> Result<()> {
        self.relationships.push(prepare_relationship(relationship)?);
        Ok(())
    }

    fn get_related_topics(&self, topic_id: &str) -> Result<Vec<Topic>> {
        let mut seen = HashSet::new();
        Ok(self
            .relationships
            .iter()
            .filter_map(|r| r.other_topic(topic_id))
            .filter(|id| seen.insert(id.to_string()))
            .filter_map(|id| self.topic_index.get(id).map(|&i| self.topics[i].clone()))
            .collect())
    }

    fn add_insight(&mut self, insight: Insight) -> Result<Insight> {
        let insight = prepare_insight(insight)?;
        self.insights.push(insight.clone());
        Ok(insight)
    }

    fn query_insights(&self, insight_type: Option<&str>, limit: usize) -> Result<Vec<Insight>> {
        Ok(newest_first(&self.insights, |i| i.created_at.as_str())
            .into_iter()
            .map(|i| &self.insights[i])
            .filter(|i| insight_type.is_none_or(|t| i.insight_type == t))
            .take(limit)
            .cloned()
            .collect())
    }

    fn get_overview(&self) -> Result<Overview> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for topic in &self.topics {
            *counts.entry(topic.domain_bucket()).or_insert(0) += 1;
        }
        let mut domain_distribution: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(d, c)| (d.to_string(), c))
            .collect();
        sort_distribution(&mut domain_distribution);

        Ok(Overview {
            topic_count: self.topics.len(),
            capsule_count: self.capsules.len(),
            relationship_count: self.relationships.len(),
            domain_distribution,
        })
    }

    fn get_domain_subgraph(&self, domain: &str) -> Result<DomainSubgraph> {
        let topics = self.query_topics(&TopicQuery::in_domain(domain, SUBGRAPH_LIMIT))?;
        let capsules = self.query_capsules(&CapsuleQuery {
            domain: Some(domain.to_string()),
            source: None,
            limit: SUBGRAPH_LIMIT,
        })?;
        let ids: HashSet<&str> = topics.iter().map(|t| t.id.as_str()).collect();
        let relationships = self
            .relationships
            .iter()
            .filter(|r| ids.contains(r.source_id.as_str()) || ids.contains(r.target_id.as_str()))
            .cloned()
            .collect();

        Ok(DomainSubgraph {
            domain: domain.to_string(),
            topics,
            capsules,
            relationships,
        })
    }

    fn record_source(&mut self, record: SourceRecord) -> Result<()> {
        match self.sources.iter_mut().find(|s| s.salon_id == record.salon_id) {
            Some(existing) => *existing = record,
            None => self.sources.push(record),
        }
        Ok(())
    }

    fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let mut sources = self.sources.clone();
        sources.sort_by(|a, b| a.salon_id.cmp(&b.salon_id));
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::{EntityKind, SourceStatus};

    #[test]
    fn test_add_topic_rejects_missing_title() {
        let mut store = MemoryStore::new();
        let result = store.add_topic(Topic::new(""));
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_query_topics_newest_first_with_domain_filter() {
        let mut store = MemoryStore::new();
        store
            .add_topic(Topic::new("old").with_domain("A").with_created_at("2026-01-01T00:00:00Z"))
            .unwrap();
        store
            .add_topic(Topic::new("new").with_domain("A").with_created_at("2026-02-01T00:00:00Z"))
            .unwrap();
        store
            .add_topic(Topic::new("other").with_domain("B").with_created_at("2026-03-01T00:00:00Z"))
            .unwrap();

        let all = store.query_topics(&TopicQuery::default()).unwrap();
        let titles: Vec<&str> = all.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["other", "new", "old"]);

        let in_a = store.query_topics(&TopicQuery::in_domain("A", 1)).unwrap();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].title, "new");
    }

    #[test]
    fn test_newest_first_compares_instants_across_offsets() {
        let mut store = MemoryStore::new();
        store
            .add_topic(Topic::new("later").with_created_at("2026-03-01T23:00:00-05:00"))
            .unwrap();
        store
            .add_topic(Topic::new("earlier").with_created_at("2026-03-02T01:00:00Z"))
            .unwrap();

        let titles: Vec<String> = store
            .query_topics(&TopicQuery::default())
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["later", "earlier"]);
    }

    #[test]
    fn test_readding_topic_refreshes_metadata_only() {
        let mut store = MemoryStore::new();
        let first = store.add_topic(Topic::new("t").with_id("t1")).unwrap();

        let mut again = Topic::new("renamed").with_id("t1");
        again.metadata.insert("seen".into(), true.into());
        let stored = store.add_topic(again).unwrap();

        assert_eq!(stored.title, "t");
        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(stored.metadata["seen"], serde_json::json!(true));
        assert_eq!(store.get_overview().unwrap().topic_count, 1);
    }

    #[test]
    fn test_overview_distribution() {
        let mut store = MemoryStore::new();
        for domain in ["A", "A", "B"] {
            store.add_topic(Topic::new("t").with_domain(domain)).unwrap();
        }
        let overview = store.get_overview().unwrap();
        assert_eq!(
            overview.domain_distribution,
            vec![("A".to_string(), 2), ("B".to_string(), 1)]
        );
    }

    #[test]
    fn test_related_topics_both_directions() {
        let mut store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.add_topic(Topic::new(id).with_id(id)).unwrap();
        }
        store
            .add_relationship(Relationship::new((EntityKind::Topic, "a"), (EntityKind::Topic, "b"), "related", 0.9))
            .unwrap();
        store
            .add_relationship(Relationship::new((EntityKind::Topic, "c"), (EntityKind::Topic, "a"), "related", 0.8))
            .unwrap();
        store
            .add_relationship(Relationship::new((EntityKind::Topic, "a"), (EntityKind::Capsule, "x"), "distilled_into", 1.0))
            .unwrap();
        // Dangling target: tolerated, yields nothing.
        store
            .add_relationship(Relationship::new((EntityKind::Topic, "a"), (EntityKind::Topic, "ghost"), "related", 0.5))
            .unwrap();

        let mut ids: Vec<String> = store
            .get_related_topics("a")
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_domain_subgraph() {
        let mut store = MemoryStore::new();
        store.add_topic(Topic::new("t").with_id("t1").with_domain("ai")).unwrap();
        store.add_topic(Topic::new("u").with_id("u1").with_domain("ethics")).unwrap();
        store.add_capsule(Capsule::new("c", "i").with_domain("ai")).unwrap();
        store
            .add_relationship(Relationship::new((EntityKind::Topic, "u1"), (EntityKind::Topic, "t1"), "related", 0.7))
            .unwrap();

        let graph = store.get_domain_subgraph("ai").unwrap();
        assert_eq!(graph.topics.len(), 1);
        assert_eq!(graph.capsules.len(), 1);
        assert_eq!(graph.relationships.len(), 1);
    }

    #[test]
    fn test_record_source_replaces_previous_attempt() {
        let mut store = MemoryStore::new();
        let mut record = SourceRecord {
            salon_id: "neuro".into(),
            kind: "file".into(),
            location: "/tmp/x".into(),
            status: SourceStatus::Failed,
            error: Some("missing".into()),
            updated_at: now_iso8601(),
        };
        store.record_source(record.clone()).unwrap();
        record.status = SourceStatus::Connected;
        record.error = None;
        store.record_source(record).unwrap();

        let sources = store.list_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].status, SourceStatus::Connected);
    }
}
