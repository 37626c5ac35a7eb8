//! On-demand topic analysis and cross-topic insight synthesis.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::{IMPACT_BASE, IMPACT_MAX, UNKNOWN_DOMAIN};
use crate::error::{CoreError, Result};
use crate::model::{Insight, Topic};
use crate::store::{KnowledgeStore, TopicEvent, resolve_topics};
use crate::tokenizer::normalize_keywords;

pub const INSIGHT_TYPE: &str = "cross_topic_insight";

/// Related-topic count above which merging is suggested.
const MERGE_MIN_RELATED: usize = 3;
const COMMON_KEYWORDS_REPORTED: usize = 10;

const INSIGHT_RECOMMENDATIONS: [&str; 3] = [
    "Deepen the discussion around the shared keywords",
    "Invite the contributing salons to a joint session",
    "Distill the combined findings into a knowledge capsule",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Nothing is connected to the topic yet.
    Expand,
    /// Enough related topics exist to consolidate.
    Merge,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: RecommendedAction,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicAnalysis {
    pub topic: Topic,
    pub related_topics: Vec<Topic>,
    pub history: Vec<TopicEvent>,
    pub distinct_domains: usize,
    pub impact_score: u32,
    pub recommendation: Option<Recommendation>,
}

/// `50 + 5·related + min(2·history, 30) + 10·(domains − 1)`, capped at 100.
pub fn impact_score(related: usize, history: usize, distinct_domains: usize) -> u32 {
    let related = related.min(IMPACT_MAX as usize) as u32;
    let history = history.saturating_mul(2).min(30) as u32;
    let domains = distinct_domains.saturating_sub(1).min(IMPACT_MAX as usize) as u32;
    (IMPACT_BASE + 5 * related + history + 10 * domains).min(IMPACT_MAX)
}

/// Analyze one topic: its neighbourhood, history, and estimated impact.
///
/// Fails with `NotFound` when `topic_id` does not resolve.
pub fn analyze<S: KnowledgeStore + ?Sized>(store: &S, topic_id: &str) -> Result<TopicAnalysis> {
    let topic = store
        .get_topic(topic_id)?
        .ok_or_else(|| CoreError::not_found("topic", topic_id))?;
    let related_topics = store.get_related_topics(topic_id)?;
    let history = store.get_topic_history(topic_id)?;

    let distinct_domains = std::iter::once(&topic)
        .chain(related_topics.iter())
        .map(Topic::domain_bucket)
        .collect::<HashSet<_>>()
        .len();

    let recommendation = if related_topics.is_empty() {
        Some(Recommendation {
            action: RecommendedAction::Expand,
            reason: "no related topics yet; broaden the discussion".to_string(),
        })
    } else if related_topics.len() > MERGE_MIN_RELATED {
        Some(Recommendation {
            action: RecommendedAction::Merge,
            reason: format!(
                "{} related topics; consider consolidating them",
                related_topics.len()
            ),
        })
    } else {
        None
    };

    Ok(TopicAnalysis {
        impact_score: impact_score(related_topics.len(), history.len(), distinct_domains),
        topic,
        related_topics,
        history,
        distinct_domains,
        recommendation,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InsightOutcome {
    Generated(Insight),
    Insufficient { error: String },
}

/// Keywords present in at least two topics, most widespread first. Ties keep
/// first-seen order.
pub fn common_keywords(topics: &[Topic]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for topic in topics {
        for keyword in normalize_keywords(&topic.keywords) {
            let count = counts.entry(keyword.clone()).or_insert(0);
            if *count == 0 {
                order.push(keyword);
            }
            *count += 1;
        }
    }
    let mut shared: Vec<(String, usize)> = order
        .into_iter()
        .filter_map(|k| {
            let c = counts.get(&k).copied().unwrap_or_default();
            (c >= 2).then_some((k, c))
        })
        .collect();
    shared.sort_by(|a, b| b.1.cmp(&a.1));
    shared
        .into_iter()
        .take(COMMON_KEYWORDS_REPORTED)
        .map(|(k, _)| k)
        .collect()
}

/// Most frequent declared domain; first-seen wins ties.
fn dominant_domain(topics: &[Topic]) -> Option<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for domain in topics.iter().filter_map(|t| t.domain.as_deref()) {
        if domain.trim().is_empty() {
            continue;
        }
        let count = counts.entry(domain).or_insert(0);
        if *count == 0 {
            order.push(domain);
        }
        *count += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for domain in order {
        let count = counts.get(domain).copied().unwrap_or_default();
        if best.is_none_or(|(_, b)| count > b) {
            best = Some((domain, count));
        }
    }
    best.map(|(d, _)| d.to_string())
}

/// Synthesize and persist an insight across `topic_ids`. Unresolvable ids are
/// dropped; fewer than two remaining topics is an `Insufficient` outcome.
pub fn generate_insight<S: KnowledgeStore + ?Sized>(
    store: &mut S,
    topic_ids: &[String],
) -> Result<InsightOutcome> {
    let topics = resolve_topics(&*store, topic_ids)?;
    if topics.len() < 2 {
        return Ok(InsightOutcome::Insufficient {
            error: "at least two existing topics are required".to_string(),
        });
    }

    let keywords = common_keywords(&topics);
    let domain = dominant_domain(&topics);
    let summary = format!(
        "Analyzed {} topics. Shared keywords: {}. Dominant domain: {}.",
        topics.len(),
        if keywords.is_empty() {
            "none".to_string()
        } else {
            keywords.join(", ")
        },
        domain.as_deref().unwrap_or(UNKNOWN_DOMAIN)
    );

    let mut insight = Insight::new(INSIGHT_TYPE, &summary);
    insight.source_topic_ids = topics.iter().map(|t| t.id.clone()).collect();
    insight.common_keywords = keywords;
    insight.common_domain = domain;
    insight.recommendations = INSIGHT_RECOMMENDATIONS.iter().map(|r| r.to_string()).collect();

    Ok(InsightOutcome::Generated(store.add_insight(insight)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::model::{EntityKind, Relationship};

    fn related(store: &mut MemoryStore, a: &str, b: &str) {
        store
            .add_relationship(Relationship::new((EntityKind::Topic, a), (EntityKind::Topic, b), "related", 0.9))
            .unwrap();
    }

    #[test]
    fn test_impact_formula() {
        assert_eq!(impact_score(0, 0, 1), 50);
        assert_eq!(impact_score(2, 0, 2), 70);
        assert_eq!(impact_score(0, 40, 1), 80);
        assert_eq!(impact_score(10, 0, 5), 100);
    }

    #[test]
    fn test_analyze_missing_topic() {
        let store = MemoryStore::new();
        assert!(matches!(analyze(&store, "nope"), Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn test_analyze_isolated_topic_suggests_expand() {
        let mut store = MemoryStore::new();
        store.add_topic(Topic::new("t").with_id("t1")).unwrap();
        let analysis = analyze(&store, "t1").unwrap();
        assert_eq!(analysis.impact_score, 50);
        assert_eq!(analysis.distinct_domains, 1);
        assert!(analysis.history.is_empty());
        assert_eq!(
            analysis.recommendation.map(|r| r.action),
            Some(RecommendedAction::Expand)
        );
    }

    #[test]
    fn test_analyze_well_connected_topic_suggests_merge() {
        let mut store = MemoryStore::new();
        store.add_topic(Topic::new("hub").with_id("hub").with_domain("ai")).unwrap();
        for (id, domain) in [("a", "ai"), ("b", "ethics"), ("c", "ai"), ("d", "medical")] {
            store.add_topic(Topic::new(id).with_id(id).with_domain(domain)).unwrap();
            related(&mut store, "hub", id);
        }
        let analysis = analyze(&store, "hub").unwrap();
        assert_eq!(analysis.related_topics.len(), 4);
        assert_eq!(analysis.distinct_domains, 3);
        // 50 + 5*4 + 0 + 10*2
        assert_eq!(analysis.impact_score, 90);
        assert_eq!(
            analysis.recommendation.map(|r| r.action),
            Some(RecommendedAction::Merge)
        );
    }

    #[test]
    fn test_generate_insight_needs_two_topics() {
        let mut store = MemoryStore::new();
        store.add_topic(Topic::new("t").with_id("t1")).unwrap();
        let outcome = generate_insight(&mut store, &["t1".into(), "ghost".into()]).unwrap();
        assert!(matches!(outcome, InsightOutcome::Insufficient { .. }));
        assert!(store.query_insights(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_generate_insight_repeated_id_counts_once() {
        let mut store = MemoryStore::new();
        store
            .add_topic(Topic::new("a").with_id("t1").with_keywords(&["alpha", "beta"]))
            .unwrap();
        let outcome = generate_insight(&mut store, &["t1".into(), "t1".into()]).unwrap();
        assert!(matches!(outcome, InsightOutcome::Insufficient { .. }));
        assert!(store.query_insights(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_generate_insight_shared_latency() {
        let mut store = MemoryStore::new();
        store
            .add_topic(
                Topic::new("a").with_id("t1").with_domain("ai").with_keywords(&["latency", "decoding"]),
            )
            .unwrap();
        store
            .add_topic(
                Topic::new("b").with_id("t2").with_domain("ai").with_keywords(&["Latency", "privacy"]),
            )
            .unwrap();

        let outcome = generate_insight(&mut store, &["t1".into(), "t2".into()]).unwrap();
        let InsightOutcome::Generated(insight) = outcome else {
            panic!("expected an insight");
        };
        assert_eq!(insight.common_keywords, vec!["latency"]);
        assert_eq!(insight.common_domain.as_deref(), Some("ai"));
        assert_eq!(insight.insight_type, "cross_topic_insight");
        assert_eq!(insight.recommendations.len(), 3);
        assert_eq!(store.query_insights(Some(INSIGHT_TYPE), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_common_keywords_ranked_by_spread() {
        let topics = vec![
            Topic::new("a").with_keywords(&["x", "y"]),
            Topic::new("b").with_keywords(&["y", "x"]),
            Topic::new("c").with_keywords(&["y"]),
        ];
        assert_eq!(common_keywords(&topics), vec!["y", "x"]);
    }

    #[test]
    fn test_insufficient_outcome_wire_shape() {
        let outcome = InsightOutcome::Insufficient {
            error: "too few".into(),
        };
        assert_eq!(serde_json::to_value(&outcome).unwrap(), serde_json::json!({"error": "too few"}));
    }
}
