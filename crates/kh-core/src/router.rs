//! Relevance router: weighted four-axis similarity between knowledge items,
//! fuse-or-archive routing, and greedy clustering.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::constants::{
    ARCHIVE_CONFIDENCE, DOMAIN_WEIGHT, KEYWORD_WEIGHT, RELEVANCE_THRESHOLD, SIMILAR_DOMAIN_SCORE,
    SPATIAL_AUTHOR, SPATIAL_SALON, SPATIAL_TOPIC, SPATIAL_WEIGHT, TEMPORAL_BUCKETS,
    TEMPORAL_FLOOR, TEMPORAL_UNKNOWN, TEMPORAL_WEIGHT,
};
use crate::domain::{DomainAdjacency, normalize_domain};
use crate::error::{CoreError, Result};
use crate::model::{Capsule, Topic};
use crate::time::days_between;
use crate::tokenizer::keyword_jaccard;

/// The fields the router scores on, lifted from a topic or a capsule.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub domain: Option<String>,
    pub keywords: Vec<String>,
    pub timestamp: Option<String>,
    pub authors: Vec<String>,
    pub source_salon_id: Option<String>,
    /// The topic this item originated from (a topic is its own origin).
    pub source_topic_id: Option<String>,
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

impl From<&Topic> for KnowledgeItem {
    fn from(topic: &Topic) -> Self {
        Self {
            id: topic.id.clone(),
            domain: topic.domain.clone(),
            keywords: topic.keywords.clone(),
            timestamp: non_empty(&topic.created_at),
            authors: topic.authors(),
            source_salon_id: topic.source_salon_id.clone(),
            source_topic_id: Some(topic.id.clone()),
        }
    }
}

impl From<&Capsule> for KnowledgeItem {
    fn from(capsule: &Capsule) -> Self {
        Self {
            id: capsule.id.clone(),
            domain: capsule.domain.clone(),
            keywords: capsule.keywords.clone(),
            timestamp: non_empty(&capsule.created_at),
            authors: capsule.authors(),
            source_salon_id: capsule.source_salon_id.clone(),
            source_topic_id: capsule.source_topic_id.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceWeights {
    pub domain: f64,
    pub keyword: f64,
    pub temporal: f64,
    pub spatial: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            domain: DOMAIN_WEIGHT,
            keyword: KEYWORD_WEIGHT,
            temporal: TEMPORAL_WEIGHT,
            spatial: SPATIAL_WEIGHT,
        }
    }
}

impl RelevanceWeights {
    pub fn sum(&self) -> f64 {
        self.domain + self.keyword + self.temporal + self.spatial
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Must sum to 1.0 for scores to stay within [0, 1]; see `validate`.
    pub weights: RelevanceWeights,
    pub threshold: f64,
    pub adjacency: DomainAdjacency,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            weights: RelevanceWeights::default(),
            threshold: RELEVANCE_THRESHOLD,
            adjacency: DomainAdjacency::default(),
        }
    }
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

impl RouterConfig {
    /// Threshold in [0, 1]; every weight finite and non-negative, together
    /// summing to 1.0.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(CoreError::Validation(format!(
                "router threshold {} must be in [0, 1]",
                self.threshold
            )));
        }
        let w = &self.weights;
        for (name, value) in [
            ("domain", w.domain),
            ("keyword", w.keyword),
            ("temporal", w.temporal),
            ("spatial", w.spatial),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::Validation(format!(
                    "router weight {name} = {value} must be a non-negative number"
                )));
            }
        }
        if (w.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CoreError::Validation(format!(
                "router weights sum to {}, expected 1.0",
                w.sum()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub domain: f64,
    pub keyword: f64,
    pub temporal: f64,
    pub spatial: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relevance {
    pub score: f64,
    pub breakdown: Breakdown,
    pub related: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    Fuse,
    Archive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub item_id: String,
    pub action: RouteAction,
    pub target: Option<String>,
    pub confidence: f64,
    pub reason: String,
}

/// A cluster seeded by its first member.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster<'a> {
    pub seed: &'a KnowledgeItem,
    pub members: Vec<&'a KnowledgeItem>,
}

impl Cluster<'_> {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.id.as_str()).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RelevanceRouter {
    config: RouterConfig,
}

impl RelevanceRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// 1.0 for equal domains, 0.8 for adjacent ones, 0 otherwise or when
    /// either side has no domain.
    pub fn domain_similarity(&self, a: Option<&str>, b: Option<&str>) -> f64 {
        let (Some(a), Some(b)) = (
            a.and_then(normalize_domain),
            b.and_then(normalize_domain),
        ) else {
            return 0.0;
        };
        if a == b {
            1.0
        } else if self.config.adjacency.are_similar(&a, &b) {
            SIMILAR_DOMAIN_SCORE
        } else {
            0.0
        }
    }

    pub fn keyword_similarity(&self, a: &[String], b: &[String]) -> f64 {
        keyword_jaccard(a, b)
    }

    pub fn temporal_proximity(&self, a: Option<&str>, b: Option<&str>) -> f64 {
        let (Some(a), Some(b)) = (a, b) else {
            return TEMPORAL_UNKNOWN;
        };
        let Some(gap) = days_between(a, b) else {
            return TEMPORAL_UNKNOWN;
        };
        TEMPORAL_BUCKETS
            .iter()
            .find(|(max_days, _)| gap <= *max_days)
            .map(|(_, score)| *score)
            .unwrap_or(TEMPORAL_FLOOR)
    }

    pub fn spatial_proximity(&self, a: &KnowledgeItem, b: &KnowledgeItem) -> f64 {
        let mut score = 0.0;

        let authors_a: HashSet<&str> = a.authors.iter().map(String::as_str).collect();
        if b.authors.iter().any(|author| authors_a.contains(author.as_str())) {
            score += SPATIAL_AUTHOR;
        }
        if same_present(&a.source_salon_id, &b.source_salon_id) {
            score += SPATIAL_SALON;
        }
        if same_present(&a.source_topic_id, &b.source_topic_id) {
            score += SPATIAL_TOPIC;
        }

        f64::min(score, 1.0)
    }

    pub fn calculate_relevance(&self, a: &KnowledgeItem, b: &KnowledgeItem) -> Relevance {
        let breakdown = Breakdown {
            domain: self.domain_similarity(a.domain.as_deref(), b.domain.as_deref()),
            keyword: self.keyword_similarity(&a.keywords, &b.keywords),
            temporal: self.temporal_proximity(a.timestamp.as_deref(), b.timestamp.as_deref()),
            spatial: self.spatial_proximity(a, b),
        };
        let w = &self.config.weights;
        let score = breakdown.domain * w.domain
            + breakdown.keyword * w.keyword
            + breakdown.temporal * w.temporal
            + breakdown.spatial * w.spatial;

        Relevance {
            score,
            breakdown,
            related: score >= self.config.threshold,
        }
    }

    /// Fuse `item` into its best-scoring recent item when related, else archive.
    pub fn route(&self, item: &KnowledgeItem, recent: &[KnowledgeItem]) -> RouteDecision {
        let best = recent
            .iter()
            .map(|candidate| (candidate, self.calculate_relevance(item, candidate)))
            .fold(None::<(&KnowledgeItem, Relevance)>, |best, (candidate, rel)| {
                match best {
                    Some((_, b)) if b.score >= rel.score => best,
                    _ => Some((candidate, rel)),
                }
            });

        match best {
            Some((target, rel)) if rel.related => RouteDecision {
                item_id: item.id.clone(),
                action: RouteAction::Fuse,
                target: Some(target.id.clone()),
                confidence: rel.score,
                reason: format!(
                    "relevance {:.2} to {} meets threshold {:.2}",
                    rel.score, target.id, self.config.threshold
                ),
            },
            Some((_, rel)) => RouteDecision {
                item_id: item.id.clone(),
                action: RouteAction::Archive,
                target: None,
                confidence: ARCHIVE_CONFIDENCE,
                reason: format!(
                    "best relevance {:.2} below threshold {:.2}",
                    rel.score, self.config.threshold
                ),
            },
            None => RouteDecision {
                item_id: item.id.clone(),
                action: RouteAction::Archive,
                target: None,
                confidence: ARCHIVE_CONFIDENCE,
                reason: "no recent items to compare against".to_string(),
            },
        }
    }

    /// Route each item independently against the same context.
    pub fn batch_route(&self, items: &[KnowledgeItem], recent: &[KnowledgeItem]) -> Vec<RouteDecision> {
        items.iter().map(|item| self.route(item, recent)).collect()
    }

    /// Greedy single-pass partition: the first unclustered item seeds a
    /// cluster and pulls in every remaining item related to the seed.
    ///
    /// Membership is judged against the seed only, so two related items can
    /// land in different clusters. Every input appears in exactly one cluster.
    pub fn cluster<'a>(&self, items: &'a [KnowledgeItem]) -> Vec<Cluster<'a>> {
        let mut remaining: Vec<&'a KnowledgeItem> = items.iter().collect();
        let mut clusters = Vec::new();

        while !remaining.is_empty() {
            let seed = remaining.remove(0);
            let mut members = vec![seed];
            let mut rest = Vec::with_capacity(remaining.len());
            for item in remaining {
                if self.calculate_relevance(seed, item).related {
                    members.push(item);
                } else {
                    rest.push(item);
                }
            }
            remaining = rest;
            clusters.push(Cluster { seed, members });
        }

        clusters
    }
}

fn same_present(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if !a.is_empty() && a == b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn item(id: &str, domain: Option<&str>, keywords: &[&str], ts: Option<&str>) -> KnowledgeItem {
        KnowledgeItem {
            id: id.to_string(),
            domain: domain.map(str::to_string),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            timestamp: ts.map(str::to_string),
            ..KnowledgeItem::default()
        }
    }

    #[test]
    fn test_domain_similarity_axes() {
        let router = RelevanceRouter::default();
        assert_eq!(router.domain_similarity(Some("ai"), Some("AI")), 1.0);
        assert_eq!(router.domain_similarity(Some("ai"), Some("technology")), 0.8);
        assert_eq!(router.domain_similarity(Some("technology"), Some("ai")), 0.8);
        assert_eq!(router.domain_similarity(Some("ai"), Some("ethics")), 0.0);
        assert_eq!(router.domain_similarity(None, Some("ai")), 0.0);
        assert_eq!(router.domain_similarity(None, None), 0.0);
    }

    #[test]
    fn test_temporal_buckets() {
        let router = RelevanceRouter::default();
        let base = Some("2026-01-01T00:00:00Z");
        assert_eq!(router.temporal_proximity(base, Some("2026-01-08T00:00:00Z")), 1.0);
        assert_eq!(router.temporal_proximity(base, Some("2026-01-20T00:00:00Z")), 0.7);
        assert_eq!(router.temporal_proximity(base, Some("2026-03-01T00:00:00Z")), 0.4);
        assert_eq!(router.temporal_proximity(base, Some("2026-12-01T00:00:00Z")), 0.2);
        assert_eq!(router.temporal_proximity(base, None), 0.5);
        assert_eq!(router.temporal_proximity(base, Some("someday")), 0.5);
    }

    #[test]
    fn test_spatial_is_additive_and_capped() {
        let router = RelevanceRouter::default();
        let mut a = item("a", None, &[], None);
        let mut b = item("b", None, &[], None);
        a.authors = vec!["ada".into()];
        b.authors = vec!["ada".into(), "bob".into()];
        assert_relative_eq!(router.spatial_proximity(&a, &b), 0.5);

        a.source_salon_id = Some("neuro".into());
        b.source_salon_id = Some("neuro".into());
        assert_relative_eq!(router.spatial_proximity(&a, &b), 0.8);

        a.source_topic_id = Some("t".into());
        b.source_topic_id = Some("t".into());
        assert_relative_eq!(router.spatial_proximity(&a, &b), 1.0);
    }

    #[test]
    fn test_alignment_vs_governance_is_not_related() {
        let router = RelevanceRouter::default();
        let a = item("a", Some("AI"), &["alignment", "safety"], None);
        let b = item("b", Some("ethics"), &["alignment", "governance"], None);
        let rel = router.calculate_relevance(&a, &b);

        assert_relative_eq!(rel.breakdown.keyword, 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(rel.breakdown.domain, 0.0);
        assert!(rel.score < 0.7);
        assert!(!rel.related);
    }

    #[test]
    fn test_identical_items_are_related() {
        let router = RelevanceRouter::default();
        let mut a = item("a", Some("ai"), &["decoding", "bci"], Some("2026-01-01T00:00:00Z"));
        a.source_salon_id = Some("s".into());
        a.source_topic_id = Some("t".into());
        a.authors = vec!["x".into()];
        let rel = router.calculate_relevance(&a, &a.clone());
        assert_relative_eq!(rel.score, 1.0, epsilon = 1e-12);
        assert!(rel.related);
    }

    #[test]
    fn test_route_fuses_into_best_match() {
        let router = RelevanceRouter::default();
        let ts = Some("2026-01-01T00:00:00Z");
        let new = item("new", Some("ai"), &["decoding", "bci"], ts);
        let recent = vec![
            item("weak", Some("ethics"), &["privacy"], ts),
            item("strong", Some("ai"), &["decoding", "bci"], ts),
        ];
        let decision = router.route(&new, &recent);
        assert_eq!(decision.action, RouteAction::Fuse);
        assert_eq!(decision.target.as_deref(), Some("strong"));
        assert!(decision.confidence >= 0.7);
    }

    #[test]
    fn test_route_archives_with_fixed_confidence() {
        let router = RelevanceRouter::default();
        let new = item("new", Some("ai"), &["decoding"], None);
        let recent = vec![item("other", Some("ethics"), &["privacy"], None)];
        let decision = router.route(&new, &recent);
        assert_eq!(decision.action, RouteAction::Archive);
        assert_eq!(decision.target, None);
        assert_eq!(decision.confidence, 0.8);

        let empty = router.route(&new, &[]);
        assert_eq!(empty.action, RouteAction::Archive);
        assert_eq!(empty.confidence, 0.8);
    }

    #[test]
    fn test_batch_route_is_per_item() {
        let router = RelevanceRouter::default();
        let ts = Some("2026-01-01T00:00:00Z");
        let recent = vec![item("r", Some("ai"), &["decoding", "bci"], ts)];
        let items = vec![
            item("hit", Some("ai"), &["decoding", "bci"], ts),
            item("miss", Some("ethics"), &["privacy"], ts),
        ];
        let decisions = router.batch_route(&items, &recent);
        assert_eq!(decisions[0].action, RouteAction::Fuse);
        assert_eq!(decisions[1].action, RouteAction::Archive);
    }

    #[test]
    fn test_cluster_is_seed_based_not_transitive() {
        // Lower the bar so keyword overlap alone decides membership.
        let router = RelevanceRouter::new(RouterConfig {
            weights: RelevanceWeights {
                domain: 0.0,
                keyword: 1.0,
                temporal: 0.0,
                spatial: 0.0,
            },
            threshold: 0.3,
            ..RouterConfig::default()
        });
        let items = vec![
            item("a", None, &["x", "y"], None),
            item("b", None, &["y", "z"], None),
            item("c", None, &["z", "w"], None),
        ];
        let clusters = router.cluster(&items);
        // a~b (1/3), b~c (1/3), a!~c: c is not pulled in through b.
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].ids(), vec!["a", "b"]);
        assert_eq!(clusters[1].ids(), vec!["c"]);
        assert_eq!(clusters.iter().map(Cluster::len).sum::<usize>(), items.len());
    }

    #[test]
    fn test_validate_router_config() {
        assert!(RouterConfig::default().validate().is_ok());

        let mut skewed = RouterConfig::default();
        skewed.weights.domain = 0.9;
        let err = skewed.validate().unwrap_err();
        assert!(err.to_string().contains("sum to"));

        let mut negative = RouterConfig::default();
        negative.weights = RelevanceWeights {
            domain: 0.6,
            keyword: 0.3,
            temporal: 0.2,
            spatial: -0.1,
        };
        assert!(negative.validate().unwrap_err().to_string().contains("spatial"));

        let mut nan = RouterConfig::default();
        nan.weights.temporal = f64::NAN;
        assert!(nan.validate().is_err());

        let mut threshold = RouterConfig::default();
        threshold.threshold = 1.5;
        assert!(threshold.validate().unwrap_err().to_string().contains("threshold"));
    }

    #[test]
    fn test_cluster_empty_input() {
        let router = RelevanceRouter::default();
        assert!(router.cluster(&[]).is_empty());
    }
}
