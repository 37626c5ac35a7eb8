//! Property tests for the router and the pattern checks.

use std::collections::HashSet;

use kh_core::patterns::{ConsensusCheck, PatternCheck, PatternDetails};
use kh_core::time::unix_to_iso8601;
use kh_core::tokenizer::keyword_jaccard;
use kh_core::{DetectorConfig, EmergenceDetector, KnowledgeItem, RelevanceRouter, Topic};
use proptest::prelude::*;

const DOMAINS: &[&str] = &["ai", "neuroscience", "ethics", "medical", "biotech", "physics"];
const JAN_2026: u64 = 1_767_225_600;
const WORDS: &[&str] = &["decoding", "latency", "privacy", "cortex", "Electrode", "model", "consent"];

fn domain() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::sample::select(DOMAINS).prop_map(str::to_string))
}

fn keywords() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(WORDS).prop_map(str::to_string), 0..5)
}

fn item() -> impl Strategy<Value = KnowledgeItem> {
    (domain(), keywords(), 0u32..200).prop_map(|(domain, keywords, day)| KnowledgeItem {
        id: String::new(),
        domain,
        keywords,
        timestamp: Some(unix_to_iso8601(JAN_2026 + u64::from(day) * 86_400)),
        ..KnowledgeItem::default()
    })
}

fn topic() -> impl Strategy<Value = Topic> {
    (domain(), keywords(), prop::sample::select(WORDS)).prop_map(|(domain, keywords, title)| {
        let mut t = Topic::new(title);
        t.domain = domain;
        t.keywords = keywords;
        t
    })
}

proptest! {
    #[test]
    fn keyword_jaccard_is_symmetric(a in keywords(), b in keywords()) {
        prop_assert_eq!(keyword_jaccard(&a, &b), keyword_jaccard(&b, &a));
    }

    #[test]
    fn domain_similarity_is_symmetric(a in domain(), b in domain()) {
        let router = RelevanceRouter::default();
        prop_assert_eq!(
            router.domain_similarity(a.as_deref(), b.as_deref()),
            router.domain_similarity(b.as_deref(), a.as_deref())
        );
    }

    #[test]
    fn relevance_stays_in_unit_interval(a in item(), b in item()) {
        let rel = RelevanceRouter::default().calculate_relevance(&a, &b);
        prop_assert!((0.0..=1.0 + 1e-9).contains(&rel.score));
    }

    #[test]
    fn cluster_partitions_exhaustively(raw in prop::collection::vec(item(), 0..12)) {
        let items: Vec<KnowledgeItem> = raw
            .into_iter()
            .enumerate()
            .map(|(i, mut it)| { it.id = format!("i{i}"); it })
            .collect();
        let clusters = RelevanceRouter::default().cluster(&items);

        let mut seen = HashSet::new();
        for cluster in &clusters {
            prop_assert!(!cluster.is_empty());
            for id in cluster.ids() {
                prop_assert!(seen.insert(id.to_string()), "{} in two clusters", id);
            }
        }
        prop_assert_eq!(seen.len(), items.len());
    }

    #[test]
    fn consensus_groups_have_at_least_two(topics in prop::collection::vec(topic(), 0..15)) {
        if let Some(PatternDetails::Consensus { groups }) =
            ConsensusCheck.check(&topics, &DetectorConfig::default())
        {
            let mut grouped = HashSet::new();
            for group in groups {
                prop_assert!(group.topic_ids.len() >= 2);
                for id in group.topic_ids {
                    prop_assert!(grouped.insert(id));
                }
            }
        }
    }
}

#[test]
fn empty_window_never_fires() {
    assert!(EmergenceDetector::default().check_topics(&[]).is_empty());
}
