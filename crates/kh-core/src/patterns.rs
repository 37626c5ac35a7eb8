//! Emergence pattern checks.
//!
//! Each check looks at a window of topics and either stays silent or returns
//! the details of what it found. The detector runs them in a fixed order.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::{
    BREAKTHROUGH_LEXICON, CONSENSUS_DOMAIN_BONUS, CONSENSUS_KEYWORD_WEIGHT, CONSENSUS_THRESHOLD,
    CONSENSUS_TITLE_WEIGHT, CROSS_DOMAIN_MIN_COMMON, CROSS_DOMAIN_REPORTED, DETECTION_WINDOW,
    CONCEPT_CUES, DATA_CUES, DIVERGENCE_MIN, DIVERGENCE_REPORTED, FUSION_MAX_CAPSULES,
    FUSION_MIN_SIGNIFICANCE, FUSION_MIN_STRENGTH, INTERDISCIPLINARY_CUES, METHOD_CUES,
    SIGNIFICANCE_EVIDENCE_CAP, SIGNIFICANCE_INTERDISCIPLINARY, SIGNIFICANCE_MAX,
    SIGNIFICANCE_PER_CUE, SIGNIFICANCE_PER_EVIDENCE, UNKNOWN_DOMAIN,
};
use crate::domain::normalize_domain;
use crate::model::Topic;
use crate::tokenizer::{jaccard, keyword_jaccard, normalize_keywords, title_words};
use crate::trends::TrendReport;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Newest topics scanned by `check_all`.
    pub window: usize,
    pub cross_domain_min_common: usize,
    pub cross_domain_reported: usize,
    pub consensus_threshold: f64,
    pub divergence_min: usize,
    pub divergence_reported: usize,
    pub lexicon: Vec<String>,
    /// Breakthroughs below this significance are not reported.
    pub breakthrough_min_significance: f64,
    pub fusion_min_strength: f64,
    pub fusion_min_significance: f64,
    pub fusion_max_capsules: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window: DETECTION_WINDOW,
            cross_domain_min_common: CROSS_DOMAIN_MIN_COMMON,
            cross_domain_reported: CROSS_DOMAIN_REPORTED,
            consensus_threshold: CONSENSUS_THRESHOLD,
            divergence_min: DIVERGENCE_MIN,
            divergence_reported: DIVERGENCE_REPORTED,
            lexicon: BREAKTHROUGH_LEXICON.iter().map(|t| t.to_string()).collect(),
            breakthrough_min_significance: 0.0,
            fusion_min_strength: FUSION_MIN_STRENGTH,
            fusion_min_significance: FUSION_MIN_SIGNIFICANCE,
            fusion_max_capsules: FUSION_MAX_CAPSULES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CrossDomainConnection {
    pub domain_a: String,
    pub domain_b: String,
    pub common_keywords: Vec<String>,
    pub strength: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsensusGroup {
    pub topic_ids: Vec<String>,
    pub titles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DivergentDomain {
    pub domain: String,
    pub divergent_count: usize,
    pub divergent_keywords: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakthroughKind {
    Method,
    Data,
    Concept,
}

impl BreakthroughKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Data => "data",
            Self::Concept => "concept",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BreakthroughTopic {
    pub topic_id: String,
    pub title: String,
    pub domain: String,
    pub signals: Vec<String>,
    pub kind: BreakthroughKind,
    /// 0-100.
    pub significance: f64,
}

/// What a firing check found. Serialized flat into its report.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PatternDetails {
    CrossDomain {
        connections: Vec<CrossDomainConnection>,
    },
    Consensus {
        groups: Vec<ConsensusGroup>,
    },
    Divergence {
        domains: Vec<DivergentDomain>,
    },
    Breakthrough {
        topics: Vec<BreakthroughTopic>,
    },
    Trend {
        trends: TrendReport,
    },
    Custom(serde_json::Map<String, serde_json::Value>),
}

/// One detection pass over a window of topics.
pub trait PatternCheck: Send + Sync {
    /// Stable pattern name, e.g. `"cross_domain"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// `None` when the pattern does not fire.
    fn check(&self, topics: &[Topic], config: &DetectorConfig) -> Option<PatternDetails>;
}

/// The four built-in checks in declaration order.
pub fn default_checks() -> Vec<Box<dyn PatternCheck>> {
    vec![
        Box::new(CrossDomainCheck),
        Box::new(ConsensusCheck),
        Box::new(DivergenceCheck),
        Box::new(BreakthroughCheck),
    ]
}

/// Normalized domain, or `"unknown"` when absent.
fn domain_key(topic: &Topic) -> String {
    topic
        .domain
        .as_deref()
        .and_then(normalize_domain)
        .unwrap_or_else(|| UNKNOWN_DOMAIN.to_string())
}

/// Topics grouped by normalized domain, groups in first-seen order.
fn group_by_domain(topics: &[Topic]) -> Vec<(String, Vec<&Topic>)> {
    let mut groups: Vec<(String, Vec<&Topic>)> = Vec::new();
    for topic in topics {
        let key = domain_key(topic);
        match groups.iter_mut().find(|(domain, _)| *domain == key) {
            Some((_, members)) => members.push(topic),
            None => groups.push((key, vec![topic])),
        }
    }
    groups
}

/// Union of a group's keywords, lowercased, first-seen order.
fn union_keywords(topics: &[&Topic]) -> Vec<String> {
    let all: Vec<String> = topics.iter().flat_map(|t| t.keywords.iter().cloned()).collect();
    normalize_keywords(&all)
}

pub struct CrossDomainCheck;

impl PatternCheck for CrossDomainCheck {
    fn name(&self) -> &str {
        "cross_domain"
    }

    fn description(&self) -> &str {
        "Different domains share a keyword vocabulary"
    }

    fn check(&self, topics: &[Topic], config: &DetectorConfig) -> Option<PatternDetails> {
        let groups: Vec<(String, Vec<String>)> = group_by_domain(topics)
            .into_iter()
            .map(|(domain, members)| (domain, union_keywords(&members)))
            .collect();

        let mut connections = Vec::new();
        for (i, (domain_a, keywords_a)) in groups.iter().enumerate() {
            for (domain_b, keywords_b) in &groups[i + 1..] {
                let set_b: HashSet<&str> = keywords_b.iter().map(String::as_str).collect();
                let common: Vec<String> = keywords_a
                    .iter()
                    .filter(|k| set_b.contains(k.as_str()))
                    .cloned()
                    .collect();
                if common.len() < config.cross_domain_min_common {
                    continue;
                }
                let strength =
                    common.len() as f64 / keywords_a.len().max(keywords_b.len()) as f64;
                connections.push(CrossDomainConnection {
                    domain_a: domain_a.to_string(),
                    domain_b: domain_b.to_string(),
                    common_keywords: common
                        .into_iter()
                        .take(config.cross_domain_reported)
                        .collect(),
                    strength,
                });
            }
        }

        (!connections.is_empty()).then_some(PatternDetails::CrossDomain { connections })
    }
}

/// Title-word Jaccard ×0.3 + keyword Jaccard ×0.6 + 0.1 for an equal,
/// present domain after normalization.
pub fn consensus_similarity(a: &Topic, b: &Topic) -> f64 {
    let title = jaccard(&title_words(&a.title), &title_words(&b.title));
    let keyword = keyword_jaccard(&a.keywords, &b.keywords);
    let same_domain = match (
        a.domain.as_deref().and_then(normalize_domain),
        b.domain.as_deref().and_then(normalize_domain),
    ) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    };
    let bonus = if same_domain { CONSENSUS_DOMAIN_BONUS } else { 0.0 };
    title * CONSENSUS_TITLE_WEIGHT + keyword * CONSENSUS_KEYWORD_WEIGHT + bonus
}

pub struct ConsensusCheck;

impl PatternCheck for ConsensusCheck {
    fn name(&self) -> &str {
        "consensus"
    }

    fn description(&self) -> &str {
        "Several topics converge on the same subject"
    }

    fn check(&self, topics: &[Topic], config: &DetectorConfig) -> Option<PatternDetails> {
        let mut grouped = vec![false; topics.len()];
        let mut groups = Vec::new();

        for (i, seed) in topics.iter().enumerate() {
            if grouped[i] {
                continue;
            }
            let mut members = vec![i];
            for (j, other) in topics.iter().enumerate().skip(i + 1) {
                if !grouped[j] && consensus_similarity(seed, other) > config.consensus_threshold {
                    members.push(j);
                }
            }
            if members.len() < 2 {
                continue;
            }
            for &m in &members {
                grouped[m] = true;
            }
            groups.push(ConsensusGroup {
                topic_ids: members.iter().map(|&m| topics[m].id.clone()).collect(),
                titles: members.iter().map(|&m| topics[m].title.clone()).collect(),
            });
        }

        (!groups.is_empty()).then_some(PatternDetails::Consensus { groups })
    }
}

pub struct DivergenceCheck;

impl PatternCheck for DivergenceCheck {
    fn name(&self) -> &str {
        "divergence"
    }

    fn description(&self) -> &str {
        "Topics within a domain pull in different directions"
    }

    fn check(&self, topics: &[Topic], config: &DetectorConfig) -> Option<PatternDetails> {
        let mut domains = Vec::new();

        for (domain, members) in group_by_domain(topics) {
            if members.len() < 2 {
                continue;
            }
            let mut order: Vec<String> = Vec::new();
            let mut counts: HashMap<String, usize> = HashMap::new();
            for topic in &members {
                for keyword in normalize_keywords(&topic.keywords) {
                    let count = counts.entry(keyword.clone()).or_insert(0);
                    if *count == 0 {
                        order.push(keyword);
                    }
                    *count += 1;
                }
            }
            let divergent: Vec<String> = order
                .into_iter()
                .filter(|k| counts.get(k) == Some(&1))
                .collect();
            if divergent.len() > config.divergence_min {
                domains.push(DivergentDomain {
                    domain,
                    divergent_count: divergent.len(),
                    divergent_keywords: divergent
                        .into_iter()
                        .take(config.divergence_reported)
                        .collect(),
                });
            }
        }

        (!domains.is_empty()).then_some(PatternDetails::Divergence { domains })
    }
}

const KIND_CUES: [(BreakthroughKind, &[&str]); 3] = [
    (BreakthroughKind::Method, METHOD_CUES),
    (BreakthroughKind::Data, DATA_CUES),
    (BreakthroughKind::Concept, CONCEPT_CUES),
];

/// Lowercased title and keywords, space-joined.
fn topic_text(topic: &Topic) -> String {
    let mut text = topic.title.to_lowercase();
    for keyword in &topic.keywords {
        text.push(' ');
        text.push_str(&keyword.to_lowercase());
    }
    text
}

fn evidence_count(topic: &Topic) -> usize {
    topic
        .metadata
        .get("evidence")
        .and_then(|v| v.as_array())
        .map_or(0, Vec::len)
}

/// First cue set with a hit in `text` decides the kind; no hit reads as a
/// conceptual advance. `text` must be lowercased.
pub fn classify_breakthrough(text: &str) -> BreakthroughKind {
    KIND_CUES
        .iter()
        .find(|(_, cues)| cues.iter().any(|cue| text.contains(cue)))
        .map_or(BreakthroughKind::Concept, |(kind, _)| *kind)
}

/// 15 per matched cue of any kind, 10 per evidence item (at most 30), 20 for
/// an interdisciplinary cue. Capped at 100. `text` must be lowercased.
pub fn breakthrough_significance(text: &str, evidence: usize) -> f64 {
    let cues = KIND_CUES
        .iter()
        .flat_map(|(_, cues)| cues.iter())
        .filter(|cue| text.contains(*cue))
        .count();
    let mut score = cues as f64 * SIGNIFICANCE_PER_CUE;
    score += (evidence as f64 * SIGNIFICANCE_PER_EVIDENCE).min(SIGNIFICANCE_EVIDENCE_CAP);
    if INTERDISCIPLINARY_CUES.iter().any(|cue| text.contains(cue)) {
        score += SIGNIFICANCE_INTERDISCIPLINARY;
    }
    score.min(SIGNIFICANCE_MAX)
}

pub struct BreakthroughCheck;

impl PatternCheck for BreakthroughCheck {
    fn name(&self) -> &str {
        "breakthrough"
    }

    fn description(&self) -> &str {
        "Topics carry breakthrough signals"
    }

    fn check(&self, topics: &[Topic], config: &DetectorConfig) -> Option<PatternDetails> {
        let lexicon: Vec<String> = config.lexicon.iter().map(|t| t.to_lowercase()).collect();
        let found: Vec<BreakthroughTopic> = topics
            .iter()
            .filter_map(|topic| {
                let signals: Vec<String> = topic
                    .keywords
                    .iter()
                    .filter(|k| {
                        let lowered = k.to_lowercase();
                        lexicon.iter().any(|term| lowered.contains(term.as_str()))
                    })
                    .cloned()
                    .collect();
                if signals.is_empty() {
                    return None;
                }
                let text = topic_text(topic);
                let significance = breakthrough_significance(&text, evidence_count(topic));
                (significance >= config.breakthrough_min_significance).then(|| BreakthroughTopic {
                    topic_id: topic.id.clone(),
                    title: topic.title.clone(),
                    domain: domain_key(topic),
                    signals,
                    kind: classify_breakthrough(&text),
                    significance,
                })
            })
            .collect();

        (!found.is_empty()).then_some(PatternDetails::Breakthrough { topics: found })
    }
}
