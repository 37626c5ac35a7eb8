//! Capsules distilled from emergence reports.
//!
//! A strong cross-domain connection becomes a fusion capsule for the domain
//! pair; a significant breakthrough becomes a capsule tied back to its topic.
//! Connections are emitted before breakthroughs and the total is capped.

use serde_json::json;

use crate::collision::DERIVED_FROM;
use crate::detector::EmergenceReport;
use crate::error::Result;
use crate::model::{Capsule, EntityKind, Relationship};
use crate::patterns::{BreakthroughTopic, CrossDomainConnection, DetectorConfig, PatternDetails};
use crate::store::KnowledgeStore;

/// `metadata.origin` on every synthesized capsule.
pub const SYNTHESIS_ORIGIN: &str = "emergence";

const MAX_CAPSULE_KEYWORDS: usize = 3;

fn connection_capsule(conn: &CrossDomainConnection) -> Capsule {
    let keywords: Vec<&str> = conn
        .common_keywords
        .iter()
        .take(MAX_CAPSULE_KEYWORDS)
        .map(String::as_str)
        .collect();
    let pct = conn.strength * 100.0;
    let mut capsule = Capsule::new(
        &format!("Cross-domain fusion: {} + {}", conn.domain_a, conn.domain_b),
        &format!(
            "{} and {} share {} at {pct:.1}% association strength; a joint session between the two fields is warranted.",
            conn.domain_a,
            conn.domain_b,
            conn.common_keywords.join(", "),
        ),
    )
    .with_domain(&format!("{}+{}", conn.domain_a, conn.domain_b))
    .with_keywords(&keywords)
    .with_score(conn.strength.clamp(0.0, 1.0));
    capsule.metadata.insert("origin".into(), json!(SYNTHESIS_ORIGIN));
    capsule.metadata.insert("pattern".into(), json!("cross_domain"));
    capsule
}

fn breakthrough_capsule(found: &BreakthroughTopic) -> Capsule {
    let signals: Vec<&str> = found
        .signals
        .iter()
        .take(MAX_CAPSULE_KEYWORDS)
        .map(String::as_str)
        .collect();
    let mut capsule = Capsule::new(
        &format!("Breakthrough: {}", found.title),
        &format!(
            "{} signals a {} breakthrough in {} (significance {:.0}).",
            found.title,
            found.kind.as_str(),
            found.domain,
            found.significance,
        ),
    )
    .with_domain(&found.domain)
    .with_keywords(&signals)
    .with_score((found.significance / 100.0).clamp(0.0, 1.0));
    capsule.source_topic_id = Some(found.topic_id.clone());
    capsule.metadata.insert("origin".into(), json!(SYNTHESIS_ORIGIN));
    capsule.metadata.insert("pattern".into(), json!("breakthrough"));
    capsule.metadata.insert("kind".into(), json!(found.kind));
    capsule
}

/// Capsules for every connection above `fusion_min_strength` and every
/// breakthrough above `fusion_min_significance`, at most `fusion_max_capsules`.
pub fn synthesize_capsules(reports: &[EmergenceReport], config: &DetectorConfig) -> Vec<Capsule> {
    let connections = reports.iter().filter_map(|r| match &r.details {
        PatternDetails::CrossDomain { connections } => Some(connections),
        _ => None,
    });
    let breakthroughs = reports.iter().filter_map(|r| match &r.details {
        PatternDetails::Breakthrough { topics } => Some(topics),
        _ => None,
    });

    connections
        .flatten()
        .filter(|c| c.strength > config.fusion_min_strength)
        .map(connection_capsule)
        .chain(
            breakthroughs
                .flatten()
                .filter(|b| b.significance > config.fusion_min_significance)
                .map(breakthrough_capsule),
        )
        .take(config.fusion_max_capsules)
        .collect()
}

/// Store synthesized capsules. A capsule drawn from a topic is linked back to
/// it with a `derived_from` edge.
pub fn save_synthesized<S: KnowledgeStore + ?Sized>(
    store: &mut S,
    capsules: &[Capsule],
) -> Result<usize> {
    for capsule in capsules {
        let saved = store.add_capsule(capsule.clone())?;
        if let Some(topic_id) = &saved.source_topic_id {
            store.add_relationship(Relationship::new(
                (EntityKind::Capsule, saved.id.as_str()),
                (EntityKind::Topic, topic_id.as_str()),
                DERIVED_FROM,
                saved.score,
            ))?;
        }
    }
    Ok(capsules.len())
}
