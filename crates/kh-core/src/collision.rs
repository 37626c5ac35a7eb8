//! Capsule collision: pair capsules by bag-of-words similarity, score the
//! pairs for emergence, and fuse the strongest into new capsules.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::{
    COLLISION_MAX_KEYWORDS, COLLISION_MAX_PAIRS, COLLISION_MIN_SCORE,
    COLLISION_SIMILARITY_THRESHOLD, COLLISION_TITLE_DUPLICATE, UNKNOWN_DOMAIN,
};
use crate::error::Result;
use crate::model::{Capsule, EntityKind, Relationship};
use crate::store::KnowledgeStore;
use crate::tokenizer::{cosine, jaccard, normalize_keywords, term_frequencies, title_words};

pub const DERIVED_FROM: &str = "derived_from";

const TITLE_PREVIEW_CHARS: usize = 20;
const INSIGHT_PREVIEW_CHARS: usize = 150;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    pub similarity_threshold: f64,
    pub max_pairs: usize,
    /// Emergence score (0-100) a pair needs to fuse.
    pub min_score: f64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: COLLISION_SIMILARITY_THRESHOLD,
            max_pairs: COLLISION_MAX_PAIRS,
            min_score: COLLISION_MIN_SCORE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionType {
    CrossDomain,
    Complementary,
    SameDomain,
}

impl CollisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollisionType::CrossDomain => "cross_domain",
            CollisionType::Complementary => "complementary",
            CollisionType::SameDomain => "same_domain",
        }
    }

    fn bonus(&self) -> f64 {
        match self {
            CollisionType::CrossDomain => 30.0,
            CollisionType::Complementary => 20.0,
            CollisionType::SameDomain => 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollisionPair<'a> {
    pub a: &'a Capsule,
    pub b: &'a Capsule,
    pub similarity: f64,
    pub collision_type: CollisionType,
    pub shared_keywords: Vec<String>,
}

impl CollisionPair<'_> {
    /// Type bonus + similarity×30 + min(8×shared, 20) + min((scoreA+scoreB)×30, 20),
    /// capped at 100.
    pub fn emergence_score(&self) -> f64 {
        let shared = f64::min(8.0 * self.shared_keywords.len() as f64, 20.0);
        let quality = f64::min((self.a.score + self.b.score) * 30.0, 20.0);
        let score = self.collision_type.bonus() + self.similarity * 30.0 + shared + quality;
        f64::min(score, 100.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmergedCapsule {
    pub capsule: Capsule,
    pub parents: [String; 2],
    pub collision_type: CollisionType,
    pub similarity: f64,
    pub emergence_score: f64,
}

impl EmergedCapsule {
    /// `derived_from` edges from the emerged capsule to both parents.
    pub fn relationships(&self) -> Vec<Relationship> {
        let strength = (self.emergence_score / 100.0).clamp(0.0, 1.0);
        self.parents
            .iter()
            .map(|parent| {
                Relationship::new(
                    (EntityKind::Capsule, self.capsule.id.as_str()),
                    (EntityKind::Capsule, parent.as_str()),
                    DERIVED_FROM,
                    strength,
                )
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollisionReport {
    pub capsules_considered: usize,
    pub pairs: usize,
    pub emerged: Vec<EmergedCapsule>,
}

fn capsule_text(capsule: &Capsule) -> String {
    format!(
        "{} {} {}",
        capsule.title,
        capsule.insight_text,
        capsule.keywords.join(" ")
    )
}

fn domain_label(capsule: &Capsule) -> &str {
    match capsule.domain.as_deref() {
        Some(d) if !d.trim().is_empty() => d,
        _ => UNKNOWN_DOMAIN,
    }
}

fn preview(text: &str, chars: usize) -> String {
    let mut out: String = text.chars().take(chars).collect();
    if text.chars().count() > chars {
        out.push_str("...");
    }
    out
}

fn is_near_duplicate_title(a: &str, b: &str) -> bool {
    jaccard(&title_words(a), &title_words(b)) > COLLISION_TITLE_DUPLICATE
}

/// Case-insensitive shared keywords, in `a`'s order.
fn shared_keywords(a: &Capsule, b: &Capsule) -> Vec<String> {
    let set_b: HashSet<String> = normalize_keywords(&b.keywords).into_iter().collect();
    normalize_keywords(&a.keywords)
        .into_iter()
        .filter(|k| set_b.contains(k))
        .collect()
}

fn collision_type(a: &Capsule, b: &Capsule, shared: &[String]) -> CollisionType {
    if domain_label(a) != domain_label(b) {
        CollisionType::CrossDomain
    } else if !shared.is_empty() {
        CollisionType::Complementary
    } else {
        CollisionType::SameDomain
    }
}

/// Pairs of capsules similar enough to collide, most similar first.
///
/// Identical ids and near-duplicate titles never pair.
pub fn find_collision_pairs<'a>(
    capsules: &'a [Capsule],
    config: &CollisionConfig,
) -> Vec<CollisionPair<'a>> {
    let vectors: Vec<HashMap<String, usize>> = capsules
        .iter()
        .map(|c| term_frequencies(&capsule_text(c)))
        .collect();

    let mut pairs = Vec::new();
    for (i, a) in capsules.iter().enumerate() {
        for (j, b) in capsules.iter().enumerate().skip(i + 1) {
            if a.id == b.id || is_near_duplicate_title(&a.title, &b.title) {
                continue;
            }
            let similarity = cosine(&vectors[i], &vectors[j]);
            if similarity < config.similarity_threshold {
                continue;
            }
            let shared = shared_keywords(a, b);
            pairs.push(CollisionPair {
                a,
                b,
                similarity,
                collision_type: collision_type(a, b, &shared),
                shared_keywords: shared,
            });
        }
    }

    pairs.sort_by(|x, y| y.similarity.total_cmp(&x.similarity));
    pairs.truncate(config.max_pairs);
    pairs
}

/// Fuse a pair into a new capsule, or `None` when it scores below `min_score`.
pub fn collide(pair: &CollisionPair<'_>, config: &CollisionConfig) -> Option<EmergedCapsule> {
    let score = pair.emergence_score();
    if score < config.min_score {
        return None;
    }
    let (a, b) = (pair.a, pair.b);

    let title = match pair.collision_type {
        CollisionType::CrossDomain => {
            format!("Cross-domain fusion: {} + {}", domain_label(a), domain_label(b))
        }
        _ => format!(
            "Knowledge fusion: {} + {}",
            preview(&a.title, TITLE_PREVIEW_CHARS),
            preview(&b.title, TITLE_PREVIEW_CHARS)
        ),
    };

    let mut lines = match pair.collision_type {
        CollisionType::CrossDomain => vec![
            format!(
                "Cross-domain analysis links {} and {}:",
                domain_label(a),
                domain_label(b)
            ),
            format!("- {}: {}", domain_label(a), preview(&a.insight_text, INSIGHT_PREVIEW_CHARS)),
            format!("- {}: {}", domain_label(b), preview(&b.insight_text, INSIGHT_PREVIEW_CHARS)),
        ],
        _ => vec![
            "Knowledge fusion:".to_string(),
            format!("- {}: {}", a.title, preview(&a.insight_text, INSIGHT_PREVIEW_CHARS)),
            format!("- {}: {}", b.title, preview(&b.insight_text, INSIGHT_PREVIEW_CHARS)),
        ],
    };
    if !pair.shared_keywords.is_empty() {
        lines.push(format!("Shared focus: {}", pair.shared_keywords.join(", ")));
    }

    let merged: Vec<String> = a.keywords.iter().chain(b.keywords.iter()).cloned().collect();
    let mut keywords = normalize_keywords(&merged);
    keywords.truncate(COLLISION_MAX_KEYWORDS);

    let mut capsule = Capsule::new(&title, &lines.join("\n"));
    capsule.domain = Some(format!("{}+{}", domain_label(a), domain_label(b)));
    capsule.keywords = keywords;
    capsule.score = (score / 100.0).clamp(0.0, 1.0);
    let meta = &mut capsule.metadata;
    meta.insert("is_emergent".into(), true.into());
    meta.insert(
        "parent_capsules".into(),
        vec![a.id.clone(), b.id.clone()].into(),
    );
    meta.insert("collision_type".into(), pair.collision_type.as_str().into());
    meta.insert("emergence_score".into(), score.into());

    Some(EmergedCapsule {
        capsule,
        parents: [a.id.clone(), b.id.clone()],
        collision_type: pair.collision_type,
        similarity: pair.similarity,
        emergence_score: score,
    })
}

/// Find pairs and fuse every one that clears `min_score`.
pub fn run_collisions(capsules: &[Capsule], config: &CollisionConfig) -> CollisionReport {
    let pairs = find_collision_pairs(capsules, config);
    let emerged = pairs.iter().filter_map(|p| collide(p, config)).collect();
    CollisionReport {
        capsules_considered: capsules.len(),
        pairs: pairs.len(),
        emerged,
    }
}

/// Persist emerged capsules with their `derived_from` edges.
pub fn save_emerged<S: KnowledgeStore + ?Sized>(
    store: &mut S,
    emerged: &[EmergedCapsule],
) -> Result<usize> {
    for item in emerged {
        store.add_capsule(item.capsule.clone())?;
        for rel in item.relationships() {
            store.add_relationship(rel)?;
        }
    }
    Ok(emerged.len())
}
