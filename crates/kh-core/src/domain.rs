//! Domain names: normalization and the adjacency table behind "similar domain"
//! scoring.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bilingual aliases folded onto canonical domain names.
const ALIASES: &[(&str, &str)] = &[
    ("神经科学", "neuroscience"),
    ("人工智能", "ai"),
    ("artificial intelligence", "ai"),
    ("伦理", "ethics"),
    ("材料科学", "materials"),
    ("材料", "materials"),
    ("医学", "medical"),
    ("medicine", "medical"),
    ("物理", "physics"),
    ("技术", "technology"),
    ("合成生物", "biotech"),
    ("biotechnology", "biotech"),
    ("气候", "climate"),
];

/// Canonical form of a domain name: trimmed, lowercased, aliases folded.
/// Empty names normalize to `None`.
pub fn normalize_domain(domain: &str) -> Option<String> {
    let lowered = domain.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    let canonical = ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered);
    Some(canonical)
}

/// Directional "similar domain" table.
///
/// Entries are stored as written in configuration; `are_similar` checks both
/// orderings, so a one-sided entry still links the pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainAdjacency {
    table: BTreeMap<String, Vec<String>>,
}

impl DomainAdjacency {
    pub fn empty() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    pub fn from_pairs(entries: &[(&str, &[&str])]) -> Self {
        let table = entries
            .iter()
            .map(|(domain, similar)| {
                (
                    domain.to_string(),
                    similar.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect();
        Self { table }
    }

    fn lists(&self, from: &str, to: &str) -> bool {
        self.table.iter().any(|(domain, similar)| {
            normalize_domain(domain).as_deref() == Some(from)
                && similar
                    .iter()
                    .any(|s| normalize_domain(s).as_deref() == Some(to))
        })
    }

    /// True if either domain lists the other as similar.
    pub fn are_similar(&self, a: &str, b: &str) -> bool {
        let (Some(a), Some(b)) = (normalize_domain(a), normalize_domain(b)) else {
            return false;
        };
        self.lists(&a, &b) || self.lists(&b, &a)
    }
}

impl Default for DomainAdjacency {
    fn default() -> Self {
        Self::from_pairs(&[
            ("neuroscience", &["ai", "medical"]),
            ("ai", &["technology", "neuroscience"]),
            ("materials", &["medical", "technology"]),
            ("medical", &["biotech"]),
            ("physics", &["materials"]),
            ("climate", &["physics"]),
        ])
    }
}
