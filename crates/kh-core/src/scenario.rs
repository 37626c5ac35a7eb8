//! Scenario capability: how updates are classified into domains and which
//! extra detection passes run on top of the built-in ones.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::normalize_domain;
use crate::model::{Topic, Update};
use crate::patterns::{DetectorConfig, PatternCheck, PatternDetails};
use crate::tokenizer::{keyword_set, tokenize};
use crate::trends::predict_trends;

pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Domain for the topic recorded from `update`, if one can be decided.
    fn classify(&self, update: &Update) -> Option<String>;

    /// Passes appended after the built-in checks.
    fn extra_checks(&self) -> Vec<Box<dyn PatternCheck>> {
        Vec::new()
    }
}

/// Trusts the domain each update declares.
#[derive(Clone, Debug, Default)]
pub struct GenericScenario;

impl Scenario for GenericScenario {
    fn name(&self) -> &str {
        "generic"
    }

    fn classify(&self, update: &Update) -> Option<String> {
        update.domain.as_deref().and_then(normalize_domain)
    }
}

/// Classifies by counting per-domain keyword hits over an update's title,
/// content and keywords. Falls back to the declared domain on zero hits.
///
/// Latin-script terms match whole words (or whole word runs for multi-word
/// terms), so "ai" never hits "brain". Terms in scripts written without
/// spaces match as substrings.
#[derive(Clone, Debug)]
pub struct KeywordScenario {
    name: String,
    table: BTreeMap<String, Vec<String>>,
}

impl KeywordScenario {
    pub fn new(name: &str, table: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            name: name.to_string(),
            table,
        }
    }

    /// Brain-computer-interface vocabulary, English and Chinese.
    pub fn bci() -> Self {
        let entries: &[(&str, &[&str])] = &[
            (
                "neuroscience",
                &[
                    "neural", "brain", "cortex", "neuron", "synaptic", "motor", "sensory",
                    "neuroplasticity", "神经", "大脑", "皮层", "突触", "运动皮层", "感觉反馈",
                    "神经可塑性",
                ],
            ),
            (
                "ai",
                &[
                    "ai", "ml", "deep learning", "algorithm", "neural network", "model",
                    "decoding", "end-to-end", "personalized", "机器学习", "深度学习", "解码",
                    "算法", "神经网络", "端到端", "个性化",
                ],
            ),
            (
                "ethics",
                &[
                    "ethics", "privacy", "fairness", "rights", "enhancement", "access", "伦理",
                    "隐私", "公平", "权利", "增强", "边界",
                ],
            ),
            (
                "materials",
                &[
                    "material", "electrode", "flexible", "biocompatible", "nano", "polymer",
                    "conductive", "材料", "电极", "柔性", "生物相容", "纳米", "聚合物", "导电",
                ],
            ),
            (
                "medical",
                &[
                    "clinical", "rehabilitation", "therapy", "patient", "medical", "treatment",
                    "临床", "康复", "治疗", "患者", "医疗", "运动障碍",
                ],
            ),
            (
                "physics",
                &["gravity", "physics", "force", "quantum", "mechanics", "重力", "物理", "力学", "量子"],
            ),
            (
                "technology",
                &["technology", "invention", "device", "innovation", "技术", "发明", "创新", "设备"],
            ),
            (
                "biotech",
                &["synthetic biology", "biology", "genetic", "合成生物", "生物", "遗传"],
            ),
        ];
        let table = entries
            .iter()
            .map(|(domain, words)| {
                (
                    domain.to_string(),
                    words.iter().map(|w| w.to_string()).collect(),
                )
            })
            .collect();
        Self::new("bci", table)
    }

    fn hits(&self, text: &UpdateText) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;
        for (domain, words) in &self.table {
            let count = words.iter().filter(|w| text.matches(w)).count();
            // Strictly greater keeps the first domain (table order) on ties.
            if count > 0 && best.is_none_or(|(_, b)| count > b) {
                best = Some((domain.as_str(), count));
            }
        }
        best.map(|(domain, _)| domain)
    }
}

/// An update's searchable text: raw lowercase, word tokens, whole keywords.
struct UpdateText {
    raw: String,
    tokens: Vec<String>,
    keywords: HashSet<String>,
}

impl UpdateText {
    fn new(update: &Update) -> Self {
        let raw = format!(
            "{} {} {}",
            update.title,
            update.content,
            update.keywords.join(" ")
        )
        .to_lowercase();
        Self {
            tokens: tokenize(&raw),
            keywords: keyword_set(&update.keywords),
            raw,
        }
    }

    fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return false;
        }
        if !term.is_ascii() {
            return self.raw.contains(&term);
        }
        if self.keywords.contains(&term) {
            return true;
        }
        let words = tokenize(&term);
        !words.is_empty() && self.tokens.windows(words.len()).any(|run| run == words.as_slice())
    }
}

impl Scenario for KeywordScenario {
    fn name(&self) -> &str {
        &self.name
    }

    fn classify(&self, update: &Update) -> Option<String> {
        self.hits(&UpdateText::new(update))
            .map(str::to_string)
            .or_else(|| update.domain.as_deref().and_then(normalize_domain))
    }

    fn extra_checks(&self) -> Vec<Box<dyn PatternCheck>> {
        vec![Box::new(TrendCheck)]
    }
}

/// Fires when some keyword is trending upward across the window.
pub struct TrendCheck;

impl PatternCheck for TrendCheck {
    fn name(&self) -> &str {
        "trend"
    }

    fn description(&self) -> &str {
        "Keywords are rising across recent topics"
    }

    fn check(&self, topics: &[Topic], _config: &DetectorConfig) -> Option<PatternDetails> {
        let trends = predict_trends(topics);
        trends.has_rising().then_some(PatternDetails::Trend { trends })
    }
}

/// `[scenario]` configuration section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// `"generic"` (default) or `"keyword"`; `"bci"` selects the keyword
    /// scenario with the built-in table.
    pub name: Option<String>,
    /// Per-domain vocabulary for the keyword scenario. Replaces the built-in
    /// table when non-empty.
    pub domains: BTreeMap<String, Vec<String>>,
}

impl ScenarioConfig {
    pub fn build(&self) -> Box<dyn Scenario> {
        match self.name.as_deref() {
            Some("keyword") | Some("bci") if !self.domains.is_empty() => Box::new(
                KeywordScenario::new(self.name.as_deref().unwrap_or("keyword"), self.domains.clone()),
            ),
            Some("keyword") | Some("bci") => Box::new(KeywordScenario::bci()),
            _ => Box::new(GenericScenario),
        }
    }
}
