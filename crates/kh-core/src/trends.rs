//! Frequency-based trend prediction over a set of topics.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{TREND_HIGH_GROWTH_MIN, TREND_RISING_MIN, TREND_TOP_KEYWORDS};
use crate::model::Topic;

pub const PREDICTION_PERIOD: &str = "next_3_months";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Stable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Growth {
    High,
    Medium,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeywordTrend {
    pub keyword: String,
    pub frequency: usize,
    pub trend: TrendDirection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainTrend {
    pub domain: String,
    pub count: usize,
    pub growth: Growth,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub rising_topics: Vec<KeywordTrend>,
    pub hot_domains: Vec<DomainTrend>,
    pub prediction_period: String,
}

impl TrendReport {
    pub fn has_rising(&self) -> bool {
        self.rising_topics
            .iter()
            .any(|t| t.trend == TrendDirection::Rising)
    }
}

/// Occurrence counts in first-seen order, sorted count-descending. The sort
/// is stable, so ties keep first-seen order.
fn ranked<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in values {
        let count = counts.entry(value.to_string()).or_insert(0);
        if *count == 0 {
            order.push(value.to_string());
        }
        *count += 1;
    }
    let mut ranked: Vec<(String, usize)> = order
        .into_iter()
        .map(|v| {
            let c = counts.get(&v).copied().unwrap_or_default();
            (v, c)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

/// Top keywords by occurrence and every domain by topic count.
pub fn predict_trends(topics: &[Topic]) -> TrendReport {
    let rising_topics = ranked(
        topics
            .iter()
            .flat_map(|t| t.keywords.iter().map(String::as_str)),
    )
    .into_iter()
    .take(TREND_TOP_KEYWORDS)
    .map(|(keyword, frequency)| KeywordTrend {
        keyword,
        frequency,
        trend: if frequency > TREND_RISING_MIN {
            TrendDirection::Rising
        } else {
            TrendDirection::Stable
        },
    })
    .collect();

    let hot_domains = ranked(topics.iter().map(Topic::domain_bucket))
        .into_iter()
        .map(|(domain, count)| DomainTrend {
            domain,
            count,
            growth: if count > TREND_HIGH_GROWTH_MIN {
                Growth::High
            } else {
                Growth::Medium
            },
        })
        .collect();

    TrendReport {
        rising_topics,
        hot_domains,
        prediction_period: PREDICTION_PERIOD.to_string(),
    }
}
