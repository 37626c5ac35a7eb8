use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s'-]").unwrap());
static APOSTROPHE_TRIM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^['-]+|['-]+$").unwrap());

/// Tokenize text into lowercase words.
/// Preserves apostrophes and hyphens within words (e.g., "don't", "end-to-end").
/// No stemming, no stop-word removal.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned = NON_WORD.replace_all(text, " ");
    cleaned
        .to_lowercase()
        .split_whitespace()
        .map(|t| APOSTROPHE_TRIM.replace_all(t, "").to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Distinct lowercase title words, the unit of title-word Jaccard.
pub fn title_words(title: &str) -> HashSet<String> {
    tokenize(title).into_iter().collect()
}

/// Lowercase, trim and deduplicate keywords, keeping first-seen order.
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect()
}

/// Case-insensitive keyword set.
pub fn keyword_set(keywords: &[String]) -> HashSet<String> {
    normalize_keywords(keywords).into_iter().collect()
}

/// Jaccard index |A ∩ B| / |A ∪ B|. Zero when either side is empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Case-insensitive keyword Jaccard over two keyword lists.
pub fn keyword_jaccard(a: &[String], b: &[String]) -> f64 {
    jaccard(&keyword_set(a), &keyword_set(b))
}

/// Term frequencies of `text`, for bag-of-words comparison.
pub fn term_frequencies(text: &str) -> HashMap<String, usize> {
    let mut tf = HashMap::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0) += 1;
    }
    tf
}

/// Cosine similarity between two term-frequency vectors.
pub fn cosine(a: &HashMap<String, usize>, b: &HashMap<String, usize>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(term, &x)| b.get(term).map(|&y| (x * y) as f64))
        .sum();
    let norm_a = a.values().map(|&x| (x * x) as f64).sum::<f64>().sqrt();
    let norm_b = b.values().map(|&y| (y * y) as f64).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
