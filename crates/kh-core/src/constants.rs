/// Relevance weight of the domain axis
pub const DOMAIN_WEIGHT: f64 = 0.3;

/// Relevance weight of the keyword axis
pub const KEYWORD_WEIGHT: f64 = 0.3;

/// Relevance weight of the temporal axis
pub const TEMPORAL_WEIGHT: f64 = 0.2;

/// Relevance weight of the spatial axis
pub const SPATIAL_WEIGHT: f64 = 0.2;

/// Score at or above which two items count as related
pub const RELEVANCE_THRESHOLD: f64 = 0.7;

/// Domain score for two domains linked in the adjacency table
pub const SIMILAR_DOMAIN_SCORE: f64 = 0.8;

/// Fixed confidence reported with an archive decision
pub const ARCHIVE_CONFIDENCE: f64 = 0.8;

/// Temporal buckets: (max day gap, score). Anything beyond scores `TEMPORAL_FLOOR`.
pub const TEMPORAL_BUCKETS: [(f64, f64); 3] = [(7.0, 1.0), (30.0, 0.7), (90.0, 0.4)];

/// Temporal score for gaps beyond the last bucket
pub const TEMPORAL_FLOOR: f64 = 0.2;

/// Temporal score when either timestamp is missing
pub const TEMPORAL_UNKNOWN: f64 = 0.5;

/// Spatial contributions: shared author, same salon, same originating topic
pub const SPATIAL_AUTHOR: f64 = 0.5;
pub const SPATIAL_SALON: f64 = 0.3;
pub const SPATIAL_TOPIC: f64 = 0.2;

/// Number of newest topics the detector scans
pub const DETECTION_WINDOW: usize = 50;

/// Minimum shared keywords for a cross-domain connection
pub const CROSS_DOMAIN_MIN_COMMON: usize = 2;

/// Common keywords reported per cross-domain connection
pub const CROSS_DOMAIN_REPORTED: usize = 5;

/// Pairwise similarity a topic must exceed to join a consensus group
pub const CONSENSUS_THRESHOLD: f64 = 0.8;

/// Divergent keyword count a domain must exceed to fire
pub const DIVERGENCE_MIN: usize = 3;

/// Divergent keywords reported per domain
pub const DIVERGENCE_REPORTED: usize = 10;

/// Bucket name for topics without a domain
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// Default page size for store queries
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// Per-kind cap on a domain subgraph
pub const SUBGRAPH_LIMIT: usize = 50;

/// Impact score bounds used by topic analysis
pub const IMPACT_BASE: u32 = 50;
pub const IMPACT_MAX: u32 = 100;

/// Consensus similarity weights: title-word Jaccard, keyword Jaccard, and the
/// bonus for an equal (present) domain
pub const CONSENSUS_TITLE_WEIGHT: f64 = 0.3;
pub const CONSENSUS_KEYWORD_WEIGHT: f64 = 0.6;
pub const CONSENSUS_DOMAIN_BONUS: f64 = 0.1;

/// Terms that mark a keyword as a breakthrough signal (substring match)
pub const BREAKTHROUGH_LEXICON: &[&str] = &[
    "breakthrough",
    "innovation",
    "paradigm",
    "revolution",
    "first",
    "突破",
    "创新",
    "范式",
    "革命",
    "首次",
    "颠覆",
];

/// Breakthrough classification cues, tried in order: method, data, concept
pub const METHOD_CUES: &[&str] = &[
    "new method",
    "novel method",
    "breakthrough",
    "innovation",
    "first-ever",
    "end-to-end",
    "revolutionary",
    "新方法",
    "突破",
    "创新",
    "首次",
    "端到端",
    "革命性",
];
pub const DATA_CUES: &[&str] = &[
    "large-scale",
    "new data",
    "dataset",
    "high-resolution",
    "real-time",
    "大规模",
    "新数据",
    "数据集",
    "高分辨率",
    "实时",
];
pub const CONCEPT_CUES: &[&str] = &[
    "paradigm",
    "theory",
    "concept",
    "framework",
    "新范式",
    "理论",
    "概念",
    "框架",
    "模型重构",
];

/// Cues that a topic bridges disciplines
pub const INTERDISCIPLINARY_CUES: &[&str] = &[
    "interdisciplinary",
    "cross-disciplinary",
    "fusion",
    "integration",
    "跨学科",
    "融合",
    "结合",
    "集成",
];

/// Breakthrough significance: points per matched cue, per evidence item (up
/// to the evidence cap), and for an interdisciplinary cue. Capped at 100.
pub const SIGNIFICANCE_PER_CUE: f64 = 15.0;
pub const SIGNIFICANCE_PER_EVIDENCE: f64 = 10.0;
pub const SIGNIFICANCE_EVIDENCE_CAP: f64 = 30.0;
pub const SIGNIFICANCE_INTERDISCIPLINARY: f64 = 20.0;
pub const SIGNIFICANCE_MAX: f64 = 100.0;

/// Capsule synthesis from emergence reports: a connection must exceed this
/// strength, a breakthrough this significance; at most this many capsules
pub const FUSION_MIN_STRENGTH: f64 = 0.05;
pub const FUSION_MIN_SIGNIFICANCE: f64 = 50.0;
pub const FUSION_MAX_CAPSULES: usize = 10;

/// Keyword frequency above which a trend counts as rising
pub const TREND_RISING_MIN: usize = 3;

/// Domain count above which growth counts as high
pub const TREND_HIGH_GROWTH_MIN: usize = 3;

/// Keywords reported by a trend prediction
pub const TREND_TOP_KEYWORDS: usize = 5;

/// Capsule collision defaults
pub const COLLISION_SIMILARITY_THRESHOLD: f64 = 0.2;
pub const COLLISION_MAX_PAIRS: usize = 100;
pub const COLLISION_MIN_SCORE: f64 = 50.0;
pub const COLLISION_TITLE_DUPLICATE: f64 = 0.5;
pub const COLLISION_MAX_KEYWORDS: usize = 10;
