//! Knowledge hub correlation and emergence engine.
//!
//! Scores relatedness between topics and capsules reported by independent
//! sources ("salons"), scans the newest topics for emergent patterns, and
//! keeps the registry of fusion sessions those patterns propose.
//!
//! Zero I/O: storage sits behind the `KnowledgeStore` trait and transport
//! belongs to the caller.

pub mod analysis;
pub mod collision;
pub mod constants;
pub mod detector;
pub mod domain;
pub mod error;
pub mod memory;
pub mod model;
pub mod patterns;
pub mod router;
pub mod scenario;
pub mod store;
pub mod synthesis;
pub mod time;
pub mod tokenizer;
pub mod trends;

pub use analysis::{InsightOutcome, TopicAnalysis, analyze, generate_insight};
pub use collision::{CollisionConfig, CollisionReport, EmergedCapsule, run_collisions, save_emerged};
pub use constants::{DETECTION_WINDOW, RELEVANCE_THRESHOLD};
pub use detector::{EmergenceDetector, EmergenceReport, FusionOutcome, FusionRequest};
pub use domain::{DomainAdjacency, normalize_domain};
pub use error::{CoreError, Result};
pub use memory::MemoryStore;
pub use model::{
    Capsule, DomainSubgraph, EntityKind, FusionSession, InitialData, Insight, Overview,
    Relationship, SessionStatus, SourceRecord, SourceStatus, Topic, Update,
};
pub use patterns::{BreakthroughKind, DetectorConfig, PatternCheck, PatternDetails};
pub use router::{KnowledgeItem, Relevance, RelevanceRouter, RouteAction, RouteDecision, RouterConfig};
pub use scenario::{GenericScenario, KeywordScenario, Scenario, ScenarioConfig};
pub use store::{CapsuleQuery, KnowledgeStore, TopicQuery};
pub use synthesis::{save_synthesized, synthesize_capsules};
pub use trends::{TrendReport, predict_trends};
