//! Emergence detector: runs the pattern checks over the newest topics and
//! owns the fusion-session registry.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::error::{CoreError, Result};
use crate::model::{
    Capsule, FUSION_SESSION_TYPE, FusionSession, Insight, SessionStatus, Topic, Update, new_id,
};
use crate::patterns::{CrossDomainCheck, DetectorConfig, PatternCheck, PatternDetails, default_checks};
use crate::scenario::Scenario;
use crate::store::{KnowledgeStore, TopicQuery, resolve_topics};
use crate::synthesis::synthesize_capsules;
use crate::time::now_iso8601;

/// Insight type under which fusion sessions are mirrored.
pub const FUSION_INSIGHT_TYPE: &str = "fusion_session";

/// A firing pattern: its name, a one-line description, and what it found.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmergenceReport {
    pub pattern: String,
    pub description: String,
    #[serde(flatten)]
    pub details: PatternDetails,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FusionRequest {
    /// Caller-chosen id; a fresh one is minted when absent.
    pub session_id: Option<String>,
    pub source_updates: Vec<Update>,
    pub related_salons: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FusionOutcome {
    FusionTriggered {
        session_id: String,
        emergence: EmergenceReport,
    },
    NoEmergence {
        message: String,
    },
    Error {
        error: String,
    },
}

pub struct EmergenceDetector {
    config: DetectorConfig,
    checks: Vec<Box<dyn PatternCheck>>,
    sessions: HashMap<String, FusionSession>,
}

impl Default for EmergenceDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl EmergenceDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            checks: default_checks(),
            sessions: HashMap::new(),
        }
    }

    /// Built-in checks followed by the scenario's extra passes.
    pub fn with_scenario(config: DetectorConfig, scenario: &dyn Scenario) -> Self {
        let mut detector = Self::new(config);
        detector.checks.extend(scenario.extra_checks());
        detector
    }

    pub fn add_check(&mut self, check: Box<dyn PatternCheck>) {
        self.checks.push(check);
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Capsules for the strongest connections and breakthroughs in `reports`.
    pub fn synthesize(&self, reports: &[EmergenceReport]) -> Vec<Capsule> {
        synthesize_capsules(reports, &self.config)
    }

    pub fn pattern_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check over `topics`, in check order.
    pub fn check_topics(&self, topics: &[Topic]) -> Vec<EmergenceReport> {
        self.checks
            .iter()
            .filter_map(|check| {
                check.check(topics, &self.config).map(|details| EmergenceReport {
                    pattern: check.name().to_string(),
                    description: check.description().to_string(),
                    details,
                })
            })
            .collect()
    }

    /// Run every check over the newest `window` topics in the store.
    pub fn check_all<S: KnowledgeStore + ?Sized>(&self, store: &S) -> Result<Vec<EmergenceReport>> {
        let topics = store.query_topics(&TopicQuery::newest(self.config.window))?;
        Ok(self.check_topics(&topics))
    }

    /// Register a pending session and mirror it into the store as an insight.
    /// A caller-chosen id that is already registered is a `Validation` error.
    pub fn create_fusion_session<S: KnowledgeStore + ?Sized>(
        &mut self,
        store: &mut S,
        request: FusionRequest,
    ) -> Result<FusionSession> {
        let id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_id);
        if self.sessions.contains_key(&id) {
            return Err(CoreError::Validation(format!(
                "fusion session {id} already exists"
            )));
        }
        let related: BTreeSet<String> = request
            .related_salons
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();

        let session = FusionSession {
            id: id.clone(),
            session_type: FUSION_SESSION_TYPE.to_string(),
            source_updates: request.source_updates,
            related_salon_ids: related.into_iter().collect(),
            status: SessionStatus::Pending,
            created_at: now_iso8601(),
        };

        let mut mirror = Insight::new(
            FUSION_INSIGHT_TYPE,
            &format!(
                "Fusion session {id} across {}",
                session.related_salon_ids.join(", ")
            ),
        );
        mirror.source_topic_ids = session
            .source_updates
            .iter()
            .flat_map(|u| u.id.iter().chain(u.topics.iter()).cloned())
            .collect();
        mirror.common_keywords = session
            .source_updates
            .iter()
            .flat_map(|u| u.keywords.iter().map(|k| k.to_lowercase()))
            .collect();
        mirror.created_at = session.created_at.clone();
        store.add_insight(mirror)?;

        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Check the given topics for a cross-domain connection and open a
    /// session when one exists. Unresolvable ids are dropped.
    pub fn trigger_fusion<S: KnowledgeStore + ?Sized>(
        &mut self,
        store: &mut S,
        topic_ids: &[String],
    ) -> Result<FusionOutcome> {
        let topics = resolve_topics(&*store, topic_ids)?;
        if topics.len() < 2 {
            return Ok(FusionOutcome::Error {
                error: "at least two existing topics are required".to_string(),
            });
        }

        let check = CrossDomainCheck;
        let Some(details) = check.check(&topics, &self.config) else {
            return Ok(FusionOutcome::NoEmergence {
                message: format!("no cross-domain emergence among {} topics", topics.len()),
            });
        };

        let salons: Vec<String> = topics
            .iter()
            .filter_map(|t| t.source_salon_id.clone())
            .collect();
        let session = self.create_fusion_session(
            store,
            FusionRequest {
                session_id: None,
                source_updates: topics.iter().map(Update::from).collect(),
                related_salons: salons,
            },
        )?;

        Ok(FusionOutcome::FusionTriggered {
            session_id: session.id,
            emergence: EmergenceReport {
                pattern: check.name().to_string(),
                description: check.description().to_string(),
                details,
            },
        })
    }

    pub fn get_session(&self, id: &str) -> Option<&FusionSession> {
        self.sessions.get(id)
    }

    /// All sessions, oldest first.
    pub fn sessions(&self) -> Vec<&FusionSession> {
        let mut sessions: Vec<&FusionSession> = self.sessions.values().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Transition a session. The detector itself only ever creates pending
    /// sessions; activation and resolution come from outside.
    pub fn set_session_status(&mut self, id: &str, status: SessionStatus) -> Result<()> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("fusion session", id))?;
        session.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn seed(store: &mut MemoryStore) {
        store
            .add_topic(
                Topic::new("Motor decoding")
                    .with_id("t1")
                    .with_domain("neuroscience")
                    .with_source("neuro")
                    .with_keywords(&["decoding", "latency"]),
            )
            .unwrap();
        store
            .add_topic(
                Topic::new("Fast inference")
                    .with_id("t2")
                    .with_domain("ai")
                    .with_source("ml")
                    .with_keywords(&["decoding", "latency", "transformer"]),
            )
            .unwrap();
        store
            .add_topic(
                Topic::new("Consent")
                    .with_id("t3")
                    .with_domain("ethics")
                    .with_source("ethics")
                    .with_keywords(&["privacy"]),
            )
            .unwrap();
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_check_all_empty_store() {
        let detector = EmergenceDetector::default();
        let store = MemoryStore::new();
        assert!(detector.check_all(&store).unwrap().is_empty());
    }

    #[test]
    fn test_check_all_reports_in_declaration_order() {
        let detector = EmergenceDetector::default();
        let mut store = MemoryStore::new();
        seed(&mut store);
        store
            .add_topic(Topic::new("New paradigm").with_keywords(&["paradigm"]))
            .unwrap();

        let reports = detector.check_all(&store).unwrap();
        let names: Vec<&str> = reports.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(names, vec!["cross_domain", "breakthrough"]);
    }

    #[test]
    fn test_report_serializes_flat() {
        let detector = EmergenceDetector::default();
        let mut store = MemoryStore::new();
        seed(&mut store);
        let reports = detector.check_all(&store).unwrap();
        let json = serde_json::to_value(&reports[0]).unwrap();
        assert_eq!(json["pattern"], "cross_domain");
        assert!(json["connections"].is_array());
    }

    #[test]
    fn test_trigger_fusion_single_id_is_error() {
        let mut detector = EmergenceDetector::default();
        let mut store = MemoryStore::new();
        seed(&mut store);
        let outcome = detector.trigger_fusion(&mut store, &ids(&["t1"])).unwrap();
        assert!(matches!(outcome, FusionOutcome::Error { .. }));

        let outcome = detector
            .trigger_fusion(&mut store, &ids(&["t1", "missing"]))
            .unwrap();
        assert!(matches!(outcome, FusionOutcome::Error { .. }));
    }

    #[test]
    fn test_trigger_fusion_repeated_id_counts_once() {
        let mut detector = EmergenceDetector::default();
        let mut store = MemoryStore::new();
        seed(&mut store);
        let outcome = detector.trigger_fusion(&mut store, &ids(&["t2", "t2"])).unwrap();
        assert!(matches!(outcome, FusionOutcome::Error { .. }));
        assert!(detector.sessions().is_empty());
    }

    #[test]
    fn test_trigger_fusion_unrelated_pair() {
        let mut detector = EmergenceDetector::default();
        let mut store = MemoryStore::new();
        seed(&mut store);
        let outcome = detector.trigger_fusion(&mut store, &ids(&["t1", "t3"])).unwrap();
        assert!(matches!(outcome, FusionOutcome::NoEmergence { .. }));
        assert!(detector.sessions().is_empty());
    }

    #[test]
    fn test_trigger_fusion_opens_pending_session() {
        let mut detector = EmergenceDetector::default();
        let mut store = MemoryStore::new();
        seed(&mut store);
        let outcome = detector.trigger_fusion(&mut store, &ids(&["t1", "t2"])).unwrap();
        let FusionOutcome::FusionTriggered { session_id, emergence } = outcome else {
            panic!("expected a triggered fusion");
        };
        assert_eq!(emergence.pattern, "cross_domain");

        let session = detector.get_session(&session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.session_type, "cross_salon_fusion");
        assert_eq!(session.related_salon_ids, vec!["ml", "neuro"]);

        let mirrored = store.query_insights(Some(FUSION_INSIGHT_TYPE), 10).unwrap();
        assert_eq!(mirrored.len(), 1);
    }

    #[test]
    fn test_fusion_outcome_wire_shape() {
        let outcome = FusionOutcome::NoEmergence {
            message: "none".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "no_emergence");
        assert_eq!(json["message"], "none");
    }

    #[test]
    fn test_create_session_honours_given_id() {
        let mut detector = EmergenceDetector::default();
        let mut store = MemoryStore::new();
        let session = detector
            .create_fusion_session(
                &mut store,
                FusionRequest {
                    session_id: Some("s-1".into()),
                    source_updates: vec![],
                    related_salons: vec!["b".into(), "a".into(), "b".into()],
                },
            )
            .unwrap();
        assert_eq!(session.id, "s-1");
        assert_eq!(session.related_salon_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_session_id_is_rejected() {
        let mut detector = EmergenceDetector::default();
        let mut store = MemoryStore::new();
        let request = |salon: &str| FusionRequest {
            session_id: Some("s-1".into()),
            source_updates: vec![],
            related_salons: vec![salon.into()],
        };
        detector.create_fusion_session(&mut store, request("a")).unwrap();

        let err = detector
            .create_fusion_session(&mut store, request("b"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(detector.get_session("s-1").unwrap().related_salon_ids, vec!["a"]);
        assert_eq!(store.query_insights(Some(FUSION_INSIGHT_TYPE), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_set_session_status() {
        let mut detector = EmergenceDetector::default();
        let mut store = MemoryStore::new();
        let session = detector
            .create_fusion_session(&mut store, FusionRequest::default())
            .unwrap();
        detector
            .set_session_status(&session.id, SessionStatus::Active)
            .unwrap();
        assert_eq!(
            detector.get_session(&session.id).unwrap().status,
            SessionStatus::Active
        );
        assert!(matches!(
            detector.set_session_status("nope", SessionStatus::Resolved),
            Err(CoreError::NotFound { .. })
        ));
    }
}
