//! Source orchestration: the registry of connected sources, the poll cycle
//! that turns their updates into topics, and the periodic monitor.
//!
//! The store, router, detector and scenario live behind one async mutex and
//! are only touched synchronously once it is held. Fetches run outside the
//! lock, concurrently, each bounded by the fetch timeout; every batch is
//! ingested as soon as its own fetch completes.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use kh_core::time::now_iso8601;
use kh_core::{
    Capsule, CoreError, EmergenceDetector, EmergenceReport, EntityKind, FusionOutcome, FusionRequest,
    FusionSession, InitialData, InsightOutcome, KnowledgeItem, KnowledgeStore, Relationship,
    RelevanceRouter, Result, RouteAction, Scenario, SourceRecord, SourceStatus, Topic,
    TopicAnalysis, TopicQuery, Update, save_synthesized,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::adapter::{SourceAdapter, SourceConfig, build_adapter};
use crate::config::{Config, OrchestratorConfig};
use crate::notify::{EVENT_CONNECTED, EVENT_EMERGENCE, EVENT_UPDATE, Notifier};

const RELATED: &str = "related";

struct Hub<S> {
    store: S,
    router: RelevanceRouter,
    detector: EmergenceDetector,
    scenario: Box<dyn Scenario>,
}

#[derive(Clone)]
struct ActiveSource {
    config: SourceConfig,
    adapter: Arc<dyn SourceAdapter>,
}

struct Shared<S> {
    hub: Mutex<Hub<S>>,
    sources: Mutex<Vec<ActiveSource>>,
    notifier: Arc<dyn Notifier>,
    settings: OrchestratorConfig,
    polling: AtomicBool,
}

struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectSummary {
    pub salon_id: String,
    pub kind: String,
    pub topics: usize,
    pub capsules: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceFailure {
    pub salon_id: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PollSummary {
    pub sources_polled: usize,
    pub updates: usize,
    pub topics_persisted: usize,
    pub relationships: usize,
    pub fusion_sessions: Vec<String>,
    pub failures: Vec<SourceFailure>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    Completed(PollSummary),
    /// Another poll was still in flight.
    Skipped,
}

/// Clears the in-flight flag on drop.
struct PollGuard<'a>(&'a AtomicBool);

impl<'a> PollGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn require_id(config: &SourceConfig) -> Result<()> {
    if config.id.trim().is_empty() {
        return Err(CoreError::Validation("source id is required".into()));
    }
    Ok(())
}

fn source_record(config: &SourceConfig, error: Option<String>) -> SourceRecord {
    SourceRecord {
        salon_id: config.id.clone(),
        kind: config.kind.clone(),
        location: config.location.clone(),
        status: if error.is_some() {
            SourceStatus::Failed
        } else {
            SourceStatus::Connected
        },
        error,
        updated_at: now_iso8601(),
    }
}

async fn handshake(config: &SourceConfig, adapter: &dyn SourceAdapter) -> Result<InitialData> {
    if !adapter.test_connection().await? {
        return Err(CoreError::connection(&config.id, "connection test failed"));
    }
    adapter.initial_data().await
}

/// Persist a source's seed data, tagging untagged records with `salon_id`.
/// Invalid records are skipped. Returns `(topics, capsules)` persisted.
pub fn import_initial<S: KnowledgeStore + ?Sized>(
    store: &mut S,
    salon_id: Option<&str>,
    initial: InitialData,
) -> (usize, usize) {
    let mut topics = 0;
    for mut topic in initial.topics {
        if topic.source_salon_id.is_none() {
            topic.source_salon_id = salon_id.map(str::to_string);
        }
        match store.add_topic(topic) {
            Ok(_) => topics += 1,
            Err(e) => tracing::warn!(?salon_id, error = %e, "skipping initial topic"),
        }
    }
    let mut capsules = 0;
    for mut capsule in initial.capsules {
        if capsule.source_salon_id.is_none() {
            capsule.source_salon_id = salon_id.map(str::to_string);
        }
        match store.add_capsule(capsule) {
            Ok(_) => capsules += 1,
            Err(e) => tracing::warn!(?salon_id, error = %e, "skipping initial capsule"),
        }
    }
    (topics, capsules)
}

/// Other active sources that already own a topic named in `references`.
fn overlapping_sources<S: KnowledgeStore>(
    store: &S,
    salon_id: &str,
    references: &HashSet<&str>,
    active: &[String],
) -> Vec<String> {
    if references.is_empty() {
        return Vec::new();
    }
    active
        .iter()
        .filter(|other| other.as_str() != salon_id)
        .filter(|other| match store.topic_ids_for_source(other) {
            Ok(owned) => references.iter().any(|r| owned.contains(*r)),
            Err(e) => {
                tracing::warn!(salon_id = %other, error = %e, "overlap lookup failed");
                false
            }
        })
        .cloned()
        .collect()
}

/// Route each fresh topic against other sources' recent topics and record a
/// `related` edge for every fuse decision. Returns the number of edges added.
fn link_related<S: KnowledgeStore>(hub: &mut Hub<S>, salon_id: &str, fresh: &[Topic], window: usize) -> usize {
    if fresh.is_empty() {
        return 0;
    }
    let recent = match hub.store.query_topics(&TopicQuery::newest(window)) {
        Ok(topics) => topics,
        Err(e) => {
            tracing::warn!(salon_id, error = %e, "recent topic lookup failed");
            return 0;
        }
    };
    let candidates: Vec<KnowledgeItem> = recent
        .iter()
        .filter(|t| t.source_salon_id.as_deref() != Some(salon_id))
        .map(KnowledgeItem::from)
        .collect();

    let mut linked = 0;
    for topic in fresh {
        let decision = hub.router.route(&KnowledgeItem::from(topic), &candidates);
        if decision.action != RouteAction::Fuse {
            continue;
        }
        let Some(target) = decision.target.as_deref() else {
            continue;
        };
        let rel = Relationship::new(
            (EntityKind::Topic, topic.id.as_str()),
            (EntityKind::Topic, target),
            RELATED,
            decision.confidence.clamp(0.0, 1.0),
        );
        match hub.store.add_relationship(rel) {
            Ok(()) => linked += 1,
            Err(e) => tracing::warn!(topic_id = %topic.id, error = %e, "failed to link topic"),
        }
    }
    linked
}

impl<S: KnowledgeStore + Send> Shared<S> {
    async fn poll_cycle(&self) -> PollOutcome {
        let Some(_guard) = PollGuard::acquire(&self.polling) else {
            tracing::debug!("previous poll still running, skipping");
            return PollOutcome::Skipped;
        };

        let sources = self.sources.lock().await.clone();
        let limit = Duration::from_secs(self.settings.fetch_timeout_secs.max(1));
        let mut fetches: FuturesUnordered<_> = sources
            .iter()
            .map(|source| async move {
                let result = tokio::time::timeout(limit, source.adapter.recent_updates())
                    .await
                    .unwrap_or_else(|_| {
                        Err(CoreError::connection(
                            &source.config.id,
                            format!("no response within {}s", limit.as_secs()),
                        ))
                    });
                (source, result)
            })
            .collect();

        let active: Vec<String> = sources.iter().map(|s| s.config.id.clone()).collect();
        let mut summary = PollSummary {
            sources_polled: sources.len(),
            ..PollSummary::default()
        };

        while let Some((source, result)) = fetches.next().await {
            match result {
                Ok(updates) => {
                    let mut hub = self.hub.lock().await;
                    self.ingest_batch(&mut hub, &source.config.id, updates, &active, &mut summary);
                }
                Err(e) => {
                    tracing::warn!(salon_id = %source.config.id, error = %e, "fetch failed");
                    summary.failures.push(SourceFailure {
                        salon_id: source.config.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            sources = summary.sources_polled,
            updates = summary.updates,
            fusion_sessions = summary.fusion_sessions.len(),
            failures = summary.failures.len(),
            "poll cycle complete"
        );
        PollOutcome::Completed(summary)
    }

    fn ingest_batch(
        &self,
        hub: &mut Hub<S>,
        salon_id: &str,
        updates: Vec<Update>,
        active: &[String],
        summary: &mut PollSummary,
    ) {
        let count = updates.len();
        summary.updates += count;

        let mut fresh = Vec::with_capacity(count);
        for update in &updates {
            let domain = hub.scenario.classify(update);
            let mut topic = update.to_topic(domain);
            topic.source_salon_id = Some(salon_id.to_string());
            match hub.store.add_topic(topic) {
                Ok(stored) => fresh.push(stored),
                Err(e) => tracing::warn!(salon_id, error = %e, "skipping update"),
            }
        }
        summary.topics_persisted += fresh.len();

        if self.settings.link_related {
            summary.relationships += link_related(hub, salon_id, &fresh, self.settings.recent_window);
        }

        let references: HashSet<&str> = updates
            .iter()
            .flat_map(|u| u.topics.iter().map(String::as_str))
            .collect();
        let implicated = overlapping_sources(&hub.store, salon_id, &references, active);
        if !implicated.is_empty() {
            let mut related_salons = vec![salon_id.to_string()];
            related_salons.extend(implicated);
            let request = FusionRequest {
                session_id: None,
                source_updates: updates.clone(),
                related_salons,
            };
            match hub.detector.create_fusion_session(&mut hub.store, request) {
                Ok(session) => {
                    let references: BTreeSet<&str> = references.iter().copied().collect();
                    self.notifier.emit(
                        EVENT_EMERGENCE,
                        json!({
                            "session_id": session.id,
                            "salon_id": salon_id,
                            "related_salons": session.related_salon_ids,
                            "references": references,
                        }),
                    );
                    summary.fusion_sessions.push(session.id);
                }
                Err(e) => tracing::warn!(salon_id, error = %e, "failed to open fusion session"),
            }
        }

        self.notifier.emit_to(
            salon_id,
            EVENT_UPDATE,
            json!({ "salon_id": salon_id, "count": count }),
        );
    }
}

/// Owns the hub state and the set of connected sources.
///
/// `inactive → monitoring → inactive`: `start` spawns the monitor, `stop`
/// cancels it. An in-flight poll is abandoned at its next await point, so
/// batches already ingested stay. Both are idempotent.
pub struct Orchestrator<S> {
    shared: Arc<Shared<S>>,
    monitor: Option<Monitor>,
}

impl<S: KnowledgeStore + Send + 'static> Orchestrator<S> {
    pub fn new(store: S, config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        let scenario = config.scenario.build();
        let detector = EmergenceDetector::with_scenario(config.detector.clone(), scenario.as_ref());
        let hub = Hub {
            store,
            router: RelevanceRouter::new(config.router.clone()),
            detector,
            scenario,
        };
        Self {
            shared: Arc::new(Shared {
                hub: Mutex::new(hub),
                sources: Mutex::new(Vec::new()),
                notifier,
                settings: config.orchestrator.clone(),
                polling: AtomicBool::new(false),
            }),
            monitor: None,
        }
    }

    // --- Sources ---

    /// Build the adapter for `config`, then connect it.
    pub async fn connect(&self, config: SourceConfig) -> Result<ConnectSummary> {
        require_id(&config)?;
        match build_adapter(&config) {
            Ok(adapter) => self.attach(config, Arc::from(adapter)).await,
            Err(e) => {
                self.record_failure(&config, &e).await;
                Err(e)
            }
        }
    }

    /// Test the connection, import the source's initial data and add it to
    /// the active set, replacing any earlier source with the same id. A
    /// failed attempt is recorded in the store before the error propagates.
    pub async fn attach(
        &self,
        config: SourceConfig,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Result<ConnectSummary> {
        require_id(&config)?;
        let initial = match handshake(&config, adapter.as_ref()).await {
            Ok(initial) => initial,
            Err(e) => {
                self.record_failure(&config, &e).await;
                return Err(e);
            }
        };

        let (topics, capsules) = {
            let mut hub = self.shared.hub.lock().await;
            let counts = import_initial(&mut hub.store, Some(config.id.as_str()), initial);
            hub.store.record_source(source_record(&config, None))?;
            counts
        };

        let summary = ConnectSummary {
            salon_id: config.id.clone(),
            kind: adapter.kind().to_string(),
            topics,
            capsules,
        };
        {
            let mut sources = self.shared.sources.lock().await;
            sources.retain(|s| s.config.id != config.id);
            sources.push(ActiveSource { config, adapter });
        }

        tracing::info!(salon_id = %summary.salon_id, topics, capsules, "source connected");
        self.shared.notifier.emit(
            EVENT_CONNECTED,
            json!({ "salon_id": summary.salon_id, "topics": topics, "capsules": capsules }),
        );
        Ok(summary)
    }

    async fn record_failure(&self, config: &SourceConfig, error: &CoreError) {
        tracing::warn!(salon_id = %config.id, error = %error, "source connection failed");
        let mut hub = self.shared.hub.lock().await;
        if let Err(e) = hub.store.record_source(source_record(config, Some(error.to_string()))) {
            tracing::warn!(salon_id = %config.id, error = %e, "failed to record source attempt");
        }
    }

    pub async fn active_sources(&self) -> Vec<String> {
        self.shared
            .sources
            .lock()
            .await
            .iter()
            .map(|s| s.config.id.clone())
            .collect()
    }

    // --- Polling ---

    /// Run one poll cycle now. Returns `Skipped` if one is already running.
    pub async fn poll_once(&self) -> PollOutcome {
        self.shared.poll_cycle().await
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    /// Spawn the monitor: one immediate poll, then one per interval. Ticks
    /// missed while a poll runs are skipped, never queued. Returns `false`
    /// if already monitoring.
    pub fn start(&mut self) -> bool {
        if self.monitor.is_some() {
            return false;
        }
        let period = Duration::from_secs(self.shared.settings.poll_interval_secs.max(1));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = shared.poll_cycle() => {}
                }
            }
        });

        tracing::info!(interval_secs = period.as_secs(), "monitor started");
        self.monitor = Some(Monitor { cancel, handle });
        true
    }

    pub async fn stop(&mut self) {
        let Some(monitor) = self.monitor.take() else {
            return;
        };
        monitor.cancel.cancel();
        if let Err(e) = monitor.handle.await {
            tracing::error!(error = %e, "monitor task failed");
        }
        tracing::info!("monitor stopped");
    }

    // --- On-demand ---

    pub async fn analyze(&self, topic_id: &str) -> Result<TopicAnalysis> {
        let hub = self.shared.hub.lock().await;
        kh_core::analyze(&hub.store, topic_id)
    }

    pub async fn generate_insight(&self, topic_ids: &[String]) -> Result<InsightOutcome> {
        let mut hub = self.shared.hub.lock().await;
        kh_core::generate_insight(&mut hub.store, topic_ids)
    }

    pub async fn check_emergence(&self) -> Result<Vec<EmergenceReport>> {
        let hub = self.shared.hub.lock().await;
        hub.detector.check_all(&hub.store)
    }

    pub async fn trigger_fusion(&self, topic_ids: &[String]) -> Result<FusionOutcome> {
        let mut guard = self.shared.hub.lock().await;
        let hub = &mut *guard;
        hub.detector.trigger_fusion(&mut hub.store, topic_ids)
    }

    /// Distill the current emergence reports into capsules, storing them
    /// when `save` is set.
    pub async fn synthesize(&self, save: bool) -> Result<Vec<Capsule>> {
        let mut guard = self.shared.hub.lock().await;
        let hub = &mut *guard;
        let reports = hub.detector.check_all(&hub.store)?;
        let capsules = hub.detector.synthesize(&reports);
        if save {
            let saved = save_synthesized(&mut hub.store, &capsules)?;
            tracing::info!(saved, "synthesized capsules saved");
        }
        Ok(capsules)
    }

    pub async fn sessions(&self) -> Vec<FusionSession> {
        let hub = self.shared.hub.lock().await;
        hub.detector.sessions().into_iter().cloned().collect()
    }

    /// Run `f` against the store while holding the hub lock.
    #[cfg(test)]
    pub async fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut hub = self.shared.hub.lock().await;
        f(&mut hub.store)
    }
}

impl<S> Drop for Orchestrator<S> {
    fn drop(&mut self) {
        if let Some(monitor) = &self.monitor {
            monitor.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use kh_core::MemoryStore;
    use tokio::sync::{Notify, broadcast};

    use super::*;
    use crate::notify::{BroadcastNotifier, Notification};

    struct FakeAdapter {
        reachable: bool,
        initial: InitialData,
        batches: std::sync::Mutex<VecDeque<Result<Vec<Update>>>>,
    }

    impl FakeAdapter {
        fn new(initial: InitialData, batches: Vec<Result<Vec<Update>>>) -> Arc<Self> {
            Arc::new(Self {
                reachable: true,
                initial,
                batches: std::sync::Mutex::new(batches.into()),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn kind(&self) -> &str {
            "fake"
        }

        async fn test_connection(&self) -> Result<bool> {
            Ok(self.reachable)
        }

        async fn initial_data(&self) -> Result<InitialData> {
            Ok(self.initial.clone())
        }

        async fn recent_updates(&self) -> Result<Vec<Update>> {
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Blocks inside `recent_updates` until released.
    struct GatedAdapter {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SourceAdapter for GatedAdapter {
        fn kind(&self) -> &str {
            "gated"
        }

        async fn test_connection(&self) -> Result<bool> {
            Ok(true)
        }

        async fn initial_data(&self) -> Result<InitialData> {
            Ok(InitialData::default())
        }

        async fn recent_updates(&self) -> Result<Vec<Update>> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    fn source(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.into(),
            kind: "fake".into(),
            location: format!("mem://{id}"),
        }
    }

    fn hub(config: &Config) -> (Orchestrator<MemoryStore>, broadcast::Receiver<Notification>) {
        let notifier = BroadcastNotifier::new(64);
        let rx = notifier.subscribe();
        (
            Orchestrator::new(MemoryStore::new(), config, Arc::new(notifier)),
            rx,
        )
    }

    fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut events = Vec::new();
        while let Ok(n) = rx.try_recv() {
            events.push(n);
        }
        events
    }

    fn decoder_update(id: &str, refs: &[&str]) -> Update {
        Update {
            id: Some(id.into()),
            title: "Low latency decoders".into(),
            topics: refs.iter().map(|s| s.to_string()).collect(),
            keywords: vec!["decoding".into(), "latency".into(), "transformer".into()],
            domain: Some("ai".into()),
            ..Update::default()
        }
    }

    fn neuro_initial() -> InitialData {
        InitialData {
            topics: vec![
                Topic::new("Motor cortex decoding")
                    .with_id("n1")
                    .with_domain("ai")
                    .with_keywords(&["decoding", "latency", "transformer"]),
            ],
            capsules: Vec::new(),
        }
    }

    fn completed(outcome: PollOutcome) -> PollSummary {
        match outcome {
            PollOutcome::Completed(summary) => summary,
            PollOutcome::Skipped => panic!("poll was skipped"),
        }
    }

    #[tokio::test]
    async fn test_attach_imports_initial_data() {
        let (orch, _rx) = hub(&Config::default());
        let summary = orch
            .attach(source("neuro"), FakeAdapter::new(neuro_initial(), vec![]))
            .await
            .unwrap();
        assert_eq!(summary.topics, 1);

        let owner = orch
            .with_store(|s| s.get_topic("n1").unwrap().unwrap().source_salon_id)
            .await;
        assert_eq!(owner.as_deref(), Some("neuro"));
        let sources = orch.with_store(|s| s.list_sources().unwrap()).await;
        assert_eq!(sources[0].status, SourceStatus::Connected);
        assert_eq!(orch.active_sources().await, vec!["neuro"]);
    }

    #[tokio::test]
    async fn test_unknown_adapter_is_recorded() {
        let (orch, _rx) = hub(&Config::default());
        let mut config = source("x");
        config.kind = "smoke-signal".into();

        let err = orch.connect(config).await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownAdapter(_)));
        let sources = orch.with_store(|s| s.list_sources().unwrap()).await;
        assert_eq!(sources[0].status, SourceStatus::Failed);
        assert!(sources[0].error.as_deref().unwrap().contains("smoke-signal"));
        assert!(orch.active_sources().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_source_is_connection_error() {
        let (orch, _rx) = hub(&Config::default());
        let adapter = Arc::new(FakeAdapter {
            reachable: false,
            initial: InitialData::default(),
            batches: std::sync::Mutex::new(VecDeque::new()),
        });
        let err = orch.attach(source("ml"), adapter).await.unwrap_err();
        assert!(matches!(err, CoreError::Connection { .. }));
        let sources = orch.with_store(|s| s.list_sources().unwrap()).await;
        assert_eq!(sources[0].status, SourceStatus::Failed);
    }

    #[tokio::test]
    async fn test_overlap_opens_fusion_session() {
        let (orch, mut rx) = hub(&Config::default());
        orch.attach(source("neuro"), FakeAdapter::new(neuro_initial(), vec![]))
            .await
            .unwrap();
        orch.attach(
            source("ml"),
            FakeAdapter::new(InitialData::default(), vec![Ok(vec![decoder_update("a9", &["n1"])])]),
        )
        .await
        .unwrap();
        drain(&mut rx);

        let summary = completed(orch.poll_once().await);
        assert_eq!(summary.sources_polled, 2);
        assert_eq!(summary.topics_persisted, 1);
        assert_eq!(summary.fusion_sessions.len(), 1);

        let sessions = orch.sessions().await;
        assert_eq!(sessions[0].related_salon_ids, vec!["ml", "neuro"]);

        let events = drain(&mut rx);
        let emergence: Vec<_> = events.iter().filter(|n| n.event == EVENT_EMERGENCE).collect();
        assert_eq!(emergence.len(), 1);
        assert_eq!(emergence[0].payload["references"], json!(["n1"]));
        // One update notification per source, empty batches included.
        let updates: Vec<_> = events.iter().filter(|n| n.event == EVENT_UPDATE).collect();
        assert_eq!(updates.len(), 2);
    }

    #[tokio::test]
    async fn test_unreferenced_batch_opens_nothing() {
        let (orch, _rx) = hub(&Config::default());
        orch.attach(source("neuro"), FakeAdapter::new(neuro_initial(), vec![]))
            .await
            .unwrap();
        orch.attach(
            source("ml"),
            FakeAdapter::new(InitialData::default(), vec![Ok(vec![decoder_update("a9", &["elsewhere"])])]),
        )
        .await
        .unwrap();

        let summary = completed(orch.poll_once().await);
        assert!(summary.fusion_sessions.is_empty());
    }

    #[tokio::test]
    async fn test_failing_source_does_not_block_others() {
        let (orch, _rx) = hub(&Config::default());
        orch.attach(
            source("bad"),
            FakeAdapter::new(InitialData::default(), vec![Err(CoreError::connection("bad", "timed out"))]),
        )
        .await
        .unwrap();
        orch.attach(
            source("ml"),
            FakeAdapter::new(InitialData::default(), vec![Ok(vec![decoder_update("a9", &[])])]),
        )
        .await
        .unwrap();

        let summary = completed(orch.poll_once().await);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].salon_id, "bad");
        assert_eq!(summary.topics_persisted, 1);
    }

    #[tokio::test]
    async fn test_new_topic_links_to_related_topic_of_other_source() {
        let (orch, _rx) = hub(&Config::default());
        orch.attach(source("neuro"), FakeAdapter::new(neuro_initial(), vec![]))
            .await
            .unwrap();
        orch.attach(
            source("ml"),
            FakeAdapter::new(InitialData::default(), vec![Ok(vec![decoder_update("a9", &[])])]),
        )
        .await
        .unwrap();

        let summary = completed(orch.poll_once().await);
        assert_eq!(summary.relationships, 1);
        let related = orch.with_store(|s| s.get_related_topics("a9").unwrap()).await;
        assert_eq!(related[0].id, "n1");
    }

    #[tokio::test]
    async fn test_linking_can_be_disabled() {
        let mut config = Config::default();
        config.orchestrator.link_related = false;
        let (orch, _rx) = hub(&config);
        orch.attach(source("neuro"), FakeAdapter::new(neuro_initial(), vec![]))
            .await
            .unwrap();
        orch.attach(
            source("ml"),
            FakeAdapter::new(InitialData::default(), vec![Ok(vec![decoder_update("a9", &[])])]),
        )
        .await
        .unwrap();

        assert_eq!(completed(orch.poll_once().await).relationships, 0);
    }

    #[tokio::test]
    async fn test_overlapping_poll_is_skipped() {
        let (orch, _rx) = hub(&Config::default());
        let (adapter, started, release) = gated();
        orch.attach(source("slow"), adapter).await.unwrap();

        let (first, second) = tokio::join!(orch.poll_once(), async {
            started.notified().await;
            let second = orch.poll_once().await;
            release.notify_one();
            second
        });
        assert!(matches!(first, PollOutcome::Completed(_)));
        assert_eq!(second, PollOutcome::Skipped);
    }

    fn gated() -> (Arc<GatedAdapter>, Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let adapter = Arc::new(GatedAdapter {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        });
        (adapter, started, release)
    }

    #[tokio::test]
    async fn test_stalled_source_does_not_delay_ingestion_of_others() {
        let (orch, _rx) = hub(&Config::default());
        let (adapter, started, release) = gated();
        orch.attach(source("slow"), adapter).await.unwrap();
        orch.attach(
            source("ml"),
            FakeAdapter::new(InitialData::default(), vec![Ok(vec![decoder_update("a9", &[])])]),
        )
        .await
        .unwrap();

        let (outcome, ingested_while_stalled) = tokio::join!(orch.poll_once(), async {
            started.notified().await;
            let seen = tokio::time::timeout(Duration::from_secs(2), async {
                while !orch.with_store(|s| s.get_topic("a9").unwrap().is_some()).await {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .is_ok();
            release.notify_one();
            seen
        });
        assert!(ingested_while_stalled);
        let summary = completed(outcome);
        assert_eq!(summary.topics_persisted, 1);
        assert!(summary.failures.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_recorded_as_failure() {
        let mut config = Config::default();
        config.orchestrator.fetch_timeout_secs = 1;
        let (orch, _rx) = hub(&config);
        let (adapter, _started, _release) = gated();
        orch.attach(source("slow"), adapter).await.unwrap();
        orch.attach(
            source("ml"),
            FakeAdapter::new(InitialData::default(), vec![Ok(vec![decoder_update("a9", &[])])]),
        )
        .await
        .unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), orch.poll_once())
            .await
            .map(completed)
            .unwrap();
        assert_eq!(summary.topics_persisted, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].salon_id, "slow");
        assert!(summary.failures[0].error.contains("no response within 1s"));
    }

    #[tokio::test]
    async fn test_stop_abandons_stalled_poll() {
        let (mut orch, _rx) = hub(&Config::default());
        let (adapter, started, release) = gated();
        orch.attach(source("slow"), adapter).await.unwrap();

        assert!(orch.start());
        started.notified().await;
        tokio::time::timeout(Duration::from_secs(2), orch.stop())
            .await
            .unwrap();
        assert!(!orch.is_monitoring());
        // The abandoned cycle released its guard.
        release.notify_one();
        let next = tokio::time::timeout(Duration::from_secs(2), orch.poll_once())
            .await
            .unwrap();
        assert!(matches!(next, PollOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_monitor_polls_immediately_and_stops_idempotently() {
        let mut config = Config::default();
        config.orchestrator.poll_interval_secs = 3600;
        let (mut orch, mut rx) = hub(&config);
        orch.attach(
            source("ml"),
            FakeAdapter::new(InitialData::default(), vec![Ok(vec![decoder_update("a9", &[])])]),
        )
        .await
        .unwrap();

        assert!(orch.start());
        assert!(!orch.start());
        assert!(orch.is_monitoring());

        let update = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let n = rx.recv().await.unwrap();
                if n.event == EVENT_UPDATE {
                    return n;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(update.room.as_deref(), Some("ml"));
        assert_eq!(update.payload["count"], 1);

        orch.stop().await;
        orch.stop().await;
        assert!(!orch.is_monitoring());
    }

    #[tokio::test]
    async fn test_on_demand_analysis_and_fusion() {
        let (orch, _rx) = hub(&Config::default());
        orch.attach(source("neuro"), FakeAdapter::new(neuro_initial(), vec![]))
            .await
            .unwrap();

        assert!(matches!(
            orch.analyze("missing").await,
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(orch.analyze("n1").await.unwrap().impact_score, 50);

        let outcome = orch.trigger_fusion(&["n1".to_string()]).await.unwrap();
        assert!(matches!(outcome, FusionOutcome::Error { .. }));
        let outcome = orch.generate_insight(&["n1".to_string()]).await.unwrap();
        assert!(matches!(outcome, InsightOutcome::Insufficient { .. }));
    }
}
