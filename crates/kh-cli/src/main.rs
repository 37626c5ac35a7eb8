mod adapter;
mod config;
mod notify;
mod orchestrator;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kh_core::{
    CapsuleQuery, InitialData, KnowledgeItem, KnowledgeStore, RelevanceRouter, SourceStatus,
    TopicQuery, predict_trends, run_collisions, save_emerged,
};
use kh_store::Store;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::adapter::SourceConfig;
use crate::config::Config;
use crate::notify::BroadcastNotifier;
use crate::orchestrator::{Orchestrator, import_initial};

#[derive(Parser)]
#[command(name = "kh", about = "Knowledge hub: cross-source correlation and emergence")]
struct Cli {
    /// Config file (default: $KH_DATA_DIR/kh.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect all sources and poll them until interrupted
    Monitor,

    /// Connect all sources and run a single poll cycle
    Poll,

    /// Connect one source and import its initial data
    Connect {
        #[arg(long)]
        id: String,

        /// Adapter type: file or http
        #[arg(long)]
        kind: String,

        /// Feed path or base URL
        #[arg(long)]
        location: String,
    },

    /// List recorded source connection attempts
    Sources,

    /// Import topics and capsules from a JSON file
    Ingest {
        path: PathBuf,

        /// Attribute untagged records to this source
        #[arg(long)]
        source: Option<String>,
    },

    /// Show graph counts and domain distribution
    Overview,

    /// Show topics, capsules and relationships for one domain
    Subgraph { domain: String },

    /// Analyze a topic's connections and impact
    Analyze { topic_id: String },

    /// Generate a cross-topic insight
    Insight {
        #[arg(required = true)]
        topic_ids: Vec<String>,
    },

    /// Run emergence detection over the newest topics
    Check,

    /// Distill emergence reports over the newest topics into capsules
    Synthesize {
        /// Persist the capsules, linking breakthrough capsules to their topic
        #[arg(long)]
        save: bool,
    },

    /// Check specific topics for a cross-domain link and open a fusion session
    Trigger {
        #[arg(required = true)]
        topic_ids: Vec<String>,
    },

    /// Route topics against the recent topics of other sources
    Route {
        #[arg(required = true)]
        topic_ids: Vec<String>,
    },

    /// Cluster recent topics by relevance
    Cluster {
        #[arg(long)]
        domain: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Collide capsules and report emerged ones
    Collide {
        #[arg(long)]
        domain: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// Persist emerged capsules with their lineage
        #[arg(long)]
        save: bool,
    },

    /// Keyword and domain trends over the newest topics
    Trends,
}

struct Settings {
    data_dir: PathBuf,
    config: Config,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let data_dir = kh_store::data_dir();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| kh_store::paths::config_path(&data_dir));
    let config = Config::load(&config_path)?;
    Ok(Settings { data_dir, config })
}

fn open_store(ctx: &Settings) -> Result<Store> {
    kh_store::open_in_dir(&ctx.data_dir).context("failed to open store")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let ctx = load_settings(&cli)?;

    match &cli.command {
        Commands::Monitor => cmd_monitor(&ctx).await,
        Commands::Poll => cmd_poll(&ctx).await,
        Commands::Connect { id, kind, location } => {
            cmd_connect(
                &ctx,
                SourceConfig {
                    id: id.clone(),
                    kind: kind.clone(),
                    location: location.clone(),
                },
            )
            .await
        }
        Commands::Sources => cmd_sources(&ctx),
        Commands::Ingest { path, source } => cmd_ingest(&ctx, path, source.as_deref()),
        Commands::Overview => cmd_overview(&ctx),
        Commands::Subgraph { domain } => cmd_subgraph(&ctx, domain),
        Commands::Analyze { topic_id } => cmd_analyze(&ctx, topic_id).await,
        Commands::Insight { topic_ids } => cmd_insight(&ctx, topic_ids).await,
        Commands::Check => cmd_check(&ctx).await,
        Commands::Synthesize { save } => cmd_synthesize(&ctx, *save).await,
        Commands::Trigger { topic_ids } => cmd_trigger(&ctx, topic_ids).await,
        Commands::Route { topic_ids } => cmd_route(&ctx, topic_ids),
        Commands::Cluster { domain, limit } => cmd_cluster(&ctx, domain.as_deref(), *limit),
        Commands::Collide {
            domain,
            limit,
            save,
        } => cmd_collide(&ctx, domain.clone(), *limit, *save),
        Commands::Trends => cmd_trends(&ctx),
    }
}

// ---------------------------------------------------------------------------
// Orchestrated commands
// ---------------------------------------------------------------------------

fn orchestrator(ctx: &Settings, notifier: Arc<BroadcastNotifier>) -> Result<Orchestrator<Store>> {
    let store = open_store(ctx)?;
    Ok(Orchestrator::new(store, &ctx.config, notifier))
}

/// Configured sources, then previously connected ones the config does not name.
fn sources_to_connect(ctx: &Settings) -> Result<Vec<SourceConfig>> {
    let store = open_store(ctx)?;
    let mut sources = ctx.config.sources.clone();
    let named: HashSet<String> = sources.iter().map(|s| s.id.clone()).collect();
    for record in store.list_sources().context("failed to list sources")? {
        if record.status == SourceStatus::Connected && !named.contains(&record.salon_id) {
            sources.push(SourceConfig {
                id: record.salon_id,
                kind: record.kind,
                location: record.location,
            });
        }
    }
    Ok(sources)
}

async fn connect_all(orch: &Orchestrator<Store>, sources: Vec<SourceConfig>) {
    for source in sources {
        let id = source.id.clone();
        if let Err(e) = orch.connect(source).await {
            tracing::warn!(salon_id = %id, error = %e, "skipping source");
        }
    }
}

async fn cmd_monitor(ctx: &Settings) -> Result<()> {
    let sources = sources_to_connect(ctx)?;
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut events = notifier.subscribe();
    let mut orch = orchestrator(ctx, Arc::clone(&notifier))?;

    connect_all(&orch, sources).await;
    let active = orch.active_sources().await;
    if active.is_empty() {
        tracing::warn!("no sources connected, monitoring an empty set");
    } else {
        tracing::info!(sources = ?active, "sources connected");
    }
    orch.start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(notification) => println!("{}", serde_json::to_string(&notification)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification listener lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    if orch.is_monitoring() {
        orch.stop().await;
    }
    Ok(())
}

async fn cmd_poll(ctx: &Settings) -> Result<()> {
    let sources = sources_to_connect(ctx)?;
    let orch = orchestrator(ctx, Arc::new(BroadcastNotifier::default()))?;
    connect_all(&orch, sources).await;
    let outcome = orch.poll_once().await;
    let sessions = orch.sessions().await;
    print_json(&serde_json::json!({ "poll": outcome, "fusion_sessions": sessions }))
}

async fn cmd_connect(ctx: &Settings, source: SourceConfig) -> Result<()> {
    let orch = orchestrator(ctx, Arc::new(BroadcastNotifier::default()))?;
    let id = source.id.clone();
    let summary = orch
        .connect(source)
        .await
        .with_context(|| format!("failed to connect source {id}"))?;
    print_json(&summary)
}

async fn cmd_analyze(ctx: &Settings, topic_id: &str) -> Result<()> {
    let orch = orchestrator(ctx, Arc::new(BroadcastNotifier::default()))?;
    print_json(&orch.analyze(topic_id).await?)
}

async fn cmd_insight(ctx: &Settings, topic_ids: &[String]) -> Result<()> {
    let orch = orchestrator(ctx, Arc::new(BroadcastNotifier::default()))?;
    print_json(&orch.generate_insight(topic_ids).await?)
}

async fn cmd_check(ctx: &Settings) -> Result<()> {
    let orch = orchestrator(ctx, Arc::new(BroadcastNotifier::default()))?;
    print_json(&orch.check_emergence().await?)
}

async fn cmd_synthesize(ctx: &Settings, save: bool) -> Result<()> {
    let orch = orchestrator(ctx, Arc::new(BroadcastNotifier::default()))?;
    print_json(&orch.synthesize(save).await?)
}

async fn cmd_trigger(ctx: &Settings, topic_ids: &[String]) -> Result<()> {
    let orch = orchestrator(ctx, Arc::new(BroadcastNotifier::default()))?;
    print_json(&orch.trigger_fusion(topic_ids).await?)
}

// ---------------------------------------------------------------------------
// Store commands
// ---------------------------------------------------------------------------

fn cmd_sources(ctx: &Settings) -> Result<()> {
    let store = open_store(ctx)?;
    print_json(&store.list_sources()?)
}

fn cmd_ingest(ctx: &Settings, path: &Path, source: Option<&str>) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let initial: InitialData = serde_json::from_str(&text)
        .with_context(|| format!("invalid data file {}", path.display()))?;

    let mut store = open_store(ctx)?;
    let (topics, capsules) = import_initial(&mut store, source, initial);
    print_json(&serde_json::json!({ "topics": topics, "capsules": capsules }))
}

fn cmd_overview(ctx: &Settings) -> Result<()> {
    let store = open_store(ctx)?;
    print_json(&store.get_overview()?)
}

fn cmd_subgraph(ctx: &Settings, domain: &str) -> Result<()> {
    let store = open_store(ctx)?;
    print_json(&store.get_domain_subgraph(domain)?)
}

fn cmd_route(ctx: &Settings, topic_ids: &[String]) -> Result<()> {
    let store = open_store(ctx)?;
    let router = RelevanceRouter::new(ctx.config.router.clone());
    let recent = store.query_topics(&TopicQuery::newest(ctx.config.orchestrator.recent_window))?;

    let mut decisions = Vec::with_capacity(topic_ids.len());
    for id in topic_ids {
        let topic = store
            .get_topic(id)?
            .with_context(|| format!("topic not found: {id}"))?;
        let candidates: Vec<KnowledgeItem> = recent
            .iter()
            .filter(|t| t.id != topic.id)
            .filter(|t| topic.source_salon_id.is_none() || t.source_salon_id != topic.source_salon_id)
            .map(KnowledgeItem::from)
            .collect();
        decisions.extend(router.batch_route(&[KnowledgeItem::from(&topic)], &candidates));
    }
    print_json(&decisions)
}

fn cmd_cluster(ctx: &Settings, domain: Option<&str>, limit: usize) -> Result<()> {
    let store = open_store(ctx)?;
    let query = match domain {
        Some(domain) => TopicQuery::in_domain(domain, limit),
        None => TopicQuery::newest(limit),
    };
    let items: Vec<KnowledgeItem> = store
        .query_topics(&query)?
        .iter()
        .map(KnowledgeItem::from)
        .collect();

    let router = RelevanceRouter::new(ctx.config.router.clone());
    let clusters: Vec<serde_json::Value> = router
        .cluster(&items)
        .iter()
        .map(|c| serde_json::json!({ "seed": c.seed.id, "members": c.ids() }))
        .collect();
    print_json(&clusters)
}

fn cmd_collide(ctx: &Settings, domain: Option<String>, limit: usize, save: bool) -> Result<()> {
    let mut store = open_store(ctx)?;
    let capsules = store.query_capsules(&CapsuleQuery {
        domain,
        source: None,
        limit,
    })?;
    let report = run_collisions(&capsules, &ctx.config.collision);
    if save {
        let saved = save_emerged(&mut store, &report.emerged)?;
        tracing::info!(saved, "emerged capsules saved");
    }
    print_json(&report)
}

fn cmd_trends(ctx: &Settings) -> Result<()> {
    let store = open_store(ctx)?;
    let topics = store.query_topics(&TopicQuery::newest(ctx.config.detector.window))?;
    print_json(&predict_trends(&topics))
}
