//! `kh.toml` loading. Every section falls back to built-in defaults, so a
//! missing file is a valid configuration.

use std::path::Path;

use anyhow::{Context, Result};
use kh_core::{CollisionConfig, DetectorConfig, RouterConfig, ScenarioConfig};
use serde::{Deserialize, Serialize};

use crate::adapter::SourceConfig;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_RECENT_WINDOW: usize = 50;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub poll_interval_secs: u64,
    /// Route each new topic against other sources' recent topics and record
    /// a `related` edge on a fuse decision.
    pub link_related: bool,
    pub recent_window: usize,
    /// A source that has not answered a fetch within this many seconds is
    /// recorded as failed for the cycle.
    pub fetch_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            link_related: true,
            recent_window: DEFAULT_RECENT_WINDOW,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub router: RouterConfig,
    pub detector: DetectorConfig,
    pub orchestrator: OrchestratorConfig,
    pub scenario: ScenarioConfig,
    pub collision: CollisionConfig,
    pub sources: Vec<SourceConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        tracing::debug!(sources = config.sources.len(), "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.router.validate().context("invalid config [router]")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/kh.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.orchestrator.poll_interval_secs, 60);
        assert_eq!(config.orchestrator.fetch_timeout_secs, 30);
    }

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let file = write_config(
            r#"
            [router.weights]
            domain = 0.5
            keyword = 0.5
            temporal = 0.5
            spatial = 0.5
            "#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("sum to 2"));
    }

    #[test]
    fn test_negative_weight_is_rejected() {
        let file = write_config(
            r#"
            [router.weights]
            domain = 0.7
            keyword = 0.3
            temporal = 0.2
            spatial = -0.2
            "#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("spatial"));
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        let file = write_config("[router]\nthreshold = 1.5\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid config [router]"));
    }

    #[test]
    fn test_valid_weights_load() {
        let file = write_config(
            r#"
            [router.weights]
            domain = 0.4
            keyword = 0.4
            temporal = 0.1
            spatial = 0.1
            "#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.router.weights.domain, 0.4);
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [router]
            threshold = 0.5

            [router.adjacency]
            ethics = ["ai"]

            [orchestrator]
            poll_interval_secs = 5

            [scenario]
            name = "bci"

            [[sources]]
            id = "neuro"
            kind = "file"
            location = "/data/neuro.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.router.threshold, 0.5);
        assert!(config.router.adjacency.are_similar("ai", "ethics"));
        assert!(!config.router.adjacency.are_similar("ai", "neuroscience"));
        assert_eq!(config.router.weights.domain, 0.3);
        assert_eq!(config.orchestrator.poll_interval_secs, 5);
        assert!(config.orchestrator.link_related);
        assert_eq!(config.scenario.build().name(), "bci");
        assert_eq!(config.sources[0].kind, "file");
    }
}
