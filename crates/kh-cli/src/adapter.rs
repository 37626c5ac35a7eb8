//! Source adapters: how the hub reaches a salon.
//!
//! `file` sources read a JSON feed from disk, `http` sources call a small
//! REST surface. Both hand back the same `InitialData` and `Update` shapes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kh_core::{CoreError, InitialData, Result, Update};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One `[[sources]]` entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: String,
    pub location: String,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> &str;

    /// `Ok(false)` when the source answered but is not usable.
    async fn test_connection(&self) -> Result<bool>;

    async fn initial_data(&self) -> Result<InitialData>;

    /// Updates reported since the previous call.
    async fn recent_updates(&self) -> Result<Vec<Update>>;
}

pub fn build_adapter(config: &SourceConfig) -> Result<Box<dyn SourceAdapter>> {
    match config.kind.as_str() {
        "file" => Ok(Box::new(FileAdapter::new(&config.id, &config.location))),
        "http" => Ok(Box::new(HttpAdapter::new(&config.id, &config.location))),
        other => Err(CoreError::UnknownAdapter(other.to_string())),
    }
}

/// Stamp the owning salon on updates that arrive without one.
fn claim(salon_id: &str, mut updates: Vec<Update>) -> Vec<Update> {
    for update in &mut updates {
        if update.salon_id.is_empty() {
            update.salon_id = salon_id.to_string();
        }
    }
    updates
}

/// On-disk feed layout.
#[derive(Debug, Default, Deserialize)]
struct Feed {
    #[serde(flatten)]
    initial: InitialData,
    #[serde(default)]
    updates: Vec<Update>,
}

/// Reads a JSON feed file. Each `recent_updates` call returns only the
/// entries appended since the last call; a shrunk file is read from the top.
/// The cursor lives in memory, so a new process starts from the first entry
/// and relies on update ids to keep re-delivery idempotent.
pub struct FileAdapter {
    salon_id: String,
    path: PathBuf,
    cursor: AtomicUsize,
}

impl FileAdapter {
    pub fn new(salon_id: &str, path: &str) -> Self {
        Self {
            salon_id: salon_id.to_string(),
            path: PathBuf::from(path),
            cursor: AtomicUsize::new(0),
        }
    }

    async fn read_feed(&self) -> Result<Feed> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CoreError::connection(&self.salon_id, format!("{}: {e}", self.path.display())))?;
        if text.trim().is_empty() {
            return Ok(Feed::default());
        }
        serde_json::from_str(&text).map_err(|e| {
            CoreError::connection(&self.salon_id, format!("invalid feed {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl SourceAdapter for FileAdapter {
    fn kind(&self) -> &str {
        "file"
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn initial_data(&self) -> Result<InitialData> {
        Ok(self.read_feed().await?.initial)
    }

    async fn recent_updates(&self) -> Result<Vec<Update>> {
        let mut updates = self.read_feed().await?.updates;
        let total = updates.len();
        let seen = self.cursor.swap(total, Ordering::SeqCst);
        let fresh = if seen <= total {
            updates.split_off(seen)
        } else {
            updates
        };
        Ok(claim(&self.salon_id, fresh))
    }
}

/// Talks to a salon over HTTP: `GET {base}/health`, `{base}/initial`,
/// `{base}/updates`.
pub struct HttpAdapter {
    salon_id: String,
    base: String,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(salon_id: &str, base: &str) -> Self {
        Self {
            salon_id: salon_id.to_string(),
            base: base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CoreError::connection(&self.salon_id, e))?;
        response
            .json::<T>()
            .await
            .map_err(|e| CoreError::connection(&self.salon_id, format!("bad body from {url}: {e}")))
    }
}

#[async_trait]
impl SourceAdapter for HttpAdapter {
    fn kind(&self) -> &str {
        "http"
    }

    async fn test_connection(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.url("health"))
            .send()
            .await
            .map_err(|e| CoreError::connection(&self.salon_id, e))?;
        Ok(response.status().is_success())
    }

    async fn initial_data(&self) -> Result<InitialData> {
        self.get_json("initial").await
    }

    async fn recent_updates(&self) -> Result<Vec<Update>> {
        let updates = self.get_json("updates").await?;
        Ok(claim(&self.salon_id, updates))
    }
}
