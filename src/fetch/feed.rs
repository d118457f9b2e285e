//! Generic JSON package feed.
//!
//! A feed is a JSON array of `{name, version?, description?, repository?}`
//! objects, served over HTTP(S) or read from a local file. Whatever scrapes the
//! real registry writes the feed; this fetcher only normalizes it.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{FetchProgress, Fetcher};
use crate::error::{Result, SyncError};
use crate::package::PackageRecord;
use crate::platform::{RepositoryScope, SyncTarget};

const USER_AGENT: &str = concat!("repohub-sync/", env!("CARGO_PKG_VERSION"));

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| SyncError::Configuration(format!("building HTTP client: {e}")))
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    repository: Option<String>,
}

pub struct FeedFetcher {
    target: SyncTarget,
    source: String,
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(target: SyncTarget, source: String, client: reqwest::Client) -> Self {
        Self {
            target,
            source,
            client,
        }
    }

    fn is_remote(&self) -> bool {
        self.source.starts_with("http://") || self.source.starts_with("https://")
    }

    async fn load(&self) -> Result<Vec<FeedEntry>> {
        if self.is_remote() {
            let response = self
                .client
                .get(&self.source)
                .header("Accept", "application/json")
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(SyncError::Fetch(format!(
                    "HTTP {} from {}",
                    response.status(),
                    self.source
                )));
            }
            Ok(response.json().await?)
        } else {
            let path = self.source.strip_prefix("file://").unwrap_or(&self.source);
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| SyncError::Fetch(format!("reading feed {path}: {e}")))?;
            serde_json::from_str(&contents)
                .map_err(|e| SyncError::Fetch(format!("malformed feed {path}: {e}")))
        }
    }

    fn normalize(&self, entry: FeedEntry) -> PackageRecord {
        // Only platform-wide targets keep the repository the feed names
        let repository = match self.target.prune_scope().repository {
            RepositoryScope::Any => entry.repository.filter(|r| !r.is_empty()),
            _ => self.target.repository().map(str::to_string),
        };
        PackageRecord {
            platform_id: self.target.platform(),
            repository,
            name: entry.name,
            version: entry.version.unwrap_or_default(),
            description: entry.description.unwrap_or_default(),
            is_active: true,
            last_seen_at: None,
        }
    }
}

#[async_trait]
impl Fetcher for FeedFetcher {
    async fn fetch_all(&self, progress: FetchProgress<'_>) -> Result<Vec<PackageRecord>> {
        let entries = self.load().await?;
        let total = entries.len() as u64;
        let mut records = Vec::with_capacity(entries.len());

        for (i, entry) in entries.into_iter().enumerate() {
            if entry.name.trim().is_empty() {
                continue;
            }
            progress(i as u64 + 1, total, &entry.name);
            records.push(self.normalize(entry));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use std::sync::Mutex;

    fn fetcher_for(target: SyncTarget, path: &std::path::Path) -> FeedFetcher {
        FeedFetcher::new(
            target,
            path.display().to_string(),
            http_client().unwrap(),
        )
    }

    #[tokio::test]
    async fn local_feed_is_normalized_to_the_target_scope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arch.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "bash", "version": "5.2", "description": "GNU Bourne Again shell"},
                {"name": "", "version": "0"},
                {"name": "zsh", "repository": "extra"}
            ]"#,
        )
        .unwrap();

        let items = Mutex::new(Vec::new());
        let progress = |_: u64, _: u64, item: &str| items.lock().unwrap().push(item.to_string());
        let records = fetcher_for(SyncTarget::Arch, &path)
            .fetch_all(&progress)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.platform_id == Platform::Arch));
        assert!(records.iter().all(|r| r.repository.as_deref() == Some("official")));
        assert_eq!(records[0].version, "5.2");
        assert_eq!(items.into_inner().unwrap(), vec!["bash", "zsh"]);
    }

    #[tokio::test]
    async fn debian_feed_keeps_suite_repository() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debian.json");
        std::fs::write(&path, r#"[{"name": "curl", "repository": "bookworm"}]"#).unwrap();

        let records = fetcher_for(SyncTarget::Debian, &path)
            .fetch_all(&|_, _, _| {})
            .await
            .unwrap();
        assert_eq!(records[0].repository.as_deref(), Some("bookworm"));
    }

    #[tokio::test]
    async fn malformed_feed_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = fetcher_for(SyncTarget::Fedora, &path)
            .fetch_all(&|_, _, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Fetch(_)));
    }
}
