// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent snapshot persistence.
//!
//! The snapshot is written to a temporary file next to the target and then
//! renamed over it, so readers never see a partial file.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::agent::{Agent, AgentStatus};
use crate::error::StateError;

/// Snapshot format version.
pub const STATE_VERSION: u32 = 1;

/// What is persisted between hub runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubState {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

/// Reads and writes the snapshot file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    /// Held from collecting the records until the rename.
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write a snapshot of `agents`. Stopped and errored agents are skipped.
    pub async fn save(&self, agents: Vec<Agent>) -> Result<HubState, StateError> {
        self.save_with(|| async move { agents }).await
    }

    /// Collect the records with `collect` and write them, both under the
    /// write lock. Snapshots therefore land in the order they were taken.
    pub async fn save_with<F, Fut>(&self, collect: F) -> Result<HubState, StateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<Agent>>,
    {
        let _guard = self.write_lock.lock().await;
        let agents = collect().await;
        let state = HubState {
            version: STATE_VERSION,
            saved_at: Utc::now(),
            agents: agents
                .into_iter()
                .filter(|a| !matches!(a.status, AgentStatus::Stopped | AgentStatus::Error))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&state)?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StateError::CreateDir(format!("{}: {}", dir.display(), e)))?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| StateError::Write(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StateError::Write(format!("{}: {}", self.path.display(), e)))?;

        debug!(
            "Saved hub state ({} agents) to {}",
            state.agents.len(),
            self.path.display()
        );
        Ok(state)
    }

    /// Read the snapshot. A missing file means a clean start.
    pub async fn load(&self) -> Result<Option<HubState>, StateError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::Read(format!("{}: {}", self.path.display(), e)))
            }
        };

        let state: HubState = serde_json::from_slice(&bytes)?;
        if state.version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion(state.version));
        }
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn agent(id: &str, status: AgentStatus) -> Agent {
        let mut agent = Agent::new(id, format!("agent-{}", id));
        agent.status = status;
        agent.port = 3300;
        agent.pid = 4242;
        agent
    }

    #[tokio::test]
    async fn test_missing_file_is_clean_start() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join(".hive/hub-state.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join(".hive/hub-state.json"));

        let saved = store
            .save(vec![
                agent("a1", AgentStatus::Ready),
                agent("a2", AgentStatus::Stopped),
                agent("a3", AgentStatus::Error),
                agent("a4", AgentStatus::Dead),
            ])
            .await
            .unwrap();
        assert_eq!(saved.agents.len(), 2);
        assert!(!temp.path().join(".hive/hub-state.json.tmp").exists());

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.version, STATE_VERSION);
        let ids: Vec<&str> = loaded.agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a4"]);
        assert_eq!(loaded.agents[0], saved.agents[0]);
    }

    #[tokio::test]
    async fn test_later_snapshot_wins_over_slow_collection() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(temp.path().join("hub-state.json")));

        let (collecting_tx, collecting_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .save_with(|| async move {
                        let _ = collecting_tx.send(());
                        let _ = release_rx.await;
                        vec![agent("a1", AgentStatus::Ready), agent("a2", AgentStatus::Ready)]
                    })
                    .await
                    .unwrap()
            })
        };
        collecting_rx.await.unwrap();

        // Taken after the first collection started, so it must be written last.
        let second = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.save(vec![agent("a2", AgentStatus::Ready)]).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        release_tx.send(()).unwrap();
        first.await.unwrap();
        second.await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        let ids: Vec<&str> = loaded.agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a2"]);
    }

    #[tokio::test]
    async fn test_corrupted_and_future_versions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hub-state.json");
        let store = StateStore::new(&path);

        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(store.load().await, Err(StateError::Corrupted(_))));

        std::fs::write(
            &path,
            r#"{"version": 2, "saved_at": "2026-01-01T00:00:00Z", "agents": []}"#,
        )
        .unwrap();
        assert!(matches!(
            store.load().await,
            Err(StateError::UnsupportedVersion(2))
        ));
    }
}
