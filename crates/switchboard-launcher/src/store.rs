//! The launcher snapshot on disk.
//!
//! One JSON file of session records (handles excluded), rewritten
//! atomically on every create/update/remove and on child exit. Writes are
//! best-effort: a failed save is logged and never propagates into session
//! logic.

use std::path::{Path, PathBuf};
use tracing::warn;

use switchboard_core::session::SessionInfo;

/// Snapshot file name under the data directory.
const SNAPSHOT_FILE: &str = "sessions.json";

/// Atomic-rewrite store for the launcher snapshot.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store rooted at a data directory.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SNAPSHOT_FILE),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the session list. Best-effort: failures are logged, never
    /// returned.
    pub async fn save(&self, sessions: &[SessionInfo]) {
        if let Err(e) = self.try_save(sessions).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist launcher snapshot");
        }
    }

    /// Load the session list. `None` when the file is missing or corrupt
    /// (corruption is logged).
    pub async fn load(&self) -> Option<Vec<SessionInfo>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read launcher snapshot");
                return None;
            },
        };
        match serde_json::from_slice(&bytes) {
            Ok(sessions) => Some(sessions),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt launcher snapshot ignored");
                None
            },
        }
    }

    /// Atomic rewrite: serialize to a sibling temp file, then rename over
    /// the snapshot.
    async fn try_save(&self, sessions: &[SessionInfo]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(sessions)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::session::{BackendKind, LaunchOptions, SessionInfo};
    use switchboard_core::types::SessionId;

    fn sample() -> SessionInfo {
        let opts = LaunchOptions::new(BackendKind::Claude, "/tmp/work");
        let mut info = SessionInfo::from_launch(SessionId::new(), &opts);
        info.pid = Some(1234);
        info.cli_internal_id = Some("cli-abc".to_string());
        info
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let sessions = vec![sample(), sample()];
        store.save(&sessions).await;

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].session_id, sessions[0].session_id);
        assert_eq!(loaded[0].cli_internal_id.as_deref(), Some("cli-abc"));
        // No temp file left behind.
        assert!(!dir.path().join("sessions.json.tmp").exists());
    }

    #[tokio::test]
    async fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn load_corrupt_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        tokio::fs::write(store.path(), b"{not json").await.unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.save(&[sample(), sample(), sample()]).await;
        store.save(&[sample()]).await;

        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_into_unwritable_dir_does_not_panic() {
        let store = SessionStore::new(Path::new("/proc/definitely/not/writable"));
        // Best-effort: warn and move on.
        store.save(&[sample()]).await;
        assert!(store.load().await.is_none());
    }
}
