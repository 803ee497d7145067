//! Per-request staging workspaces.
//!
//! Every request gets its own directory under the shared staging root,
//! named by a random 128-bit identifier. Only that directory is mounted
//! into the container, so concurrent requests never see each other's files
//! or build artifacts.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Creates workspaces under a shared staging root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    staging_root: PathBuf,
    mount_point: String,
}

impl WorkspaceManager {
    /// Create the manager, creating the staging root if it does not exist.
    ///
    /// The root is canonicalized because container runtimes require an
    /// absolute host path for bind mounts.
    pub fn new(staging_root: impl AsRef<Path>, mount_point: impl Into<String>) -> Result<Self> {
        let staging_root = staging_root.as_ref();
        std::fs::create_dir_all(staging_root).map_err(|e| {
            Error::workspace(
                format!("Failed to create staging root {}", staging_root.display()),
                e,
            )
        })?;
        let staging_root = staging_root.canonicalize().map_err(|e| {
            Error::workspace(
                format!("Failed to resolve staging root {}", staging_root.display()),
                e,
            )
        })?;

        Ok(Self {
            staging_root,
            mount_point: mount_point.into(),
        })
    }

    /// Absolute path of the staging root.
    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// In-container mount point of every workspace.
    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    /// Stage `source_code` in a fresh workspace.
    ///
    /// On failure nothing is left behind under the staging root.
    pub async fn acquire(&self, source_code: &str, extension: &str) -> Result<Workspace> {
        let id = Uuid::new_v4().simple().to_string();
        let host_dir = self.staging_root.join(&id);

        tokio::fs::create_dir(&host_dir).await.map_err(|e| {
            Error::workspace(
                format!("Failed to create workspace {}", host_dir.display()),
                e,
            )
        })?;

        // From here on the guard owns the directory and removes it if the
        // write below fails.
        let workspace = Workspace {
            source_name: format!("{id}{extension}"),
            id,
            host_dir,
            container_dir: self.mount_point.clone(),
            created_at: SystemTime::now(),
            released: false,
        };

        tokio::fs::write(workspace.host_source(), source_code)
            .await
            .map_err(|e| {
                Error::workspace(
                    format!("Failed to write {}", workspace.host_source().display()),
                    e,
                )
            })?;

        debug!(workspace = %workspace.id, bytes = source_code.len(), "Workspace acquired");
        Ok(workspace)
    }
}

/// One request's staging directory.
///
/// Removed by [`Workspace::release`], or on drop if release was never
/// reached.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    host_dir: PathBuf,
    container_dir: String,
    source_name: String,
    created_at: SystemTime,
    released: bool,
}

impl Workspace {
    /// The random identifier naming this workspace.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host directory bind-mounted into the container.
    pub fn host_dir(&self) -> &Path {
        &self.host_dir
    }

    /// Directory the workspace is mounted at inside the container.
    pub fn container_dir(&self) -> &str {
        &self.container_dir
    }

    /// Host path of the staged source file.
    pub fn host_source(&self) -> PathBuf {
        self.host_dir.join(&self.source_name)
    }

    /// In-container path of the staged source file.
    pub fn container_source(&self) -> String {
        format!(
            "{}/{}",
            self.container_dir.trim_end_matches('/'),
            self.source_name
        )
    }

    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Remove the workspace directory and everything in it.
    ///
    /// Idempotent: an already-removed directory is not an error.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.host_dir).await {
            Ok(()) => {
                debug!(workspace = %self.id, "Workspace released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::workspace(
                format!("Failed to remove workspace {}", self.host_dir.display()),
                e,
            )),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.host_dir) {
            Ok(()) => debug!(workspace = %self.id, "Workspace removed on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(workspace = %self.id, error = %e, "Failed to remove workspace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn manager(dir: &tempfile::TempDir) -> WorkspaceManager {
        WorkspaceManager::new(dir.path().join("sandbox"), "/home/runner").unwrap()
    }

    #[test]
    fn new_creates_absolute_staging_root() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        assert!(manager.staging_root().is_absolute());
        assert!(manager.staging_root().is_dir());
        assert_eq!(manager.mount_point(), "/home/runner");
    }

    #[test]
    fn new_fails_when_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let err = WorkspaceManager::new(&file, "/home/runner").unwrap_err();
        assert!(matches!(err, Error::Workspace { .. }));
    }

    #[tokio::test]
    async fn acquire_writes_source() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);

        let ws = manager.acquire("print('hi')", ".py").await.unwrap();

        assert_eq!(ws.id().len(), 32);
        assert!(ws.host_dir().starts_with(manager.staging_root()));
        assert_eq!(
            std::fs::read_to_string(ws.host_source()).unwrap(),
            "print('hi')"
        );
        assert_eq!(
            ws.container_source(),
            format!("/home/runner/{}.py", ws.id())
        );
        assert_eq!(ws.container_dir(), "/home/runner");
        assert!(ws.created_at() <= SystemTime::now());

        ws.release().await.unwrap();
    }

    #[tokio::test]
    async fn release_removes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);

        let ws = manager.acquire("int main() {}", ".cpp").await.unwrap();
        let host_dir = ws.host_dir().to_path_buf();
        std::fs::write(host_dir.join("a.out"), b"\x7fELF").unwrap();

        ws.release().await.unwrap();
        assert!(!host_dir.exists());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);

        let ws = manager.acquire("", ".js").await.unwrap();
        std::fs::remove_dir_all(ws.host_dir()).unwrap();

        ws.release().await.unwrap();
    }

    #[tokio::test]
    async fn drop_removes_unreleased_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);

        let ws = manager.acquire("print(1)", ".py").await.unwrap();
        let host_dir = ws.host_dir().to_path_buf();
        assert!(host_dir.exists());

        drop(ws);
        assert!(!host_dir.exists());
    }

    #[tokio::test]
    async fn acquire_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        std::fs::remove_dir(manager.staging_root()).unwrap();

        let err = manager.acquire("print(1)", ".py").await.unwrap_err();
        assert!(matches!(err, Error::Workspace { .. }));
        assert!(!manager.staging_root().exists());
    }

    #[tokio::test]
    async fn failed_write_removes_new_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);

        // The directory is created, then the write targets a missing subdirectory
        let err = manager
            .acquire("print(1)", "/missing/sub.py")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Workspace { .. }));
        assert!(err.to_string().contains("Failed to write"));
        assert_eq!(
            std::fs::read_dir(manager.staging_root()).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn concurrent_workspaces_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);

        let mut handles = Vec::new();
        for i in 0..32 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let code = format!("print({i})");
                let ws = manager.acquire(&code, ".py").await.unwrap();
                let staged = std::fs::read_to_string(ws.host_source()).unwrap();
                assert_eq!(staged, code);
                let id = ws.id().to_string();
                ws.release().await.unwrap();
                id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(
            std::fs::read_dir(manager.staging_root()).unwrap().count(),
            0
        );
    }
}
