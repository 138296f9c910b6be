//! Per-attempt cache of test-repository clones.
//!
//! Clones live under `<repo_home>/<attempt-id>/<escaped-url>` so two
//! attempts never share a working tree. [`RepoCache::cleanup`] removes
//! everything the attempt created and is safe to call more than once.

use crate::error::{MinerError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::Command;
use tracing::{debug, warn};

/// Version-control operations the matcher needs.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Clone `url` into `dest` (which does not exist yet).
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;

    /// Bring an existing clone to `revision`: checkout master, hard reset,
    /// pull, then checkout the revision.
    async fn sync_to(&self, repo: &Path, revision: &str) -> Result<()>;
}

/// `git` on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCli;

impl GitCli {
    async fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<bool> {
        let mut command = Command::new("git");
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        let status = command
            .status()
            .await
            .map_err(|e| MinerError::Repository(format!("failed to run git: {e}")))?;
        Ok(status.success())
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        if self.run(None, &["clone", url, &dest_str]).await? {
            Ok(())
        } else {
            Err(MinerError::Repository(format!("git clone {url} failed")))
        }
    }

    async fn sync_to(&self, repo: &Path, revision: &str) -> Result<()> {
        let steps: [&[&str]; 4] = [
            &["checkout", "master"],
            &["reset", "--hard"],
            &["pull", "origin", "master"],
            &["checkout", revision],
        ];
        for step in steps {
            // A failed step leaves the tree where it is; matching then
            // runs against whatever revision is checked out.
            if !self.run(Some(repo), step).await? {
                warn!(repo = %repo.display(), step = ?step, "git step failed");
            }
        }
        Ok(())
    }
}

/// Directory name for a repository URL.
pub fn escape_url(url: &str) -> String {
    url.replace([':', '/'], "_")
}

pub struct RepoCache {
    home: PathBuf,
    vcs: Arc<dyn Vcs>,
    clones: Mutex<BTreeMap<String, PathBuf>>,
}

impl RepoCache {
    /// Cache rooted at `home`.
    pub fn new(home: impl Into<PathBuf>, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            home: home.into(),
            vcs,
            clones: Mutex::new(BTreeMap::new()),
        }
    }

    /// Cache in a fresh attempt-scoped directory under `repo_root`.
    pub fn for_attempt(repo_root: impl AsRef<Path>, vcs: Arc<dyn Vcs>) -> Self {
        let attempt = uuid::Uuid::new_v4().simple().to_string();
        Self::new(repo_root.as_ref().join(attempt), vcs)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn clone_dir(&self, url: &str) -> PathBuf {
        self.home.join(escape_url(url))
    }

    /// Clone `url` unless it is already present; returns the clone dir.
    pub async fn ensure_clone(&self, url: &str) -> Result<PathBuf> {
        let dir = self.clone_dir(url);
        if !dir.is_dir() {
            tokio::fs::create_dir_all(&self.home).await?;
            debug!(url, dir = %dir.display(), "cloning test repository");
            self.vcs.clone_repo(url, &dir).await?;
        }
        self.clones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), dir.clone());
        Ok(dir)
    }

    /// Clone if needed and move the working tree to `revision`.
    pub async fn checkout(&self, url: &str, revision: &str) -> Result<PathBuf> {
        let dir = self.ensure_clone(url).await?;
        self.vcs.sync_to(&dir, revision).await?;
        Ok(dir)
    }

    pub fn tracked(&self) -> Vec<PathBuf> {
        self.clones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Remove tracked clones and the attempt directory.
    pub fn cleanup(&self) {
        let clones = std::mem::take(&mut *self.clones.lock().unwrap_or_else(PoisonError::into_inner));
        for dir in clones.values() {
            if let Err(e) = std::fs::remove_dir_all(dir)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(dir = %dir.display(), error = %e, "failed to remove clone");
            }
        }
        if self.home.exists()
            && let Err(e) = std::fs::remove_dir_all(&self.home)
        {
            warn!(dir = %self.home.display(), error = %e, "failed to remove repository home");
        }
    }
}

impl std::fmt::Debug for RepoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoCache")
            .field("home", &self.home)
            .field("clones", &self.tracked())
            .finish()
    }
}
