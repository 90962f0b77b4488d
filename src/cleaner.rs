//! Cleanup when a pull request closes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{PullRequest, Repo};
use crate::working_dir::WorkingDir;

#[async_trait]
pub trait PullCleaner: Send + Sync {
    /// Release everything held for this PR.
    async fn clean_up_pull(&self, repo: &Repo, pull: &PullRequest) -> Result<()>;
}

/// Deletes the PR's working directories (every workspace). PR locks are
/// persisted by an external collaborator and cleaned up there.
pub struct WorkingDirPullCleaner {
    pub working_dir: Arc<dyn WorkingDir>,
}

#[async_trait]
impl PullCleaner for WorkingDirPullCleaner {
    async fn clean_up_pull(&self, repo: &Repo, pull: &PullRequest) -> Result<()> {
        self.working_dir.delete(repo, pull).await
    }
}
