//! In-process mutual exclusion over PR workspaces.
//!
//! A workspace (the on-disk clone for one repo + PR + named workspace) must
//! only ever be touched by one command at a time: a plan writing a plan file
//! while an apply reads it would corrupt both. Locks are process-local and
//! lost on restart; that is fine because the protected state is idempotent
//! under the working dir's SHA check.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("the {workspace} workspace is currently locked by another command that is running for this pull request; wait until the previous command is complete and try again")]
    WorkspaceLocked { workspace: String },
}

/// Grants try-lock access to (repo, workspace, pull) tuples.
pub trait WorkingDirLocker: Send + Sync {
    /// Attempt to take the lock; fails immediately if it is held. The
    /// returned guard releases the lock exactly once, when dropped.
    fn try_lock(
        &self,
        repo_full_name: &str,
        workspace: &str,
        pull_num: u64,
    ) -> Result<WorkspaceGuard, LockError>;
}

/// Lock registry shared by everything that touches working dirs.
#[derive(Default)]
pub struct DefaultWorkingDirLocker {
    held: Arc<Mutex<HashSet<String>>>,
}

impl DefaultWorkingDirLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkingDirLocker for DefaultWorkingDirLocker {
    fn try_lock(
        &self,
        repo_full_name: &str,
        workspace: &str,
        pull_num: u64,
    ) -> Result<WorkspaceGuard, LockError> {
        let key = lock_key(repo_full_name, workspace, pull_num);
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.clone()) {
            return Err(LockError::WorkspaceLocked {
                workspace: workspace.to_string(),
            });
        }
        Ok(WorkspaceGuard {
            key,
            held: Arc::clone(&self.held),
        })
    }
}

fn lock_key(repo_full_name: &str, workspace: &str, pull_num: u64) -> String {
    format!("{repo_full_name}/{workspace}/{pull_num}")
}

/// Releases its workspace lock on drop.
#[must_use = "dropping the guard releases the lock"]
#[derive(Debug)]
pub struct WorkspaceGuard {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
    }
}
