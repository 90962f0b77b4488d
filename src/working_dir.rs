//! On-disk management of per-PR workspaces.
//!
//! Each (repo, pull, workspace) tuple owns a directory under
//! `<data-dir>/repos/<owner>/<name>/<pr-num>/<workspace>` holding a full git
//! clone of the PR's head. Cloning is idempotent with respect to the head
//! commit so a plan followed by an apply re-uses the same checkout (and the
//! plan file in it).
//!
//! This module does no locking of its own: callers must hold the workspace
//! lock for the tuple before calling [`WorkingDir::clone_repo`] or
//! [`WorkingDir::get_working_dir`].

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::logging::Logger;
use crate::models::{PullRequest, Repo};

const WORKING_DIR_PREFIX: &str = "repos";

/// Handles the workspace on disk for running commands.
#[async_trait]
pub trait WorkingDir: Send + Sync {
    /// Clone the head repo, check out the PR branch and return the absolute
    /// path of the clone. If the directory already exists at the PR's head
    /// commit this does nothing, otherwise it force-clones.
    async fn clone_repo(
        &self,
        log: &Logger,
        base_repo: &Repo,
        head_repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<PathBuf>;

    /// Path of the existing workspace; fails with a not-found error when it
    /// is not on disk.
    async fn get_working_dir(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<PathBuf>;

    /// Delete all workspaces of this pull request. Idempotent.
    async fn delete(&self, repo: &Repo, pull: &PullRequest) -> Result<()>;

    /// Delete a single workspace. Idempotent.
    async fn delete_for_workspace(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<()>;
}

/// [`WorkingDir`] backed by the file system and the `git` binary.
pub struct FileWorkspace {
    pub data_dir: PathBuf,
    /// Overrides the URL cloned during tests. Not settable in production.
    pub testing_override_clone_url: Option<String>,
}

impl FileWorkspace {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            testing_override_clone_url: None,
        }
    }

    fn repo_pull_dir(&self, repo: &Repo, pull: &PullRequest) -> PathBuf {
        self.data_dir
            .join(WORKING_DIR_PREFIX)
            .join(&repo.full_name)
            .join(pull.num.to_string())
    }

    fn clone_dir(&self, repo: &Repo, pull: &PullRequest, workspace: &str) -> PathBuf {
        self.repo_pull_dir(repo, pull).join(workspace)
    }

    async fn force_clone(
        &self,
        log: &Logger,
        clone_dir: &Path,
        head_repo: &Repo,
        pull: &PullRequest,
    ) -> Result<PathBuf> {
        match tokio::fs::remove_dir_all(clone_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("deleting dir {:?} before cloning", clone_dir)
                })
            }
        }

        log.info(format!("creating dir {:?}", clone_dir));
        tokio::fs::create_dir_all(clone_dir)
            .await
            .context("creating new workspace")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(clone_dir, std::fs::Permissions::from_mode(0o700))
                .await
                .context("restricting workspace permissions")?;
        }

        log.info(format!(
            "git cloning {:?} into {:?}",
            head_repo.sanitized_clone_url, clone_dir
        ));
        let clone_url = self
            .testing_override_clone_url
            .as_deref()
            .unwrap_or(&head_repo.clone_url);
        let dir_arg = clone_dir.to_string_lossy();
        run_git(&["clone", clone_url, &dir_arg], None)
            .await
            .with_context(|| format!("cloning {}", head_repo.sanitized_clone_url))?;

        log.info(format!("checking out branch {:?}", pull.branch));
        run_git(&["checkout", &pull.branch], Some(clone_dir))
            .await
            .with_context(|| format!("checking out branch {}", pull.branch))?;
        Ok(clone_dir.to_path_buf())
    }
}

#[async_trait]
impl WorkingDir for FileWorkspace {
    async fn clone_repo(
        &self,
        log: &Logger,
        base_repo: &Repo,
        head_repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<PathBuf> {
        let clone_dir = self.clone_dir(base_repo, pull, workspace);

        // If the directory already exists, check whether it is at the right
        // commit and if so leave it alone.
        if tokio::fs::metadata(&clone_dir).await.is_ok() {
            log.debug(format!(
                "clone directory {:?} already exists, checking if it's at the right commit",
                clone_dir
            ));
            match run_git(&["rev-parse", "HEAD"], Some(&clone_dir)).await {
                Ok(output) => {
                    let current = output.trim();
                    if current == pull.head_commit {
                        log.debug(format!(
                            "repo is at correct commit {:?} so will not re-clone",
                            pull.head_commit
                        ));
                        return Ok(clone_dir);
                    }
                    log.debug(format!(
                        "repo was already cloned but is not at correct commit, wanted {:?} got {:?}",
                        pull.head_commit, current
                    ));
                }
                Err(e) => {
                    log.err(format!(
                        "will re-clone repo, could not determine if was at correct commit: {e:#}"
                    ));
                }
            }
        }

        self.force_clone(log, &clone_dir, head_repo, pull).await
    }

    async fn get_working_dir(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<PathBuf> {
        let dir = self.clone_dir(repo, pull, workspace);
        tokio::fs::metadata(&dir)
            .await
            .context("checking if workspace exists")?;
        Ok(dir)
    }

    async fn delete(&self, repo: &Repo, pull: &PullRequest) -> Result<()> {
        remove_all_idempotent(&self.repo_pull_dir(repo, pull)).await
    }

    async fn delete_for_workspace(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<()> {
        remove_all_idempotent(&self.clone_dir(repo, pull, workspace)).await
    }
}

async fn remove_all_idempotent(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("deleting {:?}", dir)),
    }
}

/// Run a git subcommand, returning combined stdout+stderr. Failures carry
/// the combined output so clone/checkout errors are actionable.
async fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    let output = cmd
        .output()
        .await
        .with_context(|| format!("running git {}", args.join(" ")))?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        bail!("git {} failed ({}): {}", args.join(" "), output.status, combined.trim());
    }
    Ok(combined)
}
