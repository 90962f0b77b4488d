//! Commit statuses for PR commands.
//!
//! One status per (head commit, command): `atlantis/plan` or
//! `atlantis/apply`. Status updates are best-effort; a host error is logged
//! and never fails the command.

use std::sync::Arc;

use async_trait::async_trait;

use crate::logging::Logger;
use crate::models::{
    CommandContext, CommandName, CommandResult, CommitStatus, PullRequest, Repo,
};
use crate::vcs::VcsClient;

#[async_trait]
pub trait CommitStatusUpdater: Send + Sync {
    /// Report `status` for `cmd` against the pull's head commit.
    async fn update(
        &self,
        log: &Logger,
        repo: &Repo,
        pull: &PullRequest,
        status: CommitStatus,
        cmd: CommandName,
    );

    /// Fold per-project outcomes into one status for the whole command.
    async fn update_project_result(
        &self,
        ctx: &CommandContext,
        cmd: CommandName,
        result: &CommandResult,
    );
}

pub struct DefaultCommitStatusUpdater {
    pub client: Arc<dyn VcsClient>,
}

#[async_trait]
impl CommitStatusUpdater for DefaultCommitStatusUpdater {
    async fn update(
        &self,
        log: &Logger,
        repo: &Repo,
        pull: &PullRequest,
        status: CommitStatus,
        cmd: CommandName,
    ) {
        let context = format!("atlantis/{cmd}");
        let word = match status {
            CommitStatus::Pending => "Pending",
            CommitStatus::Success => "Succeeded",
            CommitStatus::Failed => "Failed",
        };
        let description = format!("{} {}", cmd.title(), word);
        if let Err(e) = self
            .client
            .update_status(repo, pull, status, &context, &description)
            .await
        {
            log.err(format!("unable to update commit status: {e:#}"));
        }
    }

    async fn update_project_result(
        &self,
        ctx: &CommandContext,
        cmd: CommandName,
        result: &CommandResult,
    ) {
        self.update(&ctx.log, &ctx.base_repo, &ctx.pull, result.status(), cmd)
            .await;
    }
}
