//! End-to-end orchestration of one PR command.
//!
//! [`DefaultCommandRunner`] takes a parsed comment command or an autoplan
//! trigger and drives it to completion: authorize, fetch the canonical PR,
//! build project contexts, execute them serially, roll up the commit status
//! and post the aggregated comment.
//!
//! Every invocation is wrapped in a catch-unwind region so a panic anywhere
//! below takes down only this command: it is logged and reported back to
//! the PR as a comment, never crashing the process. Project contexts run
//! serially because each takes its workspace lock; two contexts on the same
//! workspace running in parallel would deadlock.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::command_builder::ProjectCommandBuilder;
use crate::locking::WorkingDirLocker;
use crate::logging::Logger;
use crate::markdown::MarkdownRenderer;
use crate::models::{
    CommandContext, CommandName, CommandResult, CommentCommand, CommitStatus,
    ProjectCommandContext, ProjectResult, PullRequest, PullRequestState, Repo, User, VcsHostType,
};
use crate::status::CommitStatusUpdater;
use crate::terraform::TerraformExec;
use crate::vcs::{try_comment, GithubPullGetter, GitlabMergeRequestGetter, VcsClient};
use crate::working_dir::WorkingDir;

// ============================================================================
// Per-project execution
// ============================================================================

/// Executes one fully-resolved project context.
#[async_trait]
pub trait ProjectCommandRunner: Send + Sync {
    async fn plan(&self, ctx: &ProjectCommandContext) -> ProjectResult;
    async fn apply(&self, ctx: &ProjectCommandContext) -> ProjectResult;
}

/// Runs terraform in the project's working dir under the workspace lock.
pub struct DefaultProjectCommandRunner {
    pub locker: Arc<dyn WorkingDirLocker>,
    pub working_dir: Arc<dyn WorkingDir>,
    pub terraform: Arc<dyn TerraformExec>,
}

#[async_trait]
impl ProjectCommandRunner for DefaultProjectCommandRunner {
    async fn plan(&self, ctx: &ProjectCommandContext) -> ProjectResult {
        self.run(ctx, CommandName::Plan).await
    }

    async fn apply(&self, ctx: &ProjectCommandContext) -> ProjectResult {
        self.run(ctx, CommandName::Apply).await
    }
}

impl DefaultProjectCommandRunner {
    async fn run(&self, ctx: &ProjectCommandContext, cmd: CommandName) -> ProjectResult {
        let mut result = ProjectResult {
            repo_rel_dir: ctx.repo_rel_dir.clone(),
            workspace: ctx.workspace.clone(),
            ..Default::default()
        };

        let _guard = match self.locker.try_lock(
            &ctx.base_repo.full_name,
            &ctx.workspace,
            ctx.pull.num,
        ) {
            Ok(guard) => guard,
            Err(e) => {
                result.failure = Some(e.to_string());
                return result;
            }
        };

        // Plan clones (idempotent under the head-SHA check, so a workspace
        // the builder already cloned isn't cloned twice); apply requires the
        // clone the plan left behind.
        let repo_dir = match cmd {
            CommandName::Plan => {
                self.working_dir
                    .clone_repo(
                        &ctx.log,
                        &ctx.base_repo,
                        &ctx.head_repo,
                        &ctx.pull,
                        &ctx.workspace,
                    )
                    .await
            }
            CommandName::Apply => {
                self.working_dir
                    .get_working_dir(&ctx.base_repo, &ctx.pull, &ctx.workspace)
                    .await
            }
        };
        let repo_dir = match repo_dir {
            Ok(dir) => dir,
            Err(e) => {
                result.error = Some(format!("{e:#}"));
                return result;
            }
        };
        let project_dir = repo_dir.join(&ctx.repo_rel_dir);
        if !project_dir.exists() {
            result.error = Some(format!(
                "project directory {:?} does not exist in the pull request",
                ctx.repo_rel_dir
            ));
            return result;
        }

        let mut args = vec![
            cmd.to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(ctx.comment_args.iter().cloned());
        let version = ctx
            .project_config
            .as_ref()
            .and_then(|p| p.terraform_version.as_deref());

        match self
            .terraform
            .run_command_with_version(&ctx.log, &project_dir, &args, version, &ctx.workspace)
            .await
        {
            Ok(output) => result.success = Some(output),
            Err(e) => result.error = Some(format!("{e:#}")),
        }
        result
    }
}

// ============================================================================
// Command runner
// ============================================================================

/// The runner as consumed by the events controller.
#[async_trait]
pub trait CommandRunning: Send + Sync {
    /// Run a command that arrived as a PR comment. `maybe_head_repo` is
    /// only available on GitLab comment webhooks; for GitHub it comes from
    /// the PR fetch.
    async fn run_comment_command(
        &self,
        log: Logger,
        base_repo: Repo,
        maybe_head_repo: Option<Repo>,
        user: User,
        pull_num: u64,
        cmd: Option<CommentCommand>,
    );

    /// Run the plan triggered by a PR open/update.
    async fn run_autoplan_command(
        &self,
        log: Logger,
        base_repo: Repo,
        head_repo: Repo,
        pull: PullRequest,
        user: User,
    );
}

pub struct DefaultCommandRunner {
    pub vcs_client: Arc<dyn VcsClient>,
    pub github_pull_getter: Option<Arc<dyn GithubPullGetter>>,
    pub gitlab_merge_request_getter: Option<Arc<dyn GitlabMergeRequestGetter>>,
    pub commit_status_updater: Arc<dyn CommitStatusUpdater>,
    pub markdown_renderer: MarkdownRenderer,
    pub project_command_builder: Arc<dyn ProjectCommandBuilder>,
    pub project_command_runner: Arc<dyn ProjectCommandRunner>,
    pub allow_fork_prs: bool,
    /// Flag name echoed in the fork rejection comment.
    pub allow_fork_prs_flag: String,
}

#[async_trait]
impl CommandRunning for DefaultCommandRunner {
    async fn run_comment_command(
        &self,
        log: Logger,
        base_repo: Repo,
        maybe_head_repo: Option<Repo>,
        user: User,
        pull_num: u64,
        cmd: Option<CommentCommand>,
    ) {
        let body = self.comment_command(&log, &base_repo, maybe_head_repo, user, pull_num, cmd);
        if let Err(panic) = AssertUnwindSafe(body).catch_unwind().await {
            self.report_panic(&log, &base_repo, pull_num, panic).await;
        }
    }

    async fn run_autoplan_command(
        &self,
        log: Logger,
        base_repo: Repo,
        head_repo: Repo,
        pull: PullRequest,
        user: User,
    ) {
        let pull_num = pull.num;
        let body = self.autoplan_command(&log, &base_repo, head_repo, pull, user);
        if let Err(panic) = AssertUnwindSafe(body).catch_unwind().await {
            self.report_panic(&log, &base_repo, pull_num, panic).await;
        }
    }
}

impl DefaultCommandRunner {
    async fn comment_command(
        &self,
        log: &Logger,
        base_repo: &Repo,
        maybe_head_repo: Option<Repo>,
        user: User,
        pull_num: u64,
        cmd: Option<CommentCommand>,
    ) {
        let Some((pull, head_repo)) = self
            .fetch_pull(log, base_repo, maybe_head_repo, pull_num)
            .await
        else {
            return;
        };

        if head_repo.owner != base_repo.owner && !self.allow_fork_prs {
            try_comment(
                self.vcs_client.as_ref(),
                log,
                base_repo,
                pull_num,
                &format!(
                    "Atlantis commands can't be run on fork pull requests. To enable, set --{}",
                    self.allow_fork_prs_flag
                ),
            )
            .await;
            return;
        }
        if pull.state == PullRequestState::Closed {
            try_comment(
                self.vcs_client.as_ref(),
                log,
                base_repo,
                pull_num,
                "Atlantis commands can't be run on closed pull requests",
            )
            .await;
            return;
        }

        let cmd = cmd.unwrap_or_default();
        let ctx = CommandContext {
            base_repo: base_repo.clone(),
            head_repo,
            pull,
            user,
            log: log.clone(),
        };

        self.commit_status_updater
            .update(log, &ctx.base_repo, &ctx.pull, CommitStatus::Pending, cmd.name)
            .await;

        let built = match cmd.name {
            CommandName::Plan => self.project_command_builder.build_plan_command(&ctx, &cmd).await,
            CommandName::Apply => {
                self.project_command_builder.build_apply_command(&ctx, &cmd).await
            }
        };
        let result = match built {
            Ok(pctx) => self.run_project_commands(&[pctx], cmd.name).await,
            Err(e) => {
                ctx.log
                    .err(format!("failed to build {} command: {e:#}", cmd.name));
                CommandResult {
                    error: Some(format!("{e:#}")),
                    ..Default::default()
                }
            }
        };

        self.update_and_comment(&ctx, cmd.name, &result, cmd.verbose).await;
    }

    async fn autoplan_command(
        &self,
        log: &Logger,
        base_repo: &Repo,
        head_repo: Repo,
        pull: PullRequest,
        user: User,
    ) {
        let ctx = CommandContext {
            base_repo: base_repo.clone(),
            head_repo,
            pull,
            user,
            log: log.clone(),
        };

        let pctxs = match self.project_command_builder.build_autoplan_commands(&ctx).await {
            Ok(pctxs) => pctxs,
            Err(e) => {
                ctx.log.err(format!("failed to build autoplan commands: {e:#}"));
                return;
            }
        };
        // Nothing matched: exit without comment or status so PRs that don't
        // touch terraform stay quiet. The log line is the operator's
        // breadcrumb.
        if pctxs.is_empty() {
            ctx.log.info("determined there was no project to run plan in");
            return;
        }

        self.commit_status_updater
            .update(
                log,
                &ctx.base_repo,
                &ctx.pull,
                CommitStatus::Pending,
                CommandName::Plan,
            )
            .await;

        let result = self.run_project_commands(&pctxs, CommandName::Plan).await;
        self.update_and_comment(&ctx, CommandName::Plan, &result, false).await;
    }

    /// Fetch the canonical PR (and head repo where the event didn't carry
    /// one) from the host. Logs and returns None when the host isn't
    /// configured or the call fails.
    async fn fetch_pull(
        &self,
        log: &Logger,
        base_repo: &Repo,
        maybe_head_repo: Option<Repo>,
        pull_num: u64,
    ) -> Option<(PullRequest, Repo)> {
        match base_repo.vcs_host {
            VcsHostType::Github => {
                let Some(getter) = &self.github_pull_getter else {
                    log.err("Atlantis not configured to support GitHub");
                    return None;
                };
                match getter.get_pull_request(base_repo, pull_num).await {
                    Ok((pull, fetched_head)) => {
                        Some((pull, maybe_head_repo.unwrap_or(fetched_head)))
                    }
                    Err(e) => {
                        log.err(format!("making pull request API call to GitHub: {e:#}"));
                        None
                    }
                }
            }
            VcsHostType::Gitlab => {
                let Some(getter) = &self.gitlab_merge_request_getter else {
                    log.err("Atlantis not configured to support GitLab");
                    return None;
                };
                match getter.get_merge_request(&base_repo.full_name, pull_num).await {
                    Ok(pull) => match maybe_head_repo {
                        Some(head_repo) => Some((pull, head_repo)),
                        None => {
                            log.err("GitLab comment event did not include the head repo");
                            None
                        }
                    },
                    Err(e) => {
                        log.err(format!("making merge request API call to GitLab: {e:#}"));
                        None
                    }
                }
            }
        }
    }

    /// Execute contexts one at a time, in builder order. Serial on purpose:
    /// each execution takes its workspace lock.
    async fn run_project_commands(
        &self,
        pctxs: &[ProjectCommandContext],
        cmd: CommandName,
    ) -> CommandResult {
        let mut project_results = Vec::with_capacity(pctxs.len());
        for pctx in pctxs {
            let result = match cmd {
                CommandName::Plan => self.project_command_runner.plan(pctx).await,
                CommandName::Apply => self.project_command_runner.apply(pctx).await,
            };
            project_results.push(result);
        }
        CommandResult {
            project_results,
            ..Default::default()
        }
    }

    async fn update_and_comment(
        &self,
        ctx: &CommandContext,
        cmd: CommandName,
        result: &CommandResult,
        verbose: bool,
    ) {
        self.commit_status_updater
            .update_project_result(ctx, cmd, result)
            .await;
        let comment = self.markdown_renderer.render(result, cmd, verbose, &ctx.log);
        try_comment(
            self.vcs_client.as_ref(),
            &ctx.log,
            &ctx.base_repo,
            ctx.pull.num,
            &comment,
        )
        .await;
    }

    async fn report_panic(
        &self,
        log: &Logger,
        base_repo: &Repo,
        pull_num: u64,
        panic: Box<dyn std::any::Any + Send>,
    ) {
        let msg = panic_message(panic.as_ref());
        log.err(format!("PANIC during command: {msg}"));
        try_comment(
            self.vcs_client.as_ref(),
            log,
            base_repo,
            pull_num,
            &format!("**Error: runner panicked**\n```\n{msg}\n```"),
        )
        .await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
