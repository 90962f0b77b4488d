//! Building project command contexts.
//!
//! Turns "run plan/apply on this PR" into one or more fully-resolved
//! per-project work units: lock the workspace, get the clone on disk, read
//! the repo config if there is one, figure out which projects apply, and
//! bundle everything the project runner needs.
//!
//! The workspace lock is held only for the duration of the build (clone +
//! config read); execution re-locks per project. At most one lock is held
//! per call and any error path releases it on the way out.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::locking::WorkingDirLocker;
use crate::models::{
    CommandContext, CommentCommand, ProjectCommandContext, DEFAULT_WORKSPACE,
};
use crate::project_finder::ProjectFinder;
use crate::repo_config::{self, Project, RepoConfig, ATLANTIS_YAML_FILENAME};
use crate::vcs::VcsClient;
use crate::working_dir::WorkingDir;

#[async_trait]
pub trait ProjectCommandBuilder: Send + Sync {
    /// Build work units for a PR open/update: clone the default workspace,
    /// then either marker-detection (no config) or `when_modified` matching
    /// (config) over the PR's modified files.
    async fn build_autoplan_commands(
        &self,
        ctx: &CommandContext,
    ) -> Result<Vec<ProjectCommandContext>>;

    /// Build the single work unit for a `plan` comment.
    async fn build_plan_command(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<ProjectCommandContext>;

    /// Build the single work unit for an `apply` comment. Uses the existing
    /// working dir; never clones.
    async fn build_apply_command(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<ProjectCommandContext>;
}

pub struct DefaultProjectCommandBuilder {
    pub project_finder: ProjectFinder,
    pub vcs_client: Arc<dyn VcsClient>,
    pub working_dir: Arc<dyn WorkingDir>,
    pub locker: Arc<dyn WorkingDirLocker>,
    /// Whether the operator allows repos to ship an atlantis.yaml.
    pub allow_repo_config: bool,
    /// Flag name echoed in the rejection message.
    pub allow_repo_config_flag: String,
}

#[async_trait]
impl ProjectCommandBuilder for DefaultProjectCommandBuilder {
    async fn build_autoplan_commands(
        &self,
        ctx: &CommandContext,
    ) -> Result<Vec<ProjectCommandContext>> {
        // Lock the workspace we're about to clone into.
        let workspace = DEFAULT_WORKSPACE;
        let _guard = self
            .locker
            .try_lock(&ctx.base_repo.full_name, workspace, ctx.pull.num)
            .inspect_err(|_| ctx.log.warn("workspace was locked"))?;
        ctx.log.debug("got workspace lock");

        let repo_dir = self
            .working_dir
            .clone_repo(&ctx.log, &ctx.base_repo, &ctx.head_repo, &ctx.pull, workspace)
            .await?;

        let config = self.read_config_if_present(ctx, &repo_dir)?;

        let modified_files = self
            .vcs_client
            .get_modified_files(&ctx.base_repo, &ctx.pull)
            .await?;
        ctx.log.debug(format!(
            "{} files were modified in this pull request",
            modified_files.len()
        ));

        let contexts = match config {
            // Without a config we plan in every modified project we can
            // detect on disk.
            None => self
                .project_finder
                .determine_projects(
                    &ctx.log,
                    &modified_files,
                    &ctx.base_repo.full_name,
                    &repo_dir,
                )
                .into_iter()
                .map(|dir| self.project_ctx(ctx, dir, DEFAULT_WORKSPACE.to_string(), None, None, vec![]))
                .collect(),
            Some(config) => self
                .project_finder
                .determine_projects_via_config(&ctx.log, &modified_files, &config)
                .into_iter()
                .map(|project| {
                    self.project_ctx(
                        ctx,
                        project.dir.clone(),
                        project.workspace.clone(),
                        Some(project),
                        Some(config.clone()),
                        vec![],
                    )
                })
                .collect(),
        };
        Ok(contexts)
    }

    async fn build_plan_command(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<ProjectCommandContext> {
        ctx.log.debug("building plan command");
        let _guard = self
            .locker
            .try_lock(&ctx.base_repo.full_name, &cmd.workspace, ctx.pull.num)?;

        ctx.log.debug("cloning repository");
        let repo_dir = self
            .working_dir
            .clone_repo(&ctx.log, &ctx.base_repo, &ctx.head_repo, &ctx.pull, &cmd.workspace)
            .await?;

        self.build_project_command_ctx(ctx, cmd, &repo_dir)
    }

    async fn build_apply_command(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<ProjectCommandContext> {
        let _guard = self
            .locker
            .try_lock(&ctx.base_repo.full_name, &cmd.workspace, ctx.pull.num)?;

        let repo_dir = self
            .working_dir
            .get_working_dir(&ctx.base_repo, &ctx.pull, &cmd.workspace)
            .await?;

        self.build_project_command_ctx(ctx, cmd, &repo_dir)
    }
}

impl DefaultProjectCommandBuilder {
    fn read_config_if_present(
        &self,
        ctx: &CommandContext,
        repo_dir: &Path,
    ) -> Result<Option<RepoConfig>> {
        let has_config = repo_config::has_config_file(repo_dir).with_context(|| {
            format!("looking for {ATLANTIS_YAML_FILENAME} file in {repo_dir:?}")
        })?;
        if !has_config {
            ctx.log.info("found no atlantis.yaml file");
            return Ok(None);
        }
        if !self.allow_repo_config {
            bail!(
                "{} files not allowed because Atlantis is not running with --{}",
                ATLANTIS_YAML_FILENAME,
                self.allow_repo_config_flag
            );
        }
        let config = repo_config::read_config(repo_dir)?;
        ctx.log.info("successfully parsed atlantis.yaml file");
        Ok(Some(config))
    }

    fn build_project_command_ctx(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
        repo_dir: &Path,
    ) -> Result<ProjectCommandContext> {
        let (project_config, global_config) = self.get_cfg(
            cmd.project_name.as_deref(),
            &cmd.repo_rel_dir,
            &cmd.workspace,
            repo_dir,
        )?;

        // A project looked up by name carries its own dir and workspace;
        // they win over the comment's (the parser forbids setting both).
        let (dir, workspace) = match &project_config {
            Some(project) => (project.dir.clone(), project.workspace.clone()),
            None => (cmd.repo_rel_dir.clone(), cmd.workspace.clone()),
        };

        Ok(self.project_ctx(
            ctx,
            dir,
            workspace,
            project_config,
            global_config,
            cmd.flags.clone(),
        ))
    }

    /// Resolve the project and global config for a comment command.
    fn get_cfg(
        &self,
        project_name: Option<&str>,
        dir: &str,
        workspace: &str,
        repo_dir: &Path,
    ) -> Result<(Option<Project>, Option<RepoConfig>)> {
        let has_config = repo_config::has_config_file(repo_dir).with_context(|| {
            format!("looking for {ATLANTIS_YAML_FILENAME} file in {repo_dir:?}")
        })?;
        if !has_config {
            if project_name.is_some() {
                bail!(
                    "cannot specify a project name unless an {} file exists to configure projects",
                    ATLANTIS_YAML_FILENAME
                );
            }
            return Ok((None, None));
        }

        if !self.allow_repo_config {
            bail!(
                "{} files not allowed because Atlantis is not running with --{}",
                ATLANTIS_YAML_FILENAME,
                self.allow_repo_config_flag
            );
        }

        let global_config = repo_config::read_config(repo_dir)?;

        if let Some(name) = project_name {
            let project = global_config
                .find_project_by_name(name)
                .cloned()
                .with_context(|| {
                    format!("no project with name {name:?} is defined in {ATLANTIS_YAML_FILENAME}")
                })?;
            return Ok((Some(project), Some(global_config)));
        }

        let matches: Vec<Project> = global_config
            .find_projects_by_dir_workspace(dir, workspace)
            .into_iter()
            .cloned()
            .collect();
        match matches.len() {
            0 => Ok((None, Some(global_config))),
            1 => Ok((matches.into_iter().next(), Some(global_config))),
            _ => bail!(
                "must specify project name: more than one project defined in {} matched dir: {:?} workspace: {:?}",
                ATLANTIS_YAML_FILENAME,
                dir,
                workspace
            ),
        }
    }

    fn project_ctx(
        &self,
        ctx: &CommandContext,
        repo_rel_dir: String,
        workspace: String,
        project_config: Option<Project>,
        global_config: Option<RepoConfig>,
        comment_args: Vec<String>,
    ) -> ProjectCommandContext {
        ProjectCommandContext {
            base_repo: ctx.base_repo.clone(),
            head_repo: ctx.head_repo.clone(),
            pull: ctx.pull.clone(),
            user: ctx.user.clone(),
            log: ctx.log.clone(),
            repo_rel_dir,
            workspace,
            project_config,
            global_config,
            comment_args,
        }
    }
}
