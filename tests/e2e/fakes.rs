//! Shared harness for the end-to-end tests: a real pipeline with fakes at
//! the VCS and terraform edges, plus a real git source repo to clone from.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

use atlantis::cleaner::WorkingDirPullCleaner;
use atlantis::command_builder::DefaultProjectCommandBuilder;
use atlantis::comment_parser::DefaultCommentParser;
use atlantis::locking::DefaultWorkingDirLocker;
use atlantis::logging::Logger;
use atlantis::markdown::MarkdownRenderer;
use atlantis::models::{CommitStatus, PullRequest, PullRequestState, Repo, VcsHostType};
use atlantis::project_finder::ProjectFinder;
use atlantis::runner::{DefaultCommandRunner, DefaultProjectCommandRunner};
use atlantis::status::DefaultCommitStatusUpdater;
use atlantis::terraform::TerraformExec;
use atlantis::vcs::{GithubPullGetter, VcsClient};
use atlantis::web::{self, events::EventsController, EventParser};
use atlantis::whitelist::RepoWhitelistChecker;
use atlantis::working_dir::FileWorkspace;

/// Records comments and statuses; serves a configurable modified-file list.
#[derive(Default)]
pub struct FakeVcs {
    pub modified_files: Mutex<Vec<String>>,
    pub comments: Mutex<Vec<(String, u64, String)>>,
    pub statuses: Mutex<Vec<(CommitStatus, String)>>,
}

#[async_trait]
impl VcsClient for FakeVcs {
    async fn get_modified_files(&self, _: &Repo, _: &PullRequest) -> Result<Vec<String>> {
        Ok(self.modified_files.lock().unwrap().clone())
    }
    async fn create_comment(&self, repo: &Repo, pull_num: u64, comment: &str) -> Result<()> {
        self.comments.lock().unwrap().push((
            repo.full_name.clone(),
            pull_num,
            comment.to_string(),
        ));
        Ok(())
    }
    async fn update_status(
        &self,
        _: &Repo,
        _: &PullRequest,
        status: CommitStatus,
        context: &str,
        _: &str,
    ) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((status, context.to_string()));
        Ok(())
    }
}

/// Returns a canned plan/apply output and records every invocation.
pub struct FakeTerraform {
    pub output: String,
    pub calls: Mutex<Vec<(PathBuf, Vec<String>, String)>>,
}

#[async_trait]
impl TerraformExec for FakeTerraform {
    async fn run_command_with_version(
        &self,
        _: &Logger,
        path: &Path,
        args: &[String],
        _: Option<&str>,
        workspace: &str,
    ) -> Result<String> {
        self.calls.lock().unwrap().push((
            path.to_path_buf(),
            args.to_vec(),
            workspace.to_string(),
        ));
        Ok(self.output.clone())
    }
}

/// Serves the PR pointing at the on-disk source repo.
pub struct FakeGithubGetter {
    pub pull: PullRequest,
    pub head_repo: Repo,
}

#[async_trait]
impl GithubPullGetter for FakeGithubGetter {
    async fn get_pull_request(&self, _: &Repo, _: u64) -> Result<(PullRequest, Repo)> {
        Ok((self.pull.clone(), self.head_repo.clone()))
    }
}

pub struct Harness {
    pub controller: Arc<EventsController>,
    pub vcs: Arc<FakeVcs>,
    pub terraform: Arc<FakeTerraform>,
    pub locker: Arc<DefaultWorkingDirLocker>,
    pub data_dir: PathBuf,
    pub source: PathBuf,
    pub head_sha: String,
    _tmp: tempfile::TempDir,
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("running git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Build the full pipeline around a fresh source repo containing `files`
/// committed on branch "main".
pub fn harness(files: &[(&str, &str)]) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    git(&source, &["init"]);
    git(&source, &["checkout", "-b", "main"]);
    for (name, contents) in files {
        let path = source.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
    git(&source, &["add", "."]);
    git(&source, &["commit", "-m", "initial"]);
    let head_sha = git(&source, &["rev-parse", "HEAD"]);

    let head_repo = Repo::new(
        VcsHostType::Github,
        "owner/repo",
        source.to_string_lossy().to_string(),
    )
    .unwrap();
    let pull = PullRequest {
        num: 1,
        head_commit: head_sha.clone(),
        branch: "main".to_string(),
        author: "author".to_string(),
        state: PullRequestState::Open,
    };

    let vcs: Arc<FakeVcs> = Arc::new(FakeVcs::default());
    let terraform = Arc::new(FakeTerraform {
        output: "Plan: 1 to add, 0 to change, 0 to destroy.".to_string(),
        calls: Mutex::new(Vec::new()),
    });

    let data_dir = tmp.path().join("data");
    let locker = Arc::new(DefaultWorkingDirLocker::new());
    let working_dir = Arc::new(FileWorkspace::new(data_dir.clone()));

    let runner = Arc::new(DefaultCommandRunner {
        vcs_client: vcs.clone(),
        github_pull_getter: Some(Arc::new(FakeGithubGetter {
            pull,
            head_repo,
        })),
        gitlab_merge_request_getter: None,
        commit_status_updater: Arc::new(DefaultCommitStatusUpdater {
            client: vcs.clone(),
        }),
        markdown_renderer: MarkdownRenderer,
        project_command_builder: Arc::new(DefaultProjectCommandBuilder {
            project_finder: ProjectFinder,
            vcs_client: vcs.clone(),
            working_dir: working_dir.clone(),
            locker: locker.clone(),
            allow_repo_config: true,
            allow_repo_config_flag: "allow-repo-config".to_string(),
        }),
        project_command_runner: Arc::new(DefaultProjectCommandRunner {
            locker: locker.clone(),
            working_dir: working_dir.clone(),
            terraform: terraform.clone(),
        }),
        allow_fork_prs: false,
        allow_fork_prs_flag: "allow-fork-prs".to_string(),
    });

    let controller = Arc::new(EventsController {
        command_runner: runner,
        pull_cleaner: Arc::new(WorkingDirPullCleaner {
            working_dir: working_dir.clone(),
        }),
        comment_parser: Arc::new(DefaultCommentParser),
        event_parser: EventParser::default(),
        github_webhook_secret: None,
        gitlab_webhook_secret: None,
        repo_whitelist: RepoWhitelistChecker::new("github.com/owner/*").unwrap(),
        supported_hosts: vec![VcsHostType::Github],
        vcs_client: vcs.clone(),
        testing_mode: true,
    });

    Harness {
        controller,
        vcs,
        terraform,
        locker,
        data_dir,
        source,
        head_sha,
        _tmp: tmp,
    }
}

impl Harness {
    pub async fn send_github(&self, event_type: &str, body: String) -> (StatusCode, String) {
        let request = Request::builder()
            .method("POST")
            .uri("/events")
            .header("X-Github-Event", event_type)
            .body(Body::from(body))
            .unwrap();
        let response = web::router(self.controller.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn workspace_dir(&self, workspace: &str) -> PathBuf {
        self.data_dir.join("repos/owner/repo/1").join(workspace)
    }

    pub fn comment_body(comment: &str) -> String {
        serde_json::json!({
            "action": "created",
            "issue": { "number": 1 },
            "comment": {
                "body": comment,
                "user": { "login": "commenter" }
            },
            "repository": {
                "full_name": "owner/repo",
                "clone_url": "https://github.com/owner/repo.git"
            }
        })
        .to_string()
    }

    pub fn pull_body(&self, action: &str) -> String {
        self.pull_body_with_sha(action, &self.head_sha)
    }

    pub fn pull_body_with_sha(&self, action: &str, sha: &str) -> String {
        serde_json::json!({
            "action": action,
            "pull_request": {
                "number": 1,
                "state": "open",
                "user": { "login": "author" },
                "head": {
                    "sha": sha,
                    "ref": "main",
                    "repo": {
                        "full_name": "owner/repo",
                        "clone_url": self.source.to_string_lossy()
                    }
                }
            },
            "repository": {
                "full_name": "owner/repo",
                "clone_url": "https://github.com/owner/repo.git"
            },
            "sender": { "login": "sender" }
        })
        .to_string()
    }

    /// Just the user-visible comments posted so far.
    pub fn comments(&self) -> Vec<String> {
        self.vcs
            .comments
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, body)| body.clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<(CommitStatus, String)> {
        self.vcs.statuses.lock().unwrap().clone()
    }
}
