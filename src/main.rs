use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atlantis::cleaner::WorkingDirPullCleaner;
use atlantis::command_builder::DefaultProjectCommandBuilder;
use atlantis::comment_parser::DefaultCommentParser;
use atlantis::config::{ServerConfig, ALLOW_FORK_PRS_FLAG, ALLOW_REPO_CONFIG_FLAG};
use atlantis::locking::DefaultWorkingDirLocker;
use atlantis::markdown::MarkdownRenderer;
use atlantis::models::VcsHostType;
use atlantis::project_finder::ProjectFinder;
use atlantis::runner::{DefaultCommandRunner, DefaultProjectCommandRunner};
use atlantis::status::DefaultCommitStatusUpdater;
use atlantis::terraform::TerraformClient;
use atlantis::vcs::{
    ClientProxy, GithubClient, GithubPullGetter, GitlabClient, GitlabMergeRequestGetter,
};
use atlantis::web::{self, events::EventsController, EventParser};
use atlantis::whitelist::RepoWhitelistChecker;
use atlantis::working_dir::FileWorkspace;

#[derive(Parser)]
#[command(name = "atlantis", about = "Terraform pull request automation", version)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "ATLANTIS_PORT", default_value_t = 4141)]
    port: u16,

    /// Directory to store Atlantis data under
    #[arg(long, env = "ATLANTIS_DATA_DIR", default_value = "~/.atlantis")]
    data_dir: String,

    /// Allow commands on pull requests from forks
    #[arg(long)]
    allow_fork_prs: bool,

    /// Allow repos to configure Atlantis with an atlantis.yaml file
    #[arg(long)]
    allow_repo_config: bool,

    /// Comma-separated globs over hostname/owner/name selecting which repos
    /// Atlantis will act on, e.g. "github.com/myorg/*"
    #[arg(long, env = "ATLANTIS_REPO_WHITELIST", default_value = "")]
    repo_whitelist: String,

    /// GitHub username of the API user
    #[arg(long, env = "ATLANTIS_GH_USER")]
    gh_user: Option<String>,

    /// GitHub token of the API user
    #[arg(long, env = "ATLANTIS_GH_TOKEN")]
    gh_token: Option<String>,

    /// Secret validating GitHub webhook deliveries
    #[arg(long, env = "ATLANTIS_GH_WEBHOOK_SECRET")]
    gh_webhook_secret: Option<String>,

    /// GitLab token of the API user
    #[arg(long, env = "ATLANTIS_GITLAB_TOKEN")]
    gitlab_token: Option<String>,

    /// Secret validating GitLab webhook deliveries
    #[arg(long, env = "ATLANTIS_GITLAB_WEBHOOK_SECRET")]
    gitlab_webhook_secret: Option<String>,

    /// Log level when RUST_LOG is not set (debug|info|warn|error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            data_dir: expand_home(&self.data_dir),
            allow_fork_prs: self.allow_fork_prs,
            allow_repo_config: self.allow_repo_config,
            repo_whitelist: self.repo_whitelist,
            github_user: self.gh_user,
            github_token: self.gh_token,
            github_webhook_secret: self.gh_webhook_secret,
            gitlab_token: self.gitlab_token,
            gitlab_webhook_secret: self.gitlab_webhook_secret,
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let config = cli.into_config();
    let controller = build_controller(&config)?;

    let app = web::router(controller);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Atlantis started - listening on port {}", config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Wire every component of the pipeline together.
fn build_controller(config: &ServerConfig) -> Result<Arc<EventsController>> {
    let github_client = match (&config.github_user, &config.github_token) {
        (Some(user), Some(token)) => Some(Arc::new(GithubClient::new(user.clone(), token.clone()))),
        _ => None,
    };
    let gitlab_client = config
        .gitlab_token
        .as_ref()
        .map(|token| Arc::new(GitlabClient::new(token.clone())));
    ensure!(
        github_client.is_some() || gitlab_client.is_some(),
        "no VCS host configured: set --gh-user/--gh-token and/or --gitlab-token"
    );

    let mut supported_hosts = Vec::new();
    if github_client.is_some() {
        supported_hosts.push(VcsHostType::Github);
    }
    if gitlab_client.is_some() {
        supported_hosts.push(VcsHostType::Gitlab);
    }

    let vcs_client = Arc::new(ClientProxy {
        github: github_client.clone(),
        gitlab: gitlab_client.clone(),
    });
    let locker = Arc::new(DefaultWorkingDirLocker::new());
    let working_dir = Arc::new(FileWorkspace::new(config.data_dir.clone()));

    let builder = Arc::new(DefaultProjectCommandBuilder {
        project_finder: ProjectFinder,
        vcs_client: vcs_client.clone(),
        working_dir: working_dir.clone(),
        locker: locker.clone(),
        allow_repo_config: config.allow_repo_config,
        allow_repo_config_flag: ALLOW_REPO_CONFIG_FLAG.to_string(),
    });
    let project_runner = Arc::new(DefaultProjectCommandRunner {
        locker: locker.clone(),
        working_dir: working_dir.clone(),
        terraform: Arc::new(TerraformClient),
    });
    let status_updater = Arc::new(DefaultCommitStatusUpdater {
        client: vcs_client.clone(),
    });

    let github_getter: Option<Arc<dyn GithubPullGetter>> = match &github_client {
        Some(client) => Some(client.clone()),
        None => None,
    };
    let gitlab_getter: Option<Arc<dyn GitlabMergeRequestGetter>> = match &gitlab_client {
        Some(client) => Some(client.clone()),
        None => None,
    };

    let runner = Arc::new(DefaultCommandRunner {
        vcs_client: vcs_client.clone(),
        github_pull_getter: github_getter,
        gitlab_merge_request_getter: gitlab_getter,
        commit_status_updater: status_updater,
        markdown_renderer: MarkdownRenderer,
        project_command_builder: builder,
        project_command_runner: project_runner,
        allow_fork_prs: config.allow_fork_prs,
        allow_fork_prs_flag: ALLOW_FORK_PRS_FLAG.to_string(),
    });

    Ok(Arc::new(EventsController {
        command_runner: runner,
        pull_cleaner: Arc::new(WorkingDirPullCleaner {
            working_dir: working_dir.clone(),
        }),
        comment_parser: Arc::new(DefaultCommentParser),
        event_parser: EventParser {
            github_user: config.github_user.clone().unwrap_or_default(),
            github_token: config.github_token.clone().unwrap_or_default(),
            gitlab_token: config.gitlab_token.clone().unwrap_or_default(),
        },
        github_webhook_secret: config.github_webhook_secret.clone(),
        gitlab_webhook_secret: config.gitlab_webhook_secret.clone(),
        repo_whitelist: RepoWhitelistChecker::new(&config.repo_whitelist)?,
        supported_hosts,
        vcs_client,
        testing_mode: false,
    }))
}
