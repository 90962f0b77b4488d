//! Operator-facing configuration, assembled from CLI flags in `main`.

use std::path::PathBuf;

/// Flag names echoed in user-facing messages.
pub const ALLOW_FORK_PRS_FLAG: &str = "allow-fork-prs";
pub const ALLOW_REPO_CONFIG_FLAG: &str = "allow-repo-config";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Root of the working-directory tree.
    pub data_dir: PathBuf,
    /// Whether commands may run on PRs whose head repo belongs to a
    /// different owner than the base repo.
    pub allow_fork_prs: bool,
    /// Whether repos may ship an atlantis.yaml.
    pub allow_repo_config: bool,
    /// Comma-separated globs over "hostname/owner/name".
    pub repo_whitelist: String,
    pub github_user: Option<String>,
    pub github_token: Option<String>,
    pub github_webhook_secret: Option<String>,
    pub gitlab_token: Option<String>,
    pub gitlab_webhook_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4141,
            data_dir: PathBuf::from("~/.atlantis"),
            allow_fork_prs: false,
            allow_repo_config: false,
            repo_whitelist: String::new(),
            github_user: None,
            github_token: None,
            github_webhook_secret: None,
            gitlab_token: None,
            gitlab_webhook_secret: None,
        }
    }
}
