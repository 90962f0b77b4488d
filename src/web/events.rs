//! The events controller: webhook validation, classification and dispatch.
//!
//! One POST endpoint serves both hosts; the `X-Github-Event` /
//! `X-Gitlab-Event` headers pick the path. Accepted commands respond 200
//! before the runner finishes: in normal mode the runner is spawned onto a
//! background task, in testing mode it is awaited inline so tests are
//! deterministic.

use std::fmt;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::cleaner::PullCleaner;
use crate::comment_parser::CommentParsing;
use crate::logging::{Level, Logger};
use crate::models::{PullRequest, Repo, User, VcsHostType};
use crate::runner::CommandRunning;
use crate::vcs::{try_comment, VcsClient};
use crate::web::{github, gitlab, EventParser};
use crate::whitelist::RepoWhitelistChecker;

const REQ_ID_SIZE: usize = 7;

/// How a PR lifecycle event classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullEventType {
    Opened,
    Updated,
    Closed,
    Other,
}

impl fmt::Display for PullEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PullEventType::Opened => "opened",
            PullEventType::Updated => "updated",
            PullEventType::Closed => "closed",
            PullEventType::Other => "other",
        };
        f.write_str(s)
    }
}

pub struct EventsController {
    pub command_runner: Arc<dyn CommandRunning>,
    pub pull_cleaner: Arc<dyn PullCleaner>,
    pub comment_parser: Arc<dyn CommentParsing>,
    pub event_parser: EventParser,
    /// When set, GitHub requests must carry a valid `X-Hub-Signature`.
    pub github_webhook_secret: Option<String>,
    /// When set, GitLab requests must carry the matching `X-Gitlab-Token`.
    pub gitlab_webhook_secret: Option<String>,
    pub repo_whitelist: RepoWhitelistChecker,
    pub supported_hosts: Vec<VcsHostType>,
    pub vcs_client: Arc<dyn VcsClient>,
    /// Await runner invocations inline instead of spawning them.
    pub testing_mode: bool,
}

/// POST /events
pub async fn post_events(
    State(controller): State<Arc<EventsController>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    controller.post(&headers, &body).await
}

impl EventsController {
    async fn post(&self, headers: &HeaderMap, body: &Bytes) -> Response {
        if headers.contains_key(github::GITHUB_HEADER)
            && headers.contains_key(gitlab::GITLAB_HEADER)
        {
            let log = Logger::new(gen_request_id());
            return respond(
                &log,
                Level::Warn,
                StatusCode::BAD_REQUEST,
                "Request contained both GitHub and GitLab event headers",
            );
        }
        if let Some(event_type) = header_str(headers, github::GITHUB_HEADER) {
            // Use part of the GitHub delivery GUID as the request id.
            let log = Logger::new(github_request_id(header_str(
                headers,
                github::DELIVERY_HEADER,
            )));
            log.debug("handling GitHub post");
            if !self.supports_host(VcsHostType::Github) {
                return respond(
                    &log,
                    Level::Debug,
                    StatusCode::BAD_REQUEST,
                    "Ignoring request since not configured to support GitHub",
                );
            }
            return self.handle_github_post(&log, event_type, headers, body).await;
        }
        if let Some(event_type) = header_str(headers, gitlab::GITLAB_HEADER) {
            // GitLab doesn't send a request id so generate one.
            let log = Logger::new(gen_request_id());
            log.debug("handling GitLab post");
            if !self.supports_host(VcsHostType::Gitlab) {
                return respond(
                    &log,
                    Level::Debug,
                    StatusCode::BAD_REQUEST,
                    "Ignoring request since not configured to support GitLab",
                );
            }
            return self.handle_gitlab_post(&log, event_type, headers, body).await;
        }
        let log = Logger::new(gen_request_id());
        respond(&log, Level::Debug, StatusCode::BAD_REQUEST, "Ignoring request")
    }

    // --------------------------------------------------------------------
    // GitHub
    // --------------------------------------------------------------------

    async fn handle_github_post(
        &self,
        log: &Logger,
        event_type: &str,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Response {
        if let Some(secret) = &self.github_webhook_secret {
            let signature = header_str(headers, github::SIGNATURE_HEADER);
            if !github::validate_signature(secret.as_bytes(), signature, body) {
                return respond(
                    log,
                    Level::Warn,
                    StatusCode::BAD_REQUEST,
                    "webhook signature verification failed",
                );
            }
            log.debug("request passed validation");
        }

        match event_type {
            "issue_comment" => self.handle_github_comment_event(log, body).await,
            "pull_request" => self.handle_github_pull_request_event(log, body).await,
            _ => respond(
                log,
                Level::Debug,
                StatusCode::OK,
                "Ignoring unsupported event",
            ),
        }
    }

    async fn handle_github_comment_event(&self, log: &Logger, body: &Bytes) -> Response {
        let event: github::IssueCommentEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                return respond(
                    log,
                    Level::Error,
                    StatusCode::BAD_REQUEST,
                    format!("Failed parsing event: {e}"),
                )
            }
        };
        if event.action.as_deref() != Some("created") {
            return respond(
                log,
                Level::Debug,
                StatusCode::OK,
                "Ignoring comment event since action was not created",
            );
        }

        let (base_repo, user, pull_num, comment) =
            match self.event_parser.parse_github_issue_comment_event(&event) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return respond(
                        log,
                        Level::Error,
                        StatusCode::BAD_REQUEST,
                        format!("Failed parsing event: {e:#}"),
                    )
                }
            };

        // The head repo isn't in the comment payload; the runner fetches it
        // with the PR.
        self.handle_comment_event(
            log,
            base_repo,
            None,
            user,
            pull_num,
            comment,
            VcsHostType::Github,
        )
        .await
    }

    async fn handle_github_pull_request_event(&self, log: &Logger, body: &Bytes) -> Response {
        let event: github::PullRequestEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                return respond(
                    log,
                    Level::Error,
                    StatusCode::BAD_REQUEST,
                    format!("Error parsing pull data: {e}"),
                )
            }
        };
        let (pull, base_repo, head_repo, user) =
            match self.event_parser.parse_github_pull_event(&event) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return respond(
                        log,
                        Level::Error,
                        StatusCode::BAD_REQUEST,
                        format!("Error parsing pull data: {e:#}"),
                    )
                }
            };
        let event_type = match event.action.as_deref() {
            Some("opened") => PullEventType::Opened,
            Some("synchronize") => PullEventType::Updated,
            Some("closed") => PullEventType::Closed,
            _ => PullEventType::Other,
        };
        log.info(format!("identified event as type {event_type}"));
        self.handle_pull_request_event(log, base_repo, head_repo, pull, user, event_type)
            .await
    }

    // --------------------------------------------------------------------
    // GitLab
    // --------------------------------------------------------------------

    async fn handle_gitlab_post(
        &self,
        log: &Logger,
        event_type: &str,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Response {
        if let Some(secret) = &self.gitlab_webhook_secret {
            if header_str(headers, gitlab::TOKEN_HEADER) != Some(secret.as_str()) {
                return respond(
                    log,
                    Level::Warn,
                    StatusCode::BAD_REQUEST,
                    "webhook token verification failed",
                );
            }
            log.debug("request passed validation");
        }

        match event_type {
            gitlab::NOTE_HOOK => self.handle_gitlab_comment_event(log, body).await,
            gitlab::MERGE_REQUEST_HOOK => self.handle_gitlab_merge_event(log, body).await,
            _ => respond(
                log,
                Level::Debug,
                StatusCode::OK,
                "Ignoring unsupported event",
            ),
        }
    }

    async fn handle_gitlab_comment_event(&self, log: &Logger, body: &Bytes) -> Response {
        let event: gitlab::MergeCommentEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                return respond(
                    log,
                    Level::Error,
                    StatusCode::BAD_REQUEST,
                    format!("Error parsing webhook: {e}"),
                )
            }
        };
        let (base_repo, head_repo, user, pull_num, comment) =
            match self.event_parser.parse_gitlab_merge_comment_event(&event) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return respond(
                        log,
                        Level::Error,
                        StatusCode::BAD_REQUEST,
                        format!("Error parsing webhook: {e:#}"),
                    )
                }
            };
        self.handle_comment_event(
            log,
            base_repo,
            Some(head_repo),
            user,
            pull_num,
            comment,
            VcsHostType::Gitlab,
        )
        .await
    }

    async fn handle_gitlab_merge_event(&self, log: &Logger, body: &Bytes) -> Response {
        let event: gitlab::MergeEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                return respond(
                    log,
                    Level::Error,
                    StatusCode::BAD_REQUEST,
                    format!("Error parsing webhook: {e}"),
                )
            }
        };
        let (pull, base_repo, head_repo, user) =
            match self.event_parser.parse_gitlab_merge_event(&event) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return respond(
                        log,
                        Level::Error,
                        StatusCode::BAD_REQUEST,
                        format!("Error parsing webhook: {e:#}"),
                    )
                }
            };
        let event_type = match event.object_attributes.action.as_deref() {
            Some("open") => PullEventType::Opened,
            Some("update") => PullEventType::Updated,
            Some("merge") | Some("close") => PullEventType::Closed,
            _ => PullEventType::Other,
        };
        log.info(format!("identified event as type {event_type}"));
        self.handle_pull_request_event(log, base_repo, head_repo, pull, user, event_type)
            .await
    }

    // --------------------------------------------------------------------
    // Shared dispatch
    // --------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn handle_comment_event(
        &self,
        log: &Logger,
        base_repo: Repo,
        maybe_head_repo: Option<Repo>,
        user: User,
        pull_num: u64,
        comment: String,
        vcs_host: VcsHostType,
    ) -> Response {
        let parse_result = self.comment_parser.parse(&comment, vcs_host);
        if parse_result.ignore {
            return respond(
                log,
                Level::Debug,
                StatusCode::OK,
                format!("Ignoring non-command comment: {:?}", truncate(&comment, 40)),
            );
        }
        log.info("parsed comment as command");

        // Help output and usage errors go straight back as a comment; the
        // runner never gets involved.
        if let Some(response) = parse_result.comment_response {
            try_comment(
                self.vcs_client.as_ref(),
                log,
                &base_repo,
                pull_num,
                &response,
            )
            .await;
            return respond(
                log,
                Level::Info,
                StatusCode::OK,
                "Commenting back on pull request",
            );
        }

        if !self
            .repo_whitelist
            .is_whitelisted(&base_repo.full_name, base_repo.vcs_host.hostname())
        {
            self.comment_not_whitelisted(log, &base_repo, pull_num).await;
            return respond(
                log,
                Level::Warn,
                StatusCode::FORBIDDEN,
                format!("Repo {} is not whitelisted", base_repo.full_name),
            );
        }

        log.debug("executing command");
        let cmd = parse_result.command;
        if self.testing_mode {
            self.command_runner
                .run_comment_command(log.clone(), base_repo, maybe_head_repo, user, pull_num, cmd)
                .await;
        } else {
            // Respond now, run in the background so the webhook returns
            // promptly.
            let runner = Arc::clone(&self.command_runner);
            let task_log = log.clone();
            tokio::spawn(async move {
                runner
                    .run_comment_command(task_log, base_repo, maybe_head_repo, user, pull_num, cmd)
                    .await;
            });
        }
        respond(log, Level::Info, StatusCode::OK, "Processing...")
    }

    async fn handle_pull_request_event(
        &self,
        log: &Logger,
        base_repo: Repo,
        head_repo: Repo,
        pull: PullRequest,
        user: User,
        event_type: PullEventType,
    ) -> Response {
        if !self
            .repo_whitelist
            .is_whitelisted(&base_repo.full_name, base_repo.vcs_host.hostname())
        {
            // An opened PR from a non-whitelisted repo gets an explanatory
            // comment because its author may be waiting for an autoplan;
            // everything else is ignored quietly.
            if event_type == PullEventType::Opened {
                self.comment_not_whitelisted(log, &base_repo, pull.num).await;
            }
            return respond(
                log,
                Level::Debug,
                StatusCode::FORBIDDEN,
                format!(
                    "Ignoring pull request event from non-whitelisted repo {}",
                    base_repo.full_name
                ),
            );
        }

        match event_type {
            PullEventType::Opened | PullEventType::Updated => {
                log.info("executing autoplan");
                if self.testing_mode {
                    self.command_runner
                        .run_autoplan_command(log.clone(), base_repo, head_repo, pull, user)
                        .await;
                } else {
                    let runner = Arc::clone(&self.command_runner);
                    let task_log = log.clone();
                    tokio::spawn(async move {
                        runner
                            .run_autoplan_command(task_log, base_repo, head_repo, pull, user)
                            .await;
                    });
                }
                respond(log, Level::Info, StatusCode::OK, "Processing...")
            }
            PullEventType::Closed => {
                // Closed PRs are cleaned up synchronously; there is nothing
                // long-running here.
                if let Err(e) = self.pull_cleaner.clean_up_pull(&base_repo, &pull).await {
                    return respond(
                        log,
                        Level::Error,
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Error cleaning pull request: {e:#}"),
                    );
                }
                log.info(format!(
                    "deleted locks and workspace for repo {}, pull {}",
                    base_repo.full_name, pull.num
                ));
                respond(
                    log,
                    Level::Info,
                    StatusCode::OK,
                    "Pull request cleaned successfully",
                )
            }
            PullEventType::Other => respond(
                log,
                Level::Debug,
                StatusCode::OK,
                "Ignoring non-actionable pull request event",
            ),
        }
    }

    async fn comment_not_whitelisted(&self, log: &Logger, base_repo: &Repo, pull_num: u64) {
        try_comment(
            self.vcs_client.as_ref(),
            log,
            base_repo,
            pull_num,
            "```\nError: This repo is not whitelisted for Atlantis.\n```",
        )
        .await;
    }

    fn supports_host(&self, host: VcsHostType) -> bool {
        self.supported_hosts.contains(&host)
    }
}

fn respond(log: &Logger, level: Level, code: StatusCode, msg: impl Into<String>) -> Response {
    let msg = msg.into();
    match level {
        Level::Debug => log.debug(&msg),
        Level::Info => log.info(&msg),
        Level::Warn => log.warn(&msg),
        Level::Error => log.err(&msg),
    }
    (code, format!("{msg}\n")).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}...")
}

fn gen_request_id() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(REQ_ID_SIZE)
        .collect()
}

/// Prefix of the GitHub delivery GUID, padded with random hex when short.
fn github_request_id(delivery: Option<&str>) -> String {
    let mut id = delivery.unwrap_or("").to_string();
    if id.chars().count() < REQ_ID_SIZE {
        id.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    id.chars().take(REQ_ID_SIZE).collect()
}
