//! HTTP surface: the webhook endpoint and its middleware.

pub mod events;
pub mod github;
pub mod gitlab;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Json, Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::models::{PullRequest, PullRequestState, Repo, User, VcsHostType};
use crate::vcs::embed_credentials;
use events::EventsController;

/// Build the router. Panics in handler frames become 500s via the
/// catch-panic layer; the runner has its own, finer-grained recovery.
pub fn router(controller: Arc<EventsController>) -> Router {
    Router::new()
        .route("/events", post(events::post_events))
        .route("/healthz", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(controller)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Converts webhook payloads into domain models, embedding clone
/// credentials so working dirs can fetch private repos.
#[derive(Debug, Clone, Default)]
pub struct EventParser {
    pub github_user: String,
    pub github_token: String,
    pub gitlab_token: String,
}

impl EventParser {
    pub fn parse_github_repo(&self, repo: &github::Repository) -> Result<Repo> {
        let url = embed_credentials(&repo.clone_url, &self.github_user, &self.github_token);
        Ok(Repo::new(
            VcsHostType::Github,
            repo.full_name.clone(),
            url,
        )?)
    }

    /// (base repo, commenter, PR number, comment body). GitHub comment
    /// events don't carry head repo data; the runner fetches it.
    pub fn parse_github_issue_comment_event(
        &self,
        event: &github::IssueCommentEvent,
    ) -> Result<(Repo, User, u64, String)> {
        let base_repo = self.parse_github_repo(&event.repository)?;
        let user = User {
            username: event.comment.user.login.clone(),
        };
        let body = event.comment.body.clone().unwrap_or_default();
        Ok((base_repo, user, event.issue.number, body))
    }

    /// (pull, base repo, head repo, sender).
    pub fn parse_github_pull_event(
        &self,
        event: &github::PullRequestEvent,
    ) -> Result<(PullRequest, Repo, Repo, User)> {
        let base_repo = self.parse_github_repo(&event.repository)?;
        let head_repo = self.parse_github_repo(&event.pull_request.head.repo)?;
        let state = match event.pull_request.state.as_deref() {
            Some("closed") => PullRequestState::Closed,
            _ => PullRequestState::Open,
        };
        let pull = PullRequest {
            num: event.pull_request.number,
            head_commit: event.pull_request.head.sha.clone(),
            branch: event.pull_request.head.branch.clone(),
            author: event.pull_request.user.login.clone(),
            state,
        };
        let user = User {
            username: event.sender.login.clone(),
        };
        Ok((pull, base_repo, head_repo, user))
    }

    pub fn parse_gitlab_repo(&self, project: &gitlab::Project) -> Result<Repo> {
        let url = embed_credentials(&project.git_http_url, "oauth2", &self.gitlab_token);
        Ok(Repo::new(
            VcsHostType::Gitlab,
            project.path_with_namespace.clone(),
            url,
        )?)
    }

    /// (base repo, head repo, commenter, MR number, comment body).
    pub fn parse_gitlab_merge_comment_event(
        &self,
        event: &gitlab::MergeCommentEvent,
    ) -> Result<(Repo, Repo, User, u64, String)> {
        let base_repo = self.parse_gitlab_repo(&event.project)?;
        let head_repo = self.parse_gitlab_repo(&event.merge_request.source)?;
        let user = User {
            username: event.user.username.clone(),
        };
        let body = event.object_attributes.note.clone().unwrap_or_default();
        Ok((base_repo, head_repo, user, event.merge_request.iid, body))
    }

    /// (pull, base repo, head repo, event actor).
    pub fn parse_gitlab_merge_event(
        &self,
        event: &gitlab::MergeEvent,
    ) -> Result<(PullRequest, Repo, Repo, User)> {
        let attrs = &event.object_attributes;
        let base_repo = self.parse_gitlab_repo(&event.project)?;
        let head_repo = self.parse_gitlab_repo(&attrs.source)?;
        let state = match attrs.state.as_deref() {
            Some("opened") => PullRequestState::Open,
            _ => PullRequestState::Closed,
        };
        let pull = PullRequest {
            num: attrs.iid,
            head_commit: attrs.last_commit.id.clone(),
            branch: attrs.source_branch.clone(),
            author: event.user.username.clone(),
            state,
        };
        let user = User {
            username: event.user.username.clone(),
        };
        Ok((pull, base_repo, head_repo, user))
    }
}
