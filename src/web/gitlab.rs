//! GitLab webhook payload types.

use serde::Deserialize;

pub const GITLAB_HEADER: &str = "X-Gitlab-Event";
pub const TOKEN_HEADER: &str = "X-Gitlab-Token";

/// `X-Gitlab-Event` values we act on.
pub const NOTE_HOOK: &str = "Note Hook";
pub const MERGE_REQUEST_HOOK: &str = "Merge Request Hook";

#[derive(Debug, Deserialize)]
pub struct GlUser {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct Project {
    pub path_with_namespace: String,
    pub git_http_url: String,
}

/// A comment ("note") on a merge request.
#[derive(Debug, Deserialize)]
pub struct MergeCommentEvent {
    pub user: GlUser,
    pub project: Project,
    pub object_attributes: NoteAttributes,
    pub merge_request: MergeRequestNested,
}

#[derive(Debug, Deserialize)]
pub struct NoteAttributes {
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequestNested {
    pub iid: u64,
    /// The head project the MR comes from.
    pub source: Project,
}

/// A merge request lifecycle event.
#[derive(Debug, Deserialize)]
pub struct MergeEvent {
    pub user: GlUser,
    pub project: Project,
    pub object_attributes: MergeAttributes,
}

#[derive(Debug, Deserialize)]
pub struct MergeAttributes {
    pub iid: u64,
    pub action: Option<String>,
    pub state: Option<String>,
    pub source_branch: String,
    pub last_commit: GlCommit,
    pub source: Project,
}

#[derive(Debug, Deserialize)]
pub struct GlCommit {
    pub id: String,
}
