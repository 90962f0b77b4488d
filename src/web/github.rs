//! GitHub webhook payload types and request validation.
//!
//! Only the fields the pipeline reads are modeled; the payloads carry far
//! more.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

pub const GITHUB_HEADER: &str = "X-Github-Event";
pub const DELIVERY_HEADER: &str = "X-Github-Delivery";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

#[derive(Debug, Deserialize)]
pub struct IssueCommentEvent {
    pub action: Option<String>,
    pub issue: Issue,
    pub comment: IssueComment,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct Issue {
    pub number: u64,
}

#[derive(Debug, Deserialize)]
pub struct IssueComment {
    pub body: Option<String>,
    pub user: UserPayload,
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub clone_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: Option<String>,
    pub pull_request: PullRequestPayload,
    pub repository: Repository,
    pub sender: UserPayload,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    pub state: Option<String>,
    pub user: UserPayload,
    pub head: Head,
}

#[derive(Debug, Deserialize)]
pub struct Head {
    pub sha: String,
    #[serde(rename = "ref")]
    pub branch: String,
    pub repo: Repository,
}

/// Validate the `X-Hub-Signature` header: `sha1=<hex>` of an HMAC-SHA1 over
/// the raw body, keyed with the webhook secret. Comparison is constant-time
/// via the hmac verify API.
pub fn validate_signature(secret: &[u8], signature_header: Option<&str>, body: &[u8]) -> bool {
    let Some(signature) = signature_header else {
        return false;
    };
    let Some(hex_digest) = signature.strip_prefix("sha1=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Produce a valid signature header value; test helper for webhook senders.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}
