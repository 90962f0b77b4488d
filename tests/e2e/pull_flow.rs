//! PR lifecycle flows: autoplan on open/update, cleanup on close.

use atlantis::models::CommitStatus;
use axum::http::StatusCode;

use crate::fakes::{harness, Harness};

#[tokio::test]
async fn test_opened_pull_autoplans_marked_projects() {
    let h = harness(&[
        ("staging/main.tf", ""),
        ("staging/.terraform.lock.hcl", ""),
        ("docs/readme.md", ""),
    ]);
    h.vcs
        .modified_files
        .lock()
        .unwrap()
        .extend(["staging/main.tf".to_string(), "docs/readme.md".to_string()]);

    let (status, response) = h.send_github("pull_request", h.pull_body("opened")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.contains("Processing..."));

    // Only the marked staging project planned; docs was skipped.
    let calls = h.terraform.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, h.workspace_dir("default").join("staging"));
    assert_eq!(calls[0].1[0], "plan");

    assert_eq!(
        h.statuses(),
        vec![
            (CommitStatus::Pending, "atlantis/plan".to_string()),
            (CommitStatus::Success, "atlantis/plan".to_string()),
        ]
    );
    assert_eq!(h.comments().len(), 1);
}

#[tokio::test]
async fn test_opened_pull_with_no_projects_stays_silent() {
    let h = harness(&[("docs/readme.md", "")]);
    h.vcs
        .modified_files
        .lock()
        .unwrap()
        .push("docs/readme.md".to_string());

    let (status, _) = h.send_github("pull_request", h.pull_body("opened")).await;
    assert_eq!(status, StatusCode::OK);

    // No comment, no status: PRs that don't touch terraform stay quiet.
    assert!(h.comments().is_empty());
    assert!(h.statuses().is_empty());
    assert!(h.terraform.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_closed_pull_deletes_workspaces() {
    let h = harness(&[("main.tf", "")]);

    // Plan first so a workspace exists on disk.
    h.send_github("issue_comment", Harness::comment_body("atlantis plan"))
        .await;
    assert!(h.workspace_dir("default").exists());

    let (status, response) = h.send_github("pull_request", h.pull_body("closed")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.contains("Pull request cleaned successfully"));
    assert!(!h.workspace_dir("default").exists());

    // Closing again is fine: cleanup is idempotent.
    let (status, _) = h.send_github("pull_request", h.pull_body("closed")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_updated_pull_recloned_at_new_head() {
    let h = harness(&[("main.tf", "# v1\n"), (".terraform.lock.hcl", "")]);
    h.vcs
        .modified_files
        .lock()
        .unwrap()
        .push("main.tf".to_string());

    let (status, _) = h.send_github("pull_request", h.pull_body("opened")).await;
    assert_eq!(status, StatusCode::OK);
    let workspace = h.workspace_dir("default");
    assert_eq!(
        std::fs::read_to_string(workspace.join("main.tf")).unwrap(),
        "# v1\n"
    );

    // Push a new commit to the source branch; the PR head moves with it.
    std::fs::write(h.source.join("main.tf"), "# v2\n").unwrap();
    crate::fakes::git(&h.source, &["add", "."]);
    crate::fakes::git(&h.source, &["commit", "-m", "update"]);
    let new_sha = crate::fakes::git(&h.source, &["rev-parse", "HEAD"]);

    let (status, _) = h
        .send_github(
            "pull_request",
            h.pull_body_with_sha("synchronize", &new_sha),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        std::fs::read_to_string(workspace.join("main.tf")).unwrap(),
        "# v2\n"
    );
}
