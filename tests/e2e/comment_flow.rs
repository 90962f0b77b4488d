//! Comment-driven plan and apply flows.

use atlantis::models::CommitStatus;
use axum::http::StatusCode;

use crate::fakes::{harness, Harness};

#[tokio::test]
async fn test_plan_comment_full_flow() {
    let h = harness(&[("main.tf", "resource \"null_resource\" \"x\" {}\n")]);

    let (status, response) = h
        .send_github("issue_comment", Harness::comment_body("atlantis plan"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.contains("Processing..."));

    // The head commit was cloned into the default workspace.
    let workspace = h.workspace_dir("default");
    assert!(workspace.join("main.tf").exists());

    // Terraform ran a plan in the workspace root.
    let calls = h.terraform.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (path, args, tf_workspace) = &calls[0];
    assert_eq!(path, &workspace.join("."));
    assert_eq!(args[..3], ["plan", "-input=false", "-no-color"].map(String::from));
    assert_eq!(tf_workspace, "default");

    // Pending first, then the rolled-up success, both on atlantis/plan.
    assert_eq!(
        h.statuses(),
        vec![
            (CommitStatus::Pending, "atlantis/plan".to_string()),
            (CommitStatus::Success, "atlantis/plan".to_string()),
        ]
    );

    // One aggregated comment carrying the plan output.
    let comments = h.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("Plan: 1 to add"));
}

#[tokio::test]
async fn test_apply_without_plan_reports_missing_workspace() {
    let h = harness(&[("main.tf", "")]);

    let (status, _) = h
        .send_github("issue_comment", Harness::comment_body("atlantis apply"))
        .await;
    assert_eq!(status, StatusCode::OK);

    // No clone exists, so the build fails and the error is commented.
    assert!(h.terraform.calls.lock().unwrap().is_empty());
    let comments = h.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("Apply Error"));
    assert_eq!(
        h.statuses(),
        vec![
            (CommitStatus::Pending, "atlantis/apply".to_string()),
            (CommitStatus::Failed, "atlantis/apply".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_plan_then_apply_reuses_workspace() {
    let h = harness(&[("main.tf", "")]);

    h.send_github("issue_comment", Harness::comment_body("atlantis plan"))
        .await;

    // A plan artifact dropped into the workspace must survive the apply:
    // apply never re-clones.
    let workspace = h.workspace_dir("default");
    std::fs::write(workspace.join("plan.tfplan"), "artifact").unwrap();

    let (status, _) = h
        .send_github("issue_comment", Harness::comment_body("atlantis apply"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(workspace.join("plan.tfplan").exists());

    let calls = h.terraform.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1[0], "apply");
}

#[tokio::test]
async fn test_plan_with_repo_config_project_name() {
    let h = harness(&[
        (
            "atlantis.yaml",
            "version: 2\nprojects:\n- dir: network\n  name: network\n  workspace: prod\n",
        ),
        ("network/main.tf", ""),
    ]);

    let (status, _) = h
        .send_github(
            "issue_comment",
            Harness::comment_body("atlantis plan -p network"),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let calls = h.terraform.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    // Dir and workspace come from the named project config.
    assert_eq!(calls[0].0, h.workspace_dir("prod").join("network"));
    assert_eq!(calls[0].2, "prod");
}

#[tokio::test]
async fn test_locked_workspace_is_reported_to_the_user() {
    let h = harness(&[("main.tf", "")]);

    // Hold the default workspace lock as if another command were mid-run.
    use atlantis::locking::WorkingDirLocker;
    let _held = h.locker.try_lock("owner/repo", "default", 1).unwrap();

    let (status, _) = h
        .send_github("issue_comment", Harness::comment_body("atlantis plan"))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Nothing ran; the conflict came back as a comment telling the user to
    // retry.
    assert!(h.terraform.calls.lock().unwrap().is_empty());
    let comments = h.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("currently locked"));
    assert!(comments[0].contains("try again"));
}
