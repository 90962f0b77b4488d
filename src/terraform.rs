//! Seam to the terraform binary.
//!
//! The core only needs "run these args in this dir for this workspace";
//! binary download and version management live outside it. A version
//! constraint from the repo config selects a suffixed binary
//! (`terraform0.11.0`) that the operator has installed.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::logging::Logger;

#[async_trait]
pub trait TerraformExec: Send + Sync {
    /// Run terraform with `args` inside `path`. Returns stdout; failures
    /// carry the combined output.
    async fn run_command_with_version(
        &self,
        log: &Logger,
        path: &Path,
        args: &[String],
        version: Option<&str>,
        workspace: &str,
    ) -> Result<String>;
}

#[derive(Debug, Default)]
pub struct TerraformClient;

#[async_trait]
impl TerraformExec for TerraformClient {
    async fn run_command_with_version(
        &self,
        log: &Logger,
        path: &Path,
        args: &[String],
        version: Option<&str>,
        workspace: &str,
    ) -> Result<String> {
        let binary = match version {
            Some(v) => format!("terraform{v}"),
            None => "terraform".to_string(),
        };
        log.info(format!(
            "running {} {} in {:?} (workspace {})",
            binary,
            args.join(" "),
            path,
            workspace
        ));
        let output = Command::new(&binary)
            .args(args)
            .current_dir(path)
            .env("TF_WORKSPACE", workspace)
            .env("TF_IN_AUTOMATION", "true")
            .output()
            .await
            .with_context(|| format!("running {binary}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} {} failed ({}): {}{}",
                binary,
                args.join(" "),
                output.status,
                stdout,
                stderr
            );
        }
        Ok(stdout)
    }
}
