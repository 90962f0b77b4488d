//! Rendering command results into PR comment markdown.

use crate::logging::Logger;
use crate::models::{CommandName, CommandResult, ProjectResult};

#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    /// Render the aggregated comment for one command. With `verbose` the
    /// request's log history is appended in a collapsed section.
    pub fn render(
        &self,
        result: &CommandResult,
        cmd: CommandName,
        verbose: bool,
        log: &Logger,
    ) -> String {
        let mut out = self.render_result(result, cmd);
        if verbose {
            out.push_str(&format!(
                "\n<details><summary>Log</summary>\n\n```\n{}```\n</details>\n",
                log.history()
            ));
        }
        out
    }

    fn render_result(&self, result: &CommandResult, cmd: CommandName) -> String {
        if let Some(error) = &result.error {
            return format!("**{} Error**\n```\n{}\n```\n", cmd.title(), error);
        }
        if let Some(failure) = &result.failure {
            return format!("**{} Failed**: {}\n", cmd.title(), failure);
        }

        match result.project_results.as_slice() {
            [] => format!("**{}**: no projects to run\n", cmd.title()),
            [single] => self.render_project(single, cmd),
            many => {
                let mut out = String::new();
                for (i, project) in many.iter().enumerate() {
                    out.push_str(&format!(
                        "### {}. dir: `{}` workspace: `{}`\n",
                        i + 1,
                        project.repo_rel_dir,
                        project.workspace
                    ));
                    out.push_str(&self.render_project(project, cmd));
                    out.push_str("\n---\n");
                }
                out
            }
        }
    }

    fn render_project(&self, project: &ProjectResult, cmd: CommandName) -> String {
        if let Some(error) = &project.error {
            return format!("**{} Error**\n```\n{}\n```\n", cmd.title(), error);
        }
        if let Some(failure) = &project.failure {
            return format!("**{} Failed**: {}\n", cmd.title(), failure);
        }
        let output = project.success.as_deref().unwrap_or("");
        match cmd {
            CommandName::Plan => format!(
                "```diff\n{}\n```\n\n* To apply this plan, comment `atlantis apply`\n",
                output.trim_end()
            ),
            CommandName::Apply => format!("```\n{}\n```\n", output.trim_end()),
        }
    }
}
