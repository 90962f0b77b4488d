//! Parsing PR comments into commands.
//!
//! A comment is only interesting when its first word is the trigger word
//! (`atlantis`). Everything else is ignored so ordinary PR discussion never
//! produces a response. Recognized forms:
//!
//! ```text
//! atlantis help
//! atlantis plan  [-d dir] [-w workspace] [-p project] [--verbose] [-- <extra flags>]
//! atlantis apply [-d dir] [-w workspace] [-p project] [--verbose] [-- <extra flags>]
//! ```

use crate::models::{CommandName, CommentCommand, VcsHostType, DEFAULT_WORKSPACE};

const TRIGGER_WORD: &str = "atlantis";

const HELP_COMMENT: &str = "```cmake
atlantis
Terraform automation for your pull request

Usage: atlantis <command> [options]

Commands:
  plan   Runs 'terraform plan' for the changes in this pull request
  apply  Runs 'terraform apply' for the plans generated in this pull request
  help   Shows this usage

Options:
  -d, --dir        Which directory to run the command in, relative to the repo root
  -w, --workspace  Which terraform workspace to run the command in
  -p, --project    Which project from atlantis.yaml to run the command on
  --verbose        Append the full command output to the comment
  --               Everything after is appended to the terraform command
```";

/// What the parser made of a comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentParseResult {
    /// Set when the comment is a runnable command.
    pub command: Option<CommentCommand>,
    /// Set when the comment deserves a direct reply (help, usage errors)
    /// instead of running anything.
    pub comment_response: Option<String>,
    /// True when the comment isn't addressed to us at all.
    pub ignore: bool,
}

impl CommentParseResult {
    fn ignore() -> Self {
        Self {
            ignore: true,
            ..Default::default()
        }
    }

    fn response(msg: impl Into<String>) -> Self {
        Self {
            comment_response: Some(msg.into()),
            ..Default::default()
        }
    }

    fn usage_error(msg: impl Into<String>) -> Self {
        Self::response(format!("```\nError: {}\n```", msg.into()))
    }
}

pub trait CommentParsing: Send + Sync {
    fn parse(&self, comment: &str, vcs_host: VcsHostType) -> CommentParseResult;
}

#[derive(Debug, Default)]
pub struct DefaultCommentParser;

impl CommentParsing for DefaultCommentParser {
    fn parse(&self, comment: &str, _vcs_host: VcsHostType) -> CommentParseResult {
        // Commands live on the first non-empty line; trailing prose is fine.
        let Some(line) = comment.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return CommentParseResult::ignore();
        };
        let mut words = line.split_whitespace();
        if words.next() != Some(TRIGGER_WORD) {
            return CommentParseResult::ignore();
        }

        let name = match words.next() {
            Some("plan") => CommandName::Plan,
            Some("apply") => CommandName::Apply,
            Some("help") | None => return CommentParseResult::response(HELP_COMMENT),
            Some(other) => {
                return CommentParseResult::usage_error(format!(
                    "unknown command {other:?}: run 'atlantis help' for usage"
                ))
            }
        };

        let mut dir: Option<String> = None;
        let mut workspace: Option<String> = None;
        let mut project: Option<String> = None;
        let mut verbose = false;
        let mut flags: Vec<String> = Vec::new();

        while let Some(word) = words.next() {
            match word {
                "-d" | "--dir" => match words.next() {
                    Some(value) => dir = Some(value.to_string()),
                    None => return CommentParseResult::usage_error("-d requires a directory"),
                },
                "-w" | "--workspace" => match words.next() {
                    Some(value) => workspace = Some(value.to_string()),
                    None => return CommentParseResult::usage_error("-w requires a workspace"),
                },
                "-p" | "--project" => match words.next() {
                    Some(value) => project = Some(value.to_string()),
                    None => return CommentParseResult::usage_error("-p requires a project name"),
                },
                "--verbose" => verbose = true,
                "--" => {
                    flags.extend(words.by_ref().map(str::to_string));
                }
                other => {
                    return CommentParseResult::usage_error(format!(
                        "unknown argument {other:?}: run 'atlantis help' for usage"
                    ))
                }
            }
        }

        if project.is_some() && (dir.is_some() || workspace.is_some()) {
            return CommentParseResult::usage_error(
                "cannot use -p/--project at the same time as -d/--dir or -w/--workspace",
            );
        }
        if let Some(d) = &dir {
            if d.split('/').any(|part| part == "..") {
                return CommentParseResult::usage_error("dir must not traverse above the repo root");
            }
        }

        CommentParseResult {
            command: Some(CommentCommand {
                repo_rel_dir: dir.unwrap_or_else(|| ".".to_string()),
                workspace: workspace.unwrap_or_else(|| DEFAULT_WORKSPACE.to_string()),
                project_name: project,
                name,
                flags,
                verbose,
            }),
            ..Default::default()
        }
    }
}
