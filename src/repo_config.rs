//! Parsing and validation of the repo-local `atlantis.yaml` file.
//!
//! Repos may ship an `atlantis.yaml` at their root declaring which projects
//! Atlantis should operate on and how. Presence of the file is only honored
//! when the operator runs with `--allow-repo-config`; that gate lives in the
//! command builder, this module just parses and answers queries.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The well-known config filename looked up at the repo root.
pub const ATLANTIS_YAML_FILENAME: &str = "atlantis.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {ATLANTIS_YAML_FILENAME}: {0}")]
    Io(#[from] io::Error),
    /// Malformed YAML, unknown keys and missing required fields all surface
    /// here; serde_yaml messages carry line/column positions.
    #[error("parsing {ATLANTIS_YAML_FILENAME}: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("project {index} has an invalid dir {dir:?}: must be a non-empty relative path without '..'")]
    InvalidProjectDir { index: usize, dir: String },
    #[error("project name {name:?} is defined more than once")]
    DuplicateProjectName { name: String },
    #[error("multiple unnamed projects defined for dir {dir:?} workspace {workspace:?}: give them names to disambiguate")]
    DuplicateDirWorkspace { dir: String, workspace: String },
    #[error("project at dir {dir:?} references undefined workflow {workflow:?}")]
    UnknownWorkflow { dir: String, workflow: String },
}

/// A parsed and validated `atlantis.yaml` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub workflows: BTreeMap<String, Workflow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Project {
    /// Repo-relative directory the project lives in. Required.
    pub dir: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Optional name, unique within the document. Lets comments target this
    /// project with `-p` and disambiguates repeated (dir, workspace) pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Reference into the top-level `workflows` map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    /// Opaque version constraint handed to the terraform exec seam.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoplan: Option<Autoplan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Autoplan {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Globs relative to the project dir; a modified file matching any of
    /// them selects the project for autoplan. No list means the project is
    /// never auto-selected.
    #[serde(default)]
    pub when_modified: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    pub steps: Vec<Step>,
}

/// A workflow step: either a builtin step name (`init`, `plan`, `apply`) or
/// a custom shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Builtin(String),
    Run { run: String },
}

fn default_version() -> i64 {
    2
}

fn default_workspace() -> String {
    crate::models::DEFAULT_WORKSPACE.to_string()
}

fn default_true() -> bool {
    true
}

/// Whether `dir` contains an `atlantis.yaml` at its root. Distinguishes
/// not-present (`Ok(false)`) from an I/O failure.
pub fn has_config_file(dir: &Path) -> io::Result<bool> {
    match std::fs::metadata(dir.join(ATLANTIS_YAML_FILENAME)) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read, parse and validate the `atlantis.yaml` at the root of `dir`.
pub fn read_config(dir: &Path) -> Result<RepoConfig, ConfigError> {
    let contents = std::fs::read_to_string(dir.join(ATLANTIS_YAML_FILENAME))?;
    parse_config(&contents)
}

/// Parse and validate a config document from a string.
pub fn parse_config(contents: &str) -> Result<RepoConfig, ConfigError> {
    let config: RepoConfig = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

impl RepoConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (index, project) in self.projects.iter().enumerate() {
            let dir = project.dir.as_str();
            if dir.is_empty()
                || Path::new(dir).is_absolute()
                || Path::new(dir).components().any(|c| c.as_os_str() == "..")
            {
                return Err(ConfigError::InvalidProjectDir {
                    index,
                    dir: dir.to_string(),
                });
            }
            if let Some(workflow) = &project.workflow {
                if !self.workflows.contains_key(workflow) {
                    return Err(ConfigError::UnknownWorkflow {
                        dir: dir.to_string(),
                        workflow: workflow.clone(),
                    });
                }
            }
        }

        let mut names: Vec<&str> = Vec::new();
        for project in &self.projects {
            if let Some(name) = &project.name {
                if names.contains(&name.as_str()) {
                    return Err(ConfigError::DuplicateProjectName { name: name.clone() });
                }
                names.push(name);
            }
        }

        // (dir, workspace) pairs may repeat only if every project in the
        // group carries a name.
        let mut by_dir_workspace: HashMap<(String, String), Vec<&Project>> = HashMap::new();
        for project in &self.projects {
            by_dir_workspace
                .entry((clean_dir(&project.dir), project.workspace.clone()))
                .or_default()
                .push(project);
        }
        for ((dir, workspace), group) in by_dir_workspace {
            if group.len() > 1 && group.iter().any(|p| p.name.is_none()) {
                return Err(ConfigError::DuplicateDirWorkspace { dir, workspace });
            }
        }
        Ok(())
    }

    pub fn find_project_by_name(&self, name: &str) -> Option<&Project> {
        self.projects
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
    }

    pub fn find_projects_by_dir_workspace(&self, dir: &str, workspace: &str) -> Vec<&Project> {
        let dir = clean_dir(dir);
        self.projects
            .iter()
            .filter(|p| clean_dir(&p.dir) == dir && p.workspace == workspace)
            .collect()
    }
}

/// Normalize a repo-relative dir for comparison: "./x/" and "x" are the same
/// project dir, the repo root is ".".
pub fn clean_dir(dir: &str) -> String {
    let trimmed = dir.trim_start_matches("./").trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_DOC: &str = r#"
version: 2
projects:
- dir: staging/network
  workspace: staging
  name: staging-network
  workflow: custom
  terraform_version: 0.11.0
  autoplan:
    enabled: true
    when_modified: ["**/*.tf"]
- dir: production/network
workflows:
  custom:
    plan:
      steps:
      - init
      - run: terraform plan -out plan.tfplan
    apply:
      steps:
      - apply
"#;

    #[test]
    fn test_parse_full_document() {
        let config = parse_config(FULL_DOC).unwrap();
        assert_eq!(config.version, 2);
        assert_eq!(config.projects.len(), 2);

        let staging = &config.projects[0];
        assert_eq!(staging.workspace, "staging");
        assert_eq!(staging.name.as_deref(), Some("staging-network"));
        assert_eq!(
            staging.autoplan.as_ref().unwrap().when_modified,
            vec!["**/*.tf"]
        );

        // Defaults applied to the second, minimal project.
        let production = &config.projects[1];
        assert_eq!(production.workspace, "default");
        assert_eq!(production.name, None);
        assert_eq!(production.autoplan, None);

        let custom = &config.workflows["custom"];
        let plan_steps = &custom.plan.as_ref().unwrap().steps;
        assert_eq!(plan_steps[0], Step::Builtin("init".to_string()));
        assert_eq!(
            plan_steps[1],
            Step::Run {
                run: "terraform plan -out plan.tfplan".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_key_rejected_with_location() {
        let err = parse_config("version: 2\nprojects:\n- dir: .\n  dirs: nope\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown field"), "got: {msg}");
        assert!(msg.contains("line"), "got: {msg}");
    }

    #[test]
    fn test_missing_dir_rejected() {
        let err = parse_config("version: 2\nprojects:\n- workspace: default\n").unwrap_err();
        assert!(err.to_string().contains("dir"), "got: {err}");
    }

    #[test]
    fn test_invalid_dirs_rejected() {
        for dir in ["\"\"", "/abs/path", "../outside"] {
            let doc = format!("version: 2\nprojects:\n- dir: {dir}\n");
            let err = parse_config(&doc).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidProjectDir { .. }),
                "dir {dir} got: {err}"
            );
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let doc = "version: 2\nprojects:\n- dir: a\n  name: dup\n- dir: b\n  name: dup\n";
        let err = parse_config(doc).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProjectName { .. }));
    }

    #[test]
    fn test_repeated_dir_workspace_needs_names() {
        let unnamed = "version: 2\nprojects:\n- dir: a\n- dir: a\n";
        let err = parse_config(unnamed).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDirWorkspace { .. }));

        // Named twins are fine.
        let named = "version: 2\nprojects:\n- dir: a\n  name: one\n- dir: a\n  name: two\n";
        assert!(parse_config(named).is_ok());
    }

    #[test]
    fn test_dangling_workflow_rejected() {
        let doc = "version: 2\nprojects:\n- dir: a\n  workflow: missing\n";
        let err = parse_config(doc).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownWorkflow { .. }));
    }

    #[test]
    fn test_find_project_by_name() {
        let config = parse_config(FULL_DOC).unwrap();
        assert!(config.find_project_by_name("staging-network").is_some());
        assert!(config.find_project_by_name("nope").is_none());
    }

    #[test]
    fn test_find_projects_by_dir_workspace_normalizes() {
        let config = parse_config(FULL_DOC).unwrap();
        assert_eq!(
            config
                .find_projects_by_dir_workspace("./staging/network/", "staging")
                .len(),
            1
        );
        assert!(config
            .find_projects_by_dir_workspace("staging/network", "default")
            .is_empty());
    }

    #[test]
    fn test_round_trip() {
        let config = parse_config(FULL_DOC).unwrap();
        let serialized = serde_yaml::to_string(&config).unwrap();
        let reparsed = parse_config(&serialized).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_has_config_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_config_file(dir.path()).unwrap());
        std::fs::write(dir.path().join(ATLANTIS_YAML_FILENAME), "version: 2\n").unwrap();
        assert!(has_config_file(dir.path()).unwrap());
    }
}
