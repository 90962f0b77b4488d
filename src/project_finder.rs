//! Deciding which projects a pull request affects.
//!
//! Two strategies: without a repo config we look for terraform project
//! markers in the ancestors of each modified file; with a config we match
//! the modified files against each project's `when_modified` globs.

use std::collections::BTreeSet;
use std::path::Path;

use crate::logging::Logger;
use crate::repo_config::{clean_dir, Project, RepoConfig};

/// Directory entries that mark a terraform project root.
const PROJECT_MARKERS: &[&str] = &[".terraform", ".terraform.lock.hcl"];

/// Stateless; safe to share.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectFinder;

impl ProjectFinder {
    /// Determine modified projects without a repo config: for each modified
    /// file, the innermost ancestor directory (up to the repo root) that
    /// contains a project marker is a project. Results are de-duplicated and
    /// sorted lexicographically by path.
    pub fn determine_projects(
        &self,
        log: &Logger,
        modified_files: &[String],
        repo_full_name: &str,
        repo_dir: &Path,
    ) -> Vec<String> {
        let mut dirs = BTreeSet::new();
        for file in modified_files {
            if let Some(dir) = innermost_project_dir(repo_dir, file) {
                dirs.insert(dir);
            }
        }
        log.info(format!(
            "automatically determined that {} projects were modified in {}",
            dirs.len(),
            repo_full_name
        ));
        dirs.into_iter().collect()
    }

    /// Determine modified projects from the repo config: a project is
    /// selected iff autoplan is enabled and one of its `when_modified`
    /// globs, joined to the project dir, matches a modified file. Results
    /// keep the config's declaration order.
    pub fn determine_projects_via_config(
        &self,
        log: &Logger,
        modified_files: &[String],
        config: &RepoConfig,
    ) -> Vec<Project> {
        let mut matched = Vec::new();
        for project in &config.projects {
            let Some(autoplan) = &project.autoplan else {
                continue;
            };
            if !autoplan.enabled {
                continue;
            }
            // `*` must not cross directory separators here; `**` still does.
            let options = glob::MatchOptions {
                require_literal_separator: true,
                ..Default::default()
            };
            let selected = autoplan.when_modified.iter().any(|g| {
                let joined = join_glob(&project.dir, g);
                match glob::Pattern::new(&joined) {
                    Ok(pattern) => modified_files
                        .iter()
                        .any(|f| pattern.matches_with(f, options)),
                    Err(e) => {
                        log.warn(format!(
                            "skipping invalid when_modified glob {joined:?} for dir {:?}: {e}",
                            project.dir
                        ));
                        false
                    }
                }
            });
            if selected {
                matched.push(project.clone());
            }
        }
        log.info(format!(
            "{} projects are to be autoplanned based on their when_modified config",
            matched.len()
        ));
        matched
    }
}

/// Walk from the modified file's directory up to the repo root looking for a
/// directory with a project marker; returns it repo-relative ("." for the
/// root) or None if no ancestor is a project.
fn innermost_project_dir(repo_dir: &Path, modified_file: &str) -> Option<String> {
    let mut rel = Path::new(modified_file)
        .parent()
        .unwrap_or_else(|| Path::new(""));
    loop {
        let abs = repo_dir.join(rel);
        if PROJECT_MARKERS.iter().any(|m| abs.join(m).exists()) {
            return Some(clean_dir(&rel.to_string_lossy()));
        }
        match rel.parent() {
            Some(parent) => rel = parent,
            None => return None,
        }
    }
}

/// Join a when_modified glob onto its project dir.
fn join_glob(dir: &str, pattern: &str) -> String {
    let dir = clean_dir(dir);
    if dir == "." {
        pattern.to_string()
    } else {
        format!("{dir}/{pattern}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_config::parse_config;

    fn logger() -> Logger {
        Logger::new("test")
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_determine_projects_finds_marked_ancestors() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("staging/.terraform")).unwrap();
        std::fs::create_dir_all(repo.path().join("production")).unwrap();
        std::fs::write(repo.path().join("production/.terraform.lock.hcl"), "").unwrap();
        std::fs::create_dir_all(repo.path().join("docs")).unwrap();

        let finder = ProjectFinder;
        let modified = strings(&[
            "staging/main.tf",
            "staging/modules/vpc/vpc.tf",
            "production/main.tf",
            "docs/readme.md",
        ]);
        let projects =
            finder.determine_projects(&logger(), &modified, "owner/repo", repo.path());
        // De-duplicated, lexicographic, unmarked dirs skipped.
        assert_eq!(projects, vec!["production", "staging"]);
    }

    #[test]
    fn test_determine_projects_innermost_wins() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join(".terraform")).unwrap();
        std::fs::create_dir_all(repo.path().join("nested/.terraform")).unwrap();

        let finder = ProjectFinder;
        let projects = finder.determine_projects(
            &logger(),
            &strings(&["nested/main.tf", "top.tf"]),
            "owner/repo",
            repo.path(),
        );
        assert_eq!(projects, vec![".", "nested"]);
    }

    #[test]
    fn test_determine_projects_via_config_matches_globs() {
        let config = parse_config(
            r#"
version: 2
projects:
- dir: staging
  autoplan:
    when_modified: ["*.tf"]
- dir: production
  autoplan:
    when_modified: ["*.tf", "modules/**/*.tf"]
- dir: never
"#,
        )
        .unwrap();

        let finder = ProjectFinder;
        let projects = finder.determine_projects_via_config(
            &logger(),
            &strings(&["production/modules/vpc/main.tf", "never/main.tf"]),
            &config,
        );
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].dir, "production");
    }

    #[test]
    fn test_determine_projects_via_config_respects_enabled() {
        let config = parse_config(
            r#"
version: 2
projects:
- dir: a
  autoplan:
    enabled: false
    when_modified: ["*.tf"]
"#,
        )
        .unwrap();
        let finder = ProjectFinder;
        let projects =
            finder.determine_projects_via_config(&logger(), &strings(&["a/main.tf"]), &config);
        assert!(projects.is_empty());
    }

    #[test]
    fn test_root_project_globs_are_not_prefixed() {
        let config = parse_config(
            r#"
version: 2
projects:
- dir: .
  autoplan:
    when_modified: ["*.tf"]
"#,
        )
        .unwrap();
        let finder = ProjectFinder;
        let projects =
            finder.determine_projects_via_config(&logger(), &strings(&["main.tf"]), &config);
        assert_eq!(projects.len(), 1);
    }
}
