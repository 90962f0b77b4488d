//! Repo whitelist matching.
//!
//! Operators configure a comma-separated list of globs over
//! `hostname/owner/name` (e.g. `github.com/myorg/*`). Only whitelisted
//! repos ever get commands run against them.

use glob::Pattern;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhitelistError {
    #[error("invalid whitelist rule {rule:?}: {source}")]
    InvalidRule {
        rule: String,
        source: glob::PatternError,
    },
}

pub struct RepoWhitelistChecker {
    rules: Vec<Pattern>,
}

impl RepoWhitelistChecker {
    /// Build from a comma-separated rule list. Empty input whitelists
    /// nothing.
    pub fn new(whitelist: &str) -> Result<Self, WhitelistError> {
        let mut rules = Vec::new();
        for rule in whitelist.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            let pattern = Pattern::new(rule).map_err(|source| WhitelistError::InvalidRule {
                rule: rule.to_string(),
                source,
            })?;
            rules.push(pattern);
        }
        Ok(Self { rules })
    }

    pub fn is_whitelisted(&self, repo_full_name: &str, vcs_hostname: &str) -> bool {
        let candidate = format!("{vcs_hostname}/{repo_full_name}");
        // Default glob options let `*` cross separators, so a bare "*"
        // whitelists everything.
        self.rules.iter().any(|r| r.matches(&candidate))
    }
}
