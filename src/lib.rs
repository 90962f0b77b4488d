//! Terraform pull request automation.
//!
//! Atlantis listens for webhooks from a VCS host (GitHub or GitLab), clones
//! the pull request's head commit into a per-PR workspace, figures out which
//! Terraform projects the PR touches and runs `plan`/`apply` in them,
//! reporting results back as PR comments and commit statuses.
//!
//! The flow, roughly:
//!
//! ```text
//! webhook POST -> web::events (validate, classify, extract)
//!              -> runner (authorize, fetch PR)
//!              -> command_builder (lock, clone, read config, find projects)
//!              -> terraform exec per project
//!              -> status + markdown comment back to the host
//! ```

pub mod cleaner;
pub mod command_builder;
pub mod comment_parser;
pub mod config;
pub mod locking;
pub mod logging;
pub mod markdown;
pub mod models;
pub mod project_finder;
pub mod repo_config;
pub mod runner;
pub mod status;
pub mod terraform;
pub mod vcs;
pub mod web;
pub mod whitelist;
pub mod working_dir;
