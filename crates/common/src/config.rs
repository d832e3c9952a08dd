//! State directory resolution
//!
//! The account pool persists its credential file under a single state
//! directory shared by every binary that embeds this workspace. Resolution
//! order: an explicit environment override, else the platform's standard
//! application-data location via `directories`.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::{Error, Result};

/// Environment variable that overrides the resolved state directory.
pub const STATE_DIR_ENV: &str = "TAILNET_STATE_DIR";

/// Resolve the directory used to persist account pool state.
///
/// Honors `TAILNET_STATE_DIR` if set (used by tests and containerized
/// deployments that don't have a conventional home directory). Otherwise
/// resolves the platform's data directory for `(com, tailnet, microservices)`.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    ProjectDirs::from("com", "tailnet", "microservices")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| Error::Config("could not determine platform state directory".into()))
}
