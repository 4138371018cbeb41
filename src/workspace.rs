//! Workspace resolver: the filesystem root all components persist under.

use std::path::PathBuf;

use crate::config::Config;

/// Resolve the workspace root: the configured path when set, otherwise the
/// process working directory.
pub fn resolve(config: &Config) -> PathBuf {
    match &config.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
