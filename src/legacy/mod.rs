//! Legacy bootstrap
//!
//! Older projects start through their own entrypoint, which used to be run
//! by `dev` and then constructed plugins itself. The flag below tells such
//! an entrypoint it was launched by isle so plugins are not built twice.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Set to `"true"` before a legacy entrypoint runs
pub const LEGACY_FLAG: &str = "__ISLE_LEGACY_DEV";

/// Mark this process, and every child it spawns from now on, as launched
/// through the legacy path
pub fn set_legacy_flag() {
    std::env::set_var(LEGACY_FLAG, "true");
}

/// Resolve `entrypoint` against the project's base directory
pub fn resolve_entrypoint(base: &Path, entrypoint: &Path) -> PathBuf {
    if entrypoint.is_absolute() {
        entrypoint.to_path_buf()
    } else {
        base.join(entrypoint)
    }
}

/// Executes a legacy entrypoint
#[async_trait]
pub trait LegacyLoader: Send + Sync {
    async fn load(&self, entrypoint: &Path) -> Result<()>;
}

/// Runs the entrypoint as a child process and waits for it. The child
/// always sees the legacy flag.
#[derive(Debug, Default, Clone)]
pub struct ProcessLegacyLoader;

#[async_trait]
impl LegacyLoader for ProcessLegacyLoader {
    async fn load(&self, entrypoint: &Path) -> Result<()> {
        if !entrypoint.exists() {
            bail!("Legacy entrypoint not found: {}", entrypoint.display());
        }
        tracing::info!("Running legacy entrypoint {}", entrypoint.display());

        let mut command = Command::new(entrypoint);
        command.env(LEGACY_FLAG, "true");
        if let Some(dir) = entrypoint.parent() {
            command.current_dir(dir);
        }
        let status = command
            .status()
            .await
            .with_context(|| format!("Failed to run {}", entrypoint.display()))?;
        if !status.success() {
            bail!("{} exited with {}", entrypoint.display(), status);
        }
        Ok(())
    }
}
