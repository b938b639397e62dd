//! CLI commands for isle

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::collect::{FsCollector, ManifestCollector};
use crate::config::{load_global_config, IsleOptions, ProjectPaths, StateBackend};
use crate::dev::Orchestrator;
use crate::manifest::store::FileManifestStore;

#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Summary,
}

/// Reconcile the manifest and run build, dev or legacy mode
pub async fn dev(
    dir: &Path,
    config: Option<&Path>,
    entrypoint: &Path,
    args: &[String],
) -> Result<()> {
    let base = resolve_base(dir)?;
    let options = IsleOptions::discover(&base, config)?;
    let state = cli_backend(options.as_ref())?;

    let paths = ProjectPaths::new(&base).with_options(options.as_ref())?;
    let global = load_global_config().unwrap_or_else(|e| {
        tracing::warn!("Ignoring global config: {:#}", e);
        Default::default()
    });

    let orchestrator = Orchestrator::with_defaults(&paths, options.as_ref(), Some(state))
        .with_update_check(global.update_check);
    let outcome = orchestrator
        .run(&base, entrypoint, options.as_ref(), args)
        .await?;

    tracing::debug!(
        "Finished {} mode (manifest changed: {})",
        outcome.mode,
        outcome.manifest_changed
    );
    Ok(())
}

/// Print the manifest currently collected from the project
pub async fn manifest(dir: &Path, config: Option<&Path>, format: OutputFormat) -> Result<()> {
    let base = resolve_base(dir)?;
    let options = IsleOptions::discover(&base, config)?;
    let manifest = FsCollector.collect(&base, options.as_ref()).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        OutputFormat::Summary => {
            println!("Project: {}", base.display());
            println!("{}", "=".repeat(50));
            println!("Routes: {}", manifest.routes.len());
            for route in &manifest.routes {
                println!("  {}", route);
            }
            println!();
            println!("Islands: {}", manifest.islands.len());
            for island in &manifest.islands {
                println!("  {}", island);
            }
        }
    }
    Ok(())
}

/// Forget the persisted manifest so the next run regenerates
pub fn reset(dir: &Path) -> Result<()> {
    let base = resolve_base(dir)?;
    let store = FileManifestStore::new(ProjectPaths::new(&base).state_file);
    if store.clear()? {
        println!("✓ Removed {}", store.path().display());
    } else {
        println!("No persisted manifest at {}", store.path().display());
    }
    Ok(())
}

/// Backend for a command-line run. The env backend only outlives the
/// process when an embedding parent re-runs isle in a child, so the CLI
/// always persists to the file.
fn cli_backend(options: Option<&IsleOptions>) -> Result<StateBackend> {
    match options.map(|o| o.state).unwrap_or_default() {
        StateBackend::File => Ok(StateBackend::File),
        StateBackend::Env => bail!(
            "state = \"env\" is only supported when embedding isle; remove it from {} to use the file backend",
            crate::config::OPTIONS_FILE
        ),
    }
}

fn resolve_base(dir: &Path) -> Result<PathBuf> {
    dir.canonicalize()
        .with_context(|| format!("Project directory not found: {}", dir.display()))
}
