//! Project crawler
//!
//! Discovers route and island modules under a project's base directory.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{IsleOptions, ProjectPaths};
use crate::manifest::Manifest;

/// Module extensions recognised as routes or islands
pub const MODULE_EXTENSIONS: &[&str] = &["tsx", "jsx", "ts", "js"];

/// Produces the current manifest of a project.
///
/// Implementations must return entries in a stable order for unchanged
/// project contents; the comparison against the previous run is
/// order-sensitive.
#[async_trait]
pub trait ManifestCollector: Send + Sync {
    async fn collect(&self, dir: &Path, options: Option<&IsleOptions>) -> Result<Manifest>;
}

/// Collector backed by the file system
#[derive(Debug, Default, Clone)]
pub struct FsCollector;

#[async_trait]
impl ManifestCollector for FsCollector {
    async fn collect(&self, dir: &Path, options: Option<&IsleOptions>) -> Result<Manifest> {
        let paths = ProjectPaths::new(dir);
        let ignore = match options.and_then(|o| o.router.ignore_pattern.as_deref()) {
            Some(pattern) => Some(
                Regex::new(pattern)
                    .with_context(|| format!("Invalid router.ignore_pattern: {}", pattern))?,
            ),
            None => None,
        };

        tokio::task::spawn_blocking(move || collect_blocking(&paths, ignore.as_ref()))
            .await
            .context("Manifest collection task failed")?
    }
}

fn collect_blocking(paths: &ProjectPaths, ignore: Option<&Regex>) -> Result<Manifest> {
    if !paths.routes.is_dir() {
        bail!("Routes directory not found: {}", paths.routes.display());
    }

    let mut routes = Vec::new();
    for entry in WalkDir::new(&paths.routes).sort_by_file_name() {
        let entry = entry.context("Failed to walk routes directory")?;
        if !entry.file_type().is_file() || !is_module(entry.path()) {
            continue;
        }
        let id = module_id(&paths.base, entry.path())?;
        if ignore.map_or(false, |re| re.is_match(&id)) {
            tracing::debug!("Ignoring route {}", id);
            continue;
        }
        routes.push(id);
    }

    let mut islands = Vec::new();
    if paths.islands.is_dir() {
        for entry in WalkDir::new(&paths.islands)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.context("Failed to read islands directory")?;
            if entry.file_type().is_file() && is_module(entry.path()) {
                islands.push(module_id(&paths.base, entry.path())?);
            }
        }
    }

    routes.sort();
    islands.sort();
    tracing::debug!("Collected {} routes and {} islands", routes.len(), islands.len());
    Ok(Manifest::new(routes, islands))
}

fn is_module(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| MODULE_EXTENSIONS.contains(&ext))
}

/// `./routes/blog/[slug].tsx` style id, always with forward slashes
fn module_id(base: &Path, path: &Path) -> Result<String> {
    let relative: PathBuf = path
        .strip_prefix(base)
        .with_context(|| format!("{} is outside {}", path.display(), base.display()))?
        .to_path_buf();
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(format!("./{}", parts.join("/")))
}
