//! Production build pipeline

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{IsleOptions, ProjectPaths};
use crate::generate::load_registration;

/// Ensure `dir` exists and holds nothing
pub async fn empty_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to clear {}", dir.display()));
        }
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))
}

/// Summary written to `build-manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub built_at: DateTime<Utc>,
    pub routes: usize,
    pub islands: usize,
    pub files: Vec<String>,
}

/// Bundles a project from its registration module into `out_dir`
#[async_trait]
pub trait BuildPipeline: Send + Sync {
    async fn build(
        &self,
        registration: &Path,
        out_dir: &Path,
        options: &IsleOptions,
    ) -> Result<BuildReport>;
}

/// Copies route and island modules and static assets into the output
/// directory, keeping their project-relative layout
#[derive(Debug, Default, Clone)]
pub struct CopyBundler;

#[async_trait]
impl BuildPipeline for CopyBundler {
    async fn build(
        &self,
        registration_path: &Path,
        out_dir: &Path,
        _options: &IsleOptions,
    ) -> Result<BuildReport> {
        let registration = load_registration(registration_path).await?;
        let base = registration_path
            .parent()
            .context("Registration module has no parent directory")?;
        let paths = ProjectPaths::new(base);

        let mut files = Vec::new();
        let ids = registration
            .routes
            .iter()
            .map(|r| r.id.as_str())
            .chain(registration.islands.iter().map(|i| i.id.as_str()));
        for id in ids {
            let relative = id.trim_start_matches("./");
            copy_file(&base.join(relative), &out_dir.join(relative)).await?;
            files.push(relative.to_string());
        }

        if paths.static_dir.is_dir() {
            for relative in static_files(&paths.static_dir, base)? {
                copy_file(&base.join(&relative), &out_dir.join(&relative)).await?;
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }

        let report = BuildReport {
            built_at: Utc::now(),
            routes: registration.routes.len(),
            islands: registration.islands.len(),
            files,
        };
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize build report")?;
        tokio::fs::write(out_dir.join("build-manifest.json"), json)
            .await
            .context("Failed to write build-manifest.json")?;

        println!(
            "✓ Built {} routes and {} islands into {}",
            report.routes,
            report.islands,
            out_dir.display()
        );
        Ok(report)
    }
}

async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::copy(from, to)
        .await
        .with_context(|| format!("Failed to copy {}", from.display()))?;
    Ok(())
}

fn static_files(static_dir: &Path, base: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(static_dir).sort_by_file_name() {
        let entry = entry.context("Failed to walk static directory")?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(base)
                .context("Static file outside project")?;
            files.push(relative.to_path_buf());
        }
    }
    Ok(files)
}
