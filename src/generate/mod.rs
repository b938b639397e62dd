//! Registration module generation and loading
//!
//! The registration module (`isle.gen.json`) binds the discovered routes and
//! islands to their URL patterns and component names. It is regenerated only
//! when the manifest changes and is read back as a typed [`Registration`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::ProjectPaths;
use crate::manifest::Manifest;

/// Format version of `isle.gen.json`
pub const REGISTRATION_VERSION: u32 = 1;

/// A route module and the URL pattern it serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub id: String,
    pub pattern: String,
}

impl RouteEntry {
    /// `_app`, `_404`, `_middleware` and friends are not addressable routes
    pub fn is_special(&self) -> bool {
        self.pattern
            .rsplit('/')
            .next()
            .map_or(false, |last| last.starts_with('_'))
    }
}

/// An island module and the component name it registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IslandEntry {
    pub id: String,
    pub name: String,
}

/// Contents of the registration module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub routes: Vec<RouteEntry>,
    pub islands: Vec<IslandEntry>,
}

impl Registration {
    pub fn from_manifest(manifest: &Manifest, base_url: Option<String>) -> Self {
        Self {
            version: REGISTRATION_VERSION,
            base_url,
            routes: manifest
                .routes
                .iter()
                .map(|id| RouteEntry {
                    id: id.clone(),
                    pattern: route_pattern(id),
                })
                .collect(),
            islands: manifest
                .islands
                .iter()
                .map(|id| IslandEntry {
                    id: id.clone(),
                    name: island_name(id),
                })
                .collect(),
        }
    }
}

/// Writes the registration module for a manifest.
///
/// Must be idempotent: the same manifest always yields the same output.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, dir: &Path, manifest: &Manifest) -> Result<()>;
}

/// Generator emitting `isle.gen.json`
#[derive(Debug, Default, Clone)]
pub struct RegistrationGenerator {
    base_url: Option<String>,
}

impl RegistrationGenerator {
    pub fn new(base_url: Option<String>) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl CodeGenerator for RegistrationGenerator {
    async fn generate(&self, dir: &Path, manifest: &Manifest) -> Result<()> {
        let path = ProjectPaths::new(dir).registration;
        let registration = Registration::from_manifest(manifest, self.base_url.clone());
        let mut json = serde_json::to_string_pretty(&registration)
            .context("Failed to serialize registration")?;
        json.push('\n');

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        tracing::info!(
            "Generated {} ({} routes, {} islands)",
            path.display(),
            registration.routes.len(),
            registration.islands.len()
        );
        Ok(())
    }
}

/// Read the current registration module
pub async fn load_registration(path: &Path) -> Result<Registration> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read registration module {}", path.display()))?;
    let registration: Registration = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse registration module {}", path.display()))?;
    if registration.version != REGISTRATION_VERSION {
        bail!(
            "Registration module {} has version {} (expected {}). Run `isle reset` and try again.",
            path.display(),
            registration.version,
            REGISTRATION_VERSION
        );
    }
    Ok(registration)
}

/// URL pattern for a route module id such as `./routes/blog/[slug].tsx`
pub fn route_pattern(id: &str) -> String {
    let relative = id
        .trim_start_matches("./")
        .trim_start_matches("routes/");
    let without_ext = match relative.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') => stem,
        _ => relative,
    };

    let mut segments: Vec<String> = Vec::new();
    for segment in without_ext.split('/').filter(|s| !s.is_empty()) {
        // (group) directories organise files without affecting URLs
        if segment.starts_with('(') && segment.ends_with(')') {
            continue;
        }
        if let Some(name) = segment
            .strip_prefix("[...")
            .and_then(|s| s.strip_suffix(']'))
        {
            segments.push(format!(":{}*", name));
        } else if let Some(name) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            segments.push(format!(":{}", name));
        } else {
            segments.push(segment.to_string());
        }
    }

    if segments.last().map(String::as_str) == Some("index") {
        segments.pop();
    }
    format!("/{}", segments.join("/"))
}

/// Component name for an island module id: `./islands/my-counter.tsx` -> `MyCounter`
pub fn island_name(id: &str) -> String {
    let file = id.rsplit('/').next().unwrap_or(id);
    let stem = file.split('.').next().unwrap_or(file);
    stem.split(|c: char| c == '-' || c == '_' || c == ' ')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
