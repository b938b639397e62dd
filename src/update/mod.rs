//! Background update check
//!
//! Looks up the latest published isle at most once per interval and prints
//! a notice when a newer release exists. The check runs detached: nothing
//! waits for it, and every failure is dropped.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

use crate::config::UpdateCheckConfig;
use crate::version::{is_newer, CURRENT_VERSION};

/// Setting this variable disables the check
pub const NO_UPDATE_CHECK_ENV: &str = "ISLE_NO_UPDATE_CHECK";

/// Result of the last lookup, cached between invocations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateState {
    pub last_checked: DateTime<Utc>,
    pub latest_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrateResponse {
    #[serde(rename = "crate")]
    krate: CrateInfo,
}

#[derive(Debug, Deserialize)]
struct CrateInfo {
    max_stable_version: Option<String>,
    max_version: String,
}

/// Default location of the cached state
pub fn state_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("isle").join("latest_version.json"))
}

/// Start the check without waiting for it. Returns `None` when disabled.
///
/// The task is dropped when the runtime shuts down; run under
/// [`block_on_detached`] so it never delays process exit.
pub fn spawn_update_check(config: UpdateCheckConfig) -> Option<JoinHandle<()>> {
    if !config.enabled || std::env::var_os(NO_UPDATE_CHECK_ENV).is_some() {
        return None;
    }
    let path = state_path()?;
    Some(tokio::spawn(async move {
        match check_for_update(&config, &path, Utc::now()).await {
            Ok(Some(latest)) => print_notice(&latest),
            Ok(None) => {}
            Err(e) => tracing::debug!("Update check failed: {:#}", e),
        }
    }))
}

/// Drive `future` on a fresh runtime, then shut the runtime down without
/// waiting for detached work.
///
/// Dropping a runtime blocks until its blocking pool drains, and an
/// in-flight update check may hold a DNS lookup there.
pub fn block_on_detached<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

/// Whether the cached state is too old to trust
pub fn is_due(state: Option<&UpdateState>, now: DateTime<Utc>, interval: Duration) -> bool {
    match state {
        Some(state) => now - state.last_checked >= interval,
        None => true,
    }
}

/// Refresh the cached state if due, and return the latest version when it
/// is newer than this build
pub async fn check_for_update(
    config: &UpdateCheckConfig,
    path: &Path,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    let cached = read_state(path).await;
    let interval = Duration::hours(config.interval_hours as i64);

    let state = if is_due(cached.as_ref(), now, interval) {
        let latest = fetch_latest(&config.registry_url).await?;
        let state = UpdateState {
            last_checked: now,
            latest_version: Some(latest),
        };
        write_state(path, &state).await?;
        state
    } else {
        match cached {
            Some(state) => state,
            None => return Ok(None),
        }
    };

    Ok(state
        .latest_version
        .filter(|latest| is_newer(latest, CURRENT_VERSION)))
}

async fn read_state(path: &Path) -> Option<UpdateState> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&raw).ok()
}

async fn write_state(path: &Path, state: &UpdateState) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create cache directory")?;
    }
    let json = serde_json::to_string_pretty(state)?;
    tokio::fs::write(path, json)
        .await
        .context("Failed to write update state")
}

async fn fetch_latest(url: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("isle/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to reach the crate registry")?
        .error_for_status()
        .context("Crate registry returned an error")?;
    let body: CrateResponse = response
        .json()
        .await
        .context("Failed to parse crate registry response")?;

    Ok(body.krate.max_stable_version.unwrap_or(body.krate.max_version))
}

fn print_notice(latest: &str) {
    println!();
    println!("  isle {} is available (you have {}).", latest, CURRENT_VERSION);
    println!("  Run `cargo install isle` to upgrade.");
    println!();
}
