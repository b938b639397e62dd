//! Build plugins
//!
//! A plugin may hook the start and the end of a production build. Both
//! hooks are optional; the default implementations do nothing.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::task::JoinSet;

use crate::config::PluginConfig;

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn build_start(&self) -> Result<()> {
        Ok(())
    }

    async fn build_end(&self) -> Result<()> {
        Ok(())
    }
}

/// Which build hook to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    BuildStart,
    BuildEnd,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPhase::BuildStart => write!(f, "build_start"),
            HookPhase::BuildEnd => write!(f, "build_end"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Plugin {plugin} failed in {phase}: {source}")]
    Failed {
        plugin: String,
        phase: HookPhase,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("A plugin hook panicked in {phase}")]
    Panicked { phase: HookPhase },
}

/// Run one hook of every plugin concurrently and wait for all of them.
///
/// Hooks are started in registration order. A failing hook does not cancel
/// the others; once every hook has settled, the failure of the earliest
/// registered plugin is returned.
pub async fn run_hooks(plugins: &[Arc<dyn Plugin>], phase: HookPhase) -> Result<(), HookError> {
    let mut set = JoinSet::new();
    for (index, plugin) in plugins.iter().enumerate() {
        let plugin = Arc::clone(plugin);
        set.spawn(async move {
            let result = match phase {
                HookPhase::BuildStart => plugin.build_start().await,
                HookPhase::BuildEnd => plugin.build_end().await,
            };
            (index, result)
        });
    }

    let mut failures: Vec<(usize, HookError)> = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((index, Err(source))) => failures.push((
                index,
                HookError::Failed {
                    plugin: plugins[index].name().to_string(),
                    phase,
                    source: source.into(),
                },
            )),
            Err(e) => {
                tracing::error!("Plugin hook task aborted: {}", e);
                failures.push((usize::MAX, HookError::Panicked { phase }));
            }
        }
    }

    tracing::debug!("{} hooks settled for {} plugins", phase, plugins.len());
    failures.sort_by_key(|(index, _)| *index);
    match failures.into_iter().next() {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

/// Plugin configured in `isle.toml`, running shell commands as hooks
#[derive(Debug, Clone)]
pub struct CommandPlugin {
    config: PluginConfig,
    cwd: PathBuf,
}

impl CommandPlugin {
    pub fn new(config: PluginConfig, cwd: &Path) -> Self {
        Self {
            config,
            cwd: cwd.to_path_buf(),
        }
    }

    async fn run(&self, command: Option<&str>, phase: HookPhase) -> Result<()> {
        let Some(command) = command else {
            return Ok(());
        };
        tracing::info!("[{}] {}: {}", self.config.name, phase, command);
        let status = shell(command)
            .current_dir(&self.cwd)
            .status()
            .await
            .with_context(|| format!("Failed to run {} hook of {}", phase, self.config.name))?;
        if !status.success() {
            return Err(anyhow!("`{}` exited with {}", command, status));
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for CommandPlugin {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn build_start(&self) -> Result<()> {
        self.run(self.config.build_start.as_deref(), HookPhase::BuildStart)
            .await
    }

    async fn build_end(&self) -> Result<()> {
        self.run(self.config.build_end.as_deref(), HookPhase::BuildEnd)
            .await
    }
}

/// A command line run through the platform shell
pub(crate) fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}
