//! Execution mode selection and dispatch
//!
//! Exactly one mode runs per invocation:
//! - build: the invocation arguments contain `build`
//! - dev: no `build` argument, project options were supplied
//! - legacy: neither; the project's own entrypoint is executed

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::build::{empty_dir, BuildPipeline, CopyBundler};
use crate::config::{IsleOptions, ProjectPaths};
use crate::legacy::{resolve_entrypoint, set_legacy_flag, LegacyLoader, ProcessLegacyLoader};
use crate::plugin::{run_hooks, HookPhase};
use crate::server::{CommandDevServer, DevServer, ServerContext};

/// Argument that selects a production build
pub const BUILD_ARG: &str = "build";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Build,
    Dev,
    Legacy,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Build => write!(f, "build"),
            ExecutionMode::Dev => write!(f, "dev"),
            ExecutionMode::Legacy => write!(f, "legacy"),
        }
    }
}

impl ExecutionMode {
    /// Pick the mode from the invocation arguments and whether options were
    /// supplied. `build` wins over everything else.
    pub fn select<S: AsRef<str>>(args: &[S], options_provided: bool) -> Self {
        if args.iter().any(|a| a.as_ref() == BUILD_ARG) {
            ExecutionMode::Build
        } else if options_provided {
            ExecutionMode::Dev
        } else {
            ExecutionMode::Legacy
        }
    }
}

/// Mode-specific backends
pub struct Dispatcher {
    bundler: Arc<dyn BuildPipeline>,
    dev_server: Arc<dyn DevServer>,
    legacy_loader: Arc<dyn LegacyLoader>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            bundler: Arc::new(CopyBundler),
            dev_server: Arc::new(CommandDevServer),
            legacy_loader: Arc::new(ProcessLegacyLoader),
        }
    }
}

impl Dispatcher {
    pub fn new(
        bundler: Arc<dyn BuildPipeline>,
        dev_server: Arc<dyn DevServer>,
        legacy_loader: Arc<dyn LegacyLoader>,
    ) -> Self {
        Self {
            bundler,
            dev_server,
            legacy_loader,
        }
    }

    /// Run `mode` to completion
    pub async fn dispatch(
        &self,
        mode: ExecutionMode,
        ctx: &ServerContext,
        paths: &ProjectPaths,
        options: Option<&IsleOptions>,
        entrypoint: &Path,
    ) -> Result<()> {
        tracing::info!("Running in {} mode", mode);
        match mode {
            ExecutionMode::Build => {
                let defaults = IsleOptions::default();
                self.build(ctx, paths, options.unwrap_or(&defaults)).await
            }
            ExecutionMode::Dev => {
                let options = options.context("Dev mode requires project options")?;
                self.dev_server.start(ctx, options).await
            }
            ExecutionMode::Legacy => {
                set_legacy_flag();
                let entrypoint = resolve_entrypoint(&paths.base, entrypoint);
                self.legacy_loader.load(&entrypoint).await
            }
        }
    }

    async fn build(
        &self,
        ctx: &ServerContext,
        paths: &ProjectPaths,
        options: &IsleOptions,
    ) -> Result<()> {
        paths.check_out_dir()?;
        empty_dir(&paths.out_dir).await?;

        run_hooks(ctx.plugins(), HookPhase::BuildStart).await?;
        self.bundler
            .build(&paths.registration, &paths.out_dir, options)
            .await?;
        run_hooks(ctx.plugins(), HookPhase::BuildEnd).await?;
        Ok(())
    }
}
