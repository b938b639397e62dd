//! Server context and the development server seam
//!
//! The context is built once per invocation from the loaded registration.
//! Plugins are constructed here and nowhere else; every mode that needs
//! them reads them from the context.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{IsleOptions, ProjectPaths};
use crate::generate::{IslandEntry, Registration, RouteEntry};
use crate::plugin::{shell, CommandPlugin, Plugin};

/// Flags the orchestrator sets on the context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextFlags {
    /// Do not capture an integrity snapshot of the registration
    pub skip_snapshot: bool,
    /// Development mode (live reload) rather than a production build
    pub dev: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Routes {first} and {second} both serve {pattern}")]
    DuplicateRoute {
        pattern: String,
        first: String,
        second: String,
    },

    #[error("Islands {first} and {second} are both named {name}")]
    DuplicateIsland {
        name: String,
        first: String,
        second: String,
    },
}

/// Everything a server needs to run a project
pub struct ServerContext {
    base: PathBuf,
    registration: Registration,
    routes: Vec<RouteEntry>,
    specials: Vec<RouteEntry>,
    islands: Vec<IslandEntry>,
    plugins: Vec<Arc<dyn Plugin>>,
    flags: ContextFlags,
}

impl ServerContext {
    /// Build the route and island tables and construct plugins.
    ///
    /// `plugins` are registered programmatically by the embedder and come
    /// before those configured in `isle.toml`.
    pub fn from_registration(
        base: &Path,
        registration: Registration,
        options: Option<&IsleOptions>,
        plugins: Vec<Arc<dyn Plugin>>,
        flags: ContextFlags,
    ) -> Result<Self, ContextError> {
        let mut routes = Vec::new();
        let mut specials = Vec::new();
        let mut by_pattern: HashMap<&str, &str> = HashMap::new();
        for route in &registration.routes {
            if route.is_special() {
                specials.push(route.clone());
                continue;
            }
            if let Some(first) = by_pattern.insert(&route.pattern, &route.id) {
                return Err(ContextError::DuplicateRoute {
                    pattern: route.pattern.clone(),
                    first: first.to_string(),
                    second: route.id.clone(),
                });
            }
            routes.push(route.clone());
        }

        let mut by_name: HashMap<&str, &str> = HashMap::new();
        for island in &registration.islands {
            if let Some(first) = by_name.insert(&island.name, &island.id) {
                return Err(ContextError::DuplicateIsland {
                    name: island.name.clone(),
                    first: first.to_string(),
                    second: island.id.clone(),
                });
            }
        }
        let islands = registration.islands.clone();

        let mut all_plugins = plugins;
        if let Some(options) = options {
            for config in &options.plugins {
                all_plugins.push(Arc::new(CommandPlugin::new(config.clone(), base)));
            }
        }
        tracing::debug!(
            "Server context: {} routes, {} islands, {} plugins (dev={}, skip_snapshot={})",
            routes.len(),
            islands.len(),
            all_plugins.len(),
            flags.dev,
            flags.skip_snapshot
        );

        Ok(Self {
            base: base.to_path_buf(),
            registration,
            routes,
            specials,
            islands,
            plugins: all_plugins,
            flags,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Addressable routes, in registration order
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// `_app`, `_404`, `_middleware` style modules
    pub fn specials(&self) -> &[RouteEntry] {
        &self.specials
    }

    pub fn islands(&self) -> &[IslandEntry] {
        &self.islands
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }
}

/// Interactive development server
#[async_trait]
pub trait DevServer: Send + Sync {
    async fn start(&self, ctx: &ServerContext, options: &IsleOptions) -> Result<()>;
}

/// Runs the project's configured `dev.command` and waits for it to exit
#[derive(Debug, Default, Clone)]
pub struct CommandDevServer;

#[async_trait]
impl DevServer for CommandDevServer {
    async fn start(&self, ctx: &ServerContext, options: &IsleOptions) -> Result<()> {
        let command = options
            .dev
            .command
            .as_deref()
            .ok_or_else(|| anyhow!("No dev server configured. Set [dev] command in isle.toml"))?;
        let registration = ProjectPaths::new(ctx.base()).registration;

        println!(
            "Listening on http://{}:{}/",
            options.dev.host, options.dev.port
        );
        tracing::info!("Starting dev server: {}", command);

        let status = shell(command)
            .current_dir(ctx.base())
            .env("ISLE_REGISTRATION", &registration)
            .env("ISLE_DEV", if ctx.flags().dev { "1" } else { "0" })
            .env(
                "ISLE_SKIP_SNAPSHOT",
                if ctx.flags().skip_snapshot { "1" } else { "0" },
            )
            .env("ISLE_HOST", &options.dev.host)
            .env("ISLE_PORT", options.dev.port.to_string())
            .status()
            .await
            .context("Failed to start dev server")?;

        if !status.success() {
            bail!("Dev server exited with {}", status);
        }
        Ok(())
    }
}
