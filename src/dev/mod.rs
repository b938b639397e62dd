//! The `dev` orchestrator
//!
//! On every invocation: check compatibility, start the update check, decide
//! whether the route/island manifest changed since the previous run,
//! regenerate the registration module if it did, then hand off to exactly
//! one execution mode.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::collect::{FsCollector, ManifestCollector};
use crate::config::{IsleOptions, ProjectPaths, StateBackend, UpdateCheckConfig};
use crate::dispatch::{Dispatcher, ExecutionMode};
use crate::generate::{load_registration, CodeGenerator, RegistrationGenerator};
use crate::manifest::store::{open_store, ManifestStore};
use crate::manifest::{manifests_equal, Manifest};
use crate::plugin::Plugin;
use crate::server::{ContextFlags, ServerContext};
use crate::update::spawn_update_check;
use crate::version::{ensure_min_version, CURRENT_VERSION};

/// What a run did, for callers and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub mode: ExecutionMode,
    pub manifest_changed: bool,
    pub manifest: Manifest,
}

/// Wires the manifest store, the external collaborators and the dispatcher
pub struct Orchestrator {
    store: Box<dyn ManifestStore>,
    collector: Arc<dyn ManifestCollector>,
    generator: Arc<dyn CodeGenerator>,
    dispatcher: Dispatcher,
    plugins: Vec<Arc<dyn Plugin>>,
    update_check: Option<UpdateCheckConfig>,
}

impl Orchestrator {
    pub fn new(
        store: Box<dyn ManifestStore>,
        collector: Arc<dyn ManifestCollector>,
        generator: Arc<dyn CodeGenerator>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            store,
            collector,
            generator,
            dispatcher,
            plugins: Vec::new(),
            update_check: None,
        }
    }

    /// File-system collector, `isle.gen.json` generator and the default
    /// backends. `state` overrides the backend named in the options.
    pub fn with_defaults(
        paths: &ProjectPaths,
        options: Option<&IsleOptions>,
        state: Option<StateBackend>,
    ) -> Self {
        let backend = state
            .or_else(|| options.map(|o| o.state))
            .unwrap_or_default();
        let base_url = options.and_then(|o| o.base_url.clone());
        Self::new(
            open_store(backend, paths),
            Arc::new(FsCollector),
            Arc::new(RegistrationGenerator::new(base_url)),
            Dispatcher::default(),
        )
    }

    /// Register a plugin ahead of those configured in `isle.toml`
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Enable the background update check
    pub fn with_update_check(mut self, config: UpdateCheckConfig) -> Self {
        self.update_check = Some(config);
        self
    }

    /// Compare the collected manifest against the previous run and
    /// regenerate the registration module if they differ.
    ///
    /// The previous manifest is read before the new one is saved, and the
    /// new one is saved whether or not it changed.
    pub async fn reconcile(&self, dir: &Path, options: Option<&IsleOptions>) -> Result<(bool, Manifest)> {
        let previous = self.store.load();
        let current = self.collector.collect(dir, options).await?;
        self.store.save(&current)?;

        let changed = !manifests_equal(&previous, &current);
        if changed {
            tracing::info!(
                "Manifest changed ({} -> {} entries), regenerating",
                previous.len(),
                current.len()
            );
            self.generator.generate(dir, &current).await?;
        } else {
            tracing::debug!("Manifest unchanged, skipping generation");
        }
        Ok((changed, current))
    }

    /// Run one invocation.
    ///
    /// `args` are the invocation arguments inspected for `build`;
    /// `options` is `None` when the caller supplied no project options.
    pub async fn run<S: AsRef<str>>(
        &self,
        base: &Path,
        entrypoint: &Path,
        options: Option<&IsleOptions>,
        args: &[S],
    ) -> Result<RunOutcome> {
        if let Some(required) = options.and_then(|o| o.requires.as_deref()) {
            ensure_min_version(CURRENT_VERSION, required)?;
        }

        if let Some(config) = &self.update_check {
            // Detached; never awaited
            let _ = spawn_update_check(config.clone());
        }

        let paths = ProjectPaths::new(base).with_options(options)?;
        let (manifest_changed, manifest) = self.reconcile(&paths.base, options).await?;

        let registration = load_registration(&paths.registration).await?;
        let mode = ExecutionMode::select(args, options.is_some());
        let ctx = ServerContext::from_registration(
            &paths.base,
            registration,
            options,
            self.plugins.clone(),
            ContextFlags {
                skip_snapshot: true,
                dev: mode != ExecutionMode::Build,
            },
        )?;

        self.dispatcher
            .dispatch(mode, &ctx, &paths, options, entrypoint)
            .await?;

        Ok(RunOutcome {
            mode,
            manifest_changed,
            manifest,
        })
    }
}
