// Integration tests for the dev orchestrator
// Tests manifest reconciliation, generator gating and mode dispatch

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use isle::build::{BuildPipeline, BuildReport};
use isle::collect::ManifestCollector;
use isle::config::IsleOptions;
use isle::dev::Orchestrator;
use isle::dispatch::{Dispatcher, ExecutionMode};
use isle::generate::{CodeGenerator, RegistrationGenerator};
use isle::legacy::{LegacyLoader, LEGACY_FLAG};
use isle::manifest::store::{encode, ManifestStore, MemoryManifestStore};
use isle::manifest::Manifest;
use isle::plugin::Plugin;
use isle::server::{ContextFlags, DevServer, ServerContext};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn manifest(routes: &[&str], islands: &[&str]) -> Manifest {
    Manifest::new(
        routes.iter().map(|s| s.to_string()).collect(),
        islands.iter().map(|s| s.to_string()).collect(),
    )
}

/// Store shared with the test so saves can be observed after the run
#[derive(Clone, Default)]
struct SharedStore {
    inner: Arc<MemoryManifestStore>,
    saves: Arc<AtomicUsize>,
}

impl SharedStore {
    fn seeded(previous: &Manifest) -> Self {
        Self {
            inner: Arc::new(MemoryManifestStore::with_raw(encode(previous).unwrap())),
            saves: Arc::default(),
        }
    }
}

impl ManifestStore for SharedStore {
    fn load(&self) -> Manifest {
        self.inner.load()
    }

    fn save(&self, manifest: &Manifest) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(manifest)
    }
}

struct FixedCollector {
    manifest: Result<Manifest, String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ManifestCollector for FixedCollector {
    async fn collect(&self, _dir: &Path, _options: Option<&IsleOptions>) -> Result<Manifest> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.manifest.clone().map_err(|e| anyhow!(e))
    }
}

/// Writes the real registration module and records every call
#[derive(Clone, Default)]
struct RecordingGenerator {
    calls: Arc<Mutex<Vec<Manifest>>>,
}

impl RecordingGenerator {
    fn calls(&self) -> Vec<Manifest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeGenerator for RecordingGenerator {
    async fn generate(&self, dir: &Path, manifest: &Manifest) -> Result<()> {
        self.calls.lock().unwrap().push(manifest.clone());
        RegistrationGenerator::default().generate(dir, manifest).await
    }
}

struct FailingGenerator {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CodeGenerator for FailingGenerator {
    async fn generate(&self, _dir: &Path, _manifest: &Manifest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("registration directory is read-only"))
    }
}

#[derive(Default)]
struct Calls {
    dev: Mutex<Vec<(ContextFlags, Vec<String>, usize)>>,
    legacy: Mutex<Vec<PathBuf>>,
    builds: AtomicUsize,
}

struct FakeDevServer(Arc<Calls>);

#[async_trait]
impl DevServer for FakeDevServer {
    async fn start(&self, ctx: &ServerContext, _options: &IsleOptions) -> Result<()> {
        let routes = ctx.routes().iter().map(|r| r.id.clone()).collect();
        self.0
            .dev
            .lock()
            .unwrap()
            .push((ctx.flags(), routes, ctx.plugins().len()));
        Ok(())
    }
}

struct FakeLegacyLoader(Arc<Calls>);

#[async_trait]
impl LegacyLoader for FakeLegacyLoader {
    async fn load(&self, entrypoint: &Path) -> Result<()> {
        assert_eq!(std::env::var(LEGACY_FLAG).as_deref(), Ok("true"));
        self.0.legacy.lock().unwrap().push(entrypoint.to_path_buf());
        Ok(())
    }
}

/// Checks the build preconditions at the moment bundling starts
struct CheckingBundler {
    calls: Arc<Calls>,
    hooks_started: Arc<AtomicUsize>,
    hooks_finished: Arc<AtomicUsize>,
    expected_hooks: usize,
}

#[async_trait]
impl BuildPipeline for CheckingBundler {
    async fn build(
        &self,
        _registration: &Path,
        out_dir: &Path,
        _options: &IsleOptions,
    ) -> Result<BuildReport> {
        assert!(out_dir.is_dir());
        assert_eq!(fs::read_dir(out_dir)?.count(), 0, "output dir not empty");
        assert_eq!(self.hooks_started.load(Ordering::SeqCst), self.expected_hooks);
        assert_eq!(self.hooks_finished.load(Ordering::SeqCst), 0);
        self.calls.builds.fetch_add(1, Ordering::SeqCst);
        Ok(BuildReport {
            built_at: chrono::Utc::now(),
            routes: 0,
            islands: 0,
            files: Vec::new(),
        })
    }
}

struct HookPlugin {
    name: String,
    delay_ms: u64,
    fail_start: bool,
    fail_end: bool,
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for HookPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn build_start(&self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(anyhow!("{} refused to start", self.name));
        }
        Ok(())
    }

    async fn build_end(&self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.fail_end {
            return Err(anyhow!("{} could not finish", self.name));
        }
        Ok(())
    }
}

struct Harness {
    temp: TempDir,
    store: SharedStore,
    generator: RecordingGenerator,
    collector_calls: Arc<AtomicUsize>,
    calls: Arc<Calls>,
}

impl Harness {
    fn new(previous: Option<&Manifest>) -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            store: previous.map(SharedStore::seeded).unwrap_or_default(),
            generator: RecordingGenerator::default(),
            collector_calls: Arc::default(),
            calls: Arc::default(),
        }
    }

    fn base(&self) -> &Path {
        self.temp.path()
    }

    /// Write the registration module a previous run would have left behind
    async fn seed_registration(&self, manifest: &Manifest) {
        RegistrationGenerator::default()
            .generate(self.base(), manifest)
            .await
            .unwrap();
    }

    fn orchestrator(&self, current: Result<Manifest, String>, bundler: Arc<dyn BuildPipeline>) -> Orchestrator {
        self.orchestrator_with(current, bundler, Arc::new(self.generator.clone()))
    }

    fn orchestrator_with(
        &self,
        current: Result<Manifest, String>,
        bundler: Arc<dyn BuildPipeline>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Orchestrator {
        Orchestrator::new(
            Box::new(self.store.clone()),
            Arc::new(FixedCollector {
                manifest: current,
                calls: self.collector_calls.clone(),
            }),
            generator,
            Dispatcher::new(
                bundler,
                Arc::new(FakeDevServer(self.calls.clone())),
                Arc::new(FakeLegacyLoader(self.calls.clone())),
            ),
        )
    }

    fn plain_orchestrator(&self, current: Manifest) -> Orchestrator {
        let bundler = Arc::new(CheckingBundler {
            calls: self.calls.clone(),
            hooks_started: Arc::default(),
            hooks_finished: Arc::default(),
            expected_hooks: 0,
        });
        self.orchestrator(Ok(current), bundler)
    }
}

const NO_ARGS: &[&str] = &[];

#[tokio::test]
async fn test_added_route_regenerates_and_starts_dev() -> Result<()> {
    let previous = manifest(&["/a"], &[]);
    let current = manifest(&["/a", "/b"], &[]);
    let harness = Harness::new(Some(&previous));
    let orchestrator = harness.plain_orchestrator(current.clone());

    let options = IsleOptions::default();
    let outcome = orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&options), NO_ARGS)
        .await?;

    assert_eq!(outcome.mode, ExecutionMode::Dev);
    assert!(outcome.manifest_changed);
    assert_eq!(harness.generator.calls(), vec![current.clone()]);
    assert_eq!(harness.store.load(), current);

    let dev = harness.calls.dev.lock().unwrap();
    assert_eq!(dev.len(), 1);
    let (flags, routes, _) = &dev[0];
    assert_eq!(
        *flags,
        ContextFlags {
            skip_snapshot: true,
            dev: true
        }
    );
    assert_eq!(routes, &vec!["/a".to_string(), "/b".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_unchanged_manifest_skips_generation_but_saves() -> Result<()> {
    let same = manifest(&["/x"], &["/Counter"]);
    let harness = Harness::new(Some(&same));
    harness.seed_registration(&same).await;
    let orchestrator = harness.plain_orchestrator(same.clone());

    let outcome = orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&IsleOptions::default()), NO_ARGS)
        .await?;

    assert!(!outcome.manifest_changed);
    assert!(harness.generator.calls().is_empty());
    assert_eq!(harness.store.saves.load(Ordering::SeqCst), 1);
    assert_eq!(harness.store.load(), same);
    Ok(())
}

#[tokio::test]
async fn test_first_run_compares_against_empty_manifest() -> Result<()> {
    let harness = Harness::new(None);
    harness.seed_registration(&Manifest::default()).await;
    let orchestrator = harness.plain_orchestrator(Manifest::default());

    let outcome = orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&IsleOptions::default()), NO_ARGS)
        .await?;

    assert!(!outcome.manifest_changed);
    assert!(harness.generator.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_first_run_with_routes_generates() -> Result<()> {
    let harness = Harness::new(None);
    let current = manifest(&["./routes/index.tsx"], &[]);
    let orchestrator = harness.plain_orchestrator(current.clone());

    let outcome = orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&IsleOptions::default()), NO_ARGS)
        .await?;

    assert!(outcome.manifest_changed);
    assert_eq!(harness.generator.calls(), vec![current]);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_state_is_treated_as_empty() -> Result<()> {
    let mut harness = Harness::new(None);
    harness.store = SharedStore {
        inner: Arc::new(MemoryManifestStore::with_raw("{\"routes\": [")),
        saves: Arc::default(),
    };
    let current = manifest(&["/a"], &[]);
    let orchestrator = harness.plain_orchestrator(current.clone());

    let outcome = orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&IsleOptions::default()), NO_ARGS)
        .await?;

    assert!(outcome.manifest_changed);
    assert_eq!(harness.store.load(), current);
    Ok(())
}

#[tokio::test]
async fn test_no_options_runs_legacy_entrypoint() -> Result<()> {
    let same = manifest(&["/x"], &[]);
    let harness = Harness::new(Some(&same));
    harness.seed_registration(&same).await;
    let orchestrator = harness.plain_orchestrator(same);

    let outcome = orchestrator
        .run(harness.base(), Path::new("main.sh"), None, NO_ARGS)
        .await?;

    assert_eq!(outcome.mode, ExecutionMode::Legacy);
    assert_eq!(
        *harness.calls.legacy.lock().unwrap(),
        vec![harness.base().join("main.sh")]
    );
    assert!(harness.calls.dev.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_build_argument_overrides_options() -> Result<()> {
    let same = manifest(&["/x"], &[]);
    let harness = Harness::new(Some(&same));
    harness.seed_registration(&same).await;

    let out_dir = harness.base().join("_isle");
    fs::create_dir_all(out_dir.join("stale"))?;
    fs::write(out_dir.join("stale/old.js"), "old")?;

    let orchestrator = harness.plain_orchestrator(same);
    let outcome = orchestrator
        .run(harness.base(), Path::new("main.sh"), None, &["build"])
        .await?;

    assert_eq!(outcome.mode, ExecutionMode::Build);
    assert_eq!(harness.calls.builds.load(Ordering::SeqCst), 1);
    assert!(!out_dir.join("stale").exists());
    assert!(harness.calls.legacy.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_build_hooks_surround_bundling() -> Result<()> {
    let same = manifest(&["/x"], &[]);
    let harness = Harness::new(Some(&same));
    harness.seed_registration(&same).await;

    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let bundler = Arc::new(CheckingBundler {
        calls: harness.calls.clone(),
        hooks_started: started.clone(),
        hooks_finished: finished.clone(),
        expected_hooks: 2,
    });

    let orchestrator = harness
        .orchestrator(Ok(same), bundler)
        .with_plugin(Arc::new(HookPlugin {
            name: "slow".to_string(),
            delay_ms: 40,
            fail_start: false,
            fail_end: false,
            started: started.clone(),
            finished: finished.clone(),
        }))
        .with_plugin(Arc::new(HookPlugin {
            name: "fast".to_string(),
            delay_ms: 0,
            fail_start: false,
            fail_end: false,
            started: started.clone(),
            finished: finished.clone(),
        }));

    orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&IsleOptions::default()), &["build"])
        .await?;

    assert_eq!(harness.calls.builds.load(Ordering::SeqCst), 1);
    assert_eq!(finished.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_failing_pre_build_hook_aborts_build() -> Result<()> {
    let same = manifest(&["/x"], &[]);
    let harness = Harness::new(Some(&same));
    harness.seed_registration(&same).await;

    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let bundler = Arc::new(CheckingBundler {
        calls: harness.calls.clone(),
        hooks_started: started.clone(),
        hooks_finished: finished.clone(),
        expected_hooks: 2,
    });

    let orchestrator = harness
        .orchestrator(Ok(same), bundler)
        .with_plugin(Arc::new(HookPlugin {
            name: "broken".to_string(),
            delay_ms: 0,
            fail_start: true,
            fail_end: false,
            started: started.clone(),
            finished: finished.clone(),
        }))
        .with_plugin(Arc::new(HookPlugin {
            name: "slow".to_string(),
            delay_ms: 40,
            fail_start: false,
            fail_end: false,
            started: started.clone(),
            finished: finished.clone(),
        }));

    let err = orchestrator
        .run(harness.base(), Path::new("main.sh"), None, &["build"])
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("broken"));
    // The slow hook still ran to completion
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(harness.calls.builds.load(Ordering::SeqCst), 0);
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_failing_post_build_hook_fails_after_bundling() -> Result<()> {
    let same = manifest(&["/x"], &[]);
    let harness = Harness::new(Some(&same));
    harness.seed_registration(&same).await;

    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let bundler = Arc::new(CheckingBundler {
        calls: harness.calls.clone(),
        hooks_started: started.clone(),
        hooks_finished: finished.clone(),
        expected_hooks: 2,
    });

    let orchestrator = harness
        .orchestrator(Ok(same), bundler)
        .with_plugin(Arc::new(HookPlugin {
            name: "broken-end".to_string(),
            delay_ms: 0,
            fail_start: false,
            fail_end: true,
            started: started.clone(),
            finished: finished.clone(),
        }))
        .with_plugin(Arc::new(HookPlugin {
            name: "slow".to_string(),
            delay_ms: 40,
            fail_start: false,
            fail_end: false,
            started: started.clone(),
            finished: finished.clone(),
        }));

    let err = orchestrator
        .run(harness.base(), Path::new("main.sh"), None, &["build"])
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("broken-end"));
    assert_eq!(harness.calls.builds.load(Ordering::SeqCst), 1);
    // Both post-build hooks ran to completion
    assert_eq!(finished.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_generation_failure_propagates_after_saving() {
    let previous = manifest(&["/a"], &[]);
    let current = manifest(&["/a", "/b"], &[]);
    let harness = Harness::new(Some(&previous));
    let bundler = Arc::new(CheckingBundler {
        calls: harness.calls.clone(),
        hooks_started: Arc::default(),
        hooks_finished: Arc::default(),
        expected_hooks: 0,
    });
    let generator_calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = harness.orchestrator_with(
        Ok(current.clone()),
        bundler,
        Arc::new(FailingGenerator {
            calls: generator_calls.clone(),
        }),
    );

    let err = orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&IsleOptions::default()), NO_ARGS)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("read-only"));
    assert_eq!(generator_calls.load(Ordering::SeqCst), 1);
    // Saved before generation was attempted
    assert_eq!(harness.store.saves.load(Ordering::SeqCst), 1);
    assert_eq!(harness.store.load(), current);
    assert!(harness.calls.dev.lock().unwrap().is_empty());
    assert!(harness.calls.legacy.lock().unwrap().is_empty());
    assert_eq!(harness.calls.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dev_mode_reuses_context_plugins() -> Result<()> {
    let same = manifest(&["/x"], &[]);
    let harness = Harness::new(Some(&same));
    harness.seed_registration(&same).await;

    let mut options = IsleOptions::default();
    options.plugins.push(isle::config::PluginConfig {
        name: "configured".to_string(),
        build_start: None,
        build_end: None,
    });
    let orchestrator = harness.plain_orchestrator(same);
    orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&options), NO_ARGS)
        .await?;

    let dev = harness.calls.dev.lock().unwrap();
    assert_eq!(dev[0].2, 1);
    Ok(())
}

#[tokio::test]
async fn test_incompatible_version_stops_before_collection() {
    let harness = Harness::new(None);
    let orchestrator = harness.plain_orchestrator(manifest(&["/a"], &[]));
    let options = IsleOptions {
        requires: Some("999.0.0".to_string()),
        ..IsleOptions::default()
    };

    let err = orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&options), NO_ARGS)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("requires isle 999.0.0"));
    assert_eq!(harness.collector_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.store.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_collection_failure_propagates_without_saving() {
    let previous = manifest(&["/a"], &[]);
    let harness = Harness::new(Some(&previous));
    let bundler = Arc::new(CheckingBundler {
        calls: harness.calls.clone(),
        hooks_started: Arc::default(),
        hooks_finished: Arc::default(),
        expected_hooks: 0,
    });
    let orchestrator = harness.orchestrator(Err("disk on fire".to_string()), bundler);

    let err = orchestrator
        .run(harness.base(), Path::new("main.sh"), Some(&IsleOptions::default()), NO_ARGS)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("disk on fire"));
    assert_eq!(harness.store.saves.load(Ordering::SeqCst), 0);
    assert_eq!(harness.store.load(), previous);
    assert!(harness.generator.calls().is_empty());
}
