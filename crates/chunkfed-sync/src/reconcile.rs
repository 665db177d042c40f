//! Reconciliation: keep the recipe store in step with the export registry and
//! the underlying resources.
//!
//! Each pass is complete on its own:
//! 1. Stale-recipe sweep: every recipe whose export vanished is removed; every
//!    recipe whose resource changed size or mtime is rebuilt and replaced;
//!    a recipe whose resource can no longer be probed is removed.
//! 2. New-export sweep: every export without a recipe gets one.
//!
//! Failures are per entry: they are logged, counted and skipped. A pass over
//! unchanged exports and sources performs no writes.

use std::sync::Arc;
use std::time::Duration;

use chunkfed_core::{
    CoreError, DataExportEntry, DataObjectMetadata, Recipe, RecipeGenerator, SourceFileSystem,
};
use chunkfed_store::{ExportRegistry, RecipeStore};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::scheduler::{ScheduleDriver, ScheduleHandle, ScheduledTask};

/// Outcome counters of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Recipes created for newly exported resources.
    pub added: u64,
    /// Recipes rebuilt because their resource changed.
    pub updated: u64,
    /// Recipes dropped because the export or resource is gone.
    pub removed: u64,
    /// Recipes found current.
    pub unchanged: u64,
    /// Exports skipped because they are directories.
    pub skipped: u64,
    /// Entries that failed and will be retried next pass.
    pub failed: u64,
}

impl ReconcileReport {
    /// Number of writes the pass performed.
    pub fn changes(&self) -> u64 {
        self.added + self.updated + self.removed
    }
}

/// Leader-side reconciliation task for one cluster.
pub struct Reconciler {
    cluster_name: String,
    recipes: Arc<RecipeStore>,
    exports: Arc<ExportRegistry>,
    source: Arc<dyn SourceFileSystem>,
    generator: RecipeGenerator,
    pass: Mutex<()>,
    last_report: watch::Sender<ReconcileReport>,
}

impl Reconciler {
    /// Create a reconciler for `cluster_name`.
    pub fn new(
        cluster_name: impl Into<String>,
        recipes: Arc<RecipeStore>,
        exports: Arc<ExportRegistry>,
        source: Arc<dyn SourceFileSystem>,
        generator: RecipeGenerator,
    ) -> Self {
        let (last_report, _) = watch::channel(ReconcileReport::default());
        Self {
            cluster_name: cluster_name.into(),
            recipes,
            exports,
            source,
            generator,
            pass: Mutex::new(()),
            last_report,
        }
    }

    /// Report of the most recent completed pass.
    pub fn last_report(&self) -> ReconcileReport {
        self.last_report.borrow().clone()
    }

    /// Subscribe to pass reports.
    pub fn subscribe(&self) -> watch::Receiver<ReconcileReport> {
        self.last_report.subscribe()
    }

    /// Run one full pass. Passes never overlap.
    ///
    /// Only a failure to enumerate the stores aborts the pass.
    pub async fn run_once(&self) -> Result<ReconcileReport, SyncError> {
        let _pass = self.pass.lock().await;
        // Pick up recipes written by previous leaders.
        self.recipes.reload()?;
        let mut report = ReconcileReport::default();
        self.sweep_stale(&mut report).await?;
        self.sweep_new(&mut report).await?;
        info!(
            cluster = %self.cluster_name,
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "reconciliation pass complete"
        );
        self.last_report.send_replace(report.clone());
        Ok(report)
    }

    /// Rebuild the recipe for one exported path now, regardless of staleness.
    /// Returns `None` if the path is not exported or is a directory; any
    /// recipe left for it is removed.
    pub async fn refresh(&self, virtual_path: &str) -> Result<Option<Arc<Recipe>>, SyncError> {
        let _pass = self.pass.lock().await;
        let built = match self.exports.get(virtual_path)? {
            Some(entry) => self.build(&entry, None).await?,
            None => None,
        };
        match built {
            Some(recipe) => {
                self.recipes.put(recipe)?;
                Ok(self.recipes.get(virtual_path))
            }
            None => {
                if self.recipes.remove(virtual_path)?.is_some() {
                    debug!(path = virtual_path, "recipe dropped on refresh");
                }
                Ok(None)
            }
        }
    }

    /// Schedule leader-only passes every `interval`, starting immediately.
    pub fn schedule(
        self: &Arc<Self>,
        driver: &dyn ScheduleDriver,
        interval: Duration,
    ) -> Result<ScheduleHandle, SyncError> {
        let reconciler = Arc::clone(self);
        let task = ScheduledTask::new("reconcile", move || {
            let reconciler = Arc::clone(&reconciler);
            async move {
                if let Err(e) = reconciler.run_once().await {
                    warn!(cluster = %reconciler.cluster_name, error = %e, "reconciliation pass aborted");
                }
            }
        })
        .every(interval)
        .leader_only();
        driver.schedule(task)
    }

    async fn sweep_stale(&self, report: &mut ReconcileReport) -> Result<(), SyncError> {
        for path in self.recipes.paths() {
            let Some(recipe) = self.recipes.get(&path) else {
                continue;
            };
            let entry = match self.exports.get(&path) {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    debug!(path = %path, "export gone, removing recipe");
                    self.remove(&path, report);
                    continue;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "export lookup failed");
                    report.failed += 1;
                    continue;
                }
            };
            let current = match self.source.metadata(&entry.resource_path).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %path, resource = %entry.resource_path, error = %e, "resource probe failed, removing recipe");
                    self.remove(&path, report);
                    continue;
                }
            };
            if !recipe.is_stale(&current) {
                report.unchanged += 1;
                continue;
            }
            debug!(
                path = %path,
                old_size = recipe.metadata().object_size,
                new_size = current.object_size,
                "resource changed, rebuilding recipe"
            );
            match self.build(&entry, Some(current)).await {
                Ok(Some(rebuilt)) => match self.recipes.put(rebuilt) {
                    Ok(_) => report.updated += 1,
                    Err(e) => {
                        warn!(path = %path, error = %e, "failed to store rebuilt recipe");
                        report.failed += 1;
                    }
                },
                Ok(None) => {
                    // Resource turned into a directory.
                    self.remove(&path, report);
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "rebuild failed, dropping stale recipe");
                    if self.recipes.remove(&path).is_ok() {
                        report.removed += 1;
                    }
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn sweep_new(&self, report: &mut ReconcileReport) -> Result<(), SyncError> {
        for entry in self.exports.entries()? {
            let path = entry.virtual_path();
            if self.recipes.contains(&path) {
                continue;
            }
            match self.build(&entry, None).await {
                Ok(Some(recipe)) => match self.recipes.put(recipe) {
                    Ok(_) => {
                        debug!(path = %path, "recipe added");
                        report.added += 1;
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "failed to store recipe");
                        report.failed += 1;
                    }
                },
                Ok(None) => {
                    debug!(path = %path, "export is a directory, not chunked");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(path = %path, resource = %entry.resource_path, error = %e, "failed to chunk export");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Probe (unless already probed) and chunk one export. Directories yield `None`.
    async fn build(
        &self,
        entry: &DataExportEntry,
        probed: Option<DataObjectMetadata>,
    ) -> Result<Option<Recipe>, CoreError> {
        let metadata = match probed {
            Some(meta) => meta,
            None => self.source.metadata(&entry.resource_path).await?,
        };
        if metadata.is_directory {
            return Ok(None);
        }
        let metadata = metadata.with_path(entry.object_path(&self.cluster_name));
        let mut stream = self.source.open(&entry.resource_path).await?;
        let recipe = self.generator.generate(metadata, &mut stream).await?;
        Ok(Some(recipe))
    }

    fn remove(&self, path: &str, report: &mut ReconcileReport) {
        match self.recipes.remove(path) {
            Ok(_) => report.removed += 1,
            Err(e) => {
                warn!(path, error = %e, "failed to remove recipe");
                report.failed += 1;
            }
        }
    }
}
