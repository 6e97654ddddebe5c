//! Sync engine: executes a run against real (or recorded) targets.
//!
//! Mirror legs run first, in plan order; the first failing leg stops the run.
//! Purge file lists are enumerated only after every leg has completed, by
//! replaying the legs over a listing of each tree. A dry run, whose legs are
//! only recorded, therefore announces the same purges as a real run.

use std::time::Instant;

use crate::config::SyncConfig;
use crate::exec::{CommandLine, ExecError, Executor};
use crate::target::Target;

use super::error::SyncError;
use super::ignore::DEFAULT_MARKER_NAME;
use super::mirror::{MirrorStats, RsyncMirror};
use super::plan::{MirrorOp, PurgeOp, Resolver, SyncOperation};
use super::scan::join_root;

/// What to do when a purge fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PurgePolicy {
    /// Log the failure and keep purging other targets.
    #[default]
    Continue,
    /// Stop the run at the first failed purge.
    Abort,
}

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub marker_name: String,
    pub purge_policy: PurgePolicy,
    /// Paths per `rm` invocation.
    pub purge_batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            marker_name: DEFAULT_MARKER_NAME.to_string(),
            purge_policy: PurgePolicy::default(),
            purge_batch_size: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OperationKind {
    #[default]
    Mirror,
    Purge,
}

/// Result of executing one operation.
#[derive(Debug, Clone, Default)]
pub struct OperationResult {
    pub kind: OperationKind,
    /// Job line, e.g. `mirror hostA:/proj -> /proj`.
    pub description: String,
    /// Files copied by a mirror or deleted by a purge.
    pub files: u64,
    /// Bytes transferred (mirrors only).
    pub bytes: u64,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl OperationResult {
    fn mirrored(op: &MirrorOp, stats: MirrorStats, started: Instant) -> Self {
        Self {
            kind: OperationKind::Mirror,
            description: SyncOperation::Mirror(op.clone()).to_string(),
            files: stats.files_transferred,
            bytes: stats.bytes_transferred,
            success: true,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn failed(kind: OperationKind, description: String, error: &SyncError, started: Instant) -> Self {
        Self {
            kind,
            description,
            success: false,
            error: Some(error.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        }
    }
}

/// Report from one run.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Results for every operation attempted, in execution order.
    pub results: Vec<OperationResult>,
    /// Error that stopped the run early, if any.
    pub aborted: Option<SyncError>,
    pub total_duration_ms: u64,
}

impl SyncReport {
    pub fn add_result(&mut self, result: OperationResult) {
        self.results.push(result);
    }

    /// Whether every attempted operation succeeded and the run was not cut short.
    pub fn all_succeeded(&self) -> bool {
        self.aborted.is_none() && self.results.iter().all(|r| r.success)
    }

    pub fn completed(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn purge_failures(&self) -> usize {
        self.failures()
            .filter(|r| r.kind == OperationKind::Purge)
            .count()
    }

    /// Files copied across all mirror legs.
    pub fn total_files(&self) -> u64 {
        self.of_kind(OperationKind::Mirror).map(|r| r.files).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.of_kind(OperationKind::Mirror).map(|r| r.bytes).sum()
    }

    pub fn files_purged(&self) -> u64 {
        self.of_kind(OperationKind::Purge).map(|r| r.files).sum()
    }

    fn of_kind(&self, kind: OperationKind) -> impl Iterator<Item = &OperationResult> {
        self.completed().filter(move |r| r.kind == kind)
    }
}

/// Runs mirrors and purges for one source and its destinations.
pub struct SyncEngine<'a> {
    exec: &'a dyn Executor,
    config: &'a SyncConfig,
    mirror: RsyncMirror,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        exec: &'a dyn Executor,
        config: &'a SyncConfig,
        mirror: RsyncMirror,
        options: SyncOptions,
    ) -> Self {
        Self {
            exec,
            config,
            mirror,
            options,
        }
    }

    pub fn run(&self, source: &Target, dests: &[Target]) -> Result<SyncReport, SyncError> {
        self.run_with(source, dests, &mut |_| {})
    }

    /// Run the sync, calling `on_start` before each operation executes.
    ///
    /// Returns `Err` only when the run could not start (invalid targets or an
    /// unreachable participant). Failures after that are recorded in the
    /// report, together with everything that completed before them.
    pub fn run_with(
        &self,
        source: &Target,
        dests: &[Target],
        on_start: &mut dyn FnMut(&SyncOperation),
    ) -> Result<SyncReport, SyncError> {
        let start = Instant::now();
        let resolver = Resolver::new(self.exec, self.config, &self.options.marker_name);
        let mirrors = resolver.plan_mirrors(source, dests)?;

        let mut report = SyncReport::default();
        tracing::info!(source = %source, dests = dests.len(), legs = mirrors.len(), "starting sync");

        for op in &mirrors {
            on_start(&SyncOperation::Mirror(op.clone()));
            let started = Instant::now();
            match self.mirror.run(self.exec, op) {
                Ok(stats) => report.add_result(OperationResult::mirrored(op, stats, started)),
                Err(err) => {
                    report.add_result(OperationResult::failed(
                        OperationKind::Mirror,
                        SyncOperation::Mirror(op.clone()).to_string(),
                        &err,
                        started,
                    ));
                    return Ok(self.finish(report, start, Some(err)));
                }
            }
        }

        for (target, planned) in resolver.plan_purges(source, dests, &mirrors) {
            if let Err(err) = self.purge_target(&target, planned, on_start, &mut report) {
                return Ok(self.finish(report, start, Some(err)));
            }
        }

        Ok(self.finish(report, start, None))
    }

    /// Delete the foreign-owned files planned for one target.
    ///
    /// Returns `Err` when the run must stop: the target became unreachable,
    /// or a purge failed under [`PurgePolicy::Abort`].
    fn purge_target(
        &self,
        target: &Target,
        planned: Result<Option<PurgeOp>, ExecError>,
        on_start: &mut dyn FnMut(&SyncOperation),
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let started = Instant::now();

        let outcome = match planned {
            Ok(None) => return Ok(()),
            Ok(Some(op)) => {
                let operation = SyncOperation::Purge(op.clone());
                on_start(&operation);
                self.purge(&op).map(|deleted| (operation.to_string(), deleted))
            }
            Err(err) => Err(purge_error(target, err)),
        };

        match outcome {
            Ok((description, deleted)) => {
                tracing::info!(endpoint = %target, files = deleted, "purge completed");
                report.add_result(OperationResult {
                    kind: OperationKind::Purge,
                    description,
                    files: deleted,
                    success: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                });
                Ok(())
            }
            Err(err) => {
                let fatal = matches!(err, SyncError::Unreachable { .. })
                    || self.options.purge_policy == PurgePolicy::Abort;
                tracing::warn!(endpoint = %target, error = %err, fatal, "purge failed");
                report.add_result(OperationResult::failed(
                    OperationKind::Purge,
                    format!("purge {target}"),
                    &err,
                    started,
                ));
                if fatal { Err(err) } else { Ok(()) }
            }
        }
    }

    /// Delete the files of `op` in batches of `rm -f`.
    fn purge(&self, op: &PurgeOp) -> Result<u64, SyncError> {
        let root = op.target.shell_root();
        let batch_size = self.options.purge_batch_size.max(1);

        for batch in op.files.chunks(batch_size) {
            let cmd = CommandLine::new("rm")
                .args(["-f", "--"])
                .args(batch.iter().map(|file| join_root(root, file)));
            self.exec
                .apply(op.target.host(), &cmd)
                .map_err(|err| purge_error(&op.target, err))?;
        }
        Ok(op.files.len() as u64)
    }

    fn finish(&self, mut report: SyncReport, start: Instant, aborted: Option<SyncError>) -> SyncReport {
        report.total_duration_ms = start.elapsed().as_millis() as u64;
        report.aborted = aborted;
        tracing::info!(
            operations = report.results.len(),
            files = report.total_files(),
            purged = report.files_purged(),
            duration_ms = report.total_duration_ms,
            success = report.all_succeeded(),
            "sync finished"
        );
        report
    }
}

fn purge_error(target: &Target, err: ExecError) -> SyncError {
    if err.is_unreachable() {
        SyncError::Unreachable {
            target: target.to_string(),
            source: err,
        }
    } else {
        SyncError::PurgeFailed {
            target: target.to_string(),
            diagnostic: err.diagnostic(),
        }
    }
}
