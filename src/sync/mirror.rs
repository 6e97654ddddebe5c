//! Mirror invoker: runs rsync for one directional leg.
//!
//! # Safety
//!
//! **IMPORTANT**: rsync runs with `--update` and WITHOUT `--delete`. A leg
//! never removes files and never overwrites a newer file, so stopping a run
//! half way loses no data.

use std::time::Instant;

use crate::exec::{CommandLine, Executor, SshOptions};
use crate::target::{LOCAL_HOST, Target};

use super::error::SyncError;
use super::plan::MirrorOp;

/// Options for invoking rsync.
#[derive(Debug, Clone)]
pub struct RsyncOptions {
    pub program: String,
    /// Transfer timeout in seconds (0 = no timeout).
    pub transfer_timeout: u64,
    pub ssh: SshOptions,
}

impl RsyncOptions {
    pub fn new(program: impl Into<String>, ssh: SshOptions) -> Self {
        Self {
            program: program.into(),
            transfer_timeout: 300, // 5 minutes
            ssh,
        }
    }

    /// Set the transfer timeout.
    pub fn with_transfer_timeout(mut self, seconds: u64) -> Self {
        self.transfer_timeout = seconds;
        self
    }
}

/// Locate the rsync binary on `PATH`.
pub fn locate_rsync() -> Result<String, SyncError> {
    which::which("rsync")
        .map(|path| path.to_string_lossy().into_owned())
        .map_err(|_| SyncError::RsyncMissing)
}

/// Statistics parsed from rsync `--stats` output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub files_transferred: u64,
    pub bytes_transferred: u64,
}

/// Runs mirror legs with rsync, newer-file-wins, never deleting.
pub struct RsyncMirror {
    options: RsyncOptions,
}

impl RsyncMirror {
    pub fn new(options: RsyncOptions) -> Self {
        Self { options }
    }

    /// Build the rsync command for `op`.
    ///
    /// The source carries a trailing `/` so the directory's contents land in
    /// the destination rather than a nested copy of the directory.
    pub fn command(&self, op: &MirrorOp) -> CommandLine {
        let source = format!("{}/", op.source.to_string().trim_end_matches('/'));

        CommandLine::new(&self.options.program)
            .args([
                "-ahvz",     // Archive, human-readable, verbose, compress
                "--update",  // Newer file wins
                "--stats",   // Show transfer stats for parsing
                "--partial", // Keep partial transfers for resume
                "--timeout",
            ])
            .arg(self.options.transfer_timeout.to_string())
            .arg("-e")
            .arg(self.options.ssh.rsync_shell())
            .args(op.exclude.iter().map(|p| format!("--exclude={p}")))
            .arg("--")
            .arg(source)
            .arg(op.dest.to_string())
    }

    /// Mirror `source` into `dest`, skipping paths matching `exclude`.
    pub fn mirror(
        &self,
        exec: &dyn Executor,
        source: &Target,
        dest: &Target,
        exclude: &[String],
    ) -> Result<MirrorStats, SyncError> {
        self.run(
            exec,
            &MirrorOp {
                source: source.clone(),
                dest: dest.clone(),
                exclude: exclude.to_vec(),
            },
        )
    }

    /// Run one planned leg.
    pub fn run(&self, exec: &dyn Executor, op: &MirrorOp) -> Result<MirrorStats, SyncError> {
        let start = Instant::now();
        let cmd = self.command(op);

        tracing::debug!(
            source = %op.source,
            dest = %op.dest,
            excludes = op.exclude.len(),
            "starting rsync"
        );

        let output = exec.apply(LOCAL_HOST, &cmd).map_err(|err| {
            let diagnostic = describe_rsync_failure(&err.diagnostic(), &op.dest);
            tracing::warn!(
                source = %op.source,
                dest = %op.dest,
                error = %diagnostic,
                "rsync failed"
            );
            SyncError::MirrorFailed {
                from: op.source.to_string(),
                to: op.dest.to_string(),
                diagnostic,
            }
        })?;

        let stats = parse_rsync_stats(&output);
        tracing::info!(
            source = %op.source,
            dest = %op.dest,
            files = stats.files_transferred,
            bytes = stats.bytes_transferred,
            duration_ms = start.elapsed().as_millis() as u64,
            "rsync completed"
        );
        Ok(stats)
    }
}

/// Turn rsync's stderr into an operator-facing diagnostic.
fn describe_rsync_failure(stderr: &str, dest: &Target) -> String {
    let stderr = stderr.trim();
    if stderr.contains("Connection refused") || stderr.contains("Connection timed out") {
        format!("SSH connection failed: {}", stderr)
    } else if stderr.contains("No such file or directory") {
        format!("Path not found ({}): {}", dest, stderr)
    } else if stderr.contains("Permission denied") {
        format!("Permission denied: {}", stderr)
    } else {
        format!("rsync failed: {}", stderr)
    }
}

/// Parse transfer statistics from rsync --stats output.
fn parse_rsync_stats(output: &str) -> MirrorStats {
    let mut stats = MirrorStats::default();

    for line in output.lines() {
        let line = line.trim();

        // "Number of regular files transferred: N"
        if let Some(num_str) = line.strip_prefix("Number of regular files transferred:") {
            stats.files_transferred = num_str.trim().replace(',', "").parse().unwrap_or(0);
        }

        // "Total transferred file size: N bytes" (possibly "1.23K" with -h)
        if let Some(size_part) = line.strip_prefix("Total transferred file size:") {
            let size_str = size_part.split_whitespace().next().unwrap_or("0");
            stats.bytes_transferred = parse_size(size_str);
        }
    }

    stats
}

/// Parse "1,234", "1234" or human-readable "1.23K"/"4.5M"/"2G".
fn parse_size(raw: &str) -> u64 {
    let raw = raw.replace(',', "");
    let (number, multiplier) = match raw.chars().last() {
        Some('K') => (&raw[..raw.len() - 1], 1024f64),
        Some('M') => (&raw[..raw.len() - 1], 1024f64 * 1024.0),
        Some('G') => (&raw[..raw.len() - 1], 1024f64 * 1024.0 * 1024.0),
        _ => (raw.as_str(), 1f64),
    };
    number
        .parse::<f64>()
        .map(|n| (n * multiplier).round() as u64)
        .unwrap_or(0)
}
