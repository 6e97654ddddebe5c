pub mod cli;
pub mod config;
pub mod exec;
pub mod output;
pub mod sync;
pub mod target;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::{Context, Result};

use cli::Cli;
use config::{ConfigError, SyncConfig};
use exec::{DryRunExecutor, Executor, SshOptions, SystemExecutor};
use sync::{
    PurgePolicy, RsyncMirror, RsyncOptions, SyncEngine, SyncError, SyncOptions, SyncReport,
    locate_rsync,
};
use target::TargetParseError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const UNEXPECTED: u8 = 1;
    /// Bad arguments, targets, config or topology (clap uses 2 as well).
    pub const USAGE: u8 = 2;
    pub const UNREACHABLE: u8 = 3;
    pub const MIRROR_FAILED: u8 = 4;
    pub const PURGE_FAILED: u8 = 5;
}

/// Library entrypoint: load rules, run (or preview) the sync and print the
/// report. Returns the exit code for a run that got going; errors that
/// prevented it from starting are returned as is.
pub fn run(cli: &Cli) -> Result<u8> {
    let config = load_config(cli)?;

    let ssh = SshOptions {
        connect_timeout: cli.connect_timeout,
        ..Default::default()
    };
    let system = SystemExecutor::new(ssh.clone(), cli.coding);

    let rsync = match locate_rsync() {
        Ok(path) => path,
        Err(err) if cli.dry_run => {
            tracing::warn!(error = %err, "continuing dry run without rsync");
            "rsync".to_string()
        }
        Err(err) => return Err(err.into()),
    };
    let mirror = RsyncMirror::new(RsyncOptions::new(rsync, ssh).with_transfer_timeout(cli.timeout));

    let options = SyncOptions {
        marker_name: cli.marker.clone(),
        purge_policy: if cli.strict_purge {
            PurgePolicy::Abort
        } else {
            PurgePolicy::Continue
        },
        ..Default::default()
    };

    if cli.dry_run {
        let dry = DryRunExecutor::new(&system);
        let report = execute(cli, &dry, &config, mirror, options)?;
        output::print_dry_run(&dry.recorded());
        Ok(report_exit_code(&report))
    } else {
        let report = execute(cli, &system, &config, mirror, options)?;
        Ok(report_exit_code(&report))
    }
}

fn execute(
    cli: &Cli,
    exec: &dyn Executor,
    config: &SyncConfig,
    mirror: RsyncMirror,
    options: SyncOptions,
) -> Result<SyncReport> {
    let engine = SyncEngine::new(exec, config, mirror, options);
    let report = engine.run_with(&cli.source, &cli.dests, &mut output::print_job)?;
    output::print_summary(&report);
    Ok(report)
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let (path, explicit) = cli.config_path();
    let config = if explicit {
        SyncConfig::load(&path)
    } else {
        SyncConfig::load_or_default(&path)
    };
    config.with_context(|| format!("Invalid sync rules in {}", path.display()))
}

/// Exit code for a run that produced a report.
pub fn report_exit_code(report: &SyncReport) -> u8 {
    match &report.aborted {
        Some(err) => sync_error_code(err),
        None if report.purge_failures() > 0 => exit_code::PURGE_FAILED,
        None => exit_code::SUCCESS,
    }
}

/// One-line description of an error and its causes, skipping causes whose
/// text the outer message already carries.
pub fn describe_error(err: &anyhow::Error) -> String {
    let mut message = err.to_string();
    for cause in err.chain().skip(1) {
        let cause = cause.to_string();
        if !message.contains(&cause) {
            message.push_str(": ");
            message.push_str(&cause);
        }
    }
    message
}

/// Exit code for an error that stopped the program.
pub fn error_exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<SyncError>() {
            return sync_error_code(err);
        }
        if cause.is::<ConfigError>() || cause.is::<TargetParseError>() {
            return exit_code::USAGE;
        }
    }
    exit_code::UNEXPECTED
}

fn sync_error_code(err: &SyncError) -> u8 {
    match err {
        SyncError::Unreachable { .. } => exit_code::UNREACHABLE,
        SyncError::MirrorFailed { .. } => exit_code::MIRROR_FAILED,
        SyncError::PurgeFailed { .. } => exit_code::PURGE_FAILED,
        SyncError::RsyncMissing => exit_code::UNEXPECTED,
        _ if err.is_plan_error() => exit_code::USAGE,
        _ => exit_code::UNEXPECTED,
    }
}
