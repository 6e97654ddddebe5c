//! Human-facing output on stdout. Diagnostics go through `tracing` on stderr.

use colored::Colorize;

use crate::exec::RecordedCommand;
use crate::sync::{OperationResult, SyncOperation, SyncReport};

/// Announce an operation before it runs.
pub fn print_job(op: &SyncOperation) {
    println!("{} {}", "=>".blue().bold(), op);
}

/// List the mutating commands a dry run skipped.
pub fn print_dry_run(recorded: &[RecordedCommand]) {
    println!();
    println!(
        "{} {} command(s) would run:",
        "DRY RUN".yellow().bold(),
        recorded.len()
    );
    for command in recorded {
        println!("   {}", command.to_string().dimmed());
    }
}

/// Per-operation results plus totals, or what completed before the run stopped.
pub fn print_summary(report: &SyncReport) {
    println!();
    if let Some(err) = &report.aborted {
        println!("{} {}", "STOPPED".red().bold(), err);
        let completed: Vec<&OperationResult> = report.completed().collect();
        if completed.is_empty() {
            println!("   nothing completed before the failure");
        } else {
            println!("   completed before the failure:");
            for result in completed {
                print_result(result);
            }
        }
        return;
    }

    for result in &report.results {
        print_result(result);
    }
    let status = if report.all_succeeded() {
        "DONE".green().bold()
    } else {
        "DONE WITH ERRORS".yellow().bold()
    };
    println!(
        "{} {} file(s) copied ({} bytes), {} purged in {:.1}s",
        status,
        report.total_files(),
        report.total_bytes(),
        report.files_purged(),
        report.total_duration_ms as f64 / 1000.0
    );
}

fn print_result(result: &OperationResult) {
    if result.success {
        println!(
            "   {} {} ({} files, {}ms)",
            "OK".green(),
            result.description,
            result.files,
            result.duration_ms
        );
    } else {
        println!(
            "   {} {}: {}",
            "FAILED".red(),
            result.description,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}
