//! Command line surface.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::exec::OutputDecoder;
use crate::sync::DEFAULT_MARKER_NAME;
use crate::target::Target;

#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorWhen {
    #[default]
    Auto,
    Always,
    Never,
}

/// starsync - two-way sync of a local directory with remote copies
#[derive(Parser, Debug)]
#[command(name = "starsync")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Targets are local paths or host:path. \
Rules are read from .sync.conf (only <host>:<pattern> / ignore <pattern>).")]
pub struct Cli {
    /// Local directory acting as the hub
    #[arg(value_name = "SRC")]
    pub source: Target,

    /// Remote copies to sync with (host:path)
    #[arg(value_name = "DEST", required = true)]
    pub dests: Vec<Target>,

    /// Show what would run without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Sync rules file [default: .sync.conf]
    #[arg(short, long, env = "STARSYNC_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Name of per-directory ignore files
    #[arg(long, default_value = DEFAULT_MARKER_NAME, value_name = "NAME")]
    pub marker: String,

    /// Encoding of command output (e.g. utf-8, shift_jis, euc-jp)
    #[arg(long, default_value = "utf-8", value_name = "LABEL", value_parser = parse_coding)]
    pub coding: OutputDecoder,

    /// Color output mode
    #[arg(long, value_enum, default_value_t = ColorWhen::Auto)]
    pub color: ColorWhen,

    /// Disable colored output (same as --color never)
    #[arg(long)]
    pub no_color: bool,

    /// SSH connection timeout in seconds
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    pub connect_timeout: u64,

    /// rsync I/O timeout in seconds (0 = none)
    #[arg(long, default_value_t = 300, value_name = "SECS")]
    pub timeout: u64,

    /// Stop at the first failed purge instead of continuing
    #[arg(long)]
    pub strict_purge: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only print warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Config file to load and whether it was named explicitly.
    pub fn config_path(&self) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        }
    }

    /// Whether human output should be colored.
    pub fn color_enabled(&self) -> bool {
        if self.no_color {
            return false;
        }
        match self.color {
            ColorWhen::Always => true,
            ColorWhen::Never => false,
            ColorWhen::Auto => {
                std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
            }
        }
    }

    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn parse_coding(label: &str) -> Result<OutputDecoder, String> {
    OutputDecoder::for_label(label).ok_or_else(|| format!("unknown encoding '{label}'"))
}
