//! Star-topology two-way sync between a local hub and remote targets.
//!
//! This module computes and runs the operations that bring every target to
//! the same content, honouring per-directory ignore markers and per-host
//! ownership rules.
//!
//! # Architecture
//!
//! - [`scan`]: tree queries (`find`, `cat`) issued through an [`Executor`](crate::exec::Executor)
//! - [`ignore`]: `.syncignore` collection and root-relative rewriting
//! - [`pattern`]: rsync-style matching of exclude patterns against relative paths
//! - [`plan`]: the resolver producing mirror and purge operations
//! - [`mirror`]: rsync invocation for one directional leg
//! - [`engine`]: ordered execution with a [`SyncReport`] for the operator
//!
//! # Safety
//!
//! Mirror legs never delete. The only deletions are purges of files that an
//! `only` rule assigns to another host, and they run after every leg has
//! completed.
//!
//! # Example
//!
//! ```rust,ignore
//! use starsync::config::SyncConfig;
//! use starsync::exec::{OutputDecoder, SshOptions, SystemExecutor};
//! use starsync::sync::{RsyncMirror, RsyncOptions, SyncEngine, SyncOptions};
//! use starsync::target::Target;
//!
//! let config = SyncConfig::load_or_default(".sync.conf".as_ref())?;
//! let exec = SystemExecutor::new(SshOptions::default(), OutputDecoder::default());
//! let mirror = RsyncMirror::new(RsyncOptions::new("rsync", SshOptions::default()));
//! let engine = SyncEngine::new(&exec, &config, mirror, SyncOptions::default());
//!
//! let report = engine.run(&Target::local("/proj"), &[Target::parse("hostA:/proj")?])?;
//! println!("{} files copied, {} purged", report.total_files(), report.files_purged());
//! ```

pub mod engine;
pub mod error;
pub mod ignore;
pub mod mirror;
pub mod pattern;
pub mod plan;
pub mod scan;

pub use engine::{OperationKind, OperationResult, PurgePolicy, SyncEngine, SyncOptions, SyncReport};
pub use error::SyncError;
pub use ignore::{DEFAULT_MARKER_NAME, IgnoreCollector};
pub use mirror::{MirrorStats, RsyncMirror, RsyncOptions, locate_rsync};
pub use plan::{MirrorOp, PurgeOp, Resolver, SyncOperation, SyncPlan};
