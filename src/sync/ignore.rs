//! Collects per-directory ignore marker files (`.syncignore`) from a target.
//!
//! Each marker lists patterns relative to its own directory. They are
//! rewritten relative to the sync root so that the exclusions handed to
//! rsync stay correct whatever depth the marker sits at.

use std::path::Path;

use crate::exec::{ExecError, Executor};
use crate::target::Target;

use super::scan::{TreeScanner, relative_to_root};

/// Default marker file name.
pub const DEFAULT_MARKER_NAME: &str = ".syncignore";

/// Finds marker files under a target and turns them into root-relative
/// exclude patterns.
pub struct IgnoreCollector<'a> {
    scanner: TreeScanner<'a>,
    marker_name: &'a str,
}

impl<'a> IgnoreCollector<'a> {
    pub fn new(exec: &'a dyn Executor, marker_name: &'a str) -> Self {
        Self {
            scanner: TreeScanner::new(exec),
            marker_name,
        }
    }

    /// Effective patterns from every marker file under `target`, in discovery
    /// order.
    ///
    /// Issues a root check and one listing query, plus one read per marker
    /// file. Any failed
    /// query is returned as is; the caller decides what an unreachable
    /// target means for the run.
    pub fn collect(&self, target: &Target) -> Result<Vec<String>, ExecError> {
        let root = target.shell_root();
        let markers = self.scanner.find_named(target, self.marker_name)?;

        let mut patterns = Vec::new();
        for marker in &markers {
            let content = self.scanner.read_file(target, marker)?;
            let dir = Path::new(marker)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let prefix = relative_to_root(root, &dir);

            let before = patterns.len();
            patterns.extend(parse_marker(&content).map(|p| rewrite(prefix, p)));
            tracing::debug!(
                endpoint = %target,
                marker = %marker,
                patterns = patterns.len() - before,
                "read ignore marker"
            );
        }

        Ok(patterns)
    }
}

/// Patterns listed in a marker file: one per line, trimmed, blank lines and
/// `#` comments dropped.
pub fn parse_marker(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Prefix `pattern` with the marker's directory relative to the root.
///
/// The result is left unanchored on purpose: like rsync's own unanchored
/// patterns with a slash, `sub/x` also matches a deeper `a/sub/x`.
pub fn rewrite(prefix: &str, pattern: &str) -> String {
    if prefix.is_empty() {
        pattern.to_string()
    } else {
        format!("{}/{}", prefix, pattern.trim_start_matches('/'))
    }
}
