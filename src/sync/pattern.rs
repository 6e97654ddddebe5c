//! rsync-style path patterns.
//!
//! Used to enumerate the files an ownership rule covers. Matching follows the
//! rules rsync applies to `--exclude` so that what gets purged is what the
//! mirror legs would have skipped:
//!
//! - a leading `/` anchors the pattern at the sync root;
//! - a trailing `/` only matches directories;
//! - a pattern without `/` matches any single path component;
//! - a pattern with `/` matches a trailing run of components (or the whole
//!   path when anchored);
//! - a pattern that matches a directory covers every file below it.
//!
//! Wildcards are shell globs (`*`, `?`, `[...]`, `**`); `*` never crosses `/`.

use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Matcher {
    Glob(Pattern),
    // Not a valid glob (e.g. an unclosed `[`); compared literally.
    Literal(String),
}

impl Matcher {
    fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Glob(pattern) => pattern.matches_with(candidate, MATCH_OPTIONS),
            Self::Literal(text) => text == candidate,
        }
    }
}

/// A single exclude pattern.
#[derive(Debug, Clone)]
pub struct ExcludePattern {
    raw: String,
    matcher: Matcher,
    anchored: bool,
    dir_only: bool,
    single_component: bool,
}

impl ExcludePattern {
    pub fn new(raw: &str) -> Self {
        let anchored = raw.starts_with('/');
        let dir_only = raw.len() > 1 && raw.ends_with('/');
        let body = raw.trim_start_matches('/').trim_end_matches('/');

        let matcher = match Pattern::new(body) {
            Ok(pattern) => Matcher::Glob(pattern),
            Err(err) => {
                tracing::debug!(pattern = %raw, error = %err, "not a glob, matching literally");
                Matcher::Literal(body.to_string())
            }
        };

        Self {
            raw: raw.to_string(),
            matcher,
            anchored,
            dir_only,
            single_component: !anchored && !body.contains('/'),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the file at `rel_path` (relative to the sync root) is covered.
    pub fn matches(&self, rel_path: &str) -> bool {
        let parts: Vec<&str> = rel_path.split('/').filter(|p| !p.is_empty()).collect();

        (1..=parts.len()).any(|end| {
            let is_file = end == parts.len();
            !(self.dir_only && is_file) && self.matches_entry(&parts[..end])
        })
    }

    fn matches_entry(&self, parts: &[&str]) -> bool {
        if self.single_component {
            return parts.last().is_some_and(|name| self.matcher.matches(name));
        }
        if self.anchored {
            return self.matcher.matches(&parts.join("/"));
        }
        (0..parts.len()).any(|start| self.matcher.matches(&parts[start..].join("/")))
    }
}

/// A list of patterns; a path is covered if any of them matches.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<ExcludePattern>,
}

impl PatternSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| ExcludePattern::new(p.as_ref()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(rel_path))
    }
}
