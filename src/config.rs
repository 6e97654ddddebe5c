//! Project sync configuration (`.sync.conf`).
//!
//! The file is line oriented:
//!
//! ```text
//! # comment
//! only local:secrets/*
//! only build-box:target/
//! ignore *.tmp
//! ```
//!
//! `only <host>:<pattern>` declares that files matching `pattern` are managed
//! exclusively by `host` and are purged from every other participant.
//! `ignore <pattern>` excludes matching paths from every mirror operation.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::target::{LOCAL_HOST, is_valid_host};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".sync.conf";

/// Errors that can occur while loading the sync configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line_no}: unknown keyword '{keyword}' in '{line}'")]
    UnknownKeyword {
        line_no: usize,
        keyword: String,
        line: String,
    },

    #[error("line {line_no}: '{keyword}' needs an argument in '{line}'")]
    MissingArgument {
        line_no: usize,
        keyword: String,
        line: String,
    },

    #[error("line {line_no}: malformed only rule '{line}' (expected only <host>:<pattern>)")]
    MalformedOnly { line_no: usize, line: String },

    #[error("line {line_no}: invalid host '{host}' in '{line}'")]
    InvalidHost {
        line_no: usize,
        host: String,
        line: String,
    },
}

/// Ownership rule: files matching `pattern` are managed only by `host`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OnlyRule {
    pub host: String,
    pub pattern: String,
}

impl OnlyRule {
    pub fn new(host: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            pattern: pattern.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.host == LOCAL_HOST
    }
}

/// Parsed sync configuration.
///
/// Both rule lists behave as sets: duplicates are dropped and the order of
/// first appearance in the file is kept so every run sees the same sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    only: Vec<OnlyRule>,
    ignore: Vec<String>,
}

impl SyncConfig {
    pub fn new(
        only: impl IntoIterator<Item = OnlyRule>,
        ignore: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut config = Self::default();
        for rule in only {
            config.add_only(rule);
        }
        for pattern in ignore {
            config.add_ignore(pattern);
        }
        config
    }

    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        tracing::debug!(
            path = %path.display(),
            only = config.only.len(),
            ignore = config.ignore.len(),
            "loaded sync config"
        );
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to an empty config.
    ///
    /// Used for the default location only; an explicitly requested file must
    /// exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "no sync config found, using empty rules");
            Ok(Self::default())
        }
    }

    /// Parse configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (keyword, rest) = match line.split_once(char::is_whitespace) {
                Some((keyword, rest)) => (keyword, rest.trim()),
                None => (line, ""),
            };

            match keyword {
                "only" | "ignore" if rest.is_empty() => {
                    return Err(ConfigError::MissingArgument {
                        line_no,
                        keyword: keyword.to_string(),
                        line: line.to_string(),
                    });
                }
                "only" => config.add_only(parse_only(line_no, line, rest)?),
                "ignore" => config.add_ignore(rest.to_string()),
                other => {
                    return Err(ConfigError::UnknownKeyword {
                        line_no,
                        keyword: other.to_string(),
                        line: line.to_string(),
                    });
                }
            }
        }

        Ok(config)
    }

    pub fn only(&self) -> &[OnlyRule] {
        &self.only
    }

    pub fn ignore(&self) -> &[String] {
        &self.ignore
    }

    pub fn is_empty(&self) -> bool {
        self.only.is_empty() && self.ignore.is_empty()
    }

    /// Patterns owned by `host`.
    pub fn owned_by<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.only
            .iter()
            .filter(move |rule| rule.host == host)
            .map(|rule| rule.pattern.as_str())
    }

    /// Patterns owned by any host other than `host`.
    pub fn owned_elsewhere<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.only
            .iter()
            .filter(move |rule| rule.host != host)
            .map(|rule| rule.pattern.as_str())
    }

    /// Hosts named by `only` rules.
    pub fn owner_hosts(&self) -> impl Iterator<Item = &str> {
        let mut seen: Vec<&str> = Vec::new();
        self.only.iter().filter_map(move |rule| {
            if seen.contains(&rule.host.as_str()) {
                None
            } else {
                seen.push(rule.host.as_str());
                Some(rule.host.as_str())
            }
        })
    }

    fn add_only(&mut self, rule: OnlyRule) {
        if !self.only.contains(&rule) {
            self.only.push(rule);
        }
    }

    fn add_ignore(&mut self, pattern: String) {
        if !self.ignore.contains(&pattern) {
            self.ignore.push(pattern);
        }
    }
}

fn parse_only(line_no: usize, line: &str, rest: &str) -> Result<OnlyRule, ConfigError> {
    let malformed = || ConfigError::MalformedOnly {
        line_no,
        line: line.to_string(),
    };

    let (host, pattern) = match rest.split_once(':') {
        Some((host, pattern)) if !pattern.contains(':') => (host.trim(), pattern.trim()),
        _ => return Err(malformed()),
    };
    if pattern.is_empty() {
        return Err(malformed());
    }
    if !is_valid_host(host) {
        return Err(ConfigError::InvalidHost {
            line_no,
            host: host.to_string(),
            line: line.to_string(),
        });
    }

    Ok(OnlyRule::new(host, pattern))
}
