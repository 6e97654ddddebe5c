//! Sync endpoints.
//!
//! A [`Target`] names a directory either on this machine or on a host reachable
//! through the remote shell. The canonical string form is the plain path for
//! local targets and `host:path` otherwise, which is also what rsync expects.

use std::fmt;

use thiserror::Error;

/// Host identifier reserved for the machine running the tool.
pub const LOCAL_HOST: &str = "local";

/// Errors produced while parsing a target spec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetParseError {
    #[error("Target spec is empty")]
    Empty,

    #[error("Target '{0}' has an empty path")]
    EmptyPath(String),

    #[error("Target '{0}' has an empty host")]
    EmptyHost(String),

    #[error("Target '{spec}' has an invalid host '{host}'")]
    InvalidHost { spec: String, host: String },
}

/// A directory taking part in a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    host: String,
    path: String,
}

impl Target {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            host: LOCAL_HOST.to_string(),
            path: path.into(),
        }
    }

    pub fn remote(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    /// Parse `host:path` or a bare local path.
    ///
    /// A colon only introduces a host when everything before it looks like a
    /// host name (no `/`), so `./a:b` stays a local path. `local:path` is
    /// accepted as an explicit local target.
    pub fn parse(spec: &str) -> Result<Self, TargetParseError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(TargetParseError::Empty);
        }

        let Some((host, path)) = spec.split_once(':') else {
            return Ok(Self::local(spec));
        };

        if host.contains('/') {
            return Ok(Self::local(spec));
        }
        if host.is_empty() {
            return Err(TargetParseError::EmptyHost(spec.to_string()));
        }
        if !is_valid_host(host) {
            return Err(TargetParseError::InvalidHost {
                spec: spec.to_string(),
                host: host.to_string(),
            });
        }
        if path.is_empty() {
            return Err(TargetParseError::EmptyPath(spec.to_string()));
        }

        if host == LOCAL_HOST {
            Ok(Self::local(path))
        } else {
            Ok(Self::remote(host, path))
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_local(&self) -> bool {
        self.host == LOCAL_HOST
    }

    /// Root path as it must be passed to commands run on the target's host.
    ///
    /// Remote commands start in the login directory, so `~/proj` becomes
    /// `proj` and `~` becomes `.`; quoting would otherwise suppress the
    /// remote shell's tilde expansion.
    pub fn shell_root(&self) -> &str {
        if self.is_local() {
            return &self.path;
        }
        match self.path.as_str() {
            "~" | "~/" => ".",
            p => p.strip_prefix("~/").unwrap_or(p),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}:{}", self.host, self.path)
        }
    }
}

impl std::str::FromStr for Target {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Host identifiers are single shell words: no whitespace, no quoting characters.
pub(crate) fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && !host.starts_with('-')
        && host
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '\'' | '"' | '`' | '$' | '\\' | ';'))
}
