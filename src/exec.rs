//! Command execution on the local machine or a remote host.
//!
//! Commands are built as discrete argument lists ([`CommandLine`]) and are
//! never handed to a local shell. For remote hosts the argument list is
//! quoted word by word with `shell-words` before it is passed to `ssh`, since
//! the remote side always joins its arguments into one shell command.
//!
//! Every command is either a *query* (read-only: `find`, `cat`) or an
//! *apply* (mutating: `rsync`, `rm`). Dry runs swap in a [`DryRunExecutor`]
//! that still answers queries but only records applies, so a dry run plans
//! exactly what a real run would.

use std::fmt;
use std::process::{Command, Output, Stdio};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::target::LOCAL_HOST;

/// Exit status `ssh` uses for connection and authentication failures.
const SSH_UNREACHABLE_STATUS: i32 = 255;

/// Errors that can occur while running a command.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Host {host} is unreachable: {detail}")]
    Unreachable { host: String, detail: String },

    #[error("Command `{command}` failed on {host} (exit code {code:?}): {stderr}")]
    Failed {
        host: String,
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl ExecError {
    /// Diagnostic text reported by the failing tool, if any.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Spawn { source, .. } => source.to_string(),
            Self::Unreachable { detail, .. } => detail.clone(),
            Self::Failed { stderr, .. } => stderr.clone(),
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Single shell-safe string; used for logging and as the remote command.
    pub fn render(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Runs commands on behalf of the sync engine.
///
/// `host` is either [`LOCAL_HOST`] or a remote-shell host identifier.
pub trait Executor {
    /// Run a read-only command and return its output.
    fn query(&self, host: &str, command: &CommandLine) -> Result<String, ExecError>;

    /// Run a command that changes a file tree and return its output.
    fn apply(&self, host: &str, command: &CommandLine) -> Result<String, ExecError>;
}

/// Decodes raw command output into text.
#[derive(Debug, Clone, Copy)]
pub struct OutputDecoder {
    encoding: &'static encoding_rs::Encoding,
}

impl OutputDecoder {
    /// Look up an encoding by WHATWG label (`utf-8`, `euc-jp`, `shift_jis`, ...).
    pub fn for_label(label: &str) -> Option<Self> {
        encoding_rs::Encoding::for_label(label.trim().as_bytes()).map(|encoding| Self { encoding })
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _, had_errors) = self.encoding.decode(bytes);
        if had_errors {
            tracing::debug!(encoding = self.name(), "output contained undecodable bytes");
        }
        text.into_owned()
    }
}

impl Default for OutputDecoder {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
        }
    }
}

/// Options for the `ssh` remote shell.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub program: String,
    /// Connection timeout in seconds.
    pub connect_timeout: u64,
}

impl SshOptions {
    fn option_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout),
        ]
    }

    /// Remote shell command line for rsync's `-e` option.
    pub fn rsync_shell(&self) -> String {
        shell_words::join(std::iter::once(self.program.clone()).chain(self.option_args()))
    }
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            connect_timeout: 10,
        }
    }
}

/// Executor that really runs commands.
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor {
    ssh: SshOptions,
    decoder: OutputDecoder,
}

impl SystemExecutor {
    pub fn new(ssh: SshOptions, decoder: OutputDecoder) -> Self {
        Self { ssh, decoder }
    }

    pub fn ssh(&self) -> &SshOptions {
        &self.ssh
    }

    /// Run `command` on `host`, locally when `host` is [`LOCAL_HOST`].
    pub fn execute(&self, host: &str, command: &CommandLine) -> Result<String, ExecError> {
        if host == LOCAL_HOST {
            self.execute_local(command)
        } else {
            self.execute_remote(host, command)
        }
    }

    /// Run `command` on this machine without a shell.
    pub fn execute_local(&self, command: &CommandLine) -> Result<String, ExecError> {
        let output = Command::new(command.program())
            .args(command.get_args())
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecError::Spawn {
                program: command.program().to_string(),
                source,
            })?;

        self.finish(LOCAL_HOST, command, output)
    }

    /// Run `command` on `host` through the remote shell.
    pub fn execute_remote(&self, host: &str, command: &CommandLine) -> Result<String, ExecError> {
        let output = Command::new(&self.ssh.program)
            .args(self.ssh.option_args())
            .arg("--")
            .arg(host)
            .arg(command.render())
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecError::Spawn {
                program: self.ssh.program.clone(),
                source,
            })?;

        if output.status.code() == Some(SSH_UNREACHABLE_STATUS) {
            let stderr = self.decoder.decode(&output.stderr);
            return Err(ExecError::Unreachable {
                host: host.to_string(),
                detail: stderr.trim().to_string(),
            });
        }

        self.finish(host, command, output)
    }

    fn finish(
        &self,
        host: &str,
        command: &CommandLine,
        output: Output,
    ) -> Result<String, ExecError> {
        if !output.status.success() {
            let stderr = self.decoder.decode(&output.stderr);
            return Err(ExecError::Failed {
                host: host.to_string(),
                command: command.render(),
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(self.decoder.decode(&output.stdout))
    }
}

impl Executor for SystemExecutor {
    fn query(&self, host: &str, command: &CommandLine) -> Result<String, ExecError> {
        tracing::debug!(host = %host, command = %command, "query");
        self.execute(host, command)
    }

    fn apply(&self, host: &str, command: &CommandLine) -> Result<String, ExecError> {
        tracing::info!(host = %host, command = %command, "exec");
        self.execute(host, command)
    }
}

/// A mutating command captured by a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub host: String,
    pub command: CommandLine,
}

impl fmt::Display for RecordedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == LOCAL_HOST {
            write!(f, "{}", self.command)
        } else {
            write!(f, "[{}] {}", self.host, self.command)
        }
    }
}

/// Executor for dry runs: queries go to `inner`, applies are recorded and
/// answered with empty output.
pub struct DryRunExecutor<E> {
    inner: E,
    recorded: Mutex<Vec<RecordedCommand>>,
}

impl<E: Executor> DryRunExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Commands that would have been run, in order.
    pub fn recorded(&self) -> Vec<RecordedCommand> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<E: Executor> Executor for DryRunExecutor<E> {
    fn query(&self, host: &str, command: &CommandLine) -> Result<String, ExecError> {
        self.inner.query(host, command)
    }

    fn apply(&self, host: &str, command: &CommandLine) -> Result<String, ExecError> {
        tracing::info!(host = %host, command = %command, "dry-run: skipped");
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCommand {
                host: host.to_string(),
                command: command.clone(),
            });
        Ok(String::new())
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn query(&self, host: &str, command: &CommandLine) -> Result<String, ExecError> {
        (**self).query(host, command)
    }

    fn apply(&self, host: &str, command: &CommandLine) -> Result<String, ExecError> {
        (**self).apply(host, command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_quotes_arguments() {
        let cmd = CommandLine::new("find")
            .arg("/home/user/my proj")
            .args(["-type", "f", "-name", "*.txt"]);
        assert_eq!(cmd.render(), "find '/home/user/my proj' -type f -name '*.txt'");
    }

    #[test]
    fn test_render_neutralizes_metacharacters() {
        let cmd = CommandLine::new("cat").arg("--").arg("x; rm -rf /");
        assert_eq!(cmd.render(), "cat -- 'x; rm -rf /'");
    }

    #[test]
    fn test_rsync_shell() {
        let ssh = SshOptions {
            program: "ssh".into(),
            connect_timeout: 7,
        };
        assert_eq!(ssh.rsync_shell(), "ssh -o BatchMode=yes -o ConnectTimeout=7");
    }

    #[test]
    fn test_decoder_labels() {
        assert_eq!(OutputDecoder::default().name(), "UTF-8");
        assert_eq!(OutputDecoder::for_label("euc-jp").unwrap().name(), "EUC-JP");
        assert_eq!(OutputDecoder::for_label(" Shift_JIS ").unwrap().name(), "Shift_JIS");
        assert!(OutputDecoder::for_label("no-such-coding").is_none());
    }

    #[test]
    fn test_decoder_decodes_shift_jis() {
        let decoder = OutputDecoder::for_label("shift_jis").unwrap();
        // "テスト" in Shift_JIS
        let bytes = [0x83, 0x65, 0x83, 0x58, 0x83, 0x67];
        assert_eq!(decoder.decode(&bytes), "テスト");
    }

    #[test]
    fn test_local_execution_captures_stdout() {
        let exec = SystemExecutor::default();
        let out = exec
            .execute(LOCAL_HOST, &CommandLine::new("echo").arg("hello world"))
            .unwrap();
        assert_eq!(out.trim(), "hello world");
    }

    #[test]
    fn test_local_failure_is_distinct_from_empty_output() {
        let exec = SystemExecutor::default();
        let empty = exec.execute(LOCAL_HOST, &CommandLine::new("true")).unwrap();
        assert!(empty.is_empty());

        let err = exec
            .execute(LOCAL_HOST, &CommandLine::new("false"))
            .unwrap_err();
        assert!(matches!(err, ExecError::Failed { code: Some(1), .. }));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let exec = SystemExecutor::default();
        let err = exec
            .execute(LOCAL_HOST, &CommandLine::new("starsync-no-such-binary"))
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn test_dry_run_records_applies_and_forwards_queries() {
        let dry = DryRunExecutor::new(SystemExecutor::default());

        let out = dry
            .query(LOCAL_HOST, &CommandLine::new("echo").arg("seen"))
            .unwrap();
        assert_eq!(out.trim(), "seen");

        let rm = CommandLine::new("rm").args(["-f", "--", "/nonexistent/file"]);
        assert_eq!(dry.apply("hostA", &rm).unwrap(), "");

        let recorded = dry.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].host, "hostA");
        assert_eq!(recorded[0].to_string(), "[hostA] rm -f -- /nonexistent/file");
    }

    #[test]
    fn test_exec_error_diagnostic() {
        let err = ExecError::Failed {
            host: "local".into(),
            command: "rsync".into(),
            code: Some(23),
            stderr: "some files vanished".into(),
        };
        assert_eq!(err.diagnostic(), "some files vanished");
        assert!(!err.is_unreachable());
    }
}
