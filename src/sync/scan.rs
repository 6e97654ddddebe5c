//! Read-only queries against a target's tree.
//!
//! Local and remote targets use the same logical queries; only the transport
//! differs, and that is the executor's business.

use crate::exec::{CommandLine, ExecError, Executor};
use crate::target::Target;

/// Issues `test`/`find`/`cat` queries through an [`Executor`].
pub struct TreeScanner<'a> {
    exec: &'a dyn Executor,
}

impl<'a> TreeScanner<'a> {
    pub fn new(exec: &'a dyn Executor) -> Self {
        Self { exec }
    }

    /// Paths (as printed by `find`, i.e. prefixed with the root) of every
    /// regular file named `name` under the target.
    pub fn find_named(&self, target: &Target, name: &str) -> Result<Vec<String>, ExecError> {
        if !self.root_exists(target)? {
            return Ok(Vec::new());
        }
        let cmd = find_files(target.shell_root()).args(["-name", name]);
        let out = self.exec.query(target.host(), &cmd)?;
        Ok(non_empty_lines(&out))
    }

    /// Every regular file under the target, relative to its root, sorted.
    ///
    /// A root that does not exist yet (first sync to a new destination) is
    /// an empty tree.
    pub fn list_files(&self, target: &Target) -> Result<Vec<String>, ExecError> {
        if !self.root_exists(target)? {
            return Ok(Vec::new());
        }
        let root = target.shell_root();
        let out = self.exec.query(target.host(), &find_files(root))?;

        let mut files: Vec<String> = non_empty_lines(&out)
            .iter()
            .map(|path| relative_to_root(root, path).to_string())
            .filter(|rel| !rel.is_empty())
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Content of a file on the target's host.
    pub fn read_file(&self, target: &Target, path: &str) -> Result<String, ExecError> {
        let cmd = CommandLine::new("cat").arg("--").arg(path);
        self.exec.query(target.host(), &cmd)
    }

    /// Whether the target's root is a directory, judged by the exit status
    /// of `test -d` rather than by any message text.
    pub fn root_exists(&self, target: &Target) -> Result<bool, ExecError> {
        // No `--`: three-argument `test -d -- x` is a string comparison.
        let cmd = CommandLine::new("test").args(["-d", target.shell_root()]);
        match self.exec.query(target.host(), &cmd) {
            Ok(_) => Ok(true),
            Err(ExecError::Failed { code: Some(1), .. }) => {
                tracing::debug!(endpoint = %target, "root does not exist yet");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

fn find_files(root: &str) -> CommandLine {
    CommandLine::new("find").args([root, "-type", "f"])
}

fn non_empty_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Strip `root` from `path` together with any separators around the rest.
///
/// `relative_to_root("/proj", "/proj/sub")` is `"sub"`,
/// `relative_to_root("/proj", "/proj")` is `""`.
pub fn relative_to_root<'p>(root: &str, path: &'p str) -> &'p str {
    let root = root.trim_end_matches('/');
    path.strip_prefix(root).unwrap_or(path).trim_matches('/')
}

/// Join a root-relative path back onto `root`.
pub fn join_root(root: &str, rel: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        format!("/{rel}")
    } else {
        format!("{root}/{rel}")
    }
}
