//! In-memory executor simulating a set of hosts for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::exec::{CommandLine, ExecError, Executor};
use crate::sync::pattern::PatternSet;
use crate::sync::scan::{join_root, relative_to_root};
use crate::target::Target;

/// Content and modification time of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FakeFile {
    content: String,
    mtime: u64,
}

type Tree = BTreeMap<String, FakeFile>;

/// Answers `test -d`, `find`, `cat`, `rm` and `rsync` against per-host file maps.
#[derive(Default)]
pub(crate) struct FakeRemotes {
    trees: Mutex<HashMap<String, Tree>>,
    unreachable: HashSet<String>,
    failing: Vec<(String, String)>,
    log: Mutex<Vec<(bool, String, CommandLine)>>,
}

impl FakeRemotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, host: &str, path: &str, content: &str) -> Self {
        self.with_file_at(host, path, content, 0)
    }

    pub fn with_file_at(self, host: &str, path: &str, content: &str, mtime: u64) -> Self {
        self.trees
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .insert(
                path.to_string(),
                FakeFile {
                    content: content.to_string(),
                    mtime,
                },
            );
        self
    }

    pub fn with_unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    /// Make every mutating `program` run on `host` fail.
    pub fn with_failing(mut self, host: &str, program: &str) -> Self {
        self.failing.push((host.to_string(), program.to_string()));
        self
    }

    pub fn files(&self, host: &str) -> Vec<String> {
        self.trees
            .lock()
            .unwrap()
            .get(host)
            .map(|tree| tree.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_file(&self, host: &str, path: &str) -> bool {
        self.files(host).iter().any(|p| p == path)
    }

    pub fn content(&self, host: &str, path: &str) -> Option<String> {
        self.trees
            .lock()
            .unwrap()
            .get(host)
            .and_then(|tree| tree.get(path))
            .map(|file| file.content.clone())
    }

    /// Rendered mutating commands, in order, as `host: command`.
    pub fn applied(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(mutating, _, _)| *mutating)
            .map(|(_, host, cmd)| format!("{host}: {cmd}"))
            .collect()
    }

    /// Number of queries issued so far.
    pub fn query_count(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(mutating, _, _)| !*mutating)
            .count()
    }

    fn check_reachable(&self, host: &str) -> Result<(), ExecError> {
        if self.unreachable.contains(host) {
            return Err(ExecError::Unreachable {
                host: host.to_string(),
                detail: "ssh: connect to host: Connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn failed(host: &str, cmd: &CommandLine, stderr: &str) -> ExecError {
        ExecError::Failed {
            host: host.to_string(),
            command: cmd.render(),
            code: Some(1),
            stderr: stderr.to_string(),
        }
    }

    /// Paths on `host` under `root`. A directory exists when some file
    /// lives below it.
    fn under_root(&self, host: &str, root: &str) -> Vec<String> {
        let prefix = format!("{}/", root.trim_end_matches('/'));
        self.trees
            .lock()
            .unwrap()
            .get(host)
            .map(|tree| {
                tree.keys()
                    .filter(|path| path.starts_with(&prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn test_dir(&self, host: &str, cmd: &CommandLine) -> Result<String, ExecError> {
        let args = cmd.get_args();
        assert_eq!(args[0], "-d", "only `test -d` is simulated");
        if self.under_root(host, &args[1]).is_empty() {
            return Err(Self::failed(host, cmd, ""));
        }
        Ok(String::new())
    }

    fn find(&self, host: &str, cmd: &CommandLine) -> Result<String, ExecError> {
        let args = cmd.get_args();
        let name = args
            .iter()
            .position(|a| a == "-name")
            .map(|i| args[i + 1].clone());

        let under_root = self.under_root(host, &args[0]);
        if under_root.is_empty() {
            // GNU find under a UTF-8 locale.
            let stderr = format!("find: \u{2018}{}\u{2019}: No such file or directory", args[0]);
            return Err(Self::failed(host, cmd, &stderr));
        }

        Ok(under_root
            .into_iter()
            .filter(|path| match &name {
                Some(name) => path.rsplit('/').next() == Some(name.as_str()),
                None => true,
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Copy non-excluded files whose content differs. With `--update`, a
    /// destination file newer than its source is left alone.
    fn rsync(&self, cmd: &CommandLine) -> Result<String, ExecError> {
        let args = cmd.get_args();
        let update = args.iter().any(|a| a == "--update");
        let excludes: Vec<&str> = args
            .iter()
            .filter_map(|a| a.strip_prefix("--exclude="))
            .collect();
        let excluded = PatternSet::new(excludes);

        let src = Target::parse(&args[args.len() - 2]).unwrap();
        let dest = Target::parse(&args[args.len() - 1]).unwrap();
        self.check_reachable(src.host())?;
        self.check_reachable(dest.host())?;

        let mut trees = self.trees.lock().unwrap();
        let src_root = src.shell_root().trim_end_matches('/');
        let to_copy: Vec<(String, FakeFile)> = trees
            .get(src.host())
            .map(|tree| {
                tree.iter()
                    .filter(|(path, _)| path.starts_with(&format!("{src_root}/")))
                    .map(|(path, file)| {
                        (relative_to_root(src_root, path).to_string(), file.clone())
                    })
                    .filter(|(rel, _)| !excluded.matches(rel))
                    .collect()
            })
            .unwrap_or_default();

        let dest_tree = trees.entry(dest.host().to_string()).or_default();
        let mut transferred = 0;
        for (rel, file) in to_copy {
            let path = join_root(dest.shell_root(), &rel);
            let skip = match dest_tree.get(&path) {
                Some(existing) if update && existing.mtime > file.mtime => true,
                Some(existing) => existing.content == file.content,
                None => false,
            };
            if !skip {
                dest_tree.insert(path, file);
                transferred += 1;
            }
        }

        Ok(format!(
            "Number of files: {transferred}\nNumber of regular files transferred: {transferred}\n"
        ))
    }
}

impl Executor for FakeRemotes {
    fn query(&self, host: &str, cmd: &CommandLine) -> Result<String, ExecError> {
        self.log
            .lock()
            .unwrap()
            .push((false, host.to_string(), cmd.clone()));
        self.check_reachable(host)?;

        match cmd.program() {
            "test" => self.test_dir(host, cmd),
            "find" => self.find(host, cmd),
            "cat" => {
                let path = &cmd.get_args()[1];
                let trees = self.trees.lock().unwrap();
                trees
                    .get(host)
                    .and_then(|tree| tree.get(path))
                    .map(|file| file.content.clone())
                    .ok_or_else(|| Self::failed(host, cmd, "No such file or directory"))
            }
            other => panic!("unexpected query program {other}"),
        }
    }

    fn apply(&self, host: &str, cmd: &CommandLine) -> Result<String, ExecError> {
        self.log
            .lock()
            .unwrap()
            .push((true, host.to_string(), cmd.clone()));
        self.check_reachable(host)?;

        if self
            .failing
            .iter()
            .any(|(h, program)| h == host && program == cmd.program())
        {
            return Err(Self::failed(host, cmd, "simulated failure"));
        }

        match cmd.program() {
            "rm" => {
                let mut trees = self.trees.lock().unwrap();
                if let Some(tree) = trees.get_mut(host) {
                    for path in cmd.get_args().iter().skip_while(|a| *a != "--").skip(1) {
                        tree.remove(path);
                    }
                }
                Ok(String::new())
            }
            "rsync" => self.rsync(cmd),
            other => panic!("unexpected apply program {other}"),
        }
    }
}
