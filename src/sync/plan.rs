//! Sync resolver: decides which legs run in which direction and what gets
//! purged.
//!
//! The local source acts as a hub. Every run is split in two phases:
//!
//! 1. **Mirror**: gather then broadcast. Each destination is pulled into the
//!    hub, then the hub is pushed to each destination. A pull always
//!    precedes the push to the same destination, so remote-only additions are
//!    captured before the hub's merged state goes out. Legs are newer-wins and
//!    never delete.
//! 2. **Purge**: once every leg has completed, each participant loses the
//!    files that an `only` rule assigns to some other host. Purge lists are
//!    computed by replaying the legs over one listing of every tree, so a
//!    dry run announces the same purges a real run performs.
//!
//! Exclusions are computed per source side of a leg, not per pair: a leg
//! leaving `t` skips `t`'s ignore markers, the global `ignore` rules and the
//! files `t` itself owns. Files owned elsewhere that leak through a leg are
//! cleaned up by the purge phase.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::config::SyncConfig;
use crate::exec::{ExecError, Executor};
use crate::target::Target;

use super::error::SyncError;
use super::ignore::IgnoreCollector;
use super::pattern::PatternSet;
use super::scan::TreeScanner;

/// One directional, newer-file-wins copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorOp {
    pub source: Target,
    pub dest: Target,
    pub exclude: Vec<String>,
}

/// Deletion of files (relative to the target root) the target does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeOp {
    pub target: Target,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOperation {
    Mirror(MirrorOp),
    Purge(PurgeOp),
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mirror(op) => write!(f, "mirror {} -> {}", op.source, op.dest),
            Self::Purge(op) => write!(f, "purge {} ({} files)", op.target, op.files.len()),
        }
    }
}

/// Ordered operations for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub operations: Vec<SyncOperation>,
}

impl SyncPlan {
    pub fn mirrors(&self) -> impl Iterator<Item = &MirrorOp> {
        self.operations.iter().filter_map(|op| match op {
            SyncOperation::Mirror(m) => Some(m),
            SyncOperation::Purge(_) => None,
        })
    }

    pub fn purges(&self) -> impl Iterator<Item = &PurgeOp> {
        self.operations.iter().filter_map(|op| match op {
            SyncOperation::Purge(p) => Some(p),
            SyncOperation::Mirror(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Computes mirror and purge operations for a source and its destinations.
pub struct Resolver<'a> {
    exec: &'a dyn Executor,
    config: &'a SyncConfig,
    marker_name: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(exec: &'a dyn Executor, config: &'a SyncConfig, marker_name: &'a str) -> Self {
        Self {
            exec,
            config,
            marker_name,
        }
    }

    /// Check the hub topology: one local source, at least one destination,
    /// every destination remote and distinct.
    pub fn validate(source: &Target, dests: &[Target]) -> Result<(), SyncError> {
        if !source.is_local() {
            return Err(SyncError::SourceNotLocal(source.to_string()));
        }
        if dests.is_empty() {
            return Err(SyncError::NoDestinations);
        }
        for (i, dest) in dests.iter().enumerate() {
            if dest.is_local() {
                return Err(SyncError::LocalDestination(dest.to_string()));
            }
            if dests[..i].contains(dest) {
                return Err(SyncError::DuplicateDestination(dest.to_string()));
            }
        }
        Ok(())
    }

    /// Full preview: mirror legs followed by the purges they leave behind.
    pub fn resolve(&self, source: &Target, dests: &[Target]) -> Result<SyncPlan, SyncError> {
        let mirrors = self.plan_mirrors(source, dests)?;
        let mut purges = Vec::new();
        for (target, planned) in self.plan_purges(source, dests, &mirrors) {
            let purge = planned.map_err(|source| SyncError::Unreachable {
                target: target.to_string(),
                source,
            })?;
            purges.extend(purge);
        }

        Ok(SyncPlan {
            operations: mirrors
                .into_iter()
                .map(SyncOperation::Mirror)
                .chain(purges.into_iter().map(SyncOperation::Purge))
                .collect(),
        })
    }

    /// Mirror legs: every pull, then every push, in destination order.
    ///
    /// Exclusions for all participants are gathered before anything is
    /// returned, so an unreachable target aborts the run before any leg runs.
    pub fn plan_mirrors(
        &self,
        source: &Target,
        dests: &[Target],
    ) -> Result<Vec<MirrorOp>, SyncError> {
        Self::validate(source, dests)?;
        self.warn_unknown_owners(source, dests);

        let source_exclude = self.exclusions(source)?;
        let dest_excludes = dests
            .iter()
            .map(|dest| self.exclusions(dest))
            .collect::<Result<Vec<_>, _>>()?;

        let pulls = dests
            .iter()
            .zip(dest_excludes)
            .map(|(dest, exclude)| MirrorOp {
                source: dest.clone(),
                dest: source.clone(),
                exclude,
            });
        let pushes = dests.iter().map(|dest| MirrorOp {
            source: source.clone(),
            dest: dest.clone(),
            exclude: source_exclude.clone(),
        });

        Ok(pulls.chain(pushes).collect())
    }

    /// Purges for every participant, source first, against the trees as they
    /// stand once `mirrors` have run.
    ///
    /// Each tree is listed once and the legs are replayed over the listings,
    /// so the result does not depend on whether the legs really ran. A
    /// participant whose listing fails gets its error back and contributes
    /// nothing to the other trees. Nothing is listed if no `only` rule
    /// exists.
    pub fn plan_purges(
        &self,
        source: &Target,
        dests: &[Target],
        mirrors: &[MirrorOp],
    ) -> Vec<(Target, Result<Option<PurgeOp>, ExecError>)> {
        let participants: Vec<&Target> = std::iter::once(source).chain(dests).collect();
        if self.config.only().is_empty() {
            return participants
                .into_iter()
                .map(|target| (target.clone(), Ok(None)))
                .collect();
        }

        let scanner = TreeScanner::new(self.exec);
        let listings: Vec<Result<Vec<String>, ExecError>> = participants
            .iter()
            .map(|target| scanner.list_files(target))
            .collect();

        let mut trees: HashMap<&Target, BTreeSet<String>> = participants
            .iter()
            .zip(&listings)
            .map(|(target, listing)| {
                let files: BTreeSet<String> = listing
                    .as_ref()
                    .map(|files| files.iter().cloned().collect())
                    .unwrap_or_default();
                (*target, files)
            })
            .collect();
        project_mirrors(&mut trees, mirrors);

        participants
            .into_iter()
            .zip(listings)
            .map(|(target, listing)| {
                let planned = listing.map(|_| {
                    trees
                        .get(target)
                        .and_then(|tree| self.foreign_files(target, tree))
                });
                (target.clone(), planned)
            })
            .collect()
    }

    /// Files of `tree` matched by an `only` rule for a host other than
    /// `target`'s, or `None` when there are none.
    fn foreign_files(&self, target: &Target, tree: &BTreeSet<String>) -> Option<PurgeOp> {
        let foreign: Vec<&str> = self.config.owned_elsewhere(target.host()).collect();
        if foreign.is_empty() {
            return None;
        }

        let patterns = PatternSet::new(&foreign);
        let files: Vec<String> = tree
            .iter()
            .filter(|file| patterns.matches(file))
            .cloned()
            .collect();

        tracing::debug!(endpoint = %target, files = files.len(), "purge candidates");
        if files.is_empty() {
            return None;
        }
        Some(PurgeOp {
            target: target.clone(),
            files,
        })
    }

    /// Effective exclusions for legs leaving `target`: its ignore markers,
    /// the global ignore rules and the patterns it owns, de-duplicated.
    pub fn exclusions(&self, target: &Target) -> Result<Vec<String>, SyncError> {
        let collected = IgnoreCollector::new(self.exec, self.marker_name)
            .collect(target)
            .map_err(|source| SyncError::Unreachable {
                target: target.to_string(),
                source,
            })?;

        let mut exclude: Vec<String> = Vec::new();
        let candidates = collected
            .into_iter()
            .chain(self.config.ignore().iter().cloned())
            .chain(self.config.owned_by(target.host()).map(str::to_string));
        for pattern in candidates {
            if !exclude.contains(&pattern) {
                exclude.push(pattern);
            }
        }
        Ok(exclude)
    }

    fn warn_unknown_owners(&self, source: &Target, dests: &[Target]) {
        for host in self.config.owner_hosts() {
            let participates =
                source.host() == host || dests.iter().any(|dest| dest.host() == host);
            if !participates {
                tracing::warn!(
                    host = %host,
                    "only rule names a host that is not part of this run; its files will be purged everywhere"
                );
            }
        }
    }
}

/// Add to each leg's destination the files its source would send, in leg
/// order. Legs never delete, so trees only grow.
fn project_mirrors(trees: &mut HashMap<&Target, BTreeSet<String>>, mirrors: &[MirrorOp]) {
    for op in mirrors {
        let excluded = PatternSet::new(&op.exclude);
        let incoming: Vec<String> = trees
            .get(&op.source)
            .map(|files| {
                files
                    .iter()
                    .filter(|file| !excluded.matches(file))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(tree) = trees.get_mut(&op.dest) {
            tree.extend(incoming);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ignore::DEFAULT_MARKER_NAME;
    use crate::testing::FakeRemotes;

    fn local() -> Target {
        Target::local("/proj")
    }

    fn remote(host: &str) -> Target {
        Target::remote(host, "/proj")
    }

    fn resolve(fake: &FakeRemotes, config: &SyncConfig, dests: &[Target]) -> SyncPlan {
        Resolver::new(fake, config, DEFAULT_MARKER_NAME)
            .resolve(&local(), dests)
            .unwrap()
    }

    #[test]
    fn test_empty_config_is_plain_two_way_mirror() {
        let fake = FakeRemotes::new();
        let config = SyncConfig::default();
        let dests = [remote("a"), remote("b"), remote("c")];

        let plan = resolve(&fake, &config, &dests);
        assert_eq!(plan.mirrors().count(), 2 * dests.len());
        assert_eq!(plan.purges().count(), 0);
        assert!(plan.mirrors().all(|m| m.exclude.is_empty()));
    }

    #[test]
    fn test_pull_precedes_push_for_every_dest() {
        let fake = FakeRemotes::new();
        let config = SyncConfig::default();
        let dests = [remote("a"), remote("b")];

        let plan = resolve(&fake, &config, &dests);
        for dest in &dests {
            let pull = plan
                .operations
                .iter()
                .position(|op| matches!(op, SyncOperation::Mirror(m) if &m.source == dest && m.dest == local()))
                .unwrap();
            let push = plan
                .operations
                .iter()
                .position(|op| matches!(op, SyncOperation::Mirror(m) if m.source == local() && &m.dest == dest))
                .unwrap();
            assert!(pull < push, "pull from {dest} must precede push");
        }
    }

    #[test]
    fn test_gather_then_broadcast_order() {
        let fake = FakeRemotes::new();
        let config = SyncConfig::default();
        let plan = resolve(&fake, &config, &[remote("a"), remote("b")]);

        let order: Vec<String> = plan.operations.iter().map(|op| op.to_string()).collect();
        assert_eq!(
            order,
            vec![
                "mirror a:/proj -> /proj",
                "mirror b:/proj -> /proj",
                "mirror /proj -> a:/proj",
                "mirror /proj -> b:/proj",
            ]
        );
    }

    #[test]
    fn test_local_owned_file_scenario() {
        let fake = FakeRemotes::new()
            .with_file("local", "/proj/keys.pem", "secret")
            .with_file("local", "/proj/.syncignore", "*.log\n")
            .with_file("hostA", "/proj/keys.pem", "stale")
            .with_file("hostA", "/proj/main.rs", "");
        let config = SyncConfig::parse("only local:keys.pem\n").unwrap();

        let plan = resolve(&fake, &config, &[remote("hostA")]);
        assert_eq!(
            plan.operations,
            vec![
                SyncOperation::Mirror(MirrorOp {
                    source: remote("hostA"),
                    dest: local(),
                    exclude: vec![],
                }),
                SyncOperation::Mirror(MirrorOp {
                    source: local(),
                    dest: remote("hostA"),
                    exclude: vec!["*.log".into(), "keys.pem".into()],
                }),
                SyncOperation::Purge(PurgeOp {
                    target: remote("hostA"),
                    files: vec!["keys.pem".into()],
                }),
            ]
        );
    }

    #[test]
    fn test_exclusion_assembly_order_and_dedup() {
        let fake = FakeRemotes::new()
            .with_file("hostA", "/proj/.syncignore", "*.tmp\n")
            .with_file("hostA", "/proj/sub/.syncignore", "x\n");
        let config = SyncConfig::parse("ignore *.tmp\nignore node_modules/\nonly hostA:cache/\n")
            .unwrap();
        let resolver = Resolver::new(&fake, &config, DEFAULT_MARKER_NAME);

        assert_eq!(
            resolver.exclusions(&remote("hostA")).unwrap(),
            vec!["*.tmp", "sub/x", "node_modules/", "cache/"]
        );
        assert_eq!(
            resolver.exclusions(&local()).unwrap(),
            vec!["*.tmp", "node_modules/"]
        );
    }

    #[test]
    fn test_remote_owned_rule_purges_hub_and_other_dests() {
        let fake = FakeRemotes::new()
            .with_file("local", "/proj/cache/blob", "")
            .with_file("hostA", "/proj/cache/blob", "")
            .with_file("hostB", "/proj/cache/old", "")
            .with_file("hostB", "/proj/src/lib.rs", "");
        let config = SyncConfig::parse("only hostA:cache/\n").unwrap();

        let plan = resolve(&fake, &config, &[remote("hostA"), remote("hostB")]);
        let pull_a = plan.mirrors().next().unwrap();
        assert_eq!(pull_a.source, remote("hostA"));
        assert_eq!(pull_a.exclude, vec!["cache/"]);

        // hostB's cache/old reaches the hub on its pull and the hub's
        // cache/blob reaches hostB on its push; both are purged afterwards.
        let purges: Vec<&PurgeOp> = plan.purges().collect();
        assert_eq!(purges.len(), 2);
        assert_eq!(purges[0].target, local());
        assert_eq!(purges[0].files, vec!["cache/blob", "cache/old"]);
        assert_eq!(purges[1].target, remote("hostB"));
        assert_eq!(purges[1].files, vec!["cache/blob", "cache/old"]);
    }

    #[test]
    fn test_purges_include_files_leaked_by_legs() {
        let fake = FakeRemotes::new()
            .with_file("hostA", "/proj/gpu/weights.bin", "")
            .with_file("hostB", "/proj/src/lib.rs", "");
        let config = SyncConfig::parse("only hostA:gpu/\n").unwrap();
        let resolver = Resolver::new(&fake, &config, DEFAULT_MARKER_NAME);
        let dests = [remote("hostA"), remote("hostB")];

        let mirrors = resolver.plan_mirrors(&local(), &dests).unwrap();
        let planned: Vec<(Target, Option<PurgeOp>)> = resolver
            .plan_purges(&local(), &dests, &mirrors)
            .into_iter()
            .map(|(target, planned)| (target, planned.unwrap()))
            .collect();

        // Neither the hub nor hostB holds gpu/ yet, and the pull from hostA
        // excludes it, so nothing leaks.
        assert_eq!(planned.len(), 3);
        assert!(planned.iter().all(|(_, purge)| purge.is_none()));

        // A leg that does carry the file produces a purge on its destination.
        let leaky = [MirrorOp {
            source: remote("hostA"),
            dest: local(),
            exclude: vec![],
        }];
        let planned = resolver.plan_purges(&local(), &dests, &leaky);
        assert_eq!(planned[0].0, local());
        assert_eq!(
            planned[0].1.as_ref().unwrap().as_ref().unwrap().files,
            vec!["gpu/weights.bin"]
        );
        assert!(planned[2].1.as_ref().unwrap().is_none());
    }

    #[test]
    fn test_failed_listing_is_reported_per_target() {
        let fake = FakeRemotes::new()
            .with_file("local", "/proj/cache/x", "")
            .with_unreachable("hostB");
        let config = SyncConfig::parse("only hostA:cache/\n").unwrap();
        let resolver = Resolver::new(&fake, &config, DEFAULT_MARKER_NAME);

        let planned = resolver.plan_purges(&local(), &[remote("hostA"), remote("hostB")], &[]);
        assert_eq!(planned[0].1.as_ref().unwrap().as_ref().unwrap().files, vec!["cache/x"]);
        assert!(planned[1].1.as_ref().unwrap().is_none());
        assert!(matches!(&planned[2].1, Err(err) if err.is_unreachable()));
    }

    #[test]
    fn test_purge_covers_every_foreign_match() {
        let files = [
            "a.pem",
            "keys/id_rsa",
            "keys/sub/id_ed25519",
            "src/main.rs",
            "docs/a.pem",
            "build/out/app",
        ];
        let mut fake = FakeRemotes::new();
        for file in files {
            fake = fake.with_file("hostA", &format!("/proj/{file}"), "");
        }
        let config =
            SyncConfig::parse("only local:*.pem\nonly local:keys/\nonly hostB:/build\nonly hostA:src/*\n")
                .unwrap();
        let plan = resolve(&fake, &config, &[remote("hostA")]);

        let purge = plan.purges().find(|p| p.target == remote("hostA")).unwrap();
        let foreign = PatternSet::new(config.owned_elsewhere("hostA"));
        for file in files {
            if foreign.matches(file) {
                assert!(purge.files.contains(&file.to_string()), "{file} not purged");
            }
        }
        assert!(!purge.files.contains(&"src/main.rs".to_string()));
        assert_eq!(purge.files.len(), 5);
    }

    #[test]
    fn test_owner_is_never_purged() {
        let fake = FakeRemotes::new().with_file("local", "/proj/keys.pem", "");
        let config = SyncConfig::parse("only local:keys.pem\n").unwrap();
        let plan = resolve(&fake, &config, &[remote("hostA")]);
        // The push to hostA excludes keys.pem, so nothing is left to purge.
        assert_eq!(plan.purges().count(), 0);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let fake = FakeRemotes::new()
            .with_file("local", "/proj/b/keys.pem", "")
            .with_file("local", "/proj/a/keys.pem", "")
            .with_file("hostA", "/proj/.syncignore", "tmp/\n");
        let config = SyncConfig::parse("only hostA:keys.pem\nignore *.swp\n").unwrap();

        let first = resolve(&fake, &config, &[remote("hostA")]);
        let second = resolve(&fake, &config, &[remote("hostA")]);
        assert_eq!(first, second);
        assert_eq!(
            first.purges().next().unwrap().files,
            vec!["a/keys.pem", "b/keys.pem"]
        );
    }

    #[test]
    fn test_validation_errors() {
        let a = remote("a");
        assert!(matches!(
            Resolver::validate(&local(), &[]),
            Err(SyncError::NoDestinations)
        ));
        assert!(matches!(
            Resolver::validate(&a, &[remote("b")]),
            Err(SyncError::SourceNotLocal(_))
        ));
        assert!(matches!(
            Resolver::validate(&local(), &[a.clone(), Target::local("/other")]),
            Err(SyncError::LocalDestination(_))
        ));
        assert!(matches!(
            Resolver::validate(&local(), &[a.clone(), remote("b"), a.clone()]),
            Err(SyncError::DuplicateDestination(d)) if d == "a:/proj"
        ));
        assert!(Resolver::validate(&local(), &[a, remote("b")]).is_ok());
    }

    #[test]
    fn test_unreachable_dest_aborts_planning() {
        let fake = FakeRemotes::new().with_unreachable("hostB");
        let config = SyncConfig::default();
        let err = Resolver::new(&fake, &config, DEFAULT_MARKER_NAME)
            .plan_mirrors(&local(), &[remote("hostA"), remote("hostB")])
            .unwrap_err();

        match err {
            SyncError::Unreachable { target, source } => {
                assert_eq!(target, "hostB:/proj");
                assert!(source.is_unreachable());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(fake.applied().is_empty());
    }

    #[test]
    fn test_rule_for_absent_host_purges_everyone() {
        let fake = FakeRemotes::new()
            .with_file("local", "/proj/gpu.bin", "")
            .with_file("hostA", "/proj/gpu.bin", "");
        let config = SyncConfig::parse("only gpu-box:gpu.bin\n").unwrap();

        let plan = resolve(&fake, &config, &[remote("hostA")]);
        let targets: Vec<&Target> = plan.purges().map(|p| &p.target).collect();
        assert_eq!(targets, vec![&local(), &remote("hostA")]);
    }
}
