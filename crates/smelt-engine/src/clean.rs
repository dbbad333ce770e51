//! Removal of build products according to each rule's clean policy.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use smelt_util::error::UtilError;
use tracing::debug;

use crate::graph::{RuleGraph, RuleId};
use crate::report::{FailureReason, Reporter, RuleOutcome, RunReport};
use crate::rule::DeleteOnClean;

/// Apply the clean policy of each rule in `ids`.
///
/// Absent files and directories are not errors. With `dry_run`, nothing is
/// deleted but the report still lists what would be.
pub fn clean_rules(
    graph: &RuleGraph,
    ids: &[RuleId],
    root: &Path,
    dry_run: bool,
    reporter: Reporter,
) -> RunReport {
    let mut report = RunReport::new();
    let mut removed_dirs: BTreeSet<PathBuf> = BTreeSet::new();

    for id in ids {
        let Some(rule) = graph.rule(*id) else {
            continue;
        };
        let victims: Vec<Victim> = match rule.delete_on_clean {
            DeleteOnClean::None => {
                report.record(*id, RuleOutcome::UpToDate);
                continue;
            }
            DeleteOnClean::DeleteTargetFiles => {
                rule.targets.iter().cloned().map(Victim::File).collect()
            }
            DeleteOnClean::DeleteTargetDirectory => rule
                .targets
                .iter()
                .filter_map(|target| directory_victim(target, &mut removed_dirs))
                .collect(),
        };

        let mut outcome = RuleOutcome::Succeeded;
        for victim in victims {
            match remove(&victim, root, dry_run) {
                Ok(true) => {
                    reporter.removed(victim.path(), dry_run);
                    report.record_removed(victim.path().to_path_buf());
                }
                Ok(false) => debug!(path = %victim.path().display(), "nothing to remove"),
                Err(e) => {
                    let reason = FailureReason::Io {
                        message: e.to_string(),
                    };
                    reporter.rule_failed(&rule.title, &reason);
                    outcome = RuleOutcome::Failed(reason);
                }
            }
        }
        report.record(*id, outcome);
    }
    report
}

enum Victim {
    File(PathBuf),
    Directory(PathBuf),
}

impl Victim {
    fn path(&self) -> &Path {
        match self {
            Self::File(p) | Self::Directory(p) => p,
        }
    }
}

/// The directory holding `target`, once per clean. A target at the build
/// root falls back to removing the file itself.
fn directory_victim(target: &Path, seen: &mut BTreeSet<PathBuf>) -> Option<Victim> {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && parent != Path::new(".") => {
            seen.insert(parent.to_path_buf())
                .then(|| Victim::Directory(parent.to_path_buf()))
        }
        _ => Some(Victim::File(target.to_path_buf())),
    }
}

fn remove(victim: &Victim, root: &Path, dry_run: bool) -> Result<bool, UtilError> {
    let path = root.join(victim.path());
    if dry_run {
        return Ok(path.exists());
    }
    match victim {
        Victim::File(_) => smelt_util::fs::remove_file_if_exists(&path),
        Victim::Directory(_) => smelt_util::fs::remove_dir_all_if_exists(&path),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;
    use crate::rule::Rule;

    fn all(graph: &RuleGraph) -> Vec<RuleId> {
        graph.rules().map(|(id, _)| id).collect()
    }

    #[test]
    fn deletes_files_and_object_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let objects = tmp.path().join("objects/src");
        fs::create_dir_all(&objects).unwrap();
        fs::write(objects.join("a.cpp.o"), "").unwrap();
        fs::write(objects.join("a.cpp.o.dep"), "").unwrap();
        fs::write(objects.join("b.cpp.o"), "").unwrap();
        fs::write(tmp.path().join("prog"), "").unwrap();
        fs::write(tmp.path().join("a.cpp"), "").unwrap();

        let mut graph = RuleGraph::new();
        graph
            .add_rule(
                Rule::new(["objects/src/a.cpp.o"], "")
                    .with_delete_on_clean(DeleteOnClean::DeleteTargetDirectory),
            )
            .unwrap();
        graph
            .add_rule(
                Rule::new(["objects/src/b.cpp.o"], "")
                    .with_delete_on_clean(DeleteOnClean::DeleteTargetDirectory),
            )
            .unwrap();
        graph
            .add_rule(
                Rule::new(["prog", "prog.map"], "")
                    .with_delete_on_clean(DeleteOnClean::DeleteTargetFiles),
            )
            .unwrap();

        let report = clean_rules(&graph, &all(&graph), tmp.path(), false, Reporter::quiet());
        assert_eq!(report.failure_count(), 0);
        assert!(!objects.exists());
        assert!(tmp.path().join("objects").exists());
        assert!(!tmp.path().join("prog").exists());
        assert!(tmp.path().join("a.cpp").exists());
        assert_eq!(
            report.removed(),
            &[PathBuf::from("objects/src"), PathBuf::from("prog")]
        );
    }

    #[test]
    fn clean_twice_is_harmless() {
        let tmp = tempfile::tempdir().unwrap();
        let mut graph = RuleGraph::new();
        graph
            .add_rule(
                Rule::new(["prog"], "").with_delete_on_clean(DeleteOnClean::DeleteTargetFiles),
            )
            .unwrap();
        fs::write(tmp.path().join("prog"), "").unwrap();

        let first = clean_rules(&graph, &all(&graph), tmp.path(), false, Reporter::quiet());
        let second = clean_rules(&graph, &all(&graph), tmp.path(), false, Reporter::quiet());
        assert_eq!(first.removed().len(), 1);
        assert!(second.removed().is_empty());
        assert_eq!(second.failure_count(), 0);
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut graph = RuleGraph::new();
        graph
            .add_rule(
                Rule::new(["prog"], "").with_delete_on_clean(DeleteOnClean::DeleteTargetFiles),
            )
            .unwrap();
        fs::write(tmp.path().join("prog"), "").unwrap();

        let report = clean_rules(&graph, &all(&graph), tmp.path(), true, Reporter::quiet());
        assert_eq!(report.removed(), &[PathBuf::from("prog")]);
        assert!(tmp.path().join("prog").exists());
    }

    #[test]
    fn rules_without_policy_are_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let mut graph = RuleGraph::new();
        let id = graph.add_rule(Rule::new(["keep"], "")).unwrap();
        fs::write(tmp.path().join("keep"), "").unwrap();

        let report = clean_rules(&graph, &all(&graph), tmp.path(), false, Reporter::quiet());
        assert!(tmp.path().join("keep").exists());
        assert_eq!(report.outcome(id), Some(&RuleOutcome::UpToDate));
    }

    #[test]
    fn root_level_target_with_directory_policy_removes_only_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut graph = RuleGraph::new();
        graph
            .add_rule(
                Rule::new(["gen.h"], "").with_delete_on_clean(DeleteOnClean::DeleteTargetDirectory),
            )
            .unwrap();
        fs::write(tmp.path().join("gen.h"), "").unwrap();
        fs::write(tmp.path().join("other"), "").unwrap();

        clean_rules(&graph, &all(&graph), tmp.path(), false, Reporter::quiet());
        assert!(!tmp.path().join("gen.h").exists());
        assert!(tmp.path().join("other").exists());
    }
}
