//! Rule graph keyed by target, with cycle and dangling-dependency checks.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::depfile;
use crate::error::EngineError;
use crate::rule::{normalize_path, Rule};

/// Index of a rule in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(usize);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InStack,
    Done,
}

/// All declared rules plus the target → producer index.
#[derive(Debug, Default)]
pub struct RuleGraph {
    rules: Vec<Rule>,
    producers: HashMap<PathBuf, RuleId>,
    /// Rules whose dependency record could not be read, with the reason.
    broken_records: HashMap<RuleId, String>,
}

impl RuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule.
    ///
    /// # Errors
    /// Returns `EmptyTargets` for a rule without targets and `DuplicateTarget`
    /// if another rule already produces one of its targets.
    pub fn add_rule(&mut self, rule: Rule) -> Result<RuleId, EngineError> {
        if rule.targets.is_empty() {
            return Err(EngineError::EmptyTargets { title: rule.title });
        }
        for target in &rule.targets {
            if let Some(existing) = self.producers.get(target).and_then(|id| self.rule(*id)) {
                return Err(EngineError::DuplicateTarget {
                    target: target.display().to_string(),
                    existing: existing.title.clone(),
                    duplicate: rule.title.clone(),
                });
            }
        }

        let id = RuleId(self.rules.len());
        for target in &rule.targets {
            self.producers.insert(target.clone(), id);
        }
        self.rules.push(rule);
        Ok(id)
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.0)
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> impl Iterator<Item = (RuleId, &Rule)> {
        self.rules.iter().enumerate().map(|(i, r)| (RuleId(i), r))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rule producing `target`, if any.
    pub fn producer_of(&self, target: &Path) -> Option<RuleId> {
        self.producers.get(&normalize_path(target)).copied()
    }

    /// Why the rule's dependency record was unusable on the last refresh.
    pub fn broken_record(&self, id: RuleId) -> Option<&str> {
        self.broken_records.get(&id).map(String::as_str)
    }

    /// Merge the dependency record at `path` (relative to `root`) into a rule.
    ///
    /// Returns the number of new prerequisites. A missing file merges nothing.
    ///
    /// # Errors
    /// Returns `DependencyFileParse` for a malformed record, or an I/O error.
    pub fn merge_secondary_dependencies(
        &mut self,
        id: RuleId,
        path: &Path,
        root: &Path,
    ) -> Result<usize, EngineError> {
        let Some(prerequisites) = depfile::load_prerequisites(&root.join(path))? else {
            debug!(record = %path.display(), "dependency record absent");
            return Ok(0);
        };
        let Some(rule) = self.rules.get_mut(id.0) else {
            return Ok(0);
        };
        Ok(rule.merge_secondary(prerequisites))
    }

    /// Re-read every rule's dependency records from disk.
    ///
    /// A record that cannot be used marks its rule as always stale instead of
    /// aborting the build.
    pub fn refresh_secondary_dependencies(&mut self, root: &Path) {
        self.broken_records.clear();
        for index in 0..self.rules.len() {
            let id = RuleId(index);
            let files = match self.rules.get_mut(index) {
                Some(rule) => {
                    rule.secondary_dependencies.clear();
                    rule.secondary_dependency_files.clone()
                }
                None => continue,
            };
            for file in files {
                if let Err(e) = self.merge_secondary_dependencies(id, &file, root) {
                    warn!(
                        record = %file.display(),
                        error = %e,
                        "ignoring dependency record; rule will be rebuilt"
                    );
                    self.broken_records.insert(id, e.to_string());
                }
            }
        }
    }

    /// Validate the whole graph.
    ///
    /// Rules are visited in declaration order, so a given graph always reports
    /// the same cycle.
    ///
    /// # Errors
    /// Returns `CycleDetected` naming the chain, or `DanglingDependency` for a
    /// declared dependency that is neither a file under `root` nor a target.
    pub fn check_rules(&self, root: &Path) -> Result<(), EngineError> {
        let all: Vec<RuleId> = (0..self.rules.len()).map(RuleId).collect();
        self.topological_order(&all)?;

        for rule in &self.rules {
            for dependency in &rule.dependencies {
                if self.producer_of(dependency).is_none() && !root.join(dependency).exists() {
                    return Err(EngineError::DanglingDependency {
                        rule: rule.title.clone(),
                        dependency: dependency.display().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Rules reachable from `roots`, producers before consumers.
    ///
    /// # Errors
    /// Returns `CycleDetected` if a cycle is reachable.
    pub fn topological_order(&self, roots: &[RuleId]) -> Result<Vec<RuleId>, EngineError> {
        let mut marks: HashMap<RuleId, Mark> = HashMap::new();
        let mut order = Vec::new();
        let mut stack = Vec::new();
        for root in roots {
            self.visit(*root, &mut marks, &mut order, &mut stack)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        id: RuleId,
        marks: &mut HashMap<RuleId, Mark>,
        order: &mut Vec<RuleId>,
        stack: &mut Vec<RuleId>,
    ) -> Result<(), EngineError> {
        match marks.get(&id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InStack) => {
                let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                let mut chain: Vec<String> = stack
                    .get(start..)
                    .unwrap_or(stack.as_slice())
                    .iter()
                    .filter_map(|s| self.rule(*s))
                    .map(Rule::name)
                    .collect();
                if let Some(rule) = self.rule(id) {
                    chain.push(rule.name());
                }
                return Err(EngineError::CycleDetected {
                    cycle: chain.join(" -> "),
                });
            }
            None => {}
        }

        let Some(rule) = self.rule(id) else {
            return Ok(());
        };
        marks.insert(id, Mark::InStack);
        stack.push(id);
        for dependency in rule.all_dependencies() {
            if let Some(producer) = self.producer_of(dependency) {
                self.visit(producer, marks, order, stack)?;
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        order.push(id);
        Ok(())
    }

    /// Human-readable listing of every rule.
    pub fn describe_rules(&self) -> String {
        let mut out = String::new();
        for (id, rule) in self.rules() {
            let _ = writeln!(out, "{id} {}", rule.title);
            let _ = writeln!(out, "  targets: {}", join_paths(&rule.targets));
            if !rule.dependencies.is_empty() {
                let _ = writeln!(out, "  dependencies: {}", join_paths(&rule.dependencies));
            }
            if !rule.secondary_dependencies.is_empty() {
                let _ = writeln!(
                    out,
                    "  discovered: {}",
                    join_paths(&rule.secondary_dependencies)
                );
            }
            if !rule.command.is_empty() {
                let _ = writeln!(
                    out,
                    "  command: {}",
                    smelt_util::process::display_command(&rule.command)
                );
            }
            for post in &rule.post_commands {
                let _ = writeln!(
                    out,
                    "  post: {} ({})",
                    smelt_util::process::display_command(&post.command),
                    post.title
                );
            }
            if rule.priority != 0 {
                let _ = writeln!(out, "  priority: {}", rule.priority);
            }
        }
        out
    }

    /// Graphviz rendering: one edge from each target to each of its dependencies.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph G {\n  node [fontname=courier]\n");
        for rule in &self.rules {
            for target in &rule.targets {
                let _ = writeln!(out, "  \"{}\" [shape=rectangle]", escape_dot(target));
                for dependency in rule.all_dependencies() {
                    let _ = writeln!(
                        out,
                        "  \"{}\" -> \"{}\"",
                        escape_dot(target),
                        escape_dot(dependency)
                    );
                }
            }
        }
        out.push_str("}\n");
        out
    }

    /// Write [`RuleGraph::to_dot`] to `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_dot(&self, path: &Path) -> Result<(), EngineError> {
        std::fs::write(path, self.to_dot()).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_dot(path: &Path) -> String {
    path.display().to_string().replace('"', "\\\"")
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod proptests {
    use super::{RuleGraph, RuleId};
    use crate::rule::Rule;

    use proptest::prelude::proptest;

    proptest! {
        /// Any graph whose edges only point at earlier rules is acyclic, and its
        /// topological order puts every producer before its consumers.
        #[test]
        fn backward_edges_never_cycle(
            edges in proptest::collection::vec(proptest::collection::vec(0usize..32, 0..4), 1..32)
        ) {
            let tmp = tempfile::tempdir().unwrap();
            let mut graph = RuleGraph::new();
            for (index, deps) in edges.iter().enumerate() {
                let mut rule = Rule::new([format!("t{index}")], "");
                for dep in deps.iter().filter(|d| **d < index) {
                    rule.add_dependency(format!("t{dep}"));
                }
                graph.add_rule(rule).unwrap();
            }
            proptest::prop_assert!(graph.check_rules(tmp.path()).is_ok());

            let all: Vec<RuleId> = graph.rules().map(|(id, _)| id).collect();
            let order = graph.topological_order(&all).unwrap();
            proptest::prop_assert_eq!(order.len(), graph.len());
            for (position, id) in order.iter().enumerate() {
                let rule = graph.rule(*id).unwrap();
                for dep in rule.all_dependencies() {
                    let producer = graph.producer_of(dep).unwrap();
                    let producer_position = order.iter().position(|o| *o == producer).unwrap();
                    proptest::prop_assert!(producer_position < position);
                }
            }
        }
    }
}
