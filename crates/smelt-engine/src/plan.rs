//! Staleness analysis: which reachable rules must run.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::error::EngineError;
use crate::graph::{RuleGraph, RuleId};

/// Why a rule must run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// A target does not exist.
    MissingTarget(PathBuf),
    /// A dependency is produced by a rule that runs in this invocation.
    RebuiltPrerequisite(PathBuf),
    /// A dependency is newer than the oldest target.
    NewerDependency(PathBuf),
    /// A discovered dependency no longer exists.
    MissingDependency(PathBuf),
    /// The dependency record could not be used.
    BrokenDependencyRecord(String),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTarget(p) => write!(f, "{} does not exist", p.display()),
            Self::RebuiltPrerequisite(p) => write!(f, "{} is rebuilt", p.display()),
            Self::NewerDependency(p) => write!(f, "{} is newer", p.display()),
            Self::MissingDependency(p) => write!(f, "{} is missing", p.display()),
            Self::BrokenDependencyRecord(msg) => write!(f, "unusable dependency record: {msg}"),
        }
    }
}

/// The rules reachable from a goal, split into stale and up to date.
///
/// Recomputed on every invocation; nothing is cached across runs except what
/// is on disk.
#[derive(Debug, Default)]
pub struct BuildPlan {
    /// Every reachable rule, producers before consumers.
    pub order: Vec<RuleId>,
    /// Rules that must run, with the first reason found.
    pub stale: HashMap<RuleId, StaleReason>,
}

impl BuildPlan {
    pub fn is_stale(&self, id: RuleId) -> bool {
        self.stale.contains_key(&id)
    }

    /// Stale rules in topological order.
    pub fn stale_rules(&self) -> Vec<RuleId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.is_stale(*id))
            .collect()
    }

    pub fn up_to_date_rules(&self) -> Vec<RuleId> {
        self.order
            .iter()
            .copied()
            .filter(|id| !self.is_stale(*id))
            .collect()
    }
}

/// Rules producing `targets`, in request order.
///
/// # Errors
/// Returns `UnknownTarget` for a target that no rule produces and that does
/// not exist under `root`.
pub fn producers_of(
    graph: &RuleGraph,
    targets: &[PathBuf],
    root: &Path,
) -> Result<Vec<RuleId>, EngineError> {
    let mut roots = Vec::new();
    for target in targets {
        match graph.producer_of(target) {
            Some(id) => {
                if !roots.contains(&id) {
                    roots.push(id);
                }
            }
            None if root.join(target).exists() => {}
            None => {
                return Err(EngineError::UnknownTarget {
                    target: target.display().to_string(),
                })
            }
        }
    }
    Ok(roots)
}

/// Compute the plan for `targets`.
///
/// A rule is stale when a target is missing, a dependency's producer is
/// stale, a dependency is strictly newer than the oldest target, a
/// discovered dependency is gone, or its dependency record was unusable.
///
/// # Errors
/// Returns `UnknownTarget`, `CycleDetected` (a discovered dependency can close
/// a cycle), or an I/O error from reading timestamps.
pub fn compute_plan(
    graph: &RuleGraph,
    targets: &[PathBuf],
    root: &Path,
) -> Result<BuildPlan, EngineError> {
    let roots = producers_of(graph, targets, root)?;
    let order = graph.topological_order(&roots)?;
    let mut stale = HashMap::new();

    for id in &order {
        if let Some(reason) = staleness(graph, *id, root, &stale)? {
            debug!(rule = %id, reason = %reason, "stale");
            stale.insert(*id, reason);
        }
    }

    Ok(BuildPlan { order, stale })
}

fn staleness(
    graph: &RuleGraph,
    id: RuleId,
    root: &Path,
    stale: &HashMap<RuleId, StaleReason>,
) -> Result<Option<StaleReason>, EngineError> {
    let Some(rule) = graph.rule(id) else {
        return Ok(None);
    };
    if let Some(message) = graph.broken_record(id) {
        return Ok(Some(StaleReason::BrokenDependencyRecord(message.to_owned())));
    }

    let mut oldest_target: Option<SystemTime> = None;
    for target in &rule.targets {
        match smelt_util::fs::modified_time(&root.join(target))? {
            None => return Ok(Some(StaleReason::MissingTarget(target.clone()))),
            Some(time) => {
                oldest_target = Some(oldest_target.map_or(time, |old| old.min(time)));
            }
        }
    }

    for dependency in rule.all_dependencies() {
        if graph
            .producer_of(dependency)
            .is_some_and(|producer| stale.contains_key(&producer))
        {
            return Ok(Some(StaleReason::RebuiltPrerequisite(dependency.clone())));
        }
    }

    for dependency in rule.all_dependencies() {
        match smelt_util::fs::modified_time(&root.join(dependency))? {
            None => return Ok(Some(StaleReason::MissingDependency(dependency.clone()))),
            Some(time) if oldest_target.is_some_and(|oldest| time > oldest) => {
                return Ok(Some(StaleReason::NewerDependency(dependency.clone())));
            }
            Some(_) => {}
        }
    }

    Ok(None)
}
