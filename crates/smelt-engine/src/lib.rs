//! Rule graph, staleness analysis, and parallel execution for Smelt.

pub mod clean;
pub mod depfile;
pub mod error;
pub mod executor;
pub mod goal;
pub mod graph;
pub mod load;
pub mod make;
pub mod plan;
pub mod report;
pub mod rule;
pub mod runner;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::EngineError;
pub use goal::{Goal, GoalRegistry, CLEAN_GOAL};
pub use graph::{RuleGraph, RuleId};
pub use load::{build_make, buildfile_root, load_buildfile};
pub use make::{Make, Mode, RunOptions};
pub use plan::{BuildPlan, StaleReason};
pub use report::{FailureReason, Reporter, RuleOutcome, RunReport, SkipCause};
pub use rule::{DeleteOnClean, PostCommand, Rule};
pub use runner::{CommandRunner, ProcessRunner};
