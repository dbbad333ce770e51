//! The build context: one graph, one goal registry, one build root.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::clean::clean_rules;
use crate::error::EngineError;
use crate::executor::{execute, ExecOptions};
use crate::goal::{GoalRegistry, CLEAN_GOAL};
use crate::graph::{RuleGraph, RuleId};
use crate::plan::{compute_plan, producers_of, BuildPlan};
use crate::report::{Reporter, RunReport};
use crate::rule::Rule;
use crate::runner::CommandRunner;

/// What to do with the rules reachable from a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Build,
    /// Delete build products instead; `dry_run` only reports them.
    Clean { dry_run: bool },
}

/// Per-invocation options.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// `0` for the host processor count.
    pub jobs: usize,
    pub fail_fast: bool,
    pub show_progress: bool,
    pub echo_commands: bool,
    pub quiet: bool,
    pub mode: Mode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 0,
            fail_fast: false,
            show_progress: true,
            echo_commands: false,
            quiet: false,
            mode: Mode::Build,
        }
    }
}

impl RunOptions {
    fn reporter(&self) -> Reporter {
        Reporter {
            show_progress: self.show_progress,
            echo_commands: self.echo_commands,
            quiet: self.quiet,
        }
    }
}

/// An owned build context.
///
/// Rules and goals are registered first, then validated as a whole with
/// [`Make::check_rules`], then any number of goals may be run.
#[derive(Debug)]
pub struct Make {
    root: PathBuf,
    graph: RuleGraph,
    goals: GoalRegistry,
}

impl Make {
    /// An empty context whose relative paths resolve against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            graph: RuleGraph::new(),
            goals: GoalRegistry::new(),
        }
    }

    /// # Errors
    /// Returns `EmptyTargets` or `DuplicateTarget`.
    pub fn add_rule(&mut self, rule: Rule) -> Result<RuleId, EngineError> {
        self.graph.add_rule(rule)
    }

    /// # Errors
    /// Returns `DuplicateGoal`.
    pub fn add_goal<I, P>(
        &mut self,
        name: &str,
        targets: I,
        description: &str,
    ) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.goals.add_goal(name, targets, description)
    }

    /// Validate the complete graph before anything runs.
    ///
    /// # Errors
    /// Returns `CycleDetected` or `DanglingDependency`.
    pub fn check_rules(&self) -> Result<(), EngineError> {
        self.graph.check_rules(&self.root)
    }

    pub fn graph(&self) -> &RuleGraph {
        &self.graph
    }

    pub fn goals(&self) -> &GoalRegistry {
        &self.goals
    }

    /// Re-read dependency records and compute what goal `name` needs to run.
    ///
    /// # Errors
    /// Returns `UnknownGoal`, `UnknownTarget`, or `CycleDetected` when a
    /// discovered dependency closes a cycle.
    pub fn plan(&mut self, name: &str) -> Result<BuildPlan, EngineError> {
        let targets = self.goals.resolve_goal(name)?.to_vec();
        self.graph.refresh_secondary_dependencies(&self.root);
        compute_plan(&self.graph, &targets, &self.root)
    }

    /// Build (or clean) goal `name`.
    ///
    /// Rule failures are reported through the returned [`RunReport`]; an
    /// `Err` means nothing ran.
    ///
    /// # Errors
    /// Returns a configuration error detected while planning, or a worker
    /// pool error.
    pub fn run_goal(
        &mut self,
        name: &str,
        options: &RunOptions,
        runner: &dyn CommandRunner,
    ) -> Result<RunReport, EngineError> {
        let reporter = options.reporter();

        if name == CLEAN_GOAL {
            let dry_run = matches!(options.mode, Mode::Clean { dry_run: true });
            let all: Vec<RuleId> = self.graph.rules().map(|(id, _)| id).collect();
            info!(rules = all.len(), dry_run, "cleaning every rule");
            return Ok(clean_rules(&self.graph, &all, &self.root, dry_run, reporter));
        }

        if let Mode::Clean { dry_run } = options.mode {
            self.graph.refresh_secondary_dependencies(&self.root);
            let targets = self.goals.resolve_goal(name)?;
            let roots = producers_of(&self.graph, targets, &self.root)?;
            let reachable = self.graph.topological_order(&roots)?;
            info!(goal = name, rules = reachable.len(), dry_run, "cleaning goal");
            return Ok(clean_rules(&self.graph, &reachable, &self.root, dry_run, reporter));
        }

        let plan = self.plan(name)?;
        debug!(
            goal = name,
            reachable = plan.order.len(),
            stale = plan.stale.len(),
            "planned"
        );
        if plan.stale.is_empty() {
            reporter.nothing_to_do(name);
        }
        execute(
            &self.graph,
            &plan,
            &self.root,
            runner,
            &ExecOptions {
                jobs: options.jobs,
                fail_fast: options.fail_fast,
                reporter,
            },
        )
    }

    /// Rule listing for `--list-rules`.
    pub fn describe_rules(&self) -> String {
        self.graph.describe_rules()
    }

    /// Goal listing for `--list-goals`.
    pub fn describe_goals(&self) -> String {
        self.goals.describe_goals()
    }

    /// Write the graph in Graphviz format.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_dot(&self, path: &Path) -> Result<(), EngineError> {
        self.graph.write_dot(path)
    }
}
