//! Parallel execution of a build plan.
//!
//! A fixed pool of workers pulls ready rules from a priority queue. The
//! queue, the per-rule states and the report live behind one mutex; a worker
//! holds it only to pick work or to record a result, never while a command
//! runs.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, warn};

use crate::error::EngineError;
use crate::graph::{RuleGraph, RuleId};
use crate::plan::BuildPlan;
use crate::report::{FailureReason, Reporter, RuleOutcome, RunReport, SkipCause};
use crate::rule::Rule;
use crate::runner::CommandRunner;

/// Options controlling plan execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Maximum parallel rules, `0` for the host processor count.
    pub jobs: usize,
    /// Stop dispatching new rules after the first failure.
    pub fail_fast: bool,
    pub reporter: Reporter,
}

/// Resolve a job count: `0` means the host's available parallelism.
pub fn resolve_jobs(jobs: usize) -> usize {
    if jobs == 0 {
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    } else {
        jobs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleState {
    Pending,
    Ready,
    Running,
    Done,
}

/// Heap entry: higher priority first, then earlier declaration.
#[derive(Debug, PartialEq, Eq)]
struct ReadyRule {
    priority: i64,
    id: RuleId,
}

impl Ord for ReadyRule {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ReadyRule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Scheduler<'g> {
    graph: &'g RuleGraph,
    reporter: Reporter,
    fail_fast: bool,
    ready: BinaryHeap<ReadyRule>,
    states: HashMap<RuleId, RuleState>,
    /// Stale producers each rule still waits for.
    waiting: HashMap<RuleId, usize>,
    /// Stale consumers of each rule.
    dependents: HashMap<RuleId, Vec<RuleId>>,
    remaining: usize,
    running: usize,
    started: usize,
    total: usize,
    stop_dispatch: bool,
    report: RunReport,
}

impl<'g> Scheduler<'g> {
    fn new(graph: &'g RuleGraph, plan: &BuildPlan, options: &ExecOptions) -> Self {
        let stale = plan.stale_rules();
        let mut report = RunReport::new();
        for id in plan.up_to_date_rules() {
            report.record(id, RuleOutcome::UpToDate);
        }

        let mut waiting = HashMap::new();
        let mut dependents: HashMap<RuleId, Vec<RuleId>> = HashMap::new();
        let mut states = HashMap::new();
        for id in &stale {
            let producers: BTreeSet<RuleId> = graph
                .rule(*id)
                .into_iter()
                .flat_map(Rule::all_dependencies)
                .filter_map(|dep| graph.producer_of(dep))
                .filter(|p| p != id && plan.is_stale(*p))
                .collect();
            for producer in &producers {
                dependents.entry(*producer).or_default().push(*id);
            }
            waiting.insert(*id, producers.len());
            states.insert(*id, RuleState::Pending);
        }

        let mut scheduler = Self {
            graph,
            reporter: options.reporter,
            fail_fast: options.fail_fast,
            ready: BinaryHeap::new(),
            states,
            waiting,
            dependents,
            remaining: stale.len(),
            running: 0,
            started: 0,
            total: stale.len(),
            stop_dispatch: false,
            report,
        };
        for id in stale {
            if scheduler.waiting.get(&id) == Some(&0) {
                scheduler.make_ready(id);
            }
        }
        scheduler
    }

    fn title(&self, id: RuleId) -> String {
        self.graph
            .rule(id)
            .map(|r| r.title.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn make_ready(&mut self, id: RuleId) {
        let priority = self.graph.rule(id).map_or(0, |r| r.priority);
        self.states.insert(id, RuleState::Ready);
        self.ready.push(ReadyRule { priority, id });
    }

    /// Pop the best ready rule and mark it running. Returns its progress index.
    fn dispatch(&mut self) -> Option<(RuleId, usize)> {
        if self.stop_dispatch {
            return None;
        }
        let next = self.ready.pop()?;
        self.states.insert(next.id, RuleState::Running);
        self.running = self.running.saturating_add(1);
        self.started = self.started.saturating_add(1);
        self.report.record_dispatch(next.id);
        debug!(rule = %next.id, priority = next.priority, "dispatch");
        Some((next.id, self.started))
    }

    fn finish(&mut self, id: RuleId, outcome: RuleOutcome) {
        self.states.insert(id, RuleState::Done);
        self.remaining = self.remaining.saturating_sub(1);
        self.report.record(id, outcome);
    }

    fn complete(&mut self, id: RuleId, outcome: RuleOutcome) {
        self.running = self.running.saturating_sub(1);
        let failed = matches!(outcome, RuleOutcome::Failed(_));
        if let RuleOutcome::Failed(reason) = &outcome {
            self.reporter.rule_failed(&self.title(id), reason);
        }
        self.finish(id, outcome);

        if failed {
            self.skip_dependents_of(id);
            if self.fail_fast {
                self.stop_all(SkipCause::FailFast);
            }
            return;
        }

        let dependents = self.dependents.get(&id).cloned().unwrap_or_default();
        for dependent in dependents {
            let Some(count) = self.waiting.get_mut(&dependent) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 && self.states.get(&dependent) == Some(&RuleState::Pending) {
                self.make_ready(dependent);
            }
        }
    }

    fn skip_dependents_of(&mut self, failed: RuleId) {
        let rule = self.title(failed);
        let mut stack = self.dependents.get(&failed).cloned().unwrap_or_default();
        while let Some(id) = stack.pop() {
            if self.states.get(&id) != Some(&RuleState::Pending) {
                continue;
            }
            let cause = SkipCause::DependencyFailed { rule: rule.clone() };
            self.reporter.rule_skipped(&self.title(id), &cause);
            self.finish(id, RuleOutcome::Skipped(cause));
            stack.extend(self.dependents.get(&id).cloned().unwrap_or_default());
        }
    }

    /// Skip every rule that has not started.
    fn stop_all(&mut self, cause: SkipCause) {
        self.stop_dispatch = true;
        self.ready.clear();
        let mut idle: Vec<RuleId> = self
            .states
            .iter()
            .filter(|(_, s)| matches!(s, RuleState::Pending | RuleState::Ready))
            .map(|(id, _)| *id)
            .collect();
        idle.sort();
        for id in idle {
            self.reporter.rule_skipped(&self.title(id), &cause);
            self.finish(id, RuleOutcome::Skipped(cause.clone()));
        }
    }
}

struct Shared<'g> {
    scheduler: Mutex<Scheduler<'g>>,
    wake: Condvar,
}

impl<'g> Shared<'g> {
    fn lock(&self) -> MutexGuard<'_, Scheduler<'g>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Context<'a> {
    graph: &'a RuleGraph,
    root: &'a Path,
    runner: &'a dyn CommandRunner,
    reporter: Reporter,
}

/// Run every stale rule of `plan`, up to `options.jobs` at a time.
///
/// Rule failures never abort the run: they are recorded in the returned
/// report, and only the failed rule's dependents are skipped.
///
/// # Errors
/// Returns an error only if the worker pool cannot be created.
pub fn execute(
    graph: &RuleGraph,
    plan: &BuildPlan,
    root: &Path,
    runner: &dyn CommandRunner,
    options: &ExecOptions,
) -> Result<RunReport, EngineError> {
    let scheduler = Scheduler::new(graph, plan, options);
    if scheduler.total == 0 {
        return Ok(scheduler.report);
    }

    let workers = resolve_jobs(options.jobs).min(scheduler.total).max(1);
    debug!(workers, stale = scheduler.total, "starting execution");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("smelt-worker-{i}"))
        .build()
        .map_err(|e| EngineError::ThreadPool {
            jobs: workers,
            message: e.to_string(),
        })?;

    let shared = Shared {
        scheduler: Mutex::new(scheduler),
        wake: Condvar::new(),
    };
    let context = Context {
        graph,
        root,
        runner,
        reporter: options.reporter,
    };

    pool.scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| worker(&shared, &context));
        }
    });

    let scheduler = shared
        .scheduler
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    Ok(scheduler.report)
}

fn worker(shared: &Shared<'_>, context: &Context<'_>) {
    loop {
        let job = {
            let mut scheduler = shared.lock();
            loop {
                if scheduler.remaining == 0 {
                    break None;
                }
                if let Some(job) = scheduler.dispatch() {
                    break Some((job, scheduler.total));
                }
                if scheduler.running == 0 {
                    // Nothing running and nothing ready: no completion can
                    // ever wake us again.
                    error!(
                        remaining = scheduler.remaining,
                        "scheduler stalled; skipping remaining rules"
                    );
                    scheduler.stop_all(SkipCause::FailFast);
                    break None;
                }
                scheduler = shared
                    .wake
                    .wait(scheduler)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let Some(((id, index), total)) = job else {
            shared.wake.notify_all();
            return;
        };

        let outcome = match context.graph.rule(id) {
            Some(rule) => {
                context.reporter.rule_started(index, total, &rule.title);
                run_rule(rule, context)
            }
            None => RuleOutcome::Failed(FailureReason::Io {
                message: format!("unknown rule {id}"),
            }),
        };

        shared.lock().complete(id, outcome);
        shared.wake.notify_all();
    }
}

/// Run one rule's command, then its post-commands in order.
fn run_rule(rule: &Rule, context: &Context<'_>) -> RuleOutcome {
    let root = context.root;
    let reporter = context.reporter;

    for target in &rule.targets {
        if let Some(parent) = root.join(target).parent() {
            if let Err(e) = smelt_util::fs::ensure_dir(parent) {
                return RuleOutcome::Failed(FailureReason::Io {
                    message: e.to_string(),
                });
            }
        }
    }

    if !rule.command.is_empty() {
        reporter.command(&rule.command);
        let failure = match context.runner.run(&rule.command, root) {
            Ok(output) => {
                reporter.output(&output);
                (!output.success).then_some(FailureReason::Command {
                    exit_code: output.exit_code,
                })
            }
            Err(e) => Some(FailureReason::Spawn {
                message: e.to_string(),
            }),
        };
        if let Some(reason) = failure {
            if rule.delete_target_on_error {
                delete_targets(rule, root);
            }
            return RuleOutcome::Failed(reason);
        }
    }

    for post in rule.post_commands.iter().filter(|p| !p.command.is_empty()) {
        reporter.post_command_started(&post.title);
        reporter.command(&post.command);
        match context.runner.run(&post.command, root) {
            Ok(output) => {
                reporter.output(&output);
                if !output.success {
                    return RuleOutcome::Failed(FailureReason::PostCommand {
                        title: post.title.clone(),
                        exit_code: output.exit_code,
                    });
                }
            }
            Err(e) => {
                return RuleOutcome::Failed(FailureReason::Spawn {
                    message: format!("post-command `{}`: {e}", post.title),
                })
            }
        }
    }

    for target in &rule.targets {
        if !root.join(target).exists() {
            warn!(
                rule = %rule.title,
                target = %target.display(),
                "command succeeded without producing its target"
            );
        }
    }
    RuleOutcome::Succeeded
}

fn delete_targets(rule: &Rule, root: &Path) {
    for target in &rule.targets {
        match smelt_util::fs::remove_file_if_exists(&root.join(target)) {
            Ok(true) => debug!(target = %target.display(), "removed partial target"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "cannot remove partial target"),
        }
    }
}
