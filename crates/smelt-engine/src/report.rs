//! Per-rule outcomes, progress output, and the final pass/fail signal.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use smelt_util::process::{display_command, CommandOutput};

use crate::graph::RuleId;

/// Why a rule failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The main command exited unsuccessfully.
    Command { exit_code: Option<i32> },
    /// A post-command exited unsuccessfully after the main command succeeded.
    PostCommand { title: String, exit_code: Option<i32> },
    /// A command could not be started.
    Spawn { message: String },
    /// A filesystem operation on the rule's targets failed.
    Io { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command {
                exit_code: Some(code),
            } => write!(f, "command exited with status {code}"),
            Self::Command { exit_code: None } => f.write_str("command killed by signal"),
            Self::PostCommand {
                title,
                exit_code: Some(code),
            } => write!(f, "post-command `{title}` exited with status {code}"),
            Self::PostCommand {
                title,
                exit_code: None,
            } => write!(f, "post-command `{title}` killed by signal"),
            Self::Spawn { message } | Self::Io { message } => f.write_str(message),
        }
    }
}

/// Why a stale rule never ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCause {
    /// A rule it depends on (directly or transitively) failed.
    DependencyFailed { rule: String },
    /// Fail-fast stopped dispatching after another rule failed.
    FailFast,
}

/// Terminal state of a rule in one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Already satisfied; the command did not run.
    UpToDate,
    Succeeded,
    Failed(FailureReason),
    Skipped(SkipCause),
}

/// Outcomes of one goal execution.
#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: BTreeMap<RuleId, RuleOutcome>,
    /// Rules in the order they were handed to a worker.
    dispatched: Vec<RuleId>,
    /// Paths deleted (or, in a dry run, that would be deleted) by a clean.
    removed: Vec<PathBuf>,
    failures: usize,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: RuleId, outcome: RuleOutcome) {
        if matches!(outcome, RuleOutcome::Failed(_)) {
            self.failures = self.failures.saturating_add(1);
        }
        if let Some(RuleOutcome::Failed(_)) = self.outcomes.insert(id, outcome) {
            self.failures = self.failures.saturating_sub(1);
        }
    }

    pub fn record_dispatch(&mut self, id: RuleId) {
        self.dispatched.push(id);
    }

    pub fn record_removed(&mut self, path: PathBuf) {
        self.removed.push(path);
    }

    pub fn outcome(&self, id: RuleId) -> Option<&RuleOutcome> {
        self.outcomes.get(&id)
    }

    pub fn dispatch_order(&self) -> &[RuleId] {
        &self.dispatched
    }

    pub fn removed(&self) -> &[PathBuf] {
        &self.removed
    }

    pub fn failure_count(&self) -> usize {
        self.failures
    }

    /// Rules whose command actually ran (succeeded or failed).
    pub fn executed_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, RuleOutcome::Succeeded | RuleOutcome::Failed(_)))
            .count()
    }

    pub fn count(&self, predicate: impl Fn(&RuleOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| predicate(o)).count()
    }

    /// Process exit status: the failure count, capped to fit a status byte.
    pub fn exit_code(&self) -> i32 {
        u8::try_from(self.failures).map_or(255, i32::from)
    }

    /// Summary line, e.g. `2 errors`, or `None` when nothing failed.
    pub fn error_summary(&self) -> Option<String> {
        match self.failures {
            0 => None,
            1 => Some("1 error".to_owned()),
            n => Some(format!("{n} errors")),
        }
    }

    /// Print the error count and terminate with a non-zero status if any rule
    /// failed; return normally otherwise.
    pub fn print_error_count_and_exit_on_error(&self) {
        if let Some(summary) = self.error_summary() {
            eprintln!("error: {summary}");
            std::process::exit(self.exit_code());
        }
    }
}

/// Progress output on stderr.
///
/// Shared by all workers; each call prints whole lines.
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    /// Prefix rule titles with `[ n/total]`.
    pub show_progress: bool,
    /// Echo each command line before running it.
    pub echo_commands: bool,
    /// Print nothing at all.
    pub quiet: bool,
}

impl Default for Reporter {
    fn default() -> Self {
        Self {
            show_progress: true,
            echo_commands: false,
            quiet: false,
        }
    }
}

impl Reporter {
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    pub fn rule_started(&self, index: usize, total: usize, title: &str) {
        if self.quiet {
            return;
        }
        if self.show_progress {
            let width = total.to_string().len();
            eprintln!("[{index:>width$}/{total}] {title}");
        } else {
            eprintln!("{title}");
        }
    }

    pub fn command(&self, tokens: &[String]) {
        if !self.quiet && self.echo_commands && !tokens.is_empty() {
            eprintln!("{}", display_command(tokens));
        }
    }

    pub fn post_command_started(&self, title: &str) {
        if !self.quiet {
            eprintln!("       {title}");
        }
    }

    /// Relay whatever the command printed.
    pub fn output(&self, output: &CommandOutput) {
        if self.quiet {
            return;
        }
        if !output.stdout.is_empty() {
            eprint!("{}", with_newline(&output.stdout));
        }
        if !output.stderr.is_empty() {
            eprint!("{}", with_newline(&output.stderr));
        }
    }

    pub fn rule_failed(&self, title: &str, reason: &FailureReason) {
        if !self.quiet {
            eprintln!("error: {title}: {reason}");
        }
    }

    pub fn rule_skipped(&self, title: &str, cause: &SkipCause) {
        if self.quiet {
            return;
        }
        match cause {
            SkipCause::DependencyFailed { rule } => {
                eprintln!("    Skipping {title} (`{rule}` failed)");
            }
            SkipCause::FailFast => eprintln!("    Skipping {title} (stopped after failure)"),
        }
    }

    pub fn removed(&self, path: &Path, dry_run: bool) {
        if self.quiet {
            return;
        }
        if dry_run {
            eprintln!("    Would remove {}", path.display());
        } else {
            eprintln!("    Removing {}", path.display());
        }
    }

    pub fn nothing_to_do(&self, goal: &str) {
        if !self.quiet {
            eprintln!("    Goal `{goal}` is up to date");
        }
    }
}

fn with_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_owned()
    } else {
        format!("{text}\n")
    }
}
