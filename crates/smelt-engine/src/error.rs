//! Error types for smelt-engine.

/// Errors produced by engine operations.
///
/// Every variant except `Io` and `Util` is a configuration error: it is
/// detected before any command runs.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A filesystem operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] smelt_util::error::UtilError),

    /// The buildfile could not be read.
    #[error("{0}")]
    Config(#[from] smelt_config::ConfigError),

    /// A rule declared no targets.
    #[error("rule `{title}` declares no targets")]
    EmptyTargets { title: String },

    /// Two rules claim the same target.
    #[error("target {target} is produced by both `{existing}` and `{duplicate}`")]
    DuplicateTarget {
        target: String,
        existing: String,
        duplicate: String,
    },

    /// A goal name was registered twice.
    #[error("goal `{name}` is already defined")]
    DuplicateGoal { name: String },

    /// The requested goal does not exist.
    #[error("unknown goal `{name}`; available goals: {known}")]
    UnknownGoal { name: String, known: String },

    /// A goal target is neither produced by a rule nor present on disk.
    #[error("no rule produces {target} and the file does not exist")]
    UnknownTarget { target: String },

    /// The rule graph contains a cycle.
    #[error("dependency cycle detected: {cycle}")]
    CycleDetected { cycle: String },

    /// A declared dependency is neither a file nor another rule's target.
    #[error("rule `{rule}` depends on {dependency}, which does not exist and no rule produces it")]
    DanglingDependency { rule: String, dependency: String },

    /// A secondary dependency record is malformed.
    #[error("malformed dependency file {path}:{line}: {message}")]
    DependencyFileParse {
        path: String,
        line: usize,
        message: String,
    },

    /// A `@group` reference names no compile template.
    #[error("unknown group `@{name}`; declare a [[compile]] section with group = \"{name}\"")]
    UnknownGroup { name: String },

    /// Two compile templates share a group name.
    #[error("group `@{name}` is declared more than once")]
    DuplicateGroup { name: String },

    /// The worker pool could not be created.
    #[error("cannot start {jobs} worker(s): {message}")]
    ThreadPool { jobs: usize, message: String },
}
