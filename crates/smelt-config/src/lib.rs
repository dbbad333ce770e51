//! Parse and validate `smelt.toml` buildfiles.

pub mod buildfile;

pub use buildfile::{
    Buildfile, CleanPolicy, CompileTemplate, ConfigError, GoalSpec, PostCommandSpec, RuleSpec,
    Settings, BUILDFILE_NAME,
};
