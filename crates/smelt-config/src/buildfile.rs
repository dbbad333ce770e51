use serde::Deserialize;
use std::path::Path;

/// Conventional buildfile name looked up in the current directory.
pub const BUILDFILE_NAME: &str = "smelt.toml";

/// The `smelt.toml` buildfile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Buildfile {
    #[serde(default)]
    pub settings: Settings,
    /// Per-source compile rule templates.
    #[serde(default, rename = "compile")]
    pub compiles: Vec<CompileTemplate>,
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleSpec>,
    #[serde(default, rename = "goal")]
    pub goals: Vec<GoalSpec>,
}

/// Defaults for an invocation; command-line flags take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Maximum parallel jobs, `0` for the host processor count.
    #[serde(default)]
    pub jobs: usize,
    /// Stop dispatching new rules after the first failure.
    #[serde(default)]
    pub fail_fast: bool,
    /// Prefix progress lines with `[ n/total]`.
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: 0,
            fail_fast: false,
            show_progress: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// What a clean removes for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanPolicy {
    /// Targets survive a clean.
    #[default]
    None,
    /// Each target file is removed.
    Files,
    /// The directory containing each target is removed recursively.
    Directory,
}

/// A command run after a rule's main command succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostCommandSpec {
    #[serde(default)]
    pub title: Option<String>,
    pub command: Vec<String>,
}

/// An explicitly declared rule.
///
/// Tokens of the form `@group` in `dependencies` and `command` expand to the
/// objects produced by the compile template with that group name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    #[serde(default)]
    pub title: Option<String>,
    pub targets: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, rename = "post_command")]
    pub post_commands: Vec<PostCommandSpec>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub clean: CleanPolicy,
    #[serde(default)]
    pub delete_target_on_error: bool,
    /// Compiler-written dependency records merged into `dependencies`.
    #[serde(default)]
    pub depfiles: Vec<String>,
}

/// A template producing one compile rule per source file.
///
/// `command` and `title` may use `{source}`, `{object}` and `{depfile}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompileTemplate {
    /// Name usable as `@group` in other rules and goals.
    #[serde(default)]
    pub group: Option<String>,
    /// Source paths or glob patterns, relative to the buildfile directory.
    pub sources: Vec<String>,
    #[serde(default = "default_object_dir")]
    pub object_dir: String,
    #[serde(default = "default_object_suffix")]
    pub object_suffix: String,
    #[serde(default = "default_depfile_suffix")]
    pub depfile_suffix: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Extra dependencies shared by every generated rule.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub clean: CleanPolicy,
    #[serde(default)]
    pub delete_target_on_error: bool,
    #[serde(default)]
    pub priority: i64,
    /// Use the source file size as priority so large files start first.
    #[serde(default)]
    pub priority_by_size: bool,
}

fn default_object_dir() -> String {
    "objects".to_owned()
}

fn default_object_suffix() -> String {
    ".o".to_owned()
}

fn default_depfile_suffix() -> String {
    ".dep".to_owned()
}

/// A named, user-selectable target aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoalSpec {
    pub name: String,
    pub targets: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl Buildfile {
    /// Read and parse a `smelt.toml` from the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str_at(&content, path)
    }

    /// Parse buildfile content; `path` is only used in error messages.
    ///
    /// # Errors
    /// Returns an error if the content is not a valid buildfile.
    pub fn from_str_at(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid smelt.toml at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DOM: &str = r#"
[[compile]]
group = "objects"
sources = ["dom.cpp", "../../src/*.cpp"]
command = ["g++", "-c", "{source}", "-o", "{object}", "-MD", "-MP", "-MF", "{depfile}"]
title = "Compiling {source}"
clean = "directory"
priority_by_size = true

[[rule]]
title = "Linking dom"
targets = ["dom", "dom.map"]
dependencies = ["@objects"]
command = ["g++", "@objects", "-o", "dom"]
delete_target_on_error = true
clean = "files"

[[rule.post_command]]
title = "Stripping dom"
command = ["strip", "-A", "-n", "-r", "-u", "dom"]

[[goal]]
name = "all"
targets = ["dom", "dom.map"]
description = "Building all"

[[goal]]
name = "compile"
targets = ["@objects"]
"#;

    fn parse(content: &str) -> Result<Buildfile, ConfigError> {
        Buildfile::from_str_at(content, Path::new("smelt.toml"))
    }

    #[test]
    fn parse_full_buildfile() {
        let bf = parse(DOM).unwrap();
        assert_eq!(bf.compiles.len(), 1);
        assert_eq!(bf.rules.len(), 1);
        assert_eq!(bf.goals.len(), 2);

        let compile = bf.compiles.first().unwrap();
        assert_eq!(compile.object_dir, "objects");
        assert_eq!(compile.object_suffix, ".o");
        assert_eq!(compile.depfile_suffix, ".dep");
        assert_eq!(compile.clean, CleanPolicy::Directory);
        assert!(compile.priority_by_size);

        let link = bf.rules.first().unwrap();
        assert_eq!(link.clean, CleanPolicy::Files);
        assert!(link.delete_target_on_error);
        assert_eq!(link.post_commands.len(), 1);
        assert_eq!(
            link.post_commands.first().unwrap().title.as_deref(),
            Some("Stripping dom")
        );

        assert_eq!(bf.goals.get(1).unwrap().description, "");
    }

    #[test]
    fn settings_defaults() {
        let bf = parse("").unwrap();
        assert_eq!(bf.settings, Settings::default());
        assert!(bf.settings.show_progress);
        assert_eq!(bf.settings.jobs, 0);
    }

    #[test]
    fn settings_explicit() {
        let bf = parse("[settings]\njobs = 4\nfail_fast = true\nshow_progress = false\n").unwrap();
        assert_eq!(bf.settings.jobs, 4);
        assert!(bf.settings.fail_fast);
        assert!(!bf.settings.show_progress);
    }

    #[test]
    fn rule_defaults() {
        let bf = parse("[[rule]]\ntargets = [\"out\"]\n").unwrap();
        let rule = bf.rules.first().unwrap();
        assert_eq!(rule.clean, CleanPolicy::None);
        assert!(!rule.delete_target_on_error);
        assert_eq!(rule.priority, 0);
        assert!(rule.command.is_empty());
        assert!(rule.depfiles.is_empty());
    }

    #[test]
    fn unknown_field_rejected() {
        let err = parse("[[rule]]\ntargets = [\"out\"]\ncomand = [\"cc\"]\n")
            .unwrap_err()
            .to_string();
        assert!(err.contains("comand"), "error was: {err}");
    }

    #[test]
    fn invalid_clean_policy_rejected() {
        assert!(parse("[[rule]]\ntargets = [\"out\"]\nclean = \"everything\"\n").is_err());
    }

    #[test]
    fn missing_targets_rejected() {
        assert!(parse("[[rule]]\ncommand = [\"cc\"]\n").is_err());
    }

    #[test]
    fn from_path_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Buildfile::from_path(&tmp.path().join(BUILDFILE_NAME))
            .unwrap_err()
            .to_string();
        assert!(err.contains("cannot read"), "error was: {err}");
    }

    #[test]
    fn from_path_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(BUILDFILE_NAME);
        std::fs::write(&path, DOM).unwrap();
        let bf = Buildfile::from_path(&path).unwrap();
        assert_eq!(bf.goals.first().unwrap().name, "all");
    }
}
