//! The rule: the graph's unit of production.

use std::path::{Component, Path, PathBuf};

/// What a clean removes for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteOnClean {
    /// Targets survive a clean.
    #[default]
    None,
    /// Each target file is removed individually.
    DeleteTargetFiles,
    /// The directory containing each target is removed recursively.
    DeleteTargetDirectory,
}

impl From<smelt_config::CleanPolicy> for DeleteOnClean {
    fn from(policy: smelt_config::CleanPolicy) -> Self {
        match policy {
            smelt_config::CleanPolicy::None => Self::None,
            smelt_config::CleanPolicy::Files => Self::DeleteTargetFiles,
            smelt_config::CleanPolicy::Directory => Self::DeleteTargetDirectory,
        }
    }
}

/// A command run after the main command of a rule succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCommand {
    pub title: String,
    pub command: Vec<String>,
}

/// A declared unit of work producing `targets` from `dependencies`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Progress label, e.g. "Compiling dom.cpp".
    pub title: String,
    /// Artifacts this rule produces. Never empty once registered.
    pub targets: Vec<PathBuf>,
    /// Declared prerequisites.
    pub dependencies: Vec<PathBuf>,
    /// Prerequisites discovered from dependency records; refreshed every run.
    pub secondary_dependencies: Vec<PathBuf>,
    /// Dependency records written by `command` on a previous run.
    pub secondary_dependency_files: Vec<PathBuf>,
    /// Tokenized command line. Empty for pure aggregation rules.
    pub command: Vec<String>,
    pub post_commands: Vec<PostCommand>,
    /// Higher runs first among simultaneously ready rules.
    pub priority: i64,
    pub delete_on_clean: DeleteOnClean,
    /// Remove the targets when the main command fails.
    pub delete_target_on_error: bool,
}

impl Rule {
    /// Create a rule producing `targets`, labelled `title` in progress output.
    pub fn new<I, P>(targets: I, title: &str) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut rule = Self {
            title: title.to_owned(),
            targets: Vec::new(),
            dependencies: Vec::new(),
            secondary_dependencies: Vec::new(),
            secondary_dependency_files: Vec::new(),
            command: Vec::new(),
            post_commands: Vec::new(),
            priority: 0,
            delete_on_clean: DeleteOnClean::None,
            delete_target_on_error: false,
        };
        for target in targets {
            push_unique(&mut rule.targets, normalize_path(target.as_ref()));
        }
        if rule.title.is_empty() {
            rule.title = rule
                .targets
                .first()
                .map(|t| t.display().to_string())
                .unwrap_or_default();
        }
        rule
    }

    /// Add a declared dependency; duplicates are ignored.
    pub fn add_dependency(&mut self, path: impl AsRef<Path>) {
        push_unique(&mut self.dependencies, normalize_path(path.as_ref()));
    }

    #[must_use]
    pub fn with_dependency(mut self, path: impl AsRef<Path>) -> Self {
        self.add_dependency(path);
        self
    }

    #[must_use]
    pub fn with_dependencies<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self.add_dependency(path);
        }
        self
    }

    #[must_use]
    pub fn with_command<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = tokens.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_post_command<I, S>(mut self, title: &str, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_commands.push(PostCommand {
            title: title.to_owned(),
            command: tokens.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_delete_on_clean(mut self, policy: DeleteOnClean) -> Self {
        self.delete_on_clean = policy;
        self
    }

    #[must_use]
    pub fn with_delete_target_on_error(mut self) -> Self {
        self.delete_target_on_error = true;
        self
    }

    /// Register a dependency record to merge before staleness analysis.
    #[must_use]
    pub fn with_secondary_dependency_file(mut self, path: impl AsRef<Path>) -> Self {
        push_unique(
            &mut self.secondary_dependency_files,
            normalize_path(path.as_ref()),
        );
        self
    }

    /// Union discovered prerequisites into the secondary set.
    pub fn merge_secondary(&mut self, paths: impl IntoIterator<Item = PathBuf>) -> usize {
        let mut added = 0usize;
        for path in paths {
            let path = normalize_path(&path);
            if self.dependencies.contains(&path) || self.targets.contains(&path) {
                continue;
            }
            if push_unique(&mut self.secondary_dependencies, path) {
                added = added.saturating_add(1);
            }
        }
        added
    }

    /// Declared dependencies followed by secondary ones.
    pub fn all_dependencies(&self) -> impl Iterator<Item = &PathBuf> {
        self.dependencies
            .iter()
            .chain(self.secondary_dependencies.iter())
    }

    /// Short identifier used in cycle chains: the first target.
    pub fn name(&self) -> String {
        self.targets
            .first()
            .map(|t| t.display().to_string())
            .unwrap_or_else(|| self.title.clone())
    }
}

fn push_unique(list: &mut Vec<PathBuf>, path: PathBuf) -> bool {
    if list.contains(&path) {
        false
    } else {
        list.push(path);
        true
    }
}

/// Lexically normalize a path: drop `.` components, keep `..` as written.
pub fn normalize_path(path: &Path) -> PathBuf {
    let normalized: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}
