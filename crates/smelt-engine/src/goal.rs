//! Named, user-selectable target aggregates.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::rule::normalize_path;

/// Built-in goal that deletes build products instead of building them.
pub const CLEAN_GOAL: &str = "clean";

/// A named set of targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub name: String,
    pub targets: Vec<PathBuf>,
    pub description: String,
}

/// Goal lookup in declaration order. Owns no build state.
#[derive(Debug)]
pub struct GoalRegistry {
    goals: Vec<Goal>,
}

impl Default for GoalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GoalRegistry {
    /// A registry holding only the built-in `clean` goal.
    pub fn new() -> Self {
        Self {
            goals: vec![Goal {
                name: CLEAN_GOAL.to_owned(),
                targets: Vec::new(),
                description: "Deleting build products".to_owned(),
            }],
        }
    }

    /// Register a goal. Its targets are only checked when it is scheduled.
    ///
    /// # Errors
    /// Returns `DuplicateGoal` if the name is taken, including by `clean`.
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
        if self.get(name).is_some() {
            return Err(EngineError::DuplicateGoal {
                name: name.to_owned(),
            });
        }
        let mut resolved: Vec<PathBuf> = Vec::new();
        for target in targets {
            let target = normalize_path(target.as_ref());
            if !resolved.contains(&target) {
                resolved.push(target);
            }
        }
        self.goals.push(Goal {
            name: name.to_owned(),
            targets: resolved,
            description: description.to_owned(),
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.name == name)
    }

    /// The targets of goal `name`.
    ///
    /// # Errors
    /// Returns `UnknownGoal` listing the available goal names.
    pub fn resolve_goal(&self, name: &str) -> Result<&[PathBuf], EngineError> {
        self.get(name)
            .map(|g| g.targets.as_slice())
            .ok_or_else(|| EngineError::UnknownGoal {
                name: name.to_owned(),
                known: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.goals.iter().map(|g| g.name.as_str()).collect()
    }

    /// One line per goal: name and description.
    pub fn describe_goals(&self) -> String {
        let width = self.goals.iter().map(|g| g.name.len()).max().unwrap_or(0);
        let mut out = String::new();
        for goal in &self.goals {
            let _ = writeln!(out, "  {:<width$}  {}", goal.name, goal.description);
        }
        out
    }
}
