//! Turning a parsed `smelt.toml` into a [`Make`] context.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use smelt_config::{Buildfile, CompileTemplate, RuleSpec};
use tracing::debug;

use crate::error::EngineError;
use crate::make::Make;
use crate::rule::{DeleteOnClean, Rule};

/// Objects produced by each named compile template.
type Groups = HashMap<String, Vec<String>>;

/// Read the buildfile at `path` and register its rules and goals.
///
/// Relative paths in the buildfile resolve against its directory. The graph
/// is not validated; call [`Make::check_rules`] next.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, a glob pattern is
/// invalid, a `@group` is unknown, or a rule or goal is declared twice.
pub fn load_buildfile(path: &Path) -> Result<Make, EngineError> {
    let buildfile = Buildfile::from_path(path)?;
    build_make(&buildfile, &buildfile_root(path))
}

/// The directory relative paths in the buildfile at `path` resolve against.
pub fn buildfile_root(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Register everything `buildfile` declares into a context rooted at `root`.
///
/// # Errors
/// See [`load_buildfile`].
pub fn build_make(buildfile: &Buildfile, root: &Path) -> Result<Make, EngineError> {
    let mut make = Make::new(root);
    let mut groups = Groups::new();

    for template in &buildfile.compiles {
        let objects = expand_template(&mut make, template, root)?;
        if let Some(group) = &template.group {
            if groups.insert(group.clone(), objects).is_some() {
                return Err(EngineError::DuplicateGroup {
                    name: group.clone(),
                });
            }
        }
    }

    for spec in &buildfile.rules {
        make.add_rule(rule_from_spec(spec, &groups)?)?;
    }

    for goal in &buildfile.goals {
        let targets = expand_groups(&goal.targets, &groups)?;
        make.add_goal(&goal.name, targets, &goal.description)?;
    }

    debug!(
        root = %root.display(),
        rules = make.graph().len(),
        groups = groups.len(),
        "buildfile loaded"
    );
    Ok(make)
}

/// Add one compile rule per source matched by `template`. Returns the objects.
fn expand_template(
    make: &mut Make,
    template: &CompileTemplate,
    root: &Path,
) -> Result<Vec<String>, EngineError> {
    let mut sources: Vec<PathBuf> = Vec::new();
    for pattern in &template.sources {
        for source in smelt_util::fs::expand_glob(root, pattern)? {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
    }

    let mut objects = Vec::with_capacity(sources.len());
    for source in sources {
        let object = object_path(template, &source);
        let depfile = format!("{object}{}", template.depfile_suffix);
        let source_str = source.display().to_string();
        let substitute = |token: &str| {
            token
                .replace("{source}", &source_str)
                .replace("{object}", &object)
                .replace("{depfile}", &depfile)
        };

        let title = template
            .title
            .as_deref()
            .map_or_else(|| format!("Compiling {source_str}"), substitute);
        let priority = if template.priority_by_size {
            // A missing source is reported later as a dangling dependency.
            smelt_util::fs::file_size(&root.join(&source))
                .map_or(0, |size| i64::try_from(size).unwrap_or(i64::MAX))
        } else {
            template.priority
        };

        let mut rule = Rule::new([object.as_str()], &title)
            .with_dependency(&source)
            .with_dependencies(template.dependencies.iter())
            .with_command(template.command.iter().map(|t| substitute(t)))
            .with_secondary_dependency_file(&depfile)
            .with_priority(priority)
            .with_delete_on_clean(DeleteOnClean::from(template.clean));
        if template.delete_target_on_error {
            rule = rule.with_delete_target_on_error();
        }
        make.add_rule(rule)?;
        objects.push(object);
    }
    Ok(objects)
}

/// `object_dir/<source's parent directory name>/<source file name><suffix>`.
fn object_path(template: &CompileTemplate, source: &Path) -> String {
    let mut object = PathBuf::from(&template.object_dir);
    if let Some(dir) = source.parent().and_then(Path::file_name) {
        object.push(dir);
    }
    let file = source
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    object.push(format!("{file}{}", template.object_suffix));
    object.display().to_string()
}

fn rule_from_spec(spec: &RuleSpec, groups: &Groups) -> Result<Rule, EngineError> {
    let mut rule = Rule::new(&spec.targets, spec.title.as_deref().unwrap_or_default())
        .with_dependencies(expand_groups(&spec.dependencies, groups)?)
        .with_command(expand_groups(&spec.command, groups)?)
        .with_priority(spec.priority)
        .with_delete_on_clean(DeleteOnClean::from(spec.clean));
    for post in &spec.post_commands {
        let command = expand_groups(&post.command, groups)?;
        let title = post
            .title
            .clone()
            .unwrap_or_else(|| smelt_util::process::display_command(&command));
        rule = rule.with_post_command(&title, command);
    }
    for depfile in &spec.depfiles {
        rule = rule.with_secondary_dependency_file(depfile);
    }
    if spec.delete_target_on_error {
        rule = rule.with_delete_target_on_error();
    }
    Ok(rule)
}

/// Replace each `@group` token with that group's objects.
fn expand_groups(tokens: &[String], groups: &Groups) -> Result<Vec<String>, EngineError> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token.strip_prefix('@') {
            Some(name) if !name.is_empty() => {
                let objects = groups.get(name).ok_or_else(|| EngineError::UnknownGroup {
                    name: name.to_owned(),
                })?;
                out.extend(objects.iter().cloned());
            }
            _ => out.push(token.clone()),
        }
    }
    Ok(out)
}
