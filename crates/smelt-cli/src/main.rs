#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::Parser;
use smelt_config::{Buildfile, Settings, BUILDFILE_NAME};
use smelt_engine::{Mode, ProcessRunner, RunOptions, RunReport, CLEAN_GOAL};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "smelt", about = "A rule-driven incremental build engine")]
#[command(version)]
struct Cli {
    /// Goal to build; `clean` deletes build products
    #[arg(default_value = "all")]
    goal: String,
    /// Maximum parallel jobs: 0 uses every processor, 1 builds sequentially and echoes commands
    jobs: Option<usize>,
    /// Buildfile to read; its directory is the build root
    #[arg(short = 'f', long = "file", default_value = BUILDFILE_NAME)]
    file: PathBuf,
    /// Delete the goal's build products instead of building it
    #[arg(long)]
    clean: bool,
    /// With a clean, only print what would be removed
    #[arg(long)]
    dry_run: bool,
    /// Stop starting new rules after the first failure
    #[arg(long)]
    fail_fast: bool,
    /// Do not prefix rule titles with a `[n/total]` counter
    #[arg(long)]
    no_progress: bool,
    /// Print every rule and exit
    #[arg(long)]
    list_rules: bool,
    /// Print every goal and exit
    #[arg(long)]
    list_goals: bool,
    /// Write the dependency graph in Graphviz format and exit
    #[arg(long, value_name = "PATH")]
    dot: Option<PathBuf>,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(Some(report)) => report.print_error_count_and_exit_on_error(),
        Ok(None) => {}
        Err(msg) => {
            eprintln!("error: {msg}");
            process::exit(1);
        }
    }
}

/// Diagnostics are off unless `SMELT_LOG` asks for them.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SMELT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load, validate, and run. Returns `None` when only a listing was requested.
fn run(cli: &Cli) -> CliResult<Option<RunReport>> {
    if !cli.file.exists() {
        return Err(format!(
            "no {} found at {}; pass -f to point at a buildfile",
            BUILDFILE_NAME,
            cli.file.display()
        )
        .into());
    }

    let buildfile = Buildfile::from_path(&cli.file)?;
    let root = smelt_engine::buildfile_root(&cli.file);
    let mut make = smelt_engine::build_make(&buildfile, &root)?;
    make.check_rules()?;

    if cli.list_rules || cli.list_goals || cli.dot.is_some() {
        if cli.list_rules {
            print!("{}", make.describe_rules());
        }
        if cli.list_goals {
            print!("{}", make.describe_goals());
        }
        if let Some(path) = &cli.dot {
            make.write_dot(path)?;
            eprintln!("       Wrote {}", path.display());
        }
        return Ok(None);
    }

    let options = run_options(cli, &buildfile.settings)?;
    let start = Instant::now();
    let report = make.run_goal(&cli.goal, &options, &ProcessRunner)?;

    if report.failure_count() == 0 {
        match options.mode {
            Mode::Clean { dry_run: true } => eprintln!(
                "    Would remove {} path(s) for goal `{}`",
                report.removed().len(),
                cli.goal
            ),
            Mode::Clean { dry_run: false } => eprintln!(
                "     Cleaned goal `{}` ({} path(s) removed)",
                cli.goal,
                report.removed().len()
            ),
            Mode::Build => eprintln!(
                "    Finished goal `{}` in {:.2}s",
                cli.goal,
                start.elapsed().as_secs_f64()
            ),
        }
    }
    Ok(Some(report))
}

/// Command-line flags take precedence over the buildfile's `[settings]`.
fn run_options(cli: &Cli, settings: &Settings) -> CliResult<RunOptions> {
    let clean = cli.clean || cli.goal == CLEAN_GOAL;
    if cli.dry_run && !clean {
        return Err("--dry-run only applies to a clean; add --clean or use the `clean` goal".into());
    }
    let jobs = cli.jobs.unwrap_or(settings.jobs);
    Ok(RunOptions {
        jobs,
        fail_fast: cli.fail_fast || settings.fail_fast,
        show_progress: !cli.no_progress && settings.show_progress,
        echo_commands: jobs == 1,
        quiet: false,
        mode: if clean {
            Mode::Clean {
                dry_run: cli.dry_run,
            }
        } else {
            Mode::Build
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_defaults() {
        let cli = Cli::try_parse_from(["smelt"]).unwrap();
        assert_eq!(cli.goal, "all");
        assert!(cli.jobs.is_none());
        assert_eq!(cli.file, PathBuf::from("smelt.toml"));
        assert!(!cli.clean);
        assert!(!cli.dry_run);
    }

    #[test]
    fn parse_goal_and_jobs() {
        let cli = Cli::try_parse_from(["smelt", "compile", "4"]).unwrap();
        assert_eq!(cli.goal, "compile");
        assert_eq!(cli.jobs, Some(4));
    }

    #[test]
    fn parse_rejects_non_numeric_jobs() {
        assert!(Cli::try_parse_from(["smelt", "all", "many"]).is_err());
    }

    #[test]
    fn parse_flags() {
        let cli = Cli::try_parse_from([
            "smelt",
            "all",
            "-f",
            "emulation/dom/smelt.toml",
            "--clean",
            "--dry-run",
            "--fail-fast",
            "--no-progress",
            "--dot",
            "deps.dot",
        ])
        .unwrap();
        assert_eq!(cli.file, PathBuf::from("emulation/dom/smelt.toml"));
        assert!(cli.clean && cli.dry_run && cli.fail_fast && cli.no_progress);
        assert_eq!(cli.dot, Some(PathBuf::from("deps.dot")));
    }

    #[test]
    fn flags_override_settings() {
        let settings = Settings {
            jobs: 8,
            fail_fast: false,
            show_progress: true,
        };
        let cli =
            Cli::try_parse_from(["smelt", "all", "1", "--fail-fast", "--no-progress"]).unwrap();
        let options = run_options(&cli, &settings).unwrap();
        assert_eq!(options.jobs, 1);
        assert!(options.echo_commands);
        assert!(options.fail_fast);
        assert!(!options.show_progress);
        assert_eq!(options.mode, Mode::Build);

        let cli = Cli::try_parse_from(["smelt"]).unwrap();
        let options = run_options(&cli, &settings).unwrap();
        assert_eq!(options.jobs, 8);
        assert!(!options.echo_commands);
    }

    #[test]
    fn clean_goal_selects_clean_mode() {
        let cli = Cli::try_parse_from(["smelt", "clean", "--dry-run"]).unwrap();
        let options = run_options(&cli, &Settings::default()).unwrap();
        assert_eq!(options.mode, Mode::Clean { dry_run: true });
    }

    #[test]
    fn dry_run_without_clean_is_rejected() {
        let cli = Cli::try_parse_from(["smelt", "all", "--dry-run"]).unwrap();
        assert!(run_options(&cli, &Settings::default()).is_err());
    }

    #[test]
    fn missing_buildfile_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("smelt.toml");
        let cli = Cli::try_parse_from(["smelt", "-f", path.to_str().unwrap()]).unwrap();
        let err = run(&cli).unwrap_err();
        assert!(err.to_string().contains("no smelt.toml found"));
    }

    #[test]
    fn list_goals_runs_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("smelt.toml");
        std::fs::write(
            &path,
            r#"
[[rule]]
targets = ["out"]
command = ["sh", "-c", "exit 1"]

[[goal]]
name = "all"
targets = ["out"]
"#,
        )
        .unwrap();
        let cli =
            Cli::try_parse_from(["smelt", "-f", path.to_str().unwrap(), "--list-goals"]).unwrap();
        assert!(run(&cli).unwrap().is_none());
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn builds_and_cleans_through_buildfile() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("smelt.toml");
        std::fs::write(tmp.path().join("in.txt"), "hello").unwrap();
        std::fs::write(
            &path,
            r#"
[settings]
show_progress = false

[[rule]]
targets = ["out/copy.txt"]
dependencies = ["in.txt"]
command = ["cp", "in.txt", "out/copy.txt"]
clean = "files"

[[goal]]
name = "all"
targets = ["out/copy.txt"]
"#,
        )
        .unwrap();
        let file = path.to_str().unwrap();

        let cli = Cli::try_parse_from(["smelt", "-f", file]).unwrap();
        let report = run(&cli).unwrap().unwrap();
        assert_eq!(report.failure_count(), 0);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("out/copy.txt")).unwrap(),
            "hello"
        );

        let cli = Cli::try_parse_from(["smelt", "clean", "-f", file]).unwrap();
        let report = run(&cli).unwrap().unwrap();
        assert_eq!(report.removed().len(), 1);
        assert!(!tmp.path().join("out/copy.txt").exists());
    }
}
