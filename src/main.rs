use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use changecov::config::CONFIG_FILE;
use changecov::log::Logger;
use changecov::workspace::{self, Workspace};
use changecov::{Config, Goal, Module, Outcome, Overrides, Pipeline};

#[derive(Parser)]
#[command(name = "changecov")]
#[command(about = "Measure and enforce test coverage of changed code")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: changecov.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure coverage of changed code and write the summary
    Report(GoalArgs),

    /// Enforce coverage requirements against the written summary
    Check(GoalArgs),

    /// Measure and enforce in one step
    Run(GoalArgs),
}

#[derive(Args)]
struct GoalArgs {
    /// Run every module matched by the [workspace] members patterns
    #[arg(long)]
    workspace: bool,

    /// Branch to compare with
    #[arg(long)]
    branch: Option<String>,

    /// Minimum percentage of changed lines covered
    #[arg(long)]
    line_requirement: Option<f64>,

    /// Minimum percentage of changed branches covered
    #[arg(long)]
    branch_requirement: Option<f64>,

    /// Source root, relative to the module directory (repeatable)
    #[arg(long = "source-root")]
    source_roots: Vec<String>,

    /// JaCoCo XML report
    #[arg(long)]
    report: Option<String>,

    /// Change coverage summary file
    #[arg(long)]
    summary: Option<String>,

    /// Skip the run
    #[arg(long)]
    skip: bool,
}

impl GoalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            compare_branch: self.branch.clone(),
            line_requirement: self.line_requirement,
            branch_requirement: self.branch_requirement,
            source_roots: self.source_roots.clone(),
            report: self.report.clone(),
            summary: self.summary.clone(),
            skip: self.skip,
        }
    }
}

fn main() {
    match run() {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<Outcome> {
    let cli = Cli::parse();

    let (goal, args) = match cli.command {
        Commands::Report(args) => (Goal::Report, args),
        Commands::Check(args) => (Goal::Check, args),
        Commands::Run(args) => (Goal::Run, args),
    };

    let (config_path, base_dir) = locate_config(cli.config)?;
    let overrides = args.overrides();

    let mut config = Config::load(&config_path)
        .with_context(|| format!("Could not load {}", config_path.display()))?;
    overrides.apply(&mut config)?;

    if args.workspace {
        cmd_workspace(&config, &config_path, &base_dir, &overrides, goal, cli.verbose)
    } else {
        let module = Module::new(base_dir, config);
        Pipeline::new(&module, Logger::new(cli.verbose)).execute(goal)
    }
}

/// Config file and module directory. An explicit config file must exist;
/// without one, `changecov.toml` in the current directory is optional.
fn locate_config(explicit: Option<PathBuf>) -> Result<(PathBuf, PathBuf)> {
    let current_dir = std::env::current_dir().context("Could not read current directory")?;

    match explicit {
        Some(path) => {
            let path = std::fs::canonicalize(&path)
                .with_context(|| format!("Could not find config file: {}", path.display()))?;
            let base_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| current_dir.clone());
            Ok((path, base_dir))
        }
        None => Ok((current_dir.join(CONFIG_FILE), current_dir)),
    }
}

#[tokio::main]
async fn cmd_workspace(
    config: &Config,
    config_path: &Path,
    base_dir: &Path,
    overrides: &Overrides,
    goal: Goal,
    verbose: bool,
) -> Result<Outcome> {
    let workspace_config = config
        .workspace
        .as_ref()
        .filter(|w| !w.members.is_empty())
        .with_context(|| format!("No [workspace] members configured in {}", config_path.display()))?;

    let members = Workspace::discover(base_dir, config_path, &workspace_config.members, overrides)?;

    let results = workspace::run_modules(members.modules, goal, workspace_config.jobs, verbose).await;
    workspace::print_summary(&results);

    for result in &results {
        if let Err(ref e) = result.outcome {
            eprintln!("{} {}: {:#}", "Error:".red().bold(), result.name, e);
        }
    }

    workspace::overall_outcome(&results)
}
