//! Multi-module workspaces
//!
//! Members are module directories matched by glob patterns. Each member is
//! processed by its own [`Pipeline`], several at a time.

use anyhow::Result;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{Config, Overrides};
use crate::log::Logger;
use crate::pipeline::{Goal, Module, Outcome, Pipeline};

/// A workspace containing multiple modules
#[derive(Debug)]
pub struct Workspace {
    pub root_dir: PathBuf,
    pub modules: Vec<Module>,
}

impl Workspace {
    /// Discover member modules from glob patterns relative to `root_dir`.
    /// Modules are returned sorted by path, without duplicates.
    pub fn discover(
        root_dir: &Path,
        root_config: &Path,
        patterns: &[String],
        overrides: &Overrides,
    ) -> Result<Self> {
        let mut dirs: Vec<PathBuf> = Vec::new();

        for pattern in patterns {
            let full_pattern = root_dir.join(pattern);
            let full_pattern_str = full_pattern.to_string_lossy();

            for entry in glob::glob(&full_pattern_str)? {
                if let Ok(path) = entry {
                    if path.is_dir() {
                        dirs.push(path);
                    }
                }
            }
        }

        dirs.sort();
        dirs.dedup();

        let mut modules = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let mut config = Config::load_member(root_config, &dir)?;
            overrides.apply(&mut config)?;
            modules.push(Module::new(dir, config));
        }

        Ok(Workspace {
            root_dir: root_dir.to_path_buf(),
            modules,
        })
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name()).collect()
    }
}

/// Outcome of one module of a workspace run
#[derive(Debug)]
pub struct ModuleResult {
    pub name: String,
    pub dir: PathBuf,
    pub outcome: Result<Outcome>,
}

/// Run `goal` on every module, at most `jobs` at a time. Results are in the
/// order of `modules`.
pub async fn run_modules(modules: Vec<Module>, goal: Goal, jobs: usize, verbose: bool) -> Vec<ModuleResult> {
    let jobs = jobs.max(1);
    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut join_set = JoinSet::new();
    let count = modules.len();

    println!(
        "{} {} {} module(s) with {} workers",
        "⚡".yellow(),
        format!("Running {}:", goal).bold(),
        count,
        jobs
    );

    for (index, module) in modules.into_iter().enumerate() {
        let sem = semaphore.clone();

        join_set.spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            let name = module.name();
            let dir = module.dir.clone();

            let prefix = name.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let log = Logger::new(verbose).with_prefix(prefix);
                Pipeline::new(&module, log).execute(goal)
            })
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("Module run panicked: {}", e)));

            (index, ModuleResult { name, dir, outcome })
        });
    }

    let mut results: Vec<Option<ModuleResult>> = (0..count).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => eprintln!("{} Module run panicked: {}", "✗".red(), e),
        }
    }

    results.into_iter().flatten().collect()
}

/// Combine module outcomes: any error is an error, otherwise the most severe
/// outcome wins (failed, then passed, then skipped)
pub fn overall_outcome(results: &[ModuleResult]) -> Result<Outcome> {
    let errors: Vec<&ModuleResult> = results.iter().filter(|r| r.outcome.is_err()).collect();
    if !errors.is_empty() {
        let names: Vec<&str> = errors.iter().map(|r| r.name.as_str()).collect();
        anyhow::bail!("{} module(s) failed with an error: {}", errors.len(), names.join(", "));
    }

    let mut overall = Outcome::Skipped("No modules found.".to_string());
    for result in results {
        if let Ok(ref outcome) = result.outcome {
            let outcome = match outcome {
                Outcome::Failed(message) => Outcome::Failed(format!("{}: {}", result.name, message)),
                other => other.clone(),
            };
            if outcome.severity() > overall.severity() {
                overall = outcome;
            }
        }
    }

    Ok(overall)
}

pub fn print_summary(results: &[ModuleResult]) {
    println!();
    println!("{}", "Change coverage summary:".bold());

    for result in results {
        match result.outcome {
            Ok(Outcome::Passed) => println!("  {} {}", "✓".green(), result.name),
            Ok(Outcome::Skipped(ref reason)) => {
                println!("  {} {} {}", "-".dimmed(), result.name, reason.dimmed())
            }
            Ok(Outcome::Failed(ref message)) => {
                println!("  {} {} {}", "✗".red(), result.name, message.red())
            }
            Err(ref e) => println!("  {} {} {}", "✗".red(), result.name, format!("{:#}", e).red()),
        }
    }
}
