//! Goals run against a single module: `report`, `check` and `run`

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::coverage::{
    aggregate, correlate_file, format_percentage, validate_threshold, CoveragePercentages,
    CoverageRecord, Counts, Dimension,
};
use crate::git::{self, BranchResolver, ChangeResolver};
use crate::log::{append_to_aggregate, Logger};
use crate::summary::ChangeCoverageSummary;

/// Log shared by every module of a repository, relative to its working tree
pub const AGGREGATE_LOG: &str = "target/change-coverage.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    /// Measure change coverage and persist the summary
    Report,
    /// Enforce the thresholds against a persisted summary
    Check,
    /// Measure and enforce in one go
    Run,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Goal::Report => write!(f, "report"),
            Goal::Check => write!(f, "check"),
            Goal::Run => write!(f, "run"),
        }
    }
}

/// How a goal ended. Errors are reported through `Err` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Passed => 0,
            Outcome::Failed(_) => 1,
            Outcome::Skipped(_) => 3,
        }
    }

    /// Rank used to combine module outcomes: failed over passed over skipped
    pub fn severity(&self) -> u8 {
        match self {
            Outcome::Skipped(_) => 0,
            Outcome::Passed => 1,
            Outcome::Failed(_) => 2,
        }
    }
}

/// Result of the report goal
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Skipped(String),
    Measured(CoveragePercentages),
}

/// A module directory and its effective configuration
#[derive(Debug, Clone)]
pub struct Module {
    pub dir: PathBuf,
    pub config: Config,
}

impl Module {
    pub fn new(dir: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            dir: dir.into(),
            config,
        }
    }

    pub fn name(&self) -> String {
        self.config.module_name(&self.dir)
    }
}

pub struct Pipeline<'m> {
    module: &'m Module,
    log: Logger,
}

impl<'m> Pipeline<'m> {
    pub fn new(module: &'m Module, log: Logger) -> Self {
        Self { module, log }
    }

    pub fn execute(&self, goal: Goal) -> Result<Outcome> {
        let outcome = match goal {
            Goal::Report => match self.report()? {
                Report::Skipped(reason) => Outcome::Skipped(reason),
                Report::Measured(_) => Outcome::Passed,
            },
            Goal::Check => self.check()?,
            Goal::Run => self.run()?,
        };
        self.log.flush();
        Ok(outcome)
    }

    /// Measure the coverage of the changes since the merge base with the
    /// comparison branch and write the summary
    pub fn report(&self) -> Result<Report> {
        let dir = &self.module.dir;
        let coverage_config = &self.module.config.coverage;

        if let Some(reason) = self.module_skip_reason(coverage_config.skip) {
            return Ok(self.skip_report(reason));
        }

        let report_path = coverage_config.report_path(dir)?;
        if !report_path.is_file() {
            return Ok(self.skip_report(format!(
                "JaCoCo report not found ({}). Ensure that the jacoco:report goal has been executed.",
                report_path.display()
            )));
        }

        let repo = match git::open_repository(dir) {
            Ok(repo) => repo,
            Err(e) if e.is_skip() => {
                self.log.debug(e.to_string());
                return Ok(self.skip_report("Not a Git repository, skipping.".to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .context("Repository has no working directory")?;

        let log_path = coverage_config.log_path(dir)?;
        self.log.attach_file(&log_path)?;

        let compare = BranchResolver::new(&repo).resolve(&coverage_config.compare_branch)?;
        if let Some(ref fallback) = compare.fallback {
            self.log.warn(fallback.to_string());
        }

        let source_roots = coverage_config.source_root_paths(dir)?;
        let changes = ChangeResolver::new(&repo)?.resolve(&compare, dir, &source_roots, &self.log)?;

        let coverage = if changes.has_changes() {
            self.log.info(changes.to_string());
            let records = correlate_file(&report_path, &changes)?;
            self.log_records(&records);
            aggregate(&records)
        } else {
            self.log.info("No new code found.");
            CoveragePercentages::complete()
        };

        let summary_path = coverage_config.summary_path(dir)?;
        ChangeCoverageSummary::from(coverage).write(&summary_path)?;
        self.log.debug(format!(
            "Change coverage summary written to {}.",
            summary_path.display()
        ));

        self.log.flush();
        append_to_aggregate(&log_path, &workdir.join(AGGREGATE_LOG), &self.module.name())?;

        Ok(Report::Measured(coverage))
    }

    /// Enforce the thresholds against the summary written by [`Pipeline::report`]
    pub fn check(&self) -> Result<Outcome> {
        let coverage_config = &self.module.config.coverage;

        let skip = coverage_config.skip || coverage_config.skip_check;
        if let Some(reason) = self.module_skip_reason(skip) {
            self.log.info(&reason);
            return Ok(Outcome::Skipped(reason));
        }

        let summary_path = coverage_config.summary_path(&self.module.dir)?;
        let summary = match ChangeCoverageSummary::read(&summary_path) {
            Ok(summary) => summary,
            Err(e) if is_skip(&e) => {
                let reason = "Change coverage report not found. Ensure that the report goal has been executed."
                    .to_string();
                self.log.info(&reason);
                return Ok(Outcome::Skipped(reason));
            }
            Err(e) => return Err(e),
        };

        let coverage = CoveragePercentages::from(summary);
        self.log.info(format!(
            "Changed branch code coverage: {}%",
            format_percentage(coverage.branch)
        ));
        self.log.info(format!(
            "Changed line code coverage: {}%",
            format_percentage(coverage.line)
        ));

        Ok(self.verdict(coverage))
    }

    /// Report, then enforce the thresholds on the measured coverage
    pub fn run(&self) -> Result<Outcome> {
        match self.report()? {
            Report::Skipped(reason) => Ok(Outcome::Skipped(reason)),
            Report::Measured(coverage) => Ok(self.verdict(coverage)),
        }
    }

    fn module_skip_reason(&self, skip: bool) -> Option<String> {
        let config = &self.module.config;
        if skip {
            return Some("Skipping.".to_string());
        }
        let packaging = &config.module.packaging;
        if config
            .coverage
            .skipped_packaging
            .iter()
            .any(|p| p.eq_ignore_ascii_case(packaging))
        {
            return Some(format!("Skipping {} module.", packaging.to_uppercase()));
        }
        None
    }

    fn skip_report(&self, reason: String) -> Report {
        self.log.info(&reason);
        Report::Skipped(reason)
    }

    fn log_records(&self, records: &[CoverageRecord]) {
        for record in records {
            record.log_to(&self.log);
        }

        let totals: Counts = records.iter().map(|record| record.counts()).sum();
        let coverage = aggregate(records);
        if totals.total_branches() > 0 {
            self.log.info(format!(
                "Changed {} code coverage: {}%",
                Dimension::Branch,
                format_percentage(coverage.branch)
            ));
        }
        if totals.total_lines() > 0 {
            self.log.info(format!(
                "Changed {} code coverage: {}%",
                Dimension::Line,
                format_percentage(coverage.line)
            ));
        }
    }

    fn verdict(&self, coverage: CoveragePercentages) -> Outcome {
        let coverage_config = &self.module.config.coverage;
        let result = validate_threshold(
            coverage,
            coverage_config.line_requirement,
            coverage_config.branch_requirement,
        );

        if self.log.is_debug_enabled() {
            result.print_summary();
        }

        match result.failure_message() {
            Some(message) => {
                self.log.error(&message);
                Outcome::Failed(message)
            }
            None => Outcome::Passed,
        }
    }
}

fn is_skip(e: &anyhow::Error) -> bool {
    e.downcast_ref::<crate::error::ChangeCoverageError>()
        .map(|e| e.is_skip())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_support::{numbered_lines, TestRepo};
    use std::fs;

    const JACOCO: &str = "target/site/jacoco/jacoco.xml";

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<report name="sample">
  <package name="com/example">
    <sourcefile name="Foo.java">
      <counter type="BRANCH" missed="0" covered="4"/>
      <counter type="LINE" missed="0" covered="10"/>
    </sourcefile>
    <sourcefile name="Bar.java">
      <line nr="5" mi="0" ci="3" mb="0" cb="0"/>
      <line nr="6" mi="2" ci="0" mb="0" cb="0"/>
    </sourcefile>
  </package>
</report>
"#;

    /// A repository with a `develop` branch and a feature commit adding
    /// Foo.java and changing lines 5 and 6 of Bar.java, under `module_dir`
    fn feature_repo(module_dir: &str) -> TestRepo {
        let repo = TestRepo::init();
        let source = |name: &str| format!("{}src/main/java/com/example/{}", module_dir, name);

        repo.write(&source("Bar.java"), &numbered_lines(10));
        repo.commit_all("initial commit");
        repo.branch("develop");

        repo.write(&source("Foo.java"), "class Foo {}\n");
        let bar = numbered_lines(10)
            .replace("statement5;", "changed5;")
            .replace("statement6;", "changed6;");
        repo.write(&source("Bar.java"), &bar);
        repo.commit_all("feature work");

        repo.write(&format!("{}{}", module_dir, JACOCO), REPORT);
        repo
    }

    fn run_goal(module: &Module, goal: Goal) -> Outcome {
        Pipeline::new(module, Logger::new(false)).execute(goal).unwrap()
    }

    #[test]
    fn test_run_fails_on_line_coverage() {
        let repo = feature_repo("");
        let module = Module::new(repo.path(), Config::default());

        let outcome = run_goal(&module, Goal::Run);

        assert_eq!(
            outcome,
            Outcome::Failed(
                "92% requirement for test coverage of changed lines not met (91.67%).".to_string()
            )
        );
        assert_eq!(outcome.exit_code(), 1);
    }

    #[test]
    fn test_run_passes_with_lower_requirement() {
        let repo = feature_repo("");
        let mut config = Config::default();
        config.coverage.line_requirement = 90.0;
        let module = Module::new(repo.path(), config);

        assert_eq!(run_goal(&module, Goal::Run), Outcome::Passed);
    }

    #[test]
    fn test_report_then_check() {
        let repo = feature_repo("");
        let module = Module::new(repo.path(), Config::default());

        assert_eq!(run_goal(&module, Goal::Report), Outcome::Passed);

        let summary_path = repo.path().join("target/site/change-coverage/report.xml");
        let summary = ChangeCoverageSummary::read(&summary_path).unwrap();
        assert_eq!(format_percentage(summary.line), "91.67");
        assert_eq!(summary.branch, 100.0);

        let log = fs::read_to_string(repo.path().join("target/change-coverage.log")).unwrap();
        assert!(log.contains("1 new files, 1 modified files (2 lines changed)"));
        assert!(log.contains("[WARNING] Changed file com/example/Bar.java: 1/2 new lines covered:"));
        assert!(log.contains("Changed branch code coverage: 100%"));
        assert!(log.contains("Changed line code coverage: 91.67%"));

        assert!(matches!(run_goal(&module, Goal::Check), Outcome::Failed(_)));
    }

    #[test]
    fn test_remote_fallback_is_logged() {
        let repo = feature_repo("");
        let develop = {
            let mut branch = repo.repo.find_branch("develop", git2::BranchType::Local).unwrap();
            let oid = branch.get().target().unwrap();
            branch.delete().unwrap();
            oid
        };
        repo.remote_branch("origin", "develop", develop);
        let module = Module::new(repo.path(), Config::default());

        assert_eq!(run_goal(&module, Goal::Report), Outcome::Passed);

        let log = fs::read_to_string(repo.path().join("target/change-coverage.log")).unwrap();
        assert!(log.contains("[WARNING] Branch develop not found locally, comparing with origin/develop."));
        assert!(log.contains("1 new files, 1 modified files (2 lines changed)"));
    }

    #[test]
    fn test_no_changes_writes_complete_summary() {
        let repo = TestRepo::init();
        repo.write("src/main/java/com/example/Bar.java", &numbered_lines(3));
        repo.commit_all("initial commit");
        repo.branch("develop");
        repo.write(JACOCO, REPORT);
        let module = Module::new(repo.path(), Config::default());

        assert_eq!(run_goal(&module, Goal::Run), Outcome::Passed);

        let summary =
            ChangeCoverageSummary::read(&repo.path().join("target/site/change-coverage/report.xml"))
                .unwrap();
        assert_eq!(CoveragePercentages::from(summary), CoveragePercentages::complete());
    }

    #[test]
    fn test_skip_flag() {
        let repo = feature_repo("");
        let mut config = Config::default();
        config.coverage.skip = true;
        let module = Module::new(repo.path(), config);

        let outcome = run_goal(&module, Goal::Run);
        assert_eq!(outcome, Outcome::Skipped("Skipping.".to_string()));
        assert_eq!(outcome.exit_code(), 3);
    }

    #[test]
    fn test_skipped_packaging() {
        let repo = feature_repo("");
        let mut config = Config::default();
        config.module.packaging = "pom".to_string();
        let module = Module::new(repo.path(), config);

        assert_eq!(
            run_goal(&module, Goal::Report),
            Outcome::Skipped("Skipping POM module.".to_string())
        );
    }

    #[test]
    fn test_missing_jacoco_report() {
        let repo = feature_repo("");
        fs::remove_file(repo.path().join(JACOCO)).unwrap();
        let module = Module::new(repo.path(), Config::default());

        match run_goal(&module, Goal::Run) {
            Outcome::Skipped(reason) => assert!(reason.starts_with("JaCoCo report not found")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_not_a_git_repository() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("target/site/jacoco")).unwrap();
        fs::write(dir.path().join(JACOCO), REPORT).unwrap();
        let module = Module::new(dir.path(), Config::default());

        assert_eq!(
            run_goal(&module, Goal::Run),
            Outcome::Skipped("Not a Git repository, skipping.".to_string())
        );
    }

    #[test]
    fn test_check_without_summary() {
        let dir = tempfile::tempdir().unwrap();
        let module = Module::new(dir.path(), Config::default());

        match run_goal(&module, Goal::Check) {
            Outcome::Skipped(reason) => {
                assert!(reason.starts_with("Change coverage report not found."))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_check_skip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.coverage.skip_check = true;
        let module = Module::new(dir.path(), config);

        assert_eq!(run_goal(&module, Goal::Check), Outcome::Skipped("Skipping.".to_string()));
    }

    #[test]
    fn test_unresolvable_branch_is_an_error() {
        let repo = feature_repo("");
        let mut config = Config::default();
        config.coverage.compare_branch = "release".to_string();
        let module = Module::new(repo.path(), config);

        let err = Pipeline::new(&module, Logger::new(false))
            .execute(Goal::Run)
            .unwrap_err();
        assert!(err.to_string().contains("Could not resolve branch 'release'"));
    }

    #[test]
    fn test_module_log_appended_to_aggregate_log() {
        let repo = feature_repo("billing/");
        let module = Module::new(repo.path().join("billing"), Config::default());

        assert!(matches!(run_goal(&module, Goal::Run), Outcome::Failed(_)));

        let aggregate = fs::read_to_string(repo.path().join(AGGREGATE_LOG)).unwrap();
        assert!(aggregate.contains("Project: billing"));
        assert!(aggregate.contains("1 new files, 1 modified files (2 lines changed)"));
    }

    #[test]
    fn test_outcome_severity() {
        assert!(Outcome::Failed(String::new()).severity() > Outcome::Passed.severity());
        assert!(Outcome::Passed.severity() > Outcome::Skipped(String::new()).severity());
    }
}
