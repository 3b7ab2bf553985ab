//! Persisted change coverage summary
//!
//! Written by the report goal and read back by the check goal:
//!
//! ```xml
//! <change-coverage>
//!   <summary><line>91.67</line><branch>100</branch></summary>
//! </change-coverage>
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::coverage::CoveragePercentages;
use crate::error::ChangeCoverageError;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "change-coverage")]
pub struct ChangeCoverageReport {
    pub summary: ChangeCoverageSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeCoverageSummary {
    /// Percentage of changed lines covered
    pub line: f64,
    /// Percentage of changed branches covered
    pub branch: f64,
}

impl From<CoveragePercentages> for ChangeCoverageSummary {
    fn from(coverage: CoveragePercentages) -> Self {
        Self {
            line: coverage.line,
            branch: coverage.branch,
        }
    }
}

impl From<ChangeCoverageSummary> for CoveragePercentages {
    fn from(summary: ChangeCoverageSummary) -> Self {
        Self {
            line: summary.line,
            branch: summary.branch,
        }
    }
}

impl ChangeCoverageSummary {
    pub fn to_xml(&self) -> Result<String> {
        let report = ChangeCoverageReport { summary: *self };
        let body = quick_xml::se::to_string(&report)
            .with_context(|| "Failed to serialize change coverage summary")?;
        Ok(format!("{}\n{}\n", XML_DECLARATION, body))
    }

    pub fn from_xml(content: &str) -> Result<Self> {
        let report: ChangeCoverageReport = quick_xml::de::from_str(content)
            .with_context(|| "Failed to parse change coverage summary")?;
        let summary = report.summary;
        check_percentage("line", summary.line)?;
        check_percentage("branch", summary.branch)?;
        Ok(summary)
    }

    /// Write the summary, creating parent directories as needed
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(path, self.to_xml()?)
            .with_context(|| format!("Failed to write change coverage summary: {}", path.display()))?;
        Ok(())
    }

    /// Read a summary written by [`ChangeCoverageSummary::write`].
    /// A missing file is reported as [`ChangeCoverageError::MissingSummary`].
    pub fn read(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ChangeCoverageError::MissingSummary(path.to_path_buf()).into());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read change coverage summary: {}", path.display())
                });
            }
        };
        Self::from_xml(&content)
            .with_context(|| format!("Invalid change coverage summary: {}", path.display()))
    }
}

/// Percentages are finite values within 0..=100
fn check_percentage(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        anyhow::bail!("Change coverage summary has an out-of-range {} value: {}", name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_layout() {
        let summary = ChangeCoverageSummary {
            line: 80.0,
            branch: 100.0,
        };
        let xml = summary.to_xml().unwrap();

        assert!(xml.starts_with(XML_DECLARATION));
        assert!(xml.contains("<change-coverage><summary><line>80"));
        assert!(xml.contains("</line><branch>100"));
        assert!(xml.trim_end().ends_with("</branch></summary></change-coverage>"));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target/site/change-coverage/report.xml");
        let summary = ChangeCoverageSummary {
            line: 11.0 / 12.0 * 100.0,
            branch: 100.0,
        };

        summary.write(&path).unwrap();
        let read = ChangeCoverageSummary::read(&path).unwrap();

        assert!((read.line - summary.line).abs() < 1e-9);
        assert_eq!(read.branch, 100.0);
    }

    #[test]
    fn test_aggregated_coverage_round_trip() {
        use crate::coverage::{aggregate, Counts, CoverageRecord, NewFileCoverage};

        let mut file = NewFileCoverage::new("com/example/Foo.java");
        file.counts = Counts::new(40, 0, 8, 2);
        let coverage = aggregate(&[CoverageRecord::NewFile(file)]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");
        ChangeCoverageSummary::from(coverage).write(&path).unwrap();
        let read = CoveragePercentages::from(ChangeCoverageSummary::read(&path).unwrap());

        assert_eq!(read, CoveragePercentages { line: 100.0, branch: 80.0 });
    }

    #[test]
    fn test_read_missing_summary() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChangeCoverageSummary::read(&dir.path().join("report.xml")).unwrap_err();

        match err.downcast_ref::<ChangeCoverageError>() {
            Some(e) => assert!(e.is_skip()),
            None => panic!("unexpected error: {}", err),
        }
    }

    #[test]
    fn test_read_malformed_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");
        fs::write(&path, "<change-coverage><summary><line>lots</line>").unwrap();

        let err = ChangeCoverageSummary::read(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid change coverage summary"));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        for (line, branch) in [("NaN", "100"), ("100", "inf"), ("-1", "50"), ("50", "100.5")] {
            let xml = format!(
                "<change-coverage><summary><line>{}</line><branch>{}</branch></summary></change-coverage>",
                line, branch
            );
            let err = ChangeCoverageSummary::from_xml(&xml).unwrap_err();
            assert!(err.to_string().contains("out-of-range"), "{}: {}", xml, err);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");
        fs::write(
            &path,
            "<change-coverage><summary><line>NaN</line><branch>NaN</branch></summary></change-coverage>",
        )
        .unwrap();
        let err = ChangeCoverageSummary::read(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid change coverage summary"));
    }

    #[test]
    fn test_boundary_values_are_accepted() {
        let xml = "<change-coverage><summary><line>0</line><branch>100</branch></summary></change-coverage>";
        let summary = ChangeCoverageSummary::from_xml(xml).unwrap();
        assert_eq!(summary.line, 0.0);
        assert_eq!(summary.branch, 100.0);
    }
}
