//! JaCoCo XML report correlation
//!
//! The report is streamed: packages that cannot hold a changed file are
//! skipped without inspecting their content, and only the source files named
//! by the change set produce records.

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::{CoverageRecord, LineCoverage, ModifiedFileCoverage, NewFileCoverage};
use crate::error::ChangeCoverageError;
use crate::git::paths::{join_package, package_name};
use crate::git::ChangeSet;

/// Correlate the report at `path` with a change set
pub fn correlate_file(path: &Path, changes: &ChangeSet) -> Result<Vec<CoverageRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open coverage report: {}", path.display()))?;
    let records = correlate(BufReader::new(file), path, changes)?;
    Ok(records)
}

/// Correlate a JaCoCo XML document with a change set, emitting one record
/// per new or modified source file found in the report.
/// `report_path` is only used in error messages.
pub fn correlate<R: BufRead>(
    source: R,
    report_path: &Path,
    changes: &ChangeSet,
) -> std::result::Result<Vec<CoverageRecord>, ChangeCoverageError> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);

    let mut correlator = Correlator::new(report_path, changes);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                seen_root = true;
                depth += 1;
                correlator.open(&e, depth)?;
            }
            Ok(Event::Empty(e)) => {
                seen_root = true;
                correlator.open(&e, depth + 1)?;
                correlator.close(e.name().as_ref(), depth + 1);
            }
            Ok(Event::End(e)) => {
                correlator.close(e.name().as_ref(), depth);
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(correlator.malformed(e)),
            _ => {}
        }
        buf.clear();
    }

    if !seen_root || depth != 0 {
        return Err(correlator.malformed(quick_xml::Error::UnexpectedEof(
            "report ended before its root element was closed".to_string(),
        )));
    }

    Ok(correlator.records)
}

/// Packages that may contain a changed file, including `""` for files at
/// the source root
fn interesting_packages(changes: &ChangeSet) -> HashSet<String> {
    changes
        .paths()
        .map(|path| package_name(path).to_string())
        .collect()
}

enum ActiveFile {
    New(NewFileCoverage),
    Modified(ModifiedFileCoverage),
}

impl ActiveFile {
    fn into_record(self) -> CoverageRecord {
        match self {
            ActiveFile::New(file) => CoverageRecord::NewFile(file),
            ActiveFile::Modified(file) => CoverageRecord::ModifiedFile(file),
        }
    }
}

struct Correlator<'c> {
    report_path: PathBuf,
    changes: &'c ChangeSet,
    interesting: HashSet<String>,
    /// Depth of the uninteresting package being skipped
    skip_depth: Option<usize>,
    package: Option<String>,
    active: Option<ActiveFile>,
    records: Vec<CoverageRecord>,
}

impl<'c> Correlator<'c> {
    fn new(report_path: &Path, changes: &'c ChangeSet) -> Self {
        Self {
            report_path: report_path.to_path_buf(),
            changes,
            interesting: interesting_packages(changes),
            skip_depth: None,
            package: None,
            active: None,
            records: Vec::new(),
        }
    }

    fn open(&mut self, e: &BytesStart<'_>, depth: usize) -> std::result::Result<(), ChangeCoverageError> {
        if self.skip_depth.is_some() {
            return Ok(());
        }

        match e.name().as_ref() {
            b"package" => {
                let name = self.attribute(e, "name")?.unwrap_or_default();
                if self.interesting.contains(&name) {
                    self.package = Some(name);
                } else {
                    self.skip_depth = Some(depth);
                }
            }
            b"sourcefile" if self.active.is_none() => {
                let package = match self.package {
                    Some(ref package) => package,
                    None => return Ok(()),
                };
                let name = self.attribute(e, "name")?.unwrap_or_default();
                let path = join_package(package, &name);

                if self.changes.is_new_file(&path) {
                    self.active = Some(ActiveFile::New(NewFileCoverage::new(path)));
                } else if let Some(lines) = self.changes.changed_lines(&path) {
                    self.active = Some(ActiveFile::Modified(ModifiedFileCoverage::new(
                        path,
                        lines.clone(),
                    )));
                }
            }
            b"counter" => {
                if let Some(ActiveFile::New(_)) = self.active {
                    let kind = self.attribute(e, "type")?.unwrap_or_default();
                    if kind != "LINE" && kind != "BRANCH" {
                        return Ok(());
                    }
                    let missed = self.count(e, "missed")?;
                    let covered = self.count(e, "covered")?;
                    if let Some(ActiveFile::New(ref mut file)) = self.active {
                        if kind == "LINE" {
                            file.counts.missed_lines = missed;
                            file.counts.covered_lines = covered;
                        } else {
                            file.counts.missed_branches = missed;
                            file.counts.covered_branches = covered;
                        }
                    }
                }
            }
            b"line" => {
                let nr = match self.active {
                    Some(ActiveFile::Modified(ref file)) => {
                        let nr = self.count(e, "nr")?;
                        if !file.changed_lines.contains(&nr) {
                            return Ok(());
                        }
                        nr
                    }
                    _ => return Ok(()),
                };
                let line = LineCoverage::from_counters(
                    nr,
                    self.count(e, "mi")?,
                    self.count(e, "ci")?,
                    self.count(e, "mb")?,
                    self.count(e, "cb")?,
                );
                if let Some(ActiveFile::Modified(ref mut file)) = self.active {
                    file.lines.insert(line);
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn close(&mut self, name: &[u8], depth: usize) {
        if let Some(skip_depth) = self.skip_depth {
            if skip_depth == depth {
                self.skip_depth = None;
            }
            return;
        }

        match name {
            b"sourcefile" => {
                if let Some(active) = self.active.take() {
                    self.records.push(active.into_record());
                }
            }
            b"package" => {
                self.package = None;
            }
            _ => {}
        }
    }

    fn attribute(
        &self,
        e: &BytesStart<'_>,
        name: &str,
    ) -> std::result::Result<Option<String>, ChangeCoverageError> {
        let attr = e.try_get_attribute(name).map_err(|err| self.malformed(err))?;
        match attr {
            Some(attr) => {
                let value = attr.unescape_value().map_err(|err| self.malformed(err))?;
                Ok(Some(value.into_owned()))
            }
            None => Ok(None),
        }
    }

    /// Numeric attribute, zero when absent
    fn count(&self, e: &BytesStart<'_>, name: &str) -> std::result::Result<u32, ChangeCoverageError> {
        match self.attribute(e, name)? {
            None => Ok(0),
            Some(value) => value
                .trim()
                .parse::<u32>()
                .map_err(|_| ChangeCoverageError::InvalidAttribute {
                    element: String::from_utf8_lossy(e.name().as_ref()).to_string(),
                    attribute: name.to_string(),
                    value,
                }),
        }
    }

    fn malformed(&self, source: impl Into<quick_xml::Error>) -> ChangeCoverageError {
        ChangeCoverageError::MalformedReport {
            path: self.report_path.clone(),
            source: source.into(),
        }
    }
}
