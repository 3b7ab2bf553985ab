//! Human-readable log sink
//!
//! Console output is colored; every line at info level and above is also
//! copied, uncolored, into the attached log files.

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

const RULE_WIDTH: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

pub struct Logger {
    verbose: bool,
    prefix: Option<String>,
    files: Mutex<Vec<LineWriter<File>>>,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            prefix: None,
            files: Mutex::new(Vec::new()),
        }
    }

    /// Prefix console lines, used when several modules log concurrently
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Copy log lines into `path`, truncating any previous content
    pub fn with_file(self, path: &Path) -> Result<Self> {
        self.attach_file(path)?;
        Ok(self)
    }

    /// Same as [`Logger::with_file`] for a logger already in use
    pub fn attach_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Could not create log output file {}", path.display()))?;

        if let Ok(mut files) = self.files.lock() {
            files.push(LineWriter::new(file));
        }
        Ok(())
    }

    pub fn is_debug_enabled(&self) -> bool {
        self.verbose
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message.as_ref());
    }

    pub fn log(&self, level: Level, message: &str) {
        if level == Level::Debug && !self.verbose {
            return;
        }

        let tag = match level {
            Level::Debug => "[DEBUG]".dimmed(),
            Level::Info => "[INFO]".blue(),
            Level::Warn => "[WARNING]".yellow().bold(),
            Level::Error => "[ERROR]".red().bold(),
        };
        let body = match level {
            Level::Debug => message.dimmed(),
            Level::Info => message.normal(),
            Level::Warn => message.yellow(),
            Level::Error => message.red(),
        };

        match self.prefix {
            Some(ref prefix) => println!("{} {} {}", tag, format!("{}:", prefix).cyan(), body),
            None => println!("{} {}", tag, body),
        }

        if level == Level::Debug {
            return;
        }

        let file_prefix = match level {
            Level::Warn => "[WARNING] ",
            Level::Error => "[ERROR] ",
            _ => "",
        };
        if let Ok(mut files) = self.files.lock() {
            for file in files.iter_mut() {
                let _ = writeln!(file, "{}{}", file_prefix, message);
            }
        }
    }

    pub fn flush(&self) {
        if let Ok(mut files) = self.files.lock() {
            for file in files.iter_mut() {
                let _ = file.flush();
            }
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.flush();
    }
}

/// One lock per aggregate log file, shared by every module run in the process
fn aggregate_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = match locks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Canonical form of a possibly not yet existing file path
fn canonical_file_path(path: &Path) -> io::Result<PathBuf> {
    if let Ok(path) = fs::canonicalize(path) {
        return Ok(path);
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent)?;
            Ok(fs::canonicalize(parent)?.join(name))
        }
        _ => Ok(path.to_path_buf()),
    }
}

/// Append a module's log file to the aggregate log shared by all modules of
/// the repository. Nothing is written when both paths name the same file.
pub fn append_to_aggregate(module_log: &Path, aggregate_log: &Path, project_name: &str) -> Result<()> {
    let module_log = canonical_file_path(module_log)
        .with_context(|| format!("Failed to resolve log file {}", module_log.display()))?;
    let aggregate_log = canonical_file_path(aggregate_log)
        .with_context(|| format!("Failed to resolve log file {}", aggregate_log.display()))?;

    if module_log == aggregate_log {
        return Ok(());
    }

    let content = fs::read_to_string(&module_log)
        .with_context(|| format!("Failed to read log file {}", module_log.display()))?;

    let lock = aggregate_lock(&aggregate_log);
    let _guard = match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&aggregate_log)
        .with_context(|| format!("Failed to open aggregate log {}", aggregate_log.display()))?;

    let rule = "-".repeat(RULE_WIDTH);
    let mut block = String::with_capacity(content.len() + 256);
    block.push_str(&format!("{}\n", rule));
    block.push_str(&format!("Project: {}\n", project_name));
    block.push_str(&format!("Date: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
    block.push_str(&format!("{}\n\n", rule));
    block.push_str(&content);
    if !content.ends_with('\n') {
        block.push('\n');
    }
    block.push('\n');

    out.write_all(block.as_bytes())
        .with_context(|| format!("Failed to write aggregate log {}", aggregate_log.display()))?;

    Ok(())
}
