use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::{Algorithm, TaskKey, TaskRecord, TaskType};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fsutil::{atomic_write_with, staging_path};

/// Column header of the ledger file.
pub const LEDGER_COLUMNS: [&str; 6] = [
    "model",
    "config",
    "algorithm",
    "task_type",
    "status",
    "completion_time",
];

/// Header written by earlier append-only ledgers; accepted on load, never written.
pub const LEGACY_LEDGER_COLUMNS: [&str; 6] =
    ["model", "cfg", "algo", "task_type", "status", "completion_time"];

/// Format of the `completion_time` column (UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn ledger_error(code: &str, path: &Path, err: impl ToString) -> LmqError {
    LmqError::Ledger(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Completion state of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// Registered but not finished.
    Pending,
    /// Finished with durable metrics.
    Complete,
}

impl LedgerStatus {
    fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Complete => "complete",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" | "0" | "0.0" | "" => Some(LedgerStatus::Pending),
            "complete" | "1" | "1.0" => Some(LedgerStatus::Complete),
            _ => None,
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Completion state.
    pub status: LedgerStatus,
    /// When the task completed, if it has.
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    fn pending() -> Self {
        Self {
            status: LedgerStatus::Pending,
            completed_at: None,
        }
    }
}

/// Tally of ledger rows by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerCounts {
    /// Number of rows.
    pub total: usize,
    /// Rows marked complete.
    pub complete: usize,
    /// Rows still pending.
    pub pending: usize,
}

/// Durable record of which tasks of an experiment have completed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    entries: HashMap<TaskKey, LedgerEntry>,
}

impl Ledger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the ledger at `path`. A missing file yields an empty ledger.
    pub fn load(path: &Path) -> Result<Self, LmqError> {
        if !path.exists() {
            debug!(path = %path.display(), "no ledger on disk, starting empty");
            return Ok(Self::new());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|err| ledger_error("ledger_open", path, err))?;
        let headers = reader
            .headers()
            .map_err(|err| ledger_error("ledger_header", path, err))?
            .clone();
        let matches = |columns: &[&str]| headers.iter().map(str::trim).eq(columns.iter().copied());
        if !matches(&LEDGER_COLUMNS) && !matches(&LEGACY_LEDGER_COLUMNS) {
            return Err(LmqError::Ledger(
                ErrorInfo::new("ledger_header", "unexpected ledger header")
                    .with_context("path", path.display().to_string())
                    .with_context("found", headers.iter().collect::<Vec<_>>().join(","))
                    .with_hint(format!("expected {}", LEDGER_COLUMNS.join(","))),
            ));
        }
        let mut ledger = Self::new();
        for (index, row) in reader.records().enumerate() {
            let row = row.map_err(|err| ledger_error("ledger_row", path, err))?;
            let (key, entry) = parse_row(&row).map_err(|message| {
                LmqError::Ledger(
                    ErrorInfo::new("ledger_row", message)
                        .with_context("path", path.display().to_string())
                        .with_context("line", (index + 2).to_string()),
                )
            })?;
            // Appended legacy files may repeat a key; a completion is never undone.
            let keep_existing = matches!(
                ledger.entries.get(&key),
                Some(LedgerEntry { status: LedgerStatus::Complete, .. })
            );
            if !keep_existing {
                ledger.entries.insert(key, entry);
            }
        }
        Ok(ledger)
    }

    /// Writes the full table to `path`, replacing the previous file atomically.
    pub fn flush(&self, path: &Path) -> Result<(), LmqError> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer
            .write_record(LEDGER_COLUMNS)
            .map_err(|err| ledger_error("ledger_encode", path, err))?;
        for (key, entry) in self.sorted_entries() {
            let completed = entry
                .completed_at
                .map(|at| at.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_default();
            writer
                .write_record([
                    key.model_id.as_str(),
                    key.config_name.as_str(),
                    key.algorithm.as_str(),
                    key.task_type.as_str(),
                    entry.status.as_str(),
                    completed.as_str(),
                ])
                .map_err(|err| ledger_error("ledger_encode", path, err))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| ledger_error("ledger_encode", path, err))?;
        atomic_write_with(path, &bytes, |code, path, err| {
            ledger_error(&format!("ledger_{code}"), path, err)
        })?;
        debug!(path = %path.display(), rows = self.entries.len(), "ledger flushed");
        Ok(())
    }

    /// Entry recorded for `key`.
    pub fn get(&self, key: &TaskKey) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    /// Whether `key` has a complete entry.
    pub fn is_complete(&self, key: &TaskKey) -> bool {
        matches!(
            self.entries.get(key),
            Some(LedgerEntry {
                status: LedgerStatus::Complete,
                ..
            })
        )
    }

    /// Marks `key` complete at `at`, inserting it when unknown.
    pub fn mark_complete(&mut self, key: &TaskKey, at: DateTime<Utc>) {
        self.entries.insert(
            key.clone(),
            LedgerEntry {
                status: LedgerStatus::Complete,
                completed_at: Some(at),
            },
        );
    }

    /// Adds pending rows for grid keys not yet in the ledger and returns how many were added.
    pub fn register_pending<'a, I>(&mut self, grid: I) -> usize
    where
        I: IntoIterator<Item = &'a TaskRecord>,
    {
        let mut added = 0;
        for record in grid {
            if !self.entries.contains_key(&record.key) {
                self.entries.insert(record.key.clone(), LedgerEntry::pending());
                added += 1;
            }
        }
        added
    }

    /// Row counts by status.
    pub fn counts(&self) -> LedgerCounts {
        let complete = self
            .entries
            .values()
            .filter(|entry| entry.status == LedgerStatus::Complete)
            .count();
        LedgerCounts {
            total: self.entries.len(),
            complete,
            pending: self.entries.len() - complete,
        }
    }

    /// Entries in key order.
    pub fn sorted_entries(&self) -> Vec<(&TaskKey, &LedgerEntry)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no rows.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_row(row: &StringRecord) -> Result<(TaskKey, LedgerEntry), String> {
    if row.len() != LEDGER_COLUMNS.len() {
        return Err(format!(
            "expected {} columns, found {}",
            LEDGER_COLUMNS.len(),
            row.len()
        ));
    }
    let field = |idx: usize| row.get(idx).unwrap_or_default().trim();
    if field(0).is_empty() || field(1).is_empty() {
        return Err("model and config must not be empty".to_string());
    }
    let algorithm: Algorithm = field(2).parse().map_err(|err: LmqError| err.to_string())?;
    let task_type: TaskType = field(3).parse().map_err(|err: LmqError| err.to_string())?;
    let status =
        LedgerStatus::parse(field(4)).ok_or_else(|| format!("unknown status `{}`", field(4)))?;
    let completed_at = match field(5) {
        "" => None,
        raw => {
            let naive = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
                .map_err(|err| format!("invalid completion time `{raw}`: {err}"))?;
            Some(Utc.from_utc_datetime(&naive))
        }
    };
    Ok((
        TaskKey::new(field(0), field(1), algorithm, task_type),
        LedgerEntry {
            status,
            completed_at,
        },
    ))
}

/// Exclusive claim on a ledger path, held for the duration of a run.
///
/// The lock file holds the owner's pid and is removed on drop. A lock whose owner is no
/// longer alive (killed or preempted run) is reclaimed by the next acquirer.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
}

fn locked_error(path: &Path, holder: Option<u32>) -> LmqError {
    let info = ErrorInfo::new("ledger_locked", "ledger is owned by another run")
        .with_context("lock", path.display().to_string())
        .with_hint("wait for the other run, or remove the lock file if its owner is gone");
    LmqError::Ledger(match holder {
        Some(pid) => info.with_context("pid", pid.to_string()),
        None => info,
    })
}

/// Pid recorded in a lock file, if it can be read.
fn lock_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return true;
    };
    if pid <= 0 {
        return true;
    }
    // SAFETY: signal 0 only checks that the process exists; nothing is delivered.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl LedgerLock {
    /// Path of the lock file guarding `ledger_path`.
    pub fn lock_path(ledger_path: &Path) -> PathBuf {
        let mut name = ledger_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Claims `ledger_path`, failing if a live process holds it.
    ///
    /// The pid is written to a staging file that is then hard-linked into place, so the
    /// lock file never exists without its owner.
    pub fn acquire(ledger_path: &Path) -> Result<Self, LmqError> {
        let path = Self::lock_path(ledger_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ledger_error("ledger_dir", parent, err))?;
        }
        let staging = staging_path(&path);
        fs::write(&staging, format!("{}\n", std::process::id()))
            .map_err(|err| ledger_error("ledger_lock", &staging, err))?;
        let claimed = Self::claim(&staging, &path);
        let _ = fs::remove_file(&staging);
        claimed?;
        debug!(lock = %path.display(), "ledger lock acquired");
        Ok(Self { path })
    }

    fn claim(staging: &Path, path: &Path) -> Result<(), LmqError> {
        for _ in 0..2 {
            match fs::hard_link(staging, path) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    let holder = lock_holder(path);
                    match holder {
                        Some(pid) if !process_alive(pid) => {
                            warn!(lock = %path.display(), pid, "reclaiming lock of a dead run");
                            if lock_holder(path) == Some(pid) {
                                fs::remove_file(path)
                                    .map_err(|err| ledger_error("ledger_lock", path, err))?;
                            }
                        }
                        _ => return Err(locked_error(path, holder)),
                    }
                }
                Err(err) => return Err(ledger_error("ledger_lock", path, err)),
            }
        }
        Err(locked_error(path, lock_holder(path)))
    }

    /// Whether a live run holds the lock guarding `ledger_path`.
    pub fn is_held(ledger_path: &Path) -> bool {
        let path = Self::lock_path(ledger_path);
        path.exists() && lock_holder(&path).map_or(true, process_alive)
    }

    /// Location of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
