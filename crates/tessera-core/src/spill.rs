//! Local JSON-lines spill file.
//!
//! Holds redacted events whose append budget ran out, one record per line,
//! until `LedgerWriter::reconcile_spill` replays them.
//!
//! A replay never empties the spill in place.  `begin_replay` renames the
//! live file to `<path>.replay` and new spills start a fresh live file.
//! `finish_replay` writes the records still owed back in front of the new
//! live file, replacing it atomically, and only then removes the replay file.
//! A replay interrupted at any point leaves its records on disk and the next
//! pass starts from them, so delivery is at least once.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use tessera_contracts::{
    error::{LedgerError, LedgerResult},
    event::AuditEvent,
};

/// One spilled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpillRecord {
    /// Already redacted and normalized.
    pub event: AuditEvent,
    /// The last error seen before spilling.
    pub reason: String,
    /// Store attempts made so far, across every replay.
    pub attempts: u32,
    pub spilled_at: DateTime<Utc>,
}

/// Append-only JSON-lines file with a process-local lock.
#[derive(Debug)]
pub struct SpillFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SpillFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where records under replay are kept until the pass finishes.
    pub fn replay_path(&self) -> PathBuf {
        with_suffix(&self.path, ".replay")
    }

    /// Append one record and sync it to disk.
    pub fn append(&self, record: &SpillRecord) -> LedgerResult<()> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Append `records` in order and sync them to disk.
    pub fn append_all(&self, records: &[SpillRecord]) -> LedgerResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock();

        let buf = encode(records, &self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| spill_err("open", &self.path, e))?;
        file.write_all(&buf).map_err(|e| spill_err("write", &self.path, e))?;
        file.sync_data().map_err(|e| spill_err("sync", &self.path, e))?;

        debug!(path = %self.path.display(), records = records.len(), "spill records appended");
        Ok(())
    }

    /// Move the live file aside and return the records to replay.
    ///
    /// When a replay file survives from an interrupted pass it is replayed
    /// again and the live file is left alone.
    pub fn begin_replay(&self) -> LedgerResult<Vec<SpillRecord>> {
        let _guard = self.lock.lock();
        let replay = self.replay_path();

        if replay.exists() {
            info!(path = %replay.display(), "resuming an interrupted spill replay");
        } else {
            match fs::rename(&self.path, &replay) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(spill_err("move aside", &self.path, e)),
            }
        }
        read_records(&replay)
    }

    /// Close a replay that consumed the first `consumed` records returned by
    /// `begin_replay`.
    ///
    /// `remaining` goes back to the front of the spill, followed by anything
    /// appended to the replay file after it was read and then by everything
    /// spilled since the pass began.
    pub fn finish_replay(&self, remaining: &[SpillRecord], consumed: usize) -> LedgerResult<()> {
        let _guard = self.lock.lock();
        let replay = self.replay_path();

        let mut owed = remaining.to_vec();
        owed.extend(read_records(&replay)?.into_iter().skip(consumed));

        if !owed.is_empty() {
            let mut buf = encode(&owed, &self.path)?;
            match fs::read(&self.path) {
                Ok(newer) => buf.extend_from_slice(&newer),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(spill_err("read", &self.path, e)),
            }

            let staged = with_suffix(&self.path, ".tmp");
            let mut file = File::create(&staged).map_err(|e| spill_err("create", &staged, e))?;
            file.write_all(&buf).map_err(|e| spill_err("write", &staged, e))?;
            file.sync_all().map_err(|e| spill_err("sync", &staged, e))?;
            fs::rename(&staged, &self.path).map_err(|e| spill_err("replace", &self.path, e))?;
        }

        match fs::remove_file(&replay) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(spill_err("remove", &replay, e)),
        }
        debug!(path = %self.path.display(), owed = owed.len(), "spill replay closed");
        Ok(())
    }

    /// Every record waiting, in replay order, without consuming any.
    pub fn records(&self) -> LedgerResult<Vec<SpillRecord>> {
        let _guard = self.lock.lock();
        let mut records = read_records(&self.replay_path())?;
        records.extend(read_records(&self.path)?);
        Ok(records)
    }

    /// Number of records currently waiting, including any under replay.
    pub fn len(&self) -> LedgerResult<usize> {
        self.records().map(|r| r.len())
    }

    pub fn is_empty(&self) -> LedgerResult<bool> {
        self.len().map(|n| n == 0)
    }
}

/// Parse every record in `path`.  Lines that no longer parse are reported on
/// the alert target and skipped.  A missing file reads as empty.
fn read_records(path: &Path) -> LedgerResult<Vec<SpillRecord>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(spill_err("open", path, e)),
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| spill_err("read", path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SpillRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => error!(
                target: "tessera::alert",
                path = %path.display(),
                line = index + 1,
                error = %e,
                "unreadable spill record skipped"
            ),
        }
    }
    Ok(records)
}

fn encode(records: &[SpillRecord], path: &Path) -> LedgerResult<Vec<u8>> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record).map_err(|e| spill_err("encode", path, e))?;
        buf.push(b'\n');
    }
    Ok(buf)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn spill_err(action: &str, path: &Path, e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Spill {
        reason: format!("failed to {action} spill file '{}': {e}", path.display()),
    }
}
