//! JSON-lines archive sink.
//!
//! Exports are idempotent.  A sweep whose purge failed leaves its archive
//! behind; the retry over the same segment finds that archive and reuses it,
//! and a retry over a longer segment replaces it.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use tessera_config::{Compression, RetentionConfig};
use tessera_contracts::{
    entry::AuditEntry,
    error::{LedgerError, LedgerResult},
    ids::EntryId,
};
use tessera_core::traits::ArchiveSink;

use crate::archive::{
    archive_file_name, metadata_path, parse_archive_file_name, staging_path, ArchiveMetadata, ArchivedSegment,
    FORMAT_VERSION,
};
use crate::reader::read_archive;

/// Writes each export as a new archive file plus metadata sidecar under one
/// directory.
#[derive(Debug, Clone)]
pub struct JsonlArchiveSink {
    dir: PathBuf,
    compression: Compression,
}

impl JsonlArchiveSink {
    pub fn new(dir: impl Into<PathBuf>, compression: Compression) -> Self {
        Self {
            dir: dir.into(),
            compression,
        }
    }

    pub fn from_config(config: &RetentionConfig) -> Self {
        Self::new(config.archive_dir.clone(), config.compression)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `entries` and return the metadata written beside them.
    ///
    /// If an archive of exactly these entries already exists it is returned
    /// unchanged.  Earlier archives that start at the same id and hold a
    /// prefix of `entries` are removed once the new archive is in place.  Any
    /// existing archive that disagrees with `entries` on a shared id is a
    /// conflict and nothing is written.
    pub fn write_archive(&self, entries: &[AuditEntry]) -> LedgerResult<(PathBuf, ArchiveMetadata)> {
        let (first, last) = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(LedgerError::Archive {
                    reason: "refusing to write an empty archive".to_string(),
                })
            }
        };

        fs::create_dir_all(&self.dir).map_err(|e| io_err("create archive directory", &self.dir, e))?;

        let mut body = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut body, entry).map_err(|e| LedgerError::Archive {
                reason: format!("failed to encode entry {}: {e}", entry.id()),
            })?;
            body.push(b'\n');
        }
        let checksum = hex::encode(Sha256::digest(&body));

        let path = self.dir.join(archive_file_name(first.id(), last.id(), self.compression));
        if path.exists() {
            return reuse_existing(&path, &checksum);
        }
        let superseded = self.overlapping(first.id(), entries)?;

        // The archive appears under its final name only after its sidecar is
        // complete, so a crash leaves nothing the reader would pick up.
        let staged = staging_path(&path);
        let stored_size =
            write_durably(&staged, self.compression, &body).map_err(|e| io_err("write archive", &staged, e))?;

        let metadata = ArchiveMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            first_id: first.id(),
            last_id: last.id(),
            period_start: first.created_at(),
            period_end: last.created_at(),
            entry_count: entries.len() as u64,
            original_size: body.len() as u64,
            stored_size,
            compression: self.compression,
            checksum,
            first_previous_hash: first.previous_hash,
            last_hash_chain: last.hash_chain,
            format_version: FORMAT_VERSION,
        };

        let meta_path = metadata_path(&path);
        let meta_json = serde_json::to_vec_pretty(&metadata).map_err(|e| LedgerError::Archive {
            reason: format!("failed to encode archive metadata: {e}"),
        })?;
        let staged_meta = staging_path(&meta_path);
        write_durably(&staged_meta, Compression::None, &meta_json)
            .map_err(|e| io_err("write archive metadata", &staged_meta, e))?;
        fs::rename(&staged_meta, &meta_path).map_err(|e| io_err("publish archive metadata", &meta_path, e))?;
        fs::rename(&staged, &path).map_err(|e| io_err("publish archive", &path, e))?;

        info!(
            archive = %path.display(),
            first = %metadata.first_id,
            last = %metadata.last_id,
            entries = metadata.entry_count,
            checksum = %metadata.checksum,
            "archive written"
        );

        for old in superseded.iter().filter(|s| s.metadata.last_id <= metadata.last_id) {
            remove_segment(&old.path);
        }
        Ok((path, metadata))
    }

    /// Other archives starting at `first`, checked against `entries`.
    fn overlapping(&self, first: EntryId, entries: &[AuditEntry]) -> LedgerResult<Vec<ArchivedSegment>> {
        let listing = fs::read_dir(&self.dir).map_err(|e| io_err("list archive directory", &self.dir, e))?;
        let by_id: HashMap<EntryId, _> = entries.iter().map(|e| (e.id(), e.hash_chain)).collect();
        let mut found = Vec::new();
        for item in listing {
            let path = item.map_err(|e| io_err("list archive directory", &self.dir, e))?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !matches!(parse_archive_file_name(name), Some((start, _)) if start == first) {
                continue;
            }

            let segment = read_archive(&path)?;
            let disagrees = segment
                .entries
                .iter()
                .find(|old| by_id.get(&old.id()).is_some_and(|hash| *hash != old.hash_chain));
            if let Some(old) = disagrees {
                return Err(LedgerError::Archive {
                    reason: format!(
                        "'{}' holds a different entry {}; refusing to archive over it",
                        path.display(),
                        old.id()
                    ),
                });
            }
            found.push(segment);
        }
        Ok(found)
    }
}

impl ArchiveSink for JsonlArchiveSink {
    fn export(&self, entries: &[AuditEntry]) -> LedgerResult<String> {
        let (path, _) = self.write_archive(entries)?;
        Ok(path.display().to_string())
    }
}

fn reuse_existing(path: &Path, checksum: &str) -> LedgerResult<(PathBuf, ArchiveMetadata)> {
    let segment = read_archive(path)?;
    if segment.metadata.checksum != checksum {
        return Err(LedgerError::Archive {
            reason: format!(
                "'{}' already exists with checksum {}, expected {checksum}",
                path.display(),
                segment.metadata.checksum
            ),
        });
    }
    info!(archive = %path.display(), "identical archive already present; reusing it");
    Ok((segment.path, segment.metadata))
}

/// Remove an archive, then its sidecar.  Failures are only logged: the
/// reader skips a segment already covered by another.
fn remove_segment(path: &Path) {
    for target in [path.to_path_buf(), metadata_path(path)] {
        match fs::remove_file(&target) {
            Ok(()) => info!(archive = %target.display(), "superseded archive removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(archive = %target.display(), error = %e, "failed to remove superseded archive"),
        }
    }
}

/// Write `body` to `path`, replacing any leftover, and sync to disk.
///
/// Returns the size of the file as stored.
fn write_durably(path: &Path, compression: Compression, body: &[u8]) -> std::io::Result<u64> {
    let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
    let file: File = match compression {
        Compression::None => {
            let mut writer = BufWriter::new(file);
            writer.write_all(body)?;
            writer.into_inner().map_err(|e| e.into_error())?
        }
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
            encoder.write_all(body)?;
            encoder.finish()?.into_inner().map_err(|e| e.into_error())?
        }
    };
    file.sync_all()?;
    Ok(file.metadata()?.len())
}

fn io_err(action: &str, path: &Path, e: std::io::Error) -> LedgerError {
    LedgerError::Archive {
        reason: format!("failed to {action} '{}': {e}", path.display()),
    }
}
