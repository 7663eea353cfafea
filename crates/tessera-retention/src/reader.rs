//! Reading archives back for offline verification.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tracing::debug;

use tessera_config::Compression;
use tessera_contracts::{
    entry::AuditEntry,
    error::{LedgerError, LedgerResult},
    ids::{ChainHash, EntryId},
};

use crate::archive::{metadata_path, parse_archive_file_name, ArchiveMetadata, ArchivedSegment, FORMAT_VERSION};

/// Read the archive at `path` and check it against its sidecar.
///
/// Fails with `LedgerError::Archive` if the sidecar is missing, the
/// checksum or entry count disagree, or the boundary ids and hashes differ
/// from what the sidecar recorded.  Chain linkage inside the archive is not
/// checked here; replay it with the verifier.
pub fn read_archive(path: &Path) -> LedgerResult<ArchivedSegment> {
    let meta_path = metadata_path(path);
    let meta_text = fs::read(&meta_path).map_err(|e| archive_err(&meta_path, e))?;
    let metadata: ArchiveMetadata = serde_json::from_slice(&meta_text).map_err(|e| archive_err(&meta_path, e))?;

    if metadata.format_version != FORMAT_VERSION {
        return Err(archive_err(
            path,
            format!("unsupported archive format version {}", metadata.format_version),
        ));
    }

    let stored = fs::read(path).map_err(|e| archive_err(path, e))?;
    let body = match metadata.compression {
        Compression::None => stored,
        Compression::Gzip => {
            let mut body = Vec::new();
            GzDecoder::new(stored.as_slice())
                .read_to_end(&mut body)
                .map_err(|e| archive_err(path, e))?;
            body
        }
    };

    let checksum = hex::encode(Sha256::digest(&body));
    if checksum != metadata.checksum {
        return Err(archive_err(
            path,
            format!("checksum {checksum} does not match recorded {}", metadata.checksum),
        ));
    }

    let mut entries = Vec::new();
    for (index, line) in body.split(|b| *b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_slice(line)
            .map_err(|e| archive_err(path, format!("line {}: {e}", index + 1)))?;
        entries.push(entry);
    }

    check_boundaries(path, &metadata, &entries)?;
    debug!(archive = %path.display(), entries = entries.len(), "archive read");

    Ok(ArchivedSegment {
        path: path.to_path_buf(),
        metadata,
        entries,
    })
}

/// Read every archive in `dir`, ordered by first entry id.
///
/// Archives may overlap when a sweep was retried after its purge failed.
/// A segment whose entries all appear in earlier segments is skipped; one
/// that carries a different entry under an id already read is an error.
pub fn read_archive_dir(dir: &Path) -> LedgerResult<Vec<ArchivedSegment>> {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(archive_err(dir, e)),
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for item in listing {
        let path = item.map_err(|e| archive_err(dir, e))?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if parse_archive_file_name(name).is_some() {
            paths.push(path);
        }
    }

    let mut segments = paths
        .iter()
        .map(|p| read_archive(p))
        .collect::<LedgerResult<Vec<_>>>()?;
    segments.sort_by_key(|s| (s.metadata.first_id, Reverse(s.metadata.last_id)));

    let mut seen: BTreeMap<EntryId, ChainHash> = BTreeMap::new();
    let mut kept = Vec::with_capacity(segments.len());
    for segment in segments {
        let mut fresh = false;
        for entry in &segment.entries {
            match seen.get(&entry.id()) {
                Some(hash) if *hash != entry.hash_chain => {
                    return Err(archive_err(
                        &segment.path,
                        format!("entry {} differs from the copy in an earlier archive", entry.id()),
                    ));
                }
                Some(_) => {}
                None => fresh = true,
            }
        }
        if !fresh {
            debug!(archive = %segment.path.display(), "archive duplicates earlier archives; skipped");
            continue;
        }
        seen.extend(segment.entries.iter().map(|e| (e.id(), e.hash_chain)));
        kept.push(segment);
    }
    Ok(kept)
}

fn check_boundaries(path: &Path, metadata: &ArchiveMetadata, entries: &[AuditEntry]) -> LedgerResult<()> {
    if entries.len() as u64 != metadata.entry_count {
        return Err(archive_err(
            path,
            format!("holds {} entries, metadata records {}", entries.len(), metadata.entry_count),
        ));
    }
    let (first, last) = match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(archive_err(path, "archive is empty")),
    };
    if first.id() != metadata.first_id || last.id() != metadata.last_id {
        return Err(archive_err(
            path,
            format!(
                "covers ids {}..={}, metadata records {}..={}",
                first.id(),
                last.id(),
                metadata.first_id,
                metadata.last_id
            ),
        ));
    }
    if first.previous_hash != metadata.first_previous_hash || last.hash_chain != metadata.last_hash_chain {
        return Err(archive_err(path, "boundary hashes differ from metadata"));
    }
    Ok(())
}

fn archive_err(path: &Path, detail: impl std::fmt::Display) -> LedgerError {
    LedgerError::Archive {
        reason: format!("'{}': {detail}", path.display()),
    }
}
