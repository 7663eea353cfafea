//! Archive file layout.
//!
//! One sweep produces one archive: a JSON-lines file holding every purged
//! entry verbatim (optionally gzip-compressed), plus a `.meta.json` sidecar
//! describing it.  The checksum covers the uncompressed JSON-lines body, so
//! it survives recompression.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tessera_config::Compression;
use tessera_contracts::{
    entry::AuditEntry,
    ids::{ChainHash, EntryId},
};

/// Current archive layout version.
pub const FORMAT_VERSION: u32 = 1;

/// Sidecar suffix appended to the archive file name.
pub const METADATA_SUFFIX: &str = ".meta.json";

/// Description of one archive file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Random archive identifier.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub first_id: EntryId,
    pub last_id: EntryId,
    /// `created_at` of the first entry.
    pub period_start: DateTime<Utc>,
    /// `created_at` of the last entry.
    pub period_end: DateTime<Utc>,
    pub entry_count: u64,
    /// Uncompressed body size in bytes.
    pub original_size: u64,
    /// Size of the file on disk.
    pub stored_size: u64,
    pub compression: Compression,
    /// Lowercase hex SHA-256 of the uncompressed body.
    pub checksum: String,
    /// What the first archived entry links to.
    pub first_previous_hash: ChainHash,
    /// Equal to the checkpoint written by the sweep.
    pub last_hash_chain: ChainHash,
    pub format_version: u32,
}

/// A fully read and checked archive.
#[derive(Debug, Clone)]
pub struct ArchivedSegment {
    pub path: PathBuf,
    pub metadata: ArchiveMetadata,
    /// Entries in file order.
    pub entries: Vec<AuditEntry>,
}

/// Path of the metadata sidecar for `archive`.
pub fn metadata_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(METADATA_SUFFIX);
    PathBuf::from(name)
}

/// File name for an archive covering `first..=last`.
pub fn archive_file_name(first: EntryId, last: EntryId, compression: Compression) -> String {
    format!(
        "tessera_{:012}-{:012}.jsonl{}",
        first.0,
        last.0,
        compression.extension()
    )
}

/// The `first..=last` range encoded in an archive file name, if `name` is one.
pub fn parse_archive_file_name(name: &str) -> Option<(EntryId, EntryId)> {
    if name.ends_with(METADATA_SUFFIX) {
        return None;
    }
    let stem = name.strip_prefix("tessera_")?;
    let (range, _) = stem.split_once('.')?;
    let (first, last) = range.split_once('-')?;
    Some((EntryId(first.parse().ok()?), EntryId(last.parse().ok()?)))
}

/// Hidden name an archive is written under before it is renamed into place.
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}
