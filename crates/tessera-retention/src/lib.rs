//! # tessera-retention
//!
//! Retention for the TESSERA ledger: the sweep that moves entries past the
//! retention horizon out of the live store, the JSON-lines archive they land
//! in, and the reader that brings them back for full-history verification.
//!
//! ```rust,ignore
//! let sink = Arc::new(JsonlArchiveSink::from_config(&config.retention));
//! let archiver = RetentionArchiver::new(store.clone(), sink);
//! let report = archiver.sweep(config.retention.horizon_years)?;
//!
//! let archived = read_archive_dir(&config.retention.archive_dir)?
//!     .into_iter()
//!     .flat_map(|segment| segment.entries);
//! let history = IntegrityVerifier::new(store).verify_history(archived)?;
//! ```

pub mod archive;
pub mod reader;
pub mod sink;
pub mod sweeper;

pub use archive::{ArchiveMetadata, ArchivedSegment};
pub use reader::{read_archive, read_archive_dir};
pub use sink::JsonlArchiveSink;
pub use sweeper::{retention_cutoff, RetentionArchiver};

// ── Tests ─────────────────────────────────────────────────────────────────────
