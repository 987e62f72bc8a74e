//! Page store configuration.

use std::fs::File;
use std::io;
use std::path::PathBuf;

/// Default maximum page payload size: 10 MB.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 10_000_000;

/// Default catalog journal file name, relative to the store directory.
pub const DEFAULT_CATALOG_FILE: &str = "pagestore.catalog";

/// Default number of journal records appended before a checkpoint is considered.
pub const DEFAULT_CHECKPOINT_RECORDS: usize = 4096;

/// Sync mode for segment writes and catalog journal appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync after every write (default, highest durability).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update, faster).
    Fdatasync,
    /// No sync (fastest, lowest durability - for testing only).
    None,
}

impl SyncMode {
    /// Flushes `file` to stable storage as this mode requires.
    pub fn sync(self, file: &File) -> io::Result<()> {
        match self {
            SyncMode::Fsync => file.sync_all(),
            SyncMode::Fdatasync => file.sync_data(),
            SyncMode::None => Ok(()),
        }
    }
}

/// Which value survives when an ingested index already exists in a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// The stored value is kept and the incoming one is displaced.
    #[default]
    KeepExisting,
    /// The incoming value replaces the stored one.
    Overwrite,
}

/// Configuration for a [`PageStore`](crate::PageStore).
#[derive(Debug, Clone)]
pub struct PageStoreConfig {
    /// Maximum value payload size of a page in bytes.
    ///
    /// Rebalancing splits pages above this size and joins neighbours whose
    /// combined size stays below it. A page holding a single element may
    /// exceed it. Default: 10 MB.
    pub max_page_size: usize,

    /// Durability of segment files and catalog journal appends.
    pub sync_mode: SyncMode,

    /// Resolution of index collisions between stored and ingested data.
    pub conflict_policy: ConflictPolicy,

    /// Catalog journal location.
    ///
    /// Relative paths are resolved against the store directory.
    /// Default: `pagestore.catalog`.
    pub catalog_file: PathBuf,

    /// Journal records appended since the last checkpoint before the
    /// journal is compacted, provided it has also grown past twice the
    /// number of live pages. Default: 4096.
    pub checkpoint_records: usize,

    /// Re-read each descriptor after writing it and compare with the one
    /// computed from the data. Default: off.
    pub verify_writes: bool,
}

impl Default for PageStoreConfig {
    fn default() -> Self {
        Self {
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            sync_mode: SyncMode::default(),
            conflict_policy: ConflictPolicy::default(),
            catalog_file: PathBuf::from(DEFAULT_CATALOG_FILE),
            checkpoint_records: DEFAULT_CHECKPOINT_RECORDS,
            verify_writes: false,
        }
    }
}

impl PageStoreConfig {
    /// Creates a new configuration with a custom maximum page size.
    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    /// Creates a new configuration with a custom sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Creates a new configuration with a custom conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Creates a new configuration with a custom catalog journal path.
    pub fn with_catalog_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_file = path.into();
        self
    }

    /// Creates a new configuration with a custom checkpoint threshold.
    pub fn with_checkpoint_records(mut self, records: usize) -> Self {
        self.checkpoint_records = records;
        self
    }

    /// Creates a new configuration with post-write verification toggled.
    pub fn with_verify_writes(mut self, verify: bool) -> Self {
        self.verify_writes = verify;
        self
    }
}
