//! Error and Result types for page store operations.

use crate::page::PageId;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for page store operations.
pub type Result<T> = std::result::Result<T, PageStoreError>;

/// The error type for page store operations.
#[derive(Debug, Error)]
pub enum PageStoreError {
    /// Index and value sequences of a series have different lengths.
    #[error("Length mismatch: {index} index elements but {values} values")]
    LengthMismatch {
        /// Number of index elements supplied.
        index: usize,
        /// Number of values supplied.
        values: usize,
    },

    /// A trim, cut or range query selected no elements.
    #[error("Empty range query on series '{name}': {range}")]
    EmptyRangeQuery {
        /// Series the query ran against.
        name: String,
        /// Human readable rendering of the requested range.
        range: String,
    },

    /// A page descriptor disagrees with the data stored for it.
    #[error("Corrupt page {page_id}: {reason}")]
    CorruptPage {
        /// Page whose descriptor and segment disagree.
        page_id: PageId,
        /// What did not match.
        reason: String,
    },

    /// Two catalog entries of one series overlap or share a begin index.
    #[error("Catalog invariant violated for series '{name}': pages {first} and {second} conflict")]
    CatalogInvariantViolation {
        /// Series holding the conflicting pages.
        name: String,
        /// Page ordered first.
        first: PageId,
        /// Page ordered second.
        second: PageId,
    },

    /// Stored element or value kind differs from the requested one.
    #[error("Type mismatch on series '{name}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Series being accessed.
        name: String,
        /// Kind requested by the caller.
        expected: String,
        /// Kind found on disk or in the catalog.
        found: String,
    },

    /// A page cannot be built from an empty series.
    #[error("Series '{0}' is empty")]
    EmptySeries(String),

    /// A series name does not fit the on-disk name field.
    #[error("Series name of {len} bytes exceeds the {max} byte limit")]
    NameTooLong {
        /// Length of the rejected name in bytes.
        len: usize,
        /// Largest accepted name length in bytes.
        max: usize,
    },

    /// No segment exists for the requested page.
    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    /// Invalid magic bytes at the start of a page or catalog file.
    #[error("Invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported on-disk format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Stored checksum does not match the recomputed one.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum stored alongside the data.
        expected: u32,
        /// Checksum computed over the data read.
        actual: u32,
    },

    /// Bytes could not be decoded into the expected structure.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}
