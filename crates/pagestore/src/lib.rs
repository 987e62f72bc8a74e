//! Pagestore - embedded storage for named, sorted numeric series
//!
//! Each series is a sorted run of `(index, value)` pairs persisted as a
//! sequence of size-bounded pages. A catalog tracks which page holds which
//! index range; the paging engine merges new observations into the right
//! pages and splits or joins pages to keep them within the size bound.
//!
//! # Components
//!
//! - [`Data`]: in-memory series buffer with merge, cut and trim primitives
//! - [`Page`]: descriptor of one on-disk segment of a series
//! - [`Catalog`]: ordered page metadata, optionally journaled to disk
//! - [`PageStore`]: the ingestion, rebalancing and extraction engine
//!
//! # Example
//!
//! ```rust,ignore
//! use pagestore::{PageStore, PageStoreConfig, SeriesInput};
//!
//! let mut store = PageStore::open("/path/to/pages", PageStoreConfig::default())?;
//!
//! store.store("cpu.load", vec![1i64, 2, 3], vec![0.10f64, 0.20, 0.30])?;
//! store.store_batch([
//!     ("cpu.temp", SeriesInput::from((vec![1i64, 2], vec![55.0f64, 56.5]))),
//!     ("mem.used", SeriesInput::from((vec![1i64], vec![0.42f64]))),
//! ])?;
//!
//! for (name, data) in store.get::<i64, f64>("cpu.%", 1..=2)? {
//!     println!("{name}: {:?}", data.values());
//! }
//! ```

#![deny(missing_docs)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod page;
pub mod series;
pub mod store;

pub use catalog::Catalog;
pub use config::{ConflictPolicy, PageStoreConfig, SyncMode};
pub use error::{PageStoreError, Result};
pub use page::{FsSegmentStore, MemorySegmentStore, Page, PageId, SegmentStore};
pub use series::{
    Data, ElementKind, IndexElement, IndexKey, Merge, MergeStrategy, Selection, SeriesValue,
    ValueKind,
};
pub use store::{PageStore, SeriesInput, SeriesSelector, StoreReport};
