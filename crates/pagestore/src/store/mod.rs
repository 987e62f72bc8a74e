//! Paging engine.
//!
//! [`PageStore`] ingests sorted batches into the pages of a series, keeps
//! those pages contiguous and non-overlapping, and rebalances them so that
//! no page's value payload exceeds the configured maximum.
//!
//! # Ingestion
//!
//! ```text
//! batch → sort → for each catalog region touched → read page → merge → write page
//!                                                                        ↓
//!                                                               catalog update
//!                                                                        ↓
//!                                                          split / join pages
//! ```
//!
//! Segments are always written before the catalog entry that references
//! them, and catalog entries are removed before their segments are deleted,
//! so the catalog never points at a segment that does not exist.
//!
//! # Example
//!
//! ```rust,ignore
//! use pagestore::{PageStore, PageStoreConfig};
//!
//! let mut store = PageStore::open("/path/to/pages", PageStoreConfig::default())?;
//! store.store("cpu.load", vec![1i64, 2, 3], vec![0.1f64, 0.2, 0.3])?;
//! store.store("cpu.load", vec![3i64, 4, 5], vec![0.35f64, 0.45, 0.55])?;
//!
//! let data = store.get_series::<i64, f64>("cpu.load", 2..=4)?;
//! assert_eq!(data.values(), &[0.2, 0.3, 0.45]);
//! ```

mod rebalance;

use crate::catalog::Catalog;
use crate::config::{ConflictPolicy, PageStoreConfig};
use crate::error::{PageStoreError, Result};
use crate::page::{FsSegmentStore, MemorySegmentStore, Page, PageId, SegmentStore};
use crate::series::{Data, IndexElement, IndexKey, Merge, SeriesValue};
use std::collections::BTreeMap;
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use tracing::{debug, info};

/// A batch submitted for one series.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesInput<I, V> {
    /// Parallel index and value vectors.
    RawArrays {
        /// Index elements, in any order.
        index: Vec<I>,
        /// Values, parallel to `index`.
        values: Vec<V>,
    },
    /// An already assembled series. It is stored under the name it is
    /// submitted with, not its own.
    Prepared(Data<I, V>),
}

impl<I: IndexElement, V: SeriesValue> SeriesInput<I, V> {
    /// Converts the input into a series named `name`.
    pub fn into_data(self, name: &str) -> Result<Data<I, V>> {
        match self {
            Self::RawArrays { index, values } => Data::new(name, index, values),
            Self::Prepared(data) => Ok(data.with_name(name)),
        }
    }
}

impl<I, V> From<(Vec<I>, Vec<V>)> for SeriesInput<I, V> {
    fn from((index, values): (Vec<I>, Vec<V>)) -> Self {
        Self::RawArrays { index, values }
    }
}

impl<I, V> From<Data<I, V>> for SeriesInput<I, V> {
    fn from(data: Data<I, V>) -> Self {
        Self::Prepared(data)
    }
}

/// Which series a multi-series read addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesSelector {
    /// Every series whose name matches a SQL `LIKE` pattern.
    Pattern(String),
    /// An explicit list of names; names without pages are skipped.
    Names(Vec<String>),
}

impl From<&str> for SeriesSelector {
    fn from(pattern: &str) -> Self {
        Self::Pattern(pattern.to_string())
    }
}

impl From<Vec<String>> for SeriesSelector {
    fn from(names: Vec<String>) -> Self {
        Self::Names(names)
    }
}

/// Summary of the work done by a mutating operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// Elements submitted, before duplicate resolution.
    pub points_received: u64,
    /// Pages written under a newly allocated id.
    pub pages_created: u64,
    /// Existing pages rewritten in place.
    pub pages_rewritten: u64,
    /// Pages removed by joins.
    pub pages_removed: u64,
    /// Values that lost an index collision and were discarded.
    pub values_displaced: u64,
}

impl StoreReport {
    /// Adds the counters of `other` to this report.
    pub fn absorb(&mut self, other: &StoreReport) {
        self.points_received += other.points_received;
        self.pages_created += other.pages_created;
        self.pages_rewritten += other.pages_rewritten;
        self.pages_removed += other.pages_removed;
        self.values_displaced += other.values_displaced;
    }
}

/// Embedded store of named, sorted series persisted as pages.
///
/// A store owns its [`Catalog`] and its [`SegmentStore`]; every mutating
/// operation takes `&mut self`, so a store has a single writer.
pub struct PageStore<S: SegmentStore = FsSegmentStore> {
    config: PageStoreConfig,
    catalog: Catalog,
    storage: S,
}

impl PageStore<FsSegmentStore> {
    /// Opens (creating if needed) a store in `dir`.
    ///
    /// Segments live in `dir`; the catalog journal lives at
    /// `config.catalog_file`, resolved against `dir` when relative.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the catalog
    /// journal cannot be replayed.
    pub fn open(dir: impl AsRef<Path>, config: PageStoreConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let storage = FsSegmentStore::open(dir, config.sync_mode)?;
        let catalog_path = dir.join(&config.catalog_file);
        let catalog = Catalog::open(&catalog_path, config.sync_mode, config.checkpoint_records)?;
        info!(
            "Opened page store {:?}: {} pages, {} records",
            dir,
            catalog.total_pages(),
            catalog.total_records()
        );
        Ok(Self::with_parts(config, catalog, storage))
    }
}

impl PageStore<MemorySegmentStore> {
    /// Creates a store that keeps catalog and segments in memory.
    pub fn in_memory(config: PageStoreConfig) -> Self {
        Self::with_parts(config, Catalog::in_memory(), MemorySegmentStore::new())
    }
}

impl<S: SegmentStore> PageStore<S> {
    /// Assembles a store from a catalog and a segment store.
    pub fn with_parts(config: PageStoreConfig, catalog: Catalog, storage: S) -> Self {
        Self {
            config,
            catalog,
            storage,
        }
    }

    /// Store configuration.
    pub fn config(&self) -> &PageStoreConfig {
        &self.config
    }

    /// Page catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Segment store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Stores parallel index and value vectors under `name`.
    ///
    /// # Errors
    ///
    /// Returns `PageStoreError::LengthMismatch` if the vectors differ in
    /// length; see [`store_data`](Self::store_data) for the rest.
    pub fn store<I, V>(&mut self, name: &str, index: Vec<I>, values: Vec<V>) -> Result<StoreReport>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        self.store_data(Data::new(name, index, values)?)
    }

    /// Stores one [`SeriesInput`] under `name`.
    pub fn store_input<I, V>(&mut self, name: &str, input: SeriesInput<I, V>) -> Result<StoreReport>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        self.store_data(input.into_data(name)?)
    }

    /// Stores several series, one batch per name.
    ///
    /// Batches are applied in iteration order; an error stops the batch with
    /// earlier series already stored.
    pub fn store_batch<I, V, N>(
        &mut self,
        batch: impl IntoIterator<Item = (N, SeriesInput<I, V>)>,
    ) -> Result<StoreReport>
    where
        I: IndexElement,
        V: SeriesValue,
        N: AsRef<str>,
    {
        let mut report = StoreReport::default();
        for (name, input) in batch {
            report.absorb(&self.store_input(name.as_ref(), input)?);
        }
        Ok(report)
    }

    /// Merges `data` into its series and rebalances the series.
    ///
    /// `data` is sorted first; duplicate indices within it resolve to the
    /// last occurrence. Collisions with stored indices follow the configured
    /// [`ConflictPolicy`]. Empty batches change nothing.
    ///
    /// # Errors
    ///
    /// - `PageStoreError::TypeMismatch` if the series is stored with another
    ///   index or value kind
    /// - `PageStoreError::CorruptPage` if an affected page fails validation
    /// - I/O errors from the segment store or catalog journal
    pub fn store_data<I, V>(&mut self, data: Data<I, V>) -> Result<StoreReport>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        let mut report = StoreReport {
            points_received: data.len() as u64,
            ..StoreReport::default()
        };
        if data.is_empty() {
            return Ok(report);
        }

        let mut data = data.sort();
        let name = data.name().to_string();
        self.check_kind::<I>(&name)?;

        while let Some(first) = data.begin() {
            let key = first.to_key();
            let before = self.catalog.page_before(&name, &key).cloned();
            let after = self.catalog.page_after(&name, &key).cloned();

            match (before, after) {
                (None, Some(after)) => {
                    let (head, rest) = data.cut_before(Self::begin_of::<I>(&after)?)?;
                    self.merge_into_page(&after, head, &mut report)?;
                    data = rest;
                }
                (Some(before), Some(after)) => {
                    let (head, rest) = data.cut_before(Self::begin_of::<I>(&after)?)?;
                    self.merge_into_page(&before, head, &mut report)?;
                    data = rest;
                }
                (Some(before), None) => {
                    self.merge_into_page(&before, data, &mut report)?;
                    break;
                }
                (None, None) => {
                    let page_id = self.catalog.allocate_next_id();
                    self.write_page(page_id, &data)?;
                    report.pages_created += 1;
                    break;
                }
            }
        }

        self.rebalance_series::<I, V>(&name, &mut report)?;
        debug!("Stored '{}': {:?}", name, report);
        Ok(report)
    }

    fn check_kind<I: IndexElement>(&self, name: &str) -> Result<()> {
        match self.catalog.first_page(name) {
            Some(page) if page.idx_kind != I::KIND => Err(PageStoreError::TypeMismatch {
                name: name.to_string(),
                expected: I::KIND.to_string(),
                found: page.idx_kind.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn begin_of<I: IndexElement>(page: &Page) -> Result<I> {
        I::from_key(page.begin).ok_or_else(|| PageStoreError::TypeMismatch {
            name: page.name.clone(),
            expected: I::KIND.to_string(),
            found: page.idx_kind.to_string(),
        })
    }

    fn merge_into_page<I, V>(
        &mut self,
        page: &Page,
        chunk: Data<I, V>,
        report: &mut StoreReport,
    ) -> Result<()>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        let stored: Data<I, V> = page.read(&self.storage)?;
        let Merge {
            merged,
            displaced,
            strategy,
        } = match self.config.conflict_policy {
            ConflictPolicy::KeepExisting => chunk.merge(stored),
            ConflictPolicy::Overwrite => stored.merge(chunk),
        };

        if !displaced.is_empty() {
            debug!(
                "Discarding {} displaced values of '{}' in page {}",
                displaced.len(),
                page.name,
                page.page_id
            );
            report.values_displaced += displaced.len() as u64;
        }
        debug!(
            "Merged into page {} of '{}' ({:?}): {} elements",
            page.page_id,
            page.name,
            strategy,
            merged.len()
        );

        self.write_page(page.page_id, &merged)?;
        report.pages_rewritten += 1;
        Ok(())
    }

    /// Writes `data` as page `page_id`: segment first, then catalog.
    fn write_page<I, V>(&mut self, page_id: PageId, data: &Data<I, V>) -> Result<Page>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        let page = Page::from_data(page_id, data)?;
        page.write(data, &mut self.storage)?;
        if self.config.verify_writes {
            page.compare(&self.storage.read_descriptor(page_id)?)?;
        }
        self.catalog.insert_or_replace(page.clone())?;
        Ok(page)
    }

    /// Removes a page: catalog entry first, then segment.
    fn remove_page(&mut self, page: &Page) -> Result<()> {
        self.catalog.remove(page.page_id)?;
        page.delete(&mut self.storage)
    }

    /// Splits oversized pages of `name` and joins undersized neighbours.
    pub fn rebalance<I, V>(&mut self, name: &str) -> Result<StoreReport>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        self.check_kind::<I>(name)?;
        let mut report = StoreReport::default();
        self.rebalance_series::<I, V>(name, &mut report)?;
        Ok(report)
    }

    /// Reads the elements of `name` within `range`.
    ///
    /// # Errors
    ///
    /// Returns `PageStoreError::EmptyRangeQuery` if nothing is stored in
    /// `range`, and `PageStoreError::TypeMismatch` if the series is stored
    /// with other kinds.
    pub fn get_series<I, V>(&self, name: &str, range: impl RangeBounds<I>) -> Result<Data<I, V>>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        let lower = key_of_bound(range.start_bound());
        let upper = key_of_bound(range.end_bound());
        let pages = self
            .catalog
            .pages_overlapping(name, lower.as_ref(), upper.as_ref());

        let mut data = Data::empty(name);
        for page in pages {
            data = data.append(page.read(&self.storage)?);
        }
        data.trim(range)
    }

    /// Reads every series addressed by `selector` within `range`.
    ///
    /// Series with no elements in `range` are left out of the result.
    ///
    /// # Errors
    ///
    /// Every addressed series must be stored with index kind `I` and value
    /// kind `V`. The first one that is not fails the whole read with
    /// `PageStoreError::TypeMismatch`; narrow the selector to read series of
    /// mixed kinds.
    pub fn get<I, V>(
        &self,
        selector: impl Into<SeriesSelector>,
        range: impl RangeBounds<I>,
    ) -> Result<BTreeMap<String, Data<I, V>>>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        let bounds = (range.start_bound().cloned(), range.end_bound().cloned());
        let mut out = BTreeMap::new();
        for name in self.names(&selector.into()) {
            match self.get_series(&name, bounds) {
                Ok(data) => {
                    out.insert(name, data);
                }
                Err(PageStoreError::EmptyRangeQuery { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Names addressed by `selector` that have at least one page.
    pub fn names(&self, selector: &SeriesSelector) -> Vec<String> {
        match selector {
            SeriesSelector::Pattern(pattern) => self.catalog.names_matching(pattern),
            SeriesSelector::Names(names) => names
                .iter()
                .filter(|name| self.catalog.page_count(name) > 0)
                .cloned()
                .collect(),
        }
    }

    /// Series names matching a SQL `LIKE` pattern.
    pub fn search(&self, pattern: &str) -> Vec<String> {
        self.catalog.names_matching(pattern)
    }

    /// Number of pages of `name`.
    pub fn count_pages(&self, name: &str) -> usize {
        self.catalog.page_count(name)
    }

    /// Number of elements stored for `name`.
    pub fn count_records(&self, name: &str) -> u64 {
        self.catalog.record_count(name)
    }

    /// Number of pages across all series.
    pub fn count_pages_all(&self) -> usize {
        self.catalog.total_pages()
    }

    /// Number of elements across all series.
    pub fn count_records_all(&self) -> u64 {
        self.catalog.total_records()
    }

    /// Checks catalog consistency.
    pub fn check(&self) -> Result<()> {
        self.catalog.check_consistency()
    }

    /// Checks catalog consistency and every page's segment.
    pub fn verify(&self) -> Result<()> {
        self.check()?;
        for name in self.catalog.names() {
            for page in self.catalog.pages_for(name) {
                page.verify(&self.storage)?;
            }
        }
        Ok(())
    }

    /// Deletes the catalog and every segment.
    pub fn delete_store(self) -> Result<()> {
        let Self {
            catalog,
            mut storage,
            ..
        } = self;
        let pages = catalog.total_pages();
        catalog.destroy()?;
        storage.destroy()?;
        info!("Deleted page store with {} pages", pages);
        Ok(())
    }
}

fn key_of_bound<I: IndexElement>(bound: Bound<&I>) -> Option<IndexKey> {
    match bound {
        Bound::Included(x) | Bound::Excluded(x) => Some(x.to_key()),
        Bound::Unbounded => None,
    }
}
