//! Page catalog.
//!
//! The catalog maps page ids to descriptors and keeps, per series, an
//! ordered index from each page's first index element to its id. All of the
//! engine's placement decisions are ordered-map queries against it:
//!
//! - [`Catalog::page_before`]: the page with the largest `begin <= index`
//! - [`Catalog::page_after`]: the page with the smallest `begin > index`
//! - [`Catalog::pages_overlapping`]: pages with `end >= lo` and `begin <= hi`
//!
//! For a fixed series, pages ordered by `begin` never overlap. The catalog
//! refuses two pages of one series sharing a `begin`; full overlap checking
//! is left to [`Catalog::check_consistency`] because the engine briefly
//! holds overlapping pages while it rewrites them.
//!
//! A catalog is either purely in memory or backed by a [`CatalogLog`]
//! journal, in which case each mutation is journaled before it is applied.

mod log;

pub use log::{CatalogLog, CatalogRecord};

use crate::config::SyncMode;
use crate::error::{PageStoreError, Result};
use crate::page::{Page, PageId};
use crate::series::IndexKey;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use tracing::{debug, info};

/// Page metadata of a store.
pub struct Catalog {
    pages: BTreeMap<PageId, Page>,
    series: BTreeMap<String, BTreeMap<IndexKey, PageId>>,
    log: Option<CatalogLog>,
    checkpoint_records: usize,
}

impl Catalog {
    /// Creates an empty catalog that is not persisted.
    pub fn in_memory() -> Self {
        Self {
            pages: BTreeMap::new(),
            series: BTreeMap::new(),
            log: None,
            checkpoint_records: usize::MAX,
        }
    }

    /// Opens a journaled catalog at `path`, replaying existing records.
    ///
    /// # Arguments
    ///
    /// * `path` - Journal file, created if missing
    /// * `sync_mode` - Durability of journal appends
    /// * `checkpoint_records` - Journal size that triggers a checkpoint once
    ///   the journal also exceeds twice the number of live pages
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or holds a corrupt record.
    pub fn open(
        path: impl AsRef<Path>,
        sync_mode: SyncMode,
        checkpoint_records: usize,
    ) -> Result<Self> {
        let (log, records) = CatalogLog::open(path, sync_mode)?;

        let mut catalog = Self::in_memory();
        catalog.checkpoint_records = checkpoint_records;
        for record in records {
            match record {
                CatalogRecord::Put(page) => catalog.put(page),
                CatalogRecord::Remove(page_id) => {
                    catalog.take(page_id);
                }
            }
        }
        info!(
            "Opened catalog {:?}: {} pages across {} series",
            log.path(),
            catalog.pages.len(),
            catalog.series.len()
        );

        catalog.log = Some(log);
        catalog.maybe_checkpoint()?;
        Ok(catalog)
    }

    /// Journal backing this catalog, if any.
    pub fn log(&self) -> Option<&CatalogLog> {
        self.log.as_ref()
    }

    fn put(&mut self, page: Page) {
        if let Some(old) = self.pages.remove(&page.page_id) {
            self.unindex(&old);
        }
        self.series
            .entry(page.name.clone())
            .or_default()
            .insert(page.begin, page.page_id);
        self.pages.insert(page.page_id, page);
    }

    fn take(&mut self, page_id: PageId) -> Option<Page> {
        let page = self.pages.remove(&page_id)?;
        self.unindex(&page);
        Some(page)
    }

    fn unindex(&mut self, page: &Page) {
        if let Some(by_begin) = self.series.get_mut(&page.name) {
            if by_begin.get(&page.begin) == Some(&page.page_id) {
                by_begin.remove(&page.begin);
            }
            if by_begin.is_empty() {
                self.series.remove(&page.name);
            }
        }
    }

    fn maybe_checkpoint(&mut self) -> Result<()> {
        let live = self.pages.len();
        if let Some(log) = &mut self.log {
            if log.records() > self.checkpoint_records && log.records() > 2 * live {
                log.rewrite(self.pages.values())?;
            }
        }
        Ok(())
    }

    /// Rewrites the journal to hold only the live pages.
    pub fn checkpoint(&mut self) -> Result<()> {
        if let Some(log) = &mut self.log {
            log.rewrite(self.pages.values())?;
        }
        Ok(())
    }

    /// Returns an id no page currently uses: one past the largest id, or 0.
    pub fn allocate_next_id(&self) -> PageId {
        self.pages
            .keys()
            .next_back()
            .map_or(0, |page_id| page_id + 1)
    }

    /// Inserts a descriptor, replacing any descriptor with the same id.
    ///
    /// # Errors
    ///
    /// Returns `PageStoreError::CatalogInvariantViolation` if another page of
    /// the same series already starts at `page.begin`.
    pub fn insert_or_replace(&mut self, page: Page) -> Result<()> {
        if let Some(&existing) = self
            .series
            .get(&page.name)
            .and_then(|by_begin| by_begin.get(&page.begin))
        {
            if existing != page.page_id {
                return Err(PageStoreError::CatalogInvariantViolation {
                    name: page.name,
                    first: existing,
                    second: page.page_id,
                });
            }
        }

        if let Some(log) = &mut self.log {
            log.append(&CatalogRecord::Put(page.clone()))?;
        }
        debug!(
            "Catalog put page {} of '{}' [{}, {}]",
            page.page_id, page.name, page.begin, page.end
        );
        self.put(page);
        self.maybe_checkpoint()
    }

    /// Removes a descriptor, returning it if it existed.
    pub fn remove(&mut self, page_id: PageId) -> Result<Option<Page>> {
        if !self.pages.contains_key(&page_id) {
            return Ok(None);
        }
        if let Some(log) = &mut self.log {
            log.append(&CatalogRecord::Remove(page_id))?;
        }
        let page = self.take(page_id);
        self.maybe_checkpoint()?;
        Ok(page)
    }

    /// Looks up a descriptor by id.
    pub fn get(&self, page_id: PageId) -> Option<&Page> {
        self.pages.get(&page_id)
    }

    /// Pages of `name` in ascending `begin` order.
    pub fn pages_for<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Page> + 'a {
        self.series
            .get(name)
            .into_iter()
            .flat_map(|by_begin| by_begin.values())
            .filter_map(move |page_id| self.pages.get(page_id))
    }

    /// First page of `name`.
    pub fn first_page(&self, name: &str) -> Option<&Page> {
        self.pages_for(name).next()
    }

    /// Page of `name` with the largest `begin <= index`.
    pub fn page_before(&self, name: &str, index: &IndexKey) -> Option<&Page> {
        self.series
            .get(name)?
            .range(..=*index)
            .next_back()
            .and_then(|(_, page_id)| self.pages.get(page_id))
    }

    /// Page of `name` with the smallest `begin > index`.
    pub fn page_after(&self, name: &str, index: &IndexKey) -> Option<&Page> {
        self.series
            .get(name)?
            .range((Bound::Excluded(*index), Bound::Unbounded))
            .next()
            .and_then(|(_, page_id)| self.pages.get(page_id))
    }

    /// Pages of `name` with `end >= lower` and `begin <= upper`, ascending.
    ///
    /// A `None` bound is open.
    pub fn pages_overlapping(
        &self,
        name: &str,
        lower: Option<&IndexKey>,
        upper: Option<&IndexKey>,
    ) -> Vec<&Page> {
        let Some(by_begin) = self.series.get(name) else {
            return Vec::new();
        };
        // Only the page holding `lower` can start before it and still overlap.
        let start = lower.and_then(|lo| {
            by_begin
                .range(..=*lo)
                .next_back()
                .map(|(begin, _)| *begin)
        });
        if let (Some(start), Some(hi)) = (start, upper) {
            if start > *hi {
                return Vec::new();
            }
        }
        let start = match start {
            Some(begin) => Bound::Included(begin),
            None => Bound::Unbounded,
        };
        let upper = match upper {
            Some(hi) => Bound::Included(*hi),
            None => Bound::Unbounded,
        };
        by_begin
            .range((start, upper))
            .filter_map(|(_, page_id)| self.pages.get(page_id))
            .filter(|page| lower.map_or(true, |lo| page.end >= *lo))
            .collect()
    }

    /// Number of pages of `name`.
    pub fn page_count(&self, name: &str) -> usize {
        self.series.get(name).map_or(0, BTreeMap::len)
    }

    /// Number of elements stored for `name`.
    pub fn record_count(&self, name: &str) -> u64 {
        self.pages_for(name).map(|page| page.count).sum()
    }

    /// Number of pages across all series.
    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    /// Number of elements across all series.
    pub fn total_records(&self) -> u64 {
        self.pages.values().map(|page| page.count).sum()
    }

    /// Names of all series with at least one page, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.series.keys().map(String::as_str)
    }

    /// Series names matching a SQL `LIKE` pattern.
    ///
    /// `%` matches any run of characters and `_` exactly one. Matching is
    /// case-sensitive.
    pub fn names_matching(&self, pattern: &str) -> Vec<String> {
        self.names()
            .filter(|name| like_match(pattern, name))
            .map(str::to_string)
            .collect()
    }

    /// Checks that the pages of every series are ordered and disjoint.
    ///
    /// # Errors
    ///
    /// Returns `PageStoreError::CatalogInvariantViolation` naming the first
    /// offending pair. A page that is inverted or missing from the series
    /// index is reported paired with itself or with the page shadowing it.
    pub fn check_consistency(&self) -> Result<()> {
        for (name, by_begin) in &self.series {
            let mut previous: Option<&Page> = None;
            for page_id in by_begin.values() {
                let violation = |first: PageId| PageStoreError::CatalogInvariantViolation {
                    name: name.clone(),
                    first,
                    second: *page_id,
                };
                let page = self.pages.get(page_id).ok_or_else(|| violation(*page_id))?;
                if page.begin > page.end {
                    return Err(violation(*page_id));
                }
                if let Some(prev) = previous {
                    if prev.end >= page.begin {
                        return Err(violation(prev.page_id));
                    }
                }
                previous = Some(page);
            }
        }

        for page in self.pages.values() {
            let indexed = self
                .series
                .get(&page.name)
                .and_then(|by_begin| by_begin.get(&page.begin));
            if indexed != Some(&page.page_id) {
                return Err(PageStoreError::CatalogInvariantViolation {
                    name: page.name.clone(),
                    first: indexed.copied().unwrap_or(page.page_id),
                    second: page.page_id,
                });
            }
        }
        Ok(())
    }

    /// Drops the catalog and deletes its journal.
    pub fn destroy(self) -> Result<()> {
        match self.log {
            Some(log) => log.remove(),
            None => Ok(()),
        }
    }
}

/// SQL `LIKE` matching with `%` and `_` wildcards.
fn like_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `%` seen and the text position it is matched up to.
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
