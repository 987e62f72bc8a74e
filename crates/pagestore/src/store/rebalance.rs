//! Page rebalancing.
//!
//! After ingestion the pages of a series are brought back within the size
//! bound in two passes:
//!
//! 1. **Split**: a page whose payload exceeds `max_page_size` is cut
//!    repeatedly by bytes. The first part keeps the page's id; every
//!    remainder gets a fresh id.
//! 2. **Join**: scanning left to right, a page absorbs its successors while
//!    the combined payload stays strictly below `max_page_size`. The run is
//!    written under the first page's id and the absorbed pages are removed.

use super::{PageStore, StoreReport};
use crate::error::Result;
use crate::page::{Page, SegmentStore};
use crate::series::{Data, IndexElement, MergeStrategy, SeriesValue};
use tracing::{debug, warn};

impl<S: SegmentStore> PageStore<S> {
    pub(super) fn rebalance_series<I, V>(&mut self, name: &str, report: &mut StoreReport) -> Result<()>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        self.split_pages::<I, V>(name, report)?;
        self.join_pages::<I, V>(name, report)
    }

    fn split_pages<I, V>(&mut self, name: &str, report: &mut StoreReport) -> Result<()>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        let max = self.config.max_page_size;
        let oversized: Vec<Page> = self
            .catalog
            .pages_for(name)
            .filter(|page| page.size as usize > max && page.count > 1)
            .cloned()
            .collect();

        for page in oversized {
            let mut rest: Data<I, V> = page.read(&self.storage)?;
            let mut pieces = Vec::new();
            while rest.byte_size() > max && rest.len() > 1 {
                let (left, right) = rest.cut_by_bytes(max);
                pieces.push(left);
                rest = right;
            }
            if !rest.is_empty() {
                pieces.push(rest);
            }

            debug!(
                "Splitting page {} of '{}' ({} bytes) into {} pages",
                page.page_id,
                name,
                page.size,
                pieces.len()
            );

            // Remainders are written before the first part replaces the page.
            let mut pieces = pieces.into_iter();
            let Some(first) = pieces.next() else {
                continue;
            };
            for piece in pieces {
                let page_id = self.catalog.allocate_next_id();
                self.write_page(page_id, &piece)?;
                report.pages_created += 1;
            }
            self.write_page(page.page_id, &first)?;
            report.pages_rewritten += 1;
        }
        Ok(())
    }

    fn join_pages<I, V>(&mut self, name: &str, report: &mut StoreReport) -> Result<()>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        let max = self.config.max_page_size as u64;
        let pages: Vec<Page> = self.catalog.pages_for(name).cloned().collect();

        let mut start = 0;
        while start < pages.len() {
            let head = &pages[start];
            let mut run_size = head.size;
            let mut end = start + 1;
            while end < pages.len() && run_size + pages[end].size < max {
                run_size += pages[end].size;
                end += 1;
            }

            if end - start > 1 {
                self.join_run::<I, V>(head, &pages[start + 1..end], report)?;
            }
            start = end;
        }
        Ok(())
    }

    fn join_run<I, V>(&mut self, head: &Page, absorbed: &[Page], report: &mut StoreReport) -> Result<()>
    where
        I: IndexElement,
        V: SeriesValue,
    {
        let mut data: Data<I, V> = head.read(&self.storage)?;
        for page in absorbed {
            let merge = data.merge(page.read(&self.storage)?);
            if merge.strategy != MergeStrategy::Concatenate {
                warn!(
                    "Joining overlapping pages {} and {} of '{}'",
                    head.page_id, page.page_id, head.name
                );
                report.values_displaced += merge.displaced.len() as u64;
            }
            data = merge.merged;
        }

        debug!(
            "Joining {} pages into page {} of '{}'",
            absorbed.len() + 1,
            head.page_id,
            head.name
        );
        self.write_page(head.page_id, &data)?;
        report.pages_rewritten += 1;
        for page in absorbed {
            self.remove_page(page)?;
            report.pages_removed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageStoreConfig;
    use crate::page::MemorySegmentStore;
    use crate::series::IndexKey;

    fn store(max_page_size: usize) -> PageStore<MemorySegmentStore> {
        PageStore::in_memory(PageStoreConfig::default().with_max_page_size(max_page_size))
    }

    fn sizes(store: &PageStore<MemorySegmentStore>, name: &str) -> Vec<u64> {
        store.catalog().pages_for(name).map(|page| page.size).collect()
    }

    #[test]
    fn test_split_repeatedly() {
        let mut store = store(32);
        let idx: Vec<i64> = (0..10).collect();
        let report = store.store("a", idx, vec![1.0f64; 10]).unwrap();

        assert_eq!(sizes(&store, "a"), vec![32, 32, 16]);
        assert_eq!(report.pages_created, 3);
        assert_eq!(report.pages_rewritten, 1);
        let first = store.catalog().first_page("a").unwrap();
        assert_eq!(first.page_id, 0);
        assert_eq!(first.end, IndexKey::Int(3));
        store.verify().unwrap();
    }

    #[test]
    fn test_single_oversized_element_stays() {
        let mut store = store(4);
        store
            .store("s", vec![1i64, 2], vec!["long value".to_string(), "x".repeat(9)])
            .unwrap();
        assert_eq!(store.count_pages("s"), 2);
        assert_eq!(sizes(&store, "s"), vec![10, 9]);
    }

    #[test]
    fn test_join_small_neighbours() {
        let mut store = store(1_000);
        store.store("a", vec![0i64, 1], vec![0.0f64; 2]).unwrap();
        store.store("a", vec![-10i64], vec![0.0f64]).unwrap();
        assert_eq!(store.count_pages("a"), 1);

        // Build three small pages under a tiny limit, then raise the limit.
        let mut store = PageStore::in_memory(PageStoreConfig::default().with_max_page_size(16));
        let idx: Vec<i64> = (0..6).collect();
        store.store("a", idx, vec![1.0f64; 6]).unwrap();
        assert_eq!(store.count_pages("a"), 3);

        let PageStore {
            catalog, storage, ..
        } = store;
        let mut store = PageStore::with_parts(
            PageStoreConfig::default().with_max_page_size(40),
            catalog,
            storage,
        );
        let report = store.rebalance::<i64, f64>("a").unwrap();
        assert_eq!(report.pages_removed, 1);
        assert_eq!(sizes(&store, "a"), vec![32, 16]);
        assert_eq!(store.catalog().first_page("a").unwrap().page_id, 0);
        store.verify().unwrap();
        assert_eq!(store.count_records("a"), 6);
    }
}
