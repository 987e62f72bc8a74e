//! Page descriptors and their on-disk segments.
//!
//! A [`Page`] describes one contiguous chunk of a series: its id, the
//! series name, the first and last index, the element count, the value
//! payload size and the index element kind. The descriptor is derived from
//! the data it was written with; any later disagreement between the two is
//! treated as corruption.

pub mod format;
mod storage;

pub use storage::{
    page_path, FsSegmentStore, MemorySegmentStore, SegmentStore, DESCRIPTOR_EXTENSION,
    INDEX_EXTENSION, VALUES_EXTENSION,
};

use crate::error::{PageStoreError, Result};
use crate::series::{Data, ElementKind, IndexElement, IndexKey, SeriesValue};
use tracing::debug;

/// Unique identifier of a page within a store.
pub type PageId = u64;

/// Descriptor of one page of a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Page identifier.
    pub page_id: PageId,
    /// Name of the series the page belongs to.
    pub name: String,
    /// First index element.
    pub begin: IndexKey,
    /// Last index element.
    pub end: IndexKey,
    /// Number of elements.
    pub count: u64,
    /// Bytes occupied by the values.
    pub size: u64,
    /// Element kind of the index.
    pub idx_kind: ElementKind,
}

impl Page {
    /// Derives the descriptor of `data` stored under `page_id`.
    ///
    /// # Errors
    ///
    /// Returns `PageStoreError::EmptySeries` if `data` holds no elements and
    /// `PageStoreError::NameTooLong` if its name exceeds
    /// [`format::MAX_NAME_LEN`] bytes.
    pub fn from_data<I: IndexElement, V: SeriesValue>(
        page_id: PageId,
        data: &Data<I, V>,
    ) -> Result<Self> {
        if data.name().len() > format::MAX_NAME_LEN {
            return Err(PageStoreError::NameTooLong {
                len: data.name().len(),
                max: format::MAX_NAME_LEN,
            });
        }
        let (Some(begin), Some(end)) = (data.begin(), data.end()) else {
            return Err(PageStoreError::EmptySeries(data.name().to_string()));
        };
        Ok(Self {
            page_id,
            name: data.name().to_string(),
            begin: begin.to_key(),
            end: end.to_key(),
            count: data.len() as u64,
            size: data.byte_size() as u64,
            idx_kind: I::KIND,
        })
    }

    /// Whether the index ranges of two pages intersect.
    pub fn overlaps(&self, other: &Page) -> bool {
        self.end >= other.begin && self.begin <= other.end
    }

    /// Compares two descriptors of the same page.
    ///
    /// # Errors
    ///
    /// Returns `PageStoreError::CorruptPage` naming the first differing field.
    pub fn compare(&self, other: &Page) -> Result<()> {
        let reason = if self.page_id != other.page_id {
            format!("page id {} != {}", self.page_id, other.page_id)
        } else if self.name != other.name {
            format!("name '{}' != '{}'", self.name, other.name)
        } else if self.idx_kind != other.idx_kind {
            format!("index kind {} != {}", self.idx_kind, other.idx_kind)
        } else if self.begin != other.begin {
            format!("begin {} != {}", self.begin, other.begin)
        } else if self.end != other.end {
            format!("end {} != {}", self.end, other.end)
        } else if self.count != other.count {
            format!("count {} != {}", self.count, other.count)
        } else if self.size != other.size {
            format!("size {} != {}", self.size, other.size)
        } else {
            return Ok(());
        };
        Err(PageStoreError::CorruptPage {
            page_id: self.page_id,
            reason,
        })
    }

    /// Checks that this descriptor matches the one derived from `data`.
    pub fn check_with_data<I: IndexElement, V: SeriesValue>(&self, data: &Data<I, V>) -> Result<()> {
        let derived = Page::from_data(self.page_id, data).map_err(|_| {
            PageStoreError::CorruptPage {
                page_id: self.page_id,
                reason: "segment holds no elements".to_string(),
            }
        })?;
        self.compare(&derived)
    }

    fn check_kind<I: IndexElement>(&self) -> Result<()> {
        if self.idx_kind != I::KIND {
            return Err(PageStoreError::TypeMismatch {
                name: self.name.clone(),
                expected: I::KIND.to_string(),
                found: self.idx_kind.to_string(),
            });
        }
        Ok(())
    }

    /// Reads the page's data from `storage`.
    ///
    /// # Errors
    ///
    /// - `PageStoreError::TypeMismatch` if `I` or `V` differ from the stored kinds
    /// - `PageStoreError::CorruptPage` if the segment disagrees with this descriptor
    /// - `PageStoreError::PageNotFound` if the segment is missing
    pub fn read<I, V, S>(&self, storage: &S) -> Result<Data<I, V>>
    where
        I: IndexElement,
        V: SeriesValue,
        S: SegmentStore + ?Sized,
    {
        self.check_kind::<I>()?;

        let raw = storage.read_index(self.page_id, self.idx_kind, self.count)?;
        let idx = format::decode_index::<I>(&raw)?;
        let payload = storage.read_values(self.page_id)?;
        let rec = format::decode_values::<V>(&self.name, &payload)?;
        if rec.len() != idx.len() {
            return Err(PageStoreError::CorruptPage {
                page_id: self.page_id,
                reason: format!("{} index elements but {} values", idx.len(), rec.len()),
            });
        }

        let data = Data::new(self.name.clone(), idx, rec)?;
        self.check_with_data(&data)?;
        Ok(data)
    }

    /// Writes `data` as this page's segment.
    ///
    /// The descriptor is validated against `data` before anything is written,
    /// and written last.
    pub fn write<I, V, S>(&self, data: &Data<I, V>, storage: &mut S) -> Result<()>
    where
        I: IndexElement,
        V: SeriesValue,
        S: SegmentStore + ?Sized,
    {
        self.check_with_data(data)?;
        storage.write_index(self.page_id, &format::encode_index(data.index()))?;
        storage.write_values(self.page_id, &format::encode_values(data.values())?)?;
        storage.write_descriptor(self)?;
        debug!(
            "Wrote page {} of '{}': {} elements [{}, {}], {} bytes",
            self.page_id, self.name, self.count, self.begin, self.end, self.size
        );
        Ok(())
    }

    /// Removes the page's segment from `storage`.
    pub fn delete<S: SegmentStore + ?Sized>(&self, storage: &mut S) -> Result<()> {
        storage.delete(self.page_id)
    }

    /// Checks the stored segment against this descriptor without decoding
    /// values.
    ///
    /// Compares the stored descriptor, checks the index buffer length, order
    /// and bounds, and validates the value payload header and checksum.
    pub fn verify<S: SegmentStore + ?Sized>(&self, storage: &S) -> Result<()> {
        let stored = storage.read_descriptor(self.page_id)?;
        self.compare(&stored)?;

        let corrupt = |reason: String| PageStoreError::CorruptPage {
            page_id: self.page_id,
            reason,
        };

        let raw = storage.read_index(self.page_id, self.idx_kind, self.count)?;
        let keys = raw
            .chunks_exact(self.idx_kind.width())
            .map(|chunk| self.idx_kind.decode_key(chunk))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| corrupt("malformed index element".to_string()))?;
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(corrupt("index is not strictly increasing".to_string()));
        }
        match (keys.first(), keys.last()) {
            (Some(first), Some(last)) if *first == self.begin && *last == self.end => {}
            (Some(first), Some(last)) => {
                return Err(corrupt(format!(
                    "index spans [{first}, {last}], descriptor says [{}, {}]",
                    self.begin, self.end
                )));
            }
            _ => return Err(corrupt("segment holds no elements".to_string())),
        }

        let header = format::read_values_header(&storage.read_values(self.page_id)?)?;
        if header.count != self.count || header.size != self.size {
            return Err(corrupt(format!(
                "value payload holds {} values of {} bytes, descriptor says {} of {}",
                header.count, header.size, self.count, self.size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use tempfile::TempDir;

    fn cubic(start: i64, stop: i64) -> Data<f64, f64> {
        let idx: Vec<f64> = (start..=stop).map(|x| x as f64).collect();
        let rec = idx.iter().map(|x| x * x * x).collect();
        Data::new("cubic", idx, rec).unwrap()
    }

    #[test]
    fn test_from_data() {
        let page = Page::from_data(7, &cubic(0, 10)).unwrap();
        assert_eq!(page.page_id, 7);
        assert_eq!(page.name, "cubic");
        assert_eq!(page.begin, IndexKey::Float(0.0));
        assert_eq!(page.end, IndexKey::Float(10.0));
        assert_eq!(page.count, 11);
        assert_eq!(page.size, 88);
        assert_eq!(page.idx_kind, ElementKind::F64);

        assert!(matches!(
            Page::from_data(0, &Data::<f64, f64>::empty("e")),
            Err(PageStoreError::EmptySeries(_))
        ));
    }

    #[test]
    fn test_from_data_name_length_limit() {
        let longest = "n".repeat(format::MAX_NAME_LEN);
        let page = Page::from_data(3, &cubic(0, 2).with_name(longest.clone())).unwrap();
        let mut buf = Vec::new();
        format::write_descriptor(&page, &mut buf).unwrap();
        assert_eq!(format::read_descriptor(&mut buf.as_slice()).unwrap().name, longest);

        let too_long = cubic(0, 2).with_name("n".repeat(format::MAX_NAME_LEN + 1));
        assert!(matches!(
            Page::from_data(3, &too_long),
            Err(PageStoreError::NameTooLong { len, max }) if len == max + 1
        ));
    }

    #[test]
    fn test_check_with_data() {
        let page = Page::from_data(1, &cubic(0, 10)).unwrap();
        assert!(page.check_with_data(&cubic(0, 10)).is_ok());
        assert!(matches!(
            page.check_with_data(&cubic(0, 11)),
            Err(PageStoreError::CorruptPage { page_id: 1, .. })
        ));
    }

    #[test]
    fn test_overlaps() {
        let a = Page::from_data(1, &cubic(0, 10)).unwrap();
        let b = Page::from_data(2, &cubic(10, 20)).unwrap();
        let c = Page::from_data(3, &cubic(11, 20)).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_read_write_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = FsSegmentStore::open(temp_dir.path(), SyncMode::None).unwrap();
        let data = cubic(0, 10);
        let page = Page::from_data(0, &data).unwrap();

        page.write(&data, &mut storage).unwrap();
        assert_eq!(page.read::<f64, f64, _>(&storage).unwrap(), data);
        assert!(page.verify(&storage).is_ok());

        page.delete(&mut storage).unwrap();
        assert!(matches!(
            page.read::<f64, f64, _>(&storage),
            Err(PageStoreError::PageNotFound(0))
        ));
    }

    #[test]
    fn test_write_rejects_mismatched_descriptor() {
        let mut storage = MemorySegmentStore::new();
        let page = Page::from_data(0, &cubic(0, 10)).unwrap();
        assert!(page.write(&cubic(0, 5), &mut storage).is_err());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_read_wrong_types() {
        let mut storage = MemorySegmentStore::new();
        let data = cubic(0, 3);
        let page = Page::from_data(0, &data).unwrap();
        page.write(&data, &mut storage).unwrap();

        assert!(matches!(
            page.read::<i64, f64, _>(&storage),
            Err(PageStoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            page.read::<f64, i64, _>(&storage),
            Err(PageStoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_detects_stale_descriptor() {
        let mut storage = MemorySegmentStore::new();
        let data = cubic(0, 10);
        let page = Page::from_data(0, &data).unwrap();
        page.write(&data, &mut storage).unwrap();

        let shorter = cubic(0, 4);
        Page::from_data(0, &shorter)
            .unwrap()
            .write(&shorter, &mut storage)
            .unwrap();

        assert!(matches!(
            page.verify(&storage),
            Err(PageStoreError::CorruptPage { page_id: 0, .. })
        ));
        assert!(page.read::<f64, f64, _>(&storage).is_err());
    }
}
