//! Segment storage backends.
//!
//! A segment holds the three artifacts of one page: the raw index buffer,
//! the value payload and the descriptor. [`SegmentStore`] is the seam the
//! engine writes through; [`FsSegmentStore`] keeps segments as files in a
//! directory tree and [`MemorySegmentStore`] keeps them in memory.

use super::format;
use super::{Page, PageId};
use crate::config::SyncMode;
use crate::error::{PageStoreError, Result};
use crate::series::ElementKind;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Index buffer file extension.
pub const INDEX_EXTENSION: &str = "idx";

/// Value payload file extension.
pub const VALUES_EXTENSION: &str = "rec";

/// Descriptor file extension.
pub const DESCRIPTOR_EXTENSION: &str = "page";

/// Per-page persistence of index buffers, value payloads and descriptors.
///
/// Implementations must make every write visible to subsequent reads of the
/// same page id, and `delete` must tolerate artifacts that are already gone.
pub trait SegmentStore {
    /// Persists the raw index buffer of a page.
    fn write_index(&mut self, page_id: PageId, index: &[u8]) -> Result<()>;

    /// Reads the raw index buffer of a page.
    ///
    /// # Errors
    ///
    /// Returns `PageStoreError::CorruptPage` if the buffer does not hold
    /// exactly `count` elements of `kind`.
    fn read_index(&self, page_id: PageId, kind: ElementKind, count: u64) -> Result<Vec<u8>>;

    /// Persists the value payload of a page.
    fn write_values(&mut self, page_id: PageId, payload: &[u8]) -> Result<()>;

    /// Reads the value payload of a page.
    fn read_values(&self, page_id: PageId) -> Result<Vec<u8>>;

    /// Persists the descriptor of a page.
    fn write_descriptor(&mut self, page: &Page) -> Result<()>;

    /// Reads the descriptor of a page.
    fn read_descriptor(&self, page_id: PageId) -> Result<Page>;

    /// Removes every artifact of a page.
    fn delete(&mut self, page_id: PageId) -> Result<()>;

    /// Removes every segment.
    fn destroy(&mut self) -> Result<()>;
}

fn check_index_len(page_id: PageId, kind: ElementKind, count: u64, len: usize) -> Result<()> {
    let expected = count as usize * kind.width();
    if len != expected {
        return Err(PageStoreError::CorruptPage {
            page_id,
            reason: format!(
                "index holds {len} bytes, expected {count} elements of {kind} ({expected} bytes)"
            ),
        });
    }
    Ok(())
}

/// Relative path of a page's artifacts, without extension.
///
/// The decimal page id is left-padded to an even number of digits and split
/// into two-digit components, so no directory holds more than a hundred
/// entries: `0` is `00`, `123` is `01/23`, `12345` is `01/23/45`.
pub fn page_path(page_id: PageId) -> PathBuf {
    let digits = page_id.to_string();
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits
    };
    padded
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect()
}

/// Filesystem segment store rooted at a directory.
///
/// Files are written to a temporary sibling, synced according to the
/// configured [`SyncMode`] and renamed into place.
#[derive(Debug)]
pub struct FsSegmentStore {
    root: PathBuf,
    sync_mode: SyncMode,
}

impl FsSegmentStore {
    /// Opens (creating if needed) a segment store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, sync_mode: SyncMode) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, sync_mode })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of one artifact of a page.
    pub fn segment_path(&self, page_id: PageId, extension: &str) -> PathBuf {
        self.root.join(page_path(page_id)).with_extension(extension)
    }

    fn write_file(&self, page_id: PageId, extension: &str, bytes: &[u8]) -> Result<()> {
        let path = self.segment_path(page_id, extension);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension(format!("{extension}.tmp"));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            self.sync_mode.sync(&file)?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn read_file(&self, page_id: PageId, extension: &str) -> Result<Vec<u8>> {
        match fs::read(self.segment_path(page_id, extension)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(PageStoreError::PageNotFound(page_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes empty directories between `dir` and the root.
    fn prune_dirs(&self, mut dir: &Path) {
        while dir.starts_with(&self.root) && dir != self.root {
            if fs::remove_dir(dir).is_err() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }
}

impl SegmentStore for FsSegmentStore {
    fn write_index(&mut self, page_id: PageId, index: &[u8]) -> Result<()> {
        self.write_file(page_id, INDEX_EXTENSION, index)
    }

    fn read_index(&self, page_id: PageId, kind: ElementKind, count: u64) -> Result<Vec<u8>> {
        let bytes = self.read_file(page_id, INDEX_EXTENSION)?;
        check_index_len(page_id, kind, count, bytes.len())?;
        Ok(bytes)
    }

    fn write_values(&mut self, page_id: PageId, payload: &[u8]) -> Result<()> {
        self.write_file(page_id, VALUES_EXTENSION, payload)
    }

    fn read_values(&self, page_id: PageId) -> Result<Vec<u8>> {
        self.read_file(page_id, VALUES_EXTENSION)
    }

    fn write_descriptor(&mut self, page: &Page) -> Result<()> {
        let mut buf = Vec::new();
        format::write_descriptor(page, &mut buf)?;
        self.write_file(page.page_id, DESCRIPTOR_EXTENSION, &buf)
    }

    fn read_descriptor(&self, page_id: PageId) -> Result<Page> {
        let bytes = self.read_file(page_id, DESCRIPTOR_EXTENSION)?;
        format::read_descriptor(&mut bytes.as_slice())
    }

    fn delete(&mut self, page_id: PageId) -> Result<()> {
        for extension in [INDEX_EXTENSION, VALUES_EXTENSION, DESCRIPTOR_EXTENSION] {
            match fs::remove_file(self.segment_path(page_id, extension)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        let path = self.segment_path(page_id, DESCRIPTOR_EXTENSION);
        if let Some(parent) = path.parent() {
            self.prune_dirs(parent);
        }
        debug!("Deleted segment of page {}", page_id);
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
struct MemorySegment {
    index: Option<Vec<u8>>,
    values: Option<Vec<u8>>,
    descriptor: Option<Vec<u8>>,
}

/// In-memory segment store.
///
/// Descriptors are kept in their encoded form so reads go through the same
/// decoding and checksum path as the filesystem store.
#[derive(Debug, Default)]
pub struct MemorySegmentStore {
    segments: BTreeMap<PageId, MemorySegment>,
}

impl MemorySegmentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pages with at least one artifact.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether no page has any artifact.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn segment(&self, page_id: PageId) -> Result<&MemorySegment> {
        self.segments
            .get(&page_id)
            .ok_or(PageStoreError::PageNotFound(page_id))
    }
}

impl SegmentStore for MemorySegmentStore {
    fn write_index(&mut self, page_id: PageId, index: &[u8]) -> Result<()> {
        self.segments.entry(page_id).or_default().index = Some(index.to_vec());
        Ok(())
    }

    fn read_index(&self, page_id: PageId, kind: ElementKind, count: u64) -> Result<Vec<u8>> {
        let bytes = self
            .segment(page_id)?
            .index
            .clone()
            .ok_or(PageStoreError::PageNotFound(page_id))?;
        check_index_len(page_id, kind, count, bytes.len())?;
        Ok(bytes)
    }

    fn write_values(&mut self, page_id: PageId, payload: &[u8]) -> Result<()> {
        self.segments.entry(page_id).or_default().values = Some(payload.to_vec());
        Ok(())
    }

    fn read_values(&self, page_id: PageId) -> Result<Vec<u8>> {
        self.segment(page_id)?
            .values
            .clone()
            .ok_or(PageStoreError::PageNotFound(page_id))
    }

    fn write_descriptor(&mut self, page: &Page) -> Result<()> {
        let mut buf = Vec::new();
        format::write_descriptor(page, &mut buf)?;
        self.segments.entry(page.page_id).or_default().descriptor = Some(buf);
        Ok(())
    }

    fn read_descriptor(&self, page_id: PageId) -> Result<Page> {
        let segment = self.segment(page_id)?;
        let bytes = segment
            .descriptor
            .as_deref()
            .ok_or(PageStoreError::PageNotFound(page_id))?;
        format::read_descriptor(&mut &bytes[..])
    }

    fn delete(&mut self, page_id: PageId) -> Result<()> {
        self.segments.remove(&page_id);
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        self.segments.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::IndexKey;
    use tempfile::TempDir;

    fn page(page_id: PageId) -> Page {
        Page {
            page_id,
            name: "a".to_string(),
            begin: IndexKey::Int(0),
            end: IndexKey::Int(1),
            count: 2,
            size: 16,
            idx_kind: ElementKind::I64,
        }
    }

    #[test]
    fn test_page_path() {
        assert_eq!(page_path(0), PathBuf::from("00"));
        assert_eq!(page_path(7), PathBuf::from("07"));
        assert_eq!(page_path(99), PathBuf::from("99"));
        assert_eq!(page_path(123), PathBuf::from("01/23"));
        assert_eq!(page_path(1234), PathBuf::from("12/34"));
        assert_eq!(page_path(12345), PathBuf::from("01/23/45"));
    }

    #[test]
    fn test_fs_layout() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FsSegmentStore::open(temp_dir.path(), SyncMode::None).unwrap();

        store.write_index(123, &[0u8; 16]).unwrap();
        store.write_descriptor(&page(123)).unwrap();

        assert!(temp_dir.path().join("01/23.idx").exists());
        assert!(temp_dir.path().join("01/23.page").exists());
        assert!(!temp_dir.path().join("01/23.idx.tmp").exists());
        assert_eq!(store.read_descriptor(123).unwrap(), page(123));
    }

    #[test]
    fn test_fs_index_length_checked() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FsSegmentStore::open(temp_dir.path(), SyncMode::None).unwrap();
        store.write_index(5, &[0u8; 12]).unwrap();

        assert!(store.read_index(5, ElementKind::I32, 3).is_ok());
        assert!(matches!(
            store.read_index(5, ElementKind::I64, 3),
            Err(PageStoreError::CorruptPage { page_id: 5, .. })
        ));
    }

    #[test]
    fn test_fs_delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FsSegmentStore::open(temp_dir.path(), SyncMode::None).unwrap();
        store.write_values(12345, b"payload").unwrap();

        store.delete(12345).unwrap();
        store.delete(12345).unwrap();
        assert!(matches!(
            store.read_values(12345),
            Err(PageStoreError::PageNotFound(12345))
        ));
        assert!(!temp_dir.path().join("01").exists());
        assert!(temp_dir.path().exists());
    }

    #[test]
    fn test_fs_destroy() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("pages");
        let mut store = FsSegmentStore::open(&root, SyncMode::None).unwrap();
        store.write_values(1, b"x").unwrap();

        store.destroy().unwrap();
        assert!(!root.exists());
        store.destroy().unwrap();
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemorySegmentStore::new();
        assert!(store.is_empty());
        store.write_index(1, &[0u8; 16]).unwrap();
        store.write_descriptor(&page(1)).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.read_descriptor(1).unwrap(), page(1));
        assert!(store.read_index(1, ElementKind::I64, 2).is_ok());
        assert!(matches!(
            store.read_values(1),
            Err(PageStoreError::PageNotFound(1))
        ));

        store.delete(1).unwrap();
        assert!(store.is_empty());
    }
}
