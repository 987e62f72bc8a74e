//! Append-only catalog journal.
//!
//! Every catalog mutation is appended as a checksummed record before it is
//! applied in memory. Opening the journal replays it; a checkpoint rewrites
//! it to hold only the live pages.
//!
//! # Binary Format
//!
//! ```text
//! header:  magic "PGCL" (4) | version (u16 LE)
//! frame:   payload_len (u32 LE) | crc32 of payload (u32 LE) | payload
//! payload: type (u8) | Put: page fields | Remove: page_id (u64 LE)
//! ```

use crate::config::SyncMode;
use crate::error::{PageStoreError, Result};
use crate::page::{format, Page, PageId};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Catalog journal magic bytes ("PGCL").
const CATALOG_MAGIC: [u8; 4] = [b'P', b'G', b'C', b'L'];

/// Catalog journal format version.
const CATALOG_VERSION: u16 = 1;

const HEADER_SIZE: usize = 6;
const FRAME_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    Put = 1,
    Remove = 2,
}

/// A single catalog mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogRecord {
    /// Insert or replace a page descriptor.
    Put(Page),
    /// Remove a page descriptor.
    Remove(PageId),
}

impl CatalogRecord {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            Self::Put(page) => {
                bytes.push(RecordType::Put as u8);
                format::encode_page(page, &mut bytes);
            }
            Self::Remove(page_id) => {
                bytes.push(RecordType::Remove as u8);
                bytes.extend_from_slice(&page_id.to_le_bytes());
            }
        }
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some((&record_type, mut rest)) = bytes.split_first() else {
            return Err(PageStoreError::DecodeError(
                "Empty catalog record".to_string(),
            ));
        };

        let record = match record_type {
            x if x == RecordType::Put as u8 => Self::Put(format::decode_page(&mut rest)?),
            x if x == RecordType::Remove as u8 => {
                let id_bytes: [u8; 8] = rest.try_into().map_err(|_| {
                    PageStoreError::DecodeError("Malformed catalog remove record".to_string())
                })?;
                rest = &[];
                Self::Remove(u64::from_le_bytes(id_bytes))
            }
            other => {
                return Err(PageStoreError::DecodeError(format!(
                    "Unknown catalog record type {other}"
                )))
            }
        };

        if !rest.is_empty() {
            return Err(PageStoreError::DecodeError(format!(
                "{} trailing bytes in catalog record",
                rest.len()
            )));
        }
        Ok(record)
    }
}

fn write_header<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_all(&CATALOG_MAGIC)?;
    writer.write_all(&CATALOG_VERSION.to_le_bytes())?;
    Ok(())
}

fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&crc32fast::hash(payload).to_le_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Append-only journal backing a persistent catalog.
pub struct CatalogLog {
    path: PathBuf,
    writer: BufWriter<File>,
    sync_mode: SyncMode,
    /// Records currently in the journal file.
    records: usize,
}

impl CatalogLog {
    /// Opens the journal at `path`, creating it if missing, and returns the
    /// records it holds in append order.
    ///
    /// A trailing frame cut short by a crash is dropped and the file is
    /// truncated to the last complete record.
    ///
    /// # Errors
    ///
    /// Returns `PageStoreError::ChecksumMismatch` if a complete record fails
    /// its CRC, or `PageStoreError::InvalidMagic` /
    /// `PageStoreError::UnsupportedVersion` for a foreign file.
    pub fn open(path: impl AsRef<Path>, sync_mode: SyncMode) -> Result<(Self, Vec<CatalogRecord>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let records = if path.exists() {
            Self::replay(&path, sync_mode)?
        } else {
            Self::create(&path, sync_mode)?;
            Vec::new()
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        let log = Self {
            path,
            writer: BufWriter::new(file),
            sync_mode,
            records: records.len(),
        };
        Ok((log, records))
    }

    fn create(path: &Path, sync_mode: SyncMode) -> Result<()> {
        let mut file = File::create(path)?;
        write_header(&mut file)?;
        sync_mode.sync(&file)?;
        Ok(())
    }

    fn replay(path: &Path, sync_mode: SyncMode) -> Result<Vec<CatalogRecord>> {
        let bytes = fs::read(path)?;
        if bytes.len() < HEADER_SIZE {
            warn!(
                "Catalog journal {:?} has an incomplete header, starting empty",
                path
            );
            Self::create(path, sync_mode)?;
            return Ok(Vec::new());
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        if magic != CATALOG_MAGIC {
            return Err(PageStoreError::InvalidMagic(magic));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != CATALOG_VERSION {
            return Err(PageStoreError::UnsupportedVersion(version));
        }

        let mut records = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < bytes.len() {
            let rest = &bytes[offset..];
            if rest.len() < FRAME_HEADER_SIZE {
                break;
            }
            let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            let expected = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
            if rest.len() < FRAME_HEADER_SIZE + len {
                break;
            }

            let payload = &rest[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len];
            let actual = crc32fast::hash(payload);
            if expected != actual {
                warn!(
                    "Catalog journal record at offset {} failed its checksum",
                    offset
                );
                return Err(PageStoreError::ChecksumMismatch { expected, actual });
            }
            records.push(CatalogRecord::from_bytes(payload)?);
            offset += FRAME_HEADER_SIZE + len;
        }

        if offset < bytes.len() {
            warn!(
                "Truncating torn catalog journal tail: {} bytes after offset {}",
                bytes.len() - offset,
                offset
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(offset as u64)?;
            sync_mode.sync(&file)?;
        }

        debug!("Replayed {} catalog records from {:?}", records.len(), path);
        Ok(records)
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the journal file.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Appends a record and syncs according to the configured mode.
    pub fn append(&mut self, record: &CatalogRecord) -> Result<()> {
        write_frame(&mut self.writer, &record.to_bytes())?;
        self.writer.flush()?;
        self.sync_mode.sync(self.writer.get_ref())?;
        self.records += 1;
        Ok(())
    }

    /// Replaces the journal with one `Put` record per page.
    ///
    /// The new journal is written to a temporary file, synced and renamed
    /// over the old one.
    pub fn rewrite<'a>(&mut self, pages: impl IntoIterator<Item = &'a Page>) -> Result<()> {
        let mut tmp_path = self.path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut count = 0;
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            write_header(&mut writer)?;
            for page in pages {
                write_frame(&mut writer, &CatalogRecord::Put(page.clone()).to_bytes())?;
                count += 1;
            }
            writer.flush()?;
            self.sync_mode.sync(writer.get_ref())?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        debug!(
            "Checkpointed catalog journal {:?}: {} records down to {}",
            self.path, self.records, count
        );
        self.records = count;
        Ok(())
    }

    /// Deletes the journal file.
    pub fn remove(self) -> Result<()> {
        let Self { path, writer, .. } = self;
        drop(writer);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
