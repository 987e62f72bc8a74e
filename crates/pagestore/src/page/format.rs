//! Binary formats of page segments.
//!
//! A segment consists of three artifacts:
//!
//! - **Index** (`.idx`): the raw little-endian index buffer, `count * width`
//!   bytes, decoded with the element kind recorded in the descriptor.
//! - **Values** (`.rec`): a [`ValuesHeader`], the encoded values and a CRC32.
//! - **Descriptor** (`.page`): magic, version, page fields and a CRC32.
//!
//! The page field encoding is shared with the catalog journal.

use super::{Page, PageId};
use crate::error::{PageStoreError, Result};
use crate::series::{ElementKind, IndexElement, IndexKey, SeriesValue, ValueKind};
use std::io::{Read, Write};

/// Magic bytes of a value payload ("PGRV").
pub const VALUES_MAGIC: [u8; 4] = [b'P', b'G', b'R', b'V'];

/// Magic bytes of a page descriptor ("PGDS").
pub const DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'G', b'D', b'S'];

/// Segment format version.
pub const FORMAT_VERSION: u16 = 1;

/// Longest series name, in bytes, that page fields can encode.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

const CRC_SIZE: usize = 4;

/// Header of a value payload.
///
/// # Binary Format
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0x00    4     magic "PGRV"
/// 0x04    2     version (u16 LE)
/// 0x06    1     value kind (u8)
/// 0x07    1     reserved
/// 0x08    8     count (u64 LE)
/// 0x10    8     size, bytes occupied by the values (u64 LE)
/// 0x18    8     body_len, encoded body length (u64 LE)
/// 0x20    N     body
/// 0x20+N  4     crc32 over header and body (u32 LE)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuesHeader {
    /// Kind of the encoded values.
    pub kind: ValueKind,
    /// Number of values.
    pub count: u64,
    /// Bytes occupied by the values, as reported by `Data::byte_size`.
    pub size: u64,
    /// Length of the encoded body that follows the header.
    pub body_len: u64,
}

impl ValuesHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 32;

    /// Writes the header to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&VALUES_MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&[self.kind as u8, 0])?;
        writer.write_all(&self.count.to_le_bytes())?;
        writer.write_all(&self.size.to_le_bytes())?;
        writer.write_all(&self.body_len.to_le_bytes())?;
        Ok(())
    }

    /// Reads a header from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != VALUES_MAGIC {
            return Err(PageStoreError::InvalidMagic(magic));
        }

        let mut buf2 = [0u8; 2];
        reader.read_exact(&mut buf2)?;
        let version = u16::from_le_bytes(buf2);
        if version != FORMAT_VERSION {
            return Err(PageStoreError::UnsupportedVersion(version));
        }

        reader.read_exact(&mut buf2)?;
        let kind = ValueKind::from_u8(buf2[0]).ok_or_else(|| {
            PageStoreError::DecodeError(format!("unknown value kind {}", buf2[0]))
        })?;

        let mut buf8 = [0u8; 8];
        reader.read_exact(&mut buf8)?;
        let count = u64::from_le_bytes(buf8);
        reader.read_exact(&mut buf8)?;
        let size = u64::from_le_bytes(buf8);
        reader.read_exact(&mut buf8)?;
        let body_len = u64::from_le_bytes(buf8);

        Ok(Self {
            kind,
            count,
            size,
            body_len,
        })
    }
}

/// Encodes an index array as a raw little-endian buffer.
pub fn encode_index<I: IndexElement>(idx: &[I]) -> Vec<u8> {
    let mut out = Vec::with_capacity(idx.len() * I::KIND.width());
    for element in idx {
        element.write_le(&mut out);
    }
    out
}

/// Decodes a raw index buffer of element kind `I`.
pub fn decode_index<I: IndexElement>(bytes: &[u8]) -> Result<Vec<I>> {
    let width = I::KIND.width();
    if bytes.len() % width != 0 {
        return Err(PageStoreError::DecodeError(format!(
            "index buffer of {} bytes is not a multiple of {width}",
            bytes.len()
        )));
    }
    bytes
        .chunks_exact(width)
        .map(I::read_le)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| PageStoreError::DecodeError("malformed index element".to_string()))
}

/// Encodes values into a checksummed payload.
pub fn encode_values<V: SeriesValue>(values: &[V]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut size = 0u64;
    for value in values {
        value.encode(&mut body);
        size += value.byte_len() as u64;
    }

    let header = ValuesHeader {
        kind: V::KIND,
        count: values.len() as u64,
        size,
        body_len: body.len() as u64,
    };

    let mut out = Vec::with_capacity(ValuesHeader::SIZE + body.len() + CRC_SIZE);
    header.write_to(&mut out)?;
    out.extend_from_slice(&body);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Validates a value payload and returns its header.
///
/// # Errors
///
/// Returns `PageStoreError::ChecksumMismatch` if the CRC does not match and
/// `PageStoreError::DecodeError` if the body length disagrees with the header.
pub fn read_values_header(payload: &[u8]) -> Result<ValuesHeader> {
    let content = verify_crc(payload)?;
    let mut reader = content;
    let header = ValuesHeader::read_from(&mut reader)?;
    if header.body_len != reader.len() as u64 {
        return Err(PageStoreError::DecodeError(format!(
            "value body holds {} bytes, header says {}",
            reader.len(),
            header.body_len
        )));
    }
    Ok(header)
}

/// Decodes a value payload written by [`encode_values`].
///
/// `name` is only used for error reporting.
pub fn decode_values<V: SeriesValue>(name: &str, payload: &[u8]) -> Result<Vec<V>> {
    let header = read_values_header(payload)?;
    if header.kind != V::KIND {
        return Err(PageStoreError::TypeMismatch {
            name: name.to_string(),
            expected: V::KIND.to_string(),
            found: header.kind.to_string(),
        });
    }

    let mut body = &payload[ValuesHeader::SIZE..payload.len() - CRC_SIZE];
    let mut values = Vec::with_capacity(header.count as usize);
    for _ in 0..header.count {
        let value = V::decode(&mut body).ok_or_else(|| {
            PageStoreError::DecodeError(format!("truncated value body for series '{name}'"))
        })?;
        values.push(value);
    }
    if !body.is_empty() {
        return Err(PageStoreError::DecodeError(format!(
            "{} trailing bytes in value body for series '{name}'",
            body.len()
        )));
    }
    Ok(values)
}

fn verify_crc(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < CRC_SIZE {
        return Err(PageStoreError::DecodeError(format!(
            "{} bytes is too short for a checksummed record",
            bytes.len()
        )));
    }
    let (content, crc) = bytes.split_at(bytes.len() - CRC_SIZE);
    let mut buf4 = [0u8; 4];
    buf4.copy_from_slice(crc);
    let expected = u32::from_le_bytes(buf4);
    let actual = crc32fast::hash(content);
    if expected != actual {
        return Err(PageStoreError::ChecksumMismatch { expected, actual });
    }
    Ok(content)
}

/// Appends the page fields to `out`.
///
/// ```text
/// page_id (u64) | idx_kind (u8) | begin (9) | end (9) | count (u64) |
/// size (u64) | name_len (u16) | name (UTF-8)
/// ```
///
/// Names longer than [`MAX_NAME_LEN`] are rejected by [`Page::from_data`].
pub(crate) fn encode_page(page: &Page, out: &mut Vec<u8>) {
    out.extend_from_slice(&page.page_id.to_le_bytes());
    out.push(page.idx_kind as u8);
    page.begin.encode(out);
    page.end.encode(out);
    out.extend_from_slice(&page.count.to_le_bytes());
    out.extend_from_slice(&page.size.to_le_bytes());
    out.extend_from_slice(&(page.name.len() as u16).to_le_bytes());
    out.extend_from_slice(page.name.as_bytes());
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if input.len() < n {
        return Err(PageStoreError::DecodeError(format!(
            "needed {n} bytes, {} left",
            input.len()
        )));
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

fn take_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(input, N)?);
    Ok(out)
}

fn take_key(input: &mut &[u8]) -> Result<IndexKey> {
    let bytes = take_array::<{ IndexKey::ENCODED_SIZE }>(input)?;
    IndexKey::decode(&bytes).ok_or_else(|| {
        PageStoreError::DecodeError(format!("unknown index key tag {}", bytes[0]))
    })
}

/// Decodes page fields written by `encode_page`, advancing `input`.
pub(crate) fn decode_page(input: &mut &[u8]) -> Result<Page> {
    let page_id: PageId = u64::from_le_bytes(take_array(input)?);
    let kind_tag = take_array::<1>(input)?[0];
    let idx_kind = ElementKind::from_u8(kind_tag).ok_or_else(|| {
        PageStoreError::DecodeError(format!("unknown element kind {kind_tag}"))
    })?;
    let begin = take_key(input)?;
    let end = take_key(input)?;
    let count = u64::from_le_bytes(take_array(input)?);
    let size = u64::from_le_bytes(take_array(input)?);
    let name_len = u16::from_le_bytes(take_array(input)?) as usize;
    let name = String::from_utf8(take(input, name_len)?.to_vec())
        .map_err(|e| PageStoreError::DecodeError(format!("page name is not UTF-8: {e}")))?;

    Ok(Page {
        page_id,
        name,
        begin,
        end,
        count,
        size,
        idx_kind,
    })
}

/// Writes a page descriptor (magic, version, page fields, CRC32).
pub fn write_descriptor<W: Write>(page: &Page, writer: &mut W) -> Result<()> {
    let mut buf = Vec::with_capacity(64 + page.name.len());
    buf.extend_from_slice(&DESCRIPTOR_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    encode_page(page, &mut buf);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    writer.write_all(&buf)?;
    Ok(())
}

/// Reads a page descriptor written by [`write_descriptor`].
pub fn read_descriptor<R: Read>(reader: &mut R) -> Result<Page> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let mut content = verify_crc(&bytes)?;

    let magic = take_array::<4>(&mut content)?;
    if magic != DESCRIPTOR_MAGIC {
        return Err(PageStoreError::InvalidMagic(magic));
    }
    let version = u16::from_le_bytes(take_array(&mut content)?);
    if version != FORMAT_VERSION {
        return Err(PageStoreError::UnsupportedVersion(version));
    }

    let page = decode_page(&mut content)?;
    if !content.is_empty() {
        return Err(PageStoreError::DecodeError(format!(
            "{} trailing bytes after descriptor of page {}",
            content.len(),
            page.page_id
        )));
    }
    Ok(page)
}
