//! Element kinds for series indices and values.
//!
//! A series carries exactly one index kind and one value kind. Index
//! elements are fixed-width numerics with a total order; values are either
//! fixed-width numerics or variable-width byte strings.

use std::cmp::Ordering;
use std::fmt;

/// Element-type tag of an index array.
///
/// The tag is persisted in every page descriptor so that a segment can be
/// decoded without knowing the caller's types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementKind {
    /// 32-bit signed integer.
    I32 = 1,
    /// 64-bit signed integer.
    I64 = 2,
    /// 32-bit unsigned integer.
    U32 = 3,
    /// 64-bit unsigned integer.
    U64 = 4,
    /// 32-bit IEEE float.
    F32 = 5,
    /// 64-bit IEEE float.
    F64 = 6,
}

impl ElementKind {
    /// Converts a u8 tag to an element kind.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::I32),
            2 => Some(Self::I64),
            3 => Some(Self::U32),
            4 => Some(Self::U64),
            5 => Some(Self::F32),
            6 => Some(Self::F64),
            _ => None,
        }
    }

    /// Width in bytes of one element.
    pub fn width(self) -> usize {
        match self {
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Array type code, e.g. `<f8` for little-endian f64.
    pub fn type_code(self) -> &'static str {
        match self {
            Self::I32 => "<i4",
            Self::I64 => "<i8",
            Self::U32 => "<u4",
            Self::U64 => "<u8",
            Self::F32 => "<f4",
            Self::F64 => "<f8",
        }
    }

    /// Decodes one little-endian element of this kind into an [`IndexKey`].
    ///
    /// Returns `None` if `bytes` is not exactly [`width`](Self::width) long.
    pub fn decode_key(self, bytes: &[u8]) -> Option<IndexKey> {
        match self {
            Self::I32 => i32::read_le(bytes).map(IndexElement::to_key),
            Self::I64 => i64::read_le(bytes).map(IndexElement::to_key),
            Self::U32 => u32::read_le(bytes).map(IndexElement::to_key),
            Self::U64 => u64::read_le(bytes).map(IndexElement::to_key),
            Self::F32 => f32::read_le(bytes).map(IndexElement::to_key),
            Self::F64 => f64::read_le(bytes).map(IndexElement::to_key),
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_code())
    }
}

/// Kind-erased index element with a total order.
///
/// Narrow kinds are widened (`i32` to `Int`, `u32` to `UInt`, `f32` to
/// `Float`). Floats compare by IEEE total order with `-0.0` equal to `0.0`. Keys of different variants
/// only meet when a catalog holds series of different index kinds, and then
/// order by variant.
#[derive(Debug, Clone, Copy)]
pub enum IndexKey {
    /// Signed integer index.
    Int(i64),
    /// Unsigned integer index.
    UInt(u64),
    /// Floating point index.
    Float(f64),
}

impl IndexKey {
    const INT_TAG: u8 = 1;
    const UINT_TAG: u8 = 2;
    const FLOAT_TAG: u8 = 3;

    /// Encoded size: one tag byte plus eight payload bytes.
    pub const ENCODED_SIZE: usize = 9;

    fn variant_rank(&self) -> u8 {
        match self {
            Self::Int(_) => Self::INT_TAG,
            Self::UInt(_) => Self::UINT_TAG,
            Self::Float(_) => Self::FLOAT_TAG,
        }
    }

    /// Appends the tagged little-endian encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.variant_rank());
        match self {
            Self::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::UInt(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    /// Decodes a key written by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8; 9]) -> Option<Self> {
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&bytes[1..]);
        match bytes[0] {
            Self::INT_TAG => Some(Self::Int(i64::from_le_bytes(payload))),
            Self::UINT_TAG => Some(Self::UInt(u64::from_le_bytes(payload))),
            Self::FLOAT_TAG => Some(Self::Float(f64::from_le_bytes(payload))),
            _ => None,
        }
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::UInt(a), Self::UInt(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => float_order(*a, *b),
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// IEEE total order, except that `-0.0` and `0.0` are the same index.
fn float_order(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// A fixed-width numeric usable as a series index.
pub trait IndexElement: Copy + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Element-type tag persisted in page descriptors.
    const KIND: ElementKind;

    /// Total order used for sorting, merging and range bounds.
    fn order(&self, other: &Self) -> Ordering;

    /// Kind-erased key used by descriptors and the catalog.
    fn to_key(self) -> IndexKey;

    /// Inverse of [`to_key`](Self::to_key); `None` for a key of another kind.
    fn from_key(key: IndexKey) -> Option<Self>;

    /// Appends the little-endian bytes of this element.
    fn write_le(self, out: &mut Vec<u8>);

    /// Reads an element from exactly `KIND.width()` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_int_index {
    ($ty:ty, $kind:ident, $variant:ident, $wide:ty) => {
        impl IndexElement for $ty {
            const KIND: ElementKind = ElementKind::$kind;

            fn order(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }

            fn to_key(self) -> IndexKey {
                IndexKey::$variant(<$wide>::from(self))
            }

            fn from_key(key: IndexKey) -> Option<Self> {
                match key {
                    IndexKey::$variant(v) => <$ty>::try_from(v).ok(),
                    _ => None,
                }
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Option<Self> {
                bytes.try_into().ok().map(<$ty>::from_le_bytes)
            }
        }
    };
}

impl_int_index!(i32, I32, Int, i64);
impl_int_index!(i64, I64, Int, i64);
impl_int_index!(u32, U32, UInt, u64);
impl_int_index!(u64, U64, UInt, u64);

impl IndexElement for f32 {
    const KIND: ElementKind = ElementKind::F32;

    fn order(&self, other: &Self) -> Ordering {
        float_order(f64::from(*self), f64::from(*other))
    }

    fn to_key(self) -> IndexKey {
        // Adding zero turns -0.0 into 0.0.
        IndexKey::Float(f64::from(self) + 0.0)
    }

    fn from_key(key: IndexKey) -> Option<Self> {
        match key {
            // Keys of f32 series were widened from f32, so narrowing is exact.
            IndexKey::Float(v) => Some(v as f32),
            _ => None,
        }
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(f32::from_le_bytes)
    }
}

impl IndexElement for f64 {
    const KIND: ElementKind = ElementKind::F64;

    fn order(&self, other: &Self) -> Ordering {
        float_order(*self, *other)
    }

    fn to_key(self) -> IndexKey {
        IndexKey::Float(self + 0.0)
    }

    fn from_key(key: IndexKey) -> Option<Self> {
        match key {
            IndexKey::Float(v) => Some(v),
            _ => None,
        }
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(f64::from_le_bytes)
    }
}

/// Kind tag of a value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    /// 32-bit signed integer.
    I32 = 1,
    /// 64-bit signed integer.
    I64 = 2,
    /// 32-bit unsigned integer.
    U32 = 3,
    /// 64-bit unsigned integer.
    U64 = 4,
    /// 32-bit IEEE float.
    F32 = 5,
    /// 64-bit IEEE float.
    F64 = 6,
    /// UTF-8 string.
    Utf8 = 16,
    /// Raw bytes.
    Bytes = 17,
}

impl ValueKind {
    /// Converts a u8 tag to a value kind.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::I32),
            2 => Some(Self::I64),
            3 => Some(Self::U32),
            4 => Some(Self::U64),
            5 => Some(Self::F32),
            6 => Some(Self::F64),
            16 => Some(Self::Utf8),
            17 => Some(Self::Bytes),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "<i4",
            Self::I64 => "<i8",
            Self::U32 => "<u4",
            Self::U64 => "<u8",
            Self::F32 => "<f4",
            Self::F64 => "<f8",
            Self::Utf8 => "utf8",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// A value that can be stored in a series.
pub trait SeriesValue: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Kind tag persisted in the value payload header.
    const KIND: ValueKind;

    /// Width of every value when it is constant, `None` for variable width.
    const FIXED_WIDTH: Option<usize>;

    /// Bytes this value occupies in the payload body, excluding framing.
    fn byte_len(&self) -> usize;

    /// Appends the encoded value to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decodes one value from the front of `input`, advancing it.
    fn decode(input: &mut &[u8]) -> Option<Self>;
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if input.len() < n {
        return None;
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Some(head)
}

macro_rules! impl_numeric_value {
    ($ty:ty, $kind:ident) => {
        impl SeriesValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;
            const FIXED_WIDTH: Option<usize> = Some(std::mem::size_of::<$ty>());

            fn byte_len(&self) -> usize {
                std::mem::size_of::<$ty>()
            }

            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn decode(input: &mut &[u8]) -> Option<Self> {
                take(input, std::mem::size_of::<$ty>())
                    .and_then(|bytes| bytes.try_into().ok())
                    .map(<$ty>::from_le_bytes)
            }
        }
    };
}

impl_numeric_value!(i32, I32);
impl_numeric_value!(i64, I64);
impl_numeric_value!(u32, U32);
impl_numeric_value!(u64, U64);
impl_numeric_value!(f32, F32);
impl_numeric_value!(f64, F64);

fn decode_length_prefixed<'a>(input: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = take(input, 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)?;
    take(input, len as usize)
}

impl SeriesValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;
    const FIXED_WIDTH: Option<usize> = None;

    fn byte_len(&self) -> usize {
        self.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        out.extend_from_slice(self);
    }

    fn decode(input: &mut &[u8]) -> Option<Self> {
        decode_length_prefixed(input).map(<[u8]>::to_vec)
    }
}

impl SeriesValue for String {
    const KIND: ValueKind = ValueKind::Utf8;
    const FIXED_WIDTH: Option<usize> = None;

    fn byte_len(&self) -> usize {
        self.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        out.extend_from_slice(self.as_bytes());
    }

    fn decode(input: &mut &[u8]) -> Option<Self> {
        decode_length_prefixed(input).and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
    }
}
