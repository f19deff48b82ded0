//! Data section decoding for MaxMind DB files
//!
//! Decodes every MaxMind DB data type. Every lookup result and the metadata
//! block are encoded this way.
//!
//! # Supported Types
//!
//! - **Pointer**: Reference to another data item in the same section
//! - **String**: UTF-8 text data
//! - **Double**: 64-bit floating point (IEEE 754)
//! - **Bytes**: Raw byte arrays
//! - **Uint16**: Unsigned 16-bit integers
//! - **Uint32**: Unsigned 32-bit integers
//! - **Map**: Key-value pairs (string keys)
//! - **Int32**: Signed 32-bit integers
//! - **Uint64**: Unsigned 64-bit integers
//! - **Uint128**: Unsigned 128-bit integers
//! - **Array**: Ordered lists of values
//! - **Boolean**: Boolean values
//! - **Float**: 32-bit floating point (IEEE 754)
//!
//! # Format
//!
//! Control byte encodes type (3 bits) and size/payload (5 bits). Type 0 is an
//! escape: the real type is `7 + next byte`. Sizes 29, 30 and 31 mean one, two
//! or three big-endian size bytes follow.
//!
//! Decoded strings and byte blobs are copied out of the buffer, so a `Value`
//! never borrows from the database it came from.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::byte_source::read_slice;
use crate::error::{MmdbError, Result};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;

/// Default bound on pointers followed while decoding one value.
pub const DEFAULT_MAX_POINTER_DEPTH: usize = 16;

/// Default bound on Map/Array nesting.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 512;

const TYPE_EXTENDED: u8 = 0;
const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_DATA_CACHE: u8 = 12;
const TYPE_END_MARKER: u8 = 13;
const TYPE_BOOLEAN: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// A decoded data section value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Pointer to another data item (offset within the section)
    Pointer(u32),
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only)
    Map(BTreeMap<String, Value>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<Value>),
    /// Boolean value
    Boolean(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

/// One step of a path into a nested value: a map key or an array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathElement<'p> {
    /// Select a map entry by key
    Key(&'p str),
    /// Select an array element by position
    Index(usize),
}

impl<'p> From<&'p str> for PathElement<'p> {
    fn from(key: &'p str) -> Self {
        PathElement::Key(key)
    }
}

impl From<usize> for PathElement<'_> {
    fn from(index: usize) -> Self {
        PathElement::Index(index)
    }
}

impl Value {
    /// Name of the value's type as used in the format documentation
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Pointer(_) => "pointer",
            Value::String(_) => "utf8_string",
            Value::Double(_) => "double",
            Value::Bytes(_) => "bytes",
            Value::Uint16(_) => "uint16",
            Value::Uint32(_) => "uint32",
            Value::Map(_) => "map",
            Value::Int32(_) => "int32",
            Value::Uint64(_) => "uint64",
            Value::Uint128(_) => "uint128",
            Value::Array(_) => "array",
            Value::Boolean(_) => "boolean",
            Value::Float(_) => "float",
        }
    }

    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any unsigned integer type that fits in a u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint16(n) => Some(*n as u64),
            Value::Uint32(n) => Some(*n as u64),
            Value::Uint64(n) => Some(*n),
            Value::Uint128(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Double or float, widened to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Float(f) => Some(*f as f64),
            _ => None,
        }
    }

    /// Boolean contents, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Map contents, if this is a map
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Array contents, if this is an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Look up a key, if this is a map
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.get(key)
    }

    /// Walk a path of map keys and array indices.
    ///
    /// Returns `None` as soon as a step does not apply: a key on a non-map,
    /// an index on a non-array, a missing key or an index past the end.
    ///
    /// ```
    /// use mmdb::Value;
    /// use std::collections::BTreeMap;
    ///
    /// let mut names = BTreeMap::new();
    /// names.insert("en".to_string(), Value::String("Berlin".to_string()));
    /// let mut city = BTreeMap::new();
    /// city.insert("names".to_string(), Value::Map(names));
    /// let mut record = BTreeMap::new();
    /// record.insert("city".to_string(), Value::Map(city));
    /// let record = Value::Map(record);
    ///
    /// let name = record.get_path(["city", "names", "en"]).and_then(Value::as_str);
    /// assert_eq!(name, Some("Berlin"));
    /// ```
    pub fn get_path<'p, I, P>(&self, path: I) -> Option<&Value>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathElement<'p>>,
    {
        let mut current = self;
        for element in path {
            current = match (element.into(), current) {
                (PathElement::Key(key), Value::Map(map)) => map.get(key)?,
                (PathElement::Index(i), Value::Array(items)) => items.get(i)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Pointer(offset) => serializer.serialize_u32(*offset),
            Value::String(s) => serializer.serialize_str(s),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::Bytes(b) => {
                let mut seq = serializer.serialize_seq(Some(b.len()))?;
                for byte in b {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            Value::Uint16(n) => serializer.serialize_u16(*n),
            Value::Uint32(n) => serializer.serialize_u32(*n),
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Int32(n) => serializer.serialize_i32(*n),
            Value::Uint64(n) => serializer.serialize_u64(*n),
            Value::Uint128(n) => serializer.serialize_u128(*n),
            Value::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for v in a {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Float(f) => serializer.serialize_f32(*f),
        }
    }
}

/// Safety bounds applied while decoding untrusted input.
///
/// The format itself does not bound pointer chains; well-formed files only
/// point backwards, but a corrupt or hostile file can form cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Pointers followed along one decode path before giving up
    pub max_pointer_depth: usize,
    /// Map/Array nesting before giving up
    pub max_nesting_depth: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_pointer_depth: DEFAULT_MAX_POINTER_DEPTH,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

/// Recursion state carried down one decode call
#[derive(Debug, Clone, Copy, Default)]
struct Depth {
    pointers: usize,
    nesting: usize,
}

/// Data section decoder
///
/// Decodes values from one section of a database (the data section or the
/// metadata block). Offsets, including pointer targets, are relative to the
/// start of `buffer`.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
    limits: DecodeLimits,
}

impl<'a> Decoder<'a> {
    /// Create a decoder with the default safety limits
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::with_limits(buffer, DecodeLimits::default())
    }

    /// Create a decoder with explicit pointer-chase and nesting limits
    pub fn with_limits(buffer: &'a [u8], limits: DecodeLimits) -> Self {
        Self { buffer, limits }
    }

    /// Size of the section in bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if the section is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Decode a value at the given offset
    pub fn decode(&self, offset: usize) -> Result<Value> {
        self.decode_at(offset).map(|(value, _)| value)
    }

    /// Decode a value and return the offset just past its encoding.
    ///
    /// When the value at `offset` is a pointer, the returned offset follows
    /// the pointer itself, not its target.
    pub fn decode_at(&self, offset: usize) -> Result<(Value, usize)> {
        let mut cursor = offset;
        let value = self.decode_value(&mut cursor, Depth::default())?;
        Ok((value, cursor))
    }

    fn decode_value(&self, cursor: &mut usize, depth: Depth) -> Result<Value> {
        let start = *cursor;
        let ctrl = self.read_u8(cursor)?;
        let mut type_id = ctrl >> 5;

        if type_id == TYPE_POINTER {
            let target = self.decode_pointer(cursor, ctrl)?;
            return self.follow_pointer(start, target, depth);
        }

        if type_id == TYPE_EXTENDED {
            let ext = self.read_u8(cursor)?;
            type_id = match ext.checked_add(7) {
                Some(t) if (TYPE_INT32..=TYPE_FLOAT).contains(&t) => t,
                _ => {
                    return Err(MmdbError::malformed(
                        start,
                        format!("invalid extended type byte {}", ext),
                    ))
                }
            };
        }

        let size = self.decode_size(cursor, ctrl & 0x1F)?;

        match type_id {
            TYPE_STRING => {
                let bytes = self.read_payload(cursor, size)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| MmdbError::malformed(start, "invalid UTF-8 in string"))?;
                Ok(Value::String(s.to_string()))
            }
            TYPE_DOUBLE => {
                if size != 8 {
                    return Err(MmdbError::malformed(
                        start,
                        format!("double must be 8 bytes, got {}", size),
                    ));
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(self.read_payload(cursor, 8)?);
                Ok(Value::Double(f64::from_be_bytes(bytes)))
            }
            TYPE_BYTES => Ok(Value::Bytes(self.read_payload(cursor, size)?.to_vec())),
            TYPE_UINT16 => Ok(Value::Uint16(self.read_uint(cursor, start, size, 2)? as u16)),
            TYPE_UINT32 => Ok(Value::Uint32(self.read_uint(cursor, start, size, 4)? as u32)),
            TYPE_MAP => self.decode_map(cursor, start, size, depth),
            TYPE_INT32 => Ok(Value::Int32(self.read_uint(cursor, start, size, 4)? as u32 as i32)),
            TYPE_UINT64 => Ok(Value::Uint64(self.read_uint(cursor, start, size, 8)? as u64)),
            TYPE_UINT128 => Ok(Value::Uint128(self.read_uint(cursor, start, size, 16)?)),
            TYPE_ARRAY => self.decode_array(cursor, start, size, depth),
            TYPE_BOOLEAN => match size {
                0 => Ok(Value::Boolean(false)),
                1 => Ok(Value::Boolean(true)),
                _ => Err(MmdbError::malformed(
                    start,
                    format!("boolean size must be 0 or 1, got {}", size),
                )),
            },
            TYPE_FLOAT => {
                if size != 4 {
                    return Err(MmdbError::malformed(
                        start,
                        format!("float must be 4 bytes, got {}", size),
                    ));
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(self.read_payload(cursor, 4)?);
                Ok(Value::Float(f32::from_be_bytes(bytes)))
            }
            TYPE_DATA_CACHE | TYPE_END_MARKER => Err(MmdbError::malformed(
                start,
                format!("type {} is not a valid data value", type_id),
            )),
            _ => Err(MmdbError::malformed(start, format!("unknown type {}", type_id))),
        }
    }

    /// Pointer target from the control byte's `SSVVV` bits plus 1-4 follow-on bytes
    fn decode_pointer(&self, cursor: &mut usize, ctrl: u8) -> Result<usize> {
        let size_class = (ctrl >> 3) & 0x3;
        let high = (ctrl & 0x7) as usize;
        let follow = self.read_payload(cursor, size_class as usize + 1)?;
        let raw = follow.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);

        let target = match size_class {
            0 => (high << 8) | raw,
            1 => 2048 + ((high << 16) | raw),
            2 => 526_336 + ((high << 24) | raw),
            _ => raw,
        };
        Ok(target)
    }

    fn follow_pointer(&self, start: usize, target: usize, depth: Depth) -> Result<Value> {
        if target >= self.buffer.len() {
            return Err(MmdbError::PointerOutOfBounds {
                target,
                section_size: self.buffer.len(),
            });
        }
        if depth.pointers >= self.limits.max_pointer_depth {
            return Err(MmdbError::PointerCycleSuspected {
                offset: start,
                limit: self.limits.max_pointer_depth,
            });
        }

        let mut target_cursor = target;
        self.decode_value(
            &mut target_cursor,
            Depth {
                pointers: depth.pointers + 1,
                ..depth
            },
        )
    }

    fn decode_map(&self, cursor: &mut usize, start: usize, count: usize, depth: Depth) -> Result<Value> {
        let depth = self.nested(start, depth)?;
        let mut map = BTreeMap::new();

        for _ in 0..count {
            let key_offset = *cursor;
            let key = match self.decode_value(cursor, depth)? {
                Value::String(s) => s,
                other => {
                    return Err(MmdbError::malformed(
                        key_offset,
                        format!("map key must be a string, got {}", other.type_name()),
                    ))
                }
            };
            let value = self.decode_value(cursor, depth)?;
            map.insert(key, value);
        }

        Ok(Value::Map(map))
    }

    fn decode_array(&self, cursor: &mut usize, start: usize, count: usize, depth: Depth) -> Result<Value> {
        let depth = self.nested(start, depth)?;
        // Every element takes at least one byte; never trust `count` for allocation
        let remaining = self.buffer.len().saturating_sub(*cursor);
        let mut array = Vec::with_capacity(count.min(remaining));

        for _ in 0..count {
            array.push(self.decode_value(cursor, depth)?);
        }

        Ok(Value::Array(array))
    }

    fn nested(&self, start: usize, depth: Depth) -> Result<Depth> {
        if depth.nesting >= self.limits.max_nesting_depth {
            return Err(MmdbError::malformed(
                start,
                format!("containers nested deeper than {}", self.limits.max_nesting_depth),
            ));
        }
        Ok(Depth {
            nesting: depth.nesting + 1,
            ..depth
        })
    }

    fn decode_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize> {
        let extra = match size_bits {
            0..=28 => return Ok(size_bits as usize),
            29 => 1,
            30 => 2,
            _ => 3,
        };
        let bytes = self.read_payload(cursor, extra)?;
        let n = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);

        Ok(match size_bits {
            29 => 29 + n,
            30 => 285 + n,
            _ => 65_821 + n,
        })
    }

    /// Big-endian unsigned integer of `size` bytes, at most `max_size`
    fn read_uint(&self, cursor: &mut usize, start: usize, size: usize, max_size: usize) -> Result<u128> {
        if size > max_size {
            return Err(MmdbError::malformed(
                start,
                format!("integer of {} bytes exceeds maximum of {}", size, max_size),
            ));
        }
        let bytes = self.read_payload(cursor, size)?;
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    fn read_u8(&self, cursor: &mut usize) -> Result<u8> {
        let byte = self.read_payload(cursor, 1)?[0];
        Ok(byte)
    }

    fn read_payload(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
        let bytes = read_slice(self.buffer, *cursor, len)?;
        *cursor += len;
        Ok(bytes)
    }
}
