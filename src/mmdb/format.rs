//! MMDB Binary Format Parsing
//!
//! Locates and validates the metadata block at the end of a database image.
//!
//! Design:
//! - Find the metadata marker with a reverse substring search (last occurrence wins)
//! - Decode the map that follows the marker with the regular data decoder
//! - Validate the fields the search tree depends on before anything reads the tree

use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
use crate::data_section::{DecodeLimits, Decoder, Value};
use crate::error::{MmdbError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Database metadata
///
/// Parsed once when a database is opened and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    /// Major version of the binary format (2 for every current database)
    pub binary_format_major_version: u16,
    /// Minor version of the binary format
    pub binary_format_minor_version: u16,
    /// Build time in seconds since the Unix epoch
    pub build_epoch: u64,
    /// Free-form database type, e.g. "GeoLite2-City"
    pub database_type: String,
    /// Locale codes for which the database may contain localized data,
    /// in the order the file lists them
    pub languages: Vec<String>,
    /// Description keyed by language code
    pub description: BTreeMap<String, String>,
    /// Address family the search tree is keyed by
    pub ip_version: IpVersion,
    /// Width of each search tree record
    pub record_size: RecordSize,
    /// Number of nodes in the search tree
    pub node_count: u32,
}

impl Metadata {
    /// Locate and parse the metadata block of a database image
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_located(data, DecodeLimits::default()).map(|(metadata, _)| metadata)
    }

    /// Parse metadata, returning it together with the marker offset
    pub(crate) fn parse_located(data: &[u8], limits: DecodeLimits) -> Result<(Self, usize)> {
        let marker_offset = find_metadata_marker(data)?;

        // Metadata pointers are relative to the first byte after the marker
        let metadata_bytes = &data[marker_offset + METADATA_MARKER.len()..];
        let decoder = Decoder::with_limits(metadata_bytes, limits);
        let value = decoder
            .decode(0)
            .map_err(|e| MmdbError::InvalidMetadata(format!("Failed to decode metadata: {}", e)))?;

        let metadata = Self::from_value(&value)?;

        let tree_end = metadata
            .search_tree_size()
            .checked_add(DATA_SECTION_SEPARATOR_SIZE)
            .filter(|&end| end <= marker_offset)
            .ok_or_else(|| {
                MmdbError::InvalidMetadata(format!(
                    "search tree of {} nodes ({} bytes) does not fit before metadata at offset {}",
                    metadata.node_count,
                    metadata.search_tree_size(),
                    marker_offset
                ))
            })?;
        debug_assert_eq!(tree_end, metadata.data_section_start());

        Ok((metadata, marker_offset))
    }

    /// Build metadata from an already decoded map
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_map()
            .ok_or_else(|| MmdbError::InvalidMetadata("Metadata is not a map".to_string()))?;

        let node_count = extract_uint(map, "node_count", u32::MAX as u64)? as u32;
        if node_count == 0 {
            return Err(MmdbError::InvalidMetadata(
                "node_count must be greater than zero".to_string(),
            ));
        }

        let record_size_bits = extract_uint(map, "record_size", u16::MAX as u64)?;
        let record_size = RecordSize::from_bits(record_size_bits).ok_or_else(|| {
            MmdbError::InvalidMetadata(format!("Invalid record size: {} bits", record_size_bits))
        })?;

        let ip_version_num = extract_uint(map, "ip_version", u16::MAX as u64)?;
        let ip_version = IpVersion::from_number(ip_version_num).ok_or_else(|| {
            MmdbError::InvalidMetadata(format!("Invalid IP version: {}", ip_version_num))
        })?;

        let database_type = match map.get("database_type") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(mistyped("database_type", "a string")),
            None => return Err(missing("database_type")),
        };

        let languages = match map.get("languages") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| mistyped("languages", "an array of strings"))
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(mistyped("languages", "an array of strings")),
        };

        let description = match map.get("description") {
            None => BTreeMap::new(),
            Some(Value::Map(entries)) => entries
                .iter()
                .map(|(lang, text)| {
                    text.as_str()
                        .map(|t| (lang.clone(), t.to_string()))
                        .ok_or_else(|| mistyped("description", "a map of strings"))
                })
                .collect::<Result<BTreeMap<_, _>>>()?,
            Some(_) => return Err(mistyped("description", "a map of strings")),
        };

        Ok(Metadata {
            binary_format_major_version: extract_uint(
                map,
                "binary_format_major_version",
                u16::MAX as u64,
            )? as u16,
            binary_format_minor_version: extract_uint(
                map,
                "binary_format_minor_version",
                u16::MAX as u64,
            )? as u16,
            build_epoch: extract_uint(map, "build_epoch", u64::MAX)?,
            database_type,
            languages,
            description,
            ip_version,
            record_size,
            node_count,
        })
    }

    /// Size of the search tree in bytes
    pub fn search_tree_size(&self) -> usize {
        self.node_count as usize * self.record_size.node_bytes()
    }

    /// Absolute offset of the first data section byte
    pub fn data_section_start(&self) -> usize {
        self.search_tree_size() + DATA_SECTION_SEPARATOR_SIZE
    }

    /// Description in the given language, if present
    pub fn description(&self, language: &str) -> Option<&str> {
        self.description.get(language).map(String::as_str)
    }
}

/// Find the metadata marker in an MMDB image (zero allocation)
///
/// The marker may also occur by coincidence inside earlier data, so this
/// returns the LAST occurrence. The metadata comes AFTER the marker.
pub fn find_metadata_marker(data: &[u8]) -> Result<usize> {
    memchr::memmem::rfind(data, METADATA_MARKER).ok_or(MmdbError::MetadataNotFound)
}

// Helper functions to extract values from metadata map

fn extract_uint(map: &BTreeMap<String, Value>, key: &str, max: u64) -> Result<u64> {
    let value = map.get(key).ok_or_else(|| missing(key))?;
    let n = value
        .as_u64()
        .ok_or_else(|| mistyped(key, "an unsigned integer"))?;
    if n > max {
        return Err(MmdbError::InvalidMetadata(format!(
            "Field '{}' value {} exceeds {}",
            key, n, max
        )));
    }
    Ok(n)
}

fn missing(key: &str) -> MmdbError {
    MmdbError::InvalidMetadata(format!("Required field '{}' not found", key))
}

fn mistyped(key: &str, expected: &str) -> MmdbError {
    MmdbError::InvalidMetadata(format!("Field '{}' is not {}", key, expected))
}
