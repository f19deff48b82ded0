//! MaxMind DB (MMDB) Reader
//!
//! This module provides functionality for reading MaxMind DB files,
//! which are used for GeoIP lookups and other IP-based data lookups.
//!
//! The MMDB format uses a binary search tree for efficient IP address
//! lookups. Data is stored in the MMDB data section format, decoded by
//! `crate::data_section::Decoder`.
//!
//! ## Architecture
//!
//! - **types**: MMDB-specific types and constants
//! - **format**: Metadata location and parsing
//! - **tree**: Search tree traversal for IP lookups
//! - **networks**: Full-tree enumeration

pub mod format;
pub mod networks;
pub mod tree;
pub mod types;

// Re-export key types
pub use format::{find_metadata_marker, Metadata};
pub use networks::{Network, Networks};
pub use tree::{SearchTree, TreeHeader, TreeLookup, TrieResult};
pub use types::{IpVersion, RecordSize, METADATA_MARKER, SUPPORTED_MAJOR_VERSION};
