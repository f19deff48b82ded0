//! mmdb - Reader for MaxMind DB Files
//!
//! A read-only reader for the MaxMind DB (MMDB) binary format: a
//! memory-mappable database mapping IP network prefixes to structured data
//! such as geolocation or ASN records.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mmdb::Reader;
//!
//! let reader = Reader::open("GeoLite2-City.mmdb")?;
//!
//! let result = reader.lookup("81.2.69.142")?;
//! if let Some(record) = &result.data {
//!     let city = record.get_path(["city", "names", "en"]).and_then(|v| v.as_str());
//!     println!("{} is in {:?}", result.network, city);
//! }
//!
//! // Flattened view of the common GeoIP2 fields
//! if let Some(summary) = reader.lookup_summary("81.2.69.142", "en")? {
//!     println!("{:?}, {:?}", summary.country, summary.postcode);
//! }
//!
//! // Every network in the database
//! for entry in reader.networks() {
//!     let (network, record) = entry?;
//!     println!("{network}: {}", record.type_name());
//! }
//! # Ok::<(), mmdb::MmdbError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  MMDB File Layout                    │
//! ├──────────────────────────────────────┤
//! │  1. Search Tree (binary trie)        │
//! │  2. 16 zero bytes                    │
//! │  3. Data Section (pointer-based)     │
//! │  4. "\xAB\xCD\xEFMaxMind.com"        │
//! │  5. Metadata (one encoded map)       │
//! └──────────────────────────────────────┘
//!          ↓ mmap() or read into memory
//! ┌──────────────────────────────────────┐
//! │  Reader: immutable, Send + Sync      │
//! └──────────────────────────────────────┘
//! ```
//!
//! All input is treated as untrusted: every read is bounds checked and
//! pointer chains are bounded by [`ReaderOptions::max_pointer_depth`].

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Immutable byte sources (owned or memory-mapped)
pub mod byte_source;
/// Data section value decoding
pub mod data_section;
/// Error types
pub mod error;
/// Flat view of GeoIP2 records
pub mod geo;
/// MMDB layout: metadata, search tree, enumeration
pub mod mmdb;
/// Database reader API
pub mod reader;

// Re-exports for Rust consumers

pub use crate::byte_source::ByteSource;
pub use crate::data_section::{DecodeLimits, Decoder, PathElement, Value};
pub use crate::error::{MmdbError, Result};
pub use crate::geo::{GeoSummary, DEFAULT_LANGUAGE};
pub use crate::mmdb::{IpVersion, Metadata, Network, Networks, RecordSize};
pub use crate::reader::{LookupResult, Reader, ReaderOptions};

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
