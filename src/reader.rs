//! Database Reader API
//!
//! `Reader` composes the pieces of the format: metadata is parsed once at
//! open time, every lookup walks the search tree and decodes the record it
//! lands on, and `networks()` enumerates the whole tree.
//!
//! A `Reader` holds only immutable state, so it is `Send + Sync` and can be
//! shared between threads (for example behind an `Arc`) without locking.

use crate::byte_source::ByteSource;
use crate::data_section::{DecodeLimits, Decoder, PathElement, Value};
use crate::error::{MmdbError, Result};
use crate::geo::GeoSummary;
use crate::mmdb::{
    IpVersion, Metadata, Network, Networks, RecordSize, SearchTree, TreeHeader, TrieResult,
    SUPPORTED_MAJOR_VERSION,
};
use log::{debug, trace};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

/// Result of looking up one address
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    /// Decoded record, or `None` when the address has no record
    pub data: Option<Value>,
    /// Number of address bits the tree consumed before terminating.
    ///
    /// For IPv4 addresses looked up in an IPv6 database this is relative to
    /// the 32-bit address.
    pub prefix_len: u8,
    /// The network the answer applies to (`addr` masked to `prefix_len`).
    /// Every address in it gets the same answer, including "no record".
    pub network: Network,
}

impl LookupResult {
    /// True if a record was found
    pub fn is_found(&self) -> bool {
        self.data.is_some()
    }
}

/// Options for opening a database
///
/// ```no_run
/// use mmdb::ReaderOptions;
///
/// let reader = ReaderOptions::new()
///     .max_pointer_depth(32)
///     .open("GeoLite2-City.mmdb")?;
/// println!("{}", reader.metadata().database_type);
/// # Ok::<(), mmdb::MmdbError>(())
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderOptions {
    limits: DecodeLimits,
}

impl ReaderOptions {
    /// Options with the default decode limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of pointers followed while decoding one value.
    ///
    /// Exceeding it fails with `PointerCycleSuspected`. This is a guard
    /// against corrupt or hostile files, not a limit imposed by the format.
    pub fn max_pointer_depth(mut self, depth: usize) -> Self {
        self.limits.max_pointer_depth = depth;
        self
    }

    /// Maximum Map/Array nesting while decoding one value.
    ///
    /// Exceeding it fails with `MalformedValue`.
    pub fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.limits.max_nesting_depth = depth;
        self
    }

    /// The decode limits these options apply
    pub fn limits(&self) -> DecodeLimits {
        self.limits
    }

    /// Memory-map and open a database file
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Reader> {
        Reader::from_source(ByteSource::map_file(path)?, self)
    }

    /// Open a database image already held in memory
    pub fn from_bytes(self, bytes: Vec<u8>) -> Result<Reader> {
        Reader::from_source(ByteSource::Owned(bytes), self)
    }
}

/// An opened MaxMind DB
///
/// # Examples
///
/// ```no_run
/// use mmdb::Reader;
///
/// let reader = Reader::open("GeoLite2-Country.mmdb")?;
///
/// let result = reader.lookup("1.1.1.1")?;
/// if let Some(record) = &result.data {
///     println!("{} -> {:?}", result.network, record.get_path(["country", "iso_code"]));
/// }
/// # Ok::<(), mmdb::MmdbError>(())
/// ```
pub struct Reader {
    source: ByteSource,
    metadata: Metadata,
    header: TreeHeader,
    options: ReaderOptions,
}

impl Reader {
    /// Open a database file using memory mapping
    ///
    /// The mapping is released when the `Reader` is dropped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ReaderOptions::default().open(path)
    }

    /// Create a reader from raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        ReaderOptions::default().from_bytes(bytes)
    }

    /// Create a reader over any byte source.
    ///
    /// Fails fast: a database whose metadata or search tree geometry is
    /// invalid never yields a `Reader`.
    pub fn from_source(source: ByteSource, options: ReaderOptions) -> Result<Self> {
        let data = source.as_slice();
        let (metadata, marker_offset) = Metadata::parse_located(data, options.limits)?;

        if metadata.binary_format_major_version != SUPPORTED_MAJOR_VERSION {
            return Err(MmdbError::UnsupportedVersion {
                major: metadata.binary_format_major_version,
                minor: metadata.binary_format_minor_version,
            });
        }

        let header = TreeHeader::new(data, &metadata, marker_offset)?;

        debug!(
            "Opened {} database '{}' (format {}.{}): {} nodes, {}-bit records, {} byte data section",
            metadata.ip_version,
            metadata.database_type,
            metadata.binary_format_major_version,
            metadata.binary_format_minor_version,
            metadata.node_count,
            metadata.record_size.bits(),
            header.data_section_size
        );

        Ok(Self {
            source,
            metadata,
            header,
            options,
        })
    }

    /// Look up an IP address given as text
    pub fn lookup(&self, ip: &str) -> Result<LookupResult> {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| MmdbError::InvalidAddress(ip.to_string()))?;
        self.lookup_ip(addr)
    }

    /// Look up an IP address
    pub fn lookup_ip(&self, addr: IpAddr) -> Result<LookupResult> {
        let tree = SearchTree::new(self.source.as_slice(), &self.header);
        let found = tree.lookup(addr)?;

        let data = match found.result {
            TrieResult::NoData => None,
            TrieResult::DataOffset(offset) => {
                trace!("{} -> data offset {} (/{})", addr, offset, found.prefix_len);
                Some(self.decode_data(offset)?)
            }
        };

        let network = Network::new(addr, found.prefix_len).ok_or_else(|| {
            MmdbError::MalformedTree(format!("prefix length {} for {}", found.prefix_len, addr))
        })?;

        Ok(LookupResult {
            data,
            prefix_len: found.prefix_len,
            network,
        })
    }

    /// Look up an address and walk `path` into the record.
    ///
    /// Returns `Ok(None)` if the address has no record or the path does not
    /// resolve.
    pub fn lookup_path<'p, I, P>(&self, ip: &str, path: I) -> Result<Option<Value>>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathElement<'p>>,
    {
        let result = self.lookup(ip)?;
        Ok(result
            .data
            .as_ref()
            .and_then(|record| record.get_path(path))
            .cloned())
    }

    /// Look up an address and flatten the usual GeoIP2 fields
    pub fn lookup_summary(&self, ip: &str, language: &str) -> Result<Option<GeoSummary>> {
        let result = self.lookup(ip)?;
        Ok(result
            .data
            .as_ref()
            .map(|record| GeoSummary::from_record(record, language)))
    }

    /// Decode the value at an offset relative to the data section start
    pub fn decode_data(&self, offset: usize) -> Result<Value> {
        self.data_section().decode(offset)
    }

    /// Enumerate every network that has a record
    pub fn networks(&self) -> Networks<'_> {
        debug!(
            "Enumerating {} networks of '{}'",
            self.metadata.ip_version, self.metadata.database_type
        );
        Networks::new(self.source.as_slice(), &self.header, self.data_section())
    }

    fn data_section(&self) -> Decoder<'_> {
        let start = self.metadata.data_section_start();
        let section = &self.source.as_slice()[start..start + self.header.data_section_size];
        Decoder::with_limits(section, self.options.limits)
    }

    /// Parsed metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Options the reader was opened with
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// The underlying byte source
    pub fn source(&self) -> &ByteSource {
        &self.source
    }

    /// Database type, e.g. "GeoLite2-City"
    pub fn database_type(&self) -> &str {
        &self.metadata.database_type
    }

    /// Languages the database may contain localized data for
    pub fn languages(&self) -> &[String] {
        &self.metadata.languages
    }

    /// Description keyed by language
    pub fn description(&self) -> &BTreeMap<String, String> {
        &self.metadata.description
    }

    /// Address family of the search tree
    pub fn ip_version(&self) -> IpVersion {
        self.metadata.ip_version
    }

    /// Search tree record width
    pub fn record_size(&self) -> RecordSize {
        self.metadata.record_size
    }

    /// Number of search tree nodes
    pub fn node_count(&self) -> u32 {
        self.metadata.node_count
    }

    /// Build time in seconds since the Unix epoch
    pub fn build_epoch(&self) -> u64 {
        self.metadata.build_epoch
    }

    /// Binary format major version
    pub fn binary_format_major_version(&self) -> u16 {
        self.metadata.binary_format_major_version
    }

    /// Binary format minor version
    pub fn binary_format_minor_version(&self) -> u16 {
        self.metadata.binary_format_minor_version
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("database_type", &self.metadata.database_type)
            .field("ip_version", &self.metadata.ip_version)
            .field("node_count", &self.metadata.node_count)
            .field("source", &self.source)
            .finish()
    }
}
