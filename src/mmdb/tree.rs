//! MMDB Search Tree Traversal
//!
//! Implements binary search tree traversal for IP address lookups.
//! The tree uses a compact binary representation where each node contains
//! two records (left and right) that point to either:
//! - Another node (continue traversal)
//! - A data section offset (found)
//! - A "not found" marker
//!
//! Nodes are never materialized; every record is read straight out of the
//! database buffer by node index.

use super::format::Metadata;
use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use crate::byte_source::read_slice;
use crate::error::{MmdbError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Bits of the IPv6 tree above the IPv4 subtree (::/96)
const IPV4_SUBTREE_DEPTH: u8 = 96;

/// Terminal outcome of a tree walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrieResult {
    /// The walk ended on the "no data" record
    NoData,
    /// Offset into the data section (relative to the data section start)
    DataOffset(usize),
}

/// Result of an IP lookup in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLookup {
    /// Where the walk ended
    pub result: TrieResult,
    /// Number of address bits consumed before the walk terminated,
    /// counted in the family of the address that was looked up
    pub prefix_len: u8,
}

/// Search tree geometry, derived from metadata once per database
#[derive(Debug, Clone, Copy)]
pub struct TreeHeader {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes
    pub tree_size: usize,
    /// Size of the data section in bytes
    pub data_section_size: usize,
    /// Record reached after walking 96 zero bits (IPv6 trees only)
    pub ipv4_start: u32,
    /// Number of zero bits actually walked to reach `ipv4_start`
    pub ipv4_start_depth: u8,
}

impl TreeHeader {
    /// Build the header for a database whose metadata marker sits at
    /// `marker_offset`, resolving the IPv4 subtree of IPv6 trees up front.
    pub fn new(data: &[u8], metadata: &Metadata, marker_offset: usize) -> Result<Self> {
        let tree_size = metadata.search_tree_size();
        let data_section_size = marker_offset
            .checked_sub(tree_size + DATA_SECTION_SEPARATOR_SIZE)
            .ok_or_else(|| {
                MmdbError::InvalidMetadata(format!(
                    "search tree of {} bytes overlaps metadata at offset {}",
                    tree_size, marker_offset
                ))
            })?;

        let mut header = TreeHeader {
            node_count: metadata.node_count,
            record_size: metadata.record_size,
            ip_version: metadata.ip_version,
            tree_size,
            data_section_size,
            ipv4_start: 0,
            ipv4_start_depth: 0,
        };

        if header.ip_version == IpVersion::V6 {
            let (node, depth) = SearchTree::new(data, &header).find_ipv4_start_node()?;
            header.ipv4_start = node;
            header.ipv4_start_depth = depth;
        }

        Ok(header)
    }

    /// Number of address bits the tree is keyed by
    pub fn bit_count(&self) -> u8 {
        self.ip_version.bit_count()
    }
}

/// Search tree for IP address lookups
pub struct SearchTree<'a> {
    /// The raw file data containing the tree
    data: &'a [u8],
    /// Parsed header information
    header: &'a TreeHeader,
}

impl<'a> SearchTree<'a> {
    /// Create a new search tree
    pub fn new(data: &'a [u8], header: &'a TreeHeader) -> Self {
        Self { data, header }
    }

    /// Look up an IP address
    pub fn lookup(&self, ip: IpAddr) -> Result<TreeLookup> {
        match ip {
            IpAddr::V4(addr) => self.lookup_v4(addr),
            IpAddr::V6(addr) => self.lookup_v6(addr),
        }
    }

    /// Look up an IPv4 address
    ///
    /// In an IPv6 tree the IPv4 space lives under ::/96, so the walk resumes
    /// from the node reached after 96 zero bits. The reported prefix length
    /// is relative to the 32-bit address.
    pub fn lookup_v4(&self, addr: Ipv4Addr) -> Result<TreeLookup> {
        let key = u32::from(addr) as u128;

        match self.header.ip_version {
            IpVersion::V4 => self.walk(key, 32, 0, 0),
            IpVersion::V6 => {
                let found = self.walk(
                    key,
                    128,
                    self.header.ipv4_start,
                    self.header.ipv4_start_depth,
                )?;
                Ok(TreeLookup {
                    prefix_len: found.prefix_len.saturating_sub(IPV4_SUBTREE_DEPTH),
                    ..found
                })
            }
        }
    }

    /// Look up an IPv6 address
    pub fn lookup_v6(&self, addr: Ipv6Addr) -> Result<TreeLookup> {
        if self.header.ip_version == IpVersion::V4 {
            return Err(MmdbError::AddressFamilyMismatch(addr.to_string()));
        }
        self.walk(u128::from(addr), 128, 0, 0)
    }

    /// Walk `key` (the low `bit_count` bits, most significant first) starting
    /// at `node` with `depth` bits already consumed.
    pub fn walk(&self, key: u128, bit_count: u8, mut node: u32, mut depth: u8) -> Result<TreeLookup> {
        let node_count = self.header.node_count;

        while depth < bit_count && node < node_count {
            let bit = ((key >> (bit_count - 1 - depth)) & 1) as u8;
            node = self.read_record(node, bit)?;
            depth += 1;
        }

        if node < node_count {
            return Err(MmdbError::MalformedTree(format!(
                "address bits exhausted at node {} (depth {})",
                node, depth
            )));
        }

        Ok(TreeLookup {
            result: self.resolve_terminal(node)?,
            prefix_len: depth,
        })
    }

    /// Classify a record value that is not a node index
    pub fn resolve_terminal(&self, record: u32) -> Result<TrieResult> {
        if record == self.header.node_count {
            Ok(TrieResult::NoData)
        } else {
            self.calculate_data_offset(record).map(TrieResult::DataOffset)
        }
    }

    /// Read both records of a node
    pub fn read_node(&self, node: u32) -> Result<(u32, u32)> {
        Ok((self.read_record(node, 0)?, self.read_record(node, 1)?))
    }

    /// Read a record from a node
    ///
    /// Each node contains two records. `side` determines which:
    /// - 0 = left record (for IP bit 0)
    /// - 1 = right record (for IP bit 1)
    pub fn read_record(&self, node: u32, side: u8) -> Result<u32> {
        if node >= self.header.node_count {
            return Err(MmdbError::MalformedTree(format!(
                "Node index {} exceeds node count {}",
                node, self.header.node_count
            )));
        }

        let node_bytes = self.header.record_size.node_bytes();
        let tree = read_slice(self.data, 0, self.header.tree_size)?;
        let b = read_slice(tree, node as usize * node_bytes, node_bytes)?;

        let record = match (self.header.record_size, side) {
            // 24-bit: [left 3 bytes][right 3 bytes]
            (RecordSize::Bits24, 0) => u32::from_be_bytes([0, b[0], b[1], b[2]]),
            (RecordSize::Bits24, _) => u32::from_be_bytes([0, b[3], b[4], b[5]]),
            // 28-bit: [left 24 bits][left high nibble | right high nibble][right 24 bits]
            (RecordSize::Bits28, 0) => {
                (((b[3] >> 4) as u32) << 24) | u32::from_be_bytes([0, b[0], b[1], b[2]])
            }
            (RecordSize::Bits28, _) => {
                (((b[3] & 0x0F) as u32) << 24) | u32::from_be_bytes([0, b[4], b[5], b[6]])
            }
            // 32-bit: [left 4 bytes][right 4 bytes]
            (RecordSize::Bits32, 0) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            (RecordSize::Bits32, _) => u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
        };
        Ok(record)
    }

    /// Calculate data section offset from record value
    ///
    /// Record value > node_count means it points to data:
    /// data_offset = (record_value - node_count) - 16
    fn calculate_data_offset(&self, record: u32) -> Result<usize> {
        let offset = record
            .checked_sub(self.header.node_count)
            .and_then(|r| r.checked_sub(DATA_SECTION_SEPARATOR_SIZE as u32))
            .ok_or_else(|| {
                MmdbError::MalformedTree(format!(
                    "Record {} points into the data section separator (node_count = {})",
                    record, self.header.node_count
                ))
            })? as usize;

        if offset >= self.header.data_section_size {
            return Err(MmdbError::MalformedTree(format!(
                "Record {} resolves to data offset {} beyond data section of {} bytes",
                record, offset, self.header.data_section_size
            )));
        }

        Ok(offset)
    }

    /// Find the IPv4 start node in an IPv6 tree
    ///
    /// Walks up to 96 zero bits (left records). Returns the record reached and
    /// the number of bits walked; the walk stops early at a terminal record.
    fn find_ipv4_start_node(&self) -> Result<(u32, u8)> {
        let mut node = 0u32;
        let mut depth = 0u8;

        while depth < IPV4_SUBTREE_DEPTH && node < self.header.node_count {
            node = self.read_record(node, 0)?;
            depth += 1;
        }

        Ok((node, depth))
    }
}
