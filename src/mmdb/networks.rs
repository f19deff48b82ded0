//! Full-database enumeration
//!
//! Depth-first walk over every path from the root to a data record,
//! reconstructing the CIDR network each path spells out. The walk keeps an
//! explicit stack of at most one pending sibling per tree level, so memory
//! use is bounded by the address width no matter how large the tree is.

use super::tree::{SearchTree, TreeHeader, TrieResult};
use super::types::IpVersion;
use crate::data_section::{Decoder, Value};
use crate::error::{MmdbError, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// A CIDR network: address with host bits cleared, plus prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Network {
    addr: IpAddr,
    prefix_len: u8,
}

impl Network {
    /// Create a network, clearing any host bits of `addr`.
    ///
    /// Returns `None` if `prefix_len` exceeds the address width.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Option<Self> {
        let addr = match addr {
            IpAddr::V4(v4) => {
                if prefix_len > 32 {
                    return None;
                }
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix_len)))
            }
            IpAddr::V6(v6) => {
                if prefix_len > 128 {
                    return None;
                }
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix_len)))
            }
        };
        Some(Self { addr, prefix_len })
    }

    /// First address of the network
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length in bits
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// True if `ip` is inside this network (same family only)
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                u32::from(ip) & v4_mask(self.prefix_len) == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                u128::from(ip) & v6_mask(self.prefix_len) == u128::from(net)
            }
            _ => false,
        }
    }

    fn from_key(key: u128, prefix_len: u8, ip_version: IpVersion) -> Self {
        let addr = match ip_version {
            IpVersion::V4 => IpAddr::V4(Ipv4Addr::from(key as u32)),
            IpVersion::V6 => IpAddr::V6(Ipv6Addr::from(key)),
        };
        Self { addr, prefix_len }
    }
}

fn v4_mask(prefix_len: u8) -> u32 {
    u32::MAX.checked_shl(32 - prefix_len as u32).unwrap_or(0)
}

fn v6_mask(prefix_len: u8) -> u128 {
    u128::MAX.checked_shl(128 - prefix_len as u32).unwrap_or(0)
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for Network {
    type Err = MmdbError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (s, None),
        };
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| MmdbError::InvalidAddress(s.to_string()))?;
        let prefix_len = match len {
            Some(len) => len
                .parse::<u8>()
                .map_err(|_| MmdbError::InvalidAddress(s.to_string()))?,
            None if addr.is_ipv4() => 32,
            None => 128,
        };
        Network::new(addr, prefix_len).ok_or_else(|| MmdbError::InvalidAddress(s.to_string()))
    }
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Pending subtree of the walk
#[derive(Debug, Clone, Copy)]
struct Frame {
    record: u32,
    key: u128,
    depth: u8,
}

/// Lazy iterator over every (network, record) pair in a database
///
/// Created by [`crate::Reader::networks`]. Networks come out in ascending
/// address order. Each call to `networks()` starts a fresh walk; dropping the
/// iterator early has no side effects. A decode or tree error is yielded once
/// as `Err` and ends the iteration.
pub struct Networks<'a> {
    data: &'a [u8],
    header: &'a TreeHeader,
    decoder: Decoder<'a>,
    stack: Vec<Frame>,
    failed: bool,
}

impl<'a> Networks<'a> {
    /// `decoder` must be bound to the data section of the same database.
    pub(crate) fn new(data: &'a [u8], header: &'a TreeHeader, decoder: Decoder<'a>) -> Self {
        let mut stack = Vec::with_capacity(header.bit_count() as usize + 1);
        stack.push(Frame {
            record: 0,
            key: 0,
            depth: 0,
        });
        Self {
            data,
            header,
            decoder,
            stack,
            failed: false,
        }
    }

    fn step(&mut self) -> Result<Option<(Network, Value)>> {
        let tree = SearchTree::new(self.data, self.header);
        let bit_count = self.header.bit_count();

        while let Some(frame) = self.stack.pop() {
            if frame.record >= self.header.node_count {
                match tree.resolve_terminal(frame.record)? {
                    TrieResult::NoData => continue,
                    TrieResult::DataOffset(offset) => {
                        let value = self.decoder.decode(offset)?;
                        let network =
                            Network::from_key(frame.key, frame.depth, self.header.ip_version);
                        return Ok(Some((network, value)));
                    }
                }
            }

            if frame.depth >= bit_count {
                return Err(MmdbError::MalformedTree(format!(
                    "address bits exhausted at node {} (depth {})",
                    frame.record, frame.depth
                )));
            }

            let (left, right) = tree.read_node(frame.record)?;
            let depth = frame.depth + 1;
            let right_key = frame.key | (1u128 << (bit_count - depth));

            // Right first so the left (lower) half is visited first
            self.stack.push(Frame {
                record: right,
                key: right_key,
                depth,
            });
            self.stack.push(Frame {
                record: left,
                key: frame.key,
                depth,
            });
        }

        Ok(None)
    }
}

impl Iterator for Networks<'_> {
    type Item = Result<(Network, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                self.stack.clear();
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Networks<'_> {}
