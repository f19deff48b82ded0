// Fixture writer for integration tests
//
// Encodes values in the MMDB data format and lays out a search tree with
// 24, 28 or 32-bit records, so tests can build small databases in memory.
// IPv4 networks in IPv6 fixtures are placed under ::/96.

#![allow(dead_code)]

use mmdb::{IpVersion, Network, RecordSize, Value};
use std::collections::BTreeMap;
use std::net::IpAddr;

pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

// ---------------------------------------------------------------------------
// Value encoding
// ---------------------------------------------------------------------------

/// Append a control byte (plus extended type and size bytes)
pub fn encode_ctrl(out: &mut Vec<u8>, type_id: u8, size: usize) {
    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 285 {
        (29, vec![(size - 29) as u8])
    } else if size < 65_821 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        (31, ((size - 65_821) as u32).to_be_bytes()[1..].to_vec())
    };

    if type_id <= 7 {
        out.push((type_id << 5) | size_bits);
    } else {
        out.push(size_bits);
        out.push(type_id - 7);
    }
    out.extend_from_slice(&extra);
}

fn minimal_be(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// Append the encoding of `value`
pub fn encode_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Pointer(offset) => encode_pointer(out, *offset as usize),
        Value::String(s) => {
            encode_ctrl(out, 2, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Double(d) => {
            encode_ctrl(out, 3, 8);
            out.extend_from_slice(&d.to_be_bytes());
        }
        Value::Bytes(b) => {
            encode_ctrl(out, 4, b.len());
            out.extend_from_slice(b);
        }
        Value::Uint16(n) => encode_uint(out, 5, &n.to_be_bytes()),
        Value::Uint32(n) => encode_uint(out, 6, &n.to_be_bytes()),
        Value::Map(map) => {
            encode_ctrl(out, 7, map.len());
            for (key, value) in map {
                encode_value(out, &Value::String(key.clone()));
                encode_value(out, value);
            }
        }
        Value::Int32(n) => {
            if *n < 0 {
                encode_ctrl(out, 8, 4);
                out.extend_from_slice(&n.to_be_bytes());
            } else {
                encode_uint(out, 8, &n.to_be_bytes());
            }
        }
        Value::Uint64(n) => encode_uint(out, 9, &n.to_be_bytes()),
        Value::Uint128(n) => encode_uint(out, 10, &n.to_be_bytes()),
        Value::Array(items) => {
            encode_ctrl(out, 11, items.len());
            for item in items {
                encode_value(out, item);
            }
        }
        Value::Boolean(b) => encode_ctrl(out, 14, usize::from(*b)),
        Value::Float(f) => {
            encode_ctrl(out, 15, 4);
            out.extend_from_slice(&f.to_be_bytes());
        }
    }
}

fn encode_uint(out: &mut Vec<u8>, type_id: u8, be: &[u8]) {
    let payload = minimal_be(be);
    encode_ctrl(out, type_id, payload.len());
    out.extend_from_slice(payload);
}

/// Append a pointer using the smallest size class that fits `target`
pub fn encode_pointer(out: &mut Vec<u8>, target: usize) {
    if target < 2048 {
        out.push(0x20 | ((target >> 8) & 0x7) as u8);
        out.push(target as u8);
    } else if target < 526_336 {
        let v = target - 2048;
        out.push(0x28 | ((v >> 16) & 0x7) as u8);
        out.extend_from_slice(&(v as u16).to_be_bytes());
    } else if target < 134_744_064 {
        let v = target - 526_336;
        out.push(0x30 | ((v >> 24) & 0x7) as u8);
        out.extend_from_slice(&(v as u32).to_be_bytes()[1..]);
    } else {
        out.push(0x38);
        out.extend_from_slice(&(target as u32).to_be_bytes());
    }
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_value(&mut out, value);
    out
}

// ---------------------------------------------------------------------------
// Value construction helpers
// ---------------------------------------------------------------------------

pub fn s(text: &str) -> Value {
    Value::String(text.to_string())
}

pub fn map<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

/// A GeoIP2-City shaped record
pub fn city_record(city: &str, country: &str, iso_code: &str, lat: f64, lon: f64) -> Value {
    map([
        ("city", map([("names", map([("en", s(city))]))])),
        (
            "country",
            map([
                ("iso_code", s(iso_code)),
                ("names", map([("en", s(country))])),
            ]),
        ),
        ("continent", map([("names", map([("en", s("Europe"))]))])),
        (
            "location",
            map([("latitude", Value::Double(lat)), ("longitude", Value::Double(lon))]),
        ),
        ("postal", map([("code", s("10115"))])),
    ])
}

// ---------------------------------------------------------------------------
// Search tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Node(u32),
    Data(u32),
    Empty,
}

/// Arena trie writer. Root is node 0.
struct TreeWriter {
    bit_count: u8,
    nodes: Vec<[Slot; 2]>,
}

impl TreeWriter {
    fn new(ip_version: IpVersion) -> Self {
        Self {
            bit_count: ip_version.bit_count(),
            nodes: vec![[Slot::Empty, Slot::Empty]],
        }
    }

    /// Insert `key` (left-aligned in `bit_count` bits) down to `prefix_len`.
    ///
    /// Inserting a longer prefix through an existing data slot splits it, so
    /// inserting shortest prefixes first gives longest-prefix-match results.
    fn insert(&mut self, key: u128, prefix_len: u8, data_offset: u32) {
        assert!(prefix_len >= 1, "fixtures need at least one tree level");
        let mut node = 0usize;
        for depth in 0..prefix_len {
            let bit = ((key >> (self.bit_count - 1 - depth)) & 1) as usize;
            if depth + 1 == prefix_len {
                self.nodes[node][bit] = Slot::Data(data_offset);
                return;
            }
            node = match self.nodes[node][bit] {
                Slot::Node(id) => id as usize,
                inherited => {
                    let id = self.nodes.len();
                    self.nodes.push([inherited, inherited]);
                    self.nodes[node][bit] = Slot::Node(id as u32);
                    id
                }
            };
        }
    }

    fn record_value(slot: Slot, node_count: u32) -> u32 {
        match slot {
            Slot::Node(id) => id,
            Slot::Data(offset) => node_count + 16 + offset,
            Slot::Empty => node_count,
        }
    }

    fn write(&self, record_size: RecordSize, override_record: Option<(usize, usize, u32)>) -> Vec<u8> {
        let node_count = self.nodes.len() as u32;
        let mut out = Vec::with_capacity(self.nodes.len() * record_size.node_bytes());
        for (id, node) in self.nodes.iter().enumerate() {
            let mut left = Self::record_value(node[0], node_count);
            let mut right = Self::record_value(node[1], node_count);
            if let Some((n, side, value)) = override_record {
                if n == id {
                    if side == 0 {
                        left = value;
                    } else {
                        right = value;
                    }
                }
            }
            write_node(&mut out, record_size, left, right);
        }
        out
    }
}

/// Append one node in the given record layout
pub fn write_node(out: &mut Vec<u8>, record_size: RecordSize, left: u32, right: u32) {
    match record_size {
        RecordSize::Bits24 => {
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        RecordSize::Bits28 => {
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.push((((left >> 24) & 0x0F) as u8) << 4 | ((right >> 24) & 0x0F) as u8);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        RecordSize::Bits32 => {
            out.extend_from_slice(&left.to_be_bytes());
            out.extend_from_slice(&right.to_be_bytes());
        }
    }
}

fn network_key(network: &Network, ip_version: IpVersion) -> (u128, u8) {
    match (network.addr(), ip_version) {
        (IpAddr::V4(v4), IpVersion::V4) => (u32::from(v4) as u128, network.prefix_len()),
        (IpAddr::V4(v4), IpVersion::V6) => (u32::from(v4) as u128, network.prefix_len() + 96),
        (IpAddr::V6(v6), IpVersion::V6) => (u128::from(v6), network.prefix_len()),
        (IpAddr::V6(_), IpVersion::V4) => panic!("IPv6 network in IPv4 fixture"),
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Builds a complete database image
pub struct FixtureBuilder {
    ip_version: IpVersion,
    record_size: RecordSize,
    entries: Vec<(Network, Value)>,
    metadata: BTreeMap<String, Value>,
    raw_data: Option<(Vec<u8>, Vec<(Network, u32)>)>,
    override_record: Option<(usize, usize, u32)>,
    trailing_marker_in_data: bool,
}

impl FixtureBuilder {
    pub fn new(ip_version: IpVersion, record_size: RecordSize) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("binary_format_major_version".to_string(), Value::Uint16(2));
        metadata.insert("binary_format_minor_version".to_string(), Value::Uint16(0));
        metadata.insert("build_epoch".to_string(), Value::Uint64(1_700_000_000));
        metadata.insert("database_type".to_string(), s("Test-City"));
        metadata.insert(
            "languages".to_string(),
            Value::Array(vec![s("en"), s("de")]),
        );
        metadata.insert(
            "description".to_string(),
            map([("en", s("Test database")), ("de", s("Testdatenbank"))]),
        );
        metadata.insert(
            "ip_version".to_string(),
            Value::Uint16(ip_version.as_number()),
        );
        metadata.insert(
            "record_size".to_string(),
            Value::Uint16(record_size.bits()),
        );

        Self {
            ip_version,
            record_size,
            entries: Vec::new(),
            metadata,
            raw_data: None,
            override_record: None,
            trailing_marker_in_data: false,
        }
    }

    /// Add a network with its record
    pub fn insert(mut self, cidr: &str, value: Value) -> Self {
        let network: Network = cidr.parse().expect("valid CIDR in fixture");
        self.entries.push((network, value));
        self
    }

    /// Replace or add a metadata entry
    pub fn metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Remove a metadata entry
    pub fn without_metadata(mut self, key: &str) -> Self {
        self.metadata.remove(key);
        self
    }

    /// Use a hand-written data section; `records` point at offsets in it
    pub fn raw_data(mut self, data: Vec<u8>, records: &[(&str, u32)]) -> Self {
        let records = records
            .iter()
            .map(|(cidr, offset)| (cidr.parse().expect("valid CIDR in fixture"), *offset))
            .collect();
        self.raw_data = Some((data, records));
        self
    }

    /// Overwrite one record of the serialized tree
    pub fn override_record(mut self, node: usize, side: usize, value: u32) -> Self {
        self.override_record = Some((node, side, value));
        self
    }

    /// Put a copy of the metadata marker inside the data section
    pub fn decoy_marker(mut self) -> Self {
        self.trailing_marker_in_data = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut tree = TreeWriter::new(self.ip_version);

        let (mut data, records) = match self.raw_data {
            Some(raw) => raw,
            None => {
                let mut data = Vec::new();
                let mut records = Vec::new();
                for (network, value) in &self.entries {
                    records.push((*network, data.len() as u32));
                    encode_value(&mut data, value);
                }
                (data, records)
            }
        };
        if self.trailing_marker_in_data {
            encode_value(&mut data, &Value::Bytes(METADATA_MARKER.to_vec()));
        }

        // Shortest prefixes first so longer ones split them
        let mut keyed: Vec<(u128, u8, u32)> = records
            .iter()
            .map(|(network, offset)| {
                let (key, len) = network_key(network, self.ip_version);
                (key, len, *offset)
            })
            .collect();
        keyed.sort_by_key(|(_, len, _)| *len);
        for (key, len, offset) in keyed {
            tree.insert(key, len, offset);
        }

        let mut metadata = self.metadata;
        metadata
            .entry("node_count".to_string())
            .or_insert(Value::Uint32(tree.nodes.len() as u32));

        let mut db = tree.write(self.record_size, self.override_record);
        db.extend_from_slice(&[0u8; 16]);
        db.extend_from_slice(&data);
        db.extend_from_slice(METADATA_MARKER);
        encode_value(&mut db, &Value::Map(metadata));
        db
    }
}

/// The reference database most tests use (IPv6, 28-bit records)
pub fn sample_database() -> Vec<u8> {
    FixtureBuilder::new(IpVersion::V6, RecordSize::Bits28)
        .insert("1.0.0.0/8", city_record("Sydney", "Australia", "AU", -33.86, 151.2))
        .insert("1.2.3.0/24", city_record("Berlin", "Germany", "DE", 52.52, 13.405))
        .insert("81.2.69.0/24", city_record("London", "United Kingdom", "GB", 51.5, -0.09))
        .insert("2001:db8::/32", map([("asn", Value::Uint32(64512))]))
        .build()
}
