#![no_main]
use libfuzzer_sys::fuzz_target;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fuzz_target!(|data: &[u8]| {
    // Opening and querying garbage must fail cleanly, never panic
    let Ok(reader) = mmdb::Reader::from_bytes(data.to_vec()) else {
        return;
    };

    let probes = [
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
        IpAddr::V4(Ipv4Addr::BROADCAST),
        IpAddr::V6(Ipv6Addr::LOCALHOST),
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
    ];
    for ip in probes {
        let _ = reader.lookup_ip(ip);
    }

    // Bounded so cyclic trees cannot stall the fuzzer
    for entry in reader.networks().take(256) {
        if entry.is_err() {
            break;
        }
    }
});
