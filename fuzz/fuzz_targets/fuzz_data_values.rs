#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decode from a handful of offsets in an arbitrary data section
    let decoder = mmdb::Decoder::new(data);
    for offset in 0..data.len().min(16) {
        if let Ok((value, next)) = decoder.decode_at(offset) {
            assert!(next > offset && next <= data.len());
            let _ = value.type_name();
        }
    }
});
