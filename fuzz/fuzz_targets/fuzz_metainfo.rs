#![no_main]
use libfuzzer_sys::fuzz_target;
use spindrift::Metainfo;

fuzz_target!(|data: &[u8]| {
    // parse must never panic on arbitrary input
    let _ = Metainfo::parse(data);
});
