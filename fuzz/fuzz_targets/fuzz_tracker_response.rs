#![no_main]
use libfuzzer_sys::fuzz_target;
use spindrift::tracker::parse_announce_response;

fuzz_target!(|data: &[u8]| {
    // announce bodies come off the network; parsing must never panic
    let _ = parse_announce_response(data);
});
