#![no_main]
use libfuzzer_sys::fuzz_target;
use spindrift::bencode::{info_dict_bytes, Value};

fuzz_target!(|data: &[u8]| {
    // decode must never panic on arbitrary input, and a successful decode
    // must re-encode to the exact input (canonical form)
    if let Ok(value) = Value::decode(data) {
        assert_eq!(value.encode(), data);
    }
    let _ = info_dict_bytes(data);
});
