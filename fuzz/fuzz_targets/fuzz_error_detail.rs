#![no_main]

use libfuzzer_sys::fuzz_target;
use quickpoll::api::extract_detail;

// Error bodies are server-controlled; pulling a message out of them must not panic.
fuzz_target!(|data: &[u8]| {
    if let Ok(body) = std::str::from_utf8(data) {
        if let Some(detail) = extract_detail(body) {
            assert!(!detail.is_empty());
        }
    }
});
