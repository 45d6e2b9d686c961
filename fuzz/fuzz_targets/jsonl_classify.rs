#![no_main]

use libfuzzer_sys::fuzz_target;
use sysspan::pipeline::classify_line;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Some(routed) = classify_line(input) {
            // Sanitized keys never escape the partition directory
            assert!(!routed.key.proc.contains('/'));
            assert!(!routed.key.operand.contains('/'));
            assert!(routed.key.proc != ".." && routed.key.operand != "..");
        }
    }
});
