#![no_main]

use libfuzzer_sys::fuzz_target;
use sysspan::line_parser::{parse_line, CallArgs};
use sysspan::span_record::TraceKind;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Must not panic; typed args must be derivable for every kind
        if let Some(line) = parse_line(input) {
            for kind in TraceKind::ALL {
                let _ = CallArgs::from_line(kind, &line);
            }
        }
    }
});
