#![no_main]

use libfuzzer_sys::fuzz_target;
use sqltrace_core::analyze;

fuzz_target!(|data: &[u8]| {
    if let Ok(sql) = std::str::from_utf8(data) {
        let _ = analyze(sql);
    }
});
