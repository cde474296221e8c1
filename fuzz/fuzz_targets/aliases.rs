#![no_main]

use libfuzzer_sys::fuzz_target;
use postrider_aliases::parser;

fuzz_target!(|data: &[u8]| {
    let content = String::from_utf8_lossy(data);
    let _ = parser::parse_file("domain", &content);
    let _ = parser::parse_targets("domain", &content);
});
