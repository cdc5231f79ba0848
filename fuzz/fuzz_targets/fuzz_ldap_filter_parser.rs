#![no_main]

use libfuzzer_sys::fuzz_target;
use ldapmux::ldap::parse_ldap_filter;

fuzz_target!(|data: &[u8]| {
    // Convert bytes to string - if it's not valid UTF-8, that's fine
    if let Ok(filter_str) = std::str::from_utf8(data) {
        // The parser should never panic, regardless of input
        if let Ok(filter) = parse_ldap_filter(filter_str) {
            let _ = filter.to_string();
        }
    }
});
