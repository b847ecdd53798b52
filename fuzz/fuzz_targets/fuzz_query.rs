#![no_main]
//! Fuzz target for window manager query replies
//!
//! Feeds random property contents to the reply parser and the query decoder.
//! Neither may panic, and a decoded query must survive re-encoding.

use libfuzzer_sys::fuzz_target;

use wmprobe::protocol::{parse_reply, ManagerQuery};

fuzz_target!(|data: &[u8]| {
    let query = ManagerQuery::new('C', "theme");
    let _ = parse_reply(&query, data);

    if let Some(decoded) = ManagerQuery::decode(data) {
        assert_eq!(decoded.encode(), data);
        let answer = decoded.answer("x");
        assert_eq!(parse_reply(&decoded, &answer).ok().as_deref(), Some("x"));
    }
});
