//! Fuzz target: completion parsers and the URC scanner
//!
//! Feeds arbitrary receive pages to every matcher and asserts that none
//! panics and that a terminal outcome never claims more bytes than the
//! page holds.
//!
//! cargo fuzz run fuzz_parsers

#![no_main]

use libfuzzer_sys::fuzz_target;
use ltem::diagnostics::DiagnosticsRecord;
use ltem::parser::{CompletionParser, DefaultMatcher, Parser, ServiceMatcher, TokenMatcher};
use ltem::urc;

const MATCHERS: [Parser; 6] = [
    Parser::Default(DefaultMatcher::OK),
    Parser::Default(DefaultMatcher::terminated_by("> ")),
    Parser::Default(DefaultMatcher::with_preamble("CONNECT ", true, 1).terminator("\r\n")),
    Parser::Tokens(TokenMatcher::new("+QISEND: ", 3)),
    Parser::Service(ServiceMatcher::new("+QIOPEN: ", 1)),
    Parser::Service(ServiceMatcher::new("+QSSLOPEN: ", 1)),
];

fuzz_target!(|data: &[u8]| {
    for parser in &MATCHERS {
        let outcome = parser.parse(data);
        if outcome.code.is_pending() {
            assert_eq!(outcome.consumed, 0, "pending outcomes consume nothing");
        } else {
            assert!(outcome.consumed <= data.len(), "consumed past the page end");
        }
    }

    // Every URC match lies inside the page and scanning always advances.
    let mut from = 0;
    while let Some(m) = urc::scan(data, from) {
        assert!(m.start >= from && m.start < m.end && m.end <= data.len());
        from = m.end;
    }

    // Diagnostics capture of arbitrary bytes always fits its encoding bound.
    let command = core::str::from_utf8(data).unwrap_or("AT");
    let record = DiagnosticsRecord::capture(command, data, ltem::ResultCode::TIMEOUT, 0);
    let mut buf = [0u8; ltem::diagnostics::DIAG_ENCODED_MAX];
    let encoded = record.encode(&mut buf).expect("record fits its bound");
    assert_eq!(DiagnosticsRecord::decode(encoded).expect("round trip"), record);
});
