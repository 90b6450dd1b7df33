//! Unsolicited result codes.
//!
//! The modem interleaves URCs with command responses. The engine scans the
//! parse page for the few it acts on:
//!
//! ```text
//!   +QIURC: "recv",<ctx>       data waiting on a TCP/UDP socket
//!   +QSSLURC: "recv",<ctx>     data waiting on an SSL socket
//!   +QIURC: "closed",<ctx>     peer closed the socket
//!   +QIURC: "pdpdeact",<ctx>   network dropped the PDP context
//! ```

use crate::parser::{find_from, parse_decimal};

const QIURC: &[u8] = b"+QIURC: \"";
const QSSLURC: &[u8] = b"+QSSLURC: \"";

/// A URC the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urc {
    DataReceived(u8),
    Closed(u8),
    PdpDeactivated(u8),
}

/// A recognised URC and the page span it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrcMatch {
    pub urc: Urc,
    pub start: usize,
    /// Index just past the line's `\r\n`.
    pub end: usize,
}

/// Parse one complete URC line body (`"recv",1` etc, after the prefix quote).
fn parse_body(body: &[u8]) -> Option<Urc> {
    let (kind, rest): (fn(u8) -> Urc, &[u8]) = if let Some(rest) = body.strip_prefix(b"recv\",") {
        (Urc::DataReceived, rest)
    } else if let Some(rest) = body.strip_prefix(b"closed\",") {
        (Urc::Closed, rest)
    } else if let Some(rest) = body.strip_prefix(b"pdpdeact\",") {
        (Urc::PdpDeactivated, rest)
    } else {
        return None;
    };
    let (ctx, _) = parse_decimal(rest)?;
    u8::try_from(ctx).ok().map(kind)
}

/// First complete, recognised URC at or after `from`.
///
/// Incomplete lines are left for a later scan. Unrecognised `+QIURC`
/// kinds (`incoming`, `dnsgip`) are skipped over.
pub fn scan(page: &[u8], from: usize) -> Option<UrcMatch> {
    let mut cursor = from;
    loop {
        let qi = find_from(page, QIURC, cursor).map(|at| (at, QIURC.len()));
        let ssl = find_from(page, QSSLURC, cursor).map(|at| (at, QSSLURC.len()));
        let (start, prefix_len) = match (qi, ssl) {
            (Some(a), Some(b)) => {
                if a.0 <= b.0 {
                    a
                } else {
                    b
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };
        let body_at = start + prefix_len;
        let eol = find_from(page, b"\r\n", body_at)?;
        // Include the `\r` so parse_decimal sees the digit run terminated.
        if let Some(urc) = parse_body(&page[body_at..=eol]) {
            return Some(UrcMatch {
                urc,
                start,
                end: eol + 2,
            });
        }
        cursor = eol + 2;
    }
}
