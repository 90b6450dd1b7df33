//! Block reads from the modem's file system.
//!
//! ```text
//!   AT+QFREAD=<handle>,<len>
//!   CONNECT <n>\r\n<n raw bytes>\r\nOK\r\n
//! ```
//!
//! The `CONNECT` line completes the action; the payload is then drained
//! straight out of the pager with zero-copy blocks (two per wrap) and the
//! fixed trailer is skipped.
//!
//! Cancellation mid-drain keeps whatever was already handed to the sink
//! delivered; the action is closed and the undelivered remainder is
//! discarded with the next lock acquisition.

use embedded_hal::digital::InputPin;
use log::{debug, warn};

use crate::action::{ActionEngine, command};
use crate::error::ResultCode;
use crate::parser::{DefaultMatcher, Parser, find, parse_decimal};
use crate::ports::{NotifySink, Platform, Transport, elapsed_ms};

const READ_TIMEOUT_MS: u32 = 5_000;
const CONNECT: &[u8] = b"CONNECT ";
const TRAILER: &[u8] = b"\r\nOK\r\n";

/// Read up to `len` bytes from an open file `handle`, passing each
/// contiguous block to `sink`. Returns the result and the byte count
/// delivered.
pub fn read<T, P, S, N>(
    engine: &mut ActionEngine<T, P, S, N>,
    handle: u16,
    len: usize,
    sink: &mut dyn FnMut(&[u8]),
) -> (ResultCode, usize)
where
    T: Transport,
    P: Platform,
    S: InputPin,
    N: NotifySink,
{
    let cmd = match command(format_args!("AT+QFREAD={handle},{len}")) {
        Ok(cmd) => cmd,
        Err(e) => return (e.into(), 0),
    };
    let header = Parser::Default(
        DefaultMatcher::with_preamble("CONNECT ", true, 1).terminator("\r\n"),
    );
    if let Err(e) = engine.try_invoke_with(&cmd, Some(READ_TIMEOUT_MS), Some(header)) {
        return (e.into(), 0);
    }
    let code = engine.await_result(false);
    if !code.is_success() {
        engine.close();
        return (code, 0);
    }

    let announced = find(engine.response(), CONNECT)
        .and_then(|at| parse_decimal(&engine.response()[at + CONNECT.len()..]))
        .map(|(n, _)| n as usize);
    let Some(announced) = announced else {
        warn!("FILE: malformed CONNECT header");
        engine.close();
        return (ResultCode::INTERNAL_ERROR, 0);
    };
    let announced = announced.min(len);

    let started = engine.now();
    let mut delivered = 0;
    loop {
        engine.pump();
        while delivered < announced {
            let block = engine.rx().pop_block(announced - delivered);
            if block.is_empty() {
                break;
            }
            sink(block.data());
            delivered += block.commit();
        }
        if delivered == announced && engine.rx().occupied() >= TRAILER.len() {
            break;
        }
        if engine.cancel_requested() {
            warn!("FILE: read cancelled after {} of {} bytes", delivered, announced);
            engine.close();
            return (ResultCode::CANCELLED, delivered);
        }
        let now = engine.now();
        if elapsed_ms(started, now) > READ_TIMEOUT_MS {
            warn!("FILE: read timed out after {} of {} bytes", delivered, announced);
            engine.close();
            return (ResultCode::TIMEOUT, delivered);
        }
        engine.platform().yield_now();
    }

    let trailer_ok = engine.rx().view().starts_with(TRAILER);
    engine.rx().skip_tail(TRAILER.len());
    engine.close();
    if !trailer_ok {
        warn!("FILE: malformed trailer after {} bytes", delivered);
        return (ResultCode::INTERNAL_ERROR, delivered);
    }
    debug!("FILE: read {} bytes from handle {}", delivered, handle);
    (ResultCode::SUCCESS, delivered)
}
