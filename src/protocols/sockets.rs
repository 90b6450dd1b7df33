//! TCP/UDP/SSL sockets over the BGx internal IP stack.
//!
//! A [`Socket`] is both a protocol consumer of the action engine (open,
//! send, close) and a [`StreamPeer`] that drains received data:
//!
//! ```text
//!   +QIURC: "recv",<ctx>           ── marks the context pending
//!   AT+QIRD=<ctx>,<size>           ── read request under the lock
//!   +QIRD: <n>\r\n<n raw bytes>\r\nOK\r\n
//!   └─ header ─┘└──── data ────┘└ trailer ┘
//! ```
//!
//! Received bytes go to the socket's receiver closure block by block, so a
//! payload that wraps the ring end arrives in two calls.

use core::fmt::{self, Write as _};

use embedded_hal::digital::InputPin;
use log::{debug, warn};

use crate::action::{ActionEngine, CommandText, RxBuffer, command};
use crate::error::{Error, ResultCode};
use crate::parser::{
    CME_PREAMBLE, DefaultMatcher, ERROR_TERMINATOR, Parser, ServiceMatcher, TokenMatcher,
    find_from, parse_decimal,
};
use crate::ports::{NotifySink, Platform, Transport};
use crate::stream::{Drain, StreamPeer};

const OPEN_TIMEOUT_MS: u32 = 60_000;
const SEND_TIMEOUT_MS: u32 = 5_000;
/// Largest payload one `AT+QISEND` accepts.
pub const MAX_SEND: usize = 1460;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProtocol {
    Tcp,
    Udp,
    Ssl,
}

impl SocketProtocol {
    fn read_header(self) -> &'static str {
        match self {
            Self::Tcp | Self::Udp => "+QIRD: ",
            Self::Ssl => "+QSSLRECV: ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Header,
    Data { remaining: usize, announced: usize },
    Trailer { announced: usize },
}

pub struct Socket<F>
where
    F: FnMut(u8, &[u8]),
{
    context: u8,
    protocol: SocketProtocol,
    receiver: F,
    state: ReadState,
    received: usize,
}

impl<F> Socket<F>
where
    F: FnMut(u8, &[u8]),
{
    pub fn new(context: u8, protocol: SocketProtocol, receiver: F) -> Self {
        Self {
            context,
            protocol,
            receiver,
            state: ReadState::Header,
            received: 0,
        }
    }

    pub fn protocol(&self) -> SocketProtocol {
        self.protocol
    }

    /// Total payload bytes delivered to the receiver.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Open a client connection and register for receive notifications.
    pub fn open<T, P, S, N>(
        &mut self,
        engine: &mut ActionEngine<T, P, S, N>,
        host: &str,
        port: u16,
    ) -> ResultCode
    where
        T: Transport,
        P: Platform,
        S: InputPin,
        N: NotifySink,
    {
        let ctx = self.context;
        let built = match self.protocol {
            SocketProtocol::Tcp => command(format_args!(
                "AT+QIOPEN=1,{ctx},\"TCP\",\"{host}\",{port},0,0"
            )),
            SocketProtocol::Udp => command(format_args!(
                "AT+QIOPEN=1,{ctx},\"UDP\",\"{host}\",{port},0,0"
            )),
            SocketProtocol::Ssl => {
                command(format_args!("AT+QSSLOPEN=1,1,{ctx},\"{host}\",{port},0"))
            }
        };
        let preamble = match self.protocol {
            SocketProtocol::Ssl => "+QSSLOPEN: ",
            _ => "+QIOPEN: ",
        };
        let code = match built {
            Ok(cmd) => run(engine, &cmd, OPEN_TIMEOUT_MS, ServiceMatcher::new(preamble, 1).into()),
            Err(e) => e.into(),
        };
        if code.is_success() {
            debug!("SOCK: ctx={ctx} open to {host}:{port}");
            self.state = ReadState::Header;
            engine.streams_mut().register(ctx);
        } else {
            warn!("SOCK: ctx={ctx} open failed: {code}");
        }
        code
    }

    pub fn close<T, P, S, N>(&mut self, engine: &mut ActionEngine<T, P, S, N>) -> ResultCode
    where
        T: Transport,
        P: Platform,
        S: InputPin,
        N: NotifySink,
    {
        let ctx = self.context;
        let built = match self.protocol {
            SocketProtocol::Ssl => command(format_args!("AT+QSSLCLOSE={ctx}")),
            _ => command(format_args!("AT+QICLOSE={ctx}")),
        };
        engine.streams_mut().unregister(ctx);
        match built {
            Ok(cmd) => run(engine, &cmd, SEND_TIMEOUT_MS, Parser::default()),
            Err(e) => e.into(),
        }
    }

    /// Send `data`: the command waits for the `> ` prompt, then the payload
    /// goes out as a raw sub-action completed by `SEND OK`.
    pub fn send<T, P, S, N>(
        &mut self,
        engine: &mut ActionEngine<T, P, S, N>,
        data: &[u8],
    ) -> ResultCode
    where
        T: Transport,
        P: Platform,
        S: InputPin,
        N: NotifySink,
    {
        if data.len() > MAX_SEND {
            return Error::CommandTooLong.into();
        }
        let ctx = self.context;
        let built = match self.protocol {
            SocketProtocol::Ssl => command(format_args!("AT+QSSLSEND={ctx},{}", data.len())),
            _ => command(format_args!("AT+QISEND={ctx},{}", data.len())),
        };
        let cmd = match built {
            Ok(cmd) => cmd,
            Err(e) => return e.into(),
        };
        let prompt = Parser::Default(DefaultMatcher::terminated_by("> "));
        if let Err(e) = engine.try_invoke_with(&cmd, Some(SEND_TIMEOUT_MS), Some(prompt)) {
            return e.into();
        }
        let code = engine.await_result(false);
        if !code.is_success() {
            engine.close();
            return code;
        }
        let sent = Parser::Default(DefaultMatcher::terminated_by("SEND OK\r\n"));
        if let Err(e) = engine.send_raw(data, Some(SEND_TIMEOUT_MS), Some(sent)) {
            engine.close();
            return e.into();
        }
        engine.await_result(true)
    }

    /// Query unacknowledged bytes (`AT+QISEND=<ctx>,0`). Success means the
    /// reply carried all three counters.
    pub fn flush<T, P, S, N>(&mut self, engine: &mut ActionEngine<T, P, S, N>) -> ResultCode
    where
        T: Transport,
        P: Platform,
        S: InputPin,
        N: NotifySink,
    {
        match command(format_args!("AT+QISEND={},0", self.context)) {
            Ok(cmd) => run(engine, &cmd, SEND_TIMEOUT_MS, TokenMatcher::new("+QISEND: ", 3).into()),
            Err(e) => e.into(),
        }
    }

    fn fault(&mut self) -> Drain {
        self.state = ReadState::Header;
        Drain::Fault
    }
}

fn run<T, P, S, N>(
    engine: &mut ActionEngine<T, P, S, N>,
    cmd: &str,
    timeout_ms: u32,
    parser: Parser,
) -> ResultCode
where
    T: Transport,
    P: Platform,
    S: InputPin,
    N: NotifySink,
{
    match engine.try_invoke_with(cmd, Some(timeout_ms), Some(parser)) {
        Ok(()) => engine.await_result(true),
        Err(e) => e.into(),
    }
}

fn reports_error(rx: &RxBuffer) -> bool {
    rx.find(ERROR_TERMINATOR, 0).is_some() || rx.find(CME_PREAMBLE, 0).is_some()
}

impl<F> StreamPeer for Socket<F>
where
    F: FnMut(u8, &[u8]),
{
    fn context(&self) -> u8 {
        self.context
    }

    fn read_request(&self, cmd: &mut CommandText, request_size: u16) -> fmt::Result {
        match self.protocol {
            SocketProtocol::Ssl => write!(cmd, "AT+QSSLRECV={},{}", self.context, request_size),
            _ => write!(cmd, "AT+QIRD={},{}", self.context, request_size),
        }
    }

    fn drain(&mut self, rx: &mut RxBuffer) -> Drain {
        loop {
            match self.state {
                ReadState::Header => {
                    let header = self.protocol.read_header().as_bytes();
                    let Some(at) = rx.find(header, 0) else {
                        return if reports_error(rx) { self.fault() } else { Drain::Continue };
                    };
                    let value_at = at + header.len();
                    let Some(eol) = rx.find(b"\r\n", value_at) else {
                        return Drain::Continue;
                    };
                    let announced = {
                        let page = rx.view();
                        parse_decimal(&page[value_at..=eol]).map(|(n, _)| n as usize)
                    };
                    let Some(announced) = announced else {
                        warn!("SOCK: ctx={} malformed read header", self.context);
                        return self.fault();
                    };
                    rx.skip_tail(eol + 2);
                    self.state = ReadState::Data {
                        remaining: announced,
                        announced,
                    };
                }
                ReadState::Data { remaining: 0, announced } => {
                    self.state = ReadState::Trailer { announced };
                }
                ReadState::Data { remaining, announced } => {
                    let block = rx.pop_block(remaining);
                    if block.is_empty() {
                        return Drain::Continue;
                    }
                    (self.receiver)(self.context, block.data());
                    let taken = block.commit();
                    self.received += taken;
                    self.state = ReadState::Data {
                        remaining: remaining - taken,
                        announced,
                    };
                }
                ReadState::Trailer { announced } => {
                    let page = rx.view();
                    if let Some(at) = find_from(page, b"OK\r\n", 0) {
                        rx.skip_tail(at + 4);
                        self.state = ReadState::Header;
                        debug!("SOCK: ctx={} read {} bytes", self.context, announced);
                        return Drain::Complete {
                            more_pending: announced > 0,
                        };
                    }
                    return if reports_error(rx) { self.fault() } else { Drain::Continue };
                }
            }
        }
    }
}
