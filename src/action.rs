//! Action engine: the single command transaction channel to the modem.
//!
//! ```text
//!   acquire_lock ──▶ invoke ──▶ poll ... poll ──▶ terminal ──▶ close
//!        │             │          │                  │
//!        │             │          ├─ pending ────────┘ (timeout: diagnostics
//!        │             │          │                     + hardware health check)
//!        │             │          └─ stream mode: peer drain owns the pager
//!        │             └─ command + "\r" to the transport
//!        └─ Busy after bounded retries
//! ```
//!
//! At most one action is open at a time. A result moves from pending to a
//! terminal code once and never back. The engine owns its transport,
//! platform, status line and notification sink; protocol modules borrow it
//! mutably for the length of one transaction.

use core::fmt::Write as _;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::InputPin;
use log::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::diagnostics::DiagnosticsRecord;
use crate::error::{Error, Result, ResultCode};
use crate::pager::RxPager;
use crate::parser::{CompletionParser, ParseOutcome, Parser, find_from};
use crate::ports::{Notification, NotifySink, Platform, Transport, elapsed_ms};
use crate::stream::{DATA_CONTEXT_COUNT, Drain, StreamMux, StreamPeer};
use crate::urc::{self, Urc};

/// Receive ring capacity; each page is half of it.
pub const RX_BUFFER_SIZE: usize = 2048;
pub const COMMAND_CAPACITY: usize = 256;
pub const RESPONSE_CAPACITY: usize = 256;

pub type CommandText = heapless::String<COMMAND_CAPACITY>;
pub type RxBuffer = RxPager<RX_BUFFER_SIZE>;

/// Process-wide cancellation request checked by [`ActionEngine::await_result`].
/// Set from any context; cleared by the application.
pub static CANCEL_REQUEST: AtomicBool = AtomicBool::new(false);

const ESC: u8 = 0x1B;
const DATA_MODE_GUARD_MS: u32 = 1000;
const MAX_URCS_PER_SCAN: usize = 8;
const READ_CHUNK: usize = 64;

/// How far [`ActionEngine`] may sweep lines at the head of the parse page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sweep {
    /// Recognised URC lines only; the open action may still expect payload.
    UrcsOnly,
    /// URC lines and blank lines behind a finished response.
    Trailing,
    /// Every complete line; idle command mode.
    Everything,
}

/// Outcome of one [`ActionEngine::service_streams`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Nothing pending.
    Idle,
    /// A command action holds the lock.
    Busy,
    Draining { context: u8 },
    Complete { context: u8 },
    Fault { context: u8 },
}

#[derive(Debug)]
struct Action {
    command: CommandText,
    response: heapless::Vec<u8, RESPONSE_CAPACITY>,
    invoked_at: Option<u32>,
    timeout_ms: u32,
    result: ResultCode,
    parser: Parser,
    open: bool,
}

impl Action {
    fn new() -> Self {
        Self {
            command: CommandText::new(),
            response: heapless::Vec::new(),
            invoked_at: None,
            timeout_ms: 0,
            result: ResultCode::PENDING,
            parser: Parser::default(),
            open: false,
        }
    }

    fn set_command(&mut self, cmd: &str) -> Result<()> {
        self.command.clear();
        self.command
            .push_str(cmd)
            .map_err(|()| Error::CommandTooLong)
    }
}

pub struct ActionEngine<T, P, S, N>
where
    T: Transport,
    P: Platform,
    S: InputPin,
    N: NotifySink,
{
    transport: T,
    platform: P,
    status: S,
    notifier: N,
    config: EngineConfig,
    rx: RxBuffer,
    action: Action,
    streams: StreamMux,
    last_failure: Option<DiagnosticsRecord>,
    cancel: &'static AtomicBool,
    dropped_reported: usize,
}

impl<T, P, S, N> ActionEngine<T, P, S, N>
where
    T: Transport,
    P: Platform,
    S: InputPin,
    N: NotifySink,
{
    pub fn new(
        transport: T,
        platform: P,
        status: S,
        notifier: N,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "ACTION: engine up, timeout={}ms debounce={}ms",
            config.default_timeout_ms, config.rx_idle_debounce_ms
        );
        Ok(Self {
            transport,
            platform,
            status,
            notifier,
            rx: RxPager::new(config.rx_idle_debounce_ms),
            config,
            action: Action::new(),
            streams: StreamMux::new(),
            last_failure: None,
            cancel: &CANCEL_REQUEST,
            dropped_reported: 0,
        })
    }

    /// Use `flag` instead of the process-wide [`CANCEL_REQUEST`].
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: &'static AtomicBool) -> Self {
        self.cancel = flag;
        self
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.action.open
    }

    /// Current (or last) action result.
    pub fn result(&self) -> ResultCode {
        self.action.result
    }

    /// Command text of the current (or last) action.
    pub fn command(&self) -> &str {
        &self.action.command
    }

    /// Bytes consumed by the last terminal parse, truncated to
    /// [`RESPONSE_CAPACITY`].
    pub fn response(&self) -> &[u8] {
        &self.action.response
    }

    pub fn last_failure(&self) -> Option<&DiagnosticsRecord> {
        self.last_failure.as_ref()
    }

    pub fn streams(&self) -> &StreamMux {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut StreamMux {
        &mut self.streams
    }

    /// Receive pager, for protocol modules draining bulk data.
    pub fn rx(&mut self) -> &mut RxBuffer {
        &mut self.rx
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn platform(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn now(&mut self) -> u32 {
        self.platform.millis()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    // ── Receive side ─────────────────────────────────────────────

    /// Append bytes from an interrupt or DMA path to the active page.
    pub fn ingest(&mut self, data: &[u8]) -> usize {
        let now = self.platform.millis();
        let n = self.rx.ingest(data, now);
        self.report_overflow();
        n
    }

    /// Pull whatever the transport holds into the pager, then publish the
    /// active page if it has gone idle. Never reads more than the ring can
    /// hold; the rest stays in the transport FIFO.
    pub fn pump(&mut self) {
        let now = self.platform.millis();
        let mut chunk = [0u8; READ_CHUNK];
        while self.rx.free() > 0 && self.transport.available() {
            let want = chunk.len().min(self.rx.free());
            match self.transport.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    self.rx.ingest(&chunk[..n], now);
                }
                Err(e) => {
                    warn!("RX: transport read failed: {:?}", e);
                    break;
                }
            }
        }
        self.rx.service(now);
        self.report_overflow();
    }

    fn report_overflow(&mut self) {
        let dropped = self.rx.dropped();
        if dropped > self.dropped_reported {
            self.notifier.notify(Notification::BufferOverflow {
                dropped: dropped - self.dropped_reported,
            });
            self.dropped_reported = dropped;
        }
    }

    /// Background service: pump the transport and, when idle in command
    /// mode, consume unsolicited result codes. Unrecognised complete lines
    /// are discarded.
    pub fn do_work(&mut self) {
        self.pump();
        if self.action.open || self.streams.active().is_some() {
            return;
        }
        self.consume_leading_urcs(Sweep::Everything);
    }

    fn dispatch_urc(&mut self, urc: Urc) {
        match urc {
            Urc::DataReceived(ctx) if usize::from(ctx) < DATA_CONTEXT_COUNT => {
                debug!("URC: recv ctx={ctx}");
                self.streams.mark_pending(ctx);
            }
            Urc::Closed(ctx) => {
                if usize::from(ctx) < DATA_CONTEXT_COUNT {
                    self.streams.set_pending(ctx, false);
                }
                self.notifier.notify(Notification::SocketClosed { context: ctx });
            }
            Urc::PdpDeactivated(ctx) => {
                self.notifier
                    .notify(Notification::PdpDeactivated { context: ctx });
            }
            Urc::DataReceived(ctx) => warn!("URC: recv for invalid ctx={ctx}"),
        }
    }

    /// Handle every URC inside the first `len` published bytes without
    /// consuming them. Scans in batches of [`MAX_URCS_PER_SCAN`].
    fn handle_urcs_within(&mut self, len: usize) {
        let mut from = 0;
        loop {
            let mut found: heapless::Vec<Urc, MAX_URCS_PER_SCAN> = heapless::Vec::new();
            let mut exhausted = true;
            {
                let page = self.rx.view();
                let page = &page[..len.min(page.len())];
                while let Some(m) = urc::scan(page, from) {
                    if found.push(m.urc).is_err() {
                        exhausted = false;
                        break;
                    }
                    from = m.end;
                }
            }
            for u in found {
                self.dispatch_urc(u);
            }
            if exhausted {
                break;
            }
        }
    }

    /// Consume complete lines at the head of the parse page while `sweep`
    /// allows it. A recognised URC line may follow one leading line break.
    fn consume_leading_urcs(&mut self, sweep: Sweep) {
        loop {
            let page = self.rx.view();
            let lead = if page.starts_with(b"\r\n") { 2 } else { 0 };
            if lead > 0 && sweep != Sweep::UrcsOnly {
                self.rx.advance(lead);
                continue;
            }
            let Some(eol) = find_from(page, b"\r\n", lead) else {
                break;
            };
            let line_end = eol + 2;
            match urc::scan(&page[lead..line_end], 0) {
                Some(m) if m.start == 0 => {
                    let u = m.urc;
                    self.rx.advance(line_end);
                    self.dispatch_urc(u);
                }
                _ if sweep == Sweep::Everything => {
                    debug!("RX: discard {} byte line", line_end);
                    self.rx.advance(line_end);
                }
                _ => break,
            }
        }
    }

    // ── Lock ─────────────────────────────────────────────────────

    /// Open an action for `cmd`. While another action is open, waits the
    /// configured interval between up to `max_retries` further checks.
    pub fn acquire_lock(&mut self, cmd: &str, max_retries: u8) -> Result<()> {
        if cmd.len() > COMMAND_CAPACITY {
            return Err(Error::CommandTooLong);
        }
        let mut remaining = max_retries;
        while self.action.open {
            if remaining == 0 {
                debug!("ACTION: busy, '{}' holds the lock", self.action.command);
                return Err(Error::Busy);
            }
            remaining -= 1;
            self.platform.delay_ms(self.config.lock_retry_interval_ms);
            self.pump();
        }

        // URCs that arrived since the last action are handled, then
        // everything left over is stale.
        self.rx.publish();
        let published = self.rx.occupied();
        self.handle_urcs_within(published);
        self.rx.reset();

        self.action.set_command(cmd)?;
        self.action.response.clear();
        self.action.invoked_at = None;
        self.action.timeout_ms = self.config.default_timeout_ms;
        self.action.result = ResultCode::PENDING;
        self.action.parser = Parser::default();
        self.action.open = true;
        Ok(())
    }

    /// Release the lock unconditionally. Leaves stream mode if active. An
    /// invoked action still pending is recorded as cancelled.
    pub fn close(&mut self) {
        if let Some(ctx) = self.streams.active() {
            let _ = self.streams.leave(ctx);
        }
        if self.action.open {
            debug!("ACTION: close '{}' -> {}", self.action.command, self.action.result);
        }
        if self.action.open && self.action.invoked_at.is_some() && self.action.result.is_pending()
        {
            self.action.result = ResultCode::CANCELLED;
        }
        self.action.open = false;
    }

    // ── Invoke ───────────────────────────────────────────────────

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < data.len() {
            match self.transport.write(&data[sent..]) {
                Ok(0) => {
                    error!("TX: transport accepted 0 bytes");
                    return Err(Error::Transport);
                }
                Ok(n) => sent += n,
                Err(e) => {
                    error!("TX: transport write failed: {:?}", e);
                    return Err(Error::Transport);
                }
            }
        }
        Ok(())
    }

    fn arm(&mut self, timeout_ms: Option<u32>, parser: Option<Parser>) {
        self.action.response.clear();
        self.action.result = ResultCode::PENDING;
        self.action.parser = parser.unwrap_or_default();
        self.action.timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms);
        self.action.invoked_at = Some(self.platform.millis());
    }

    /// Send `cmd` under the held lock. `None` selects the configured
    /// timeout and the default `OK`/`ERROR` matcher. Runs once per lock;
    /// follow-up payloads go through [`send_raw`](Self::send_raw).
    pub fn invoke(
        &mut self,
        cmd: &str,
        timeout_ms: Option<u32>,
        parser: Option<Parser>,
    ) -> Result<()> {
        if !self.action.open {
            return Err(Error::NotLocked);
        }
        if self.action.invoked_at.is_some() {
            warn!(
                "ACTION: '{}' already invoked, '{}' needs a new lock",
                self.action.command, cmd
            );
            return Err(Error::AlreadyInvoked);
        }
        self.action.set_command(cmd)?;
        self.write_all(cmd.as_bytes())?;
        self.write_all(b"\r")?;
        self.transport.flush().map_err(|e| {
            error!("TX: flush failed: {:?}", e);
            Error::Transport
        })?;
        self.arm(timeout_ms, parser);
        debug!("ACTION: invoke '{}'", cmd);
        Ok(())
    }

    /// Acquire with the configured retries, then invoke with defaults.
    pub fn try_invoke(&mut self, cmd: &str) -> Result<()> {
        self.try_invoke_with(cmd, None, None)
    }

    pub fn try_invoke_with(
        &mut self,
        cmd: &str,
        timeout_ms: Option<u32>,
        parser: Option<Parser>,
    ) -> Result<()> {
        self.acquire_lock(cmd, self.config.lock_retries)?;
        if let Err(e) = self.invoke(cmd, timeout_ms, parser) {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    /// Send a raw payload as a sub-action of the open action (data after a
    /// `> ` prompt). Re-arms the parser and timeout, so the result is
    /// pending again until the payload's reply. The command text is kept
    /// for diagnostics.
    pub fn send_raw(
        &mut self,
        data: &[u8],
        timeout_ms: Option<u32>,
        parser: Option<Parser>,
    ) -> Result<()> {
        if !self.action.open {
            return Err(Error::NotLocked);
        }
        self.write_all(data)?;
        self.arm(timeout_ms, parser);
        debug!("ACTION: raw {} bytes", data.len());
        Ok(())
    }

    /// [`send_raw`](Self::send_raw) followed by an end-of-transmission byte
    /// (Ctrl-Z for SMS and some socket modes).
    pub fn send_raw_with_eot(
        &mut self,
        data: &[u8],
        eot: u8,
        timeout_ms: Option<u32>,
        parser: Option<Parser>,
    ) -> Result<()> {
        self.send_raw(data, timeout_ms, parser)?;
        self.write_all(&[eot])
    }

    /// Abort a text prompt (`> `) with ESC.
    pub fn exit_text_mode(&mut self) -> Result<()> {
        self.write_all(&[ESC])
    }

    /// Leave transparent data mode with the guarded `+++` escape.
    pub fn exit_data_mode(&mut self) -> Result<()> {
        self.platform.delay_ms(DATA_MODE_GUARD_MS);
        self.write_all(b"+++")?;
        self.platform.delay_ms(DATA_MODE_GUARD_MS);
        self.pump();
        Ok(())
    }

    // ── Poll / await ─────────────────────────────────────────────

    /// One step of the open action. See the module diagram.
    pub fn poll(&mut self, close_on_terminal: bool) -> ResultCode {
        if !self.action.open {
            return if self.action.result.is_pending() {
                error!("ACTION: poll with no open action");
                ResultCode::INTERNAL_ERROR
            } else {
                self.action.result
            };
        }
        if self.action.result.is_terminal() {
            if close_on_terminal {
                self.close();
            }
            return self.action.result;
        }
        let Some(invoked_at) = self.action.invoked_at else {
            error!("ACTION: poll before invoke");
            return ResultCode::INTERNAL_ERROR;
        };

        self.pump();
        let now = self.platform.millis();
        if let Some(context) = self.streams.active() {
            // The peer's drain owns the pager; only the budget applies here.
            if elapsed_ms(invoked_at, now) > self.action.timeout_ms {
                self.fail_timeout(now);
                self.notifier.notify(Notification::StreamFault { context });
                return ResultCode::TIMEOUT;
            }
            return ResultCode::PENDING;
        }

        let parser = self.action.parser;
        let outcome = parser.parse(self.rx.view());
        if outcome.code.is_pending() {
            if elapsed_ms(invoked_at, now) > self.action.timeout_ms {
                self.fail_timeout(now);
                return ResultCode::TIMEOUT;
            }
            return ResultCode::PENDING;
        }
        self.complete(outcome, close_on_terminal, now)
    }

    fn complete(
        &mut self,
        outcome: ParseOutcome,
        close_on_terminal: bool,
        now: u32,
    ) -> ResultCode {
        let consumed = outcome.consumed.min(self.rx.occupied());
        debug_assert_eq!(consumed, outcome.consumed, "parser consumed past the page");

        self.handle_urcs_within(consumed);
        {
            let page = self.rx.view();
            let keep = consumed.min(RESPONSE_CAPACITY);
            self.action.response.clear();
            let _ = self.action.response.extend_from_slice(&page[..keep]);
        }
        self.rx.advance(consumed);
        self.action.result = outcome.code;

        // An action kept open may be followed by raw payload (file data,
        // prompt replies), so only recognised URC lines are taken from it.
        if self.rx.head() > self.rx.tail() {
            self.rx.publish();
            let finishing = close_on_terminal || outcome.code.is_error();
            self.consume_leading_urcs(if finishing {
                Sweep::Trailing
            } else {
                Sweep::UrcsOnly
            });
        }

        if outcome.code.is_error() {
            warn!("ACTION: '{}' failed: {}", self.action.command, outcome.code);
            self.capture_failure(now);
            self.close();
        } else if close_on_terminal {
            self.close();
        }
        outcome.code
    }

    fn capture_failure(&mut self, now: u32) {
        let duration = self
            .action
            .invoked_at
            .map_or(0, |at| elapsed_ms(at, now));
        self.last_failure = Some(DiagnosticsRecord::capture(
            &self.action.command,
            &self.action.response,
            self.action.result,
            duration,
        ));
    }

    fn fail_timeout(&mut self, now: u32) {
        {
            let page = self.rx.view();
            let keep = page.len().min(RESPONSE_CAPACITY);
            self.action.response.clear();
            let _ = self.action.response.extend_from_slice(&page[..keep]);
        }
        self.action.result = ResultCode::TIMEOUT;
        self.capture_failure(now);
        self.close();

        warn!(
            "ACTION: '{}' timed out after {}ms",
            self.action.command, self.action.timeout_ms
        );
        // Two independent health signals: the module's own status line and
        // the SPI-UART bridge answering its scratchpad.
        if !self.status.is_high().unwrap_or(false) {
            self.notifier.notify(Notification::ModemOffline);
        }
        if !self.transport.comm_ready() {
            self.notifier.notify(Notification::BridgeUnresponsive);
        }
    }

    /// Poll with a cooperative yield between attempts until the result is
    /// terminal or cancellation is requested.
    ///
    /// On cancellation returns [`ResultCode::CANCELLED`] and leaves both the
    /// action and the receive buffer as they were; the caller decides
    /// whether to keep waiting or [`close`](Self::close). The flag is not
    /// cleared here.
    pub fn await_result(&mut self, close_on_terminal: bool) -> ResultCode {
        loop {
            if self.cancel.load(Ordering::Acquire) {
                warn!("ACTION: '{}' cancelled", self.action.command);
                return ResultCode::CANCELLED;
            }
            let code = self.poll(close_on_terminal);
            if code.is_terminal() {
                return code;
            }
            self.platform.yield_now();
        }
    }

    /// [`await_result`](Self::await_result) as a future for an external
    /// executor. Yields to the platform and then the executor between polls.
    pub async fn await_result_async(&mut self, close_on_terminal: bool) -> ResultCode {
        loop {
            if self.cancel.load(Ordering::Acquire) {
                warn!("ACTION: '{}' cancelled", self.action.command);
                return ResultCode::CANCELLED;
            }
            let code = self.poll(close_on_terminal);
            if code.is_terminal() {
                return code;
            }
            self.platform.yield_now();
            futures_lite::future::yield_now().await;
        }
    }

    // ── Stream mode ──────────────────────────────────────────────

    /// Hand the pager to the peer for `context`. Requires the open action.
    pub fn enter_stream(&mut self, context: u8) -> Result<()> {
        if !self.action.open {
            return Err(Error::StreamNotLocked);
        }
        let now = self.platform.millis();
        self.streams.enter(context, now)
    }

    /// Return to command mode and release the lock.
    pub fn leave_stream(&mut self, context: u8) -> Result<()> {
        self.streams.leave(context)?;
        self.close();
        Ok(())
    }

    /// Drive stream draining: step the active drain, or start the next
    /// pending peer in rotation when no action is open.
    pub fn service_streams(&mut self, peers: &mut [&mut dyn StreamPeer]) -> StreamStatus {
        self.pump();
        if let Some(context) = self.streams.active() {
            return self.drive_drain(context, peers);
        }
        if self.action.open {
            return StreamStatus::Busy;
        }
        let Some(context) = self.streams.next_pending() else {
            return StreamStatus::Idle;
        };
        let Some(peer) = peers.iter_mut().find(|p| p.context() == context) else {
            warn!("STREAM: ctx={context} pending with no peer");
            return StreamStatus::Idle;
        };

        let mut request = CommandText::new();
        if peer
            .read_request(&mut request, self.config.stream_request_size)
            .is_err()
        {
            error!("STREAM: ctx={context} read request overflow");
            return StreamStatus::Fault { context };
        }
        if self.acquire_lock(&request, 0).is_err() {
            self.streams.mark_pending(context);
            return StreamStatus::Busy;
        }
        let timeout = self.config.stream_timeout_ms;
        if let Err(e) = self.invoke(&request, Some(timeout), None) {
            warn!("STREAM: ctx={context} read request failed: {}", e);
            self.close();
            return StreamStatus::Fault { context };
        }
        if self.enter_stream(context).is_err() {
            self.close();
            return StreamStatus::Fault { context };
        }
        self.drive_drain(context, peers)
    }

    fn drive_drain(&mut self, context: u8, peers: &mut [&mut dyn StreamPeer]) -> StreamStatus {
        let now = self.platform.millis();
        let Some(peer) = peers.iter_mut().find(|p| p.context() == context) else {
            error!("STREAM: active ctx={context} has no peer");
            self.action.result = ResultCode::INTERNAL_ERROR;
            self.capture_failure(now);
            let _ = self.leave_stream(context);
            return StreamStatus::Fault { context };
        };

        match peer.drain(&mut self.rx) {
            Drain::Continue => {
                let started = self.streams.started_at().unwrap_or(now);
                if elapsed_ms(started, now) <= self.config.stream_timeout_ms {
                    return StreamStatus::Draining { context };
                }
                warn!("STREAM: ctx={context} drain timed out");
                self.action.result = ResultCode::TIMEOUT;
            }
            Drain::Complete { more_pending } => {
                self.action.result = ResultCode::SUCCESS;
                let _ = self.leave_stream(context);
                if more_pending {
                    self.streams.mark_pending(context);
                }
                return StreamStatus::Complete { context };
            }
            Drain::Fault => {
                warn!("STREAM: ctx={context} drain fault");
                self.action.result = ResultCode::INTERNAL_ERROR;
            }
        }
        self.capture_failure(now);
        self.notifier.notify(Notification::StreamFault { context });
        let _ = self.leave_stream(context);
        StreamStatus::Fault { context }
    }
}

/// Format a command into a [`CommandText`].
pub fn command(args: core::fmt::Arguments<'_>) -> Result<CommandText> {
    let mut cmd = CommandText::new();
    cmd.write_fmt(args).map_err(|_| Error::CommandTooLong)?;
    Ok(cmd)
}
