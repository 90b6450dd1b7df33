//! Mock hardware for integration tests.
//!
//! A scripted modem behind the transport port, a manual clock, a status
//! line and a notification recorder. Every mock hands out a shared handle
//! so tests can steer it after the engine has taken ownership.

use core::convert::Infallible;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::{ErrorType, InputPin};
use ltem::ActionEngine;
use ltem::config::EngineConfig;
use ltem::ports::{Notification, NotifySink, Platform, Transport};

// ── Scripted modem ────────────────────────────────────────────

#[derive(Default)]
pub struct ModemState {
    /// Bytes waiting to be read by the engine.
    pub rx: VecDeque<u8>,
    /// Every byte the engine wrote.
    pub written: Vec<u8>,
    /// Written bytes not yet matched against the script.
    unmatched: Vec<u8>,
    /// Expected writes and the reply each one triggers, in order.
    script: VecDeque<(Vec<u8>, Vec<u8>)>,
    pub bridge_dead: bool,
}

#[allow(dead_code)]
impl ModemState {
    pub fn expect(&mut self, trigger: &[u8], reply: &[u8]) {
        self.script.push_back((trigger.to_vec(), reply.to_vec()));
    }

    pub fn deliver(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    pub fn script_done(&self) -> bool {
        self.script.is_empty()
    }

    fn match_script(&mut self) {
        while let Some((trigger, _)) = self.script.front() {
            let Some(at) = self
                .unmatched
                .windows(trigger.len())
                .position(|w| w == trigger.as_slice())
            else {
                break;
            };
            let end = at + trigger.len();
            self.unmatched.drain(..end);
            if let Some((_, reply)) = self.script.pop_front() {
                self.rx.extend(reply);
            }
        }
    }
}

pub type ModemHandle = Rc<RefCell<ModemState>>;

pub struct ScriptedModem {
    state: ModemHandle,
}

impl Transport for ScriptedModem {
    type Error = Infallible;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        let mut state = self.state.borrow_mut();
        let n = buf.len().min(state.rx.len());
        for (slot, b) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Infallible> {
        let mut state = self.state.borrow_mut();
        state.written.extend_from_slice(data);
        state.unmatched.extend_from_slice(data);
        state.match_script();
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn available(&mut self) -> bool {
        !self.state.borrow().rx.is_empty()
    }

    fn comm_ready(&mut self) -> bool {
        !self.state.borrow().bridge_dead
    }
}

// ── Manual clock ──────────────────────────────────────────────

pub struct MockPlatform {
    now: Rc<Cell<u32>>,
    step_ms: u32,
    yields: u32,
    cancel_after: Option<u32>,
    cancel: &'static AtomicBool,
    modem: ModemHandle,
    /// (deliver at ms, bytes), sorted by time.
    scheduled: VecDeque<(u32, Vec<u8>)>,
}

impl MockPlatform {
    fn advance(&mut self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
        while let Some((at, _)) = self.scheduled.front() {
            if *at > self.now.get() {
                break;
            }
            if let Some((_, bytes)) = self.scheduled.pop_front() {
                self.modem.borrow_mut().deliver(&bytes);
            }
        }
    }
}

impl Platform for MockPlatform {
    fn millis(&mut self) -> u32 {
        self.now.get()
    }

    fn yield_now(&mut self) {
        self.yields += 1;
        if self.cancel_after == Some(self.yields) {
            self.cancel.store(true, Ordering::Release);
        }
        self.advance(self.step_ms);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(ms);
    }
}

// ── Status line ───────────────────────────────────────────────

pub struct MockStatusPin {
    high: Rc<Cell<bool>>,
}

impl ErrorType for MockStatusPin {
    type Error = Infallible;
}

impl InputPin for MockStatusPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.high.get())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.high.get())
    }
}

// ── Notification recorder ─────────────────────────────────────

pub struct RecordingNotifier {
    log: Rc<RefCell<Vec<Notification>>>,
}

impl NotifySink for RecordingNotifier {
    fn notify(&mut self, notification: Notification) {
        self.log.borrow_mut().push(notification);
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub type Engine = ActionEngine<ScriptedModem, MockPlatform, MockStatusPin, RecordingNotifier>;

#[allow(dead_code)]
pub struct Rig {
    pub engine: Engine,
    pub modem: ModemHandle,
    pub clock: Rc<Cell<u32>>,
    pub status: Rc<Cell<bool>>,
    pub notes: Rc<RefCell<Vec<Notification>>>,
    pub cancel: &'static AtomicBool,
}

/// Rig builder: clock step per yield, optional cancel after N yields,
/// scheduled deliveries.
pub struct RigBuilder {
    config: EngineConfig,
    step_ms: u32,
    cancel_after: Option<u32>,
    scheduled: Vec<(u32, Vec<u8>)>,
}

#[allow(dead_code)]
impl RigBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn step_ms(mut self, step_ms: u32) -> Self {
        self.step_ms = step_ms;
        self
    }

    pub fn cancel_after_yields(mut self, yields: u32) -> Self {
        self.cancel_after = Some(yields);
        self
    }

    pub fn deliver_at(mut self, at_ms: u32, bytes: &[u8]) -> Self {
        self.scheduled.push((at_ms, bytes.to_vec()));
        self
    }

    pub fn build(mut self) -> Rig {
        // One flag per rig keeps parallel tests independent.
        let cancel: &'static AtomicBool = Box::leak(Box::new(AtomicBool::new(false)));
        let modem: ModemHandle = Rc::default();
        let clock = Rc::new(Cell::new(0));
        let status = Rc::new(Cell::new(true));
        let notes: Rc<RefCell<Vec<Notification>>> = Rc::default();
        self.scheduled.sort_by_key(|(at, _)| *at);

        let platform = MockPlatform {
            now: Rc::clone(&clock),
            step_ms: self.step_ms,
            yields: 0,
            cancel_after: self.cancel_after,
            cancel,
            modem: Rc::clone(&modem),
            scheduled: self.scheduled.into(),
        };
        let engine = ActionEngine::new(
            ScriptedModem {
                state: Rc::clone(&modem),
            },
            platform,
            MockStatusPin {
                high: Rc::clone(&status),
            },
            RecordingNotifier {
                log: Rc::clone(&notes),
            },
            self.config,
        )
        .expect("valid config")
        .with_cancel_flag(cancel);

        Rig {
            engine,
            modem,
            clock,
            status,
            notes,
            cancel,
        }
    }
}

pub fn builder() -> RigBuilder {
    RigBuilder {
        config: EngineConfig::default(),
        step_ms: 1,
        cancel_after: None,
        scheduled: Vec::new(),
    }
}

pub fn rig() -> Rig {
    builder().build()
}

#[allow(dead_code)]
impl Rig {
    pub fn expect(&self, trigger: &str, reply: &[u8]) {
        self.modem.borrow_mut().expect(trigger.as_bytes(), reply);
    }

    pub fn deliver(&self, bytes: &[u8]) {
        self.modem.borrow_mut().deliver(bytes);
    }

    pub fn notes(&self) -> Vec<Notification> {
        self.notes.borrow().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.modem.borrow().written.clone()
    }

    /// Advance the clock without yielding through the engine.
    pub fn advance(&mut self, ms: u32) {
        self.engine.platform().delay_ms(ms);
    }
}
