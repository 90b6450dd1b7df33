//! Dual-page receive buffer.
//!
//! One fixed-capacity ring holds every byte the transport delivers. The
//! unconsumed region is split in two pages:
//!
//! ```text
//!   tail                published                 head
//!    │◀──── parse page ────▶│◀──── active page ────▶│
//!    │  visible to parsers  │  still being written  │
//! ```
//!
//! The transport appends to the active page. The active page is published
//! (swapped into the parse page) once it has been idle for the debounce
//! interval or has filled a half-ring page, so a command response is
//! visible in one piece and never torn across a swap.
//!
//! Cursors are monotonic byte counts: `tail <= published <= head` always.
//! Parsers read the parse page through [`RxPager::view`]; bulk drains take
//! zero-copy [`Block`]s that only consume once committed.

use log::{debug, warn};

use crate::ports::elapsed_ms;

/// Receive pager over a `N`-byte ring.
pub struct RxPager<const N: usize> {
    buf: [u8; N],
    /// Physical index of the first unconsumed byte.
    start: usize,
    /// Unconsumed bytes in the parse page.
    visible: usize,
    /// Unconsumed bytes in both pages.
    len: usize,
    /// Monotonic count of consumed bytes (tail cursor).
    consumed: usize,
    /// Monotonic count of ingested bytes (head cursor).
    written: usize,
    page_size: usize,
    debounce_ms: u32,
    last_rx_at: Option<u32>,
    dropped: usize,
}

impl<const N: usize> RxPager<N> {
    pub fn new(debounce_ms: u32) -> Self {
        assert!(N >= 2, "pager needs at least two bytes");
        Self {
            buf: [0; N],
            start: 0,
            visible: 0,
            len: 0,
            consumed: 0,
            written: 0,
            page_size: N / 2,
            debounce_ms,
            last_rx_at: None,
            dropped: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes published and not yet consumed.
    pub fn occupied(&self) -> usize {
        self.visible
    }

    /// Bytes received but not yet published.
    pub fn unpublished(&self) -> usize {
        self.len - self.visible
    }

    pub fn free(&self) -> usize {
        N - self.len
    }

    /// Tail cursor: total bytes consumed.
    pub fn tail(&self) -> usize {
        self.consumed
    }

    /// Publication cursor: end of the parse page.
    pub fn published(&self) -> usize {
        self.consumed + self.visible
    }

    /// Head cursor: total bytes ingested.
    pub fn head(&self) -> usize {
        self.written
    }

    /// Total bytes dropped because the ring was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Milliseconds since the last ingested byte, `None` before any.
    pub fn idle_for(&self, now: u32) -> Option<u32> {
        self.last_rx_at.map(|at| elapsed_ms(at, now))
    }

    // ── Ingestion (transport side) ───────────────────────────────

    /// Append transport bytes to the active page. Returns the count
    /// accepted; the remainder is dropped and counted.
    pub fn ingest(&mut self, data: &[u8], now: u32) -> usize {
        let n = data.len().min(self.free());
        let mut at = (self.start + self.len) % N;
        for &b in &data[..n] {
            self.buf[at] = b;
            at = (at + 1) % N;
        }
        self.len += n;
        self.written += n;
        if n > 0 {
            self.last_rx_at = Some(now);
        }
        if n < data.len() {
            self.dropped += data.len() - n;
            warn!("RX: ring full, dropped {} bytes", data.len() - n);
        }
        if self.unpublished() >= self.page_size {
            self.publish();
        }
        n
    }

    /// Publish the active page once it has gone idle. Returns `true` on swap.
    pub fn service(&mut self, now: u32) -> bool {
        if self.unpublished() == 0 {
            return false;
        }
        match self.idle_for(now) {
            Some(idle) if idle >= self.debounce_ms => {
                self.publish();
                true
            }
            _ => false,
        }
    }

    /// Swap the active page into the parse page unconditionally.
    pub fn publish(&mut self) {
        if self.len != self.visible {
            debug!("RX: publish {} bytes", self.len - self.visible);
            self.visible = self.len;
        }
    }

    // ── Parse-side primitives ────────────────────────────────────

    /// Contiguous view of the parse page. Rotates the ring when the page
    /// wraps, so the returned slice is always the complete page.
    pub fn view(&mut self) -> &[u8] {
        if self.start + self.visible > N {
            self.buf.rotate_left(self.start);
            self.start = 0;
        }
        &self.buf[self.start..self.start + self.visible]
    }

    fn at(&self, offset: usize) -> u8 {
        self.buf[(self.start + offset) % N]
    }

    /// Offset of `pattern` in the parse page at or after `from`.
    pub fn find(&self, pattern: &[u8], from: usize) -> Option<usize> {
        if pattern.is_empty() || self.visible < pattern.len() {
            return None;
        }
        (from..=self.visible - pattern.len())
            .find(|&i| pattern.iter().enumerate().all(|(j, &p)| self.at(i + j) == p))
    }

    /// Copy up to `out.len()` published bytes out and consume them.
    pub fn pop(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.visible);
        for (i, slot) in out[..n].iter_mut().enumerate() {
            *slot = self.at(i);
        }
        self.consume(n);
        n
    }

    /// Borrow the next contiguous run of at most `max` published bytes.
    ///
    /// Data that wraps the ring end comes back in two blocks. Nothing is
    /// consumed until [`Block::commit`]; dropping the block leaves the
    /// bytes in place.
    pub fn pop_block(&mut self, max: usize) -> Block<'_, N> {
        let len = max.min(self.visible).min(N - self.start);
        Block { pager: self, len }
    }

    /// Discard up to `n` published bytes without copying them.
    pub fn skip_tail(&mut self, n: usize) -> usize {
        let n = n.min(self.visible);
        self.consume(n);
        n
    }

    /// Consume exactly `n` published bytes.
    pub fn advance(&mut self, n: usize) {
        assert!(
            n <= self.visible,
            "advance past published data ({n} > {})",
            self.visible
        );
        self.consume(n);
    }

    /// Drop every buffered byte, published or not.
    pub fn reset(&mut self) {
        self.consumed += self.len;
        self.start = 0;
        self.len = 0;
        self.visible = 0;
    }

    fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.visible);
        self.start = (self.start + n) % N;
        self.len -= n;
        self.visible -= n;
        self.consumed += n;
        if self.len == 0 {
            self.start = 0;
        }
    }
}

/// Zero-copy borrow of a contiguous run in the parse page.
pub struct Block<'a, const N: usize> {
    pager: &'a mut RxPager<N>,
    len: usize,
}

impl<const N: usize> Block<'_, N> {
    pub fn data(&self) -> &[u8] {
        let start = self.pager.start;
        &self.pager.buf[start..start + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consume the borrowed bytes. Returns the count consumed.
    pub fn commit(self) -> usize {
        let len = self.len;
        self.pager.consume(len);
        len
    }
}
