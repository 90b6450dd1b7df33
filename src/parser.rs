//! Completion parsers.
//!
//! A completion parser looks at the unconsumed parse page and decides
//! whether the modem has finished answering. It never mutates the buffer;
//! it reports a [`ResultCode`] and how many bytes the engine should
//! consume when that code is terminal.
//!
//! Three canonical strategies cover nearly every AT command:
//!
//! | Strategy                | Looks for                                      |
//! |-------------------------|------------------------------------------------|
//! | [`DefaultMatcher`]      | `OK` / `+CME ERROR` / `ERROR` / `FAIL`, or an explicit terminator |
//! | [`TokenMatcher`]        | a preamble line with at least N delimited tokens |
//! | [`ServiceMatcher`]      | a numeric status field after a preamble         |
//!
//! Protocol modules with unusual replies plug in [`Parser::Custom`].

use crate::error::ResultCode;

pub const OK_TERMINATOR: &[u8] = b"OK\r\n";
pub const ERROR_TERMINATOR: &[u8] = b"ERROR\r\n";
pub const FAIL_TERMINATOR: &[u8] = b"FAIL\r\n";
pub const CME_PREAMBLE: &[u8] = b"+CME ERROR:";
const EOL: &[u8] = b"\r\n";

/// What a parser decided about the current parse page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOutcome {
    pub code: ResultCode,
    /// Bytes from the start of the page the engine consumes on a terminal code.
    pub consumed: usize,
}

impl ParseOutcome {
    pub const PENDING: Self = Self {
        code: ResultCode::PENDING,
        consumed: 0,
    };

    pub const fn done(code: ResultCode, consumed: usize) -> Self {
        Self { code, consumed }
    }
}

/// Parser capability: classify the unconsumed tail of the receive buffer.
pub trait CompletionParser {
    fn parse(&self, tail: &[u8]) -> ParseOutcome;
}

// ───────────────────────────────────────────────────────────────
// Byte-search helpers
// ───────────────────────────────────────────────────────────────

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub(crate) fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)
        .and_then(|rest| find(rest, needle))
        .map(|at| at + from)
}

/// Parse leading ASCII spaces then decimal digits. Returns `(value, end)`
/// where `end` is the index after the last digit, or `None` if no digits
/// or the digit run touches the end of the input (may be incomplete).
pub(crate) fn parse_decimal(input: &[u8]) -> Option<(u32, usize)> {
    let mut i = 0;
    while input.get(i) == Some(&b' ') {
        i += 1;
    }
    let digits_start = i;
    let mut value: u32 = 0;
    while let Some(d) = input.get(i).filter(|b| b.is_ascii_digit()) {
        value = value.saturating_mul(10).saturating_add(u32::from(d - b'0'));
        i += 1;
    }
    if i == digits_start || i == input.len() {
        return None;
    }
    Some((value, i))
}

/// Look for a complete `+CME ERROR: <n>\r\n` line at or after `from`.
/// `Some(outcome)` once the line is complete; `None` if absent or partial.
fn cme_error(tail: &[u8], from: usize) -> Option<ParseOutcome> {
    let at = find_from(tail, CME_PREAMBLE, from)?;
    let value_at = at + CME_PREAMBLE.len();
    let line_end = find_from(tail, EOL, value_at)?;
    let code = match parse_decimal(&tail[value_at..=line_end]) {
        Some((value, _)) => ResultCode::extended(value.min(u32::from(u16::MAX)) as u16),
        None => ResultCode::ERROR,
    };
    Some(ParseOutcome::done(code, line_end + EOL.len()))
}

// ───────────────────────────────────────────────────────────────
// Default / terminator matcher
// ───────────────────────────────────────────────────────────────

/// Standard AT response matcher.
///
/// With no explicit terminator the search order is `OK\r\n`, then a
/// complete `+CME ERROR: <n>` line (the number becomes the code), then
/// `ERROR\r\n`, then `FAIL\r\n`. `gap` is the minimum byte count between
/// the preamble end (or page start) and the terminator, so a bare command
/// echo is never taken for the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DefaultMatcher {
    pub preamble: Option<&'static str>,
    pub preamble_required: bool,
    pub gap: usize,
    pub terminator: Option<&'static str>,
}

impl DefaultMatcher {
    /// Plain `OK`/`ERROR` matcher.
    pub const OK: Self = Self {
        preamble: None,
        preamble_required: false,
        gap: 0,
        terminator: None,
    };

    pub const fn terminated_by(terminator: &'static str) -> Self {
        Self {
            preamble: None,
            preamble_required: false,
            gap: 0,
            terminator: Some(terminator),
        }
    }

    pub const fn with_preamble(preamble: &'static str, required: bool, gap: usize) -> Self {
        Self {
            preamble: Some(preamble),
            preamble_required: required,
            gap,
            terminator: None,
        }
    }

    #[must_use]
    pub const fn terminator(mut self, terminator: &'static str) -> Self {
        self.terminator = Some(terminator);
        self
    }
}

impl CompletionParser for DefaultMatcher {
    fn parse(&self, tail: &[u8]) -> ParseOutcome {
        let search_from = match self.preamble.filter(|p| !p.is_empty()) {
            Some(preamble) => match find(tail, preamble.as_bytes()) {
                Some(at) => at + preamble.len(),
                None if self.preamble_required => return ParseOutcome::PENDING,
                None => 0,
            },
            None => 0,
        };

        let (terminator_at, consumed) = if let Some(term) = self.terminator {
            match find_from(tail, term.as_bytes(), search_from) {
                Some(at) => (at, at + term.len()),
                None => return ParseOutcome::PENDING,
            }
        } else if let Some(at) = find_from(tail, OK_TERMINATOR, search_from) {
            (at, at + OK_TERMINATOR.len())
        } else if let Some(outcome) = cme_error(tail, search_from) {
            return outcome;
        } else if find_from(tail, CME_PREAMBLE, search_from).is_some() {
            return ParseOutcome::PENDING;
        } else if let Some(at) = find_from(tail, ERROR_TERMINATOR, search_from) {
            return ParseOutcome::done(ResultCode::ERROR, at + ERROR_TERMINATOR.len());
        } else if let Some(at) = find_from(tail, FAIL_TERMINATOR, search_from) {
            return ParseOutcome::done(ResultCode::ERROR, at + FAIL_TERMINATOR.len());
        } else {
            return ParseOutcome::PENDING;
        };

        if search_from + self.gap <= terminator_at {
            ParseOutcome::done(ResultCode::SUCCESS, consumed)
        } else {
            ParseOutcome::done(ResultCode::ERROR, consumed)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Token-count matcher
// ───────────────────────────────────────────────────────────────

/// Validates a structured reply: `<preamble>a,b,c<terminator>` must hold at
/// least `min_tokens` tokens separated by `delimiter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMatcher {
    pub preamble: &'static str,
    pub delimiter: u8,
    pub min_tokens: u8,
    pub terminator: &'static str,
}

impl TokenMatcher {
    pub const fn new(preamble: &'static str, min_tokens: u8) -> Self {
        Self {
            preamble,
            delimiter: b',',
            min_tokens,
            terminator: "OK\r\n",
        }
    }

    #[must_use]
    pub const fn terminator(mut self, terminator: &'static str) -> Self {
        self.terminator = terminator;
        self
    }

    #[must_use]
    pub const fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

impl CompletionParser for TokenMatcher {
    fn parse(&self, tail: &[u8]) -> ParseOutcome {
        let preamble_at = find(tail, self.preamble.as_bytes());
        let term_from = preamble_at.map_or(0, |at| at + self.preamble.len());

        let Some(term_at) = find_from(tail, self.terminator.as_bytes(), term_from) else {
            return cme_error(tail, 0).unwrap_or(ParseOutcome::PENDING);
        };
        let consumed = term_at + self.terminator.len();

        let Some(preamble_at) = preamble_at else {
            return ParseOutcome::done(ResultCode::NOT_FOUND, consumed);
        };

        let fields = &tail[preamble_at + self.preamble.len()..term_at];
        let tokens = fields.iter().filter(|&&b| b == self.delimiter).count() + 1;
        if tokens >= usize::from(self.min_tokens) {
            ParseOutcome::done(ResultCode::SUCCESS, consumed)
        } else {
            ParseOutcome::done(ResultCode::NOT_FOUND, consumed)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Service-response matcher
// ───────────────────────────────────────────────────────────────

/// Reads the numeric status at `field_index` (zero-based, comma-separated)
/// after `preamble`, e.g. `+QIOPEN: 1,0` with index 1. A modem `0` maps to
/// success, any other value to [`ResultCode::service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceMatcher {
    pub preamble: &'static str,
    pub field_index: u8,
}

impl ServiceMatcher {
    pub const fn new(preamble: &'static str, field_index: u8) -> Self {
        Self {
            preamble,
            field_index,
        }
    }
}

impl CompletionParser for ServiceMatcher {
    fn parse(&self, tail: &[u8]) -> ParseOutcome {
        let Some(at) = find(tail, self.preamble.as_bytes()) else {
            return cme_error(tail, 0).unwrap_or(ParseOutcome::PENDING);
        };
        let fields_at = at + self.preamble.len();
        let Some(line_end) = find_from(tail, EOL, fields_at) else {
            return ParseOutcome::PENDING;
        };
        let consumed = line_end + EOL.len();

        let line = &tail[fields_at..line_end];
        let mut field = line;
        for _ in 0..self.field_index {
            match field.iter().position(|&b| b == b',') {
                Some(comma) => field = &field[comma + 1..],
                None => return ParseOutcome::done(ResultCode::NOT_FOUND, consumed),
            }
        }

        // Re-attach the line end so a trailing number parses as complete.
        let field_with_eol = &tail[line_end - field.len()..=line_end];
        match parse_decimal(field_with_eol) {
            Some((value, _)) => ParseOutcome::done(
                ResultCode::service(value.min(u32::from(u16::MAX)) as u16),
                consumed,
            ),
            None => ParseOutcome::done(ResultCode::ERROR, consumed),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Parser selection
// ───────────────────────────────────────────────────────────────

/// The parser installed on an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parser {
    Default(DefaultMatcher),
    Tokens(TokenMatcher),
    Service(ServiceMatcher),
    Custom(fn(&[u8]) -> ParseOutcome),
}

impl Default for Parser {
    fn default() -> Self {
        Self::Default(DefaultMatcher::OK)
    }
}

impl From<DefaultMatcher> for Parser {
    fn from(m: DefaultMatcher) -> Self {
        Self::Default(m)
    }
}

impl From<TokenMatcher> for Parser {
    fn from(m: TokenMatcher) -> Self {
        Self::Tokens(m)
    }
}

impl From<ServiceMatcher> for Parser {
    fn from(m: ServiceMatcher) -> Self {
        Self::Service(m)
    }
}

impl CompletionParser for Parser {
    fn parse(&self, tail: &[u8]) -> ParseOutcome {
        match self {
            Self::Default(m) => m.parse(tail),
            Self::Tokens(m) => m.parse(tail),
            Self::Service(m) => m.parse(tail),
            Self::Custom(f) => f(tail),
        }
    }
}
