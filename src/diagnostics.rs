//! # Diagnostics
//!
//! Severities, the immutable [`Diagnostic`] record, the [`DiagnosticSink`]
//! capability trait for receivers, and per-severity counting.
//!
//! Diagnostics carry a stable `&'static str` id (by convention the
//! message template they were built from); the parser deduplicates by
//! `(id, offset)` within a single `parse()` call so that the same
//! complaint at the same place is delivered once. Reaching the error
//! limit synthesizes exactly one fatal diagnostic, and a fatal diagnostic
//! aborts the parse in flight.

use crate::token::Token;
use hashbrown::HashSet;
use thiserror::Error;

/// Diagnostic severity, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    FatalError,
}

impl Severity {
    /// Conventional display name ("note", "warning", ...).
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Info => "note",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::FatalError => "fatal error",
        }
    }
}

/// An immutable diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: Severity,
    id: &'static str,
    offset: u32,
    bytes: u32,
    line: u32,
    column: u32,
    text: String,
}

impl Diagnostic {
    #[must_use]
    pub const fn new(
        severity: Severity,
        id: &'static str,
        offset: u32,
        bytes: u32,
        line: u32,
        column: u32,
        text: String,
    ) -> Self {
        Self {
            severity,
            id,
            offset,
            bytes,
            line,
            column,
            text,
        }
    }

    /// Build a diagnostic covering `token`.
    #[must_use]
    pub fn at_token(severity: Severity, id: &'static str, token: &Token, text: String) -> Self {
        Self::new(
            severity,
            id,
            token.offset(),
            token.bytes(),
            token.line(),
            token.column(),
            text,
        )
    }

    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Stable identity, independent of formatted arguments.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        self.id
    }

    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    #[must_use]
    pub const fn bytes(&self) -> u32 {
        self.bytes
    }

    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub const fn column(&self) -> u32 {
        self.column
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Receiver of diagnostic messages.
pub trait DiagnosticSink {
    fn on_diagnostic(&mut self, d: &Diagnostic);
}

/// A parse was aborted by a fatal diagnostic.
#[derive(Debug, Clone, Error)]
#[error("parse aborted: {}", .0.text())]
pub struct FatalAbort(pub Diagnostic);

/// Running per-severity totals.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiagnosticCounter {
    info: usize,
    warning: usize,
    nonfatal_error: usize,
    fatal_error: usize,
}

impl DiagnosticCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            info: 0,
            warning: 0,
            nonfatal_error: 0,
            fatal_error: 0,
        }
    }

    pub fn count(&mut self, d: &Diagnostic) {
        match d.severity() {
            Severity::Info => self.info += 1,
            Severity::Warning => self.warning += 1,
            Severity::Error => self.nonfatal_error += 1,
            Severity::FatalError => self.fatal_error += 1,
        }
    }

    #[must_use]
    pub const fn total_count(&self) -> usize {
        self.info + self.warning + self.nonfatal_error + self.fatal_error
    }

    #[must_use]
    pub const fn info_count(&self) -> usize {
        self.info
    }

    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warning
    }

    /// Non-fatal plus fatal errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.nonfatal_error + self.fatal_error
    }

    #[must_use]
    pub const fn nonfatal_error_count(&self) -> usize {
        self.nonfatal_error
    }

    #[must_use]
    pub const fn fatal_error_count(&self) -> usize {
        self.fatal_error
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Default number of errors tolerated before a fatal diagnostic is
/// synthesized.
pub const DEFAULT_ERROR_LIMIT: usize = 20;

/// The parser's diagnostic state: handler fan-out, per-parse dedup,
/// counters, error limit and the poisoned-parse flag.
pub(crate) struct DiagState {
    handlers: Vec<Box<dyn DiagnosticSink>>,
    counter: DiagnosticCounter,
    emitted: HashSet<(&'static str, u32), ahash::RandomState>,
    error_limit: usize,
    fatal: Option<Diagnostic>,
}

impl DiagState {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Vec::new(),
            counter: DiagnosticCounter::new(),
            emitted: HashSet::default(),
            error_limit: DEFAULT_ERROR_LIMIT,
            fatal: None,
        }
    }

    pub(crate) fn add_handler(&mut self, handler: Box<dyn DiagnosticSink>) {
        self.handlers.push(handler);
    }

    pub(crate) const fn counter(&self) -> &DiagnosticCounter {
        &self.counter
    }

    pub(crate) const fn error_limit(&self) -> usize {
        self.error_limit
    }

    pub(crate) const fn set_error_limit(&mut self, limit: usize) {
        self.error_limit = limit;
    }

    /// The fatal diagnostic that poisoned the current parse, if any.
    pub(crate) const fn fatal(&self) -> Option<&Diagnostic> {
        self.fatal.as_ref()
    }

    pub(crate) fn take_fatal(&mut self) -> Option<FatalAbort> {
        self.fatal.take().map(FatalAbort)
    }

    /// Forget which diagnostics were emitted; called when a `parse()`
    /// completes.
    pub(crate) fn clear_emitted(&mut self) {
        self.emitted.clear();
    }

    pub(crate) fn reset_counts(&mut self) {
        self.counter.reset();
        self.fatal = None;
    }

    /// Deliver `d` unless an identical diagnostic was already emitted at
    /// the same offset during this parse. Counts it, enforces the error
    /// limit, and records fatal errors for the engine to unwind on.
    pub(crate) fn emit(&mut self, d: Diagnostic) {
        if !self.emitted.insert((d.id(), d.offset())) {
            return;
        }

        for handler in &mut self.handlers {
            handler.on_diagnostic(&d);
        }
        self.counter.count(&d);

        if d.severity() >= Severity::Error
            && self.counter.error_count() == self.error_limit
            && d.severity() < Severity::FatalError
        {
            let limit = self.error_limit;
            self.emit(Diagnostic::new(
                Severity::FatalError,
                "error limit ({}) reached, aborting",
                d.offset(),
                0,
                d.line(),
                d.column(),
                format!("error limit ({limit}) reached, aborting"),
            ));
        }

        if d.severity() >= Severity::FatalError && self.fatal.is_none() {
            self.fatal = Some(d);
        }
    }
}
