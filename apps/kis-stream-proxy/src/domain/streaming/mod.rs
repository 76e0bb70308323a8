//! Market Data Streaming Types
//!
//! Core domain types for the real-time feed: symbols and their
//! instrument kind, the two decoded record shapes, and the events
//! delivered to downstream sinks.

mod records;

use std::sync::Arc;

pub use records::{DecodedRecord, LADDER_DEPTH, QuoteSnapshot, TradeTick};

/// A market code such as `005930` (Samsung Electronics) or an ELW code.
pub type Symbol = String;

// =============================================================================
// Instrument Classification
// =============================================================================

/// Instrument kind, which selects the quote stream a symbol subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    /// Listed stock.
    Equity,
    /// Equity-linked warrant (ELW).
    Warrant,
}

impl InstrumentKind {
    /// Classify a symbol.
    ///
    /// Rules, first match wins:
    ///
    /// 1. six ASCII digits is a plain stock code
    /// 2. any non-ASCII letter (a Korean name was passed instead of a code) is
    ///    treated as equity
    /// 3. any ASCII letter, or a trailing `W`, marks a warrant
    /// 4. anything else is equity
    #[must_use]
    pub fn classify(symbol: &str) -> Self {
        if symbol.len() == 6 && symbol.bytes().all(|b| b.is_ascii_digit()) {
            return Self::Equity;
        }

        if symbol
            .chars()
            .any(|c| c.is_alphabetic() && !c.is_ascii_alphabetic())
        {
            return Self::Equity;
        }

        if symbol.chars().any(|c| c.is_ascii_alphabetic()) || symbol.ends_with('W') {
            Self::Warrant
        } else {
            Self::Equity
        }
    }

    /// Whether this is a warrant.
    #[must_use]
    pub const fn is_warrant(self) -> bool {
        matches!(self, Self::Warrant)
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Warrant => "warrant",
        }
    }
}

/// Shorthand for `InstrumentKind::classify(symbol).is_warrant()`.
#[must_use]
pub fn is_warrant(symbol: &str) -> bool {
    InstrumentKind::classify(symbol).is_warrant()
}

// =============================================================================
// Stream Kinds
// =============================================================================

/// The two upstream streams every symbol is subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Order book snapshot (10-level bid/ask ladder).
    Quote,
    /// Executed trade tick.
    Trade,
}

impl StreamKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Trade => "trade",
        }
    }
}

// =============================================================================
// Feed Events
// =============================================================================

/// Event delivered to a downstream sink.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A decoded record for one of the sink's symbols.
    Record(Arc<DecodedRecord>),
    /// Feed-level failure notice (sent at most once per sink).
    Error(String),
}

impl FeedEvent {
    /// The record carried by this event, if any.
    #[must_use]
    pub fn record(&self) -> Option<&DecodedRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Error(_) => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
