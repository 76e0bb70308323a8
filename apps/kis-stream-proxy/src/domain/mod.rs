//! Domain Layer - Core streaming types and business rules.
//!
//! This layer has no I/O. It defines what a symbol is, what a decoded
//! record looks like, and how subscriptions fan out to sinks.

/// Credentials handed out by the upstream auth endpoints.
pub mod auth;

/// Ranking list entries.
pub mod ranking;

/// Market data records, instrument classification and feed events.
pub mod streaming;

/// Subscription registry (the fan-out table).
pub mod subscription;
