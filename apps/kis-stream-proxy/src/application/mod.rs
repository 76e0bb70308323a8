//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and the port interfaces
//! that define how they reach the KIS API and the change detector.

/// Port interfaces for external systems (credentials, ranking, change detection).
pub mod ports;

/// Application services: the subscription multiplexer and the ranking poll loop.
pub mod services;
