//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// KIS real-time WebSocket and REST adapters.
pub mod kis;

/// Bounded channel sinks for downstream delivery.
pub mod broadcast;

/// Configuration from the environment.
pub mod config;

/// Downstream WebSocket gateway.
pub mod gateway;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
