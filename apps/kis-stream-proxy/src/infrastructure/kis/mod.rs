//! KIS Adapters
//!
//! Clients for the Korea Investment & Securities Open API:
//!
//! - **Real-time feed**: one WebSocket carrying quote and trade streams
//!   (`|`/`^` delimited text frames, JSON control frames)
//! - **OAuth**: approval key for the feed, bearer token for REST
//! - **REST**: fluctuation ranking

pub mod auth;
pub mod codec;
pub mod connection;
pub mod messages;
pub mod reconnect;
pub mod rest;

pub use auth::{AuthError, KisAuthClient};
pub use codec::{CodecError, InboundFrame};
pub use connection::{ConnectionState, FeedState, UpstreamConnection, UpstreamError};
pub use messages::{ControlMessage, SubscribePacket, SubscriptionAction};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::KisRestClient;
