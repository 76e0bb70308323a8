//! KIS WebSocket Message Types
//!
//! Wire types for the JSON side of the real-time feed: the subscribe
//! request we send and the control frames we receive. Market data itself
//! arrives as `|`/`^` delimited text and is handled by the codec.
//!
//! # Message Types
//!
//! ## Outbound
//! - `SubscribePacket`: register or deregister one (`tr_id`, symbol) stream
//!
//! ## Inbound control frames
//! - `PINGPONG` keep-alive
//! - Subscribe acknowledgements and rejections (`rt_cd`, `msg1`)

use serde::{Deserialize, Serialize};

// =============================================================================
// Transaction Identifiers
// =============================================================================

/// Order book stream for listed stocks (unified market).
pub const TR_QUOTE_EQUITY: &str = "H0UNASP0";

/// Order book stream for warrants.
pub const TR_QUOTE_WARRANT: &str = "H0STASP0";

/// Trade stream, used for every instrument kind.
pub const TR_TRADE: &str = "H0STCNT0";

/// Unified-market trade stream. Never subscribed, but decoded if it arrives.
pub const TR_TRADE_UNIFIED: &str = "H0UNCNT0";

/// Server keep-alive.
pub const TR_PINGPONG: &str = "PINGPONG";

/// Customer type sent with every request (`P` = individual).
pub const CUSTOMER_TYPE: &str = "P";

// =============================================================================
// Subscribe Request
// =============================================================================

/// Register or deregister a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Start receiving a stream.
    Register,
    /// Stop receiving a stream.
    Deregister,
}

impl SubscriptionAction {
    /// Wire value of the `tr_type` header.
    #[must_use]
    pub const fn tr_type(self) -> &'static str {
        match self {
            Self::Register => "1",
            Self::Deregister => "2",
        }
    }
}

/// Subscribe/unsubscribe request for one (`tr_id`, symbol) pair.
///
/// ```json
/// {"header":{"approval_key":"..","custtype":"P","tr_type":"1","content-type":"utf-8"},
///  "body":{"input":{"tr_id":"H0STCNT0","tr_key":"005930"}}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePacket {
    /// Request header.
    pub header: SubscribeHeader,
    /// Request body.
    pub body: SubscribeBody,
}

/// Header of a subscribe request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeHeader {
    /// Approval key issued for the feed.
    pub approval_key: String,
    /// Customer type.
    pub custtype: String,
    /// `1` register, `2` deregister.
    pub tr_type: String,
    /// Payload encoding.
    #[serde(rename = "content-type")]
    pub content_type: String,
}

impl std::fmt::Debug for SubscribeHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeHeader")
            .field("approval_key", &"[REDACTED]")
            .field("custtype", &self.custtype)
            .field("tr_type", &self.tr_type)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Body of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeBody {
    /// Stream selector.
    pub input: SubscribeInput,
}

/// Stream selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeInput {
    /// Transaction identifier of the stream.
    pub tr_id: String,
    /// Symbol.
    pub tr_key: String,
}

impl SubscribePacket {
    /// Transaction identifier of the requested stream.
    #[must_use]
    pub fn tr_id(&self) -> &str {
        &self.body.input.tr_id
    }

    /// Symbol of the requested stream.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.body.input.tr_key
    }

    /// Whether this registers (rather than deregisters) the stream.
    #[must_use]
    pub fn is_register(&self) -> bool {
        self.header.tr_type == SubscriptionAction::Register.tr_type()
    }
}

// =============================================================================
// Control Frames
// =============================================================================

/// JSON control frame from the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlMessage {
    /// Frame header.
    pub header: ControlHeader,
    /// Result block. Absent on keep-alives.
    #[serde(default)]
    pub body: Option<ControlBody>,
}

/// Header of a control frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlHeader {
    /// Transaction identifier the frame refers to.
    pub tr_id: String,
    /// Symbol the frame refers to.
    #[serde(default)]
    pub tr_key: Option<String>,
    /// Encryption flag of the stream (`Y`/`N`).
    #[serde(default)]
    pub encrypt: Option<String>,
}

/// Result block of a control frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlBody {
    /// `0` on success.
    #[serde(default)]
    pub rt_cd: Option<String>,
    /// Message code, e.g. `OPSP0000`.
    #[serde(default)]
    pub msg_cd: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub msg1: Option<String>,
}

impl ControlMessage {
    /// Whether this is the server keep-alive.
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        self.header.tr_id == TR_PINGPONG
    }

    /// Whether the server rejected the request this frame answers.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        self.body
            .as_ref()
            .and_then(|b| b.rt_cd.as_deref())
            .is_some_and(|rt_cd| rt_cd != "0")
    }

    /// Server message text, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.body.as_ref().and_then(|b| b.msg1.as_deref())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_ack_is_not_rejection() {
        let json = r#"{"header":{"tr_id":"H0STCNT0","tr_key":"005930","encrypt":"N"},
            "body":{"rt_cd":"0","msg_cd":"OPSP0000","msg1":"SUBSCRIBE SUCCESS","output":{"iv":"x","key":"y"}}}"#;
        let msg: ControlMessage = serde_json::from_str(json).unwrap();

        assert!(!msg.is_keep_alive());
        assert!(!msg.is_rejection());
        assert_eq!(msg.message(), Some("SUBSCRIBE SUCCESS"));
        assert_eq!(msg.header.tr_key.as_deref(), Some("005930"));
    }

    #[test]
    fn control_rejection() {
        let json = r#"{"header":{"tr_id":"H0STCNT0","tr_key":"ZZZ","encrypt":"N"},
            "body":{"rt_cd":"1","msg_cd":"OPSP8996","msg1":"ALREADY IN SUBSCRIBE"}}"#;
        let msg: ControlMessage = serde_json::from_str(json).unwrap();

        assert!(msg.is_rejection());
    }

    #[test]
    fn pingpong_has_no_body() {
        let json = r#"{"header":{"tr_id":"PINGPONG","datetime":"20240102090000"}}"#;
        let msg: ControlMessage = serde_json::from_str(json).unwrap();

        assert!(msg.is_keep_alive());
        assert!(msg.body.is_none());
        assert!(!msg.is_rejection());
    }

    #[test]
    fn header_debug_hides_approval_key() {
        let header = SubscribeHeader {
            approval_key: "secret".to_string(),
            custtype: CUSTOMER_TYPE.to_string(),
            tr_type: "1".to_string(),
            content_type: "utf-8".to_string(),
        };

        assert!(!format!("{header:?}").contains("secret"));
    }
}
