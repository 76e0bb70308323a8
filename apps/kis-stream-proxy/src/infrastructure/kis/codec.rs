//! Stream Codec Module
//!
//! Decoding for the KIS real-time feed and encoding of subscribe requests.
//!
//! # Frame Format
//!
//! Market data arrives as text:
//!
//! ```text
//! encrypt|tr_id|count|f0^f1^f2^...
//! ```
//!
//! `count` records are concatenated into one `^`-separated run of fields.
//! Only the first record is decoded. Control frames (subscribe
//! acknowledgements, keep-alives) are JSON objects.

use crate::domain::auth::Credential;
use crate::domain::streaming::{
    DecodedRecord, InstrumentKind, LADDER_DEPTH, QuoteSnapshot, StreamKind, TradeTick,
};
use crate::infrastructure::kis::messages::{
    CUSTOMER_TYPE, ControlMessage, SubscribeBody, SubscribeHeader, SubscribeInput,
    SubscribePacket, SubscriptionAction, TR_QUOTE_EQUITY, TR_QUOTE_WARRANT, TR_TRADE,
    TR_TRADE_UNIFIED,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Not enough `|`-separated parts for a data frame.
    #[error("malformed frame: expected 4 '|' parts, found {found}")]
    TooFewParts {
        /// Parts found.
        found: usize,
    },

    /// Data block does not start with a symbol.
    #[error("frame for {tr_id} has no symbol")]
    MissingSymbol {
        /// Stream the frame belongs to.
        tr_id: String,
    },

    /// Payload is encrypted. Encrypted streams are never subscribed.
    #[error("encrypted payload on {tr_id}")]
    EncryptedPayload {
        /// Stream the frame belongs to.
        tr_id: String,
    },

    /// JSON control frame could not be parsed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TooFewParts { .. } => "too_few_parts",
            Self::MissingSymbol { .. } => "missing_symbol",
            Self::EncryptedPayload { .. } => "encrypted",
            Self::Json(_) => "json",
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A market data record.
    Record {
        /// Stream it arrived on.
        tr_id: String,
        /// The decoded record.
        record: DecodedRecord,
    },
    /// Server keep-alive.
    KeepAlive,
    /// Any other JSON control frame.
    Control(ControlMessage),
    /// Data frame for a stream we do not decode.
    Unhandled {
        /// Stream it arrived on.
        tr_id: String,
    },
}

// =============================================================================
// Decoding
// =============================================================================

/// Record shape a stream decodes to, if it is one we handle.
#[must_use]
pub fn stream_for_tr_id(tr_id: &str) -> Option<StreamKind> {
    match tr_id {
        TR_QUOTE_EQUITY | TR_QUOTE_WARRANT => Some(StreamKind::Quote),
        TR_TRADE | TR_TRADE_UNIFIED => Some(StreamKind::Trade),
        _ => None,
    }
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns an error if the frame is malformed, has no symbol, is encrypted,
/// or is a JSON frame that does not parse.
pub fn decode(raw: &str) -> Result<InboundFrame, CodecError> {
    if raw.starts_with('{') {
        let control: ControlMessage = serde_json::from_str(raw)?;
        if control.is_keep_alive() {
            return Ok(InboundFrame::KeepAlive);
        }
        return Ok(InboundFrame::Control(control));
    }

    let parts: Vec<&str> = raw.splitn(4, '|').collect();
    let [encrypt, tr_id, _count, data] = parts.as_slice() else {
        return Err(CodecError::TooFewParts { found: parts.len() });
    };

    let Some(stream) = stream_for_tr_id(tr_id) else {
        return Ok(InboundFrame::Unhandled {
            tr_id: (*tr_id).to_string(),
        });
    };

    if *encrypt == "1" {
        return Err(CodecError::EncryptedPayload {
            tr_id: (*tr_id).to_string(),
        });
    }

    let width = match stream {
        StreamKind::Quote => QuoteSnapshot::FIELD_COUNT,
        StreamKind::Trade => TradeTick::FIELD_COUNT,
    };
    let fields = Fields(data.split('^').take(width).collect());

    let symbol = fields.0.first().copied().unwrap_or_default();
    if symbol.is_empty() {
        return Err(CodecError::MissingSymbol {
            tr_id: (*tr_id).to_string(),
        });
    }

    let record = match stream {
        StreamKind::Quote => DecodedRecord::Quote(decode_quote(symbol, &fields)),
        StreamKind::Trade => DecodedRecord::Trade(decode_trade(symbol, &fields)),
    };

    Ok(InboundFrame::Record {
        tr_id: (*tr_id).to_string(),
        record,
    })
}

/// Permissive numeric conversion: trims, then parses as `f64`.
#[must_use]
pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse().ok()
}

struct Fields<'a>(Vec<&'a str>);

impl Fields<'_> {
    fn text(&self, index: usize) -> Option<String> {
        self.0.get(index).map(|s| (*s).to_string())
    }

    fn number(&self, index: usize) -> Option<f64> {
        self.0.get(index).and_then(|s| parse_number(s))
    }

    fn ladder(&self, start: usize) -> [Option<f64>; LADDER_DEPTH] {
        std::array::from_fn(|level| self.number(start + level))
    }
}

fn decode_trade(symbol: &str, f: &Fields<'_>) -> TradeTick {
    TradeTick {
        symbol: symbol.to_string(),
        time: f.text(1),
        last_price: f.number(2),
        change_sign: f.text(3),
        change: f.number(4),
        change_rate: f.number(5),
        weighted_average_price: f.number(6),
        open: f.number(7),
        high: f.number(8),
        low: f.number(9),
        best_ask: f.number(10),
        best_bid: f.number(11),
        trade_volume: f.number(12),
        cumulative_volume: f.number(13),
        cumulative_turnover: f.number(14),
        sell_trade_count: f.number(15),
        buy_trade_count: f.number(16),
        net_buy_trade_count: f.number(17),
        trade_strength: f.number(18),
        sell_volume_total: f.number(19),
        buy_volume_total: f.number(20),
        trade_side: f.text(21),
        buy_ratio: f.number(22),
        volume_rate_vs_prior_day: f.number(23),
        open_time: f.text(24),
        open_change_sign: f.text(25),
        open_change: f.number(26),
        high_time: f.text(27),
        high_change_sign: f.text(28),
        high_change: f.number(29),
        low_time: f.text(30),
        low_change_sign: f.text(31),
        low_change: f.number(32),
        business_date: f.text(33),
        market_operation_code: f.text(34),
        trading_halted: f.text(35),
        best_ask_quantity: f.number(36),
        best_bid_quantity: f.number(37),
        total_ask_quantity: f.number(38),
        total_bid_quantity: f.number(39),
        volume_turnover_rate: f.number(40),
        prior_day_same_time_volume: f.number(41),
        prior_day_same_time_volume_rate: f.number(42),
        hour_class_code: f.text(43),
        market_close_code: f.text(44),
        vi_reference_price: f.number(45),
    }
}

fn decode_quote(symbol: &str, f: &Fields<'_>) -> QuoteSnapshot {
    QuoteSnapshot {
        symbol: symbol.to_string(),
        business_hour: f.text(1),
        hour_class_code: f.text(2),
        ask_prices: f.ladder(3),
        bid_prices: f.ladder(13),
        ask_quantities: f.ladder(23),
        bid_quantities: f.ladder(33),
        total_ask_quantity: f.number(43),
        total_bid_quantity: f.number(44),
        overtime_total_ask_quantity: f.number(45),
        overtime_total_bid_quantity: f.number(46),
        expected_price: f.number(47),
        expected_quantity: f.number(48),
        expected_volume: f.number(49),
        expected_change: f.number(50),
        expected_change_sign: f.text(51),
        expected_change_rate: f.number(52),
        cumulative_volume: f.number(53),
        total_ask_quantity_change: f.number(54),
        total_bid_quantity_change: f.number(55),
        overtime_total_ask_change: f.number(56),
        overtime_total_bid_change: f.number(57),
        deal_class_code: f.text(58),
        krx_mid_price: f.number(59),
        krx_mid_total_quantity: f.number(60),
        krx_mid_class_code: f.text(61),
        nxt_mid_price: f.number(62),
        nxt_mid_total_quantity: f.number(63),
        nxt_mid_class_code: f.text(64),
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Quote stream for an instrument kind.
#[must_use]
pub const fn quote_tr_id(kind: InstrumentKind) -> &'static str {
    match kind {
        InstrumentKind::Equity => TR_QUOTE_EQUITY,
        InstrumentKind::Warrant => TR_QUOTE_WARRANT,
    }
}

/// Build a register request for one stream.
#[must_use]
pub fn encode_subscribe_request(
    credential: &Credential,
    tr_id: &str,
    symbol: &str,
) -> SubscribePacket {
    encode_request(credential, SubscriptionAction::Register, tr_id, symbol)
}

/// Build a register or deregister request for one stream.
#[must_use]
pub fn encode_request(
    credential: &Credential,
    action: SubscriptionAction,
    tr_id: &str,
    symbol: &str,
) -> SubscribePacket {
    SubscribePacket {
        header: SubscribeHeader {
            approval_key: credential.key().to_string(),
            custtype: CUSTOMER_TYPE.to_string(),
            tr_type: action.tr_type().to_string(),
            content_type: "utf-8".to_string(),
        },
        body: SubscribeBody {
            input: SubscribeInput {
                tr_id: tr_id.to_string(),
                tr_key: symbol.to_string(),
            },
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use test_case::test_case;

    fn trade_fields() -> Vec<String> {
        let mut fields: Vec<String> = (0..TradeTick::FIELD_COUNT).map(|i| i.to_string()).collect();
        fields[0] = "005930".to_string();
        fields[1] = "090000".to_string();
        fields[2] = "70000".to_string();
        fields[3] = "2".to_string();
        fields[21] = "1".to_string();
        fields[33] = "20240102".to_string();
        fields[35] = "N".to_string();
        fields
    }

    fn frame(tr_id: &str, fields: &[String]) -> String {
        format!("0|{tr_id}|001|{}", fields.join("^"))
    }

    #[test]
    fn decodes_trade_index_for_index() {
        let fields = trade_fields();
        let InboundFrame::Record { tr_id, record } = decode(&frame(TR_TRADE, &fields)).unwrap()
        else {
            panic!("expected record");
        };
        let trade = record.as_trade().unwrap();

        assert_eq!(tr_id, TR_TRADE);
        assert_eq!(trade.symbol, "005930");
        assert_eq!(trade.time.as_deref(), Some("090000"));
        assert_eq!(trade.last_price, Some(70000.0));
        assert_eq!(trade.change_sign.as_deref(), Some("2"));
        assert_eq!(trade.change, Some(4.0));
        assert_eq!(trade.open, Some(7.0));
        assert_eq!(trade.trade_side.as_deref(), Some("1"));
        assert_eq!(trade.business_date.as_deref(), Some("20240102"));
        assert_eq!(trade.trading_halted.as_deref(), Some("N"));
        assert_eq!(trade.best_ask_quantity, Some(36.0));
        assert_eq!(trade.hour_class_code.as_deref(), Some("43"));
        assert_eq!(trade.vi_reference_price, Some(45.0));
    }

    #[test]
    fn unified_trade_stream_decodes_as_trade() {
        let decoded = decode(&frame(TR_TRADE_UNIFIED, &trade_fields())).unwrap();
        assert!(matches!(
            decoded,
            InboundFrame::Record { record: DecodedRecord::Trade(_), .. }
        ));
    }

    #[test]
    fn non_numeric_text_becomes_none() {
        let mut fields = trade_fields();
        fields[2] = "abc".to_string();
        fields[4] = String::new();
        fields[5] = " 1.25 ".to_string();

        let InboundFrame::Record { record, .. } = decode(&frame(TR_TRADE, &fields)).unwrap() else {
            panic!("expected record");
        };
        let trade = record.as_trade().unwrap();

        assert_eq!(trade.last_price, None);
        assert_eq!(trade.change, None);
        assert_eq!(trade.change_rate, Some(1.25));
        assert_eq!(trade.open, Some(7.0));
    }

    #[test]
    fn short_frame_keeps_present_fields() {
        let decoded = decode("0|H0STCNT0|001|005930^090000").unwrap();
        let InboundFrame::Record { record, .. } = decoded else {
            panic!("expected record");
        };
        let trade = record.as_trade().unwrap();

        assert_eq!(trade.time.as_deref(), Some("090000"));
        assert_eq!(trade.last_price, None);
        assert_eq!(trade.vi_reference_price, None);
    }

    #[test]
    fn decodes_quote_ladder() {
        let mut fields: Vec<String> = (0..QuoteSnapshot::FIELD_COUNT)
            .map(|i| format!("{}", i * 100))
            .collect();
        fields[0] = "57JB12".to_string();
        fields[1] = "090001".to_string();
        fields[2] = "0".to_string();
        fields[51] = "3".to_string();

        let InboundFrame::Record { record, .. } = decode(&frame(TR_QUOTE_WARRANT, &fields)).unwrap()
        else {
            panic!("expected record");
        };
        let quote = record.as_quote().unwrap();

        assert_eq!(quote.symbol, "57JB12");
        assert_eq!(quote.business_hour.as_deref(), Some("090001"));
        assert_eq!(quote.ask_prices[0], Some(300.0));
        assert_eq!(quote.ask_prices[9], Some(1200.0));
        assert_eq!(quote.bid_prices[0], Some(1300.0));
        assert_eq!(quote.ask_quantities[0], Some(2300.0));
        assert_eq!(quote.bid_quantities[9], Some(4200.0));
        assert_eq!(quote.total_ask_quantity, Some(4300.0));
        assert_eq!(quote.expected_change_sign.as_deref(), Some("3"));
        assert_eq!(quote.cumulative_volume, Some(5300.0));
        assert_eq!(quote.nxt_mid_class_code.as_deref(), Some("6400"));
    }

    #[test]
    fn multi_record_frame_yields_first() {
        let first = trade_fields();
        let mut second = trade_fields();
        second[0] = "000660".to_string();
        second[2] = "150000".to_string();
        let raw = format!("0|H0STCNT0|002|{}^{}", first.join("^"), second.join("^"));

        let InboundFrame::Record { record, .. } = decode(&raw).unwrap() else {
            panic!("expected record");
        };

        assert_eq!(record.symbol(), "005930");
        assert_eq!(record.as_trade().unwrap().last_price, Some(70000.0));
    }

    #[test_case("" ; "empty")]
    #[test_case("garbage" ; "no pipes")]
    #[test_case("0|H0STCNT0|001" ; "three parts")]
    fn too_few_parts(raw: &str) {
        assert!(matches!(decode(raw), Err(CodecError::TooFewParts { .. })));
    }

    #[test]
    fn empty_symbol_is_error() {
        let err = decode("0|H0STCNT0|001|^090000^70000").unwrap_err();
        assert!(matches!(err, CodecError::MissingSymbol { .. }));
        assert_eq!(err.kind(), "missing_symbol");
    }

    #[test]
    fn encrypted_known_stream_is_error() {
        let err = decode("1|H0STCNT0|001|005930^090000").unwrap_err();
        assert!(matches!(err, CodecError::EncryptedPayload { .. }));
    }

    #[test]
    fn unknown_stream_is_unhandled() {
        let decoded = decode("0|H0STCNI0|001|abc^def").unwrap();
        assert_eq!(
            decoded,
            InboundFrame::Unhandled {
                tr_id: "H0STCNI0".to_string()
            }
        );
    }

    #[test]
    fn pingpong_is_keep_alive() {
        let decoded = decode(r#"{"header":{"tr_id":"PINGPONG","datetime":"20240102090000"}}"#);
        assert_eq!(decoded.unwrap(), InboundFrame::KeepAlive);
    }

    #[test]
    fn subscribe_ack_is_control() {
        let raw = r#"{"header":{"tr_id":"H0STCNT0","tr_key":"005930","encrypt":"N"},"body":{"rt_cd":"0","msg_cd":"OPSP0000","msg1":"SUBSCRIBE SUCCESS"}}"#;
        let InboundFrame::Control(control) = decode(raw).unwrap() else {
            panic!("expected control frame");
        };
        assert_eq!(control.message(), Some("SUBSCRIBE SUCCESS"));
    }

    #[test]
    fn broken_json_is_error() {
        assert!(matches!(decode("{not json"), Err(CodecError::Json(_))));
    }

    #[test_case("70000", Some(70000.0) ; "integer")]
    #[test_case(" -1.5 ", Some(-1.5) ; "padded")]
    #[test_case("", None ; "empty")]
    #[test_case("N", None ; "text")]
    fn number_parsing(raw: &str, expected: Option<f64>) {
        assert_eq!(parse_number(raw), expected);
    }

    #[test]
    fn subscribe_packet_wire_shape() {
        let credential = Credential::new("approval-123", Utc::now());
        let packet = encode_subscribe_request(&credential, TR_TRADE, "005930");

        let json = serde_json::to_value(&packet).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "header": {
                    "approval_key": "approval-123",
                    "custtype": "P",
                    "tr_type": "1",
                    "content-type": "utf-8"
                },
                "body": {"input": {"tr_id": "H0STCNT0", "tr_key": "005930"}}
            })
        );
    }

    #[test]
    fn deregister_packet_uses_tr_type_2() {
        let credential = Credential::new("k", Utc::now());
        let packet = encode_request(&credential, SubscriptionAction::Deregister, TR_TRADE, "005930");

        assert_eq!(packet.header.tr_type, "2");
        assert!(!packet.is_register());
    }

    #[test]
    fn quote_stream_follows_instrument_kind() {
        assert_eq!(quote_tr_id(InstrumentKind::Equity), TR_QUOTE_EQUITY);
        assert_eq!(quote_tr_id(InstrumentKind::Warrant), TR_QUOTE_WARRANT);
    }

    proptest! {
        #[test]
        fn decode_never_panics(raw in any::<String>()) {
            let _ = decode(&raw);
        }

        #[test]
        fn fewer_than_four_parts_is_error(raw in "[^|{][^|]*(\\|[^|]*){0,2}") {
            let is_too_few = matches!(decode(&raw), Err(CodecError::TooFewParts { .. }));
            prop_assert!(is_too_few);
        }
    }
}
