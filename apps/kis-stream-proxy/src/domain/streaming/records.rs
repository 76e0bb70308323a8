//! Decoded record shapes.
//!
//! Numeric fields are `Option<f64>` and text fields `Option<String>`: a
//! field that is missing from the frame, or fails to convert, is `None`
//! without affecting its neighbours.
//!
//! Both shapes serialize to a flat JSON object keyed by the vendor field
//! codes (`STCK_PRPR`, `ASKP1`, ...), in wire order. Browser clients key
//! off those names, so they are part of the downstream contract.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::StreamKind;

/// Number of price levels on each side of the order book.
pub const LADDER_DEPTH: usize = 10;

const ASK_PRICE_KEYS: [&str; LADDER_DEPTH] = [
    "ASKP1", "ASKP2", "ASKP3", "ASKP4", "ASKP5", "ASKP6", "ASKP7", "ASKP8", "ASKP9", "ASKP10",
];
const BID_PRICE_KEYS: [&str; LADDER_DEPTH] = [
    "BIDP1", "BIDP2", "BIDP3", "BIDP4", "BIDP5", "BIDP6", "BIDP7", "BIDP8", "BIDP9", "BIDP10",
];
const ASK_QUANTITY_KEYS: [&str; LADDER_DEPTH] = [
    "ASKP_RSQN1",
    "ASKP_RSQN2",
    "ASKP_RSQN3",
    "ASKP_RSQN4",
    "ASKP_RSQN5",
    "ASKP_RSQN6",
    "ASKP_RSQN7",
    "ASKP_RSQN8",
    "ASKP_RSQN9",
    "ASKP_RSQN10",
];
const BID_QUANTITY_KEYS: [&str; LADDER_DEPTH] = [
    "BIDP_RSQN1",
    "BIDP_RSQN2",
    "BIDP_RSQN3",
    "BIDP_RSQN4",
    "BIDP_RSQN5",
    "BIDP_RSQN6",
    "BIDP_RSQN7",
    "BIDP_RSQN8",
    "BIDP_RSQN9",
    "BIDP_RSQN10",
];

// =============================================================================
// Decoded Record
// =============================================================================

/// A record decoded from one upstream data block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedRecord {
    /// Order book snapshot.
    Quote(QuoteSnapshot),
    /// Trade tick.
    Trade(TradeTick),
}

impl DecodedRecord {
    /// Symbol this record belongs to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Quote(quote) => &quote.symbol,
            Self::Trade(trade) => &trade.symbol,
        }
    }

    /// Stream this record arrived on.
    #[must_use]
    pub const fn stream(&self) -> StreamKind {
        match self {
            Self::Quote(_) => StreamKind::Quote,
            Self::Trade(_) => StreamKind::Trade,
        }
    }

    /// The trade tick, if this is one.
    #[must_use]
    pub const fn as_trade(&self) -> Option<&TradeTick> {
        match self {
            Self::Trade(trade) => Some(trade),
            Self::Quote(_) => None,
        }
    }

    /// The quote snapshot, if this is one.
    #[must_use]
    pub const fn as_quote(&self) -> Option<&QuoteSnapshot> {
        match self {
            Self::Quote(quote) => Some(quote),
            Self::Trade(_) => None,
        }
    }
}

// =============================================================================
// Trade Tick
// =============================================================================

/// Executed trade with running daily aggregates (46 wire fields).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct TradeTick {
    #[serde(rename = "MKSC_SHRN_ISCD")]
    pub symbol: String,
    /// Trade time, `HHMMSS`.
    #[serde(rename = "STCK_CNTG_HOUR")]
    pub time: Option<String>,
    #[serde(rename = "STCK_PRPR")]
    pub last_price: Option<f64>,
    /// Sign code of the change versus the prior close (`1`..`5`).
    #[serde(rename = "PRDY_VRSS_SIGN")]
    pub change_sign: Option<String>,
    #[serde(rename = "PRDY_VRSS")]
    pub change: Option<f64>,
    #[serde(rename = "PRDY_CTRT")]
    pub change_rate: Option<f64>,
    #[serde(rename = "WGHN_AVRG_STCK_PRC")]
    pub weighted_average_price: Option<f64>,
    #[serde(rename = "STCK_OPRC")]
    pub open: Option<f64>,
    #[serde(rename = "STCK_HGPR")]
    pub high: Option<f64>,
    #[serde(rename = "STCK_LWPR")]
    pub low: Option<f64>,
    #[serde(rename = "ASKP1")]
    pub best_ask: Option<f64>,
    #[serde(rename = "BIDP1")]
    pub best_bid: Option<f64>,
    #[serde(rename = "CNTG_VOL")]
    pub trade_volume: Option<f64>,
    #[serde(rename = "ACML_VOL")]
    pub cumulative_volume: Option<f64>,
    #[serde(rename = "ACML_TR_PBMN")]
    pub cumulative_turnover: Option<f64>,
    #[serde(rename = "SELN_CNTG_CSNU")]
    pub sell_trade_count: Option<f64>,
    #[serde(rename = "SHNU_CNTG_CSNU")]
    pub buy_trade_count: Option<f64>,
    #[serde(rename = "NTBY_CNTG_CSNU")]
    pub net_buy_trade_count: Option<f64>,
    /// Buy volume over sell volume, in percent.
    #[serde(rename = "CTTR")]
    pub trade_strength: Option<f64>,
    #[serde(rename = "SELN_CNTG_SMTN")]
    pub sell_volume_total: Option<f64>,
    #[serde(rename = "SHNU_CNTG_SMTN")]
    pub buy_volume_total: Option<f64>,
    /// `1` buy-initiated, `5` sell-initiated.
    #[serde(rename = "CCLD_DVSN")]
    pub trade_side: Option<String>,
    #[serde(rename = "SHNU_RATE")]
    pub buy_ratio: Option<f64>,
    #[serde(rename = "PRDY_VOL_VRSS_ACML_VOL_RATE")]
    pub volume_rate_vs_prior_day: Option<f64>,
    #[serde(rename = "OPRC_HOUR")]
    pub open_time: Option<String>,
    #[serde(rename = "OPRC_VRSS_PRPR_SIGN")]
    pub open_change_sign: Option<String>,
    #[serde(rename = "OPRC_VRSS_PRPR")]
    pub open_change: Option<f64>,
    #[serde(rename = "HGPR_HOUR")]
    pub high_time: Option<String>,
    #[serde(rename = "HGPR_VRSS_PRPR_SIGN")]
    pub high_change_sign: Option<String>,
    #[serde(rename = "HGPR_VRSS_PRPR")]
    pub high_change: Option<f64>,
    #[serde(rename = "LWPR_HOUR")]
    pub low_time: Option<String>,
    #[serde(rename = "LWPR_VRSS_PRPR_SIGN")]
    pub low_change_sign: Option<String>,
    #[serde(rename = "LWPR_VRSS_PRPR")]
    pub low_change: Option<f64>,
    /// Business date, `YYYYMMDD`.
    #[serde(rename = "BSOP_DATE")]
    pub business_date: Option<String>,
    #[serde(rename = "NEW_MKOP_CLS_CODE")]
    pub market_operation_code: Option<String>,
    /// `Y` when trading is halted.
    #[serde(rename = "TRHT_YN")]
    pub trading_halted: Option<String>,
    #[serde(rename = "ASKP_RSQN1")]
    pub best_ask_quantity: Option<f64>,
    #[serde(rename = "BIDP_RSQN1")]
    pub best_bid_quantity: Option<f64>,
    #[serde(rename = "TOTAL_ASKP_RSQN")]
    pub total_ask_quantity: Option<f64>,
    #[serde(rename = "TOTAL_BIDP_RSQN")]
    pub total_bid_quantity: Option<f64>,
    #[serde(rename = "VOL_TNRT")]
    pub volume_turnover_rate: Option<f64>,
    #[serde(rename = "PRDY_SMNS_HOUR_ACML_VOL")]
    pub prior_day_same_time_volume: Option<f64>,
    #[serde(rename = "PRDY_SMNS_HOUR_ACML_VOL_RATE")]
    pub prior_day_same_time_volume_rate: Option<f64>,
    #[serde(rename = "HOUR_CLS_CODE")]
    pub hour_class_code: Option<String>,
    #[serde(rename = "MRKT_TRTM_CLS_CODE")]
    pub market_close_code: Option<String>,
    /// Volatility-interruption reference price.
    #[serde(rename = "VI_STND_PRC")]
    pub vi_reference_price: Option<f64>,
}

// =============================================================================
// Quote Snapshot
// =============================================================================

/// Ten-level order book with aggregates and the expected-price block
/// (65 wire fields).
///
/// Ladder arrays are best-first: index 0 is level 1.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(missing_docs)]
pub struct QuoteSnapshot {
    pub symbol: String,
    /// Book time, `HHMMSS`.
    pub business_hour: Option<String>,
    pub hour_class_code: Option<String>,
    pub ask_prices: [Option<f64>; LADDER_DEPTH],
    pub bid_prices: [Option<f64>; LADDER_DEPTH],
    pub ask_quantities: [Option<f64>; LADDER_DEPTH],
    pub bid_quantities: [Option<f64>; LADDER_DEPTH],
    pub total_ask_quantity: Option<f64>,
    pub total_bid_quantity: Option<f64>,
    pub overtime_total_ask_quantity: Option<f64>,
    pub overtime_total_bid_quantity: Option<f64>,
    /// Expected (auction) execution price.
    pub expected_price: Option<f64>,
    pub expected_quantity: Option<f64>,
    pub expected_volume: Option<f64>,
    pub expected_change: Option<f64>,
    pub expected_change_sign: Option<String>,
    pub expected_change_rate: Option<f64>,
    pub cumulative_volume: Option<f64>,
    pub total_ask_quantity_change: Option<f64>,
    pub total_bid_quantity_change: Option<f64>,
    pub overtime_total_ask_change: Option<f64>,
    pub overtime_total_bid_change: Option<f64>,
    pub deal_class_code: Option<String>,
    /// KRX mid-point order block.
    pub krx_mid_price: Option<f64>,
    pub krx_mid_total_quantity: Option<f64>,
    pub krx_mid_class_code: Option<String>,
    /// NXT mid-point order block.
    pub nxt_mid_price: Option<f64>,
    pub nxt_mid_total_quantity: Option<f64>,
    pub nxt_mid_class_code: Option<String>,
}

impl QuoteSnapshot {
    /// Number of fields on the wire.
    pub const FIELD_COUNT: usize = 65;
}

impl TradeTick {
    /// Number of fields on the wire.
    pub const FIELD_COUNT: usize = 46;
}

impl Serialize for QuoteSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Self::FIELD_COUNT))?;

        map.serialize_entry("MKSC_SHRN_ISCD", &self.symbol)?;
        map.serialize_entry("BSOP_HOUR", &self.business_hour)?;
        map.serialize_entry("HOUR_CLS_CODE", &self.hour_class_code)?;

        let ladders = [
            (&ASK_PRICE_KEYS, &self.ask_prices),
            (&BID_PRICE_KEYS, &self.bid_prices),
            (&ASK_QUANTITY_KEYS, &self.ask_quantities),
            (&BID_QUANTITY_KEYS, &self.bid_quantities),
        ];
        for (keys, values) in ladders {
            for (key, value) in keys.iter().zip(values) {
                map.serialize_entry(key, value)?;
            }
        }

        map.serialize_entry("TOTAL_ASKP_RSQN", &self.total_ask_quantity)?;
        map.serialize_entry("TOTAL_BIDP_RSQN", &self.total_bid_quantity)?;
        map.serialize_entry("OVTM_TOTAL_ASKP_RSQN", &self.overtime_total_ask_quantity)?;
        map.serialize_entry("OVTM_TOTAL_BIDP_RSQN", &self.overtime_total_bid_quantity)?;
        map.serialize_entry("ANTC_CNPR", &self.expected_price)?;
        map.serialize_entry("ANTC_CNQN", &self.expected_quantity)?;
        map.serialize_entry("ANTC_VOL", &self.expected_volume)?;
        map.serialize_entry("ANTC_CNTG_VRSS", &self.expected_change)?;
        map.serialize_entry("ANTC_CNTG_VRSS_SIGN", &self.expected_change_sign)?;
        map.serialize_entry("ANTC_CNTG_PRDY_CTRT", &self.expected_change_rate)?;
        map.serialize_entry("ACML_VOL", &self.cumulative_volume)?;
        map.serialize_entry("TOTAL_ASKP_RSQN_ICDC", &self.total_ask_quantity_change)?;
        map.serialize_entry("TOTAL_BIDP_RSQN_ICDC", &self.total_bid_quantity_change)?;
        map.serialize_entry("OVTM_TOTAL_ASKP_ICDC", &self.overtime_total_ask_change)?;
        map.serialize_entry("OVTM_TOTAL_BIDP_ICDC", &self.overtime_total_bid_change)?;
        map.serialize_entry("STCK_DEAL_CLS_CODE", &self.deal_class_code)?;
        map.serialize_entry("KMID_PRC", &self.krx_mid_price)?;
        map.serialize_entry("KMID_TOTAL_RSQN", &self.krx_mid_total_quantity)?;
        map.serialize_entry("KMID_CLS_CODE", &self.krx_mid_class_code)?;
        map.serialize_entry("NMID_PRC", &self.nxt_mid_price)?;
        map.serialize_entry("NMID_TOTAL_RSQN", &self.nxt_mid_total_quantity)?;
        map.serialize_entry("NMID_CLS_CODE", &self.nxt_mid_class_code)?;

        map.end()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_serializes_with_vendor_keys() {
        let trade = TradeTick {
            symbol: "005930".to_string(),
            time: Some("090000".to_string()),
            last_price: Some(70000.0),
            ..TradeTick::default()
        };

        let json = serde_json::to_value(DecodedRecord::Trade(trade)).unwrap();

        assert_eq!(json["MKSC_SHRN_ISCD"], "005930");
        assert_eq!(json["STCK_CNTG_HOUR"], "090000");
        assert_eq!(json["STCK_PRPR"], 70000.0);
        assert!(json["PRDY_CTRT"].is_null());
        assert_eq!(json.as_object().unwrap().len(), TradeTick::FIELD_COUNT);
    }

    #[test]
    fn quote_serializes_every_ladder_level() {
        let mut quote = QuoteSnapshot {
            symbol: "005930".to_string(),
            ..QuoteSnapshot::default()
        };
        quote.ask_prices[9] = Some(70900.0);
        quote.bid_quantities[0] = Some(1234.0);

        let json = serde_json::to_value(DecodedRecord::Quote(quote)).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), QuoteSnapshot::FIELD_COUNT);
        assert_eq!(json["ASKP10"], 70900.0);
        assert_eq!(json["BIDP_RSQN1"], 1234.0);
        assert!(json["BIDP10"].is_null());
        assert!(object.contains_key("NMID_CLS_CODE"));
    }

    #[test]
    fn record_accessors() {
        let record = DecodedRecord::Trade(TradeTick {
            symbol: "000660".to_string(),
            ..TradeTick::default()
        });

        assert_eq!(record.symbol(), "000660");
        assert_eq!(record.stream(), StreamKind::Trade);
        assert!(record.as_trade().is_some());
        assert!(record.as_quote().is_none());
    }
}
