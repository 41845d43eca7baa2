//! Upbit Message Types
//!
//! Serde models for the Upbit WebSocket and REST APIs.
//!
//! # Subscribe Frame
//!
//! ```json
//! [{"ticket":"<ticket>"},{"type":"ticker","codes":["KRW-BTC","KRW-ETH"]}]
//! ```
//!
//! # Ticker Event
//!
//! The streaming event carries the market in `code` and its price fields
//! are always JSON numbers; a frame that breaks this is malformed. The REST
//! snapshot carries the market in `market`, has no `type`, and sometimes
//! renders prices as numeric strings, so it is parsed leniently.

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::ticker::PriceEvent;

/// Event type for ticker subscriptions.
pub const TICKER_TYPE: &str = "ticker";

// =============================================================================
// Stream Event
// =============================================================================

/// Frame from the WebSocket stream: a ticker event, a status message or an
/// error body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpbitStreamEvent {
    /// Event type (`ticker`).
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,

    /// Market code (e.g. `KRW-BTC`).
    #[serde(default)]
    pub code: String,

    /// Current trade price.
    #[serde(default)]
    pub trade_price: f64,

    /// Previous closing price.
    #[serde(default)]
    pub prev_closing_price: f64,

    /// Signed change against the previous close.
    #[serde(default)]
    pub signed_change_price: f64,

    /// Signed change rate against the previous close.
    #[serde(default)]
    pub signed_change_rate: f64,

    /// Accumulated 24h traded value.
    #[serde(default)]
    pub acc_trade_price_24h: f64,

    /// Event timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: Option<u64>,

    /// `SNAPSHOT` or `REALTIME`.
    #[serde(default)]
    pub stream_type: Option<String>,

    /// Connection status message (`{"status":"UP"}`).
    #[serde(default)]
    pub status: Option<String>,

    /// Error message sent instead of an event.
    #[serde(default)]
    pub error: Option<UpbitErrorBody>,
}

impl UpbitStreamEvent {
    /// Exchange-neutral price fields.
    #[must_use]
    pub fn to_price_event(&self) -> PriceEvent {
        PriceEvent {
            market_code: self.code.clone(),
            trade_price: self.trade_price,
            prev_closing_price: self.prev_closing_price,
            signed_change_price: self.signed_change_price,
            signed_change_rate: self.signed_change_rate,
            acc_trade_price_24h: self.acc_trade_price_24h,
        }
    }
}

// =============================================================================
// Snapshot Entry
// =============================================================================

/// Entry of `GET /v1/ticker`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpbitTickerEvent {
    /// Event type (`ticker`). Absent in REST responses.
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,

    /// Market code (e.g. `KRW-BTC`).
    #[serde(alias = "market", default)]
    pub code: String,

    /// Opening price.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub opening_price: f64,

    /// High price.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub high_price: f64,

    /// Low price.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub low_price: f64,

    /// Current trade price.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub trade_price: f64,

    /// Previous closing price.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub prev_closing_price: f64,

    /// `RISE`, `EVEN` or `FALL`.
    #[serde(default)]
    pub change: Option<String>,

    /// Signed change against the previous close.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub signed_change_price: f64,

    /// Signed change rate against the previous close.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub signed_change_rate: f64,

    /// Accumulated 24h traded value.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub acc_trade_price_24h: f64,

    /// Accumulated 24h traded volume.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub acc_trade_volume_24h: f64,

    /// 52-week high.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub highest_52_week_price: f64,

    /// 52-week low.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lowest_52_week_price: f64,

    /// Market state (`ACTIVE`, `PREVIEW`, `DELISTED`).
    #[serde(default)]
    pub market_state: Option<String>,

    /// Whether trading is suspended.
    #[serde(default)]
    pub is_trading_suspended: bool,

    /// Trade timestamp in milliseconds.
    #[serde(default)]
    pub trade_timestamp: Option<u64>,

    /// Event timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: Option<u64>,

    /// `SNAPSHOT` or `REALTIME`.
    #[serde(default)]
    pub stream_type: Option<String>,

    /// Connection status message (`{"status":"UP"}`).
    #[serde(default)]
    pub status: Option<String>,

    /// Error message sent instead of an event.
    #[serde(default)]
    pub error: Option<UpbitErrorBody>,
}

impl UpbitTickerEvent {
    /// Exchange-neutral price fields.
    #[must_use]
    pub fn to_price_event(&self) -> PriceEvent {
        PriceEvent {
            market_code: self.code.clone(),
            trade_price: self.trade_price,
            prev_closing_price: self.prev_closing_price,
            signed_change_price: self.signed_change_price,
            signed_change_rate: self.signed_change_rate,
            acc_trade_price_24h: self.acc_trade_price_24h,
        }
    }
}

/// Error body sent by the Upbit API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpbitErrorBody {
    /// Error name.
    #[serde(default)]
    pub name: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

/// Accept a JSON number, a numeric string or null. Anything unparsable
/// becomes 0.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    Ok(
        match Option::<NumberOrString>::deserialize(deserializer)? {
            Some(NumberOrString::Number(value)) => value,
            Some(NumberOrString::String(text)) => text.trim().parse().unwrap_or(0.0),
            None => 0.0,
        },
    )
}

// =============================================================================
// Markets
// =============================================================================

/// Entry of `GET /v1/market/all`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpbitMarket {
    /// Market code (e.g. `KRW-BTC`).
    pub market: String,
    /// Korean display name.
    #[serde(default)]
    pub korean_name: String,
    /// English display name.
    #[serde(default)]
    pub english_name: String,
    /// `NONE` or `CAUTION`.
    #[serde(default)]
    pub market_warning: Option<String>,
}

// =============================================================================
// Subscribe Request
// =============================================================================

#[derive(Serialize)]
struct TicketField<'a> {
    ticket: &'a str,
}

#[derive(Serialize)]
struct TypeField<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    codes: &'a [String],
}

/// Ticker subscription for a set of market codes.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    ticket: String,
    codes: Vec<String>,
}

impl SubscribeRequest {
    /// Create a ticker subscription.
    #[must_use]
    pub const fn ticker(ticket: String, codes: Vec<String>) -> Self {
        Self { ticket, codes }
    }

    /// Serialize into subscribe frames.
    ///
    /// With `codes_per_frame == 0` a single frame carries every code;
    /// otherwise codes are split over several frames sharing the ticket.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_frames(&self, codes_per_frame: usize) -> Result<Vec<String>, serde_json::Error> {
        let chunk = if codes_per_frame == 0 {
            self.codes.len().max(1)
        } else {
            codes_per_frame
        };

        self.codes
            .chunks(chunk)
            .map(|codes| {
                serde_json::to_string(&(
                    TicketField {
                        ticket: &self.ticket,
                    },
                    TypeField {
                        kind: TICKER_TYPE,
                        codes,
                    },
                ))
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM_EVENT: &str = r#"{
        "type":"ticker","code":"KRW-BTC","opening_price":31883000,"high_price":32310000,
        "low_price":31855000,"trade_price":32287000,"prev_closing_price":31883000.00000000,
        "acc_trade_price":78039261076.51241,"change":"RISE","change_price":404000,
        "signed_change_price":404000,"change_rate":0.0126713295,"signed_change_rate":0.0126713295,
        "ask_bid":"ASK","trade_volume":0.03103806,"acc_trade_volume":2429.58834336,
        "trade_date":"20230221","trade_time":"074102","trade_timestamp":1676965262139,
        "acc_ask_volume":1146.25573608,"acc_bid_volume":1283.33260728,
        "highest_52_week_price":57678000,"highest_52_week_date":"2022-03-28",
        "lowest_52_week_price":20700000,"lowest_52_week_date":"2022-12-30",
        "market_state":"ACTIVE","is_trading_suspended":false,"delisting_date":null,
        "market_warning":"NONE","timestamp":1676965262177,
        "acc_trade_price_24h":228827082483.7073,"acc_trade_volume_24h":7158.80283560,
        "stream_type":"REALTIME"
    }"#;

    #[test]
    fn parses_stream_event() {
        let event: UpbitStreamEvent = serde_json::from_str(STREAM_EVENT).unwrap();
        assert_eq!(event.event_type.as_deref(), Some("ticker"));
        assert_eq!(event.code, "KRW-BTC");
        assert_eq!(event.trade_price, 32_287_000.0);
        assert_eq!(event.stream_type.as_deref(), Some("REALTIME"));
        assert_eq!(event.timestamp, Some(1_676_965_262_177));

        let price = event.to_price_event();
        assert_eq!(price.market_code, "KRW-BTC");
        assert_eq!(price.prev_closing_price, 31_883_000.0);
        assert_eq!(price.acc_trade_price_24h, 228_827_082_483.707_3);
    }

    #[test]
    fn stream_event_rejects_string_prices() {
        let result = serde_json::from_str::<UpbitStreamEvent>(
            r#"{"type":"ticker","code":"KRW-BTC","trade_price":"32287000"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_entry_parses_full_stream_layout() {
        let event: UpbitTickerEvent = serde_json::from_str(STREAM_EVENT).unwrap();
        assert_eq!(event.trade_price, 32_287_000.0);
        assert_eq!(event.highest_52_week_price, 57_678_000.0);
        assert_eq!(event.market_state.as_deref(), Some("ACTIVE"));
    }

    #[test]
    fn parses_snapshot_entry_with_string_prices() {
        let event: UpbitTickerEvent = serde_json::from_str(
            r#"{"market":"KRW-ETH","trade_price":"2500000.5","prev_closing_price":2400000,
                "signed_change_price":null,"signed_change_rate":"bogus"}"#,
        )
        .unwrap();

        assert_eq!(event.event_type, None);
        assert_eq!(event.code, "KRW-ETH");
        assert_eq!(event.trade_price, 2_500_000.5);
        assert_eq!(event.prev_closing_price, 2_400_000.0);
        assert_eq!(event.signed_change_price, 0.0);
        assert_eq!(event.signed_change_rate, 0.0);
        assert_eq!(event.acc_trade_price_24h, 0.0);
    }

    #[test]
    fn parses_status_and_error_messages() {
        let status: UpbitStreamEvent = serde_json::from_str(r#"{"status":"UP"}"#).unwrap();
        assert_eq!(status.status.as_deref(), Some("UP"));
        assert!(status.code.is_empty());

        let error: UpbitStreamEvent =
            serde_json::from_str(r#"{"error":{"name":"INVALID_AUTH","message":"bad"}}"#).unwrap();
        assert_eq!(error.error.unwrap().name, "INVALID_AUTH");
    }

    #[test]
    fn subscribe_frame_layout() {
        let request = SubscribeRequest::ticker(
            "abc".to_string(),
            vec!["KRW-BTC".to_string(), "KRW-ETH".to_string()],
        );
        let frames = request.to_frames(0).unwrap();

        assert_eq!(
            frames,
            vec![r#"[{"ticket":"abc"},{"type":"ticker","codes":["KRW-BTC","KRW-ETH"]}]"#]
        );
    }

    #[test]
    fn subscribe_frames_split_codes() {
        let codes: Vec<String> = ["KRW-BTC", "KRW-ETH", "KRW-XRP"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let frames = SubscribeRequest::ticker("abc".to_string(), codes)
            .to_frames(2)
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains(r#"["KRW-BTC","KRW-ETH"]"#));
        assert!(frames[1].contains(r#"["KRW-XRP"]"#));
        assert!(frames.iter().all(|frame| frame.contains(r#""ticket":"abc""#)));
    }

    #[test]
    fn market_listing() {
        let markets: Vec<UpbitMarket> = serde_json::from_str(
            r#"[{"market":"KRW-BTC","korean_name":"비트코인","english_name":"Bitcoin","market_warning":"NONE"},
                {"market":"BTC-ETH","korean_name":"이더리움","english_name":"Ethereum"}]"#,
        )
        .unwrap();

        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0].english_name, "Bitcoin");
        assert_eq!(markets[1].market_warning, None);
    }
}
