//! Canonical Ticker Types
//!
//! `Ticker` is the record relayed to every sink. `PriceEvent` is the
//! exchange-neutral view of one inbound feed event, produced by an
//! exchange decoder and consumed by the normalizer.
//!
//! # Wire Format
//!
//! ```json
//! {"exchange":"UPBIT","currency":"BTC","price":51000000.0,
//!  "yesterday_price":50000000.0,"change":1000000.0,
//!  "change_rate":0.02,"volume":123456789}
//! ```

use serde::{Deserialize, Serialize};

// =============================================================================
// Ticker
// =============================================================================

/// Canonical price record for one currency on one exchange.
///
/// Identity key is `(exchange, currency)`. Only the latest value matters;
/// each update overwrites the previous one for its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// Exchange identifier (e.g. `UPBIT`).
    pub exchange: String,
    /// Currency code without the quote prefix (e.g. `BTC`).
    pub currency: String,
    /// Current trade price.
    pub price: f64,
    /// Previous session closing price.
    pub yesterday_price: f64,
    /// Signed absolute change against the previous close.
    pub change: f64,
    /// Signed relative change against the previous close.
    pub change_rate: f64,
    /// Accumulated 24h traded value.
    pub volume: u64,
}

impl Ticker {
    /// Build a ticker from a raw price event.
    #[must_use]
    pub fn from_event(exchange: &str, currency: &str, event: &PriceEvent) -> Self {
        Self {
            exchange: exchange.to_string(),
            currency: currency.to_string(),
            price: event.trade_price,
            yesterday_price: event.prev_closing_price,
            change: event.signed_change_price,
            change_rate: event.signed_change_rate,
            volume: volume_from_f64(event.acc_trade_price_24h),
        }
    }

    /// Serialize to the canonical JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a ticker from the canonical JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid ticker object.
    pub fn from_wire(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Truncate a floating point volume to a non-negative integer.
///
/// Negative and NaN values become 0, values past `u64::MAX` saturate.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn volume_from_f64(value: f64) -> u64 {
    value as u64
}

// =============================================================================
// Price Event
// =============================================================================

/// Price fields of one inbound feed event, independent of the exchange's
/// own message layout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceEvent {
    /// Exchange market code (e.g. `KRW-BTC`).
    pub market_code: String,
    /// Current trade price.
    pub trade_price: f64,
    /// Previous session closing price.
    pub prev_closing_price: f64,
    /// Signed change against the previous close.
    pub signed_change_price: f64,
    /// Signed change rate against the previous close.
    pub signed_change_rate: f64,
    /// Accumulated 24h traded value.
    pub acc_trade_price_24h: f64,
}

// =============================================================================
// Currency Extraction
// =============================================================================

/// Extract the currency code from a market code by stripping the quote
/// prefix.
///
/// Returns `None` when the market code does not carry the prefix or nothing
/// remains after it. Such markets are not tracked.
#[must_use]
pub fn currency_code<'a>(market_code: &'a str, quote_prefix: &str) -> Option<&'a str> {
    market_code
        .strip_prefix(quote_prefix)
        .filter(|currency| !currency.is_empty())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn make_event(market: &str, price: f64) -> PriceEvent {
        PriceEvent {
            market_code: market.to_string(),
            trade_price: price,
            prev_closing_price: 50_000_000.0,
            signed_change_price: price - 50_000_000.0,
            signed_change_rate: (price - 50_000_000.0) / 50_000_000.0,
            acc_trade_price_24h: 123_456_789.75,
        }
    }

    #[test_case("KRW-BTC", Some("BTC") ; "strips quote prefix")]
    #[test_case("KRW-ETH", Some("ETH") ; "other currency")]
    #[test_case("BTC-ETH", None ; "foreign quote currency")]
    #[test_case("USDT-BTC", None ; "longer foreign prefix")]
    #[test_case("KRW-", None ; "prefix only")]
    #[test_case("", None ; "empty market")]
    fn currency_extraction(market: &str, expected: Option<&str>) {
        assert_eq!(currency_code(market, "KRW-"), expected);
    }

    #[test]
    fn from_event_maps_fields() {
        let ticker = Ticker::from_event("UPBIT", "BTC", &make_event("KRW-BTC", 51_000_000.0));

        assert_eq!(ticker.exchange, "UPBIT");
        assert_eq!(ticker.currency, "BTC");
        assert!((ticker.price - 51_000_000.0).abs() < f64::EPSILON);
        assert!((ticker.yesterday_price - 50_000_000.0).abs() < f64::EPSILON);
        assert!((ticker.change - 1_000_000.0).abs() < f64::EPSILON);
        assert!((ticker.change_rate - 0.02).abs() < 1e-12);
        assert_eq!(ticker.volume, 123_456_789);
    }

    #[test]
    fn volume_truncation() {
        assert_eq!(volume_from_f64(10.99), 10);
        assert_eq!(volume_from_f64(-5.0), 0);
        assert_eq!(volume_from_f64(f64::NAN), 0);
        assert_eq!(volume_from_f64(f64::INFINITY), u64::MAX);
    }

    #[test]
    fn wire_field_names() {
        let ticker = Ticker::from_event("UPBIT", "BTC", &make_event("KRW-BTC", 51_000_000.0));
        let value: serde_json::Value = serde_json::from_str(&ticker.to_wire().unwrap()).unwrap();

        let object = value.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "change",
                "change_rate",
                "currency",
                "exchange",
                "price",
                "volume",
                "yesterday_price"
            ]
        );
        assert!(object["volume"].is_u64());
        assert!(object["price"].is_f64());
    }

    #[test]
    fn wire_rejects_negative_volume() {
        let payload = r#"{"exchange":"UPBIT","currency":"BTC","price":1.0,"yesterday_price":1.0,"change":0.0,"change_rate":0.0,"volume":-1}"#;
        assert!(Ticker::from_wire(payload).is_err());
    }

    proptest! {
        #[test]
        fn wire_round_trip(
            currency in "[A-Z]{2,6}",
            price in -1.0e12f64..1.0e12,
            yesterday_price in -1.0e12f64..1.0e12,
            change in -1.0e12f64..1.0e12,
            change_rate in -10.0f64..10.0,
            volume in any::<u64>(),
        ) {
            let ticker = Ticker {
                exchange: "UPBIT".to_string(),
                currency,
                price,
                yesterday_price,
                change,
                change_rate,
                volume,
            };

            let parsed = Ticker::from_wire(&ticker.to_wire().unwrap()).unwrap();
            prop_assert_eq!(parsed, ticker);
        }

        #[test]
        fn markets_without_prefix_are_excluded(market in "[A-Z]{3,5}-[A-Z]{2,6}") {
            prop_assume!(!market.starts_with("KRW-"));
            prop_assert!(currency_code(&market, "KRW-").is_none());
        }
    }
}
