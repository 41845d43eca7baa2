//! Upbit Frame Decoder
//!
//! Upbit sends ticker events as JSON in binary WebSocket frames. Status
//! pings (`{"status":"UP"}`) and error bodies arrive on the same stream.

use crate::application::ports::{DecodeError, EventDecoder};
use crate::domain::ticker::PriceEvent;

use super::messages::{TICKER_TYPE, UpbitStreamEvent};

/// Decodes Upbit ticker frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpbitDecoder;

impl UpbitDecoder {
    /// Create a decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parse a frame into the full Upbit event.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` for invalid JSON (including non-numeric
    /// prices), error bodies, status messages and non-ticker events.
    pub fn decode_event(&self, frame: &[u8]) -> Result<UpbitStreamEvent, DecodeError> {
        let event: UpbitStreamEvent = serde_json::from_slice(frame)?;

        if let Some(error) = &event.error {
            return Err(DecodeError::Rejected(format!("{}: {}", error.name, error.message)));
        }

        if event.code.is_empty()
            && let Some(status) = &event.status
        {
            return Err(DecodeError::UnsupportedType(format!("status {status}")));
        }

        match event.event_type.as_deref() {
            Some(TICKER_TYPE) | None => Ok(event),
            Some(other) => Err(DecodeError::UnsupportedType(other.to_string())),
        }
    }
}

impl EventDecoder for UpbitDecoder {
    fn decode(&self, frame: &[u8]) -> Result<PriceEvent, DecodeError> {
        self.decode_event(frame).map(|event| event.to_price_event())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn decodes_ticker() {
        let frame = br#"{"type":"ticker","code":"KRW-BTC","trade_price":100.5,"prev_closing_price":100,
            "signed_change_price":0.5,"signed_change_rate":0.005,"acc_trade_price_24h":12345.9}"#;
        let event = UpbitDecoder::new().decode(frame).unwrap();

        assert_eq!(event.market_code, "KRW-BTC");
        assert_eq!(event.trade_price, 100.5);
        assert_eq!(event.signed_change_rate, 0.005);
        assert_eq!(event.acc_trade_price_24h, 12345.9);
    }

    #[test_case(br#"{"status":"UP"}"# ; "status message")]
    #[test_case(br#"{"type":"trade","code":"KRW-BTC","trade_price":1}"# ; "trade event")]
    fn unsupported(frame: &[u8]) {
        assert!(matches!(
            UpbitDecoder::new().decode(frame),
            Err(DecodeError::UnsupportedType(_))
        ));
    }

    #[test]
    fn error_body_is_rejected() {
        let result = UpbitDecoder::new().decode(br#"{"error":{"name":"WRONG_FORMAT","message":"bad"}}"#);
        assert!(matches!(result, Err(DecodeError::Rejected(message)) if message.starts_with("WRONG_FORMAT")));
    }

    #[test_case(b"not json" ; "garbage")]
    #[test_case(b"[1,2,3]" ; "array")]
    #[test_case(br#"{"type":"ticker","code":"KRW-BTC","trade_price":{"x":1}}"# ; "object price")]
    #[test_case(br#"{"type":"ticker","code":"KRW-BTC","trade_price":"oops"}"# ; "unparsable string price")]
    #[test_case(br#"{"type":"ticker","code":"KRW-BTC","trade_price":"100.5"}"# ; "numeric string price")]
    #[test_case(br#"{"type":"ticker","code":"KRW-BTC","trade_price":1,"prev_closing_price":"n/a"}"# ; "string close")]
    fn malformed(frame: &[u8]) {
        assert!(matches!(
            UpbitDecoder::new().decode(frame),
            Err(DecodeError::Json(_))
        ));
    }
}
