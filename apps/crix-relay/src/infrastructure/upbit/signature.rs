//! Subscribe Ticket Signer
//!
//! The ticket identifies the subscriber to Upbit. It is an HMAC-SHA512 of
//! a fixed key, keyed by the base64 decoding of `"t" + <unix millis>`, and
//! rendered as standard base64.
//!
//! Only the longest prefix of the seed whose length is a multiple of four
//! is decoded, so every timestamp yields a valid key.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Default key material.
pub const DEFAULT_TICKET_KEY: &str = "SIGNATURE_JEONGPOPE";

/// Ticket signing errors.
#[derive(Debug, thiserror::Error)]
#[error("failed to sign ticket: {0}")]
pub struct TicketError(String);

/// Build a ticket for the given timestamp.
///
/// # Errors
///
/// Returns `TicketError` if the HMAC cannot be keyed.
pub fn make_ticket(key: &str, timestamp_millis: i64) -> Result<String, TicketError> {
    let seed = format!("t{timestamp_millis}");
    let usable = seed.len() / 4 * 4;
    let hmac_key = STANDARD
        .decode(&seed[..usable])
        .unwrap_or_else(|_| seed.as_bytes().to_vec());

    let mut mac =
        HmacSha512::new_from_slice(&hmac_key).map_err(|e| TicketError(e.to_string()))?;
    mac.update(key.as_bytes());

    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Build a ticket for the current time.
///
/// # Errors
///
/// Returns `TicketError` if the HMAC cannot be keyed.
pub fn make_ticket_now(key: &str) -> Result<String, TicketError> {
    make_ticket(key, chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_is_deterministic_per_timestamp() {
        let a = make_ticket(DEFAULT_TICKET_KEY, 1_676_965_262_139).unwrap();
        let b = make_ticket(DEFAULT_TICKET_KEY, 1_676_965_262_139).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ticket_is_base64_sha512() {
        let ticket = make_ticket(DEFAULT_TICKET_KEY, 1_676_965_262_139).unwrap();
        let raw = STANDARD.decode(&ticket).unwrap();
        assert_eq!(raw.len(), 64);
    }

    #[test]
    fn ticket_changes_with_key_material() {
        let a = make_ticket(DEFAULT_TICKET_KEY, 1_676_965_262_139).unwrap();
        let b = make_ticket("OTHER", 1_676_965_262_139).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn ticket_now_succeeds() {
        assert!(!make_ticket_now(DEFAULT_TICKET_KEY).unwrap().is_empty());
    }
}
