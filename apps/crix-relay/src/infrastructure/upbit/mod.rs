//! Upbit Adapters
//!
//! Integration with the Upbit KRW market:
//!
//! - **messages**: serde models for WebSocket and REST payloads
//! - **codec**: ticker frame decoder
//! - **rest**: market listing and snapshot loader
//! - **signature**: subscribe ticket signer
//! - **exchange**: the `Exchange` implementation tying them together

pub mod codec;
pub mod exchange;
pub mod messages;
pub mod rest;
pub mod signature;

pub use codec::UpbitDecoder;
pub use exchange::{DEFAULT_WS_URL, EXCHANGE_NAME, QUOTE_PREFIX, UpbitConfig, UpbitExchange};
pub use messages::{SubscribeRequest, UpbitMarket, UpbitStreamEvent, UpbitTickerEvent};
pub use rest::{DEFAULT_REST_URL, MarketSet, RestError, UpbitRestClient};
pub use signature::{DEFAULT_TICKET_KEY, TicketError, make_ticket, make_ticket_now};
