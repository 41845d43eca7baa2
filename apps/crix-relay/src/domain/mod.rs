//! Domain Layer - Canonical ticker types and change detection.
//!
//! This layer contains the core domain types for the relay with no
//! network dependencies. All types here are pure Rust with
//! serialization support.

/// Canonical ticker record and raw price events.
pub mod ticker;

/// Last-emitted price per currency, used for change detection.
pub mod price_table;

/// Immutable subscribe frames replayed on every feed connect.
pub mod subscription;
