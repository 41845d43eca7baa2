//! Exchange Registry
//!
//! Maps exchange names to factories. Lookups are case-insensitive and the
//! relay builds exactly one exchange from the configured name at startup.

use std::collections::BTreeMap;

use crate::application::ports::{Exchange, ExchangeError};
use crate::infrastructure::config::RelayConfig;
use crate::infrastructure::upbit::{EXCHANGE_NAME as UPBIT, UpbitExchange};

/// Builds an exchange from the relay configuration.
pub type ExchangeFactory =
    Box<dyn Fn(&RelayConfig) -> Result<Box<dyn Exchange>, ExchangeError> + Send + Sync>;

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No factory is registered under the name.
    #[error("unknown exchange {name}; available: {available}")]
    Unknown {
        /// Requested name.
        name: String,
        /// Comma-separated registered names.
        available: String,
    },

    /// The factory failed.
    #[error("failed to build exchange {name}: {source}")]
    Build {
        /// Requested name.
        name: String,
        /// Factory error.
        #[source]
        source: ExchangeError,
    },
}

/// Name → factory map.
#[derive(Default)]
pub struct ExchangeRegistry {
    factories: BTreeMap<String, ExchangeFactory>,
}

impl ExchangeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in exchange.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(UPBIT, |config| {
            Ok(Box::new(UpbitExchange::new(config.upbit.clone())?) as Box<dyn Exchange>)
        });
        registry
    }

    /// Register a factory, replacing any factory with the same name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&RelayConfig) -> Result<Box<dyn Exchange>, ExchangeError> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_uppercase(), Box::new(factory));
    }

    /// Whether a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_uppercase())
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the exchange registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unknown` for an unregistered name and
    /// `RegistryError::Build` if the factory fails.
    pub fn build(&self, name: &str, config: &RelayConfig) -> Result<Box<dyn Exchange>, RegistryError> {
        let key = name.to_ascii_uppercase();
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| RegistryError::Unknown {
                name: name.to_string(),
                available: self.names().join(","),
            })?;

        factory(config).map_err(|source| RegistryError::Build { name: key, source })
    }
}

impl std::fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("exchanges", &self.names())
            .finish()
    }
}
