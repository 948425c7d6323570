//! Binance USDⓈ-M futures configuration

use crate::auth::Credentials;
use crate::errors::{ExchangeError, Result};
use crate::types::PositionMode;

use serde::{Deserialize, Serialize};

/// Binance futures endpoints, credentials and account mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    pub api_key: String,
    pub api_secret: String,
    pub rest_url: String,
    /// Combined-stream endpoint for public market data
    pub ws_public_url: String,
    /// Raw-stream base; the listen key is appended as a path segment
    pub ws_private_url: String,
    pub testnet: bool,
    pub timeout_ms: u64,
    pub recv_window_ms: u64,
    pub position_mode: PositionMode,
    /// Listen keys expire after 60 minutes without a keepalive
    pub listen_key_keepalive_ms: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            rest_url: "https://fapi.binance.com".to_string(),
            ws_public_url: "wss://fstream.binance.com/stream".to_string(),
            ws_private_url: "wss://fstream.binance.com/ws".to_string(),
            testnet: false,
            timeout_ms: 5_000,
            recv_window_ms: 5_000,
            position_mode: PositionMode::OneWay,
            listen_key_keepalive_ms: 30 * 60 * 1000,
        }
    }
}

impl BinanceConfig {
    pub fn testnet() -> Self {
        Self {
            rest_url: "https://testnet.binancefuture.com".to_string(),
            ws_public_url: "wss://stream.binancefuture.com/stream".to_string(),
            ws_private_url: "wss://stream.binancefuture.com/ws".to_string(),
            testnet: true,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, api_key: String, api_secret: String) -> Self {
        self.api_key = api_key;
        self.api_secret = api_secret;
        self
    }

    pub fn with_position_mode(mut self, mode: PositionMode) -> Self {
        self.position_mode = mode;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Read `BINANCE_API_KEY` / `BINANCE_SECRET_KEY`
    pub fn with_env_credentials(mut self) -> Result<Self> {
        let creds = Credentials::from_env("BINANCE_API_KEY", "BINANCE_SECRET_KEY")?;
        self.api_key = creds.api_key;
        self.api_secret = creds.secret_key;
        Ok(self)
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let creds = Credentials::new(self.api_key.clone(), self.api_secret.clone());
        if !creds.is_valid() {
            return Err(ExchangeError::MissingCredentials(
                "Binance API key and secret are required".to_string(),
            ));
        }
        Ok(creds)
    }
}
