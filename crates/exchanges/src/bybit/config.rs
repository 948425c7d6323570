//! Bybit v5 linear configuration

use crate::auth::Credentials;
use crate::errors::{ExchangeError, Result};
use crate::types::PositionMode;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitConfig {
    pub api_key: String,
    pub api_secret: String,
    pub rest_url: String,
    pub ws_public_url: String,
    pub ws_private_url: String,
    pub testnet: bool,
    pub timeout_ms: u64,
    pub recv_window_ms: u64,
    pub position_mode: PositionMode,
    /// Settlement coin used to list every linear position/order at once
    pub settle_coin: String,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            rest_url: "https://api.bybit.com".to_string(),
            ws_public_url: "wss://stream.bybit.com/v5/public/linear".to_string(),
            ws_private_url: "wss://stream.bybit.com/v5/private".to_string(),
            testnet: false,
            timeout_ms: 5_000,
            recv_window_ms: 5_000,
            position_mode: PositionMode::OneWay,
            settle_coin: "USDT".to_string(),
        }
    }
}

impl BybitConfig {
    pub fn testnet() -> Self {
        Self {
            rest_url: "https://api-testnet.bybit.com".to_string(),
            ws_public_url: "wss://stream-testnet.bybit.com/v5/public/linear".to_string(),
            ws_private_url: "wss://stream-testnet.bybit.com/v5/private".to_string(),
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

    /// Read `BYBIT_API_KEY` / `BYBIT_SECRET_KEY`
    pub fn with_env_credentials(mut self) -> Result<Self> {
        let creds = Credentials::from_env("BYBIT_API_KEY", "BYBIT_SECRET_KEY")?;
        self.api_key = creds.api_key;
        self.api_secret = creds.secret_key;
        Ok(self)
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let creds = Credentials::new(self.api_key.clone(), self.api_secret.clone());
        if !creds.is_valid() {
            return Err(ExchangeError::MissingCredentials(
                "Bybit API key and secret are required".to_string(),
            ));
        }
        Ok(creds)
    }
}
