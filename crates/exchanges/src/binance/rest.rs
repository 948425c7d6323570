//! Binance futures REST snapshots and listen-key management

use super::config::BinanceConfig;
use super::converters::{order_from_rest, position_from_rest};
use super::streams::user_channel;
use crate::auth::{build_query_string, Credentials};
use crate::errors::{ExchangeError, Result};
use crate::http::{HttpResponse, MonoioHttpsClient};
use crate::traits::{SnapshotProvider, UserStreamProvider};
use crate::transport::ChannelSpec;
use crate::types::{CanonicalOrder, CanonicalPosition};
use omnisync_core::prelude::*;

use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::time::Duration;
use tracing::{debug, info};

const OPEN_ORDERS: &str = "/fapi/v1/openOrders";
const POSITION_RISK: &str = "/fapi/v2/positionRisk";
const LISTEN_KEY: &str = "/fapi/v1/listenKey";

/// Signed REST access to one Binance futures account
pub struct BinanceFuturesRest {
    config: BinanceConfig,
    credentials: Credentials,
    http: MonoioHttpsClient,
    listen_key: RefCell<Option<String>>,
}

impl BinanceFuturesRest {
    pub fn new(config: BinanceConfig) -> Result<Self> {
        let credentials = config.credentials()?;
        let http = MonoioHttpsClient::new(config.timeout_ms);

        info!("🔗 Binance futures REST client created");
        info!("   Base URL: {}", config.rest_url);

        Ok(Self {
            config,
            credentials,
            http,
            listen_key: RefCell::new(None),
        })
    }

    pub fn config(&self) -> &BinanceConfig {
        &self.config
    }

    /// Listen key currently backing the user channel, if one was created
    pub fn listen_key(&self) -> Option<String> {
        self.listen_key.borrow().clone()
    }

    /// Raw `openOrders` rows
    pub async fn open_orders(&self, symbol: Option<&str>) -> Result<Value> {
        let mut params = Vec::new();
        if let Some(symbol) = symbol {
            params.push(("symbol", symbol.to_string()));
        }
        self.signed_request("GET", OPEN_ORDERS, params).await
    }

    /// Raw `positionRisk` rows, including flat ones
    pub async fn position_risk(&self) -> Result<Value> {
        self.signed_request("GET", POSITION_RISK, Vec::new()).await
    }

    pub async fn create_listen_key(&self) -> Result<String> {
        let timer = PerfTimer::start("binance_create_listen_key");
        let response = self.keyed_request("POST", LISTEN_KEY).await?;
        let listen_key = response["listenKey"]
            .as_str()
            .ok_or_else(|| ExchangeError::InvalidResponse("No listen key in response".to_string()))?
            .to_string();
        timer.log_elapsed();
        info!("🔑 Listen key created for user data stream");
        *self.listen_key.borrow_mut() = Some(listen_key.clone());
        Ok(listen_key)
    }

    /// Extends the current key's validity by 60 minutes
    pub async fn keepalive_listen_key(&self) -> Result<()> {
        let _timer = PerfTimer::start("binance_keepalive_listen_key");
        self.keyed_request("PUT", LISTEN_KEY).await?;
        info!("🔄 Listen key keepalive sent");
        Ok(())
    }

    pub async fn close_listen_key(&self) -> Result<()> {
        self.keyed_request("DELETE", LISTEN_KEY).await?;
        self.listen_key.borrow_mut().take();
        info!("🔒 Listen key closed");
        Ok(())
    }

    /// Timestamped, HMAC-signed request
    async fn signed_request(&self, method: &str, endpoint: &str, mut params: Vec<(&str, String)>) -> Result<Value> {
        let timer = PerfTimer::start("binance_signed_request");

        params.push(("timestamp", millis().to_string()));
        params.push(("recvWindow", self.config.recv_window_ms.to_string()));
        let query = build_query_string(&params);
        let signature = self.credentials.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.config.rest_url, endpoint, query, signature);

        debug!("📡 {} {} (signed)", method, endpoint);
        let headers = [("X-MBX-APIKEY", self.credentials.api_key.as_str())];
        let response = self.http.request(method, &url, None, &headers).await?;

        timer.log_elapsed();
        parse_response(response)
    }

    /// Listen-key endpoints take the API key header only
    async fn keyed_request(&self, method: &str, endpoint: &str) -> Result<Value> {
        let url = format!("{}{}", self.config.rest_url, endpoint);
        let headers = [("X-MBX-APIKEY", self.credentials.api_key.as_str())];
        let response = self.http.request(method, &url, None, &headers).await?;
        parse_response(response)
    }
}

/// Map non-2xx replies to `ApiError` when the body carries `{code, msg}`
pub fn parse_response(response: HttpResponse) -> Result<Value> {
    if !response.is_success() {
        if let Ok(body) = serde_json::from_str::<Value>(&response.body) {
            if let (Some(code), Some(msg)) = (body["code"].as_i64(), body["msg"].as_str()) {
                return Err(ExchangeError::ApiError {
                    code,
                    message: msg.to_string(),
                });
            }
        }
        return Err(ExchangeError::HttpError(response.status, response.body));
    }

    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&response.body)?)
}

/// Rows of a top-level JSON array
pub(crate) fn rows<'a>(v: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    v.as_array()
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("{what}: expected an array")))
}

#[async_trait(?Send)]
impl SnapshotProvider for BinanceFuturesRest {
    async fn get_open_orders(&self) -> Result<Vec<CanonicalOrder>> {
        let response = self.open_orders(None).await?;
        rows(&response, "openOrders")?.iter().map(order_from_rest).collect()
    }

    async fn get_open_positions(&self) -> Result<Vec<CanonicalPosition>> {
        let response = self.position_risk().await?;
        let mut positions = Vec::new();
        for row in rows(&response, "positionRisk")? {
            let position = position_from_rest(row)?;
            if position.is_in_position() {
                positions.push(position);
            }
        }
        Ok(positions)
    }
}

#[async_trait(?Send)]
impl UserStreamProvider for BinanceFuturesRest {
    /// Binance returns the active key if one exists, or a fresh one after expiry
    async fn user_channel_spec(&self) -> Result<ChannelSpec> {
        let listen_key = self.create_listen_key().await?;
        user_channel(&self.config, &listen_key)
    }

    fn keepalive_interval(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.config.listen_key_keepalive_ms))
    }

    async fn keepalive(&self) -> Result<()> {
        self.keepalive_listen_key().await
    }
}
