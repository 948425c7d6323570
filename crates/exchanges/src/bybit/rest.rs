//! Bybit v5 REST snapshots for linear contracts

use super::config::BybitConfig;
use super::converters::{order_from_row, position_from_row};
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
use tracing::{debug, info, warn};

const OPEN_ORDERS: &str = "/v5/order/realtime";
const POSITIONS: &str = "/v5/position/list";
const PAGE_LIMIT: &str = "50";
/// Guard against a cursor that never ends
const MAX_PAGES: usize = 100;

pub struct BybitRest {
    config: BybitConfig,
    credentials: Credentials,
    http: MonoioHttpsClient,
}

impl BybitRest {
    pub fn new(config: BybitConfig) -> Result<Self> {
        let credentials = config.credentials()?;
        let http = MonoioHttpsClient::new(config.timeout_ms);

        info!("🔗 Bybit v5 REST client created");
        info!("   Base URL: {}", config.rest_url);

        Ok(Self {
            config,
            credentials,
            http,
        })
    }

    pub fn config(&self) -> &BybitConfig {
        &self.config
    }

    /// `X-BAPI-SIGN` = hex(HMAC(timestamp + key + recvWindow + query))
    pub fn sign_get(&self, timestamp: u64, query: &str) -> Result<String> {
        self.credentials.sign(&format!(
            "{}{}{}{}",
            timestamp, self.credentials.api_key, self.config.recv_window_ms, query
        ))
    }

    async fn signed_get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let timer = PerfTimer::start("bybit_signed_get");

        let query = build_query_string(params);
        let timestamp = millis();
        let signature = self.sign_get(timestamp, &query)?;
        let timestamp = timestamp.to_string();
        let recv_window = self.config.recv_window_ms.to_string();
        let url = format!("{}{}?{}", self.config.rest_url, endpoint, query);

        debug!("📡 GET {} (signed)", endpoint);
        let headers = [
            ("X-BAPI-API-KEY", self.credentials.api_key.as_str()),
            ("X-BAPI-TIMESTAMP", timestamp.as_str()),
            ("X-BAPI-RECV-WINDOW", recv_window.as_str()),
            ("X-BAPI-SIGN", signature.as_str()),
        ];
        let response = self.http.get(&url, &headers).await?;

        timer.log_elapsed();
        parse_response(response)
    }

    /// Every row of a cursor-paginated linear listing
    async fn list_all(&self, endpoint: &str) -> Result<Vec<Value>> {
        collect_pages(endpoint, |cursor| async move {
            let mut params = vec![
                ("category", "linear".to_string()),
                ("settleCoin", self.config.settle_coin.clone()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor));
            }
            self.signed_get(endpoint, &params).await
        })
        .await
    }
}

/// Follow `nextPageCursor` until it comes back empty. A listing still
/// paging after `MAX_PAGES` is an error, never a partial snapshot.
async fn collect_pages<F, Fut>(endpoint: &str, mut fetch: F) -> Result<Vec<Value>>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<Value>>,
{
    let mut rows = Vec::new();
    let mut cursor = String::new();

    for _ in 0..MAX_PAGES {
        let result = fetch(cursor).await?;
        if let Some(page) = result["list"].as_array() {
            rows.extend(page.iter().cloned());
        }

        cursor = result["nextPageCursor"].as_str().unwrap_or_default().to_string();
        if cursor.is_empty() {
            return Ok(rows);
        }
    }

    warn!("⚠️  {} still paging after {} pages, giving up", endpoint, MAX_PAGES);
    Err(ExchangeError::InvalidResponse(format!(
        "{endpoint} pagination exceeded {MAX_PAGES} pages"
    )))
}

/// Unwrap `{retCode, retMsg, result}`
pub fn parse_response(response: HttpResponse) -> Result<Value> {
    if !response.is_success() {
        return Err(ExchangeError::HttpError(response.status, response.body));
    }
    let mut body: Value = serde_json::from_str(&response.body)?;
    let code = body["retCode"]
        .as_i64()
        .ok_or_else(|| ExchangeError::InvalidResponse("missing retCode".to_string()))?;
    if code != 0 {
        return Err(ExchangeError::ApiError {
            code,
            message: body["retMsg"].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(body["result"].take())
}

#[async_trait(?Send)]
impl SnapshotProvider for BybitRest {
    async fn get_open_orders(&self) -> Result<Vec<CanonicalOrder>> {
        let rows = self.list_all(OPEN_ORDERS).await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn get_open_positions(&self) -> Result<Vec<CanonicalPosition>> {
        let rows = self.list_all(POSITIONS).await?;
        let mut positions = Vec::new();
        for row in &rows {
            let position = position_from_row(row)?;
            if position.is_in_position() {
                positions.push(position);
            }
        }
        Ok(positions)
    }
}

/// The private socket authenticates itself; nothing to keep alive over REST
#[async_trait(?Send)]
impl UserStreamProvider for BybitRest {
    async fn user_channel_spec(&self) -> Result<ChannelSpec> {
        user_channel(&self.config)
    }
}
