//! Binance spot REST client
//!
//! Thin client over the public market-data endpoints plus the signed
//! order/account endpoints. Signed requests follow the exchange rules:
//! the query string (including `timestamp` and `recvWindow`) is signed
//! with HMAC-SHA256 and the key travels in the `X-MBX-APIKEY` header.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Url};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::error::{Error, Result};
use crate::exchange::types::{
    AccountBalances, Candle, OrderReceipt, OrderRequest, OrderType,
};
use crate::exchange::{MarketData, TradingApi};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Public data host used as a read-only fallback when the configured
/// endpoint (e.g. a testnet) cannot serve a price.
const PUBLIC_DATA_URL: &str = "https://api.binance.com";

/// REST client for Binance spot. Cheap to clone; the inner `reqwest`
/// client is shared.
#[derive(Clone)]
pub struct BinanceClient {
    http: Client,
    base_url: Url,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    status: String,
    executed_qty: String,
    // The exchange really does spell it with the double "m".
    cummulative_quote_qty: String,
    transact_time: i64,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
    locked: String,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build http client: {}", e)))?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid exchange.base_url: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            quote_asset: config.quote_asset.clone(),
        })
    }

    /// Connectivity probe against the unauthenticated ping endpoint.
    pub async fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/v3/ping")
            .map_err(|e| Error::Internal(e.to_string()))?;
        let res = self.http.get(url).send().await?;
        if !res.status().is_success() {
            return Err(Error::Exchange(format!(
                "ping failed with status {}",
                res.status()
            )));
        }
        Ok(())
    }

    /// Append `timestamp` and `recvWindow`, urlencode, sign with
    /// HMAC-SHA256 and return `query&signature=hex`.
    fn sign_params(&self, mut params: Vec<(String, String)>) -> Result<String> {
        if self.api_secret.is_empty() {
            return Err(Error::Config(
                "exchange.api_secret is required for signed requests".into(),
            ));
        }

        let timestamp = Utc::now().timestamp_millis();
        params.push(("timestamp".into(), timestamp.to_string()));
        if self.recv_window_ms > 0 {
            params.push(("recvWindow".into(), self.recv_window_ms.to_string()));
        }
        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| Error::Internal(format!("failed to encode query: {}", e)))?;
        let signature = hmac_hex(&self.api_secret, &query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn ticker_price(&self, base: &Url, symbol: &str) -> Result<f64> {
        let mut url = base
            .join("/api/v3/ticker/price")
            .map_err(|e| Error::Internal(e.to_string()))?;
        url.query_pairs_mut().append_pair("symbol", symbol);

        let res = self.http.get(url).send().await?;
        if !res.status().is_success() {
            return Err(Error::data_unavailable(
                symbol,
                format!("ticker request failed: {}", res.text().await.unwrap_or_default()),
            ));
        }

        let ticker: TickerPrice = res.json().await?;
        ticker
            .price
            .parse::<f64>()
            .map_err(|e| Error::data_unavailable(symbol, format!("unparseable price: {}", e)))
    }
}

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
fn hmac_hex(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Internal(format!("failed to init signer: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Decode one kline row. Rows are positional arrays with string prices:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
fn parse_kline(row: &serde_json::Value) -> Option<Candle> {
    let arr = row.as_array()?;
    if arr.len() < 7 {
        return None;
    }
    let open_time = DateTime::from_timestamp_millis(arr[0].as_i64()?)?;
    let close_time = DateTime::from_timestamp_millis(arr[6].as_i64()?)?;

    Some(Candle {
        open_time,
        open: arr[1].as_str()?.parse().ok()?,
        high: arr[2].as_str()?.parse().ok()?,
        low: arr[3].as_str()?.parse().ok()?,
        close: arr[4].as_str()?.parse().ok()?,
        volume: arr[5].as_str()?.parse().ok()?,
        close_time,
    })
}

fn receipt_from_response(request: &OrderRequest, resp: OrderResponse) -> OrderReceipt {
    let executed_quantity: f64 = resp.executed_qty.parse().unwrap_or(0.0);
    let quote_spent: f64 = resp.cummulative_quote_qty.parse().unwrap_or(0.0);
    let price = if executed_quantity > 0.0 {
        quote_spent / executed_quantity
    } else {
        request.price.unwrap_or(0.0)
    };

    OrderReceipt {
        order_id: resp.order_id.to_string(),
        symbol: resp.symbol,
        side: request.side,
        executed_quantity,
        price,
        status: resp.status,
        timestamp: DateTime::from_timestamp_millis(resp.transact_time).unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn get_candles(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let mut url = self
            .base_url
            .join("/api/v3/klines")
            .map_err(|e| Error::Internal(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("symbol", symbol)
            .append_pair("interval", interval)
            .append_pair("limit", &limit.to_string());

        let res = self.http.get(url).send().await?;
        if !res.status().is_success() {
            return Err(Error::data_unavailable(
                symbol,
                format!("klines request failed: {}", res.text().await.unwrap_or_default()),
            ));
        }

        let raw: Vec<serde_json::Value> = res.json().await?;
        let candles: Vec<Candle> = raw.iter().filter_map(parse_kline).collect();
        debug!("Fetched {} candles for {} @ {}", candles.len(), symbol, interval);
        Ok(candles)
    }

    async fn get_current_price(&self, symbol: &str) -> Result<f64> {
        match self.ticker_price(&self.base_url, symbol).await {
            Ok(price) => Ok(price),
            Err(e) if self.base_url.as_str().trim_end_matches('/') != PUBLIC_DATA_URL => {
                warn!(
                    "Price lookup for {} failed on configured endpoint ({}), retrying public host",
                    symbol, e
                );
                let public = Url::parse(PUBLIC_DATA_URL)
                    .map_err(|e| Error::Internal(e.to_string()))?;
                self.ticker_price(&public, symbol).await
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl TradingApi for BinanceClient {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        let mut params = vec![
            ("symbol".to_string(), request.symbol.clone()),
            ("side".to_string(), request.side.to_string()),
            ("type".to_string(), request.order_type.to_string()),
            // Rounded to the exchange's maximum precision.
            ("quantity".to_string(), format!("{:.8}", request.quantity)),
        ];
        if request.order_type == OrderType::Limit {
            let price = request.price.ok_or_else(|| Error::ExecutionFailed {
                symbol: request.symbol.clone(),
                reason: "limit order without a price".into(),
            })?;
            params.push(("price".to_string(), format!("{:.8}", price)));
            params.push(("timeInForce".to_string(), "GTC".to_string()));
        }

        let body = self.sign_params(params)?;
        let url = self
            .base_url
            .join("/api/v3/order")
            .map_err(|e| Error::Internal(e.to_string()))?;

        let res = self
            .http
            .post(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Error::ExecutionFailed {
                symbol: request.symbol.clone(),
                reason: res.text().await.unwrap_or_default(),
            });
        }

        let resp: OrderResponse = res.json().await?;
        Ok(receipt_from_response(request, resp))
    }

    async fn get_account_balances(&self) -> Result<AccountBalances> {
        let query = self.sign_params(Vec::new())?;
        let mut url = self
            .base_url
            .join("/api/v3/account")
            .map_err(|e| Error::Internal(e.to_string()))?;
        url.set_query(Some(&query));

        let res = self
            .http
            .get(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Error::Exchange(format!(
                "account request failed: {}",
                res.text().await.unwrap_or_default()
            )));
        }

        let account: AccountResponse = res.json().await?;
        let quote = account
            .balances
            .iter()
            .find(|b| b.asset == self.quote_asset)
            .ok_or_else(|| {
                Error::Exchange(format!("no {} balance in account response", self.quote_asset))
            })?;

        let free: f64 = quote.free.parse().unwrap_or(0.0);
        let locked: f64 = quote.locked.parse().unwrap_or(0.0);
        Ok(AccountBalances {
            available: free,
            total: free + locked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::OrderSide;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = json!([
            1731456000000i64,
            "50000.00",
            "50500.00",
            "49800.00",
            "50250.00",
            "1234.5678",
            1731459599999i64
        ]);
        let candle = parse_kline(&row).unwrap();
        assert_eq!(candle.open, 50_000.0);
        assert_eq!(candle.high, 50_500.0);
        assert_eq!(candle.low, 49_800.0);
        assert_eq!(candle.close, 50_250.0);
        assert_eq!(candle.volume, 1_234.5678);
        assert!(candle.close_time > candle.open_time);
    }

    #[test]
    fn test_parse_kline_rejects_short_rows() {
        assert!(parse_kline(&json!([1731456000000i64, "50000.00"])).is_none());
        assert!(parse_kline(&json!("not an array")).is_none());
    }

    #[test]
    fn test_parse_kline_rejects_numeric_prices() {
        // Prices arrive as strings; a numeric row means a schema change.
        let row = json!([1731456000000i64, 50000.0, 50500.0, 49800.0, 50250.0, 1234.0, 1731459599999i64]);
        assert!(parse_kline(&row).is_none());
    }

    #[test]
    fn test_hmac_signature_matches_known_vector() {
        // Documented example vector from the exchange API reference.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let sig = hmac_hex(secret, query).unwrap();
        assert_eq!(
            sig,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_receipt_uses_weighted_fill_price() {
        let request = OrderRequest::market("BTCUSDT", OrderSide::Buy, 0.02);
        let resp = OrderResponse {
            symbol: "BTCUSDT".into(),
            order_id: 42,
            status: "FILLED".into(),
            executed_qty: "0.02000000".into(),
            cummulative_quote_qty: "1000.00000000".into(),
            transact_time: 1731456000000,
        };
        let receipt = receipt_from_response(&request, resp);
        assert_eq!(receipt.order_id, "42");
        assert_eq!(receipt.executed_quantity, 0.02);
        assert_eq!(receipt.price, 50_000.0);
        assert_eq!(receipt.side, OrderSide::Buy);
    }

    #[test]
    fn test_receipt_falls_back_to_request_price_when_unfilled() {
        let mut request = OrderRequest::market("ETHUSDT", OrderSide::Sell, 1.0);
        request.price = Some(2_500.0);
        let resp = OrderResponse {
            symbol: "ETHUSDT".into(),
            order_id: 7,
            status: "EXPIRED".into(),
            executed_qty: "0.00000000".into(),
            cummulative_quote_qty: "0.00000000".into(),
            transact_time: 1731456000000,
        };
        let receipt = receipt_from_response(&request, resp);
        assert_eq!(receipt.executed_quantity, 0.0);
        assert_eq!(receipt.price, 2_500.0);
    }

    #[test]
    fn test_order_response_decoding() {
        let raw = json!({
            "symbol": "BTCUSDT",
            "orderId": 28,
            "orderListId": -1,
            "clientOrderId": "6gCrw2kRUAF9CvJDGP16IP",
            "transactTime": 1507725176595i64,
            "price": "0.00000000",
            "origQty": "10.00000000",
            "executedQty": "10.00000000",
            "cummulativeQuoteQty": "10.00000000",
            "status": "FILLED",
            "timeInForce": "GTC",
            "type": "MARKET",
            "side": "SELL"
        });
        let resp: OrderResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.order_id, 28);
        assert_eq!(resp.status, "FILLED");
        assert_eq!(resp.executed_qty, "10.00000000");
    }
}
