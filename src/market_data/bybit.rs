// =============================================================================
// Bybit v5 REST Client — public linear-futures market data
// =============================================================================
//
// Unauthenticated GETs only:
//   /v5/market/tickers?category=linear&symbol=<S>
//   /v5/market/kline?category=linear&symbol=<S>&interval=<m>&limit=<n>
//
// Both wrap their payload in `{ retCode, retMsg, result: { list: [...] } }`.
// Kline rows are `[start, open, high, low, close, volume, turnover]`, all
// strings, newest first.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{Candle, Endpoint, KlineSeries, MarketDataError, MarketDataSource, Ticker};
use crate::types::Symbol;

/// Public Bybit REST client.
#[derive(Clone)]
pub struct BybitClient {
    base_url: String,
    client: reqwest::Client,
}

impl BybitClient {
    /// Create a client against `base_url` (e.g. `https://api.bybit.com`).
    /// Every request is cancelled after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client for BybitClient")?;

        debug!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "BybitClient initialised");

        Ok(Self { base_url, client })
    }

    /// Issue one GET and return the decoded JSON body, mapping transport and
    /// status failures to `DataUnavailable`.
    async fn get_json(
        &self,
        endpoint: Endpoint,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, MarketDataError> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self.client.get(&url).query(query).send().await.map_err(|e| {
            let detail = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            };
            MarketDataError::unavailable(endpoint, detail)
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MarketDataError::unavailable(endpoint, format!("HTTP {status}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| MarketDataError::malformed(endpoint, format!("invalid JSON body: {e}")))?;

        check_ret_code(endpoint, &body)?;
        Ok(body)
    }
}

#[async_trait]
impl MarketDataSource for BybitClient {
    #[instrument(skip(self), name = "bybit::fetch_ticker")]
    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Ticker, MarketDataError> {
        let query = [
            ("category", "linear".to_string()),
            ("symbol", symbol.to_string()),
        ];
        let body = self
            .get_json(Endpoint::Ticker, "/v5/market/tickers", &query)
            .await?;
        let ticker = parse_ticker(symbol, &body)?;
        debug!(symbol = %symbol, last_price = ticker.last_price, "ticker fetched");
        Ok(ticker)
    }

    #[instrument(skip(self), name = "bybit::fetch_klines")]
    async fn fetch_klines(
        &self,
        symbol: &Symbol,
        interval_minutes: u32,
        limit: u32,
    ) -> Result<KlineSeries, MarketDataError> {
        let query = [
            ("category", "linear".to_string()),
            ("symbol", symbol.to_string()),
            ("interval", interval_minutes.to_string()),
            ("limit", limit.to_string()),
        ];
        let body = self
            .get_json(Endpoint::Klines, "/v5/market/kline", &query)
            .await?;
        let candles = parse_klines(&body)?;
        debug!(symbol = %symbol, interval_minutes, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

// =============================================================================
// Envelope parsing
// =============================================================================

/// Bybit signals logical failures (unknown symbol, bad params) with HTTP 200
/// and a non-zero `retCode`.
fn check_ret_code(endpoint: Endpoint, body: &Value) -> Result<(), MarketDataError> {
    match body.get("retCode").and_then(Value::as_i64) {
        Some(0) | None => Ok(()),
        Some(code) => {
            let msg = body.get("retMsg").and_then(Value::as_str).unwrap_or("");
            Err(MarketDataError::unavailable(
                endpoint,
                format!("retCode {code}: {msg}"),
            ))
        }
    }
}

fn result_list(endpoint: Endpoint, body: &Value) -> Result<&Vec<Value>, MarketDataError> {
    let list = body
        .pointer("/result/list")
        .and_then(Value::as_array)
        .ok_or_else(|| MarketDataError::malformed(endpoint, "missing result.list"))?;
    if list.is_empty() {
        return Err(MarketDataError::malformed(endpoint, "empty result.list"));
    }
    Ok(list)
}

/// Parse the first entry of a tickers response.
pub fn parse_ticker(symbol: &Symbol, body: &Value) -> Result<Ticker, MarketDataError> {
    let endpoint = Endpoint::Ticker;
    let item = &result_list(endpoint, body)?[0];

    let last_price = parse_string_f64(endpoint, &item["lastPrice"], "lastPrice")?;
    let mark_price = match item.get("markPrice") {
        Some(v) if !is_blank(v) => parse_string_f64(endpoint, v, "markPrice")?,
        _ => last_price,
    };
    let change_frac = optional_f64(endpoint, item.get("price24hPcnt"), "price24hPcnt")?;
    let turnover_24h = optional_f64(endpoint, item.get("turnover24h"), "turnover24h")?;

    for (name, price) in [("lastPrice", last_price), ("markPrice", mark_price)] {
        if !(price.is_finite() && price > 0.0) {
            return Err(MarketDataError::malformed(
                endpoint,
                format!("{name} must be positive, got {price}"),
            ));
        }
    }

    Ok(Ticker {
        symbol: symbol.clone(),
        last_price,
        mark_price,
        change_24h_pct: change_frac * 100.0,
        turnover_24h,
    })
}

/// Parse a kline response into an oldest-first series.
pub fn parse_klines(body: &Value) -> Result<KlineSeries, MarketDataError> {
    let endpoint = Endpoint::Klines;
    let rows = result_list(endpoint, body)?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let arr = row
            .as_array()
            .ok_or_else(|| MarketDataError::malformed(endpoint, "kline row is not an array"))?;
        if arr.len() < 5 {
            return Err(MarketDataError::malformed(
                endpoint,
                format!("kline row has {} columns, expected at least 5", arr.len()),
            ));
        }

        let start_ms = parse_string_f64(endpoint, &arr[0], "start")? as i64;
        let candle = Candle {
            start_ms,
            open: parse_string_f64(endpoint, &arr[1], "open")?,
            high: parse_string_f64(endpoint, &arr[2], "high")?,
            low: parse_string_f64(endpoint, &arr[3], "low")?,
            close: parse_string_f64(endpoint, &arr[4], "close")?,
        };
        if !candle.is_well_formed() {
            return Err(MarketDataError::malformed(
                endpoint,
                format!("inconsistent OHLC at start {start_ms}"),
            ));
        }
        candles.push(candle);
    }

    // Provider order is newest first.
    candles.reverse();
    Ok(candles)
}

fn is_blank(val: &Value) -> bool {
    match val {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn optional_f64(endpoint: Endpoint, val: Option<&Value>, name: &str) -> Result<f64, MarketDataError> {
    match val {
        Some(v) if !is_blank(v) => parse_string_f64(endpoint, v, name),
        _ => Ok(0.0),
    }
}

/// Bybit sends numeric values as JSON strings.
fn parse_string_f64(endpoint: Endpoint, val: &Value, name: &str) -> Result<f64, MarketDataError> {
    let parsed = match val {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(MarketDataError::malformed(
            endpoint,
            format!("field {name} is not a number: {val}"),
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn ticker_body() -> Value {
        json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "linear",
                "list": [{
                    "symbol": "BTCUSDT",
                    "lastPrice": "64000.50",
                    "markPrice": "64001.00",
                    "price24hPcnt": "-0.0125",
                    "turnover24h": "1234567.8"
                }]
            }
        })
    }

    #[test]
    fn parses_ticker_fields() {
        let t = parse_ticker(&sym("BTCUSDT"), &ticker_body()).unwrap();
        assert_eq!(t.symbol.as_str(), "BTCUSDT");
        assert!((t.last_price - 64000.5).abs() < 1e-9);
        assert!((t.mark_price - 64001.0).abs() < 1e-9);
        assert!((t.change_24h_pct - -1.25).abs() < 1e-9);
        assert!((t.turnover_24h - 1234567.8).abs() < 1e-6);
    }

    #[test]
    fn mark_price_falls_back_to_last_price() {
        let body = json!({ "result": { "list": [{ "lastPrice": "2.5", "markPrice": "" }] } });
        let t = parse_ticker(&sym("XRPUSDT"), &body).unwrap();
        assert_eq!(t.mark_price, 2.5);
        assert_eq!(t.change_24h_pct, 0.0);
        assert_eq!(t.turnover_24h, 0.0);
    }

    #[test]
    fn empty_ticker_list_is_malformed() {
        let body = json!({ "retCode": 0, "result": { "list": [] } });
        let err = parse_ticker(&sym("BTCUSDT"), &body).unwrap_err();
        assert!(matches!(err, MarketDataError::MalformedResponse { .. }));
    }

    #[test]
    fn non_positive_price_is_malformed() {
        let body = json!({ "result": { "list": [{ "lastPrice": "0" }] } });
        assert!(matches!(
            parse_ticker(&sym("BTCUSDT"), &body),
            Err(MarketDataError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn unparsable_price_is_malformed() {
        let body = json!({ "result": { "list": [{ "lastPrice": "abc" }] } });
        assert!(matches!(
            parse_ticker(&sym("BTCUSDT"), &body),
            Err(MarketDataError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn klines_are_reversed_to_oldest_first() {
        let body = json!({
            "retCode": 0,
            "result": { "list": [
                ["1700000600000", "102", "104", "101", "103", "10", "1000"],
                ["1700000300000", "101", "103", "100", "102", "10", "1000"],
                ["1700000000000", "100", "102", "99", "101", "10", "1000"]
            ]}
        });
        let candles = parse_klines(&body).unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].start_ms, 1_700_000_000_000);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[2].close, 103.0);
        assert!(candles.windows(2).all(|w| w[0].start_ms < w[1].start_ms));
    }

    #[test]
    fn short_kline_row_is_malformed() {
        let body = json!({ "result": { "list": [["1700000000000", "1", "2"]] } });
        assert!(matches!(
            parse_klines(&body),
            Err(MarketDataError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn inconsistent_ohlc_is_malformed() {
        let body = json!({ "result": { "list": [["0", "100", "99", "98", "100.5"]] } });
        assert!(matches!(
            parse_klines(&body),
            Err(MarketDataError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn nonzero_ret_code_is_unavailable() {
        let body = json!({ "retCode": 10001, "retMsg": "Not supported symbols", "result": {} });
        let err = check_ret_code(Endpoint::Ticker, &body).unwrap_err();
        assert_eq!(err.to_string(), "Ticker fetch failed");
        assert!(err.detail().contains("10001"));
    }

    #[tokio::test]
    async fn http_404_maps_to_ticker_fetch_failed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/market/tickers")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("category".into(), "linear".into()),
                Matcher::UrlEncoded("symbol".into(), "ZZZUSDT".into()),
            ]))
            .with_status(404)
            .create_async()
            .await;

        let client = BybitClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let err = client.fetch_ticker(&sym("ZZZUSDT")).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, MarketDataError::DataUnavailable { endpoint: Endpoint::Ticker, .. }));
        assert_eq!(err.to_string(), "Ticker fetch failed");
    }

    #[tokio::test]
    async fn fetch_klines_sends_interval_and_limit() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({
            "retCode": 0,
            "result": { "list": [
                ["1700000300000", "101", "103", "100", "102", "10", "1000"],
                ["1700000000000", "100", "102", "99", "101", "10", "1000"]
            ]}
        });
        let mock = server
            .mock("GET", "/v5/market/kline")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("category".into(), "linear".into()),
                Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "5".into()),
                Matcher::UrlEncoded("limit".into(), "30".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = BybitClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let candles = client.fetch_klines(&sym("ETHUSDT"), 5, 30).await.unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].close, 102.0);
    }

    #[tokio::test]
    async fn kline_server_error_maps_to_klines_fetch_failed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/market/kline")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(500)
            .create_async()
            .await;

        let client = BybitClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let err = client.fetch_klines(&sym("BTCUSDT"), 5, 30).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, MarketDataError::DataUnavailable { endpoint: Endpoint::Klines, .. }));
        assert_eq!(err.to_string(), "Klines fetch failed");
        assert!(err.detail().contains("500"));
    }

    #[tokio::test]
    async fn kline_ret_code_error_maps_to_klines_fetch_failed() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({ "retCode": 10001, "retMsg": "params error: symbol invalid", "result": {} });
        let mock = server
            .mock("GET", "/v5/market/kline")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = BybitClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let err = client.fetch_klines(&sym("BTCUSDT"), 5, 30).await.unwrap_err();

        mock.assert_async().await;
        assert_eq!(err.to_string(), "Klines fetch failed");
        assert!(err.detail().contains("10001"));
    }
}
