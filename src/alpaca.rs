//! Thin REST client over Alpaca's trading and market-data APIs, implementing `Broker`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::broker::Broker;
use crate::config::AlpacaCfg;
use crate::symbol;
use crate::types::{
    OptionChain, OptionChainEntry, OptionGreeks, OptionQuote, OrderAck, OrderPlan, TimeInForce,
};
use crate::utils::mask_key;

pub const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
pub const DATA_URL: &str = "https://data.alpaca.markets";

/// Calendar window searched for the previous session.
const CALENDAR_LOOKBACK_DAYS: u64 = 10;
/// Server-side page size cap for option snapshots.
const SNAPSHOT_PAGE_MAX: usize = 1000;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub key_id: String,
    pub secret: String,
}

pub struct AlpacaClient {
    http: reqwest::Client,
    creds: Credentials,
    trading_url: String,
    data_url: String,
    stock_feed: String,
    option_feed: String,
    chain_limit: usize,
    tif: TimeInForce,
    pub is_live: bool,
}

// ---------- Wire types ----------

#[derive(Debug, Deserialize)]
struct RawClock {
    is_open: bool,
}

#[derive(Debug, Deserialize)]
struct RawCalendarDay {
    date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct RawBars {
    #[serde(default)]
    bars: Option<Vec<RawBar>>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    c: f64,
}

#[derive(Debug, Deserialize)]
struct RawLatestQuote {
    quote: RawQuote,
}

#[derive(Debug, Default, Deserialize)]
struct RawQuote {
    #[serde(default)]
    ap: f64,
    #[serde(default)]
    bp: f64,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    non_marginable_buying_power: String,
    #[serde(default)]
    cash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct RawSnapshots {
    #[serde(default)]
    snapshots: Option<HashMap<String, RawSnapshot>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(rename = "latestQuote", default)]
    latest_quote: Option<RawQuote>,
    #[serde(default)]
    greeks: Option<RawGreeks>,
}

#[derive(Debug, Deserialize)]
struct RawGreeks {
    #[serde(default)]
    delta: f64,
    #[serde(default)]
    gamma: f64,
    #[serde(default)]
    theta: f64,
    #[serde(default)]
    vega: f64,
    #[serde(default)]
    rho: f64,
}

impl From<RawSnapshot> for OptionChainEntry {
    fn from(raw: RawSnapshot) -> Self {
        let q = raw.latest_quote.unwrap_or_default();
        OptionChainEntry {
            quote: OptionQuote { bid: q.bp, ask: q.ap },
            greeks: raw.greeks.map(|g| OptionGreeks {
                delta: g.delta,
                gamma: g.gamma,
                theta: g.theta,
                vega: g.vega,
                rho: g.rho,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    symbol: &'a str,
    qty: String,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: TimeInForce,
    limit_price: String,
    order_class: &'static str,
    take_profit: TakeProfit,
}

#[derive(Debug, Serialize)]
struct TakeProfit {
    limit_price: String,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    id: String,
    status: String,
}

impl AlpacaClient {
    pub fn new(creds: Credentials, cfg: &AlpacaCfg, tif: TimeInForce) -> Result<Self> {
        let is_live = cfg.mode == "live";
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_sec))
            .build()
            .context("build alpaca http client")?;

        info!(
            "Alpaca client: key={}, mode={}, stock_feed={}, option_feed={}",
            mask_key(&creds.key_id),
            cfg.mode,
            cfg.stock_feed,
            cfg.option_feed
        );

        Ok(Self {
            http,
            creds,
            trading_url: if is_live {
                LIVE_TRADING_URL
            } else {
                PAPER_TRADING_URL
            }
            .to_string(),
            data_url: DATA_URL.to_string(),
            stock_feed: cfg.stock_feed.clone(),
            option_feed: cfg.option_feed.clone(),
            chain_limit: cfg.chain_limit,
            tif,
            is_live,
        })
    }

    /// Point both APIs somewhere else (tests, proxies).
    pub fn with_base_urls(mut self, trading: impl Into<String>, data: impl Into<String>) -> Self {
        self.trading_url = trading.into();
        self.data_url = data.into();
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", base, path);
        debug!("GET {} {:?}", url, query);
        let resp = self
            .http
            .get(&url)
            .header("APCA-API-KEY-ID", &self.creds.key_id)
            .header("APCA-API-SECRET-KEY", &self.creds.secret)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {}", path))?;
        Self::decode(resp, path).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.trading_url, path);
        debug!("POST {}", url);
        let resp = self
            .http
            .post(&url)
            .header("APCA-API-KEY-ID", &self.creds.key_id)
            .header("APCA-API-SECRET-KEY", &self.creds.secret)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {}", path))?;
        Self::decode(resp, path).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response, path: &str) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{} returned {}: {}", path, status, text);
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("decode response of {}", path))
    }

    // ---------- Calendar ----------

    async fn last_trading_day(&self, today: NaiveDate) -> Result<NaiveDate> {
        let start = today - Days::new(CALENDAR_LOOKBACK_DAYS);
        let days: Vec<RawCalendarDay> = self
            .get(
                &self.trading_url,
                "/v2/calendar",
                &[("start", start.to_string()), ("end", today.to_string())],
            )
            .await
            .context("get calendar")?;
        if days.is_empty() {
            bail!("no calendar data available");
        }
        previous_session(days.iter().map(|d| d.date), today)
            .context("no previous trading day found")
    }

    // ---------- Options ----------

    async fn fetch_chain(&self, underlying: &str, min_expiry: NaiveDate) -> Result<OptionChain> {
        let path = format!("/v1beta1/options/snapshots/{}", underlying);
        let mut chain = OptionChain::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = self.chain_limit.saturating_sub(chain.len());
            if remaining == 0 {
                break;
            }
            let mut query = vec![
                ("type", "call".to_string()),
                ("expiration_date_gte", min_expiry.to_string()),
                ("feed", self.option_feed.clone()),
                ("limit", remaining.min(SNAPSHOT_PAGE_MAX).to_string()),
            ];
            if let Some(tok) = &page_token {
                query.push(("page_token", tok.clone()));
            }

            let page: RawSnapshots = self.get(&self.data_url, &path, &query).await?;
            let before = chain.len();
            for (sym, snap) in page.snapshots.unwrap_or_default() {
                chain.insert(sym, snap.into());
            }
            if chain.len() == before {
                debug!("Snapshot page for {} added nothing new; stopping", underlying);
                break;
            }
            match page.next_page_token {
                Some(tok) if !tok.is_empty() && page_token.as_deref() != Some(tok.as_str()) => {
                    page_token = Some(tok)
                }
                Some(tok) if !tok.is_empty() => {
                    debug!("Snapshot page token {:?} repeated; stopping", tok);
                    break;
                }
                _ => break,
            }
        }
        Ok(chain)
    }
}

/// Most recent session date strictly before `today`.
fn previous_session(days: impl DoubleEndedIterator<Item = NaiveDate>, today: NaiveDate) -> Option<NaiveDate> {
    days.rev().find(|d| *d < today)
}

fn require_ticker(t: &str) -> Result<()> {
    if t.trim().is_empty() {
        bail!("ticker cannot be empty");
    }
    Ok(())
}

#[async_trait]
impl Broker for AlpacaClient {
    async fn is_market_open(&self) -> Result<bool> {
        let clock: RawClock = self
            .get(&self.trading_url, "/v2/clock", &[])
            .await
            .context("get market clock")?;
        Ok(clock.is_open)
    }

    async fn last_close(&self, ticker: &str) -> Result<f64> {
        require_ticker(ticker)?;
        let day = self.last_trading_day(Utc::now().date_naive()).await?;
        info!("Last trading day: {}", day);

        let next = day + Days::new(1);
        let resp: RawBars = self
            .get(
                &self.data_url,
                &format!("/v2/stocks/{}/bars", ticker),
                &[
                    ("timeframe", "1Day".to_string()),
                    ("start", day.to_string()),
                    ("end", next.to_string()),
                    ("feed", self.stock_feed.clone()),
                    ("limit", "1".to_string()),
                ],
            )
            .await
            .with_context(|| format!("get bars for {}", ticker))?;
        let bar = resp
            .bars
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no data found for {} on {}", ticker, day))?;
        Ok(bar.c)
    }

    async fn latest_quote(&self, ticker: &str) -> Result<f64> {
        require_ticker(ticker)?;
        let resp: RawLatestQuote = self
            .get(
                &self.data_url,
                &format!("/v2/stocks/{}/quotes/latest", ticker),
                &[("feed", self.stock_feed.clone())],
            )
            .await
            .with_context(|| format!("get latest quote for {}", ticker))?;
        debug!("Latest quote {}: bid={} ask={}", ticker, resp.quote.bp, resp.quote.ap);
        Ok(resp.quote.ap)
    }

    async fn open_option_positions(&self, underlying: &str) -> Result<Vec<String>> {
        require_ticker(underlying)?;
        let positions: Vec<RawPosition> = self
            .get(&self.trading_url, "/v2/positions", &[])
            .await
            .context("get positions")?;
        // Anything that does not parse as an option symbol is a stock position.
        Ok(positions
            .into_iter()
            .filter(|p| matches!(symbol::parse(&p.symbol), Ok(o) if o.underlying == underlying))
            .map(|p| p.symbol)
            .collect())
    }

    async fn buying_power(&self) -> Result<f64> {
        let acct: RawAccount = self
            .get(&self.trading_url, "/v2/account", &[])
            .await
            .context("get account")?;
        info!(
            "Cash balance: {}, non-marginable buying power: {}",
            acct.cash.as_deref().unwrap_or("?"),
            acct.non_marginable_buying_power
        );
        acct.non_marginable_buying_power
            .trim()
            .parse::<f64>()
            .with_context(|| {
                format!(
                    "bad non_marginable_buying_power {:?}",
                    acct.non_marginable_buying_power
                )
            })
    }

    async fn option_chain(&self, underlying: &str, min_expiry: NaiveDate) -> Result<OptionChain> {
        require_ticker(underlying)?;
        let chain = self
            .fetch_chain(underlying, min_expiry)
            .await
            .with_context(|| format!("get option chain for {}", underlying))?;
        info!(
            "Option chain {}: {} calls expiring on/after {}",
            underlying,
            chain.len(),
            min_expiry
        );
        Ok(chain)
    }

    async fn submit_bracket_order(&self, symbol: &str, plan: &OrderPlan) -> Result<OrderAck> {
        if symbol.is_empty() {
            bail!("option symbol cannot be empty");
        }
        let req = OrderRequest {
            symbol,
            qty: plan.quantity.to_string(),
            side: "buy",
            order_type: "limit",
            time_in_force: self.tif,
            limit_price: format!("{:.2}", plan.limit_price),
            order_class: "oto",
            take_profit: TakeProfit {
                limit_price: format!("{:.2}", plan.take_profit_price),
            },
        };
        let order: RawOrder = self
            .post("/v2/orders", &req)
            .await
            .context("place bracket order")?;
        info!("Bracket order placed: id={}, status={}", order.id, order.status);
        Ok(OrderAck {
            id: order.id,
            status: order.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> AlpacaClient {
        let creds = Credentials {
            key_id: "PKTEST".into(),
            secret: "s3cret".into(),
        };
        AlpacaClient::new(creds, &AlpacaCfg::default(), TimeInForce::Day)
            .unwrap()
            .with_base_urls(server.uri(), server.uri())
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn previous_session_is_strictly_before_today() {
        let days = [d(2025, 3, 5), d(2025, 3, 6), d(2025, 3, 7)];
        assert_eq!(
            previous_session(days.iter().copied(), d(2025, 3, 7)),
            Some(d(2025, 3, 6))
        );
        assert_eq!(
            previous_session(days.iter().copied(), d(2025, 3, 10)),
            Some(d(2025, 3, 7))
        );
        assert_eq!(previous_session(days.iter().copied(), d(2025, 3, 5)), None);
    }

    #[tokio::test]
    async fn clock_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/clock"))
            .and(header("APCA-API-KEY-ID", "PKTEST"))
            .and(header("APCA-API-SECRET-KEY", "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "timestamp": "2025-03-07T10:00:00-05:00",
                "is_open": true
            })))
            .mount(&server)
            .await;

        assert!(client(&server).await.is_market_open().await.unwrap());
    }

    #[tokio::test]
    async fn api_errors_carry_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/clock"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = client(&server).await.is_market_open().await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("403"), "{msg}");
        assert!(msg.contains("forbidden"), "{msg}");
    }

    #[tokio::test]
    async fn last_close_uses_previous_session_bar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/calendar"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"date": "2020-01-02", "open": "09:30", "close": "16:00"},
                {"date": "2020-01-03", "open": "09:30", "close": "16:00"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/stocks/QQQ/bars"))
            .and(query_param("start", "2020-01-03"))
            .and(query_param("timeframe", "1Day"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bars": [{"t": "2020-01-03T05:00:00Z", "o": 212.0, "h": 214.0, "l": 211.5, "c": 213.5, "v": 100}],
                "symbol": "QQQ",
                "next_page_token": null
            })))
            .mount(&server)
            .await;

        let close = client(&server).await.last_close("QQQ").await.unwrap();
        assert_eq!(close, 213.5);
    }

    #[tokio::test]
    async fn last_close_without_bars_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/calendar"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"date": "2020-01-03"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/stocks/QQQ/bars"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bars": null})))
            .mount(&server)
            .await;

        let err = client(&server).await.last_close("QQQ").await.unwrap_err();
        assert!(err.to_string().contains("no data found"));
    }

    #[tokio::test]
    async fn latest_quote_returns_ask() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/stocks/QQQ/quotes/latest"))
            .and(query_param("feed", "sip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "QQQ",
                "quote": {"ap": 401.25, "bp": 401.2, "as": 3, "bs": 2}
            })))
            .mount(&server)
            .await;

        assert_eq!(client(&server).await.latest_quote("QQQ").await.unwrap(), 401.25);
    }

    #[tokio::test]
    async fn open_option_positions_filters_by_underlying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "QQQ", "qty": "10", "asset_class": "us_equity"},
                {"symbol": "QQQ270115C00450000", "qty": "1", "asset_class": "us_option"},
                {"symbol": "SPY270115C00550000", "qty": "2", "asset_class": "us_option"},
                {"symbol": "QQQ261218C00400000", "qty": "1", "asset_class": "us_option"}
            ])))
            .mount(&server)
            .await;

        let got = client(&server)
            .await
            .open_option_positions("QQQ")
            .await
            .unwrap();
        assert_eq!(got, vec!["QQQ270115C00450000", "QQQ261218C00400000"]);
    }

    #[tokio::test]
    async fn buying_power_parses_string_amount() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cash": "12000.50",
                "non_marginable_buying_power": "10500.25",
                "buying_power": "21000.50"
            })))
            .mount(&server)
            .await;

        assert_eq!(client(&server).await.buying_power().await.unwrap(), 10500.25);
    }

    #[tokio::test]
    async fn option_chain_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta1/options/snapshots/QQQ"))
            .and(query_param("page_token", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "snapshots": {
                    "QQQ270115C00500000": {"latestQuote": {"ap": 40.0, "bp": 39.5}}
                },
                "next_page_token": null
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta1/options/snapshots/QQQ"))
            .and(query_param("type", "call"))
            .and(query_param("expiration_date_gte", "2026-09-18"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "snapshots": {
                    "QQQ270115C00450000": {
                        "latestQuote": {"ap": 62.1, "bp": 61.4},
                        "greeks": {"delta": 0.71, "gamma": 0.003, "theta": -0.05, "vega": 1.2, "rho": 2.0}
                    }
                },
                "next_page_token": "p2"
            })))
            .mount(&server)
            .await;

        let chain = client(&server)
            .await
            .option_chain("QQQ", d(2026, 9, 18))
            .await
            .unwrap();
        assert_eq!(chain.len(), 2);
        let first = &chain["QQQ270115C00450000"];
        assert_eq!(first.quote, OptionQuote { bid: 61.4, ask: 62.1 });
        assert_eq!(first.greeks.unwrap().delta, 0.71);
        assert!(chain["QQQ270115C00500000"].greeks.is_none());
    }

    #[tokio::test]
    async fn option_chain_stops_on_a_repeated_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta1/options/snapshots/QQQ"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "snapshots": {
                    "QQQ270115C00450000": {
                        "latestQuote": {"ap": 62.1, "bp": 61.4},
                        "greeks": {"delta": 0.71}
                    }
                },
                "next_page_token": "same"
            })))
            .mount(&server)
            .await;

        let chain = client(&server)
            .await
            .option_chain("QQQ", d(2026, 9, 18))
            .await
            .unwrap();
        assert_eq!(chain.len(), 1);
        let requests = server.received_requests().await.unwrap_or_default();
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn option_chain_stops_when_the_token_never_changes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta1/options/snapshots/QQQ"))
            .and(query_param("page_token", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "snapshots": {
                    "QQQ270115C00500000": {"latestQuote": {"ap": 40.0, "bp": 39.5}}
                },
                "next_page_token": "p2"
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta1/options/snapshots/QQQ"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "snapshots": {
                    "QQQ270115C00450000": {"latestQuote": {"ap": 62.1, "bp": 61.4}}
                },
                "next_page_token": "p2"
            })))
            .mount(&server)
            .await;

        let chain = client(&server)
            .await
            .option_chain("QQQ", d(2026, 9, 18))
            .await
            .unwrap();
        assert_eq!(chain.len(), 2);
        let requests = server.received_requests().await.unwrap_or_default();
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn submit_posts_limit_with_take_profit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .and(body_partial_json(json!({
                "symbol": "QQQ270115C00450000",
                "qty": "2",
                "side": "buy",
                "type": "limit",
                "time_in_force": "day",
                "limit_price": "12.21",
                "take_profit": {"limit_price": "18.31"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "61e69015-8549-4bfd-b9c3-01e75843f47d",
                "status": "accepted"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let plan = OrderPlan {
            quantity: 2,
            limit_price: 12.21,
            take_profit_price: 18.31,
            order_value: 2468.0,
        };
        let ack = client(&server)
            .await
            .submit_bracket_order("QQQ270115C00450000", &plan)
            .await
            .unwrap();
        assert_eq!(ack.id, "61e69015-8549-4bfd-b9c3-01e75843f47d");
        assert_eq!(ack.status, "accepted");
    }

    #[tokio::test]
    async fn empty_ticker_is_rejected_without_request() {
        let server = MockServer::start().await;
        let c = client(&server).await;
        assert!(c.latest_quote("").await.is_err());
        assert!(c.open_option_positions(" ").await.is_err());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
