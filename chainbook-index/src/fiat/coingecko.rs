use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use log::{debug, trace};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use snafu::ResultExt;

use super::{day_start, RatesProvider, SECONDS_PER_DAY};
use crate::{
    config::FiatRatesConfig,
    error::{BackendSnafu, ConfigSnafu, HttpSnafu, RateLimitedSnafu},
    model::FiatTicker,
    Result,
};

const PROVIDER: &str = "coingecko";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DATE_FORMAT: &str = "%d-%m-%Y";

/// Rates from the CoinGecko v3 API.
pub struct CoinGeckoProvider {
    client: Client,
    url: String,
    coin_id: String,
    vs_currencies: Vec<String>,
    /// Platform id and the currency its tokens are priced in.
    platform: Option<(String, String)>,
    tokens: Vec<String>,
}

impl CoinGeckoProvider {
    pub fn new(config: &FiatRatesConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                ConfigSnafu {
                    msg: format!("unable to build http client: {e}"),
                }
                .build()
            })?;
        Ok(Self {
            client,
            url: config.provider_url.trim_end_matches('/').to_string(),
            coin_id: config.coin_id.clone(),
            vs_currencies: config.vs_currencies.clone(),
            platform: config
                .platform_id
                .clone()
                .zip(config.platform_vs_currency.clone()),
            tokens: config.tokens.clone(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{path}", self.url);
        trace!("GET {url} {query:?}");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .context(HttpSnafu)?;
        let status = response.status();
        let body = response.text().await.context(HttpSnafu)?;
        if is_rate_limited(status, &body) {
            return RateLimitedSnafu { provider: PROVIDER }.fail();
        }
        if !status.is_success() {
            return BackendSnafu {
                method: path.to_string(),
                msg: format!("status {status}"),
            }
            .fail();
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl RatesProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn current_ticker(&self) -> Result<FiatTicker> {
        let body = self
            .get_json(
                "/simple/price",
                &[
                    ("ids", self.coin_id.clone()),
                    ("vs_currencies", self.vs_currencies.join(",")),
                ],
            )
            .await?;
        Ok(FiatTicker {
            timestamp: Utc::now().timestamp(),
            rates: rates_of(&body[&self.coin_id]),
            token_rates: BTreeMap::new(),
        })
    }

    async fn historical_rates(&self, day: NaiveDate) -> Result<Option<BTreeMap<String, f32>>> {
        let body = self
            .get_json(
                &format!("/coins/{}/history", self.coin_id),
                &[
                    ("date", day.format(DATE_FORMAT).to_string()),
                    ("localization", "false".to_string()),
                ],
            )
            .await?;
        Ok(parse_history(&body))
    }

    async fn current_token_rates(&self) -> Result<BTreeMap<String, f32>> {
        let Some((platform, vs_currency)) = &self.platform else {
            return Ok(BTreeMap::new());
        };
        if self.tokens.is_empty() {
            return Ok(BTreeMap::new());
        }
        let body = self
            .get_json(
                &format!("/simple/token_price/{platform}"),
                &[
                    ("contract_addresses", self.tokens.join(",")),
                    ("vs_currencies", vs_currency.clone()),
                ],
            )
            .await?;
        Ok(parse_token_prices(&body, vs_currency))
    }

    async fn historical_token_rates(&self, day: NaiveDate) -> Result<BTreeMap<String, f32>> {
        let Some((platform, vs_currency)) = &self.platform else {
            return Ok(BTreeMap::new());
        };
        let from = day_start(day);
        let mut rates = BTreeMap::new();
        for token in &self.tokens {
            let body = self
                .get_json(
                    &format!("/coins/{platform}/contract/{token}/market_chart/range"),
                    &[
                        ("vs_currency", vs_currency.clone()),
                        ("from", from.to_string()),
                        ("to", (from + SECONDS_PER_DAY).to_string()),
                    ],
                )
                .await?;
            match first_price(&body) {
                Some(price) => {
                    rates.insert(token.to_lowercase(), price);
                }
                None => debug!("no {token} price on {day}"),
            }
        }
        Ok(rates)
    }
}

fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || body.to_lowercase().contains("rate limit")
}

fn rates_of(value: &Value) -> BTreeMap<String, f32> {
    value
        .as_object()
        .map(|prices| {
            prices
                .iter()
                .filter_map(|(currency, price)| {
                    Some((currency.to_lowercase(), price.as_f64()? as f32))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Rates of a `/coins/{id}/history` response, `None` when the provider has
/// no market data for that day.
fn parse_history(body: &Value) -> Option<BTreeMap<String, f32>> {
    let rates = rates_of(&body["market_data"]["current_price"]);
    (!rates.is_empty()).then_some(rates)
}

fn parse_token_prices(body: &Value, vs_currency: &str) -> BTreeMap<String, f32> {
    body.as_object()
        .map(|tokens| {
            tokens
                .iter()
                .filter_map(|(token, prices)| {
                    Some((token.to_lowercase(), prices[vs_currency].as_f64()? as f32))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn first_price(body: &Value) -> Option<f32> {
    Some(body["prices"].as_array()?.first()?.get(1)?.as_f64()? as f32)
}
