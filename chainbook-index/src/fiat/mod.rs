//! Fiat-rate ingestion: keeps the ticker column current and backfills it one
//! day at a time from the provider's history.

mod coingecko;

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use tokio::sync::watch;

pub use self::coingecko::CoinGeckoProvider;
use crate::{
    config::FiatRatesConfig,
    error::{BackendSnafu, ConfigSnafu, Error},
    model::FiatTicker,
    storage::Store,
    sync::SharedStatus,
    Result,
};

pub(crate) const SECONDS_PER_DAY: i64 = 86_400;
/// How often the backfill checks whether another day has completed.
const HISTORY_RECHECK: Duration = Duration::from_secs(3600);

/// Source of exchange rates. Rate-limit responses surface as
/// `Error::RateLimited`.
#[async_trait]
pub trait RatesProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Latest coin rates, stamped by the provider.
    async fn current_ticker(&self) -> Result<FiatTicker>;

    /// Coin rates for `day`, `None` when the provider has no data for it.
    async fn historical_rates(&self, day: NaiveDate) -> Result<Option<BTreeMap<String, f32>>>;

    async fn current_token_rates(&self) -> Result<BTreeMap<String, f32>> {
        Ok(BTreeMap::new())
    }

    async fn historical_token_rates(&self, _day: NaiveDate) -> Result<BTreeMap<String, f32>> {
        Ok(BTreeMap::new())
    }
}

/// UTC midnight of `day` in epoch seconds.
pub fn day_start(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc().timestamp())
        .unwrap_or_default()
}

fn day_of(timestamp: i64) -> NaiveDate {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or(NaiveDate::MIN)
}

pub struct FiatIngester {
    store: Arc<Store>,
    provider: Arc<dyn RatesProvider>,
    status: SharedStatus,
    period: Duration,
    throttle: Duration,
    rate_limit_backoff: Duration,
    history_start: NaiveDate,
}

impl FiatIngester {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn RatesProvider>,
        status: SharedStatus,
        config: &FiatRatesConfig,
    ) -> Result<Self> {
        let history_start = NaiveDate::parse_from_str(&config.history_start, "%Y-%m-%d")
            .map_err(|e| {
                ConfigSnafu {
                    msg: format!("invalid fiat_rates.history_start {}: {e}", config.history_start),
                }
                .build()
            })?;
        let ingester = Self {
            store,
            provider,
            status,
            period: Duration::from_secs(config.period_secs.max(1)),
            throttle: Duration::from_millis(config.throttle_millis),
            rate_limit_backoff: Duration::from_secs(config.rate_limit_backoff_secs),
            history_start,
        };
        ingester.refresh_status()?;
        Ok(ingester)
    }

    /// Calls `request` until it is not rate limited. Other errors are
    /// returned as they are.
    async fn retry_rate_limited<T, F, Fut>(&self, what: &str, request: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            match request().await {
                Err(Error::RateLimited { provider }) => {
                    warn!(
                        "{provider} rate limit hit fetching {what}, retrying in {:?}",
                        self.rate_limit_backoff
                    );
                    tokio::time::sleep(self.rate_limit_backoff).await;
                }
                result => return result,
            }
        }
    }

    /// Fetches and stores the current ticker. Storing the same ticker twice
    /// rewrites identical bytes. Midnight belongs to the daily tickers, so a
    /// current ticker stamped exactly on one is moved a second later.
    pub async fn update_current(&self) -> Result<FiatTicker> {
        let mut ticker = self
            .retry_rate_limited("current rates", || self.provider.current_ticker())
            .await?;
        if ticker.timestamp.rem_euclid(SECONDS_PER_DAY) == 0 {
            ticker.timestamp += 1;
        }
        if ticker.rates.is_empty() {
            return BackendSnafu {
                method: format!("{} current rates", self.provider.name()),
                msg: "empty response",
            }
            .fail();
        }
        ticker.token_rates = self
            .retry_rate_limited("current token rates", || {
                self.provider.current_token_rates()
            })
            .await?;
        self.store.store_ticker(&ticker)?;
        debug!("stored current ticker {}", ticker.timestamp);
        self.refresh_status()?;
        Ok(ticker)
    }

    pub async fn update_historical(&self) -> Result<usize> {
        self.update_historical_until(Utc::now().date_naive()).await
    }

    /// Backfills every complete day before `today`, starting the day after
    /// the newest daily ticker. Current tickers stored meanwhile do not move
    /// the cursor. Returns the number of days stored.
    pub async fn update_historical_until(&self, today: NaiveDate) -> Result<usize> {
        let mut day = match self.store.find_last_daily_ticker()? {
            Some(last) => match day_of(last.timestamp).succ_opt() {
                Some(next) => next,
                None => return Ok(0),
            },
            None => self.history_start,
        };
        let mut stored = 0;
        let mut first_request = true;

        while day < today {
            if !first_request {
                tokio::time::sleep(self.throttle).await;
            }
            first_request = false;

            let rates = self
                .retry_rate_limited("historical rates", || self.provider.historical_rates(day))
                .await?;
            let token_rates = self
                .retry_rate_limited("historical token rates", || {
                    self.provider.historical_token_rates(day)
                })
                .await?;
            let timestamp = day_start(day);

            match rates {
                Some(rates) => {
                    self.store.store_ticker(&FiatTicker {
                        timestamp,
                        rates,
                        token_rates,
                    })?;
                    stored += 1;
                }
                None => {
                    debug!("{} has no rates for {day}", self.provider.name());
                    if !token_rates.is_empty() && !self.merge_token_rates(timestamp, token_rates)? {
                        warn!("no base ticker for {day}, token rates skipped");
                    }
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        if stored > 0 {
            info!("stored {stored} historical tickers up to {day}");
            self.refresh_status()?;
        }
        Ok(stored)
    }

    /// Adds `token_rates` to the stored ticker at `timestamp`. Returns false
    /// when there is no such ticker.
    fn merge_token_rates(
        &self,
        timestamp: i64,
        token_rates: BTreeMap<String, f32>,
    ) -> Result<bool> {
        let Some(mut ticker) = self.store.get_ticker(timestamp)? else {
            return Ok(false);
        };
        ticker.token_rates.extend(token_rates);
        self.store.store_ticker(&ticker)?;
        Ok(true)
    }

    fn refresh_status(&self) -> Result<()> {
        let first = self.store.first_ticker()?.map(|t| t.timestamp);
        let last = self.store.find_last_ticker("", "")?.map(|t| t.timestamp);
        let mut status = self.status.write();
        status.fiat_first_ticker = first;
        status.fiat_last_ticker = last;
        Ok(())
    }

    /// Runs the current-ticker loop and the daily backfill side by side
    /// until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            "fiat rates from {} every {:?}",
            self.provider.name(),
            self.period
        );
        tokio::join!(
            self.current_loop(shutdown.clone()),
            self.history_loop(shutdown)
        );
        info!("fiat ingester stopped");
    }

    async fn current_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.update_current().await {
                        warn!("current fiat ticker: {e}");
                    }
                }
            }
        }
    }

    async fn history_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.update_historical() => {
                    if let Err(e) = result {
                        warn!("historical fiat tickers: {e}");
                    }
                }
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(HISTORY_RECHECK) => {}
            }
        }
    }
}
