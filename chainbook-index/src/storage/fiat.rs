use chainbook_db::WriteBatch;

use super::{SortOrder, Store};
use crate::{error::InvariantSnafu, fiat::SECONDS_PER_DAY, model::FiatTicker, Result};

impl Store {
    /// Writes `tickers` in one batch. Timestamps must be strictly increasing.
    pub fn store_tickers(&self, tickers: &[FiatTicker]) -> Result<()> {
        let mut batch = WriteBatch::default();
        let mut last = None;
        for ticker in tickers {
            if last.is_some_and(|ts| ticker.timestamp <= ts) {
                return InvariantSnafu {
                    msg: format!("ticker {} is not after {:?}", ticker.timestamp, last),
                }
                .fail();
            }
            last = Some(ticker.timestamp);
            self.fiat_rates.batch_put(&mut batch, ticker)?;
        }
        self.write(batch)
    }

    pub fn store_ticker(&self, ticker: &FiatTicker) -> Result<()> {
        self.store_tickers(std::slice::from_ref(ticker))
    }

    pub fn get_ticker(&self, timestamp: i64) -> Result<Option<FiatTicker>> {
        let snapshot = self.snapshot();
        self.fiat_rates.get_at(&snapshot, timestamp)
    }

    /// First ticker at or after `time` that carries `currency` and `token`.
    /// Empty strings match any ticker.
    pub fn find_ticker(
        &self,
        time: i64,
        currency: &str,
        token: &str,
    ) -> Result<Option<FiatTicker>> {
        self.first_suitable(Some(time), SortOrder::Ascending, currency, token)
    }

    /// Newest ticker that carries `currency` and `token`.
    pub fn find_last_ticker(&self, currency: &str, token: &str) -> Result<Option<FiatTicker>> {
        self.first_suitable(None, SortOrder::Descending, currency, token)
    }

    /// Newest ticker stamped on a UTC midnight, which only the daily
    /// backfill writes.
    pub fn find_last_daily_ticker(&self) -> Result<Option<FiatTicker>> {
        let snapshot = self.snapshot();
        for ticker in self.fiat_rates.list_at(&snapshot, None, SortOrder::Descending)? {
            let ticker = ticker?;
            if ticker.timestamp.rem_euclid(SECONDS_PER_DAY) == 0 {
                return Ok(Some(ticker));
            }
        }
        Ok(None)
    }

    pub fn first_ticker(&self) -> Result<Option<FiatTicker>> {
        self.first_suitable(None, SortOrder::Ascending, "", "")
    }

    pub fn all_tickers(&self) -> Result<Vec<FiatTicker>> {
        let snapshot = self.snapshot();
        let tickers = self
            .fiat_rates
            .list_at(&snapshot, None, SortOrder::Ascending)?
            .collect();
        tickers
    }

    fn first_suitable(
        &self,
        from: Option<i64>,
        order: SortOrder,
        currency: &str,
        token: &str,
    ) -> Result<Option<FiatTicker>> {
        let snapshot = self.snapshot();
        for ticker in self.fiat_rates.list_at(&snapshot, from, order)? {
            let ticker = ticker?;
            if ticker.is_suitable(currency, token) {
                return Ok(Some(ticker));
            }
        }
        Ok(None)
    }
}
