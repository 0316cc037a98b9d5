use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiatTicker {
    /// UTC seconds since the epoch.
    pub timestamp: i64,
    pub rates: BTreeMap<String, f32>,
    pub token_rates: BTreeMap<String, f32>,
}

impl FiatTicker {
    /// A ticker is usable for `currency` (and `token`, if given) when it
    /// carries the corresponding rates.
    pub fn is_suitable(&self, currency: &str, token: &str) -> bool {
        if !currency.is_empty() && !self.rates.contains_key(currency) {
            return false;
        }
        token.is_empty() || self.token_rates.contains_key(token)
    }
}
