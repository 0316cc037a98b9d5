use std::collections::BTreeMap;

use super::Store;
use crate::{
    codec::pack_addr_key,
    error::DecodeSnafu,
    model::{AddrDesc, BlockTx, HistoryItem, HistoryPage, TxDirection},
    Result,
};

/// Parameters of one address history page. Heights are inclusive bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub from_height: Option<u32>,
    pub to_height: Option<u32>,
    /// Zero means no limit.
    pub page_size: usize,
    /// `next` of the previous page.
    pub cursor: Option<String>,
}

/// Last item a page delivered, in scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HistoryCursor {
    height: u32,
    tx_index: u32,
}

impl HistoryCursor {
    fn parse(s: &str) -> Result<Self> {
        let invalid = || {
            DecodeSnafu {
                what: "history cursor",
                reason: format!("{s:?} is not height:index"),
            }
            .build()
        };
        let (height, tx_index) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            height: height.parse().map_err(|_| invalid())?,
            tx_index: tx_index.parse().map_err(|_| invalid())?,
        })
    }

    /// True when (height, tx_index) comes after the cursor, newest first.
    fn is_before(&self, height: u32, tx_index: u32) -> bool {
        height < self.height || (height == self.height && tx_index < self.tx_index)
    }
}

impl std::fmt::Display for HistoryCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.height, self.tx_index)
    }
}

impl Store {
    /// One page of the confirmed history of `desc`, newest first. Inside a
    /// block transactions come in descending block position, one item per tx.
    ///
    /// The page is read from a single snapshot; a cursor stays valid across
    /// later block writes.
    pub fn address_history(&self, desc: &AddrDesc, query: &HistoryQuery) -> Result<HistoryPage> {
        let cursor = query
            .cursor
            .as_deref()
            .map(HistoryCursor::parse)
            .transpose()?;
        let upper = match (query.to_height, cursor.map(|c| c.height)) {
            (Some(to), Some(c)) => Some(to.min(c)),
            (to, c) => to.or(c),
        };
        if let (Some(from), Some(upper)) = (query.from_height, upper) {
            if from > upper {
                return Ok(HistoryPage {
                    items: Vec::new(),
                    next: None,
                });
            }
        }

        let snapshot = self.snapshot();
        let start = upper.map(|height| pack_addr_key(desc, height));
        let rows = self
            .addresses
            .prefix_iter_at(&snapshot, desc.0.clone(), start)?;

        let mut items = Vec::new();
        let mut last = None;
        let mut more = false;
        'rows: for row in rows {
            let ((row_desc, height), entries) = row?;
            // a longer descriptor sharing our bytes as prefix
            if row_desc != *desc {
                continue;
            }
            if query.from_height.is_some_and(|from| height < from) {
                break;
            }

            let mut per_tx: BTreeMap<u32, TxDirection> = BTreeMap::new();
            for entry in entries {
                let direction = TxDirection::from(entry.io);
                per_tx
                    .entry(entry.tx_index)
                    .and_modify(|d| *d = d.merge(direction))
                    .or_insert(direction);
            }

            let mut block_txs: Option<Vec<BlockTx>> = None;
            for (tx_index, direction) in per_tx.into_iter().rev() {
                if cursor.is_some_and(|c| !c.is_before(height, tx_index)) {
                    continue;
                }
                if query.page_size > 0 && items.len() == query.page_size {
                    more = true;
                    break 'rows;
                }
                if block_txs.is_none() {
                    let info = self.height.get_at(&snapshot, &height)?.ok_or_else(|| {
                        DecodeSnafu {
                            what: "address history",
                            reason: format!("no block at height {height}"),
                        }
                        .build()
                    })?;
                    block_txs = self.block_txs.get_at(&snapshot, &info.hash)?;
                }
                let txid = block_txs
                    .as_ref()
                    .and_then(|txs| txs.get(tx_index as usize))
                    .map(|btx| btx.txid)
                    .ok_or_else(|| {
                        DecodeSnafu {
                            what: "address history",
                            reason: format!("no tx {tx_index} in block at height {height}"),
                        }
                        .build()
                    })?;
                items.push(HistoryItem {
                    txid,
                    height: Some(height),
                    direction,
                });
                last = Some(HistoryCursor { height, tx_index });
            }
        }

        Ok(HistoryPage {
            items,
            next: if more {
                last.map(|c| c.to_string())
            } else {
                None
            },
        })
    }
}
