use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::Engine;
use log::{debug, trace};
use num::BigUint;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use snafu::IntoError;
use tokio::sync::broadcast;

use super::{
    backend::{BackendFeatures, ChainBackend, ChainInfo, Notification},
    parser::ChainParser,
};
use crate::{
    config::CoinConfig,
    error::{
        BackendRejectedSnafu, BackendSnafu, ConfigSnafu, Error, HttpSnafu, NotFoundKind,
        TimeoutSnafu,
    },
    model::{Block, BlockHash, BlockHeader, BlockSummary, Tx, Txid},
    Result,
};

// bitcoind RPC error codes
const RPC_INVALID_REQUEST: i32 = -32600;
const RPC_METHOD_NOT_FOUND: i32 = -32601;
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;
const RPC_INVALID_PARAMETER: i32 = -8;
const RPC_DESERIALIZATION_ERROR: i32 = -22;
const RPC_VERIFY_ERROR: i32 = -25;
const RPC_VERIFY_REJECTED: i32 = -26;
const RPC_VERIFY_ALREADY_IN_CHAIN: i32 = -27;

const NOTIFICATION_CAPACITY: usize = 1024;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcChainInfo {
    chain: String,
    blocks: u32,
    bestblockhash: BlockHash,
    #[serde(default)]
    initialblockdownload: bool,
}

#[derive(Debug, Deserialize)]
struct RpcNetworkInfo {
    #[serde(default)]
    subversion: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock<T> {
    hash: BlockHash,
    #[serde(default)]
    previousblockhash: Option<BlockHash>,
    height: u32,
    time: i64,
    size: u32,
    tx: Vec<T>,
}

impl<T> RpcBlock<T> {
    fn header(&self) -> BlockHeader {
        BlockHeader {
            hash: self.hash,
            prev_hash: self.previousblockhash.unwrap_or_default(),
            height: self.height,
            time: self.time,
            size: self.size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcSmartFee {
    feerate: Option<f64>,
}

/// Backend speaking the bitcoind JSON-RPC dialect over HTTP.
pub struct BitcoindBackend {
    client: Client,
    url: String,
    parser: Arc<dyn ChainParser>,
    timeout: Duration,
    next_id: AtomicU64,
    notifications: broadcast::Sender<Notification>,
}

impl BitcoindBackend {
    pub fn new(config: &CoinConfig, parser: Arc<dyn ChainParser>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", config.rpc_user, config.rpc_pass));
        let auth = HeaderValue::from_str(&format!("Basic {credentials}")).map_err(|e| {
            ConfigSnafu {
                msg: format!("invalid rpc credentials: {e}"),
            }
            .build()
        })?;
        headers.insert(AUTHORIZATION, auth);

        let timeout = config.rpc_timeout();
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ConfigSnafu {
                    msg: format!("unable to build rpc client for {}: {e}", config.rpc_url),
                }
                .build()
            })?;
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Ok(Self {
            client,
            url: config.rpc_url.clone(),
            parser,
            timeout,
            next_id: AtomicU64::new(0),
            notifications,
        })
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        trace!("rpc {method} #{}", request.id);
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(method, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(method, e))?;
        decode_response(method, status, &body)
    }

    fn map_transport_error(&self, method: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            return TimeoutSnafu {
                method,
                secs: self.timeout.as_secs(),
            }
            .build();
        }
        HttpSnafu.into_error(e)
    }
}

fn not_found_kind(method: &str) -> NotFoundKind {
    match method {
        "getrawtransaction" => NotFoundKind::Tx,
        _ => NotFoundKind::Block,
    }
}

/// Decodes a JSON-RPC reply. bitcoind answers failed calls with HTTP 500 and
/// the error object in the body, so the body is read whatever the status.
fn decode_response<R: DeserializeOwned>(
    method: &str,
    status: StatusCode,
    body: &str,
) -> Result<R> {
    let response = match serde_json::from_str::<RpcResponse>(body) {
        Ok(response) => response,
        Err(_) if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            return ConfigSnafu {
                msg: format!("rpc credentials refused ({status})"),
            }
            .fail()
        }
        Err(e) if status.is_success() => return Err(e.into()),
        Err(_) => {
            return BackendSnafu {
                method,
                msg: format!("status {status}"),
            }
            .fail()
        }
    };
    if let Some(error) = response.error {
        return Err(classify_rpc_error(method, error.code, error.message));
    }
    Ok(serde_json::from_value(response.result)?)
}

/// Unknown or missing objects become `NotFound`, requests bitcoind refuses on
/// their merits are fatal, everything else (warmup, busy, internal) is retried.
fn classify_rpc_error(method: &str, code: i32, msg: String) -> Error {
    match code {
        RPC_INVALID_ADDRESS_OR_KEY | RPC_INVALID_PARAMETER if method != "sendrawtransaction" => {
            Error::NotFound {
                kind: not_found_kind(method),
            }
        }
        RPC_INVALID_ADDRESS_OR_KEY
        | RPC_INVALID_PARAMETER
        | RPC_INVALID_REQUEST
        | RPC_METHOD_NOT_FOUND
        | RPC_DESERIALIZATION_ERROR
        | RPC_VERIFY_ERROR
        | RPC_VERIFY_REJECTED
        | RPC_VERIFY_ALREADY_IN_CHAIN => BackendRejectedSnafu { method, code, msg }.build(),
        _ => BackendSnafu {
            method,
            msg: format!("rpc error {code}: {msg}"),
        }
        .build(),
    }
}

#[async_trait]
impl ChainBackend for BitcoindBackend {
    async fn chain_info(&self) -> Result<ChainInfo> {
        let info: RpcChainInfo = self.call("getblockchaininfo", json!([])).await?;
        let version = match self.call::<RpcNetworkInfo>("getnetworkinfo", json!([])).await {
            Ok(network) => network.subversion,
            Err(e) => {
                debug!("getnetworkinfo failed: {e}");
                String::new()
            }
        };
        Ok(ChainInfo {
            chain: info.chain,
            blocks: info.blocks,
            best_block_hash: info.bestblockhash,
            version,
            initial_block_download: info.initialblockdownload,
        })
    }

    async fn block_hash(&self, height: u32) -> Result<BlockHash> {
        self.call("getblockhash", json!([height])).await
    }

    async fn block_summary(&self, hash: &BlockHash) -> Result<BlockSummary> {
        let block: RpcBlock<Txid> = self
            .call("getblock", json!([hash.to_string(), 1]))
            .await?;
        Ok(BlockSummary {
            header: block.header(),
            txids: block.tx,
        })
    }

    async fn block(&self, hash: &BlockHash, height: u32) -> Result<Block> {
        let block: RpcBlock<serde_json::Value> = self
            .call("getblock", json!([hash.to_string(), 2]))
            .await?;
        let mut header = block.header();
        header.height = height;
        let txs = block
            .tx
            .iter()
            .map(|tx| self.parser.parse_tx_from_json(tx))
            .collect::<Result<Vec<_>>>()?;
        Ok(Block { header, txs })
    }

    async fn block_bytes(&self, hash: &BlockHash) -> Result<Vec<u8>> {
        let raw: String = self
            .call("getblock", json!([hash.to_string(), 0]))
            .await?;
        Ok(hex::decode(raw)?)
    }

    async fn tx(&self, txid: &Txid) -> Result<Tx> {
        let raw: String = self
            .call("getrawtransaction", json!([txid.to_string(), false]))
            .await?;
        self.parser.parse_tx(&hex::decode(raw)?)
    }

    async fn mempool_txids(&self) -> Result<Vec<Txid>> {
        self.call("getrawmempool", json!([])).await
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<Txid> {
        self.call("sendrawtransaction", json!([hex])).await
    }

    async fn estimate_smart_fee(&self, blocks: u32, conservative: bool) -> Result<BigUint> {
        let mode = if conservative {
            "CONSERVATIVE"
        } else {
            "ECONOMICAL"
        };
        let fee: RpcSmartFee = self
            .call("estimatesmartfee", json!([blocks, mode]))
            .await?;
        // feerate is in coins per kB
        let sat_per_kb = fee.feerate.map_or(0.0, |rate| (rate * 1e8).round());
        Ok(BigUint::from(sat_per_kb.max(0.0) as u64))
    }

    fn features(&self) -> BackendFeatures {
        BackendFeatures {
            estimate_fee: false,
            estimate_smart_fee: true,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    fn notifier(&self) -> Option<broadcast::Sender<Notification>> {
        Some(self.notifications.clone())
    }
}
