use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::abi::{Function, Token};
use super::error::ChainError;
use super::signer::{LegacyTx, LocalSigner};
use super::types::{Address, Confirmation, Network, TxHash, TxRequest, parse_quantity, to_quantity};
use super::ChainClient;

/// Where transactions are signed.
#[derive(Debug, Clone)]
pub enum Signing {
    /// Sign locally and broadcast with `eth_sendRawTransaction`.
    Local(LocalSigner),
    /// The node holds the key for this account (`eth_sendTransaction`).
    Node(Address),
}

impl Signing {
    pub fn sender(&self) -> Address {
        match self {
            Signing::Local(signer) => signer.address(),
            Signing::Node(address) => *address,
        }
    }
}

/// Connection parameters for [`RpcChainClient`].
#[derive(Debug, Clone)]
pub struct RpcSettings {
    /// Endpoints per network; the first is primary, the rest are fallbacks.
    pub endpoints: HashMap<Network, Vec<String>>,
    pub signing: Signing,
    /// Blocks a receipt must be buried under, 1 = included.
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

struct Endpoints {
    urls: Vec<String>,
    active: AtomicUsize,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    block_number: Option<String>,
    status: Option<String>,
}

/// JSON-RPC chain client with per-network endpoint failover.
///
/// With [`Signing::Local`] transactions are signed here as EIP-155 legacy
/// transactions. With [`Signing::Node`] the node signs them.
pub struct RpcChainClient {
    http: Client,
    endpoints: HashMap<Network, Endpoints>,
    signing: Signing,
    sender: Address,
    confirmations: u64,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(settings: RpcSettings) -> Result<Self, ChainError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ChainError::Connection(format!("failed to build HTTP client: {e}")))?;

        let endpoints = settings
            .endpoints
            .into_iter()
            .filter(|(_, urls)| !urls.is_empty())
            .map(|(network, urls)| {
                (
                    network,
                    Endpoints {
                        urls,
                        active: AtomicUsize::new(0),
                    },
                )
            })
            .collect();

        Ok(Self {
            http,
            endpoints,
            sender: settings.signing.sender(),
            signing: settings.signing,
            confirmations: settings.confirmations.max(1),
            poll_interval: settings.poll_interval,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        network: Network,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let endpoints = self
            .endpoints
            .get(&network)
            .ok_or(ChainError::UnknownNetwork(network))?;
        let count = endpoints.urls.len();
        let start = endpoints.active.load(Ordering::Relaxed) % count;
        let mut last_error = ChainError::UnknownNetwork(network);

        for offset in 0..count {
            let index = (start + offset) % count;
            let url = &endpoints.urls[index];
            match self.post(url, method, &params).await {
                Ok(value) => {
                    if offset > 0 {
                        warn!(%network, %url, attempt = offset + 1, "switched to fallback RPC endpoint");
                        endpoints.active.store(index, Ordering::Relaxed);
                    }
                    return serde_json::from_value(value)
                        .map_err(|e| ChainError::InvalidResponse(format!("{method}: {e}")));
                }
                Err(err @ (ChainError::Connection(_) | ChainError::Timeout)) => {
                    warn!(%network, %url, error = %err, "RPC endpoint unreachable");
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error)
    }

    async fn post(&self, url: &str, method: &str, params: &Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!(%url, %method, id, "RPC request");

        let response = self.http.post(url).json(&body).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ChainError::Connection(format!("HTTP {status} from {url}")));
        }
        if !status.is_success() {
            return Err(ChainError::InvalidResponse(format!("HTTP {status} from {url}")));
        }

        let body: RpcResponse = response.json().await?;
        if let Some(err) = body.error {
            let message = match err.data {
                Some(Value::String(data)) => format!("{} ({data})", err.message),
                _ => err.message,
            };
            return Err(ChainError::from_rpc(err.code, &message));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    fn tx_object(&self, tx: &TxRequest) -> Value {
        let mut obj = json!({
            "from": self.sender.to_string(),
            "to": tx.to.to_string(),
            "data": format!("0x{}", hex::encode(&tx.data)),
            "value": to_quantity(tx.value),
        });
        if let Some(gas) = tx.gas_limit {
            obj["gas"] = Value::String(to_quantity(u128::from(gas)));
        }
        if let Some(price) = tx.gas_price {
            obj["gasPrice"] = Value::String(to_quantity(price));
        }
        if let Some(nonce) = tx.nonce {
            obj["nonce"] = Value::String(to_quantity(u128::from(nonce)));
        }
        obj
    }

    async fn quantity(&self, network: Network, method: &str, params: Value) -> Result<u128, ChainError> {
        let raw: String = self.request(network, method, params).await?;
        parse_quantity(&raw).map_err(ChainError::InvalidResponse)
    }

    async fn poll_receipt(&self, network: Network, tx_hash: TxHash) -> Result<Confirmation, ChainError> {
        loop {
            match self.check_receipt(network, tx_hash).await {
                Ok(Some(confirmation)) => return Ok(confirmation),
                Ok(None) => {}
                Err(err) if err.is_transient() => {
                    debug!(%network, %tx_hash, error = %err, "receipt poll failed, retrying");
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn is_deep_enough(&self, network: Network, block: u64) -> Result<bool, ChainError> {
        if self.confirmations <= 1 {
            return Ok(true);
        }
        let head: String = self.request(network, "eth_blockNumber", json!([])).await?;
        let head = block_number(&head)?;
        Ok(head.saturating_sub(block) + 1 >= self.confirmations)
    }

    async fn send_signed(&self, network: Network, signer: &LocalSigner, tx: &TxRequest) -> Result<TxHash, ChainError> {
        let nonce = match tx.nonce {
            Some(nonce) => nonce,
            None => self.pending_nonce(network).await?,
        };
        let gas_price = match tx.gas_price {
            Some(price) => price,
            None => self.current_gas_price(network).await?,
        };
        let gas_limit = match tx.gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas(network, tx).await?,
        };
        let signed = signer.sign(&LegacyTx {
            chain_id: network.chain_id(),
            nonce,
            gas_price,
            gas_limit,
            to: tx.to,
            value: tx.value,
            data: &tx.data,
        })?;

        let raw = format!("0x{}", hex::encode(&signed.raw));
        let answer: String = self.request(network, "eth_sendRawTransaction", json!([raw])).await?;
        let hash: TxHash = answer.parse().map_err(ChainError::InvalidResponse)?;
        if hash != signed.hash {
            warn!(%network, node = %hash, local = %signed.hash, "node reported a different transaction hash");
        }
        Ok(hash)
    }
}

fn block_number(raw: &str) -> Result<u64, ChainError> {
    let n = parse_quantity(raw).map_err(ChainError::InvalidResponse)?;
    u64::try_from(n).map_err(|_| ChainError::InvalidResponse(format!("block number {raw} overflows u64")))
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn read_state(
        &self,
        network: Network,
        address: Address,
        function: &Function,
        args: &[Token],
    ) -> Result<Vec<Token>, ChainError> {
        let call = json!({
            "from": self.sender.to_string(),
            "to": address.to_string(),
            "data": format!("0x{}", hex::encode(function.encode_tokens(args))),
        });
        let raw: String = self.request(network, "eth_call", json!([call, "latest"])).await?;
        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| ChainError::InvalidResponse(format!("eth_call result: {e}")))?;
        Ok(function.decode_output(&bytes)?)
    }

    async fn estimate_gas(&self, network: Network, tx: &TxRequest) -> Result<u64, ChainError> {
        let mut obj = self.tx_object(tx);
        if let Some(map) = obj.as_object_mut() {
            map.remove("gas");
            map.remove("gasPrice");
        }
        let gas = self.quantity(network, "eth_estimateGas", json!([obj])).await?;
        u64::try_from(gas).map_err(|_| ChainError::InvalidResponse(format!("gas estimate {gas} overflows u64")))
    }

    async fn current_gas_price(&self, network: Network) -> Result<u128, ChainError> {
        self.quantity(network, "eth_gasPrice", json!([])).await
    }

    async fn pending_nonce(&self, network: Network) -> Result<u64, ChainError> {
        let nonce = self
            .quantity(
                network,
                "eth_getTransactionCount",
                json!([self.sender.to_string(), "pending"]),
            )
            .await?;
        u64::try_from(nonce).map_err(|_| ChainError::InvalidResponse(format!("nonce {nonce} overflows u64")))
    }

    async fn submit_transaction(&self, network: Network, tx: &TxRequest) -> Result<TxHash, ChainError> {
        match &self.signing {
            Signing::Local(signer) => self.send_signed(network, signer, tx).await,
            Signing::Node(_) => {
                let raw: String = self
                    .request(network, "eth_sendTransaction", json!([self.tx_object(tx)]))
                    .await?;
                raw.parse().map_err(ChainError::InvalidResponse)
            }
        }
    }

    async fn check_receipt(&self, network: Network, tx_hash: TxHash) -> Result<Option<Confirmation>, ChainError> {
        let receipt: Option<Receipt> = self
            .request(network, "eth_getTransactionReceipt", json!([tx_hash.to_string()]))
            .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(block) = receipt.block_number.as_deref() else {
            return Ok(None);
        };
        let block = block_number(block)?;
        if !self.is_deep_enough(network, block).await? {
            return Ok(None);
        }
        Ok(Some(Confirmation::Confirmed {
            block_number: block,
            success: receipt.status.as_deref().is_none_or(|s| s == "0x1"),
        }))
    }

    async fn wait_for_confirmation(
        &self,
        network: Network,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<Confirmation, ChainError> {
        match tokio::time::timeout(timeout, self.poll_receipt(network, tx_hash)).await {
            Ok(result) => result,
            Err(_) => Ok(Confirmation::TimedOut),
        }
    }

    fn sender(&self, _network: Network) -> Address {
        self.sender
    }
}
