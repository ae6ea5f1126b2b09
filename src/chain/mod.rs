pub mod abi;
pub mod error;
pub mod rpc;
pub mod signer;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use abi::{AbiError, AbiStore, Function, ParamType, Token};
pub use error::ChainError;
pub use rpc::{RpcChainClient, RpcSettings, Signing};
pub use signer::LocalSigner;
pub use types::{Address, Confirmation, Network, TxHash, TxRequest};

/// Access to EVM chains: state reads, gas data, submission and confirmation.
///
/// Implementations own signing. Callers may pin a nonce on the request so
/// that a retry replaces a pending transaction instead of adding a second
/// one. One client is shared by every running job.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Execute a read-only call and decode its return values.
    async fn read_state(
        &self,
        network: Network,
        address: Address,
        function: &Function,
        args: &[Token],
    ) -> Result<Vec<Token>, ChainError>;

    async fn estimate_gas(&self, network: Network, tx: &TxRequest) -> Result<u64, ChainError>;

    async fn current_gas_price(&self, network: Network) -> Result<u128, ChainError>;

    /// Next nonce of the sender, counting transactions still in the mempool.
    async fn pending_nonce(&self, network: Network) -> Result<u64, ChainError>;

    /// Sign and broadcast a transaction, returning its hash.
    async fn submit_transaction(&self, network: Network, tx: &TxRequest) -> Result<TxHash, ChainError>;

    /// Look the receipt up once. `None` while the transaction is unknown,
    /// pending or not yet buried under the required depth.
    async fn check_receipt(&self, network: Network, tx_hash: TxHash) -> Result<Option<Confirmation>, ChainError>;

    /// Wait until the transaction is mined with the client's confirmation
    /// depth, or `timeout` elapses.
    async fn wait_for_confirmation(
        &self,
        network: Network,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<Confirmation, ChainError>;

    /// Address transactions are sent from on `network`.
    fn sender(&self, network: Network) -> Address;
}

/// Read-only chain access scoped to one network, handed to argument
/// calculators.
#[derive(Clone)]
pub struct ChainReader {
    client: Arc<dyn ChainClient>,
    network: Network,
}

impl ChainReader {
    pub fn new(client: Arc<dyn ChainClient>, network: Network) -> Self {
        Self { client, network }
    }

    pub fn sender(&self) -> Address {
        self.client.sender(self.network)
    }

    pub async fn call(
        &self,
        address: Address,
        function: &Function,
        args: &[Token],
    ) -> Result<Vec<Token>, ChainError> {
        self.client.read_state(self.network, address, function, args).await
    }

    /// Convenience for calls returning a single `uint`.
    pub async fn call_uint(
        &self,
        address: Address,
        function: &Function,
        args: &[Token],
    ) -> Result<u128, ChainError> {
        let out = self.call(address, function, args).await?;
        out.first().and_then(Token::as_uint).ok_or_else(|| {
            ChainError::InvalidResponse(format!("{} did not return a uint", function.name))
        })
    }
}

/// ERC-20 fragments used by the built-in calculators.
pub mod erc20 {
    use super::{Function, ParamType};

    pub fn balance_of() -> Function {
        Function::new("balanceOf", vec![ParamType::Address], vec![ParamType::Uint(256)])
    }

    pub fn allowance() -> Function {
        Function::new(
            "allowance",
            vec![ParamType::Address, ParamType::Address],
            vec![ParamType::Uint(256)],
        )
    }
}
