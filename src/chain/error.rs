//! Errors raised by a [`ChainClient`](super::ChainClient).
//!
//! Each variant maps to one failure kind; [`ChainError::is_transient`] tells
//! the executor whether another attempt may succeed.

use thiserror::Error;

use super::abi::AbiError;
use super::types::Network;
use crate::error::{ErrorClass, FailureKind};

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// The endpoint could not be reached, or answered with HTTP 429/5xx.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request or the confirmation wait exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// Nonce race with another transaction from the same sender.
    #[error("nonce error: {0}")]
    Nonce(String),

    /// Gas price below what the node or mempool currently accepts.
    #[error("gas price too low: {0}")]
    Underpriced(String),

    /// The sender cannot pay for gas plus value.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The contract reverted, during estimation or on chain.
    #[error("execution reverted: {0}")]
    Revert(String),

    /// Any other JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something we could not interpret.
    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("no RPC endpoint configured for network {0}")]
    UnknownNetwork(Network),

    /// The local signer could not produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("ABI error: {0}")]
    Abi(#[from] AbiError),
}

impl ChainError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        FailureKind::from(self).class() == ErrorClass::Transient
    }

    /// Map a JSON-RPC error object onto a typed variant by its message.
    pub fn from_rpc(code: i64, message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let owned = message.to_string();
        if lower.contains("insufficient funds") {
            ChainError::InsufficientFunds(owned)
        } else if lower.contains("nonce too low")
            || lower.contains("nonce too high")
            || lower.contains("already known")
            || lower.contains("known transaction")
        {
            ChainError::Nonce(owned)
        } else if lower.contains("underpriced")
            || lower.contains("fee too low")
            || lower.contains("less than block base fee")
            || lower.contains("gas price too low")
        {
            ChainError::Underpriced(owned)
        } else if lower.contains("revert") || code == 3 {
            ChainError::Revert(owned)
        } else {
            ChainError::Rpc {
                code,
                message: owned,
            }
        }
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChainError::Timeout
        } else if err.is_decode() {
            ChainError::InvalidResponse(err.to_string())
        } else {
            ChainError::Connection(err.to_string())
        }
    }
}
