//! Primitive chain types shared by the ABI codec, the RPC client and the
//! job model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Supported EVM networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Bsc,
    Polygon,
    Arbitrum,
    Optimism,
}

impl Network {
    pub const ALL: [Network; 5] = [
        Network::Ethereum,
        Network::Bsc,
        Network::Polygon,
        Network::Arbitrum,
        Network::Optimism,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Bsc => "bsc",
            Network::Polygon => "polygon",
            Network::Arbitrum => "arbitrum",
            Network::Optimism => "optimism",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Bsc => 56,
            Network::Polygon => 137,
            Network::Arbitrum => 42161,
            Network::Optimism => 10,
        }
    }

    /// Environment variable holding the comma-separated RPC endpoints.
    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Network::Ethereum => "ETH_RPC_URL",
            Network::Bsc => "BSC_RPC_URL",
            Network::Polygon => "POLYGON_RPC_URL",
            Network::Arbitrum => "ARBITRUM_RPC_URL",
            Network::Optimism => "OPTIMISM_RPC_URL",
        }
    }

    pub fn explorer_url(&self) -> &'static str {
        match self {
            Network::Ethereum => "https://etherscan.io",
            Network::Bsc => "https://bscscan.com",
            Network::Polygon => "https://polygonscan.com",
            Network::Arbitrum => "https://arbiscan.io",
            Network::Optimism => "https://optimistic.etherscan.io",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Network::Ethereum),
            "bsc" => Ok(Network::Bsc),
            "polygon" => Ok(Network::Polygon),
            "arbitrum" => Ok(Network::Arbitrum),
            "optimism" => Ok(Network::Optimism),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// A 20-byte account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| format!("address must start with 0x: {s}"))?;
        if digits.len() != 40 {
            return Err(format!("address must have 40 hex digits: {s}"));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(digits, &mut out).map_err(|e| format!("invalid address {s}: {e}"))?;
        Ok(Address(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl FromStr for TxHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 32];
        hex::decode_to_slice(digits, &mut out).map_err(|e| format!("invalid tx hash {s}: {e}"))?;
        Ok(TxHash(out))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Encode an integer as a JSON-RPC quantity (`0x`-prefixed, no leading zeros).
pub fn to_quantity(value: u128) -> String {
    format!("0x{value:x}")
}

/// Parse a JSON-RPC quantity.
pub fn parse_quantity(s: &str) -> Result<u128, String> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| format!("quantity must start with 0x: {s}"))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {s}: {e}"))
}

/// Parameters of a state-changing contract call. The sender and signature
/// are filled in by the [`ChainClient`](super::ChainClient), which also picks
/// the next pending nonce when `nonce` is unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: u128,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub nonce: Option<u64>,
}

/// Outcome of waiting for a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Mined with the required depth. `success` mirrors the receipt status.
    Confirmed { block_number: u64, success: bool },
    /// No receipt within the allotted time.
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parse_and_display() {
        let addr: Address = "0xD7f213cf9D017FF2D130a4B34630Dcb5b8D66d85".parse().unwrap();
        assert_eq!(addr.to_string(), "0xd7f213cf9d017ff2d130a4b34630dcb5b8d66d85");
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!("d7f213cf9D017FF2D130a4B34630Dcb5b8D66d85".parse::<Address>().is_err());
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xZZf213cf9D017FF2D130a4B34630Dcb5b8D66d85".parse::<Address>().is_err());
    }

    #[test]
    fn quantity_helpers() {
        assert_eq!(to_quantity(0), "0x0");
        assert_eq!(to_quantity(21000), "0x5208");
        assert_eq!(parse_quantity("0x5208").unwrap(), 21000);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert!(parse_quantity("5208").is_err());
    }

    #[test]
    fn network_from_str_and_display() {
        assert_eq!("BSC".parse::<Network>().unwrap(), Network::Bsc);
        assert_eq!(Network::Arbitrum.to_string(), "arbitrum");
        assert_eq!(Network::Polygon.chain_id(), 137);
        assert!("solana".parse::<Network>().is_err());
    }

    #[test]
    fn tx_hash_serde() {
        let hash = TxHash([0xab; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        let back: TxHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
