//! Local transaction signing for nodes that do not hold the sender's key.
//!
//! Transactions are legacy (type 0) with EIP-155 replay protection, which
//! every supported network accepts.

use std::fmt;

use k256::PublicKey;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rlp::RlpStream;
use sha3::{Digest, Keccak256};

use super::error::ChainError;
use super::types::{Address, TxHash};

/// A fully specified legacy transaction, ready to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx<'a> {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: &'a [u8],
}

impl LegacyTx<'_> {
    fn rlp(&self, v: u64, r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        stream.append(&trimmed(&self.nonce.to_be_bytes()));
        stream.append(&trimmed(&self.gas_price.to_be_bytes()));
        stream.append(&trimmed(&self.gas_limit.to_be_bytes()));
        stream.append(&self.to.0.to_vec());
        stream.append(&trimmed(&self.value.to_be_bytes()));
        stream.append(&self.data.to_vec());
        stream.append(&trimmed(&v.to_be_bytes()));
        stream.append(&trimmed(r));
        stream.append(&trimmed(s));
        stream.out().to_vec()
    }

    /// Hash signed over: the RLP list with `(chain_id, 0, 0)` in place of the
    /// signature.
    pub fn signing_hash(&self) -> [u8; 32] {
        keccak(&self.rlp(self.chain_id, &[], &[]))
    }
}

fn keccak(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

// RLP integers are big-endian with no leading zero bytes.
fn trimmed(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// A signed transaction and its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub raw: Vec<u8>,
    pub hash: TxHash,
}

/// Holds the sender's secp256k1 key.
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(key: &str) -> Result<Self, String> {
        let key = key.trim();
        let digits = key.strip_prefix("0x").unwrap_or(key);
        let bytes = hex::decode(digits).map_err(|e| format!("private key is not hex: {e}"))?;
        let key = SigningKey::from_slice(&bytes).map_err(|e| format!("invalid private key: {e}"))?;

        // Address = last 20 bytes of keccak(uncompressed public key without the 0x04 tag).
        let point = PublicKey::from(key.verifying_key()).to_encoded_point(false);
        let digest = keccak(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..]);
        Ok(Self {
            key,
            address: Address(address),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign(&self, tx: &LegacyTx<'_>) -> Result<SignedTx, ChainError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&tx.signing_hash())
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let v = u64::from(recovery_id.to_byte()) + tx.chain_id * 2 + 35;
        let bytes = signature.to_bytes();
        let (r, s) = bytes.split_at(32);

        let raw = tx.rlp(v, r, s);
        let hash = TxHash(keccak(&raw));
        Ok(SignedTx { raw, hash })
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
