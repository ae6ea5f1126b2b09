//! Minimal Solidity ABI codec.
//!
//! Covers the parameter types scheduled calls actually use: `address`,
//! `uintN`, `intN`, `bool`, `bytesN`, `bytes`, `string` and dynamic arrays of
//! those. Tuples and fixed-size arrays are rejected as unsupported.
//!
//! Integers are carried as full 256-bit words, so `MaxUint256` approvals and
//! `int256` values encode exactly. `intN` tokens hold the two's-complement
//! word. Calculators that do arithmetic read uints through
//! [`Token::as_uint`], which saturates at `u128::MAX`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ruint::aliases::U256;
use serde::Deserialize;
use serde_json::Value;
use sha3::{Digest, Keccak256};
use thiserror::Error;

use super::types::Address;

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AbiError {
    #[error("unsupported ABI type: {0}")]
    UnsupportedType(String),

    #[error("function `{0}` not found in ABI")]
    FunctionNotFound(String),

    #[error("function `{name}` expects {expected} arguments, got {got}")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("argument {index} ({kind}): {reason}")]
    InvalidArgument {
        index: usize,
        kind: String,
        reason: String,
    },

    #[error("malformed return data: {0}")]
    Decode(String),

    #[error("invalid ABI JSON: {0}")]
    Json(String),

    #[error("cannot read ABI file {path}: {reason}")]
    Io { path: String, reason: String },
}

/// A Solidity parameter type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint(usize),
    Int(usize),
    Bool,
    String,
    Bytes,
    FixedBytes(usize),
    Array(Box<ParamType>),
}

impl ParamType {
    pub fn parse(s: &str) -> Result<Self, AbiError> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix("[]") {
            return Ok(ParamType::Array(Box::new(ParamType::parse(inner)?)));
        }
        if s.ends_with(']') || s.starts_with("tuple") || s.starts_with('(') {
            return Err(AbiError::UnsupportedType(s.to_string()));
        }
        match s {
            "address" => return Ok(ParamType::Address),
            "bool" => return Ok(ParamType::Bool),
            "string" => return Ok(ParamType::String),
            "bytes" => return Ok(ParamType::Bytes),
            "uint" => return Ok(ParamType::Uint(256)),
            "int" => return Ok(ParamType::Int(256)),
            _ => {}
        }
        let sized = |digits: &str, max: usize, step: usize| -> Option<usize> {
            let n: usize = digits.parse().ok()?;
            (n > 0 && n <= max && n % step == 0).then_some(n)
        };
        if let Some(bits) = s.strip_prefix("uint").and_then(|d| sized(d, 256, 8)) {
            return Ok(ParamType::Uint(bits));
        }
        if let Some(bits) = s.strip_prefix("int").and_then(|d| sized(d, 256, 8)) {
            return Ok(ParamType::Int(bits));
        }
        if let Some(len) = s.strip_prefix("bytes").and_then(|d| sized(d, 32, 1)) {
            return Ok(ParamType::FixedBytes(len));
        }
        Err(AbiError::UnsupportedType(s.to_string()))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            ParamType::String | ParamType::Bytes | ParamType::Array(_)
        )
    }

    /// Coerce a JSON configuration value into a token of this type.
    pub fn coerce(&self, value: &Value) -> Result<Token, String> {
        match self {
            ParamType::Address => {
                let s = value.as_str().ok_or("expected an address string")?;
                Ok(Token::Address(s.parse()?))
            }
            ParamType::Uint(bits) => {
                let n = match value {
                    Value::Number(n) => n
                        .as_u64()
                        .map(U256::from)
                        .ok_or_else(|| format!("expected a non-negative integer, got {n}"))?,
                    Value::String(s) => parse_uint(s)?,
                    other => return Err(format!("expected an unsigned integer, got {other}")),
                };
                if n.bit_len() > *bits {
                    return Err(format!("{n} does not fit in uint{bits}"));
                }
                Ok(Token::Uint(n))
            }
            ParamType::Int(bits) => {
                let text = match value {
                    Value::Number(n) => n
                        .as_i64()
                        .map(|n| n.to_string())
                        .ok_or_else(|| format!("expected an integer, got {n}"))?,
                    Value::String(s) => s.trim().to_string(),
                    other => return Err(format!("expected an integer, got {other}")),
                };
                let (negative, digits) = match text.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, text.as_str()),
                };
                let magnitude = parse_uint(digits).map_err(|_| format!("invalid integer {text:?}"))?;
                // intN spans -2^(N-1) ..= 2^(N-1) - 1.
                let limit = U256::from(1u8) << (bits - 1);
                if magnitude > limit || (!negative && magnitude == limit) {
                    return Err(format!("{text} does not fit in int{bits}"));
                }
                Ok(Token::Int(if negative {
                    magnitude.wrapping_neg()
                } else {
                    magnitude
                }))
            }
            ParamType::Bool => match value {
                Value::Bool(b) => Ok(Token::Bool(*b)),
                Value::String(s) if s == "true" => Ok(Token::Bool(true)),
                Value::String(s) if s == "false" => Ok(Token::Bool(false)),
                other => Err(format!("expected a boolean, got {other}")),
            },
            ParamType::String => value
                .as_str()
                .map(|s| Token::String(s.to_string()))
                .ok_or_else(|| format!("expected a string, got {value}")),
            ParamType::Bytes => Ok(Token::Bytes(parse_hex_bytes(value)?)),
            ParamType::FixedBytes(len) => {
                let bytes = parse_hex_bytes(value)?;
                if bytes.len() != *len {
                    return Err(format!("expected {len} bytes, got {}", bytes.len()));
                }
                Ok(Token::FixedBytes(bytes))
            }
            ParamType::Array(inner) => {
                let items = value.as_array().ok_or("expected an array")?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| inner.coerce(item).map_err(|e| format!("element {i}: {e}")))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Token::Array)
            }
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Address => write!(f, "address"),
            ParamType::Uint(bits) => write!(f, "uint{bits}"),
            ParamType::Int(bits) => write!(f, "int{bits}"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::String => write!(f, "string"),
            ParamType::Bytes => write!(f, "bytes"),
            ParamType::FixedBytes(len) => write!(f, "bytes{len}"),
            ParamType::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

fn parse_uint(s: &str) -> Result<U256, String> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x") {
        Some(hex_digits) => (hex_digits, 16),
        None => (s, 10),
    };
    if digits.is_empty() {
        return Err(format!("invalid unsigned integer {s:?}: no digits"));
    }
    U256::from_str_radix(digits, radix).map_err(|e| format!("invalid unsigned integer {s:?}: {e}"))
}

fn parse_hex_bytes(value: &Value) -> Result<Vec<u8>, String> {
    let s = value.as_str().ok_or("expected a 0x-prefixed hex string")?;
    let digits = s.strip_prefix("0x").ok_or("expected a 0x-prefixed hex string")?;
    hex::decode(digits).map_err(|e| format!("invalid hex {s:?}: {e}"))
}

/// A decoded or to-be-encoded ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    /// Two's-complement word.
    Int(U256),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    FixedBytes(Vec<u8>),
    Array(Vec<Token>),
}

impl Token {
    #[cfg(test)]
    pub fn uint(n: u128) -> Self {
        Token::Uint(U256::from(n))
    }

    /// Value of a `uint` token, saturating at `u128::MAX`.
    pub fn as_uint(&self) -> Option<u128> {
        match self {
            Token::Uint(n) => {
                let limbs = n.as_limbs();
                if limbs[2] != 0 || limbs[3] != 0 {
                    Some(u128::MAX)
                } else {
                    Some(u128::from(limbs[0]) | (u128::from(limbs[1]) << 64))
                }
            }
            _ => None,
        }
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_) | Token::Bytes(_) | Token::Array(_))
    }
}

fn word_from_u128(n: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&n.to_be_bytes());
    word
}

fn padded(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % WORD;
    if rem != 0 {
        out.resize(out.len() + WORD - rem, 0);
    }
    out
}

fn encode_static(token: &Token) -> [u8; WORD] {
    match token {
        Token::Address(a) => {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(&a.0);
            word
        }
        Token::Uint(n) | Token::Int(n) => n.to_be_bytes::<WORD>(),
        Token::Bool(b) => word_from_u128(u128::from(*b)),
        Token::FixedBytes(bytes) => {
            let mut word = [0u8; WORD];
            word[..bytes.len()].copy_from_slice(bytes);
            word
        }
        Token::String(_) | Token::Bytes(_) | Token::Array(_) => [0u8; WORD],
    }
}

fn encode_dynamic(token: &Token) -> Vec<u8> {
    match token {
        Token::String(s) => {
            let mut out = word_from_u128(s.len() as u128).to_vec();
            out.extend(padded(s.as_bytes()));
            out
        }
        Token::Bytes(b) => {
            let mut out = word_from_u128(b.len() as u128).to_vec();
            out.extend(padded(b));
            out
        }
        Token::Array(items) => {
            let mut out = word_from_u128(items.len() as u128).to_vec();
            out.extend(encode_tokens(items));
            out
        }
        other => encode_static(other).to_vec(),
    }
}

/// Head/tail encode a sequence of tokens.
pub fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    let head_len = WORD * tokens.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&word_from_u128((head_len + tail.len()) as u128));
            tail.extend(encode_dynamic(token));
        } else {
            head.extend_from_slice(&encode_static(token));
        }
    }
    head.extend(tail);
    head
}

fn read_word(data: &[u8], at: usize) -> Result<&[u8], AbiError> {
    at.checked_add(WORD)
        .and_then(|end| data.get(at..end))
        .ok_or_else(|| AbiError::Decode(format!("word at offset {at} out of bounds ({} bytes)", data.len())))
}

fn read_usize(data: &[u8], at: usize) -> Result<usize, AbiError> {
    let word = read_word(data, at)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::Decode(format!("offset/length at {at} too large")));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf) as usize)
}

fn decode_static(kind: &ParamType, word: &[u8]) -> Token {
    let mut full = [0u8; WORD];
    full.copy_from_slice(word);
    match kind {
        ParamType::Address => {
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&word[12..]);
            Token::Address(Address(addr))
        }
        ParamType::Uint(_) => Token::Uint(U256::from_be_bytes(full)),
        ParamType::Int(_) => Token::Int(U256::from_be_bytes(full)),
        ParamType::Bool => Token::Bool(word[WORD - 1] != 0),
        ParamType::FixedBytes(len) => Token::FixedBytes(word[..*len].to_vec()),
        ParamType::String | ParamType::Bytes | ParamType::Array(_) => Token::Bytes(Vec::new()),
    }
}

fn decode_dynamic(kind: &ParamType, data: &[u8], at: usize) -> Result<Token, AbiError> {
    let len = read_usize(data, at)?;
    // `read_usize` proved `at + WORD <= data.len()`.
    let start = at + WORD;
    let remaining = data.len() - start;
    match kind {
        ParamType::String | ParamType::Bytes => {
            let bytes = data[start..]
                .get(..len)
                .ok_or_else(|| AbiError::Decode(format!("{len} bytes at {start} out of bounds")))?
                .to_vec();
            if *kind == ParamType::String {
                String::from_utf8(bytes)
                    .map(Token::String)
                    .map_err(|e| AbiError::Decode(e.to_string()))
            } else {
                Ok(Token::Bytes(bytes))
            }
        }
        ParamType::Array(inner) => {
            // Every element takes at least one head word.
            if len.checked_mul(WORD).is_none_or(|need| need > remaining) {
                return Err(AbiError::Decode(format!(
                    "array of {len} elements at {start} exceeds {remaining} remaining bytes"
                )));
            }
            let kinds = vec![(**inner).clone(); len];
            decode_params(&kinds, data, start).map(Token::Array)
        }
        other => Ok(decode_static(other, read_word(data, at)?)),
    }
}

fn decode_params(kinds: &[ParamType], data: &[u8], base: usize) -> Result<Vec<Token>, AbiError> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            let head = base + WORD * i;
            if kind.is_dynamic() {
                let offset = read_usize(data, head)?;
                let at = base
                    .checked_add(offset)
                    .ok_or_else(|| AbiError::Decode(format!("offset {offset} at {head} out of bounds")))?;
                decode_dynamic(kind, data, at)
            } else {
                Ok(decode_static(kind, read_word(data, head)?))
            }
        })
        .collect()
}

/// Decode ABI-encoded data into tokens of the given types.
pub fn decode(kinds: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    decode_params(kinds, data, 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ParamType,
}

/// A callable contract function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Param>,
}

impl Function {
    pub fn new(name: &str, inputs: Vec<ParamType>, outputs: Vec<ParamType>) -> Self {
        let unnamed = |kind| Param {
            name: String::new(),
            kind,
        };
        Self {
            name: name.to_string(),
            inputs: inputs.into_iter().map(unnamed).collect(),
            outputs: outputs.into_iter().map(unnamed).collect(),
        }
    }

    /// Canonical signature, e.g. `transfer(address,uint256)`.
    pub fn signature(&self) -> String {
        let kinds: Vec<String> = self.inputs.iter().map(|p| p.kind.to_string()).collect();
        format!("{}({})", self.name, kinds.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        let digest = Keccak256::digest(self.signature().as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&digest[..4]);
        selector
    }

    /// Coerce JSON arguments against the input types.
    pub fn coerce_args(&self, args: &[Value]) -> Result<Vec<Token>, AbiError> {
        if args.len() != self.inputs.len() {
            return Err(AbiError::ArgumentCount {
                name: self.name.clone(),
                expected: self.inputs.len(),
                got: args.len(),
            });
        }
        self.inputs
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (param, value))| {
                param.kind.coerce(value).map_err(|reason| AbiError::InvalidArgument {
                    index,
                    kind: param.kind.to_string(),
                    reason,
                })
            })
            .collect()
    }

    /// Build calldata (selector + encoded arguments) from JSON arguments.
    pub fn encode_input(&self, args: &[Value]) -> Result<Vec<u8>, AbiError> {
        let tokens = self.coerce_args(args)?;
        Ok(self.encode_tokens(&tokens))
    }

    pub fn encode_tokens(&self, tokens: &[Token]) -> Vec<u8> {
        let mut data = self.selector().to_vec();
        data.extend(encode_tokens(tokens));
        data
    }

    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>, AbiError> {
        let kinds: Vec<ParamType> = self.outputs.iter().map(|p| p.kind.clone()).collect();
        decode(&kinds, data)
    }
}

#[derive(Debug, Deserialize)]
struct RawParam {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(rename = "type", default = "default_entry_type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<RawParam>,
    #[serde(default)]
    outputs: Vec<RawParam>,
}

fn default_entry_type() -> String {
    "function".to_string()
}

/// The callable functions of a contract ABI.
#[derive(Debug, Clone, Default)]
pub struct Abi {
    functions: Vec<Function>,
    // Functions whose signature uses an unsupported type, with the reason.
    unsupported: HashMap<String, String>,
}

impl Abi {
    /// Parse a JSON ABI: either a bare array of entries or an artifact
    /// object with an `abi` field.
    pub fn from_json(json: &str) -> Result<Self, AbiError> {
        let value: Value = serde_json::from_str(json).map_err(|e| AbiError::Json(e.to_string()))?;
        let entries = match value {
            Value::Object(mut obj) => obj
                .remove("abi")
                .ok_or_else(|| AbiError::Json("expected an array or an object with `abi`".into()))?,
            other => other,
        };
        let entries: Vec<RawEntry> =
            serde_json::from_value(entries).map_err(|e| AbiError::Json(e.to_string()))?;

        let mut abi = Abi::default();
        for entry in entries.into_iter().filter(|e| e.kind == "function") {
            let params = |raw: Vec<RawParam>| -> Result<Vec<Param>, AbiError> {
                raw.into_iter()
                    .map(|p| {
                        Ok(Param {
                            name: p.name,
                            kind: ParamType::parse(&p.kind)?,
                        })
                    })
                    .collect()
            };
            match (params(entry.inputs), params(entry.outputs)) {
                (Ok(inputs), Ok(outputs)) => abi.functions.push(Function {
                    name: entry.name,
                    inputs,
                    outputs,
                }),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::debug!(function = %entry.name, error = %e, "skipping ABI entry");
                    abi.unsupported.insert(entry.name, e.to_string());
                }
            }
        }
        Ok(abi)
    }

    /// Find a function by name; overloads are disambiguated by argument count.
    pub fn function(&self, name: &str, arg_count: usize) -> Result<&Function, AbiError> {
        let candidates: Vec<&Function> = self.functions.iter().filter(|f| f.name == name).collect();
        match candidates.as_slice() {
            [] => match self.unsupported.get(name) {
                Some(reason) => Err(AbiError::UnsupportedType(format!("{name}: {reason}"))),
                None => Err(AbiError::FunctionNotFound(name.to_string())),
            },
            [only] => Ok(only),
            many => many
                .iter()
                .find(|f| f.inputs.len() == arg_count)
                .copied()
                .ok_or_else(|| AbiError::FunctionNotFound(format!("{name}/{arg_count}"))),
        }
    }
}

/// Loads ABI files relative to a base directory and caches them.
pub struct AbiStore {
    base_dir: PathBuf,
    cache: Mutex<HashMap<PathBuf, Arc<Abi>>>,
}

impl AbiStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(&self, path: &Path) -> Result<Arc<Abi>, AbiError> {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };

        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(abi) = cache.get(&full) {
            return Ok(Arc::clone(abi));
        }

        let contents = std::fs::read_to_string(&full).map_err(|e| AbiError::Io {
            path: full.display().to_string(),
            reason: e.to_string(),
        })?;
        let abi = Arc::new(Abi::from_json(&contents)?);
        cache.insert(full, Arc::clone(&abi));
        Ok(abi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn words(data: &[u8]) -> Vec<String> {
        data.chunks(WORD).map(hex::encode).collect()
    }

    #[test]
    fn well_known_selectors() {
        let transfer = Function::new("transfer", vec![ParamType::Address, ParamType::Uint(256)], vec![]);
        assert_eq!(hex::encode(transfer.selector()), "a9059cbb");

        let balance_of = Function::new("balanceOf", vec![ParamType::Address], vec![ParamType::Uint(256)]);
        assert_eq!(hex::encode(balance_of.selector()), "70a08231");

        let allowance = Function::new(
            "allowance",
            vec![ParamType::Address, ParamType::Address],
            vec![ParamType::Uint(256)],
        );
        assert_eq!(hex::encode(allowance.selector()), "dd62ed3e");
    }

    #[test]
    fn parse_param_types() {
        assert_eq!(ParamType::parse("uint").unwrap(), ParamType::Uint(256));
        assert_eq!(ParamType::parse("uint8").unwrap(), ParamType::Uint(8));
        assert_eq!(ParamType::parse("bytes32").unwrap(), ParamType::FixedBytes(32));
        assert_eq!(
            ParamType::parse("address[]").unwrap(),
            ParamType::Array(Box::new(ParamType::Address))
        );
        assert!(matches!(ParamType::parse("uint7"), Err(AbiError::UnsupportedType(_))));
        assert!(matches!(ParamType::parse("tuple"), Err(AbiError::UnsupportedType(_))));
        assert!(matches!(ParamType::parse("uint256[2]"), Err(AbiError::UnsupportedType(_))));
    }

    #[test]
    fn encode_swap_with_dynamic_path() {
        let swap = Function::new(
            "swapExactTokensForTokens",
            vec![
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Array(Box::new(ParamType::Address)),
                ParamType::Address,
                ParamType::Uint(256),
            ],
            vec![],
        );
        assert_eq!(hex::encode(swap.selector()), "38ed1739");

        let data = swap
            .encode_input(&[
                json!("1000000000000000000"),
                json!(0),
                json!([
                    "0x1111111111111111111111111111111111111111",
                    "0x2222222222222222222222222222222222222222"
                ]),
                json!("0x9876543210987654321098765432109876543210"),
                json!(1700000000u64),
            ])
            .unwrap();

        let body = words(&data[4..]);
        assert_eq!(body.len(), 8);
        assert_eq!(body[0], format!("{:064x}", 1_000_000_000_000_000_000u128));
        assert_eq!(body[2], format!("{:064x}", 0xa0));
        assert_eq!(body[4], format!("{:064x}", 1_700_000_000u64));
        assert_eq!(body[5], format!("{:064x}", 2));
        assert_eq!(body[6], format!("{:0>64}", "1111111111111111111111111111111111111111"));
    }

    #[test]
    fn encode_negative_int_sign_extends() {
        let token = ParamType::Int(256).coerce(&json!(-1)).unwrap();
        let data = encode_tokens(&[token]);
        assert!(data.iter().all(|b| *b == 0xff));
    }

    #[test]
    fn int_bounds_follow_the_declared_width() {
        assert!(ParamType::Int(8).coerce(&json!(-128)).is_ok());
        assert!(ParamType::Int(8).coerce(&json!(127)).is_ok());
        assert!(ParamType::Int(8).coerce(&json!(128)).is_err());
        assert!(ParamType::Int(8).coerce(&json!(-129)).is_err());

        let min = format!("-{}", U256::from(1u8) << 255usize);
        let token = ParamType::Int(256).coerce(&json!(min)).unwrap();
        let data = encode_tokens(&[token]);
        assert_eq!(data[0], 0x80);
        assert!(data[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn uint256_max_encodes_exactly() {
        let max = format!("0x{}", "f".repeat(64));
        let approve = Function::new("approve", vec![ParamType::Address, ParamType::Uint(256)], vec![]);
        let data = approve
            .encode_input(&[json!("0x1111111111111111111111111111111111111111"), json!(max)])
            .unwrap();
        assert!(data[4 + WORD..].iter().all(|b| *b == 0xff));

        let decimal = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        assert_eq!(
            ParamType::Uint(256).coerce(&json!(decimal)).unwrap(),
            Token::Uint(U256::MAX)
        );
        assert!(ParamType::Uint(128).coerce(&json!(decimal)).is_err());
    }

    #[test]
    fn coerce_rejects_mismatches() {
        let f = Function::new("mint", vec![ParamType::Address, ParamType::Uint(8)], vec![]);
        assert!(matches!(
            f.encode_input(&[json!("0x1111111111111111111111111111111111111111")]),
            Err(AbiError::ArgumentCount { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            f.encode_input(&[json!("not-an-address"), json!(1)]),
            Err(AbiError::InvalidArgument { index: 0, .. })
        ));
        assert!(matches!(
            f.encode_input(&[json!("0x1111111111111111111111111111111111111111"), json!(256)]),
            Err(AbiError::InvalidArgument { index: 1, .. })
        ));
    }

    #[test]
    fn uint_accepts_hex_and_decimal_strings() {
        assert_eq!(ParamType::Uint(256).coerce(&json!("0x10")).unwrap(), Token::uint(16));
        assert_eq!(ParamType::Uint(256).coerce(&json!("16")).unwrap(), Token::uint(16));
        assert!(ParamType::Uint(256).coerce(&json!("0x")).is_err());
        assert!(ParamType::Uint(256).coerce(&json!(-1)).is_err());
        assert!(ParamType::Uint(256).coerce(&json!(1.5)).is_err());
    }

    #[test]
    fn decode_static_and_dynamic_outputs() {
        let encoded = encode_tokens(&[
            Token::uint(42),
            Token::String("hello".into()),
            Token::Bool(true),
        ]);
        let tokens = decode(
            &[ParamType::Uint(256), ParamType::String, ParamType::Bool],
            &encoded,
        )
        .unwrap();
        assert_eq!(
            tokens,
            vec![Token::uint(42), Token::String("hello".into()), Token::Bool(true)]
        );
    }

    #[test]
    fn decode_keeps_full_width_and_as_uint_saturates() {
        let max = [0xffu8; WORD];
        let tokens = decode(&[ParamType::Uint(256)], &max).unwrap();
        assert_eq!(tokens, vec![Token::Uint(U256::MAX)]);
        assert_eq!(tokens[0].as_uint(), Some(u128::MAX));
        assert_eq!(Token::uint(7).as_uint(), Some(7));
    }

    #[test]
    fn decode_short_data_errors() {
        assert!(matches!(decode(&[ParamType::Uint(256)], &[0u8; 4]), Err(AbiError::Decode(_))));
    }

    #[test]
    fn decode_rejects_lengths_and_offsets_past_the_data() {
        let huge = word_from_u128(u128::from(u64::MAX));

        let mut array = word_from_u128(0x20).to_vec();
        array.extend_from_slice(&huge);
        let uints = ParamType::Array(Box::new(ParamType::Uint(256)));
        assert!(matches!(decode(&[uints], &array), Err(AbiError::Decode(_))));

        assert!(matches!(decode(&[ParamType::String], &huge), Err(AbiError::Decode(_))));
        assert!(matches!(decode(&[ParamType::Bytes], &array), Err(AbiError::Decode(_))));
    }

    #[test]
    fn abi_from_artifact_and_overloads() {
        let json = r#"{"abi": [
            {"type": "function", "name": "run", "inputs": [{"name": "to", "type": "address"}], "outputs": []},
            {"type": "function", "name": "run", "inputs": [], "outputs": []},
            {"type": "event", "name": "Ran", "inputs": []},
            {"type": "function", "name": "complex", "inputs": [{"name": "t", "type": "tuple"}], "outputs": []}
        ]}"#;
        let abi = Abi::from_json(json).unwrap();
        assert_eq!(abi.function("run", 1).unwrap().inputs.len(), 1);
        assert_eq!(abi.function("run", 0).unwrap().inputs.len(), 0);
        assert!(matches!(abi.function("Ran", 0), Err(AbiError::FunctionNotFound(_))));
        assert!(matches!(abi.function("complex", 1), Err(AbiError::UnsupportedType(_))));
    }

    #[test]
    fn store_loads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(
            &path,
            r#"[{"type":"function","name":"mint","inputs":[{"name":"to","type":"address"}],"outputs":[]}]"#,
        )
        .unwrap();

        let store = AbiStore::new(dir.path());
        let first = store.load(Path::new("token.json")).unwrap();
        std::fs::remove_file(&path).unwrap();
        let second = store.load(Path::new("token.json")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(store.load(Path::new("missing.json")), Err(AbiError::Io { .. })));
    }
}
