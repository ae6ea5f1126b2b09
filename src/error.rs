use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::chain::{AbiError, ChainError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No jobs found in {0}")]
    NoJobs(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Whether a failure may go away on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network blips, timeouts, nonce races, underpriced gas. Retried.
    Transient,
    /// Reverts, bad arguments, insufficient funds, bad configuration. Not retried.
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// What went wrong with a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Argument,
    InvalidArguments,
    Connection,
    Timeout,
    Nonce,
    Underpriced,
    Revert,
    InsufficientFunds,
    Rpc { code: i64 },
    Protocol,
    Cancelled,
}

impl FailureKind {
    /// The retry classification. Every retry decision in the engine goes
    /// through here.
    pub fn class(&self) -> ErrorClass {
        match self {
            FailureKind::Connection
            | FailureKind::Timeout
            | FailureKind::Nonce
            | FailureKind::Underpriced
            | FailureKind::Cancelled => ErrorClass::Transient,
            // Internal error and "limit exceeded" are node-side conditions.
            FailureKind::Rpc { code } if matches!(code, -32603 | -32005) => ErrorClass::Transient,
            FailureKind::Rpc { .. }
            | FailureKind::Configuration
            | FailureKind::Argument
            | FailureKind::InvalidArguments
            | FailureKind::Revert
            | FailureKind::InsufficientFunds
            | FailureKind::Protocol => ErrorClass::Permanent,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Configuration => write!(f, "configuration"),
            FailureKind::Argument => write!(f, "argument"),
            FailureKind::InvalidArguments => write!(f, "invalid arguments"),
            FailureKind::Connection => write!(f, "connection"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Nonce => write!(f, "nonce"),
            FailureKind::Underpriced => write!(f, "underpriced"),
            FailureKind::Revert => write!(f, "revert"),
            FailureKind::InsufficientFunds => write!(f, "insufficient funds"),
            FailureKind::Rpc { code } => write!(f, "rpc {code}"),
            FailureKind::Protocol => write!(f, "protocol"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<&AbiError> for FailureKind {
    fn from(err: &AbiError) -> Self {
        match err {
            AbiError::ArgumentCount { .. } | AbiError::InvalidArgument { .. } => FailureKind::InvalidArguments,
            AbiError::Decode(_) => FailureKind::Protocol,
            AbiError::UnsupportedType(_)
            | AbiError::FunctionNotFound(_)
            | AbiError::Json(_)
            | AbiError::Io { .. } => FailureKind::Configuration,
        }
    }
}

impl From<&ChainError> for FailureKind {
    fn from(err: &ChainError) -> Self {
        match err {
            ChainError::Connection(_) => FailureKind::Connection,
            ChainError::Timeout => FailureKind::Timeout,
            ChainError::Nonce(_) => FailureKind::Nonce,
            ChainError::Underpriced(_) => FailureKind::Underpriced,
            ChainError::InsufficientFunds(_) => FailureKind::InsufficientFunds,
            ChainError::Revert(_) => FailureKind::Revert,
            ChainError::Rpc { code, .. } => FailureKind::Rpc { code: *code },
            ChainError::InvalidResponse(_) => FailureKind::Protocol,
            ChainError::UnknownNetwork(_) | ChainError::Signing(_) => FailureKind::Configuration,
            ChainError::Abi(abi) => FailureKind::from(abi),
        }
    }
}

/// A classified, human-readable failure recorded in step results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub class: ErrorClass,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            class: kind.class(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

impl From<&ChainError> for Failure {
    fn from(err: &ChainError) -> Self {
        Failure::new(FailureKind::from(err), err.to_string())
    }
}

impl From<ChainError> for Failure {
    fn from(err: ChainError) -> Self {
        Failure::from(&err)
    }
}

impl From<AbiError> for Failure {
    fn from(err: AbiError) -> Self {
        Failure::new(FailureKind::from(&err), err.to_string())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.message, self.kind, self.class)
    }
}
