//! Error type shared across the relayer library.

use alloy_primitives::B256;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A codec read ran past the end of the input.
    #[error("truncated input: needed {needed} more byte(s) at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// A Merkle audit path did not resolve to the expected root.
    #[error("merkle root mismatch: expected {expected}, computed {computed}")]
    RootMismatch { expected: B256, computed: B256 },

    /// A public key used a curve the destination verifier has no label for.
    #[error("unknown curve: {0}")]
    UnknownCurve(String),

    /// Malformed chain data (headers, notifications, stack items).
    #[error("chain data: {0}")]
    ChainData(String),

    #[error("store: {0}")]
    Store(#[from] sqlx::Error),

    /// A persisted value failed to decode.
    #[error("store corrupt: {0}")]
    Corrupt(String),

    #[error("rpc: {0}")]
    Rpc(String),

    /// A destination chain rejected a submission; the message is kept
    /// verbatim for classification.
    #[error("submission rejected: {0}")]
    Submission(String),

    /// The relayer address cannot cover the fees of a transaction.
    #[error("not enough balance in address: have {available}, need {required}")]
    InsufficientFunds { available: i64, required: i64 },

    #[error("config: {0}")]
    Config(String),

    /// A pipeline task ended abnormally.
    #[error("task: {0}")]
    Task(String),

    #[error("wallet: {0}")]
    Wallet(String),
}

impl RelayError {
    pub(crate) fn rpc(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }
}

impl From<jsonrpsee::core::client::Error> for RelayError {
    fn from(err: jsonrpsee::core::client::Error) -> Self {
        match err {
            // Call errors carry the remote message; the sync engine matches
            // on its contents to classify retriable failures.
            jsonrpsee::core::client::Error::Call(call) => {
                Self::Submission(call.message().to_owned())
            }
            other => Self::Rpc(other.to_string()),
        }
    }
}
