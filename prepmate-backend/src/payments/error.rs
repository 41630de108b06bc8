//! Error taxonomy for payment verification and settlement.

use thiserror::Error;

/// Errors surfaced by the verification pipeline.
///
/// `Network` and `NotInitialized` are the recoverable class: they mean we
/// could not reach the chain at all, not that the payment is bad, and the
/// settlement coordinator may fall back to trusting the client-side
/// confirmation for them. Everything else is terminal for the transaction.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid transaction id format: {0}")]
    InvalidFormat(String),

    #[error("chain verifier is not connected to an RPC endpoint")]
    NotInitialized,

    #[error("transaction not found on chain: {0}")]
    NotFound(String),

    #[error("on-chain execution failed: {0}")]
    ChainFailure(String),

    #[error("confirmation not reached after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("payment does not match requirements: {0}")]
    Mismatch(String),

    #[error("rpc endpoint unreachable: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// True for failures that say nothing about the payment itself, only
    /// about our ability to check it.
    pub fn is_network_class(&self) -> bool {
        matches!(self, PaymentError::Network(_) | PaymentError::NotInitialized)
    }
}

impl From<rusqlite::Error> for PaymentError {
    fn from(e: rusqlite::Error) -> Self {
        PaymentError::Storage(e.to_string())
    }
}
