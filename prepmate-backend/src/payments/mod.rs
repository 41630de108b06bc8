//! Credit metering and x402 payment settlement.
//!
//! Flow:
//! 1. `UsageGate::check_usage` prices an action in credits.
//! 2. Insufficient balance: `PaymentChallengeIssuer` builds the 402 body
//!    and a pending `payment_records` row is written.
//! 3. The caller pays on chain and retries with an `X-PAYMENT` header.
//! 4. `SettlementCoordinator` confirms the signature via `ChainVerifier`,
//!    corroborates transfers via `IndexerCrossChecker`, credits the ledger
//!    exactly once and marks the record confirmed.

pub mod challenge;
pub mod chain;
pub mod error;
pub mod indexer;
pub mod proof;
pub mod settlement;
pub mod types;
pub mod usage;

pub use challenge::PaymentChallengeIssuer;
pub use chain::ChainVerifier;
pub use error::PaymentError;
pub use indexer::IndexerCrossChecker;
pub use proof::PaymentProof;
pub use settlement::SettlementCoordinator;
pub use types::{PaymentStatus, SettlementResult, UsageCheckResult};
pub use usage::UsageGate;
