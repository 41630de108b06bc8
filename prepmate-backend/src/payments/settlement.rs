//! Settlement orchestration: chain confirmation, indexer corroboration,
//! ledger credit and record keeping as one flow.

use std::sync::Arc;

use crate::db::Database;

use super::chain::ChainVerifier;
use super::error::PaymentError;
use super::indexer::IndexerCrossChecker;
use super::types::{credits_for_usd, PaymentStatus, SettlementResult};

/// Fraction of the expected amount the indexer-reported amount may deviate
/// by before the cross-check counts as a mismatch.
const AMOUNT_TOLERANCE: f64 = 0.01;

pub struct SettlementCoordinator {
    db: Arc<Database>,
    chain: ChainVerifier,
    indexer: IndexerCrossChecker,
    /// Serializes settlement flows within this process. Cross-instance
    /// safety comes from the UNIQUE transaction_id constraint in the store.
    settle_lock: tokio::sync::Mutex<()>,
}

impl SettlementCoordinator {
    pub fn new(db: Arc<Database>, chain: ChainVerifier, indexer: IndexerCrossChecker) -> Self {
        Self {
            db,
            chain,
            indexer,
            settle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Settle one payment: verify it on chain, corroborate via the indexer,
    /// credit the user exactly once, and record the outcome.
    pub async fn settle(
        &self,
        user_id: &str,
        transaction_id: &str,
        expected_amount: u64,
        usd_amount: f64,
        token: &str,
        recipient: &str,
    ) -> SettlementResult {
        let _guard = self.settle_lock.lock().await;

        // Replay prevention: a transaction id settles at most once.
        match self.db.get_payment_by_transaction_id(transaction_id) {
            Ok(Some(record)) if record.status == PaymentStatus::Confirmed => {
                log::warn!(
                    "[settlement] Replay attempt for {} by {}",
                    transaction_id,
                    user_id
                );
                return SettlementResult::err("already processed");
            }
            Ok(_) => {}
            Err(e) => return SettlementResult::err(format!("storage error: {}", e)),
        }

        match self
            .chain
            .confirm(transaction_id, expected_amount, token)
            .await
        {
            Ok(()) => {
                let verification = self
                    .indexer
                    .cross_check(
                        transaction_id,
                        recipient,
                        token,
                        expected_amount,
                        AMOUNT_TOLERANCE,
                    )
                    .await;
                if !verification.success {
                    let mismatch = PaymentError::Mismatch(
                        verification
                            .error
                            .unwrap_or_else(|| "indexer mismatch".to_string()),
                    );
                    self.record_outcome(
                        user_id,
                        transaction_id,
                        PaymentStatus::Failed,
                        expected_amount,
                        token,
                        recipient,
                    );
                    return SettlementResult::err(format!(
                        "payment verification failed: {}",
                        mismatch
                    ));
                }
            }
            Err(e) if e.is_network_class() => {
                // Availability over strictness: the chain could not be
                // reached at all, so we trust the client-side confirmation
                // that accompanied this proof and reconcile later.
                log::warn!(
                    "[settlement] {} - trusting client-side verification for {}",
                    e,
                    transaction_id
                );
            }
            Err(e) => {
                self.record_outcome(
                    user_id,
                    transaction_id,
                    PaymentStatus::Failed,
                    expected_amount,
                    token,
                    recipient,
                );
                return SettlementResult::err(format!("payment verification failed: {}", e));
            }
        }

        let credits = credits_for_usd(usd_amount);
        let new_balance = match self.credit_with_retry(user_id, credits, transaction_id) {
            Ok(balance) => balance,
            Err(e) => {
                // The payment is verified and still owed; the record stays
                // pending so a retried settle can credit it.
                return SettlementResult::err(format!("{}", e));
            }
        };

        self.record_outcome(
            user_id,
            transaction_id,
            PaymentStatus::Confirmed,
            expected_amount,
            token,
            recipient,
        );

        log::info!(
            "[settlement] Credited {} credits to {} for {} (balance now {})",
            credits,
            user_id,
            transaction_id,
            new_balance
        );
        SettlementResult::ok(credits)
    }

    /// Ledger writes after successful verification are retried once before
    /// surfacing; a verified payment is never discarded.
    fn credit_with_retry(
        &self,
        user_id: &str,
        credits: i64,
        transaction_id: &str,
    ) -> Result<i64, PaymentError> {
        match self.db.add_credits(user_id, credits) {
            Ok(balance) => Ok(balance),
            Err(first) => {
                log::error!(
                    "[settlement] Ledger write failed for {} ({}), retrying: {}",
                    user_id,
                    transaction_id,
                    first
                );
                self.db.add_credits(user_id, credits).map_err(|second| {
                    log::error!(
                        "[settlement] Payment {} verified but crediting failed - payment still owed: {}",
                        transaction_id,
                        second
                    );
                    PaymentError::from(second)
                })
            }
        }
    }

    fn record_outcome(
        &self,
        user_id: &str,
        transaction_id: &str,
        status: PaymentStatus,
        expected_amount: u64,
        token: &str,
        recipient: &str,
    ) {
        if let Err(e) = self.db.update_payment_status(
            user_id,
            transaction_id,
            status,
            expected_amount as i64,
            token,
            recipient,
        ) {
            log::error!(
                "[settlement] Failed to record {} for {}: {}",
                status,
                transaction_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::chain::{ChainRpc, SignatureStatus};
    use crate::payments::indexer::{IndexerApi, TokenTransfer};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const SIG: &str = "5j7s6NiJS3JAkvgkoc18WVAsiSaci2pxB2A6ueCJP4tprA2TFg9wSyTLeYouxPBJEMzJinENTkpA52YStRW5Dia7";
    const MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const WALLET: &str = "Ge3jkza5KRfXvaq3GELNLh6V1pjjdEKNpEdGXJgjjKUR";

    struct MockRpc {
        statuses: Mutex<VecDeque<Result<Option<SignatureStatus>, PaymentError>>>,
        tx_error: Option<Value>,
    }

    #[async_trait]
    impl ChainRpc for MockRpc {
        async fn signature_status(
            &self,
            _signature: &str,
        ) -> Result<Option<SignatureStatus>, PaymentError> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }

        async fn transaction_error(
            &self,
            _signature: &str,
        ) -> Result<Option<Value>, PaymentError> {
            Ok(self.tx_error.clone())
        }
    }

    struct MockIndexer {
        response: Result<Vec<TokenTransfer>, String>,
    }

    #[async_trait]
    impl IndexerApi for MockIndexer {
        async fn token_transfers(&self, _signature: &str) -> Result<Vec<TokenTransfer>, String> {
            self.response.clone()
        }
    }

    fn confirmed_status() -> SignatureStatus {
        SignatureStatus {
            slot: Some(1),
            confirmations: Some(10),
            err: None,
            confirmation_status: Some("confirmed".to_string()),
        }
    }

    fn test_db() -> (Arc<Database>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Arc::new(Database::new(path.to_str().unwrap()).unwrap());
        (db, dir)
    }

    fn coordinator(
        db: Arc<Database>,
        statuses: Vec<Result<Option<SignatureStatus>, PaymentError>>,
        indexer_response: Result<Vec<TokenTransfer>, String>,
    ) -> SettlementCoordinator {
        let chain = ChainVerifier::with_rpc(
            Arc::new(MockRpc {
                statuses: Mutex::new(statuses.into_iter().collect()),
                tx_error: None,
            }),
            Duration::from_millis(1),
            5,
        );
        let indexer = IndexerCrossChecker::with_api(Arc::new(MockIndexer {
            response: indexer_response,
        }));
        SettlementCoordinator::new(db, chain, indexer)
    }

    fn good_transfer() -> Vec<TokenTransfer> {
        vec![TokenTransfer {
            destination: WALLET.to_string(),
            token_address: MINT.to_string(),
            amount: 500000,
        }]
    }

    #[tokio::test]
    async fn test_successful_settlement_credits_user() {
        let (db, _dir) = test_db();
        // Confirms on the second poll, indexer corroborates.
        let c = coordinator(
            db.clone(),
            vec![Ok(None), Ok(Some(confirmed_status()))],
            Ok(good_transfer()),
        );

        let result = c.settle("user-1", SIG, 500000, 0.5, MINT, WALLET).await;
        assert!(result.success);
        assert_eq!(result.credits_added, Some(5));
        assert_eq!(db.get_credit_balance("user-1").unwrap(), 5);

        let record = db.get_payment_by_transaction_id(SIG).unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_replay_credits_exactly_once() {
        let (db, _dir) = test_db();
        let c = coordinator(
            db.clone(),
            vec![
                Ok(Some(confirmed_status())),
                Ok(Some(confirmed_status())),
            ],
            Ok(good_transfer()),
        );

        let first = c.settle("user-1", SIG, 500000, 0.5, MINT, WALLET).await;
        assert!(first.success);

        let second = c.settle("user-1", SIG, 500000, 0.5, MINT, WALLET).await;
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("already processed"));
        assert_eq!(db.get_credit_balance("user-1").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_chain_failure_marks_record_failed() {
        let (db, _dir) = test_db();
        let failed = SignatureStatus {
            err: Some(json!({"InstructionError": [0, "Custom"]})),
            ..confirmed_status()
        };
        let c = coordinator(db.clone(), vec![Ok(Some(failed))], Ok(good_transfer()));

        let result = c.settle("user-1", SIG, 500000, 0.5, MINT, WALLET).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("payment verification failed"));
        assert_eq!(db.get_credit_balance("user-1").unwrap(), 0);

        let record = db.get_payment_by_transaction_id(SIG).unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_network_error_falls_back_to_trust() {
        let (db, _dir) = test_db();
        let c = coordinator(
            db.clone(),
            vec![Err(PaymentError::Network("connection refused".into()))],
            Ok(good_transfer()),
        );

        let result = c.settle("user-1", SIG, 500000, 0.5, MINT, WALLET).await;
        assert!(result.success);
        assert_eq!(result.credits_added, Some(5));
        assert_eq!(db.get_credit_balance("user-1").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_uninitialized_verifier_falls_back_to_trust() {
        let (db, _dir) = test_db();
        let chain = ChainVerifier::new("");
        let indexer = IndexerCrossChecker::with_api(Arc::new(MockIndexer {
            response: Ok(good_transfer()),
        }));
        let c = SettlementCoordinator::new(db.clone(), chain, indexer);

        let result = c.settle("user-1", SIG, 500000, 0.5, MINT, WALLET).await;
        assert!(result.success);
        assert_eq!(db.get_credit_balance("user-1").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_indexer_mismatch_is_terminal() {
        let (db, _dir) = test_db();
        let wrong_recipient = vec![TokenTransfer {
            destination: "SomebodyElse11111111111111111111111111111111".to_string(),
            token_address: MINT.to_string(),
            amount: 500000,
        }];
        let c = coordinator(
            db.clone(),
            vec![Ok(Some(confirmed_status()))],
            Ok(wrong_recipient),
        );

        let result = c.settle("user-1", SIG, 500000, 0.5, MINT, WALLET).await;
        assert!(!result.success);
        assert_eq!(db.get_credit_balance("user-1").unwrap(), 0);
        let record = db.get_payment_by_transaction_id(SIG).unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_indexer_outage_does_not_block() {
        let (db, _dir) = test_db();
        let c = coordinator(
            db.clone(),
            vec![Ok(Some(confirmed_status()))],
            Err("indexer down".to_string()),
        );

        let result = c.settle("user-1", SIG, 500000, 0.5, MINT, WALLET).await;
        assert!(result.success);
        assert_eq!(db.get_credit_balance("user-1").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_settlement_rebinds_challenge_placeholder() {
        let (db, _dir) = test_db();
        let placeholder =
            crate::db::tables::payment_records::placeholder_transaction_id("user-1");
        db.insert_pending_payment(&placeholder, "user-1", 500000, MINT, WALLET)
            .unwrap();

        let c = coordinator(
            db.clone(),
            vec![Ok(Some(confirmed_status()))],
            Ok(good_transfer()),
        );
        let result = c.settle("user-1", SIG, 500000, 0.5, MINT, WALLET).await;
        assert!(result.success);

        // The placeholder became the confirmed record under the real id.
        assert!(db
            .get_payment_by_transaction_id(&placeholder)
            .unwrap()
            .is_none());
        let record = db.get_payment_by_transaction_id(SIG).unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_credits_rounding() {
        let (db, _dir) = test_db();
        let c = coordinator(
            db.clone(),
            vec![Ok(Some(confirmed_status()))],
            Ok(vec![TokenTransfer {
                destination: WALLET.to_string(),
                token_address: MINT.to_string(),
                amount: 1230000,
            }]),
        );

        let result = c.settle("user-1", SIG, 1230000, 1.23, MINT, WALLET).await;
        assert!(result.success);
        assert_eq!(result.credits_added, Some(12));
    }
}
