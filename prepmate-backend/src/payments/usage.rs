//! Usage gate: the metering entry point in front of credit-costed actions.

use std::sync::Arc;

use crate::db::tables::payment_records::placeholder_transaction_id;
use crate::db::Database;

use super::challenge::PaymentChallengeIssuer;
use super::proof::PaymentProof;
use super::settlement::SettlementCoordinator;
use super::types::{
    atomic_to_usd, usd_for_credits, usd_to_atomic, UsageCheckResult, MIN_TOPUP_USD,
    USDC_DECIMALS,
};

/// How far back we look for the pending challenge a proof belongs to.
const CHALLENGE_LOOKBACK_MINUTES: i64 = 60;

pub struct UsageGate {
    db: Arc<Database>,
    issuer: PaymentChallengeIssuer,
    settlement: Arc<SettlementCoordinator>,
    /// Wallet that receives top-ups; challenges cannot be issued without it.
    wallet: Option<String>,
    token_mint: String,
}

impl UsageGate {
    pub fn new(
        db: Arc<Database>,
        issuer: PaymentChallengeIssuer,
        settlement: Arc<SettlementCoordinator>,
        wallet: Option<String>,
        token_mint: String,
    ) -> Self {
        Self {
            db,
            issuer,
            settlement,
            wallet,
            token_mint,
        }
    }

    /// Check whether `user_id` can afford an action costing `cost` credits.
    ///
    /// Anonymous callers are not metered at all. A caller resubmitting with
    /// a payment proof gets that proof settled first; on success the action
    /// is allowed regardless of any stale balance read. Otherwise an
    /// insufficient balance produces a 402 challenge (and a pending record
    /// for reconciliation, whether or not the payment ever completes).
    pub async fn check_usage(
        &self,
        user_id: Option<&str>,
        action: &str,
        cost: i64,
        proof: Option<&PaymentProof>,
    ) -> UsageCheckResult {
        let user_id = match user_id {
            Some(id) if !id.is_empty() => id,
            _ => return UsageCheckResult::unmetered(),
        };

        let mut settlement_error = None;
        if let Some(proof) = proof {
            match self.settle_proof(user_id, proof).await {
                Ok(credits_added) => {
                    let balance = self.balance_of(user_id);
                    log::info!(
                        "[usage] {} settled payment for '{}': +{} credits",
                        user_id,
                        action,
                        credits_added
                    );
                    return UsageCheckResult {
                        allowed: true,
                        remaining: Some(balance - cost),
                        credits_available: Some(balance),
                        payment_required: None,
                        settlement_error: None,
                    };
                }
                Err(e) => {
                    log::warn!("[usage] Payment proof from {} rejected: {}", user_id, e);
                    settlement_error = Some(e);
                }
            }
        }

        let balance = self.balance_of(user_id);
        if balance >= cost {
            return UsageCheckResult {
                allowed: true,
                remaining: Some(balance - cost),
                credits_available: Some(balance),
                payment_required: None,
                settlement_error,
            };
        }

        let shortfall = cost - balance;
        let usd_amount = usd_for_credits(shortfall).max(MIN_TOPUP_USD);

        let wallet = match &self.wallet {
            Some(w) => w.clone(),
            None => {
                log::error!("[usage] No payment wallet configured - cannot issue challenge");
                return UsageCheckResult {
                    allowed: false,
                    remaining: Some(balance - cost),
                    credits_available: Some(balance),
                    payment_required: None,
                    settlement_error: settlement_error
                        .or_else(|| Some("payments not configured".to_string())),
                };
            }
        };

        // Pending record first, so abandoned challenges still leave a
        // reconciliation trail.
        let placeholder = placeholder_transaction_id(user_id);
        if let Err(e) = self.db.insert_pending_payment(
            &placeholder,
            user_id,
            usd_to_atomic(usd_amount, USDC_DECIMALS) as i64,
            &self.token_mint,
            &wallet,
        ) {
            log::error!("[usage] Failed to record pending challenge: {}", e);
        }

        log::info!(
            "[usage] {} short {} credits for '{}' - issuing ${} challenge",
            user_id,
            shortfall,
            action,
            usd_amount
        );

        UsageCheckResult {
            allowed: false,
            remaining: Some(balance - cost),
            credits_available: Some(balance),
            payment_required: Some(self.issuer.issue(usd_amount, &self.token_mint, &wallet)),
            settlement_error,
        }
    }

    /// Settle an attached proof against the challenge it answers.
    async fn settle_proof(&self, user_id: &str, proof: &PaymentProof) -> Result<i64, String> {
        let signature = proof.transaction_signature()?;

        // The pending challenge record carries the expected terms; without
        // one we fall back to the configured defaults with a minimum top-up.
        let pending = self
            .db
            .get_pending_payments_by_user(user_id, CHALLENGE_LOOKBACK_MINUTES)
            .unwrap_or_default();

        let (expected_amount, token, recipient) = match pending.first() {
            Some(record) => (
                record.expected_amount as u64,
                record.token.clone(),
                record.recipient.clone(),
            ),
            None => {
                let wallet = self
                    .wallet
                    .clone()
                    .ok_or_else(|| "payments not configured".to_string())?;
                (
                    usd_to_atomic(MIN_TOPUP_USD, USDC_DECIMALS),
                    self.token_mint.clone(),
                    wallet,
                )
            }
        };

        let usd_amount = atomic_to_usd(expected_amount, USDC_DECIMALS);
        let result = self
            .settlement
            .settle(
                user_id,
                &signature,
                expected_amount,
                usd_amount,
                &token,
                &recipient,
            )
            .await;

        if result.success {
            Ok(result.credits_added.unwrap_or(0))
        } else {
            Err(result
                .error
                .unwrap_or_else(|| "payment verification failed".to_string()))
        }
    }

    fn balance_of(&self, user_id: &str) -> i64 {
        self.db.get_credit_balance(user_id).unwrap_or_else(|e| {
            log::error!("[usage] Failed to read balance for {}: {}", user_id, e);
            0
        })
    }
}
