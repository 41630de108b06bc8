//! Independent cross-check of settled transfers via a block-explorer API.
//!
//! The indexer is a corroborating source, not the source of truth: when it
//! is unreachable or has not parsed the transaction yet, the check is
//! treated as non-blocking and settlement proceeds on the chain verdict
//! alone. Conclusive disagreement on recipient, mint or amount does fail
//! the settlement.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::types::VerificationResult;

/// One parsed token transfer reported by the explorer.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenTransfer {
    pub destination: String,
    pub token_address: String,
    pub amount: u64,
}

/// Explorer lookup surface. The HTTP implementation talks to a Solscan-style
/// API; tests script responses.
#[async_trait]
pub trait IndexerApi: Send + Sync {
    /// Token transfers of a transaction. An empty list means the indexer
    /// has not (yet) parsed any transfers for it.
    async fn token_transfers(&self, signature: &str) -> Result<Vec<TokenTransfer>, String>;
}

#[derive(Debug, Deserialize)]
struct IndexerResponse {
    success: bool,
    #[serde(default)]
    data: Vec<TokenTransfer>,
    #[serde(default)]
    error: Option<String>,
}

/// reqwest-backed explorer client.
pub struct HttpIndexerApi {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpIndexerApi {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IndexerApi for HttpIndexerApi {
    async fn token_transfers(&self, signature: &str) -> Result<Vec<TokenTransfer>, String> {
        let url = format!("{}/transaction/transfer?tx={}", self.base_url, signature);

        let mut request = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.header("token", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Indexer request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Indexer error ({}) from {}", status, url));
        }

        let body: IndexerResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse indexer response: {}", e))?;

        if !body.success {
            return Err(body
                .error
                .unwrap_or_else(|| "Indexer reported failure".to_string()));
        }

        Ok(body.data)
    }
}

/// Corroborates recipient, token mint and amount against the explorer.
pub struct IndexerCrossChecker {
    api: Option<Arc<dyn IndexerApi>>,
}

impl IndexerCrossChecker {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        let api: Option<Arc<dyn IndexerApi>> = if base_url.is_empty() {
            None
        } else {
            Some(Arc::new(HttpIndexerApi::new(base_url, api_key)))
        };
        Self { api }
    }

    pub fn with_api(api: Arc<dyn IndexerApi>) -> Self {
        Self { api: Some(api) }
    }

    /// Match the transaction's transfers against expectations, allowing the
    /// amount to deviate by `tolerance` (fraction of the expected amount).
    pub async fn cross_check(
        &self,
        transaction_id: &str,
        expected_recipient: &str,
        expected_token: &str,
        expected_amount: u64,
        tolerance: f64,
    ) -> VerificationResult {
        let api = match &self.api {
            Some(api) => api,
            None => {
                log::debug!("[indexer] Not configured - skipping cross-check");
                return VerificationResult::inconclusive(expected_amount, "indexer not configured");
            }
        };

        let transfers = match api.token_transfers(transaction_id).await {
            Ok(t) => t,
            Err(e) => {
                log::warn!(
                    "[indexer] Unreachable for {} - treating as non-blocking: {}",
                    transaction_id,
                    e
                );
                return VerificationResult::inconclusive(expected_amount, "indexer unreachable");
            }
        };

        if transfers.is_empty() {
            log::warn!(
                "[indexer] No parsed transfers for {} - treating as non-blocking",
                transaction_id
            );
            return VerificationResult::inconclusive(expected_amount, "no transfers indexed");
        }

        // Prefer the transfer aimed at our wallet; fall back to the first.
        let candidate = transfers
            .iter()
            .find(|t| t.destination == expected_recipient)
            .unwrap_or(&transfers[0]);

        let recipient_match = candidate.destination == expected_recipient;
        let token_match = candidate.token_address == expected_token;
        let allowed_deviation = (expected_amount as f64 * tolerance).round() as u64;
        let amount_match =
            candidate.amount.abs_diff(expected_amount) <= allowed_deviation;

        let success = recipient_match && token_match && amount_match;
        let error = if success {
            None
        } else {
            let mut problems = Vec::new();
            if !recipient_match {
                problems.push(format!(
                    "recipient {} != {}",
                    candidate.destination, expected_recipient
                ));
            }
            if !token_match {
                problems.push(format!(
                    "token {} != {}",
                    candidate.token_address, expected_token
                ));
            }
            if !amount_match {
                problems.push(format!(
                    "amount {} outside tolerance of {}",
                    candidate.amount, expected_amount
                ));
            }
            let message = problems.join("; ");
            log::warn!("[indexer] Discrepancy on {}: {}", transaction_id, message);
            Some(message)
        };

        VerificationResult {
            success,
            recipient_match,
            token_match,
            amount_match,
            actual_amount: Some(candidate.amount),
            expected_amount,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockIndexer {
        response: Result<Vec<TokenTransfer>, String>,
    }

    #[async_trait]
    impl IndexerApi for MockIndexer {
        async fn token_transfers(&self, _signature: &str) -> Result<Vec<TokenTransfer>, String> {
            self.response.clone()
        }
    }

    fn checker(response: Result<Vec<TokenTransfer>, String>) -> IndexerCrossChecker {
        IndexerCrossChecker::with_api(Arc::new(MockIndexer { response }))
    }

    fn transfer(destination: &str, token: &str, amount: u64) -> TokenTransfer {
        TokenTransfer {
            destination: destination.to_string(),
            token_address: token.to_string(),
            amount,
        }
    }

    #[tokio::test]
    async fn test_exact_match() {
        let c = checker(Ok(vec![transfer("WALLET", "MINT", 500000)]));
        let v = c.cross_check("sig", "WALLET", "MINT", 500000, 0.01).await;
        assert!(v.success);
        assert!(v.recipient_match && v.token_match && v.amount_match);
        assert_eq!(v.actual_amount, Some(500000));
    }

    #[tokio::test]
    async fn test_amount_within_tolerance() {
        let c = checker(Ok(vec![transfer("WALLET", "MINT", 499000)]));
        let v = c.cross_check("sig", "WALLET", "MINT", 500000, 0.01).await;
        assert!(v.success);
    }

    #[tokio::test]
    async fn test_amount_outside_tolerance() {
        let c = checker(Ok(vec![transfer("WALLET", "MINT", 400000)]));
        let v = c.cross_check("sig", "WALLET", "MINT", 500000, 0.01).await;
        assert!(!v.success);
        assert!(!v.amount_match);
        assert!(v.recipient_match && v.token_match);
    }

    #[tokio::test]
    async fn test_wrong_recipient() {
        let c = checker(Ok(vec![transfer("SOMEONE_ELSE", "MINT", 500000)]));
        let v = c.cross_check("sig", "WALLET", "MINT", 500000, 0.01).await;
        assert!(!v.success);
        assert!(!v.recipient_match);
    }

    #[tokio::test]
    async fn test_unreachable_is_non_blocking() {
        let c = checker(Err("connection refused".to_string()));
        let v = c.cross_check("sig", "WALLET", "MINT", 500000, 0.01).await;
        assert!(v.success);
        assert!(v.recipient_match && v.token_match && v.amount_match);
        assert_eq!(v.actual_amount, None);
    }

    #[tokio::test]
    async fn test_no_transfers_is_inconclusive() {
        let c = checker(Ok(vec![]));
        let v = c.cross_check("sig", "WALLET", "MINT", 500000, 0.01).await;
        assert!(v.success);
    }

    #[tokio::test]
    async fn test_unconfigured_is_non_blocking() {
        let c = IndexerCrossChecker::new("", None);
        let v = c.cross_check("sig", "WALLET", "MINT", 500000, 0.01).await;
        assert!(v.success);
    }
}
