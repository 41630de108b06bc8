//! Chain-side payment confirmation via Solana JSON-RPC.
//!
//! A single confirmation attempt is a small state machine: poll
//! `getSignatureStatuses` at a fixed interval up to a bounded attempt
//! count, then fetch the full transaction and inspect its execution
//! result. Polling is strictly sequential - never fanned out - so a burst
//! of settlements cannot hammer the RPC endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::error::PaymentError;
use super::types::{MAX_SIGNATURE_LEN, MIN_SIGNATURE_LEN};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// One entry from getSignatureStatuses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub slot: Option<u64>,
    pub confirmations: Option<u64>,
    /// Non-null when the transaction failed on chain
    pub err: Option<Value>,
    /// "processed", "confirmed" or "finalized"
    pub confirmation_status: Option<String>,
}

impl SignatureStatus {
    fn is_committed(&self) -> bool {
        matches!(
            self.confirmation_status.as_deref(),
            Some("confirmed") | Some("finalized")
        )
    }
}

/// Minimal RPC surface the verifier needs. The HTTP implementation talks
/// JSON-RPC; tests script responses.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Status of a signature, or None while the chain has not seen it.
    async fn signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, PaymentError>;

    /// Execution error of a confirmed transaction (`meta.err`), or None
    /// when it executed cleanly. `NotFound` if the transaction is absent.
    async fn transaction_error(&self, signature: &str) -> Result<Option<Value>, PaymentError>;
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Value,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// reqwest-backed Solana RPC client.
pub struct HttpChainRpc {
    rpc_url: String,
    client: reqwest::Client,
}

impl HttpChainRpc {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, PaymentError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: 1,
        };

        log::debug!("[chain] {} to {}", method, self.rpc_url);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PaymentError::Network(format!("{} failed: {}", method, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::Network(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(PaymentError::Network(format!(
                "RPC error ({}) from {}: {}",
                status,
                self.rpc_url,
                if body.is_empty() { "empty response" } else { &body }
            )));
        }

        let rpc_response: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| PaymentError::Network(format!("Failed to parse RPC response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(PaymentError::Network(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| PaymentError::Network("RPC returned null result".to_string()))
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, PaymentError> {
        let params = json!([[signature], { "searchTransactionHistory": true }]);
        let result = self.rpc_call("getSignatureStatuses", params).await?;

        let entry = result
            .get("value")
            .and_then(|v| v.get(0))
            .cloned()
            .unwrap_or(Value::Null);
        if entry.is_null() {
            return Ok(None);
        }

        serde_json::from_value(entry)
            .map(Some)
            .map_err(|e| PaymentError::Network(format!("Malformed signature status: {}", e)))
    }

    async fn transaction_error(&self, signature: &str) -> Result<Option<Value>, PaymentError> {
        let params = json!([
            signature,
            {
                "encoding": "json",
                "commitment": "confirmed",
                "maxSupportedTransactionVersion": 0
            }
        ]);
        let result = self.rpc_call("getTransaction", params).await?;

        if result.is_null() {
            return Err(PaymentError::NotFound(signature.to_string()));
        }

        let err = result.get("meta").and_then(|m| m.get("err")).cloned();
        match err {
            Some(Value::Null) | None => Ok(None),
            Some(e) => Ok(Some(e)),
        }
    }
}

/// Polls the chain until a transaction reaches confirmed commitment, then
/// checks its execution outcome.
pub struct ChainVerifier {
    rpc: Option<Arc<dyn ChainRpc>>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl ChainVerifier {
    /// Build against an RPC endpoint. An empty URL leaves the verifier
    /// uninitialized; `confirm` then fails with `NotInitialized` and the
    /// coordinator decides what to do about it.
    pub fn new(rpc_url: &str) -> Self {
        let rpc: Option<Arc<dyn ChainRpc>> = if rpc_url.is_empty() {
            None
        } else {
            Some(Arc::new(HttpChainRpc::new(rpc_url)))
        };
        Self {
            rpc,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Build with an explicit transport and timing, used by tests.
    pub fn with_rpc(rpc: Arc<dyn ChainRpc>, poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            rpc: Some(rpc),
            poll_interval,
            max_attempts,
        }
    }

    /// Confirm that `transaction_id` landed on chain and executed cleanly.
    ///
    /// Ids outside the sane signature length band are rejected before any
    /// network call is made.
    pub async fn confirm(
        &self,
        transaction_id: &str,
        expected_amount: u64,
        expected_token: &str,
    ) -> Result<(), PaymentError> {
        let len = transaction_id.len();
        if !(MIN_SIGNATURE_LEN..=MAX_SIGNATURE_LEN).contains(&len) {
            return Err(PaymentError::InvalidFormat(format!(
                "signature length {} outside {}..={}",
                len, MIN_SIGNATURE_LEN, MAX_SIGNATURE_LEN
            )));
        }

        let rpc = self.rpc.as_ref().ok_or(PaymentError::NotInitialized)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match rpc.signature_status(transaction_id).await? {
                Some(status) => {
                    if let Some(err) = &status.err {
                        // Terminal: the chain rejected the transaction.
                        return Err(PaymentError::ChainFailure(err.to_string()));
                    }
                    if status.is_committed() {
                        log::debug!(
                            "[chain] {} {} at slot {:?} ({:?} confirmations) after {} attempt(s)",
                            transaction_id,
                            status.confirmation_status.as_deref().unwrap_or("committed"),
                            status.slot,
                            status.confirmations,
                            attempt
                        );
                        break;
                    }
                }
                None => {
                    log::debug!(
                        "[chain] {} not yet visible (attempt {}/{})",
                        transaction_id,
                        attempt,
                        self.max_attempts
                    );
                }
            }

            if attempt >= self.max_attempts {
                return Err(PaymentError::Timeout { attempts: attempt });
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        // Confirmation status alone does not cover on-chain execution
        // failures; the transaction record carries those separately.
        if let Some(err) = rpc.transaction_error(transaction_id).await? {
            return Err(PaymentError::ChainFailure(err.to_string()));
        }

        log::info!(
            "[chain] Verified {} ({} atomic units of {})",
            transaction_id,
            expected_amount,
            expected_token
        );
        Ok(())
    }
}
