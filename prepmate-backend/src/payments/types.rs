//! x402 protocol data types and credit conversion helpers.

use serde::{Deserialize, Serialize};

/// x402 protocol version used in challenges and proofs
pub const X402_VERSION: u8 = 1;

/// Payment scheme: full amount transferred up front
pub const SCHEME_EXACT: &str = "exact";

/// USDC token decimals
pub const USDC_DECIMALS: u8 = 6;

/// Fixed conversion rate: 1 USD buys 10 credits ($0.10 per credit)
pub const CREDITS_PER_USD: f64 = 10.0;

/// Smallest top-up we issue a challenge for, in USD
pub const MIN_TOPUP_USD: f64 = 0.50;

/// How long a payment challenge stays valid
pub const CHALLENGE_TIMEOUT_SECS: u64 = 300;

/// Solana transaction signatures are base58 and land in this length range;
/// anything outside is rejected before any network call.
pub const MIN_SIGNATURE_LEN: usize = 40;
pub const MAX_SIGNATURE_LEN: usize = 100;

/// Convert a USD amount to a token's atomic units (e.g. micro-USDC).
pub fn usd_to_atomic(amount_usd: f64, decimals: u8) -> u64 {
    (amount_usd * 10f64.powi(decimals as i32)).round() as u64
}

/// Convert a token's atomic units back to USD (stablecoin assumption).
pub fn atomic_to_usd(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Credits granted for a USD payment.
pub fn credits_for_usd(amount_usd: f64) -> i64 {
    (amount_usd * CREDITS_PER_USD).round() as i64
}

/// USD price of a credit shortfall.
pub fn usd_for_credits(credits: i64) -> f64 {
    credits as f64 / CREDITS_PER_USD
}

/// Format an atomic-unit amount as a human-readable decimal string.
pub fn format_atomic(raw: u64, decimals: u8) -> String {
    let divisor = 10u64.pow(decimals as u32);
    let whole = raw / divisor;
    let frac = raw % divisor;
    if frac == 0 {
        format!("{}", whole)
    } else {
        let frac_str = format!("{:0>width$}", frac, width = decimals as usize)
            .trim_end_matches('0')
            .to_string();
        format!("{}.{}", whole, frac_str)
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
}

impl PaymentStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => PaymentStatus::Confirmed,
            "failed" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Confirmed => write!(f, "confirmed"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 402 response body: the machine-readable payment challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: u8,
    pub accepts: Vec<PaymentRequirements>,
}

/// A single accepted payment option inside a 402 challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Amount in atomic units, as a string to survive JSON number limits
    pub max_amount_required: String,
    pub pay_to: String,
    /// Token mint address
    pub asset: String,
    pub description: String,
    pub mime_type: String,
    pub max_timeout_seconds: u64,
    pub extra: ChallengeExtra,
}

/// Challenge metadata carried in the `extra` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeExtra {
    /// Unique memo tying an on-chain transfer back to this challenge
    pub memo: String,
    pub usd_amount: f64,
    /// Single-use random token; never reused across challenges
    pub nonce: String,
}

/// Composite outcome of the chain + indexer checks. Consumed only by the
/// settlement coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub success: bool,
    pub recipient_match: bool,
    pub token_match: bool,
    pub amount_match: bool,
    pub actual_amount: Option<u64>,
    pub expected_amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    /// All-clear result used when the secondary source cannot weigh in.
    pub fn inconclusive(expected_amount: u64, reason: &str) -> Self {
        Self {
            success: true,
            recipient_match: true,
            token_match: true,
            amount_match: true,
            actual_amount: None,
            expected_amount,
            error: Some(reason.to_string()),
        }
    }
}

/// Outcome of a settlement attempt.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_added: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettlementResult {
    pub fn ok(credits_added: i64) -> Self {
        Self {
            success: true,
            credits_added: Some(credits_added),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            credits_added: None,
            error: Some(message.into()),
        }
    }
}

/// Outcome of a usage check.
#[derive(Debug, Clone, Serialize)]
pub struct UsageCheckResult {
    pub allowed: bool,
    /// Credits left after the action, for metered users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_available: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_required: Option<PaymentRequired>,
    /// Why an attached payment proof did not settle, if one was attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_error: Option<String>,
}

impl UsageCheckResult {
    /// Anonymous callers bypass metering entirely.
    pub fn unmetered() -> Self {
        Self {
            allowed: true,
            remaining: None,
            credits_available: None,
            payment_required: None,
            settlement_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usd_to_atomic() {
        assert_eq!(usd_to_atomic(0.5, 6), 500000);
        assert_eq!(usd_to_atomic(1.0, 6), 1000000);
        assert_eq!(usd_to_atomic(0.000001, 6), 1);
        assert_eq!(usd_to_atomic(0.1, 6), 100000);
    }

    #[test]
    fn test_credits_for_usd_rounds() {
        assert_eq!(credits_for_usd(0.5), 5);
        assert_eq!(credits_for_usd(1.0), 10);
        assert_eq!(credits_for_usd(0.54), 5);
        assert_eq!(credits_for_usd(0.55), 6);
        assert_eq!(credits_for_usd(2.349), 23);
    }

    #[test]
    fn test_format_atomic() {
        assert_eq!(format_atomic(500000, 6), "0.5");
        assert_eq!(format_atomic(1000000, 6), "1");
        assert_eq!(format_atomic(1, 6), "0.000001");
        assert_eq!(format_atomic(1234500, 6), "1.2345");
    }

    #[test]
    fn test_payment_status_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Confirmed,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::parse(&status.to_string()), status);
        }
    }

    #[test]
    fn test_challenge_serializes_camel_case() {
        let challenge = PaymentRequired {
            x402_version: X402_VERSION,
            accepts: vec![PaymentRequirements {
                scheme: SCHEME_EXACT.to_string(),
                network: "solana".to_string(),
                max_amount_required: "500000".to_string(),
                pay_to: "WALLET".to_string(),
                asset: "MINT".to_string(),
                description: "Credit top-up".to_string(),
                mime_type: "application/json".to_string(),
                max_timeout_seconds: CHALLENGE_TIMEOUT_SECS,
                extra: ChallengeExtra {
                    memo: "credits-abc".to_string(),
                    usd_amount: 0.5,
                    nonce: "deadbeef".to_string(),
                },
            }],
        };

        let json = serde_json::to_value(&challenge).unwrap();
        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["accepts"][0]["maxAmountRequired"], "500000");
        assert_eq!(json["accepts"][0]["payTo"], "WALLET");
        assert_eq!(json["accepts"][0]["maxTimeoutSeconds"], 300);
        assert_eq!(json["accepts"][0]["extra"]["usdAmount"], 0.5);
    }
}
