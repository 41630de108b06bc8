//! Payment challenge issuance for 402 responses.

use rand::RngCore;
use uuid::Uuid;

use super::types::{
    format_atomic, ChallengeExtra, PaymentRequired, PaymentRequirements,
    CHALLENGE_TIMEOUT_SECS, SCHEME_EXACT, USDC_DECIMALS, X402_VERSION,
};

/// Builds the machine-readable payment requirement descriptor returned in a
/// 402 response. Each challenge gets a fresh nonce and memo; the issuer
/// itself keeps no state.
pub struct PaymentChallengeIssuer {
    network: String,
}

impl PaymentChallengeIssuer {
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
        }
    }

    /// Issue a challenge for `amount_usd` paid in `token` to `recipient`.
    pub fn issue(&self, amount_usd: f64, token: &str, recipient: &str) -> PaymentRequired {
        let atomic = super::types::usd_to_atomic(amount_usd, USDC_DECIMALS);
        let credits = super::types::credits_for_usd(amount_usd);
        let nonce = generate_nonce();
        let memo = format!("credits-{}", Uuid::new_v4());

        log::debug!(
            "[challenge] Issuing challenge: {} atomic units ({} credits) to {}",
            atomic,
            credits,
            recipient
        );

        PaymentRequired {
            x402_version: X402_VERSION,
            accepts: vec![PaymentRequirements {
                scheme: SCHEME_EXACT.to_string(),
                network: self.network.clone(),
                max_amount_required: atomic.to_string(),
                pay_to: recipient.to_string(),
                asset: token.to_string(),
                description: format!(
                    "Top up {} usage credits ({} USDC)",
                    credits,
                    format_atomic(atomic, USDC_DECIMALS)
                ),
                mime_type: "application/json".to_string(),
                max_timeout_seconds: CHALLENGE_TIMEOUT_SECS,
                extra: ChallengeExtra {
                    memo,
                    usd_amount: amount_usd,
                    nonce,
                },
            }],
        }
    }
}

/// 32 random bytes, hex-encoded. Opaque to the issuer; only meaningful as a
/// uniqueness token embedded in the challenge.
fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_challenge_shape() {
        let issuer = PaymentChallengeIssuer::new("solana");
        let challenge = issuer.issue(0.5, "MINT", "WALLET");

        assert_eq!(challenge.x402_version, 1);
        assert_eq!(challenge.accepts.len(), 1);

        let req = &challenge.accepts[0];
        assert_eq!(req.scheme, "exact");
        assert_eq!(req.network, "solana");
        assert_eq!(req.max_amount_required, "500000");
        assert_eq!(req.pay_to, "WALLET");
        assert_eq!(req.asset, "MINT");
        assert_eq!(req.max_timeout_seconds, 300);
        assert_eq!(req.extra.usd_amount, 0.5);
        assert_eq!(req.extra.nonce.len(), 64);
    }

    #[test]
    fn test_nonces_are_never_reused() {
        let issuer = PaymentChallengeIssuer::new("solana");
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let challenge = issuer.issue(0.5, "MINT", "WALLET");
            assert!(seen.insert(challenge.accepts[0].extra.nonce.clone()));
        }
    }

    #[test]
    fn test_amount_conversion_is_deterministic() {
        let issuer = PaymentChallengeIssuer::new("solana");
        assert_eq!(issuer.issue(1.0, "M", "W").accepts[0].max_amount_required, "1000000");
        assert_eq!(issuer.issue(0.05, "M", "W").accepts[0].max_amount_required, "50000");
        assert_eq!(issuer.issue(2.5, "M", "W").accepts[0].max_amount_required, "2500000");
    }
}
