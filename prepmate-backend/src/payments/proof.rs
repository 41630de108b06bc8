//! X-PAYMENT header decoding.
//!
//! A retried request carries `X-PAYMENT: base64(JSON)` with the client's
//! signed transaction. The on-chain transaction id is the first signature
//! of the serialized transaction, which we extract here so the settlement
//! path never needs a full SDK.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Decoded X-PAYMENT header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    pub payload: ProofPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayload {
    /// Base64-encoded signed transaction, exactly as submitted to the chain
    pub serialized_transaction: String,
}

impl PaymentProof {
    /// Decode an X-PAYMENT header value. Tries base64 first, then raw JSON.
    pub fn from_header(header: &str) -> Result<Self, String> {
        if let Ok(decoded) =
            base64::engine::general_purpose::STANDARD.decode(header.trim())
        {
            if let Ok(s) = String::from_utf8(decoded) {
                if let Ok(proof) = serde_json::from_str::<PaymentProof>(&s) {
                    return Ok(proof);
                }
            }
        }
        serde_json::from_str(header)
            .map_err(|e| format!("Failed to decode X-PAYMENT header: {}", e))
    }

    /// Extract the transaction signature (= transaction id) from the
    /// serialized transaction: a compact-u16 signature count followed by
    /// 64-byte signatures, of which the first is the fee payer's.
    pub fn transaction_signature(&self) -> Result<String, String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(self.payload.serialized_transaction.trim())
            .map_err(|e| format!("Invalid transaction encoding: {}", e))?;

        let (count, offset) = decode_compact_u16(&raw)
            .ok_or_else(|| "Truncated transaction: no signature count".to_string())?;
        if count == 0 {
            return Err("Transaction carries no signatures".to_string());
        }
        if raw.len() < offset + 64 {
            return Err("Truncated transaction: signature bytes missing".to_string());
        }

        Ok(bs58::encode(&raw[offset..offset + 64]).into_string())
    }
}

/// Decode a compact-u16 length prefix (7 bits per byte, MSB continuation).
/// Returns (value, bytes consumed).
fn decode_compact_u16(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut value: usize = 0;
    for (i, byte) in bytes.iter().take(3).enumerate() {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof_with_tx(tx_base64: &str) -> PaymentProof {
        PaymentProof {
            x402_version: 1,
            scheme: "exact".to_string(),
            network: "solana".to_string(),
            payload: ProofPayload {
                serialized_transaction: tx_base64.to_string(),
            },
        }
    }

    #[test]
    fn test_decode_compact_u16() {
        assert_eq!(decode_compact_u16(&[0x01]), Some((1, 1)));
        assert_eq!(decode_compact_u16(&[0x7f]), Some((127, 1)));
        assert_eq!(decode_compact_u16(&[0x80, 0x01]), Some((128, 2)));
        assert_eq!(decode_compact_u16(&[]), None);
        assert_eq!(decode_compact_u16(&[0x80]), None);
    }

    #[test]
    fn test_extract_first_signature() {
        // 1 signature, 64 bytes of 0x42, then a dummy message byte.
        let mut raw = vec![0x01];
        raw.extend_from_slice(&[0x42u8; 64]);
        raw.push(0x00);
        let tx = base64::engine::general_purpose::STANDARD.encode(&raw);

        let sig = proof_with_tx(&tx).transaction_signature().unwrap();
        assert_eq!(sig, bs58::encode(&[0x42u8; 64]).into_string());
    }

    #[test]
    fn test_rejects_empty_and_truncated() {
        let empty = base64::engine::general_purpose::STANDARD.encode([0x00u8]);
        assert!(proof_with_tx(&empty).transaction_signature().is_err());

        let truncated =
            base64::engine::general_purpose::STANDARD.encode([0x01u8, 0x42, 0x42]);
        assert!(proof_with_tx(&truncated).transaction_signature().is_err());

        assert!(proof_with_tx("not-base64!!!").transaction_signature().is_err());
    }

    #[test]
    fn test_header_round_trip() {
        let mut raw = vec![0x01];
        raw.extend_from_slice(&[0x11u8; 64]);
        let tx = base64::engine::general_purpose::STANDARD.encode(&raw);
        let proof = proof_with_tx(&tx);

        let json = serde_json::to_string(&proof).unwrap();
        let header = base64::engine::general_purpose::STANDARD.encode(&json);

        let decoded = PaymentProof::from_header(&header).unwrap();
        assert_eq!(decoded.scheme, "exact");
        assert_eq!(
            decoded.transaction_signature().unwrap(),
            proof.transaction_signature().unwrap()
        );

        // Raw JSON also accepted.
        let decoded = PaymentProof::from_header(&json).unwrap();
        assert_eq!(decoded.network, "solana");
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert!(PaymentProof::from_header("!!not json or base64!!").is_err());
    }
}
