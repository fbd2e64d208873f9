//! Data model shared by the pipeline stages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    codec::{fields_to_bytes, HASH_LEN},
    error::CodecError,
    signature::RecoverableSignature,
    Bytes32,
};

/// Which way value moves across the bridge.
///
/// - `Inbound` – escrowed on-chain value is paid out over the rail by the node.
/// - `Outbound` – a user pays the node over the rail and the escrow releases on-chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    Inbound,
    Outbound,
}

impl FlowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::Inbound => "inbound",
            FlowDirection::Outbound => "outbound",
        }
    }
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A desired payment. Immutable once signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub nonce: u64,
    pub recipient_key: String,
    pub amount: u64,
    pub direction: FlowDirection,
}

impl Intent {
    pub fn new(
        direction: FlowDirection,
        nonce: u64,
        recipient_key: impl Into<String>,
        amount: u64,
    ) -> Self {
        Self {
            nonce,
            recipient_key: recipient_key.into(),
            amount,
            direction,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedIntent {
    pub intent: Intent,
    pub signature: RecoverableSignature,
}

/// Settlement state of an off-chain payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Settled,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// What the rail has told us about one payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPaymentRecord {
    /// Identifier the settled transaction is known by on the rail (end-to-end id when available).
    pub rail_transaction_id: String,
    pub status: PaymentStatus,
    /// Raw rail status code, e.g. `CONCLUIDA`.
    pub raw_status: String,
    /// Settled amount in minor units, when the rail reports one.
    pub observed_amount: Option<u64>,
    pub settlement_timestamp: Option<String>,
    /// Payer key reported by the rail for received payments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_key: Option<String>,
}

impl ExternalPaymentRecord {
    pub fn pending(rail_transaction_id: impl Into<String>, raw_status: impl Into<String>) -> Self {
        Self {
            rail_transaction_id: rail_transaction_id.into(),
            status: PaymentStatus::Pending,
            raw_status: raw_status.into(),
            observed_amount: None,
            settlement_timestamp: None,
            payer_key: None,
        }
    }

    /// Move the record to `next`. Terminal statuses never change again.
    ///
    /// Returns `false` (and leaves the record untouched) when the transition
    /// would revert a terminal status.
    pub fn advance(&mut self, next: PaymentStatus, raw_status: impl Into<String>) -> bool {
        if self.status.is_terminal() && self.status != next {
            return false;
        }
        self.status = next;
        self.raw_status = raw_status.into();
        true
    }
}

/// Proof plus the public inputs the verifier needs, in circuit order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    pub direction: FlowDirection,
    #[serde(with = "crate::serde_hex::bytes")]
    pub proof: Vec<u8>,
    #[serde(with = "crate::serde_hex::bytes32_vec")]
    pub public_inputs: Vec<Bytes32>,
}

impl ProofBundle {
    pub fn new(direction: FlowDirection, proof: Vec<u8>, public_inputs: Vec<Bytes32>) -> Self {
        Self {
            direction,
            proof,
            public_inputs,
        }
    }

    /// Payload hash carried in the first 32 public field elements.
    pub fn payload_hash(&self) -> Result<Bytes32, CodecError> {
        self.public_bytes32(0)
    }

    /// Reassemble the `index`-th 32-byte public value from its per-byte field elements.
    pub fn public_bytes32(&self, index: usize) -> Result<Bytes32, CodecError> {
        let start = index * HASH_LEN;
        let end = start + HASH_LEN;
        let fields = self
            .public_inputs
            .get(start..end)
            .ok_or(CodecError::Length {
                field: "public_inputs",
                expected: end,
                actual: self.public_inputs.len(),
            })?;
        let bytes = fields_to_bytes(fields)?;
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

/// Completion signal returned by the escrow submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalityRecord {
    #[serde(with = "crate::serde_hex::bytes32")]
    pub intent_id: Bytes32,
    #[serde(with = "crate::serde_hex::bytes32")]
    pub transaction_hash: Bytes32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::bytes_to_fields;

    #[test]
    fn terminal_status_never_reverts() {
        let mut record = ExternalPaymentRecord::pending("req-1", "APROVACAO");
        assert!(record.advance(PaymentStatus::Pending, "AGUARDANDO"));
        assert!(record.advance(PaymentStatus::Settled, "CONCLUIDA"));
        assert!(!record.advance(PaymentStatus::Pending, "AGUARDANDO"));
        assert!(!record.advance(PaymentStatus::Failed, "CANCELADA"));
        assert_eq!(record.status, PaymentStatus::Settled);
        assert_eq!(record.raw_status, "CONCLUIDA");
    }

    #[test]
    fn bundle_reassembles_public_hashes() {
        let payload = [0xabu8; 32];
        let pub_x = [0x01u8; 32];
        let mut inputs = bytes_to_fields(&payload);
        inputs.extend(bytes_to_fields(&pub_x));
        let bundle = ProofBundle::new(FlowDirection::Inbound, vec![1, 2, 3], inputs);

        assert_eq!(bundle.payload_hash().unwrap(), payload);
        assert_eq!(bundle.public_bytes32(1).unwrap(), pub_x);
        assert!(bundle.public_bytes32(2).is_err());
    }

    #[test]
    fn bundle_json_uses_hex() {
        let bundle = ProofBundle::new(
            FlowDirection::Outbound,
            vec![0xde, 0xad],
            bytes_to_fields(&[7u8; 32]),
        );
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["direction"], "outbound");
        assert_eq!(json["proof"], "0xdead");
        assert_eq!(
            json["publicInputs"][0],
            "0x0000000000000000000000000000000000000000000000000000000000000007"
        );

        let decoded: ProofBundle = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, bundle);
    }
}
