//! Commitment builder.
//!
//! The payload hash binds every settlement-relevant field into one public
//! value. Component order and widths are a wire contract shared with the
//! proving circuit and the escrow verifier:
//!
//! | direction | components |
//! |-----------|------------|
//! | inbound   | `keccak(recipient_key) ‖ keccak(rail_tx_id) ‖ amount(8, BE)` |
//! | outbound  | `keccak(recipient_key) ‖ keccak(rail_tx_id) ‖ amount(8, BE) ‖ keccak(sender_key)` |

use serde::{Deserialize, Serialize};

use crate::{
    codec::{hash_string, keccak256_concat, u64_be},
    error::CodecError,
    types::FlowDirection,
    Bytes32,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    #[serde(with = "crate::serde_hex::bytes32")]
    pub payload_hash: Bytes32,
    #[serde(with = "crate::serde_hex::bytes_vec")]
    pub components: Vec<Vec<u8>>,
}

impl Commitment {
    /// Concatenated components, i.e. the Keccak preimage of `payload_hash`.
    pub fn preimage(&self) -> Vec<u8> {
        self.components.concat()
    }

    /// Recompute the hash from the components.
    pub fn is_consistent(&self) -> bool {
        keccak256_concat(self.components.iter().map(Vec::as_slice)) == self.payload_hash
    }

    pub fn recipient_key_hash(&self) -> Option<Bytes32> {
        self.component32(0)
    }

    pub fn transaction_id_hash(&self) -> Option<Bytes32> {
        self.component32(1)
    }

    pub fn sender_key_hash(&self) -> Option<Bytes32> {
        self.component32(3)
    }

    fn component32(&self, index: usize) -> Option<Bytes32> {
        self.components
            .get(index)
            .and_then(|c| <Bytes32>::try_from(c.as_slice()).ok())
    }
}

/// Settled-payment fields that go into a commitment.
#[derive(Clone, Debug)]
pub struct CommitmentFields<'a> {
    pub recipient_key: &'a str,
    pub rail_transaction_id: &'a str,
    pub amount: u64,
    pub sender_key: Option<&'a str>,
}

pub fn build_commitment(
    direction: FlowDirection,
    fields: &CommitmentFields<'_>,
) -> Result<Commitment, CodecError> {
    let recipient = hash_string("recipient_key", fields.recipient_key)?;
    let txid = hash_string("rail_transaction_id", fields.rail_transaction_id)?;
    let amount = u64_be(fields.amount);

    let mut components = vec![recipient.to_vec(), txid.to_vec(), amount.to_vec()];
    if direction == FlowDirection::Outbound {
        let sender_key = fields.sender_key.ok_or(CodecError::MissingField {
            field: "sender_key",
            direction: direction.as_str(),
        })?;
        components.push(hash_string("sender_key", sender_key)?.to_vec());
    }

    let payload_hash = keccak256_concat(components.iter().map(Vec::as_slice));
    Ok(Commitment {
        payload_hash,
        components,
    })
}
