//! Circuit witness layout.
//!
//! Every entry has a fixed byte width mandated by the circuits. Entries are
//! kept as plain byte vectors so a malformed shape is reported instead of
//! being impossible to construct.

use zkpix_common::{
    bytes_to_fields,
    codec::{u64_be, HASH_LEN, U64_LEN},
    signature::COMPACT_SIGNATURE_LEN,
    Bytes32, Commitment, EncodedIntent, FlowDirection, RecoverableSignature, SignerPublicKey,
};

use crate::error::ProverError;

/// Values known only to the prover.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateWitness {
    /// `r ‖ s`, recovery byte stripped.
    pub signature: Vec<u8>,
    pub recipient_hash: Vec<u8>,
    pub amount: Vec<u8>,
    pub txid_hash: Vec<u8>,
    pub nonce: Vec<u8>,
    /// Outbound only.
    pub sender_hash: Option<Vec<u8>>,
}

impl std::fmt::Debug for PrivateWitness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateWitness(<redacted>)")
    }
}

/// Values revealed to the verifier, in circuit order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicWitness {
    pub payload_hash: Vec<u8>,
    pub signer_x: Vec<u8>,
    pub signer_y: Vec<u8>,
    /// Outbound only.
    pub recipient_hash: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessInput {
    pub direction: FlowDirection,
    pub private: PrivateWitness,
    pub public: PublicWitness,
}

/// One named circuit argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WitnessEntry<'a> {
    pub name: &'static str,
    pub bytes: &'a [u8],
    pub public: bool,
}

fn private<'a>(name: &'static str, bytes: &'a [u8]) -> WitnessEntry<'a> {
    WitnessEntry {
        name,
        bytes,
        public: false,
    }
}

fn public<'a>(name: &'static str, bytes: &'a [u8]) -> WitnessEntry<'a> {
    WitnessEntry {
        name,
        bytes,
        public: true,
    }
}

impl WitnessInput {
    /// Assemble the witness for a settled, signed intent.
    pub fn from_attestation(
        direction: FlowDirection,
        commitment: &Commitment,
        intent: &EncodedIntent,
        signature: &RecoverableSignature,
        signer: &SignerPublicKey,
    ) -> Result<Self, ProverError> {
        let component = |index: usize, field: &'static str| {
            commitment
                .components
                .get(index)
                .cloned()
                .ok_or(ProverError::MissingWitness {
                    field,
                    direction: direction.as_str(),
                })
        };
        let recipient_hash = component(0, "recipient_hash")?;
        let txid_hash = component(1, "txid_hash")?;
        let amount = component(2, "amount")?;
        let sender_hash = match direction {
            FlowDirection::Inbound => None,
            FlowDirection::Outbound => Some(component(3, "sender_hash")?),
        };
        let public_recipient = match direction {
            FlowDirection::Inbound => None,
            FlowDirection::Outbound => Some(recipient_hash.clone()),
        };

        let witness = Self {
            direction,
            private: PrivateWitness {
                signature: signature.compact().to_vec(),
                recipient_hash,
                amount,
                txid_hash,
                nonce: u64_be(intent.nonce).to_vec(),
                sender_hash,
            },
            public: PublicWitness {
                payload_hash: commitment.payload_hash.to_vec(),
                signer_x: signer.x.to_vec(),
                signer_y: signer.y.to_vec(),
                recipient_hash: public_recipient,
            },
        };
        witness.validate()?;
        Ok(witness)
    }

    /// Check every entry against its circuit-mandated width and the
    /// entries required by the direction.
    pub fn validate(&self) -> Result<(), ProverError> {
        let direction = self.direction.as_str();
        let outbound = self.direction == FlowDirection::Outbound;

        check_len("signature", &self.private.signature, COMPACT_SIGNATURE_LEN)?;
        check_len("recipient_hash", &self.private.recipient_hash, HASH_LEN)?;
        check_len("amount", &self.private.amount, U64_LEN)?;
        check_len("txid_hash", &self.private.txid_hash, HASH_LEN)?;
        check_len("nonce", &self.private.nonce, U64_LEN)?;
        check_len("payload_hash", &self.public.payload_hash, HASH_LEN)?;
        check_len("signer_x", &self.public.signer_x, HASH_LEN)?;
        check_len("signer_y", &self.public.signer_y, HASH_LEN)?;

        for (field, value) in [
            ("sender_hash", &self.private.sender_hash),
            ("public_recipient_hash", &self.public.recipient_hash),
        ] {
            match (value, outbound) {
                (Some(bytes), true) => check_len(field, bytes, HASH_LEN)?,
                (None, true) => return Err(ProverError::MissingWitness { field, direction }),
                (Some(_), false) => {
                    return Err(ProverError::UnexpectedWitness { field, direction })
                }
                (None, false) => {}
            }
        }
        Ok(())
    }

    /// Named circuit arguments, private first, in declaration order.
    pub fn entries(&self) -> Vec<WitnessEntry<'_>> {
        let mut entries = vec![
            private("signature", &self.private.signature),
            private("chave_bytes", &self.private.recipient_hash),
            private("amount_bytes", &self.private.amount),
            private("txid_bytes", &self.private.txid_hash),
            private("nonce_bytes", &self.private.nonce),
        ];
        if let Some(sender) = &self.private.sender_hash {
            entries.push(private("sender_chave_bytes", sender));
        }
        entries.push(public("payload_hash", &self.public.payload_hash));
        entries.push(public("signing_sender_x", &self.public.signer_x));
        entries.push(public("signing_sender_y", &self.public.signer_y));
        if let Some(recipient) = &self.public.recipient_hash {
            entries.push(public("recipient_bytes", recipient));
        }
        entries
    }

    /// Public-input vector the verifier will see: one field element per public byte.
    pub fn public_inputs(&self) -> Vec<Bytes32> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.public)
            .flat_map(|entry| bytes_to_fields(entry.bytes))
            .collect()
    }

    /// Render as a Noir `Prover.toml`.
    pub fn to_prover_toml(&self) -> String {
        let mut out = String::new();
        for entry in self.entries() {
            let values: Vec<String> = entry.bytes.iter().map(|b| b.to_string()).collect();
            out.push_str(entry.name);
            out.push_str(" = [");
            out.push_str(&values.join(", "));
            out.push_str("]\n");
        }
        out
    }
}

fn check_len(field: &'static str, bytes: &[u8], expected: usize) -> Result<(), ProverError> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(ProverError::WitnessShape {
            field,
            expected,
            actual: bytes.len(),
        })
    }
}
