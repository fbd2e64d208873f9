//! zkpix-common
//!
//! Canonical byte layouts shared by the attestation node, the proving
//! circuit and the escrow contract: intent encoding and hashing, settlement
//! commitments, and secp256k1 signer recovery.

pub mod codec;
pub mod commitment;
pub mod error;
pub mod serde_hex;
pub mod signature;
pub mod types;

pub use codec::{
    bytes_to_fields, decode_intent, encode_intent, hash_intent, keccak256, resolve_intent_id,
    EncodedIntent,
};
pub use commitment::{build_commitment, Commitment, CommitmentFields};
pub use error::{CodecError, SignatureError};
pub use signature::{
    LocalSigner, RecoverableSignature, SignatureScheme, SignatureVerifier, SignerAddress,
    SignerPublicKey,
};
pub use types::{
    ExternalPaymentRecord, FinalityRecord, FlowDirection, Intent, PaymentStatus, ProofBundle,
    SignedIntent,
};

pub type Bytes32 = [u8; 32];

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
