//! secp256k1 signer recovery for intent hashes.
//!
//! Two message-authentication conventions are supported and the verifier,
//! signer and circuit must all use the same one:
//!
//! - [`SignatureScheme::RawHash`] – the 32-byte intent hash is signed directly.
//! - [`SignatureScheme::PrefixedMessage`] – the hash is wrapped as an
//!   Ethereum personal message (`"\x19Ethereum Signed Message:\n32" ‖ hash`)
//!   and that digest is signed.

use std::{fmt, str::FromStr};

use k256::{
    ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    codec::{keccak256_concat, parse_hex},
    error::SignatureError,
    Bytes32,
};

pub const SIGNATURE_LEN: usize = 65;
pub const COMPACT_SIGNATURE_LEN: usize = 64;
const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    #[default]
    #[serde(rename = "raw")]
    RawHash,
    #[serde(rename = "prefixed")]
    PrefixedMessage,
}

impl SignatureScheme {
    /// The 32 bytes that are actually fed to ECDSA for `hash`.
    pub fn digest(&self, hash: &Bytes32) -> Bytes32 {
        match self {
            SignatureScheme::RawHash => *hash,
            SignatureScheme::PrefixedMessage => {
                keccak256_concat([PERSONAL_MESSAGE_PREFIX, hash.as_slice()])
            }
        }
    }
}

impl FromStr for SignatureScheme {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "hash" => Ok(SignatureScheme::RawHash),
            "prefixed" | "personal" | "eip191" => Ok(SignatureScheme::PrefixedMessage),
            other => Err(SignatureError::UnknownScheme(other.to_string())),
        }
    }
}

/// 20-byte Ethereum-style address derived from a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignerAddress(pub [u8; 20]);

impl SignerAddress {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for SignerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SignerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for SignerAddress {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            parse_hex("address", s).map_err(|err| SignatureError::InvalidAddress(err.to_string()))?;
        let array: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| {
                SignatureError::InvalidAddress(format!("must be 20 bytes, got {}", bytes.len()))
            })?;
        Ok(SignerAddress(array))
    }
}

impl Serialize for SignerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SignerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Uncompressed affine coordinates of a secp256k1 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignerPublicKey {
    pub x: Bytes32,
    pub y: Bytes32,
}

impl SignerPublicKey {
    fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let bytes = point.as_bytes();
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&bytes[1..33]);
        y.copy_from_slice(&bytes[33..65]);
        Self { x, y }
    }

    /// Last 20 bytes of `keccak256(x ‖ y)`.
    pub fn address(&self) -> SignerAddress {
        let hash = keccak256_concat([self.x.as_slice(), self.y.as_slice()]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash[12..]);
        SignerAddress(out)
    }
}

/// `r ‖ s ‖ v` signature with the recovery id kept separately.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    rs: [u8; COMPACT_SIGNATURE_LEN],
    recovery_id: u8,
}

impl RecoverableSignature {
    /// Accepts 65 bytes with `v` in `{0, 1, 27, 28}`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(SignatureError::InvalidSignature(format!(
                "expected {} bytes, got {}",
                SIGNATURE_LEN,
                bytes.len()
            )));
        }
        let recovery_id = match bytes[64] {
            0 | 27 => 0,
            1 | 28 => 1,
            other => {
                return Err(SignatureError::InvalidSignature(format!(
                    "unsupported recovery byte {other}"
                )))
            }
        };
        let mut rs = [0u8; COMPACT_SIGNATURE_LEN];
        rs.copy_from_slice(&bytes[..COMPACT_SIGNATURE_LEN]);
        Ok(Self { rs, recovery_id })
    }

    pub fn from_hex(value: &str) -> Result<Self, SignatureError> {
        let bytes = parse_hex("signature", value)
            .map_err(|err| SignatureError::InvalidSignature(err.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Wire form with `v` as 27/28.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[..COMPACT_SIGNATURE_LEN].copy_from_slice(&self.rs);
        out[64] = 27 + self.recovery_id;
        out
    }

    /// `r ‖ s` with the recovery byte stripped, as the circuit expects.
    pub fn compact(&self) -> [u8; COMPACT_SIGNATURE_LEN] {
        self.rs
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    fn parts(&self) -> Result<(Signature, RecoveryId), SignatureError> {
        let signature = Signature::from_slice(&self.rs)
            .map_err(|err| SignatureError::InvalidSignature(err.to_string()))?;
        let recovery_id = RecoveryId::from_byte(self.recovery_id)
            .ok_or_else(|| SignatureError::InvalidSignature("bad recovery id".into()))?;
        // High-s signatures are malleable twins; recover them through the low-s form.
        Ok(match signature.normalize_s() {
            Some(normalized) => (
                normalized,
                RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
            ),
            None => (signature, recovery_id),
        })
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverableSignature")
            .field("r", &hex::encode(&self.rs[..4]))
            .field("recovery_id", &self.recovery_id)
            .finish_non_exhaustive()
    }
}

/// Pure recovery plus the authorisation policy check layered on top of it.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignatureVerifier {
    scheme: SignatureScheme,
}

impl SignatureVerifier {
    pub fn new(scheme: SignatureScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn recover_public_key(
        &self,
        hash: &Bytes32,
        signature: &RecoverableSignature,
    ) -> Result<SignerPublicKey, SignatureError> {
        let digest = self.scheme.digest(hash);
        let (sig, recovery_id) = signature.parts()?;
        let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
            .map_err(|err| SignatureError::InvalidSignature(err.to_string()))?;
        Ok(SignerPublicKey::from_verifying_key(&key))
    }

    pub fn recover_signer(
        &self,
        hash: &Bytes32,
        signature: &RecoverableSignature,
    ) -> Result<SignerAddress, SignatureError> {
        self.recover_public_key(hash, signature)
            .map(|key| key.address())
    }

    /// Recover and require the signer to be `expected`.
    pub fn verify_authorized(
        &self,
        hash: &Bytes32,
        signature: &RecoverableSignature,
        expected: &SignerAddress,
    ) -> Result<SignerPublicKey, SignatureError> {
        let public_key = self.recover_public_key(hash, signature)?;
        let recovered = public_key.address();
        if &recovered != expected {
            return Err(SignatureError::UnauthorizedSigner {
                expected: *expected,
                recovered,
            });
        }
        Ok(public_key)
    }
}

/// Local secp256k1 key used by the node to sign intents it attests.
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    scheme: SignatureScheme,
}

impl LocalSigner {
    pub fn new(key: SigningKey, scheme: SignatureScheme) -> Self {
        Self { key, scheme }
    }

    pub fn from_hex(secret: &str, scheme: SignatureScheme) -> Result<Self, SignatureError> {
        let bytes = parse_hex("private_key", secret)
            .map_err(|err| SignatureError::Key(err.to_string()))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| SignatureError::Key("invalid secp256k1 secret key".into()))?;
        Ok(Self::new(key, scheme))
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn public_key(&self) -> SignerPublicKey {
        SignerPublicKey::from_verifying_key(self.key.verifying_key())
    }

    pub fn address(&self) -> SignerAddress {
        self.public_key().address()
    }

    pub fn sign_hash(&self, hash: &Bytes32) -> Result<RecoverableSignature, SignatureError> {
        let digest = self.scheme.digest(hash);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|err| SignatureError::Key(err.to_string()))?;
        let mut rs = [0u8; COMPACT_SIGNATURE_LEN];
        rs.copy_from_slice(&signature.to_bytes());
        Ok(RecoverableSignature {
            rs,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address())
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}
