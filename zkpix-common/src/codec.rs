//! Intent codec.
//!
//! Every fixed-width value the circuit and the escrow contract consume is
//! produced here: 8-byte big-endian integers, 32-byte Keccak-256 hashes of
//! strings, and the 48-byte encoded intent
//!
//! ```text
//! nonce (8, BE) ‖ keccak256(recipient_key) (32) ‖ amount (8, BE)
//! ```
//!
//! whose Keccak-256 hash is the value an intent signer signs.

use sha3::{Digest, Keccak256};

use crate::{error::CodecError, types::Intent, Bytes32};

pub const U64_LEN: usize = 8;
pub const HASH_LEN: usize = 32;
pub const ENCODED_INTENT_LEN: usize = U64_LEN + HASH_LEN + U64_LEN;

pub fn keccak256(bytes: &[u8]) -> Bytes32 {
    Keccak256::digest(bytes).into()
}

/// Keccak-256 over the concatenation of `parts`.
pub fn keccak256_concat<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Bytes32 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn u64_be(value: u64) -> [u8; U64_LEN] {
    value.to_be_bytes()
}

/// Keccak-256 of a UTF-8 string, rejecting the empty string.
pub fn hash_string(field: &'static str, value: &str) -> Result<Bytes32, CodecError> {
    if value.is_empty() {
        return Err(CodecError::EmptyField { field });
    }
    Ok(keccak256(value.as_bytes()))
}

/// Narrow a wide integer to the 8-byte protocol width.
pub fn narrow_u64(field: &'static str, value: u128) -> Result<u64, CodecError> {
    u64::try_from(value).map_err(|_| CodecError::Overflow { field })
}

/// The decodable form of an encoded intent. The recipient key only survives as its hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodedIntent {
    pub nonce: u64,
    pub recipient_key_hash: Bytes32,
    pub amount: u64,
}

impl EncodedIntent {
    pub fn from_intent(intent: &Intent) -> Result<Self, CodecError> {
        Ok(Self {
            nonce: intent.nonce,
            recipient_key_hash: hash_string("recipient_key", &intent.recipient_key)?,
            amount: intent.amount,
        })
    }

    pub fn to_bytes(&self) -> [u8; ENCODED_INTENT_LEN] {
        let mut buf = [0u8; ENCODED_INTENT_LEN];
        buf[..U64_LEN].copy_from_slice(&u64_be(self.nonce));
        buf[U64_LEN..U64_LEN + HASH_LEN].copy_from_slice(&self.recipient_key_hash);
        buf[U64_LEN + HASH_LEN..].copy_from_slice(&u64_be(self.amount));
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != ENCODED_INTENT_LEN {
            return Err(CodecError::Length {
                field: "encoded_intent",
                expected: ENCODED_INTENT_LEN,
                actual: bytes.len(),
            });
        }
        let mut nonce = [0u8; U64_LEN];
        nonce.copy_from_slice(&bytes[..U64_LEN]);
        let mut recipient_key_hash = [0u8; HASH_LEN];
        recipient_key_hash.copy_from_slice(&bytes[U64_LEN..U64_LEN + HASH_LEN]);
        let mut amount = [0u8; U64_LEN];
        amount.copy_from_slice(&bytes[U64_LEN + HASH_LEN..]);
        Ok(Self {
            nonce: u64::from_be_bytes(nonce),
            recipient_key_hash,
            amount: u64::from_be_bytes(amount),
        })
    }

    pub fn hash(&self) -> Bytes32 {
        hash_intent(&self.to_bytes())
    }
}

pub fn encode_intent(intent: &Intent) -> Result<[u8; ENCODED_INTENT_LEN], CodecError> {
    EncodedIntent::from_intent(intent).map(|encoded| encoded.to_bytes())
}

pub fn decode_intent(bytes: &[u8]) -> Result<EncodedIntent, CodecError> {
    EncodedIntent::from_bytes(bytes)
}

/// The value actually signed by an intent originator.
pub fn hash_intent(encoded: &[u8]) -> Bytes32 {
    keccak256(encoded)
}

/// Use the caller's 32-byte escrow identifier if present, otherwise the intent hash.
pub fn resolve_intent_id(supplied: Option<Bytes32>, intent_hash: Bytes32) -> Bytes32 {
    supplied.unwrap_or(intent_hash)
}

/// Expand bytes into one 32-byte big-endian field element per byte.
///
/// This is how a Noir `pub [u8; N]` argument shows up in the verifier's
/// public-input vector.
pub fn bytes_to_fields(bytes: &[u8]) -> Vec<Bytes32> {
    bytes
        .iter()
        .map(|byte| {
            let mut field = [0u8; 32];
            field[31] = *byte;
            field
        })
        .collect()
}

/// Inverse of [`bytes_to_fields`]; every element must hold a single byte.
pub fn fields_to_bytes(fields: &[Bytes32]) -> Result<Vec<u8>, CodecError> {
    fields
        .iter()
        .map(|field| {
            if field[..31].iter().any(|b| *b != 0) {
                Err(CodecError::Malformed {
                    field: "public_inputs",
                    reason: "field element does not fit in one byte".into(),
                })
            } else {
                Ok(field[31])
            }
        })
        .collect()
}

/// Parse `0x`-prefixed (or bare) hex into exactly 32 bytes.
pub fn parse_bytes32(field: &'static str, value: &str) -> Result<Bytes32, CodecError> {
    let bytes = parse_hex(field, value)?;
    if bytes.len() != HASH_LEN {
        return Err(CodecError::Length {
            field,
            expected: HASH_LEN,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn parse_hex(field: &'static str, value: &str) -> Result<Vec<u8>, CodecError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|err| CodecError::Malformed {
        field,
        reason: err.to_string(),
    })
}

/// Convert a rail decimal such as `"10.5"` or `"1234.56"` into minor units (cents).
pub fn decimal_to_minor_units(field: &'static str, value: &str) -> Result<u64, CodecError> {
    let malformed = |reason: &str| CodecError::Malformed {
        field,
        reason: reason.to_string(),
    };
    let trimmed = value.trim();
    let (whole, frac) = match trimmed.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (trimmed, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("expected a non-negative decimal"));
    }
    if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("at most two fractional digits allowed"));
    }
    let whole: u128 = whole
        .parse()
        .map_err(|_| CodecError::Overflow { field })?;
    let cents: u128 = format!("{frac:0<2}")
        .parse()
        .map_err(|_| malformed("invalid fractional part"))?;
    let total = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(cents))
        .ok_or(CodecError::Overflow { field })?;
    narrow_u64(field, total)
}

/// Render minor units as a two-decimal rail amount.
pub fn minor_units_to_decimal(amount: u64) -> String {
    format!("{}.{:02}", amount / 100, amount % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FlowDirection;
    use hex_literal::hex;

    fn alice_intent(amount: u64) -> Intent {
        Intent::new(FlowDirection::Inbound, 1, "alice@bank", amount)
    }

    #[test]
    fn keccak_matches_reference() {
        assert_eq!(
            keccak256(b""),
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
        assert_eq!(
            keccak256_concat([b"al".as_slice(), b"ice@bank".as_slice()]),
            keccak256(b"alice@bank")
        );
    }

    #[test]
    fn encode_intent_fixed_vector() {
        let encoded = encode_intent(&alice_intent(1000)).unwrap();
        assert_eq!(
            encoded,
            hex!(
                "0000000000000001"
                "22b016f38d0012666c6063050859f750f9c04d22c15fe23af9b18c07eca70571"
                "00000000000003e8"
            )
        );
        assert_eq!(
            hash_intent(&encoded),
            hex!("6c22391b01e3bef00b94f3989e34f532cbd1f54117ada57ed7ffc2648098078f")
        );
    }

    #[test]
    fn decode_round_trips_encoding() {
        let intent = Intent::new(FlowDirection::Outbound, u64::MAX, "bob@bank", 42);
        let encoded = encode_intent(&intent).unwrap();
        let decoded = decode_intent(&encoded).unwrap();
        assert_eq!(decoded.nonce, u64::MAX);
        assert_eq!(decoded.amount, 42);
        assert_eq!(decoded.recipient_key_hash, keccak256(b"bob@bank"));
        assert_eq!(decoded.to_bytes(), encoded);
    }

    #[test]
    fn distinct_amounts_hash_differently() {
        let a = hash_intent(&encode_intent(&alice_intent(1000)).unwrap());
        let b = hash_intent(&encode_intent(&alice_intent(1001)).unwrap());
        assert_ne!(a, b);
        assert_eq!(
            b,
            hex!("35d1bbadd407655b20614e694afcfe4514cbca632269f63db808111b04d25d06")
        );
    }

    #[test]
    fn rejects_empty_recipient_key() {
        let err = encode_intent(&Intent::new(FlowDirection::Inbound, 0, "", 1)).unwrap_err();
        assert_eq!(err, CodecError::EmptyField { field: "recipient_key" });
    }

    #[test]
    fn rejects_wrong_length_on_decode() {
        assert!(matches!(
            decode_intent(&[0u8; 47]),
            Err(CodecError::Length { expected: 48, actual: 47, .. })
        ));
    }

    #[test]
    fn narrow_rejects_values_above_u64() {
        assert_eq!(narrow_u64("amount", u64::MAX as u128).unwrap(), u64::MAX);
        assert_eq!(
            narrow_u64("amount", u64::MAX as u128 + 1),
            Err(CodecError::Overflow { field: "amount" })
        );
    }

    #[test]
    fn supplied_intent_id_takes_precedence() {
        let hash = [1u8; 32];
        assert_eq!(resolve_intent_id(None, hash), hash);
        assert_eq!(resolve_intent_id(Some([2u8; 32]), hash), [2u8; 32]);
    }

    #[test]
    fn field_expansion_round_trips() {
        let bytes = [0u8, 1, 254, 255];
        let fields = bytes_to_fields(&bytes);
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3][31], 255);
        assert_eq!(fields_to_bytes(&fields).unwrap(), bytes);

        let mut wide = fields.clone();
        wide[0][0] = 1;
        assert!(fields_to_bytes(&wide).is_err());
    }

    #[test]
    fn decimal_amounts_convert_to_cents() {
        assert_eq!(decimal_to_minor_units("valor", "10.5").unwrap(), 1050);
        assert_eq!(decimal_to_minor_units("valor", "10").unwrap(), 1000);
        assert_eq!(decimal_to_minor_units("valor", "0.07").unwrap(), 7);
        assert!(decimal_to_minor_units("valor", "1.234").is_err());
        assert!(decimal_to_minor_units("valor", "-1").is_err());
        assert!(decimal_to_minor_units("valor", "184467440737095516.16").is_err());
        assert_eq!(minor_units_to_decimal(1050), "10.50");
        assert_eq!(minor_units_to_decimal(7), "0.07");
    }

    #[test]
    fn parse_bytes32_accepts_prefixed_hex() {
        let value = format!("0x{}", "ab".repeat(32));
        assert_eq!(parse_bytes32("intent_id", &value).unwrap(), [0xab; 32]);
        assert!(matches!(
            parse_bytes32("intent_id", "0xabcd"),
            Err(CodecError::Length { actual: 2, .. })
        ));
        assert!(parse_bytes32("intent_id", "0xzz").is_err());
    }
}
