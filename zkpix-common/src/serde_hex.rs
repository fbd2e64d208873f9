//! `0x`-prefixed hex (de)serialisation for byte fields.

use serde::{Deserialize, Deserializer, Serializer};

use crate::{codec::parse_hex, Bytes32};

fn encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn decode<E: serde::de::Error>(value: &str) -> Result<Vec<u8>, E> {
    parse_hex("hex", value).map_err(E::custom)
}

fn decode32<E: serde::de::Error>(value: &str) -> Result<Bytes32, E> {
    let bytes = decode::<E>(value)?;
    <Bytes32>::try_from(bytes.as_slice())
        .map_err(|_| E::custom(format!("expected 32 bytes, got {}", bytes.len())))
}

pub mod bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode(&s)
    }
}

pub mod bytes32 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Bytes32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes32, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode32(&s)
    }
}

pub mod bytes32_vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(value: &[Bytes32], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for item in value {
            seq.serialize_element(&encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Bytes32>, D::Error> {
        let items = Vec::<String>::deserialize(deserializer)?;
        items.iter().map(|s| decode32::<D::Error>(s)).collect()
    }
}

pub mod bytes_vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(value: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for item in value {
            seq.serialize_element(&encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let items = Vec::<String>::deserialize(deserializer)?;
        items.iter().map(|s| decode::<D::Error>(s)).collect()
    }
}
