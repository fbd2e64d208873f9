//! Pinning of compiled circuit artifacts by blake3 hash and size.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use zkpix_common::FlowDirection;

use crate::error::ProverError;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    pub blake3: String,
    pub size: u64,
}

impl ArtifactFile {
    pub fn from_bytes(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            blake3: hash_bytes_hex(bytes),
            size: bytes.len() as u64,
        }
    }

    /// Check `bytes` against the recorded size and hash.
    pub fn ensure_matches(&self, bytes: &[u8], label: &str) -> Result<(), ProverError> {
        if bytes.len() as u64 != self.size {
            return Err(ProverError::Manifest(format!(
                "{label} size mismatch, manifest recorded {} bytes but found {}",
                self.size,
                bytes.len()
            )));
        }
        let actual = hash_bytes_hex(bytes);
        if actual != self.blake3 {
            return Err(ProverError::Manifest(format!(
                "{label} hash mismatch, expected {} but computed {actual}",
                self.blake3
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitManifest {
    pub manifest_version: u32,
    pub inbound: ArtifactFile,
    pub outbound: ArtifactFile,
}

impl CircuitManifest {
    pub fn new(inbound: ArtifactFile, outbound: ArtifactFile) -> Self {
        Self {
            manifest_version: MANIFEST_VERSION,
            inbound,
            outbound,
        }
    }

    pub fn artifact(&self, direction: FlowDirection) -> &ArtifactFile {
        match direction {
            FlowDirection::Inbound => &self.inbound,
            FlowDirection::Outbound => &self.outbound,
        }
    }

    fn ensure_compat(&self) -> Result<(), ProverError> {
        if self.manifest_version != MANIFEST_VERSION {
            return Err(ProverError::Manifest(format!(
                "unsupported manifest version {}, expected {MANIFEST_VERSION}",
                self.manifest_version
            )));
        }
        Ok(())
    }
}

pub fn hash_bytes_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn write_manifest(path: impl AsRef<Path>, manifest: &CircuitManifest) -> Result<(), ProverError> {
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| ProverError::Manifest(format!("failed to serialize manifest: {e}")))?;
    fs::write(path.as_ref(), json)?;
    Ok(())
}

pub fn read_manifest(path: impl AsRef<Path>) -> Result<CircuitManifest, ProverError> {
    let bytes = fs::read(path.as_ref()).map_err(|e| {
        ProverError::Manifest(format!(
            "failed to read manifest {}: {e}",
            path.as_ref().display()
        ))
    })?;
    let manifest: CircuitManifest = serde_json::from_slice(&bytes)
        .map_err(|e| ProverError::Manifest(format!("failed to parse manifest json: {e}")))?;
    manifest.ensure_compat()?;
    Ok(manifest)
}
