//! Write-once audit table of finished proofs, keyed by intent id, plus the
//! claim table that lets each intent move money (or be attested) only once.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use thiserror::Error;
use zkpix_common::{keccak256, Bytes32, FlowDirection, ProofBundle};

const CLAIMS_TREE: &str = "intent_claims";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a proof is already recorded for this intent")]
    Duplicate,
    #[error("intent was already processed by an earlier run")]
    AlreadyClaimed,
    #[error("proof store error: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRecord {
    #[serde(with = "zkpix_common::serde_hex::bytes32")]
    pub id: Bytes32,
    #[serde(rename = "type")]
    pub direction: FlowDirection,
    #[serde(with = "zkpix_common::serde_hex::bytes32_vec")]
    pub public_inputs: Vec<Bytes32>,
    #[serde(with = "zkpix_common::serde_hex::bytes")]
    pub proof: Vec<u8>,
    /// Unix seconds.
    pub created_at: u64,
}

impl ProofRecord {
    pub fn new(id: Bytes32, bundle: &ProofBundle) -> Self {
        Self {
            id,
            direction: bundle.direction,
            public_inputs: bundle.public_inputs.clone(),
            proof: bundle.proof.clone(),
            created_at: unix_now(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// The irreversible effect a run is about to cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IntentClaim {
    direction: FlowDirection,
    key: Bytes32,
}

impl IntentClaim {
    /// Inbound: the node pays out for this signed intent hash.
    pub fn payment(intent_hash: Bytes32) -> Self {
        Self {
            direction: FlowDirection::Inbound,
            key: intent_hash,
        }
    }

    /// Outbound: the node attests this received rail payment.
    pub fn receipt(end_to_end_id: &str) -> Self {
        Self {
            direction: FlowDirection::Outbound,
            key: keccak256(end_to_end_id.as_bytes()),
        }
    }

    pub fn direction(&self) -> FlowDirection {
        self.direction
    }

    fn storage_key(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = match self.direction {
            FlowDirection::Inbound => 0x01,
            FlowDirection::Outbound => 0x02,
        };
        out[1..].copy_from_slice(&self.key);
        out
    }
}

#[derive(Clone)]
pub struct ProofStore {
    backend: Arc<ProofBackend>,
}

enum ProofBackend {
    InMemory {
        proofs: Mutex<HashMap<Bytes32, ProofRecord>>,
        claims: Mutex<HashSet<[u8; 33]>>,
    },
    Persistent {
        db: Db,
        claims: Tree,
    },
}

impl ProofStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(ProofBackend::InMemory {
                proofs: Mutex::new(HashMap::new()),
                claims: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    StoreError::Backend(format!(
                        "failed to create directory for proof db at {}: {err}",
                        path.display()
                    ))
                })?;
            }
        }
        let db = sled::open(path).map_err(|err| {
            StoreError::Backend(format!("failed to open proof db at {}: {err}", path.display()))
        })?;
        let claims = db
            .open_tree(CLAIMS_TREE)
            .map_err(|err| StoreError::Backend(format!("failed to open claim table: {err}")))?;
        Ok(Self {
            backend: Arc::new(ProofBackend::Persistent { db, claims }),
        })
    }

    /// Take the claim, or fail with [`StoreError::AlreadyClaimed`] if any
    /// earlier run took it. Persistent claims are flushed before returning.
    pub fn claim(&self, claim: &IntentClaim) -> Result<(), StoreError> {
        let key = claim.storage_key();
        match &*self.backend {
            ProofBackend::InMemory { claims, .. } => {
                let inserted = claims
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key);
                if inserted {
                    Ok(())
                } else {
                    Err(StoreError::AlreadyClaimed)
                }
            }
            ProofBackend::Persistent { claims, .. } => {
                let stamp = unix_now().to_be_bytes();
                claims
                    .compare_and_swap(key, None as Option<&[u8]>, Some(&stamp[..]))
                    .map_err(|err| StoreError::Backend(format!("claim insert error: {err}")))?
                    .map_err(|_| StoreError::AlreadyClaimed)?;
                claims
                    .flush()
                    .map_err(|err| StoreError::Backend(format!("claim flush error: {err}")))?;
                Ok(())
            }
        }
    }

    /// Drop a claim whose run failed before anything irreversible happened.
    pub fn release(&self, claim: &IntentClaim) -> Result<(), StoreError> {
        let key = claim.storage_key();
        match &*self.backend {
            ProofBackend::InMemory { claims, .. } => {
                claims
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
                Ok(())
            }
            ProofBackend::Persistent { claims, .. } => {
                claims
                    .remove(key)
                    .map_err(|err| StoreError::Backend(format!("claim remove error: {err}")))?;
                claims
                    .flush()
                    .map_err(|err| StoreError::Backend(format!("claim flush error: {err}")))?;
                Ok(())
            }
        }
    }

    pub fn record(&self, record: ProofRecord) -> Result<(), StoreError> {
        match &*self.backend {
            ProofBackend::InMemory { proofs, .. } => {
                let mut guard = proofs.lock().unwrap_or_else(PoisonError::into_inner);
                if guard.contains_key(&record.id) {
                    return Err(StoreError::Duplicate);
                }
                guard.insert(record.id, record);
                Ok(())
            }
            ProofBackend::Persistent { db, .. } => {
                let value = serde_json::to_vec(&record)
                    .map_err(|err| StoreError::Backend(format!("proof encode error: {err}")))?;
                db.compare_and_swap(record.id, None as Option<&[u8]>, Some(value))
                    .map_err(|err| StoreError::Backend(format!("proof db insert error: {err}")))?
                    .map_err(|_| StoreError::Duplicate)?;
                db.flush()
                    .map_err(|err| StoreError::Backend(format!("proof db flush error: {err}")))?;
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &Bytes32) -> Result<Option<ProofRecord>, StoreError> {
        match &*self.backend {
            ProofBackend::InMemory { proofs, .. } => Ok(proofs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(id)
                .cloned()),
            ProofBackend::Persistent { db, .. } => db
                .get(id)
                .map_err(|err| StoreError::Backend(format!("proof db get error: {err}")))?
                .map(|bytes| {
                    serde_json::from_slice(&bytes)
                        .map_err(|err| StoreError::Backend(format!("proof decode error: {err}")))
                })
                .transpose(),
        }
    }
}
