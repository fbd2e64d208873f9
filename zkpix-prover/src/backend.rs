use async_trait::async_trait;
use zkpix_common::{Bytes32, ProofBundle};

use crate::{error::ProverError, witness::WitnessInput};

/// What a backend hands back for one witness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofOutput {
    pub proof: Vec<u8>,
    pub public_inputs: Vec<Bytes32>,
}

/// An opaque proving system. The circuits themselves live behind this trait.
#[async_trait]
pub trait ProvingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn prove(&self, witness: &WitnessInput) -> Result<ProofOutput, ProverError>;

    /// `Ok(false)` means the backend ran and rejected the proof.
    async fn verify(&self, bundle: &ProofBundle) -> Result<bool, ProverError>;
}
