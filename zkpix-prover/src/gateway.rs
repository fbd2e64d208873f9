//! Entry point the pipeline uses to turn a validated witness into a checked
//! [`ProofBundle`].

use std::{future::Future, sync::Arc, time::Duration};

use tracing::{info, warn};
use zkpix_common::ProofBundle;

use crate::{backend::ProvingBackend, error::ProverError, witness::WitnessInput};

pub const DEFAULT_PROOF_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct ProverGateway {
    backend: Arc<dyn ProvingBackend>,
    proof_timeout: Duration,
    verify_locally: bool,
}

impl ProverGateway {
    pub fn new(backend: Arc<dyn ProvingBackend>) -> Self {
        Self {
            backend,
            proof_timeout: DEFAULT_PROOF_TIMEOUT,
            verify_locally: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.proof_timeout = timeout;
        self
    }

    pub fn with_local_verification(mut self, enabled: bool) -> Self {
        self.verify_locally = enabled;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Validate the witness, prove it under the deadline, check that the
    /// backend's public inputs are exactly the ones the witness declares and,
    /// when enabled, verify the proof before handing it out.
    pub async fn prove(&self, witness: &WitnessInput) -> Result<ProofBundle, ProverError> {
        witness.validate()?;
        let expected = witness.public_inputs();

        let backend = self.backend.clone();
        let job = witness.clone();
        let output = self
            .dispatch("prove", async move { backend.prove(&job).await })
            .await?;

        if output.public_inputs != expected {
            warn!(
                backend = self.backend.name(),
                expected = expected.len(),
                actual = output.public_inputs.len(),
                "backend public inputs do not match witness"
            );
            return Err(ProverError::PublicInputMismatch {
                expected: expected.len(),
                actual: output.public_inputs.len(),
            });
        }

        let bundle = ProofBundle::new(witness.direction, output.proof, output.public_inputs);
        if self.verify_locally && !self.verify(&bundle).await? {
            return Err(ProverError::VerificationFailed);
        }
        info!(
            backend = self.backend.name(),
            direction = %witness.direction,
            verified = self.verify_locally,
            "proof bundle ready"
        );
        Ok(bundle)
    }

    pub async fn verify(&self, bundle: &ProofBundle) -> Result<bool, ProverError> {
        let backend = self.backend.clone();
        let bundle = bundle.clone();
        self.dispatch("verify", async move { backend.verify(&bundle).await })
            .await
    }

    /// Run backend work on its own task under the deadline. A timed-out task
    /// is aborted and awaited, so whatever it owns (child processes, scratch
    /// dirs) is dropped before the error is returned.
    async fn dispatch<T, F>(&self, stage: &'static str, work: F) -> Result<T, ProverError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ProverError>> + Send + 'static,
    {
        let mut task = tokio::spawn(work);
        match tokio::time::timeout(self.proof_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(backend = self.backend.name(), stage, error = %err, "prover task died");
                Err(ProverError::Backend(format!("{stage} task failed")))
            }
            Err(_) => {
                task.abort();
                let _ = task.await;
                warn!(backend = self.backend.name(), stage, "prover deadline passed");
                Err(ProverError::Timeout {
                    seconds: self.proof_timeout.as_secs(),
                })
            }
        }
    }
}
