//! zkpix-prover
//!
//! Witness layout for the inbound and outbound attestation circuits and the
//! gateway in front of an external proving system.

pub mod backend;
pub mod error;
pub mod gateway;
pub mod manifest;
pub mod noir;
pub mod witness;

pub use backend::{ProofOutput, ProvingBackend};
pub use error::ProverError;
pub use gateway::ProverGateway;
pub use manifest::{ArtifactFile, CircuitManifest};
pub use noir::{NoirCircuit, NoirCliBackend, NoirCliConfig};
pub use witness::{PrivateWitness, PublicWitness, WitnessInput};
