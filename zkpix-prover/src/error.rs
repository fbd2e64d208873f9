use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProverError {
    #[error("witness field {field} must be {expected} bytes, got {actual}")]
    WitnessShape {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("witness field {field} is required for {direction} proofs")]
    MissingWitness {
        field: &'static str,
        direction: &'static str,
    },

    #[error("witness field {field} is not part of {direction} proofs")]
    UnexpectedWitness {
        field: &'static str,
        direction: &'static str,
    },

    #[error("proving backend failed: {0}")]
    Backend(String),

    #[error("proof generation exceeded {seconds}s")]
    Timeout { seconds: u64 },

    #[error("backend returned {actual} public inputs that differ from the expected {expected}")]
    PublicInputMismatch { expected: usize, actual: usize },

    #[error("proof failed local verification")]
    VerificationFailed,

    #[error("circuit artifact check failed: {0}")]
    Manifest(String),

    #[error("prover io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProverError {
    fn from(err: std::io::Error) -> Self {
        ProverError::Io(err.to_string())
    }
}
