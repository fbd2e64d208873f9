//! Backend that shells out to `nargo` (witness execution) and `bb`
//! (UltraHonk proving and verification).
//!
//! Each run writes a uniquely named `Prover_<id>.toml` into the circuit
//! directory, asks nargo for a uniquely named witness, and lets bb write
//! its proof into a scratch directory, so concurrent runs never share files.
//! Child processes are killed when the calling future is dropped, which is
//! how the gateway's deadline reaches them.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Output, Stdio},
};

use async_trait::async_trait;
use tokio::{process::Command, sync::OnceCell};
use tracing::{debug, info};
use uuid::Uuid;
use zkpix_common::{Bytes32, FlowDirection, ProofBundle};

use crate::{
    backend::{ProofOutput, ProvingBackend},
    error::ProverError,
    manifest::{read_manifest, CircuitManifest},
    witness::WitnessInput,
};

pub const DEFAULT_NARGO_BIN: &str = "nargo";
pub const DEFAULT_BB_BIN: &str = "bb";
pub const INBOUND_PACKAGE: &str = "zkpix_inbound";
pub const OUTBOUND_PACKAGE: &str = "zkpix_outbound";

/// A compiled Noir package: `dir/Nargo.toml` and `dir/target/<package>.json`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoirCircuit {
    pub dir: PathBuf,
    pub package: String,
}

impl NoirCircuit {
    pub fn new(dir: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            package: package.into(),
        }
    }

    pub fn target_dir(&self) -> PathBuf {
        self.dir.join("target")
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.target_dir().join(format!("{}.json", self.package))
    }
}

#[derive(Clone, Debug)]
pub struct NoirCliConfig {
    pub nargo_bin: PathBuf,
    pub bb_bin: PathBuf,
    pub inbound: NoirCircuit,
    pub outbound: NoirCircuit,
    /// Refuse to run circuits whose compiled artifact is not pinned here.
    pub manifest: Option<CircuitManifest>,
}

impl NoirCliConfig {
    pub fn new(inbound_dir: impl Into<PathBuf>, outbound_dir: impl Into<PathBuf>) -> Self {
        Self {
            nargo_bin: PathBuf::from(DEFAULT_NARGO_BIN),
            bb_bin: PathBuf::from(DEFAULT_BB_BIN),
            inbound: NoirCircuit::new(inbound_dir, INBOUND_PACKAGE),
            outbound: NoirCircuit::new(outbound_dir, OUTBOUND_PACKAGE),
            manifest: None,
        }
    }

    pub fn with_binaries(mut self, nargo: impl Into<PathBuf>, bb: impl Into<PathBuf>) -> Self {
        self.nargo_bin = nargo.into();
        self.bb_bin = bb.into();
        self
    }

    pub fn with_manifest_file(mut self, path: impl AsRef<Path>) -> Result<Self, ProverError> {
        self.manifest = Some(read_manifest(path)?);
        Ok(self)
    }

    pub fn circuit(&self, direction: FlowDirection) -> &NoirCircuit {
        match direction {
            FlowDirection::Inbound => &self.inbound,
            FlowDirection::Outbound => &self.outbound,
        }
    }
}

pub struct NoirCliBackend {
    config: NoirCliConfig,
    inbound_vk: OnceCell<PathBuf>,
    outbound_vk: OnceCell<PathBuf>,
}

impl NoirCliBackend {
    pub fn new(config: NoirCliConfig) -> Self {
        Self {
            config,
            inbound_vk: OnceCell::new(),
            outbound_vk: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &NoirCliConfig {
        &self.config
    }

    /// Read the compiled circuit, refusing it when it does not match the manifest.
    async fn checked_artifact(&self, direction: FlowDirection) -> Result<PathBuf, ProverError> {
        let circuit = self.config.circuit(direction);
        let path = circuit.artifact_path();
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            ProverError::Backend(format!(
                "missing compiled circuit {}: {e}",
                path.display()
            ))
        })?;
        if let Some(manifest) = &self.config.manifest {
            manifest
                .artifact(direction)
                .ensure_matches(&bytes, direction.as_str())?;
        }
        Ok(path)
    }

    async fn verification_key(&self, direction: FlowDirection) -> Result<PathBuf, ProverError> {
        let cell = match direction {
            FlowDirection::Inbound => &self.inbound_vk,
            FlowDirection::Outbound => &self.outbound_vk,
        };
        cell.get_or_try_init(|| async {
            let artifact = self.checked_artifact(direction).await?;
            let out_dir = self.config.circuit(direction).target_dir();
            let mut cmd = Command::new(&self.config.bb_bin);
            cmd.arg("write_vk")
                .arg("-b")
                .arg(&artifact)
                .arg("-o")
                .arg(&out_dir);
            run_checked(cmd, "bb write_vk").await?;
            info!(%direction, "verification key written");
            Ok::<_, ProverError>(out_dir.join("vk"))
        })
        .await
        .cloned()
    }
}

#[async_trait]
impl ProvingBackend for NoirCliBackend {
    fn name(&self) -> &'static str {
        "noir-cli"
    }

    async fn prove(&self, witness: &WitnessInput) -> Result<ProofOutput, ProverError> {
        let direction = witness.direction;
        let circuit = self.config.circuit(direction);
        let artifact = self.checked_artifact(direction).await?;
        let run_id = Uuid::new_v4().simple().to_string();

        let mut prover_file = tempfile::Builder::new()
            .prefix(&format!("Prover_{run_id}"))
            .suffix(".toml")
            .rand_bytes(0)
            .tempfile_in(&circuit.dir)?;
        prover_file.write_all(witness.to_prover_toml().as_bytes())?;
        prover_file.flush()?;
        let prover_name = format!("Prover_{run_id}");

        let witness_name = format!("witness_{run_id}");
        let witness_path = tempfile::TempPath::from_path(
            circuit.target_dir().join(format!("{witness_name}.gz")),
        );

        let mut execute = Command::new(&self.config.nargo_bin);
        execute
            .arg("execute")
            .arg("--program-dir")
            .arg(&circuit.dir)
            .arg("--prover-name")
            .arg(&prover_name)
            .arg(&witness_name);
        run_checked(execute, "nargo execute").await?;
        debug!(%direction, %run_id, "witness generated");

        let out_dir = tempfile::tempdir()?;
        let mut prove = Command::new(&self.config.bb_bin);
        prove
            .arg("prove")
            .arg("-b")
            .arg(&artifact)
            .arg("-w")
            .arg(&*witness_path)
            .arg("-o")
            .arg(out_dir.path());
        run_checked(prove, "bb prove").await?;

        let proof = tokio::fs::read(out_dir.path().join("proof")).await?;
        let public_bytes = tokio::fs::read(out_dir.path().join("public_inputs")).await?;
        let public_inputs = split_fields(&public_bytes)?;
        info!(
            %direction,
            %run_id,
            proof_len = proof.len(),
            public_inputs = public_inputs.len(),
            "proof generated"
        );
        Ok(ProofOutput {
            proof,
            public_inputs,
        })
    }

    async fn verify(&self, bundle: &ProofBundle) -> Result<bool, ProverError> {
        let vk = self.verification_key(bundle.direction).await?;
        let scratch = tempfile::tempdir()?;
        let proof_path = scratch.path().join("proof");
        let inputs_path = scratch.path().join("public_inputs");
        tokio::fs::write(&proof_path, &bundle.proof).await?;
        tokio::fs::write(&inputs_path, bundle.public_inputs.concat()).await?;

        let mut cmd = Command::new(&self.config.bb_bin);
        cmd.arg("verify")
            .arg("-k")
            .arg(&vk)
            .arg("-p")
            .arg(&proof_path)
            .arg("-i")
            .arg(&inputs_path);
        let output = run(cmd, "bb verify").await?;
        if !output.status.success() {
            debug!(status = %output.status, "bb verify rejected proof");
        }
        Ok(output.status.success())
    }
}

/// bb writes public inputs as concatenated 32-byte big-endian field elements.
fn split_fields(bytes: &[u8]) -> Result<Vec<Bytes32>, ProverError> {
    if bytes.len() % 32 != 0 {
        return Err(ProverError::Backend(format!(
            "public inputs file is {} bytes, not a multiple of 32",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(32)
        .map(|chunk| {
            let mut field = [0u8; 32];
            field.copy_from_slice(chunk);
            field
        })
        .collect())
}

async fn run(mut cmd: Command, label: &'static str) -> Result<Output, ProverError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    cmd.output()
        .await
        .map_err(|e| ProverError::Backend(format!("failed to start {label}: {e}")))
}

async fn run_checked(cmd: Command, label: &'static str) -> Result<Output, ProverError> {
    let output = run(cmd, label).await?;
    if output.status.success() {
        return Ok(output);
    }
    // Tool output can echo witness values, so it stays at debug level.
    debug!(
        label,
        stderr = %String::from_utf8_lossy(&output.stderr),
        "external prover step failed"
    );
    Err(ProverError::Backend(format!(
        "{label} exited with {}",
        output.status
    )))
}
