use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use zkpix_common::{
    build_commitment, keccak256, CommitmentFields, EncodedIntent, FlowDirection, LocalSigner,
    ProofBundle, SignatureScheme,
};
use zkpix_prover::{ProofOutput, ProverError, ProverGateway, ProvingBackend, WitnessInput};

fn witness() -> WitnessInput {
    let signer = LocalSigner::from_hex(
        "0x0000000000000000000000000000000000000000000000000000000000000001",
        SignatureScheme::RawHash,
    )
    .unwrap();
    let intent = EncodedIntent {
        nonce: 1,
        recipient_key_hash: keccak256(b"alice@bank"),
        amount: 1000,
    };
    let commitment = build_commitment(
        FlowDirection::Inbound,
        &CommitmentFields {
            recipient_key: "alice@bank",
            rail_transaction_id: "E00038166201907261559y6j6mt9l0pi",
            amount: 1000,
            sender_key: None,
        },
    )
    .unwrap();
    let signature = signer.sign_hash(&intent.hash()).unwrap();
    WitnessInput::from_attestation(
        FlowDirection::Inbound,
        &commitment,
        &intent,
        &signature,
        &signer.public_key(),
    )
    .unwrap()
}

#[derive(Default)]
struct StubBackend {
    tamper_inputs: bool,
    reject: bool,
    delay: Option<Duration>,
    panics: bool,
    verifications: AtomicUsize,
    dropped_jobs: AtomicUsize,
}

struct CountOnDrop<'a>(&'a AtomicUsize);

impl Drop for CountOnDrop<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProvingBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn prove(&self, witness: &WitnessInput) -> Result<ProofOutput, ProverError> {
        let _job = CountOnDrop(&self.dropped_jobs);
        if self.panics {
            panic!("backend crashed");
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut public_inputs = witness.public_inputs();
        if self.tamper_inputs {
            public_inputs[0][31] ^= 1;
        }
        Ok(ProofOutput {
            proof: vec![0xaa; 16],
            public_inputs,
        })
    }

    async fn verify(&self, _bundle: &ProofBundle) -> Result<bool, ProverError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        Ok(!self.reject)
    }
}

#[tokio::test]
async fn proves_and_self_verifies() {
    let backend = Arc::new(StubBackend::default());
    let gateway = ProverGateway::new(backend.clone());
    let w = witness();

    let bundle = gateway.prove(&w).await.unwrap();

    assert_eq!(bundle.direction, FlowDirection::Inbound);
    assert_eq!(bundle.public_inputs.len(), 96);
    assert_eq!(
        bundle.payload_hash().unwrap().to_vec(),
        w.public.payload_hash
    );
    assert_eq!(backend.verifications.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn local_verification_can_be_disabled() {
    let backend = Arc::new(StubBackend {
        reject: true,
        ..StubBackend::default()
    });
    let gateway = ProverGateway::new(backend.clone()).with_local_verification(false);

    gateway.prove(&witness()).await.unwrap();
    assert_eq!(backend.verifications.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_self_check_fails_fast() {
    let gateway = ProverGateway::new(Arc::new(StubBackend {
        reject: true,
        ..StubBackend::default()
    }));
    let err = gateway.prove(&witness()).await.unwrap_err();
    assert!(matches!(err, ProverError::VerificationFailed));
}

#[tokio::test]
async fn mismatched_public_inputs_are_refused() {
    let gateway = ProverGateway::new(Arc::new(StubBackend {
        tamper_inputs: true,
        ..StubBackend::default()
    }));
    let err = gateway.prove(&witness()).await.unwrap_err();
    assert!(matches!(err, ProverError::PublicInputMismatch { .. }));
}

#[tokio::test]
async fn malformed_witness_never_reaches_backend() {
    let backend = Arc::new(StubBackend::default());
    let gateway = ProverGateway::new(backend.clone());
    let mut w = witness();
    w.private.nonce = vec![0; 9];

    let err = gateway.prove(&w).await.unwrap_err();
    assert!(matches!(
        err,
        ProverError::WitnessShape { field: "nonce", expected: 8, actual: 9 }
    ));
    assert_eq!(backend.verifications.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_backend_times_out() {
    let backend = Arc::new(StubBackend {
        delay: Some(Duration::from_secs(600)),
        ..StubBackend::default()
    });
    let gateway = ProverGateway::new(backend.clone()).with_timeout(Duration::from_secs(30));

    let err = gateway.prove(&witness()).await.unwrap_err();
    assert!(matches!(err, ProverError::Timeout { seconds: 30 }));
    // the abandoned job is torn down before the caller sees the timeout
    assert_eq!(backend.dropped_jobs.load(Ordering::SeqCst), 1);
    assert_eq!(backend.verifications.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn crashed_backend_is_a_backend_error() {
    let gateway = ProverGateway::new(Arc::new(StubBackend {
        panics: true,
        ..StubBackend::default()
    }));

    let err = gateway.prove(&witness()).await.unwrap_err();
    match err {
        ProverError::Backend(message) => assert_eq!(message, "prove task failed"),
        other => panic!("unexpected error: {other:?}"),
    }
}
