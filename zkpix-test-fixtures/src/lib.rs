//! Deterministic keys, the reference settlement scenario and in-process
//! stand-ins for the rail, the proving system and the escrow chain.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use hex_literal::hex;
use once_cell::sync::OnceCell;
use zkpix_common::{
    codec::keccak256_concat, Bytes32, ExternalPaymentRecord, FinalityRecord, FlowDirection, Intent,
    LocalSigner, PaymentStatus, ProofBundle, RecoverableSignature, SignatureScheme,
};
use zkpix_finality::{FinalityError, FinalitySubmitter};
use zkpix_prover::{ProofOutput, ProverError, ProvingBackend, WitnessInput};
use zkpix_rail::{PaymentQuery, PaymentRail, PaymentReceipt, RailError};

/// secp256k1 scalar 1.
pub const NODE_SECRET_KEY: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000001";
pub const NODE_ADDRESS: &str = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";
/// secp256k1 scalar 2, never authorised for anything.
pub const STRANGER_SECRET_KEY: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000002";
pub const STRANGER_ADDRESS: &str = "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf";

pub const SCENARIO_NONCE: u64 = 1;
pub const SCENARIO_RECIPIENT: &str = "alice@bank";
pub const SCENARIO_SENDER: &str = "bob@bank";
pub const SCENARIO_AMOUNT: u64 = 1000;
pub const SCENARIO_REQUEST_ID: &str = "c1a2f3e4-0000-4000-8000-00000000e2e1";
pub const SCENARIO_END_TO_END_ID: &str = "E00038166201907261559y6j6mt9l0pi";

/// `keccak256(nonce=1 ‖ keccak("alice@bank") ‖ amount=1000)`.
pub const SCENARIO_INTENT_HASH: Bytes32 =
    hex!("6c22391b01e3bef00b94f3989e34f532cbd1f54117ada57ed7ffc2648098078f");
/// `keccak256(keccak("alice@bank") ‖ keccak(end-to-end id) ‖ 1000)`.
pub const SCENARIO_INBOUND_PAYLOAD_HASH: Bytes32 =
    hex!("42c07e426484bc53d1fbe7f855e6e41b2c1d119a610e3ad5641f5a494c429b86");
/// Inbound payload followed by `keccak("bob@bank")`.
pub const SCENARIO_OUTBOUND_PAYLOAD_HASH: Bytes32 =
    hex!("d00e1916f0801142c244a4da269b59c5972cf73ffd99d84d7cfbe916f4217225");

static FIXTURES: OnceCell<TestFixtures> = OnceCell::new();

/// Signers and signatures for the reference scenario, built once per test binary.
pub struct TestFixtures {
    node: LocalSigner,
    stranger: LocalSigner,
    inbound_signature: RecoverableSignature,
    stranger_signature: RecoverableSignature,
}

impl TestFixtures {
    pub fn node(&self) -> &LocalSigner {
        &self.node
    }

    pub fn stranger(&self) -> &LocalSigner {
        &self.stranger
    }

    pub fn inbound_intent(&self) -> Intent {
        Intent::new(
            FlowDirection::Inbound,
            SCENARIO_NONCE,
            SCENARIO_RECIPIENT,
            SCENARIO_AMOUNT,
        )
    }

    /// Node signature over [`SCENARIO_INTENT_HASH`].
    pub fn inbound_signature(&self) -> &RecoverableSignature {
        &self.inbound_signature
    }

    /// Same intent, signed by a key that is not authorised.
    pub fn stranger_signature(&self) -> &RecoverableSignature {
        &self.stranger_signature
    }
}

pub fn fixtures() -> &'static TestFixtures {
    FIXTURES.get_or_init(|| {
        let node = LocalSigner::from_hex(NODE_SECRET_KEY, SignatureScheme::RawHash)
            .expect("node key");
        let stranger = LocalSigner::from_hex(STRANGER_SECRET_KEY, SignatureScheme::RawHash)
            .expect("stranger key");
        let inbound_signature = node
            .sign_hash(&SCENARIO_INTENT_HASH)
            .expect("sign scenario intent");
        let stranger_signature = stranger
            .sign_hash(&SCENARIO_INTENT_HASH)
            .expect("sign scenario intent");
        TestFixtures {
            node,
            stranger,
            inbound_signature,
            stranger_signature,
        }
    })
}

pub fn node_signer(scheme: SignatureScheme) -> LocalSigner {
    LocalSigner::from_hex(NODE_SECRET_KEY, scheme).expect("node key")
}

enum Step {
    Observe(ExternalPaymentRecord),
    Fail(RailError),
}

/// A rail that replays a fixed sequence of observations.
///
/// The last scripted observation repeats once the script is exhausted;
/// an empty script reports the payment as pending forever.
pub struct ScriptedRail {
    request_id: String,
    send_error: Mutex<Option<RailError>>,
    script: Mutex<VecDeque<Step>>,
    sent: Mutex<Vec<(String, u64)>>,
    queries: Mutex<Vec<PaymentQuery>>,
    polls: AtomicUsize,
}

impl ScriptedRail {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            send_error: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    /// Pending, pending, settled under the scenario end-to-end id.
    pub fn scenario() -> Self {
        Self::new(SCENARIO_REQUEST_ID)
            .then_pending(2)
            .then_settled(SCENARIO_END_TO_END_ID, Some(SCENARIO_AMOUNT))
    }

    pub fn then_pending(self, polls: usize) -> Self {
        for _ in 0..polls {
            self.push(Step::Observe(ExternalPaymentRecord::pending(
                self.request_id.clone(),
                "EM_PROCESSAMENTO",
            )));
        }
        self
    }

    pub fn then_settled(self, rail_transaction_id: &str, amount: Option<u64>) -> Self {
        let record = settled_record(rail_transaction_id, "CONCLUIDA", amount, None);
        self.push(Step::Observe(record));
        self
    }

    /// A received payment, as the rail reports it for the outbound direction.
    pub fn then_received(self, end_to_end_id: &str, amount: u64, payer_key: &str) -> Self {
        let record = settled_record(end_to_end_id, "RECEBIDO", Some(amount), Some(payer_key));
        self.push(Step::Observe(record));
        self
    }

    pub fn then_failed(self, raw_status: &str) -> Self {
        let mut record = ExternalPaymentRecord::pending(self.request_id.clone(), raw_status);
        record.advance(PaymentStatus::Failed, raw_status);
        self.push(Step::Observe(record));
        self
    }

    pub fn then_error(self, err: RailError) -> Self {
        self.push(Step::Fail(err));
        self
    }

    pub fn failing_send(self, err: RailError) -> Self {
        *self.send_error.lock().expect("rail poisoned") = Some(err);
        self
    }

    pub fn sent_payments(&self) -> Vec<(String, u64)> {
        self.sent.lock().expect("rail poisoned").clone()
    }

    pub fn queries(&self) -> Vec<PaymentQuery> {
        self.queries.lock().expect("rail poisoned").clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn push(&self, step: Step) {
        self.script.lock().expect("rail poisoned").push_back(step);
    }
}

fn settled_record(
    rail_transaction_id: &str,
    raw_status: &str,
    amount: Option<u64>,
    payer_key: Option<&str>,
) -> ExternalPaymentRecord {
    let mut record = ExternalPaymentRecord::pending(rail_transaction_id, raw_status);
    record.advance(PaymentStatus::Settled, raw_status);
    record.observed_amount = amount;
    record.settlement_timestamp = Some("2024-05-01T12:00:00Z".into());
    record.payer_key = payer_key.map(str::to_string);
    record
}

#[async_trait]
impl PaymentRail for ScriptedRail {
    async fn send_payment(
        &self,
        recipient_key: &str,
        amount: u64,
    ) -> Result<PaymentReceipt, RailError> {
        if let Some(err) = self.send_error.lock().expect("rail poisoned").take() {
            return Err(err);
        }
        self.sent
            .lock()
            .expect("rail poisoned")
            .push((recipient_key.to_string(), amount));
        Ok(PaymentReceipt {
            request_id: self.request_id.clone(),
            raw_status: "APROVACAO".into(),
            payment_date: None,
        })
    }

    async fn payment_status(
        &self,
        query: &PaymentQuery,
    ) -> Result<ExternalPaymentRecord, RailError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .expect("rail poisoned")
            .push(query.clone());

        let mut script = self.script.lock().expect("rail poisoned");
        let consume = script.len() > 1 || matches!(script.front(), Some(Step::Fail(_)));
        match consume.then(|| script.pop_front()).flatten() {
            Some(Step::Observe(record)) => Ok(record),
            Some(Step::Fail(err)) => Err(err),
            None => Ok(match script.front() {
                Some(Step::Observe(record)) => record.clone(),
                _ => ExternalPaymentRecord::pending(query.id(), "EM_PROCESSAMENTO"),
            }),
        }
    }
}

/// Proving backend whose "proof" is a blake3 digest of the public inputs.
///
/// It echoes the witness public inputs exactly, so everything downstream of
/// the gateway sees the values a real circuit would expose.
#[derive(Default)]
pub struct DigestBackend {
    reject: bool,
    proofs: AtomicUsize,
    verifications: AtomicUsize,
    last_witness: Mutex<Option<WitnessInput>>,
}

impl DigestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every local verification reports the proof as invalid.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn proofs(&self) -> usize {
        self.proofs.load(Ordering::SeqCst)
    }

    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }

    pub fn last_witness(&self) -> Option<WitnessInput> {
        self.last_witness.lock().expect("backend poisoned").clone()
    }

    pub fn digest(direction: FlowDirection, public_inputs: &[Bytes32]) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(direction.as_str().as_bytes());
        for field in public_inputs {
            hasher.update(field);
        }
        hasher.finalize().as_bytes().to_vec()
    }
}

#[async_trait]
impl ProvingBackend for DigestBackend {
    fn name(&self) -> &'static str {
        "digest"
    }

    async fn prove(&self, witness: &WitnessInput) -> Result<ProofOutput, ProverError> {
        self.proofs.fetch_add(1, Ordering::SeqCst);
        *self.last_witness.lock().expect("backend poisoned") = Some(witness.clone());
        let public_inputs = witness.public_inputs();
        Ok(ProofOutput {
            proof: Self::digest(witness.direction, &public_inputs),
            public_inputs,
        })
    }

    async fn verify(&self, bundle: &ProofBundle) -> Result<bool, ProverError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Ok(false);
        }
        Ok(bundle.proof == Self::digest(bundle.direction, &bundle.public_inputs))
    }
}

/// Escrow stand-in that records every finality call it receives.
#[derive(Default)]
pub struct RecordingSubmitter {
    revert: bool,
    calls: Mutex<Vec<(Bytes32, ProofBundle)>>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submission comes back reverted.
    pub fn reverting() -> Self {
        Self {
            revert: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(Bytes32, ProofBundle)> {
        self.calls.lock().expect("submitter poisoned").clone()
    }

    /// Transaction hash this submitter reports for `intent_id` and `proof`.
    pub fn transaction_hash(intent_id: &Bytes32, proof: &[u8]) -> Bytes32 {
        keccak256_concat([intent_id.as_slice(), proof])
    }
}

#[async_trait]
impl FinalitySubmitter for RecordingSubmitter {
    fn chain_name(&self) -> &str {
        "recording"
    }

    async fn submit_finality(
        &self,
        intent_id: Bytes32,
        bundle: &ProofBundle,
    ) -> Result<FinalityRecord, FinalityError> {
        self.calls
            .lock()
            .expect("submitter poisoned")
            .push((intent_id, bundle.clone()));
        let transaction_hash = Self::transaction_hash(&intent_id, &bundle.proof);
        if self.revert {
            return Err(FinalityError::Reverted {
                tx_hash: zkpix_common::to_hex(&transaction_hash),
            });
        }
        Ok(FinalityRecord {
            intent_id,
            transaction_hash,
        })
    }
}
