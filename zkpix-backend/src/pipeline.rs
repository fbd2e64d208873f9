//! The attestation pipeline, parameterised by [`FlowDirection`].
//!
//! Inbound: verify the intent signature, pay the recipient on the rail, wait
//! for settlement. Outbound: wait until the counterparty's payment is seen on
//! the rail, check it against the claim, attest it with the node key. Both
//! then build the commitment, prove, and optionally submit to the escrow.
//! Stages of one run are strictly sequential.
//!
//! Before the irreversible step of each direction (the payout, the
//! attestation) the run takes an [`IntentClaim`] in the ledger, so a replayed
//! or concurrent request for the same intent never gets that far twice.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use zkpix_common::{
    build_commitment, resolve_intent_id, to_hex, Bytes32, CodecError, Commitment,
    CommitmentFields, EncodedIntent, ExternalPaymentRecord, FinalityRecord, FlowDirection, Intent,
    LocalSigner, ProofBundle, RecoverableSignature, SignatureError, SignatureVerifier,
    SignerAddress, SignerPublicKey,
};
use zkpix_finality::{FinalityError, FinalitySubmitter};
use zkpix_prover::{ProverError, ProverGateway, WitnessInput};
use zkpix_rail::{PaymentQuery, PaymentRail, PollPolicy, RailError, SettlementPoller};

use crate::store::{IntentClaim, ProofStore, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Encoding(#[from] CodecError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("inbound intents must carry a signature")]
    SignatureRequired,

    #[error("intent was already processed by an earlier run")]
    AlreadyClaimed,

    #[error("claim ledger error: {0}")]
    Ledger(StoreError),

    /// What the user claimed about a received payment is not what the rail saw.
    #[error("{field} does not match the payment observed on the rail")]
    ClaimMismatch { field: &'static str },

    #[error(transparent)]
    Rail(#[from] RailError),

    #[error("rail settled {observed} but the intent is for {expected}")]
    SettledAmountMismatch { expected: u64, observed: u64 },

    #[error("rail reported settlement without an amount; the intent is for {expected}")]
    SettledAmountUnreported { expected: u64 },

    #[error(transparent)]
    Prover(#[from] ProverError),

    #[error(transparent)]
    Finality(#[from] FinalityError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyClaimed => Self::AlreadyClaimed,
            other => Self::Ledger(other),
        }
    }
}

/// How the off-chain leg of an intent happens.
#[derive(Clone, Debug)]
pub enum RailLeg {
    /// The node pays the recipient. `None` is only accepted when the pipeline
    /// allows node-signed inbound intents.
    Send {
        signature: Option<RecoverableSignature>,
    },
    /// The counterparty has paid the node; the rail knows it by `end_to_end_id`.
    Observe {
        end_to_end_id: String,
        sender_key: String,
    },
}

#[derive(Clone, Debug)]
pub struct AttestationRequest {
    pub intent: Intent,
    pub intent_id: Option<Bytes32>,
    pub leg: RailLeg,
}

impl AttestationRequest {
    pub fn inbound(
        intent: Intent,
        intent_id: Option<Bytes32>,
        signature: Option<RecoverableSignature>,
    ) -> Self {
        Self {
            intent: Intent {
                direction: FlowDirection::Inbound,
                ..intent
            },
            intent_id,
            leg: RailLeg::Send { signature },
        }
    }

    pub fn outbound(
        intent: Intent,
        intent_id: Option<Bytes32>,
        end_to_end_id: impl Into<String>,
        sender_key: impl Into<String>,
    ) -> Self {
        Self {
            intent: Intent {
                direction: FlowDirection::Outbound,
                ..intent
            },
            intent_id,
            leg: RailLeg::Observe {
                end_to_end_id: end_to_end_id.into(),
                sender_key: sender_key.into(),
            },
        }
    }

    pub fn direction(&self) -> FlowDirection {
        self.intent.direction
    }

    pub fn encoded(&self) -> Result<EncodedIntent, CodecError> {
        EncodedIntent::from_intent(&self.intent)
    }

    /// The escrow identifier this run will use.
    pub fn intent_id(&self) -> Result<Bytes32, CodecError> {
        Ok(resolve_intent_id(self.intent_id, self.encoded()?.hash()))
    }
}

/// Everything a finished run produced.
#[derive(Clone, Debug)]
pub struct Attestation {
    pub direction: FlowDirection,
    pub intent: Intent,
    pub intent_id: Bytes32,
    pub intent_hash: Bytes32,
    pub signature: RecoverableSignature,
    pub signer: SignerAddress,
    pub signer_public_key: SignerPublicKey,
    pub settlement: ExternalPaymentRecord,
    pub sender_key: Option<String>,
    pub commitment: Commitment,
    pub bundle: ProofBundle,
    pub finality: Option<FinalityRecord>,
}

struct Authorization {
    signature: RecoverableSignature,
    public_key: SignerPublicKey,
}

pub struct AttestationPipeline {
    rail: Arc<dyn PaymentRail>,
    prover: ProverGateway,
    finality: Option<Arc<dyn FinalitySubmitter>>,
    signer: LocalSigner,
    verifier: SignatureVerifier,
    inbound_signer: SignerAddress,
    allow_node_signed_inbound: bool,
    poll_policy: PollPolicy,
    ledger: ProofStore,
}

impl AttestationPipeline {
    /// Inbound intents are accepted from the node key unless
    /// [`with_inbound_signer`](Self::with_inbound_signer) says otherwise.
    pub fn new(rail: Arc<dyn PaymentRail>, prover: ProverGateway, signer: LocalSigner) -> Self {
        Self {
            rail,
            prover,
            finality: None,
            verifier: SignatureVerifier::new(signer.scheme()),
            inbound_signer: signer.address(),
            signer,
            allow_node_signed_inbound: false,
            poll_policy: PollPolicy::default(),
            ledger: ProofStore::in_memory(),
        }
    }

    /// Let an unsigned inbound intent through by signing it with the node key.
    /// Off by default: anyone who can reach the endpoint could then order payouts.
    pub fn with_node_signed_inbound(mut self, allowed: bool) -> Self {
        self.allow_node_signed_inbound = allowed;
        self
    }

    /// Where intent claims are kept. Share the node's proof store so claims
    /// outlive a restart.
    pub fn with_ledger(mut self, ledger: ProofStore) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_finality(mut self, submitter: Arc<dyn FinalitySubmitter>) -> Self {
        self.finality = Some(submitter);
        self
    }

    pub fn with_inbound_signer(mut self, signer: SignerAddress) -> Self {
        self.inbound_signer = signer;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn node_address(&self) -> SignerAddress {
        self.signer.address()
    }

    pub fn inbound_signer(&self) -> SignerAddress {
        self.inbound_signer
    }

    pub fn finality_enabled(&self) -> bool {
        self.finality.is_some()
    }

    pub fn prover_backend(&self) -> &'static str {
        self.prover.backend_name()
    }

    pub async fn run(
        &self,
        request: AttestationRequest,
        cancel: &CancellationToken,
    ) -> Result<Attestation, PipelineError> {
        let encoded = request.encoded()?;
        let intent_hash = encoded.hash();
        let intent_id = resolve_intent_id(request.intent_id, intent_hash);
        let span = info_span!(
            "attestation",
            direction = request.direction().as_str(),
            intent_id = %to_hex(&intent_id),
        );
        async {
            let result = self
                .execute(request, encoded, intent_hash, intent_id, cancel)
                .await;
            if let Err(err) = &result {
                error!(error = %err, "attestation failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        request: AttestationRequest,
        encoded: EncodedIntent,
        intent_hash: Bytes32,
        intent_id: Bytes32,
        cancel: &CancellationToken,
    ) -> Result<Attestation, PipelineError> {
        let AttestationRequest { intent, leg, .. } = request;

        let (authorization, settlement, sender_key, claim) = match leg {
            RailLeg::Send { signature } => {
                let authorization = self.authorize_inbound(&intent_hash, signature)?;
                if cancel.is_cancelled() {
                    return Err(RailError::Cancelled.into());
                }
                // Kept whatever happens next: the payment may have gone out.
                self.ledger.claim(&IntentClaim::payment(intent_hash))?;
                let settlement = self.pay_and_settle(&intent, cancel).await?;
                (authorization, settlement, None, None)
            }
            RailLeg::Observe {
                end_to_end_id,
                sender_key,
            } => {
                let settlement = self
                    .observe_receipt(&intent, &end_to_end_id, &sender_key, cancel)
                    .await?;
                let claim = IntentClaim::receipt(&end_to_end_id);
                self.ledger.claim(&claim)?;
                let authorization = match self.self_attest(&intent_hash) {
                    Ok(authorization) => authorization,
                    Err(err) => {
                        self.release_claim(&claim);
                        return Err(err);
                    }
                };
                (authorization, settlement, Some(sender_key), Some(claim))
            }
        };

        let result = self
            .prove_and_finalize(
                intent,
                encoded,
                intent_hash,
                intent_id,
                authorization,
                settlement,
                sender_key,
            )
            .await;
        // A receipt claim is only given back while nothing may have reached the chain.
        if let (Err(err), Some(claim)) = (&result, &claim) {
            if !matches!(err, PipelineError::Finality(_)) {
                self.release_claim(claim);
            }
        }
        result
    }

    fn release_claim(&self, claim: &IntentClaim) {
        if let Err(err) = self.ledger.release(claim) {
            warn!(error = %err, direction = %claim.direction(), "failed to release intent claim");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn prove_and_finalize(
        &self,
        intent: Intent,
        encoded: EncodedIntent,
        intent_hash: Bytes32,
        intent_id: Bytes32,
        authorization: Authorization,
        settlement: ExternalPaymentRecord,
        sender_key: Option<String>,
    ) -> Result<Attestation, PipelineError> {
        let direction = intent.direction;
        let commitment = build_commitment(
            direction,
            &CommitmentFields {
                recipient_key: &intent.recipient_key,
                rail_transaction_id: &settlement.rail_transaction_id,
                amount: intent.amount,
                sender_key: sender_key.as_deref(),
            },
        )?;
        info!(payload_hash = %to_hex(&commitment.payload_hash), "commitment built");

        let witness = WitnessInput::from_attestation(
            direction,
            &commitment,
            &encoded,
            &authorization.signature,
            &authorization.public_key,
        )?;
        let bundle = self.prover.prove(&witness).await?;

        let finality = match &self.finality {
            Some(submitter) => {
                let record = submitter.submit_finality(intent_id, &bundle).await?;
                info!(
                    chain = submitter.chain_name(),
                    tx_hash = %to_hex(&record.transaction_hash),
                    "escrow finalized"
                );
                Some(record)
            }
            None => None,
        };

        Ok(Attestation {
            direction,
            signer: authorization.public_key.address(),
            signer_public_key: authorization.public_key,
            signature: authorization.signature,
            intent,
            intent_id,
            intent_hash,
            settlement,
            sender_key,
            commitment,
            bundle,
            finality,
        })
    }

    /// Recover the originator of an inbound intent before any money moves.
    fn authorize_inbound(
        &self,
        intent_hash: &Bytes32,
        signature: Option<RecoverableSignature>,
    ) -> Result<Authorization, PipelineError> {
        let signature = match signature {
            Some(signature) => signature,
            None if self.allow_node_signed_inbound => self.signer.sign_hash(intent_hash)?,
            None => return Err(PipelineError::SignatureRequired),
        };
        let public_key =
            self.verifier
                .verify_authorized(intent_hash, &signature, &self.inbound_signer)?;
        info!(signer = %public_key.address(), "intent signature verified");
        Ok(Authorization {
            signature,
            public_key,
        })
    }

    /// The node vouches for an observed receipt, then checks its own signature.
    fn self_attest(&self, intent_hash: &Bytes32) -> Result<Authorization, PipelineError> {
        let signature = self.signer.sign_hash(intent_hash)?;
        let public_key =
            self.verifier
                .verify_authorized(intent_hash, &signature, &self.signer.address())?;
        Ok(Authorization {
            signature,
            public_key,
        })
    }

    async fn pay_and_settle(
        &self,
        intent: &Intent,
        cancel: &CancellationToken,
    ) -> Result<ExternalPaymentRecord, PipelineError> {
        let receipt = self
            .rail
            .send_payment(&intent.recipient_key, intent.amount)
            .await?;
        info!(
            request_id = %receipt.request_id,
            raw_status = %receipt.raw_status,
            "payment ordered"
        );

        let query = PaymentQuery::Sent(receipt.request_id);
        let record = SettlementPoller::new(self.rail.as_ref())
            .await_settlement(&query, &self.poll_policy, cancel)
            .await?;
        match record.observed_amount {
            Some(observed) if observed == intent.amount => Ok(record),
            Some(observed) => Err(PipelineError::SettledAmountMismatch {
                expected: intent.amount,
                observed,
            }),
            None => Err(PipelineError::SettledAmountUnreported {
                expected: intent.amount,
            }),
        }
    }

    async fn observe_receipt(
        &self,
        intent: &Intent,
        end_to_end_id: &str,
        sender_key: &str,
        cancel: &CancellationToken,
    ) -> Result<ExternalPaymentRecord, PipelineError> {
        let query = PaymentQuery::Received(end_to_end_id.to_string());
        let record = SettlementPoller::new(self.rail.as_ref())
            .await_settlement(&query, &self.poll_policy, cancel)
            .await?;
        // An unreported field cannot back the claim.
        if record.observed_amount != Some(intent.amount) {
            return Err(PipelineError::ClaimMismatch { field: "amount" });
        }
        if record.payer_key.as_deref() != Some(sender_key) {
            return Err(PipelineError::ClaimMismatch {
                field: "senderChave",
            });
        }
        info!(end_to_end_id, "received payment matches claim");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkpix_common::SignatureScheme;
    use zkpix_prover::ProverGateway;
    use zkpix_test_fixtures::{
        fixtures, node_signer, DigestBackend, RecordingSubmitter, ScriptedRail,
        SCENARIO_AMOUNT, SCENARIO_END_TO_END_ID, SCENARIO_INBOUND_PAYLOAD_HASH,
        SCENARIO_INTENT_HASH, SCENARIO_RECIPIENT, SCENARIO_SENDER,
    };

    fn pipeline_with(rail: Arc<ScriptedRail>, backend: DigestBackend) -> AttestationPipeline {
        let prover = ProverGateway::new(Arc::new(backend));
        AttestationPipeline::new(rail, prover, node_signer(SignatureScheme::RawHash))
            .with_poll_policy(PollPolicy::fixed(std::time::Duration::from_millis(10), 5))
    }

    fn pipeline(rail: Arc<ScriptedRail>) -> AttestationPipeline {
        pipeline_with(rail, DigestBackend::new())
    }

    fn signed_inbound() -> AttestationRequest {
        AttestationRequest::inbound(
            fixtures().inbound_intent(),
            None,
            Some(*fixtures().inbound_signature()),
        )
    }

    fn scenario_outbound() -> AttestationRequest {
        let intent = Intent::new(FlowDirection::Outbound, 0, SCENARIO_RECIPIENT, SCENARIO_AMOUNT);
        AttestationRequest::outbound(intent, None, SCENARIO_END_TO_END_ID, SCENARIO_SENDER)
    }

    fn received_rail() -> Arc<ScriptedRail> {
        Arc::new(ScriptedRail::new("unused").then_received(
            SCENARIO_END_TO_END_ID,
            SCENARIO_AMOUNT,
            SCENARIO_SENDER,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_run_binds_settlement_to_intent() {
        let rail = Arc::new(ScriptedRail::scenario());
        let submitter = Arc::new(RecordingSubmitter::new());
        let pipeline = pipeline(rail.clone()).with_finality(submitter.clone());

        let attestation = pipeline
            .run(signed_inbound(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(attestation.intent_id, SCENARIO_INTENT_HASH);
        assert_eq!(attestation.commitment.payload_hash, SCENARIO_INBOUND_PAYLOAD_HASH);
        assert_eq!(
            attestation.bundle.payload_hash().unwrap(),
            SCENARIO_INBOUND_PAYLOAD_HASH
        );
        assert_eq!(attestation.settlement.rail_transaction_id, SCENARIO_END_TO_END_ID);
        assert_eq!(rail.polls(), 3);
        assert_eq!(
            rail.sent_payments(),
            vec![(SCENARIO_RECIPIENT.to_string(), SCENARIO_AMOUNT)]
        );
        let calls = submitter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, SCENARIO_INTENT_HASH);
        assert!(attestation.finality.is_some());
    }

    #[tokio::test]
    async fn unauthorized_signer_never_pays() {
        let rail = Arc::new(ScriptedRail::scenario());
        let request = AttestationRequest::inbound(
            fixtures().inbound_intent(),
            None,
            Some(*fixtures().stranger_signature()),
        );

        let err = pipeline(rail.clone())
            .run(request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Signature(SignatureError::UnauthorizedSigner { .. })
        ));
        assert!(rail.sent_payments().is_empty());
        assert_eq!(rail.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn short_settlement_is_rejected() {
        let rail = Arc::new(
            ScriptedRail::new("req-9").then_settled(SCENARIO_END_TO_END_ID, Some(SCENARIO_AMOUNT - 1)),
        );

        let err = pipeline(rail)
            .run(signed_inbound(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::SettledAmountMismatch { expected: 1000, observed: 999 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn settlement_without_amount_is_rejected() {
        let rail = Arc::new(ScriptedRail::new("req-9").then_settled(SCENARIO_END_TO_END_ID, None));

        let err = pipeline(rail)
            .run(signed_inbound(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::SettledAmountUnreported { expected: 1000 }
        ));
    }

    #[tokio::test]
    async fn unsigned_inbound_needs_opt_in() {
        let unsigned = || AttestationRequest::inbound(fixtures().inbound_intent(), None, None);

        let rail = Arc::new(ScriptedRail::scenario());
        let err = pipeline(rail.clone())
            .run(unsigned(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SignatureRequired));
        assert!(rail.sent_payments().is_empty());

        let rail = Arc::new(ScriptedRail::new("req-1").then_settled(SCENARIO_END_TO_END_ID, Some(SCENARIO_AMOUNT)));
        let attestation = pipeline(rail.clone())
            .with_node_signed_inbound(true)
            .run(unsigned(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(attestation.signer, fixtures().node().address());
        assert_eq!(rail.sent_payments().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_inbound_pays_once() {
        let rail = Arc::new(ScriptedRail::scenario());
        let pipeline = pipeline(rail.clone());

        pipeline
            .run(signed_inbound(), &CancellationToken::new())
            .await
            .unwrap();
        // a fresh escrow id does not make it a fresh intent
        let replay = AttestationRequest::inbound(
            fixtures().inbound_intent(),
            Some([0x22; 32]),
            Some(*fixtures().inbound_signature()),
        );
        let err = pipeline
            .run(replay, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::AlreadyClaimed));
        assert_eq!(rail.sent_payments().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_inbound_keeps_its_claim() {
        let rail = Arc::new(ScriptedRail::new("req-3").then_failed("REJEITADO"));
        let pipeline = pipeline(rail.clone());

        let first = pipeline
            .run(signed_inbound(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(first, PipelineError::Rail(RailError::SettlementFailed { .. })));

        let second = pipeline
            .run(signed_inbound(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(second, PipelineError::AlreadyClaimed));
        assert_eq!(rail.sent_payments().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn received_payment_is_attested_once() {
        let pipeline = pipeline(received_rail());

        pipeline
            .run(scenario_outbound(), &CancellationToken::new())
            .await
            .unwrap();
        let err = pipeline
            .run(scenario_outbound(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::AlreadyClaimed));
    }

    #[tokio::test(start_paused = true)]
    async fn proving_failure_frees_the_receipt() {
        let ledger = ProofStore::in_memory();
        let failing = pipeline_with(received_rail(), DigestBackend::rejecting()).with_ledger(ledger.clone());
        let err = failing
            .run(scenario_outbound(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Prover(_)));

        let retry = pipeline(received_rail()).with_ledger(ledger);
        retry
            .run(scenario_outbound(), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_without_amount_or_payer_is_rejected() {
        let no_amount = Arc::new(ScriptedRail::new("unused").then_settled(SCENARIO_END_TO_END_ID, None));
        let err = pipeline(no_amount)
            .run(scenario_outbound(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ClaimMismatch { field: "amount" }));

        // settled with the right amount, but the rail never named the payer
        let no_payer = Arc::new(
            ScriptedRail::new("unused").then_settled(SCENARIO_END_TO_END_ID, Some(SCENARIO_AMOUNT)),
        );
        let err = pipeline(no_payer)
            .run(scenario_outbound(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ClaimMismatch { field: "senderChave" }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_claim_must_match_rail() {
        let rail = Arc::new(ScriptedRail::new("unused").then_received(
            SCENARIO_END_TO_END_ID,
            SCENARIO_AMOUNT,
            "mallory@bank",
        ));

        let err = pipeline(rail)
            .run(scenario_outbound(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::ClaimMismatch { field: "senderChave" }
        ));
    }

    #[tokio::test]
    async fn cancelled_run_does_not_pay() {
        let rail = Arc::new(ScriptedRail::scenario());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline(rail.clone())
            .run(signed_inbound(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Rail(RailError::Cancelled)));
        assert!(rail.sent_payments().is_empty());
    }

    #[test]
    fn supplied_intent_id_wins() {
        let id = [7u8; 32];
        let request = AttestationRequest::inbound(fixtures().inbound_intent(), Some(id), None);
        assert_eq!(request.intent_id().unwrap(), id);
        let derived = AttestationRequest::inbound(fixtures().inbound_intent(), None, None);
        assert_eq!(derived.intent_id().unwrap(), SCENARIO_INTENT_HASH);
    }
}
