pub mod config;
pub mod pipeline;
pub mod store;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use zkpix_common::{
    codec::{narrow_u64, parse_bytes32},
    to_hex, Bytes32, CodecError, FlowDirection, Intent, LocalSigner, RecoverableSignature,
    SignatureError,
};
use zkpix_finality::EvmFinalitySubmitter;
use zkpix_prover::{NoirCliBackend, ProverGateway};
use zkpix_rail::{PixClient, RailError};

pub use config::NodeConfig;
pub use pipeline::{Attestation, AttestationPipeline, AttestationRequest, PipelineError, RailLeg};
pub use store::{IntentClaim, ProofRecord, ProofStore, StoreError};

const CODE_VALIDATION: &str = "VALIDATION_ERROR";
const CODE_ENCODING: &str = "ENCODING_ERROR";
const CODE_INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";
const CODE_UNAUTHORIZED_SIGNER: &str = "UNAUTHORIZED_SIGNER";
const CODE_CLAIM_MISMATCH: &str = "CLAIM_MISMATCH";
const CODE_INTENT_IN_PROGRESS: &str = "INTENT_IN_PROGRESS";
const CODE_INTENT_PROCESSED: &str = "INTENT_ALREADY_PROCESSED";
const CODE_PAYMENT_RAIL: &str = "PAYMENT_RAIL_ERROR";
const CODE_SETTLEMENT_TIMEOUT: &str = "SETTLEMENT_TIMEOUT";
const CODE_SETTLEMENT_FAILED: &str = "SETTLEMENT_FAILED";
const CODE_SETTLEMENT_MISMATCH: &str = "SETTLEMENT_MISMATCH";
const CODE_PROOF_GENERATION: &str = "PROOF_GENERATION_FAILED";
const CODE_CHAIN_SUBMISSION: &str = "CHAIN_SUBMISSION_FAILED";
const CODE_CANCELLED: &str = "CANCELLED";
const CODE_PROOF_NOT_FOUND: &str = "PROOF_NOT_FOUND";
const CODE_PROOF_STORE: &str = "PROOF_STORE_ERROR";
const CODE_INTERNAL: &str = "INTERNAL_SERVER_ERROR";

const MAX_END_TO_END_ID_LEN: usize = 35;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<AttestationPipeline>,
    proofs: ProofStore,
    in_flight: InFlight,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: AttestationPipeline, proofs: ProofStore) -> Self {
        Self::with_shutdown(pipeline, proofs, CancellationToken::new())
    }

    pub fn with_shutdown(
        pipeline: AttestationPipeline,
        proofs: ProofStore,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            proofs,
            in_flight: InFlight::default(),
            shutdown,
        }
    }

    /// Wire the real rail client, Noir backend and (if configured) EVM submitter.
    pub fn from_config(config: &NodeConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let signer = LocalSigner::from_hex(&config.node_private_key, config.signature_scheme)
            .with_context(|| format!("invalid {}", config::NODE_PRIVATE_KEY_ENV))?;
        let rail = PixClient::new(config.rail.rail_config()?)?;
        let backend = NoirCliBackend::new(config.prover.noir_config()?);
        let prover = ProverGateway::new(Arc::new(backend))
            .with_timeout(config.prover.timeout)
            .with_local_verification(config.prover.verify);

        let proofs = match &config.proof_db {
            Some(path) => ProofStore::persistent(path)?,
            None => ProofStore::in_memory(),
        };
        let mut pipeline = AttestationPipeline::new(Arc::new(rail), prover, signer)
            .with_poll_policy(config.poll)
            .with_node_signed_inbound(config.allow_node_signed_inbound)
            .with_ledger(proofs.clone());
        if let Some(address) = config.inbound_signer {
            pipeline = pipeline.with_inbound_signer(address);
        }
        if let Some(chain) = &config.chain {
            let submitter = EvmFinalitySubmitter::new(chain)?;
            info!(
                chain_id = chain.chain_id,
                escrow = ?submitter.escrow_address(),
                submitter = ?submitter.submitter_address(),
                "escrow finality enabled"
            );
            pipeline = pipeline.with_finality(Arc::new(submitter));
        }
        Ok(Self::with_shutdown(pipeline, proofs, shutdown))
    }

    pub fn pipeline(&self) -> &AttestationPipeline {
        &self.pipeline
    }

    pub fn proof_store(&self) -> &ProofStore {
        &self.proofs
    }
}

/// Intent hashes with a run in progress. A second request for the same
/// intent is refused, whatever escrow id it names.
#[derive(Clone, Default)]
struct InFlight {
    ids: Arc<Mutex<HashSet<Bytes32>>>,
}

impl InFlight {
    fn claim(&self, id: Bytes32) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.insert(id).then(|| InFlightGuard {
            ids: self.ids.clone(),
            id,
        })
    }
}

struct InFlightGuard {
    ids: Arc<Mutex<HashSet<Bytes32>>>,
    id: Bytes32,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn missing(field: &str) -> Self {
        Self::bad_request(CODE_VALIDATION, format!("missing required field {field}"))
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL, message)
    }
}

impl From<CodecError> for ApiError {
    fn from(err: CodecError) -> Self {
        Self::bad_request(CODE_ENCODING, err.to_string())
    }
}

impl From<SignatureError> for ApiError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidSignature(_) => {
                Self::bad_request(CODE_INVALID_SIGNATURE, err.to_string())
            }
            SignatureError::UnauthorizedSigner { .. } => {
                Self::bad_request(CODE_UNAUTHORIZED_SIGNER, err.to_string())
            }
            SignatureError::Key(_)
            | SignatureError::UnknownScheme(_)
            | SignatureError::InvalidAddress(_) => Self::internal("node signing key unavailable"),
        }
    }
}

/// 5xx bodies carry fixed messages; the detail is logged by the pipeline span.
impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Encoding(err) => err.into(),
            PipelineError::Signature(err) => err.into(),
            PipelineError::SignatureRequired => Self::missing("signature"),
            PipelineError::AlreadyClaimed => Self::new(
                StatusCode::CONFLICT,
                CODE_INTENT_PROCESSED,
                err.to_string(),
            ),
            PipelineError::Ledger(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                CODE_PROOF_STORE,
                "intent ledger unavailable",
            ),
            PipelineError::ClaimMismatch { .. } => {
                Self::bad_request(CODE_CLAIM_MISMATCH, err.to_string())
            }
            PipelineError::Rail(RailError::SettlementTimeout { .. }) => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                CODE_SETTLEMENT_TIMEOUT,
                "payment not settled in time",
            ),
            PipelineError::Rail(RailError::SettlementFailed { .. }) => Self::new(
                StatusCode::BAD_GATEWAY,
                CODE_SETTLEMENT_FAILED,
                "payment failed on the rail",
            ),
            PipelineError::Rail(RailError::Cancelled) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                CODE_CANCELLED,
                "node is shutting down",
            ),
            PipelineError::Rail(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                CODE_PAYMENT_RAIL,
                "payment rail request failed",
            ),
            PipelineError::SettledAmountMismatch { .. }
            | PipelineError::SettledAmountUnreported { .. } => Self::new(
                StatusCode::BAD_GATEWAY,
                CODE_SETTLEMENT_MISMATCH,
                "settled amount differs from intent",
            ),
            PipelineError::Prover(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                CODE_PROOF_GENERATION,
                "proof generation failed",
            ),
            PipelineError::Finality(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                CODE_CHAIN_SUBMISSION,
                "escrow submission failed",
            ),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(CODE_VALIDATION, rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Serve the node until `shutdown` is cancelled. In-flight attestations see
/// the same token and abandon polling.
pub async fn serve(config: &NodeConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let state = AppState::from_config(config, shutdown.clone())?;
    info!(
        node_address = %state.pipeline().node_address(),
        inbound_signer = %state.pipeline().inbound_signer(),
        prover = state.pipeline().prover_backend(),
        finality = state.pipeline().finality_enabled(),
        "attestation node ready"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/inbound/send-inbound-pix", post(send_inbound_pix))
        .route("/outbound/receive-outbound-pix", post(receive_outbound_pix))
        .route("/proofs/:intent_id", get(get_proof))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    node_address: String,
    inbound_signer: String,
    prover_backend: &'static str,
    finality_enabled: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pipeline = state.pipeline();
    Json(HealthResponse {
        status: "ok",
        node_address: pipeline.node_address().to_string(),
        inbound_signer: pipeline.inbound_signer().to_string(),
        prover_backend: pipeline.prover_backend(),
        finality_enabled: pipeline.finality_enabled(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendInboundPixRequest {
    #[serde(alias = "recipientKey")]
    chave: Option<String>,
    intent_id: Option<String>,
    nonce: Option<JsonValue>,
    amount: Option<JsonValue>,
    signature: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendInboundPixResponse {
    txid: String,
    intent_id: String,
    signer_address: String,
    signer_pub_x: String,
    signer_pub_y: String,
    intended_recipient: String,
    payload_hash: String,
    amount: u64,
    nonce: u64,
    proof: String,
    public_inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finality_tx_hash: Option<String>,
}

impl From<Attestation> for SendInboundPixResponse {
    fn from(a: Attestation) -> Self {
        Self {
            txid: a.settlement.rail_transaction_id,
            intent_id: to_hex(&a.intent_id),
            signer_address: a.signer.to_string(),
            signer_pub_x: to_hex(&a.signer_public_key.x),
            signer_pub_y: to_hex(&a.signer_public_key.y),
            intended_recipient: a.intent.recipient_key,
            payload_hash: to_hex(&a.commitment.payload_hash),
            amount: a.intent.amount,
            nonce: a.intent.nonce,
            proof: to_hex(&a.bundle.proof),
            public_inputs: a.bundle.public_inputs.iter().map(|f| to_hex(f)).collect(),
            finality_tx_hash: a.finality.map(|f| to_hex(&f.transaction_hash)),
        }
    }
}

async fn send_inbound_pix(
    State(state): State<AppState>,
    payload: Result<Json<SendInboundPixRequest>, JsonRejection>,
) -> Result<Json<SendInboundPixResponse>, ApiError> {
    let Json(body) = payload?;
    let recipient = required_string(body.chave, "chave")?;
    let amount = integer_field("amount", body.amount.as_ref().ok_or_else(|| ApiError::missing("amount"))?)?;
    let nonce = body
        .nonce
        .as_ref()
        .map(|value| integer_field("nonce", value))
        .transpose()?
        .unwrap_or(0);
    let intent_id = optional_bytes32("intentId", body.intent_id.as_deref())?;
    let signature = body
        .signature
        .as_deref()
        .map(RecoverableSignature::from_hex)
        .transpose()?;

    let intent = Intent::new(FlowDirection::Inbound, nonce, recipient, amount);
    let request = AttestationRequest::inbound(intent, intent_id, signature);
    let attestation = run_attestation(&state, request).await?;
    Ok(Json(attestation.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveOutboundPixRequest {
    sender_chave: Option<String>,
    recipient_data: Option<String>,
    txid: Option<String>,
    amount: Option<JsonValue>,
    nonce: Option<JsonValue>,
    intent_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveOutboundPixResponse {
    txid: String,
    intent_id: String,
    sender_chave: String,
    recipient_data: String,
    amount: u64,
    nonce: u64,
    payload_hash: String,
    signature: String,
    signer_address: String,
    proof: String,
    public_inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finality_tx_hash: Option<String>,
}

impl From<Attestation> for ReceiveOutboundPixResponse {
    fn from(a: Attestation) -> Self {
        Self {
            txid: a.settlement.rail_transaction_id,
            intent_id: to_hex(&a.intent_id),
            sender_chave: a.sender_key.unwrap_or_default(),
            recipient_data: a.intent.recipient_key,
            amount: a.intent.amount,
            nonce: a.intent.nonce,
            payload_hash: to_hex(&a.commitment.payload_hash),
            signature: a.signature.to_hex(),
            signer_address: a.signer.to_string(),
            proof: to_hex(&a.bundle.proof),
            public_inputs: a.bundle.public_inputs.iter().map(|f| to_hex(f)).collect(),
            finality_tx_hash: a.finality.map(|f| to_hex(&f.transaction_hash)),
        }
    }
}

async fn receive_outbound_pix(
    State(state): State<AppState>,
    payload: Result<Json<ReceiveOutboundPixRequest>, JsonRejection>,
) -> Result<Json<ReceiveOutboundPixResponse>, ApiError> {
    let Json(body) = payload?;
    let sender = required_string(body.sender_chave, "senderChave")?;
    let recipient = required_string(body.recipient_data, "recipientData")?;
    let end_to_end_id = end_to_end_id(required_string(body.txid, "txid")?)?;
    let amount = integer_field("amount", body.amount.as_ref().ok_or_else(|| ApiError::missing("amount"))?)?;
    let nonce = body
        .nonce
        .as_ref()
        .map(|value| integer_field("nonce", value))
        .transpose()?
        .unwrap_or(0);
    let intent_id = optional_bytes32("intentId", body.intent_id.as_deref())?;

    let intent = Intent::new(FlowDirection::Outbound, nonce, recipient, amount);
    let request = AttestationRequest::outbound(intent, intent_id, end_to_end_id, sender);
    let attestation = run_attestation(&state, request).await?;
    Ok(Json(attestation.into()))
}

async fn get_proof(
    State(state): State<AppState>,
    AxumPath(intent_id): AxumPath<String>,
) -> Result<Json<ProofRecord>, ApiError> {
    let id = parse_bytes32("intentId", &intent_id)?;
    match state.proof_store().get(&id) {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            CODE_PROOF_NOT_FOUND,
            format!("no proof recorded for intent {}", to_hex(&id)),
        )),
        Err(err) => {
            warn!(error = %err, "proof store read failed");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                CODE_PROOF_STORE,
                "proof store unavailable",
            ))
        }
    }
}

/// Run the pipeline on its own task so a dropped connection cannot abort it
/// after money has moved; record the proof once it is done.
async fn run_attestation(
    state: &AppState,
    request: AttestationRequest,
) -> Result<Attestation, ApiError> {
    let intent_hash = request.encoded()?.hash();
    let guard = state.in_flight.claim(intent_hash).ok_or_else(|| {
        ApiError::new(
            StatusCode::CONFLICT,
            CODE_INTENT_IN_PROGRESS,
            format!("intent {} is already being processed", to_hex(&intent_hash)),
        )
    })?;

    let pipeline = state.pipeline.clone();
    let proofs = state.proofs.clone();
    let cancel = state.shutdown.child_token();
    let task = tokio::spawn(async move {
        let _guard = guard;
        let attestation = pipeline.run(request, &cancel).await?;
        if let Err(err) = proofs.record(ProofRecord::new(attestation.intent_id, &attestation.bundle)) {
            warn!(
                intent_id = %to_hex(&attestation.intent_id),
                error = %err,
                "failed to record proof"
            );
        }
        Ok::<_, PipelineError>(attestation)
    });

    match task.await {
        Ok(result) => result.map_err(ApiError::from),
        Err(err) => {
            warn!(error = %err, "attestation task aborted");
            Err(ApiError::internal("attestation task aborted"))
        }
    }
}

fn required_string(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::missing(field))
}

/// End-to-end ids go into a rail URL path, so only letters and digits pass.
fn end_to_end_id(value: String) -> Result<String, CodecError> {
    let well_formed = value.len() <= MAX_END_TO_END_ID_LEN
        && value.bytes().all(|b| b.is_ascii_alphanumeric());
    if well_formed {
        Ok(value)
    } else {
        Err(CodecError::Malformed {
            field: "txid",
            reason: format!("must be 1 to {MAX_END_TO_END_ID_LEN} letters or digits"),
        })
    }
}

fn optional_bytes32(field: &'static str, value: Option<&str>) -> Result<Option<Bytes32>, ApiError> {
    Ok(value.map(|v| parse_bytes32(field, v)).transpose()?)
}

/// Accept a JSON integer or a base-10 string and narrow it to 64 bits.
fn integer_field(field: &'static str, value: &JsonValue) -> Result<u64, CodecError> {
    let malformed = |reason: &str| CodecError::Malformed {
        field,
        reason: reason.to_string(),
    };
    match value {
        JsonValue::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(v)
            } else if n.as_i64().is_some() {
                Err(malformed("must not be negative"))
            } else {
                // Integers wider than u64 come through as floats.
                match n.as_f64() {
                    Some(f) if f >= 0.0 && f.fract() == 0.0 => Err(CodecError::Overflow { field }),
                    _ => Err(malformed("must be an integer")),
                }
            }
        }
        JsonValue::String(s) => {
            let digits = s.trim();
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed("must be a base-10 integer"));
            }
            let wide: u128 = digits.parse().map_err(|_| CodecError::Overflow { field })?;
            narrow_u64(field, wide)
        }
        _ => Err(malformed("must be a number or a numeric string")),
    }
}
