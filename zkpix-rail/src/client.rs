//! Pix client for the Inter banking API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};
use zkpix_common::{
    codec::{decimal_to_minor_units, minor_units_to_decimal},
    ExternalPaymentRecord, PaymentStatus,
};

use crate::{
    config::RailConfig,
    error::RailError,
    rail::{PaymentQuery, PaymentRail, PaymentReceipt},
    status::StatusPolicy,
    token::{AccessToken, CredentialCache, OAuthTokenSource},
};

#[derive(Serialize)]
struct SendPixRequest<'a> {
    valor: String,
    descricao: &'a str,
    destinatario: Destinatario<'a>,
}

#[derive(Serialize)]
struct Destinatario<'a> {
    tipo: &'static str,
    chave: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendPixResponse {
    codigo_solicitacao: String,
    #[serde(default)]
    tipo_retorno: String,
    data_pagamento: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentPixEnvelope {
    transacao_pix: SentPix,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentPix {
    #[serde(default)]
    status: String,
    #[serde(default, deserialize_with = "rail_amount")]
    valor: Option<String>,
    end_to_end: Option<String>,
    #[serde(alias = "dataHoraSituacao")]
    data_hora_movimento: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedPix {
    end_to_end_id: String,
    #[serde(default, deserialize_with = "rail_amount")]
    valor: Option<String>,
    chave_pagador: Option<String>,
    horario: Option<String>,
}

/// The rail reports `valor` either as a JSON string or a JSON number.
fn rail_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_amount(valor: Option<&str>) -> Result<Option<u64>, RailError> {
    valor
        .map(|v| decimal_to_minor_units("valor", v))
        .transpose()
        .map_err(|e| RailError::Decode(e.to_string()))
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

pub struct PixClient {
    http: reqwest::Client,
    config: RailConfig,
    credentials: Arc<CredentialCache<OAuthTokenSource>>,
}

impl PixClient {
    /// Build a client that presents the configured certificate on every request.
    pub fn new(config: RailConfig) -> Result<Self, RailError> {
        let identity = reqwest::Identity::from_pem(&config.identity.combined_pem())
            .map_err(|e| RailError::Config(format!("invalid client identity: {e}")))?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RailError::Config(format!("failed to build rail http client: {e}")))?;
        Ok(Self::with_http_client(config, http))
    }

    /// Use a caller-supplied HTTP client; the identity in `config` is ignored.
    pub fn with_http_client(config: RailConfig, http: reqwest::Client) -> Self {
        let source = OAuthTokenSource::new(http.clone(), &config);
        let credentials = Arc::new(CredentialCache::new(
            source,
            config.refresh_margin,
            config.auth_timeout,
        ));
        Self {
            http,
            config,
            credentials,
        }
    }

    pub fn statuses(&self) -> &StatusPolicy {
        &self.config.statuses
    }

    /// Number of access tokens minted so far.
    pub fn token_refreshes(&self) -> u64 {
        self.credentials.refresh_count()
    }

    /// Obtain a token, reusing the cached one while it is fresh.
    pub async fn authenticate(&self) -> Result<AccessToken, RailError> {
        self.credentials.get_token().await
    }

    pub async fn send_pix(
        &self,
        recipient_key: &str,
        amount: u64,
    ) -> Result<PaymentReceipt, RailError> {
        let url = self.config.send_url();
        let body = SendPixRequest {
            valor: minor_units_to_decimal(amount),
            descricao: &self.config.payment_description,
            destinatario: Destinatario {
                tipo: "CHAVE",
                chave: recipient_key,
            },
        };
        let response = self
            .send_authorized("send_payment", |token| {
                self.http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;
        ensure_success(response.status(), "send_payment")?;

        let body: SendPixResponse = response
            .json()
            .await
            .map_err(|e| RailError::Decode(format!("send response: {}", e.without_url())))?;
        if body.codigo_solicitacao.is_empty() {
            return Err(RailError::Decode("send response has no request id".into()));
        }
        debug!(request_id = %body.codigo_solicitacao, raw_status = %body.tipo_retorno, "pix ordered");
        Ok(PaymentReceipt {
            request_id: body.codigo_solicitacao,
            raw_status: body.tipo_retorno,
            payment_date: body.data_pagamento,
        })
    }

    /// Status of a payment this node ordered.
    pub async fn get_payment_status(
        &self,
        request_id: &str,
    ) -> Result<ExternalPaymentRecord, RailError> {
        let url = self.config.sent_status_url(request_id)?;
        let response = self
            .send_authorized("payment_status", |token| {
                self.http.get(&url).bearer_auth(token)
            })
            .await?;
        ensure_success(response.status(), "payment_status")?;

        let envelope: SentPixEnvelope = response
            .json()
            .await
            .map_err(|e| RailError::Decode(format!("status response: {}", e.without_url())))?;
        let pix = envelope.transacao_pix;
        let rail_transaction_id = pix
            .end_to_end
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| request_id.to_string());

        let mut record = ExternalPaymentRecord::pending(rail_transaction_id, "");
        record.advance(self.config.statuses.classify(&pix.status), pix.status);
        record.observed_amount = parse_amount(pix.valor.as_deref())?;
        record.settlement_timestamp = pix.data_hora_movimento;
        Ok(record)
    }

    /// Observe a payment received by this node. Unknown ids are still pending.
    pub async fn get_received_payment(
        &self,
        end_to_end_id: &str,
    ) -> Result<ExternalPaymentRecord, RailError> {
        let url = self.config.received_url(end_to_end_id)?;
        let response = self
            .send_authorized("received_payment", |token| {
                self.http.get(&url).bearer_auth(token)
            })
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ExternalPaymentRecord::pending(end_to_end_id, "NOT_FOUND"));
        }
        ensure_success(response.status(), "received_payment")?;

        let pix: ReceivedPix = response
            .json()
            .await
            .map_err(|e| RailError::Decode(format!("received response: {}", e.without_url())))?;
        let mut record = ExternalPaymentRecord::pending(pix.end_to_end_id, "");
        record.advance(PaymentStatus::Settled, "RECEBIDO");
        record.observed_amount = parse_amount(pix.valor.as_deref())?;
        record.settlement_timestamp = pix.horario;
        record.payer_key = pix.chave_pagador.filter(|k| !k.is_empty());
        Ok(record)
    }

    /// Send a request with the cached token. On 401/403 the token is refreshed
    /// and the request is retried exactly once.
    async fn send_authorized<F>(
        &self,
        operation: &'static str,
        build: F,
    ) -> Result<reqwest::Response, RailError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder + Send + Sync,
    {
        let token = self.credentials.get_token().await?;
        let response = build(token.value()).send().await?;
        if !is_auth_rejection(response.status()) {
            return Ok(response);
        }

        warn!(
            operation,
            status = response.status().as_u16(),
            "rail rejected access token, refreshing once"
        );
        let token = self.credentials.refresh_after_rejection(&token).await?;
        let response = build(token.value()).send().await?;
        if is_auth_rejection(response.status()) {
            return Err(RailError::Auth(format!(
                "{operation} rejected after token refresh (HTTP {})",
                response.status().as_u16()
            )));
        }
        Ok(response)
    }
}

fn ensure_success(status: StatusCode, operation: &'static str) -> Result<(), RailError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(RailError::Status {
            status: status.as_u16(),
            operation,
        })
    }
}

#[async_trait]
impl PaymentRail for PixClient {
    async fn send_payment(
        &self,
        recipient_key: &str,
        amount: u64,
    ) -> Result<PaymentReceipt, RailError> {
        self.send_pix(recipient_key, amount).await
    }

    async fn payment_status(
        &self,
        query: &PaymentQuery,
    ) -> Result<ExternalPaymentRecord, RailError> {
        match query {
            PaymentQuery::Sent(id) => self.get_payment_status(id).await,
            PaymentQuery::Received(id) => self.get_received_payment(id).await,
        }
    }
}
