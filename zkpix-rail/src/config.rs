//! Rail client configuration.

use std::{path::Path, time::Duration};

use crate::{error::RailError, status::StatusPolicy};

pub const DEFAULT_BASE_URL: &str = "https://cdpj-sandbox.partners.uatinter.co";
pub const DEFAULT_TOKEN_PATH: &str = "/oauth/v2/token";
pub const DEFAULT_SEND_PATH: &str = "/banking/v2/pix";
pub const DEFAULT_SENT_STATUS_PATH: &str = "/banking/v2/pix/{id}";
pub const DEFAULT_RECEIVED_PATH: &str = "/pix/v2/pix/{id}";
const MAX_PATH_ID_LEN: usize = 64;
pub const DEFAULT_SCOPE: &str = "pagamento-pix.write pagamento-pix.read pix.read";
/// Tokens are refreshed once fewer than this many seconds of validity remain.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// PEM-encoded client certificate and private key for mutual TLS.
#[derive(Clone)]
pub struct ClientIdentity {
    pub certificate_pem: Vec<u8>,
    pub private_key_pem: Vec<u8>,
}

impl ClientIdentity {
    /// Read the PEM certificate and key issued by the rail.
    pub fn from_files(
        certificate_path: impl AsRef<Path>,
        private_key_path: impl AsRef<Path>,
    ) -> Result<Self, RailError> {
        let read = |path: &Path, what: &str| {
            std::fs::read(path).map_err(|e| {
                RailError::Config(format!("failed to read {what} {}: {e}", path.display()))
            })
        };
        Ok(Self {
            certificate_pem: read(certificate_path.as_ref(), "client certificate")?,
            private_key_pem: read(private_key_path.as_ref(), "client key")?,
        })
    }

    /// Certificate chain followed by the key, the single-buffer form rustls expects.
    pub fn combined_pem(&self) -> Vec<u8> {
        let mut pem = self.certificate_pem.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&self.private_key_pem);
        pem
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("certificate_pem", &format!("{} bytes", self.certificate_pem.len()))
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct RailConfig {
    pub base_url: String,
    pub token_path: String,
    pub send_path: String,
    /// Path template with an `{id}` placeholder for the send request id.
    pub sent_status_path: String,
    /// Path template with an `{id}` placeholder for an end-to-end id.
    pub received_path: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub identity: ClientIdentity,
    pub request_timeout: Duration,
    pub auth_timeout: Duration,
    pub refresh_margin: Duration,
    pub statuses: StatusPolicy,
    /// Free-text description attached to outgoing payments.
    pub payment_description: String,
}

impl RailConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        identity: ClientIdentity,
    ) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            send_path: DEFAULT_SEND_PATH.to_string(),
            sent_status_path: DEFAULT_SENT_STATUS_PATH.to_string(),
            received_path: DEFAULT_RECEIVED_PATH.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: DEFAULT_SCOPE.to_string(),
            identity,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            statuses: StatusPolicy::default(),
            payment_description: "zkpix attestation payout".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_statuses(mut self, statuses: StatusPolicy) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn token_url(&self) -> String {
        format!("{}{}", self.base_url, self.token_path)
    }

    pub fn send_url(&self) -> String {
        format!("{}{}", self.base_url, self.send_path)
    }

    pub fn sent_status_url(&self, request_id: &str) -> Result<String, RailError> {
        check_path_id("request id", request_id)?;
        Ok(format!(
            "{}{}",
            self.base_url,
            self.sent_status_path.replace("{id}", request_id)
        ))
    }

    pub fn received_url(&self, end_to_end_id: &str) -> Result<String, RailError> {
        check_path_id("end-to-end id", end_to_end_id)?;
        Ok(format!(
            "{}{}",
            self.base_url,
            self.received_path.replace("{id}", end_to_end_id)
        ))
    }
}

/// Identifiers substituted into a path must stay a single segment.
fn check_path_id(kind: &'static str, id: &str) -> Result<(), RailError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_PATH_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(RailError::InvalidIdentifier { kind })
    }
}

impl std::fmt::Debug for RailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RailConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("identity", &self.identity)
            .field("request_timeout", &self.request_timeout)
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}
