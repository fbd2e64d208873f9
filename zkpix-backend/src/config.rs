//! Node configuration from environment variables.

use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use zkpix_common::{SignatureScheme, SignerAddress};
use zkpix_finality::{submitter::DEFAULT_GAS_LIMIT, EvmFinalityConfig};
use zkpix_prover::{gateway::DEFAULT_PROOF_TIMEOUT, noir, NoirCliConfig};
use zkpix_rail::{
    config as rail_defaults, poller, Backoff, ClientIdentity, PollPolicy, RailConfig,
    StatusPolicy,
};

pub const BIND_ADDR_ENV: &str = "ZKPIX_BIND_ADDR";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const NODE_PRIVATE_KEY_ENV: &str = "ZKPIX_NODE_PRIVATE_KEY";
pub const SIGNATURE_SCHEME_ENV: &str = "ZKPIX_SIGNATURE_SCHEME";
pub const INBOUND_SIGNER_ENV: &str = "ZKPIX_INBOUND_SIGNER";
pub const ALLOW_NODE_SIGNED_INBOUND_ENV: &str = "ZKPIX_ALLOW_NODE_SIGNED_INBOUND";
pub const PROOF_DB_ENV: &str = "ZKPIX_PROOF_DB";
pub const LOG_JSON_ENV: &str = "ZKPIX_LOG_JSON";

pub const RAIL_BASE_URL_ENV: &str = "ZKPIX_RAIL_BASE_URL";
pub const RAIL_TOKEN_PATH_ENV: &str = "ZKPIX_RAIL_TOKEN_PATH";
pub const RAIL_SEND_PATH_ENV: &str = "ZKPIX_RAIL_SEND_PATH";
pub const RAIL_SENT_STATUS_PATH_ENV: &str = "ZKPIX_RAIL_SENT_STATUS_PATH";
pub const RAIL_RECEIVED_PATH_ENV: &str = "ZKPIX_RAIL_RECEIVED_PATH";
pub const RAIL_CLIENT_ID_ENV: &str = "ZKPIX_RAIL_CLIENT_ID";
pub const RAIL_CLIENT_SECRET_ENV: &str = "ZKPIX_RAIL_CLIENT_SECRET";
pub const RAIL_SCOPE_ENV: &str = "ZKPIX_RAIL_SCOPE";
pub const RAIL_CERT_PATH_ENV: &str = "ZKPIX_RAIL_CERT_PATH";
pub const RAIL_KEY_PATH_ENV: &str = "ZKPIX_RAIL_KEY_PATH";
pub const RAIL_TIMEOUT_SECS_ENV: &str = "ZKPIX_RAIL_TIMEOUT_SECS";
pub const RAIL_SETTLED_STATUSES_ENV: &str = "ZKPIX_RAIL_SETTLED_STATUSES";
pub const RAIL_FAILED_STATUSES_ENV: &str = "ZKPIX_RAIL_FAILED_STATUSES";

pub const POLL_INTERVAL_MS_ENV: &str = "ZKPIX_POLL_INTERVAL_MS";
pub const POLL_MAX_ATTEMPTS_ENV: &str = "ZKPIX_POLL_MAX_ATTEMPTS";
pub const POLL_BACKOFF_ENV: &str = "ZKPIX_POLL_BACKOFF";
pub const POLL_MAX_INTERVAL_MS_ENV: &str = "ZKPIX_POLL_MAX_INTERVAL_MS";
const DEFAULT_POLL_MAX_INTERVAL: Duration = Duration::from_secs(30);
const EXPONENTIAL_FACTOR: u32 = 2;

pub const NARGO_BIN_ENV: &str = "ZKPIX_NARGO_BIN";
pub const BB_BIN_ENV: &str = "ZKPIX_BB_BIN";
pub const INBOUND_CIRCUIT_DIR_ENV: &str = "ZKPIX_INBOUND_CIRCUIT_DIR";
pub const DEFAULT_INBOUND_CIRCUIT_DIR: &str = "circuits/inbound";
pub const OUTBOUND_CIRCUIT_DIR_ENV: &str = "ZKPIX_OUTBOUND_CIRCUIT_DIR";
pub const DEFAULT_OUTBOUND_CIRCUIT_DIR: &str = "circuits/outbound";
pub const CIRCUIT_MANIFEST_ENV: &str = "ZKPIX_CIRCUIT_MANIFEST";
pub const PROOF_TIMEOUT_SECS_ENV: &str = "ZKPIX_PROOF_TIMEOUT_SECS";
pub const VERIFY_PROOFS_ENV: &str = "ZKPIX_VERIFY_PROOFS";

pub const RPC_URL_ENV: &str = "ZKPIX_RPC_URL";
pub const CHAIN_ID_ENV: &str = "ZKPIX_CHAIN_ID";
pub const ESCROW_ADDRESS_ENV: &str = "ZKPIX_ESCROW_ADDRESS";
pub const SUBMITTER_PRIVATE_KEY_ENV: &str = "ZKPIX_SUBMITTER_PRIVATE_KEY";
pub const FINALITY_GAS_LIMIT_ENV: &str = "ZKPIX_FINALITY_GAS_LIMIT";
pub const FINALITY_TIMEOUT_SECS_ENV: &str = "ZKPIX_FINALITY_TIMEOUT_SECS";

#[derive(Clone)]
pub struct RailSettings {
    pub base_url: String,
    pub token_path: String,
    pub send_path: String,
    pub sent_status_path: String,
    pub received_path: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub request_timeout: Duration,
    pub statuses: StatusPolicy,
}

impl RailSettings {
    /// Reads the client certificate and key from disk.
    pub fn rail_config(&self) -> Result<RailConfig> {
        let identity = ClientIdentity::from_files(&self.cert_path, &self.key_path)?;
        let mut rail = RailConfig::new(&self.client_id, &self.client_secret, identity)
            .with_base_url(&self.base_url)
            .with_request_timeout(self.request_timeout)
            .with_statuses(self.statuses.clone());
        rail.token_path = self.token_path.clone();
        rail.send_path = self.send_path.clone();
        rail.sent_status_path = self.sent_status_path.clone();
        rail.received_path = self.received_path.clone();
        rail.scope = self.scope.clone();
        Ok(rail)
    }
}

#[derive(Clone, Debug)]
pub struct ProverSettings {
    pub nargo_bin: PathBuf,
    pub bb_bin: PathBuf,
    pub inbound_dir: PathBuf,
    pub outbound_dir: PathBuf,
    pub manifest: Option<PathBuf>,
    pub timeout: Duration,
    pub verify: bool,
}

impl ProverSettings {
    pub fn noir_config(&self) -> Result<NoirCliConfig> {
        let config = NoirCliConfig::new(&self.inbound_dir, &self.outbound_dir)
            .with_binaries(&self.nargo_bin, &self.bb_bin);
        match &self.manifest {
            Some(path) => config
                .with_manifest_file(path)
                .with_context(|| format!("failed to load circuit manifest {}", path.display())),
            None => Ok(config),
        }
    }
}

#[derive(Clone)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    pub node_private_key: String,
    pub signature_scheme: SignatureScheme,
    pub inbound_signer: Option<SignerAddress>,
    /// Sign unsigned inbound intents with the node key instead of refusing them.
    pub allow_node_signed_inbound: bool,
    pub proof_db: Option<PathBuf>,
    pub log_json: bool,
    pub rail: RailSettings,
    pub poll: PollPolicy,
    pub prover: ProverSettings,
    /// `None` when no chain is configured: proofs are returned but not submitted.
    pub chain: Option<EvmFinalityConfig>,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("bind_addr", &self.bind_addr)
            .field("signature_scheme", &self.signature_scheme)
            .field("inbound_signer", &self.inbound_signer)
            .field("allow_node_signed_inbound", &self.allow_node_signed_inbound)
            .field("proof_db", &self.proof_db)
            .field("rail_base_url", &self.rail.base_url)
            .field("poll", &self.poll)
            .field("prover", &self.prover)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl NodeConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| var(key).ok_or_else(|| anyhow!("{key} must be set"));
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let bind_addr: SocketAddr = or_default(BIND_ADDR_ENV, DEFAULT_BIND_ADDR)
            .parse()
            .with_context(|| format!("{BIND_ADDR_ENV} is not a socket address"))?;
        let signature_scheme: SignatureScheme = match var(SIGNATURE_SCHEME_ENV) {
            Some(value) => value
                .parse()
                .with_context(|| format!("invalid {SIGNATURE_SCHEME_ENV}"))?,
            None => SignatureScheme::default(),
        };
        let inbound_signer = var(INBOUND_SIGNER_ENV)
            .map(|value| value.parse::<SignerAddress>())
            .transpose()
            .with_context(|| format!("invalid {INBOUND_SIGNER_ENV}"))?;

        let rail = RailSettings {
            base_url: or_default(RAIL_BASE_URL_ENV, rail_defaults::DEFAULT_BASE_URL),
            token_path: or_default(RAIL_TOKEN_PATH_ENV, rail_defaults::DEFAULT_TOKEN_PATH),
            send_path: or_default(RAIL_SEND_PATH_ENV, rail_defaults::DEFAULT_SEND_PATH),
            sent_status_path: or_default(RAIL_SENT_STATUS_PATH_ENV, rail_defaults::DEFAULT_SENT_STATUS_PATH),
            received_path: or_default(RAIL_RECEIVED_PATH_ENV, rail_defaults::DEFAULT_RECEIVED_PATH),
            client_id: required(RAIL_CLIENT_ID_ENV)?,
            client_secret: required(RAIL_CLIENT_SECRET_ENV)?,
            scope: or_default(RAIL_SCOPE_ENV, rail_defaults::DEFAULT_SCOPE),
            cert_path: required(RAIL_CERT_PATH_ENV)?.into(),
            key_path: required(RAIL_KEY_PATH_ENV)?.into(),
            request_timeout: parse_secs(&var, RAIL_TIMEOUT_SECS_ENV)?
                .unwrap_or(rail_defaults::DEFAULT_REQUEST_TIMEOUT),
            statuses: StatusPolicy::from_lists(
                var(RAIL_SETTLED_STATUSES_ENV).as_deref(),
                var(RAIL_FAILED_STATUSES_ENV).as_deref(),
            ),
        };

        let interval = parse_num::<u64>(&var, POLL_INTERVAL_MS_ENV)?
            .map(Duration::from_millis)
            .unwrap_or(poller::DEFAULT_POLL_INTERVAL);
        let max_attempts =
            parse_num::<u32>(&var, POLL_MAX_ATTEMPTS_ENV)?.unwrap_or(poller::DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            bail!("{POLL_MAX_ATTEMPTS_ENV} must be at least 1");
        }
        let backoff = match var(POLL_BACKOFF_ENV).as_deref() {
            None | Some("fixed") => Backoff::Fixed,
            Some("exponential") => Backoff::Exponential {
                factor: EXPONENTIAL_FACTOR,
                max: parse_num::<u64>(&var, POLL_MAX_INTERVAL_MS_ENV)?
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_POLL_MAX_INTERVAL),
            },
            Some(other) => bail!("{POLL_BACKOFF_ENV} must be fixed or exponential, got {other}"),
        };
        let poll = PollPolicy {
            interval,
            max_attempts,
            backoff,
        };

        let prover = ProverSettings {
            nargo_bin: or_default(NARGO_BIN_ENV, noir::DEFAULT_NARGO_BIN).into(),
            bb_bin: or_default(BB_BIN_ENV, noir::DEFAULT_BB_BIN).into(),
            inbound_dir: or_default(INBOUND_CIRCUIT_DIR_ENV, DEFAULT_INBOUND_CIRCUIT_DIR).into(),
            outbound_dir: or_default(OUTBOUND_CIRCUIT_DIR_ENV, DEFAULT_OUTBOUND_CIRCUIT_DIR).into(),
            manifest: var(CIRCUIT_MANIFEST_ENV).map(PathBuf::from),
            timeout: parse_secs(&var, PROOF_TIMEOUT_SECS_ENV)?.unwrap_or(DEFAULT_PROOF_TIMEOUT),
            verify: parse_bool(&var, VERIFY_PROOFS_ENV)?.unwrap_or(true),
        };

        Ok(Self {
            bind_addr,
            node_private_key: required(NODE_PRIVATE_KEY_ENV)?,
            signature_scheme,
            inbound_signer,
            allow_node_signed_inbound: parse_bool(&var, ALLOW_NODE_SIGNED_INBOUND_ENV)?
                .unwrap_or(false),
            proof_db: var(PROOF_DB_ENV).map(PathBuf::from),
            log_json: parse_bool(&var, LOG_JSON_ENV)?.unwrap_or(false),
            rail,
            poll,
            prover,
            chain: chain_config(&var)?,
        })
    }
}

/// All four connection settings or none of them.
fn chain_config(var: &impl Fn(&str) -> Option<String>) -> Result<Option<EvmFinalityConfig>> {
    let rpc_url = var(RPC_URL_ENV);
    let chain_id = parse_num::<u64>(var, CHAIN_ID_ENV)?;
    let escrow = var(ESCROW_ADDRESS_ENV);
    let key = var(SUBMITTER_PRIVATE_KEY_ENV);

    let (rpc_url, chain_id, escrow, key) = match (rpc_url, chain_id, escrow, key) {
        (None, None, None, None) => return Ok(None),
        (Some(rpc_url), Some(chain_id), Some(escrow), Some(key)) => (rpc_url, chain_id, escrow, key),
        _ => bail!(
            "incomplete chain configuration: set all of {RPC_URL_ENV}, {CHAIN_ID_ENV}, \
             {ESCROW_ADDRESS_ENV}, {SUBMITTER_PRIVATE_KEY_ENV} or none of them"
        ),
    };
    let mut chain = EvmFinalityConfig::new(rpc_url, chain_id, escrow, key)
        .with_gas_limit(parse_num::<u64>(var, FINALITY_GAS_LIMIT_ENV)?.unwrap_or(DEFAULT_GAS_LIMIT));
    if let Some(timeout) = parse_secs(var, FINALITY_TIMEOUT_SECS_ENV)? {
        chain = chain.with_inclusion_timeout(timeout);
    }
    Ok(Some(chain))
}

fn parse_num<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|value| value.parse::<T>())
        .transpose()
        .with_context(|| format!("{key} is not a valid number"))
}

fn parse_secs(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    Ok(parse_num::<u64>(var, key)?.map(Duration::from_secs))
}

fn parse_bool(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    var(key)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(anyhow!("{key} must be a boolean, got {other}")),
        })
        .transpose()
}
