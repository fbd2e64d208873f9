//! Escrow submission over an EVM JSON-RPC endpoint.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    prelude::*,
    types::{Address, Bytes},
};
use tracing::{debug, error, info};
use zkpix_common::{Bytes32, FinalityRecord, ProofBundle};

use crate::{
    calldata::{encode_finality_call, entry_point},
    error::FinalityError,
};

pub const DEFAULT_GAS_LIMIT: u64 = 500_000;
pub const DEFAULT_INCLUSION_TIMEOUT: Duration = Duration::from_secs(180);

/// Submits a proof bundle to the escrow and waits for inclusion.
///
/// Submission is terminal: implementations never resend on failure.
#[async_trait]
pub trait FinalitySubmitter: Send + Sync {
    fn chain_name(&self) -> &str;

    async fn submit_finality(
        &self,
        intent_id: Bytes32,
        bundle: &ProofBundle,
    ) -> Result<FinalityRecord, FinalityError>;
}

#[derive(Clone)]
pub struct EvmFinalityConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub escrow_address: String,
    pub private_key: String,
    pub gas_limit: u64,
    pub inclusion_timeout: Duration,
    pub poll_interval: Duration,
}

impl EvmFinalityConfig {
    pub fn new(
        rpc_url: impl Into<String>,
        chain_id: u64,
        escrow_address: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            chain_id,
            escrow_address: escrow_address.into(),
            private_key: private_key.into(),
            gas_limit: DEFAULT_GAS_LIMIT,
            inclusion_timeout: DEFAULT_INCLUSION_TIMEOUT,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_inclusion_timeout(mut self, timeout: Duration) -> Self {
        self.inclusion_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for EvmFinalityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmFinalityConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("escrow_address", &self.escrow_address)
            .field("gas_limit", &self.gas_limit)
            .field("inclusion_timeout", &self.inclusion_timeout)
            .finish_non_exhaustive()
    }
}

pub struct EvmFinalitySubmitter {
    chain_name: String,
    client: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
    escrow: Address,
    gas_limit: u64,
    inclusion_timeout: Duration,
}

impl EvmFinalitySubmitter {
    pub fn new(config: &EvmFinalityConfig) -> Result<Self, FinalityError> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| FinalityError::Config(format!("invalid rpc url: {e}")))?
            .interval(config.poll_interval);

        let wallet = config
            .private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|_| FinalityError::Config("invalid submitter private key".into()))?
            .with_chain_id(config.chain_id);

        let escrow: Address = config
            .escrow_address
            .trim()
            .parse()
            .map_err(|e| FinalityError::Config(format!("invalid escrow address: {e}")))?;
        if escrow.is_zero() {
            return Err(FinalityError::Config("escrow address must not be zero".into()));
        }

        Ok(Self {
            chain_name: format!("evm:{}", config.chain_id),
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            escrow,
            gas_limit: config.gas_limit,
            inclusion_timeout: config.inclusion_timeout,
        })
    }

    pub fn submitter_address(&self) -> Address {
        self.client.address()
    }

    pub fn escrow_address(&self) -> Address {
        self.escrow
    }
}

#[async_trait]
impl FinalitySubmitter for EvmFinalitySubmitter {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    async fn submit_finality(
        &self,
        intent_id: Bytes32,
        bundle: &ProofBundle,
    ) -> Result<FinalityRecord, FinalityError> {
        let calldata = encode_finality_call(&intent_id, bundle);
        let tx = TransactionRequest::new()
            .to(self.escrow)
            .data(Bytes::from(calldata))
            .gas(self.gas_limit);

        info!(
            chain = %self.chain_name,
            entry_point = entry_point(bundle.direction),
            intent_id = %zkpix_common::to_hex(&intent_id),
            "submitting escrow finality"
        );
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| FinalityError::Submission(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        let tx_hex = format!("{tx_hash:?}");
        debug!(tx_hash = %tx_hex, "escrow transaction broadcast");

        let receipt = tokio::time::timeout(self.inclusion_timeout, pending)
            .await
            .map_err(|_| FinalityError::InclusionTimeout {
                tx_hash: tx_hex.clone(),
                seconds: self.inclusion_timeout.as_secs(),
            })?
            .map_err(|e| FinalityError::Rpc(e.to_string()))?
            .ok_or_else(|| FinalityError::Dropped {
                tx_hash: tx_hex.clone(),
            })?;

        if receipt.status != Some(U64::from(1)) {
            error!(tx_hash = %tx_hex, "escrow transaction reverted");
            return Err(FinalityError::Reverted { tx_hash: tx_hex });
        }
        info!(
            tx_hash = %tx_hex,
            block = ?receipt.block_number,
            gas_used = ?receipt.gas_used,
            "escrow finality included"
        );
        Ok(FinalityRecord {
            intent_id,
            transaction_hash: receipt.transaction_hash.to_fixed_bytes(),
        })
    }
}
