use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinalityError {
    #[error("finality submitter configuration error: {0}")]
    Config(String),

    /// The node rejected the transaction before it was broadcast.
    #[error("escrow transaction could not be sent: {0}")]
    Submission(String),

    #[error("escrow transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("escrow transaction {tx_hash} was dropped from the mempool")]
    Dropped { tx_hash: String },

    /// Broadcast succeeded but no receipt arrived in time. The transaction
    /// may still be included later, so callers must not blindly resubmit.
    #[error("escrow transaction {tx_hash} not included within {seconds}s")]
    InclusionTimeout { tx_hash: String, seconds: u64 },

    #[error("chain rpc error: {0}")]
    Rpc(String),
}
