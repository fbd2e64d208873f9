//! zkpix-finality
//!
//! Packages an intent id, proof and public inputs into the escrow's
//! finalize call and waits for inclusion.

pub mod calldata;
pub mod error;
pub mod submitter;

pub use calldata::{encode_finality_call, entry_point, selector};
pub use error::FinalityError;
pub use submitter::{EvmFinalityConfig, EvmFinalitySubmitter, FinalitySubmitter};
