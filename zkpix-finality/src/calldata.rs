//! ABI encoding of the escrow's finalize entry points.

use ethers::abi::{encode, Token};
use zkpix_common::{Bytes32, FlowDirection, ProofBundle};

pub const EXECUTE_INBOUND: &str = "executeInbound(bytes32,bytes,bytes32[])";
pub const EXECUTE_OUTBOUND: &str = "executeOutbound(bytes32,bytes,bytes32[])";

pub fn entry_point(direction: FlowDirection) -> &'static str {
    match direction {
        FlowDirection::Inbound => EXECUTE_INBOUND,
        FlowDirection::Outbound => EXECUTE_OUTBOUND,
    }
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = ethers::utils::keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `selector ‖ abi.encode(intentId, proof, publicInputs)` for the bundle's direction.
pub fn encode_finality_call(intent_id: &Bytes32, bundle: &ProofBundle) -> Vec<u8> {
    let public_inputs = bundle
        .public_inputs
        .iter()
        .map(|field| Token::FixedBytes(field.to_vec()))
        .collect();
    let args = encode(&[
        Token::FixedBytes(intent_id.to_vec()),
        Token::Bytes(bundle.proof.clone()),
        Token::Array(public_inputs),
    ]);

    let mut calldata = selector(entry_point(bundle.direction)).to_vec();
    calldata.extend_from_slice(&args);
    calldata
}
