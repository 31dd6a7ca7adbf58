// src/signer.rs
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::hash_message;

use crate::error::RelayError;
use crate::types::{Operation, SealState, UserOperation};

const SIGNATURE_LEN: usize = 65;

/// Signs the operation's canonical hash as an Ethereum personal message and stores the
/// 65 byte `r || s || v` signature, with `v` in {27, 28}.
pub fn seal(
    op: Operation,
    entry_point: Address,
    chain_id: u64,
    key: &LocalWallet,
) -> Result<Operation, RelayError> {
    sign_as(op, entry_point, chain_id, key, SealState::FinalSealed)
}

/// Seal used only to get an operation past a sponsor service's shape checks.
pub(crate) fn probe_seal(
    op: Operation,
    entry_point: Address,
    chain_id: u64,
    key: &LocalWallet,
) -> Result<Operation, RelayError> {
    sign_as(op, entry_point, chain_id, key, SealState::SponsorProbeSealed)
}

fn sign_as(
    op: Operation,
    entry_point: Address,
    chain_id: u64,
    key: &LocalWallet,
    state: SealState,
) -> Result<Operation, RelayError> {
    let digest = op.hash(entry_point, chain_id);
    let mut signature = key
        .sign_hash(hash_message(digest))
        .map_err(|e| RelayError::Signature(e.to_string()))?;
    if signature.v < 27 {
        signature.v += 27;
    }

    let mut user_op = op.into_user_op();
    user_op.signature = Bytes::from(signature.to_vec());
    Ok(Operation::with_state(user_op, state))
}

/// Recovers the address that sealed `op`. Returns the canonical hash alongside it.
pub fn recover(
    op: &UserOperation,
    entry_point: Address,
    chain_id: u64,
) -> Result<(H256, Address), RelayError> {
    let digest = op.hash(entry_point, chain_id);
    if op.signature.len() != SIGNATURE_LEN {
        return Err(RelayError::SignatureLength(op.signature.len()));
    }

    let raw = op.signature.as_ref();
    let mut v = raw[64];
    if v >= 27 {
        v -= 27;
    }
    let signature = Signature {
        r: U256::from_big_endian(&raw[0..32]),
        s: U256::from_big_endian(&raw[32..64]),
        v: v as u64,
    };

    let signer = signature
        .recover(hash_message(digest))
        .map_err(|e| RelayError::Signature(e.to_string()))?;
    Ok((digest, signer))
}

/// Accepts an operation sealed by someone else once its signature recovers.
pub fn verify_sealed(
    op: UserOperation,
    entry_point: Address,
    chain_id: u64,
) -> Result<(Operation, H256, Address), RelayError> {
    let (digest, signer) = recover(&op, entry_point, chain_id)?;
    Ok((Operation::with_state(op, SealState::FinalSealed), digest, signer))
}
