// src/error.rs
use ethers::types::{Address, H256};
use thiserror::Error;

use crate::types::SealState;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidInput { name: &'static str, reason: String },

    #[error("Could not resolve sender for owner {owner:?}: {reason}")]
    Resolution { owner: Address, reason: String },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Sponsorship failed for sender {sender:?}: {reason}")]
    Sponsorship { sender: Address, reason: String },

    #[error("Entry point rejected operation {op_hash:?}: {reason}")]
    Simulation { op_hash: H256, reason: String },

    #[error("Invalid signature size in user op: {0}, expected 65")]
    SignatureLength(usize),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error(
        "Op sender address does not match recovered sender address: owner {owner:?}, \
         sender {resolved:?}, userop sender {declared:?}, op hash {op_hash:?}"
    )]
    SenderMismatch {
        owner: Address,
        resolved: Address,
        declared: Address,
        op_hash: H256,
    },

    #[error("Operation {op_hash:?} is {state:?}, it must be sealed after its last change")]
    NotSealed { op_hash: H256, state: SealState },

    #[error("Submission of operation {op_hash:?} failed: {reason}")]
    Submission { op_hash: H256, reason: String },

    #[error("Ethereum provider error: {0}")]
    Provider(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl RelayError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        RelayError::InvalidInput {
            name,
            reason: reason.into(),
        }
    }

    /// Errors caused by the caller's input. Everything else is a server fault.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidInput { .. }
                | RelayError::SignatureLength(_)
                | RelayError::Signature(_)
                | RelayError::SenderMismatch { .. }
        )
    }

    /// The operation hash this error is correlated with, when one was computed.
    pub fn op_hash(&self) -> Option<H256> {
        match self {
            RelayError::Simulation { op_hash, .. }
            | RelayError::SenderMismatch { op_hash, .. }
            | RelayError::NotSealed { op_hash, .. }
            | RelayError::Submission { op_hash, .. } => Some(*op_hash),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_client_faults() {
        assert!(RelayError::invalid("owner", "missing").is_client_fault());
        assert!(RelayError::SignatureLength(64).is_client_fault());
        assert!(RelayError::SenderMismatch {
            owner: Address::zero(),
            resolved: Address::repeat_byte(1),
            declared: Address::repeat_byte(2),
            op_hash: H256::zero(),
        }
        .is_client_fault());

        assert!(!RelayError::Provider("connection refused".into()).is_client_fault());
        assert!(!RelayError::Submission {
            op_hash: H256::zero(),
            reason: "boom".into()
        }
        .is_client_fault());
    }

    #[test]
    fn submission_error_keeps_op_hash() {
        let hash = H256::repeat_byte(0xab);
        let err = RelayError::Submission {
            op_hash: hash,
            reason: "nonce already used".into(),
        };
        assert_eq!(err.op_hash(), Some(hash));
        assert!(err.to_string().contains(&format!("{hash:?}")));
    }
}
