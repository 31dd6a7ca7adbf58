// src/resolver.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::providers::{Http, Provider};
use ethers::types::{Address, Bytes, U256};
use tracing::debug;

use crate::abi::{decode_revert, CreateAccountCall, EntryPointRevert, GetNonceCall, GetSenderAddressCall};
use crate::chain::{eth_call, CallOutcome, ReadPolicy};
use crate::error::RelayError;
use crate::types::SenderInfo;

/// Factory address followed by its `createAccount(owner, salt)` calldata.
pub fn init_code(factory: Address, owner: Address, salt: U256) -> Bytes {
    let mut code = factory.as_bytes().to_vec();
    code.extend(CreateAccountCall { owner, salt }.encode());
    Bytes::from(code)
}

/// `getSenderAddress` always reverts; the address comes back inside the revert payload.
pub fn sender_from_outcome(owner: Address, outcome: CallOutcome) -> Result<Address, RelayError> {
    let data = match outcome {
        CallOutcome::Reverted(data) => data,
        CallOutcome::Returned(_) => {
            return Err(RelayError::Resolution {
                owner,
                reason: "getSenderAddress returned instead of reverting".into(),
            })
        }
    };

    match decode_revert(&data) {
        EntryPointRevert::SenderAddress(sender) => Ok(sender),
        EntryPointRevert::FailedOp(failed) => Err(RelayError::Resolution {
            owner,
            reason: format!("FailedOp({}): {}", failed.op_index, failed.reason),
        }),
        other => Err(RelayError::Resolution {
            owner,
            reason: format!("unexpected revert {other:?}"),
        }),
    }
}

#[async_trait]
pub trait SenderResolver: Send + Sync {
    /// Counterfactual account address for `(owner, salt)`.
    async fn sender_address(&self, owner: Address, salt: U256) -> Result<Address, RelayError>;

    /// Account address plus its current entry point nonce.
    async fn resolve(&self, owner: Address, salt: U256) -> Result<SenderInfo, RelayError>;
}

/// Asks the entry point. Nothing is cached, every call goes to the node.
pub struct OnChainResolver {
    provider: Arc<Provider<Http>>,
    entry_point: Address,
    factory: Address,
    policy: ReadPolicy,
}

impl OnChainResolver {
    pub fn new(
        provider: Arc<Provider<Http>>,
        entry_point: Address,
        factory: Address,
        policy: ReadPolicy,
    ) -> Self {
        Self {
            provider,
            entry_point,
            factory,
            policy,
        }
    }

    async fn nonce(&self, owner: Address, sender: Address) -> Result<U256, RelayError> {
        let call = GetNonceCall {
            sender,
            key: U256::zero(),
        };
        match eth_call(&self.provider, &self.policy, self.entry_point, call.encode().into()).await? {
            CallOutcome::Returned(data) => U256::decode(&data).map_err(|e| RelayError::Resolution {
                owner,
                reason: format!("undecodable getNonce result: {e}"),
            }),
            CallOutcome::Reverted(data) => Err(RelayError::Resolution {
                owner,
                reason: format!("getNonce reverted: {:?}", decode_revert(&data)),
            }),
        }
    }
}

#[async_trait]
impl SenderResolver for OnChainResolver {
    async fn sender_address(&self, owner: Address, salt: U256) -> Result<Address, RelayError> {
        let call = GetSenderAddressCall {
            init_code: init_code(self.factory, owner, salt),
        };
        let outcome =
            eth_call(&self.provider, &self.policy, self.entry_point, call.encode().into()).await?;
        sender_from_outcome(owner, outcome)
    }

    async fn resolve(&self, owner: Address, salt: U256) -> Result<SenderInfo, RelayError> {
        let sender = self.sender_address(owner, salt).await?;
        let nonce = self.nonce(owner, sender).await?;
        debug!("owner {:?} salt {} -> sender {:?} nonce {}", owner, salt, sender, nonce);
        Ok(SenderInfo { nonce, sender })
    }
}

/// Answers every owner with the same nonce and address.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver {
    info: SenderInfo,
}

#[cfg(test)]
impl FixedResolver {
    pub fn new(nonce: U256, sender: Address) -> Self {
        Self {
            info: SenderInfo { nonce, sender },
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SenderResolver for FixedResolver {
    async fn sender_address(&self, _owner: Address, _salt: U256) -> Result<Address, RelayError> {
        Ok(self.info.sender)
    }

    async fn resolve(&self, _owner: Address, _salt: U256) -> Result<SenderInfo, RelayError> {
        Ok(self.info)
    }
}
