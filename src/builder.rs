// src/builder.rs
use ethers::abi::AbiEncode;
use ethers::types::{Address, Bytes, U256};

use crate::abi::{ApproveCall, ExecuteCall, MintCall, TransferCall, WithdrawToCall};
use crate::resolver::init_code;
use crate::types::{Operation, UserOperation, PLACEHOLDER_SIGNATURE};

/// Extra verification gas reserved for deploying the account.
pub const DEFAULT_INIT_CODE_GAS: u64 = 300_000;
pub const BASE_VERIFICATION_GAS: u64 = 150_000;
pub const PRE_VERIFICATION_GAS: u64 = 100_000;
/// 2 gwei, used when the request does not price against the node.
pub const DEFAULT_MAX_FEE_PER_GAS: u64 = 2_000_000_000;

pub const MINT_GAS_LIMIT: u64 = 200_000;
pub const TRANSFER_GAS_LIMIT: u64 = 200_000;
pub const APPROVE_GAS_LIMIT: u64 = 200_000;
pub const WITHDRAW_TO_GAS_LIMIT: u64 = 200_000;

/// Token call the account will make on the caller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Mint { to: Address, amount: U256 },
    Transfer { to: Address, amount: U256 },
    Approve { spender: Address, amount: U256 },
    WithdrawTo { to: Address, amount: U256 },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Mint { .. } => "mint",
            Action::Transfer { .. } => "transfer",
            Action::Approve { .. } => "approve",
            Action::WithdrawTo { .. } => "withdrawTo",
        }
    }

    pub fn call_gas_limit(&self) -> U256 {
        let limit = match self {
            Action::Mint { .. } => MINT_GAS_LIMIT,
            Action::Transfer { .. } => TRANSFER_GAS_LIMIT,
            Action::Approve { .. } => APPROVE_GAS_LIMIT,
            Action::WithdrawTo { .. } => WITHDRAW_TO_GAS_LIMIT,
        };
        U256::from(limit)
    }

    /// Calldata for the target contract, before wrapping in `execute`.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Action::Mint { to, amount } => MintCall { to, amount }.encode(),
            Action::Transfer { to, amount } => TransferCall { to, amount }.encode(),
            Action::Approve { spender, amount } => ApproveCall { spender, amount }.encode(),
            Action::WithdrawTo { to, amount } => WithdrawToCall {
                account: to,
                amount,
            }
            .encode(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl FeeParams {
    // Priority fee mirrors max fee; this overpays by block.basefee.
    pub fn from_gas_price(gas_price: U256) -> Self {
        Self {
            max_fee_per_gas: gas_price,
            max_priority_fee_per_gas: gas_price,
        }
    }
}

impl Default for FeeParams {
    fn default() -> Self {
        Self::from_gas_price(U256::from(DEFAULT_MAX_FEE_PER_GAS))
    }
}

/// Everything needed to build one operation for one account.
#[derive(Debug, Clone, Copy)]
pub struct OpRequest {
    pub nonce: U256,
    pub owner: Address,
    pub sender: Address,
    pub salt: U256,
    pub target: Address,
    pub action: Action,
}

/// Builds an unsigned operation calling `execute(target, 0, action)` on the account.
///
/// Init code is attached only while the account is undeployed (nonce 0). Verification
/// gas always includes the deployment allowance.
pub fn build(factory: Address, request: &OpRequest, fees: FeeParams) -> Operation {
    let init_code = if request.nonce.is_zero() {
        init_code(factory, request.owner, request.salt)
    } else {
        Bytes::default()
    };

    let call_data = ExecuteCall {
        dest: request.target,
        value: U256::zero(),
        func: request.action.encode().into(),
    }
    .encode();

    Operation::unsigned(UserOperation {
        sender: request.sender,
        nonce: request.nonce,
        init_code,
        call_data: call_data.into(),
        call_gas_limit: request.action.call_gas_limit(),
        verification_gas_limit: U256::from(BASE_VERIFICATION_GAS + DEFAULT_INIT_CODE_GAS),
        pre_verification_gas: U256::from(PRE_VERIFICATION_GAS),
        max_fee_per_gas: fees.max_fee_per_gas,
        max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        paymaster_and_data: Bytes::default(),
        signature: Bytes::from(PLACEHOLDER_SIGNATURE.to_vec()),
    })
}
