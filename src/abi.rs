// src/abi.rs
//! Entry point, account factory, account and token ABI surface.
use ethers::contract::{EthAbiCodec, EthAbiType, EthCall, EthError};
use ethers::types::{Address, Bytes, U256};

use crate::types::UserOperation;

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "execute", abi = "execute(address,uint256,bytes)")]
pub struct ExecuteCall {
    pub dest: Address,
    pub value: U256,
    pub func: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "mint", abi = "mint(address,uint256)")]
pub struct MintCall {
    pub to: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "transfer", abi = "transfer(address,uint256)")]
pub struct TransferCall {
    pub to: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "approve", abi = "approve(address,uint256)")]
pub struct ApproveCall {
    pub spender: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "withdrawTo", abi = "withdrawTo(address,uint256)")]
pub struct WithdrawToCall {
    pub account: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "createAccount", abi = "createAccount(address,uint256)")]
pub struct CreateAccountCall {
    pub owner: Address,
    pub salt: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "getSenderAddress", abi = "getSenderAddress(bytes)")]
pub struct GetSenderAddressCall {
    pub init_code: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "getNonce", abi = "getNonce(address,uint192)")]
pub struct GetNonceCall {
    pub sender: Address,
    pub key: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(
    name = "handleOps",
    abi = "handleOps((address,uint256,bytes,bytes,uint256,uint256,uint256,uint256,uint256,bytes,bytes)[],address)"
)]
pub struct HandleOpsCall {
    pub ops: Vec<UserOperation>,
    pub beneficiary: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(
    name = "simulateHandleOp",
    abi = "simulateHandleOp((address,uint256,bytes,bytes,uint256,uint256,uint256,uint256,uint256,bytes,bytes),address,bytes)"
)]
pub struct SimulateHandleOpCall {
    pub op: UserOperation,
    pub target: Address,
    pub target_call_data: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthError)]
#[etherror(name = "SenderAddressResult", abi = "SenderAddressResult(address)")]
pub struct SenderAddressResult {
    pub sender: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthError)]
#[etherror(name = "FailedOp", abi = "FailedOp(uint256,string)")]
pub struct FailedOp {
    pub op_index: U256,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthAbiType, EthAbiCodec)]
pub struct ReturnInfo {
    pub pre_op_gas: U256,
    pub prefund: U256,
    pub sig_failed: bool,
    pub valid_after: u64,
    pub valid_until: u64,
    pub paymaster_context: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthAbiType, EthAbiCodec)]
pub struct StakeInfo {
    pub stake: U256,
    pub unstake_delay_sec: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthError)]
#[etherror(
    name = "ValidationResult",
    abi = "ValidationResult((uint256,uint256,bool,uint48,uint48,bytes),(uint256,uint256),(uint256,uint256),(uint256,uint256))"
)]
pub struct ValidationResult {
    pub return_info: ReturnInfo,
    pub sender_info: StakeInfo,
    pub factory_info: StakeInfo,
    pub paymaster_info: StakeInfo,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthError)]
#[etherror(
    name = "ExecutionResult",
    abi = "ExecutionResult(uint256,uint256,uint48,uint48,bool,bytes)"
)]
pub struct ExecutionResult {
    pub pre_op_gas: U256,
    pub paid: U256,
    pub valid_after: u64,
    pub valid_until: u64,
    pub target_success: bool,
    pub target_result: Bytes,
}

/// Structured payload of an entry point revert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryPointRevert {
    SenderAddress(Address),
    Validation(ValidationResult),
    FailedOp(FailedOp),
    Execution(ExecutionResult),
    Unknown(Bytes),
}

/// Decodes revert data by its leading selector.
pub fn decode_revert(data: &[u8]) -> EntryPointRevert {
    if let Some(result) = SenderAddressResult::decode_with_selector(data) {
        EntryPointRevert::SenderAddress(result.sender)
    } else if let Some(result) = ValidationResult::decode_with_selector(data) {
        EntryPointRevert::Validation(result)
    } else if let Some(failed) = FailedOp::decode_with_selector(data) {
        EntryPointRevert::FailedOp(failed)
    } else if let Some(result) = ExecutionResult::decode_with_selector(data) {
        EntryPointRevert::Execution(result)
    } else {
        EntryPointRevert::Unknown(Bytes::from(data.to_vec()))
    }
}
