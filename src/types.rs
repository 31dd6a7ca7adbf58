// src/types.rs
use ethers::abi::{encode, Token};
use ethers::contract::{EthAbiCodec, EthAbiType};
use ethers::types::serde_helpers::deserialize_stringified_numeric;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize, Serializer};

/// Signature carried by an operation before anyone has signed it.
pub const PLACEHOLDER_SIGNATURE: [u8; 1] = [0x00];

/// ERC-4337 v0.6 user operation, in entry point ABI field order.
///
/// Numeric fields are written as hex quantities and read from hex strings, decimal
/// strings or JSON numbers.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, EthAbiType, EthAbiCodec,
)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    #[serde(deserialize_with = "deserialize_stringified_numeric")]
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    #[serde(deserialize_with = "deserialize_stringified_numeric")]
    pub call_gas_limit: U256,
    #[serde(deserialize_with = "deserialize_stringified_numeric")]
    pub verification_gas_limit: U256,
    #[serde(deserialize_with = "deserialize_stringified_numeric")]
    pub pre_verification_gas: U256,
    #[serde(deserialize_with = "deserialize_stringified_numeric")]
    pub max_fee_per_gas: U256,
    #[serde(deserialize_with = "deserialize_stringified_numeric")]
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Canonical operation hash. Every field except the signature is covered, and the
    /// result is bound to one entry point on one chain.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let packed = encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ]);

        let domain = encode(&[
            Token::FixedBytes(keccak256(packed).to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ]);

        H256::from(keccak256(domain))
    }

    /// The operation as a JSON field map, the shape sponsor and relay services speak.
    pub fn to_field_map(&self) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "user operation serialized to {other}, expected an object"
            ))),
        }
    }

    pub fn from_field_map(
        map: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(map))
    }
}

/// Where an operation stands with respect to its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealState {
    /// Carries a placeholder, or fields changed after the last seal.
    Unsigned,
    /// Sealed with the relay key only so a sponsor service accepts it.
    SponsorProbeSealed,
    /// Signature covers the current fields. Only this state may be dispatched.
    FinalSealed,
}

/// A user operation tagged with its seal state.
///
/// Fields can only be changed through [`Operation::update`], which drops the operation
/// back to [`SealState::Unsigned`], so a signature never outlives the fields it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    op: UserOperation,
    state: SealState,
}

impl Operation {
    pub fn unsigned(op: UserOperation) -> Self {
        Self {
            op,
            state: SealState::Unsigned,
        }
    }

    pub(crate) fn with_state(op: UserOperation, state: SealState) -> Self {
        Self { op, state }
    }

    pub fn state(&self) -> SealState {
        self.state
    }

    pub fn user_op(&self) -> &UserOperation {
        &self.op
    }

    pub fn into_user_op(self) -> UserOperation {
        self.op
    }

    pub fn update(&mut self, f: impl FnOnce(&mut UserOperation)) {
        f(&mut self.op);
        self.state = SealState::Unsigned;
    }

    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        self.op.hash(entry_point, chain_id)
    }
}

/// Nonce and counterfactual address of an owner's account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    #[serde(
        serialize_with = "serialize_decimal",
        deserialize_with = "deserialize_stringified_numeric"
    )]
    pub nonce: U256,
    pub sender: Address,
}

impl SenderInfo {
    pub fn is_deployed(&self) -> bool {
        !self.nonce.is_zero()
    }
}

/// JSON number, or a decimal string once the value leaves the `u64` range.
fn serialize_decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    if *value <= U256::from(u64::MAX) {
        serializer.serialize_u64(value.as_u64())
    } else {
        serializer.collect_str(value)
    }
}
