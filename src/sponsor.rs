// src/sponsor.rs
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes};
use jsonrpsee::http_client::HttpClient;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::RelayError;
use crate::rpc::{PaymasterApiClient, SponsorContext};
use crate::signer::probe_seal;
use crate::types::{Operation, SealState, UserOperation};

/// Overwrites `base` with every field the sponsor returned, then puts the caller's
/// placeholder signature back. Either every field applies or none do.
pub fn merge_sponsor_fields(
    base: &UserOperation,
    returned: Map<String, Value>,
    placeholder: Bytes,
) -> Result<Operation, RelayError> {
    let sender = base.sender;
    let mut fields = base.to_field_map().map_err(|e| RelayError::Encoding(e.to_string()))?;
    fields.extend(returned);

    let mut merged =
        UserOperation::from_field_map(fields).map_err(|e| RelayError::Sponsorship {
            sender,
            reason: format!("unusable sponsor response: {e}"),
        })?;
    merged.signature = placeholder;
    Ok(Operation::unsigned(merged))
}

pub struct SponsorClient {
    client: HttpClient,
    entry_point: Address,
    chain_id: u64,
    sponsorship_type: String,
}

impl SponsorClient {
    pub fn new(
        client: HttpClient,
        entry_point: Address,
        chain_id: u64,
        sponsorship_type: impl Into<String>,
    ) -> Self {
        Self {
            client,
            entry_point,
            chain_id,
            sponsorship_type: sponsorship_type.into(),
        }
    }

    /// Returns `op` with sponsor-assigned payment fields. The result is unsigned and has
    /// to be sealed again before dispatch.
    pub async fn sponsor(&self, op: Operation, key: &LocalWallet) -> Result<Operation, RelayError> {
        let sender = op.user_op().sender;
        if op.state() != SealState::Unsigned {
            return Err(RelayError::Sponsorship {
                sender,
                reason: format!("expected an unsigned operation, got {:?}", op.state()),
            });
        }

        let placeholder = op.user_op().signature.clone();
        // Sponsors reject operations without a well-formed signature.
        let probe = probe_seal(op, self.entry_point, self.chain_id, key)?;
        let fields = probe
            .user_op()
            .to_field_map()
            .map_err(|e| RelayError::Encoding(e.to_string()))?;

        let context = SponsorContext {
            kind: self.sponsorship_type.clone(),
        };
        let returned = self
            .client
            .sponsor_user_operation(fields, self.entry_point, context)
            .await
            .map_err(|e| {
                error!("Sponsor call failed for {:?}: {}", sender, e);
                RelayError::Sponsorship {
                    sender,
                    reason: e.to_string(),
                }
            })?;

        debug!(
            "Sponsor returned fields {:?} for {:?}",
            returned.keys().collect::<Vec<_>>(),
            sender
        );
        merge_sponsor_fields(probe.user_op(), returned, placeholder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{http_client, PaymasterApiServer};
    use crate::rpc::testing::{serve, MockPaymaster};
    use crate::signer::recover;
    use ethers::signers::Signer;
    use ethers::types::U256;
    use serde_json::json;
    use std::time::Duration;

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn entry_point() -> Address {
        "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789".parse().unwrap()
    }

    fn op() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0x5e),
            nonce: U256::from(2),
            call_data: Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]),
            call_gas_limit: U256::from(200_000),
            verification_gas_limit: U256::from(450_000),
            pre_verification_gas: U256::from(100_000),
            max_fee_per_gas: U256::from(30_000_000_000u64),
            max_priority_fee_per_gas: U256::from(30_000_000_000u64),
            signature: Bytes::from(vec![0u8]),
            ..Default::default()
        }
    }

    fn sponsor_reply() -> Map<String, Value> {
        let reply = json!({
            "paymasterAndData": "0xe93eca6595fe94091dc1af46aac2a8b5d79907700000000000000000000000000000000000000000000000000000000000000000",
            "preVerificationGas": "0xc350",
            "verificationGasLimit": "0x186a0",
        });
        reply.as_object().unwrap().clone()
    }

    #[test]
    fn merge_overwrites_only_returned_fields() {
        let base = op();
        let merged =
            merge_sponsor_fields(&base, sponsor_reply(), Bytes::from(vec![0u8])).unwrap();
        let merged = merged.user_op();

        assert_eq!(merged.pre_verification_gas, U256::from(50_000));
        assert_eq!(merged.verification_gas_limit, U256::from(100_000));
        assert_eq!(merged.paymaster_and_data.len(), 52);

        assert_eq!(merged.sender, base.sender);
        assert_eq!(merged.nonce, base.nonce);
        assert_eq!(merged.init_code, base.init_code);
        assert_eq!(merged.call_data, base.call_data);
        assert_eq!(merged.call_gas_limit, base.call_gas_limit);
        assert_eq!(merged.max_fee_per_gas, base.max_fee_per_gas);
        assert_eq!(merged.max_priority_fee_per_gas, base.max_priority_fee_per_gas);
        assert_eq!(merged.signature, base.signature);
    }

    #[test]
    fn decimal_and_numeric_quantities_are_read_as_base_10() {
        let reply = json!({
            "preVerificationGas": "50000",
            "verificationGasLimit": 100000,
            "callGasLimit": "0x30d40",
        });
        let merged = merge_sponsor_fields(
            &op(),
            reply.as_object().unwrap().clone(),
            Bytes::from(vec![0u8]),
        )
        .unwrap();
        let merged = merged.user_op();

        assert_eq!(merged.pre_verification_gas, U256::from(50_000));
        assert_eq!(merged.verification_gas_limit, U256::from(100_000));
        assert_eq!(merged.call_gas_limit, U256::from(200_000));
    }

    #[test]
    fn unusable_reply_changes_nothing() {
        let mut reply = sponsor_reply();
        reply.insert("callGasLimit".into(), json!({"not": "a number"}));

        let err = merge_sponsor_fields(&op(), reply, Bytes::from(vec![0u8])).unwrap_err();
        assert!(matches!(err, RelayError::Sponsorship { .. }));
    }

    #[tokio::test]
    async fn sponsor_probes_then_restores_placeholder() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let paymaster = MockPaymaster {
            reply: sponsor_reply(),
            ..Default::default()
        };
        let (url, handle) = serve(paymaster.clone().into_rpc()).await;
        let sponsor = SponsorClient::new(
            http_client(&url, Duration::from_secs(5)).unwrap(),
            entry_point(),
            137,
            "payg",
        );

        let sponsored = sponsor.sponsor(Operation::unsigned(op()), &wallet).await.unwrap();
        assert_eq!(sponsored.state(), SealState::Unsigned);
        assert_eq!(sponsored.user_op().signature, Bytes::from(vec![0u8]));
        assert_eq!(sponsored.user_op().pre_verification_gas, U256::from(50_000));

        let seen = paymaster.seen.lock().unwrap();
        let (sent, sent_entry_point, context) = &seen[0];
        assert_eq!(*sent_entry_point, entry_point());
        assert_eq!(context.kind, "payg");

        // What the sponsor saw was sealed by the relay key over the unsponsored fields.
        let probe = UserOperation::from_field_map(sent.clone()).unwrap();
        assert_eq!(probe.signature.len(), 65);
        let (_, signer) = recover(&probe, entry_point(), 137).unwrap();
        assert_eq!(signer, wallet.address());
        drop(seen);
        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn unreachable_sponsor_is_a_sponsorship_error() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let sponsor = SponsorClient::new(
            http_client("http://127.0.0.1:1", Duration::from_secs(2)).unwrap(),
            entry_point(),
            137,
            "payg",
        );

        let err = sponsor.sponsor(Operation::unsigned(op()), &wallet).await.unwrap_err();
        assert!(matches!(err, RelayError::Sponsorship { .. }));
    }
}
