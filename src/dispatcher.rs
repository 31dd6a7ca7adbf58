// src/dispatcher.rs
use std::sync::Arc;

use ethers::abi::AbiEncode;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U64};
use jsonrpsee::http_client::HttpClient;
use tracing::{debug, error, info, warn};

use crate::abi::{decode_revert, EntryPointRevert, HandleOpsCall, SimulateHandleOpCall};
use crate::chain::{eth_call, CallOutcome, ReadPolicy};
use crate::error::RelayError;
use crate::rpc::BundlerApiClient;
use crate::types::{Operation, SealState};

/// How a finished operation reaches the chain.
pub enum Submitter {
    /// `eth_sendUserOperation` on a relay service.
    Relay(HttpClient),
    /// `handleOps([op])` sent from the relay key, waiting for the receipt.
    Direct(SignerMiddleware<Provider<Http>, LocalWallet>),
}

/// What to do with a pre-flight simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationPolicy {
    Off,
    /// Log the result and submit anyway.
    Report,
    /// Refuse to submit operations the entry point rejects.
    Fatal,
}

/// Decoded outcome of `simulateHandleOp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationReport {
    Passed,
    Rejected(EntryPointRevert),
    /// The call returned normally, which the entry point never does.
    Anomaly,
}

impl SimulationReport {
    pub fn from_outcome(outcome: CallOutcome) -> Self {
        match outcome {
            CallOutcome::Returned(_) => SimulationReport::Anomaly,
            CallOutcome::Reverted(data) => match decode_revert(&data) {
                EntryPointRevert::Execution(_) => SimulationReport::Passed,
                revert => SimulationReport::Rejected(revert),
            },
        }
    }

    /// Reason the operation would fail on chain, if any.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            SimulationReport::Passed => None,
            SimulationReport::Rejected(EntryPointRevert::Validation(result)) => {
                if result.return_info.sig_failed {
                    Some("signature validation failed".to_string())
                } else {
                    None
                }
            }
            SimulationReport::Rejected(EntryPointRevert::FailedOp(failed)) => {
                Some(failed.reason.clone())
            }
            SimulationReport::Rejected(other) => Some(format!("unexpected revert {other:?}")),
            SimulationReport::Anomaly => Some("simulateHandleOp did not revert".to_string()),
        }
    }

    fn log(&self, op_hash: H256) {
        match self {
            SimulationReport::Passed => debug!("userop {:?} passed simulation", op_hash),
            SimulationReport::Rejected(EntryPointRevert::Validation(result)) => info!(
                "userop {:?} stake: {}, sig failed: {}",
                op_hash, result.sender_info.stake, result.return_info.sig_failed
            ),
            SimulationReport::Rejected(EntryPointRevert::FailedOp(failed)) => warn!(
                "validation for failed op {:?}: {}",
                op_hash, failed.reason
            ),
            other => warn!("userop {:?} failed simulation: {:?}", op_hash, other),
        }
    }
}

pub struct Dispatcher {
    entry_point: Address,
    chain_id: u64,
    provider: Arc<Provider<Http>>,
    submitter: Submitter,
    simulation: SimulationPolicy,
    policy: ReadPolicy,
}

impl Dispatcher {
    pub fn new(
        entry_point: Address,
        chain_id: u64,
        provider: Arc<Provider<Http>>,
        submitter: Submitter,
        simulation: SimulationPolicy,
        policy: ReadPolicy,
    ) -> Self {
        Self {
            entry_point,
            chain_id,
            provider,
            submitter,
            simulation,
            policy,
        }
    }

    /// Runs `simulateHandleOp` without broadcasting anything.
    pub async fn simulate(&self, op: &Operation) -> Result<SimulationReport, RelayError> {
        let call = SimulateHandleOpCall {
            op: op.user_op().clone(),
            target: Address::zero(),
            target_call_data: Bytes::default(),
        };
        let outcome =
            eth_call(&self.provider, &self.policy, self.entry_point, call.encode().into()).await?;
        Ok(SimulationReport::from_outcome(outcome))
    }

    async fn preflight(&self, op: &Operation, op_hash: H256) -> Result<(), RelayError> {
        if self.simulation == SimulationPolicy::Off {
            return Ok(());
        }

        let report = match self.simulate(op).await {
            Ok(report) => report,
            Err(e) if self.simulation == SimulationPolicy::Fatal => return Err(e),
            Err(e) => {
                warn!("userop {:?} could not be simulated: {}", op_hash, e);
                return Ok(());
            }
        };
        report.log(op_hash);

        match report.failure_reason() {
            Some(reason) if self.simulation == SimulationPolicy::Fatal => {
                Err(RelayError::Simulation { op_hash, reason })
            }
            _ => Ok(()),
        }
    }

    /// Submits a sealed operation and returns its canonical hash. Submission is attempted
    /// exactly once; a failure carries the hash for correlation.
    pub async fn dispatch(&self, op: &Operation) -> Result<H256, RelayError> {
        let op_hash = op.hash(self.entry_point, self.chain_id);
        if op.state() != SealState::FinalSealed {
            return Err(RelayError::NotSealed {
                op_hash,
                state: op.state(),
            });
        }

        self.preflight(op, op_hash).await?;

        let submitted = match &self.submitter {
            Submitter::Relay(client) => self.submit_to_relay(client, op, op_hash).await,
            Submitter::Direct(signer) => self.submit_direct(signer, op, op_hash).await,
        };

        match submitted {
            Ok(reply) => {
                let op_json = serde_json::to_string(op.user_op()).unwrap_or_default();
                info!("submitted user op hash '{:?}', '{}'", reply, op_json);
                Ok(reply)
            }
            Err(e) => {
                error!("{}", e);
                Err(e)
            }
        }
    }

    async fn submit_to_relay(
        &self,
        client: &HttpClient,
        op: &Operation,
        op_hash: H256,
    ) -> Result<H256, RelayError> {
        let reply = client
            .send_user_operation(op.user_op().clone(), self.entry_point)
            .await
            .map_err(|e| RelayError::Submission {
                op_hash,
                reason: e.to_string(),
            })?;
        if reply != op_hash {
            warn!("relay reported hash {:?}, computed {:?}", reply, op_hash);
        }
        Ok(reply)
    }

    async fn submit_direct(
        &self,
        signer: &SignerMiddleware<Provider<Http>, LocalWallet>,
        op: &Operation,
        op_hash: H256,
    ) -> Result<H256, RelayError> {
        let call = HandleOpsCall {
            ops: vec![op.user_op().clone()],
            beneficiary: signer.address(),
        };
        let tx = TransactionRequest::new()
            .to(self.entry_point)
            .data(call.encode());

        let pending = signer
            .send_transaction(tx, None)
            .await
            .map_err(|e| RelayError::Submission {
                op_hash,
                reason: e.to_string(),
            })?;
        let tx_hash = pending.tx_hash();
        debug!("handleOps for {:?} sent in tx {:?}", op_hash, tx_hash);

        let receipt = pending
            .await
            .map_err(|e| RelayError::Submission {
                op_hash,
                reason: format!("waiting for tx {tx_hash:?}: {e}"),
            })?
            .ok_or_else(|| RelayError::Submission {
                op_hash,
                reason: format!("tx {tx_hash:?} dropped from the mempool"),
            })?;

        if receipt.status != Some(U64::from(1)) {
            return Err(RelayError::Submission {
                op_hash,
                reason: format!("tx {tx_hash:?} reverted"),
            });
        }
        Ok(op_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{ExecutionResult, FailedOp, ReturnInfo, StakeInfo, ValidationResult};
    use crate::rpc::{http_client, BundlerApiServer};
    use crate::rpc::testing::{serve, MockBundler};
    use crate::signer::seal;
    use crate::types::UserOperation;
    use ethers::abi::{encode, Token, Tokenizable};
    use ethers::contract::EthError;
    use ethers::types::U256;
    use std::time::Duration;

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const CHAIN_ID: u64 = 137;

    fn entry_point() -> Address {
        "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789".parse().unwrap()
    }

    fn offline_provider() -> Arc<Provider<Http>> {
        Arc::new(Provider::<Http>::try_from("http://127.0.0.1:1").unwrap())
    }

    fn relay_dispatcher(url: &str) -> Dispatcher {
        Dispatcher::new(
            entry_point(),
            CHAIN_ID,
            offline_provider(),
            Submitter::Relay(http_client(url, Duration::from_secs(2)).unwrap()),
            SimulationPolicy::Off,
            ReadPolicy::default(),
        )
    }

    fn op() -> Operation {
        Operation::unsigned(UserOperation {
            sender: Address::repeat_byte(0x5e),
            nonce: U256::from(1),
            signature: Bytes::from(vec![0u8]),
            ..Default::default()
        })
    }

    fn sealed() -> Operation {
        let wallet: LocalWallet = KEY.parse().unwrap();
        seal(op(), entry_point(), CHAIN_ID, &wallet).unwrap()
    }

    #[tokio::test]
    async fn refuses_unsealed_operations() {
        let bundler = MockBundler::default();
        let (url, handle) = serve(bundler.clone().into_rpc()).await;
        let dispatcher = relay_dispatcher(&url);

        let err = dispatcher.dispatch(&op()).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::NotSealed { state: SealState::Unsigned, .. }
        ));

        let mut changed = sealed();
        changed.update(|op| op.call_gas_limit = U256::from(1));
        assert!(dispatcher.dispatch(&changed).await.is_err());

        assert!(bundler.seen.lock().unwrap().is_empty());
        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn relays_sealed_operation() {
        let op = sealed();
        let op_hash = op.hash(entry_point(), CHAIN_ID);
        let bundler = MockBundler {
            chain_id: CHAIN_ID,
            ..Default::default()
        };
        let (url, handle) = serve(bundler.clone().into_rpc()).await;

        let reply = relay_dispatcher(&url).dispatch(&op).await.unwrap();
        assert_eq!(reply, op_hash);

        let seen = bundler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0].0, op.user_op());
        assert_eq!(seen[0].1, entry_point());
        drop(seen);
        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn failed_submission_reports_op_hash() {
        let op = sealed();
        let err = relay_dispatcher("http://127.0.0.1:1")
            .dispatch(&op)
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Submission { .. }));
        assert_eq!(err.op_hash(), Some(op.hash(entry_point(), CHAIN_ID)));
    }

    fn reverted(selector: [u8; 4], tokens: &[Token]) -> CallOutcome {
        let mut data = selector.to_vec();
        data.extend(encode(tokens));
        CallOutcome::Reverted(data.into())
    }

    #[test]
    fn execution_result_means_passed() {
        let outcome = reverted(
            ExecutionResult::selector(),
            &[
                Token::Uint(U256::from(60_000)),
                Token::Uint(U256::from(1_000)),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Bool(true),
                Token::Bytes(vec![]),
            ],
        );
        let report = SimulationReport::from_outcome(outcome);
        assert_eq!(report, SimulationReport::Passed);
        assert_eq!(report.failure_reason(), None);
    }

    #[test]
    fn failed_op_reason_is_reported() {
        let outcome = reverted(
            FailedOp::selector(),
            &[Token::Uint(U256::zero()), Token::String("AA21 didn't pay prefund".into())],
        );
        let report = SimulationReport::from_outcome(outcome);
        assert_eq!(report.failure_reason().as_deref(), Some("AA21 didn't pay prefund"));
    }

    #[test]
    fn validation_result_flags_signature_failure() {
        let return_info = ReturnInfo {
            sig_failed: true,
            ..Default::default()
        };
        let outcome = reverted(
            ValidationResult::selector(),
            &[
                return_info.into_token(),
                StakeInfo::default().into_token(),
                StakeInfo::default().into_token(),
                StakeInfo::default().into_token(),
            ],
        );
        let report = SimulationReport::from_outcome(outcome);
        assert!(matches!(report, SimulationReport::Rejected(EntryPointRevert::Validation(_))));
        assert!(report.failure_reason().is_some());
    }

    #[test]
    fn returning_normally_is_an_anomaly() {
        let report = SimulationReport::from_outcome(CallOutcome::Returned(Bytes::default()));
        assert_eq!(report, SimulationReport::Anomaly);
        assert!(report.failure_reason().is_some());
    }
}
