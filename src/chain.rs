// src/chain.rs
use std::future::Future;
use std::time::Duration;

use ethers::providers::{Http, JsonRpcError, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use tracing::{debug, warn};

use crate::error::RelayError;

/// Bounds every read-only round trip to the node. Submissions never go through here.
#[derive(Debug, Clone, Copy)]
pub struct ReadPolicy {
    pub timeout: Duration,
    pub attempts: u32,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            attempts: 3,
        }
    }
}

/// Why a single read attempt failed.
#[derive(Debug)]
pub enum ReadFailure {
    /// Transport trouble; the same read may be tried again.
    Transient(String),
    /// The node answered with an error; asking again gives the same answer.
    Fatal(String),
}

impl From<ProviderError> for ReadFailure {
    fn from(err: ProviderError) -> Self {
        if err.as_error_response().is_some() {
            ReadFailure::Fatal(err.to_string())
        } else {
            ReadFailure::Transient(err.to_string())
        }
    }
}

impl ReadPolicy {
    pub async fn run<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, RelayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReadFailure>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_error = String::new();

        for n in 1..=attempts {
            match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(ReadFailure::Fatal(reason))) => {
                    return Err(RelayError::Provider(format!("{what}: {reason}")))
                }
                Ok(Err(ReadFailure::Transient(reason))) => last_error = reason,
                Err(_) => last_error = format!("timed out after {:?}", self.timeout),
            }
            if n < attempts {
                warn!("{} attempt {}/{} failed: {}", what, n, attempts, last_error);
            }
        }

        Err(RelayError::Provider(format!("{what}: {last_error}")))
    }
}

/// Result of an `eth_call`. A revert that carries data is an answer, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Returned(Bytes),
    Reverted(Bytes),
}

pub async fn eth_call(
    provider: &Provider<Http>,
    policy: &ReadPolicy,
    to: Address,
    data: Bytes,
) -> Result<CallOutcome, RelayError> {
    let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
    let tx = &tx;

    policy
        .run("eth_call", move || async move {
            match provider.call(tx, None).await {
                Ok(returned) => Ok(CallOutcome::Returned(returned)),
                Err(err) => {
                    let revert = err.as_error_response().and_then(JsonRpcError::as_revert_data);
                    match revert {
                        Some(data) => {
                            debug!("eth_call to {:?} reverted with {} bytes", to, data.len());
                            Ok(CallOutcome::Reverted(data))
                        }
                        None => Err(ReadFailure::from(err)),
                    }
                }
            }
        })
        .await
}

// TODO: cache with a background refresher once request volume makes this round trip matter.
pub async fn gas_price(provider: &Provider<Http>, policy: &ReadPolicy) -> Result<U256, RelayError> {
    policy
        .run("eth_gasPrice", move || async move {
            provider.get_gas_price().await.map_err(ReadFailure::from)
        })
        .await
}
