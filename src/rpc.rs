// src/rpc.rs
use std::time::Duration;

use ethers::types::{Address, H256};
use jsonrpsee::core::RpcResult;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::proc_macros::rpc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::UserOperation;

/// Third argument of `pm_sponsorUserOperation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorContext {
    #[serde(rename = "type")]
    pub kind: String,
}

// Sponsoring service interface
#[rpc(server, client, namespace = "pm")]
pub trait PaymasterApi {
    /// Returns the operation fields the sponsor wants changed, keyed by field name.
    #[method(name = "sponsorUserOperation")]
    async fn sponsor_user_operation(
        &self,
        op: Map<String, Value>,
        entry_point: Address,
        sponsor_context: SponsorContext,
    ) -> RpcResult<Map<String, Value>>;
}

// Relay service interface
#[rpc(server, client, namespace = "eth")]
pub trait BundlerApi {
    /// Queues the operation for inclusion and returns its hash.
    #[method(name = "sendUserOperation")]
    async fn send_user_operation(&self, op: UserOperation, entry_point: Address) -> RpcResult<H256>;
}

pub fn http_client(url: &str, timeout: Duration) -> anyhow::Result<HttpClient> {
    let client = HttpClientBuilder::default()
        .request_timeout(timeout)
        .build(url)?;
    Ok(client)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use ethers::types::U256;

    #[tokio::test]
    async fn bundler_client_round_trip() {
        let bundler = MockBundler {
            reply: Some(H256::repeat_byte(0x99)),
            ..Default::default()
        };
        let (url, handle) = serve(bundler.clone().into_rpc()).await;
        let client = http_client(&url, Duration::from_secs(5)).unwrap();

        let op = UserOperation {
            sender: Address::repeat_byte(0x01),
            ..Default::default()
        };
        let hash = client
            .send_user_operation(op.clone(), Address::repeat_byte(0xee))
            .await
            .unwrap();

        assert_eq!(hash, H256::repeat_byte(0x99));
        let seen = bundler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (op, Address::repeat_byte(0xee)));
        drop(seen);
        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn paymaster_client_round_trip() {
        let mut reply = Map::new();
        reply.insert("paymasterAndData".into(), Value::String("0x01".into()));
        let paymaster = MockPaymaster {
            reply: reply.clone(),
            ..Default::default()
        };
        let (url, handle) = serve(paymaster.clone().into_rpc()).await;
        let client = http_client(&url, Duration::from_secs(5)).unwrap();

        let op = UserOperation::default().to_field_map().unwrap();
        let sponsor_context = SponsorContext {
            kind: "payg".into(),
        };
        let returned = client
            .sponsor_user_operation(op.clone(), Address::repeat_byte(0xee), sponsor_context.clone())
            .await
            .unwrap();

        assert_eq!(returned, reply);
        let seen = paymaster.seen.lock().unwrap();
        assert_eq!(seen[0], (op, Address::repeat_byte(0xee), sponsor_context));
        drop(seen);
        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn gas_price_node_answers_provider() {
        use ethers::providers::{Http, Middleware, Provider};

        let (url, handle) = serve(gas_price_node(U256::from(7))).await;
        let provider = Provider::<Http>::try_from(url.as_str()).unwrap();
        assert_eq!(provider.get_gas_price().await.unwrap(), U256::from(7));
        handle.stop().unwrap();
    }

    #[test]
    fn sponsor_context_serializes_type_tag() {
        let ctx = SponsorContext {
            kind: "payg".into(),
        };
        assert_eq!(serde_json::to_value(&ctx).unwrap(), serde_json::json!({"type": "payg"}));
    }
}
