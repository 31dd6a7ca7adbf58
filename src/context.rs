// src/context.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use tracing::{debug, info, warn};

use crate::builder::{build, Action, FeeParams, OpRequest};
use crate::chain::{gas_price, ReadPolicy};
use crate::config::{RelayConfig, SubmitMode};
use crate::dispatcher::{Dispatcher, Submitter};
use crate::error::RelayError;
use crate::resolver::{OnChainResolver, SenderResolver};
use crate::rpc::http_client;
use crate::signer::{seal, verify_sealed};
use crate::sponsor::SponsorClient;
use crate::types::{Operation, SenderInfo, UserOperation};

/// Account owner and token contract a request acts on.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub owner: Address,
    pub salt: U256,
    pub contract: Address,
}

/// A sponsored operation after it was handed off.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub op: UserOperation,
    pub op_hash: H256,
}

/// Long-lived handles and settings shared by every request.
pub struct RelayContext {
    pub(crate) entry_point: Address,
    pub(crate) account_factory: Address,
    pub(crate) chain_id: u64,
    pub(crate) provider: Arc<Provider<Http>>,
    pub(crate) relay_key: LocalWallet,
    pub(crate) resolver: Arc<dyn SenderResolver>,
    pub(crate) sponsor: Option<SponsorClient>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) read_policy: ReadPolicy,
}

impl RelayContext {
    pub async fn connect(config: RelayConfig) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(config.eth_rpc_url.as_str())
            .with_context(|| format!("invalid node url {}", config.eth_rpc_url))?
            .interval(Duration::from_secs(2));
        let provider = Arc::new(provider);

        let chain_id = match config.chain_id {
            Some(chain_id) => chain_id,
            None => provider
                .get_chainid()
                .await
                .with_context(|| {
                    format!("failed to connect to blockchain at {}", config.eth_rpc_url)
                })?
                .as_u64(),
        };
        info!(
            "Connected to chain with url {}, chain id {}",
            config.eth_rpc_url, chain_id
        );

        let relay_key = config.relay_key.with_chain_id(chain_id);
        info!("Relay key address: {:?}", relay_key.address());

        let timeout = config.read_policy.timeout;
        let resolver = Arc::new(OnChainResolver::new(
            provider.clone(),
            config.entry_point,
            config.account_factory,
            config.read_policy,
        ));

        let sponsor = match config.paymaster_url.as_deref() {
            Some(url) => Some(SponsorClient::new(
                http_client(url, timeout)?,
                config.entry_point,
                chain_id,
                config.sponsorship_type.clone(),
            )),
            None => {
                warn!("No paymaster url configured, sponsored endpoints will fail");
                None
            }
        };

        let submitter = match config.submit_mode {
            SubmitMode::Relay => {
                let url = config
                    .bundler_url
                    .as_deref()
                    .context("relay submission needs a bundler url")?;
                Submitter::Relay(http_client(url, timeout)?)
            }
            SubmitMode::Direct => {
                Submitter::Direct(SignerMiddleware::new((*provider).clone(), relay_key.clone()))
            }
        };
        let dispatcher = Dispatcher::new(
            config.entry_point,
            chain_id,
            provider.clone(),
            submitter,
            config.simulation,
            config.read_policy,
        );

        Ok(Self {
            entry_point: config.entry_point,
            account_factory: config.account_factory,
            chain_id,
            provider,
            relay_key,
            resolver,
            sponsor,
            dispatcher,
            read_policy: config.read_policy,
        })
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub async fn sender_info(&self, owner: Address, salt: U256) -> Result<SenderInfo, RelayError> {
        self.resolver.resolve(owner, salt).await
    }

    pub async fn sender_address(&self, owner: Address, salt: U256) -> Result<Address, RelayError> {
        self.resolver.sender_address(owner, salt).await
    }

    async fn prepare(
        &self,
        target: Target,
        action: Action,
        fees: FeeParams,
    ) -> Result<Operation, RelayError> {
        let info = self.resolver.resolve(target.owner, target.salt).await?;
        let request = OpRequest {
            nonce: info.nonce,
            owner: target.owner,
            sender: info.sender,
            salt: target.salt,
            target: target.contract,
            action,
        };
        debug!(
            "Building {} op for sender {:?}, deployed: {}",
            action.name(),
            info.sender,
            info.is_deployed()
        );
        Ok(build(self.account_factory, &request, fees))
    }

    async fn live_fees(&self) -> Result<FeeParams, RelayError> {
        let price = gas_price(&self.provider, &self.read_policy).await?;
        Ok(FeeParams::from_gas_price(price))
    }

    async fn sponsored(&self, op: Operation) -> Result<Operation, RelayError> {
        let sponsor = self
            .sponsor
            .as_ref()
            .ok_or(RelayError::NotConfigured("paymaster url"))?;
        sponsor.sponsor(op, &self.relay_key).await
    }

    /// Unsigned, unsponsored approve at the default fee.
    pub async fn approve_op(
        &self,
        target: Target,
        spender: Address,
        amount: U256,
    ) -> Result<Operation, RelayError> {
        self.prepare(target, Action::Approve { spender, amount }, FeeParams::default())
            .await
    }

    /// Unsigned, unsponsored mint at the default fee.
    pub async fn mint_op(
        &self,
        target: Target,
        to: Address,
        amount: U256,
    ) -> Result<Operation, RelayError> {
        self.prepare(target, Action::Mint { to, amount }, FeeParams::default())
            .await
    }

    /// Sponsored withdraw, priced at the node's gas price, left unsigned for the owner.
    pub async fn withdraw_to_op(
        &self,
        target: Target,
        to: Address,
        amount: U256,
    ) -> Result<Operation, RelayError> {
        let fees = self.live_fees().await?;
        let op = self.prepare(target, Action::WithdrawTo { to, amount }, fees).await?;
        self.sponsored(op).await
    }

    /// Sponsored transfer, sealed with the relay key over the sponsored fields and
    /// dispatched.
    pub async fn transfer(
        &self,
        target: Target,
        to: Address,
        amount: U256,
    ) -> Result<Submitted, RelayError> {
        let relay_address = self.relay_key.address();
        if target.owner != relay_address {
            warn!(
                "Transfer for owner {:?} is sealed by relay key {:?}, the account may reject it",
                target.owner, relay_address
            );
        }

        let fees = self.live_fees().await?;
        let op = self.prepare(target, Action::Transfer { to, amount }, fees).await?;
        let op = self.sponsored(op).await?;
        let op = seal(op, self.entry_point, self.chain_id, &self.relay_key)?;

        let op_hash = self.dispatcher.dispatch(&op).await?;
        Ok(Submitted {
            op: op.into_user_op(),
            op_hash,
        })
    }

    /// Dispatches an operation the owner signed, once the signer's account is the sender.
    pub async fn send_signed(&self, op: UserOperation, salt: U256) -> Result<H256, RelayError> {
        let (op, op_hash, owner) = verify_sealed(op, self.entry_point, self.chain_id)?;
        let resolved = self.resolver.sender_address(owner, salt).await?;
        let declared = op.user_op().sender;
        if resolved != declared {
            return Err(RelayError::SenderMismatch {
                owner,
                resolved,
                declared,
                op_hash,
            });
        }

        self.dispatcher.dispatch(&op).await
    }
}
