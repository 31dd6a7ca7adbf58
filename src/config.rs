// src/config.rs
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ethers::signers::LocalWallet;
use ethers::types::Address;

use crate::chain::ReadPolicy;
use crate::dispatcher::SimulationPolicy;

/// ERC-4337 v0.6 entry point, same address on Ethereum, Polygon and their testnets.
pub const DEFAULT_ENTRY_POINT: &str = "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789";
pub const DEFAULT_ACCOUNT_FACTORY: &str = "0x9406cc6185a346906296840746125a0e44976454";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SubmitMode {
    /// Hand operations to the relay service.
    Relay,
    /// Call `handleOps` from the relay key.
    Direct,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "ERC-4337 user operation relay", long_about = None)]
pub struct Args {
    #[clap(long, env = "ERC4337_API_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    #[clap(long, env = "ERC4337_API_ETH_CLIENT_URL")]
    pub eth_rpc_url: String,

    #[clap(long, env = "ERC4337_API_ETH_CLIENT_SK", hide_env_values = true)]
    pub private_key: String,

    #[clap(long, env = "ERC4337_API_BUNDLER_URL")]
    pub bundler_url: Option<String>,

    #[clap(long, env = "ERC4337_API_PAYMASTER_URL")]
    pub paymaster_url: Option<String>,

    #[clap(long, env = "ERC4337_API_ENTRY_POINT", default_value = DEFAULT_ENTRY_POINT)]
    pub entry_point: String,

    #[clap(long, env = "ERC4337_API_ACCOUNT_FACTORY", default_value = DEFAULT_ACCOUNT_FACTORY)]
    pub account_factory: String,

    /// Queried from the node when not set.
    #[clap(long, env = "ERC4337_API_CHAIN_ID")]
    pub chain_id: Option<u64>,

    #[clap(long, env = "ERC4337_API_SUBMIT_MODE", value_enum, default_value_t = SubmitMode::Relay)]
    pub submit_mode: SubmitMode,

    /// Simulate every operation before submitting it.
    #[clap(long, env = "ERC4337_API_SIMULATE")]
    pub simulate: bool,

    /// Refuse to submit operations that fail simulation.
    #[clap(long, env = "ERC4337_API_SIMULATION_FATAL")]
    pub simulation_fatal: bool,

    #[clap(long, env = "ERC4337_API_SPONSORSHIP_TYPE", default_value = "payg")]
    pub sponsorship_type: String,

    #[clap(long, env = "ERC4337_API_RPC_TIMEOUT_SECS", default_value_t = 15)]
    pub rpc_timeout_secs: u64,

    /// Tries per read-only node call. Submissions are never retried.
    #[clap(long, env = "ERC4337_API_READ_ATTEMPTS", default_value_t = 3)]
    pub read_attempts: u32,
}

/// Startup configuration, immutable once the server is running.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub eth_rpc_url: String,
    pub relay_key: LocalWallet,
    pub bundler_url: Option<String>,
    pub paymaster_url: Option<String>,
    pub entry_point: Address,
    pub account_factory: Address,
    pub chain_id: Option<u64>,
    pub submit_mode: SubmitMode,
    pub simulation: SimulationPolicy,
    pub sponsorship_type: String,
    pub read_policy: ReadPolicy,
}

impl TryFrom<Args> for RelayConfig {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let relay_key = args
            .private_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| anyhow::anyhow!("invalid relay private key: {e}"))?;

        let entry_point = parse_address("entry point", &args.entry_point)?;
        let account_factory = parse_address("account factory", &args.account_factory)?;

        let simulation = match (args.simulate, args.simulation_fatal) {
            (_, true) => SimulationPolicy::Fatal,
            (true, false) => SimulationPolicy::Report,
            (false, false) => SimulationPolicy::Off,
        };

        if args.submit_mode == SubmitMode::Relay && args.bundler_url.is_none() {
            anyhow::bail!("--bundler-url is required with --submit-mode relay");
        }

        Ok(Self {
            listen_addr: args.listen_addr,
            eth_rpc_url: args.eth_rpc_url,
            relay_key,
            bundler_url: args.bundler_url,
            paymaster_url: args.paymaster_url,
            entry_point,
            account_factory,
            chain_id: args.chain_id,
            submit_mode: args.submit_mode,
            simulation,
            sponsorship_type: args.sponsorship_type,
            read_policy: ReadPolicy {
                timeout: Duration::from_secs(args.rpc_timeout_secs),
                attempts: args.read_attempts,
            },
        })
    }
}

fn parse_address(what: &str, value: &str) -> anyhow::Result<Address> {
    value
        .parse::<Address>()
        .map_err(|e| anyhow::anyhow!("invalid {what} address '{value}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn parse(extra: &[&str]) -> Result<RelayConfig, anyhow::Error> {
        let mut argv = vec![
            "erc4337-relay",
            "--eth-rpc-url",
            "http://localhost:8545",
            "--private-key",
            KEY,
        ];
        argv.extend_from_slice(extra);
        RelayConfig::try_from(Args::try_parse_from(argv)?)
    }

    #[test]
    fn defaults() {
        let config = parse(&["--bundler-url", "http://localhost:4337"]).unwrap();
        assert_eq!(config.entry_point, DEFAULT_ENTRY_POINT.parse::<Address>().unwrap());
        assert_eq!(
            config.account_factory,
            DEFAULT_ACCOUNT_FACTORY.parse::<Address>().unwrap()
        );
        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.submit_mode, SubmitMode::Relay);
        assert_eq!(config.simulation, SimulationPolicy::Off);
        assert_eq!(config.sponsorship_type, "payg");
        assert_eq!(config.read_policy.attempts, 3);
        assert_eq!(config.read_policy.timeout, Duration::from_secs(15));
        assert_eq!(
            config.relay_key.address(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn direct_mode_needs_no_bundler() {
        let config = parse(&["--submit-mode", "direct", "--simulate"]).unwrap();
        assert_eq!(config.submit_mode, SubmitMode::Direct);
        assert_eq!(config.simulation, SimulationPolicy::Report);
    }

    #[test]
    fn relay_mode_needs_bundler() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn rejects_bad_key() {
        let argv = [
            "erc4337-relay",
            "--eth-rpc-url",
            "http://localhost:8545",
            "--private-key",
            "not-a-key",
            "--submit-mode",
            "direct",
        ];
        let args = Args::try_parse_from(argv).unwrap();
        assert!(RelayConfig::try_from(args).is_err());
    }
}
