//! Relayer configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// How the destination chain is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainMode {
    /// JSON-RPC to a deployed `BridgeReceiver` contract.
    Evm,
    /// In-process receiver ledger, for local runs.
    Local,
}

impl FromStr for ChainMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "evm" => Ok(ChainMode::Evm),
            "local" => Ok(ChainMode::Local),
            other => Err(anyhow!("unknown chain mode: {other}")),
        }
    }
}

/// Record status used when the destination ledger reports a message hash as
/// already processed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlreadyProcessedPolicy {
    /// Treat it as an idempotent success.
    #[default]
    Settled,
    Failed,
}

impl FromStr for AlreadyProcessedPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "settled" => Ok(AlreadyProcessedPolicy::Settled),
            "failed" => Ok(AlreadyProcessedPolicy::Failed),
            other => Err(anyhow!("unknown already-processed policy: {other}")),
        }
    }
}

/// Amount limits and fee schedule applied at intake.
#[derive(Clone, Debug, PartialEq)]
pub struct IntakeOptions {
    pub min_amount: f64,
    pub max_amount: f64,
    pub fee_bps: u32,
    /// Decimals of the settlement token on the destination chain.
    pub decimals: u32,
}

impl Default for IntakeOptions {
    fn default() -> Self {
        Self {
            min_amount: 1.0,
            max_amount: 10_000.0,
            fee_bps: 150,
            decimals: 18,
        }
    }
}

/// Destination chain connection.
#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub mode: ChainMode,
    pub rpc_url: Option<String>,
    pub bridge_address: Option<String>,
    pub private_key: Option<String>,
    pub chain_id: u64,
    pub confirmations: usize,
    pub submission_timeout: Duration,
    /// Whole tokens deposited into the in-process ledger at startup.
    pub local_liquidity: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            mode: ChainMode::Evm,
            rpc_url: None,
            bridge_address: None,
            private_key: None,
            chain_id: 11_155_111,
            confirmations: 1,
            submission_timeout: Duration::from_secs(120),
            local_liquidity: 1_000_000,
        }
    }
}

/// External proof verifier. Structural checks only when `url` is unset.
#[derive(Clone, Debug)]
pub struct VerifierConfig {
    pub url: Option<String>,
    pub timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Source-chain indexer. The listener only runs when both fields are set.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub indexer_url: Option<String>,
    pub contract_address: Option<String>,
    pub poll_interval: Duration,
}

impl SourceConfig {
    pub fn is_enabled(&self) -> bool {
        self.indexer_url.is_some() && self.contract_address.is_some()
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            indexer_url: None,
            contract_address: None,
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Relayer configuration.
#[derive(Clone, Debug)]
pub struct RelayerConfig {
    pub port: u16,
    pub enable_cors: bool,
    pub intake: IntakeOptions,
    pub chain: ChainConfig,
    pub verifier: VerifierConfig,
    pub source: SourceConfig,
    pub already_processed: AlreadyProcessedPolicy,
    /// Sled database for transfer records; in-memory when unset.
    pub db_path: Option<PathBuf>,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            enable_cors: true,
            intake: IntakeOptions::default(),
            chain: ChainConfig::default(),
            verifier: VerifierConfig::default(),
            source: SourceConfig::default(),
            already_processed: AlreadyProcessedPolicy::default(),
            db_path: None,
        }
    }
}

impl RelayerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let intake = IntakeOptions {
            min_amount: parse_var("MIN_AMOUNT")?.unwrap_or(defaults.intake.min_amount),
            max_amount: parse_var("MAX_AMOUNT")?.unwrap_or(defaults.intake.max_amount),
            fee_bps: parse_var("FEE_BPS")?.unwrap_or(defaults.intake.fee_bps),
            decimals: parse_var("USDC_DECIMALS")?.unwrap_or(defaults.intake.decimals),
        };
        if intake.min_amount > intake.max_amount {
            return Err(anyhow!(
                "MIN_AMOUNT ({}) exceeds MAX_AMOUNT ({})",
                intake.min_amount,
                intake.max_amount
            ));
        }

        let chain = ChainConfig {
            mode: parse_var("CHAIN_MODE")?.unwrap_or(defaults.chain.mode),
            rpc_url: non_empty_var("ETHEREUM_RPC_URL"),
            bridge_address: non_empty_var("ETHEREUM_BRIDGE_ADDRESS"),
            private_key: non_empty_var("ETHEREUM_PRIVATE_KEY"),
            chain_id: parse_var("ETHEREUM_CHAIN_ID")?.unwrap_or(defaults.chain.chain_id),
            confirmations: parse_var("CONFIRMATIONS")?.unwrap_or(defaults.chain.confirmations),
            submission_timeout: parse_var("SUBMISSION_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.chain.submission_timeout),
            local_liquidity: parse_var("LOCAL_LEDGER_LIQUIDITY")?
                .unwrap_or(defaults.chain.local_liquidity),
        };

        let verifier = VerifierConfig {
            url: non_empty_var("PROOF_VERIFIER_URL"),
            timeout: parse_var("PROOF_VERIFIER_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.verifier.timeout),
        };

        let source = SourceConfig {
            indexer_url: non_empty_var("SOURCE_INDEXER_URL"),
            contract_address: non_empty_var("SOURCE_CONTRACT_ADDRESS"),
            poll_interval: parse_var("SOURCE_POLL_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.source.poll_interval),
        };

        Ok(Self {
            port: parse_var("PORT")?.unwrap_or(defaults.port),
            enable_cors: non_empty_var("RELAYER_ENABLE_CORS")
                .map(|s| s.to_lowercase() != "false" && s != "0")
                .unwrap_or(defaults.enable_cors),
            intake,
            chain,
            verifier,
            source,
            already_processed: parse_var("ALREADY_PROCESSED_AS")?
                .unwrap_or(defaults.already_processed),
            db_path: non_empty_var("TRANSFER_DB_PATH").map(PathBuf::from),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    non_empty_var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| anyhow!("{e}"))
                .with_context(|| format!("{key} has an invalid value: {raw}"))
        })
        .transpose()
}
