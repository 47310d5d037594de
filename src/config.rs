//! Bridge configuration
//!
//! Everything comes from the environment, optionally seeded from a `.env`
//! file. Secrets never appear in `Debug` output.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;
use eyre::{eyre, Result, WrapErr};

const DEFAULT_PRICE_API_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=idena&vs_currencies=bnb";
const DEFAULT_PRICE_FALLBACK_URL: &str =
    "https://pro-api.coingecko.com/api/v3/simple/price?ids=idena&vs_currencies=bnb";

/// Main configuration for the bridge
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub idena: IdenaConfig,
    pub bsc: BscConfig,
    pub server: ServerConfig,
    pub oracle: OracleConfig,
    pub reconciler: ReconcilerConfig,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// The URL may carry credentials
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct IdenaConfig {
    pub provider: String,
    pub api_key: String,
    pub private_key: String,
    /// Flat fee deducted from every user-facing send, in DNA
    pub fixed_fees: BigDecimal,
    pub confirmation_blocks: u64,
    /// Directory holding `nonce.json`
    pub nonce_dir: PathBuf,
}

impl fmt::Debug for IdenaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdenaConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("private_key", &"<redacted>")
            .field("fixed_fees", &self.fixed_fees)
            .field("confirmation_blocks", &self.confirmation_blocks)
            .field("nonce_dir", &self.nonce_dir)
            .finish()
    }
}

impl IdenaConfig {
    pub fn nonce_file(&self) -> PathBuf {
        self.nonce_dir.join("nonce.json")
    }
}

#[derive(Clone)]
pub struct BscConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub private_key: String,
    pub contract: String,
    /// Percentage of the raw gas cost charged to the user
    pub fee_percent: BigDecimal,
    pub confirmation_blocks: u64,
}

impl fmt::Debug for BscConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BscConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("private_key", &"<redacted>")
            .field("contract", &self.contract)
            .field("fee_percent", &self.fee_percent)
            .field("confirmation_blocks", &self.confirmation_blocks)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Smallest amount accepted by `POST /swaps/create`
    pub min_swap: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub primary_url: String,
    pub fallback_url: String,
    pub cache_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval_ms: u64,
}

impl ReconcilerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_idena_fixed_fees() -> BigDecimal {
    BigDecimal::new(5.into(), 1)
}

fn default_idena_confirmation_blocks() -> u64 {
    2
}

fn default_bsc_fee_percent() -> BigDecimal {
    BigDecimal::from(100)
}

fn default_bsc_confirmation_blocks() -> u64 {
    3
}

fn default_min_swap() -> BigDecimal {
    BigDecimal::from(10)
}

fn default_port() -> u16 {
    8001
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_price_cache_secs() -> u64 {
    60
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

fn optional<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| eyre!("{} is invalid: {}", name, e)),
        _ => Ok(default),
    }
}

impl Config {
    /// Load configuration, reading `.env` first when present
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    pub fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
        };

        let idena = IdenaConfig {
            provider: required("IDENA_PROVIDER")?,
            api_key: required("IDENA_API_KEY")?,
            private_key: required("IDENA_PRIVATE_KEY")?,
            fixed_fees: optional("IDENA_FIXED_FEES", default_idena_fixed_fees())?,
            confirmation_blocks: optional(
                "IDENA_CONFIRMATIONS_BLOCKS",
                default_idena_confirmation_blocks(),
            )?,
            nonce_dir: PathBuf::from(env::var("NONCE_DIR").unwrap_or_else(|_| ".".to_string())),
        };

        let bsc = BscConfig {
            rpc_url: required("BSC_RPC")?,
            chain_id: required("BSC_NETWORK")?
                .trim()
                .parse()
                .wrap_err("BSC_NETWORK must be a valid chain id")?,
            private_key: required("BSC_PRIVATE_KEY")?,
            contract: required("BSC_CONTRACT")?,
            fee_percent: optional("BSC_FEES", default_bsc_fee_percent())?,
            confirmation_blocks: optional(
                "BSC_CONFIRMATIONS_BLOCKS",
                default_bsc_confirmation_blocks(),
            )?,
        };

        let server = ServerConfig {
            port: optional("PORT", default_port())?,
            min_swap: optional("MIN_SWAP", default_min_swap())?,
        };

        let oracle = OracleConfig {
            primary_url: env::var("PRICE_API_URL")
                .unwrap_or_else(|_| DEFAULT_PRICE_API_URL.to_string()),
            fallback_url: env::var("PRICE_FALLBACK_URL")
                .unwrap_or_else(|_| DEFAULT_PRICE_FALLBACK_URL.to_string()),
            cache_secs: optional("PRICE_CACHE_SECS", default_price_cache_secs())?,
        };

        let reconciler = ReconcilerConfig {
            poll_interval_ms: optional("POLL_INTERVAL_MS", default_poll_interval())?,
        };

        let config = Config {
            database,
            idena,
            bsc,
            server,
            oracle,
            reconciler,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if !is_http_url(&self.idena.provider) {
            return Err(eyre!("idena.provider must be an http(s) url"));
        }

        if !is_private_key(&self.idena.private_key) {
            return Err(eyre!("idena.private_key must be 0x + 64 hex chars"));
        }

        if self.idena.fixed_fees < BigDecimal::from(0) {
            return Err(eyre!("idena.fixed_fees cannot be negative"));
        }

        if !is_http_url(&self.bsc.rpc_url) {
            return Err(eyre!("bsc.rpc_url must be an http(s) url"));
        }

        if !crate::units::is_hex_address(&self.bsc.contract) {
            return Err(eyre!(
                "bsc.contract must be a valid hex address (42 chars with 0x prefix)"
            ));
        }

        if !is_private_key(&self.bsc.private_key) {
            return Err(eyre!("bsc.private_key must be 0x + 64 hex chars"));
        }

        if self.bsc.fee_percent < BigDecimal::from(0) {
            return Err(eyre!("bsc.fee_percent cannot be negative"));
        }

        if self.server.min_swap <= BigDecimal::from(0) {
            return Err(eyre!("server.min_swap must be positive"));
        }

        if self.reconciler.poll_interval_ms == 0 {
            return Err(eyre!("reconciler.poll_interval_ms must be positive"));
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn is_private_key(key: &str) -> bool {
    key.len() == 66
        && key.starts_with("0x")
        && key[2..].chars().all(|c| c.is_ascii_hexdigit())
}
