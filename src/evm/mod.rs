//! BNB Smart Chain adapter
//!
//! Validates user burns of wrapped IDNA and mints wrapped IDNA for incoming
//! Idena transfers. Reads go through typed JSON-RPC; mints are signed and
//! sent through an alloy provider.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info, warn};

use crate::config::BscConfig;
use crate::error::ChainError;
use crate::oracle::PriceOracle;
use crate::types::Validation;
use crate::units::{from_wei, is_tx_hash, same_address, to_wei, DECIMALS};

pub mod contract;
pub mod rpc;

pub use contract::WrappedIdena;
pub use rpc::{Block, EvmRpc, Log, Receipt, Transaction};

/// Everything needed to submit a mint, priced before the swap is claimed
#[derive(Debug, Clone, PartialEq)]
pub struct MintQuote {
    pub address: String,
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    pub gas_price: u128,
    pub gas_limit: u64,
}

impl MintQuote {
    pub fn mint_amount(&self) -> BigDecimal {
        &self.amount - &self.fee
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MintReceipt {
    pub hash: String,
    /// Nonce pinned for this submission, if any
    pub nonce: Option<u64>,
    pub fee: BigDecimal,
}

#[async_trait]
pub trait EvmLedger: Send + Sync {
    /// Check a burn against a swap; missing chain data is `Retryable`
    async fn validate_incoming(
        &self,
        tx_hash: &str,
        expected_address: &str,
        expected_amount: &BigDecimal,
        not_before: DateTime<Utc>,
    ) -> Result<Validation, ChainError>;

    async fn is_confirmed(&self, tx_hash: &str) -> Result<bool, ChainError>;

    /// Price a mint; `None` when no exchange rate is available
    async fn estimate_mint(
        &self,
        address: &str,
        amount: &BigDecimal,
    ) -> Result<Option<MintQuote>, ChainError>;

    async fn mint(
        &self,
        quote: &MintQuote,
        nonce_override: Option<u64>,
    ) -> Result<MintReceipt, ChainError>;

    /// One-shot nonce recovered at startup; returns it at most once
    fn take_nonce_override(&self) -> Option<u64>;
}

/// Chain data a burn is checked against; `None` means not retrievable yet
#[derive(Debug, Clone, Default)]
pub struct BurnArtifacts {
    pub receipt: Option<Receipt>,
    pub tx: Option<Transaction>,
    pub block: Option<Block>,
}

/// Validate a burn of wrapped IDNA
pub fn check_burn(
    artifacts: &BurnArtifacts,
    contract: Address,
    expected_address: &str,
    expected_amount: &BigDecimal,
    not_before: DateTime<Utc>,
) -> Validation {
    let Some(receipt) = artifacts.receipt.as_ref() else {
        return Validation::Retryable;
    };

    if receipt.status.map(|s| s.to::<u64>()) != Some(1) {
        return Validation::invalid("receipt status is not success");
    }
    if receipt.logs.is_empty() {
        return Validation::invalid("receipt has no logs");
    }
    if receipt.to != Some(contract) {
        return Validation::invalid(format!(
            "wrong contract: actual {:?}, expected {}",
            receipt.to, contract
        ));
    }

    let Some(tx) = artifacts.tx.as_ref() else {
        return Validation::Retryable;
    };

    let destination = match WrappedIdena::burnCall::abi_decode(&tx.input, true) {
        Ok(call) => call.destination,
        Err(_) => return Validation::invalid("input is not a burn call"),
    };
    if !same_address(&destination, expected_address) {
        return Validation::invalid(format!(
            "wrong destination: actual {}, expected {}",
            destination, expected_address
        ));
    }

    let log = &receipt.logs[0];
    let transfer = match WrappedIdena::Transfer::decode_raw_log(
        log.topics.iter().copied(),
        &log.data,
        true,
    ) {
        Ok(event) => event,
        Err(_) => return Validation::invalid("first log is not a Transfer"),
    };

    let expected_wei = match to_wei(expected_amount) {
        Ok(wei) => wei,
        Err(e) => return Validation::invalid(e.to_string()),
    };
    if transfer.value < expected_wei {
        return Validation::invalid(format!(
            "burned {} below expected {}",
            from_wei(transfer.value),
            expected_amount
        ));
    }
    if transfer.from != tx.from {
        return Validation::invalid("transfer sender differs from tx sender");
    }
    if transfer.to != Address::ZERO {
        return Validation::invalid("transfer is not to the zero address");
    }

    let Some(block) = artifacts.block.as_ref() else {
        return Validation::Retryable;
    };
    let timestamp = block.timestamp.to::<u64>();
    if (timestamp as i64) < not_before.timestamp() {
        return Validation::invalid(format!(
            "block at {} predates swap created at {}",
            timestamp, not_before
        ));
    }

    Validation::Valid
}

/// Blocks seen on top of and including the receipt's block
pub fn confirmations(receipt_block: u64, current_block: u64) -> u64 {
    (current_block + 1).saturating_sub(receipt_block)
}

/// Convert gas cost into IDNA through the exchange rate and apply the margin
///
/// `rate` is the price of one IDNA in BNB; `None` when it is not positive.
pub fn mint_fee(
    gas_price: u128,
    gas_limit: u64,
    rate: &BigDecimal,
    fee_percent: &BigDecimal,
) -> Option<BigDecimal> {
    if *rate <= BigDecimal::from(0) {
        return None;
    }
    let cost_wei = BigInt::from(gas_price) * BigInt::from(gas_limit);
    let cost_bnb = BigDecimal::new(cost_wei, DECIMALS);
    let fee = cost_bnb / rate * fee_percent / BigDecimal::from(100);
    Some(fee.with_scale(DECIMALS))
}

/// Live adapter over a BSC node
pub struct BscClient {
    rpc: EvmRpc,
    rpc_url: String,
    signer: PrivateKeySigner,
    address: Address,
    contract: Address,
    chain_id: u64,
    fee_percent: BigDecimal,
    confirmation_blocks: u64,
    oracle: Arc<dyn PriceOracle>,
    nonce_override: Mutex<Option<u64>>,
}

impl BscClient {
    pub fn new(config: &BscConfig, oracle: Arc<dyn PriceOracle>) -> Result<Self> {
        let signer =
            PrivateKeySigner::from_str(&config.private_key).wrap_err("Invalid BSC_PRIVATE_KEY")?;
        let address = signer.address();
        let contract = Address::from_str(&config.contract)
            .map_err(|_| eyre!("Invalid BSC_CONTRACT: {}", config.contract))?;
        let rpc = EvmRpc::new(&config.rpc_url).wrap_err("Failed to build BSC RPC client")?;

        info!(
            address = %address,
            contract = %contract,
            chain_id = config.chain_id,
            "BSC client initialized"
        );

        Ok(Self {
            rpc,
            rpc_url: config.rpc_url.clone(),
            signer,
            address,
            contract,
            chain_id: config.chain_id,
            fee_percent: config.fee_percent.clone(),
            confirmation_blocks: config.confirmation_blocks,
            oracle,
            nonce_override: Mutex::new(None),
        })
    }

    /// Check the node's chain id and read the pending nonce for the next mint
    ///
    /// Pinning that nonce once reclaims a slot left behind by a crash.
    pub async fn init_nonce_override(&self) -> Result<()> {
        let chain_id = self
            .rpc
            .chain_id()
            .await
            .wrap_err("Failed to read BSC chain id")?;
        if chain_id != self.chain_id {
            return Err(eyre!(
                "BSC_RPC serves chain {} but BSC_NETWORK is {}",
                chain_id,
                self.chain_id
            ));
        }

        let nonce = self
            .rpc
            .pending_nonce(self.address)
            .await
            .wrap_err("Failed to read BSC pending nonce")?;
        self.set_nonce_override(Some(nonce));
        info!(nonce = nonce, "BSC nonce override armed");
        Ok(())
    }

    fn set_nonce_override(&self, nonce: Option<u64>) {
        match self.nonce_override.lock() {
            Ok(mut slot) => *slot = nonce,
            Err(poisoned) => *poisoned.into_inner() = nonce,
        }
    }

    async fn fetch_burn(&self, tx_hash: &str) -> Result<BurnArtifacts, ChainError> {
        let receipt = self.rpc.receipt(tx_hash).await?;
        let Some(receipt) = receipt else {
            return Ok(BurnArtifacts::default());
        };
        let tx = self.rpc.transaction(tx_hash).await?;
        let block = match receipt.block_number {
            Some(number) => self.rpc.block(number.to::<u64>()).await?,
            None => None,
        };
        Ok(BurnArtifacts {
            receipt: Some(receipt),
            tx,
            block,
        })
    }
}

#[async_trait]
impl EvmLedger for BscClient {
    async fn validate_incoming(
        &self,
        tx_hash: &str,
        expected_address: &str,
        expected_amount: &BigDecimal,
        not_before: DateTime<Utc>,
    ) -> Result<Validation, ChainError> {
        if !is_tx_hash(tx_hash) {
            return Ok(Validation::invalid(format!("malformed tx hash {}", tx_hash)));
        }
        let artifacts = self.fetch_burn(tx_hash).await?;
        let validation = check_burn(
            &artifacts,
            self.contract,
            expected_address,
            expected_amount,
            not_before,
        );
        if let Validation::Invalid(reason) = &validation {
            info!(tx_hash = %tx_hash, reason = %reason, "BSC burn rejected");
        }
        Ok(validation)
    }

    async fn is_confirmed(&self, tx_hash: &str) -> Result<bool, ChainError> {
        let Some(receipt) = self.rpc.receipt(tx_hash).await? else {
            return Ok(false);
        };
        let Some(block) = receipt.block_number else {
            return Ok(false);
        };
        let current = self.rpc.block_number().await?;
        let depth = confirmations(block.to::<u64>(), current);
        debug!(tx_hash = %tx_hash, depth = depth, "BSC confirmation check");
        Ok(depth >= self.confirmation_blocks)
    }

    async fn estimate_mint(
        &self,
        address: &str,
        amount: &BigDecimal,
    ) -> Result<Option<MintQuote>, ChainError> {
        let Some(rate) = self.oracle.exchange_rate().await else {
            warn!("IDNA price unavailable, not pricing mint");
            return Ok(None);
        };
        if rate <= BigDecimal::from(0) {
            warn!(rate = %rate, "IDNA price is not positive, not pricing mint");
            return Ok(None);
        }

        let to = Address::from_str(address)
            .map_err(|_| ChainError::Decode(format!("invalid BSC address {}", address)))?;
        let call = WrappedIdena::mintCall {
            to,
            amount: to_wei(amount)?,
        };

        let gas_price = self.rpc.gas_price().await?;
        let gas_limit = self
            .rpc
            .estimate_gas(self.address, self.contract, &call.abi_encode())
            .await?;
        let Some(fee) = mint_fee(gas_price, gas_limit, &rate, &self.fee_percent) else {
            return Ok(None);
        };

        debug!(
            address = %address,
            amount = %amount,
            gas_price = gas_price,
            gas_limit = gas_limit,
            fee = %fee,
            "Priced mint"
        );

        Ok(Some(MintQuote {
            address: address.to_string(),
            amount: amount.clone(),
            fee,
            gas_price,
            gas_limit,
        }))
    }

    async fn mint(
        &self,
        quote: &MintQuote,
        nonce_override: Option<u64>,
    ) -> Result<MintReceipt, ChainError> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(
                self.rpc_url
                    .parse()
                    .map_err(|_| ChainError::Decode(format!("invalid RPC url {}", self.rpc_url)))?,
            );

        let to = Address::from_str(&quote.address)
            .map_err(|_| ChainError::Decode(format!("invalid BSC address {}", quote.address)))?;
        let value = to_wei(&quote.mint_amount())?;

        let contract = WrappedIdena::new(self.contract, &provider);
        let mut call = contract
            .mint(to, value)
            .gas(quote.gas_limit)
            .gas_price(quote.gas_price);
        if let Some(nonce) = nonce_override {
            call = call.nonce(nonce);
        }

        info!(
            to = %to,
            amount = %quote.mint_amount(),
            fee = %quote.fee,
            nonce = ?nonce_override,
            "Submitting mint"
        );

        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Rejected(format!("mint failed: {}", e)))?;

        Ok(MintReceipt {
            hash: format!("{:#x}", pending.tx_hash()),
            nonce: nonce_override,
            fee: quote.fee.clone(),
        })
    }

    fn take_nonce_override(&self) -> Option<u64> {
        match self.nonce_override.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}
