//! Idena chain adapter
//!
//! Reads incoming transfers to the bridge wallet and sends DNA out of it.
//! Outgoing sends are serialized by the mutex around the nonce file.

use std::str::FromStr;

use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::IdenaConfig;
use crate::error::ChainError;
use crate::types::Validation;
use crate::units::same_address;

pub mod nonce;
pub mod rpc;
pub mod tx;

pub use nonce::{NonceFile, Reservation, SequenceState};
pub use rpc::{IdenaRpc, IdenaTransaction};

/// Prefix of the payload comment naming the BSC destination
pub const PAYLOAD_PREFIX: &str = "BSCADDRESS";

/// Upper bound on the fee a bridge send may burn, in DNA
fn max_fee() -> BigDecimal {
    BigDecimal::new(5.into(), 1)
}

/// Result of a successful outgoing send
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    pub hash: String,
    /// Fee charged to the user, zero for refunds
    pub fee: BigDecimal,
}

#[async_trait]
pub trait IdenaLedger: Send + Sync {
    /// The bridge wallet incoming transfers must be addressed to
    fn bridge_address(&self) -> &str;

    async fn get_transaction(&self, hash: &str) -> Result<Option<IdenaTransaction>, ChainError>;

    fn validate_incoming(
        &self,
        tx: &IdenaTransaction,
        expected_address: &str,
        expected_amount: &BigDecimal,
        not_before: DateTime<Utc>,
    ) -> Validation {
        check_incoming(
            tx,
            self.bridge_address(),
            expected_address,
            expected_amount,
            not_before,
        )
    }

    async fn is_confirmed(&self, tx: &IdenaTransaction) -> Result<bool, ChainError>;

    /// Send DNA; `charge_fee` deducts the fixed bridge fee from `amount`
    async fn send(
        &self,
        address: &str,
        amount: &BigDecimal,
        charge_fee: bool,
    ) -> Result<SendReceipt, ChainError>;

    /// Fails with `SequenceState` when the nonce file cannot be trusted
    async fn check_sequence_state(&self) -> Result<(), ChainError>;
}

/// Extract the BSC destination from a hex payload carrying `BSCADDRESS<addr>`
pub fn decode_destination(payload: &str) -> Option<String> {
    let body = payload.strip_prefix("0x").unwrap_or(payload);
    let bytes = hex::decode(body).ok()?;
    let comment = String::from_utf8_lossy(&bytes);
    comment
        .strip_prefix(PAYLOAD_PREFIX)
        .map(|address| address.to_string())
}

/// Check an incoming transfer against the swap it was attached to
pub fn check_incoming(
    tx: &IdenaTransaction,
    bridge_address: &str,
    expected_address: &str,
    expected_amount: &BigDecimal,
    not_before: DateTime<Utc>,
) -> Validation {
    let destination = tx.payload.as_deref().and_then(decode_destination);
    match destination {
        Some(ref dest) if same_address(dest, expected_address) => {}
        _ => {
            return Validation::invalid(format!(
                "wrong destination: actual {:?}, expected {}",
                destination, expected_address
            ))
        }
    }

    match tx.to.as_deref() {
        Some(to) if same_address(to, bridge_address) => {}
        other => {
            return Validation::invalid(format!(
                "wrong recipient: actual {:?}, expected {}",
                other, bridge_address
            ))
        }
    }

    let amount = match BigDecimal::from_str(&tx.amount) {
        Ok(amount) => amount,
        Err(_) => return Validation::invalid(format!("unparseable amount {}", tx.amount)),
    };
    if amount < *expected_amount {
        return Validation::invalid(format!(
            "amount too low: actual {}, expected at least {}",
            amount, expected_amount
        ));
    }

    if tx.kind != "send" {
        return Validation::invalid(format!("wrong tx type {}", tx.kind));
    }

    // Unmined transactions have no timestamp yet and pass provisionally
    if let Some(ts) = tx.mined_at() {
        if ts < not_before.timestamp() {
            return Validation::invalid(format!(
                "tx at {} predates swap created at {}",
                ts, not_before
            ));
        }
    }

    Validation::Valid
}

/// Live adapter over an Idena node
pub struct IdenaClient {
    rpc: IdenaRpc,
    signer: PrivateKeySigner,
    address: String,
    fixed_fees: BigDecimal,
    confirmation_blocks: u64,
    nonce: Mutex<NonceFile>,
}

impl IdenaClient {
    pub fn new(config: &IdenaConfig) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(&config.private_key)
            .wrap_err("Invalid IDENA_PRIVATE_KEY")?;
        let address = tx::address_of(&signer);
        let rpc = IdenaRpc::new(&config.provider, &config.api_key)
            .wrap_err("Failed to build Idena RPC client")?;

        info!(address = %address, provider = %config.provider, "Idena client initialized");

        Ok(Self {
            rpc,
            signer,
            address,
            fixed_fees: config.fixed_fees.clone(),
            confirmation_blocks: config.confirmation_blocks,
            nonce: Mutex::new(NonceFile::new(config.nonce_file())),
        })
    }

    /// Seed the nonce file from the chain when it does not exist yet
    ///
    /// An existing file must parse; a corrupt one halts startup.
    pub async fn init_nonce(&self) -> Result<()> {
        let file = self.nonce.lock().await;
        if file.exists().await {
            let state = file
                .read()
                .await
                .wrap_err("Existing Idena nonce file is unusable")?;
            info!(nonce = state.nonce, epoch = state.epoch, "Idena nonce file loaded");
            return Ok(());
        }

        let nonce = self
            .rpc
            .account_nonce(&self.address)
            .await
            .wrap_err("Failed to read Idena account nonce")?;
        let epoch = self.rpc.epoch().await.wrap_err("Failed to read Idena epoch")?;
        file.init(SequenceState { nonce, epoch })
            .await
            .wrap_err("Failed to create Idena nonce file")?;

        info!(
            nonce = nonce,
            epoch = epoch,
            path = %file.path().display(),
            "Idena nonce file created"
        );
        Ok(())
    }
}

#[async_trait]
impl IdenaLedger for IdenaClient {
    fn bridge_address(&self) -> &str {
        &self.address
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<IdenaTransaction>, ChainError> {
        self.rpc.transaction(hash).await
    }

    async fn is_confirmed(&self, tx: &IdenaTransaction) -> Result<bool, ChainError> {
        if tx.mined_at().is_none() {
            return Ok(false);
        }
        let Some(block_hash) = tx.block_hash.as_deref() else {
            return Ok(false);
        };

        let height = self.rpc.block_height(block_hash).await?;
        let highest = self.rpc.highest_block().await?;
        debug!(
            tx_hash = %tx.hash,
            height = height,
            highest = highest,
            "Idena confirmation check"
        );
        Ok(highest > height + self.confirmation_blocks)
    }

    async fn send(
        &self,
        address: &str,
        amount: &BigDecimal,
        charge_fee: bool,
    ) -> Result<SendReceipt, ChainError> {
        let file = self.nonce.lock().await;

        let epoch = self.rpc.epoch().await?;
        let (send_amount, fee) = if charge_fee {
            (amount - &self.fixed_fees, self.fixed_fees.clone())
        } else {
            (amount.clone(), BigDecimal::from(0))
        };
        if send_amount <= BigDecimal::from(0) {
            return Err(ChainError::Rejected(format!(
                "amount {} does not cover the fee {}",
                amount, fee
            )));
        }

        let reservation = file.reserve(epoch).await?;
        let state = reservation.next;

        let max_fee = max_fee();
        let data = tx::Transfer {
            nonce: state.nonce,
            epoch: state.epoch,
            to: address,
            amount: &send_amount,
            max_fee: &max_fee,
        }
        .data()?;
        let raw = tx::sign(data, &self.signer)?;

        // Persist only once the tx is ready to go out
        file.commit(&reservation).await?;

        info!(
            address = %address,
            amount = %send_amount,
            nonce = state.nonce,
            epoch = state.epoch,
            "Sending Idena tx"
        );

        match self.rpc.send_raw_tx(&raw).await {
            Ok(hash) => Ok(SendReceipt {
                hash: hash.to_lowercase(),
                fee,
            }),
            Err(ChainError::Rejected(message)) => {
                // The node refused it, so the nonce is still free
                warn!(
                    nonce = state.nonce,
                    error = %message,
                    "Idena node rejected tx, restoring nonce"
                );
                file.rollback(&reservation).await?;
                Err(ChainError::Rejected(message))
            }
            Err(e) => Err(e),
        }
    }

    async fn check_sequence_state(&self) -> Result<(), ChainError> {
        let file = self.nonce.lock().await;
        file.read().await.map(|_| ())
    }
}
