//! Swap lifecycle entry points used by the HTTP API
//!
//! Creating a swap and attaching its source transaction happen here; every
//! later transition belongs to the reconciler.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use eyre::{Result, WrapErr};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{NewSwap, Swap, SwapStore};
use crate::evm::EvmLedger;
use crate::idena::IdenaLedger;
use crate::metrics;
use crate::types::{Direction, SwapStatus, Validation};
use crate::units::is_tx_hash;

/// Why an attachment was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("transaction hash is malformed")]
    MalformedHash,
    #[error("swap not found")]
    UnknownSwap,
    #[error("swap already has a transaction or is finished")]
    NotAttachable,
    #[error("transaction does not match the swap")]
    Invalid,
    #[error("transaction was already used")]
    AlreadyUsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Accepted,
    Rejected(RejectReason),
}

pub struct SwapService {
    store: Arc<dyn SwapStore>,
    idena: Arc<dyn IdenaLedger>,
    bsc: Arc<dyn EvmLedger>,
}

impl SwapService {
    pub fn new(
        store: Arc<dyn SwapStore>,
        idena: Arc<dyn IdenaLedger>,
        bsc: Arc<dyn EvmLedger>,
    ) -> Self {
        Self { store, idena, bsc }
    }

    /// Record a new Pending swap; input is validated by the caller
    pub async fn create_swap(
        &self,
        direction: Direction,
        address: &str,
        amount: BigDecimal,
    ) -> Result<Swap> {
        let swap = self
            .store
            .insert_swap(&NewSwap {
                direction,
                address: address.to_string(),
                amount,
            })
            .await
            .wrap_err("Failed to create swap")?;

        metrics::SWAPS_CREATED
            .with_label_values(&[direction.as_str()])
            .inc();
        info!(
            swap_id = %swap.id,
            direction = %direction,
            amount = %swap.amount,
            "Swap created"
        );
        Ok(swap)
    }

    pub async fn get_swap(&self, id: Uuid) -> Result<Option<Swap>> {
        self.store.get_swap(id).await
    }

    pub async fn latest_swaps(&self, limit: i64) -> Result<Vec<Swap>> {
        self.store.latest_swaps(limit).await
    }

    /// Attach the user's source transaction after a cheap sanity check
    ///
    /// Transactions the chain does not know yet are accepted and left to
    /// the reconciler; ones that are visibly wrong or used are refused.
    pub async fn attach_source_tx(&self, id: Uuid, tx_hash: &str) -> Result<AttachOutcome> {
        if !is_tx_hash(tx_hash) {
            return Ok(AttachOutcome::Rejected(RejectReason::MalformedHash));
        }
        let tx_hash = tx_hash.to_lowercase();

        let Some(swap) = self.store.get_swap(id).await? else {
            return Ok(AttachOutcome::Rejected(RejectReason::UnknownSwap));
        };
        if swap.status != SwapStatus::Pending || swap.source_tx.is_some() {
            return Ok(AttachOutcome::Rejected(RejectReason::NotAttachable));
        }

        let validation = self.precheck(&swap, &tx_hash).await;
        match validation {
            Validation::Invalid(reason) => {
                debug!(swap_id = %id, tx_hash = %tx_hash, reason = %reason, "Attachment rejected");
                return Ok(AttachOutcome::Rejected(RejectReason::Invalid));
            }
            Validation::Valid => {
                if self
                    .store
                    .is_claimed(swap.direction.source_chain(), &tx_hash)
                    .await?
                {
                    return Ok(AttachOutcome::Rejected(RejectReason::AlreadyUsed));
                }
            }
            Validation::Retryable => {}
        }

        if !self.store.attach_source_tx(id, &tx_hash).await? {
            return Ok(AttachOutcome::Rejected(RejectReason::NotAttachable));
        }

        info!(swap_id = %id, tx_hash = %tx_hash, "Source tx attached");
        Ok(AttachOutcome::Accepted)
    }

    /// Chain errors and unseen transactions count as `Retryable` here
    async fn precheck(&self, swap: &Swap, tx_hash: &str) -> Validation {
        match swap.direction {
            Direction::IdenaToBsc => match self.idena.get_transaction(tx_hash).await {
                Ok(Some(tx)) => self.idena.validate_incoming(
                    &tx,
                    &swap.address,
                    &swap.amount,
                    swap.created_at,
                ),
                Ok(None) | Err(_) => Validation::Retryable,
            },
            Direction::BscToIdena => self
                .bsc
                .validate_incoming(tx_hash, &swap.address, &swap.amount, swap.created_at)
                .await
                .unwrap_or(Validation::Retryable),
        }
    }

    /// Quote the BSC mint fee; `None` when no exchange rate is available
    pub async fn calculate_fee(&self, address: &str, amount: &BigDecimal) -> Result<Option<BigDecimal>> {
        let quote = self
            .bsc
            .estimate_mint(address, amount)
            .await
            .wrap_err("Failed to estimate mint fee")?;
        Ok(quote.map(|q| q.fee))
    }
}
