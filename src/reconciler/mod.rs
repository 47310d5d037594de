//! Swap reconciliation loop
//!
//! One pass drains the refund queue, then walks every Pending swap in
//! listing order. The next pass is armed only after the current one has
//! finished, so at most one pass is ever in flight. The used-transaction
//! claim is what keeps a source transaction from being acted on twice,
//! across passes and across processes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::db::{NewRefund, Swap, SwapStore, SwapUpdate};
use crate::error::{is_fatal_report, ChainError};
use crate::evm::EvmLedger;
use crate::idena::IdenaLedger;
use crate::metrics;
use crate::types::{fail_reason, Chain, Direction, MinedPhase, Validation};

mod refunds;

/// A swap without a source transaction fails after this long
pub const SWAP_EXPIRY_HOURS: i64 = 24;

/// What one reconciliation step did to a swap
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing to do yet; look again next pass
    Waiting,
    /// Valid but not deep enough
    AwaitingConfirmation,
    /// Could not price the destination action; left unclaimed
    Unpriced,
    /// Another pass or process owns the source transaction
    ClaimLost,
    /// Swap was no longer Pending when we tried to write
    Skipped,
    Succeeded { dest_tx: String },
    Failed { reason: String },
}

/// Counters for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub refunds_sent: usize,
    pub swaps_seen: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: usize,
}

impl PassSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded { .. } => self.succeeded += 1,
            Outcome::Failed { .. } => self.failed += 1,
            _ => {}
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn SwapStore>,
    idena: Arc<dyn IdenaLedger>,
    bsc: Arc<dyn EvmLedger>,
    poll_interval: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn SwapStore>,
        idena: Arc<dyn IdenaLedger>,
        bsc: Arc<dyn EvmLedger>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            idena,
            bsc,
            poll_interval,
        }
    }

    /// Run passes until shutdown, or until sequence state turns out to be corrupt
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Reconciler starting"
        );

        loop {
            match self.run_pass().await {
                Ok(summary) => {
                    metrics::PASSES_TOTAL.with_label_values(&["ok"]).inc();
                    if summary.swaps_seen > 0 || summary.refunds_sent > 0 {
                        debug!(?summary, "Reconciliation pass finished");
                    }
                }
                Err(e) if is_fatal_report(&e) => {
                    metrics::PASSES_TOTAL.with_label_values(&["fatal"]).inc();
                    error!(error = ?e, "Outgoing sequence state is corrupt, stopping reconciler");
                    return Err(e);
                }
                Err(e) => {
                    metrics::PASSES_TOTAL.with_label_values(&["error"]).inc();
                    metrics::record_error("reconciler");
                    error!(error = %e, "Reconciliation pass failed");
                }
            }

            // Shutdown is only observed between passes
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        Ok(())
    }

    /// One full pass: refunds first, then every Pending swap in order
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let timer = metrics::PASS_DURATION.start_timer();
        let mut summary = PassSummary::default();

        match self.drain_refunds().await {
            Ok(sent) => summary.refunds_sent = sent,
            Err(e) if is_fatal_report(&e) => return Err(e),
            Err(e) => {
                summary.errors += 1;
                metrics::record_error("refunds");
                error!(error = %e, "Failed to drain refund queue");
            }
        }

        let swaps = self.store.list_pending_swaps().await?;
        metrics::PENDING_SWAPS.set(swaps.len() as f64);
        summary.swaps_seen = swaps.len();

        let now = Utc::now();
        for swap in &swaps {
            match self.reconcile_swap(swap, now).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) if is_fatal_report(&e) => return Err(e),
                Err(e) => {
                    summary.errors += 1;
                    metrics::record_error("reconciler");
                    error!(swap_id = %swap.id, error = %e, "Failed to reconcile swap");
                }
            }
        }

        timer.observe_duration();
        Ok(summary)
    }

    /// Advance one swap as far as the chains allow right now
    pub async fn reconcile_swap(&self, swap: &Swap, now: DateTime<Utc>) -> Result<Outcome> {
        if swap.status.is_terminal() {
            return Ok(Outcome::Skipped);
        }

        // The destination action started in an earlier run and we cannot
        // tell whether it landed, so it is never retried.
        if swap.mined_phase == MinedPhase::ActionTaken {
            warn!(
                swap_id = %swap.id,
                source_tx = ?swap.source_tx,
                "Swap was interrupted after its claim, needs manual review"
            );
            return self
                .fail(swap, fail_reason::UNKNOWN, fail_reason::UNKNOWN)
                .await;
        }

        let Some(tx_hash) = swap.source_tx.clone() else {
            return self.expire_if_stale(swap, now).await;
        };

        match swap.direction {
            Direction::IdenaToBsc => self.reconcile_idena_to_bsc(swap, &tx_hash, now).await,
            Direction::BscToIdena => self.reconcile_bsc_to_idena(swap, &tx_hash).await,
        }
    }

    async fn reconcile_idena_to_bsc(
        &self,
        swap: &Swap,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let tx = match self.idena.get_transaction(tx_hash).await {
            Ok(Some(tx)) => tx,
            // Never seen on chain: same deadline as a swap without a tx
            Ok(None) => return self.expire_if_stale(swap, now).await,
            Err(ChainError::Decode(reason)) => {
                info!(swap_id = %swap.id, tx_hash = %tx_hash, reason = %reason, "Idena tx undecodable");
                return self.fail(swap, fail_reason::NOT_VALID, fail_reason::NOT_VALID).await;
            }
            Err(e) => {
                debug!(swap_id = %swap.id, error = %e, "Idena tx lookup failed, will retry");
                return Ok(Outcome::Waiting);
            }
        };

        match self
            .idena
            .validate_incoming(&tx, &swap.address, &swap.amount, swap.created_at)
        {
            Validation::Valid => {}
            Validation::Retryable => return Ok(Outcome::Waiting),
            Validation::Invalid(reason) => {
                info!(swap_id = %swap.id, tx_hash = %tx_hash, reason = %reason, "Idena tx not valid for swap");
                return self.fail(swap, fail_reason::NOT_VALID, fail_reason::NOT_VALID).await;
            }
        }

        if self.store.is_claimed(Chain::Idena, tx_hash).await? {
            info!(swap_id = %swap.id, tx_hash = %tx_hash, "Idena tx already used");
            return self.fail(swap, fail_reason::NOT_VALID, fail_reason::NOT_VALID).await;
        }

        match self.idena.is_confirmed(&tx).await {
            Ok(true) => {}
            Ok(false) => return self.mark_awaiting(swap).await,
            Err(e) => {
                debug!(swap_id = %swap.id, error = %e, "Idena confirmation check failed, will retry");
                return Ok(Outcome::Waiting);
            }
        }

        // Price before claiming so a missing rate leaves the tx usable
        let quote = match self.bsc.estimate_mint(&swap.address, &swap.amount).await {
            Ok(Some(quote)) => quote,
            Ok(None) => return Ok(Outcome::Unpriced),
            Err(e) => {
                warn!(swap_id = %swap.id, error = %e, "Could not price mint, will retry");
                return Ok(Outcome::Unpriced);
            }
        };
        if quote.fee >= quote.amount {
            warn!(
                swap_id = %swap.id,
                fee = %quote.fee,
                amount = %quote.amount,
                "Mint fee exceeds swap amount, holding swap"
            );
            return Ok(Outcome::Unpriced);
        }

        if !self.store.claim(Chain::Idena, tx_hash).await? {
            debug!(swap_id = %swap.id, tx_hash = %tx_hash, "Claim lost");
            return Ok(Outcome::ClaimLost);
        }
        if !self.store.update_swap(swap.id, SwapUpdate::ActionTaken).await? {
            warn!(swap_id = %swap.id, "Swap left Pending after claim");
            return Ok(Outcome::Skipped);
        }

        let nonce = self.bsc.take_nonce_override();
        match self.bsc.mint(&quote, nonce).await {
            Ok(receipt) => {
                info!(
                    swap_id = %swap.id,
                    dest_tx = %receipt.hash,
                    fee = %receipt.fee,
                    "Mint submitted"
                );
                self.succeed(swap, receipt.hash, receipt.fee).await
            }
            Err(e) => {
                error!(swap_id = %swap.id, error = %e, "Mint failed");
                self.fail(swap, &e.fail_reason(), "action").await
            }
        }
    }

    async fn reconcile_bsc_to_idena(&self, swap: &Swap, tx_hash: &str) -> Result<Outcome> {
        let validation = match self
            .bsc
            .validate_incoming(tx_hash, &swap.address, &swap.amount, swap.created_at)
            .await
        {
            Ok(validation) => validation,
            Err(ChainError::Decode(reason)) => Validation::Invalid(reason),
            Err(e) => {
                debug!(swap_id = %swap.id, error = %e, "BSC burn lookup failed, will retry");
                Validation::Retryable
            }
        };

        match validation {
            Validation::Valid => {}
            Validation::Retryable => return Ok(Outcome::Waiting),
            Validation::Invalid(reason) => {
                info!(swap_id = %swap.id, tx_hash = %tx_hash, reason = %reason, "BSC burn not valid for swap");
                return self.fail(swap, fail_reason::NOT_VALID, fail_reason::NOT_VALID).await;
            }
        }

        if self.store.is_claimed(Chain::Bsc, tx_hash).await? {
            info!(swap_id = %swap.id, tx_hash = %tx_hash, "BSC burn already used");
            return self.fail(swap, fail_reason::NOT_VALID, fail_reason::NOT_VALID).await;
        }

        match self.bsc.is_confirmed(tx_hash).await {
            Ok(true) => {}
            Ok(false) => return self.mark_awaiting(swap).await,
            Err(e) => {
                debug!(swap_id = %swap.id, error = %e, "BSC confirmation check failed, will retry");
                return Ok(Outcome::Waiting);
            }
        }

        // Do not consume the burn if the send could not be sequenced anyway
        self.idena.check_sequence_state().await?;

        if !self.store.claim(Chain::Bsc, tx_hash).await? {
            debug!(swap_id = %swap.id, tx_hash = %tx_hash, "Claim lost");
            return Ok(Outcome::ClaimLost);
        }
        if !self.store.update_swap(swap.id, SwapUpdate::ActionTaken).await? {
            warn!(swap_id = %swap.id, "Swap left Pending after claim");
            return Ok(Outcome::Skipped);
        }

        match self.idena.send(&swap.address, &swap.amount, true).await {
            Ok(receipt) => {
                info!(
                    swap_id = %swap.id,
                    dest_tx = %receipt.hash,
                    fee = %receipt.fee,
                    "Idena send submitted"
                );
                self.succeed(swap, receipt.hash, receipt.fee).await
            }
            Err(e) => {
                let reason = e.fail_reason();
                error!(swap_id = %swap.id, error = %e, "Idena send failed, queueing refund");
                let refund = NewRefund {
                    address: swap.address.clone(),
                    amount: swap.amount.clone(),
                    swap_id: Some(swap.id),
                };
                if self.store.fail_with_refund(swap.id, &reason, &refund).await? {
                    metrics::record_outcome(swap.direction.as_str(), "Fail", "action");
                    metrics::record_refund("enqueued");
                } else {
                    warn!(swap_id = %swap.id, "Swap left Pending before failure was recorded");
                }
                if e.is_fatal() {
                    return Err(e.into());
                }
                Ok(Outcome::Failed { reason })
            }
        }
    }

    async fn expire_if_stale(&self, swap: &Swap, now: DateTime<Utc>) -> Result<Outcome> {
        if now - swap.created_at > chrono::Duration::hours(SWAP_EXPIRY_HOURS) {
            info!(swap_id = %swap.id, created_at = %swap.created_at, "Swap expired");
            return self.fail(swap, fail_reason::TIME, fail_reason::TIME).await;
        }
        Ok(Outcome::Waiting)
    }

    async fn mark_awaiting(&self, swap: &Swap) -> Result<Outcome> {
        if swap.mined_phase != MinedPhase::AwaitingConfirmation {
            self.store
                .update_swap(swap.id, SwapUpdate::AwaitingConfirmation)
                .await?;
        }
        Ok(Outcome::AwaitingConfirmation)
    }

    async fn succeed(
        &self,
        swap: &Swap,
        dest_tx: String,
        fees: bigdecimal::BigDecimal,
    ) -> Result<Outcome> {
        let update = SwapUpdate::Succeeded {
            dest_tx: dest_tx.clone(),
            fees,
        };
        if !self.store.update_swap(swap.id, update).await? {
            warn!(swap_id = %swap.id, dest_tx = %dest_tx, "Swap left Pending before success was recorded");
            return Ok(Outcome::Skipped);
        }
        metrics::record_outcome(swap.direction.as_str(), "Success", "");
        Ok(Outcome::Succeeded { dest_tx })
    }

    /// `label` keeps the metric's reason cardinality bounded
    async fn fail(&self, swap: &Swap, reason: &str, label: &str) -> Result<Outcome> {
        let update = SwapUpdate::Failed {
            reason: reason.to_string(),
        };
        if !self.store.update_swap(swap.id, update).await? {
            return Ok(Outcome::Skipped);
        }
        metrics::record_outcome(swap.direction.as_str(), "Fail", label);
        Ok(Outcome::Failed {
            reason: reason.to_string(),
        })
    }
}
