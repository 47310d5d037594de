//! Refund queue draining
//!
//! A refund row is deleted before its send is attempted: a crash in between
//! drops the refund instead of paying it twice. A failed send is logged and
//! not re-queued, so the operator has to settle it by hand.

use eyre::Result;
use tracing::{error, info, warn};

use super::Reconciler;
use crate::db::PendingRefund;
use crate::error::is_fatal_report;
use crate::metrics;

impl Reconciler {
    /// Attempt every queued refund once; returns how many were sent
    pub async fn drain_refunds(&self) -> Result<usize> {
        let refunds = self.store.list_pending_refunds().await?;
        let mut sent = 0;

        for refund in &refunds {
            match self.process_refund(refund).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) if is_fatal_report(&e) => return Err(e),
                Err(e) => {
                    metrics::record_error("refunds");
                    error!(refund_id = refund.id, error = %e, "Failed to process refund");
                }
            }
        }

        Ok(sent)
    }

    async fn process_refund(&self, refund: &PendingRefund) -> Result<bool> {
        // Refuse to dequeue anything while the nonce file is unusable
        self.idena.check_sequence_state().await?;

        if !self.store.delete_refund(refund.id).await? {
            return Ok(false);
        }

        match self.idena.send(&refund.address, &refund.amount, false).await {
            Ok(receipt) => {
                metrics::record_refund("sent");
                info!(
                    refund_id = refund.id,
                    swap_id = ?refund.swap_id,
                    address = %refund.address,
                    amount = %refund.amount,
                    tx_hash = %receipt.hash,
                    "Refund sent"
                );
                Ok(true)
            }
            Err(e) => {
                metrics::record_refund("dropped");
                warn!(
                    refund_id = refund.id,
                    swap_id = ?refund.swap_id,
                    address = %refund.address,
                    amount = %refund.amount,
                    error = %e,
                    "Refund send failed, record dropped; settle manually"
                );
                if e.is_fatal() {
                    return Err(e.into());
                }
                Ok(false)
            }
        }
    }
}
