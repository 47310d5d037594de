use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{Direction, MinedPhase, SwapStatus};

// Enum columns are read as text and parsed through the types' FromStr impls,
// so an unexpected value surfaces as a decode error rather than a panic.

/// Raw `swaps` row
#[derive(Debug, Clone, FromRow)]
pub struct SwapRow {
    pub id: Uuid,
    pub direction: String,
    pub address: String,
    pub amount: BigDecimal,
    pub source_tx: Option<String>,
    pub dest_tx: Option<String>,
    pub status: String,
    pub mined_phase: String,
    pub fail_reason: Option<String>,
    pub fees: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A swap request and its progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Swap {
    pub id: Uuid,
    pub direction: Direction,
    /// Destination identity on the receiving chain
    pub address: String,
    pub amount: BigDecimal,
    pub source_tx: Option<String>,
    pub dest_tx: Option<String>,
    pub status: SwapStatus,
    pub mined_phase: MinedPhase,
    pub fail_reason: Option<String>,
    pub fees: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SwapRow> for Swap {
    type Error = eyre::Report;

    fn try_from(row: SwapRow) -> Result<Self, Self::Error> {
        Ok(Swap {
            id: row.id,
            direction: row.direction.parse()?,
            address: row.address,
            amount: row.amount,
            source_tx: row.source_tx,
            dest_tx: row.dest_tx,
            status: row.status.parse()?,
            mined_phase: row.mined_phase.parse()?,
            fail_reason: row.fail_reason,
            fees: row.fees,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl Swap {
    /// Fresh pending swap, used by the store on insert
    pub fn new(new: &NewSwap, now: DateTime<Utc>) -> Self {
        Swap {
            id: Uuid::new_v4(),
            direction: new.direction,
            address: new.address.clone(),
            amount: new.amount.clone(),
            source_tx: None,
            dest_tx: None,
            status: SwapStatus::Pending,
            mined_phase: MinedPhase::Unset,
            fail_reason: None,
            fees: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state change in memory, mirroring the SQL in `update_swap`
    pub fn apply(&mut self, update: &SwapUpdate, now: DateTime<Utc>) {
        match update {
            SwapUpdate::AwaitingConfirmation => {
                self.mined_phase = MinedPhase::AwaitingConfirmation;
            }
            SwapUpdate::ActionTaken => {
                self.mined_phase = MinedPhase::ActionTaken;
            }
            SwapUpdate::Succeeded { dest_tx, fees } => {
                self.status = SwapStatus::Success;
                self.dest_tx = Some(dest_tx.clone());
                self.fees = Some(fees.clone());
            }
            SwapUpdate::Failed { reason } => {
                self.status = SwapStatus::Fail;
                self.fail_reason = Some(reason.clone());
            }
        }
        self.updated_at = now;
    }
}

/// For inserting new swaps
#[derive(Debug, Clone)]
pub struct NewSwap {
    pub direction: Direction,
    pub address: String,
    pub amount: BigDecimal,
}

/// State transitions the reconciler writes; each only applies to a Pending swap
#[derive(Debug, Clone, PartialEq)]
pub enum SwapUpdate {
    AwaitingConfirmation,
    ActionTaken,
    Succeeded { dest_tx: String, fees: BigDecimal },
    Failed { reason: String },
}

/// Compensation owed on Idena
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct PendingRefund {
    pub id: i64,
    pub address: String,
    pub amount: BigDecimal,
    pub swap_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// For inserting new refunds
#[derive(Debug, Clone)]
pub struct NewRefund {
    pub address: String,
    pub amount: BigDecimal,
    pub swap_id: Option<Uuid>,
}
