//! Common types shared by the chain adapters, the store and the reconciler
//!
//! Enums are persisted as short strings; `as_str`/`FromStr` are the single
//! source of truth for the stored spelling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which way value moves across the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// User sends DNA to the bridge wallet, bridge mints wrapped IDNA on BSC
    IdenaToBsc,
    /// User burns wrapped IDNA on BSC, bridge sends DNA on Idena
    BscToIdena,
}

impl Direction {
    /// Numeric code used by the public API (`type` field)
    pub fn code(&self) -> i16 {
        match self {
            Direction::IdenaToBsc => 0,
            Direction::BscToIdena => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Direction::IdenaToBsc),
            1 => Some(Direction::BscToIdena),
            _ => None,
        }
    }

    /// Chain the user-submitted transaction lives on
    pub fn source_chain(&self) -> Chain {
        match self {
            Direction::IdenaToBsc => Chain::Idena,
            Direction::BscToIdena => Chain::Bsc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::IdenaToBsc => "idena_to_bsc",
            Direction::BscToIdena => "bsc_to_idena",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idena_to_bsc" => Ok(Direction::IdenaToBsc),
            "bsc_to_idena" => Ok(Direction::BscToIdena),
            other => Err(eyre::eyre!("unknown swap direction: {}", other)),
        }
    }
}

/// Lifecycle status of a swap. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapStatus {
    Pending,
    Success,
    Fail,
}

impl SwapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Pending => "Pending",
            SwapStatus::Success => "Success",
            SwapStatus::Fail => "Fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SwapStatus::Pending)
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SwapStatus {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SwapStatus::Pending),
            "Success" => Ok(SwapStatus::Success),
            "Fail" => Ok(SwapStatus::Fail),
            other => Err(eyre::eyre!("unknown swap status: {}", other)),
        }
    }
}

/// How far the destination-side action has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinedPhase {
    Unset,
    /// Source transaction is valid but not deep enough yet
    AwaitingConfirmation,
    /// Claim taken and the destination send was started
    ActionTaken,
}

impl MinedPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MinedPhase::Unset => "unset",
            MinedPhase::AwaitingConfirmation => "awaiting_confirmation",
            MinedPhase::ActionTaken => "action_taken",
        }
    }
}

impl fmt::Display for MinedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MinedPhase {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(MinedPhase::Unset),
            "awaiting_confirmation" => Ok(MinedPhase::AwaitingConfirmation),
            "action_taken" => Ok(MinedPhase::ActionTaken),
            other => Err(eyre::eyre!("unknown mined phase: {}", other)),
        }
    }
}

/// Chain namespace for the used-transaction ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Idena,
    Bsc,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Idena => "idena",
            Chain::Bsc => "bsc",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fail reasons written to `swaps.fail_reason`
pub mod fail_reason {
    /// No source transaction showed up within the expiry window
    pub const TIME: &str = "Time";
    /// Source transaction is wrong or was already used
    pub const NOT_VALID: &str = "NotValid";
    /// Destination action failed without a chain-reported message
    pub const UNKNOWN: &str = "Unknown";
}

/// Outcome of checking an incoming transaction against a swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Transaction matches the swap
    Valid,
    /// Transaction is definitively wrong for this swap
    Invalid(String),
    /// Some artifact is not visible yet; check again on a later pass
    Retryable,
}

impl Validation {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Validation::Invalid(reason.into())
    }
}
