//! Persisted outgoing sequence state for the bridge's Idena account
//!
//! `nonce.json` holds the last nonce used and the epoch it belongs to. It is
//! the only source of truth for the next nonce and must survive restarts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ChainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    pub nonce: u32,
    pub epoch: u32,
}

impl SequenceState {
    /// State for the next send given the chain's current epoch
    pub fn next(self, chain_epoch: u32) -> Result<SequenceState, ChainError> {
        if chain_epoch > self.epoch {
            return Ok(SequenceState {
                nonce: 1,
                epoch: chain_epoch,
            });
        }
        let nonce = self.nonce.checked_add(1).ok_or_else(|| {
            ChainError::SequenceState(format!("nonce {} cannot be incremented", self.nonce))
        })?;
        Ok(SequenceState {
            nonce,
            epoch: self.epoch,
        })
    }
}

/// A nonce picked for one send, with the state to return to if it is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub previous: SequenceState,
    pub next: SequenceState,
}

/// Handle on `nonce.json`; callers serialize access through a mutex
#[derive(Debug)]
pub struct NonceFile {
    path: PathBuf,
}

impl NonceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    pub async fn read(&self) -> Result<SequenceState, ChainError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ChainError::SequenceState(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ChainError::SequenceState(format!("cannot parse {}: {}", self.path.display(), e))
        })
    }

    /// Replace the file through a temp file and rename so a crash never leaves it half-written
    pub async fn write(&self, state: SequenceState) -> Result<(), ChainError> {
        let body = serde_json::to_string(&state)
            .map_err(|e| ChainError::SequenceState(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(|e| {
            ChainError::SequenceState(format!("cannot write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            ChainError::SequenceState(format!("cannot replace {}: {}", self.path.display(), e))
        })
    }

    /// Create the file with the given state unless one exists already
    pub async fn init(&self, state: SequenceState) -> Result<bool, ChainError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !tokio::fs::try_exists(dir).await.unwrap_or(false) {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    ChainError::SequenceState(format!("cannot create {}: {}", dir.display(), e))
                })?;
                info!(dir = %dir.display(), "Created directory for nonce file");
            }
        }
        if self.exists().await {
            return Ok(false);
        }
        self.write(state).await?;
        Ok(true)
    }

    /// Pick the next nonce without persisting it
    ///
    /// Nothing is written until `commit`, so a send abandoned before
    /// submission leaves the file as it was.
    pub async fn reserve(&self, chain_epoch: u32) -> Result<Reservation, ChainError> {
        let previous = self.read().await?;
        let next = previous.next(chain_epoch)?;
        Ok(Reservation { previous, next })
    }

    /// Persist a reserved nonce; call right before submission
    pub async fn commit(&self, reservation: &Reservation) -> Result<(), ChainError> {
        self.write(reservation.next).await
    }

    /// Put back the state a committed reservation replaced
    pub async fn rollback(&self, reservation: &Reservation) -> Result<(), ChainError> {
        self.write(reservation.previous).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "idena-bridge-nonce-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("nonce.json");
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_next_within_epoch() {
        let state = SequenceState { nonce: 4, epoch: 10 };
        assert_eq!(state.next(10).unwrap(), SequenceState { nonce: 5, epoch: 10 });
    }

    #[test]
    fn test_next_resets_on_new_epoch() {
        let state = SequenceState { nonce: 42, epoch: 10 };
        assert_eq!(state.next(11).unwrap(), SequenceState { nonce: 1, epoch: 11 });
    }

    #[test]
    fn test_next_ignores_older_chain_epoch() {
        let state = SequenceState { nonce: 3, epoch: 10 };
        assert_eq!(state.next(9).unwrap(), SequenceState { nonce: 4, epoch: 10 });
    }

    #[test]
    fn test_next_overflow_is_fatal() {
        let state = SequenceState {
            nonce: u32::MAX,
            epoch: 10,
        };
        assert!(state.next(10).unwrap_err().is_fatal());
        // A new epoch still resets cleanly
        assert_eq!(state.next(11).unwrap().nonce, 1);
    }

    #[tokio::test]
    async fn test_committed_reservations_have_no_gaps() {
        let file = NonceFile::new(temp_path("gaps"));
        assert!(file.init(SequenceState { nonce: 7, epoch: 3 }).await.unwrap());

        let first = file.reserve(3).await.unwrap();
        file.commit(&first).await.unwrap();
        let second = file.reserve(3).await.unwrap();
        file.commit(&second).await.unwrap();

        assert_eq!(first.next.nonce, 8);
        assert_eq!(second.next.nonce, 9);
        assert_eq!(file.read().await.unwrap(), SequenceState { nonce: 9, epoch: 3 });
    }

    #[tokio::test]
    async fn test_reserve_does_not_write() {
        let file = NonceFile::new(temp_path("reserve"));
        file.write(SequenceState { nonce: 7, epoch: 3 }).await.unwrap();

        let reservation = file.reserve(3).await.unwrap();
        assert_eq!(reservation.next.nonce, 8);
        assert_eq!(file.read().await.unwrap().nonce, 7);

        // Reserving again without a commit yields the same nonce
        assert_eq!(file.reserve(3).await.unwrap(), reservation);
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_state() {
        let file = NonceFile::new(temp_path("rollback"));
        file.write(SequenceState { nonce: 7, epoch: 3 }).await.unwrap();

        let reservation = file.reserve(4).await.unwrap();
        file.commit(&reservation).await.unwrap();
        assert_eq!(file.read().await.unwrap(), SequenceState { nonce: 1, epoch: 4 });

        file.rollback(&reservation).await.unwrap();
        assert_eq!(file.read().await.unwrap(), SequenceState { nonce: 7, epoch: 3 });
    }

    #[tokio::test]
    async fn test_init_keeps_existing_file() {
        let file = NonceFile::new(temp_path("keep"));
        file.write(SequenceState { nonce: 12, epoch: 4 }).await.unwrap();
        assert!(!file.init(SequenceState { nonce: 0, epoch: 4 }).await.unwrap());
        assert_eq!(file.read().await.unwrap().nonce, 12);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_fatal() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not json").unwrap();
        let file = NonceFile::new(path);
        let err = file.reserve(1).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let file = NonceFile::new(temp_path("missing"));
        assert!(file.read().await.unwrap_err().is_fatal());
    }
}
