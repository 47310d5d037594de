//! In-memory store and scripted chain adapters for driving the reconciler
//! and the swap service without Postgres or live nodes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use eyre::Result;
use uuid::Uuid;

use idena_bridge::db::{NewRefund, NewSwap, PendingRefund, Swap, SwapStore, SwapUpdate};
use idena_bridge::error::ChainError;
use idena_bridge::evm::{EvmLedger, MintQuote, MintReceipt};
use idena_bridge::idena::{IdenaLedger, IdenaTransaction, SendReceipt, PAYLOAD_PREFIX};
use idena_bridge::types::{Chain, Direction, Validation};

pub const BRIDGE: &str = "0x2222222222222222222222222222222222222222";
pub const USER: &str = "0xabcdef0000000000000000000000000000000001";

/// Ordered record of side effects shared between the fakes
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn tx_hash(n: u8) -> String {
    format!("0x{}", hex::encode([n; 32]))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    swaps: Mutex<Vec<Swap>>,
    claims: Mutex<HashSet<(Chain, String)>>,
    refunds: Mutex<Vec<PendingRefund>>,
    next_refund_id: AtomicI64,
    journal: Journal,
}

impl MemoryStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    /// Seed a swap created `age` ago, optionally with its source tx attached
    pub fn seed(
        &self,
        direction: Direction,
        amount: &str,
        source_tx: Option<String>,
        age: Duration,
    ) -> Swap {
        let created = Utc::now() - age;
        let mut swap = Swap::new(
            &NewSwap {
                direction,
                address: USER.to_string(),
                amount: dec(amount),
            },
            created,
        );
        swap.source_tx = source_tx;
        self.swaps.lock().unwrap().push(swap.clone());
        swap
    }

    pub fn put(&self, swap: Swap) {
        let mut swaps = self.swaps.lock().unwrap();
        swaps.retain(|s| s.id != swap.id);
        swaps.push(swap);
    }

    pub fn swap(&self, id: Uuid) -> Swap {
        self.swaps
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .unwrap()
    }

    pub fn refunds(&self) -> Vec<PendingRefund> {
        self.refunds.lock().unwrap().clone()
    }

    pub fn claimed(&self, chain: Chain, hash: &str) -> bool {
        self.claims
            .lock()
            .unwrap()
            .contains(&(chain, hash.to_lowercase()))
    }

    pub fn preclaim(&self, chain: Chain, hash: &str) {
        self.claims
            .lock()
            .unwrap()
            .insert((chain, hash.to_lowercase()));
    }

    fn log(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    fn push_refund(&self, refund: &NewRefund) -> i64 {
        let id = self.next_refund_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.refunds.lock().unwrap().push(PendingRefund {
            id,
            address: refund.address.clone(),
            amount: refund.amount.clone(),
            swap_id: refund.swap_id,
            created_at: Utc::now(),
        });
        id
    }
}

#[async_trait]
impl SwapStore for MemoryStore {
    async fn list_pending_swaps(&self) -> Result<Vec<Swap>> {
        let mut swaps: Vec<Swap> = self
            .swaps
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect();
        swaps.sort_by_key(|s| s.created_at);
        Ok(swaps)
    }

    async fn get_swap(&self, id: Uuid) -> Result<Option<Swap>> {
        Ok(self
            .swaps
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn insert_swap(&self, swap: &NewSwap) -> Result<Swap> {
        let swap = Swap::new(swap, Utc::now());
        self.swaps.lock().unwrap().push(swap.clone());
        Ok(swap)
    }

    async fn latest_swaps(&self, limit: i64) -> Result<Vec<Swap>> {
        let mut swaps = self.swaps.lock().unwrap().clone();
        swaps.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        swaps.truncate(limit as usize);
        Ok(swaps)
    }

    async fn attach_source_tx(&self, id: Uuid, tx_hash: &str) -> Result<bool> {
        let mut swaps = self.swaps.lock().unwrap();
        match swaps
            .iter_mut()
            .find(|s| s.id == id && !s.status.is_terminal() && s.source_tx.is_none())
        {
            Some(swap) => {
                swap.source_tx = Some(tx_hash.to_lowercase());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_swap(&self, id: Uuid, update: SwapUpdate) -> Result<bool> {
        let mut swaps = self.swaps.lock().unwrap();
        match swaps
            .iter_mut()
            .find(|s| s.id == id && !s.status.is_terminal())
        {
            Some(swap) => {
                swap.apply(&update, Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_claimed(&self, chain: Chain, tx_hash: &str) -> Result<bool> {
        Ok(self.claimed(chain, tx_hash))
    }

    async fn claim(&self, chain: Chain, tx_hash: &str) -> Result<bool> {
        let inserted = self
            .claims
            .lock()
            .unwrap()
            .insert((chain, tx_hash.to_lowercase()));
        if inserted {
            self.log(format!("claim:{}", tx_hash.to_lowercase()));
        }
        Ok(inserted)
    }

    async fn list_pending_refunds(&self) -> Result<Vec<PendingRefund>> {
        Ok(self.refunds())
    }

    async fn delete_refund(&self, id: i64) -> Result<bool> {
        let mut refunds = self.refunds.lock().unwrap();
        let before = refunds.len();
        refunds.retain(|r| r.id != id);
        let removed = refunds.len() < before;
        drop(refunds);
        if removed {
            self.log(format!("delete_refund:{}", id));
        }
        Ok(removed)
    }

    async fn insert_refund(&self, refund: &NewRefund) -> Result<i64> {
        Ok(self.push_refund(refund))
    }

    async fn fail_with_refund(&self, id: Uuid, reason: &str, refund: &NewRefund) -> Result<bool> {
        let failed = self
            .update_swap(
                id,
                SwapUpdate::Failed {
                    reason: reason.to_string(),
                },
            )
            .await?;
        if failed {
            self.push_refund(refund);
        }
        Ok(failed)
    }
}

// ---------------------------------------------------------------------------
// Idena
// ---------------------------------------------------------------------------

pub fn incoming_tx(hash: &str, destination: &str, amount: &str, mined_at: i64) -> IdenaTransaction {
    IdenaTransaction {
        hash: hash.to_string(),
        kind: "send".to_string(),
        from: "0x1111111111111111111111111111111111111111".to_string(),
        to: Some(BRIDGE.to_string()),
        amount: amount.to_string(),
        payload: Some(format!(
            "0x{}",
            hex::encode(format!("{}{}", PAYLOAD_PREFIX, destination))
        )),
        block_hash: Some("0xb10c".to_string()),
        timestamp: Some(mined_at),
    }
}

pub struct FakeIdena {
    txs: Mutex<HashMap<String, IdenaTransaction>>,
    lookup_error: Mutex<Option<ChainError>>,
    confirmed: AtomicBool,
    send_error: Mutex<Option<ChainError>>,
    sequence_error: Mutex<Option<ChainError>>,
    sends: Mutex<Vec<(String, BigDecimal, bool)>>,
    journal: Journal,
}

impl FakeIdena {
    pub fn new(journal: Journal) -> Self {
        Self {
            txs: Mutex::new(HashMap::new()),
            lookup_error: Mutex::new(None),
            confirmed: AtomicBool::new(true),
            send_error: Mutex::new(None),
            sequence_error: Mutex::new(None),
            sends: Mutex::new(Vec::new()),
            journal,
        }
    }

    pub fn add_tx(&self, tx: IdenaTransaction) {
        self.txs.lock().unwrap().insert(tx.hash.to_lowercase(), tx);
    }

    pub fn fail_lookups(&self, error: Option<ChainError>) {
        *self.lookup_error.lock().unwrap() = error;
    }

    pub fn set_confirmed(&self, confirmed: bool) {
        self.confirmed.store(confirmed, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, error: Option<ChainError>) {
        *self.send_error.lock().unwrap() = error;
    }

    pub fn corrupt_sequence(&self, error: Option<ChainError>) {
        *self.sequence_error.lock().unwrap() = error;
    }

    pub fn sends(&self) -> Vec<(String, BigDecimal, bool)> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdenaLedger for FakeIdena {
    fn bridge_address(&self) -> &str {
        BRIDGE
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<IdenaTransaction>, ChainError> {
        if let Some(e) = self.lookup_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.txs.lock().unwrap().get(&hash.to_lowercase()).cloned())
    }

    async fn is_confirmed(&self, _tx: &IdenaTransaction) -> Result<bool, ChainError> {
        Ok(self.confirmed.load(Ordering::SeqCst))
    }

    async fn send(
        &self,
        address: &str,
        amount: &BigDecimal,
        charge_fee: bool,
    ) -> Result<SendReceipt, ChainError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("send:{}:{}", address, amount));
        self.sends
            .lock()
            .unwrap()
            .push((address.to_string(), amount.clone(), charge_fee));
        if let Some(e) = self.send_error.lock().unwrap().clone() {
            return Err(e);
        }
        let count = self.sends.lock().unwrap().len();
        Ok(SendReceipt {
            hash: format!("0x{:064x}", count),
            fee: if charge_fee { dec("0.5") } else { dec("0") },
        })
    }

    async fn check_sequence_state(&self) -> Result<(), ChainError> {
        match self.sequence_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// BSC
// ---------------------------------------------------------------------------

pub struct FakeBsc {
    validation: Mutex<Result<Validation, ChainError>>,
    confirmed: AtomicBool,
    fee: Mutex<Option<BigDecimal>>,
    mint_error: Mutex<Option<ChainError>>,
    mints: Mutex<Vec<(MintQuote, Option<u64>)>>,
    nonce_override: Mutex<Option<u64>>,
}

impl FakeBsc {
    pub fn new() -> Self {
        Self {
            validation: Mutex::new(Ok(Validation::Valid)),
            confirmed: AtomicBool::new(true),
            fee: Mutex::new(Some(dec("0.25"))),
            mint_error: Mutex::new(None),
            mints: Mutex::new(Vec::new()),
            nonce_override: Mutex::new(None),
        }
    }

    pub fn set_validation(&self, validation: Result<Validation, ChainError>) {
        *self.validation.lock().unwrap() = validation;
    }

    pub fn set_confirmed(&self, confirmed: bool) {
        self.confirmed.store(confirmed, Ordering::SeqCst);
    }

    /// `None` simulates an unavailable exchange rate
    pub fn set_fee(&self, fee: Option<BigDecimal>) {
        *self.fee.lock().unwrap() = fee;
    }

    pub fn fail_mints(&self, error: Option<ChainError>) {
        *self.mint_error.lock().unwrap() = error;
    }

    pub fn arm_nonce_override(&self, nonce: u64) {
        *self.nonce_override.lock().unwrap() = Some(nonce);
    }

    pub fn mints(&self) -> Vec<(MintQuote, Option<u64>)> {
        self.mints.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvmLedger for FakeBsc {
    async fn validate_incoming(
        &self,
        _tx_hash: &str,
        _expected_address: &str,
        _expected_amount: &BigDecimal,
        _not_before: DateTime<Utc>,
    ) -> Result<Validation, ChainError> {
        self.validation.lock().unwrap().clone()
    }

    async fn is_confirmed(&self, _tx_hash: &str) -> Result<bool, ChainError> {
        Ok(self.confirmed.load(Ordering::SeqCst))
    }

    async fn estimate_mint(
        &self,
        address: &str,
        amount: &BigDecimal,
    ) -> Result<Option<MintQuote>, ChainError> {
        Ok(self.fee.lock().unwrap().clone().map(|fee| MintQuote {
            address: address.to_string(),
            amount: amount.clone(),
            fee,
            gas_price: 5_000_000_000,
            gas_limit: 100_000,
        }))
    }

    async fn mint(
        &self,
        quote: &MintQuote,
        nonce_override: Option<u64>,
    ) -> Result<MintReceipt, ChainError> {
        self.mints
            .lock()
            .unwrap()
            .push((quote.clone(), nonce_override));
        if let Some(e) = self.mint_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(MintReceipt {
            hash: tx_hash(0xee),
            nonce: nonce_override,
            fee: quote.fee.clone(),
        })
    }

    fn take_nonce_override(&self) -> Option<u64> {
        self.nonce_override.lock().unwrap().take()
    }
}

/// Store and fakes wired together around one journal
pub struct Harness {
    pub journal: Journal,
    pub store: Arc<MemoryStore>,
    pub idena: Arc<FakeIdena>,
    pub bsc: Arc<FakeBsc>,
}

impl Harness {
    pub fn new() -> Self {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        Self {
            store: Arc::new(MemoryStore::new(journal.clone())),
            idena: Arc::new(FakeIdena::new(journal.clone())),
            bsc: Arc::new(FakeBsc::new()),
            journal,
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}
