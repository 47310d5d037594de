//! Typed Idena node JSON-RPC
//!
//! The node authenticates with an API key carried in the request body.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ChainError;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    id: u64,
    key: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

/// `bcn_transaction` result
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdenaTransaction {
    pub hash: String,
    /// Transaction kind; plain transfers are `send`
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    pub to: Option<String>,
    /// Decimal DNA amount as a string
    pub amount: String,
    /// Hex-encoded payload, `0x` when empty
    pub payload: Option<String>,
    pub block_hash: Option<String>,
    /// Unix seconds; absent or zero until the transaction is in a block
    pub timestamp: Option<i64>,
}

impl IdenaTransaction {
    /// Finalize time when the transaction is mined
    pub fn mined_at(&self) -> Option<i64> {
        self.timestamp.filter(|ts| *ts > 0)
    }
}

#[derive(Debug, Deserialize)]
struct EpochResult {
    epoch: u32,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    nonce: u32,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    height: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncingResult {
    highest_block: u64,
}

/// Thin client over the node's JSON-RPC endpoint
#[derive(Clone)]
pub struct IdenaRpc {
    client: Client,
    url: String,
    api_key: String,
}

impl IdenaRpc {
    pub fn new(url: &str, api_key: &str) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<RpcResponse<T>, ChainError> {
        let body = RpcRequest {
            method,
            id: 1,
            key: &self.api_key,
            params,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<RpcResponse<T>>()
            .await?;

        Ok(response)
    }

    /// Call a method whose result must be present
    async fn call_required<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let response = self.call::<T>(method, params).await?;
        if let Some(error) = response.error {
            return Err(ChainError::Unavailable(format!(
                "{} failed: {}",
                method, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| ChainError::Unavailable(format!("{} returned no result", method)))
    }

    pub async fn epoch(&self) -> Result<u32, ChainError> {
        let result: EpochResult = self.call_required("dna_epoch", Value::Array(vec![])).await?;
        Ok(result.epoch)
    }

    /// Account nonce as the chain sees it
    pub async fn account_nonce(&self, address: &str) -> Result<u32, ChainError> {
        let result: BalanceResult = self
            .call_required("dna_getBalance", serde_json::json!([address]))
            .await?;
        Ok(result.nonce)
    }

    /// `Ok(None)` when the node does not know the hash
    pub async fn transaction(&self, hash: &str) -> Result<Option<IdenaTransaction>, ChainError> {
        let response = self
            .call::<IdenaTransaction>("bcn_transaction", serde_json::json!([hash]))
            .await?;
        if let Some(error) = response.error {
            debug!(tx_hash = %hash, error = %error.message, "Idena transaction lookup returned error");
            return Ok(None);
        }
        Ok(response.result)
    }

    pub async fn block_height(&self, block_hash: &str) -> Result<u64, ChainError> {
        let result: BlockResult = self
            .call_required("bcn_block", serde_json::json!([block_hash]))
            .await?;
        Ok(result.height)
    }

    pub async fn highest_block(&self) -> Result<u64, ChainError> {
        let result: SyncingResult = self
            .call_required("bcn_syncing", Value::Array(vec![]))
            .await?;
        Ok(result.highest_block)
    }

    /// Submit a signed transaction, returning its hash
    pub async fn send_raw_tx(&self, raw: &str) -> Result<String, ChainError> {
        let response = self
            .call::<String>("bcn_sendRawTx", serde_json::json!([raw]))
            .await?;
        if let Some(error) = response.error {
            return Err(ChainError::Rejected(error.message));
        }
        response
            .result
            .ok_or_else(|| ChainError::Rejected(String::new()))
    }
}
