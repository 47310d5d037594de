//! Typed BSC JSON-RPC reads
//!
//! Every field a validity check depends on is an `Option` so a missing value
//! can be told apart from a wrong one.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ChainError;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: Option<U64>,
    /// 1 on success, 0 on revert
    pub status: Option<U64>,
    pub from: Option<Address>,
    /// Contract or account called; absent for deployments
    pub to: Option<Address>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(default)]
    pub input: Bytes,
    pub block_number: Option<U64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: Option<U64>,
    pub timestamp: U64,
}

#[derive(Clone)]
pub struct EvmRpc {
    client: Client,
    url: String,
}

impl EvmRpc {
    pub fn new(url: &str) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>, ChainError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<RpcResponse<T>>()
            .await?;

        if let Some(error) = response.error {
            return Err(ChainError::Unavailable(format!(
                "{} error {}: {}",
                method, error.code, error.message
            )));
        }

        Ok(response.result)
    }

    async fn call_required<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        self.call(method, params)
            .await?
            .ok_or_else(|| ChainError::Unavailable(format!("{} returned no result", method)))
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        let id: U64 = self.call_required("eth_chainId", serde_json::json!([])).await?;
        Ok(id.to::<u64>())
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let number: U64 = self.call_required("eth_blockNumber", serde_json::json!([])).await?;
        Ok(number.to::<u64>())
    }

    pub async fn gas_price(&self) -> Result<u128, ChainError> {
        let price: U256 = self.call_required("eth_gasPrice", serde_json::json!([])).await?;
        u128::try_from(price).map_err(|e| ChainError::Decode(format!("gas price: {}", e)))
    }

    pub async fn estimate_gas(&self, from: Address, to: Address, data: &[u8]) -> Result<u64, ChainError> {
        let gas: U64 = self
            .call_required(
                "eth_estimateGas",
                serde_json::json!([{
                    "from": from,
                    "to": to,
                    "data": Bytes::copy_from_slice(data),
                }]),
            )
            .await?;
        Ok(gas.to::<u64>())
    }

    /// Next nonce including transactions still in the mempool
    pub async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        let count: U64 = self
            .call_required(
                "eth_getTransactionCount",
                serde_json::json!([address, "pending"]),
            )
            .await?;
        Ok(count.to::<u64>())
    }

    pub async fn receipt(&self, hash: &str) -> Result<Option<Receipt>, ChainError> {
        self.call("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await
    }

    pub async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, ChainError> {
        self.call("eth_getTransactionByHash", serde_json::json!([hash]))
            .await
    }

    pub async fn block(&self, number: u64) -> Result<Option<Block>, ChainError> {
        self.call(
            "eth_getBlockByNumber",
            serde_json::json!([U64::from(number), false]),
        )
        .await
    }
}
