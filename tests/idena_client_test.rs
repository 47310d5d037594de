//! Outgoing Idena sends against a local JSON-RPC node
//!
//! Run with: cargo test --test idena_client_test

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::{extract::State, routing::post, Json, Router};
use bigdecimal::BigDecimal;
use prost::Message;
use serde_json::{json, Value};

use idena_bridge::config::IdenaConfig;
use idena_bridge::error::ChainError;
use idena_bridge::idena::tx::{ProtoTransaction, TransactionData};
use idena_bridge::idena::{IdenaClient, IdenaLedger, NonceFile, SequenceState};
use idena_bridge::units::to_base_unit_bytes;

const BRIDGE_KEY: &str = "0x4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d";
const RECIPIENT: &str = "0x3333333333333333333333333333333333333333";

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// Scripted node answering the handful of methods a send needs
#[derive(Default)]
struct MockNode {
    epoch: AtomicU32,
    reject: Mutex<Option<String>>,
    raw_txs: Mutex<Vec<String>>,
}

impl MockNode {
    fn submitted(&self) -> Vec<TransactionData> {
        self.raw_txs
            .lock()
            .unwrap()
            .iter()
            .map(|raw| {
                let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
                ProtoTransaction::decode(bytes.as_slice())
                    .unwrap()
                    .data
                    .unwrap()
            })
            .collect()
    }
}

async fn rpc(State(node): State<Arc<MockNode>>, Json(req): Json<Value>) -> Json<Value> {
    let method = req["method"].as_str().unwrap_or_default();
    let body = match method {
        "dna_epoch" => json!({ "id": 1, "result": { "epoch": node.epoch.load(Ordering::SeqCst) } }),
        "bcn_sendRawTx" => {
            if let Some(message) = node.reject.lock().unwrap().clone() {
                json!({ "id": 1, "error": { "message": message } })
            } else {
                let raw = req["params"][0].as_str().unwrap_or_default().to_string();
                let mut txs = node.raw_txs.lock().unwrap();
                txs.push(raw);
                json!({ "id": 1, "result": format!("0x{:064X}", txs.len()) })
            }
        }
        _ => json!({ "id": 1, "error": { "message": "method not available" } }),
    };
    Json(body)
}

async fn start_node(epoch: u32) -> (Arc<MockNode>, String) {
    let node = Arc::new(MockNode::default());
    node.epoch.store(epoch, Ordering::SeqCst);

    let app = Router::new().route("/", post(rpc)).with_state(node.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (node, format!("http://{}/", addr))
}

fn nonce_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "idena-bridge-send-{}-{}",
        name,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let _ = std::fs::remove_file(dir.join("nonce.json"));
    dir
}

/// Client with `nonce.json` seeded at {nonce: 7, epoch: 5}
async fn client(name: &str, provider: &str) -> (IdenaClient, NonceFile) {
    let config = IdenaConfig {
        provider: provider.to_string(),
        api_key: "test".to_string(),
        private_key: BRIDGE_KEY.to_string(),
        fixed_fees: dec("0.5"),
        confirmation_blocks: 2,
        nonce_dir: nonce_dir(name),
    };
    let file = NonceFile::new(config.nonce_file());
    file.write(SequenceState { nonce: 7, epoch: 5 }).await.unwrap();
    (IdenaClient::new(&config).unwrap(), file)
}

#[tokio::test]
async fn test_back_to_back_sends_use_consecutive_nonces() {
    let (node, url) = start_node(5).await;
    let (client, file) = client("consecutive", &url).await;

    let first = client.send(RECIPIENT, &dec("10"), false).await.unwrap();
    let second = client.send(RECIPIENT, &dec("10"), false).await.unwrap();

    assert_ne!(first.hash, second.hash);
    assert_eq!(first.hash, first.hash.to_lowercase());
    let nonces: Vec<u32> = node.submitted().iter().map(|d| d.nonce).collect();
    assert_eq!(nonces, vec![8, 9]);
    assert_eq!(file.read().await.unwrap(), SequenceState { nonce: 9, epoch: 5 });
}

#[tokio::test]
async fn test_new_epoch_restarts_nonce() {
    let (node, url) = start_node(6).await;
    let (client, file) = client("epoch", &url).await;

    client.send(RECIPIENT, &dec("1"), false).await.unwrap();

    let sent = node.submitted();
    assert_eq!(sent[0].nonce, 1);
    assert_eq!(sent[0].epoch, 6);
    assert_eq!(file.read().await.unwrap(), SequenceState { nonce: 1, epoch: 6 });
}

#[tokio::test]
async fn test_rejected_send_restores_nonce() {
    let (node, url) = start_node(5).await;
    let (client, file) = client("rejected", &url).await;
    *node.reject.lock().unwrap() = Some("insufficient funds".to_string());

    let err = client.send(RECIPIENT, &dec("10"), false).await.unwrap_err();
    assert!(matches!(err, ChainError::Rejected(ref m) if m == "insufficient funds"));
    assert_eq!(file.read().await.unwrap(), SequenceState { nonce: 7, epoch: 5 });

    *node.reject.lock().unwrap() = None;
    client.send(RECIPIENT, &dec("10"), false).await.unwrap();
    assert_eq!(node.submitted()[0].nonce, 8);
}

#[tokio::test]
async fn test_unencodable_destination_keeps_nonce() {
    let (node, url) = start_node(5).await;
    let (client, file) = client("bad-destination", &url).await;

    let err = client.send("abc123", &dec("10"), false).await.unwrap_err();

    assert!(matches!(err, ChainError::Decode(_)));
    assert_eq!(file.read().await.unwrap(), SequenceState { nonce: 7, epoch: 5 });
    assert!(node.submitted().is_empty());

    // The next good send takes the nonce the failed one never used
    client.send(RECIPIENT, &dec("10"), false).await.unwrap();
    assert_eq!(node.submitted()[0].nonce, 8);
}

#[tokio::test]
async fn test_fixed_fee_deducted_from_user_sends() {
    let (node, url) = start_node(5).await;
    let (client, _file) = client("fee", &url).await;

    let receipt = client.send(RECIPIENT, &dec("10"), true).await.unwrap();
    let refund = client.send(RECIPIENT, &dec("10"), false).await.unwrap();

    assert_eq!(receipt.fee, dec("0.5"));
    assert_eq!(refund.fee, BigDecimal::from(0));
    let sent = node.submitted();
    assert_eq!(sent[0].amount, to_base_unit_bytes(&dec("9.5")).unwrap());
    assert_eq!(sent[1].amount, to_base_unit_bytes(&dec("10")).unwrap());
    assert_eq!(sent[0].to, hex::decode(&RECIPIENT[2..]).unwrap());
}

#[tokio::test]
async fn test_amount_not_covering_fee_is_rejected() {
    let (node, url) = start_node(5).await;
    let (client, file) = client("below-fee", &url).await;

    let err = client.send(RECIPIENT, &dec("0.5"), true).await.unwrap_err();

    assert!(matches!(err, ChainError::Rejected(_)));
    assert!(node.submitted().is_empty());
    assert_eq!(file.read().await.unwrap(), SequenceState { nonce: 7, epoch: 5 });
}

#[tokio::test]
async fn test_corrupt_nonce_file_blocks_sends() {
    let (node, url) = start_node(5).await;
    let (client, file) = client("corrupt", &url).await;
    std::fs::write(file.path(), "{\"nonce\":").unwrap();

    let err = client.send(RECIPIENT, &dec("10"), false).await.unwrap_err();

    assert!(err.is_fatal());
    assert!(client.check_sequence_state().await.unwrap_err().is_fatal());
    assert!(node.submitted().is_empty());
}
