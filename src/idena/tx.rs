//! Idena transaction encoding and signing
//!
//! Transactions are protobuf messages; the signature is a recoverable
//! secp256k1 signature over keccak256 of the encoded `data` field.

use std::str::FromStr;

use alloy::primitives::{keccak256, Address};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use bigdecimal::BigDecimal;
use prost::Message;

use crate::error::ChainError;
use crate::units::to_base_unit_bytes;

/// Plain value transfer
pub const SEND_TX: u32 = 0;

#[derive(Clone, PartialEq, Message)]
pub struct TransactionData {
    #[prost(uint32, tag = "1")]
    pub nonce: u32,
    #[prost(uint32, tag = "2")]
    pub epoch: u32,
    #[prost(uint32, tag = "3")]
    pub kind: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub to: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub amount: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub max_fee: Vec<u8>,
    #[prost(bytes = "vec", tag = "7")]
    pub tips: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoTransaction {
    #[prost(message, optional, tag = "1")]
    pub data: Option<TransactionData>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Fields of an outgoing transfer
#[derive(Debug, Clone)]
pub struct Transfer<'a> {
    pub nonce: u32,
    pub epoch: u32,
    pub to: &'a str,
    pub amount: &'a BigDecimal,
    pub max_fee: &'a BigDecimal,
}

impl Transfer<'_> {
    pub fn data(&self) -> Result<TransactionData, ChainError> {
        let to = Address::from_str(self.to)
            .map_err(|e| ChainError::Decode(format!("bad idena address {}: {}", self.to, e)))?;

        Ok(TransactionData {
            nonce: self.nonce,
            epoch: self.epoch,
            kind: SEND_TX,
            to: to.to_vec(),
            amount: to_base_unit_bytes(self.amount)?,
            max_fee: to_base_unit_bytes(self.max_fee)?,
            tips: Vec::new(),
            payload: Vec::new(),
        })
    }
}

/// Sign transaction data, returning the `0x`-prefixed hex accepted by `bcn_sendRawTx`
pub fn sign(data: TransactionData, signer: &PrivateKeySigner) -> Result<String, ChainError> {
    let hash = keccak256(data.encode_to_vec());
    let signature = signer
        .sign_hash_sync(&hash)
        .map_err(|e| ChainError::Decode(format!("signing failed: {}", e)))?;

    // r || s || recovery id; the node expects 0/1 rather than 27/28
    let mut bytes = signature.as_bytes().to_vec();
    if let Some(v) = bytes.last_mut() {
        if *v >= 27 {
            *v -= 27;
        }
    }

    let tx = ProtoTransaction {
        data: Some(data),
        signature: bytes,
    };
    Ok(format!("0x{}", hex::encode(tx.encode_to_vec())))
}

/// Idena address of a signer, lower-case hex
pub fn address_of(signer: &PrivateKeySigner) -> String {
    format!("0x{}", hex::encode(signer.address().as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;

    const KEY: &str = "0x4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d";

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_transfer_data_fields() {
        let amount = dec("99.5");
        let max_fee = dec("0.5");
        let data = Transfer {
            nonce: 7,
            epoch: 120,
            to: "0x2222222222222222222222222222222222222222",
            amount: &amount,
            max_fee: &max_fee,
        }
        .data()
        .unwrap();

        assert_eq!(data.nonce, 7);
        assert_eq!(data.epoch, 120);
        assert_eq!(data.kind, SEND_TX);
        assert_eq!(data.to, vec![0x22; 20]);
        assert_eq!(data.max_fee, vec![0x06, 0xf0, 0x5b, 0x59, 0xd3, 0xb2, 0x00, 0x00]);
        assert!(data.tips.is_empty());
    }

    #[test]
    fn test_bad_recipient_rejected() {
        let amount = dec("1");
        let data = Transfer {
            nonce: 1,
            epoch: 1,
            to: "not-an-address",
            amount: &amount,
            max_fee: &amount,
        }
        .data();
        assert!(matches!(data, Err(ChainError::Decode(_))));
    }

    #[test]
    fn test_signature_recovers_signer() {
        let signer = PrivateKeySigner::from_str(KEY).unwrap();
        let amount = dec("10");
        let max_fee = dec("0.5");
        let data = Transfer {
            nonce: 1,
            epoch: 5,
            to: "0x2222222222222222222222222222222222222222",
            amount: &amount,
            max_fee: &max_fee,
        }
        .data()
        .unwrap();

        let raw = sign(data.clone(), &signer).unwrap();
        let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
        let decoded = ProtoTransaction::decode(bytes.as_slice()).unwrap();

        assert_eq!(decoded.data.as_ref(), Some(&data));
        assert_eq!(decoded.signature.len(), 65);
        assert!(decoded.signature[64] <= 1);

        let hash: B256 = keccak256(data.encode_to_vec());
        let expected = signer.sign_hash_sync(&hash).unwrap();
        assert_eq!(&decoded.signature[..64], &expected.as_bytes()[..64]);
    }

    #[test]
    fn test_address_of_is_lowercase() {
        let signer = PrivateKeySigner::from_str(KEY).unwrap();
        let address = address_of(&signer);
        assert_eq!(address, "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1");
    }
}
