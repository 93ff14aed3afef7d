//! Interface to the block explorer.
//!
//! The engine only ever needs a transaction's input and output amounts; where
//! they come from is behind the [`TxSource`] trait.

pub mod esplora;

use std::{error, fmt, str::FromStr};

use bitcoin::Txid;

/// The raw material of an analysis: a transaction's value flows, in
/// transaction order, in satoshis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub txid: Txid,
    pub inputs: Vec<u64>,
    pub outputs: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The given string is not a transaction id.
    InvalidTxid(String),
    /// The explorer does not know this transaction.
    NotFound,
    /// Transport-level failure, after retries.
    Network(String),
    /// The explorer answered something we cannot use.
    BadResponse(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidTxid(detail) => write!(f, "Invalid transaction id: {}.", detail),
            Self::NotFound => write!(f, "Transaction not found by the explorer."),
            Self::Network(detail) => write!(f, "Explorer unreachable: {}.", detail),
            Self::BadResponse(detail) => write!(f, "Unusable explorer response: {}.", detail),
        }
    }
}

impl error::Error for FetchError {}

/// Validate a user-supplied transaction id before it goes anywhere near the
/// network.
pub fn parse_txid(s: &str) -> Result<Txid, FetchError> {
    Txid::from_str(s).map_err(|e| FetchError::InvalidTxid(format!("'{}': {}", s, e)))
}

/// Where transactions come from.
pub trait TxSource {
    fn fetch(&self, txid: &Txid) -> Result<RawTransaction, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txids_are_validated() {
        let txid =
            parse_txid("d3bd1d6e3b2e1f0b9c4fbb5b0f3a3fd2a13b1c06d5fe55eb0b422f04402e4f0e")
                .unwrap();
        assert_eq!(
            txid.to_string(),
            "d3bd1d6e3b2e1f0b9c4fbb5b0f3a3fd2a13b1c06d5fe55eb0b422f04402e4f0e"
        );

        let too_long = "d3".repeat(33);
        for bad in ["", "deadbeef", "zz", too_long.as_str()].iter() {
            match parse_txid(bad) {
                Err(FetchError::InvalidTxid(_)) => {}
                other => panic!("expected InvalidTxid for '{}', got {:?}", bad, other),
            }
        }
    }
}
