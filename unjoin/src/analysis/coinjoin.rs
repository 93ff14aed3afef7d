//! Candidate CoinJoin transaction model.
//!
//! Detects the JoinMarket shape (one denomination repeated once per
//! participant, plus change outputs) from raw input and output amounts, and
//! exposes the derived structure read-only.

use std::{collections::HashMap, error, fmt};

/// A transaction validated to have the JoinMarket CoinJoin shape.
///
/// Immutable once constructed. All indices refer to the transaction's input
/// and output ordering, all amounts are integer satoshis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinJoinTx {
    inputs: Vec<u64>,
    outputs: Vec<u64>,
    equal_amount: u64,
    equal_indices: Vec<usize>,
    change_indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoinJoinError {
    /// The outputs don't exhibit an equal-output denomination, or the shape
    /// is otherwise impossible for a JoinMarket mix.
    NotACoinJoin(String),
    /// Output value exceeds input value.
    InconsistentBalance { input_sum: u64, output_sum: u64 },
}

impl fmt::Display for CoinJoinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotACoinJoin(reason) => write!(f, "Not a CoinJoin: {}.", reason),
            Self::InconsistentBalance {
                input_sum,
                output_sum,
            } => write!(
                f,
                "Inconsistent balance: {} sats in, {} sats out.",
                input_sum, output_sum
            ),
        }
    }
}

impl error::Error for CoinJoinError {}

impl CoinJoinTx {
    /// Validate raw amounts as a CoinJoin and derive its structure.
    ///
    /// The denomination is the output amount with the largest multiplicity,
    /// ties broken by the larger amount. A multiplicity below 2 means no mix.
    pub fn from_values(inputs: Vec<u64>, outputs: Vec<u64>) -> Result<CoinJoinTx, CoinJoinError> {
        if let Some(i) = inputs.iter().position(|value| *value == 0) {
            return Err(CoinJoinError::NotACoinJoin(format!(
                "input {} has no value",
                i
            )));
        }

        let mut multiplicities: HashMap<u64, usize> = HashMap::new();
        for value in outputs.iter() {
            *multiplicities.entry(*value).or_insert(0) += 1;
        }
        let (equal_amount, participants) = multiplicities
            .iter()
            .map(|(value, count)| (*value, *count))
            .max_by_key(|(value, count)| (*count, *value))
            .unwrap_or((0, 0));
        if participants < 2 {
            return Err(CoinJoinError::NotACoinJoin(
                "no output amount repeats".to_string(),
            ));
        }
        if inputs.len() < participants {
            return Err(CoinJoinError::NotACoinJoin(format!(
                "{} equal outputs but only {} inputs",
                participants,
                inputs.len()
            )));
        }

        let input_sum: u64 = inputs.iter().sum();
        let output_sum: u64 = outputs.iter().sum();
        if input_sum < output_sum {
            return Err(CoinJoinError::InconsistentBalance {
                input_sum,
                output_sum,
            });
        }

        let equal_indices: Vec<usize> = outputs
            .iter()
            .enumerate()
            .filter(|(_, value)| **value == equal_amount)
            .map(|(i, _)| i)
            .collect();
        let change_indices: Vec<usize> = outputs
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != equal_amount)
            .map(|(i, _)| i)
            .collect();

        Ok(CoinJoinTx {
            inputs,
            outputs,
            equal_amount,
            equal_indices,
            change_indices,
        })
    }

    pub fn inputs(&self) -> &[u64] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[u64] {
        &self.outputs
    }

    /// The denomination repeated once per participant.
    pub fn equal_amount(&self) -> u64 {
        self.equal_amount
    }

    /// N, the number of participants of the mix.
    pub fn num_participants(&self) -> usize {
        self.equal_indices.len()
    }

    pub fn equal_indices(&self) -> &[usize] {
        &self.equal_indices
    }

    /// Output indices that are not part of the denomination, in output order.
    pub fn change_indices(&self) -> &[usize] {
        &self.change_indices
    }

    pub fn input_sum(&self) -> u64 {
        self.inputs.iter().sum()
    }

    pub fn output_sum(&self) -> u64 {
        self.outputs.iter().sum()
    }

    /// What the miner gets.
    pub fn network_fee(&self) -> u64 {
        self.input_sum() - self.output_sum()
    }
}
