//! Canonical de-anonymization records.

use crate::analysis::coinjoin::CoinJoinTx;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One participant of a recovered assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Owned input indices, ascending.
    pub inputs: Vec<usize>,
    /// Owned change output index, if any.
    pub change_index: Option<usize>,
    /// The denomination received.
    pub equal_amount: u64,
    /// Contributed minus received: negative for an earning maker, positive
    /// for the taker.
    pub fee: i64,
    pub is_taker: bool,
}

/// A complete assignment of the transaction to its participants, in
/// canonical form: participants ordered by their smallest input index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub participants: Vec<Participant>,
    pub taker_index: usize,
    /// Total coordination fees received by makers.
    pub total_maker_fees: u64,
    pub network_fee: u64,
}

impl Solution {
    /// Canonicalize raw per-participant assignments (input indices, change
    /// output, taker flag) into a solution record.
    pub fn from_parts(tx: &CoinJoinTx, parts: Vec<(Vec<usize>, Option<usize>, bool)>) -> Solution {
        let mut participants: Vec<Participant> = parts
            .into_iter()
            .map(|(mut inputs, change_index, is_taker)| {
                inputs.sort_unstable();
                let contributed: u64 = inputs.iter().map(|i| tx.inputs()[*i]).sum();
                let received =
                    tx.equal_amount() + change_index.map(|j| tx.outputs()[j]).unwrap_or(0);
                Participant {
                    inputs,
                    change_index,
                    equal_amount: tx.equal_amount(),
                    fee: contributed as i64 - received as i64,
                    is_taker,
                }
            })
            .collect();
        participants.sort_by_key(|p| p.inputs.first().copied().unwrap_or(usize::MAX));
        let taker_index = participants
            .iter()
            .position(|p| p.is_taker)
            .unwrap_or(participants.len());
        let total_maker_fees = participants
            .iter()
            .filter(|p| !p.is_taker)
            .map(|p| if p.fee < 0 { (-p.fee) as u64 } else { 0 })
            .sum();
        Solution {
            participants,
            taker_index,
            total_maker_fees,
            network_fee: tx.network_fee(),
        }
    }

    /// Verify every invariant an emitted solution must satisfy. A violation
    /// means the solver (or this program) is broken, so the message names
    /// the failed invariant.
    pub fn sanity_check(&self, tx: &CoinJoinTx, max_fee_abs: u64) -> Result<(), String> {
        let n = tx.num_participants();
        if self.participants.len() != n {
            return Err(format!(
                "{} participants instead of {}",
                self.participants.len(),
                n
            ));
        }

        // Inputs partition the transaction's inputs.
        let mut owned_inputs = BTreeSet::new();
        for participant in self.participants.iter() {
            if participant.inputs.is_empty() {
                return Err("participant without inputs".to_string());
            }
            for input in participant.inputs.iter() {
                if *input >= tx.inputs().len() || !owned_inputs.insert(*input) {
                    return Err(format!("input {} not owned exactly once", input));
                }
            }
        }
        if owned_inputs.len() != tx.inputs().len() {
            return Err("unassigned inputs remain".to_string());
        }

        // Change outputs are owned exactly once each.
        let mut owned_changes = BTreeSet::new();
        for participant in self.participants.iter() {
            if let Some(change) = participant.change_index {
                if !tx.change_indices().contains(&change) || !owned_changes.insert(change) {
                    return Err(format!("change output {} not owned exactly once", change));
                }
            }
        }
        if owned_changes.len() != tx.change_indices().len() {
            return Err("unassigned change outputs remain".to_string());
        }

        // One taker, at the recorded index.
        let takers = self
            .participants
            .iter()
            .filter(|p| p.is_taker)
            .count();
        if takers != 1 {
            return Err(format!("{} takers", takers));
        }
        if !self
            .participants
            .get(self.taker_index)
            .map(|p| p.is_taker)
            .unwrap_or(false)
        {
            return Err("taker_index does not point at the taker".to_string());
        }

        // Fees: recomputed balance, role windows, and the global sum.
        let max_fee = max_fee_abs as i64;
        let taker_cap = max_fee * (n as i64 - 1) + tx.network_fee() as i64;
        let mut fee_sum = 0i64;
        for participant in self.participants.iter() {
            let contributed: u64 = participant.inputs.iter().map(|i| tx.inputs()[*i]).sum();
            let received = tx.equal_amount()
                + participant
                    .change_index
                    .map(|j| tx.outputs()[j])
                    .unwrap_or(0);
            let fee = contributed as i64 - received as i64;
            if fee != participant.fee {
                return Err(format!("fee {} does not balance", participant.fee));
            }
            fee_sum += fee;
            if participant.is_taker {
                if fee < 1 {
                    return Err(format!("taker fee {} is not positive", fee));
                }
                if fee > taker_cap {
                    return Err(format!("taker fee {} above cap {}", fee, taker_cap));
                }
            } else {
                if fee < -max_fee {
                    return Err(format!("maker earns {} above the bound", -fee));
                }
                let upper = if participant.change_index.is_some() {
                    0
                } else {
                    max_fee
                };
                if fee > upper {
                    return Err(format!("maker fee {} above {}", fee, upper));
                }
            }
        }
        if fee_sum != tx.network_fee() as i64 {
            return Err(format!(
                "fees sum to {} instead of the network fee {}",
                fee_sum,
                tx.network_fee()
            ));
        }

        // Canonical order.
        let mins: Vec<usize> = self
            .participants
            .iter()
            .map(|p| p.inputs[0])
            .collect();
        if mins.windows(2).any(|w| w[0] >= w[1]) {
            return Err("participants not ordered by smallest input".to_string());
        }

        Ok(())
    }
}
