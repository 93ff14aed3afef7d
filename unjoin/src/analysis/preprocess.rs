//! Deterministic greedy reduction of the assignment problem.
//!
//! Locks in input/change pairings that no valid assignment could contradict,
//! shrinking the pools the integer program has to reason about. Locks fix
//! ownership only: who the taker is always stays open for the model.

use crate::analysis::{coinjoin::CoinJoinTx, Params};

use std::collections::BTreeSet;

/// A participant fixed by deduction: a single input, optionally paired with a
/// change output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lock {
    pub input: usize,
    pub change: Option<usize>,
}

/// The preprocessor's verdict: locked participants plus the pools left to the
/// model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAssignment {
    pub locks: Vec<Lock>,
    /// Input indices not owned by any lock, ascending.
    pub free_inputs: Vec<usize>,
    /// Change output indices not owned by any lock, in output order.
    pub free_changes: Vec<usize>,
}

// Net amount input `i` loses when paired with change output `j`: negative
// when the owner earns.
fn pair_fee(tx: &CoinJoinTx, input: usize, change: usize) -> i64 {
    tx.inputs()[input] as i64 - tx.equal_amount() as i64 - tx.outputs()[change] as i64
}

// Whether the pairing is admissible for a maker: the earning is non-negative
// and capped, and the change output is not dust.
fn maker_pair(tx: &CoinJoinTx, params: &Params, input: usize, change: usize) -> bool {
    let fee = pair_fee(tx, input, change);
    tx.outputs()[change] >= params.dust_threshold && -(params.max_fee_abs as i64) <= fee && fee <= 0
}

// Whether the pairing is admissible under any role, maker or taker.
fn plausible_pair(tx: &CoinJoinTx, params: &Params, taker_cap: i64, input: usize, change: usize) -> bool {
    let fee = pair_fee(tx, input, change);
    tx.outputs()[change] >= params.dust_threshold
        && -(params.max_fee_abs as i64) <= fee
        && fee <= taker_cap
}

/// Run the greedy passes and split the problem into locks and free pools.
pub fn preprocess(tx: &CoinJoinTx, params: &Params) -> PartialAssignment {
    let mut locks = Vec::new();
    let mut free_inputs: BTreeSet<usize> = (0..tx.inputs().len()).collect();
    let mut free_changes: BTreeSet<usize> = tx.change_indices().iter().copied().collect();

    // Pass 1: single-input exact matches, to a fixed point. A pairing is
    // locked only when it is unambiguous both ways: the change admits exactly
    // one input, and that input admits no other change.
    loop {
        let mut progress = false;
        for change in free_changes.clone() {
            let mut candidates = free_inputs
                .iter()
                .copied()
                .filter(|input| maker_pair(tx, params, *input, change));
            let input = match (candidates.next(), candidates.next()) {
                (Some(input), None) => input,
                _ => continue,
            };
            let tied_elsewhere = free_changes
                .iter()
                .any(|other| *other != change && maker_pair(tx, params, input, *other));
            if tied_elsewhere {
                continue;
            }
            log::debug!(
                "preprocessor: locking input {} with change output {}",
                input,
                change
            );
            locks.push(Lock {
                input,
                change: Some(change),
            });
            free_inputs.remove(&input);
            free_changes.remove(&change);
            progress = true;
        }
        if !progress {
            break;
        }
    }

    // Pass 2: isolated changeless makers. An input covering the denomination
    // plus a small surplus, which no remaining change output could plausibly
    // belong to under any role, forms a participant on its own.
    let taker_cap = params.max_fee_abs as i64 * (tx.num_participants() as i64 - 1)
        + tx.network_fee() as i64;
    for input in free_inputs.clone() {
        let surplus = tx.inputs()[input] as i64 - tx.equal_amount() as i64;
        if surplus < 0 || surplus > params.max_fee_abs as i64 {
            continue;
        }
        let pairable = free_changes
            .iter()
            .any(|change| plausible_pair(tx, params, taker_cap, input, *change));
        if pairable {
            continue;
        }
        log::debug!("preprocessor: locking input {} as changeless", input);
        locks.push(Lock {
            input,
            change: None,
        });
        free_inputs.remove(&input);
    }

    // Pass 3: whatever remains is the model's problem.
    PartialAssignment {
        locks,
        free_inputs: free_inputs.into_iter().collect(),
        free_changes: free_changes.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{params_for, scenarios};

    #[test]
    fn locks_unambiguous_pairs() {
        let tx = scenarios::fully_deterministic();
        let partial = preprocess(&tx, &params_for(&tx, 0.05));
        // The two maker pairings are unambiguous; the taker's input and
        // change stay free (its surplus is positive, out of the maker
        // window).
        assert_eq!(
            partial.locks,
            vec![
                Lock {
                    input: 0,
                    change: Some(1)
                },
                Lock {
                    input: 1,
                    change: Some(3)
                },
            ]
        );
        assert_eq!(partial.free_inputs, vec![2]);
        assert_eq!(partial.free_changes, vec![5]);
    }

    #[test]
    fn ambiguous_pairs_stay_free() {
        let tx = scenarios::symmetric_five();
        let partial = preprocess(&tx, &params_for(&tx, 0.05));
        // Inputs 0 and 1 both fit change outputs 5 and 6: no lock for them.
        assert_eq!(
            partial.locks,
            vec![
                Lock {
                    input: 2,
                    change: Some(7)
                },
                Lock {
                    input: 3,
                    change: Some(8)
                },
            ]
        );
        assert_eq!(partial.free_inputs, vec![0, 1, 4]);
        assert_eq!(partial.free_changes, vec![5, 6, 9]);
    }

    #[test]
    fn changeless_makers_locked_when_isolated() {
        let tx = scenarios::taker_ambiguity();
        let partial = preprocess(&tx, &params_for(&tx, 0.05));
        assert_eq!(
            partial.locks,
            vec![
                Lock {
                    input: 0,
                    change: None
                },
                Lock {
                    input: 1,
                    change: None
                },
            ]
        );
        assert!(partial.free_inputs.is_empty());
        assert!(partial.free_changes.is_empty());
    }

    #[test]
    fn plausible_taker_pairing_prevents_changeless_lock() {
        // Input 4's surplus is within the maker window, but change output 9
        // plausibly belongs to it as the taker: it must stay free.
        let tx = scenarios::symmetric_five();
        let partial = preprocess(&tx, &params_for(&tx, 0.05));
        assert!(partial.free_inputs.contains(&4));
    }

    #[test]
    fn dust_change_is_never_locked() {
        // Input 2 is within the maker window of the 500 sat change output,
        // but dust may not be owned: the pairing is inadmissible and the
        // change output stays free.
        let tx = crate::analysis::coinjoin::CoinJoinTx::from_values(
            vec![150_000, 250_800, 100_300],
            vec![100_000, 50_030, 100_000, 150_080, 100_000, 500],
        )
        .unwrap();
        let params = params_for(&tx, 0.05);
        assert!(!maker_pair(&tx, &params, 2, 5));
        let mut raised = params.clone();
        raised.dust_threshold = 400;
        assert!(maker_pair(&tx, &raised, 2, 5));
        let partial = preprocess(&tx, &params);
        assert!(partial.free_changes.contains(&5));
    }

    #[test]
    fn tight_fee_bound_locks_nothing() {
        let tx = scenarios::fully_deterministic();
        let partial = preprocess(&tx, &params_for(&tx, 0.0001));
        assert!(partial.locks.is_empty());
        assert_eq!(partial.free_inputs, vec![0, 1, 2]);
        assert_eq!(partial.free_changes, vec![1, 3, 5]);
    }
}
