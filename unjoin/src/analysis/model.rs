//! Integer-linear formulation of the participant assignment problem.
//!
//! Builds a binary program over the pools the preprocessor left free, with
//! the locked participants folded in as constants. Participant permutation
//! symmetry is broken lexicographically on the smallest owned input index, so
//! each equivalence class of assignments has exactly one feasible valuation
//! and a no-good cut on a found valuation excludes the whole class.

use crate::{
    analysis::{coinjoin::CoinJoinTx, preprocess::PartialAssignment, Params},
    solver::{Model, Sense, Valuation, VarId},
};

/// The program plus the maps from its variables back to the transaction.
#[derive(Debug, Clone)]
pub struct CoinJoinModel {
    pub model: Model,
    /// x[f][a]: free slot `f` owns free input ordinal `a`.
    x: Vec<Vec<VarId>>,
    /// c[f][b]: free slot `f` owns free change ordinal `b`.
    c: Vec<Vec<VarId>>,
    /// t[p]: participant `p` is the taker. Locked participants first.
    t: Vec<VarId>,
    partial: PartialAssignment,
}

impl CoinJoinModel {
    /// Translate the reduced problem into a binary program.
    ///
    /// Returns `None` when the pool shapes alone prove there is no
    /// assignment (no program needs solving then).
    pub fn build(
        tx: &CoinJoinTx,
        partial: &PartialAssignment,
        params: &Params,
    ) -> Option<CoinJoinModel> {
        let n = tx.num_participants();
        let n_locked = partial.locks.len();
        let free_inputs = &partial.free_inputs;
        let free_changes = &partial.free_changes;
        if n_locked > n {
            return None;
        }
        let n_free = n - n_locked;
        if n_free == 0 && (!free_inputs.is_empty() || !free_changes.is_empty()) {
            // Every participant is locked but something is left unowned.
            return None;
        }
        if free_inputs.len() < n_free {
            // Each free participant needs an input of its own.
            return None;
        }

        let equal = tx.equal_amount() as i64;
        let max_fee = params.max_fee_abs as i64;
        let network_fee = tx.network_fee() as i64;
        let taker_cap = max_fee * (n as i64 - 1) + network_fee;
        // Big-M from the data: no fee can reach the total input value.
        let big_m = tx.input_sum() as i64 + 1;
        let in_val: Vec<i64> = free_inputs.iter().map(|i| tx.inputs()[*i] as i64).collect();
        let out_val: Vec<i64> = free_changes
            .iter()
            .map(|j| tx.outputs()[*j] as i64)
            .collect();
        let lock_fee: Vec<i64> = partial
            .locks
            .iter()
            .map(|lock| {
                tx.inputs()[lock.input] as i64
                    - equal
                    - lock.change.map(|j| tx.outputs()[j] as i64).unwrap_or(0)
            })
            .collect();

        let mut model = Model::new();
        let x: Vec<Vec<VarId>> = (0..n_free)
            .map(|_| (0..in_val.len()).map(|_| model.add_binary()).collect())
            .collect();
        let c: Vec<Vec<VarId>> = (0..n_free)
            .map(|_| (0..out_val.len()).map(|_| model.add_binary()).collect())
            .collect();
        let h: Vec<VarId> = (0..n_free).map(|_| model.add_binary()).collect();
        let t: Vec<VarId> = (0..n).map(|_| model.add_binary()).collect();
        let first: Vec<Vec<VarId>> = (0..n_free)
            .map(|_| (0..in_val.len()).map(|_| model.add_binary()).collect())
            .collect();

        // Each free input belongs to exactly one free participant.
        for a in 0..in_val.len() {
            let terms = (0..n_free).map(|f| (x[f][a], 1)).collect();
            model.add_constraint(terms, Sense::Eq, 1);
        }
        // Each free change output is owned by exactly one free participant,
        // and nobody owns two.
        for b in 0..out_val.len() {
            let terms = (0..n_free).map(|f| (c[f][b], 1)).collect();
            model.add_constraint(terms, Sense::Eq, 1);
        }
        for f in 0..n_free {
            let mut terms: Vec<(VarId, i64)> = (0..out_val.len()).map(|b| (c[f][b], 1)).collect();
            terms.push((h[f], -1));
            model.add_constraint(terms, Sense::Eq, 0);
        }
        // Exactly one taker among all participants, locked ones included.
        model.add_constraint(t.iter().map(|var| (*var, 1)).collect(), Sense::Eq, 1);
        // A locked participant earning (or breaking even) cannot be the
        // taker, who always pays.
        for (l, fee) in lock_fee.iter().enumerate() {
            if *fee <= 0 {
                model.add_constraint(vec![(t[l], 1)], Sense::Eq, 0);
            }
        }

        // Per-participant fee windows over the value balance
        //   fee_f = sum(in*x) - equal - sum(out*c).
        for f in 0..n_free {
            let t_f = t[n_locked + f];
            let balance = |extra: Vec<(VarId, i64)>| -> Vec<(VarId, i64)> {
                let mut terms: Vec<(VarId, i64)> =
                    (0..in_val.len()).map(|a| (x[f][a], in_val[a])).collect();
                terms.extend((0..out_val.len()).map(|b| (c[f][b], -out_val[b])));
                terms.extend(extra);
                terms
            };
            // fee <= max_fee*(1-h) + taker_cap*t: a maker with change earns,
            // a changeless maker forfeits at most max_fee to the miner.
            model.add_constraint(
                balance(vec![(h[f], max_fee), (t_f, -taker_cap)]),
                Sense::Le,
                equal + max_fee,
            );
            // fee <= taker_cap + big_m*(1-t): the taker pays at most one
            // maker fee per maker plus the network fee.
            model.add_constraint(
                balance(vec![(t_f, big_m)]),
                Sense::Le,
                equal + taker_cap + big_m,
            );
            // fee >= 1 - (max_fee+1)*(1-t): the taker pays at least one
            // satoshi, a maker earns at most max_fee.
            model.add_constraint(
                balance(vec![(t_f, -(max_fee + 1))]),
                Sense::Ge,
                equal - max_fee,
            );
        }

        // Redundant global balance: all fees together pay the miner.
        if n_free > 0 {
            let mut terms = Vec::new();
            for f in 0..n_free {
                terms.extend((0..in_val.len()).map(|a| (x[f][a], in_val[a])));
                terms.extend((0..out_val.len()).map(|b| (c[f][b], -out_val[b])));
            }
            let locked_fees: i64 = lock_fee.iter().sum();
            model.add_constraint(
                terms,
                Sense::Eq,
                network_fee - locked_fees + n_free as i64 * equal,
            );
        }

        // A change output below the dust threshold belongs to nobody, which
        // clashes with the ownership constraint above: the model is then
        // infeasible, as it should be.
        for b in 0..out_val.len() {
            if (out_val[b] as u64) < params.dust_threshold {
                for f in 0..n_free {
                    model.add_constraint(vec![(c[f][b], 1)], Sense::Eq, 0);
                }
            }
        }

        // Symmetry breaking: first[f] marks the smallest owned input, and
        // consecutive free slots are ordered by it.
        for f in 0..n_free {
            let terms = (0..in_val.len()).map(|a| (first[f][a], 1)).collect();
            model.add_constraint(terms, Sense::Eq, 1);
            for a in 0..in_val.len() {
                model.add_constraint(vec![(first[f][a], 1), (x[f][a], -1)], Sense::Le, 0);
                if a > 0 {
                    let mut terms: Vec<(VarId, i64)> =
                        (0..a).map(|before| (x[f][before], 1)).collect();
                    terms.push((first[f][a], a as i64));
                    model.add_constraint(terms, Sense::Le, a as i64);
                }
            }
        }
        for f in 1..n_free {
            let terms: Vec<(VarId, i64)> = (1..in_val.len())
                .flat_map(|a| {
                    vec![
                        (first[f - 1][a], a as i64),
                        (first[f][a], -(a as i64)),
                    ]
                })
                .collect();
            model.add_constraint(terms, Sense::Le, -1);
        }

        Some(CoinJoinModel {
            model,
            x,
            c,
            t,
            partial: partial.clone(),
        })
    }

    /// Read an assignment out of a feasible valuation: per participant, the
    /// owned input indices, the owned change output and the taker flag.
    /// Locked participants come first, in lock order.
    pub fn assignment(&self, valuation: &Valuation) -> Vec<(Vec<usize>, Option<usize>, bool)> {
        let n_locked = self.partial.locks.len();
        let mut parts = Vec::with_capacity(self.t.len());
        for (l, lock) in self.partial.locks.iter().enumerate() {
            parts.push((vec![lock.input], lock.change, valuation.value(self.t[l])));
        }
        for f in 0..self.x.len() {
            let inputs: Vec<usize> = self.x[f]
                .iter()
                .enumerate()
                .filter(|(_, var)| valuation.value(**var))
                .map(|(a, _)| self.partial.free_inputs[a])
                .collect();
            let change = self.c[f]
                .iter()
                .enumerate()
                .find(|(_, var)| valuation.value(**var))
                .map(|(b, _)| self.partial.free_changes[b]);
            parts.push((inputs, change, valuation.value(self.t[n_locked + f])));
        }
        parts
    }

    /// Exclude this valuation from the feasible set: at least one of the
    /// assignment variables must flip. Symmetry breaking makes the valuation
    /// the unique representative of its permutation class, so this cut
    /// removes the class, not just the labeling.
    pub fn add_no_good_cut(&mut self, valuation: &Valuation) {
        let assignment_vars = self
            .x
            .iter()
            .flatten()
            .chain(self.c.iter().flatten())
            .chain(self.t.iter());
        let mut terms = Vec::new();
        let mut ones = 0i64;
        for var in assignment_vars {
            if valuation.value(*var) {
                terms.push((*var, -1));
                ones += 1;
            } else {
                terms.push((*var, 1));
            }
        }
        self.model.add_constraint(terms, Sense::Ge, 1 - ones);
    }
}
