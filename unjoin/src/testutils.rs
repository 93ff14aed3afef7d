//! Test helpers: synthetic mixes, recording sinks, memory stubs.

use crate::analysis::{coinjoin::CoinJoinTx, solution::Solution, MemorySampler, Params, ProgressSink};

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// Analysis parameters with the given fee tolerance and every other knob at
/// its default.
pub fn params_for(tx: &CoinJoinTx, max_fee_rel: f64) -> Params {
    Params {
        max_fee_abs: (max_fee_rel * tx.equal_amount() as f64).floor() as u64,
        dust_threshold: 546,
        max_solutions: 1_000,
        per_solve_timeout: Duration::from_secs(60),
        memory_limit_bytes: 10 * 1024 * 1024 * 1024,
    }
}

/// Hand-built mixes, one per boundary behavior of the engine.
pub mod scenarios {
    use super::CoinJoinTx;

    /// 3 participants, every pairing forced: two unambiguous maker locks
    /// and a taker holding the leftovers. Exactly one solution.
    pub fn fully_deterministic() -> CoinJoinTx {
        CoinJoinTx::from_values(
            vec![150_000, 250_000, 101_000],
            vec![100_000, 50_030, 100_000, 150_080, 100_000, 600],
        )
        .unwrap()
    }

    /// Like [`fully_deterministic`] but the taker change output is below the
    /// dust threshold, which no participant may own: no solution at all.
    pub fn with_dust_change() -> CoinJoinTx {
        CoinJoinTx::from_values(
            vec![150_000, 250_000, 101_000],
            vec![100_000, 50_030, 100_000, 150_080, 100_000, 500],
        )
        .unwrap()
    }

    /// 5 participants; inputs 0 and 1 are both within fee tolerance of
    /// change outputs 5 and 6, everything else is forced. Two solutions.
    pub fn symmetric_five() -> CoinJoinTx {
        CoinJoinTx::from_values(
            vec![1_100_000, 1_100_500, 2_050_000, 3_200_000, 1_009_000],
            vec![
                1_000_000, 1_000_000, 1_000_000, 1_000_000, 1_000_000, 101_000, 101_500,
                1_050_030, 2_200_100, 5_000,
            ],
        )
        .unwrap()
    }

    /// 2 changeless participants with small surpluses: either could be the
    /// taker covering the network fee. Two solutions differing only in the
    /// taker.
    pub fn taker_ambiguity() -> CoinJoinTx {
        CoinJoinTx::from_values(vec![1_000_400, 1_000_300], vec![1_000_000, 1_000_000]).unwrap()
    }

    /// 3 participants where the taker funds the denomination from two
    /// smaller inputs. One solution, with a two-input participant.
    pub fn multi_input_taker() -> CoinJoinTx {
        CoinJoinTx::from_values(
            vec![1_100_000, 1_200_000, 600_000, 450_000],
            vec![1_000_000, 100_400, 1_000_000, 200_300, 1_000_000, 48_000],
        )
        .unwrap()
    }

    /// 4 participants, three makers interchangeable across three change
    /// outputs: 3! = 6 solutions, all with the same taker.
    pub fn many_symmetric() -> CoinJoinTx {
        CoinJoinTx::from_values(
            vec![1_100_000, 1_100_100, 1_100_200, 1_003_000],
            vec![
                1_000_000, 1_000_000, 1_000_000, 1_000_000, 100_500, 100_600, 100_700, 1_200,
            ],
        )
        .unwrap()
    }
}

/// Remembers everything it is handed.
#[derive(Default)]
pub struct RecordingSink {
    pub solutions: Vec<Solution>,
}

impl ProgressSink for RecordingSink {
    fn solution_found(&mut self, _index: usize, solution: &Solution) -> Result<(), io::Error> {
        self.solutions.push(solution.clone());
        Ok(())
    }
}

/// Requests cancellation as soon as the first solution lands, like a user
/// hitting ctrl-c mid-run.
pub struct CancellingSink<'a> {
    cancel: &'a AtomicBool,
    pub solutions: Vec<Solution>,
}

impl<'a> CancellingSink<'a> {
    pub fn new(cancel: &'a AtomicBool) -> CancellingSink<'a> {
        CancellingSink {
            cancel,
            solutions: Vec::new(),
        }
    }
}

impl<'a> ProgressSink for CancellingSink<'a> {
    fn solution_found(&mut self, _index: usize, solution: &Solution) -> Result<(), io::Error> {
        self.solutions.push(solution.clone());
        self.cancel.store(true, Ordering::Release);
        Ok(())
    }
}

/// No measurement available, like on an unsupported platform.
pub struct NoMemory;

impl MemorySampler for NoMemory {
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}

/// Always measures the given usage.
pub struct FixedMemory(pub u64);

impl MemorySampler for FixedMemory {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.0)
    }
}
