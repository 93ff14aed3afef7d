//! The assignment enumeration engine.
//!
//! Reduce with the greedy preprocessor, translate the rest into a binary
//! program, then solve repeatedly: each feasible valuation becomes a
//! [`Solution`], and a no-good cut excludes it (and its whole participant
//! permutation class) before the next solve. Terminates when the model turns
//! infeasible, the solution cap is hit, the per-solve budget runs out, or
//! cancellation is requested.

pub mod coinjoin;
pub mod model;
pub mod preprocess;
pub mod solution;

use crate::{
    analysis::{coinjoin::CoinJoinTx, model::CoinJoinModel, solution::Solution},
    config::Config,
    solver::{Outcome, Solve},
    AnalysisError,
};

use std::{fmt, io, sync::atomic, time::Duration};

/// Parameters of a single analysis run, with the relative fee tolerance
/// already resolved against the transaction's denomination.
#[derive(Debug, Clone)]
pub struct Params {
    /// Absolute per-maker fee tolerance, `floor(max_fee_rel * equal_amount)`.
    pub max_fee_abs: u64,
    pub dust_threshold: u64,
    pub max_solutions: usize,
    pub per_solve_timeout: Duration,
    pub memory_limit_bytes: u64,
}

impl Params {
    pub fn derive(config: &Config, tx: &CoinJoinTx) -> Params {
        Params {
            max_fee_abs: config.max_fee_abs(tx.equal_amount()),
            dust_threshold: config.dust_threshold,
            max_solutions: config.max_solutions,
            per_solve_timeout: config.per_solve_timeout,
            memory_limit_bytes: config.memory_limit_bytes,
        }
    }
}

/// Where the enumeration reports progress. The sink owns persistence: a
/// solution handed to it must survive however the run ends afterwards.
pub trait ProgressSink {
    fn solution_found(&mut self, index: usize, solution: &Solution) -> Result<(), io::Error>;
}

/// Periodic resource measurement hook polled between solves.
pub trait MemorySampler {
    /// Current resident set size, or `None` where unsupported.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Samples the process RSS from procfs. Inert on non-Linux platforms.
#[derive(Debug, Clone, Copy, Default)]
pub struct RssSampler;

impl MemorySampler for RssSampler {
    #[cfg(target_os = "linux")]
    fn resident_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 {
            return None;
        }
        Some(resident_pages * page_size as u64)
    }

    #[cfg(not(target_os = "linux"))]
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}

/// Why the enumeration stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The model was proved infeasible: every assignment was enumerated (or
    /// none existed).
    Exhausted,
    /// The configured solution cap was reached.
    SolutionCap,
    /// A solve exhausted its time budget without a valuation.
    TimeLimit,
    /// Cancellation was requested; everything emitted so far stands.
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "search exhausted"),
            Self::SolutionCap => write!(f, "solution cap reached"),
            Self::TimeLimit => write!(f, "per-solve time limit hit"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub solutions: Vec<Solution>,
    pub termination: Termination,
    /// How often the solver backend was invoked.
    pub solver_calls: usize,
}

/// Enumerate every assignment of the transaction consistent with the
/// parameters, emitting each to the sink as it is found.
///
/// The cancellation flag is polled between solver calls and before each cut
/// injection; the memory ceiling between solver calls.
pub fn enumerate(
    tx: &CoinJoinTx,
    params: &Params,
    solver: &dyn Solve,
    sink: &mut dyn ProgressSink,
    cancel: &atomic::AtomicBool,
    memory: &dyn MemorySampler,
) -> Result<AnalysisResult, AnalysisError> {
    let partial = preprocess::preprocess(tx, params);
    log::info!(
        "Preprocessor locked {} of {} participants, {} inputs and {} change outputs left",
        partial.locks.len(),
        tx.num_participants(),
        partial.free_inputs.len(),
        partial.free_changes.len()
    );

    let mut solutions = Vec::new();
    let mut solver_calls = 0;
    let result = |solutions: Vec<Solution>, termination, solver_calls| {
        log::info!(
            "Enumeration done: {} solution(s), {} ({} solver calls)",
            solutions.len(),
            termination,
            solver_calls
        );
        Ok(AnalysisResult {
            solutions,
            termination,
            solver_calls,
        })
    };

    let mut model = match CoinJoinModel::build(tx, &partial, params) {
        Some(model) => model,
        // The pool shapes alone rule out any assignment.
        None => return result(solutions, Termination::Exhausted, solver_calls),
    };
    log::debug!(
        "Model built: {} variables, {} constraints",
        model.model.num_vars(),
        model.model.num_constraints()
    );

    loop {
        if cancel.load(atomic::Ordering::Acquire) {
            return result(solutions, Termination::Cancelled, solver_calls);
        }
        if let Some(used) = memory.resident_bytes() {
            if used > params.memory_limit_bytes {
                return Err(AnalysisError::MemoryLimit {
                    used,
                    limit: params.memory_limit_bytes,
                });
            }
        }

        solver_calls += 1;
        let valuation = match solver
            .solve(&model.model, params.per_solve_timeout)
            .map_err(AnalysisError::Solver)?
        {
            Outcome::Feasible(valuation) => valuation,
            Outcome::Infeasible => return result(solutions, Termination::Exhausted, solver_calls),
            Outcome::TimeLimit => return result(solutions, Termination::TimeLimit, solver_calls),
        };

        // A valuation violating the model is a backend bug, not a solution.
        model
            .model
            .check_valuation(&valuation)
            .map_err(|detail| AnalysisError::Solver(crate::solver::SolverError::new(detail)))?;
        let solution = Solution::from_parts(tx, model.assignment(&valuation));
        solution
            .sanity_check(tx, params.max_fee_abs)
            .map_err(|detail| AnalysisError::Solver(crate::solver::SolverError::new(detail)))?;

        sink.solution_found(solutions.len(), &solution)
            .map_err(AnalysisError::Report)?;
        solutions.push(solution);
        if solutions.len() >= params.max_solutions {
            return result(solutions, Termination::SolutionCap, solver_calls);
        }

        if cancel.load(atomic::Ordering::Acquire) {
            return result(solutions, Termination::Cancelled, solver_calls);
        }
        model.add_no_good_cut(&valuation);
    }
}
