//! Enumeration of the hidden participant structure of JoinMarket CoinJoin
//! transactions.
//!
//! Given a transaction's value flows and the JoinMarket shape (one
//! denomination repeated once per participant, optional change outputs, one
//! fee-paying taker), every assignment of inputs and change outputs to
//! participants consistent with the fee and dust bounds is enumerated, each
//! one a plausible de-anonymization of the mix.

pub mod analysis;
pub mod config;
pub mod explorer;
pub mod report;
pub mod solver;
#[cfg(test)]
mod testutils;

use crate::{
    analysis::{
        coinjoin::{CoinJoinError, CoinJoinTx},
        AnalysisResult, MemorySampler, Params, ProgressSink,
    },
    config::Config,
    explorer::{FetchError, TxSource},
    solver::{Solve, SolverError},
};

use std::{error, fmt, io, sync::atomic};

use bitcoin::Txid;

// A panic must land in the log with a backtrace: the verdict of a run is its
// exit code, and a bug must not read like "no solutions".
#[cfg(not(test))]
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "no panic message".to_string());
        log::error!(
            "analysis aborted by a bug at {}: {}\n{:?}",
            location,
            message,
            backtrace::Backtrace::new()
        );
    }));
}

#[derive(Debug, Clone)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub const VERSION: Version = Version { major: 0, minor: 1 };

/// Any way an analysis can fail. Terminations that are not failures (cap
/// reached, search exhausted, cancellation) are on [`AnalysisResult`]
/// instead.
#[derive(Debug)]
pub enum AnalysisError {
    /// The transaction couldn't be fetched.
    Fetch(FetchError),
    /// The transaction is not a CoinJoin we can analyze.
    CoinJoin(CoinJoinError),
    /// The solver backend failed, or answered with a valuation violating its
    /// own model.
    Solver(SolverError),
    /// A solution could not be persisted.
    Report(io::Error),
    /// The memory ceiling was crossed.
    MemoryLimit { used: u64, limit: u64 },
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "{}", e),
            Self::CoinJoin(e) => write!(f, "{}", e),
            Self::Solver(e) => write!(f, "{}", e),
            Self::Report(e) => write!(f, "Error writing the report: {}.", e),
            Self::MemoryLimit { used, limit } => write!(
                f,
                "Memory limit exceeded: {} bytes resident, {} allowed.",
                used, limit
            ),
        }
    }
}

impl error::Error for AnalysisError {}

impl From<FetchError> for AnalysisError {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e)
    }
}

impl From<CoinJoinError> for AnalysisError {
    fn from(e: CoinJoinError) -> Self {
        Self::CoinJoin(e)
    }
}

/// Fetch a transaction, validate it as a CoinJoin and enumerate its
/// assignments. The returned transaction model carries the detected
/// structure, the result everything that was emitted to the sink.
pub fn analyze(
    config: &Config,
    txid: &Txid,
    source: &dyn TxSource,
    solver: &dyn Solve,
    sink: &mut dyn ProgressSink,
    cancel: &atomic::AtomicBool,
    memory: &dyn MemorySampler,
) -> Result<(CoinJoinTx, AnalysisResult), AnalysisError> {
    let raw = source.fetch(txid)?;
    log::info!(
        "Fetched transaction {}: {} inputs, {} outputs",
        txid,
        raw.inputs.len(),
        raw.outputs.len()
    );
    let tx = CoinJoinTx::from_values(raw.inputs, raw.outputs)?;
    log::info!(
        "Detected a {}-participant mix of {} each, network fee {}",
        tx.num_participants(),
        bitcoin::Amount::from_sat(tx.equal_amount()),
        bitcoin::Amount::from_sat(tx.network_fee())
    );

    let params = Params::derive(config, &tx);
    let result = analysis::enumerate(&tx, &params, solver, sink, cancel, memory)?;
    Ok((tx, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Termination;
    use crate::explorer::RawTransaction;
    use crate::solver::microlp::Microlp;
    use crate::testutils::{NoMemory, RecordingSink};

    use std::str::FromStr;
    use std::sync::atomic::AtomicBool;

    struct CannedSource(RawTransaction);

    impl TxSource for CannedSource {
        fn fetch(&self, _: &Txid) -> Result<RawTransaction, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    impl TxSource for FailingSource {
        fn fetch(&self, _: &Txid) -> Result<RawTransaction, FetchError> {
            Err(FetchError::NotFound)
        }
    }

    #[test]
    fn end_to_end_on_canned_transaction() {
        let txid = Txid::from_str(
            "d3bd1d6e3b2e1f0b9c4fbb5b0f3a3fd2a13b1c06d5fe55eb0b422f04402e4f0e",
        )
        .unwrap();
        let source = CannedSource(RawTransaction {
            txid,
            inputs: vec![150_000, 250_000, 101_000],
            outputs: vec![100_000, 50_030, 100_000, 150_080, 100_000, 600],
        });
        let mut sink = RecordingSink::default();
        let (tx, result) = analyze(
            &Config::default(),
            &txid,
            &source,
            &Microlp,
            &mut sink,
            &AtomicBool::new(false),
            &NoMemory,
        )
        .unwrap();
        assert_eq!(tx.num_participants(), 3);
        assert_eq!(result.solutions.len(), 1);
        assert_eq!(result.termination, Termination::Exhausted);
        assert_eq!(sink.solutions, result.solutions);
    }

    #[test]
    fn fetch_and_validation_errors_surface() {
        let txid = Txid::from_str(
            "d3bd1d6e3b2e1f0b9c4fbb5b0f3a3fd2a13b1c06d5fe55eb0b422f04402e4f0e",
        )
        .unwrap();
        let mut sink = RecordingSink::default();
        match analyze(
            &Config::default(),
            &txid,
            &FailingSource,
            &Microlp,
            &mut sink,
            &AtomicBool::new(false),
            &NoMemory,
        ) {
            Err(AnalysisError::Fetch(FetchError::NotFound)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }

        // A payment, not a mix.
        let source = CannedSource(RawTransaction {
            txid,
            inputs: vec![150_000],
            outputs: vec![100_000, 49_000],
        });
        match analyze(
            &Config::default(),
            &txid,
            &source,
            &Microlp,
            &mut sink,
            &AtomicBool::new(false),
            &NoMemory,
        ) {
            Err(AnalysisError::CoinJoin(CoinJoinError::NotACoinJoin(_))) => {}
            other => panic!("expected NotACoinJoin, got {:?}", other.map(|_| ())),
        }
    }
}
