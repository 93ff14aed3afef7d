//! Incremental solution report.
//!
//! The report file is a JSON array of solution records. It is rewritten
//! atomically (write to a temporary file, then rename over the target) after
//! every solution, so however the run ends the file on disk is valid JSON
//! holding everything emitted so far.

use crate::analysis::{solution::Solution, ProgressSink};

use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub struct ReportWriter {
    path: PathBuf,
    solutions: Vec<Solution>,
}

impl ReportWriter {
    /// Create the writer and immediately persist an empty report, so the
    /// file is valid from the moment the run starts.
    pub fn create(path: PathBuf) -> Result<ReportWriter, io::Error> {
        let writer = ReportWriter {
            path,
            solutions: Vec::new(),
        };
        writer.persist()?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), io::Error> {
        let serialized = serde_json::to_vec_pretty(&self.solutions)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, &self.path)
    }
}

impl ProgressSink for ReportWriter {
    fn solution_found(&mut self, index: usize, solution: &Solution) -> Result<(), io::Error> {
        log::info!(
            "Solution {}: taker is participant {}, paying {} sats ({} sats to makers)",
            index + 1,
            solution.taker_index,
            solution.participants[solution.taker_index].fee,
            solution.total_maker_fees
        );
        self.solutions.push(solution.clone());
        self.persist()
    }
}
