//! MILP backend on top of the pure-Rust `microlp` solver.

use crate::solver::{Model, Outcome, Sense, Solve, SolverError, Valuation};

use std::{collections::HashMap, time::Duration};

use microlp::{ComparisonOp, OptimizationDirection, Problem, Status};

/// Solves [`Model`]s with `microlp`'s branch-and-bound.
///
/// The backend is stateless: every call translates the IR into a fresh
/// `microlp` problem, which is linear in the model size and negligible next
/// to the solve itself. The wall-clock budget is handed to the solver, which
/// stops cleanly on expiry: with an incumbent in hand that incumbent is a
/// feasible valuation and is returned as such, without one the call reports
/// [`Outcome::TimeLimit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Microlp;

impl Solve for Microlp {
    fn solve(&self, model: &Model, time_limit: Duration) -> Result<Outcome, SolverError> {
        let objective: HashMap<usize, i64> = model
            .objective()
            .iter()
            .map(|(var, coeff)| (var.index(), *coeff))
            .collect();
        let mut problem = Problem::new(OptimizationDirection::Minimize);
        problem.set_time_limit(time_limit);
        let vars: Vec<microlp::Variable> = (0..model.num_vars())
            .map(|i| {
                let obj_coeff = objective.get(&i).copied().unwrap_or(0) as f64;
                problem.add_binary_var(obj_coeff)
            })
            .collect();
        for constraint in model.constraints() {
            let expr: Vec<(microlp::Variable, f64)> = constraint
                .terms
                .iter()
                .map(|(var, coeff)| (vars[var.index()], *coeff as f64))
                .collect();
            let op = match constraint.sense {
                Sense::Le => ComparisonOp::Le,
                Sense::Ge => ComparisonOp::Ge,
                Sense::Eq => ComparisonOp::Eq,
            };
            problem.add_constraint(expr, op, constraint.rhs as f64);
        }

        match problem.solve() {
            Ok(solution) => match solution.status() {
                Status::Optimal | Status::Feasible => {
                    let values = vars
                        .iter()
                        .map(|var| solution.var_value(*var) > 0.5)
                        .collect();
                    Ok(Outcome::Feasible(Valuation::new(values)))
                }
                // The budget ran out before any integer point was found.
                Status::Interrupted => Ok(Outcome::TimeLimit),
            },
            Err(microlp::Error::Infeasible) => Ok(Outcome::Infeasible),
            Err(e) => Err(SolverError::new(e)),
        }
    }
}
