//! Interface to the MILP solver.
//!
//! The enumeration engine describes its problem with the [`Model`] IR (binary
//! variables, integer-linear constraints) and hands it to a [`Solve`] backend
//! together with a wall-clock budget. The IR is the mutable model object: the
//! loop appends cut constraints to it between solves, and a backend is free to
//! rebuild its internal problem from scratch on every call.

pub mod microlp;

use std::{error, fmt, time::Duration};

/// Handle to a binary decision variable of a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Constraint comparison sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

/// A linear constraint `sum(coeff * var) <sense> rhs` over binary variables.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub terms: Vec<(VarId, i64)>,
    pub sense: Sense,
    pub rhs: i64,
}

/// An integer-linear program over binary variables.
///
/// All amounts are integer satoshis, so every coefficient is an `i64` and the
/// program is strictly integer-linear.
#[derive(Debug, Clone, Default)]
pub struct Model {
    num_vars: usize,
    constraints: Vec<Constraint>,
    objective: Vec<(VarId, i64)>,
}

impl Model {
    pub fn new() -> Model {
        Model::default()
    }

    pub fn add_binary(&mut self) -> VarId {
        let id = VarId(self.num_vars);
        self.num_vars += 1;
        id
    }

    /// Append a constraint. Cuts injected by the enumeration loop go through
    /// here too, they are not special-cased.
    pub fn add_constraint(&mut self, terms: Vec<(VarId, i64)>, sense: Sense, rhs: i64) {
        assert!(!terms.is_empty(), "constraint without terms");
        self.constraints.push(Constraint { terms, sense, rhs });
    }

    /// Set the linear objective, to be minimized. An empty objective makes
    /// every solve a pure feasibility check.
    pub fn set_objective(&mut self, terms: Vec<(VarId, i64)>) {
        self.objective = terms;
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &[(VarId, i64)] {
        &self.objective
    }

    /// Check a valuation against every constraint. A backend returning a
    /// valuation which fails this check is reported as a solver error by the
    /// caller.
    pub fn check_valuation(&self, valuation: &Valuation) -> Result<(), String> {
        if valuation.0.len() != self.num_vars {
            return Err(format!(
                "valuation has {} variables, model has {}",
                valuation.0.len(),
                self.num_vars
            ));
        }
        for (i, constraint) in self.constraints.iter().enumerate() {
            let lhs: i64 = constraint
                .terms
                .iter()
                .map(|(var, coeff)| {
                    if valuation.value(*var) {
                        *coeff
                    } else {
                        0
                    }
                })
                .sum();
            let holds = match constraint.sense {
                Sense::Le => lhs <= constraint.rhs,
                Sense::Ge => lhs >= constraint.rhs,
                Sense::Eq => lhs == constraint.rhs,
            };
            if !holds {
                return Err(format!(
                    "constraint {} violated: lhs {} {:?} rhs {}",
                    i, lhs, constraint.sense, constraint.rhs
                ));
            }
        }
        Ok(())
    }
}

/// The values taken by a [`Model`]'s variables in a feasible solution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Valuation(Vec<bool>);

impl Valuation {
    pub fn new(values: Vec<bool>) -> Valuation {
        Valuation(values)
    }

    pub fn value(&self, var: VarId) -> bool {
        self.0[var.0]
    }
}

/// What a single solve call concluded.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A feasible valuation was found.
    Feasible(Valuation),
    /// The model was proved infeasible.
    Infeasible,
    /// The time budget ran out before a feasible valuation was found.
    TimeLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverError(String);

impl SolverError {
    pub fn new(detail: impl fmt::Display) -> SolverError {
        SolverError(detail.to_string())
    }
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Solver error: {}", self.0)
    }
}

impl error::Error for SolverError {}

/// A MILP solver backend.
pub trait Solve {
    /// Solve the model within the given wall-clock budget.
    fn solve(&self, model: &Model, time_limit: Duration) -> Result<Outcome, SolverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valuation_check() {
        let mut model = Model::new();
        let a = model.add_binary();
        let b = model.add_binary();
        model.add_constraint(vec![(a, 1), (b, 1)], Sense::Eq, 1);
        model.add_constraint(vec![(a, 3), (b, -2)], Sense::Le, 3);

        assert!(model
            .check_valuation(&Valuation::new(vec![true, false]))
            .is_ok());
        assert!(model
            .check_valuation(&Valuation::new(vec![false, true]))
            .is_ok());
        // Violates the partition equality.
        assert!(model
            .check_valuation(&Valuation::new(vec![true, true]))
            .is_err());
        // Wrong dimension.
        assert!(model.check_valuation(&Valuation::new(vec![true])).is_err());
    }
}
