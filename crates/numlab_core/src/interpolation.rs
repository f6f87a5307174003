//! Polynomial interpolation through sampled points.
//!
//! Both constructions build the interpolating polynomial symbolically in the
//! caller's variable, so the result can be displayed, expanded or evaluated
//! elsewhere. Nodes must be distinct; Newton forms additionally assume they are
//! ascending, although the polynomial itself does not depend on the order.

use crate::error::{DegenerateInputError, SolveError};
use crate::expression::{Expr, Symbol};
use log::trace;
use serde::Serialize;

/// Divided differences of a sample set.
///
/// Level 0 holds the y-values. Level k has `n - k` entries, where
/// `D[k][m] = (D[k-1][m+1] - D[k-1][m]) / (x[k+m] - x[m])`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifferenceTable {
    levels: Vec<Vec<f64>>,
}

impl DifferenceTable {
    pub fn build(x: &[f64], y: &[f64]) -> Result<Self, DegenerateInputError> {
        validate_nodes(x, y)?;
        let n = x.len();
        let mut levels = Vec::with_capacity(n);
        levels.push(y.to_vec());
        for k in 1..n {
            let previous = &levels[k - 1];
            let level: Vec<f64> = (0..n - k)
                .map(|m| (previous[m + 1] - previous[m]) / (x[k + m] - x[m]))
                .collect();
            levels.push(level);
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[Vec<f64>] {
        &self.levels
    }

    pub fn level(&self, k: usize) -> Option<&[f64]> {
        self.levels.get(k).map(Vec::as_slice)
    }

    /// First entry of every level: the forward coefficients.
    pub fn leading(&self) -> Vec<f64> {
        self.levels.iter().filter_map(|l| l.first().copied()).collect()
    }

    /// Last entry of every level: the backward coefficients.
    pub fn trailing(&self) -> Vec<f64> {
        self.levels.iter().filter_map(|l| l.last().copied()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasisTerm {
    pub expr: Expr,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LagrangeResult {
    /// One basis polynomial per node, with its value at the evaluation point.
    pub basis: Vec<BasisTerm>,
    pub polynomial: Expr,
    /// Ascending-power coefficients of `polynomial`, when it expands cleanly.
    pub coefficients: Option<Vec<f64>>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewtonResult {
    pub table: DifferenceTable,
    pub polynomial: Expr,
    pub coefficients: Option<Vec<f64>>,
    pub value: f64,
}

fn validate_nodes(x: &[f64], y: &[f64]) -> Result<(), DegenerateInputError> {
    if x.len() != y.len() {
        return Err(DegenerateInputError::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if x.is_empty() {
        return Err(DegenerateInputError::TooFewSamples {
            required: 1,
            actual: 0,
        });
    }
    for first in 0..x.len() {
        for second in first + 1..x.len() {
            if x[first] == x[second] {
                return Err(DegenerateInputError::DuplicateNodes { first, second });
            }
        }
    }
    Ok(())
}

fn evaluate(polynomial: &Expr, var: &Symbol, x_eval: f64) -> Result<f64, SolveError> {
    polynomial
        .evaluate_at(var, x_eval)
        .map_err(|source| SolveError::EvaluationAt { x: x_eval, source })
}

/// Lagrange form: `P(var) = sum of y[n] * L[n](var)`.
pub fn lagrange(x: &[f64], y: &[f64], x_eval: f64, var: &Symbol) -> Result<LagrangeResult, SolveError> {
    validate_nodes(x, y)?;

    let mut basis = Vec::with_capacity(x.len());
    let mut terms = Vec::with_capacity(x.len());
    for (n, &xn) in x.iter().enumerate() {
        let factors = x.iter().enumerate().filter(|&(m, _)| m != n).map(|(_, &xm)| {
            (Expr::from(var) - Expr::from(xm)) * Expr::from(1.0 / (xn - xm))
        });
        let expr = Expr::product(factors);
        let value = evaluate(&expr, var, x_eval)?;
        trace!("L{n}({x_eval}) = {value}");
        terms.push(Expr::from(y[n]) * expr.clone());
        basis.push(BasisTerm { expr, value });
    }

    let polynomial = Expr::sum(terms);
    let value = evaluate(&polynomial, var, x_eval)?;
    Ok(LagrangeResult {
        basis,
        coefficients: polynomial.polynomial_coefficients(var),
        polynomial,
        value,
    })
}

/// Newton's forward divided-difference polynomial anchored at `x[0]`.
pub fn newton_forward(x: &[f64], y: &[f64], x_eval: f64, var: &Symbol) -> Result<NewtonResult, SolveError> {
    let table = DifferenceTable::build(x, y)?;
    let polynomial = newton_polynomial(&table.leading(), x.iter().copied(), var);
    newton_result(table, polynomial, x_eval, var)
}

/// Newton's backward polynomial anchored at the last node, using the trailing diagonal.
pub fn newton_backward(x: &[f64], y: &[f64], x_eval: f64, var: &Symbol) -> Result<NewtonResult, SolveError> {
    let table = DifferenceTable::build(x, y)?;
    let polynomial = newton_polynomial(&table.trailing(), x.iter().rev().copied(), var);
    newton_result(table, polynomial, x_eval, var)
}

/// Sums `c[k] * (var - n[0]) * ... * (var - n[k-1])` over the coefficients.
fn newton_polynomial(
    coefficients: &[f64],
    mut nodes: impl Iterator<Item = f64>,
    var: &Symbol,
) -> Expr {
    let mut terms = Vec::with_capacity(coefficients.len());
    let mut running = Expr::from(1.0);
    for (k, &c) in coefficients.iter().enumerate() {
        terms.push(Expr::from(c) * running.clone());
        if k + 1 < coefficients.len() {
            if let Some(node) = nodes.next() {
                running = running * (Expr::from(var) - Expr::from(node));
            }
        }
    }
    Expr::sum(terms)
}

fn newton_result(
    table: DifferenceTable,
    polynomial: Expr,
    x_eval: f64,
    var: &Symbol,
) -> Result<NewtonResult, SolveError> {
    let value = evaluate(&polynomial, var, x_eval)?;
    Ok(NewtonResult {
        table,
        coefficients: polynomial.polynomial_coefficients(var),
        polynomial,
        value,
    })
}
