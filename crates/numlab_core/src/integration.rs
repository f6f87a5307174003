//! Composite Newton-Cotes quadrature on a uniform grid.

use crate::error::{DegenerateInputError, SolveError};
use crate::expression::{Expr, Symbol};
use log::debug;
use serde::{Deserialize, Serialize};

/// Interval count used when a request does not specify one.
pub const DEFAULT_INTERVALS: usize = 100;
/// Default for Simpson's 3/8 rule, already a multiple of three.
pub const DEFAULT_THREE_EIGHTH_INTERVALS: usize = 99;
/// Largest interval count any rule will sample.
pub const MAX_INTERVALS: usize = 1_000_000;

/// An (x, f(x)) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuadratureResult {
    pub h: f64,
    /// Interval count actually used, after any rounding up.
    pub intervals: usize,
    pub nodes: Vec<Sample>,
    pub integral: f64,
}

/// Samples f at `n + 1` evenly spaced nodes over `[a, b]`.
fn sample_grid(f: &Expr, var: &Symbol, a: f64, b: f64, n: usize) -> Result<(f64, Vec<Sample>), SolveError> {
    if n == 0 {
        return Err(DegenerateInputError::ZeroIntervals.into());
    }
    if n > MAX_INTERVALS {
        return Err(too_many_intervals(n as f64).into());
    }
    let code = f.compile(std::slice::from_ref(var))?;
    let h = (b - a) / n as f64;
    let nodes = (0..=n)
        .map(|i| {
            let x = a + i as f64 * h;
            code.eval(&[x])
                .map(|y| Sample { x, y })
                .map_err(|source| SolveError::EvaluationAt { x, source })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((h, nodes))
}

/// Weighted node sum where `weight(i)` applies to interior node i.
fn weighted_sum(nodes: &[Sample], weight: impl Fn(usize) -> f64) -> f64 {
    let n = nodes.len() - 1;
    let ends = nodes[0].y + nodes[n].y;
    let interior: f64 = (1..n).map(|i| weight(i) * nodes[i].y).sum();
    ends + interior
}

fn too_many_intervals(requested: f64) -> DegenerateInputError {
    DegenerateInputError::TooManySteps {
        requested,
        limit: MAX_INTERVALS,
    }
}

fn round_up_to_multiple(n: usize, multiple: usize, rule: &str) -> Result<usize, DegenerateInputError> {
    let rounded = n
        .checked_next_multiple_of(multiple)
        .ok_or_else(|| too_many_intervals(n as f64))?;
    if rounded != n {
        debug!("{rule} needs a multiple of {multiple} intervals; using n = {rounded} instead of {n}.");
    }
    Ok(rounded)
}

pub fn trapezoidal(f: &Expr, var: &Symbol, a: f64, b: f64, n: usize) -> Result<QuadratureResult, SolveError> {
    let (h, nodes) = sample_grid(f, var, a, b, n)?;
    let integral = h / 2.0 * weighted_sum(&nodes, |_| 2.0);
    Ok(QuadratureResult {
        h,
        intervals: n,
        nodes,
        integral,
    })
}

/// Simpson's 1/3 rule. An odd `n` is rounded up to the next even count.
pub fn simpson_one_third(f: &Expr, var: &Symbol, a: f64, b: f64, n: usize) -> Result<QuadratureResult, SolveError> {
    let n = round_up_to_multiple(n, 2, "Simpson's 1/3 rule")?;
    let (h, nodes) = sample_grid(f, var, a, b, n)?;
    let integral = h / 3.0 * weighted_sum(&nodes, |i| if i % 2 == 1 { 4.0 } else { 2.0 });
    Ok(QuadratureResult {
        h,
        intervals: n,
        nodes,
        integral,
    })
}

/// Simpson's 3/8 rule. `n` is rounded up to a multiple of three.
pub fn simpson_three_eighth(
    f: &Expr,
    var: &Symbol,
    a: f64,
    b: f64,
    n: usize,
) -> Result<QuadratureResult, SolveError> {
    let n = round_up_to_multiple(n, 3, "Simpson's 3/8 rule")?;
    let (h, nodes) = sample_grid(f, var, a, b, n)?;
    let integral = 3.0 * h / 8.0 * weighted_sum(&nodes, |i| if i % 3 == 0 { 2.0 } else { 3.0 });
    Ok(QuadratureResult {
        h,
        intervals: n,
        nodes,
        integral,
    })
}

#[cfg(test)]
mod tests {
    use super::{simpson_one_third, simpson_three_eighth, trapezoidal, MAX_INTERVALS};
    use crate::equation_engine::{parse, SymbolTable};
    use crate::error::{DegenerateInputError, EvaluationError, SolveError};
    use crate::expression::{Expr, Symbol};

    fn parse_x(input: &str) -> (Expr, Symbol) {
        let mut table = SymbolTable::with_variables(&["x"]).expect("x is not reserved");
        let expr = parse(input, &mut table).expect("expression should parse");
        let x = table.get("x").cloned().expect("x registered");
        (expr, x)
    }

    #[test]
    fn simpson_is_exact_on_cubics() {
        let (f, x) = parse_x("x^3");
        let result = simpson_one_third(&f, &x, 0.0, 1.0, 2).expect("integrable");
        assert!((result.integral - 0.25).abs() < 1e-15);
        assert_eq!(result.nodes.len(), 3);
        assert_eq!(result.h, 0.5);

        let result = simpson_three_eighth(&f, &x, 0.0, 1.0, 3).expect("integrable");
        assert!((result.integral - 0.25).abs() < 1e-15);
    }

    #[test]
    fn trapezoidal_converges_but_is_not_exact() {
        let (f, x) = parse_x("x^3");
        let coarse = trapezoidal(&f, &x, 0.0, 1.0, 2).expect("integrable");
        assert_eq!(coarse.integral, 0.3125);

        let fine = trapezoidal(&f, &x, 0.0, 1.0, 1000).expect("integrable");
        assert!((fine.integral - 0.25).abs() < 1e-6);
        assert!((fine.integral - 0.25).abs() < (coarse.integral - 0.25).abs());
    }

    #[test]
    fn rules_agree_on_smooth_integrand() {
        let (f, x) = parse_x("sin(x)");
        let pi = std::f64::consts::PI;
        let trap = trapezoidal(&f, &x, 0.0, pi, 200).expect("integrable");
        let third = simpson_one_third(&f, &x, 0.0, pi, 200).expect("integrable");
        let eighth = simpson_three_eighth(&f, &x, 0.0, pi, 201).expect("integrable");
        assert!((trap.integral - 2.0).abs() < 1e-4);
        assert!((third.integral - 2.0).abs() < 1e-8);
        assert!((eighth.integral - 2.0).abs() < 1e-8);
    }

    #[test]
    fn interval_counts_are_rounded_up() {
        let (f, x) = parse_x("x^2");
        let third = simpson_one_third(&f, &x, 0.0, 3.0, 5).expect("integrable");
        assert_eq!(third.intervals, 6);
        assert_eq!(third.nodes.len(), 7);
        assert!((third.integral - 9.0).abs() < 1e-12);

        let eighth = simpson_three_eighth(&f, &x, 0.0, 3.0, 4).expect("integrable");
        assert_eq!(eighth.intervals, 6);
        assert!((eighth.h - 0.5).abs() < 1e-15);
        assert!((eighth.integral - 9.0).abs() < 1e-12);
    }

    #[test]
    fn node_failure_aborts_the_rule() {
        let (f, x) = parse_x("1 / x");
        assert_eq!(
            trapezoidal(&f, &x, 0.0, 1.0, 4),
            Err(SolveError::EvaluationAt {
                x: 0.0,
                source: EvaluationError::Singular
            })
        );

        let (f, x) = parse_x("sqrt(x)");
        assert!(matches!(
            simpson_one_third(&f, &x, -1.0, 1.0, 4),
            Err(SolveError::EvaluationAt { .. })
        ));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let (f, x) = parse_x("x");
        assert_eq!(
            trapezoidal(&f, &x, 0.0, 1.0, 0),
            Err(SolveError::Degenerate(DegenerateInputError::ZeroIntervals))
        );
        assert!(simpson_three_eighth(&f, &x, 0.0, 1.0, 0).is_err());
    }

    #[test]
    fn oversized_interval_counts_are_rejected() {
        let (f, x) = parse_x("x");
        for n in [usize::MAX, usize::MAX - 1, MAX_INTERVALS + 1] {
            let outcomes = [
                trapezoidal(&f, &x, 0.0, 1.0, n),
                simpson_one_third(&f, &x, 0.0, 1.0, n),
                simpson_three_eighth(&f, &x, 0.0, 1.0, n),
            ];
            for outcome in outcomes {
                assert!(
                    matches!(
                        outcome,
                        Err(SolveError::Degenerate(DegenerateInputError::TooManySteps {
                            limit: MAX_INTERVALS,
                            ..
                        }))
                    ),
                    "n = {n} should be rejected, got {outcome:?}"
                );
            }
        }
        let at_limit = trapezoidal(&f, &x, 0.0, 1.0, 999_999).expect("within the limit");
        assert_eq!(at_limit.intervals, 999_999);
    }
}
