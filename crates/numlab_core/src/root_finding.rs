//! Bracketing and iterative root finders.
//!
//! All three iterations stop when two successive estimates agree once rounded
//! to `tolerance_digits` decimal places. Running out of iterations is not an
//! error; the last estimate is returned with [`Termination::IterationLimit`].
//! Degenerate inputs (no bracket, flat secant, vanishing derivative) produce a
//! [`RootResult`] whose root is NaN, so callers must check
//! [`RootResult::is_valid`] before using it.

use crate::error::{DegenerateInputError, EvaluationError};
use crate::expression::{Expr, Symbol};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Secant denominators and derivatives below this magnitude are degenerate.
pub const DEGENERATE_EPSILON: f64 = 1e-10;
/// Largest number of points a bracket scan will sample.
pub const MAX_SCAN_POINTS: usize = 1_000_000;
/// Rounding beyond this many decimals exceeds f64 precision.
const MAX_MATCH_DIGITS: i32 = 15;

/// An interval whose endpoints give f opposite signs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub low: f64,
    pub high: f64,
}

impl Bracket {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// The (NaN, NaN) bracket signalling that none was found.
    pub fn not_found() -> Self {
        Self::new(f64::NAN, f64::NAN)
    }

    pub fn is_valid(&self) -> bool {
        self.low.is_finite() && self.high.is_finite()
    }

    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationSettings {
    /// Number of decimal digits two successive estimates must share.
    pub tolerance_digits: u32,
    pub max_iterations: usize,
}

impl Default for IterationSettings {
    fn default() -> Self {
        Self {
            tolerance_digits: 6,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 100.0,
            step: 1.0,
        }
    }
}

/// Named, append-only series with one entry recorded per iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationHistory {
    series: BTreeMap<String, Vec<f64>>,
}

impl IterationHistory {
    pub fn record(&mut self, key: &str, value: f64) {
        self.series.entry(key.to_string()).or_default().push(value);
    }

    /// The recorded values for `key`, empty if it was never recorded.
    pub fn series(&self, key: &str) -> &[f64] {
        self.series.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Termination {
    Converged,
    IterationLimit,
    Degenerate(DegenerateInputError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootResult {
    pub history: IterationHistory,
    pub root: f64,
    pub iterations: usize,
    pub termination: Termination,
}

impl RootResult {
    fn finished(history: IterationHistory, root: f64, iterations: usize, converged: bool) -> Self {
        Self {
            history,
            root,
            iterations,
            termination: if converged {
                Termination::Converged
            } else {
                Termination::IterationLimit
            },
        }
    }

    fn degenerate(reason: DegenerateInputError, history: IterationHistory, iterations: usize) -> Self {
        warn!("Root finding stopped: {reason}");
        Self {
            history,
            root: f64::NAN,
            iterations,
            termination: Termination::Degenerate(reason),
        }
    }

    /// `true` when `root` holds a usable estimate.
    pub fn is_valid(&self) -> bool {
        self.root.is_finite() && !matches!(self.termination, Termination::Degenerate(_))
    }

    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Compares `a` and `b` after rounding both to `digits` decimal places.
pub fn match_decimals(a: f64, b: f64, digits: u32) -> bool {
    let digits = i32::try_from(digits).map_or(MAX_MATCH_DIGITS, |d| d.min(MAX_MATCH_DIGITS));
    let factor = 10f64.powi(digits);
    (a * factor).round() == (b * factor).round()
}

fn sign(value: f64) -> i8 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

/// Scans `start..=end` in increments of `step` for the first sign change of f.
///
/// Points where f cannot be evaluated are skipped. If f fails at both `start`
/// and `start + step`, or no sign change exists, returns [`Bracket::not_found`].
pub fn find_bracket(f: &Expr, var: &Symbol, start: f64, end: f64, step: f64) -> Bracket {
    if !(step > 0.0 && step.is_finite() && start.is_finite() && end.is_finite()) {
        warn!("Invalid scan range [{start}, {end}] with step {step}.");
        return Bracket::not_found();
    }
    let code = match f.compile(std::slice::from_ref(var)) {
        Ok(code) => code,
        Err(err) => {
            warn!("Cannot scan for a bracket: {err}");
            return Bracket::not_found();
        }
    };
    if end < start {
        return Bracket::not_found();
    }
    let last = ((end - start) / step + 1e-9).floor();
    if !last.is_finite() || last >= MAX_SCAN_POINTS as f64 {
        warn!("Scan of [{start}, {end}] with step {step} exceeds {MAX_SCAN_POINTS} points.");
        return Bracket::not_found();
    }
    let last = last as usize;
    let point = |k: usize| start + k as f64 * step;

    let (mut prev_x, mut prev_f, first) = match code.eval(&[start]) {
        Ok(value) => (start, value, 0),
        Err(err) => {
            debug!("Initial function evaluation failed at x = {start}: {err}");
            let retry = point(1);
            match code.eval(&[retry]) {
                Ok(value) if last >= 1 => (retry, value, 1),
                Ok(_) => return Bracket::not_found(),
                Err(err) => {
                    warn!("Function evaluation failed again at x = {retry}: {err}");
                    return Bracket::not_found();
                }
            }
        }
    };

    for k in (first + 1)..=last {
        let x = point(k);
        let fx = match code.eval(&[x]) {
            Ok(value) => value,
            Err(err) => {
                debug!("Skipping x = {x} due to error: {err}");
                continue;
            }
        };
        if sign(prev_f) != sign(fx) {
            debug!("Sign change detected between x = {prev_x} and x = {x}.");
            return Bracket::new(prev_x, x);
        }
        prev_x = x;
        prev_f = fx;
    }

    warn!("No sign change found in [{start}, {end}].");
    Bracket::not_found()
}

/// Halves the bracket until successive midpoints agree.
///
/// Records series `a`, `b` (the interval in use) and `c` (its midpoint) per iteration.
pub fn bisection(
    f: &Expr,
    var: &Symbol,
    bracket: Bracket,
    settings: IterationSettings,
) -> Result<RootResult, EvaluationError> {
    let mut history = IterationHistory::default();
    if !bracket.is_valid() {
        return Ok(RootResult::degenerate(
            DegenerateInputError::InvalidBracket(bracket.low, bracket.high),
            history,
            0,
        ));
    }

    let code = f.compile(std::slice::from_ref(var))?;
    let (mut a, mut b) = (bracket.low, bracket.high);
    let mut fa = code.eval(&[a])?;
    let fb = code.eval(&[b])?;
    if sign(fa) * sign(fb) > 0 {
        return Ok(RootResult::degenerate(
            DegenerateInputError::NoSignChange,
            history,
            0,
        ));
    }

    let mut previous: Option<f64> = None;
    let mut c = bracket.midpoint();
    for i in 0..settings.max_iterations {
        c = (a + b) / 2.0;
        let fc = code.eval(&[c])?;
        history.record("a", a);
        history.record("b", b);
        history.record("c", c);
        trace!("bisection {i}: a = {a}, b = {b}, c = {c}, f(c) = {fc}");

        let settled = previous.is_some_and(|p| match_decimals(c, p, settings.tolerance_digits));
        if fc == 0.0 || settled {
            return Ok(RootResult::finished(history, c, i + 1, true));
        }

        if sign(fc) == sign(fa) {
            a = c;
            fa = fc;
        } else {
            b = c;
        }
        previous = Some(c);
    }

    Ok(RootResult::finished(
        history,
        c,
        settings.max_iterations,
        false,
    ))
}

/// Secant iteration seeded with the bracket ends.
///
/// Records series `x`: both seeds followed by one estimate per iteration.
pub fn secant(
    f: &Expr,
    var: &Symbol,
    bracket: Bracket,
    settings: IterationSettings,
) -> Result<RootResult, EvaluationError> {
    let mut history = IterationHistory::default();
    if !bracket.is_valid() {
        return Ok(RootResult::degenerate(
            DegenerateInputError::InvalidBracket(bracket.low, bracket.high),
            history,
            0,
        ));
    }

    let code = f.compile(std::slice::from_ref(var))?;
    let (mut x_prev, mut x_curr) = (bracket.low, bracket.high);
    history.record("x", x_prev);
    history.record("x", x_curr);
    let mut f_prev = code.eval(&[x_prev])?;

    for i in 0..settings.max_iterations {
        let f_curr = code.eval(&[x_curr])?;
        let denominator = f_curr - f_prev;
        if denominator.abs() < DEGENERATE_EPSILON {
            // Keep what was computed only if at least one step succeeded.
            let partial = if i > 0 {
                history
            } else {
                IterationHistory::default()
            };
            return Ok(RootResult::degenerate(
                DegenerateInputError::VanishingSecant { iteration: i },
                partial,
                i,
            ));
        }

        let x_next = x_curr - f_curr * (x_curr - x_prev) / denominator;
        history.record("x", x_next);
        trace!("secant {i}: x = {x_next}, f(x_prev) = {f_curr}");

        if match_decimals(x_next, x_curr, settings.tolerance_digits) {
            return Ok(RootResult::finished(history, x_next, i + 1, true));
        }
        x_prev = x_curr;
        f_prev = f_curr;
        x_curr = x_next;
    }

    Ok(RootResult::finished(
        history,
        x_curr,
        settings.max_iterations,
        false,
    ))
}

/// Newton-Raphson iteration from the bracket midpoint.
///
/// The derivative is computed once, symbolically. Records series `x`: the
/// starting point followed by one estimate per iteration.
pub fn newton(
    f: &Expr,
    var: &Symbol,
    bracket: Bracket,
    settings: IterationSettings,
) -> Result<RootResult, EvaluationError> {
    let mut history = IterationHistory::default();
    if !bracket.is_valid() {
        return Ok(RootResult::degenerate(
            DegenerateInputError::InvalidBracket(bracket.low, bracket.high),
            history,
            0,
        ));
    }

    let vars = std::slice::from_ref(var);
    let code = f.compile(vars)?;
    let derivative = f.differentiate(var).compile(vars)?;

    let mut x = bracket.midpoint();
    history.record("x", x);

    for i in 0..settings.max_iterations {
        let fx = code.eval(&[x])?;
        let dfx = derivative.eval(&[x])?;
        if dfx.abs() < DEGENERATE_EPSILON {
            return Ok(RootResult::degenerate(
                DegenerateInputError::VanishingDerivative { x, derivative: dfx },
                IterationHistory::default(),
                i,
            ));
        }

        let next = x - fx / dfx;
        history.record("x", next);
        trace!("newton {i}: x = {next}, f(x) = {fx}, f'(x) = {dfx}");

        if match_decimals(next, x, settings.tolerance_digits) {
            return Ok(RootResult::finished(history, next, i + 1, true));
        }
        x = next;
    }

    Ok(RootResult::finished(
        history,
        x,
        settings.max_iterations,
        false,
    ))
}

#[cfg(test)]
mod tests {
    use super::{
        bisection, find_bracket, match_decimals, newton, secant, Bracket, IterationSettings,
        Termination, MAX_SCAN_POINTS,
    };
    use crate::equation_engine::{parse, SymbolTable};
    use crate::error::{DegenerateInputError, EvaluationError};
    use crate::expression::{Expr, Symbol};

    fn parse_x(input: &str) -> (Expr, Symbol) {
        let mut table = SymbolTable::with_variables(&["x"]).expect("x is not reserved");
        let expr = parse(input, &mut table).expect("expression should parse");
        let x = table.get("x").cloned().expect("x registered");
        (expr, x)
    }

    fn settings(digits: u32, max_iterations: usize) -> IterationSettings {
        IterationSettings {
            tolerance_digits: digits,
            max_iterations,
        }
    }

    #[test]
    fn match_decimals_rounds_before_comparing() {
        assert!(match_decimals(1.4142135, 1.4142139, 6));
        assert!(!match_decimals(1.41421, 1.41429, 6));
        assert!(match_decimals(2.04, 1.96, 0));
        assert!(!match_decimals(2.04, 1.96, 1));
    }

    #[test]
    fn find_bracket_returns_first_sign_change() {
        let (f, x) = parse_x("x - 2.5");
        assert_eq!(find_bracket(&f, &x, 0.0, 100.0, 1.0), Bracket::new(2.0, 3.0));

        let (f, x) = parse_x("(x - 3) * (x - 7)");
        assert_eq!(find_bracket(&f, &x, 0.0, 100.0, 1.0), Bracket::new(2.0, 3.0));
    }

    #[test]
    fn find_bracket_catches_roots_on_the_grid() {
        let (f, x) = parse_x("x - 2");
        assert_eq!(find_bracket(&f, &x, 0.0, 10.0, 1.0), Bracket::new(1.0, 2.0));
    }

    #[test]
    fn find_bracket_skips_points_that_fail_to_evaluate() {
        // Singular at x = 2; the last valid point before it is kept.
        let (f, x) = parse_x("(x - 5) / (x - 2)");
        assert_eq!(find_bracket(&f, &x, 0.0, 10.0, 1.0), Bracket::new(1.0, 3.0));

        // log is non-real at x = 0, so scanning restarts from x = 1.
        let (f, x) = parse_x("log(x - 0.5)");
        assert_eq!(find_bracket(&f, &x, 0.0, 10.0, 1.0), Bracket::new(1.0, 2.0));
    }

    #[test]
    fn find_bracket_reports_not_found() {
        let (f, x) = parse_x("x^2 + 1");
        assert!(!find_bracket(&f, &x, 0.0, 100.0, 1.0).is_valid());

        let (f, x) = parse_x("sqrt(x - 50)");
        assert!(!find_bracket(&f, &x, 0.0, 100.0, 1.0).is_valid());

        let (f, x) = parse_x("x * k");
        assert!(!find_bracket(&f, &x, 0.0, 100.0, 1.0).is_valid());

        let (f, x) = parse_x("x - 2.5");
        assert!(!find_bracket(&f, &x, 0.0, 100.0, 0.0).is_valid());
    }

    #[test]
    fn bisection_converges_and_halves_the_bracket() {
        let (f, x) = parse_x("x^2 - 2");
        let result = bisection(&f, &x, Bracket::new(1.0, 2.0), settings(6, 100))
            .expect("evaluation succeeds");
        assert!(result.converged());
        assert!(result.is_valid());
        assert!((result.root - 2f64.sqrt()).abs() < 1e-5);
        assert!(f.evaluate_at(&x, result.root).expect("evaluates").abs() < 1e-5);

        let a = result.history.series("a");
        let b = result.history.series("b");
        let c = result.history.series("c");
        assert_eq!(a.len(), c.len());
        assert_eq!(b.len(), c.len());
        assert_eq!(result.iterations, c.len());
        for i in 1..a.len() {
            let width = b[i] - a[i];
            let previous = b[i - 1] - a[i - 1];
            assert!((width - previous / 2.0).abs() < 1e-15);
        }
        let keys: Vec<&str> = result.history.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn bisection_handles_decreasing_functions() {
        let (f, x) = parse_x("2 - x^2");
        let result = bisection(&f, &x, Bracket::new(1.0, 2.0), settings(8, 100))
            .expect("evaluation succeeds");
        assert!(result.converged());
        assert!((result.root - 2f64.sqrt()).abs() < 1e-7);
    }

    #[test]
    fn bisection_exact_midpoint_root_converges_immediately() {
        let (f, x) = parse_x("x - 2.5");
        let result = bisection(&f, &x, Bracket::new(2.0, 3.0), settings(6, 100))
            .expect("evaluation succeeds");
        assert!(result.converged());
        assert_eq!(result.root, 2.5);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn bisection_iteration_limit_returns_last_midpoint() {
        let (f, x) = parse_x("x^2 - 2");
        let result = bisection(&f, &x, Bracket::new(1.0, 2.0), settings(12, 3))
            .expect("evaluation succeeds");
        assert_eq!(result.termination, Termination::IterationLimit);
        assert!(result.is_valid());
        assert_eq!(result.history.series("c"), &[1.5, 1.25, 1.375]);
        assert_eq!(result.root, 1.375);
    }

    #[test]
    fn bisection_rejects_invalid_brackets() {
        let (f, x) = parse_x("x^2 - 2");
        let result = bisection(&f, &x, Bracket::not_found(), settings(6, 100))
            .expect("no evaluation happens");
        assert!(!result.is_valid());
        assert!(result.root.is_nan());
        assert!(result.history.is_empty());

        let result = bisection(&f, &x, Bracket::new(2.0, 3.0), settings(6, 100))
            .expect("evaluation succeeds");
        assert_eq!(
            result.termination,
            Termination::Degenerate(DegenerateInputError::NoSignChange)
        );
    }

    #[test]
    fn bisection_propagates_evaluation_failures() {
        let (f, x) = parse_x("1 / (x - 1.5)");
        let err = bisection(&f, &x, Bracket::new(1.0, 2.0), settings(6, 100))
            .expect_err("midpoint is singular");
        assert_eq!(err, EvaluationError::Singular);
    }

    #[test]
    fn secant_converges() {
        let (f, x) = parse_x("x^2 - 2");
        let result = secant(&f, &x, Bracket::new(1.0, 2.0), settings(8, 100))
            .expect("evaluation succeeds");
        assert!(result.converged());
        assert!((result.root - 2f64.sqrt()).abs() < 1e-8);
        let xs = result.history.series("x");
        assert_eq!(&xs[..2], &[1.0, 2.0]);
        assert_eq!(xs.len(), result.iterations + 2);
    }

    #[test]
    fn secant_flat_function_has_empty_history() {
        let (f, x) = parse_x("5 + 0*x");
        let result = secant(&f, &x, Bracket::new(1.0, 2.0), settings(6, 100))
            .expect("evaluation succeeds");
        assert!(!result.is_valid());
        assert!(result.history.is_empty());
        assert_eq!(
            result.termination,
            Termination::Degenerate(DegenerateInputError::VanishingSecant { iteration: 0 })
        );
    }

    #[test]
    fn secant_keeps_partial_history_after_a_successful_step() {
        // Seeds -1 and 2 on x^2 step to -2, where f(-2) == f(2).
        let (f, x) = parse_x("x^2");
        let result = secant(&f, &x, Bracket::new(-1.0, 2.0), settings(6, 100))
            .expect("evaluation succeeds");
        assert!(!result.is_valid());
        assert_eq!(result.history.series("x"), &[-1.0, 2.0, -2.0]);
        assert_eq!(
            result.termination,
            Termination::Degenerate(DegenerateInputError::VanishingSecant { iteration: 1 })
        );
    }

    #[test]
    fn newton_converges_from_midpoint() {
        let (f, x) = parse_x("x^3 - 2*x - 5");
        let result = newton(&f, &x, Bracket::new(2.0, 3.0), settings(10, 100))
            .expect("evaluation succeeds");
        assert!(result.converged());
        assert_eq!(result.history.series("x")[0], 2.5);
        assert!((result.root - 2.0945514815423265).abs() < 1e-9);
    }

    #[test]
    fn newton_fails_on_vanishing_derivative() {
        let (f, x) = parse_x("x^2 - 4");
        let result = newton(&f, &x, Bracket::new(-1.0, 1.0), settings(6, 100))
            .expect("evaluation succeeds");
        assert!(!result.is_valid());
        assert!(result.history.is_empty());
        assert!(matches!(
            result.termination,
            Termination::Degenerate(DegenerateInputError::VanishingDerivative { .. })
        ));
    }

    #[test]
    fn all_methods_agree_on_a_scanned_bracket() {
        let (f, x) = parse_x("cos(x) - x");
        let bracket = find_bracket(&f, &x, 0.0, 10.0, 0.5);
        assert_eq!(bracket, Bracket::new(0.5, 1.0));
        let expected = 0.7390851332151607;
        for method in [bisection, secant, newton] {
            let result = method(&f, &x, bracket, settings(9, 200)).expect("evaluation succeeds");
            assert!(result.converged());
            assert!((result.root - expected).abs() < 1e-7);
        }
    }

    #[test]
    fn excessive_digit_counts_are_clamped() {
        assert!(!match_decimals(1.0, 2.0, 400));
        assert!(!match_decimals(1.0, 1.0 + 1e-12, u32::MAX));
        assert!(match_decimals(1.0, 1.0, u32::MAX));

        let (f, x) = parse_x("x^2 - 2");
        let result = bisection(&f, &x, Bracket::new(1.0, 2.0), settings(400, 200))
            .expect("evaluation succeeds");
        assert!(result.converged());
        assert!(result.iterations > 40);
        assert!((result.root - std::f64::consts::SQRT_2).abs() < 1e-14);
    }

    #[test]
    fn oversized_scans_are_refused() {
        let (f, x) = parse_x("x - 2.5");
        assert!(!find_bracket(&f, &x, 0.0, f64::MAX, 1e-300).is_valid());
        assert!(!find_bracket(&f, &x, 0.0, 1e12, 1.0).is_valid());
        assert!(!find_bracket(&f, &x, 0.0, MAX_SCAN_POINTS as f64, 1.0).is_valid());
        assert_eq!(
            find_bracket(&f, &x, 0.0, (MAX_SCAN_POINTS - 1) as f64, 1.0),
            Bracket::new(2.0, 3.0)
        );
    }
}
