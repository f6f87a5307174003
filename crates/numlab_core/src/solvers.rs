use crate::equation_engine::Bytecode;
use crate::error::{DegenerateInputError, EvaluationError, SolveError};
use crate::expression::{Expr, Symbol};
use crate::traits::{SlopeField, Steppable};
use log::trace;
use serde::{Deserialize, Serialize};

/// Guards the step count against ratios nudged just above an integer.
const STEP_COUNT_SLACK: f64 = 1e-9;
/// Largest number of steps a single integration may take.
pub const MAX_STEPS: usize = 1_000_000;

/// Where an ODE integration stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTarget {
    /// Step from x0 until the target abscissa is reached.
    Point(f64),
    /// Step from x0 into `[low, high]` and report that window.
    Range { low: f64, high: f64 },
}

/// Forward Euler.
#[derive(Debug, Default)]
pub struct Euler {
    slopes: Vec<f64>,
}

impl Euler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Steppable for Euler {
    fn step(
        &mut self,
        field: &impl SlopeField,
        x: f64,
        y: f64,
        h: f64,
        _next_x: f64,
    ) -> Result<f64, EvaluationError> {
        let slope = field.slope(x, y)?;
        self.slopes.push(slope);
        Ok(y + h * slope)
    }
}

/// Heun's predictor-corrector.
#[derive(Debug, Default)]
pub struct ModifiedEuler {
    predicted: Vec<f64>,
    slopes: Vec<f64>,
    corrector_slopes: Vec<f64>,
}

impl ModifiedEuler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Steppable for ModifiedEuler {
    fn step(
        &mut self,
        field: &impl SlopeField,
        x: f64,
        y: f64,
        h: f64,
        next_x: f64,
    ) -> Result<f64, EvaluationError> {
        // Predictor: y* = y + h * f(x, y)
        let slope = field.slope(x, y)?;
        let predicted = y + h * slope;

        // Corrector: average the slopes at both ends of the step
        let corrector = field.slope(next_x, predicted)?;

        self.slopes.push(slope);
        self.predicted.push(predicted);
        self.corrector_slopes.push(corrector);
        Ok(y + h / 2.0 * (slope + corrector))
    }
}

/// A user expression in `x` and `y` compiled as the right-hand side of y' = f(x, y).
pub struct ExpressionField {
    code: Bytecode,
}

impl ExpressionField {
    pub fn new(f: &Expr, x: &Symbol, y: &Symbol) -> Result<Self, EvaluationError> {
        Ok(Self {
            code: f.compile(&[x.clone(), y.clone()])?,
        })
    }
}

impl SlopeField for ExpressionField {
    fn slope(&self, x: f64, y: f64) -> Result<f64, EvaluationError> {
        self.code.eval(&[x, y])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EulerResult {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Slope used for each step; one shorter than `x`.
    pub slopes: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifiedEulerResult {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub predicted: Vec<f64>,
    pub slopes: Vec<f64>,
    pub corrector_slopes: Vec<f64>,
}

fn step_count(span: f64, h: f64) -> Result<usize, DegenerateInputError> {
    let steps = (span / h - STEP_COUNT_SLACK).ceil().max(0.0);
    if !steps.is_finite() || steps > MAX_STEPS as f64 {
        return Err(DegenerateInputError::TooManySteps {
            requested: steps,
            limit: MAX_STEPS,
        });
    }
    Ok(steps as usize)
}

/// Builds the abscissae `x0 + i*h`, or `x0` followed by the range grid.
pub fn abscissae(x0: f64, target: StepTarget, h: f64) -> Result<Vec<f64>, DegenerateInputError> {
    if !(h > 0.0 && h.is_finite()) {
        return Err(DegenerateInputError::InvalidStep(h));
    }
    match target {
        StepTarget::Point(end) => {
            if !end.is_finite() || end < x0 {
                return Err(DegenerateInputError::InvalidRange {
                    x0,
                    low: x0,
                    high: end,
                });
            }
            let n = step_count(end - x0, h)?;
            Ok((0..=n).map(|i| x0 + i as f64 * h).collect())
        }
        StepTarget::Range { low, high } => {
            if !(low.is_finite() && high.is_finite()) || low < x0 || high < low {
                return Err(DegenerateInputError::InvalidRange { x0, low, high });
            }
            let n = step_count(high - low, h)?;
            let mut xs = Vec::with_capacity(n + 2);
            if low != x0 {
                xs.push(x0);
            }
            xs.extend((0..=n).map(|i| low + i as f64 * h));
            Ok(xs)
        }
    }
}

/// `true` when a range grid starts with the lead-in step from x0 to `low`.
fn has_lead_in(x0: f64, target: StepTarget) -> bool {
    matches!(target, StepTarget::Range { low, .. } if low != x0)
}

/// Advances `stepper` across consecutive abscissae by `h`.
///
/// Only a range lead-in step uses the actual spacing between its abscissae.
fn march<S: Steppable>(
    stepper: &mut S,
    field: &impl SlopeField,
    xs: &[f64],
    y0: f64,
    h: f64,
    lead_in: bool,
) -> Result<Vec<f64>, SolveError> {
    let mut ys = Vec::with_capacity(xs.len());
    ys.push(y0);
    for (i, pair) in xs.windows(2).enumerate() {
        let (x, next_x) = (pair[0], pair[1]);
        let y = ys[ys.len() - 1];
        let spacing = if lead_in && i == 0 { next_x - x } else { h };
        let next = stepper
            .step(field, x, y, spacing, next_x)
            .map_err(|source| SolveError::EvaluationAt { x, source })?;
        trace!("step x = {next_x}, y = {next}");
        ys.push(next);
    }
    Ok(ys)
}

pub fn euler_with(
    field: &impl SlopeField,
    x0: f64,
    y0: f64,
    target: StepTarget,
    h: f64,
) -> Result<EulerResult, SolveError> {
    let x = abscissae(x0, target, h)?;
    let mut stepper = Euler::new();
    let y = march(&mut stepper, field, &x, y0, h, has_lead_in(x0, target))?;
    Ok(EulerResult {
        x,
        y,
        slopes: stepper.slopes,
    })
}

pub fn modified_euler_with(
    field: &impl SlopeField,
    x0: f64,
    y0: f64,
    target: StepTarget,
    h: f64,
) -> Result<ModifiedEulerResult, SolveError> {
    let x = abscissae(x0, target, h)?;
    let mut stepper = ModifiedEuler::new();
    let y = march(&mut stepper, field, &x, y0, h, has_lead_in(x0, target))?;
    Ok(ModifiedEulerResult {
        x,
        y,
        predicted: stepper.predicted,
        slopes: stepper.slopes,
        corrector_slopes: stepper.corrector_slopes,
    })
}

/// Euler's method for y' = f(x, y) with y(x0) = y0.
pub fn euler(
    f: &Expr,
    x_var: &Symbol,
    y_var: &Symbol,
    x0: f64,
    y0: f64,
    target: StepTarget,
    h: f64,
) -> Result<EulerResult, SolveError> {
    let field = ExpressionField::new(f, x_var, y_var)?;
    euler_with(&field, x0, y0, target, h)
}

/// Modified Euler (Heun) for y' = f(x, y) with y(x0) = y0.
pub fn modified_euler(
    f: &Expr,
    x_var: &Symbol,
    y_var: &Symbol,
    x0: f64,
    y0: f64,
    target: StepTarget,
    h: f64,
) -> Result<ModifiedEulerResult, SolveError> {
    let field = ExpressionField::new(f, x_var, y_var)?;
    modified_euler_with(&field, x0, y0, target, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::{parse, SymbolTable};
    use std::cell::RefCell;

    fn parse_xy(input: &str) -> (Expr, Symbol, Symbol) {
        let mut table = SymbolTable::with_variables(&["x", "y"]).expect("not reserved");
        let expr = parse(input, &mut table).expect("expression should parse");
        let x = table.get("x").cloned().expect("x registered");
        let y = table.get("y").cloned().expect("y registered");
        (expr, x, y)
    }

    fn growth(_x: f64, y: f64) -> Result<f64, EvaluationError> {
        Ok(y)
    }

    #[test]
    fn grid_uses_integer_step_count() {
        let xs = abscissae(0.0, StepTarget::Point(1.0), 0.1).expect("valid grid");
        assert_eq!(xs.len(), 11);
        assert_eq!(xs[10], 1.0);

        // A partial last step overshoots the target.
        let xs = abscissae(0.0, StepTarget::Point(0.95), 0.1).expect("valid grid");
        assert_eq!(xs.len(), 11);

        let xs = abscissae(2.0, StepTarget::Point(2.0), 0.5).expect("valid grid");
        assert_eq!(xs, vec![2.0]);
    }

    #[test]
    fn range_grid_prepends_x0() {
        let xs = abscissae(0.0, StepTarget::Range { low: 1.0, high: 2.0 }, 0.5)
            .expect("valid grid");
        assert_eq!(xs, vec![0.0, 1.0, 1.5, 2.0]);

        let xs = abscissae(1.0, StepTarget::Range { low: 1.0, high: 2.0 }, 0.5)
            .expect("valid grid");
        assert_eq!(xs, vec![1.0, 1.5, 2.0]);
    }

    #[test]
    fn invalid_grids_are_rejected() {
        assert_eq!(
            abscissae(0.0, StepTarget::Point(1.0), 0.0),
            Err(DegenerateInputError::InvalidStep(0.0))
        );
        assert!(abscissae(0.0, StepTarget::Point(1.0), f64::NAN).is_err());
        assert_eq!(
            abscissae(1.0, StepTarget::Range { low: 0.5, high: 2.0 }, 0.1),
            Err(DegenerateInputError::InvalidRange {
                x0: 1.0,
                low: 0.5,
                high: 2.0
            })
        );
        assert!(abscissae(0.0, StepTarget::Range { low: 2.0, high: 1.0 }, 0.1).is_err());
        assert!(abscissae(1.0, StepTarget::Point(0.0), 0.1).is_err());
    }

    #[test]
    fn euler_lengths_and_accuracy() {
        let result = euler_with(&growth, 0.0, 1.0, StepTarget::Point(1.0), 0.1)
            .expect("growth is smooth");
        assert_eq!(result.y.len(), result.x.len());
        assert_eq!(result.slopes.len(), result.x.len() - 1);
        let last = result.y[result.y.len() - 1];
        assert!((last - 1.1f64.powi(10)).abs() < 1e-9);
    }

    #[test]
    fn modified_euler_lengths_and_accuracy() {
        let result = modified_euler_with(&growth, 0.0, 1.0, StepTarget::Point(1.0), 0.1)
            .expect("growth is smooth");
        let steps = result.x.len() - 1;
        assert_eq!(result.y.len(), result.x.len());
        assert_eq!(result.predicted.len(), steps);
        assert_eq!(result.corrector_slopes.len(), steps);
        assert_eq!(result.slopes.len(), steps);
        let last = result.y[result.y.len() - 1];
        assert!((last - 1.105f64.powi(10)).abs() < 1e-9);
        // Heun is closer to e than forward Euler at the same step.
        assert!((last - std::f64::consts::E).abs() < 0.01);
    }

    #[test]
    fn parsed_field_single_step() {
        let (f, x, y) = parse_xy("x + y");
        let plain = euler(&f, &x, &y, 0.0, 1.0, StepTarget::Point(0.1), 0.1)
            .expect("smooth field");
        assert_eq!(plain.slopes, vec![1.0]);
        assert!((plain.y[1] - 1.1).abs() < 1e-12);

        let heun = modified_euler(&f, &x, &y, 0.0, 1.0, StepTarget::Point(0.1), 0.1)
            .expect("smooth field");
        assert!((heun.predicted[0] - 1.1).abs() < 1e-12);
        assert!((heun.corrector_slopes[0] - 1.2).abs() < 1e-12);
        assert!((heun.y[1] - 1.11).abs() < 1e-12);
    }

    #[test]
    fn range_steps_use_actual_spacing() {
        let constant = |_x: f64, _y: f64| -> Result<f64, EvaluationError> { Ok(1.0) };
        let result = euler_with(
            &constant,
            0.0,
            0.0,
            StepTarget::Range { low: 1.0, high: 2.0 },
            0.5,
        )
        .expect("constant field");
        assert_eq!(result.x, vec![0.0, 1.0, 1.5, 2.0]);
        assert_eq!(result.y, vec![0.0, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn evaluation_failure_reports_the_step() {
        let (f, x, y) = parse_xy("1 / (x - 0.2) + y");
        let err = euler(&f, &x, &y, 0.0, 1.0, StepTarget::Point(0.3), 0.1)
            .expect_err("slope is singular at x = 0.2");
        assert_eq!(
            err,
            SolveError::EvaluationAt {
                x: 0.2,
                source: EvaluationError::Singular
            }
        );
    }

    #[test]
    fn unknown_symbols_fail_before_stepping() {
        let (f, x, y) = parse_xy("k * y");
        assert_eq!(
            euler(&f, &x, &y, 0.0, 1.0, StepTarget::Point(1.0), 0.1),
            Err(SolveError::Evaluation(EvaluationError::UnresolvedSymbol(
                "k".to_string()
            )))
        );
    }

    #[test]
    fn oversized_step_counts_are_rejected() {
        let too_many = |outcome: Result<Vec<f64>, DegenerateInputError>| {
            matches!(
                outcome,
                Err(DegenerateInputError::TooManySteps {
                    limit: MAX_STEPS,
                    ..
                })
            )
        };
        assert!(too_many(abscissae(0.0, StepTarget::Point(1e300), 1e-300)));
        assert!(too_many(abscissae(0.0, StepTarget::Point(f64::MAX), 1e-10)));
        assert!(too_many(abscissae(
            0.0,
            StepTarget::Range { low: 0.0, high: 1e12 },
            0.5
        )));
        assert_eq!(
            abscissae(0.0, StepTarget::Point(1.0), 1e-6)
                .expect("at the limit")
                .len(),
            MAX_STEPS + 1
        );
        assert!(matches!(
            modified_euler_with(&growth, 0.0, 1.0, StepTarget::Point(1e9), 1e-3),
            Err(SolveError::Degenerate(DegenerateInputError::TooManySteps { .. }))
        ));
    }

    #[test]
    fn point_steps_use_exact_step_size() {
        let h = 0.1;
        let result = euler_with(&growth, 0.0, 1.0, StepTarget::Point(1.0), h)
            .expect("growth is smooth");
        let mut y = 1.0;
        for (i, &yi) in result.y.iter().enumerate().skip(1) {
            y += h * y;
            assert_eq!(yi, y, "step {i}");
        }
    }

    #[test]
    fn corrector_is_evaluated_on_the_grid() {
        let seen = RefCell::new(Vec::new());
        let recording = |x: f64, y: f64| -> Result<f64, EvaluationError> {
            seen.borrow_mut().push(x);
            Ok(y)
        };
        let result = modified_euler_with(&recording, 0.0, 1.0, StepTarget::Point(1.0), 0.1)
            .expect("growth is smooth");
        let seen = seen.into_inner();
        assert_eq!(seen.len(), 2 * (result.x.len() - 1));
        for (i, pair) in seen.chunks(2).enumerate() {
            assert_eq!(pair[0], result.x[i]);
            assert_eq!(pair[1], result.x[i + 1]);
        }
    }
}
