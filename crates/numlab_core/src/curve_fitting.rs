//! Least-squares regression on transformed samples.
//!
//! Every fit first maps the raw samples through a pair of axis transforms,
//! X = cx(x) and Y = cy(y), then solves the normal equations in (X, Y) space.
//! Passing `log(x)` as cx, for instance, fits y = a*ln(x) + b with the linear
//! solver. The power and exponential models wrap the caller's transforms in a
//! logarithm, fit a line, and map the line's coefficients back to the model.

use crate::error::{DegenerateInputError, EvaluationError, MatrixError, SolveError};
use crate::expression::{Expr, Function, Symbol};
use crate::integration::Sample;
use crate::linalg::Matrix;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// A one-variable expression applied to every sample on one axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisTransform {
    expr: Expr,
    var: Symbol,
}

impl AxisTransform {
    pub fn new(expr: Expr, var: Symbol) -> Self {
        Self { expr, var }
    }

    /// The transform that leaves values unchanged.
    pub fn identity(var: Symbol) -> Self {
        Self::new(Expr::from(&var), var)
    }

    /// `log` of this transform.
    pub fn log(&self) -> Self {
        Self::new(Expr::call(Function::Log, self.expr.clone()), self.var.clone())
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn apply(&self, value: f64) -> Result<f64, EvaluationError> {
        self.expr.evaluate_at(&self.var, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitModel {
    /// y = a*x + b
    Linear,
    /// y = a*x^2 + b*x + c
    Quadric,
    /// y = a*x^b
    Power1,
    /// y = b*a^x
    Power2,
    /// y = a*e^(b*x)
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coefficients {
    pub a: f64,
    pub b: f64,
    pub c: Option<f64>,
}

impl Coefficients {
    fn pair(a: f64, b: f64) -> Self {
        Self { a, b, c: None }
    }
}

/// Per-sample product columns in transformed space.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Columns {
    pub xy: Vec<f64>,
    pub x2: Vec<f64>,
    pub x2y: Vec<f64>,
    pub x3: Vec<f64>,
    pub x4: Vec<f64>,
}

/// Column sums in transformed space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Moments {
    pub n: usize,
    pub sum_x: f64,
    pub sum_y: f64,
    pub sum_xy: f64,
    pub sum_x2: f64,
    pub sum_x2y: f64,
    pub sum_x3: f64,
    pub sum_x4: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionResult {
    pub model: FitModel,
    pub raw: Vec<Sample>,
    pub transformed: Vec<Sample>,
    pub columns: Columns,
    pub sums: Moments,
    /// Fitted coefficients of the line (or parabola) in transformed space.
    pub transformed_coefficients: Coefficients,
    /// Coefficients of the model in the original space.
    pub coefficients: Coefficients,
}

impl RegressionResult {
    /// Evaluates the fitted model at `x`, ignoring the caller's x transform.
    pub fn predict(&self, x: f64) -> f64 {
        let Coefficients { a, b, c } = self.coefficients;
        match self.model {
            FitModel::Linear => a * x + b,
            FitModel::Quadric => a * x * x + b * x + c.unwrap_or(0.0),
            FitModel::Power1 => a * x.powf(b),
            FitModel::Power2 => b * a.powf(x),
            FitModel::Exponential => a * (b * x).exp(),
        }
    }
}

/// y = a*x^b from ln(y) = B + A*ln(x).
pub fn power1_coefficients(line: Coefficients) -> Coefficients {
    Coefficients::pair(line.b.exp(), line.a)
}

/// y = b*a^x from ln(y) = B + A*x.
pub fn power2_coefficients(line: Coefficients) -> Coefficients {
    Coefficients::pair(line.a.exp(), line.b.exp())
}

/// y = a*e^(b*x) from ln(y) = B + A*x.
pub fn exponential_coefficients(line: Coefficients) -> Coefficients {
    Coefficients::pair(line.b.exp(), line.a)
}

struct Tabulated {
    raw: Vec<Sample>,
    transformed: Vec<Sample>,
    columns: Columns,
    sums: Moments,
}

fn tabulate(
    cx: &AxisTransform,
    cy: &AxisTransform,
    xs: &[f64],
    ys: &[f64],
    required: usize,
) -> Result<Tabulated, SolveError> {
    if xs.len() != ys.len() {
        return Err(DegenerateInputError::LengthMismatch {
            x: xs.len(),
            y: ys.len(),
        }
        .into());
    }
    if xs.len() < required {
        return Err(DegenerateInputError::TooFewSamples {
            required,
            actual: xs.len(),
        }
        .into());
    }

    let mut raw = Vec::with_capacity(xs.len());
    let mut transformed = Vec::with_capacity(xs.len());
    let mut columns = Columns::default();
    let mut sums = Moments {
        n: xs.len(),
        ..Moments::default()
    };
    for (&x, &y) in xs.iter().zip(ys) {
        let tx = cx
            .apply(x)
            .map_err(|source| SolveError::EvaluationAt { x, source })?;
        let ty = cy
            .apply(y)
            .map_err(|source| SolveError::EvaluationAt { x: y, source })?;
        let x2 = tx * tx;
        let (xy, x2y, x3, x4) = (tx * ty, x2 * ty, x2 * tx, x2 * x2);

        sums.sum_x += tx;
        sums.sum_y += ty;
        sums.sum_xy += xy;
        sums.sum_x2 += x2;
        sums.sum_x2y += x2y;
        sums.sum_x3 += x3;
        sums.sum_x4 += x4;

        columns.xy.push(xy);
        columns.x2.push(x2);
        columns.x2y.push(x2y);
        columns.x3.push(x3);
        columns.x4.push(x4);
        raw.push(Sample { x, y });
        transformed.push(Sample { x: tx, y: ty });
    }
    debug!("Regression moments: {sums:?}");

    Ok(Tabulated {
        raw,
        transformed,
        columns,
        sums,
    })
}

fn fit_line(sums: &Moments) -> Result<Coefficients, DegenerateInputError> {
    let n = sums.n as f64;
    let denominator = n * sums.sum_x2 - sums.sum_x * sums.sum_x;
    if denominator.abs() <= f64::EPSILON * (n * sums.sum_x2).abs() {
        warn!("Linear regression is singular: all transformed x-values coincide.");
        return Err(DegenerateInputError::SingularRegression);
    }
    let a = (n * sums.sum_xy - sums.sum_x * sums.sum_y) / denominator;
    let b = (sums.sum_y - a * sums.sum_x) / n;
    Ok(Coefficients::pair(a, b))
}

fn fit_parabola(sums: &Moments) -> Result<Coefficients, SolveError> {
    let moments = Matrix::from_rows(&[
        vec![sums.sum_x2, sums.sum_x, sums.n as f64],
        vec![sums.sum_x3, sums.sum_x2, sums.sum_x],
        vec![sums.sum_x4, sums.sum_x3, sums.sum_x2],
    ])?;
    let solution = moments
        .solve(&[sums.sum_y, sums.sum_xy, sums.sum_x2y])
        .map_err(|err| match err {
            MatrixError::Singular(det) => {
                warn!("Quadratic regression is singular (determinant = {det}).");
                SolveError::Degenerate(DegenerateInputError::SingularRegression)
            }
            other => other.into(),
        })?;
    Ok(Coefficients {
        a: solution[0],
        b: solution[1],
        c: Some(solution[2]),
    })
}

fn finish(model: FitModel, table: Tabulated, line: Coefficients, coefficients: Coefficients) -> RegressionResult {
    RegressionResult {
        model,
        raw: table.raw,
        transformed: table.transformed,
        columns: table.columns,
        sums: table.sums,
        transformed_coefficients: line,
        coefficients,
    }
}

/// Ordinary least squares for Y = a*X + b.
pub fn linear(cx: &AxisTransform, cy: &AxisTransform, xs: &[f64], ys: &[f64]) -> Result<RegressionResult, SolveError> {
    let table = tabulate(cx, cy, xs, ys, 2)?;
    let line = fit_line(&table.sums)?;
    Ok(finish(FitModel::Linear, table, line, line))
}

/// Least squares for Y = a*X^2 + b*X + c through the 3x3 normal equations.
pub fn quadric(cx: &AxisTransform, cy: &AxisTransform, xs: &[f64], ys: &[f64]) -> Result<RegressionResult, SolveError> {
    let table = tabulate(cx, cy, xs, ys, 3)?;
    let parabola = fit_parabola(&table.sums)?;
    Ok(finish(FitModel::Quadric, table, parabola, parabola))
}

pub fn power1(cx: &AxisTransform, cy: &AxisTransform, xs: &[f64], ys: &[f64]) -> Result<RegressionResult, SolveError> {
    let table = tabulate(&cx.log(), &cy.log(), xs, ys, 2)?;
    let line = fit_line(&table.sums)?;
    Ok(finish(FitModel::Power1, table, line, power1_coefficients(line)))
}

pub fn power2(cx: &AxisTransform, cy: &AxisTransform, xs: &[f64], ys: &[f64]) -> Result<RegressionResult, SolveError> {
    let table = tabulate(cx, &cy.log(), xs, ys, 2)?;
    let line = fit_line(&table.sums)?;
    Ok(finish(FitModel::Power2, table, line, power2_coefficients(line)))
}

pub fn exponential(
    cx: &AxisTransform,
    cy: &AxisTransform,
    xs: &[f64],
    ys: &[f64],
) -> Result<RegressionResult, SolveError> {
    let table = tabulate(cx, &cy.log(), xs, ys, 2)?;
    let line = fit_line(&table.sums)?;
    Ok(finish(
        FitModel::Exponential,
        table,
        line,
        exponential_coefficients(line),
    ))
}

/// Runs the fit for `model`.
pub fn fit(
    model: FitModel,
    cx: &AxisTransform,
    cy: &AxisTransform,
    xs: &[f64],
    ys: &[f64],
) -> Result<RegressionResult, SolveError> {
    match model {
        FitModel::Linear => linear(cx, cy, xs, ys),
        FitModel::Quadric => quadric(cx, cy, xs, ys),
        FitModel::Power1 => power1(cx, cy, xs, ys),
        FitModel::Power2 => power2(cx, cy, xs, ys),
        FitModel::Exponential => exponential(cx, cy, xs, ys),
    }
}
