//! Request-level entry points for a host application.
//!
//! Each request is a `serde` record selected by its `method` tag, so a host
//! can deserialize user input (JSON from a form, say) and hand it straight to
//! one of the dispatchers below. Expressions are parsed with a fresh
//! [`SymbolTable`] per call.

use crate::curve_fitting::{self, AxisTransform, FitModel, RegressionResult};
use crate::equation_engine::{parse, SymbolTable};
use crate::expression::{Expr, Symbol};
use crate::integration::{
    self, QuadratureResult, DEFAULT_INTERVALS, DEFAULT_THREE_EIGHTH_INTERVALS,
};
use crate::interpolation::{self, LagrangeResult, NewtonResult};
use crate::root_finding::{self, Bracket, IterationSettings, RootResult, ScanSettings};
use crate::solvers::{self, EulerResult, ModifiedEulerResult, StepTarget};
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootProblem {
    /// f(x), in the variable `x`.
    pub expression: String,
    /// Skips the scan when present.
    #[serde(default)]
    pub bracket: Option<Bracket>,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub iteration: IterationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RootRequest {
    Bisection(RootProblem),
    Secant(RootProblem),
    Newton(RootProblem),
}

#[derive(Debug, Clone, Serialize)]
pub struct RootReport {
    pub bracket: Bracket,
    pub result: RootResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpolationProblem {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Point at which the polynomial is evaluated.
    pub at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum InterpolationRequest {
    Lagrange(InterpolationProblem),
    NewtonForward(InterpolationProblem),
    NewtonBackward(InterpolationProblem),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Interpolation {
    Lagrange(LagrangeResult),
    Newton(NewtonResult),
}

impl Interpolation {
    pub fn value(&self) -> f64 {
        match self {
            Interpolation::Lagrange(result) => result.value,
            Interpolation::Newton(result) => result.value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuadratureProblem {
    pub expression: String,
    pub a: f64,
    pub b: f64,
    /// Falls back to the rule's default interval count.
    #[serde(default)]
    pub intervals: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum IntegrationRequest {
    Trapezoidal(QuadratureProblem),
    SimpsonOneThird(QuadratureProblem),
    SimpsonThreeEighth(QuadratureProblem),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdeProblem {
    /// f(x, y) in y' = f(x, y).
    pub expression: String,
    pub x0: f64,
    pub y0: f64,
    pub target: StepTarget,
    pub h: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OdeRequest {
    Euler(OdeProblem),
    ModifiedEuler(OdeProblem),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OdeSolution {
    Euler(EulerResult),
    ModifiedEuler(ModifiedEulerResult),
}

impl OdeSolution {
    pub fn x(&self) -> &[f64] {
        match self {
            OdeSolution::Euler(result) => &result.x,
            OdeSolution::ModifiedEuler(result) => &result.x,
        }
    }

    pub fn y(&self) -> &[f64] {
        match self {
            OdeSolution::Euler(result) => &result.y,
            OdeSolution::ModifiedEuler(result) => &result.y,
        }
    }
}

fn default_x_transform() -> String {
    "x".to_string()
}

fn default_y_transform() -> String {
    "y".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitRequest {
    pub model: FitModel,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// cx(x); the identity unless given.
    #[serde(default = "default_x_transform")]
    pub x_transform: String,
    /// cy(y); the identity unless given.
    #[serde(default = "default_y_transform")]
    pub y_transform: String,
}

/// Parses `expression` with `variables` pre-registered and rejects any other free symbol.
fn parse_in(expression: &str, variables: &[&str]) -> Result<(Expr, Vec<Symbol>)> {
    let mut symbols = SymbolTable::with_variables(variables)
        .with_context(|| format!("Invalid variable list {variables:?}"))?;
    let expr = parse(expression, &mut symbols)
        .with_context(|| format!("Failed to parse expression '{expression}'"))?;

    let allowed: Vec<Symbol> = variables
        .iter()
        .map(|name| {
            symbols
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("Variable '{name}' was not registered."))
        })
        .collect::<Result<_>>()?;
    if let Some(unknown) = expr.free_symbols().into_iter().find(|s| !allowed.contains(s)) {
        bail!(
            "Unknown variable '{}' in '{}'; available: {}.",
            unknown,
            expression,
            variables.join(", ")
        );
    }
    Ok((expr, allowed))
}

fn single_variable(expression: &str, name: &str) -> Result<(Expr, Symbol)> {
    let (expr, mut vars) = parse_in(expression, &[name])?;
    let var = vars
        .pop()
        .ok_or_else(|| anyhow!("Variable '{name}' was not registered."))?;
    Ok((expr, var))
}

/// Scans for a bracket (unless one is given) and runs the chosen root finder.
pub fn solve_root(request: &RootRequest) -> Result<RootReport> {
    let problem = match request {
        RootRequest::Bisection(p) | RootRequest::Secant(p) | RootRequest::Newton(p) => p,
    };
    let (f, x) = single_variable(&problem.expression, "x")?;
    let bracket = match problem.bracket {
        Some(bracket) => bracket,
        None => {
            let ScanSettings { start, end, step } = problem.scan;
            root_finding::find_bracket(&f, &x, start, end, step)
        }
    };
    debug!("Root finding for '{}' on {bracket:?}", problem.expression);
    let settings = problem.iteration;
    let result = match request {
        RootRequest::Bisection(_) => root_finding::bisection(&f, &x, bracket, settings),
        RootRequest::Secant(_) => root_finding::secant(&f, &x, bracket, settings),
        RootRequest::Newton(_) => root_finding::newton(&f, &x, bracket, settings),
    }
    .with_context(|| format!("Root finding failed for '{}'", problem.expression))?;
    Ok(RootReport { bracket, result })
}

pub fn interpolate(request: &InterpolationRequest) -> Result<Interpolation> {
    let x = Symbol::new("x");
    let outcome = match request {
        InterpolationRequest::Lagrange(p) => {
            interpolation::lagrange(&p.x, &p.y, p.at, &x).map(Interpolation::Lagrange)
        }
        InterpolationRequest::NewtonForward(p) => {
            interpolation::newton_forward(&p.x, &p.y, p.at, &x).map(Interpolation::Newton)
        }
        InterpolationRequest::NewtonBackward(p) => {
            interpolation::newton_backward(&p.x, &p.y, p.at, &x).map(Interpolation::Newton)
        }
    };
    outcome.context("Interpolation failed")
}

pub fn integrate(request: &IntegrationRequest) -> Result<QuadratureResult> {
    let (problem, default_intervals) = match request {
        IntegrationRequest::Trapezoidal(p) | IntegrationRequest::SimpsonOneThird(p) => {
            (p, DEFAULT_INTERVALS)
        }
        IntegrationRequest::SimpsonThreeEighth(p) => (p, DEFAULT_THREE_EIGHTH_INTERVALS),
    };
    let (f, x) = single_variable(&problem.expression, "x")?;
    let (a, b) = (problem.a, problem.b);
    let n = problem.intervals.unwrap_or(default_intervals);
    let outcome = match request {
        IntegrationRequest::Trapezoidal(_) => integration::trapezoidal(&f, &x, a, b, n),
        IntegrationRequest::SimpsonOneThird(_) => integration::simpson_one_third(&f, &x, a, b, n),
        IntegrationRequest::SimpsonThreeEighth(_) => {
            integration::simpson_three_eighth(&f, &x, a, b, n)
        }
    };
    outcome.with_context(|| format!("Integration of '{}' over [{a}, {b}] failed", problem.expression))
}

pub fn step_ode(request: &OdeRequest) -> Result<OdeSolution> {
    let problem = match request {
        OdeRequest::Euler(p) | OdeRequest::ModifiedEuler(p) => p,
    };
    let (f, vars) = parse_in(&problem.expression, &["x", "y"])?;
    let [x, y] = vars.as_slice() else {
        bail!("Expected variables x and y.");
    };
    let OdeProblem {
        x0, y0, target, h, ..
    } = *problem;
    let solution = match request {
        OdeRequest::Euler(_) => {
            solvers::euler(&f, x, y, x0, y0, target, h).map(OdeSolution::Euler)
        }
        OdeRequest::ModifiedEuler(_) => {
            solvers::modified_euler(&f, x, y, x0, y0, target, h).map(OdeSolution::ModifiedEuler)
        }
    };
    solution.with_context(|| format!("Stepping y' = {} failed", problem.expression))
}

pub fn fit(request: &FitRequest) -> Result<RegressionResult> {
    let (cx_expr, x) = single_variable(&request.x_transform, "x")
        .context("Invalid x transform")?;
    let (cy_expr, y) = single_variable(&request.y_transform, "y")
        .context("Invalid y transform")?;
    let cx = AxisTransform::new(cx_expr, x);
    let cy = AxisTransform::new(cy_expr, y);
    curve_fitting::fit(request.model, &cx, &cy, &request.x, &request.y)
        .with_context(|| format!("Fitting a {:?} model failed", request.model))
}
