//! Error types shared by the expression engine and the numerical methods.

use serde::Serialize;
use thiserror::Error;

/// Failure to turn user text into an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Identifier '{0}' is a reserved keyword.")]
    ReservedIdentifier(String),
    #[error("Unexpected character '{found}' at position {position}.")]
    UnexpectedCharacter { found: char, position: usize },
    #[error("Invalid number literal '{0}'.")]
    InvalidNumber(String),
    #[error("Unexpected token '{found}' at position {position}.")]
    UnexpectedToken { found: String, position: usize },
    #[error("Expected ')' at position {0}.")]
    MissingClosingParen(usize),
    #[error("Unknown function '{0}'.")]
    UnknownFunction(String),
    #[error("Unexpected end of expression.")]
    UnexpectedEnd,
}

/// Failure to reduce an expression to a real number.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("Unresolved symbol '{0}'.")]
    UnresolvedSymbol(String),
    #[error("Expression does not evaluate to a real number.")]
    NonReal,
    #[error("Expression is singular (division by zero or infinite result).")]
    Singular,
}

/// Inputs for which a method has no well-defined answer.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum DegenerateInputError {
    #[error("Bracket is invalid: ({0}, {1}).")]
    InvalidBracket(f64, f64),
    #[error("No sign change found in the given range.")]
    NoSignChange,
    #[error("Derivative too small at x = {x} (|f'(x)| = {derivative}).")]
    VanishingDerivative { x: f64, derivative: f64 },
    #[error("Secant denominator too small at iteration {iteration}.")]
    VanishingSecant { iteration: usize },
    #[error("Duplicate interpolation nodes at indices {first} and {second}.")]
    DuplicateNodes { first: usize, second: usize },
    #[error("At least {required} samples are required, got {actual}.")]
    TooFewSamples { required: usize, actual: usize },
    #[error("Sample length mismatch: {x} x-values vs {y} y-values.")]
    LengthMismatch { x: usize, y: usize },
    #[error("Interval count must be positive.")]
    ZeroIntervals,
    #[error("{requested} steps exceed the limit of {limit}.")]
    TooManySteps { requested: f64, limit: usize },
    #[error("Step size must be positive and finite, got {0}.")]
    InvalidStep(f64),
    #[error("Range ({low}, {high}) must start at or after x0 = {x0} and satisfy low <= high.")]
    InvalidRange { x0: f64, low: f64, high: f64 },
    #[error("Regression normal equations are singular.")]
    SingularRegression,
}

/// Failures of the dense matrix utilities.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatrixError {
    #[error("Matrix must be square, got {rows}x{cols}.")]
    NotSquare { rows: usize, cols: usize },
    #[error("Dimension mismatch: {left_rows}x{left_cols} times {right_rows}x{right_cols}.")]
    DimensionMismatch {
        left_rows: usize,
        left_cols: usize,
        right_rows: usize,
        right_cols: usize,
    },
    #[error("Singular matrix (determinant = {0}).")]
    Singular(f64),
    #[error("Row data length {actual} does not match a {rows}x{cols} matrix.")]
    BadShape {
        rows: usize,
        cols: usize,
        actual: usize,
    },
}

/// Errors raised by single-shot methods (quadrature, interpolation, stepping, fitting).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("Evaluation failed at x = {x}: {source}")]
    EvaluationAt {
        x: f64,
        #[source]
        source: EvaluationError,
    },
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Degenerate(#[from] DegenerateInputError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}
