use crate::error::EvaluationError;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types the bytecode VM can evaluate over.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Right-hand side of a first-order ODE y' = f(x, y).
pub trait SlopeField {
    /// Evaluates the slope at (x, y).
    fn slope(&self, x: f64, y: f64) -> Result<f64, EvaluationError>;
}

impl<F> SlopeField for F
where
    F: Fn(f64, f64) -> Result<f64, EvaluationError>,
{
    fn slope(&self, x: f64, y: f64) -> Result<f64, EvaluationError> {
        self(x, y)
    }
}

/// A one-step method that advances y across a single interval.
pub trait Steppable {
    /// Advances from (x, y) by h to `next_x` and returns the new y.
    /// Implementations record their intermediate stages internally.
    fn step(
        &mut self,
        field: &impl SlopeField,
        x: f64,
        y: f64,
        h: f64,
        next_x: f64,
    ) -> Result<f64, EvaluationError>;
}
