//! The `numlab_core` crate is the computation engine behind the numerical-methods workbench.
//!
//! User-entered text is parsed into a symbolic [`expression::Expr`], which the
//! methods sample through a compiled bytecode VM and differentiate where needed.
//!
//! Key components:
//! - **Equation Engine**: tokenizer, parser and the bytecode VM used for repeated evaluation.
//! - **Expression**: symbolic trees with substitution, differentiation and display.
//! - **Methods**: root finding, interpolation, quadrature, ODE stepping (Euler, Heun) and
//!   least-squares curve fitting, each returning a typed result record.
//! - **Workbench**: `serde` request records and one dispatcher per method family.

pub mod curve_fitting;
pub mod equation_engine;
pub mod error;
pub mod expression;
pub mod integration;
pub mod interpolation;
pub mod linalg;
pub mod root_finding;
pub mod solvers;
pub mod traits;
pub mod workbench;
