//! Symbolic expressions over named variables.
//!
//! An [`Expr`] is an immutable tree built from numbers, symbols, the constants
//! `pi` and `e`, n-ary sums and products, powers, and named unary functions.
//! Subtraction and division are encoded as `a + (-1)*b` and `a * b^-1`.
//!
//! The constructors perform basic arithmetic folding only: nested sums and
//! products are flattened, numeric operands are combined, and trivial
//! identities (`x + 0`, `x * 1`, `x^1`, `x^0`) are removed. No further
//! simplification is attempted.

use crate::equation_engine::{Bytecode, Compiler};
use crate::error::EvaluationError;
use crate::traits::Scalar;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// Highest integer power expanded by [`Expr::polynomial_coefficients`].
const MAX_EXPANDED_POWER: f64 = 64.0;

/// A free variable, compared by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Pi,
    E,
}

impl Constant {
    pub fn value(self) -> f64 {
        match self {
            Constant::Pi => std::f64::consts::PI,
            Constant::E => std::f64::consts::E,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Constant::Pi => "pi",
            Constant::E => "e",
        }
    }
}

/// Named unary functions understood by the parser and the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    /// Natural logarithm; `ln` parses to this.
    Log,
    Exp,
    Sqrt,
}

impl Function {
    pub fn name(self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Asin => "asin",
            Function::Acos => "acos",
            Function::Atan => "atan",
            Function::Sinh => "sinh",
            Function::Cosh => "cosh",
            Function::Tanh => "tanh",
            Function::Asinh => "asinh",
            Function::Acosh => "acosh",
            Function::Atanh => "atanh",
            Function::Log => "log",
            Function::Exp => "exp",
            Function::Sqrt => "sqrt",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "asin" => Function::Asin,
            "acos" => Function::Acos,
            "atan" => Function::Atan,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            "tanh" => Function::Tanh,
            "asinh" => Function::Asinh,
            "acosh" => Function::Acosh,
            "atanh" => Function::Atanh,
            "log" | "ln" => Function::Log,
            "exp" => Function::Exp,
            "sqrt" => Function::Sqrt,
            _ => return None,
        };
        Some(function)
    }

    pub fn apply<T: Scalar>(self, x: T) -> T {
        match self {
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tan => x.tan(),
            Function::Asin => x.asin(),
            Function::Acos => x.acos(),
            Function::Atan => x.atan(),
            Function::Sinh => x.sinh(),
            Function::Cosh => x.cosh(),
            Function::Tanh => x.tanh(),
            Function::Asinh => x.asinh(),
            Function::Acosh => x.acosh(),
            Function::Atanh => x.atanh(),
            Function::Log => x.ln(),
            Function::Exp => x.exp(),
            Function::Sqrt => x.sqrt(),
        }
    }

    /// d/du f(u), without the chain-rule factor.
    fn derivative(self, u: &Expr) -> Expr {
        let u = u.clone();
        let one = || Expr::Number(1.0);
        let square = |e: &Expr| Expr::pow(e.clone(), Expr::Number(2.0));
        let inv_sqrt = |e: Expr| Expr::pow(e, Expr::Number(-0.5));
        match self {
            Function::Sin => Expr::call(Function::Cos, u),
            Function::Cos => -Expr::call(Function::Sin, u),
            Function::Tan => Expr::pow(Expr::call(Function::Cos, u), Expr::Number(-2.0)),
            Function::Asin => inv_sqrt(one() - square(&u)),
            Function::Acos => -inv_sqrt(one() - square(&u)),
            Function::Atan => Expr::pow(one() + square(&u), Expr::Number(-1.0)),
            Function::Sinh => Expr::call(Function::Cosh, u),
            Function::Cosh => Expr::call(Function::Sinh, u),
            Function::Tanh => Expr::pow(Expr::call(Function::Cosh, u), Expr::Number(-2.0)),
            Function::Asinh => inv_sqrt(square(&u) + one()),
            Function::Acosh => inv_sqrt(square(&u) - one()),
            Function::Atanh => Expr::pow(one() - square(&u), Expr::Number(-1.0)),
            Function::Log => Expr::pow(u, Expr::Number(-1.0)),
            Function::Exp => Expr::call(Function::Exp, u),
            Function::Sqrt => {
                Expr::Number(0.5) * Expr::pow(Expr::call(Function::Sqrt, u), Expr::Number(-1.0))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Symbol(Symbol),
    Constant(Constant),
    Sum(Vec<Expr>),
    Product(Vec<Expr>),
    Power(Box<Expr>, Box<Expr>),
    Call(Function, Box<Expr>),
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Number(value)
    }
}

impl From<&Symbol> for Expr {
    fn from(symbol: &Symbol) -> Self {
        Expr::Symbol(symbol.clone())
    }
}

impl Expr {
    /// Builds a flattened sum with numeric terms folded into one.
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Expr {
        let mut flat = Vec::new();
        let mut constant = 0.0;
        for term in terms {
            match term {
                Expr::Sum(inner) => {
                    for t in inner {
                        match t {
                            Expr::Number(v) => constant += v,
                            other => flat.push(other),
                        }
                    }
                }
                Expr::Number(v) => constant += v,
                other => flat.push(other),
            }
        }
        if constant != 0.0 {
            flat.push(Expr::Number(constant));
        }
        match flat.len() {
            0 => Expr::Number(0.0),
            1 => flat.pop().unwrap_or(Expr::Number(0.0)),
            _ => Expr::Sum(flat),
        }
    }

    /// Builds a flattened product with numeric factors folded into a leading coefficient.
    pub fn product(factors: impl IntoIterator<Item = Expr>) -> Expr {
        let mut flat = Vec::new();
        let mut coefficient = 1.0;
        for factor in factors {
            match factor {
                Expr::Product(inner) => {
                    for f in inner {
                        match f {
                            Expr::Number(v) => coefficient *= v,
                            other => flat.push(other),
                        }
                    }
                }
                Expr::Number(v) => coefficient *= v,
                other => flat.push(other),
            }
        }
        if coefficient == 0.0 {
            // Closed factors that fail to evaluate must keep failing under a zero coefficient.
            flat.retain(|f| f.is_closed() && f.evaluate().is_err());
        }
        if flat.is_empty() {
            return Expr::Number(coefficient);
        }
        if coefficient != 1.0 {
            flat.insert(0, Expr::Number(coefficient));
        }
        match flat.len() {
            1 => flat.pop().unwrap_or(Expr::Number(1.0)),
            _ => Expr::Product(flat),
        }
    }

    pub fn pow(base: Expr, exponent: Expr) -> Expr {
        if let Expr::Number(e) = exponent {
            if e == 0.0 {
                return Expr::Number(1.0);
            }
            if e == 1.0 {
                return base;
            }
            if let Expr::Number(b) = base {
                let folded = b.powf(e);
                if folded.is_finite() {
                    return Expr::Number(folded);
                }
            }
        }
        match base {
            Expr::Number(b) if b == 1.0 => Expr::Number(1.0),
            Expr::Constant(Constant::E) => Expr::call(Function::Exp, exponent),
            base => Expr::Power(Box::new(base), Box::new(exponent)),
        }
    }

    /// Applies `function`, folding numeric arguments when the result is finite.
    pub fn call(function: Function, arg: Expr) -> Expr {
        if let Expr::Number(v) = arg {
            let folded = function.apply(v);
            if folded.is_finite() {
                return Expr::Number(folded);
            }
        }
        Expr::Call(function, Box::new(arg))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Expr::Number(_))
    }

    /// `true` when the tree contains no symbols.
    pub fn is_closed(&self) -> bool {
        match self {
            Expr::Number(_) | Expr::Constant(_) => true,
            Expr::Symbol(_) => false,
            Expr::Sum(items) | Expr::Product(items) => items.iter().all(Expr::is_closed),
            Expr::Power(base, exponent) => base.is_closed() && exponent.is_closed(),
            Expr::Call(_, arg) => arg.is_closed(),
        }
    }

    /// Returns `true` if `var` occurs anywhere in the tree.
    pub fn depends_on(&self, var: &Symbol) -> bool {
        match self {
            Expr::Number(_) | Expr::Constant(_) => false,
            Expr::Symbol(s) => s == var,
            Expr::Sum(items) | Expr::Product(items) => items.iter().any(|e| e.depends_on(var)),
            Expr::Power(base, exponent) => base.depends_on(var) || exponent.depends_on(var),
            Expr::Call(_, arg) => arg.depends_on(var),
        }
    }

    pub fn free_symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            Expr::Number(_) | Expr::Constant(_) => {}
            Expr::Symbol(s) => {
                out.insert(s.clone());
            }
            Expr::Sum(items) | Expr::Product(items) => {
                items.iter().for_each(|e| e.collect_symbols(out));
            }
            Expr::Power(base, exponent) => {
                base.collect_symbols(out);
                exponent.collect_symbols(out);
            }
            Expr::Call(_, arg) => arg.collect_symbols(out),
        }
    }

    /// Replaces every occurrence of `var` with `value`, folding as it rebuilds.
    pub fn substitute(&self, var: &Symbol, value: f64) -> Expr {
        self.substitute_all(&[(var.clone(), value)])
    }

    pub fn substitute_all(&self, bindings: &[(Symbol, f64)]) -> Expr {
        match self {
            Expr::Number(_) | Expr::Constant(_) => self.clone(),
            Expr::Symbol(s) => bindings
                .iter()
                .find(|(var, _)| var == s)
                .map(|(_, value)| Expr::Number(*value))
                .unwrap_or_else(|| self.clone()),
            Expr::Sum(terms) => Expr::sum(terms.iter().map(|t| t.substitute_all(bindings))),
            Expr::Product(factors) => {
                Expr::product(factors.iter().map(|f| f.substitute_all(bindings)))
            }
            Expr::Power(base, exponent) => Expr::pow(
                base.substitute_all(bindings),
                exponent.substitute_all(bindings),
            ),
            Expr::Call(function, arg) => Expr::call(*function, arg.substitute_all(bindings)),
        }
    }

    /// Reduces a fully bound expression to a number.
    pub fn evaluate(&self) -> Result<f64, EvaluationError> {
        self.compile(&[])?.eval(&[])
    }

    /// Shorthand for `substitute(var, value).evaluate()`.
    pub fn evaluate_at(&self, var: &Symbol, value: f64) -> Result<f64, EvaluationError> {
        self.substitute(var, value).evaluate()
    }

    /// Compiles to bytecode taking `vars` as positional arguments.
    pub fn compile(&self, vars: &[Symbol]) -> Result<Bytecode, EvaluationError> {
        Compiler::new(vars).compile(self)
    }

    /// Symbolic derivative with respect to `var`.
    pub fn differentiate(&self, var: &Symbol) -> Expr {
        match self {
            Expr::Number(_) | Expr::Constant(_) => Expr::Number(0.0),
            Expr::Symbol(s) => Expr::Number(if s == var { 1.0 } else { 0.0 }),
            Expr::Sum(terms) => Expr::sum(terms.iter().map(|t| t.differentiate(var))),
            Expr::Product(factors) => Expr::sum((0..factors.len()).map(|i| {
                let derivative = factors[i].differentiate(var);
                Expr::product(factors.iter().enumerate().map(|(j, f)| {
                    if i == j {
                        derivative.clone()
                    } else {
                        f.clone()
                    }
                }))
            })),
            Expr::Power(base, exponent) => {
                let base = base.as_ref().clone();
                let exponent = exponent.as_ref().clone();
                if !exponent.depends_on(var) {
                    let d_base = base.differentiate(var);
                    let lowered = Expr::pow(base, exponent.clone() - Expr::Number(1.0));
                    Expr::product([exponent, lowered, d_base])
                } else if !base.depends_on(var) {
                    let d_exponent = exponent.differentiate(var);
                    let log_base = Expr::call(Function::Log, base.clone());
                    Expr::product([Expr::pow(base, exponent), log_base, d_exponent])
                } else {
                    // d(u^v) = u^v * (v' ln u + v u'/u)
                    let d_base = base.differentiate(var);
                    let d_exponent = exponent.differentiate(var);
                    let log_base = Expr::call(Function::Log, base.clone());
                    let inner = d_exponent * log_base + exponent.clone() * d_base / base.clone();
                    Expr::pow(base, exponent) * inner
                }
            }
            Expr::Call(function, arg) => function.derivative(arg) * arg.differentiate(var),
        }
    }

    /// Expands a polynomial in `var` into ascending-power coefficients.
    ///
    /// Returns `None` when the expression is not a polynomial in `var` with
    /// numeric coefficients.
    pub fn polynomial_coefficients(&self, var: &Symbol) -> Option<Vec<f64>> {
        if !self.depends_on(var) {
            return self.evaluate().ok().map(|v| vec![v]);
        }
        match self {
            Expr::Symbol(_) => Some(vec![0.0, 1.0]),
            Expr::Sum(terms) => terms.iter().try_fold(vec![0.0], |acc, term| {
                term.polynomial_coefficients(var).map(|p| poly_add(&acc, &p))
            }),
            Expr::Product(factors) => factors.iter().try_fold(vec![1.0], |acc, factor| {
                factor.polynomial_coefficients(var).map(|p| poly_mul(&acc, &p))
            }),
            Expr::Power(base, exponent) => match exponent.as_ref() {
                Expr::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= MAX_EXPANDED_POWER => {
                    let base = base.polynomial_coefficients(var)?;
                    let mut out = vec![1.0];
                    for _ in 0..(*n as usize) {
                        out = poly_mul(&out, &base);
                    }
                    Some(out)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Splits off a negative leading coefficient, returning the negated expression.
    fn negated_if_negative(&self) -> Option<Expr> {
        match self {
            Expr::Number(v) if *v < 0.0 => Some(Expr::Number(-v)),
            Expr::Product(factors) => match factors.first() {
                Some(Expr::Number(c)) if *c < 0.0 => Some(Expr::product(
                    std::iter::once(Expr::Number(-c)).chain(factors[1..].iter().cloned()),
                )),
                _ => None,
            },
            _ => None,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Sum(_) => 1,
            Expr::Product(_) => 2,
            Expr::Number(v) if *v < 0.0 => 2,
            Expr::Power(_, exponent) if is_negative_number(exponent) => 2,
            Expr::Power(..) => 3,
            _ => 4,
        }
    }
}

fn is_negative_number(expr: &Expr) -> bool {
    matches!(expr, Expr::Number(v) if *v < 0.0)
}

fn poly_add(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len().max(b.len())];
    for (i, v) in a.iter().enumerate() {
        out[i] += v;
    }
    for (i, v) in b.iter().enumerate() {
        out[i] += v;
    }
    out
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::sum([self, rhs])
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum([self, -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::product([self, rhs])
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::product([self, Expr::pow(rhs, Expr::Number(-1.0))])
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::product([Expr::Number(-1.0), self])
    }
}

// --- Display ---

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, min_precedence: u8) -> fmt::Result {
    if expr.precedence() < min_precedence {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

fn write_product(f: &mut fmt::Formatter<'_>, factors: &[Expr]) -> fmt::Result {
    let mut coefficient = 1.0;
    let mut numerator = Vec::new();
    let mut denominator = Vec::new();
    for factor in factors {
        match factor {
            Expr::Number(v) => coefficient *= v,
            Expr::Power(base, exponent) if is_negative_number(exponent) => {
                denominator.push(Expr::pow(base.as_ref().clone(), -exponent.as_ref().clone()));
            }
            other => numerator.push(other),
        }
    }

    if coefficient == -1.0 && !numerator.is_empty() {
        f.write_str("-")?;
    } else if coefficient != 1.0 || numerator.is_empty() {
        write!(f, "{coefficient}")?;
        if !numerator.is_empty() {
            f.write_str("*")?;
        }
    }
    for (i, factor) in numerator.iter().enumerate() {
        if i > 0 {
            f.write_str("*")?;
        }
        write_operand(f, factor, 3)?;
    }
    for factor in &denominator {
        f.write_str("/")?;
        write_operand(f, factor, 3)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(v) => write!(f, "{v}"),
            Expr::Symbol(s) => write!(f, "{s}"),
            Expr::Constant(c) => f.write_str(c.name()),
            Expr::Sum(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    match (i, term.negated_if_negative()) {
                        (0, _) => write_operand(f, term, 2)?,
                        (_, Some(positive)) => {
                            f.write_str(" - ")?;
                            write_operand(f, &positive, 2)?;
                        }
                        (_, None) => {
                            f.write_str(" + ")?;
                            write_operand(f, term, 2)?;
                        }
                    }
                }
                Ok(())
            }
            Expr::Product(factors) => write_product(f, factors),
            Expr::Power(base, exponent) => {
                if is_negative_number(exponent) {
                    return write_product(f, std::slice::from_ref(self));
                }
                write_operand(f, base, 4)?;
                f.write_str("^")?;
                write_operand(f, exponent, 4)
            }
            Expr::Call(function, arg) => write!(f, "{}({arg})", function.name()),
        }
    }
}

/// Expressions cross the result boundary as their display text.
impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
