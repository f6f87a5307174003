use crate::error::{EvaluationError, ParseError};
use crate::expression::{Constant, Expr, Function, Symbol};
use crate::traits::Scalar;
use std::collections::HashMap;
use std::fmt;

/// Names that can never be bound to a free variable.
/// `ln` is accepted as an alias of `log`.
pub const RESERVED_IDENTIFIERS: [&str; 18] = [
    "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "asinh", "acosh",
    "atanh", "log", "exp", "sqrt", "pi", "e", "ln",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_IDENTIFIERS.contains(&name)
}

// --- Symbol table ---

/// Maps identifier names to free variables for one parse session.
///
/// Unknown identifiers are registered on first use, so a table seeded with `x`
/// and then used to parse `x + k` ends up holding both `x` and `k`.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table with the given variables pre-registered.
    pub fn with_variables<S: AsRef<str>>(names: &[S]) -> Result<Self, ParseError> {
        let mut table = Self::new();
        for name in names {
            table.symbol(name.as_ref())?;
        }
        Ok(table)
    }

    /// Returns the symbol bound to `name`, registering it if unseen.
    pub fn symbol(&mut self, name: &str) -> Result<Symbol, ParseError> {
        if let Some(existing) = self.symbols.get(name) {
            return Ok(existing.clone());
        }
        if is_reserved(name) {
            return Err(ParseError::ReservedIdentifier(name.to_string()));
        }
        let symbol = Symbol::new(name);
        self.symbols.insert(name.to_string(), symbol.clone());
        Ok(symbol)
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// --- Parser ---

/// Parses `input` into an expression, resolving identifiers through `symbols`.
pub fn parse(input: &str, symbols: &mut SymbolTable) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        symbols,
    };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ParseError::UnexpectedToken {
            found: token.kind.to_string(),
            position: token.position,
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{n}"),
            TokenKind::Identifier(name) => write!(f, "{name}"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Caret => write!(f, "^"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Exponent part only when it is followed by digits, so `2e` stays `2` `e`.
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidNumber(literal.clone()))?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                position: start,
            });
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Identifier(chars[start..i].iter().collect()),
                position: start,
            });
        } else {
            let kind = match c {
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '^' => TokenKind::Caret,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                other => {
                    return Err(ParseError::UnexpectedCharacter {
                        found: other,
                        position: i,
                    })
                }
            };
            tokens.push(Token { kind, position: i });
            i += 1;
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    symbols: &'a mut SymbolTable,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_closing_paren(&mut self) -> Result<(), ParseError> {
        match self.consume() {
            Some(Token {
                kind: TokenKind::RParen,
                ..
            }) => Ok(()),
            Some(token) => Err(ParseError::MissingClosingParen(token.position)),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;

        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Plus => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = left + right;
                }
                TokenKind::Minus => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = left - right;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;

        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Star => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = left * right;
                }
                TokenKind::Slash => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = left / right;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    /// Unary signs bind looser than `^`, so `-x^2` is `-(x^2)`.
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.consume();
                Ok(-self.parse_unary()?)
            }
            Some(TokenKind::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    /// `^` is right associative: `2^3^2` is `2^(3^2)`.
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        if let Some(TokenKind::Caret) = self.peek_kind() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::pow(base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.consume().ok_or(ParseError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Identifier(name) => {
                if let Some(TokenKind::LParen) = self.peek_kind() {
                    self.consume();
                    let function = Function::from_name(&name)
                        .ok_or_else(|| ParseError::UnknownFunction(name.clone()))?;
                    let arg = self.parse_expression()?;
                    self.expect_closing_paren()?;
                    return Ok(Expr::call(function, arg));
                }
                match name.as_str() {
                    "pi" => Ok(Expr::Constant(Constant::Pi)),
                    "e" => Ok(Expr::Constant(Constant::E)),
                    _ => Ok(Expr::Symbol(self.symbols.symbol(&name)?)),
                }
            }
            TokenKind::LParen => {
                let expr = self.parse_expression()?;
                self.expect_closing_paren()?;
                Ok(expr)
            }
            other => Err(ParseError::UnexpectedToken {
                found: other.to_string(),
                position: token.position,
            }),
        }
    }
}

// --- Bytecode & VM ---

/// OpCodes for the stack-based virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant onto the stack.
    LoadConst(f64),
    /// Pushes the argument at the given position onto the stack.
    LoadVar(usize),
    /// Pops (b, a), pushes a + b.
    Add,
    /// Pops (b, a), pushes a * b.
    Mul,
    /// Pops (b, a), pushes a ^ b.
    Pow,
    /// Pops a, pushes f(a).
    Apply(Function),
}

/// A compiled expression over a fixed, ordered list of variables.
#[derive(Debug, Clone)]
pub struct Bytecode {
    ops: Vec<OpCode>,
    vars: Vec<Symbol>,
}

impl Bytecode {
    pub fn ops(&self) -> &[OpCode] {
        &self.ops
    }

    /// Variables in argument order.
    pub fn vars(&self) -> &[Symbol] {
        &self.vars
    }

    /// Evaluates with `args[i]` bound to `vars()[i]`.
    pub fn eval(&self, args: &[f64]) -> Result<f64, EvaluationError> {
        let mut stack = Vec::with_capacity(16);
        VM::execute(self, args, &mut stack)
    }
}

/// Stateless stack machine; `execute` takes everything it needs.
pub struct VM;

impl VM {
    /// Runs `bytecode` and returns the value left on the stack.
    ///
    /// Every intermediate result is checked: NaN is reported as
    /// [`EvaluationError::NonReal`], an infinity as [`EvaluationError::Singular`].
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        vars: &[T],
        stack: &mut Vec<T>,
    ) -> Result<T, EvaluationError> {
        stack.clear();

        for op in &bytecode.ops {
            let value = match op {
                OpCode::LoadConst(val) => T::from_f64(*val).unwrap_or_else(T::nan),
                OpCode::LoadVar(idx) => match vars.get(*idx) {
                    Some(v) => *v,
                    None => {
                        let name = bytecode
                            .vars
                            .get(*idx)
                            .map(|s| s.name().to_string())
                            .unwrap_or_else(|| format!("#{idx}"));
                        return Err(EvaluationError::UnresolvedSymbol(name));
                    }
                },
                OpCode::Add => {
                    let (a, b) = pop_pair(stack);
                    a + b
                }
                OpCode::Mul => {
                    let (a, b) = pop_pair(stack);
                    a * b
                }
                OpCode::Pow => {
                    let (a, b) = pop_pair(stack);
                    a.powf(b)
                }
                OpCode::Apply(function) => {
                    let a = stack.pop().unwrap_or_else(T::nan);
                    function.apply(a)
                }
            };
            check_finite(value)?;
            stack.push(value);
        }

        let result = stack.pop().unwrap_or_else(T::nan);
        check_finite(result)?;
        Ok(result)
    }
}

fn pop_pair<T: Scalar>(stack: &mut Vec<T>) -> (T, T) {
    let b = stack.pop().unwrap_or_else(T::nan);
    let a = stack.pop().unwrap_or_else(T::nan);
    (a, b)
}

fn check_finite<T: Scalar>(value: T) -> Result<(), EvaluationError> {
    if value.is_nan() {
        Err(EvaluationError::NonReal)
    } else if value.is_infinite() {
        Err(EvaluationError::Singular)
    } else {
        Ok(())
    }
}

/// Compiles an [`Expr`] into [`Bytecode`], resolving symbols to argument slots.
pub struct Compiler {
    pub var_map: HashMap<Symbol, usize>,
    vars: Vec<Symbol>,
}

impl Compiler {
    pub fn new(vars: &[Symbol]) -> Self {
        let mut var_map = HashMap::new();
        for (i, var) in vars.iter().enumerate() {
            var_map.entry(var.clone()).or_insert(i);
        }
        Self {
            var_map,
            vars: vars.to_vec(),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, EvaluationError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode {
            ops,
            vars: self.vars.clone(),
        })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), EvaluationError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Constant(c) => ops.push(OpCode::LoadConst(c.value())),
            Expr::Symbol(symbol) => match self.var_map.get(symbol) {
                Some(&idx) => ops.push(OpCode::LoadVar(idx)),
                None => return Err(EvaluationError::UnresolvedSymbol(symbol.name().to_string())),
            },
            Expr::Sum(terms) => self.compile_chain(terms, OpCode::Add, ops)?,
            Expr::Product(factors) => self.compile_chain(factors, OpCode::Mul, ops)?,
            Expr::Power(base, exponent) => {
                self.compile_recursive(base, ops)?;
                self.compile_recursive(exponent, ops)?;
                ops.push(OpCode::Pow);
            }
            Expr::Call(function, arg) => {
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Apply(*function));
            }
        }
        Ok(())
    }

    fn compile_chain(
        &self,
        operands: &[Expr],
        op: OpCode,
        ops: &mut Vec<OpCode>,
    ) -> Result<(), EvaluationError> {
        let Some((first, rest)) = operands.split_first() else {
            // Empty sums and products never come out of the constructors.
            ops.push(OpCode::LoadConst(if op == OpCode::Add { 0.0 } else { 1.0 }));
            return Ok(());
        };
        self.compile_recursive(first, ops)?;
        for operand in rest {
            self.compile_recursive(operand, ops)?;
            ops.push(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, SymbolTable, VM};
    use crate::error::{EvaluationError, ParseError};
    use crate::expression::{Expr, Symbol};

    fn parse_x(input: &str) -> (Expr, Symbol) {
        let mut table = SymbolTable::with_variables(&["x"]).expect("x is not reserved");
        let expr = parse(input, &mut table).expect("expression should parse");
        let x = table.get("x").cloned().expect("x registered");
        (expr, x)
    }

    fn eval_x(input: &str, x_value: f64) -> f64 {
        let (expr, x) = parse_x(input);
        expr.substitute(&x, x_value)
            .evaluate()
            .expect("expression should evaluate")
    }

    #[test]
    fn operator_precedence_and_associativity() {
        assert_eq!(eval_x("1 + 2 * 3", 0.0), 7.0);
        assert_eq!(eval_x("2^3^2", 0.0), 512.0);
        assert_eq!(eval_x("-x^2", 3.0), -9.0);
        assert_eq!(eval_x("(1 + x) / 2", 3.0), 2.0);
        assert_eq!(eval_x("8 / 2 / 2", 0.0), 2.0);
        assert_eq!(eval_x("2^-1", 0.0), 0.5);
        assert_eq!(eval_x("10 - 4 - 3", 0.0), 3.0);
    }

    #[test]
    fn functions_constants_and_ln_alias() {
        assert!((eval_x("sin(pi / 2)", 0.0) - 1.0).abs() < 1e-12);
        assert!((eval_x("ln(e)", 0.0) - 1.0).abs() < 1e-12);
        assert!((eval_x("log(exp(x))", 2.5) - 2.5).abs() < 1e-12);
        assert!((eval_x("sqrt(x) + cosh(0)", 16.0) - 5.0).abs() < 1e-12);
        assert!((eval_x("1.5e2 + 2E-1", 0.0) - 150.2).abs() < 1e-12);
    }

    #[test]
    fn e_to_the_power_becomes_exp() {
        let (expr, x) = parse_x("e^(2*x)");
        assert!(matches!(expr, Expr::Call(crate::expression::Function::Exp, _)));
        let value = expr.substitute(&x, 0.5).evaluate().expect("evaluates");
        assert!((value - std::f64::consts::E).abs() < 1e-12);
    }

    #[test]
    fn unseen_identifiers_are_registered() {
        let mut table = SymbolTable::with_variables(&["x"]).expect("x is not reserved");
        parse("x * k + offset", &mut table).expect("expression should parse");
        assert_eq!(table.len(), 3);
        assert!(table.get("k").is_some());
        assert!(table.get("offset").is_some());
    }

    #[test]
    fn reserved_identifiers_are_rejected() {
        let mut table = SymbolTable::new();
        for name in ["sin", "log", "ln", "sqrt", "atanh"] {
            let err = parse(&format!("{name} + 1"), &mut table).expect_err("reserved");
            assert_eq!(err, ParseError::ReservedIdentifier(name.to_string()));
        }
        let err = SymbolTable::with_variables(&["pi"]).expect_err("pi is reserved");
        assert_eq!(err, ParseError::ReservedIdentifier("pi".to_string()));
    }

    #[test]
    fn malformed_input_is_a_parse_error() {
        let mut table = SymbolTable::new();
        assert_eq!(parse("", &mut table), Err(ParseError::UnexpectedEnd));
        assert_eq!(parse("(x + 1", &mut table), Err(ParseError::UnexpectedEnd));
        assert!(matches!(
            parse("x + * 2", &mut table),
            Err(ParseError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            parse("x $ 2", &mut table),
            Err(ParseError::UnexpectedCharacter { found: '$', .. })
        ));
        assert_eq!(
            parse("foo(2)", &mut table),
            Err(ParseError::UnknownFunction("foo".to_string()))
        );
        assert_eq!(
            parse("1.2.3", &mut table),
            Err(ParseError::InvalidNumber("1.2.3".to_string()))
        );
        assert!(matches!(
            parse("x 2", &mut table),
            Err(ParseError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn vm_reports_non_real_and_singular_values() {
        let (expr, x) = parse_x("1 / x");
        let code = expr.compile(&[x.clone()]).expect("compiles");
        assert_eq!(code.eval(&[0.0]), Err(EvaluationError::Singular));
        assert_eq!(code.eval(&[4.0]), Ok(0.25));

        let (expr, x) = parse_x("sqrt(x)");
        let code = expr.compile(&[x]).expect("compiles");
        assert_eq!(code.eval(&[-1.0]), Err(EvaluationError::NonReal));
    }

    #[test]
    fn vm_reports_missing_arguments_by_name() {
        let (expr, x) = parse_x("x + 1");
        let code = expr.compile(&[x]).expect("compiles");
        let mut stack = Vec::new();
        let err = VM::execute::<f64>(&code, &[], &mut stack).expect_err("no argument bound");
        assert_eq!(err, EvaluationError::UnresolvedSymbol("x".to_string()));
    }

    #[test]
    fn compile_rejects_symbols_outside_the_argument_list() {
        let mut table = SymbolTable::with_variables(&["x"]).expect("x is not reserved");
        let expr = parse("x + y", &mut table).expect("parses");
        let x = table.get("x").cloned().expect("x registered");
        let err = expr.compile(&[x]).expect_err("y is free");
        assert_eq!(err, EvaluationError::UnresolvedSymbol("y".to_string()));
    }
}
