//! Scalar symbolic expressions.
//!
//! Expressions are immutable trees with shared (`Arc`) children so that
//! derivative expressions can reuse the sub-trees of their primal without
//! copying. The smart constructors fold constants and drop neutral elements,
//! which keeps gradients and Hessians of moderately sized models small.
//!
//! ```
//! use nlpsol_core::Expr;
//!
//! let x = Expr::sym("x");
//! let y = Expr::sym("y");
//! let rosenbrock = (1.0 - &x).powi(2) + 100.0 * (&y - x.powi(2)).powi(2);
//! let dfdx = rosenbrock.diff("x");
//! assert!(dfdx.depends_on("y"));
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use crate::error::NlpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Tanh,
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Tanh => "tanh",
        }
    }

    /// Look up a function by the name used in expression text.
    pub fn from_function_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(UnaryOp::Sin),
            "cos" => Some(UnaryOp::Cos),
            "tan" => Some(UnaryOp::Tan),
            "exp" => Some(UnaryOp::Exp),
            "log" => Some(UnaryOp::Log),
            "sqrt" => Some(UnaryOp::Sqrt),
            "tanh" => Some(UnaryOp::Tanh),
            _ => None,
        }
    }

    #[inline]
    pub fn apply(&self, v: f64) -> f64 {
        match self {
            UnaryOp::Neg => -v,
            UnaryOp::Sin => v.sin(),
            UnaryOp::Cos => v.cos(),
            UnaryOp::Tan => v.tan(),
            UnaryOp::Exp => v.exp(),
            UnaryOp::Log => v.ln(),
            UnaryOp::Sqrt => v.sqrt(),
            UnaryOp::Tanh => v.tanh(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => " + ",
            BinaryOp::Sub => " - ",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }

    #[inline]
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
            BinaryOp::Pow => 4,
        }
    }
}

/// A scalar expression over named symbols.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Sym(Arc<str>),
    Unary(UnaryOp, Arc<Expr>),
    Binary(BinaryOp, Arc<Expr>, Arc<Expr>),
    Powi(Arc<Expr>, i32),
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Const(0.0)
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Const(v)
    }
}

impl Expr {
    pub fn constant(v: f64) -> Self {
        Expr::Const(v)
    }

    pub fn zero() -> Self {
        Expr::Const(0.0)
    }

    pub fn one() -> Self {
        Expr::Const(1.0)
    }

    pub fn sym(name: &str) -> Self {
        Expr::Sym(Arc::from(name))
    }

    /// Convenience for declaring a vector of symbols at once.
    pub fn symbols(names: &[&str]) -> Vec<Expr> {
        names.iter().map(|n| Expr::sym(n)).collect()
    }

    /// Sum of a sequence of expressions (`0` when empty).
    pub fn sum<I: IntoIterator<Item = Expr>>(terms: I) -> Expr {
        terms.into_iter().fold(Expr::zero(), |acc, t| acc + t)
    }

    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expr::Sym(name) => Some(name),
            _ => None,
        }
    }

    fn is_const(&self, value: f64) -> bool {
        matches!(self, Expr::Const(v) if *v == value)
    }

    // ------------------------------------------------------------------
    // Smart constructors
    // ------------------------------------------------------------------

    pub fn unary(op: UnaryOp, a: Expr) -> Expr {
        match (&op, &a) {
            (_, Expr::Const(v)) => Expr::Const(op.apply(*v)),
            (UnaryOp::Neg, Expr::Unary(UnaryOp::Neg, inner)) => inner.as_ref().clone(),
            _ => Expr::Unary(op, Arc::new(a)),
        }
    }

    pub fn binary(op: BinaryOp, a: Expr, b: Expr) -> Expr {
        if let (Expr::Const(x), Expr::Const(y)) = (&a, &b) {
            let folded = op.apply(*x, *y);
            if folded.is_finite() {
                return Expr::Const(folded);
            }
        }
        match op {
            BinaryOp::Add => {
                if a.is_const(0.0) {
                    return b;
                }
                if b.is_const(0.0) {
                    return a;
                }
                if let Expr::Unary(UnaryOp::Neg, inner) = &b {
                    return Expr::binary(BinaryOp::Sub, a, inner.as_ref().clone());
                }
            }
            BinaryOp::Sub => {
                if b.is_const(0.0) {
                    return a;
                }
                if a.is_const(0.0) {
                    return Expr::unary(UnaryOp::Neg, b);
                }
                if let Expr::Unary(UnaryOp::Neg, inner) = &b {
                    return Expr::binary(BinaryOp::Add, a, inner.as_ref().clone());
                }
            }
            BinaryOp::Mul => {
                if a.is_const(0.0) || b.is_const(0.0) {
                    return Expr::zero();
                }
                if a.is_const(1.0) {
                    return b;
                }
                if b.is_const(1.0) {
                    return a;
                }
                if a.is_const(-1.0) {
                    return Expr::unary(UnaryOp::Neg, b);
                }
                if b.is_const(-1.0) {
                    return Expr::unary(UnaryOp::Neg, a);
                }
            }
            BinaryOp::Div => {
                if a.is_const(0.0) {
                    return Expr::zero();
                }
                if b.is_const(1.0) {
                    return a;
                }
            }
            BinaryOp::Pow => {
                if let Some(e) = b.as_const() {
                    if e.fract() == 0.0 && e.abs() <= 64.0 {
                        return a.powi(e as i32);
                    }
                }
            }
        }
        Expr::Binary(op, Arc::new(a), Arc::new(b))
    }

    pub fn powi(&self, n: i32) -> Expr {
        match (self, n) {
            (_, 0) => Expr::one(),
            (_, 1) => self.clone(),
            (Expr::Const(v), _) => Expr::Const(v.powi(n)),
            (Expr::Powi(inner, m), _) => inner.powi(m * n),
            _ => Expr::Powi(Arc::new(self.clone()), n),
        }
    }

    pub fn pow(&self, exponent: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Pow, self.clone(), exponent.into())
    }

    pub fn sin(&self) -> Expr {
        Expr::unary(UnaryOp::Sin, self.clone())
    }

    pub fn cos(&self) -> Expr {
        Expr::unary(UnaryOp::Cos, self.clone())
    }

    pub fn tan(&self) -> Expr {
        Expr::unary(UnaryOp::Tan, self.clone())
    }

    pub fn exp(&self) -> Expr {
        Expr::unary(UnaryOp::Exp, self.clone())
    }

    pub fn ln(&self) -> Expr {
        Expr::unary(UnaryOp::Log, self.clone())
    }

    pub fn sqrt(&self) -> Expr {
        Expr::unary(UnaryOp::Sqrt, self.clone())
    }

    pub fn tanh(&self) -> Expr {
        Expr::unary(UnaryOp::Tanh, self.clone())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Names of all symbols referenced by this expression.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Const(_) => {}
            Expr::Sym(name) => {
                out.insert(name.to_string());
            }
            Expr::Unary(_, a) | Expr::Powi(a, _) => a.collect_symbols(out),
            Expr::Binary(_, a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }

    pub fn depends_on(&self, name: &str) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Sym(s) => s.as_ref() == name,
            Expr::Unary(_, a) | Expr::Powi(a, _) => a.depends_on(name),
            Expr::Binary(_, a, b) => a.depends_on(name) || b.depends_on(name),
        }
    }

    /// True if every constant in the tree is finite.
    pub fn has_finite_constants(&self) -> bool {
        match self {
            Expr::Const(v) => v.is_finite(),
            Expr::Sym(_) => true,
            Expr::Unary(_, a) | Expr::Powi(a, _) => a.has_finite_constants(),
            Expr::Binary(_, a, b) => a.has_finite_constants() && b.has_finite_constants(),
        }
    }

    /// Number of nodes, counting shared sub-trees once per occurrence.
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::Sym(_) => 1,
            Expr::Unary(_, a) | Expr::Powi(a, _) => 1 + a.node_count(),
            Expr::Binary(_, a, b) => 1 + a.node_count() + b.node_count(),
        }
    }

    // ------------------------------------------------------------------
    // Differentiation
    // ------------------------------------------------------------------

    /// Symbolic partial derivative with respect to the symbol `name`.
    pub fn diff(&self, name: &str) -> Expr {
        if !self.depends_on(name) {
            return Expr::zero();
        }
        match self {
            Expr::Const(_) => Expr::zero(),
            Expr::Sym(s) => {
                if s.as_ref() == name {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Expr::Unary(op, a) => {
                let a = a.as_ref();
                let da = a.diff(name);
                let outer = match op {
                    UnaryOp::Neg => return -da,
                    UnaryOp::Sin => a.cos(),
                    UnaryOp::Cos => -a.sin(),
                    UnaryOp::Tan => 1.0 / a.cos().powi(2),
                    UnaryOp::Exp => a.exp(),
                    UnaryOp::Log => 1.0 / a.clone(),
                    UnaryOp::Sqrt => 0.5 / a.sqrt(),
                    UnaryOp::Tanh => 1.0 - a.tanh().powi(2),
                };
                outer * da
            }
            Expr::Powi(a, n) => {
                let da = a.diff(name);
                (*n as f64) * a.powi(n - 1) * da
            }
            Expr::Binary(op, a, b) => {
                let (a, b) = (a.as_ref(), b.as_ref());
                match op {
                    BinaryOp::Add => a.diff(name) + b.diff(name),
                    BinaryOp::Sub => a.diff(name) - b.diff(name),
                    BinaryOp::Mul => a.diff(name) * b.clone() + a.clone() * b.diff(name),
                    BinaryOp::Div => {
                        a.diff(name) / b.clone() - a.clone() * b.diff(name) / b.powi(2)
                    }
                    BinaryOp::Pow => {
                        if b.depends_on(name) {
                            self.clone()
                                * (b.diff(name) * a.ln() + b.clone() * a.diff(name) / a.clone())
                        } else {
                            b.clone() * a.pow(b.clone() - 1.0) * a.diff(name)
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Tree-walking evaluation against a symbol table. Intended for
    /// one-off evaluations; repeated evaluation should go through [`Tape`].
    pub fn eval(&self, env: &HashMap<String, f64>) -> Result<f64, NlpError> {
        Ok(match self {
            Expr::Const(v) => *v,
            Expr::Sym(name) => *env
                .get(name.as_ref())
                .ok_or_else(|| NlpError::DescriptorInvalid(format!("unbound symbol '{}'", name)))?,
            Expr::Unary(op, a) => op.apply(a.eval(env)?),
            Expr::Powi(a, n) => a.eval(env)?.powi(*n),
            Expr::Binary(op, a, b) => op.apply(a.eval(env)?, b.eval(env)?),
        })
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Const(v) if *v < 0.0 => 3,
            Expr::Const(_) | Expr::Sym(_) => 5,
            Expr::Unary(UnaryOp::Neg, _) => 3,
            Expr::Unary(_, _) => 5,
            Expr::Powi(_, _) => 4,
            Expr::Binary(op, _, _) => op.precedence(),
        }
    }
}

fn write_child(f: &mut fmt::Formatter<'_>, child: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{}", v),
            Expr::Sym(name) => write!(f, "{}", name),
            Expr::Unary(UnaryOp::Neg, a) => {
                write!(f, "-")?;
                write_child(f, a, a.precedence() <= 3)
            }
            Expr::Unary(op, a) => write!(f, "{}({})", op.name(), a),
            Expr::Powi(a, n) => {
                write_child(f, a, a.precedence() <= 4)?;
                write!(f, "^{}", n)
            }
            Expr::Binary(op, a, b) => {
                let p = op.precedence();
                let left_parens = a.precedence() < p || (*op == BinaryOp::Pow && a.precedence() == p);
                let right_parens = b.precedence() < p
                    || (b.precedence() == p && matches!(op, BinaryOp::Sub | BinaryOp::Div));
                write_child(f, a, left_parens)?;
                write!(f, "{}", op.symbol())?;
                write_child(f, b, right_parens)
            }
        }
    }
}

// ----------------------------------------------------------------------
// Operator overloading
// ----------------------------------------------------------------------

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self.clone())
    }
}

macro_rules! impl_binary_ops {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
        impl $trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self, rhs.clone())
            }
        }
        impl $trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs)
            }
        }
        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs.clone())
            }
        }
        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self, Expr::Const(rhs))
            }
        }
        impl $trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self.clone(), Expr::Const(rhs))
            }
        }
        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::Const(self), rhs)
            }
        }
        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, Expr::Const(self), rhs.clone())
            }
        }
    };
}

impl_binary_ops!(Add, add, BinaryOp::Add);
impl_binary_ops!(Sub, sub, BinaryOp::Sub);
impl_binary_ops!(Mul, mul, BinaryOp::Mul);
impl_binary_ops!(Div, div, BinaryOp::Div);

// ----------------------------------------------------------------------
// Compiled evaluation
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Instr {
    Const(f64),
    Var(usize),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Powi(i32),
}

/// Postfix evaluation program for one expression.
///
/// Symbols are resolved to slots of a flat input slice at compile time, so
/// evaluation is a single pass over the instructions with a small stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Tape {
    code: Vec<Instr>,
    max_depth: usize,
}

impl Tape {
    pub fn compile(expr: &Expr, slots: &HashMap<String, usize>) -> Result<Self, NlpError> {
        let mut code = Vec::with_capacity(expr.node_count());
        let mut depth = 0usize;
        let mut max_depth = 0usize;
        emit(expr, slots, &mut code, &mut depth, &mut max_depth)?;
        Ok(Self { code, max_depth })
    }

    /// Evaluate against `vars`, indexed by the slots given at compile time.
    pub fn eval(&self, vars: &[f64]) -> f64 {
        let mut stack: Vec<f64> = Vec::with_capacity(self.max_depth);
        for instr in &self.code {
            match *instr {
                Instr::Const(v) => stack.push(v),
                Instr::Var(i) => stack.push(vars[i]),
                Instr::Unary(op) => {
                    if let Some(top) = stack.last_mut() {
                        *top = op.apply(*top);
                    }
                }
                Instr::Powi(n) => {
                    if let Some(top) = stack.last_mut() {
                        *top = top.powi(n);
                    }
                }
                Instr::Binary(op) => {
                    let b = stack.pop().unwrap_or(f64::NAN);
                    if let Some(top) = stack.last_mut() {
                        *top = op.apply(*top, b);
                    }
                }
            }
        }
        stack.pop().unwrap_or(f64::NAN)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

fn emit(
    expr: &Expr,
    slots: &HashMap<String, usize>,
    code: &mut Vec<Instr>,
    depth: &mut usize,
    max_depth: &mut usize,
) -> Result<(), NlpError> {
    match expr {
        Expr::Const(v) => {
            code.push(Instr::Const(*v));
            *depth += 1;
        }
        Expr::Sym(name) => {
            let slot = slots.get(name.as_ref()).ok_or_else(|| {
                NlpError::DescriptorInvalid(format!("symbol '{}' is not declared", name))
            })?;
            code.push(Instr::Var(*slot));
            *depth += 1;
        }
        Expr::Unary(op, a) => {
            emit(a, slots, code, depth, max_depth)?;
            code.push(Instr::Unary(*op));
        }
        Expr::Powi(a, n) => {
            emit(a, slots, code, depth, max_depth)?;
            code.push(Instr::Powi(*n));
        }
        Expr::Binary(op, a, b) => {
            emit(a, slots, code, depth, max_depth)?;
            emit(b, slots, code, depth, max_depth)?;
            code.push(Instr::Binary(*op));
            *depth -= 1;
        }
    }
    *max_depth = (*max_depth).max(*depth);
    Ok(())
}
