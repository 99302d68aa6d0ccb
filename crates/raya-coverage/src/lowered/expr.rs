//! Expressions of lowered bodies

use crate::analysis::SpanIndex;
use raya_coverage_runtime::MethodToken;

/// Compile-time constant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Constant),
    Local(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Direct reference to a unit
    Function(MethodToken),
    /// Closure over the current scope; the body is a nested unit
    Closure(MethodToken),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Marks `span` visited, then evaluates `expr` (injected)
    Probed {
        span: SpanIndex,
        expr: Box<Expr>,
    },
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Const(Constant::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Expr::Const(Constant::Bool(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Const(Constant::Str(value.into()))
    }

    pub fn null() -> Self {
        Expr::Const(Constant::Null)
    }

    pub fn local(name: impl Into<String>) -> Self {
        Expr::Local(name.into())
    }

    pub fn not(operand: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    /// Whether this expression contains injected probes
    pub fn is_instrumented(&self) -> bool {
        match self {
            Expr::Probed { .. } => true,
            Expr::Unary { operand, .. } => operand.is_instrumented(),
            Expr::Binary { left, right, .. } => left.is_instrumented() || right.is_instrumented(),
            Expr::Call { callee, args } => {
                callee.is_instrumented() || args.iter().any(Expr::is_instrumented)
            }
            Expr::Const(_) | Expr::Local(_) | Expr::Function(_) | Expr::Closure(_) => false,
        }
    }

    /// Fold the expression to a boolean if its value is known at compile time
    pub fn const_truth(&self) -> Option<bool> {
        match self {
            Expr::Const(Constant::Bool(b)) => Some(*b),
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => operand.const_truth().map(|b| !b),
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => match (left.const_truth(), right.const_truth()) {
                    (Some(false), _) => Some(false),
                    (Some(true), r) => r,
                    _ => None,
                },
                BinaryOp::Or => match (left.const_truth(), right.const_truth()) {
                    (Some(true), _) => Some(true),
                    (Some(false), r) => r,
                    _ => None,
                },
                _ if op.is_comparison() => {
                    let (Expr::Const(l), Expr::Const(r)) = (left.as_ref(), right.as_ref()) else {
                        return None;
                    };
                    op.compare_constants(l, r)
                }
                _ => None,
            },
            _ => None,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Logical
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    fn compare_constants(&self, left: &Constant, right: &Constant) -> Option<bool> {
        match (self, left, right) {
            (BinaryOp::Equal, l, r) => Some(l == r),
            (BinaryOp::NotEqual, l, r) => Some(l != r),
            (op, Constant::Int(l), Constant::Int(r)) => Some(op.compare_ints(*l, *r)),
            _ => None,
        }
    }

    pub(crate) fn compare_ints(&self, left: i64, right: i64) -> bool {
        match self {
            BinaryOp::Equal => left == right,
            BinaryOp::NotEqual => left != right,
            BinaryOp::Less => left < right,
            BinaryOp::LessEqual => left <= right,
            BinaryOp::Greater => left > right,
            BinaryOp::GreaterEqual => left >= right,
            _ => false,
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Numeric negation (-)
    Neg,
    /// Logical not (!)
    Not,
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        };
        write!(f, "{}", s)
    }
}
