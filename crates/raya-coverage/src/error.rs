//! Instrumentation and execution errors

use crate::analysis::SpanIndex;
use crate::lowered::SourceRange;
use raya_coverage_runtime::MethodToken;
use thiserror::Error;

pub type CoverageResult<T> = Result<T, CoverageError>;

/// Compile-time diagnostics. Instrumentation never runs on a unit that
/// produced one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoverageError {
    #[error("Unsupported construct in {unit} at {range}: {construct}")]
    UnsupportedConstruct {
        unit: String,
        construct: String,
        range: SourceRange,
    },

    #[error("Unit {unit} is already instrumented")]
    AlreadyInstrumented { unit: String },

    #[error("Undefined label '{label}' in {unit}")]
    UndefinedLabel { unit: String, label: String },

    #[error("Duplicate label '{label}' in {unit}")]
    DuplicateLabel { unit: String, label: String },

    #[error("Invalid break statement in {unit} (not in loop or switch)")]
    InvalidBreak { unit: String },

    #[error("Invalid continue statement in {unit} (not in loop)")]
    InvalidContinue { unit: String },

    #[error("Method token {token} used by more than one unit")]
    DuplicateToken { token: MethodToken },

    #[error("No span table for unit {unit} ({token})")]
    MissingSpanTable { unit: String, token: MethodToken },

    #[error("Span {index} of {unit} received no probe")]
    UnplacedSpan { unit: String, index: SpanIndex },

    #[error("Span table out of order: position {position} holds span {found}")]
    NonContiguousSpans { position: usize, found: SpanIndex },
}

/// Failures of the reference host
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("Unknown unit: {token}")]
    UnknownUnit { token: MethodToken },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("{name} expects {expected} arguments, got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Value is not callable: {value}")]
    NotCallable { value: String },

    #[error("Uncaught exception: {value}")]
    Uncaught { value: String },

    #[error("Control flow escaped unit {unit}: {what}")]
    StrayControlFlow { unit: String, what: String },

    #[error("Call depth exceeded ({depth})")]
    StackOverflow { depth: usize },
}
