//! Raya Coverage Instrumentation
//!
//! Compile-time half of span coverage:
//! - **Lowered bodies** (`lowered` module): the structurally explicit control
//!   flow of each compiled unit, closures and state-machine steps already split
//!   into nested units
//! - **Span analysis** (`analysis` module): assigns every reachable
//!   instrumentable point a dense index, one frozen [`SpanTable`] per unit
//! - **Probe injection** (`inject` module): rewrites each unit so a payload is
//!   acquired on first use and every span's entry marks its cell
//! - **Reference host** (`exec` module): a tree-walking executor for
//!   instrumented units, used to check probe behavior end to end
//!
//! The runtime half lives in `raya-coverage-runtime`.
//!
//! # Example
//!
//! ```rust,ignore
//! use raya_coverage::{InstrumentOptions, ProbeInjector, SpanAnalyzer};
//!
//! let analysis = SpanAnalyzer::new().analyze_module(&module)?;
//! let injector = ProbeInjector::new(InstrumentOptions::for_module(module_id));
//! let instrumented = injector.instrument_module(&module, &analysis)?;
//! ```

#![warn(rust_2018_idioms)]

pub mod analysis;
pub mod error;
pub mod exec;
pub mod inject;
pub mod lowered;
pub mod pretty;

pub use analysis::{AnalyzedModule, AnalyzedUnit, SiteId, Span, SpanAnalyzer, SpanIndex, SpanKind, SpanTable};
pub use error::{CoverageError, CoverageResult, ExecError};
pub use exec::{Machine, Value};
pub use inject::{InstrumentOptions, InstrumentedModule, InstrumentedUnit, ProbeInjector, SlotDecl};
pub use lowered::{
    BinaryOp, Body, CatchClause, Constant, Expr, IfNode, LoopNode, LoopTest, LoweredModule, Node,
    ScopeKind, ScopedNode, SourceRange, Stmt, StmtKind, SwitchArm, SwitchNode, TryNode, UnaryOp,
    UnitKind,
};
pub use pretty::PrettyPrint;

pub use raya_coverage_runtime::{MethodToken, ModuleId};
