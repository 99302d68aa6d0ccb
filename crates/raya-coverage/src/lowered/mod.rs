//! Lowered control-flow bodies
//!
//! The input of span analysis: one [`Body`] per compiled unit, expressed as a
//! tree of structured [`Node`]s. Closures, local functions and state-machine
//! steps appear as [`Node::Nested`] boundaries and are analyzed as units of
//! their own.

mod expr;

pub use expr::{BinaryOp, Constant, Expr, UnaryOp};

use crate::analysis::SpanIndex;
use raya_coverage_runtime::MethodToken;
use serde::{Deserialize, Serialize};

/// Byte range in the unit's source text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: u32,
    pub end: u32,
}

impl SourceRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest range covering both
    pub fn cover(self, other: SourceRange) -> SourceRange {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        SourceRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl std::fmt::Display for SourceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// What kind of body a unit is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Method,
    Lambda,
    LocalFunction,
    /// One step of a lowered async or iterator state machine
    StateMachineStep,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitKind::Method => "method",
            UnitKind::Lambda => "lambda",
            UnitKind::LocalFunction => "local",
            UnitKind::StateMachineStep => "step",
        };
        write!(f, "{}", s)
    }
}

/// One independently invocable body
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub token: MethodToken,
    pub name: String,
    pub kind: UnitKind,
    pub params: Vec<String>,
    pub root: Node,
    pub range: SourceRange,
}

impl Body {
    pub fn new(token: MethodToken, name: impl Into<String>, kind: UnitKind, root: Node) -> Self {
        let range = root.range();
        Self {
            token,
            name: name.into(),
            kind,
            params: Vec::new(),
            root,
            range,
        }
    }

    pub fn method(token: MethodToken, name: impl Into<String>, root: Node) -> Self {
        Self::new(token, name, UnitKind::Method, root)
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = range;
        self
    }

    /// Visit this body and every nested body, parents first
    pub fn for_each_unit<'a>(&'a self, f: &mut dyn FnMut(&'a Body)) {
        f(self);
        self.root
            .for_each_nested(&mut |nested| nested.for_each_unit(&mut *f));
    }
}

/// A compilation's worth of top-level units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoweredModule {
    pub name: String,
    pub units: Vec<Body>,
}

impl LoweredModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
        }
    }

    pub fn with_unit(mut self, body: Body) -> Self {
        self.units.push(body);
        self
    }
}

/// Effectful leaf statement
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `name = value`; declares `name` in the current scope if absent
    Assign { name: String, value: Expr },
    /// Evaluate for side effects
    Eval(Expr),
    /// Write the value to the program output
    Print(Expr),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    pub cond: Expr,
    pub then_branch: Node,
    pub else_branch: Option<Node>,
    pub range: SourceRange,
}

/// Where the loop condition is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTest {
    /// `while` / `for`: condition before each iteration
    Pre,
    /// `do ... while`: condition after each iteration
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopNode {
    pub test: LoopTest,
    pub init: Option<Node>,
    pub cond: Expr,
    pub update: Option<Node>,
    pub body: Node,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    /// `None` is the default arm
    pub case: Option<Constant>,
    pub body: Node,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchNode {
    pub scrutinee: Expr,
    pub arms: Vec<SwitchArm>,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// Local the exception value is bound to
    pub binding: Option<String>,
    pub body: Node,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryNode {
    pub body: Node,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Node>,
    pub range: SourceRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Lock,
    Using,
}

/// `lock`/`using`-style block guarding a resource
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedNode {
    pub kind: ScopeKind,
    pub resource: Expr,
    pub body: Node,
    pub range: SourceRange,
}

/// Structured control-flow node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Stmt(Stmt),
    Seq(Vec<Node>),
    If(Box<IfNode>),
    Loop(Box<LoopNode>),
    Switch(Box<SwitchNode>),
    Try(Box<TryNode>),
    Scoped(Box<ScopedNode>),
    /// Jump target; only valid as a direct child of a `Seq`
    Label { name: String, range: SourceRange },
    Goto { label: String, range: SourceRange },
    Break { range: SourceRange },
    Continue { range: SourceRange },
    Return { value: Option<Expr>, range: SourceRange },
    Throw { value: Expr, range: SourceRange },
    /// Unit boundary: the body is compiled as its own unit
    Nested(Box<Body>),
    /// Marks `span` visited (injected)
    Probe(SpanIndex),
    /// Creates the unit's payload if its slot is still empty (injected)
    AcquirePayload,
}

impl Node {
    pub fn seq(nodes: Vec<Node>) -> Self {
        Node::Seq(nodes)
    }

    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Node::Stmt(Stmt {
            kind: StmtKind::Assign {
                name: name.into(),
                value,
            },
            range: SourceRange::default(),
        })
    }

    pub fn eval(expr: Expr) -> Self {
        Node::Stmt(Stmt {
            kind: StmtKind::Eval(expr),
            range: SourceRange::default(),
        })
    }

    pub fn print(expr: Expr) -> Self {
        Node::Stmt(Stmt {
            kind: StmtKind::Print(expr),
            range: SourceRange::default(),
        })
    }

    pub fn empty() -> Self {
        Node::Stmt(Stmt {
            kind: StmtKind::Empty,
            range: SourceRange::default(),
        })
    }

    pub fn if_then(cond: Expr, then_branch: Node) -> Self {
        Self::if_else(cond, then_branch, None)
    }

    pub fn if_else(cond: Expr, then_branch: Node, else_branch: Option<Node>) -> Self {
        Node::If(Box::new(IfNode {
            cond,
            then_branch,
            else_branch,
            range: SourceRange::default(),
        }))
    }

    pub fn while_loop(cond: Expr, body: Node) -> Self {
        Node::Loop(Box::new(LoopNode {
            test: LoopTest::Pre,
            init: None,
            cond,
            update: None,
            body,
            range: SourceRange::default(),
        }))
    }

    pub fn do_while(body: Node, cond: Expr) -> Self {
        Node::Loop(Box::new(LoopNode {
            test: LoopTest::Post,
            init: None,
            cond,
            update: None,
            body,
            range: SourceRange::default(),
        }))
    }

    pub fn for_loop(init: Node, cond: Expr, update: Node, body: Node) -> Self {
        Node::Loop(Box::new(LoopNode {
            test: LoopTest::Pre,
            init: Some(init),
            cond,
            update: Some(update),
            body,
            range: SourceRange::default(),
        }))
    }

    pub fn switch(scrutinee: Expr, arms: Vec<(Option<Constant>, Node)>) -> Self {
        Node::Switch(Box::new(SwitchNode {
            scrutinee,
            arms: arms
                .into_iter()
                .map(|(case, body)| SwitchArm {
                    range: body.range(),
                    case,
                    body,
                })
                .collect(),
            range: SourceRange::default(),
        }))
    }

    pub fn try_catch(body: Node, catches: Vec<(Option<&str>, Node)>, finally: Option<Node>) -> Self {
        Node::Try(Box::new(TryNode {
            body,
            catches: catches
                .into_iter()
                .map(|(binding, body)| CatchClause {
                    binding: binding.map(str::to_string),
                    range: body.range(),
                    body,
                })
                .collect(),
            finally,
            range: SourceRange::default(),
        }))
    }

    pub fn scoped(kind: ScopeKind, resource: Expr, body: Node) -> Self {
        Node::Scoped(Box::new(ScopedNode {
            kind,
            resource,
            body,
            range: SourceRange::default(),
        }))
    }

    pub fn label(name: impl Into<String>) -> Self {
        Node::Label {
            name: name.into(),
            range: SourceRange::default(),
        }
    }

    pub fn goto(label: impl Into<String>) -> Self {
        Node::Goto {
            label: label.into(),
            range: SourceRange::default(),
        }
    }

    pub fn brk() -> Self {
        Node::Break {
            range: SourceRange::default(),
        }
    }

    pub fn cont() -> Self {
        Node::Continue {
            range: SourceRange::default(),
        }
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Node::Return {
            value,
            range: SourceRange::default(),
        }
    }

    pub fn throw(value: Expr) -> Self {
        Node::Throw {
            value,
            range: SourceRange::default(),
        }
    }

    pub fn nested(body: Body) -> Self {
        Node::Nested(Box::new(body))
    }

    /// Replace the node's own source range
    ///
    /// Sequences have no range of their own and are returned unchanged.
    pub fn with_range(mut self, new_range: SourceRange) -> Self {
        match &mut self {
            Node::Stmt(Stmt { range, .. })
            | Node::Label { range, .. }
            | Node::Goto { range, .. }
            | Node::Break { range }
            | Node::Continue { range }
            | Node::Return { range, .. }
            | Node::Throw { range, .. } => *range = new_range,
            Node::If(n) => n.range = new_range,
            Node::Loop(n) => n.range = new_range,
            Node::Switch(n) => n.range = new_range,
            Node::Try(n) => n.range = new_range,
            Node::Scoped(n) => n.range = new_range,
            Node::Nested(body) => body.range = new_range,
            Node::Seq(_) | Node::Probe(_) | Node::AcquirePayload => {}
        }
        self
    }

    /// Source range covered by this node
    pub fn range(&self) -> SourceRange {
        match self {
            Node::Stmt(Stmt { range, .. })
            | Node::Label { range, .. }
            | Node::Goto { range, .. }
            | Node::Break { range }
            | Node::Continue { range }
            | Node::Return { range, .. }
            | Node::Throw { range, .. } => *range,
            Node::If(n) => n.range,
            Node::Loop(n) => n.range,
            Node::Switch(n) => n.range,
            Node::Try(n) => n.range,
            Node::Scoped(n) => n.range,
            Node::Nested(body) => body.range,
            Node::Seq(nodes) => nodes
                .iter()
                .fold(SourceRange::default(), |acc, n| acc.cover(n.range())),
            Node::Probe(_) | Node::AcquirePayload => SourceRange::default(),
        }
    }

    /// Visit the direct nested-unit boundaries below this node
    ///
    /// Does not descend into the nested bodies themselves.
    pub fn for_each_nested<'a>(&'a self, f: &mut dyn FnMut(&'a Body)) {
        match self {
            Node::Nested(body) => f(body),
            Node::Seq(nodes) => nodes.iter().for_each(|n| n.for_each_nested(f)),
            Node::If(n) => {
                n.then_branch.for_each_nested(f);
                if let Some(e) = &n.else_branch {
                    e.for_each_nested(f);
                }
            }
            Node::Loop(n) => {
                if let Some(init) = &n.init {
                    init.for_each_nested(f);
                }
                n.body.for_each_nested(f);
                if let Some(update) = &n.update {
                    update.for_each_nested(f);
                }
            }
            Node::Switch(n) => n.arms.iter().for_each(|arm| arm.body.for_each_nested(f)),
            Node::Try(n) => {
                n.body.for_each_nested(f);
                n.catches.iter().for_each(|c| c.body.for_each_nested(f));
                if let Some(fin) = &n.finally {
                    fin.for_each_nested(f);
                }
            }
            Node::Scoped(n) => n.body.for_each_nested(f),
            Node::Stmt(_)
            | Node::Label { .. }
            | Node::Goto { .. }
            | Node::Break { .. }
            | Node::Continue { .. }
            | Node::Return { .. }
            | Node::Throw { .. }
            | Node::Probe(_)
            | Node::AcquirePayload => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_range_covers_children() {
        let seq = Node::seq(vec![
            Node::empty().with_range(SourceRange::new(10, 12)),
            Node::empty(),
            Node::brk().with_range(SourceRange::new(20, 26)),
        ]);
        assert_eq!(seq.range(), SourceRange::new(10, 26));
        assert_eq!(Node::seq(vec![]).range(), SourceRange::default());
    }

    #[test]
    fn test_for_each_unit_visits_nested_parents_first() {
        let inner = Body::new(MethodToken::method(3), "inner", UnitKind::Lambda, Node::empty());
        let middle = Body::new(
            MethodToken::method(2),
            "middle",
            UnitKind::Lambda,
            Node::seq(vec![Node::nested(inner)]),
        );
        let outer = Body::method(
            MethodToken::method(1),
            "outer",
            Node::if_then(Expr::bool(true), Node::nested(middle)),
        );

        let mut names = Vec::new();
        outer.for_each_unit(&mut |b| names.push(b.name.clone()));
        assert_eq!(names, vec!["outer", "middle", "inner"]);
    }

    #[test]
    fn test_body_takes_root_range() {
        let body = Body::method(
            MethodToken::method(1),
            "m",
            Node::ret(None).with_range(SourceRange::new(4, 11)),
        )
        .with_params(["a", "b"]);
        assert_eq!(body.range, SourceRange::new(4, 11));
        assert_eq!(body.params, vec!["a".to_string(), "b".to_string()]);
    }
}
