//! Reachability-aware pre-order walk of one unit
//!
//! A single walk validates the body, tracks which code is reachable and records
//! a span for every reachable instrumentable point. Labels make reachability
//! depend on later code (a backward `goto` reaches an earlier label), so the
//! analyzer repeats the walk until the set of reachable labels stops growing.

use super::span::{SiteId, Span, SpanIndex, SpanKind};
use crate::error::{CoverageError, CoverageResult};
use crate::lowered::{Body, LoopTest, Node, SourceRange};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowKind {
    Loop,
    Switch,
}

/// An enclosing `break`/`continue` target
#[derive(Debug)]
struct FlowScope {
    kind: FlowKind,
    broke: bool,
    continued: bool,
}

pub(super) struct UnitWalker<'a, 'l> {
    unit: &'a str,
    /// Labels known to be entered by a reachable `goto`
    reachable_labels: &'l FxHashSet<String>,
    /// Labels targeted by a reachable `goto` during this walk
    pub(super) targeted: FxHashSet<String>,
    pub(super) spans: Vec<Span>,
    pub(super) nested: Vec<&'a Body>,
    flow: Vec<FlowScope>,
    label_scopes: Vec<Vec<&'a str>>,
    declared_labels: FxHashSet<&'a str>,
    next_site: u32,
}

impl<'a, 'l> UnitWalker<'a, 'l> {
    pub(super) fn new(unit: &'a str, reachable_labels: &'l FxHashSet<String>) -> Self {
        Self {
            unit,
            reachable_labels,
            targeted: FxHashSet::default(),
            spans: Vec::new(),
            nested: Vec::new(),
            flow: Vec::new(),
            label_scopes: Vec::new(),
            declared_labels: FxHashSet::default(),
            next_site: 0,
        }
    }

    /// Walk a whole unit body. The unit entry is always span 0.
    pub(super) fn walk_body(&mut self, body: &'a Body) -> CoverageResult<()> {
        self.record(true, SiteId(0), SpanKind::UnitEntry, body.range);
        self.walk(&body.root, true)?;
        Ok(())
    }

    fn enter_site(&mut self) -> SiteId {
        let site = SiteId(self.next_site);
        self.next_site += 1;
        site
    }

    fn peek_site(&self) -> SiteId {
        SiteId(self.next_site)
    }

    fn record(&mut self, reachable: bool, site: SiteId, kind: SpanKind, range: SourceRange) {
        if reachable {
            let index = SpanIndex(self.spans.len() as u32);
            self.spans.push(Span {
                index,
                kind,
                site,
                range,
            });
        }
    }

    fn unsupported(&self, construct: &str, range: SourceRange) -> CoverageError {
        CoverageError::UnsupportedConstruct {
            unit: self.unit.to_string(),
            construct: construct.to_string(),
            range,
        }
    }

    /// Walk `node` entered with the given reachability; returns whether control
    /// can fall out of its end.
    fn walk(&mut self, node: &'a Node, reachable: bool) -> CoverageResult<bool> {
        let site = self.enter_site();
        match node {
            Node::Stmt(stmt) => {
                if stmt_is_instrumented(stmt) {
                    return Err(self.already_instrumented());
                }
                self.record(reachable, site, SpanKind::Statement, stmt.range);
                Ok(reachable)
            }

            Node::Seq(children) => self.walk_seq(children, reachable),

            Node::Label { range, .. } => Err(self.unsupported("label outside a statement list", *range)),

            Node::If(n) => {
                if n.cond.is_instrumented() {
                    return Err(self.already_instrumented());
                }
                self.record(reachable, site, SpanKind::Condition, n.range);
                let truth = n.cond.const_truth();
                let then_end = self.walk(&n.then_branch, reachable && truth != Some(false))?;
                let else_reachable = reachable && truth != Some(true);
                let else_end = match &n.else_branch {
                    Some(else_branch) => self.walk(else_branch, else_reachable)?,
                    None => else_reachable,
                };
                Ok(then_end || else_end)
            }

            Node::Loop(n) => {
                if n.cond.is_instrumented() {
                    return Err(self.already_instrumented());
                }
                let entered = match &n.init {
                    Some(init) => self.walk(init, reachable)?,
                    None => reachable,
                };
                let truth = n.cond.const_truth();
                self.flow.push(FlowScope {
                    kind: FlowKind::Loop,
                    broke: false,
                    continued: false,
                });

                let cond_reachable = match n.test {
                    LoopTest::Pre => {
                        self.record(entered, site, SpanKind::LoopHeader, n.range);
                        let body_end = self.walk(&n.body, entered && truth != Some(false))?;
                        let looped = body_end || self.current_flow_continued();
                        self.walk_optional(n.update.as_ref(), looped)?;
                        entered
                    }
                    LoopTest::Post => {
                        let body_end = self.walk(&n.body, entered)?;
                        let looped = body_end || self.current_flow_continued();
                        let update_end = self.walk_optional(n.update.as_ref(), looped)?;
                        self.record(update_end, site, SpanKind::LoopHeader, n.range);
                        update_end
                    }
                };

                let scope = self.pop_flow();
                Ok((cond_reachable && truth != Some(true)) || scope.broke)
            }

            Node::Switch(n) => {
                if n.scrutinee.is_instrumented() {
                    return Err(self.already_instrumented());
                }
                self.record(reachable, site, SpanKind::Condition, n.range);
                self.flow.push(FlowScope {
                    kind: FlowKind::Switch,
                    broke: false,
                    continued: false,
                });
                let has_default = n.arms.iter().any(|arm| arm.case.is_none());
                let mut end = reachable && !has_default;
                for arm in &n.arms {
                    let arm_site = self.peek_site();
                    self.record(reachable, arm_site, SpanKind::SwitchArm, arm.range);
                    end |= self.walk(&arm.body, reachable)?;
                }
                let scope = self.pop_flow();
                Ok(end || scope.broke)
            }

            Node::Try(n) => {
                let mut end = self.walk(&n.body, reachable)?;
                for catch in &n.catches {
                    let catch_site = self.peek_site();
                    self.record(reachable, catch_site, SpanKind::CatchEntry, catch.range);
                    end |= self.walk(&catch.body, reachable)?;
                }
                if let Some(finally) = &n.finally {
                    let finally_site = self.peek_site();
                    self.record(reachable, finally_site, SpanKind::FinallyEntry, finally.range());
                    let finally_end = self.walk(finally, reachable)?;
                    end = end && finally_end;
                }
                Ok(end)
            }

            Node::Scoped(n) => {
                if n.resource.is_instrumented() {
                    return Err(self.already_instrumented());
                }
                self.record(reachable, site, SpanKind::ScopeAcquire, n.range);
                self.walk(&n.body, reachable)
            }

            Node::Goto { label, range } => {
                if !self.label_in_scope(label) {
                    return Err(CoverageError::UndefinedLabel {
                        unit: self.unit.to_string(),
                        label: label.clone(),
                    });
                }
                self.record(reachable, site, SpanKind::Statement, *range);
                if reachable {
                    self.targeted.insert(label.clone());
                }
                Ok(false)
            }

            Node::Break { range } => {
                let Some(scope) = self.flow.last_mut() else {
                    return Err(CoverageError::InvalidBreak {
                        unit: self.unit.to_string(),
                    });
                };
                scope.broke |= reachable;
                self.record(reachable, site, SpanKind::Statement, *range);
                Ok(false)
            }

            Node::Continue { range } => {
                let Some(scope) = self.flow.iter_mut().rev().find(|s| s.kind == FlowKind::Loop)
                else {
                    return Err(CoverageError::InvalidContinue {
                        unit: self.unit.to_string(),
                    });
                };
                scope.continued |= reachable;
                self.record(reachable, site, SpanKind::Statement, *range);
                Ok(false)
            }

            Node::Return { value, range } => {
                if value.as_ref().is_some_and(|v| v.is_instrumented()) {
                    return Err(self.already_instrumented());
                }
                self.record(reachable, site, SpanKind::Statement, *range);
                Ok(false)
            }

            Node::Throw { value, range } => {
                if value.is_instrumented() {
                    return Err(self.already_instrumented());
                }
                self.record(reachable, site, SpanKind::Statement, *range);
                Ok(false)
            }

            Node::Nested(body) => {
                self.nested.push(body);
                Ok(reachable)
            }

            Node::Probe(_) | Node::AcquirePayload => Err(self.already_instrumented()),
        }
    }

    fn walk_optional(&mut self, node: Option<&'a Node>, reachable: bool) -> CoverageResult<bool> {
        match node {
            Some(node) => self.walk(node, reachable),
            None => Ok(reachable),
        }
    }

    fn walk_seq(&mut self, children: &'a [Node], reachable: bool) -> CoverageResult<bool> {
        let mut labels = Vec::new();
        for child in children {
            if let Node::Label { name, .. } = child {
                if !self.declared_labels.insert(name.as_str()) {
                    return Err(CoverageError::DuplicateLabel {
                        unit: self.unit.to_string(),
                        label: name.clone(),
                    });
                }
                labels.push(name.as_str());
            }
        }
        self.label_scopes.push(labels);

        let mut reach = reachable;
        for child in children {
            reach = match child {
                Node::Label { name, range } => {
                    let site = self.enter_site();
                    let entered = reach || self.reachable_labels.contains(name);
                    self.record(entered, site, SpanKind::Label, *range);
                    entered
                }
                _ => self.walk(child, reach)?,
            };
        }

        self.label_scopes.pop();
        Ok(reach)
    }

    fn label_in_scope(&self, label: &str) -> bool {
        self.label_scopes
            .iter()
            .any(|scope| scope.iter().any(|l| *l == label))
    }

    fn current_flow_continued(&self) -> bool {
        self.flow.last().is_some_and(|s| s.continued)
    }

    fn pop_flow(&mut self) -> FlowScope {
        self.flow.pop().unwrap_or(FlowScope {
            kind: FlowKind::Loop,
            broke: false,
            continued: false,
        })
    }

    fn already_instrumented(&self) -> CoverageError {
        CoverageError::AlreadyInstrumented {
            unit: self.unit.to_string(),
        }
    }
}

fn stmt_is_instrumented(stmt: &crate::lowered::Stmt) -> bool {
    use crate::lowered::StmtKind;
    match &stmt.kind {
        StmtKind::Assign { value, .. } => value.is_instrumented(),
        StmtKind::Eval(expr) | StmtKind::Print(expr) => expr.is_instrumented(),
        StmtKind::Empty => false,
    }
}
