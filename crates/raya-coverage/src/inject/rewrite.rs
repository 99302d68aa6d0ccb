//! Tree rewrite that splices probes into one unit
//!
//! Nodes are visited in the same pre-order as span analysis, so the site
//! recorded with each span identifies the node its probe belongs to.

use crate::analysis::{SiteId, SpanIndex, SpanKind, SpanTable};
use crate::error::{CoverageError, CoverageResult};
use crate::lowered::{
    Body, CatchClause, Expr, IfNode, LoopNode, Node, ScopedNode, SwitchArm, SwitchNode, TryNode,
};
use rustc_hash::FxHashMap;

pub(super) struct UnitRewriter<'b> {
    pending: FxHashMap<(SiteId, SpanKind), SpanIndex>,
    placed: Vec<bool>,
    nested: Vec<&'b Body>,
    next_site: u32,
}

impl<'b> UnitRewriter<'b> {
    /// With `enabled` false no probe is placed and only nested units are split off
    pub(super) fn new(table: &SpanTable, enabled: bool) -> Self {
        let pending = if enabled {
            table.iter().map(|s| ((s.site, s.kind), s.index)).collect()
        } else {
            FxHashMap::default()
        };
        Self {
            pending,
            placed: vec![false; if enabled { table.len() } else { 0 }],
            nested: Vec::new(),
            next_site: 0,
        }
    }

    /// Verify every span got its probe; returns the probe count
    pub(super) fn finish(&self, unit: &str) -> CoverageResult<usize> {
        if let Some(missing) = self.placed.iter().position(|placed| !placed) {
            return Err(CoverageError::UnplacedSpan {
                unit: unit.to_string(),
                index: SpanIndex(missing as u32),
            });
        }
        Ok(self.placed.len())
    }

    pub(super) fn into_nested(self) -> Vec<&'b Body> {
        self.nested
    }

    /// Rewrite the unit root behind the payload prologue and entry probe
    pub(super) fn rewrite_root(&mut self, root: &'b Node) -> Node {
        let mut nodes = vec![Node::AcquirePayload];
        if let Some(entry) = self.take(SiteId(0), SpanKind::UnitEntry) {
            nodes.push(Node::Probe(entry));
        }
        let (probe, root) = self.rewrite_parts(root);
        nodes.extend(probe.map(Node::Probe));
        nodes.push(root);
        Node::Seq(nodes)
    }

    pub(super) fn rewrite(&mut self, node: &'b Node) -> Node {
        let (probe, node) = self.rewrite_parts(node);
        prepend(probe, node)
    }

    fn enter_site(&mut self) -> SiteId {
        let site = SiteId(self.next_site);
        self.next_site += 1;
        site
    }

    fn peek_site(&self) -> SiteId {
        SiteId(self.next_site)
    }

    fn take(&mut self, site: SiteId, kind: SpanKind) -> Option<SpanIndex> {
        let index = self.pending.remove(&(site, kind))?;
        if let Some(placed) = self.placed.get_mut(index.as_usize()) {
            *placed = true;
        }
        Some(index)
    }

    fn probed(&mut self, site: SiteId, kind: SpanKind, expr: &Expr) -> Expr {
        match self.take(site, kind) {
            Some(span) => Expr::Probed {
                span,
                expr: Box::new(expr.clone()),
            },
            None => expr.clone(),
        }
    }

    /// Rewrite `node`, returning the statement probe that must run right before
    /// it (if any) separately so sequences can splice it in place.
    fn rewrite_parts(&mut self, node: &'b Node) -> (Option<SpanIndex>, Node) {
        let site = self.enter_site();
        match node {
            Node::Stmt(_)
            | Node::Goto { .. }
            | Node::Break { .. }
            | Node::Continue { .. }
            | Node::Return { .. }
            | Node::Throw { .. } => (self.take(site, SpanKind::Statement), node.clone()),

            Node::Seq(children) => (None, Node::Seq(self.rewrite_seq(children))),

            Node::If(n) => {
                let cond = self.probed(site, SpanKind::Condition, &n.cond);
                let then_branch = self.rewrite(&n.then_branch);
                let else_branch = n.else_branch.as_ref().map(|e| self.rewrite(e));
                let rewritten = IfNode {
                    cond,
                    then_branch,
                    else_branch,
                    range: n.range,
                };
                (None, Node::If(Box::new(rewritten)))
            }

            Node::Loop(n) => {
                let cond = self.probed(site, SpanKind::LoopHeader, &n.cond);
                let init = n.init.as_ref().map(|i| self.rewrite(i));
                let body = self.rewrite(&n.body);
                let update = n.update.as_ref().map(|u| self.rewrite(u));
                let rewritten = LoopNode {
                    test: n.test,
                    init,
                    cond,
                    update,
                    body,
                    range: n.range,
                };
                (None, Node::Loop(Box::new(rewritten)))
            }

            Node::Switch(n) => {
                let scrutinee = self.probed(site, SpanKind::Condition, &n.scrutinee);
                let arms = n
                    .arms
                    .iter()
                    .map(|arm| {
                        let probe = self.take(self.peek_site(), SpanKind::SwitchArm);
                        let body = self.rewrite(&arm.body);
                        SwitchArm {
                            case: arm.case.clone(),
                            body: prepend(probe, body),
                            range: arm.range,
                        }
                    })
                    .collect();
                let rewritten = SwitchNode {
                    scrutinee,
                    arms,
                    range: n.range,
                };
                (None, Node::Switch(Box::new(rewritten)))
            }

            Node::Try(n) => {
                let body = self.rewrite(&n.body);
                let catches = n
                    .catches
                    .iter()
                    .map(|catch| {
                        let probe = self.take(self.peek_site(), SpanKind::CatchEntry);
                        let body = self.rewrite(&catch.body);
                        CatchClause {
                            binding: catch.binding.clone(),
                            body: prepend(probe, body),
                            range: catch.range,
                        }
                    })
                    .collect();
                let finally = n.finally.as_ref().map(|finally| {
                    let probe = self.take(self.peek_site(), SpanKind::FinallyEntry);
                    let body = self.rewrite(finally);
                    prepend(probe, body)
                });
                let rewritten = TryNode {
                    body,
                    catches,
                    finally,
                    range: n.range,
                };
                (None, Node::Try(Box::new(rewritten)))
            }

            Node::Scoped(n) => {
                let resource = self.probed(site, SpanKind::ScopeAcquire, &n.resource);
                let body = self.rewrite(&n.body);
                let rewritten = ScopedNode {
                    kind: n.kind,
                    resource,
                    body,
                    range: n.range,
                };
                (None, Node::Scoped(Box::new(rewritten)))
            }

            Node::Nested(body) => {
                self.nested.push(body);
                (None, Node::Seq(Vec::new()))
            }

            Node::Label { .. } | Node::Probe(_) | Node::AcquirePayload => (None, node.clone()),
        }
    }

    fn rewrite_seq(&mut self, children: &'b [Node]) -> Vec<Node> {
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Node::Label { .. } => {
                    let site = self.enter_site();
                    out.push(child.clone());
                    out.extend(self.take(site, SpanKind::Label).map(Node::Probe));
                }
                Node::Nested(_) => {
                    self.rewrite_parts(child);
                }
                _ => {
                    let (probe, node) = self.rewrite_parts(child);
                    out.extend(probe.map(Node::Probe));
                    out.push(node);
                }
            }
        }
        out
    }
}

/// Put a probe in front of a block, inside it when it is already a sequence
fn prepend(probe: Option<SpanIndex>, node: Node) -> Node {
    match (probe, node) {
        (None, node) => node,
        (Some(span), Node::Seq(mut nodes)) => {
            nodes.insert(0, Node::Probe(span));
            Node::Seq(nodes)
        }
        (Some(span), node) => Node::Seq(vec![Node::Probe(span), node]),
    }
}
