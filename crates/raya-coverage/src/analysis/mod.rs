//! Span Analysis
//!
//! Partitions each unit into indexed spans. Every unit, including each nested
//! closure, local function and state-machine step, gets its own table whose
//! indices run `0..n` in evaluation order. Code that the unit's own control
//! flow can never reach (after an unconditional jump, or behind a
//! constant-false condition) gets no span.

mod span;
mod walker;

pub use span::{SiteId, Span, SpanIndex, SpanKind, SpanTable};

use crate::error::{CoverageError, CoverageResult};
use crate::lowered::{Body, LoweredModule, UnitKind};
use raya_coverage_runtime::MethodToken;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::debug;
use walker::UnitWalker;

/// Frozen analysis result for one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzedUnit {
    pub token: MethodToken,
    pub name: String,
    pub kind: UnitKind,
    pub spans: SpanTable,
}

/// Analysis results for every unit of a module, parents before nested units
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyzedModule {
    pub name: String,
    units: Vec<AnalyzedUnit>,
    #[serde(skip)]
    by_token: FxHashMap<MethodToken, usize>,
}

impl AnalyzedModule {
    pub fn units(&self) -> &[AnalyzedUnit] {
        &self.units
    }

    pub fn unit(&self, token: MethodToken) -> Option<&AnalyzedUnit> {
        self.by_token.get(&token).map(|&i| &self.units[i])
    }

    pub fn unit_named(&self, name: &str) -> Option<&AnalyzedUnit> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Coverage map for external tooling: every unit's spans with source ranges
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn push(&mut self, unit: AnalyzedUnit) -> CoverageResult<()> {
        if self.by_token.contains_key(&unit.token) {
            return Err(CoverageError::DuplicateToken { token: unit.token });
        }
        self.by_token.insert(unit.token, self.units.len());
        self.units.push(unit);
        Ok(())
    }
}

/// Assigns spans to lowered bodies
#[derive(Debug, Default)]
pub struct SpanAnalyzer;

impl SpanAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze every unit of a module
    pub fn analyze_module(&self, module: &LoweredModule) -> CoverageResult<AnalyzedModule> {
        let mut analyzed = AnalyzedModule {
            name: module.name.clone(),
            ..Default::default()
        };
        for body in &module.units {
            for unit in self.analyze_body(body)? {
                analyzed.push(unit)?;
            }
        }
        Ok(analyzed)
    }

    /// Analyze one body and every unit nested in it
    ///
    /// The body's own unit comes first, followed by nested units in pre-order.
    pub fn analyze_body(&self, body: &Body) -> CoverageResult<Vec<AnalyzedUnit>> {
        let mut units = Vec::new();
        self.analyze_into(body, &mut units)?;
        Ok(units)
    }

    fn analyze_into(&self, body: &Body, out: &mut Vec<AnalyzedUnit>) -> CoverageResult<()> {
        let mut reachable_labels: FxHashSet<String> = FxHashSet::default();
        let (spans, nested) = loop {
            let mut walker = UnitWalker::new(&body.name, &reachable_labels);
            walker.walk_body(body)?;
            if walker.targeted == reachable_labels {
                break (walker.spans, walker.nested);
            }
            reachable_labels = std::mem::take(&mut walker.targeted);
        };

        debug!(
            unit = %body.name,
            token = %body.token,
            kind = %body.kind,
            spans = spans.len(),
            nested = nested.len(),
            "analyzed coverage spans"
        );

        out.push(AnalyzedUnit {
            token: body.token,
            name: body.name.clone(),
            kind: body.kind,
            spans: SpanTable::from_spans(spans),
        });

        for nested_body in nested {
            self.analyze_into(nested_body, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowered::{BinaryOp, Expr, Node, SourceRange};

    fn method(row: u32, name: &str, root: Node) -> Body {
        Body::method(MethodToken::method(row), name, root)
    }

    fn kinds(unit: &AnalyzedUnit) -> Vec<SpanKind> {
        unit.spans.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_straight_line_method() {
        let body = method(
            1,
            "main",
            Node::seq(vec![
                Node::assign("x", Expr::int(1)),
                Node::print(Expr::local("x")),
                Node::ret(None),
            ]),
        );
        let units = SpanAnalyzer::new().analyze_body(&body).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(
            kinds(&units[0]),
            vec![
                SpanKind::UnitEntry,
                SpanKind::Statement,
                SpanKind::Statement,
                SpanKind::Statement
            ]
        );
    }

    #[test]
    fn test_code_after_return_has_no_span() {
        let body = method(
            1,
            "early",
            Node::seq(vec![
                Node::ret(None),
                Node::print(Expr::str("never")),
            ]),
        );
        let units = SpanAnalyzer::new().analyze_body(&body).unwrap();
        assert_eq!(units[0].spans.len(), 2);
    }

    #[test]
    fn test_constant_false_branch_pruned() {
        let body = method(
            1,
            "pruned",
            Node::seq(vec![
                Node::if_else(
                    Expr::binary(BinaryOp::Greater, Expr::int(1), Expr::int(2)),
                    Node::print(Expr::str("dead")),
                    Some(Node::print(Expr::str("live"))),
                ),
                Node::while_loop(Expr::bool(false), Node::print(Expr::str("dead"))),
            ]),
        );
        let units = SpanAnalyzer::new().analyze_body(&body).unwrap();
        assert_eq!(
            kinds(&units[0]),
            vec![
                SpanKind::UnitEntry,
                SpanKind::Condition,
                SpanKind::Statement,
                SpanKind::LoopHeader
            ]
        );
    }

    #[test]
    fn test_infinite_loop_without_break_ends_reachability() {
        let body = method(
            1,
            "spin",
            Node::seq(vec![
                Node::while_loop(Expr::bool(true), Node::eval(Expr::int(0))),
                Node::print(Expr::str("after")),
            ]),
        );
        let units = SpanAnalyzer::new().analyze_body(&body).unwrap();
        assert_eq!(units[0].spans.len(), 3);

        let with_break = method(
            2,
            "spin_break",
            Node::seq(vec![
                Node::while_loop(Expr::bool(true), Node::brk()),
                Node::print(Expr::str("after")),
            ]),
        );
        let units = SpanAnalyzer::new().analyze_body(&with_break).unwrap();
        assert_eq!(units[0].spans.len(), 4);
    }

    #[test]
    fn test_backward_goto_reaches_label() {
        let body = method(
            1,
            "retry",
            Node::seq(vec![
                Node::goto("tail"),
                Node::label("head"),
                Node::print(Expr::str("head")),
                Node::ret(None),
                Node::label("tail"),
                Node::goto("head"),
            ]),
        );
        let units = SpanAnalyzer::new().analyze_body(&body).unwrap();
        assert_eq!(
            kinds(&units[0]),
            vec![
                SpanKind::UnitEntry,
                SpanKind::Statement,
                SpanKind::Label,
                SpanKind::Statement,
                SpanKind::Statement,
                SpanKind::Label,
                SpanKind::Statement,
            ]
        );
    }

    #[test]
    fn test_unreferenced_label_after_jump_is_unreachable() {
        let body = method(
            1,
            "orphan",
            Node::seq(vec![
                Node::ret(None),
                Node::label("orphan"),
                Node::print(Expr::str("never")),
            ]),
        );
        let units = SpanAnalyzer::new().analyze_body(&body).unwrap();
        assert_eq!(units[0].spans.len(), 2);
    }

    #[test]
    fn test_nested_unit_gets_fresh_counter() {
        let lambda = Body::new(
            MethodToken::method(2),
            "lambda",
            UnitKind::Lambda,
            Node::seq(vec![Node::print(Expr::int(1)), Node::ret(None)]),
        );
        let body = method(
            1,
            "outer",
            Node::seq(vec![
                Node::nested(lambda),
                Node::assign("f", Expr::Closure(MethodToken::method(2))),
            ]),
        );
        let units = SpanAnalyzer::new().analyze_body(&body).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "outer");
        assert_eq!(units[0].spans.len(), 2);
        assert_eq!(units[1].name, "lambda");
        assert_eq!(units[1].kind, UnitKind::Lambda);
        let indices: Vec<u32> = units[1].spans.iter().map(|s| s.index.as_u32()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_rejects_break_outside_loop() {
        let body = method(1, "bad", Node::seq(vec![Node::brk()]));
        let err = SpanAnalyzer::new().analyze_body(&body).unwrap_err();
        assert_eq!(err, CoverageError::InvalidBreak { unit: "bad".into() });
    }

    #[test]
    fn test_rejects_continue_in_switch_only() {
        let body = method(
            1,
            "bad",
            Node::switch(Expr::int(1), vec![(None, Node::cont())]),
        );
        let err = SpanAnalyzer::new().analyze_body(&body).unwrap_err();
        assert_eq!(err, CoverageError::InvalidContinue { unit: "bad".into() });
    }

    #[test]
    fn test_rejects_goto_into_inner_block() {
        let body = method(
            1,
            "bad",
            Node::seq(vec![
                Node::goto("inside"),
                Node::if_then(
                    Expr::local("c"),
                    Node::seq(vec![Node::label("inside"), Node::ret(None)]),
                ),
            ]),
        );
        let err = SpanAnalyzer::new().analyze_body(&body).unwrap_err();
        assert!(matches!(err, CoverageError::UndefinedLabel { ref label, .. } if label == "inside"));
    }

    #[test]
    fn test_rejects_label_outside_seq() {
        let body = method(
            1,
            "bad",
            Node::if_then(
                Expr::local("c"),
                Node::label("x").with_range(SourceRange::new(3, 5)),
            ),
        );
        let err = SpanAnalyzer::new().analyze_body(&body).unwrap_err();
        assert!(matches!(
            err,
            CoverageError::UnsupportedConstruct { range, .. } if range == SourceRange::new(3, 5)
        ));
    }

    #[test]
    fn test_rejects_duplicate_label() {
        let body = method(
            1,
            "bad",
            Node::seq(vec![Node::label("a"), Node::label("a")]),
        );
        let err = SpanAnalyzer::new().analyze_body(&body).unwrap_err();
        assert!(matches!(err, CoverageError::DuplicateLabel { .. }));
    }

    #[test]
    fn test_rejects_instrumented_input() {
        let body = method(1, "twice", Node::seq(vec![Node::AcquirePayload]));
        let err = SpanAnalyzer::new().analyze_body(&body).unwrap_err();
        assert_eq!(err, CoverageError::AlreadyInstrumented { unit: "twice".into() });
    }

    #[test]
    fn test_duplicate_tokens_rejected() {
        let module = LoweredModule::new("m")
            .with_unit(method(1, "a", Node::empty()))
            .with_unit(method(1, "b", Node::empty()));
        let err = SpanAnalyzer::new().analyze_module(&module).unwrap_err();
        assert_eq!(
            err,
            CoverageError::DuplicateToken {
                token: MethodToken::method(1)
            }
        );
    }

    #[test]
    fn test_module_json_lists_units() {
        let module = LoweredModule::new("m").with_unit(method(4, "a", Node::empty()));
        let analyzed = SpanAnalyzer::new().analyze_module(&module).unwrap();
        let json: serde_json::Value = serde_json::from_str(&analyzed.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "m");
        assert_eq!(json["units"][0]["token"], 0x0600_0004u32);
        assert_eq!(json["units"][0]["spans"].as_array().unwrap().len(), 2);
    }
}
