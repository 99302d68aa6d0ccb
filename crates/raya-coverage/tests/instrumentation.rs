//! End-to-end coverage: analyze, inject, run on the reference host, flush.

use raya_coverage::{
    AnalyzedModule, BinaryOp, Body, Constant, CoverageError, Expr, InstrumentOptions,
    InstrumentedModule, LoweredModule, Machine, MethodToken, ModuleId, Node, PrettyPrint,
    ProbeInjector, ScopeKind, SpanAnalyzer, SpanIndex, SpanKind, UnitKind, Value,
};
use raya_coverage_runtime::{FlushReport, PayloadRegistry, RegistryConfig};
use std::sync::Arc;

const T: bool = true;
const F: bool = false;

fn instrument(module: &LoweredModule, id: u128) -> InstrumentedModule {
    let analysis = SpanAnalyzer::new().analyze_module(module).unwrap();
    ProbeInjector::new(InstrumentOptions::for_module(ModuleId::new(id)))
        .instrument_module(module, &analysis)
        .unwrap()
}

fn load(module: &InstrumentedModule, registry: &Arc<PayloadRegistry>) -> Machine {
    let mut machine = Machine::new(registry.clone());
    machine.load(module);
    machine
}

fn hits(report: &FlushReport, row: u32) -> Vec<bool> {
    report
        .unit(MethodToken::method(row).method_index())
        .map(|unit| unit.hits.clone())
        .unwrap_or_default()
}

/// `check(b) { if b return 1; if !b return 2; return 3 }`
fn branching_module() -> LoweredModule {
    let check = Body::method(
        MethodToken::method(1),
        "check",
        Node::seq(vec![
            Node::if_then(Expr::local("b"), Node::ret(Some(Expr::int(1)))),
            Node::if_then(Expr::not(Expr::local("b")), Node::ret(Some(Expr::int(2)))),
            Node::ret(Some(Expr::int(3))),
        ]),
    )
    .with_params(["b"]);
    LoweredModule::new("branching").with_unit(check)
}

#[test]
fn branch_coverage_across_flushes() {
    let registry = Arc::new(PayloadRegistry::new());
    let mut machine = load(&instrument(&branching_module(), 1), &registry);

    assert_eq!(machine.call("check", vec![Value::Bool(true)]).unwrap(), Value::Int(1));
    let first = registry.flush();
    assert_eq!(hits(&first, 1), [T, T, T, F, F, F]);

    assert_eq!(machine.call("check", vec![Value::Bool(false)]).unwrap(), Value::Int(2));
    let second = registry.flush();
    assert_eq!(hits(&second, 1), [T, T, F, T, T, F]);

    // No calls since the last drain
    let third = registry.flush();
    assert_eq!(hits(&third, 1), [F; 6]);
}

#[test]
fn flush_text_matches_report() {
    let registry = Arc::new(PayloadRegistry::new());
    let mut machine = load(&instrument(&branching_module(), 1), &registry);
    machine.call("check", vec![Value::Bool(true)]).unwrap();

    let mut out = Vec::new();
    registry.flush_to(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text, "1\ntrue\ntrue\ntrue\nfalse\nfalse\nfalse\n");

    let parsed = FlushReport::parse(&text).unwrap();
    assert_eq!(hits(&parsed, 1), [T, T, T, F, F, F]);
}

#[test]
fn early_loop_exit_leaves_exhaustion_path_uncovered() {
    // i = 0; found = false
    // while i < 50 { if i == k { found = true; break } i = i + 1 }
    // if found { print "found" } else { print "exhausted" }
    let scan = Body::method(
        MethodToken::method(1),
        "scan",
        Node::seq(vec![
            Node::assign("i", Expr::int(0)),
            Node::assign("found", Expr::bool(false)),
            Node::while_loop(
                Expr::binary(BinaryOp::Less, Expr::local("i"), Expr::int(50)),
                Node::seq(vec![
                    Node::if_then(
                        Expr::binary(BinaryOp::Equal, Expr::local("i"), Expr::local("k")),
                        Node::seq(vec![Node::assign("found", Expr::bool(true)), Node::brk()]),
                    ),
                    Node::assign(
                        "i",
                        Expr::binary(BinaryOp::Add, Expr::local("i"), Expr::int(1)),
                    ),
                ]),
            ),
            Node::if_else(
                Expr::local("found"),
                Node::print(Expr::str("found")),
                Some(Node::print(Expr::str("exhausted"))),
            ),
        ]),
    )
    .with_params(["k"]);
    let module = LoweredModule::new("loops").with_unit(scan);
    let analysis = SpanAnalyzer::new().analyze_module(&module).unwrap();
    let spans = &analysis.units()[0].spans;
    assert_eq!(spans.len(), 11);
    assert_eq!(spans.get(SpanIndex::new(3)).map(|s| s.kind), Some(SpanKind::LoopHeader));

    let registry = Arc::new(PayloadRegistry::new());
    let mut machine = load(&instrument(&module, 1), &registry);

    machine.call("scan", vec![Value::Int(3)]).unwrap();
    assert_eq!(machine.take_output(), ["found"]);
    let report = registry.flush();
    assert_eq!(hits(&report, 1), [T, T, T, T, T, T, T, T, T, T, F]);

    machine.call("scan", vec![Value::Int(99)]).unwrap();
    assert_eq!(machine.take_output(), ["exhausted"]);
    let report = registry.flush();
    assert_eq!(hits(&report, 1), [T, T, T, T, T, F, F, T, T, F, T]);
}

#[test]
fn closure_called_after_parent_returns_has_its_own_payload() {
    let lambda = Body::new(
        MethodToken::method(2),
        "outer_lambda",
        UnitKind::Lambda,
        Node::ret(Some(Expr::local("y"))),
    );
    let outer = Body::method(
        MethodToken::method(1),
        "outer",
        Node::seq(vec![
            Node::nested(lambda),
            Node::assign("y", Expr::int(5)),
            Node::assign("f", Expr::Closure(MethodToken::method(2))),
            Node::ret(Some(Expr::local("f"))),
        ]),
    );
    let module = LoweredModule::new("closures").with_unit(outer);
    let instrumented = instrument(&module, 1);
    assert_eq!(instrumented.units.len(), 2);
    assert_eq!(instrumented.units[1].kind(), UnitKind::Lambda);

    let registry = Arc::new(PayloadRegistry::new());
    let mut machine = load(&instrumented, &registry);

    let closure = machine.call("outer", vec![]).unwrap();
    let report = registry.flush();
    assert_eq!(hits(&report, 1), [T, T, T, T]);
    assert!(report.unit(2).is_none());

    assert_eq!(machine.call_value(&closure, vec![]).unwrap(), Value::Int(5));
    let report = registry.flush();
    assert_eq!(hits(&report, 1), [F, F, F, F]);
    assert_eq!(hits(&report, 2), [T, T]);
}

#[test]
fn goto_target_label_is_covered() {
    let main = Body::method(
        MethodToken::method(1),
        "main",
        Node::seq(vec![
            Node::print(Expr::str("foo")),
            Node::goto("bar"),
            Node::print(Expr::str("skipped")),
            Node::label("bar"),
            Node::print(Expr::str("bar")),
        ]),
    );
    let module = LoweredModule::new("goto").with_unit(main);
    let instrumented = instrument(&module, 1);
    assert_eq!(instrumented.units[0].payload_len(), 5);

    let registry = Arc::new(PayloadRegistry::new());
    let mut machine = load(&instrumented, &registry);
    machine.call("main", vec![]).unwrap();
    assert_eq!(machine.output(), ["foo", "bar"]);
    assert_eq!(hits(&registry.flush(), 1), [T; 5]);
}

#[test]
fn exception_mid_span_still_marks_entered_spans() {
    let divide = Body::method(
        MethodToken::method(1),
        "divide",
        Node::seq(vec![
            Node::print(Expr::str("before")),
            Node::eval(Expr::binary(BinaryOp::Div, Expr::int(1), Expr::local("d"))),
            Node::print(Expr::str("after")),
        ]),
    )
    .with_params(["d"]);
    let main = Body::method(
        MethodToken::method(2),
        "main",
        Node::try_catch(
            Node::eval(Expr::call(
                Expr::Function(MethodToken::method(1)),
                vec![Expr::int(0)],
            )),
            vec![(Some("e"), Node::print(Expr::local("e")))],
            None,
        ),
    );
    let module = LoweredModule::new("throws").with_unit(divide).with_unit(main);

    let registry = Arc::new(PayloadRegistry::new());
    let mut machine = load(&instrument(&module, 1), &registry);
    machine.call("main", vec![]).unwrap();
    assert_eq!(machine.output(), ["before", "DivideByZeroException"]);

    let report = registry.flush();
    assert_eq!(hits(&report, 1), [T, T, T, F]);
    // entry, try body statement, catch entry, catch print
    assert_eq!(hits(&report, 2), [T, T, T, T]);
}

/// A program touching every construct the host runs
fn mixed_module() -> LoweredModule {
    let add = Body::new(
        MethodToken::method(3),
        "adder",
        UnitKind::Lambda,
        Node::ret(Some(Expr::binary(BinaryOp::Add, Expr::local("x"), Expr::local("base")))),
    )
    .with_params(["x"]);

    let classify = Body::method(
        MethodToken::method(2),
        "classify",
        Node::switch(
            Expr::binary(BinaryOp::Mod, Expr::local("n"), Expr::int(3)),
            vec![
                (Some(Constant::Int(0)), Node::seq(vec![Node::print(Expr::str("fizz")), Node::brk()])),
                (Some(Constant::Int(1)), Node::ret(Some(Expr::str("one")))),
                (None, Node::seq(vec![Node::print(Expr::local("n")), Node::brk()])),
            ],
        ),
    )
    .with_params(["n"]);

    let main = Body::method(
        MethodToken::method(1),
        "main",
        Node::seq(vec![
            Node::nested(add),
            Node::assign("base", Expr::int(100)),
            Node::assign("f", Expr::Closure(MethodToken::method(3))),
            Node::for_loop(
                Node::assign("i", Expr::int(0)),
                Expr::binary(BinaryOp::Less, Expr::local("i"), Expr::int(7)),
                Node::assign("i", Expr::binary(BinaryOp::Add, Expr::local("i"), Expr::int(1))),
                Node::seq(vec![
                    Node::if_then(
                        Expr::binary(BinaryOp::Equal, Expr::local("i"), Expr::int(5)),
                        Node::cont(),
                    ),
                    Node::eval(Expr::call(
                        Expr::Function(MethodToken::method(2)),
                        vec![Expr::local("i")],
                    )),
                ]),
            ),
            Node::try_catch(
                Node::seq(vec![
                    Node::scoped(
                        ScopeKind::Lock,
                        Expr::local("f"),
                        Node::print(Expr::call(Expr::local("f"), vec![Expr::int(1)])),
                    ),
                    Node::throw(Expr::str("oops")),
                ]),
                vec![(Some("e"), Node::print(Expr::local("e")))],
                Some(Node::print(Expr::str("cleanup"))),
            ),
            Node::assign("n", Expr::int(0)),
            Node::label("again"),
            Node::assign("n", Expr::binary(BinaryOp::Add, Expr::local("n"), Expr::int(1))),
            Node::if_then(
                Expr::binary(BinaryOp::Less, Expr::local("n"), Expr::int(3)),
                Node::goto("again"),
            ),
            Node::do_while(
                Node::assign("n", Expr::binary(BinaryOp::Sub, Expr::local("n"), Expr::int(1))),
                Expr::binary(BinaryOp::Greater, Expr::local("n"), Expr::int(0)),
            ),
            Node::print(Expr::local("n")),
            Node::ret(Some(Expr::call(Expr::local("f"), vec![Expr::int(2)]))),
        ]),
    );

    LoweredModule::new("mixed").with_unit(main).with_unit(classify)
}

#[test]
fn instrumentation_preserves_behavior() {
    let module = mixed_module();

    let mut plain = Machine::new(Arc::new(PayloadRegistry::new()));
    plain.load_lowered(&module);
    let plain_result = plain.call("main", vec![]).unwrap();

    let registry = Arc::new(PayloadRegistry::new());
    let mut instrumented = load(&instrument(&module, 7), &registry);
    let instrumented_result = instrumented.call("main", vec![]).unwrap();

    assert_eq!(plain_result, Value::Int(102));
    assert_eq!(instrumented_result, plain_result);
    assert_eq!(
        plain.output(),
        ["fizz", "2", "fizz", "fizz", "101", "oops", "cleanup", "0"]
    );
    assert_eq!(instrumented.output(), plain.output());

    let report = registry.flush();
    assert_eq!(report.units.len(), 3);
    assert!(report.units.iter().all(|unit| unit.hits[0]));
}

#[test]
fn new_module_id_invalidates_registry() {
    let registry = Arc::new(PayloadRegistry::new());
    let module = branching_module();

    let mut first = load(&instrument(&module, 1), &registry);
    first.call("check", vec![Value::Bool(true)]).unwrap();
    assert_eq!(registry.module(), Some(ModuleId::new(1)));
    assert_eq!(registry.len(), 1);

    let mut second = load(&instrument(&module, 2), &registry);
    second.call("check", vec![Value::Bool(false)]).unwrap();
    assert_eq!(registry.module(), Some(ModuleId::new(2)));
    assert_eq!(registry.len(), 1);

    // Only the second module's hits are reported
    assert_eq!(hits(&registry.flush(), 1), [T, T, F, T, T, F]);

    // Probes of the stale payload no longer reach the registry
    first.call("check", vec![Value::Bool(true)]).unwrap();
    assert_eq!(hits(&registry.flush(), 1), [F; 6]);
}

#[test]
fn reloading_a_recompiled_module_resets_payloads() {
    let registry = Arc::new(PayloadRegistry::new());
    let module = branching_module();
    let mut machine = load(&instrument(&module, 1), &registry);

    machine.call("check", vec![Value::Bool(true)]).unwrap();
    assert_eq!(hits(&registry.flush(), 1), [T, T, T, F, F, F]);
    let stale = machine.slot(MethodToken::method(1)).unwrap();

    machine.load(&instrument(&module, 2));
    let fresh = machine.slot(MethodToken::method(1)).unwrap();
    assert!(fresh.is_empty());

    machine.call("check", vec![Value::Bool(false)]).unwrap();
    assert_eq!(registry.module(), Some(ModuleId::new(2)));
    assert_eq!(hits(&registry.flush(), 1), [T, T, F, T, T, F]);

    // The new array is the registered one; the old one no longer reports
    let registered = registry.get(MethodToken::method(1)).unwrap();
    assert!(Arc::ptr_eq(fresh.get().unwrap(), &registered));
    assert!(!Arc::ptr_eq(stale.get().unwrap(), &registered));
}

#[test]
fn reloading_the_same_module_keeps_payloads() {
    let registry = Arc::new(PayloadRegistry::new());
    let instrumented = instrument(&branching_module(), 1);
    let mut machine = load(&instrumented, &registry);

    machine.call("check", vec![Value::Bool(true)]).unwrap();
    let before = machine.slot(MethodToken::method(1)).unwrap();
    machine.load(&instrumented);
    let after = machine.slot(MethodToken::method(1)).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(registry.len(), 1);
}

#[test]
fn state_machine_steps_are_separate_units() {
    let step = |row: u32, text: &str| {
        Body::new(
            MethodToken::method(row),
            format!("run_step{}", row),
            UnitKind::StateMachineStep,
            Node::seq(vec![Node::print(Expr::str(text)), Node::ret(None)]),
        )
    };
    let run = Body::method(
        MethodToken::method(1),
        "run",
        Node::seq(vec![
            Node::nested(step(2, "first")),
            Node::nested(step(3, "second")),
            Node::eval(Expr::call(Expr::Function(MethodToken::method(2)), vec![])),
            Node::eval(Expr::call(Expr::Function(MethodToken::method(3)), vec![])),
        ]),
    );
    let module = LoweredModule::new("async").with_unit(run);
    let instrumented = instrument(&module, 1);
    let kinds: Vec<UnitKind> = instrumented.units.iter().map(|u| u.kind()).collect();
    assert_eq!(
        kinds,
        [UnitKind::Method, UnitKind::StateMachineStep, UnitKind::StateMachineStep]
    );

    let registry = Arc::new(PayloadRegistry::new());
    let mut machine = load(&instrumented, &registry);
    machine.call("run", vec![]).unwrap();
    assert_eq!(machine.output(), ["first", "second"]);

    let report = registry.flush();
    let indices: Vec<u32> = report.units.iter().map(|u| u.method_index).collect();
    assert_eq!(indices, [1, 2, 3]);
    assert_eq!(hits(&report, 2), [T, T, T]);
    assert_eq!(hits(&report, 3), [T, T, T]);
}

#[test]
fn allocation_failure_degrades_to_no_coverage() {
    let registry = Arc::new(PayloadRegistry::with_config(RegistryConfig {
        max_payload_len: 2,
    }));
    let instrumented = instrument(&branching_module(), 1);
    let mut machine = load(&instrumented, &registry);

    assert_eq!(machine.call("check", vec![Value::Bool(true)]).unwrap(), Value::Int(1));
    assert_eq!(machine.call("check", vec![Value::Bool(false)]).unwrap(), Value::Int(2));
    assert!(registry.is_empty());
    assert!(registry.flush().is_empty());
    assert!(machine.slot(MethodToken::method(1)).unwrap().is_empty());
}

#[test]
fn disabled_instrumentation_is_passthrough() {
    let module = branching_module();
    let analysis = SpanAnalyzer::new().analyze_module(&module).unwrap();
    let options = InstrumentOptions {
        module_id: ModuleId::new(1),
        enabled: false,
    };
    let instrumented = ProbeInjector::new(options)
        .instrument_module(&module, &analysis)
        .unwrap();
    assert!(instrumented.units[0].slot.is_none());
    assert_eq!(instrumented.units[0].body, module.units[0]);

    let registry = Arc::new(PayloadRegistry::new());
    let mut machine = load(&instrumented, &registry);
    assert_eq!(machine.call("check", vec![Value::Bool(false)]).unwrap(), Value::Int(2));
    assert!(registry.flush().is_empty());
}

#[test]
fn disabled_instrumentation_needs_no_analysis() {
    let module = branching_module();
    let options = InstrumentOptions {
        module_id: ModuleId::new(1),
        enabled: false,
    };
    let instrumented = ProbeInjector::new(options)
        .instrument_module(&module, &AnalyzedModule::default())
        .unwrap();
    assert_eq!(instrumented.units.len(), 1);
    assert_eq!(instrumented.units[0].body, module.units[0]);

    let err = ProbeInjector::new(InstrumentOptions::for_module(ModuleId::new(1)))
        .instrument_module(&module, &AnalyzedModule::default())
        .unwrap_err();
    assert_eq!(
        err,
        CoverageError::MissingSpanTable {
            unit: "check".into(),
            token: MethodToken::method(1),
        }
    );
}

#[test]
fn probes_precede_the_code_they_cover() {
    let module = LoweredModule::new("listing").with_unit(Body::method(
        MethodToken::method(1),
        "count",
        Node::seq(vec![
            Node::assign("n", Expr::int(0)),
            Node::do_while(
                Node::assign("n", Expr::binary(BinaryOp::Add, Expr::local("n"), Expr::int(1))),
                Expr::binary(BinaryOp::Less, Expr::local("n"), Expr::int(3)),
            ),
            Node::ret(Some(Expr::local("n"))),
        ]),
    ));
    let listing = instrument(&module, 1).pretty_print();
    let expected = "\
; module listing id 00000000000000000000000000000001

; payload 5
method count() [0x06000001] {
  acquire_payload
  probe 0
  probe 1
  n = 0
  do {
    probe 2
    n = n + 1
  } while probe(3, n < 3)
  probe 4
  return n
}
";
    assert_eq!(listing, expected);
}
