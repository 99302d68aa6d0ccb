//! Pretty-printing for lowered and instrumented units
//!
//! Provides a readable listing of where probes landed, for debugging the
//! injector and for golden assertions in tests.

use crate::analysis::AnalyzedUnit;
use crate::inject::{InstrumentedModule, InstrumentedUnit};
use crate::lowered::{Body, Expr, LoopTest, LoweredModule, Node, ScopeKind, StmtKind};
use std::fmt::Write;

/// Trait for pretty-printing units
pub trait PrettyPrint {
    fn pretty_print(&self) -> String;
}

impl PrettyPrint for LoweredModule {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        writeln!(output, "; module {}", self.name).unwrap();
        for body in &self.units {
            writeln!(output).unwrap();
            output.push_str(&body.pretty_print());
        }
        output
    }
}

impl PrettyPrint for InstrumentedModule {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        writeln!(output, "; module {} id {}", self.name, self.module_id).unwrap();
        for unit in &self.units {
            writeln!(output).unwrap();
            output.push_str(&unit.pretty_print());
        }
        output
    }
}

impl PrettyPrint for Body {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        writeln!(
            output,
            "{} {}({}) [{}] {{",
            self.kind,
            self.name,
            self.params.join(", "),
            self.token
        )
        .unwrap();
        write_node(&mut output, &self.root, 1);
        writeln!(output, "}}").unwrap();
        output
    }
}

impl PrettyPrint for InstrumentedUnit {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        match self.slot {
            Some(slot) => writeln!(output, "; payload {}", slot.length).unwrap(),
            None => writeln!(output, "; not instrumented").unwrap(),
        }
        output.push_str(&self.body.pretty_print());
        output
    }
}

impl PrettyPrint for AnalyzedUnit {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        writeln!(output, "; spans of {} {} [{}]", self.kind, self.name, self.token).unwrap();
        for span in &self.spans {
            writeln!(output, "  {}: {} @ {}", span.index, span.kind, span.range).unwrap();
        }
        output
    }
}

fn write_node(output: &mut String, node: &Node, indent: usize) {
    let prefix = "  ".repeat(indent);
    match node {
        Node::Stmt(stmt) => {
            let text = match &stmt.kind {
                StmtKind::Assign { name, value } => format!("{} = {}", name, format_expr(value)),
                StmtKind::Eval(expr) => format_expr(expr),
                StmtKind::Print(expr) => format!("print {}", format_expr(expr)),
                StmtKind::Empty => "nop".to_string(),
            };
            writeln!(output, "{}{}", prefix, text).unwrap();
        }
        Node::Seq(nodes) => {
            for child in nodes {
                write_node(output, child, indent);
            }
        }
        Node::If(n) => {
            writeln!(output, "{}if {} {{", prefix, format_expr(&n.cond)).unwrap();
            write_node(output, &n.then_branch, indent + 1);
            if let Some(else_branch) = &n.else_branch {
                writeln!(output, "{}}} else {{", prefix).unwrap();
                write_node(output, else_branch, indent + 1);
            }
            writeln!(output, "{}}}", prefix).unwrap();
        }
        Node::Loop(n) if n.init.is_none() && n.update.is_none() => match n.test {
            LoopTest::Pre => {
                writeln!(output, "{}while {} {{", prefix, format_expr(&n.cond)).unwrap();
                write_node(output, &n.body, indent + 1);
                writeln!(output, "{}}}", prefix).unwrap();
            }
            LoopTest::Post => {
                writeln!(output, "{}do {{", prefix).unwrap();
                write_node(output, &n.body, indent + 1);
                writeln!(output, "{}}} while {}", prefix, format_expr(&n.cond)).unwrap();
            }
        },
        Node::Loop(n) => {
            let inner = "  ".repeat(indent + 1);
            writeln!(output, "{}for {{", prefix).unwrap();
            if let Some(init) = &n.init {
                writeln!(output, "{}init:", inner).unwrap();
                write_node(output, init, indent + 2);
            }
            if n.test == LoopTest::Pre {
                writeln!(output, "{}test: {}", inner, format_expr(&n.cond)).unwrap();
            }
            writeln!(output, "{}body:", inner).unwrap();
            write_node(output, &n.body, indent + 2);
            if let Some(update) = &n.update {
                writeln!(output, "{}update:", inner).unwrap();
                write_node(output, update, indent + 2);
            }
            if n.test == LoopTest::Post {
                writeln!(output, "{}test after: {}", inner, format_expr(&n.cond)).unwrap();
            }
            writeln!(output, "{}}}", prefix).unwrap();
        }
        Node::Switch(n) => {
            writeln!(output, "{}switch {} {{", prefix, format_expr(&n.scrutinee)).unwrap();
            for arm in &n.arms {
                match &arm.case {
                    Some(case) => writeln!(output, "{}  case {}:", prefix, case).unwrap(),
                    None => writeln!(output, "{}  default:", prefix).unwrap(),
                }
                write_node(output, &arm.body, indent + 2);
            }
            writeln!(output, "{}}}", prefix).unwrap();
        }
        Node::Try(n) => {
            writeln!(output, "{}try {{", prefix).unwrap();
            write_node(output, &n.body, indent + 1);
            for catch in &n.catches {
                match &catch.binding {
                    Some(binding) => writeln!(output, "{}}} catch {} {{", prefix, binding).unwrap(),
                    None => writeln!(output, "{}}} catch {{", prefix).unwrap(),
                }
                write_node(output, &catch.body, indent + 1);
            }
            if let Some(finally) = &n.finally {
                writeln!(output, "{}}} finally {{", prefix).unwrap();
                write_node(output, finally, indent + 1);
            }
            writeln!(output, "{}}}", prefix).unwrap();
        }
        Node::Scoped(n) => {
            let keyword = match n.kind {
                ScopeKind::Lock => "lock",
                ScopeKind::Using => "using",
            };
            writeln!(output, "{}{} {} {{", prefix, keyword, format_expr(&n.resource)).unwrap();
            write_node(output, &n.body, indent + 1);
            writeln!(output, "{}}}", prefix).unwrap();
        }
        Node::Label { name, .. } => writeln!(output, "{}{}:", prefix, name).unwrap(),
        Node::Goto { label, .. } => writeln!(output, "{}goto {}", prefix, label).unwrap(),
        Node::Break { .. } => writeln!(output, "{}break", prefix).unwrap(),
        Node::Continue { .. } => writeln!(output, "{}continue", prefix).unwrap(),
        Node::Return { value: Some(value), .. } => {
            writeln!(output, "{}return {}", prefix, format_expr(value)).unwrap()
        }
        Node::Return { value: None, .. } => writeln!(output, "{}return", prefix).unwrap(),
        Node::Throw { value, .. } => {
            writeln!(output, "{}throw {}", prefix, format_expr(value)).unwrap()
        }
        Node::Nested(body) => {
            writeln!(output, "{}nested {} {} [{}]", prefix, body.kind, body.name, body.token)
                .unwrap()
        }
        Node::Probe(span) => writeln!(output, "{}probe {}", prefix, span).unwrap(),
        Node::AcquirePayload => writeln!(output, "{}acquire_payload", prefix).unwrap(),
    }
}

fn format_expr(expr: &Expr) -> String {
    match expr {
        Expr::Const(constant) => constant.to_string(),
        Expr::Local(name) => name.clone(),
        Expr::Unary { op, operand } => format!("{}{}", op, format_operand(operand)),
        Expr::Binary { op, left, right } => {
            format!("{} {} {}", format_operand(left), op, format_operand(right))
        }
        Expr::Function(token) => format!("fn {}", token),
        Expr::Closure(token) => format!("closure {}", token),
        Expr::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(format_expr).collect();
            format!("{}({})", format_operand(callee), args.join(", "))
        }
        Expr::Probed { span, expr } => format!("probe({}, {})", span, format_expr(expr)),
    }
}

fn format_operand(expr: &Expr) -> String {
    match expr {
        Expr::Binary { .. } | Expr::Function(_) | Expr::Closure(_) => {
            format!("({})", format_expr(expr))
        }
        _ => format_expr(expr),
    }
}
