//! Reference host for instrumented units
//!
//! A tree-walking executor standing in for the code generation backend: it runs
//! lowered or instrumented bodies, performs the injected payload acquisition
//! and probe writes against a [`PayloadRegistry`], and records printed output.
//! Uninstrumented modules run on the same machine, so instrumented and plain
//! runs can be compared for observable behavior.

mod value;

pub use value::{Closure, Scope, Value};

use crate::error::ExecError;
use crate::inject::InstrumentedModule;
use crate::lowered::{BinaryOp, Body, Expr, LoopTest, LoweredModule, Node, StmtKind, UnaryOp};
use raya_coverage_runtime::{MethodToken, ModuleId, PayloadRegistry, PayloadSlot, SlotTable};
use rustc_hash::FxHashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Default limit on nested calls
pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
    Goto(String),
}

/// Non-local exit: a catchable exception or a host failure
#[derive(Debug)]
enum Unwind {
    Throw(Value),
    Fatal(ExecError),
}

impl From<ExecError> for Unwind {
    fn from(err: ExecError) -> Self {
        Unwind::Fatal(err)
    }
}

type Exec<T> = Result<T, Unwind>;

fn throw<T>(message: impl Into<String>) -> Exec<T> {
    Err(Unwind::Throw(Value::str(&message.into())))
}

#[derive(Debug)]
struct LoadedUnit {
    body: Body,
    payload_len: usize,
}

struct Frame {
    token: MethodToken,
    scope: Rc<Scope>,
    slot: Option<Arc<PayloadSlot>>,
    payload_len: usize,
}

/// Executes loaded units
pub struct Machine {
    module_id: ModuleId,
    registry: Arc<PayloadRegistry>,
    slots: SlotTable,
    units: FxHashMap<MethodToken, Rc<LoadedUnit>>,
    names: FxHashMap<String, MethodToken>,
    output: Vec<String>,
    depth: usize,
    max_depth: usize,
}

impl Machine {
    pub fn new(registry: Arc<PayloadRegistry>) -> Self {
        Self {
            module_id: ModuleId::new(0),
            registry,
            slots: SlotTable::new(),
            units: FxHashMap::default(),
            names: FxHashMap::default(),
            output: Vec::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Load instrumented units, declaring one payload slot per unit
    ///
    /// A module with a different id is a new compilation: its units get fresh
    /// slots, so their first entry reaches the registry again.
    pub fn load(&mut self, module: &InstrumentedModule) {
        if module.module_id != self.module_id {
            self.slots = SlotTable::new();
            self.module_id = module.module_id;
        }
        for unit in &module.units {
            if let Some(slot) = unit.slot {
                self.slots.declare(slot.token);
            }
            self.insert(unit.body.clone(), unit.payload_len());
        }
    }

    /// Load plain lowered units (no coverage)
    pub fn load_lowered(&mut self, module: &LoweredModule) {
        for body in &module.units {
            body.for_each_unit(&mut |unit| self.insert(unit.clone(), 0));
        }
    }

    fn insert(&mut self, body: Body, payload_len: usize) {
        self.names.insert(body.name.clone(), body.token);
        self.units
            .insert(body.token, Rc::new(LoadedUnit { body, payload_len }));
    }

    pub fn registry(&self) -> &Arc<PayloadRegistry> {
        &self.registry
    }

    /// Payload slot declared for `token`
    pub fn slot(&self, token: MethodToken) -> Option<Arc<PayloadSlot>> {
        self.slots.get(token)
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Call a loaded unit by name
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
        let token = *self
            .names
            .get(name)
            .ok_or_else(|| ExecError::UnknownFunction {
                name: name.to_string(),
            })?;
        self.call_value(&Value::Function(token), args)
    }

    /// Call a function or closure value
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, ExecError> {
        self.invoke(callee, args).map_err(|unwind| match unwind {
            Unwind::Throw(value) => ExecError::Uncaught {
                value: value.to_string(),
            },
            Unwind::Fatal(err) => err,
        })
    }

    fn invoke(&mut self, callee: &Value, args: Vec<Value>) -> Exec<Value> {
        let (token, parent) = match callee {
            Value::Function(token) => (*token, None),
            Value::Closure(closure) => (closure.token, Some(closure.scope.clone())),
            other => {
                return Err(ExecError::NotCallable {
                    value: other.to_string(),
                }
                .into())
            }
        };
        let unit = self
            .units
            .get(&token)
            .cloned()
            .ok_or(ExecError::UnknownUnit { token })?;

        if unit.body.params.len() != args.len() {
            return Err(ExecError::ArityMismatch {
                name: unit.body.name.clone(),
                expected: unit.body.params.len(),
                found: args.len(),
            }
            .into());
        }
        if self.depth >= self.max_depth {
            return Err(ExecError::StackOverflow { depth: self.depth }.into());
        }

        let scope = Scope::new(parent);
        for (param, arg) in unit.body.params.iter().zip(args) {
            scope.define(param, arg);
        }
        let frame = Frame {
            token,
            scope,
            slot: self.slots.get(token),
            payload_len: unit.payload_len,
        };

        self.depth += 1;
        let result = self.exec_node(&unit.body.root, &frame);
        self.depth -= 1;

        let stray = |what: &str| ExecError::StrayControlFlow {
            unit: unit.body.name.clone(),
            what: what.to_string(),
        };
        match result? {
            Flow::Normal => Ok(Value::Null),
            Flow::Return(value) => Ok(value),
            Flow::Break => Err(stray("break").into()),
            Flow::Continue => Err(stray("continue").into()),
            Flow::Goto(label) => Err(stray(&format!("goto {}", label)).into()),
        }
    }

    fn exec_node(&mut self, node: &Node, frame: &Frame) -> Exec<Flow> {
        match node {
            Node::Stmt(stmt) => {
                match &stmt.kind {
                    StmtKind::Assign { name, value } => {
                        let value = self.eval(value, frame)?;
                        frame.scope.assign(name, value);
                    }
                    StmtKind::Eval(expr) => {
                        self.eval(expr, frame)?;
                    }
                    StmtKind::Print(expr) => {
                        let value = self.eval(expr, frame)?;
                        self.output.push(value.to_string());
                    }
                    StmtKind::Empty => {}
                }
                Ok(Flow::Normal)
            }

            Node::Seq(nodes) => self.exec_seq(nodes, frame),

            Node::If(n) => {
                if self.eval(&n.cond, frame)?.is_truthy() {
                    self.exec_node(&n.then_branch, frame)
                } else if let Some(else_branch) = &n.else_branch {
                    self.exec_node(else_branch, frame)
                } else {
                    Ok(Flow::Normal)
                }
            }

            Node::Loop(n) => {
                if let Some(init) = &n.init {
                    match self.exec_node(init, frame)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                loop {
                    if n.test == LoopTest::Pre && !self.eval(&n.cond, frame)?.is_truthy() {
                        break;
                    }
                    match self.exec_node(&n.body, frame)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow => return Ok(flow),
                    }
                    if let Some(update) = &n.update {
                        match self.exec_node(update, frame)? {
                            Flow::Normal | Flow::Continue => {}
                            Flow::Break => break,
                            flow => return Ok(flow),
                        }
                    }
                    if n.test == LoopTest::Post && !self.eval(&n.cond, frame)?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }

            Node::Switch(n) => {
                let value = self.eval(&n.scrutinee, frame)?;
                let arm = n
                    .arms
                    .iter()
                    .find(|arm| arm.case.as_ref().is_some_and(|c| Value::from(c) == value))
                    .or_else(|| n.arms.iter().find(|arm| arm.case.is_none()));
                match arm {
                    Some(arm) => match self.exec_node(&arm.body, frame)? {
                        Flow::Break => Ok(Flow::Normal),
                        flow => Ok(flow),
                    },
                    None => Ok(Flow::Normal),
                }
            }

            Node::Try(n) => {
                let mut outcome = self.exec_node(&n.body, frame);
                if let Err(Unwind::Throw(thrown)) = &outcome {
                    if let Some(catch) = n.catches.first() {
                        if let Some(binding) = &catch.binding {
                            frame.scope.define(binding, thrown.clone());
                        }
                        outcome = self.exec_node(&catch.body, frame);
                    }
                }
                if let Some(finally) = &n.finally {
                    match self.exec_node(finally, frame)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                outcome
            }

            Node::Scoped(n) => {
                if let Value::Null = self.eval(&n.resource, frame)? {
                    return throw("NullReferenceException");
                }
                self.exec_node(&n.body, frame)
            }

            Node::Label { .. } | Node::Nested(_) => Ok(Flow::Normal),
            Node::Goto { label, .. } => Ok(Flow::Goto(label.clone())),
            Node::Break { .. } => Ok(Flow::Break),
            Node::Continue { .. } => Ok(Flow::Continue),

            Node::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }

            Node::Throw { value, .. } => {
                let value = self.eval(value, frame)?;
                Err(Unwind::Throw(value))
            }

            Node::Probe(span) => {
                if let Some(array) = frame.slot.as_ref().and_then(|slot| slot.get()) {
                    array.mark(span.as_usize());
                }
                Ok(Flow::Normal)
            }

            Node::AcquirePayload => {
                if let Some(slot) = &frame.slot {
                    if slot.is_empty() {
                        self.registry
                            .create_payload(self.module_id, frame.token, slot, frame.payload_len);
                    }
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_seq(&mut self, nodes: &[Node], frame: &Frame) -> Exec<Flow> {
        let mut pc = 0;
        while let Some(node) = nodes.get(pc) {
            match self.exec_node(node, frame)? {
                Flow::Normal => pc += 1,
                Flow::Goto(label) => match label_position(nodes, &label) {
                    Some(target) => pc = target,
                    None => return Ok(Flow::Goto(label)),
                },
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&mut self, expr: &Expr, frame: &Frame) -> Exec<Value> {
        match expr {
            Expr::Const(constant) => Ok(Value::from(constant)),

            Expr::Local(name) => frame.scope.lookup(name).ok_or_else(|| {
                ExecError::UndefinedVariable {
                    name: name.clone(),
                }
                .into()
            }),

            Expr::Unary { op, operand } => {
                let value = self.eval(operand, frame)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value.as_int().and_then(i64::checked_neg) {
                        Some(negated) => Ok(Value::Int(negated)),
                        None => throw(format!("TypeError: cannot negate {}", value.type_name())),
                    },
                }
            }

            Expr::Binary { op, left, right } => {
                let left = self.eval(left, frame)?;
                match op {
                    BinaryOp::And if !left.is_truthy() => Ok(Value::Bool(false)),
                    BinaryOp::Or if left.is_truthy() => Ok(Value::Bool(true)),
                    BinaryOp::And | BinaryOp::Or => {
                        Ok(Value::Bool(self.eval(right, frame)?.is_truthy()))
                    }
                    _ => {
                        let right = self.eval(right, frame)?;
                        binary(*op, &left, &right)
                    }
                }
            }

            Expr::Function(token) => Ok(Value::Function(*token)),

            Expr::Closure(token) => Ok(Value::Closure(Rc::new(Closure {
                token: *token,
                scope: frame.scope.clone(),
            }))),

            Expr::Call { callee, args } => {
                let callee = self.eval(callee, frame)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, frame))
                    .collect::<Exec<Vec<_>>>()?;
                self.invoke(&callee, args)
            }

            Expr::Probed { span, expr } => {
                if let Some(array) = frame.slot.as_ref().and_then(|slot| slot.get()) {
                    array.mark(span.as_usize());
                }
                self.eval(expr, frame)
            }
        }
    }
}

fn label_position(nodes: &[Node], label: &str) -> Option<usize> {
    nodes
        .iter()
        .position(|n| matches!(n, Node::Label { name, .. } if name == label))
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Exec<Value> {
    match (op, left, right) {
        (BinaryOp::Equal, l, r) => Ok(Value::Bool(l == r)),
        (BinaryOp::NotEqual, l, r) => Ok(Value::Bool(l != r)),
        (BinaryOp::Add, Value::Str(_), _) | (BinaryOp::Add, _, Value::Str(_)) => {
            Ok(Value::str(&format!("{}{}", left, right)))
        }
        (_, Value::Int(l), Value::Int(r)) => {
            let (l, r) = (*l, *r);
            let result = match op {
                BinaryOp::Add => l.checked_add(r),
                BinaryOp::Sub => l.checked_sub(r),
                BinaryOp::Mul => l.checked_mul(r),
                BinaryOp::Div | BinaryOp::Mod if r == 0 => {
                    return throw("DivideByZeroException");
                }
                BinaryOp::Div => l.checked_div(r),
                BinaryOp::Mod => l.checked_rem(r),
                _ if op.is_comparison() => return Ok(Value::Bool(op.compare_ints(l, r))),
                _ => None,
            };
            match result {
                Some(value) => Ok(Value::Int(value)),
                None => throw("OverflowException"),
            }
        }
        _ => throw(format!(
            "TypeError: {} {} {}",
            left.type_name(),
            op,
            right.type_name()
        )),
    }
}
