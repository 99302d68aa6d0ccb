//! Runtime values and scopes of the reference host

use crate::lowered::Constant;
use raya_coverage_runtime::MethodToken;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    /// Reference to a unit without captured state
    Function(MethodToken),
    /// Unit plus the scope it was created in
    Closure(Rc<Closure>),
}

#[derive(Debug)]
pub struct Closure {
    pub token: MethodToken,
    pub scope: Rc<Scope>,
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Function(_) | Value::Closure(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Closure(_) => "function",
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Str(s) => Value::str(s),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{}", s),
            Value::Function(token) => write!(f, "<fn {}>", token),
            Value::Closure(c) => write!(f, "<closure {}>", c.token),
        }
    }
}

/// Lexical scope; closures keep their defining scope alive
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<FxHashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(FxHashMap::default()),
            parent,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn define(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    /// Update the nearest binding of `name`, or define it here
    pub fn assign(&self, name: &str, value: Value) {
        if !self.try_update(name, &value) {
            self.define(name, value);
        }
    }

    fn try_update(&self, name: &str, value: &Value) -> bool {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = value.clone();
            return true;
        }
        self.parent
            .as_ref()
            .is_some_and(|p| p.try_update(name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_updates_enclosing_binding() {
        let outer = Scope::new(None);
        outer.define("y", Value::Int(5));
        let inner = Scope::new(Some(outer.clone()));

        inner.assign("y", Value::Int(75));
        inner.assign("z", Value::Int(1));

        assert_eq!(outer.lookup("y"), Some(Value::Int(75)));
        assert_eq!(outer.lookup("z"), None);
        assert_eq!(inner.lookup("z"), Some(Value::Int(1)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(Value::Int(3).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert_eq!(Value::from(&Constant::Str("a".into())), Value::str("a"));
    }
}
