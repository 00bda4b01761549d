use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{RillError, RuntimeErrorKind};
use crate::token::Span;
use crate::value::Value;

/// A single scope frame. Frames chain through `enclosing`; the chain for
/// a closure is captured by `Rc` so the frames outlive the block that
/// created them.
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Self {
        Self {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Bind a name in this frame. Redefinition just overwrites; the
    /// resolver rejects duplicates in local scopes before we get here.
    pub fn define(&mut self, name: String, value: Value) {
        self.values.insert(name, value);
    }

    /// Dynamic lookup, walking the chain outward. Used for names the
    /// resolver left unresolved (globals).
    pub fn get(&self, name: &str, span: Span) -> Result<Value, RillError> {
        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }

        match &self.enclosing {
            Some(enclosing) => enclosing.borrow().get(name, span),
            None => Err(RillError::Runtime {
                kind: RuntimeErrorKind::UnresolvedVariable,
                message: format!("undefined variable '{}'", name),
                span,
            }),
        }
    }

    /// Dynamic assignment, walking the chain outward. Assignment never
    /// creates a binding.
    pub fn assign(&mut self, name: &str, value: Value, span: Span) -> Result<(), RillError> {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
            return Ok(());
        }

        match &self.enclosing {
            Some(enclosing) => enclosing.borrow_mut().assign(name, value, span),
            None => Err(RillError::Runtime {
                kind: RuntimeErrorKind::UnresolvedVariable,
                message: format!("undefined variable '{}'", name),
                span,
            }),
        }
    }

    /// Lookup at exactly `distance` frames out. The resolver guarantees
    /// the binding exists there, so a miss is a bug in the static pass.
    pub fn get_at(&self, distance: usize, name: &str) -> Option<Value> {
        if distance == 0 {
            return self.values.get(name).cloned();
        }

        let mut frame = self.enclosing.clone()?;
        for _ in 1..distance {
            let next = frame.borrow().enclosing.clone()?;
            frame = next;
        }
        let value = frame.borrow().values.get(name).cloned();
        value
    }

    /// Assignment at exactly `distance` frames out. Returns whether the
    /// binding was found.
    pub fn assign_at(&mut self, distance: usize, name: &str, value: Value) -> bool {
        if distance == 0 {
            if let Some(slot) = self.values.get_mut(name) {
                *slot = value;
                return true;
            }
            return false;
        }

        let Some(mut frame) = self.enclosing.clone() else {
            return false;
        };
        for _ in 1..distance {
            let next = frame.borrow().enclosing.clone();
            match next {
                Some(next) => frame = next,
                None => return false,
            }
        }
        let mut frame = frame.borrow_mut();
        if let Some(slot) = frame.values.get_mut(name) {
            *slot = value;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Literal;

    fn number(n: f64) -> Value {
        Value::Literal(Literal::Number(n))
    }

    #[test]
    fn define_then_get() {
        let mut env = Environment::new();
        env.define("x".to_string(), number(1.0));
        assert_eq!(env.get("x", 0..1).unwrap(), number(1.0));
    }

    #[test]
    fn get_walks_to_enclosing_frame() {
        let outer = Rc::new(RefCell::new(Environment::new()));
        outer.borrow_mut().define("x".to_string(), number(1.0));
        let inner = Environment::with_enclosing(Rc::clone(&outer));
        assert_eq!(inner.get("x", 0..1).unwrap(), number(1.0));
    }

    #[test]
    fn get_of_undefined_name_is_a_runtime_error() {
        let env = Environment::new();
        let err = env.get("missing", 5..12).unwrap_err();
        match err {
            RillError::Runtime {
                kind: RuntimeErrorKind::UnresolvedVariable,
                span,
                ..
            } => assert_eq!(span, 5..12),
            other => panic!("expected unresolved variable error, got {:?}", other),
        }
    }

    #[test]
    fn assign_updates_existing_binding_in_outer_frame() {
        let outer = Rc::new(RefCell::new(Environment::new()));
        outer.borrow_mut().define("x".to_string(), number(1.0));
        let mut inner = Environment::with_enclosing(Rc::clone(&outer));
        inner.assign("x", number(2.0), 0..1).unwrap();
        assert_eq!(outer.borrow().get("x", 0..1).unwrap(), number(2.0));
    }

    #[test]
    fn assign_never_creates_a_binding() {
        let mut env = Environment::new();
        let err = env.assign("ghost", number(1.0), 0..5).unwrap_err();
        assert!(matches!(
            err,
            RillError::Runtime {
                kind: RuntimeErrorKind::UnresolvedVariable,
                ..
            }
        ));
    }

    #[test]
    fn shadowing_keeps_outer_binding_intact() {
        let outer = Rc::new(RefCell::new(Environment::new()));
        outer.borrow_mut().define("x".to_string(), number(1.0));
        let mut inner = Environment::with_enclosing(Rc::clone(&outer));
        inner.define("x".to_string(), number(2.0));
        assert_eq!(inner.get("x", 0..1).unwrap(), number(2.0));
        assert_eq!(outer.borrow().get("x", 0..1).unwrap(), number(1.0));
    }

    #[test]
    fn get_at_walks_exactly_the_given_distance() {
        let global = Rc::new(RefCell::new(Environment::new()));
        global.borrow_mut().define("x".to_string(), number(1.0));

        let middle = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
            &global,
        ))));
        middle.borrow_mut().define("x".to_string(), number(2.0));

        let inner = Environment::with_enclosing(Rc::clone(&middle));
        assert_eq!(inner.get_at(1, "x"), Some(number(2.0)));
        assert_eq!(inner.get_at(2, "x"), Some(number(1.0)));
        assert_eq!(inner.get_at(0, "x"), None);
    }

    #[test]
    fn assign_at_targets_the_given_frame_only() {
        let global = Rc::new(RefCell::new(Environment::new()));
        global.borrow_mut().define("x".to_string(), number(1.0));

        let middle = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
            &global,
        ))));
        middle.borrow_mut().define("x".to_string(), number(2.0));

        let mut inner = Environment::with_enclosing(Rc::clone(&middle));
        assert!(inner.assign_at(2, "x", number(9.0)));
        assert_eq!(global.borrow().get("x", 0..1).unwrap(), number(9.0));
        assert_eq!(middle.borrow().get("x", 0..1).unwrap(), number(2.0));
    }
}
