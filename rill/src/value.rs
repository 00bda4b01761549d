use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::Stmt;
use crate::environment::Environment;
use crate::resolver::Resolutions;
use crate::token::{Literal, Token};

/// Runtime values. Literals are carried by value; functions, classes and
/// instances are shared behind `Rc` so that identity comparisons and
/// mutation through multiple references behave as expected.
#[derive(Debug, Clone)]
pub enum Value {
    Literal(Literal),
    Function(Rc<Function>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
}

#[derive(Debug)]
pub enum Function {
    User(UserFunction),
    Native(NativeFunction),
}

#[derive(Debug)]
pub struct UserFunction {
    pub name: String,
    pub params: Vec<Token>,
    /// Shared so binding a method does not copy its body.
    pub body: Rc<Vec<Stmt>>,
    pub closure: Rc<RefCell<Environment>>,
    /// The binding distance table in force when the function was
    /// declared. Spans restart at zero for every source text, so a
    /// function must keep resolving against its own table rather than
    /// whichever one a later input installed.
    pub resolutions: Rc<Resolutions>,
    pub is_initializer: bool,
}

/// A host function. The callable takes evaluated arguments and reports
/// failures as bare messages; the interpreter attaches the call span.
#[derive(Debug, Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[Value]) -> Result<Value, String>,
}

#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub superclass: Option<Rc<Class>>,
    pub methods: HashMap<String, Rc<Function>>,
}

#[derive(Debug)]
pub struct Instance {
    pub class: Rc<Class>,
    fields: RefCell<HashMap<String, Value>>,
}

impl Value {
    /// Only `nil` and `false` are falsey.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Literal(Literal::Nil) => false,
            Value::Literal(Literal::Bool(b)) => *b,
            _ => true,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Literal(Literal::Nil))
    }

    /// The value's kind, as it appears in type mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Literal(Literal::Nil) => "Nil",
            Value::Literal(Literal::Bool(_)) => "Boolean",
            Value::Literal(Literal::Number(_)) => "Number",
            Value::Literal(Literal::String(_)) => "String",
            Value::Function(_) => "Function",
            Value::Class(_) => "Class",
            Value::Instance(_) => "Instance",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Literal(a), Value::Literal(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Function {
    pub fn arity(&self) -> usize {
        match self {
            Function::User(f) => f.params.len(),
            Function::Native(f) => f.arity,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Function::User(f) => &f.name,
            Function::Native(f) => f.name,
        }
    }
}

impl UserFunction {
    /// Produce a copy of this function whose closure has `this` bound to
    /// the given instance. Method access always goes through here.
    pub fn bind(&self, instance: Rc<Instance>) -> UserFunction {
        let mut env = Environment::with_enclosing(Rc::clone(&self.closure));
        env.define("this".to_string(), Value::Instance(instance));
        UserFunction {
            name: self.name.clone(),
            params: self.params.clone(),
            body: Rc::clone(&self.body),
            closure: Rc::new(RefCell::new(env)),
            resolutions: Rc::clone(&self.resolutions),
            is_initializer: self.is_initializer,
        }
    }
}

impl Class {
    /// Walk the inheritance chain for a method. Subclass methods shadow
    /// superclass ones.
    pub fn find_method(&self, name: &str) -> Option<Rc<Function>> {
        if let Some(method) = self.methods.get(name) {
            return Some(Rc::clone(method));
        }
        self.superclass
            .as_ref()
            .and_then(|superclass| superclass.find_method(name))
    }

    /// Constructing an instance costs the initializer's arity.
    pub fn arity(&self) -> usize {
        match self.find_method("init") {
            Some(init) => init.arity(),
            None => 0,
        }
    }
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: RefCell::new(HashMap::new()),
        }
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    pub fn set_field(&self, name: String, value: Value) {
        self.fields.borrow_mut().insert(name, value);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(literal) => write!(f, "{}", literal),
            Value::Function(function) => write!(f, "{}", function),
            Value::Class(class) => write!(f, "{}", class.name),
            Value::Instance(instance) => write!(f, "{} instance", instance.class.name),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::User(function) => write!(f, "<fn {}>", function.name),
            Function::Native(function) => write!(f, "<native fn {}>", function.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(name: &'static str) -> Rc<Function> {
        Rc::new(Function::Native(NativeFunction {
            name,
            arity: 0,
            func: |_| Ok(Value::Literal(Literal::Nil)),
        }))
    }

    #[test]
    fn only_nil_and_false_are_falsey() {
        assert!(!Value::Literal(Literal::Nil).is_truthy());
        assert!(!Value::Literal(Literal::Bool(false)).is_truthy());
        assert!(Value::Literal(Literal::Bool(true)).is_truthy());
        assert!(Value::Literal(Literal::Number(0.0)).is_truthy());
        assert!(Value::Literal(Literal::String(String::new())).is_truthy());
    }

    #[test]
    fn literal_values_compare_by_value() {
        assert_eq!(
            Value::Literal(Literal::Number(1.0)),
            Value::Literal(Literal::Number(1.0))
        );
        assert_ne!(
            Value::Literal(Literal::Number(1.0)),
            Value::Literal(Literal::Number(2.0))
        );
    }

    #[test]
    fn functions_compare_by_identity() {
        let a = native("clock");
        let b = native("clock");
        assert_eq!(Value::Function(Rc::clone(&a)), Value::Function(Rc::clone(&a)));
        assert_ne!(Value::Function(a), Value::Function(b));
    }

    #[test]
    fn find_method_walks_the_superclass_chain() {
        let base = Rc::new(Class {
            name: "Base".to_string(),
            superclass: None,
            methods: HashMap::from([("greet".to_string(), native("greet"))]),
        });
        let derived = Class {
            name: "Derived".to_string(),
            superclass: Some(Rc::clone(&base)),
            methods: HashMap::new(),
        };
        assert!(derived.find_method("greet").is_some());
        assert!(derived.find_method("missing").is_none());
    }

    #[test]
    fn subclass_method_shadows_superclass_method() {
        let base_greet = native("greet");
        let derived_greet = native("greet");
        let base = Rc::new(Class {
            name: "Base".to_string(),
            superclass: None,
            methods: HashMap::from([("greet".to_string(), Rc::clone(&base_greet))]),
        });
        let derived = Class {
            name: "Derived".to_string(),
            superclass: Some(base),
            methods: HashMap::from([("greet".to_string(), Rc::clone(&derived_greet))]),
        };
        let found = derived.find_method("greet").unwrap();
        assert!(Rc::ptr_eq(&found, &derived_greet));
    }

    #[test]
    fn instance_fields_shadow_methods_on_read() {
        let class = Rc::new(Class {
            name: "Thing".to_string(),
            superclass: None,
            methods: HashMap::from([("x".to_string(), native("x"))]),
        });
        let instance = Instance::new(class);
        assert!(instance.field("x").is_none());
        instance.set_field("x".to_string(), Value::Literal(Literal::Number(1.0)));
        assert_eq!(instance.field("x"), Some(Value::Literal(Literal::Number(1.0))));
    }

    #[test]
    fn display_forms() {
        let class = Rc::new(Class {
            name: "Point".to_string(),
            superclass: None,
            methods: HashMap::new(),
        });
        assert_eq!(Value::Class(Rc::clone(&class)).to_string(), "Point");
        assert_eq!(
            Value::Instance(Rc::new(Instance::new(class))).to_string(),
            "Point instance"
        );
        assert_eq!(Value::Function(native("clock")).to_string(), "<native fn clock>");
    }

    #[test]
    fn kind_names_match_error_messages() {
        assert_eq!(Value::Literal(Literal::Nil).kind(), "Nil");
        assert_eq!(Value::Literal(Literal::Number(1.0)).kind(), "Number");
        assert_eq!(Value::Function(native("f")).kind(), "Function");
    }
}
