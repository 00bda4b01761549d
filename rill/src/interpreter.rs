use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::ast::{Expr, Stmt};
use crate::environment::Environment;
use crate::error::{RillError, RuntimeErrorKind};
use crate::resolver::Resolutions;
use crate::token::{Literal, Token, TokenType};
use crate::value::{Class, Function, Instance, NativeFunction, UserFunction, Value};

/// Recursion limit for script calls. Each script frame costs several
/// host stack frames, so this stays well below what would overflow a
/// 2 MB thread stack; runaway recursion surfaces as a script error
/// instead of killing the process.
const MAX_CALL_DEPTH: usize = 128;

/// How a statement finished. Break and Return unwind through enclosing
/// statements on this channel; the error channel stays reserved for
/// actual failures.
#[derive(Debug)]
pub enum Flow {
    Normal,
    Break,
    Return(Value),
}

pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    resolutions: Rc<Resolutions>,
    call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));
        let mut interpreter = Self {
            environment: Rc::clone(&globals),
            globals,
            resolutions: Rc::new(HashMap::new()),
            call_depth: 0,
        };
        for native in NATIVES {
            interpreter.define_native(*native);
        }
        interpreter
    }

    /// Register a host function in the global scope.
    pub fn define_native(&mut self, native: NativeFunction) {
        self.globals.borrow_mut().define(
            native.name.to_string(),
            Value::Function(Rc::new(Function::Native(native))),
        );
    }

    /// Install the binding distance table for the statements about to
    /// run. Tables are keyed by byte span, which restarts at zero for
    /// every source text, so they are never merged: top-level code uses
    /// the current table, and every function captures the table in
    /// force at its declaration and resolves against that one for life.
    pub fn set_resolutions(&mut self, resolutions: Resolutions) {
        self.resolutions = Rc::new(resolutions);
    }

    /// Run a whole program, stopping at the first runtime error. Output
    /// of `print` goes to the given writer.
    pub fn interpret(
        &mut self,
        statements: &[Stmt],
        output: &mut dyn Write,
    ) -> Result<(), RillError> {
        for statement in statements {
            self.execute(statement, output)?;
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Stmt, output: &mut dyn Write) -> Result<Flow, RillError> {
        match statement {
            Stmt::Expression { expression, .. } => {
                self.evaluate(expression, output)?;
                Ok(Flow::Normal)
            }
            Stmt::Print { expression, .. } => {
                let value = self.evaluate(expression, output)?;
                writeln!(output, "{}", value)?;
                Ok(Flow::Normal)
            }
            Stmt::Var {
                name, initializer, ..
            } => {
                let value = match initializer {
                    Some(initializer) => self.evaluate(initializer, output)?,
                    None => Value::Literal(Literal::Nil),
                };
                self.environment
                    .borrow_mut()
                    .define(name.lexeme.clone(), value);
                Ok(Flow::Normal)
            }
            Stmt::Block { statements, .. } => {
                let environment = Environment::with_enclosing(Rc::clone(&self.environment));
                self.execute_block(statements, environment, output)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.evaluate(condition, output)?.is_truthy() {
                    self.execute(then_branch, output)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch, output)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                while self.evaluate(condition, output)?.is_truthy() {
                    match self.execute(body, output)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Function {
                name, params, body, ..
            } => {
                let function = UserFunction {
                    name: name.lexeme.clone(),
                    params: params.clone(),
                    body: Rc::new(body.clone()),
                    closure: Rc::clone(&self.environment),
                    resolutions: Rc::clone(&self.resolutions),
                    is_initializer: false,
                };
                self.environment.borrow_mut().define(
                    name.lexeme.clone(),
                    Value::Function(Rc::new(Function::User(function))),
                );
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(value) => self.evaluate(value, output)?,
                    None => Value::Literal(Literal::Nil),
                };
                Ok(Flow::Return(value))
            }
            Stmt::Class {
                name,
                superclass,
                methods,
                ..
            } => {
                self.execute_class(name, superclass.as_ref(), methods, output)?;
                Ok(Flow::Normal)
            }
        }
    }

    /// Class declaration runs in two phases: the name is bound to nil
    /// first so method bodies can already refer to it, then reassigned to
    /// the finished class.
    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Stmt],
        output: &mut dyn Write,
    ) -> Result<(), RillError> {
        self.environment
            .borrow_mut()
            .define(name.lexeme.clone(), Value::Literal(Literal::Nil));

        let superclass = match superclass {
            Some(expr) => {
                let value = self.evaluate(expr, output)?;
                match value {
                    Value::Class(class) => Some(class),
                    other => {
                        let span = match expr {
                            Expr::Variable { name } => name.span.clone(),
                            _ => name.span.clone(),
                        };
                        return Err(RillError::Runtime {
                            kind: RuntimeErrorKind::InvalidSuperclass,
                            message: format!("superclass must be a class, got {}", other.kind()),
                            span,
                        });
                    }
                }
            }
            None => None,
        };

        // Methods close over a frame holding 'super' when there is one
        let method_closure = match &superclass {
            Some(class) => {
                let mut env = Environment::with_enclosing(Rc::clone(&self.environment));
                env.define("super".to_string(), Value::Class(Rc::clone(class)));
                Rc::new(RefCell::new(env))
            }
            None => Rc::clone(&self.environment),
        };

        let mut class_methods = HashMap::new();
        for method in methods {
            if let Stmt::Function {
                name: method_name,
                params,
                body,
                ..
            } = method
            {
                let function = UserFunction {
                    name: method_name.lexeme.clone(),
                    params: params.clone(),
                    body: Rc::new(body.clone()),
                    closure: Rc::clone(&method_closure),
                    resolutions: Rc::clone(&self.resolutions),
                    is_initializer: method_name.lexeme == "init",
                };
                class_methods.insert(
                    method_name.lexeme.clone(),
                    Rc::new(Function::User(function)),
                );
            }
        }

        let class = Value::Class(Rc::new(Class {
            name: name.lexeme.clone(),
            superclass,
            methods: class_methods,
        }));
        self.environment
            .borrow_mut()
            .assign(&name.lexeme, class, name.span.clone())
    }

    fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: Environment,
        output: &mut dyn Write,
    ) -> Result<Flow, RillError> {
        let previous = std::mem::replace(
            &mut self.environment,
            Rc::new(RefCell::new(environment)),
        );

        let mut result = Ok(Flow::Normal);
        for statement in statements {
            match self.execute(statement, output) {
                Ok(Flow::Normal) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }

        self.environment = previous;
        result
    }

    fn evaluate(&mut self, expression: &Expr, output: &mut dyn Write) -> Result<Value, RillError> {
        match expression {
            Expr::Literal { value } => Ok(Value::Literal(value.clone())),
            Expr::Grouping { expression } => self.evaluate(expression, output),
            Expr::Unary { operator, right } => {
                let right = self.evaluate(right, output)?;
                match operator.token_type {
                    TokenType::Minus => match right {
                        Value::Literal(Literal::Number(n)) => {
                            Ok(Value::Literal(Literal::Number(-n)))
                        }
                        other => Err(RillError::Runtime {
                            kind: RuntimeErrorKind::TypeMismatch,
                            message: format!("operand must be a Number, got {}", other.kind()),
                            span: operator.span.clone(),
                        }),
                    },
                    TokenType::Bang => Ok(Value::Literal(Literal::Bool(!right.is_truthy()))),
                    _ => unreachable!("parser only emits '-' and '!' unary operators"),
                }
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, output)?;
                let right = self.evaluate(right, output)?;
                self.binary(left, operator, right)
            }
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, output)?;
                let short_circuits = match operator.token_type {
                    TokenType::Or => left.is_truthy(),
                    TokenType::And => !left.is_truthy(),
                    _ => unreachable!("parser only emits 'or' and 'and' logical operators"),
                };
                if short_circuits {
                    Ok(left)
                } else {
                    self.evaluate(right, output)
                }
            }
            Expr::Variable { name } => self.look_up_variable(name),
            Expr::Assign { name, value } => {
                let value = self.evaluate(value, output)?;
                match self.resolutions.get(&name.span) {
                    Some(&distance) => {
                        let assigned = self.environment.borrow_mut().assign_at(
                            distance,
                            &name.lexeme,
                            value.clone(),
                        );
                        if !assigned {
                            return Err(RillError::Runtime {
                                kind: RuntimeErrorKind::UnresolvedVariable,
                                message: format!("undefined variable '{}'", name.lexeme),
                                span: name.span.clone(),
                            });
                        }
                    }
                    None => {
                        self.globals.borrow_mut().assign(
                            &name.lexeme,
                            value.clone(),
                            name.span.clone(),
                        )?;
                    }
                }
                Ok(value)
            }
            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee, output)?;
                let mut evaluated = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    evaluated.push(self.evaluate(argument, output)?);
                }
                self.call_value(callee, evaluated, paren, output)
            }
            Expr::Get { object, name } => {
                let object = self.evaluate(object, output)?;
                let instance = match object {
                    Value::Instance(instance) => instance,
                    other => {
                        return Err(RillError::Runtime {
                            kind: RuntimeErrorKind::NoSuchProperty,
                            message: format!(
                                "only instances have properties, got {}",
                                other.kind()
                            ),
                            span: name.span.clone(),
                        });
                    }
                };

                if let Some(value) = instance.field(&name.lexeme) {
                    return Ok(value);
                }
                if let Some(method) = instance.class.find_method(&name.lexeme) {
                    if let Function::User(function) = method.as_ref() {
                        let bound = function.bind(Rc::clone(&instance));
                        return Ok(Value::Function(Rc::new(Function::User(bound))));
                    }
                }
                Err(RillError::Runtime {
                    kind: RuntimeErrorKind::NoSuchProperty,
                    message: format!("undefined property '{}'", name.lexeme),
                    span: name.span.clone(),
                })
            }
            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object, output)?;
                let instance = match object {
                    Value::Instance(instance) => instance,
                    other => {
                        return Err(RillError::Runtime {
                            kind: RuntimeErrorKind::NoSuchProperty,
                            message: format!("only instances have fields, got {}", other.kind()),
                            span: name.span.clone(),
                        });
                    }
                };
                let value = self.evaluate(value, output)?;
                instance.set_field(name.lexeme.clone(), value.clone());
                Ok(value)
            }
            Expr::This { keyword } => self.look_up_variable(keyword),
            Expr::Super { keyword, method } => self.evaluate_super(keyword, method),
        }
    }

    fn binary(&self, left: Value, operator: &Token, right: Value) -> Result<Value, RillError> {
        use Literal::{Bool, Number, String as Str};

        // Stringifying concatenation accepts any pair of operands
        if operator.token_type == TokenType::PlusPlus {
            return Ok(Value::Literal(Str(format!("{}{}", left, right))));
        }

        match operator.token_type {
            TokenType::EqualEqual | TokenType::BangEqual => {
                // Comparing against nil is always allowed and never true
                // unless both sides are nil
                if !left.is_nil() && !right.is_nil() && left.kind() != right.kind() {
                    return Err(RillError::Runtime {
                        kind: RuntimeErrorKind::TypeMismatch,
                        message: format!("cannot compare {} and {}", left.kind(), right.kind()),
                        span: operator.span.clone(),
                    });
                }
                let equal = left == right;
                let result = if operator.token_type == TokenType::EqualEqual {
                    equal
                } else {
                    !equal
                };
                Ok(Value::Literal(Bool(result)))
            }
            _ => {
                let (Value::Literal(Number(a)), Value::Literal(Number(b))) = (&left, &right)
                else {
                    return Err(RillError::Runtime {
                        kind: RuntimeErrorKind::TypeMismatch,
                        message: format!(
                            "operands must be Numbers, got {} and {}",
                            left.kind(),
                            right.kind()
                        ),
                        span: operator.span.clone(),
                    });
                };
                let value = match operator.token_type {
                    TokenType::Plus => Number(a + b),
                    TokenType::Minus => Number(a - b),
                    TokenType::Star => Number(a * b),
                    TokenType::Slash => Number(a / b),
                    TokenType::Greater => Bool(a > b),
                    TokenType::GreaterEqual => Bool(a >= b),
                    TokenType::Less => Bool(a < b),
                    TokenType::LessEqual => Bool(a <= b),
                    _ => unreachable!("parser only emits arithmetic and comparison binaries"),
                };
                Ok(Value::Literal(value))
            }
        }
    }

    fn look_up_variable(&self, name: &Token) -> Result<Value, RillError> {
        match self.resolutions.get(&name.span) {
            Some(&distance) => self
                .environment
                .borrow()
                .get_at(distance, &name.lexeme)
                .ok_or_else(|| RillError::Runtime {
                    kind: RuntimeErrorKind::UnresolvedVariable,
                    message: format!("undefined variable '{}'", name.lexeme),
                    span: name.span.clone(),
                }),
            None => self.globals.borrow().get(&name.lexeme, name.span.clone()),
        }
    }

    fn evaluate_super(&self, keyword: &Token, method: &Token) -> Result<Value, RillError> {
        let Some(&distance) = self.resolutions.get(&keyword.span) else {
            return Err(RillError::Runtime {
                kind: RuntimeErrorKind::UnresolvedVariable,
                message: "'super' is not bound here".to_string(),
                span: keyword.span.clone(),
            });
        };

        let environment = self.environment.borrow();
        let superclass = environment.get_at(distance, "super");
        // 'this' sits one frame inside the frame holding 'super'
        let instance = environment.get_at(distance - 1, "this");

        let (Some(Value::Class(superclass)), Some(Value::Instance(instance))) =
            (superclass, instance)
        else {
            return Err(RillError::Runtime {
                kind: RuntimeErrorKind::UnresolvedVariable,
                message: "'super' is not bound here".to_string(),
                span: keyword.span.clone(),
            });
        };

        match superclass.find_method(&method.lexeme) {
            Some(found) => match found.as_ref() {
                Function::User(function) => {
                    let bound = function.bind(instance);
                    Ok(Value::Function(Rc::new(Function::User(bound))))
                }
                Function::Native(_) => Ok(Value::Function(found)),
            },
            None => Err(RillError::Runtime {
                kind: RuntimeErrorKind::NoSuchProperty,
                message: format!("undefined property '{}'", method.lexeme),
                span: method.span.clone(),
            }),
        }
    }

    fn call_value(
        &mut self,
        callee: Value,
        arguments: Vec<Value>,
        paren: &Token,
        output: &mut dyn Write,
    ) -> Result<Value, RillError> {
        match callee {
            Value::Function(function) => {
                self.check_arity(function.arity(), arguments.len(), paren)?;
                self.call_function(&function, arguments, paren, output)
            }
            Value::Class(class) => {
                self.check_arity(class.arity(), arguments.len(), paren)?;
                let instance = Rc::new(Instance::new(Rc::clone(&class)));
                if let Some(init) = class.find_method("init") {
                    if let Function::User(function) = init.as_ref() {
                        let bound = Function::User(function.bind(Rc::clone(&instance)));
                        self.call_function(&bound, arguments, paren, output)?;
                    }
                }
                Ok(Value::Instance(instance))
            }
            other => Err(RillError::Runtime {
                kind: RuntimeErrorKind::NotCallable,
                message: format!("can only call functions and classes, got {}", other.kind()),
                span: paren.span.clone(),
            }),
        }
    }

    fn check_arity(&self, expected: usize, got: usize, paren: &Token) -> Result<(), RillError> {
        if expected != got {
            return Err(RillError::Runtime {
                kind: RuntimeErrorKind::ArityMismatch,
                message: format!("expected {} arguments but got {}", expected, got),
                span: paren.span.clone(),
            });
        }
        Ok(())
    }

    fn call_function(
        &mut self,
        function: &Function,
        arguments: Vec<Value>,
        paren: &Token,
        output: &mut dyn Write,
    ) -> Result<Value, RillError> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(RillError::Runtime {
                kind: RuntimeErrorKind::StackExhausted,
                message: "call stack exhausted".to_string(),
                span: paren.span.clone(),
            });
        }

        match function {
            Function::Native(native) => {
                (native.func)(&arguments).map_err(|message| RillError::Runtime {
                    kind: RuntimeErrorKind::NativeFailure,
                    message,
                    span: paren.span.clone(),
                })
            }
            Function::User(function) => {
                let mut environment = Environment::with_enclosing(Rc::clone(&function.closure));
                for (param, argument) in function.params.iter().zip(arguments) {
                    environment.define(param.lexeme.clone(), argument);
                }

                // The body resolves against the table captured at the
                // function's declaration, not whichever table the
                // caller's source installed
                let previous = std::mem::replace(
                    &mut self.resolutions,
                    Rc::clone(&function.resolutions),
                );
                self.call_depth += 1;
                let flow = self.execute_block(&function.body, environment, output);
                self.call_depth -= 1;
                self.resolutions = previous;

                let returned = match flow? {
                    Flow::Return(value) => value,
                    // A break never crosses a call boundary
                    Flow::Normal | Flow::Break => Value::Literal(Literal::Nil),
                };

                if function.is_initializer {
                    // Initializers always hand back the instance; the
                    // resolver already rejected value-carrying returns
                    return function
                        .closure
                        .borrow()
                        .get_at(0, "this")
                        .ok_or_else(|| RillError::Runtime {
                            kind: RuntimeErrorKind::UnresolvedVariable,
                            message: "initializer lost its instance binding".to_string(),
                            span: paren.span.clone(),
                        });
                }
                Ok(returned)
            }
        }
    }
}

/// Host functions available in every program's global scope.
pub const NATIVES: &[NativeFunction] = &[
    NativeFunction {
        name: "clock",
        arity: 0,
        func: native_clock,
    },
    NativeFunction {
        name: "readLine",
        arity: 0,
        func: native_read_line,
    },
];

/// Seconds since the Unix epoch, fractional.
fn native_clock(_arguments: &[Value]) -> Result<Value, String> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| e.to_string())?;
    Ok(Value::Literal(Literal::Number(now.as_secs_f64())))
}

/// One line from standard input, without the trailing newline. Nil at
/// end of input.
fn native_read_line(_arguments: &[Value]) -> Result<Value, String> {
    let mut line = String::new();
    let read = std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| e.to_string())?;
    if read == 0 {
        return Ok(Value::Literal(Literal::Nil));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Value::Literal(Literal::String(line)))
}
