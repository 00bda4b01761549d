use std::collections::HashMap;

use crate::ast::{Expr, Stmt};
use crate::error::{RillError, ScopeErrorKind};
use crate::token::{Span, Token};

/// Binding distances keyed by the byte span of the name or keyword token.
/// Spans are stable across resolver runs on the same tree, so resolving
/// twice yields the same table. Names absent from the table are globals
/// and get dynamic lookup.
pub type Resolutions = HashMap<Span, usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarState {
    Declared,
    Defined,
    Accessed,
}

#[derive(Debug)]
struct VarInfo {
    state: VarState,
    span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

pub struct Resolver {
    scopes: Vec<HashMap<String, VarInfo>>,
    resolutions: Resolutions,
    errors: Vec<RillError>,
    current_function: FunctionType,
    current_class: ClassType,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            resolutions: HashMap::new(),
            errors: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
        }
    }

    /// Run the static pass over a whole program. All scope errors are
    /// collected; on success the binding distance table is returned.
    pub fn resolve(mut self, statements: &[Stmt]) -> Result<Resolutions, Vec<RillError>> {
        self.resolve_statements(statements);
        if self.errors.is_empty() {
            Ok(self.resolutions)
        } else {
            Err(self.errors)
        }
    }

    fn resolve_statements(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_statement(statement);
        }
    }

    fn resolve_statement(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Expression { expression, .. } | Stmt::Print { expression, .. } => {
                self.resolve_expression(expression);
            }
            Stmt::Var {
                name, initializer, ..
            } => {
                self.declare(name);
                if let Some(initializer) = initializer {
                    self.resolve_expression(initializer);
                }
                self.define(name);
            }
            Stmt::Block { statements, .. } => {
                self.begin_scope();
                self.resolve_statements(statements);
                self.end_scope_checking_unused();
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expression(condition);
                self.resolve_statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch);
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                self.resolve_expression(condition);
                self.resolve_statement(body);
            }
            Stmt::Break { .. } => {}
            Stmt::Function {
                name, params, body, ..
            } => {
                self.declare(name);
                self.define(name);
                self.resolve_function(params, body, FunctionType::Function);
            }
            Stmt::Return { keyword, value, .. } => {
                if self.current_function == FunctionType::None {
                    self.error(
                        ScopeErrorKind::ReturnOutsideFunction,
                        "cannot return from top-level code",
                        keyword.span.clone(),
                    );
                }
                if let Some(value) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(
                            ScopeErrorKind::ReturnFromInitializer,
                            "cannot return a value from an initializer",
                            keyword.span.clone(),
                        );
                    }
                    self.resolve_expression(value);
                }
            }
            Stmt::Class {
                name,
                superclass,
                methods,
                ..
            } => self.resolve_class(name, superclass.as_ref(), methods),
        }
    }

    fn resolve_class(&mut self, name: &Token, superclass: Option<&Expr>, methods: &[Stmt]) {
        let enclosing_class = self.current_class;
        self.current_class = ClassType::Class;

        self.declare(name);
        self.define(name);

        if let Some(superclass) = superclass {
            if let Expr::Variable {
                name: superclass_name,
            } = superclass
            {
                if superclass_name.lexeme == name.lexeme {
                    self.error(
                        ScopeErrorKind::ClassInheritsSelf,
                        "a class cannot inherit from itself",
                        superclass_name.span.clone(),
                    );
                }
            }
            self.current_class = ClassType::Subclass;
            self.resolve_expression(superclass);

            self.begin_scope();
            self.insert_implicit("super");
        }

        self.begin_scope();
        self.insert_implicit("this");

        for method in methods {
            if let Stmt::Function {
                name: method_name,
                params,
                body,
                ..
            } = method
            {
                let function_type = if method_name.lexeme == "init" {
                    FunctionType::Initializer
                } else {
                    FunctionType::Method
                };
                self.resolve_function(params, body, function_type);
            }
        }

        self.end_scope();
        if superclass.is_some() {
            self.end_scope();
        }

        self.current_class = enclosing_class;
    }

    fn resolve_function(&mut self, params: &[Token], body: &[Stmt], function_type: FunctionType) {
        let enclosing_function = self.current_function;
        self.current_function = function_type;

        // Parameters live in their own scope; they are exempt from the
        // unused variable check that block scopes run.
        self.begin_scope();
        for param in params {
            self.declare(param);
            self.define(param);
        }
        self.resolve_statements(body);
        self.end_scope();

        self.current_function = enclosing_function;
    }

    fn resolve_expression(&mut self, expression: &Expr) {
        match expression {
            Expr::Literal { .. } => {}
            Expr::Grouping { expression } => self.resolve_expression(expression),
            Expr::Unary { right, .. } => self.resolve_expression(right),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expression(left);
                self.resolve_expression(right);
            }
            Expr::Variable { name } => {
                if let Some(scope) = self.scopes.last() {
                    if let Some(info) = scope.get(&name.lexeme) {
                        if info.state == VarState::Declared {
                            self.error(
                                ScopeErrorKind::SelfReferencingInitializer,
                                &format!(
                                    "cannot read local variable '{}' in its own initializer",
                                    name.lexeme
                                ),
                                name.span.clone(),
                            );
                        }
                    }
                }
                self.resolve_local(name);
            }
            Expr::Assign { name, value } => {
                self.resolve_expression(value);
                self.resolve_local(name);
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expression(callee);
                for argument in arguments {
                    self.resolve_expression(argument);
                }
            }
            Expr::Get { object, .. } => self.resolve_expression(object),
            Expr::Set { object, value, .. } => {
                self.resolve_expression(object);
                self.resolve_expression(value);
            }
            Expr::This { keyword } => {
                if self.current_class == ClassType::None {
                    self.error(
                        ScopeErrorKind::ThisOutsideClass,
                        "cannot use 'this' outside of a class",
                        keyword.span.clone(),
                    );
                    return;
                }
                self.resolve_local(keyword);
            }
            Expr::Super { keyword, .. } => {
                match self.current_class {
                    ClassType::None => {
                        self.error(
                            ScopeErrorKind::SuperOutsideClass,
                            "cannot use 'super' outside of a class",
                            keyword.span.clone(),
                        );
                        return;
                    }
                    ClassType::Class => {
                        self.error(
                            ScopeErrorKind::SuperOutsideClass,
                            "cannot use 'super' in a class with no superclass",
                            keyword.span.clone(),
                        );
                        return;
                    }
                    ClassType::Subclass => {}
                }
                self.resolve_local(keyword);
            }
        }
    }

    /// Record the distance from the innermost scope to the one holding
    /// the name. Names not found in any local scope are globals and stay
    /// out of the table.
    fn resolve_local(&mut self, name: &Token) {
        for (distance, scope) in self.scopes.iter_mut().rev().enumerate() {
            if let Some(info) = scope.get_mut(&name.lexeme) {
                info.state = VarState::Accessed;
                self.resolutions.insert(name.span.clone(), distance);
                return;
            }
        }
    }

    fn declare(&mut self, name: &Token) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        if scope.contains_key(&name.lexeme) {
            let span = name.span.clone();
            self.error(
                ScopeErrorKind::DuplicateDeclaration,
                &format!("variable '{}' is already declared in this scope", name.lexeme),
                span,
            );
            return;
        }
        scope.insert(
            name.lexeme.clone(),
            VarInfo {
                state: VarState::Declared,
                span: name.span.clone(),
            },
        );
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            if let Some(info) = scope.get_mut(&name.lexeme) {
                if info.state == VarState::Declared {
                    info.state = VarState::Defined;
                }
            }
        }
    }

    /// Introduce a name the runtime defines itself ('this', 'super').
    /// Marked accessed so it never trips the unused check.
    fn insert_implicit(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                name.to_string(),
                VarInfo {
                    state: VarState::Accessed,
                    span: 0..0,
                },
            );
        }
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    /// Block scopes flag locals that were never read. An underscore
    /// prefix opts a name out.
    fn end_scope_checking_unused(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        for (name, info) in scope {
            if info.state != VarState::Accessed && !name.starts_with('_') {
                self.error(
                    ScopeErrorKind::UnusedLocalVariable,
                    &format!("local variable '{}' is never used", name),
                    info.span,
                );
            }
        }
    }

    fn error(&mut self, kind: ScopeErrorKind, message: &str, span: Span) {
        self.errors.push(RillError::Scope {
            kind,
            message: message.to_string(),
            span,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::scanner::Scanner;
    use crate::token::Token;

    fn resolve(source: &str) -> Result<Resolutions, Vec<RillError>> {
        let tokens: Vec<Token> = Scanner::new(source).map(|r| r.unwrap()).collect();
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        assert!(parser.take_errors().is_empty(), "parse errors in test source");
        Resolver::new().resolve(&statements)
    }

    fn scope_kinds(source: &str) -> Vec<ScopeErrorKind> {
        resolve(source)
            .unwrap_err()
            .into_iter()
            .map(|e| match e {
                RillError::Scope { kind, .. } => kind,
                other => panic!("expected scope error, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn globals_stay_out_of_the_table() {
        let resolutions = resolve("var x = 1; print x;").unwrap();
        assert!(resolutions.is_empty());
    }

    #[test]
    fn local_reference_records_its_distance() {
        let resolutions = resolve("fn f() { var x = 1; print x; }").unwrap();
        // `x` at byte 26 refers to the binding in the same scope
        assert_eq!(resolutions.values().filter(|&&d| d == 0).count(), 1);
    }

    #[test]
    fn closure_capture_records_crossing_distance() {
        let source = "fn outer() { var x = 1; fn inner() { print x; } inner(); }";
        let resolutions = resolve(source).unwrap();
        // `x` inside `inner` crosses inner's param scope to outer's
        assert!(resolutions.values().any(|&d| d == 1));
    }

    #[test]
    fn resolving_twice_yields_the_same_table() {
        let source = "fn f(a) { var b = a; { var c = b; print c; } print b; }";
        let tokens: Vec<Token> = Scanner::new(source).map(|r| r.unwrap()).collect();
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        let first = Resolver::new().resolve(&statements).unwrap();
        let second = Resolver::new().resolve(&statements).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_declaration_in_same_scope_is_rejected() {
        let kinds = scope_kinds("{ var x = 1; var x = 2; print x; }");
        assert!(kinds.contains(&ScopeErrorKind::DuplicateDeclaration));
    }

    #[test]
    fn shadowing_in_nested_scope_is_allowed() {
        assert!(resolve("{ var x = 1; { var x = 2; print x; } print x; }").is_ok());
    }

    #[test]
    fn self_referencing_initializer_is_rejected() {
        let kinds = scope_kinds("{ var a = 1; { var a = a; print a; } print a; }");
        assert!(kinds.contains(&ScopeErrorKind::SelfReferencingInitializer));
    }

    #[test]
    fn unused_local_variable_is_rejected() {
        let kinds = scope_kinds("{ var x = 1; }");
        assert_eq!(kinds, vec![ScopeErrorKind::UnusedLocalVariable]);
    }

    #[test]
    fn underscore_prefix_opts_out_of_unused_check() {
        assert!(resolve("{ var _x = 1; }").is_ok());
    }

    #[test]
    fn unused_parameter_is_not_flagged() {
        assert!(resolve("fn f(unused) { print 1; } f(2);").is_ok());
    }

    #[test]
    fn return_outside_function_is_rejected() {
        let kinds = scope_kinds("return 1;");
        assert_eq!(kinds, vec![ScopeErrorKind::ReturnOutsideFunction]);
    }

    #[test]
    fn return_with_value_from_initializer_is_rejected() {
        let kinds = scope_kinds("class A { init() { return 1; } }");
        assert_eq!(kinds, vec![ScopeErrorKind::ReturnFromInitializer]);
    }

    #[test]
    fn bare_return_from_initializer_is_allowed() {
        assert!(resolve("class A { init() { return; } }").is_ok());
    }

    #[test]
    fn this_outside_class_is_rejected() {
        let kinds = scope_kinds("print this;");
        assert_eq!(kinds, vec![ScopeErrorKind::ThisOutsideClass]);
    }

    #[test]
    fn this_in_standalone_function_is_rejected() {
        let kinds = scope_kinds("fn f() { print this; } f();");
        assert_eq!(kinds, vec![ScopeErrorKind::ThisOutsideClass]);
    }

    #[test]
    fn super_outside_class_is_rejected() {
        let kinds = scope_kinds("fn f() { super.go(); } f();");
        assert_eq!(kinds, vec![ScopeErrorKind::SuperOutsideClass]);
    }

    #[test]
    fn super_without_superclass_is_rejected() {
        let kinds = scope_kinds("class A { go() { super.go(); } }");
        assert_eq!(kinds, vec![ScopeErrorKind::SuperOutsideClass]);
    }

    #[test]
    fn class_inheriting_itself_is_rejected() {
        let kinds = scope_kinds("class A < A {}");
        assert!(kinds.contains(&ScopeErrorKind::ClassInheritsSelf));
    }

    #[test]
    fn this_and_super_resolve_in_subclass_method() {
        let source = "class A { go() { print 1; } } class B < A { go() { print this; super.go(); } }";
        let resolutions = resolve(source).unwrap();
        // `this` sits one scope in from `super`
        assert!(resolutions.values().any(|&d| d == 1));
        assert!(resolutions.values().any(|&d| d == 2));
    }

    #[test]
    fn multiple_errors_are_all_collected() {
        let errors = resolve("{ var x = 1; var x = 2; } return 1;").unwrap_err();
        assert!(errors.len() >= 2);
    }
}
