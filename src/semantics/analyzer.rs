use std::collections::HashMap;

use crate::lang::ast::{Expr, FunDecl, Stmt};
use crate::runtime::natives::NativeRegistry;

/// A single semantic problem.
#[derive(Debug, Clone)]
pub enum SemanticError {
    UndefinedName {
        name: String,
        function: String,
    },
    Redefinition {
        name: String,
        function: String,
    },
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
        function: String,
    },
    BreakOutsideLoop {
        function: String,
    },
    InvalidAssignTarget {
        function: String,
    },
}

impl std::fmt::Display for SemanticError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticError::UndefinedName { name, function } => {
                write!(f, "in '{}': undefined name '{}'", function, name)
            }
            SemanticError::Redefinition { name, function } => {
                write!(f, "in '{}': re-definition of '{}'", function, name)
            }
            SemanticError::ArityMismatch {
                name,
                expected,
                got,
                function,
            } => {
                write!(
                    f,
                    "in '{}': '{}' takes {} argument(s), got {}",
                    function, name, expected, got
                )
            }
            SemanticError::BreakOutsideLoop { function } => {
                write!(f, "in '{}': 'break' outside a loop", function)
            }
            SemanticError::InvalidAssignTarget { function } => {
                write!(
                    f,
                    "in '{}': assignment target must be a name or element access",
                    function
                )
            }
        }
    }
}

impl std::error::Error for SemanticError {}

/// Accumulated semantic problems for a whole program.
#[derive(Debug, Clone)]
pub struct SemanticErrors {
    pub errors: Vec<SemanticError>,
}

impl std::fmt::Display for SemanticErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "semantic check failed with {} error(s):", self.errors.len())?;

        for (i, error) in self.errors.iter().enumerate() {
            writeln!(f, "  {}: {}", i + 1, error)?;
        }

        Ok(())
    }
}

impl std::error::Error for SemanticErrors {}

/// Pre-lowering checker: name resolution and call arity.
///
/// Lowering relies on its input having passed these checks; it still
/// re-detects redefinitions on its own, but reports nothing about arity.
pub struct Analyzer<'n> {
    natives: &'n NativeRegistry,
    /// Declared arity per top-level function.
    functions: HashMap<String, usize>,
    /// Declared arity per native stub.
    stubs: HashMap<String, usize>,
    errors: Vec<SemanticError>,
}

/// Check a whole top-level program against the given native registry.
pub fn check(decls: &[Stmt], natives: &NativeRegistry) -> Result<(), SemanticErrors> {
    Analyzer::new(natives).run(decls)
}

impl<'n> Analyzer<'n> {
    pub fn new(natives: &'n NativeRegistry) -> Self {
        Self {
            natives,
            functions: HashMap::new(),
            stubs: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn run(mut self, decls: &[Stmt]) -> Result<(), SemanticErrors> {
        // Pass 1: collect callable names and arities so bodies can call
        // forward.
        for decl in decls {
            match decl {
                Stmt::Function(fun) => {
                    if self.functions.insert(fun.name.clone(), fun.params.len()).is_some() {
                        self.errors.push(SemanticError::Redefinition {
                            name: fun.name.clone(),
                            function: "<top level>".to_string(),
                        });
                    }
                }
                Stmt::NativeStub { name, params } => {
                    self.stubs.insert(name.clone(), params.len());
                }
                _ => {}
            }
        }

        // Pass 2: walk bodies.
        for decl in decls {
            if let Stmt::Function(fun) = decl {
                self.check_function(fun);
            }
        }

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(SemanticErrors {
                errors: self.errors,
            })
        }
    }

    fn is_callable(&self, name: &str) -> bool {
        self.functions.contains_key(name)
            || self.stubs.contains_key(name)
            || self.natives.id_of(name).is_some()
    }

    fn declared_arity(&self, name: &str) -> Option<usize> {
        self.functions
            .get(name)
            .or_else(|| self.stubs.get(name))
            .copied()
    }

    fn check_function(&mut self, fun: &FunDecl) {
        let mut locals: HashMap<String, ()> = HashMap::new();

        for param in &fun.params {
            if locals.insert(param.clone(), ()).is_some() {
                self.errors.push(SemanticError::Redefinition {
                    name: param.clone(),
                    function: fun.name.clone(),
                });
            }
        }

        self.check_body(&fun.body, &mut locals, fun, 0);
    }

    fn check_body(
        &mut self,
        body: &[Stmt],
        locals: &mut HashMap<String, ()>,
        fun: &FunDecl,
        loop_depth: usize,
    ) {
        for stmt in body {
            match stmt {
                Stmt::Expr(expr) => self.check_expr(expr, locals, fun),
                Stmt::Def { name, init } => {
                    self.check_expr(init, locals, fun);

                    // Locals are function-wide: a second `def` of the
                    // same name anywhere in the body is rejected.
                    if locals.insert(name.clone(), ()).is_some() {
                        self.errors.push(SemanticError::Redefinition {
                            name: name.clone(),
                            function: fun.name.clone(),
                        });
                    }
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    self.check_expr(cond, locals, fun);
                    self.check_body(then_body, locals, fun, loop_depth);

                    if let Some(else_stmts) = else_body {
                        self.check_body(else_stmts, locals, fun, loop_depth);
                    }
                }
                Stmt::Return(expr) => self.check_expr(expr, locals, fun),
                Stmt::While { check, body } => {
                    self.check_expr(check, locals, fun);
                    self.check_body(body, locals, fun, loop_depth + 1);
                }
                Stmt::Break => {
                    if loop_depth == 0 {
                        self.errors.push(SemanticError::BreakOutsideLoop {
                            function: fun.name.clone(),
                        });
                    }
                }
                // Only valid at top level; the parser already enforces
                // that, so nothing to do here.
                Stmt::Function(_) | Stmt::NativeStub { .. } | Stmt::Import(_) => {}
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr, locals: &mut HashMap<String, ()>, fun: &FunDecl) {
        match expr {
            Expr::Bool(_)
            | Expr::Char(_)
            | Expr::Int { .. }
            | Expr::Float { .. }
            | Expr::Str(_) => {}
            Expr::Name(name) => {
                if !locals.contains_key(name) && !self.is_callable(name) {
                    self.errors.push(SemanticError::UndefinedName {
                        name: name.clone(),
                        function: fun.name.clone(),
                    });
                }
            }
            Expr::Seq { items, .. } => {
                for item in items {
                    self.check_expr(item, locals, fun);
                }
            }
            Expr::Unary { inner, .. } => self.check_expr(inner, locals, fun),
            Expr::Binary { left, right, .. } => {
                self.check_expr(left, locals, fun);
                self.check_expr(right, locals, fun);
            }
            Expr::Call { callee, args } => {
                self.check_expr(callee, locals, fun);

                if let Expr::Name(name) = callee.as_ref() {
                    if let Some(expected) = self.declared_arity(name) {
                        if expected != args.len() {
                            self.errors.push(SemanticError::ArityMismatch {
                                name: name.clone(),
                                expected,
                                got: args.len(),
                                function: fun.name.clone(),
                            });
                        }
                    }
                }

                for arg in args {
                    self.check_expr(arg, locals, fun);
                }
            }
            Expr::Assign { target, value } => {
                let target_ok = matches!(
                    target.as_ref(),
                    Expr::Name(_)
                        | Expr::Binary {
                            op: crate::lang::ast::BinOp::Access,
                            ..
                        }
                );

                if !target_ok {
                    self.errors.push(SemanticError::InvalidAssignTarget {
                        function: fun.name.clone(),
                    });
                }

                self.check_expr(target, locals, fun);
                self.check_expr(value, locals, fun);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::Parser;

    fn check_src(src: &str) -> Result<(), SemanticErrors> {
        let decls = Parser::parse_source(src).unwrap();
        let natives = NativeRegistry::new();

        check(&decls, &natives)
    }

    #[test]
    fn test_valid_program_passes() {
        assert!(check_src(
            "fun add: [a, b] => { return a + b }
             fun main: [] => { return add(1, 2) - 3 }"
        )
        .is_ok());
    }

    #[test]
    fn test_undefined_name_rejected() {
        let errors = check_src("fun main: [] => { return missing }").unwrap_err();

        assert!(matches!(
            errors.errors[0],
            SemanticError::UndefinedName { ref name, .. } if name == "missing"
        ));
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let errors = check_src(
            "fun add: [a, b] => { return a + b }
             fun main: [] => { return add(1) }",
        )
        .unwrap_err();

        assert!(matches!(
            errors.errors[0],
            SemanticError::ArityMismatch {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_native_stub_arity_checked() {
        let errors = check_src(
            "native fun print: [x]
             fun main: [] => { print(1, 2) return 0 }",
        )
        .unwrap_err();

        assert!(matches!(
            errors.errors[0],
            SemanticError::ArityMismatch { expected: 1, got: 2, .. }
        ));
    }

    #[test]
    fn test_forward_call_allowed() {
        assert!(check_src(
            "fun main: [] => { return later(1) }
             fun later: [x] => { return x }"
        )
        .is_ok());
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let errors = check_src("fun main: [] => { break return 0 }").unwrap_err();

        assert!(matches!(
            errors.errors[0],
            SemanticError::BreakOutsideLoop { .. }
        ));
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let errors = check_src(
            "fun f: [] => { return 0 }
             fun f: [] => { return 1 }
             fun main: [] => { return 0 }",
        )
        .unwrap_err();

        assert!(matches!(
            errors.errors[0],
            SemanticError::Redefinition { ref name, .. } if name == "f"
        ));
    }

    #[test]
    fn test_shadowing_global_with_local_allowed() {
        assert!(check_src(
            "fun f: [] => { return 0 }
             fun main: [] => { def f = 1 return f - 1 }"
        )
        .is_ok());
    }

    #[test]
    fn test_invalid_assign_target_rejected() {
        let errors = check_src("fun main: [] => { 1 = 2 return 0 }").unwrap_err();

        assert!(matches!(
            errors.errors[0],
            SemanticError::InvalidAssignTarget { .. }
        ));
    }

    #[test]
    fn test_registered_native_without_stub_resolves() {
        let decls =
            Parser::parse_source("fun main: [] => { def x = 1 probe(x) return 0 }").unwrap();
        let mut natives = NativeRegistry::new();

        natives.register("probe", |_, _| true);

        assert!(check(&decls, &natives).is_ok());
    }
}
