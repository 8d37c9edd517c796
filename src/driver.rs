use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::bytecode::emit::emit;
use crate::bytecode::emit_error::EmitError;
use crate::bytecode::op::Program;
use crate::frontend::parse_error::ParseError;
use crate::frontend::parser::Parser;
use crate::ir::cfg::FullIr;
use crate::ir::lower::lower;
use crate::ir::lower_error::LowerErrors;
use crate::lang::ast::Stmt;
use crate::runtime::natives::{NativeProc, NativeRegistry};
use crate::runtime::status::ExecStatus;
use crate::runtime::vm::{Engine, EngineConfig};
use crate::semantics::analyzer;
use crate::semantics::analyzer::SemanticErrors;

/// Failure from any compilation stage.
#[derive(Debug)]
pub enum DriverError {
    Io { path: PathBuf, message: String },
    Parse(ParseError),
    Semantic(SemanticErrors),
    Lower(LowerErrors),
    Emit(EmitError),
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::Io { path, message } => {
                write!(f, "cannot read '{}': {}", path.display(), message)
            }
            DriverError::Parse(error) => write!(f, "{}", error),
            DriverError::Semantic(errors) => write!(f, "{}", errors),
            DriverError::Lower(errors) => write!(f, "{}", errors),
            DriverError::Emit(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<ParseError> for DriverError {
    fn from(error: ParseError) -> Self {
        DriverError::Parse(error)
    }
}

impl From<SemanticErrors> for DriverError {
    fn from(errors: SemanticErrors) -> Self {
        DriverError::Semantic(errors)
    }
}

impl From<LowerErrors> for DriverError {
    fn from(errors: LowerErrors) -> Self {
        DriverError::Lower(errors)
    }
}

impl From<EmitError> for DriverError {
    fn from(error: EmitError) -> Self {
        DriverError::Emit(error)
    }
}

/// Owns the native registry and wires the pipeline together:
/// sources -> AST -> semantic check -> IR -> Program -> execution.
pub struct Driver {
    natives: NativeRegistry,
    config: EngineConfig,
}

impl Driver {
    /// An empty driver: no natives registered.
    pub fn new() -> Self {
        Self {
            natives: NativeRegistry::new(),
            config: EngineConfig::default(),
        }
    }

    /// A driver with the whole intrinsic library registered.
    pub fn with_default_natives() -> Self {
        let mut driver = Self::new();

        crate::stdlib::register_all(&mut driver.natives);

        driver
    }

    pub fn register_native(&mut self, name: &str, proc: NativeProc) -> bool {
        self.natives.register(name, proc)
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    pub fn set_engine_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    // =========================================================================
    // Source loading
    // =========================================================================

    /// Load a file and, depth-first, everything it imports. Each file is
    /// loaded at most once; import paths resolve relative to the
    /// importing file and default to the `.wsp` extension.
    pub fn load_sources(&self, entry: &Path) -> Result<Vec<Stmt>, DriverError> {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut decls = Vec::new();

        self.load_file_recursive(entry, &mut visited, &mut decls)?;

        Ok(decls)
    }

    fn load_file_recursive(
        &self,
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        decls: &mut Vec<Stmt>,
    ) -> Result<(), DriverError> {
        let mut path_buf = path.to_path_buf();

        if path_buf.extension().is_none() {
            path_buf.set_extension("wsp");
        }

        let canonical = path_buf.canonicalize().map_err(|e| DriverError::Io {
            path: path_buf.clone(),
            message: e.to_string(),
        })?;

        // Already included: nothing to do (this also breaks import
        // cycles).
        if !visited.insert(canonical.clone()) {
            return Ok(());
        }

        let source = std::fs::read_to_string(&canonical).map_err(|e| DriverError::Io {
            path: canonical.clone(),
            message: e.to_string(),
        })?;

        let unit = Parser::parse_source(&source)?;

        let base_dir = canonical.parent().unwrap_or_else(|| Path::new("."));

        // Imports first, depth-first, then this unit's own declarations.
        for decl in &unit {
            if let Stmt::Import(target) = decl {
                self.load_file_recursive(&base_dir.join(target), visited, decls)?;
            }
        }

        decls.extend(unit);

        Ok(())
    }

    // =========================================================================
    // Compilation
    // =========================================================================

    /// Compile a single in-memory source unit (no import resolution).
    pub fn compile_source(&self, source: &str) -> Result<Program, DriverError> {
        let decls = Parser::parse_source(source)?;

        self.compile_decls(&decls)
    }

    pub fn compile_file(&self, path: &Path) -> Result<Program, DriverError> {
        let decls = self.load_sources(path)?;

        self.compile_decls(&decls)
    }

    fn compile_decls(&self, decls: &[Stmt]) -> Result<Program, DriverError> {
        analyzer::check(decls, &self.natives)?;

        let ir = lower(decls, &self.natives)?;

        Ok(emit(ir)?)
    }

    /// Compile and stop at the IR, for dump tooling.
    pub fn lower_source(&self, source: &str) -> Result<FullIr, DriverError> {
        let decls = Parser::parse_source(source)?;

        analyzer::check(&decls, &self.natives)?;

        Ok(lower(&decls, &self.natives)?)
    }

    pub fn lower_file(&self, path: &Path) -> Result<FullIr, DriverError> {
        let decls = self.load_sources(path)?;

        analyzer::check(&decls, &self.natives)?;

        Ok(lower(&decls, &self.natives)?)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    pub fn run_program(&self, program: Program, args: Vec<String>) -> ExecStatus {
        let mut engine = Engine::new(self.config.clone(), program, &self.natives, args);

        engine.run()
    }

    pub fn run_source(&self, source: &str, args: Vec<String>) -> Result<ExecStatus, DriverError> {
        let program = self.compile_source(source)?;

        Ok(self.run_program(program, args))
    }

    pub fn run_file(&self, path: &Path, args: Vec<String>) -> Result<ExecStatus, DriverError> {
        let program = self.compile_file(path)?;

        Ok(self.run_program(program, args))
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> ExecStatus {
        Driver::with_default_natives()
            .run_source(src, Vec::new())
            .unwrap()
    }

    // =========================================================================
    // End-to-end scenarios
    // =========================================================================

    #[test]
    fn test_s1_arithmetic() {
        assert_eq!(
            run("fun main: [] => { return 2 + 3 * 4 - 14 }"),
            ExecStatus::Ok
        );
        assert_eq!(
            run("fun main: [] => { return 2 + 3 * 4 }"),
            ExecStatus::UserError
        );
    }

    #[test]
    fn test_s2_while_loop() {
        let src = "fun main: [] => {
            def i = 0
            def s = 0
            while i < 5 {
                s = s + i
                i = i + 1
            }
            return s - 10
        }";

        assert_eq!(run(src), ExecStatus::Ok);
    }

    #[test]
    fn test_s3_break() {
        let src = "fun main: [] => {
            def i = 0
            while 1 {
                if i == 3 {
                    break
                }
                i = i + 1
            }
            return i - 3
        }";

        assert_eq!(run(src), ExecStatus::Ok);
    }

    #[test]
    fn test_s4_tuple_access() {
        let src = "fun main: [] => {
            def t = [10, 20, 30]
            return t.1 - 20
        }";

        assert_eq!(run(src), ExecStatus::Ok);
    }

    #[test]
    fn test_s5_recursion() {
        let src = "fun fact: [n] => {
            if n <= 1 {
                return 1
            }
            return n * fact(n - 1)
        }
        fun main: [] => {
            return fact(5) - 120
        }";

        assert_eq!(run(src), ExecStatus::Ok);
    }

    #[test]
    fn test_s6_native_call_with_string() {
        let src = "native fun print: [x]
        fun main: [] => {
            print(\"hi\")
            return 0
        }";

        assert_eq!(run(src), ExecStatus::Ok);
    }

    #[test]
    fn test_s7_division_by_zero() {
        assert_eq!(
            run("fun main: [] => { return 1 / 0 }"),
            ExecStatus::MathError
        );
    }

    // =========================================================================
    // Stage wiring
    // =========================================================================

    #[test]
    fn test_parse_failure_surfaces() {
        let driver = Driver::with_default_natives();
        let result = driver.run_source("fun main: [] => {", Vec::new());

        assert!(matches!(result, Err(DriverError::Parse(_))));
    }

    #[test]
    fn test_semantic_failure_surfaces() {
        let driver = Driver::with_default_natives();
        let missing = driver.run_source("fun main: [] => { return nope }", Vec::new());

        assert!(matches!(missing, Err(DriverError::Semantic(_))));

        let bad_arity = driver.run_source(
            "fun f: [a] => { return a }
             fun main: [] => { return f(1, 2) }",
            Vec::new(),
        );

        assert!(matches!(bad_arity, Err(DriverError::Semantic(_))));
    }

    #[test]
    fn test_missing_main_is_setup_error() {
        assert_eq!(
            run("fun helper: [] => { return 0 }"),
            ExecStatus::SetupError
        );
    }

    #[test]
    fn test_intrinsic_list_roundtrip() {
        let src = "native fun len_of: [s]
        native fun list_push_back: [s, x]
        native fun list_pop_front: [s]
        fun main: [] => {
            def s = {1, 2}
            list_push_back(s, 3)
            def first = list_pop_front(s)
            return len_of(s) + first - 3
        }";

        assert_eq!(run(src), ExecStatus::Ok);
    }

    #[test]
    fn test_intrinsic_strings() {
        let src = "native fun strlen: [s]
        native fun strcat: [a, b]
        fun main: [] => {
            def a = \"foo\"
            def b = \"bar\"
            strcat(a, b)
            return strlen(a) - 6
        }";

        assert_eq!(run(src), ExecStatus::Ok);
    }

    #[test]
    fn test_intrinsic_substr_and_stoi() {
        let src = "native fun substr: [s, b, n]
        native fun stoi: [s]
        fun main: [] => {
            def digits = \"12345x\"
            def head = substr(digits, 0, 2)
            return stoi(head) - 12
        }";

        assert_eq!(run(src), ExecStatus::Ok);
    }

    #[test]
    fn test_intrinsic_get_argv() {
        let src = "native fun get_argv: []
        native fun len_of: [s]
        fun main: [] => {
            def x = 0
            def args = get_argv()
            return len_of(args) - 2
        }";

        let driver = Driver::with_default_natives();
        let status = driver
            .run_source(src, vec!["a".to_string(), "b".to_string()])
            .unwrap();

        assert_eq!(status, ExecStatus::Ok);
    }

    #[test]
    fn test_pushing_to_frozen_tuple_fails() {
        let src = "native fun list_push_back: [s, x]
        fun main: [] => {
            def t = [1, 2]
            list_push_back(t, 3)
            return 0
        }";

        assert_eq!(run(src), ExecStatus::OpError);
    }

    #[test]
    fn test_import_resolution() {
        let dir = std::env::temp_dir().join("wisp_driver_import_test");

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("util.wsp"),
            "fun triple: [x] => { return x * 3 }",
        )
        .unwrap();
        std::fs::write(
            dir.join("main.wsp"),
            "import \"util\"\nfun main: [] => { return triple(4) - 12 }",
        )
        .unwrap();

        let driver = Driver::with_default_natives();
        let status = driver.run_file(&dir.join("main.wsp"), Vec::new()).unwrap();

        assert_eq!(status, ExecStatus::Ok);
    }

    #[test]
    fn test_duplicate_import_loads_once() {
        let dir = std::env::temp_dir().join("wisp_driver_dup_import_test");

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("shared.wsp"), "fun one: [x] => { return 1 }").unwrap();
        std::fs::write(
            dir.join("a.wsp"),
            "import \"shared\"\nfun a_fn: [x] => { return one(x) }",
        )
        .unwrap();
        std::fs::write(
            dir.join("entry.wsp"),
            "import \"a\"\nimport \"shared\"\nfun main: [] => { return a_fn(0) - one(0) }",
        )
        .unwrap();

        let driver = Driver::with_default_natives();
        let decls = driver.load_sources(&dir.join("entry.wsp")).unwrap();

        // `one` appears exactly once even though shared is imported twice.
        let ones = decls
            .iter()
            .filter(|d| matches!(d, Stmt::Function(f) if f.name == "one"))
            .count();

        assert_eq!(ones, 1);

        let status = driver.run_file(&dir.join("entry.wsp"), Vec::new()).unwrap();

        assert_eq!(status, ExecStatus::Ok);
    }

    #[test]
    fn test_engine_config_limits_apply() {
        let mut driver = Driver::with_default_natives();

        driver.set_engine_config(EngineConfig {
            reg_buffer_limit: 8192,
            call_frame_max: 8,
        });

        let status = driver
            .run_source(
                "fun spin: [n] => { return spin(n + 1) }
                 fun main: [] => { return spin(0) }",
                Vec::new(),
            )
            .unwrap();

        assert_eq!(status, ExecStatus::MemError);
    }

    #[test]
    fn test_lower_source_exposes_ir() {
        let driver = Driver::with_default_natives();
        let ir = driver
            .lower_source("fun main: [] => { return 0 }")
            .unwrap();

        assert_eq!(ir.cfgs.len(), 1);
        assert_eq!(ir.main_id, 0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let driver = Driver::with_default_natives();
        let result = driver.compile_file(Path::new("/nonexistent/nowhere.wsp"));

        assert!(matches!(result, Err(DriverError::Io { .. })));
    }
}
