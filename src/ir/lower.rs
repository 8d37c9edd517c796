use std::collections::HashMap;

use crate::ir::cfg::{Cfg, FullIr};
use crate::ir::lower_error::{LowerError, LowerErrors};
use crate::ir::step::{AbsAddress, AddrTag, Step, StepOp};
use crate::lang::ast::{BinOp, Expr, FunDecl, Stmt, UnaryOp};
use crate::lang::object::HeapObject;
use crate::lang::value::Value;
use crate::runtime::natives::NativeRegistry;

/// Lower a checked top-level AST into whole-program IR.
pub fn lower(decls: &[Stmt], natives: &NativeRegistry) -> Result<FullIr, LowerErrors> {
    Lowering::new(natives).run(decls)
}

/// Two-pass AST-to-IR conversion.
///
/// The prepass assigns every top-level function a fresh function id (and
/// captures `main`), so bodies emitted in the second pass can call forward
/// and mutually recursive functions without declaration order mattering.
pub struct Lowering<'n> {
    globals: HashMap<String, AbsAddress>,
    locals: HashMap<String, AbsAddress>,
    const_pool: HashMap<String, AbsAddress>,
    pending_links: Vec<(i32, i32)>,
    cfgs: Vec<Cfg>,
    constants: Vec<Value>,
    pre_objects: Vec<HeapObject>,
    natives: &'n NativeRegistry,
    errors: Vec<LowerError>,
    main_id: i32,
    next_fun_id: i16,
    next_temp: i16,
    prepassing: bool,
}

impl<'n> Lowering<'n> {
    pub fn new(natives: &'n NativeRegistry) -> Self {
        Self {
            globals: HashMap::new(),
            locals: HashMap::new(),
            const_pool: HashMap::new(),
            pending_links: Vec::new(),
            cfgs: Vec::new(),
            constants: Vec::new(),
            pre_objects: Vec::new(),
            natives,
            errors: Vec::new(),
            main_id: -1,
            next_fun_id: 0,
            next_temp: 0,
            prepassing: true,
        }
    }

    pub fn run(mut self, decls: &[Stmt]) -> Result<FullIr, LowerErrors> {
        for decl in decls {
            self.emit_stmt(decl);
        }

        self.prepassing = false;

        for decl in decls {
            self.emit_stmt(decl);
        }

        if !self.errors.is_empty() {
            return Err(LowerErrors {
                errors: self.errors,
            });
        }

        Ok(FullIr {
            cfgs: self.cfgs,
            constants: self.constants,
            pre_objects: self.pre_objects,
            main_id: self.main_id,
        })
    }

    fn report(&mut self, error: LowerError) {
        self.errors.push(error);
    }

    // =========================================================================
    // Address allocation and name resolution
    // =========================================================================

    fn gen_fun_addr(&mut self) -> AbsAddress {
        let id = self.next_fun_id;

        self.next_fun_id += 1;

        AbsAddress::immediate(id)
    }

    /// Fresh temporary in the current function's register window. The
    /// counter resets between functions; parameters take the first slots.
    fn gen_temp(&mut self) -> AbsAddress {
        let id = self.next_temp;

        self.next_temp += 1;

        AbsAddress::temp(id)
    }

    /// Intern a literal by its source lexeme; equal lexemes share one
    /// constant-pool slot.
    fn resolve_constant(&mut self, lexeme: &str, value: Value) -> AbsAddress {
        if let Some(addr) = self.const_pool.get(lexeme) {
            return *addr;
        }

        let addr = AbsAddress::constant(self.constants.len() as i16);

        self.constants.push(value);
        self.const_pool.insert(lexeme.to_string(), addr);

        addr
    }

    fn resolve_heap_object(&mut self, object: HeapObject) -> AbsAddress {
        let addr = AbsAddress::heap(self.pre_objects.len() as i16);

        self.pre_objects.push(object);

        addr
    }

    /// Use-site resolution order: native registry, then globals, then
    /// locals. Native ids come back `constant`-tagged, which is what makes
    /// `emit_call` pick `native_call` over `call`.
    fn lookup_name(&self, name: &str) -> Option<AbsAddress> {
        if let Some(native_id) = self.natives.id_of(name) {
            return Some(AbsAddress::constant(native_id as i16));
        }

        if let Some(addr) = self.globals.get(name) {
            return Some(*addr);
        }

        self.locals.get(name).copied()
    }

    // =========================================================================
    // Step emission plumbing
    // =========================================================================

    fn cfg(&mut self) -> &mut Cfg {
        self.cfgs.last_mut().expect("lowering emitted outside a function")
    }

    fn push_step(&mut self, step: Step) {
        self.cfg()
            .newest_mut()
            .expect("lowering emitted outside a block")
            .steps
            .push(step);
    }

    fn apply_pending_links(&mut self, function: &str) -> bool {
        let links = std::mem::take(&mut self.pending_links);
        let cfg = self.cfgs.last_mut().expect("no CFG for pending links");

        for (from, to) in links {
            if !cfg.link(from, to) {
                self.report(LowerError::BrokenFlow {
                    function: function.to_string(),
                });

                return false;
            }
        }

        true
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn emit_expr(&mut self, expr: &Expr) -> Option<AbsAddress> {
        match expr {
            Expr::Bool(b) => {
                let lexeme = if *b { "true" } else { "false" };

                Some(self.resolve_constant(lexeme, Value::Bool(*b)))
            }
            Expr::Char(c) => {
                let lexeme = format!("'{}'", *c as char);

                Some(self.resolve_constant(&lexeme, Value::Char(*c & 0x7f)))
            }
            Expr::Int { value, lexeme } => {
                Some(self.resolve_constant(lexeme, Value::Int(*value)))
            }
            Expr::Float { value, lexeme } => {
                Some(self.resolve_constant(lexeme, Value::Float(*value)))
            }
            Expr::Str(text) => Some(self.emit_string(text)),
            Expr::Name(name) => {
                let found = self.lookup_name(name);

                if found.is_none() {
                    self.report(LowerError::UndefinedName(name.clone()));
                }

                found
            }
            Expr::Seq { items, is_tuple } => self.emit_sequence(items, *is_tuple),
            Expr::Unary { op, inner } => self.emit_unary(*op, inner),
            Expr::Binary { op, left, right } => self.emit_binary(*op, left, right),
            Expr::Call { callee, args } => self.emit_call(callee, args),
            Expr::Assign { target, value } => self.emit_assign(target, value),
        }
    }

    /// String literals preload a heap object; `make_str` clones it into a
    /// fresh runtime string at execution time.
    fn emit_string(&mut self, text: &str) -> AbsAddress {
        let dest = self.gen_temp();
        let object_addr = self.resolve_heap_object(HeapObject::new_str(text));

        self.push_step(Step::Binary {
            arg0: dest,
            arg1: object_addr,
            op: StepOp::MakeStr,
        });

        dest
    }

    fn emit_sequence(&mut self, items: &[Expr], is_tuple: bool) -> Option<AbsAddress> {
        let seq_addr = self.gen_temp();

        self.push_step(Step::Unary {
            arg0: seq_addr,
            op: StepOp::MakeSeq,
        });

        for item in items {
            let item_addr = self.emit_expr(item)?;

            // Push to the back so construction preserves source order.
            self.push_step(Step::Ternary {
                arg0: seq_addr,
                arg1: item_addr,
                arg2: AbsAddress::immediate(1),
                op: StepOp::SeqPush,
            });
        }

        if is_tuple {
            self.push_step(Step::Unary {
                arg0: seq_addr,
                op: StepOp::FreezeSeq,
            });
        }

        Some(seq_addr)
    }

    fn emit_unary(&mut self, op: UnaryOp, inner: &Expr) -> Option<AbsAddress> {
        let inner_addr = self.emit_expr(inner)?;

        match op {
            UnaryOp::Neg => {
                self.push_step(Step::TacUnary {
                    dest: inner_addr,
                    arg0: inner_addr,
                    op: StepOp::Neg,
                });

                Some(inner_addr)
            }
        }
    }

    fn emit_binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Option<AbsAddress> {
        let lhs = self.emit_expr(left)?;
        let rhs = self.emit_expr(right)?;

        if op == BinOp::Access {
            let dest = self.gen_temp();

            self.push_step(Step::Ternary {
                arg0: dest,
                arg1: lhs,
                arg2: rhs,
                op: StepOp::SeqGet,
            });

            return Some(dest);
        }

        let step_op = match op {
            BinOp::Mul => StepOp::Mul,
            BinOp::Div => StepOp::Div,
            BinOp::Mod => StepOp::Mod,
            BinOp::Add => StepOp::Add,
            BinOp::Sub => StepOp::Sub,
            BinOp::Equ => StepOp::Equ,
            BinOp::Neq => StepOp::Neq,
            BinOp::Lt => StepOp::Lt,
            BinOp::Gt => StepOp::Gt,
            BinOp::Lte => StepOp::Lte,
            BinOp::Gte => StepOp::Gte,
            BinOp::Access => unreachable!("access handled above"),
        };

        let dest = self.gen_temp();

        self.push_step(Step::TacBinary {
            dest,
            arg0: lhs,
            arg1: rhs,
            op: step_op,
        });

        Some(dest)
    }

    /// Calls copy each argument into a fresh temp so the top `argc`
    /// registers of the caller's window hold the arguments in order. The
    /// call result lands in the temp at `next_temp - argc`.
    fn emit_call(&mut self, callee: &Expr, args: &[Expr]) -> Option<AbsAddress> {
        let callee_addr = self.emit_expr(callee)?;
        let argc = args.len() as i16;

        for arg in args {
            let arg_addr = self.emit_expr(arg)?;
            let arg_slot = self.gen_temp();

            self.push_step(Step::TacUnary {
                dest: arg_slot,
                arg0: arg_addr,
                op: StepOp::Nop,
            });
        }

        let result_slot = AbsAddress::temp(self.next_temp - argc);

        // A function-id callee means a user function; anything else is a
        // native-registry id.
        let call_op = if callee_addr.tag == AddrTag::Immediate {
            StepOp::Call
        } else {
            StepOp::NativeCall
        };

        self.push_step(Step::Binary {
            arg0: AbsAddress::immediate(callee_addr.id),
            arg1: AbsAddress::immediate(argc),
            op: call_op,
        });

        Some(result_slot)
    }

    fn emit_assign(&mut self, target: &Expr, value: &Expr) -> Option<AbsAddress> {
        let target_addr = self.emit_expr(target)?;
        let value_addr = self.emit_expr(value)?;

        self.push_step(Step::TacUnary {
            dest: target_addr,
            arg0: value_addr,
            op: StepOp::Nop,
        });

        Some(target_addr)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn emit_stmt(&mut self, stmt: &Stmt) -> bool {
        match stmt {
            Stmt::Function(fun) => self.emit_function(fun),
            Stmt::NativeStub { .. } => true,
            Stmt::Import(_) => true,
            _ if self.prepassing => true,
            Stmt::Expr(expr) => self.emit_expr(expr).is_some(),
            Stmt::Def { name, init } => self.emit_def(name, init),
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => self.emit_if(cond, then_body, else_body.as_deref()),
            Stmt::Return(expr) => self.emit_return(expr),
            Stmt::While { check, body } => self.emit_while(check, body),
            Stmt::Break => self.emit_break(),
        }
    }

    fn emit_def(&mut self, name: &str, init: &Expr) -> bool {
        let Some(init_addr) = self.emit_expr(init) else {
            return false;
        };

        let dest = self.gen_temp();

        self.push_step(Step::TacUnary {
            dest,
            arg0: init_addr,
            op: StepOp::Nop,
        });

        if self.locals.contains_key(name) {
            self.report(LowerError::Redefinition(name.to_string()));
            return false;
        }

        self.locals.insert(name.to_string(), dest);

        true
    }

    /// Opens a fresh basic block, lowers the statements into it, and
    /// returns the entry block id. Nested control flow may leave a
    /// different block newest; callers that need the exit read
    /// `cfg.newest_id()` afterwards.
    fn emit_block(&mut self, stmts: &[Stmt]) -> Option<i32> {
        let entry_id = self.cfg().add_block();

        for stmt in stmts {
            if !self.emit_stmt(stmt) {
                return None;
            }
        }

        Some(entry_id)
    }

    /// If / if-else shape:
    ///
    ///     (pre) cond, jump_else -> (then) ... -+
    ///        \_______________ (else?) ... _____+-> (post)
    ///
    /// The jump targets stay 0 here; the emitter patches them from the
    /// meta markers.
    fn emit_if(&mut self, cond: &Expr, then_body: &[Stmt], else_body: Option<&[Stmt]>) -> bool {
        let pre_id = self.cfg().newest_id();

        self.push_step(Step::Nonary {
            op: StepOp::MetaBeginIfElse,
        });

        let Some(cond_addr) = self.emit_expr(cond) else {
            return false;
        };

        self.push_step(Step::Binary {
            arg0: cond_addr,
            arg1: AbsAddress::immediate(0),
            op: StepOp::JumpElse,
        });
        self.push_step(Step::Nonary {
            op: StepOp::MetaMarkIfElseCheck,
        });

        let Some(then_entry) = self.emit_block(then_body) else {
            return false;
        };

        self.pending_links.push((pre_id, then_entry));

        if let Some(else_stmts) = else_body {
            // The truthy body skips the alternative with a patched jump.
            self.push_step(Step::Unary {
                arg0: AbsAddress::immediate(0),
                op: StepOp::Jump,
            });
            self.push_step(Step::Nonary {
                op: StepOp::MetaMarkIfElseAlt,
            });
            self.push_step(Step::Nonary { op: StepOp::Nop });

            let Some(else_entry) = self.emit_block(else_stmts) else {
                return false;
            };

            self.push_step(Step::Nonary { op: StepOp::Nop });
            self.push_step(Step::Nonary {
                op: StepOp::MetaEndIfElse,
            });

            let else_exit = self.cfg().newest_id();

            self.pending_links.push((pre_id, else_entry));

            let post_id = self.cfg().add_block();

            self.pending_links.push((else_exit, post_id));
        } else {
            let then_exit = self.cfg().newest_id();
            let post_id = self.cfg().add_block();

            self.push_step(Step::Nonary { op: StepOp::Nop });
            self.push_step(Step::Nonary {
                op: StepOp::MetaEndIfElse,
            });

            self.pending_links.push((then_exit, post_id));
            self.pending_links.push((pre_id, post_id));
        }

        true
    }

    fn emit_return(&mut self, expr: &Expr) -> bool {
        let Some(result_addr) = self.emit_expr(expr) else {
            return false;
        };

        self.push_step(Step::Unary {
            arg0: result_addr,
            op: StepOp::Ret,
        });

        true
    }

    /// While shape:
    ///
    ///     (pre) nop, check, jump_else -> (body) ... jump back
    ///        \-> (post)
    ///
    /// The leading nop is the loop-start marker the emitter points
    /// continues and the back-jump at.
    fn emit_while(&mut self, check: &Expr, body: &[Stmt]) -> bool {
        let pre_id = self.cfg().newest_id();

        self.push_step(Step::Nonary {
            op: StepOp::MetaBeginWhile,
        });
        self.push_step(Step::Nonary { op: StepOp::Nop });

        let Some(check_addr) = self.emit_expr(check) else {
            return false;
        };

        self.push_step(Step::Binary {
            arg0: check_addr,
            arg1: AbsAddress::immediate(0),
            op: StepOp::JumpElse,
        });
        self.push_step(Step::Nonary {
            op: StepOp::MetaMarkWhileCheck,
        });

        let Some(body_entry) = self.emit_block(body) else {
            return false;
        };

        self.push_step(Step::Unary {
            arg0: AbsAddress::immediate(0),
            op: StepOp::Jump,
        });
        self.push_step(Step::Nonary {
            op: StepOp::MetaMarkContinue,
        });

        let body_exit = self.cfg().newest_id();

        self.pending_links.push((body_exit, pre_id));
        self.pending_links.push((pre_id, body_entry));

        let post_id = self.cfg().add_block();

        self.push_step(Step::Nonary { op: StepOp::Nop });
        self.push_step(Step::Nonary {
            op: StepOp::MetaEndWhile,
        });

        self.pending_links.push((pre_id, post_id));

        true
    }

    fn emit_break(&mut self) -> bool {
        self.push_step(Step::Unary {
            arg0: AbsAddress::immediate(0),
            op: StepOp::Jump,
        });
        self.push_step(Step::Nonary {
            op: StepOp::MetaMarkBreak,
        });

        true
    }

    fn emit_function(&mut self, fun: &FunDecl) -> bool {
        if self.prepassing {
            let fun_addr = self.gen_fun_addr();

            if fun.name == "main" && self.main_id == -1 {
                self.main_id = fun_addr.id as i32;
            }

            if self.globals.contains_key(&fun.name) {
                self.report(LowerError::Redefinition(fun.name.clone()));
                return false;
            }

            self.globals.insert(fun.name.clone(), fun_addr);

            return true;
        }

        self.cfgs.push(Cfg::new());

        let mut ok = true;

        for param in &fun.params {
            let param_addr = self.gen_temp();

            if self.locals.contains_key(param) {
                self.report(LowerError::Redefinition(param.clone()));
                ok = false;
                break;
            }

            self.locals.insert(param.clone(), param_addr);
        }

        if ok {
            ok = self.emit_block(&fun.body).is_some();
        }

        if ok {
            ok = self.apply_pending_links(&fun.name);
        }

        self.locals.clear();
        self.pending_links.clear();
        self.next_temp = 0;

        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::Parser;

    fn lower_source(src: &str) -> FullIr {
        let decls = Parser::parse_source(src).unwrap();
        let natives = NativeRegistry::new();

        lower(&decls, &natives).unwrap()
    }

    fn lower_source_with_native(src: &str, name: &str) -> FullIr {
        let decls = Parser::parse_source(src).unwrap();
        let mut natives = NativeRegistry::new();

        natives.register(name, |_, _| true);

        lower(&decls, &natives).unwrap()
    }

    /// Every non-(-1) successor id in every CFG names a real block.
    fn assert_edges_valid(ir: &FullIr) {
        for cfg in &ir.cfgs {
            for block in cfg.blocks() {
                for succ in [block.truthy_id, block.falsy_id] {
                    assert!(
                        succ == -1 || (succ >= 0 && succ < cfg.block_count()),
                        "successor {} out of range",
                        succ
                    );
                }
            }
        }
    }

    /// Every begin marker is balanced by exactly one end marker per CFG.
    fn assert_markers_paired(ir: &FullIr) {
        for cfg in &ir.cfgs {
            let mut while_depth = 0i32;
            let mut if_depth = 0i32;

            for block in cfg.blocks() {
                for step in &block.steps {
                    match step.op() {
                        StepOp::MetaBeginWhile => while_depth += 1,
                        StepOp::MetaEndWhile => while_depth -= 1,
                        StepOp::MetaBeginIfElse => if_depth += 1,
                        StepOp::MetaEndIfElse => if_depth -= 1,
                        _ => {}
                    }
                }
            }

            assert_eq!(while_depth, 0, "unbalanced while markers");
            assert_eq!(if_depth, 0, "unbalanced if markers");
        }
    }

    #[test]
    fn test_main_id_captured() {
        let ir = lower_source("fun helper: [] => { return 0 } fun main: [] => { return 0 }");

        assert_eq!(ir.cfgs.len(), 2);
        assert_eq!(ir.main_id, 1);
    }

    #[test]
    fn test_missing_main_is_minus_one() {
        let ir = lower_source("fun helper: [] => { return 0 }");

        assert_eq!(ir.main_id, -1);
    }

    #[test]
    fn test_constant_dedup_by_lexeme() {
        let ir = lower_source("fun main: [] => { return 2 + 2 + 2 }");

        // One pool slot for "2" no matter how often it appears.
        assert_eq!(ir.constants, vec![Value::Int(2)]);
    }

    #[test]
    fn test_distinct_lexemes_not_merged() {
        let ir = lower_source("fun main: [] => { return 1.0 + 1.00 }");

        assert_eq!(ir.constants.len(), 2);
    }

    #[test]
    fn test_string_literal_preloads_object() {
        let ir = lower_source_with_native(
            "native fun print: [x] fun main: [] => { print(\"hi\") return 0 }",
            "print",
        );

        assert_eq!(ir.pre_objects.len(), 1);
        assert_eq!(ir.pre_objects[0].as_text().as_deref(), Some("hi"));
    }

    #[test]
    fn test_undefined_name_reported() {
        let decls = Parser::parse_source("fun main: [] => { return nope }").unwrap();
        let natives = NativeRegistry::new();
        let result = lower(&decls, &natives);

        let errors = result.unwrap_err();

        assert!(matches!(
            errors.errors[0],
            LowerError::UndefinedName(ref n) if n == "nope"
        ));
    }

    #[test]
    fn test_local_redefinition_rejected() {
        let decls =
            Parser::parse_source("fun main: [] => { def x = 1 def x = 2 return 0 }").unwrap();
        let natives = NativeRegistry::new();

        assert!(lower(&decls, &natives).is_err());
    }

    #[test]
    fn test_forward_reference_allowed() {
        // `main` calls `later`, declared afterwards; the prepass makes it
        // resolvable.
        let ir = lower_source(
            "fun main: [] => { return later(1) } fun later: [x] => { return x }",
        );

        assert_eq!(ir.cfgs.len(), 2);
        assert_edges_valid(&ir);
    }

    #[test]
    fn test_call_result_slot_convention() {
        let ir = lower_source(
            "fun id: [x] => { return x } fun main: [] => { return id(5) }",
        );

        // main: constant 5 moved into temp 0, call, return temp 0.
        let main_cfg = &ir.cfgs[1];
        let steps = &main_cfg.get(0).unwrap().steps;

        let call = steps
            .iter()
            .find(|s| s.op() == StepOp::Call)
            .expect("call step");

        match call {
            Step::Binary { arg0, arg1, .. } => {
                assert_eq!(arg0.tag, AddrTag::Immediate);
                assert_eq!(arg0.id, 0); // function id of `id`
                assert_eq!(arg1.id, 1); // argc
            }
            other => panic!("unexpected call shape {:?}", other),
        }

        let ret = steps.iter().find(|s| s.op() == StepOp::Ret).expect("ret");

        match ret {
            Step::Unary { arg0, .. } => {
                assert_eq!(arg0.tag, AddrTag::Temp);
                assert_eq!(arg0.id, 0);
            }
            other => panic!("unexpected ret shape {:?}", other),
        }
    }

    #[test]
    fn test_native_call_selected_for_registry_names() {
        let ir = lower_source_with_native(
            "native fun print: [x] fun main: [] => { print(1) return 0 }",
            "print",
        );

        let steps = &ir.cfgs[0].get(0).unwrap().steps;

        assert!(steps.iter().any(|s| s.op() == StepOp::NativeCall));
        assert!(!steps.iter().any(|s| s.op() == StepOp::Call));
    }

    #[test]
    fn test_while_cfg_shape() {
        let ir = lower_source(
            "fun main: [] => { def i = 0 while i < 5 { i = i + 1 } return i }",
        );

        let cfg = &ir.cfgs[0];

        // pre, body, post
        assert_eq!(cfg.block_count(), 3);

        let pre = cfg.get(0).unwrap();

        assert_eq!(pre.truthy_id, 1);
        assert_eq!(pre.falsy_id, 2);

        // Loop back-edge.
        assert_eq!(cfg.get(1).unwrap().truthy_id, 0);

        assert_markers_paired(&ir);
    }

    #[test]
    fn test_if_else_cfg_shape() {
        let ir = lower_source(
            "fun main: [] => { if 1 { return 1 } else { return 2 } return 0 }",
        );

        let cfg = &ir.cfgs[0];

        // pre, then, else, post
        assert_eq!(cfg.block_count(), 4);

        let pre = cfg.get(0).unwrap();

        assert_eq!(pre.truthy_id, 1);
        assert_eq!(pre.falsy_id, 2);
        assert_eq!(cfg.get(2).unwrap().truthy_id, 3);
        assert_edges_valid(&ir);
    }

    #[test]
    fn test_if_inside_while_links_cleanly() {
        // The loop body opens with a nested construct; the back-edge must
        // come from the body's exit block, not its entry.
        let ir = lower_source(
            "fun main: [] => { def i = 0 while 1 { if i == 3 { break } i = i + 1 } return i - 3 }",
        );

        assert_edges_valid(&ir);
        assert_markers_paired(&ir);
    }

    #[test]
    fn test_tuple_literal_freezes() {
        let ir = lower_source("fun main: [] => { def t = [1, 2] return 0 }");

        let steps = &ir.cfgs[0].get(0).unwrap().steps;
        let ops: Vec<StepOp> = steps.iter().map(|s| s.op()).collect();

        let make_at = ops.iter().position(|o| *o == StepOp::MakeSeq).unwrap();
        let freeze_at = ops.iter().position(|o| *o == StepOp::FreezeSeq).unwrap();
        let pushes = ops.iter().filter(|o| **o == StepOp::SeqPush).count();

        assert!(make_at < freeze_at);
        assert_eq!(pushes, 2);
    }

    #[test]
    fn test_loops_carry_meta_markers_in_ir() {
        // Markers exist only between lowering and emission; here they
        // must still be present so the emitter has something to patch.
        let ir = lower_source("fun main: [] => { while 1 { break } return 0 }");

        let meta_count: usize = ir.cfgs[0]
            .blocks()
            .iter()
            .flat_map(|block| block.steps.iter())
            .filter(|step| step.is_meta())
            .count();

        // begin_while, mark_while_check, mark_break, mark_continue,
        // end_while.
        assert_eq!(meta_count, 5);
    }

    #[test]
    fn test_mutable_sequence_does_not_freeze() {
        let ir = lower_source("fun main: [] => { def s = {1, 2} return 0 }");

        let steps = &ir.cfgs[0].get(0).unwrap().steps;

        assert!(!steps.iter().any(|s| s.op() == StepOp::FreezeSeq));
    }

    #[test]
    fn test_params_bound_to_first_temps() {
        let ir = lower_source("fun two: [a, b] => { return b } fun main: [] => { return 0 }");

        let steps = &ir.cfgs[0].get(0).unwrap().steps;

        // return b: b is the second parameter, temp 1.
        match steps.last().unwrap() {
            Step::Unary { arg0, op: StepOp::Ret } => {
                assert_eq!(arg0.tag, AddrTag::Temp);
                assert_eq!(arg0.id, 1);
            }
            other => panic!("unexpected tail step {:?}", other),
        }
    }
}
