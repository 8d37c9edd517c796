use std::collections::HashSet;

use crate::bytecode::emit_error::EmitError;
use crate::bytecode::op::{ArgMode, Chunk, Instruction, Opcode, Program};
use crate::ir::cfg::{Cfg, FullIr, NO_BLOCK};
use crate::ir::step::{AbsAddress, AddrTag, Step, StepOp};

/// Linearize whole-program IR into an executable `Program`.
pub fn emit(ir: FullIr) -> Result<Program, EmitError> {
    Emitter::new().run(ir)
}

/// An `if`/`else` being patched: instruction indices of the conditional
/// jump, the truthy body's closing jump (-1 while absent), and the end.
struct ActiveIfElse {
    check_ip: i32,
    alt_ip: i32,
}

/// A `while` being patched: the loop-start instruction index, the check
/// jump, and every break/continue jump seen in the body.
struct ActiveLoop {
    start_ip: i32,
    check_ip: i32,
    break_ips: Vec<i32>,
    continue_ips: Vec<i32>,
}

/// Chunk emitter. Walks each CFG depth-first (truthy side first), turning
/// every non-meta step into exactly one instruction; meta markers mutate
/// the two patch stacks instead of emitting, so none survive emission.
pub struct Emitter {
    chunks: Vec<Chunk>,
    active_ifs: Vec<ActiveIfElse>,
    active_loops: Vec<ActiveLoop>,
    current_cfg: usize,
}

/// Operand translation: each abstract tag has exactly one arg mode.
fn translate_addr(addr: AbsAddress) -> (i16, ArgMode) {
    let mode = match addr.tag {
        AddrTag::Immediate => ArgMode::Immediate,
        AddrTag::Constant => ArgMode::Constant,
        AddrTag::Temp => ArgMode::Reg,
        AddrTag::Heap => ArgMode::Heap,
    };

    (addr.id, mode)
}

impl Emitter {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            active_ifs: Vec::new(),
            active_loops: Vec::new(),
            current_cfg: 0,
        }
    }

    pub fn run(mut self, ir: FullIr) -> Result<Program, EmitError> {
        for (cfg_index, cfg) in ir.cfgs.iter().enumerate() {
            self.current_cfg = cfg_index;
            self.emit_chunk(cfg)?;
        }

        let entry_id = if ir.main_id >= 0 {
            Some(ir.main_id as i16)
        } else {
            None
        };

        Ok(Program {
            chunks: self.chunks,
            constants: ir.constants,
            pre_objects: ir.pre_objects,
            entry_id,
        })
    }

    fn chunk(&mut self) -> &mut Chunk {
        self.chunks.last_mut().expect("emitting outside a chunk")
    }

    fn last_ip(&mut self) -> i32 {
        self.chunk().len() as i32 - 1
    }

    fn push_inst(&mut self, op: Opcode, args: [i16; 3], modes: &[ArgMode]) {
        let inst = Instruction::new(op, args, modes);

        self.chunk().push(inst);
    }

    fn untranslatable(&self, op: StepOp) -> EmitError {
        EmitError::UntranslatableStep {
            cfg: self.current_cfg,
            op: op.name(),
        }
    }

    fn stray_marker(&self, op: StepOp) -> EmitError {
        EmitError::MarkerOutsideConstruct {
            cfg: self.current_cfg,
            op: op.name(),
        }
    }

    // =========================================================================
    // Chunk traversal
    // =========================================================================

    fn emit_chunk(&mut self, cfg: &Cfg) -> Result<(), EmitError> {
        let mut visited: HashSet<i32> = HashSet::new();
        let mut frontier: Vec<i32> = vec![0];

        self.chunks.push(Chunk::new());

        while let Some(block_id) = frontier.pop() {
            if visited.contains(&block_id) {
                continue;
            }

            let Some(block) = cfg.get(block_id) else {
                return Err(EmitError::MissingBlock {
                    cfg: self.current_cfg,
                    block: block_id,
                });
            };

            for step in &block.steps {
                self.emit_step(step)?;
            }

            visited.insert(block_id);

            // Falsy pushed first so the truthy side pops (and emits) first.
            if block.falsy_id != NO_BLOCK {
                frontier.push(block.falsy_id);
            }

            if block.truthy_id != NO_BLOCK {
                frontier.push(block.truthy_id);
            }
        }

        // Marker pairing is per CFG: anything still open here never saw
        // its end marker.
        if !self.active_ifs.is_empty() || !self.active_loops.is_empty() {
            return Err(EmitError::UnclosedConstruct {
                cfg: self.current_cfg,
            });
        }

        Ok(())
    }

    fn emit_step(&mut self, step: &Step) -> Result<(), EmitError> {
        match *step {
            Step::TacUnary { dest, arg0, op } => self.emit_tac_unary(dest, arg0, op),
            Step::TacBinary {
                dest,
                arg0,
                arg1,
                op,
            } => self.emit_tac_binary(dest, arg0, arg1, op),
            Step::Nonary { op } => self.emit_nonary(op),
            Step::Unary { arg0, op } => self.emit_unary(arg0, op),
            Step::Binary { arg0, arg1, op } => self.emit_binary(arg0, arg1, op),
            Step::Ternary {
                arg0,
                arg1,
                arg2,
                op,
            } => self.emit_ternary(arg0, arg1, arg2, op),
        }
    }

    // =========================================================================
    // Step translation
    // =========================================================================

    fn emit_tac_unary(
        &mut self,
        dest: AbsAddress,
        arg0: AbsAddress,
        op: StepOp,
    ) -> Result<(), EmitError> {
        let (dest_id, dest_mode) = translate_addr(dest);
        let (src_id, src_mode) = translate_addr(arg0);

        match op {
            StepOp::Nop => {
                self.push_inst(Opcode::Mov, [dest_id, src_id, 0], &[dest_mode, src_mode]);
                Ok(())
            }
            StepOp::Neg => {
                // In-place negation needs no move first.
                if dest != arg0 {
                    self.push_inst(Opcode::Mov, [dest_id, src_id, 0], &[dest_mode, src_mode]);
                }

                self.push_inst(Opcode::Neg, [dest_id, 0, 0], &[dest_mode]);
                Ok(())
            }
            other => Err(self.untranslatable(other)),
        }
    }

    fn emit_tac_binary(
        &mut self,
        dest: AbsAddress,
        arg0: AbsAddress,
        arg1: AbsAddress,
        op: StepOp,
    ) -> Result<(), EmitError> {
        let opcode = match op {
            StepOp::Mul => Opcode::Mul,
            StepOp::Div => Opcode::Div,
            StepOp::Mod => Opcode::Mod,
            StepOp::Add => Opcode::Add,
            StepOp::Sub => Opcode::Sub,
            StepOp::Equ => Opcode::Equ,
            StepOp::Neq => Opcode::Neq,
            StepOp::Lt => Opcode::Lt,
            StepOp::Gt => Opcode::Gt,
            StepOp::Lte => Opcode::Lte,
            StepOp::Gte => Opcode::Gte,
            other => return Err(self.untranslatable(other)),
        };

        let (dest_id, dest_mode) = translate_addr(dest);
        let (a0_id, a0_mode) = translate_addr(arg0);
        let (a1_id, a1_mode) = translate_addr(arg1);

        self.push_inst(
            opcode,
            [dest_id, a0_id, a1_id],
            &[dest_mode, a0_mode, a1_mode],
        );

        Ok(())
    }

    fn emit_nonary(&mut self, op: StepOp) -> Result<(), EmitError> {
        match op {
            StepOp::Nop => {
                self.push_inst(Opcode::Nop, [0, 0, 0], &[]);
                Ok(())
            }
            StepOp::MetaBeginWhile => {
                let start_ip = self.chunk().len() as i32;

                self.active_loops.push(ActiveLoop {
                    start_ip,
                    check_ip: 0,
                    break_ips: Vec::new(),
                    continue_ips: Vec::new(),
                });

                Ok(())
            }
            StepOp::MetaMarkWhileCheck => {
                let check_ip = self.last_ip();
                let Some(active) = self.active_loops.last_mut() else {
                    return Err(self.stray_marker(op));
                };

                active.check_ip = check_ip;
                Ok(())
            }
            StepOp::MetaMarkBreak => {
                let break_ip = self.last_ip();
                let Some(active) = self.active_loops.last_mut() else {
                    return Err(self.stray_marker(op));
                };

                active.break_ips.push(break_ip);
                Ok(())
            }
            StepOp::MetaMarkContinue => {
                let continue_ip = self.last_ip();
                let Some(active) = self.active_loops.last_mut() else {
                    return Err(self.stray_marker(op));
                };

                active.continue_ips.push(continue_ip);
                Ok(())
            }
            StepOp::MetaEndWhile => {
                let exit_ip = self.last_ip();
                let Some(active) = self.active_loops.pop() else {
                    return Err(self.stray_marker(op));
                };

                let chunk = self.chunk();

                chunk[active.check_ip as usize].args[1] = exit_ip as i16;

                for break_ip in &active.break_ips {
                    chunk[*break_ip as usize].args[0] = exit_ip as i16;
                }

                for continue_ip in &active.continue_ips {
                    chunk[*continue_ip as usize].args[0] = active.start_ip as i16;
                }

                Ok(())
            }
            StepOp::MetaBeginIfElse => {
                self.active_ifs.push(ActiveIfElse {
                    check_ip: 0,
                    alt_ip: -1,
                });

                Ok(())
            }
            StepOp::MetaMarkIfElseCheck => {
                let check_ip = self.last_ip();
                let Some(active) = self.active_ifs.last_mut() else {
                    return Err(self.stray_marker(op));
                };

                active.check_ip = check_ip;
                Ok(())
            }
            StepOp::MetaMarkIfElseAlt => {
                let alt_ip = self.last_ip();
                let Some(active) = self.active_ifs.last_mut() else {
                    return Err(self.stray_marker(op));
                };

                active.alt_ip = alt_ip;
                Ok(())
            }
            StepOp::MetaEndIfElse => {
                let end_ip = self.last_ip();
                let Some(active) = self.active_ifs.pop() else {
                    return Err(self.stray_marker(op));
                };

                let chunk = self.chunk();

                if active.alt_ip != -1 {
                    // With an else: the check falls to the instruction
                    // after the truthy body's jump, and that jump lands
                    // past the alternative.
                    chunk[active.check_ip as usize].args[1] = (active.alt_ip + 1) as i16;
                    chunk[active.alt_ip as usize].args[0] = end_ip as i16;
                } else {
                    chunk[active.check_ip as usize].args[1] = end_ip as i16;
                }

                Ok(())
            }
            other => Err(self.untranslatable(other)),
        }
    }

    fn emit_unary(&mut self, arg0: AbsAddress, op: StepOp) -> Result<(), EmitError> {
        let opcode = match op {
            StepOp::MakeSeq => Opcode::MakeSeq,
            StepOp::FreezeSeq => Opcode::FreezeSeq,
            StepOp::Jump => Opcode::Jump,
            StepOp::Ret => Opcode::Ret,
            StepOp::Halt => Opcode::Halt,
            other => return Err(self.untranslatable(other)),
        };

        let (a0_id, a0_mode) = translate_addr(arg0);

        self.push_inst(opcode, [a0_id, 0, 0], &[a0_mode]);

        Ok(())
    }

    fn emit_binary(
        &mut self,
        arg0: AbsAddress,
        arg1: AbsAddress,
        op: StepOp,
    ) -> Result<(), EmitError> {
        let opcode = match op {
            StepOp::MakeStr => Opcode::MakeStr,
            StepOp::JumpIf => Opcode::JumpIf,
            StepOp::JumpElse => Opcode::JumpElse,
            StepOp::Call => Opcode::Call,
            StepOp::NativeCall => Opcode::NativeCall,
            other => return Err(self.untranslatable(other)),
        };

        let (a0_id, a0_mode) = translate_addr(arg0);
        let (a1_id, a1_mode) = translate_addr(arg1);

        self.push_inst(opcode, [a0_id, a1_id, 0], &[a0_mode, a1_mode]);

        Ok(())
    }

    fn emit_ternary(
        &mut self,
        arg0: AbsAddress,
        arg1: AbsAddress,
        arg2: AbsAddress,
        op: StepOp,
    ) -> Result<(), EmitError> {
        let opcode = match op {
            StepOp::SeqPush => Opcode::SeqPush,
            StepOp::SeqGet => Opcode::SeqGet,
            other => return Err(self.untranslatable(other)),
        };

        let (a0_id, a0_mode) = translate_addr(arg0);
        let (a1_id, a1_mode) = translate_addr(arg1);
        let (a2_id, a2_mode) = translate_addr(arg2);

        self.push_inst(
            opcode,
            [a0_id, a1_id, a2_id],
            &[a0_mode, a1_mode, a2_mode],
        );

        Ok(())
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::Parser;
    use crate::ir::lower::lower;
    use crate::runtime::natives::NativeRegistry;

    fn compile(src: &str) -> Program {
        let decls = Parser::parse_source(src).unwrap();
        let natives = NativeRegistry::new();
        let ir = lower(&decls, &natives).unwrap();

        emit(ir).unwrap()
    }

    fn chunk_ops(program: &Program, index: usize) -> Vec<Opcode> {
        program.chunks[index].iter().map(|i| i.op).collect()
    }

    #[test]
    fn test_one_chunk_per_function() {
        let program = compile("fun a: [] => { return 0 } fun main: [] => { return 0 }");

        assert_eq!(program.chunks.len(), 2);
        assert_eq!(program.entry_id, Some(1));
    }

    #[test]
    fn test_missing_main_has_no_entry() {
        let program = compile("fun a: [] => { return 0 }");

        assert_eq!(program.entry_id, None);
    }

    #[test]
    fn test_straight_line_arithmetic() {
        // return 2 + 3 * 4 emits mul into a temp, then add, then ret.
        let program = compile("fun main: [] => { return 2 + 3 * 4 }");
        let ops = chunk_ops(&program, 0);

        assert_eq!(ops, vec![Opcode::Mul, Opcode::Add, Opcode::Ret]);
    }

    #[test]
    fn test_constant_modes_encoded() {
        let program = compile("fun main: [] => { return 2 + 3 * 4 }");
        let mul = &program.chunks[0][0];

        assert_eq!(mul.arg_mode(0), Some(ArgMode::Reg));
        assert_eq!(mul.arg_mode(1), Some(ArgMode::Constant));
        assert_eq!(mul.arg_mode(2), Some(ArgMode::Constant));
    }

    #[test]
    fn test_no_meta_marker_escapes_emission() {
        let program = compile(
            "fun main: [] => { def i = 0 while i < 3 { if i == 1 { break } i = i + 1 } return 0 }",
        );

        // Every emitted instruction is a runtime opcode; markers have no
        // Opcode representation, so reaching here at all proves stripping.
        // Also pin the counts: two conditional jumps, two plain jumps.
        let ops = chunk_ops(&program, 0);
        let cond_jumps = ops.iter().filter(|o| **o == Opcode::JumpElse).count();
        let jumps = ops.iter().filter(|o| **o == Opcode::Jump).count();

        assert_eq!(cond_jumps, 2);
        assert_eq!(jumps, 2);
    }

    #[test]
    fn test_while_patches_check_and_backjump() {
        // def i = 0 ; while i < 5 { i = i + 1 } ; return i
        //
        //   0: mov   r0, const(0)      ; def i
        //   1: nop                     ; loop start
        //   2: lt    r1, r0, const(5)
        //   3: jump_else r1, exit
        //   4: add   r2, r0, const(1)
        //   5: mov   r0, r2
        //   6: jump  1                 ; continue
        //   7: nop                     ; exit
        //   8: ret   r0
        let program = compile(
            "fun main: [] => { def i = 0 while i < 5 { i = i + 1 } return i }",
        );
        let chunk = &program.chunks[0];

        assert_eq!(chunk[3].op, Opcode::JumpElse);
        assert_eq!(chunk[3].args[1], 7, "check exits to the trailing nop");

        assert_eq!(chunk[6].op, Opcode::Jump);
        assert_eq!(chunk[6].args[0], 1, "back jump lands on the start nop");

        assert_eq!(chunk[7].op, Opcode::Nop);
    }

    #[test]
    fn test_break_patched_to_loop_exit() {
        let program = compile(
            "fun main: [] => { def i = 0 while 1 { if i == 3 { break } i = i + 1 } return 0 }",
        );
        let chunk = &program.chunks[0];

        // The exit nop is the jump target of every break.
        let exit_ip = chunk
            .iter()
            .enumerate()
            .rev()
            .find(|(_, inst)| inst.op == Opcode::Nop)
            .map(|(ip, _)| ip as i16)
            .unwrap();

        let while_check = chunk
            .iter()
            .position(|inst| inst.op == Opcode::JumpElse)
            .unwrap();

        assert_eq!(chunk[while_check].args[1], exit_ip);

        // One jump lands on the exit (the break), one back on the start.
        let jump_targets: Vec<i16> = chunk
            .iter()
            .filter(|inst| inst.op == Opcode::Jump)
            .map(|inst| inst.args[0])
            .collect();

        assert!(jump_targets.contains(&exit_ip));
    }

    #[test]
    fn test_if_else_patch_layout() {
        //   0: equ   r1, r0, const(1)
        //   1: jump_else r1, alt+1
        //   2: mov ... (then body: x = 10)
        //   ...
        //   j: jump end                 ; truthy skips the else
        //   j+1: nop
        //   ...: else body
        //   end-?: nop
        let program = compile(
            "fun main: [] => { def x = 0 if x == 1 { x = 10 } else { x = 20 } return x }",
        );
        let chunk = &program.chunks[0];

        let check = chunk
            .iter()
            .position(|inst| inst.op == Opcode::JumpElse)
            .unwrap();
        let alt = chunk
            .iter()
            .position(|inst| inst.op == Opcode::Jump)
            .unwrap();

        assert_eq!(
            chunk[check].args[1] as usize,
            alt + 1,
            "check falls into the else entry"
        );

        let end = chunk[alt].args[0] as usize;

        assert!(end > alt, "alt jump goes forward past the else body");
        assert_eq!(chunk[end].op, Opcode::Nop);
    }

    #[test]
    fn test_truthy_side_emitted_before_falsy() {
        // With an else, the then-body instructions appear before the
        // else-body ones in the chunk.
        let program = compile(
            "fun main: [] => { def x = 0 if x == 1 { x = 10 } else { x = 20 } return x }",
        );
        let chunk = &program.chunks[0];

        // Find the movs whose source constants are 10 and 20.
        let const_10 = program
            .constants
            .iter()
            .position(|v| *v == crate::lang::value::Value::Int(10))
            .unwrap() as i16;
        let const_20 = program
            .constants
            .iter()
            .position(|v| *v == crate::lang::value::Value::Int(20))
            .unwrap() as i16;

        let mov_10 = chunk
            .iter()
            .position(|i| i.op == Opcode::Mov && i.args[1] == const_10)
            .unwrap();
        let mov_20 = chunk
            .iter()
            .position(|i| i.op == Opcode::Mov && i.args[1] == const_20)
            .unwrap();

        assert!(mov_10 < mov_20);
    }

    #[test]
    fn test_negation_of_temp_emits_in_place_neg() {
        let program = compile("fun main: [] => { def x = 5 return -x }");
        let ops = chunk_ops(&program, 0);

        // -x lowers as neg over x's own temp: no extra mov between the
        // def mov and the neg.
        assert!(ops.contains(&Opcode::Neg));
    }

    #[test]
    fn test_stray_end_marker_is_fatal() {
        use crate::ir::cfg::{Cfg, FullIr};
        use crate::ir::step::{Step, StepOp};

        let mut cfg = Cfg::new();

        cfg.add_block();
        cfg.newest_mut().unwrap().steps.push(Step::Nonary {
            op: StepOp::MetaEndWhile,
        });

        let ir = FullIr {
            cfgs: vec![cfg],
            constants: Vec::new(),
            pre_objects: Vec::new(),
            main_id: 0,
        };

        assert!(matches!(
            emit(ir),
            Err(EmitError::MarkerOutsideConstruct { .. })
        ));
    }

    #[test]
    fn test_unclosed_construct_is_fatal() {
        use crate::ir::cfg::{Cfg, FullIr};
        use crate::ir::step::{Step, StepOp};

        let mut cfg = Cfg::new();

        cfg.add_block();
        cfg.newest_mut().unwrap().steps.push(Step::Nonary {
            op: StepOp::MetaBeginWhile,
        });

        let ir = FullIr {
            cfgs: vec![cfg],
            constants: Vec::new(),
            pre_objects: Vec::new(),
            main_id: 0,
        };

        assert!(matches!(emit(ir), Err(EmitError::UnclosedConstruct { .. })));
    }

    #[test]
    fn test_seq_pop_step_is_untranslatable() {
        use crate::ir::cfg::{Cfg, FullIr};
        use crate::ir::step::{AbsAddress, Step, StepOp};

        let mut cfg = Cfg::new();

        cfg.add_block();
        cfg.newest_mut().unwrap().steps.push(Step::Ternary {
            arg0: AbsAddress::temp(0),
            arg1: AbsAddress::temp(1),
            arg2: AbsAddress::immediate(1),
            op: StepOp::SeqPop,
        });

        let ir = FullIr {
            cfgs: vec![cfg],
            constants: Vec::new(),
            pre_objects: Vec::new(),
            main_id: 0,
        };

        assert!(matches!(
            emit(ir),
            Err(EmitError::UntranslatableStep { .. })
        ));
    }

    #[test]
    fn test_make_str_uses_heap_mode() {
        let program = compile("fun main: [] => { def s = \"ab\" return 0 }");
        let chunk = &program.chunks[0];
        let make_str = chunk.iter().find(|i| i.op == Opcode::MakeStr).unwrap();

        assert_eq!(make_str.arg_mode(0), Some(ArgMode::Reg));
        assert_eq!(make_str.arg_mode(1), Some(ArgMode::Heap));
        assert_eq!(make_str.args[1], 0);
    }
}
