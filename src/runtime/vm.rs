use std::collections::{HashSet, VecDeque};

use crate::bytecode::op::{ArgMode, Chunk, Instruction, Opcode, Program};
use crate::lang::object::{HeapObject, ObjectKind, PopEnd};
use crate::lang::value::{self, ArithOp, CompareOp, HeapId, Value};
use crate::runtime::heap::Heap;
use crate::runtime::natives::NativeRegistry;
use crate::runtime::status::ExecStatus;

/// Engine resource limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of the flat register memory vector.
    pub reg_buffer_limit: usize,
    /// Maximum call-frame depth.
    pub call_frame_max: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            reg_buffer_limit: 8192,
            call_frame_max: 512,
        }
    }
}

/// Saved caller state, restored by the matching `ret`.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    caller_fn: i16,
    caller_ip: i16,
    caller_base: usize,
    caller_top: usize,
    caller_status: ExecStatus,
}

/// The register virtual machine.
///
/// State registers: `rfi` (current chunk index), `rip` (instruction
/// pointer), `rbp` (register-window base), `rft` (high-water mark of used
/// registers), `rrd` (1-based recursion depth, 0 means done), `res`
/// (status). A register id resolves to `memory[rbp + id]`.
pub struct Engine<'n> {
    heap: Heap,
    memory: Vec<Value>,
    frames: Vec<CallFrame>,
    chunks: Vec<Chunk>,
    constants: Vec<Value>,
    natives: &'n NativeRegistry,
    argv_obj: HeapId,
    config: EngineConfig,

    rfi: i16,
    rip: i16,
    rbp: usize,
    rft: usize,
    rrd: i16,
    res: ExecStatus,
}

impl<'n> Engine<'n> {
    pub fn new(
        config: EngineConfig,
        program: Program,
        natives: &'n NativeRegistry,
        program_args: Vec<String>,
    ) -> Self {
        let mut heap = Heap::with_preloads(program.pre_objects);

        // The program-arguments sequence lives on the heap like any other
        // object, but stays rooted for the whole run.
        let mut argv = HeapObject::new_seq();

        for arg in &program_args {
            let id = heap.alloc(HeapObject::new_str(arg));

            argv.push(Value::Str(id));
        }

        let argv_obj = heap.alloc(argv);

        let entry = program.entry_id;
        let res = if entry.is_some() {
            ExecStatus::Ok
        } else {
            ExecStatus::SetupError
        };

        let mut frames = Vec::with_capacity(config.call_frame_max);

        // `main` is implicitly called; the bottom frame is what its `ret`
        // pops, leaving the recursion depth at zero.
        frames.push(CallFrame {
            caller_fn: 0,
            caller_ip: 0,
            caller_base: 0,
            caller_top: 0,
            caller_status: ExecStatus::Ok,
        });

        Self {
            heap,
            memory: vec![Value::Dud; config.reg_buffer_limit],
            frames,
            chunks: program.chunks,
            constants: program.constants,
            natives,
            argv_obj,
            config,
            rfi: entry.unwrap_or(-1),
            rip: 0,
            rbp: 0,
            rft: 0,
            rrd: 1,
            res,
        }
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    pub fn run(&mut self) -> ExecStatus {
        while self.rrd > 0 && self.res.is_ok() {
            let Some(inst) = self.fetch_instruction() else {
                self.res = ExecStatus::MemError;
                break;
            };

            self.dispatch(inst);
        }

        if !self.res.is_ok() {
            return self.res;
        }

        // Exit convention: a program succeeded iff `main` left integer
        // zero in the result slot.
        let result = self.resolve(self.memory[0]);

        if value::compare(CompareOp::Equ, result, Value::Int(0)) {
            ExecStatus::Ok
        } else {
            ExecStatus::UserError
        }
    }

    fn fetch_instruction(&self) -> Option<Instruction> {
        if self.rfi < 0 || self.rip < 0 {
            return None;
        }

        self.chunks
            .get(self.rfi as usize)?
            .get(self.rip as usize)
            .copied()
    }

    fn dispatch(&mut self, inst: Instruction) {
        let [a0, a1, a2] = inst.args;

        match inst.op {
            Opcode::Nop => self.rip += 1,
            Opcode::MakeStr => self.op_make_str(a0, a1),
            Opcode::MakeSeq => self.op_make_seq(a0),
            Opcode::SeqPush => self.op_seq_push(&inst, a0, a1),
            Opcode::SeqPop => self.op_seq_pop(a0, a1, a2),
            Opcode::SeqGet => self.op_seq_get(&inst, a0, a1, a2),
            Opcode::FreezeSeq => self.op_freeze(a0),
            Opcode::LoadConst => self.op_load_const(a0, a1),
            Opcode::Mov => self.op_mov(&inst, a0, a1),
            Opcode::Neg => self.op_neg(a0),
            Opcode::Inc | Opcode::Dec => self.res = ExecStatus::OpError,
            Opcode::Mul => self.op_arith(ArithOp::Mul, &inst, a0, a1, a2),
            Opcode::Div => self.op_arith(ArithOp::Div, &inst, a0, a1, a2),
            Opcode::Mod => self.op_arith(ArithOp::Mod, &inst, a0, a1, a2),
            Opcode::Add => self.op_arith(ArithOp::Add, &inst, a0, a1, a2),
            Opcode::Sub => self.op_arith(ArithOp::Sub, &inst, a0, a1, a2),
            Opcode::Equ => self.op_compare(CompareOp::Equ, &inst, a0, a1, a2),
            Opcode::Neq => self.op_compare(CompareOp::Neq, &inst, a0, a1, a2),
            Opcode::Lt => self.op_compare(CompareOp::Lt, &inst, a0, a1, a2),
            Opcode::Gt => self.op_compare(CompareOp::Gt, &inst, a0, a1, a2),
            Opcode::Lte => self.op_compare(CompareOp::Lte, &inst, a0, a1, a2),
            Opcode::Gte => self.op_compare(CompareOp::Gte, &inst, a0, a1, a2),
            Opcode::Jump => self.rip = a0,
            Opcode::JumpIf => self.op_jump_cond(a0, a1, true),
            Opcode::JumpElse => self.op_jump_cond(a0, a1, false),
            Opcode::Call => self.op_call(a0, a1),
            Opcode::NativeCall => self.op_native_call(a0, a1),
            Opcode::Ret => self.op_ret(&inst, a0),
            Opcode::Halt => self.res = ExecStatus::OpError,
        }
    }

    // =========================================================================
    // Operand access
    // =========================================================================

    /// Read an operand under its encoded mode. Modes that are not value
    /// sources (`immediate`, the reserved `stack`) are arg errors; a bad
    /// index under a valid mode is a mem error.
    fn fetch_value(&self, mode: Option<ArgMode>, id: i16) -> Result<Value, ExecStatus> {
        match mode {
            Some(ArgMode::Constant) => {
                if id < 0 {
                    return Err(ExecStatus::MemError);
                }

                self.constants
                    .get(id as usize)
                    .copied()
                    .ok_or(ExecStatus::MemError)
            }
            Some(ArgMode::Reg) => {
                if id < 0 {
                    return Err(ExecStatus::MemError);
                }

                self.memory
                    .get(self.rbp + id as usize)
                    .copied()
                    .ok_or(ExecStatus::MemError)
            }
            _ => Err(ExecStatus::ArgError),
        }
    }

    /// Chase a locator chain down to a plain value copy.
    fn resolve(&self, mut cell: Value) -> Value {
        let mut hops = 0;

        while let Value::Locator { obj, pos } = cell {
            let Some(next) = self.heap.get(obj).and_then(|object| object.get(pos)) else {
                return Value::Dud;
            };

            cell = *next;
            hops += 1;

            if hops > 64 {
                return Value::Dud;
            }
        }

        cell
    }

    /// Plain register write; bumps the frame top.
    fn write_reg(&mut self, dest: i16, cell: Value) -> bool {
        if dest < 0 {
            return false;
        }

        let index = self.rbp + dest as usize;

        if index >= self.memory.len() {
            return false;
        }

        self.memory[index] = cell;
        self.rft = self.rft.max(index);

        true
    }

    fn read_reg(&self, id: i16) -> Option<Value> {
        if id < 0 {
            return None;
        }

        self.memory.get(self.rbp + id as usize).copied()
    }

    /// Write an element through a locator chain. Fails on a missing
    /// object, a bad index, or a frozen target.
    fn write_element(&mut self, mut obj: HeapId, mut pos: usize, cell: Value) -> bool {
        let mut hops = 0;

        loop {
            let current = match self.heap.get(obj).and_then(|object| object.get(pos)) {
                Some(element) => *element,
                None => return false,
            };

            match current {
                Value::Locator {
                    obj: next,
                    pos: next_pos,
                } => {
                    obj = next;
                    pos = next_pos;
                }
                _ => {
                    return self
                        .heap
                        .get_mut(obj)
                        .map(|object| object.set(pos, cell))
                        .unwrap_or(false);
                }
            }

            hops += 1;

            if hops > 64 {
                return false;
            }
        }
    }

    // =========================================================================
    // Object opcodes
    // =========================================================================

    fn op_make_str(&mut self, dest: i16, pre_obj_id: i16) {
        if pre_obj_id < 0 {
            self.res = ExecStatus::MemError;
            return;
        }

        let text = match self.heap.get(pre_obj_id as usize) {
            Some(object) => match object.as_text() {
                Some(text) => text,
                None => self.heap.render(&Value::Seq(pre_obj_id as usize)),
            },
            None => {
                self.res = ExecStatus::MemError;
                return;
            }
        };

        let id = self.heap.alloc(HeapObject::new_str(&text));

        if !self.write_reg(dest, Value::Str(id)) {
            self.res = ExecStatus::MemError;
            return;
        }

        self.rip += 1;
    }

    fn op_make_seq(&mut self, dest: i16) {
        let id = self.heap.alloc(HeapObject::new_seq());

        if !self.write_reg(dest, Value::Seq(id)) {
            self.res = ExecStatus::MemError;
            return;
        }

        self.rip += 1;
    }

    fn op_seq_push(&mut self, inst: &Instruction, dest: i16, src: i16) {
        let item = match self.fetch_value(inst.arg_mode(1), src) {
            Ok(item) => item,
            Err(status) => {
                self.res = status;
                return;
            }
        };

        let Some(obj_id) = self.read_reg(dest).and_then(|cell| cell.object_id()) else {
            self.res = ExecStatus::MemError;
            return;
        };

        let pushed = self
            .heap
            .get_mut(obj_id)
            .map(|object| object.push(item))
            .unwrap_or(false);

        if !pushed {
            self.res = ExecStatus::MemError;
            return;
        }

        self.rip += 1;
    }

    fn op_seq_pop(&mut self, dest: i16, src: i16, end: i16) {
        let pop_end = if end == 0 { PopEnd::Front } else { PopEnd::Back };

        let Some(obj_id) = self.read_reg(src).and_then(|cell| cell.object_id()) else {
            self.res = ExecStatus::MemError;
            return;
        };

        let popped = self
            .heap
            .get_mut(obj_id)
            .and_then(|object| object.pop(pop_end));

        let Some(cell) = popped else {
            self.res = ExecStatus::MemError;
            return;
        };

        if !self.write_reg(dest, cell) {
            self.res = ExecStatus::MemError;
            return;
        }

        self.rip += 1;
    }

    fn op_seq_get(&mut self, inst: &Instruction, dest: i16, src: i16, pos_id: i16) {
        let pos_value = match self.fetch_value(inst.arg_mode(2), pos_id) {
            Ok(cell) => cell,
            Err(status) => {
                self.res = status;
                return;
            }
        };

        let Some(pos) = pos_value.to_scalar() else {
            self.res = ExecStatus::ArgError;
            return;
        };

        if pos < 0 {
            self.res = ExecStatus::MemError;
            return;
        }

        let Some(obj_id) = self.read_reg(src).and_then(|cell| cell.object_id()) else {
            self.res = ExecStatus::MemError;
            return;
        };

        let in_range = self
            .heap
            .get(obj_id)
            .and_then(|object| object.get(pos as usize))
            .is_some();

        if !in_range {
            self.res = ExecStatus::MemError;
            return;
        }

        if !self.write_reg(
            dest,
            Value::Locator {
                obj: obj_id,
                pos: pos as usize,
            },
        ) {
            self.res = ExecStatus::MemError;
            return;
        }

        self.rip += 1;
    }

    fn op_freeze(&mut self, dest: i16) {
        let Some(obj_id) = self.read_reg(dest).and_then(|cell| cell.object_id()) else {
            self.res = ExecStatus::MemError;
            return;
        };

        match self.heap.get_mut(obj_id) {
            Some(object) => {
                object.freeze();
                self.rip += 1;
            }
            None => self.res = ExecStatus::MemError,
        }
    }

    // =========================================================================
    // Data movement and arithmetic
    // =========================================================================

    fn op_load_const(&mut self, dest: i16, const_id: i16) {
        let cell = match self.fetch_value(Some(ArgMode::Constant), const_id) {
            Ok(cell) => cell,
            Err(status) => {
                self.res = status;
                return;
            }
        };

        if !self.write_reg(dest, cell) {
            self.res = ExecStatus::MemError;
            return;
        }

        self.rip += 1;
    }

    fn op_mov(&mut self, inst: &Instruction, dest: i16, src: i16) {
        let cell = match self.fetch_value(inst.arg_mode(1), src) {
            Ok(cell) => cell,
            Err(status) => {
                self.res = status;
                return;
            }
        };

        if dest < 0 {
            self.res = ExecStatus::MemError;
            return;
        }

        let index = self.rbp + dest as usize;

        if index >= self.memory.len() {
            self.res = ExecStatus::MemError;
            return;
        }

        // A locator destination takes the write through to the aliased
        // element, unless the source is itself a locator (then the alias
        // is redirected).
        let stored = match self.memory[index] {
            Value::Locator { .. } if cell.is_locator() => {
                self.memory[index] = cell;
                true
            }
            Value::Locator { obj, pos } => self.write_element(obj, pos, cell),
            _ => {
                self.memory[index] = cell;
                true
            }
        };

        if !stored {
            self.res = ExecStatus::MemError;
            return;
        }

        self.rft = self.rft.max(index);
        self.rip += 1;
    }

    fn op_neg(&mut self, dest: i16) {
        let Some(cell) = self.read_reg(dest) else {
            self.res = ExecStatus::MemError;
            return;
        };

        match cell {
            Value::Locator { obj, pos } => {
                let mut resolved = self.resolve(cell);

                if !value::negate(&mut resolved) {
                    self.res = ExecStatus::ArgError;
                    return;
                }

                if !self.write_element(obj, pos, resolved) {
                    self.res = ExecStatus::MemError;
                    return;
                }
            }
            _ => {
                let index = self.rbp + dest as usize;

                if !value::negate(&mut self.memory[index]) {
                    self.res = ExecStatus::ArgError;
                    return;
                }

                self.rft = self.rft.max(index);
            }
        }

        self.rip += 1;
    }

    fn op_arith(&mut self, op: ArithOp, inst: &Instruction, dest: i16, lhs: i16, rhs: i16) {
        let (lhs_cell, rhs_cell) = match self.fetch_operands(inst, lhs, rhs) {
            Ok(pair) => pair,
            Err(status) => {
                self.res = status;
                return;
            }
        };

        let result = value::arith(op, self.resolve(lhs_cell), self.resolve(rhs_cell));

        // Division and modulo map an undefined result to a math error;
        // the other operators store whatever came out.
        if matches!(op, ArithOp::Div | ArithOp::Mod) && result.is_dud() {
            self.res = ExecStatus::MathError;
            return;
        }

        if !self.write_reg(dest, result) {
            self.res = ExecStatus::MemError;
            return;
        }

        self.rip += 1;
    }

    fn op_compare(&mut self, op: CompareOp, inst: &Instruction, dest: i16, lhs: i16, rhs: i16) {
        let (lhs_cell, rhs_cell) = match self.fetch_operands(inst, lhs, rhs) {
            Ok(pair) => pair,
            Err(status) => {
                self.res = status;
                return;
            }
        };

        let result = value::compare(op, self.resolve(lhs_cell), self.resolve(rhs_cell));

        if !self.write_reg(dest, Value::Bool(result)) {
            self.res = ExecStatus::MemError;
            return;
        }

        self.rip += 1;
    }

    fn fetch_operands(
        &self,
        inst: &Instruction,
        lhs: i16,
        rhs: i16,
    ) -> Result<(Value, Value), ExecStatus> {
        let lhs_cell = self.fetch_value(inst.arg_mode(1), lhs)?;
        let rhs_cell = self.fetch_value(inst.arg_mode(2), rhs)?;

        Ok((lhs_cell, rhs_cell))
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    fn op_jump_cond(&mut self, check_reg: i16, dest_ip: i16, when_truthy: bool) {
        let Some(cell) = self.read_reg(check_reg) else {
            self.res = ExecStatus::MemError;
            return;
        };

        if cell.truthy() == when_truthy {
            self.rip = dest_ip;
        } else {
            self.rip += 1;
        }
    }

    fn op_call(&mut self, fn_id: i16, argc: i16) {
        if self.frames.len() >= self.config.call_frame_max {
            self.res = ExecStatus::MemError;
            return;
        }

        let new_base = self.rft as i64 - argc as i64 + 1;

        if new_base < 0 {
            self.res = ExecStatus::MemError;
            return;
        }

        self.frames.push(CallFrame {
            caller_fn: self.rfi,
            caller_ip: self.rip + 1,
            caller_base: self.rbp,
            caller_top: self.rft,
            caller_status: self.res,
        });
        self.rrd += 1;

        self.rfi = fn_id;
        self.rip = 0;
        self.rbp = new_base as usize;
    }

    fn op_native_call(&mut self, native_id: i16, argc: i16) {
        let proc = if native_id >= 0 {
            self.natives.get(native_id as usize)
        } else {
            None
        };

        let Some(proc) = proc else {
            self.res = ExecStatus::OpError;
            return;
        };

        self.res = if proc(self, argc) {
            ExecStatus::Ok
        } else {
            ExecStatus::OpError
        };

        self.rip += 1;
    }

    fn op_ret(&mut self, inst: &Instruction, src: i16) {
        let result = match self.fetch_value(inst.arg_mode(0), src) {
            Ok(cell) => cell,
            Err(status) => {
                self.res = status;
                return;
            }
        };

        // The callee's slot zero is the caller's result slot.
        if self.rbp >= self.memory.len() {
            self.res = ExecStatus::MemError;
            return;
        }

        self.memory[self.rbp] = result;

        let Some(frame) = self.frames.pop() else {
            self.res = ExecStatus::MemError;
            return;
        };

        self.rrd -= 1;

        self.rfi = frame.caller_fn;
        self.rip = frame.caller_ip;
        self.rbp = frame.caller_base;
        self.rft = frame.caller_top;
        self.res = frame.caller_status;

        self.try_mark_and_sweep();
    }

    // =========================================================================
    // Garbage collection
    //
    // Stop-the-world mark-sweep, run only at function return once the
    // heap's memory score passes its threshold. Roots are the active
    // register window and the program-arguments object.
    // =========================================================================

    fn try_mark_and_sweep(&mut self) {
        if !self.heap.is_ripe() {
            return;
        }

        let mut live: HashSet<HeapId> = HashSet::new();
        let mut frontier: VecDeque<HeapId> = VecDeque::new();

        let window_top = self.rft.min(self.memory.len() - 1);

        for cell in &self.memory[0..=window_top] {
            if let Some(id) = cell.referenced_object() {
                if live.insert(id) {
                    frontier.push_back(id);
                }
            }
        }

        if live.insert(self.argv_obj) {
            frontier.push_back(self.argv_obj);
        }

        while let Some(id) = frontier.pop_front() {
            let Some(object) = self.heap.get(id) else {
                continue;
            };

            if object.kind() != ObjectKind::Sequence {
                continue;
            }

            let children: Vec<HeapId> = object
                .items()
                .iter()
                .filter_map(|item| item.referenced_object())
                .collect();

            for child in children {
                if live.insert(child) {
                    frontier.push_back(child);
                }
            }
        }

        for id in self.heap.occupied_ids() {
            if !live.contains(&id) {
                self.heap.destroy(id);
            }
        }
    }

    // =========================================================================
    // Native procedure bridge
    // =========================================================================

    fn native_window_base(&self, argc: i16) -> usize {
        let base = (self.rft + 1).saturating_sub(argc.max(0) as usize);

        base.min(self.memory.len() - 1)
    }

    /// Reference to argument `offset` of the in-flight native call.
    pub fn native_arg(&mut self, argc: i16, offset: i16) -> &mut Value {
        let index = (self.native_window_base(argc) + offset.max(0) as usize)
            .min(self.memory.len() - 1);

        &mut self.memory[index]
    }

    /// Store the native call's result where the call site expects it.
    pub fn native_return(&mut self, cell: Value, argc: i16) {
        let index = self.native_window_base(argc);

        self.memory[index] = cell;
        self.rft = self.rft.max(index);
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The preloaded program-arguments sequence.
    pub fn argv_object(&self) -> HeapId {
        self.argv_obj
    }

    /// Resolve a (possibly aliasing) cell to a plain value copy.
    pub fn resolve_value(&self, cell: Value) -> Value {
        self.resolve(cell)
    }

    /// Render a value for user-facing output.
    pub fn render(&self, cell: &Value) -> String {
        self.heap.render(cell)
    }
}
