// =============================================================================
// IR steps - three-address code and opcode-style operations over abstract
// addresses, before register assignment
// =============================================================================

/// Operation carried by an IR step.
///
/// The `Meta*` members are never executed: they survive lowering so the
/// emitter can back-patch structured control flow, and must all be
/// consumed during emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOp {
    Nop,
    MakeStr,
    MakeSeq,
    SeqPush,
    SeqPop,
    SeqGet,
    FreezeSeq,
    Neg,
    Inc,
    Dec,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Equ,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    Jump,
    JumpIf,
    JumpElse,
    Call,
    NativeCall,
    Ret,
    Halt,

    // Emitter-only markers
    MetaBeginWhile,
    MetaEndWhile,
    MetaMarkWhileCheck,
    MetaMarkBreak,
    MetaMarkContinue,
    MetaBeginIfElse,
    MetaEndIfElse,
    MetaMarkIfElseCheck,
    MetaMarkIfElseAlt,
}

impl StepOp {
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            StepOp::MetaBeginWhile
                | StepOp::MetaEndWhile
                | StepOp::MetaMarkWhileCheck
                | StepOp::MetaMarkBreak
                | StepOp::MetaMarkContinue
                | StepOp::MetaBeginIfElse
                | StepOp::MetaEndIfElse
                | StepOp::MetaMarkIfElseCheck
                | StepOp::MetaMarkIfElseAlt
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            StepOp::Nop => "nop",
            StepOp::MakeStr => "make_str",
            StepOp::MakeSeq => "make_seq",
            StepOp::SeqPush => "seq_obj_push",
            StepOp::SeqPop => "seq_obj_pop",
            StepOp::SeqGet => "seq_obj_get",
            StepOp::FreezeSeq => "frz_seq_obj",
            StepOp::Neg => "neg",
            StepOp::Inc => "inc",
            StepOp::Dec => "dec",
            StepOp::Mul => "mul",
            StepOp::Div => "div",
            StepOp::Mod => "mod",
            StepOp::Add => "add",
            StepOp::Sub => "sub",
            StepOp::Equ => "equ",
            StepOp::Neq => "neq",
            StepOp::Lt => "lt",
            StepOp::Gt => "gt",
            StepOp::Lte => "lte",
            StepOp::Gte => "gte",
            StepOp::Jump => "jump",
            StepOp::JumpIf => "jump_if",
            StepOp::JumpElse => "jump_else",
            StepOp::Call => "call",
            StepOp::NativeCall => "native_call",
            StepOp::Ret => "ret",
            StepOp::Halt => "halt",
            StepOp::MetaBeginWhile => "meta_begin_while",
            StepOp::MetaEndWhile => "meta_end_while",
            StepOp::MetaMarkWhileCheck => "meta_mark_while_check",
            StepOp::MetaMarkBreak => "meta_mark_break",
            StepOp::MetaMarkContinue => "meta_mark_continue",
            StepOp::MetaBeginIfElse => "meta_begin_if_else",
            StepOp::MetaEndIfElse => "meta_end_if_else",
            StepOp::MetaMarkIfElseCheck => "meta_mark_if_else_check",
            StepOp::MetaMarkIfElseAlt => "meta_mark_if_else_alt",
        }
    }
}

/// Addressing mode of an abstract operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrTag {
    /// Raw id interpreted structurally (jump targets, function ids,
    /// argument counts).
    Immediate,
    /// Index into the constant pool.
    Constant,
    /// Index into the current call's register window.
    Temp,
    /// Index of a preloaded heap object slot.
    Heap,
}

/// Operand reference used throughout the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsAddress {
    pub tag: AddrTag,
    pub id: i16,
}

impl AbsAddress {
    pub fn immediate(id: i16) -> Self {
        Self {
            tag: AddrTag::Immediate,
            id,
        }
    }

    pub fn constant(id: i16) -> Self {
        Self {
            tag: AddrTag::Constant,
            id,
        }
    }

    pub fn temp(id: i16) -> Self {
        Self {
            tag: AddrTag::Temp,
            id,
        }
    }

    pub fn heap(id: i16) -> Self {
        Self {
            tag: AddrTag::Heap,
            id,
        }
    }
}

/// One IR step: TAC with a destination, or opcode-style without one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    TacUnary {
        dest: AbsAddress,
        arg0: AbsAddress,
        op: StepOp,
    },
    TacBinary {
        dest: AbsAddress,
        arg0: AbsAddress,
        arg1: AbsAddress,
        op: StepOp,
    },
    Nonary {
        op: StepOp,
    },
    Unary {
        arg0: AbsAddress,
        op: StepOp,
    },
    Binary {
        arg0: AbsAddress,
        arg1: AbsAddress,
        op: StepOp,
    },
    Ternary {
        arg0: AbsAddress,
        arg1: AbsAddress,
        arg2: AbsAddress,
        op: StepOp,
    },
}

impl Step {
    pub fn op(&self) -> StepOp {
        match self {
            Step::TacUnary { op, .. }
            | Step::TacBinary { op, .. }
            | Step::Nonary { op }
            | Step::Unary { op, .. }
            | Step::Binary { op, .. }
            | Step::Ternary { op, .. } => *op,
        }
    }

    pub fn is_meta(&self) -> bool {
        self.op().is_meta()
    }
}
