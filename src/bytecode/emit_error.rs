/// Fatal emission failure. Unlike lowering, the emitter stops at the
/// first problem: a chunk half-patched by a malformed marker sequence is
/// not worth continuing over.
#[derive(Debug, Clone)]
pub enum EmitError {
    /// An IR step whose operation has no translation in its arity class.
    UntranslatableStep {
        cfg: usize,
        op: &'static str,
    },
    /// A meta marker arrived without its enclosing begin marker.
    MarkerOutsideConstruct {
        cfg: usize,
        op: &'static str,
    },
    /// A begin marker whose construct never ended within its CFG.
    UnclosedConstruct {
        cfg: usize,
    },
    /// A CFG successor id pointing at no block.
    MissingBlock {
        cfg: usize,
        block: i32,
    },
}

impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmitError::UntranslatableStep { cfg, op } => {
                write!(f, "emit error in chunk {}: cannot translate '{}'", cfg, op)
            }
            EmitError::MarkerOutsideConstruct { cfg, op } => {
                write!(
                    f,
                    "emit error in chunk {}: marker '{}' outside its construct",
                    cfg, op
                )
            }
            EmitError::UnclosedConstruct { cfg } => {
                write!(f, "emit error in chunk {}: unclosed control-flow construct", cfg)
            }
            EmitError::MissingBlock { cfg, block } => {
                write!(f, "emit error in chunk {}: no basic block #{}", cfg, block)
            }
        }
    }
}

impl std::error::Error for EmitError {}
