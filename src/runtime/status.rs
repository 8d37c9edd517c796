/// Final (or in-flight) execution status of the VM.
///
/// This is a value, not a Rust error: dispatch stores it in the engine's
/// status register and the loop stops on anything non-`Ok`. Drivers map
/// non-`Ok` to a nonzero process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Ok,
    /// No entry function or no native table at startup.
    SetupError,
    /// Opcode dispatch failure, a failed native callback, `inc`/`dec`,
    /// or `halt`.
    OpError,
    /// Invalid operand mode or an unnegatable value.
    ArgError,
    /// Bad register id, bad object reference, or a rejected mutation.
    MemError,
    /// Divide or modulo by zero.
    MathError,
    /// The program ran fine but `main` returned nonzero.
    UserError,
    /// Anything else.
    AnyError,
}

impl ExecStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ExecStatus::Ok)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecStatus::Ok => "ok",
            ExecStatus::SetupError => "setup_error",
            ExecStatus::OpError => "op_error",
            ExecStatus::ArgError => "arg_error",
            ExecStatus::MemError => "mem_error",
            ExecStatus::MathError => "math_error",
            ExecStatus::UserError => "user_error",
            ExecStatus::AnyError => "any_error",
        }
    }
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
