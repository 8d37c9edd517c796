/// A single problem found while lowering the AST to IR.
#[derive(Debug, Clone)]
pub enum LowerError {
    /// A name that resolves to nothing: not a native, global, or local.
    UndefinedName(String),
    /// A second definition of a name in the same scope.
    Redefinition(String),
    /// A control-flow edge could not be recorded (a block would need a
    /// third successor).
    BrokenFlow { function: String },
}

impl std::fmt::Display for LowerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LowerError::UndefinedName(name) => {
                write!(f, "undefined name '{}'", name)
            }
            LowerError::Redefinition(name) => {
                write!(f, "invalid re-definition of '{}'", name)
            }
            LowerError::BrokenFlow { function } => {
                write!(f, "malformed control flow in function '{}'", function)
            }
        }
    }
}

impl std::error::Error for LowerError {}

/// Everything that went wrong during one lowering run. Lowering keeps
/// going after an error to report as much as it can, then yields no IR.
#[derive(Debug, Clone)]
pub struct LowerErrors {
    pub errors: Vec<LowerError>,
}

impl std::fmt::Display for LowerErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "lowering failed with {} error(s):", self.errors.len())?;

        for (i, error) in self.errors.iter().enumerate() {
            writeln!(f, "  {}: {}", i + 1, error)?;
        }

        Ok(())
    }
}

impl std::error::Error for LowerErrors {}
