//! Code generation error types.

/// Error type for code generation operations.
///
/// The generator runs after a clean analyzer pass, so a `Logic` error here
/// means a compiler bug rather than a user mistake; emission aborts rather
/// than producing broken assembly.
#[derive(Debug)]
pub enum CodeGenError {
    /// An inconsistency between the analyzed program and the generator
    Logic(String),
    /// A formatting error while writing assembly text
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Logic(s) => write!(f, "{}", s),
            CodeGenError::Format(e) => write!(f, "assembly generation error: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<String> for CodeGenError {
    fn from(s: String) -> Self {
        CodeGenError::Logic(s)
    }
}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}
