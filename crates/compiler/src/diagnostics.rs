//! Diagnostics
//!
//! All user-facing analysis output funnels through `Diagnostic` records,
//! collected in encounter order. Warnings never block emission; the driver
//! exits nonzero iff any error-severity diagnostic is present.

use crate::lexer::Token;
use std::path::{Path, PathBuf};

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic tied to a source position
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(file: &Path, token: &Token, message: impl Into<String>) -> Self {
        Diagnostic {
            file: file.to_path_buf(),
            message: message.into(),
            line: token.line,
            column: token.column,
            severity: Severity::Error,
        }
    }

    pub fn warning(file: &Path, token: &Token, message: impl Into<String>) -> Self {
        Diagnostic {
            file: file.to_path_buf(),
            message: message.into(),
            line: token.line,
            column: token.column,
            severity: Severity::Warning,
        }
    }
}

/// True if any diagnostic is an error
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

/// Format diagnostics for CLI output
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut output = String::new();
    for d in diagnostics {
        let severity_str = match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        output.push_str(&format!(
            "{}:{}:{}: {}: {}\n",
            d.file.display(),
            d.line,
            d.column,
            severity_str,
            d.message
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::TokenKind;

    #[test]
    fn test_format_and_has_errors() {
        let tok = Token::new(TokenKind::Identifier, "x", 3, 7);
        let diags = vec![
            Diagnostic::warning(Path::new("a.td"), &tok, "unused local variable 'x'"),
            Diagnostic::error(Path::new("a.td"), &tok, "undefined variable 'x'"),
        ];
        assert!(has_errors(&diags));
        let text = format_diagnostics(&diags);
        assert!(text.contains("a.td:3:7: warning: unused local variable 'x'"));
        assert!(text.contains("a.td:3:7: error: undefined variable 'x'"));
    }

    #[test]
    fn test_warnings_only_is_clean() {
        let tok = Token::new(TokenKind::Identifier, "y", 1, 1);
        let diags = vec![Diagnostic::warning(Path::new("b.td"), &tok, "unreachable code")];
        assert!(!has_errors(&diags));
    }
}
