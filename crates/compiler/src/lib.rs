//! Tilde Compiler Library
//!
//! Compiles Tilde (`.td`) source to 32-bit x86 assembly in FASM syntax
//! targeting a PE executable. The pipeline: include resolution and
//! parsing, semantic analysis to a fixed point (monomorphization happens
//! on demand during analysis), then code generation. Warnings never block
//! emission; any error-severity diagnostic suppresses it.
//!
//! ```rust,ignore
//! use tdc::{CompilerConfig, compile_file};
//!
//! let outcome = compile_file(Path::new("app.td"), &CompilerConfig::default())?;
//! eprint!("{}", tdc::format_diagnostics(&outcome.diagnostics));
//! if let Some(assembly) = outcome.assembly {
//!     std::fs::write("app.asm", assembly)?;
//! }
//! ```

pub mod analyzer;
pub mod ast;
pub mod codegen;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod folding;
pub mod functions;
pub mod imports;
pub mod includes;
pub mod layout;
pub mod lexer;
pub mod monomorph;
pub mod parser;
pub mod repository;
pub mod resolver;
pub mod runner;
pub mod session;
pub mod symbols;
pub mod types;
pub mod vtable;

pub use codegen::{CodeGen, CodeGenError};
pub use config::CompilerConfig;
pub use diagnostics::{Diagnostic, Severity, format_diagnostics, has_errors};
pub use parser::Parser;
pub use session::Session;

use crate::ast::Program;
use crate::imports::ImportManifest;
use crate::includes::IncludeResolver;
use crate::runner::SemanticRunner;
use std::path::Path;
use std::process::Command;

/// Result of one compile: diagnostics in encounter order plus the FASM
/// text when no error-severity diagnostic was produced.
#[derive(Debug)]
pub struct CompileOutcome {
    pub diagnostics: Vec<Diagnostic>,
    pub assembly: Option<String>,
}

/// Compile an entry source file and everything it includes
pub fn compile_file(entry: &Path, config: &CompilerConfig) -> Result<CompileOutcome, String> {
    let program = IncludeResolver::new().resolve(entry)?;
    compile_program(program, config)
}

/// Compile a single in-memory unit (no include resolution)
pub fn compile_source(
    source: &str,
    file_name: &str,
    config: &CompilerConfig,
) -> Result<CompileOutcome, String> {
    let mut parser = Parser::new(source, file_name)?;
    let unit = parser.parse_unit()?;
    let program = Program {
        imports: Vec::new(),
        units: vec![unit],
    };
    compile_program(program, config)
}

/// Run the analysis and code generation pipeline over a parsed program
pub fn compile_program(
    mut program: Program,
    config: &CompilerConfig,
) -> Result<CompileOutcome, String> {
    let mut manifests = Vec::new();
    for path in &config.import_manifest_paths {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read import manifest '{}': {}", path.display(), e))?;
        manifests.push(ImportManifest::parse(&content)?);
    }

    if config.fold_constants {
        folding::fold_program(&mut program);
    }

    let has_main = program.units.iter().any(|unit| {
        unit.functions
            .iter()
            .any(|f| f.name == "main" && f.owner.is_none() && !f.is_external())
    });
    if !has_main {
        return Err("No main function defined".to_string());
    }

    let session = Session::new(program);
    session.with_ctx(|ctx| {
        let diagnostics = SemanticRunner::run(ctx);
        if has_errors(&diagnostics) {
            return Ok(CompileOutcome {
                diagnostics,
                assembly: None,
            });
        }
        let mut codegen = CodeGen::new(ctx);
        match codegen.generate(&manifests) {
            Ok(assembly) => Ok(CompileOutcome {
                diagnostics,
                assembly: Some(assembly),
            }),
            // A generator failure after a clean analysis is a compiler
            // bug; abort emission rather than writing broken assembly.
            Err(e) => Err(format!("internal code generation failure: {}", e)),
        }
    })?
}

/// Assemble an emitted `.asm` file with the external FASM toolchain
pub fn assemble_with_fasm(asm_path: &Path, output_path: &Path) -> Result<(), String> {
    let output = Command::new("fasm")
        .arg(asm_path)
        .arg(output_path)
        .output()
        .map_err(|e| format!("Failed to run fasm: {}. Is FASM installed?", e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        return Err(format!("FASM failed:\n{}{}", stdout, stderr));
    }
    Ok(())
}
