//! Tilde Compiler CLI
//!
//! Command-line interface for compiling .td programs to FASM assembly
//! and, optionally, assembling them into PE executables.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "tdc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tilde compiler - compile .td programs to x86 PE executables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .td file to FASM assembly
    Build {
        /// Input .td source file
        input: PathBuf,

        /// Output assembly path (defaults to input filename with .asm)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run FASM on the emitted assembly to produce an executable
        #[arg(long)]
        assemble: bool,

        /// Fold integer-constant expressions before code generation
        #[arg(long)]
        fold_constants: bool,

        /// Import manifest file(s) mapping external symbols to DLLs
        #[arg(long = "import-manifest", value_name = "PATH")]
        import_manifests: Vec<PathBuf>,
    },

    /// Analyze a .td file and report diagnostics without emitting
    Check {
        /// Input .td source file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            assemble,
            fold_constants,
            import_manifests,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("asm"));
            run_build(&input, &output, assemble, fold_constants, &import_manifests);
        }
        Commands::Check { input } => {
            run_check(&input);
        }
        Commands::Completions { shell } => {
            run_completions(shell);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "tdc", &mut io::stdout());
}

fn run_build(
    input: &Path,
    output: &Path,
    assemble: bool,
    fold_constants: bool,
    import_manifests: &[PathBuf],
) {
    let config = tdc::CompilerConfig::new()
        .with_constant_folding(fold_constants)
        .with_import_manifests(import_manifests.iter().cloned());

    let outcome = match tdc::compile_file(input, &config) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    eprint!("{}", tdc::format_diagnostics(&outcome.diagnostics));

    let Some(assembly) = outcome.assembly else {
        process::exit(1);
    };

    if let Err(e) = std::fs::write(output, assembly) {
        eprintln!("Error: failed to write {}: {}", output.display(), e);
        process::exit(1);
    }
    println!("Compiled {} -> {}", input.display(), output.display());

    if assemble {
        let exe = output.with_extension("exe");
        match tdc::assemble_with_fasm(output, &exe) {
            Ok(()) => println!("Assembled {} -> {}", output.display(), exe.display()),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
    }
}

fn run_check(input: &Path) {
    let outcome = match tdc::compile_file(input, &tdc::CompilerConfig::default()) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    eprint!("{}", tdc::format_diagnostics(&outcome.diagnostics));
    if tdc::has_errors(&outcome.diagnostics) {
        process::exit(1);
    }
    println!("{}: no errors", input.display());
}
