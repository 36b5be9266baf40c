//! Include resolution for Tilde
//!
//! Resolves `#include "path"` directives, parses each reachable file into
//! its own `CompilationUnit`, and collects `#import "lib.dll"` directives
//! into the program-wide import list. Directives are stripped before the
//! text reaches the lexer; stripped lines are kept blank so token positions
//! stay accurate.

use crate::ast::Program;
use crate::parser::Parser;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A directive found in a source file
#[derive(Debug, Clone, PartialEq)]
enum Directive {
    Include(String),
    Import(String),
}

/// Resolver for `#include` and `#import` directives
pub struct IncludeResolver {
    /// Canonical paths already included, to prevent double inclusion
    included_files: HashSet<PathBuf>,
    /// User-imported libraries in first-seen order
    imports: Vec<String>,
    /// Program-wide string-literal label counter, threaded through parsers
    next_string_label: usize,
}

impl Default for IncludeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IncludeResolver {
    pub fn new() -> Self {
        IncludeResolver {
            included_files: HashSet::new(),
            imports: Vec::new(),
            next_string_label: 0,
        }
    }

    /// Resolve the entry file and everything it includes into a `Program`.
    /// Included units precede the including unit, depth first.
    pub fn resolve(mut self, entry: &Path) -> Result<Program, String> {
        let mut program = Program::default();
        self.resolve_file(entry, &mut program)?;
        program.imports = self.imports;
        Ok(program)
    }

    fn resolve_file(&mut self, path: &Path, program: &mut Program) -> Result<(), String> {
        let canonical = path
            .canonicalize()
            .map_err(|e| format!("Failed to resolve {}: {}", path.display(), e))?;
        if !self.included_files.insert(canonical.clone()) {
            return Ok(());
        }

        let source = std::fs::read_to_string(&canonical)
            .map_err(|e| format!("Failed to read {}: {}", canonical.display(), e))?;
        let (clean, directives) = strip_directives(&source, &canonical)?;

        let source_dir = canonical.parent().unwrap_or(Path::new("."));
        for directive in &directives {
            match directive {
                Directive::Include(rel) => {
                    self.resolve_file(&source_dir.join(rel), program)?;
                }
                Directive::Import(lib) => {
                    if !self.imports.contains(lib) {
                        self.imports.push(lib.clone());
                    }
                }
            }
        }

        let mut parser = Parser::with_string_start(&clean, &canonical, self.next_string_label)?;
        let unit = parser.parse_unit()?;
        self.next_string_label = parser.string_label_counter();
        program.units.push(unit);
        Ok(())
    }
}

/// Split a source text into directive-free text (directive lines blanked)
/// and the list of directives found.
fn strip_directives(source: &str, path: &Path) -> Result<(String, Vec<Directive>), String> {
    let mut clean = String::with_capacity(source.len());
    let mut directives = Vec::new();

    for (index, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix('#') {
            let directive = parse_directive(rest, path, index + 1)?;
            directives.push(directive);
            clean.push('\n');
        } else {
            clean.push_str(line);
            clean.push('\n');
        }
    }
    Ok((clean, directives))
}

fn parse_directive(rest: &str, path: &Path, line: usize) -> Result<Directive, String> {
    let rest = rest.trim();
    let (keyword, argument) = match rest.split_once(char::is_whitespace) {
        Some((k, a)) => (k, a.trim()),
        None => (rest, ""),
    };
    let unquoted = argument
        .strip_prefix('"')
        .and_then(|a| a.strip_suffix('"'))
        .ok_or_else(|| {
            format!(
                "{}:{}: expected a quoted argument after '#{}'",
                path.display(),
                line,
                keyword
            )
        });
    match keyword {
        "include" => Ok(Directive::Include(unquoted?.to_string())),
        "import" => Ok(Directive::Import(unquoted?.to_string())),
        other => Err(format!(
            "{}:{}: unknown directive '#{}'",
            path.display(),
            line,
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_strip_directives_keeps_line_numbers() {
        let source = "#include \"util.td\"\nint main() { return 0; }\n";
        let (clean, directives) = strip_directives(source, Path::new("main.td")).unwrap();
        assert_eq!(directives, vec![Directive::Include("util.td".to_string())]);
        // The directive line is blanked, so `int` is still on line 2
        assert!(clean.starts_with('\n'));
        let tokens = crate::lexer::tokenize(&clean, "main.td").unwrap();
        assert_eq!(tokens[0].line, 2);
    }

    #[test]
    fn test_unknown_directive() {
        let err = strip_directives("#pragma once\n", Path::new("x.td")).unwrap_err();
        assert!(err.contains("unknown directive"));
        assert!(err.contains("#pragma"));
    }

    #[test]
    fn test_unquoted_argument() {
        let err = strip_directives("#include util.td\n", Path::new("x.td")).unwrap_err();
        assert!(err.contains("quoted argument"));
    }

    #[test]
    fn test_resolve_includes_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("util.td"),
            "int helper() { return 1; }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("extra.td"),
            "#include \"util.td\"\nint extra() { return 2; }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("main.td"),
            "#include \"util.td\"\n#include \"extra.td\"\n#import \"user32.dll\"\nint main() { return helper(); }\n",
        )
        .unwrap();

        let program = IncludeResolver::new()
            .resolve(&dir.path().join("main.td"))
            .unwrap();
        // util.td included once despite the diamond
        assert_eq!(program.units.len(), 3);
        assert_eq!(program.imports, vec!["user32.dll"]);
        let names: Vec<&str> = program
            .units
            .iter()
            .flat_map(|u| u.functions.iter().map(|f| f.name.as_str()))
            .collect();
        assert_eq!(names, vec!["helper", "extra", "main"]);
    }

    #[test]
    fn test_string_labels_unique_across_units() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.td"),
            "int f() { printf(\"one\"); return 0; }\nint printf(char* fmt);\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("main.td"),
            "#include \"a.td\"\nint main() { printf(\"two\"); return 0; }\n",
        )
        .unwrap();

        let program = IncludeResolver::new()
            .resolve(&dir.path().join("main.td"))
            .unwrap();
        let mut labels = Vec::new();
        for unit in &program.units {
            for func in &unit.functions {
                if let Some(body) = &func.body {
                    for stmt in body {
                        crate::ast::visit_statement_expressions(stmt, &mut |e| {
                            if let crate::ast::Expression::StringLiteral { label, .. } = e {
                                labels.push(label.clone());
                            }
                        });
                    }
                }
            }
        }
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), 2);
    }
}
