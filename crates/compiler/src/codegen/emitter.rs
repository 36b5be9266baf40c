//! FASM module emission
//!
//! Assembles the final source text: the PE format directive and entry
//! point, `.data` with NUL-terminated string literals, `.rdata` with one
//! `dd` per vtable slot (present only when some struct has a vtable),
//! `.text` with the start stub and all function bodies, and the `.idata`
//! import section partitioned across kernel32, msvcrt, and user-imported
//! libraries.

use super::state::{slot_target, vtable_label};
use super::{CodeGen, CodeGenError};
use crate::ast::{Expression, StructDefinition, visit_statement_expressions};
use crate::imports::{ImportManifest, ImportTable, library_identifier};
use std::collections::HashSet;
use std::fmt::Write as _;

impl<'c, 'p> CodeGen<'c, 'p> {
    /// Produce the complete FASM module around the accumulated `.text`
    pub(super) fn assemble(&self, manifests: &[ImportManifest]) -> Result<String, CodeGenError> {
        let mut out = String::new();
        writeln!(out, "format PE GUI 4.0")?;
        writeln!(out, "entry start")?;
        writeln!(out)?;
        writeln!(out, "include 'win32a.inc'")?;
        writeln!(out)?;

        // .data: string literals in label order
        writeln!(out, "section '.data' data readable writeable")?;
        for (label, value) in self.collect_strings() {
            writeln!(out, "{} db {}", label, escape_string(&value))?;
        }
        writeln!(out)?;

        // .rdata: vtables, only when at least one exists
        let vtables = self.collect_vtables()?;
        if !vtables.is_empty() {
            writeln!(out, "section '.rdata' data readable")?;
            for (label, targets) in vtables {
                writeln!(out, "{}:", label)?;
                for target in targets {
                    writeln!(out, "    dd {}", target)?;
                }
            }
            writeln!(out)?;
        }

        // .text: start stub forwards main's result to ExitProcess
        writeln!(out, "section '.text' code readable executable")?;
        writeln!(out, "start:")?;
        writeln!(out, "    call _main")?;
        writeln!(out, "    push eax")?;
        writeln!(out, "    call [ExitProcess]")?;
        writeln!(out)?;
        out.push_str(&self.text);
        writeln!(out)?;

        // .idata: import table
        let table = ImportTable::new(&self.ctx.program.imports, manifests);
        let externals: Vec<String> = self.externals.iter().cloned().collect();
        let by_dll = table.partition(&externals);

        writeln!(out, "section '.idata' import data readable writeable")?;
        let libraries: Vec<String> = by_dll
            .keys()
            .map(|dll| format!("{}, '{}'", library_identifier(dll), dll))
            .collect();
        writeln!(out, "    library {}", libraries.join(", "))?;
        for (dll, symbols) in &by_dll {
            let entries: Vec<String> = symbols
                .iter()
                .map(|s| format!("{}, '{}'", s, s))
                .collect();
            writeln!(
                out,
                "    import {}, {}",
                library_identifier(dll),
                entries.join(", ")
            )?;
        }

        Ok(out)
    }

    /// All string literals of emitted bodies, first occurrence per label.
    /// Monomorphized clones share their template's labels, so duplicates
    /// collapse.
    fn collect_strings(&self) -> Vec<(String, String)> {
        let mut pool = StringPool::default();

        for unit in &self.ctx.program.units {
            for func in &unit.functions {
                if let Some(body) = &func.body {
                    pool.take_statements(body);
                }
            }
            for def in &unit.structs {
                if !def.is_template() {
                    pool.take_struct(def);
                }
            }
        }
        for instance in self.ctx.monomorphizer.instances() {
            pool.take_struct(instance.def);
        }

        let mut strings = pool.strings;
        strings.sort_by_key(|(label, _)| {
            label
                .trim_start_matches("str")
                .parse::<usize>()
                .unwrap_or(usize::MAX)
        });
        strings
    }

    fn collect_vtables(&self) -> Result<Vec<(String, Vec<String>)>, CodeGenError> {
        let mut vtables = Vec::new();
        let mut push = |def: &StructDefinition| -> Result<(), CodeGenError> {
            let fqn = def.fqn();
            let slots = self
                .ctx
                .vtables
                .vtable(self.ctx, &fqn)
                .map_err(CodeGenError::Logic)?;
            if !slots.is_empty() {
                vtables.push((
                    vtable_label(&fqn),
                    slots.iter().map(slot_target).collect(),
                ));
            }
            Ok(())
        };
        for unit in &self.ctx.program.units {
            for def in &unit.structs {
                if !def.is_template() {
                    push(def)?;
                }
            }
        }
        for instance in self.ctx.monomorphizer.instances() {
            push(instance.def)?;
        }
        Ok(vtables)
    }
}

/// Accumulator for string-literal data, deduplicated by label
#[derive(Default)]
struct StringPool {
    seen: HashSet<String>,
    strings: Vec<(String, String)>,
}

impl StringPool {
    fn take_statements(&mut self, statements: &[crate::ast::Statement]) {
        for stmt in statements {
            visit_statement_expressions(stmt, &mut |expr| {
                if let Expression::StringLiteral { value, label, .. } = expr {
                    if self.seen.insert(label.clone()) {
                        self.strings.push((label.clone(), value.clone()));
                    }
                }
            });
        }
    }

    fn take_struct(&mut self, def: &StructDefinition) {
        for method in &def.methods {
            if let Some(body) = &method.body {
                self.take_statements(body);
            }
        }
        for ctor in &def.constructors {
            if let Some(args) = &ctor.base_initializer {
                for arg in args {
                    crate::ast::visit_expression(arg, &mut |expr| {
                        if let Expression::StringLiteral { value, label, .. } = expr {
                            if self.seen.insert(label.clone()) {
                                self.strings.push((label.clone(), value.clone()));
                            }
                        }
                    });
                }
            }
            self.take_statements(&ctor.body);
        }
        for dtor in &def.destructors {
            self.take_statements(&dtor.body);
        }
    }
}

/// FASM `db` operands for a NUL-terminated string. Printable runs stay
/// quoted; control characters and both quote characters are split out as
/// byte values.
fn escape_string(value: &str) -> String {
    let mut operands: Vec<String> = Vec::new();
    let mut run = String::new();
    for c in value.chars() {
        let printable = (' '..='~').contains(&c) && c != '\'' && c != '"';
        if printable {
            run.push(c);
        } else {
            if !run.is_empty() {
                operands.push(format!("'{}'", run));
                run.clear();
            }
            operands.push((c as u32).to_string());
        }
    }
    if !run.is_empty() {
        operands.push(format!("'{}'", run));
    }
    operands.push("0".to_string());
    operands.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_plain_string() {
        assert_eq!(escape_string("Hello"), "'Hello',0");
    }

    #[test]
    fn test_escape_control_characters() {
        assert_eq!(escape_string("Hi\nthere"), "'Hi',10,'there',0");
        assert_eq!(escape_string("a\tb\rc"), "'a',9,'b',13,'c',0");
    }

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape_string("it's"), "'it',39,'s',0");
        assert_eq!(escape_string("say \"hi\""), "'say ',34,'hi',34,0");
    }

    #[test]
    fn test_escape_empty_string() {
        assert_eq!(escape_string(""), "0");
    }

    #[test]
    fn test_escape_leading_newline() {
        assert_eq!(escape_string("\nx"), "10,'x',0");
    }
}
