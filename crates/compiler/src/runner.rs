//! Semantic runner
//!
//! Drives analysis over every function, method, constructor, and
//! destructor in the program. Analyzing a call can trigger
//! monomorphization, which registers new structs (and so new methods), so
//! the runner loops to a fixed point: after each full pass it compares the
//! repository's flat struct count and re-runs while it grows, reading the
//! instance list fresh each pass. Template structs are never analyzed.
//! Internal invariant violations surface as one fatal diagnostic instead
//! of a crash.

use crate::analyzer::SemanticAnalyzer;
use crate::context::{Ctx, Scope};
use crate::diagnostics::{Diagnostic, Severity};
use crate::resolver;
use std::collections::HashSet;

pub struct SemanticRunner;

impl SemanticRunner {
    /// Analyze the whole program to a fixed point and return its
    /// diagnostics in encounter order.
    pub fn run(ctx: &Ctx<'_, '_>) -> Vec<Diagnostic> {
        loop {
            let before = ctx.repository.struct_count();
            let mut analyzer = SemanticAnalyzer::new();

            for (unit_index, unit) in ctx.program.units.iter().enumerate() {
                for func in &unit.functions {
                    let scope = Scope::new(func.namespace.clone(), unit_index);
                    analyzer.analyze_function(ctx, func, scope);
                    if analyzer.fatal.is_some() {
                        return Self::fatal(ctx, analyzer);
                    }
                }
                for def in &unit.structs {
                    if def.is_template() {
                        continue;
                    }
                    Self::analyze_struct(ctx, &mut analyzer, def, def.namespace.clone(), unit_index);
                    if analyzer.fatal.is_some() {
                        return Self::fatal(ctx, analyzer);
                    }
                }
            }

            // Instances registered before this point; ones added while
            // analyzing the snapshot get picked up on the next pass.
            for instance in ctx.monomorphizer.instances() {
                Self::analyze_struct(
                    ctx,
                    &mut analyzer,
                    instance.def,
                    instance.namespace.clone(),
                    instance.unit_index,
                );
                if analyzer.fatal.is_some() {
                    return Self::fatal(ctx, analyzer);
                }
            }

            if ctx.repository.struct_count() == before {
                let mut diagnostics = analyzer.diagnostics;
                Self::validate_definitions(ctx, &mut diagnostics);
                return diagnostics;
            }
            // New structs appeared: discard this pass's diagnostics and
            // re-analyze so nothing is reported twice.
        }
    }

    fn analyze_struct(
        ctx: &Ctx<'_, '_>,
        analyzer: &mut SemanticAnalyzer,
        def: &crate::ast::StructDefinition,
        namespace: Option<String>,
        unit_index: usize,
    ) {
        for method in &def.methods {
            let scope = Scope::new(namespace.clone(), unit_index);
            analyzer.analyze_function(ctx, method, scope);
        }
        for ctor in &def.constructors {
            let scope = Scope::new(namespace.clone(), unit_index);
            analyzer.analyze_constructor(ctx, def, ctor, scope);
        }
        for dtor in &def.destructors {
            let scope = Scope::new(namespace.clone(), unit_index);
            analyzer.analyze_destructor(ctx, dtor, scope);
        }
    }

    /// Post-analysis definition checks: every non-template struct must
    /// have a computable layout and a well-formed vtable.
    fn validate_definitions(ctx: &Ctx<'_, '_>, diagnostics: &mut Vec<Diagnostic>) {
        let mut seen = HashSet::new();
        let mut check = |def: &crate::ast::StructDefinition, unit_index: usize| {
            let fqn = def.fqn();
            let file = &ctx.unit(unit_index).file_path;
            if let Err(e) = ctx.layouts.size_of(ctx, &fqn) {
                if seen.insert(e.clone()) {
                    diagnostics.push(Diagnostic::error(file, &def.name_token, e));
                }
            }
            if let Err(e) = ctx.vtables.vtable(ctx, &fqn) {
                if seen.insert(e.clone()) {
                    diagnostics.push(Diagnostic::error(file, &def.name_token, e));
                }
            }
            if let Err(e) = resolver::resolve_base(ctx, def) {
                if seen.insert(e.clone()) {
                    diagnostics.push(Diagnostic::error(file, &def.name_token, e));
                }
            }
        };

        for (unit_index, unit) in ctx.program.units.iter().enumerate() {
            for def in &unit.structs {
                if !def.is_template() {
                    check(def, unit_index);
                }
            }
        }
        for instance in ctx.monomorphizer.instances() {
            check(instance.def, instance.unit_index);
        }
    }

    fn fatal(ctx: &Ctx<'_, '_>, analyzer: SemanticAnalyzer) -> Vec<Diagnostic> {
        let message = analyzer
            .fatal
            .unwrap_or_else(|| "internal: analysis failed".to_string());
        let file = ctx
            .program
            .units
            .first()
            .map(|u| u.file_path.clone())
            .unwrap_or_default();
        vec![Diagnostic {
            file,
            message: format!("internal error during analysis: {}", message),
            line: 0,
            column: 0,
            severity: Severity::Error,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::has_errors;
    use crate::session::test_support::SessionFixture;

    fn run(source: &str) -> Vec<Diagnostic> {
        let fixture = SessionFixture::parse(source);
        fixture.with_ctx(SemanticRunner::run)
    }

    #[test]
    fn test_clean_program_has_no_diagnostics() {
        let diags = run("int main() { return 2 + 3; }");
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    }

    #[test]
    fn test_generic_use_triggers_instantiation() {
        let fixture = SessionFixture::parse(
            "struct List<T> { T* buf; int len; };\n\
             int main() { List<int> xs; xs.len = 0; return sizeof(List<int>); }",
        );
        fixture.with_ctx(|ctx| {
            let diags = SemanticRunner::run(ctx);
            assert!(!has_errors(&diags), "unexpected errors: {:?}", diags);
            // The instance was registered and laid out: ptr + int
            assert!(ctx.repository.find_struct("List__int").is_some());
            assert_eq!(ctx.layouts.size_of(ctx, "List__int").unwrap(), 8);
        });
    }

    #[test]
    fn test_fixed_point_reaches_nested_instances() {
        // Analyzing Outer<int>'s method requires Inner<int>, which only
        // appears once Outer__int's body is analyzed on a later pass.
        let fixture = SessionFixture::parse(
            "struct Inner<T> { T value; };\n\
             struct Outer<T> { int make() { Inner<T> i; i.value = 0; return sizeof(Inner<T>); } };\n\
             int main() { Outer<int> o; return o.make(); }",
        );
        fixture.with_ctx(|ctx| {
            let diags = SemanticRunner::run(ctx);
            assert!(!has_errors(&diags), "unexpected errors: {:?}", diags);
            assert!(ctx.repository.find_struct("Outer__int").is_some());
            assert!(ctx.repository.find_struct("Inner__int").is_some());
        });
    }

    #[test]
    fn test_templates_themselves_are_not_analyzed() {
        // The template body references T members that would not type-check
        // as a concrete struct; with no instantiation nothing is analyzed.
        let diags = run("struct List<T> { T* buf; T get(int i) { T* p = buf + i; return *p; } };\nint main() { return 0; }");
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    }

    #[test]
    fn test_recursive_layout_is_reported_once() {
        let diags = run("struct R { R inner; };\nint main() { return 0; }");
        let layout_errors: Vec<_> = diags
            .iter()
            .filter(|d| d.message.contains("recursively contains itself"))
            .collect();
        assert_eq!(layout_errors.len(), 1);
    }

    #[test]
    fn test_bad_override_is_reported() {
        let diags = run(
            "struct A { int f() { return 1; } };\n\
             struct B : A { override int f() { return 2; } };\n\
             int main() { return 0; }",
        );
        assert!(has_errors(&diags));
        assert!(diags.iter().any(|d| d.message.contains("marked override")));
    }

    #[test]
    fn test_diagnostics_not_duplicated_across_passes() {
        // The generic use forces a second pass; the warning in main must
        // still appear exactly once.
        let diags = run(
            "struct List<T> { T* buf; };\n\
             int main() { List<int> xs; int unused = 1; return 0; }",
        );
        let unused: Vec<_> = diags
            .iter()
            .filter(|d| d.message.contains("unused local variable 'unused'"))
            .collect();
        assert_eq!(unused.len(), 1);
    }
}
