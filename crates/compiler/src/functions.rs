//! Function, method, constructor, and enum-member resolution
//!
//! Free functions resolve by name against the caller's namespace, its
//! usings, and the global scope; exactly one namespace may supply the name.
//! Methods resolve by walking the inheritance chain upward. Constructor
//! overloads match by argument FQNs with the implicit conversions `int` to
//! `char` and `int` to any pointer (the latter admits allocator return
//! values). Destructor lookup considers only the struct's own destructor;
//! the chain is not walked.

use crate::ast::{ConstructorDeclaration, DestructorDeclaration, FunctionDeclaration, StructDefinition};
use crate::context::{Ctx, Scope};
use crate::resolver;
use crate::types;

/// A free function together with its defining unit (whose usings govern
/// the resolution of its signature)
#[derive(Debug, Clone, Copy)]
pub struct FunctionHit<'p> {
    pub func: &'p FunctionDeclaration,
    pub unit_index: usize,
}

impl<'p> FunctionHit<'p> {
    /// Scope for resolving the function's own signature
    pub fn scope(&self) -> Scope {
        Scope::new(self.func.namespace.clone(), self.unit_index)
    }
}

/// A method together with the struct that defines it
#[derive(Clone, Copy)]
pub struct MethodHit<'p> {
    pub defining: &'p StructDefinition,
    pub func: &'p FunctionDeclaration,
}

/// Resolve an unqualified free-function call. More than one visible
/// namespace supplying the name is ambiguous.
pub fn find_free_function<'p>(
    ctx: &Ctx<'_, 'p>,
    name: &str,
    scope: &Scope,
) -> Result<Option<FunctionHit<'p>>, String> {
    let usings = &ctx.unit(scope.unit_index).usings;

    let mut allowed: Vec<Option<String>> = Vec::new();
    if let Some(ns) = &scope.namespace {
        allowed.push(Some(ns.clone()));
    }
    for using in usings {
        if using.alias.is_none() {
            allowed.push(Some(using.namespace.clone()));
        }
    }
    allowed.push(None);

    let mut matched_namespaces: Vec<Option<String>> = Vec::new();
    let mut first_hit: Option<FunctionHit<'p>> = None;
    for namespace in &allowed {
        if matched_namespaces.contains(namespace) {
            continue;
        }
        if let Some(hit) = find_in_namespace(ctx, name, namespace.as_deref()) {
            matched_namespaces.push(namespace.clone());
            if first_hit.is_none() {
                first_hit = Some(hit);
            }
        }
    }

    match matched_namespaces.len() {
        0 => Ok(None),
        1 => Ok(first_hit),
        _ => Err(format!(
            "Ambiguous call to '{}': defined in {}",
            name,
            matched_namespaces
                .iter()
                .map(|ns| ns.as_deref().unwrap_or("the global namespace").to_string())
                .collect::<Vec<_>>()
                .join(" and ")
        )),
    }
}

/// Resolve a qualified free-function call (`ns::f` or `alias::f`)
pub fn find_free_function_qualified<'p>(
    ctx: &Ctx<'_, 'p>,
    qualifier: &str,
    name: &str,
    scope: &Scope,
) -> Option<FunctionHit<'p>> {
    let usings = &ctx.unit(scope.unit_index).usings;
    let namespace = resolver::resolve_namespace_qualifier(usings, qualifier);
    find_in_namespace(ctx, name, Some(&namespace))
}

fn find_in_namespace<'p>(
    ctx: &Ctx<'_, 'p>,
    name: &str,
    namespace: Option<&str>,
) -> Option<FunctionHit<'p>> {
    for (unit_index, unit) in ctx.program.units.iter().enumerate() {
        for func in &unit.functions {
            if func.owner.is_none() && func.name == name && func.namespace.as_deref() == namespace
            {
                return Some(FunctionHit { func, unit_index });
            }
        }
    }
    None
}

/// Resolve a method on a struct, walking the inheritance chain upward and
/// returning the first match.
pub fn find_method<'p>(
    ctx: &Ctx<'_, 'p>,
    owner_fqn: &str,
    name: &str,
) -> Result<Option<MethodHit<'p>>, String> {
    let mut visited = std::collections::HashSet::new();
    let mut current = owner_fqn.to_string();
    loop {
        if !visited.insert(current.clone()) {
            return Err(format!("cyclic inheritance involving '{}'", current));
        }
        let def = match ctx.repository.find_struct(&current) {
            Some(def) => def,
            None => return Ok(None),
        };
        if let Some(func) = def.find_method(name) {
            return Ok(Some(MethodHit {
                defining: def,
                func,
            }));
        }
        match resolver::resolve_base(ctx, def)? {
            Some(base) => current = base,
            None => return Ok(None),
        }
    }
}

/// Walk the inheritance chain for a member variable, returning the
/// defining struct and the member.
pub fn find_member<'p>(
    ctx: &Ctx<'_, 'p>,
    owner_fqn: &str,
    name: &str,
) -> Result<Option<(&'p StructDefinition, &'p crate::ast::MemberVariable)>, String> {
    let mut visited = std::collections::HashSet::new();
    let mut current = owner_fqn.to_string();
    loop {
        if !visited.insert(current.clone()) {
            return Err(format!("cyclic inheritance involving '{}'", current));
        }
        let def = match ctx.repository.find_struct(&current) {
            Some(def) => def,
            None => return Ok(None),
        };
        if let Some(member) = def.find_member(name) {
            return Ok(Some((def, member)));
        }
        match resolver::resolve_base(ctx, def)? {
            Some(base) => current = base,
            None => return Ok(None),
        }
    }
}

/// True when `base_fqn` appears in `derived_fqn`'s inheritance chain
/// (strictly above it).
pub fn is_base_of(ctx: &Ctx<'_, '_>, base_fqn: &str, derived_fqn: &str) -> bool {
    let mut visited = std::collections::HashSet::new();
    let mut current = derived_fqn.to_string();
    loop {
        if !visited.insert(current.clone()) {
            return false;
        }
        let def = match ctx.repository.find_struct(&current) {
            Some(def) => def,
            None => return false,
        };
        match resolver::resolve_base(ctx, def) {
            Ok(Some(base)) => {
                if base == base_fqn {
                    return true;
                }
                current = base;
            }
            _ => return false,
        }
    }
}

/// True when an argument of type `arg` may initialize a parameter of type
/// `param` without an explicit conversion.
pub fn conversion_allowed(ctx: &Ctx<'_, '_>, param_fqn: &str, arg_fqn: &str) -> bool {
    if param_fqn == arg_fqn {
        return true;
    }
    // int literals narrow to char parameters
    if param_fqn == "char" && arg_fqn == "int" {
        return true;
    }
    // any pointer accepts an int, so allocator results assign cleanly
    if types::is_pointer(param_fqn) && arg_fqn == "int" {
        return true;
    }
    // a derived pointer converts to its base pointer
    if let (Some(param_inner), Some(arg_inner)) =
        (types::pointee(param_fqn), types::pointee(arg_fqn))
    {
        if !types::is_pointer(param_inner)
            && !types::is_pointer(arg_inner)
            && is_base_of(ctx, param_inner, arg_inner)
        {
            return true;
        }
    }
    false
}

/// Select a constructor overload by argument FQNs. First full match wins.
pub fn find_constructor<'p>(
    ctx: &Ctx<'_, 'p>,
    struct_fqn: &str,
    arg_fqns: &[String],
) -> Result<Option<&'p ConstructorDeclaration>, String> {
    let def = match ctx.repository.find_struct(struct_fqn) {
        Some(def) => def,
        None => return Ok(None),
    };
    let scope = resolver::scope_for_struct(ctx, def)?;

    'ctors: for ctor in &def.constructors {
        if ctor.parameters.len() != arg_fqns.len() {
            continue;
        }
        for (param, arg_fqn) in ctor.parameters.iter().zip(arg_fqns) {
            let param_fqn = resolver::resolve_type(ctx, &param.ty, &scope)?;
            if !conversion_allowed(ctx, &param_fqn, arg_fqn) {
                continue 'ctors;
            }
        }
        return Ok(Some(ctor));
    }
    Ok(None)
}

/// The struct's own destructor. A derived class without a destructor does
/// not implicitly use its base's.
pub fn find_destructor<'p>(
    ctx: &Ctx<'_, 'p>,
    struct_fqn: &str,
) -> Option<&'p DestructorDeclaration> {
    ctx.repository
        .find_struct(struct_fqn)
        .and_then(|def| def.destructor())
}

/// Resolve an enum member to its value. Qualified lookups go through enum
/// type resolution; unqualified lookups scan the current namespace, each
/// plain using, and the global namespace in order, first match wins.
pub fn find_enum_value(
    ctx: &Ctx<'_, '_>,
    qualifier: Option<&str>,
    member: &str,
    scope: &Scope,
) -> Option<i64> {
    if let Some(qualifier) = qualifier {
        let enum_fqn = resolver::resolve_enum_type(ctx, qualifier, scope)?;
        return ctx
            .repository
            .find_enum(&enum_fqn)
            .and_then(|def| def.find_member(member))
            .map(|m| m.value);
    }

    let usings = &ctx.unit(scope.unit_index).usings;
    let mut search_order: Vec<Option<&str>> = Vec::new();
    if let Some(ns) = &scope.namespace {
        search_order.push(Some(ns.as_str()));
    }
    for using in usings {
        if using.alias.is_none() {
            search_order.push(Some(using.namespace.as_str()));
        }
    }
    search_order.push(None);

    for namespace in search_order {
        for unit in &ctx.program.units {
            for def in &unit.enums {
                if def.namespace.as_deref() == namespace {
                    if let Some(m) = def.find_member(member) {
                        return Some(m.value);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::SessionFixture;

    #[test]
    fn test_free_function_by_namespace() {
        let fixture = SessionFixture::parse(
            "namespace app { int run() { return 1; } }\nint helper() { return 2; }",
        );
        fixture.with_ctx(|ctx| {
            let global = Scope::new(None, 0);
            let in_app = Scope::new(Some("app".to_string()), 0);

            assert!(find_free_function(ctx, "helper", &global).unwrap().is_some());
            assert!(find_free_function(ctx, "run", &global).unwrap().is_none());
            assert!(find_free_function(ctx, "run", &in_app).unwrap().is_some());
        });
    }

    #[test]
    fn test_free_function_ambiguity() {
        let fixture = SessionFixture::parse(
            "using app;\nnamespace app { int run() { return 1; } }\nint run() { return 2; }",
        );
        fixture.with_ctx(|ctx| {
            let scope = Scope::new(None, 0);
            let err = find_free_function(ctx, "run", &scope).unwrap_err();
            assert!(err.contains("Ambiguous call to 'run'"));
        });
    }

    #[test]
    fn test_qualified_free_function_through_alias() {
        let fixture = SessionFixture::parse(
            "using a = app;\nnamespace app { int run() { return 1; } }",
        );
        fixture.with_ctx(|ctx| {
            let scope = Scope::new(None, 0);
            assert!(find_free_function_qualified(ctx, "a", "run", &scope).is_some());
            assert!(find_free_function_qualified(ctx, "app", "run", &scope).is_some());
            assert!(find_free_function_qualified(ctx, "b", "run", &scope).is_none());
        });
    }

    #[test]
    fn test_method_resolution_walks_inheritance() {
        let fixture = SessionFixture::parse(
            "struct A { int f() { return 1; } };\nstruct B : A { int g() { return 2; } };",
        );
        fixture.with_ctx(|ctx| {
            let hit = find_method(ctx, "B", "f").unwrap().unwrap();
            assert_eq!(hit.defining.name, "A");
            let own = find_method(ctx, "B", "g").unwrap().unwrap();
            assert_eq!(own.defining.name, "B");
            assert!(find_method(ctx, "B", "missing").unwrap().is_none());
        });
    }

    #[test]
    fn test_constructor_overload_selection() {
        let fixture = SessionFixture::parse(
            "struct File {\n\
             File(int fd) { }\n\
             File(char* name) { }\n\
             File(int fd, int mode) { }\n\
             };",
        );
        fixture.with_ctx(|ctx| {
            let by_int = find_constructor(ctx, "File", &["int".to_string()])
                .unwrap()
                .unwrap();
            assert_eq!(by_int.parameters[0].name, "fd");

            let by_name = find_constructor(ctx, "File", &["char*".to_string()])
                .unwrap()
                .unwrap();
            assert_eq!(by_name.parameters[0].name, "name");

            let two = find_constructor(ctx, "File", &["int".to_string(), "int".to_string()])
                .unwrap()
                .unwrap();
            assert_eq!(two.parameters.len(), 2);

            assert!(
                find_constructor(ctx, "File", &["File".to_string()])
                    .unwrap()
                    .is_none()
            );
        });
    }

    #[test]
    fn test_constructor_implicit_conversions() {
        // int matches a char parameter and any pointer parameter
        let fixture = SessionFixture::parse(
            "struct Buf { Buf(char c) { } };\nstruct Ptr { Ptr(int* p) { } };",
        );
        fixture.with_ctx(|ctx| {
            assert!(
                find_constructor(ctx, "Buf", &["int".to_string()])
                    .unwrap()
                    .is_some()
            );
            assert!(
                find_constructor(ctx, "Ptr", &["int".to_string()])
                    .unwrap()
                    .is_some()
            );
        });
    }

    #[test]
    fn test_destructor_is_not_inherited() {
        let fixture = SessionFixture::parse(
            "struct A { ~A() { } };\nstruct B : A { int x; };",
        );
        fixture.with_ctx(|ctx| {
            assert!(find_destructor(ctx, "A").is_some());
            assert!(find_destructor(ctx, "B").is_none());
        });
    }

    #[test]
    fn test_enum_value_lookup() {
        let fixture = SessionFixture::parse(
            "enum Color { Red, Green = 5 };\nnamespace app { enum Mode { Fast, Slow }; }",
        );
        fixture.with_ctx(|ctx| {
            let global = Scope::new(None, 0);
            let in_app = Scope::new(Some("app".to_string()), 0);

            assert_eq!(find_enum_value(ctx, Some("Color"), "Green", &global), Some(5));
            assert_eq!(find_enum_value(ctx, None, "Red", &global), Some(0));
            // Unqualified member of a namespaced enum is visible inside it
            assert_eq!(find_enum_value(ctx, None, "Slow", &in_app), Some(1));
            assert_eq!(find_enum_value(ctx, None, "Slow", &global), None);
            assert_eq!(find_enum_value(ctx, Some("app::Mode"), "Slow", &global), Some(1));
        });
    }
}
