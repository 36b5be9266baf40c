//! Type-name resolution
//!
//! Translates a `TypeNode` written in some scope (namespace + compilation
//! unit) into a fully qualified name. Qualified names go through the unit's
//! using-aliases; bare names are tried against the current namespace, every
//! plain using directive, and the global scope, and must resolve uniquely.
//! Generic instantiations delegate to the monomorphizer and resolve to the
//! mangled instance FQN.

use crate::ast::{StructDefinition, TypeNode, UsingDirective};
use crate::context::{Ctx, Scope};
use crate::types;

/// Resolve a type expression to its FQN
pub fn resolve_type(ctx: &Ctx<'_, '_>, ty: &TypeNode, scope: &Scope) -> Result<String, String> {
    match ty {
        TypeNode::Simple(token) => resolve_simple_name(ctx, &token.text, scope),
        TypeNode::Pointer(inner) => {
            let inner_fqn = resolve_type(ctx, inner, scope)?;
            Ok(types::pointer_to(&inner_fqn))
        }
        TypeNode::Generic { base, args } => ctx.monomorphizer.instantiate(ctx, base, args, scope),
    }
}

/// Resolve a bare or qualified type name to its FQN
pub fn resolve_simple_name(
    ctx: &Ctx<'_, '_>,
    name: &str,
    scope: &Scope,
) -> Result<String, String> {
    if types::is_primitive(name) || types::is_generic_parameter(name) {
        return Ok(name.to_string());
    }

    let usings = &ctx.unit(scope.unit_index).usings;

    // Qualified: substitute a using-alias for the first segment if one
    // matches, then require the result to exist.
    if let Some((qualifier, tail)) = name.split_once("::") {
        let candidate = match find_alias(usings, qualifier) {
            Some(namespace) => format!("{}::{}", namespace, tail),
            None => name.to_string(),
        };
        if ctx.repository.contains(&candidate) {
            return Ok(candidate);
        }
        return Err(format!("Unknown type '{}'", name));
    }

    // Bare: current namespace, then each plain using, then global scope.
    // Exactly one distinct FQN must exist.
    let mut matches: Vec<String> = Vec::new();
    let mut try_candidate = |candidate: String, matches: &mut Vec<String>| {
        if ctx.repository.contains(&candidate) && !matches.contains(&candidate) {
            matches.push(candidate);
        }
    };

    if let Some(ns) = &scope.namespace {
        try_candidate(format!("{}::{}", ns, name), &mut matches);
    }
    for using in usings {
        if using.alias.is_none() {
            try_candidate(format!("{}::{}", using.namespace, name), &mut matches);
        }
    }
    try_candidate(name.to_string(), &mut matches);

    match matches.len() {
        0 => Err(format!("Unknown type '{}'", name)),
        1 => Ok(matches.remove(0)),
        _ => Err(format!(
            "Ambiguous type '{}': could be {}",
            name,
            matches.join(" or ")
        )),
    }
}

/// Resolve an enum type name, if one is visible under the scope. Enums may
/// be absent, so this is an `Option` rather than an error.
pub fn resolve_enum_type(ctx: &Ctx<'_, '_>, name: &str, scope: &Scope) -> Option<String> {
    let usings = &ctx.unit(scope.unit_index).usings;

    if let Some((qualifier, tail)) = name.split_once("::") {
        let candidate = match find_alias(usings, qualifier) {
            Some(namespace) => format!("{}::{}", namespace, tail),
            None => name.to_string(),
        };
        return ctx.repository.find_enum(&candidate).map(|_| candidate);
    }

    let mut matches: Vec<String> = Vec::new();
    let mut try_candidate = |candidate: String, matches: &mut Vec<String>| {
        if ctx.repository.find_enum(&candidate).is_some() && !matches.contains(&candidate) {
            matches.push(candidate);
        }
    };
    if let Some(ns) = &scope.namespace {
        try_candidate(format!("{}::{}", ns, name), &mut matches);
    }
    for using in usings {
        if using.alias.is_none() {
            try_candidate(format!("{}::{}", using.namespace, name), &mut matches);
        }
    }
    try_candidate(name.to_string(), &mut matches);

    if matches.len() == 1 {
        Some(matches.remove(0))
    } else {
        None
    }
}

/// Resolve a namespace qualifier through the unit's using-aliases
pub fn resolve_namespace_qualifier(usings: &[UsingDirective], qualifier: &str) -> String {
    match find_alias(usings, qualifier) {
        Some(namespace) => namespace.to_string(),
        None => qualifier.to_string(),
    }
}

fn find_alias<'u>(usings: &'u [UsingDirective], qualifier: &str) -> Option<&'u str> {
    usings
        .iter()
        .find(|u| u.alias.as_deref() == Some(qualifier))
        .map(|u| u.namespace.as_str())
}

/// The resolution scope of a struct definition: its defining unit plus the
/// namespace its body was written in. For monomorphized instances (whose
/// own namespace is null) the template's namespace applies.
pub fn scope_for_struct(
    ctx: &Ctx<'_, '_>,
    def: &StructDefinition,
) -> Result<Scope, String> {
    let fqn = def.fqn();
    let unit_index = ctx
        .repository
        .defining_unit_index(&fqn)
        .ok_or_else(|| format!("internal: struct '{}' has no defining unit", fqn))?;
    let namespace = def
        .namespace
        .clone()
        .or_else(|| ctx.monomorphizer.origin_namespace(&fqn));
    Ok(Scope::new(namespace, unit_index))
}

/// Resolve a struct's base, if any, to its FQN under the struct's own scope
pub fn resolve_base(
    ctx: &Ctx<'_, '_>,
    def: &StructDefinition,
) -> Result<Option<String>, String> {
    match &def.base_name {
        None => Ok(None),
        Some(base) => {
            let scope = scope_for_struct(ctx, def)?;
            resolve_simple_name(ctx, &base.text, &scope).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::SessionFixture;

    #[test]
    fn test_bare_name_prefers_current_namespace() {
        let fixture = SessionFixture::parse(
            "namespace gfx { struct Color { int r; }; }\nstruct Color { int c; };",
        );
        fixture.with_ctx(|ctx| {
            let in_gfx = Scope::new(Some("gfx".to_string()), 0);
            let global = Scope::new(None, 0);
            // Inside gfx both gfx::Color and ::Color are visible: ambiguous
            let err = resolve_simple_name(ctx, "Color", &in_gfx).unwrap_err();
            assert!(err.contains("Ambiguous type 'Color'"));
            // At global scope only ::Color resolves
            assert_eq!(resolve_simple_name(ctx, "Color", &global).unwrap(), "Color");
        });
    }

    #[test]
    fn test_using_directive_brings_namespace_in() {
        let fixture = SessionFixture::parse(
            "using gfx;\nnamespace gfx { struct Color { int r; }; }",
        );
        fixture.with_ctx(|ctx| {
            let scope = Scope::new(None, 0);
            assert_eq!(
                resolve_simple_name(ctx, "Color", &scope).unwrap(),
                "gfx::Color"
            );
        });
    }

    #[test]
    fn test_alias_substitution() {
        let fixture = SessionFixture::parse(
            "using g = gfx;\nnamespace gfx { struct Color { int r; }; }",
        );
        fixture.with_ctx(|ctx| {
            let scope = Scope::new(None, 0);
            assert_eq!(
                resolve_simple_name(ctx, "g::Color", &scope).unwrap(),
                "gfx::Color"
            );
            let err = resolve_simple_name(ctx, "h::Color", &scope).unwrap_err();
            assert!(err.contains("Unknown type 'h::Color'"));
        });
    }

    #[test]
    fn test_pointer_resolution_wraps_inner() {
        let fixture = SessionFixture::parse("struct P { int x; };");
        fixture.with_ctx(|ctx| {
            let scope = Scope::new(None, 0);
            let ty = crate::ast::TypeNode::Pointer(Box::new(crate::ast::TypeNode::Simple(
                crate::lexer::Token::new(crate::lexer::TokenKind::Identifier, "P", 1, 1),
            )));
            assert_eq!(resolve_type(ctx, &ty, &scope).unwrap(), "P*");
        });
    }

    #[test]
    fn test_primitives_pass_through() {
        let fixture = SessionFixture::parse("struct P { int x; };");
        fixture.with_ctx(|ctx| {
            let scope = Scope::new(None, 0);
            assert_eq!(resolve_simple_name(ctx, "int", &scope).unwrap(), "int");
            assert_eq!(resolve_simple_name(ctx, "T", &scope).unwrap(), "T");
        });
    }

    #[test]
    fn test_enum_resolution_is_optional() {
        let fixture = SessionFixture::parse("enum Mode { On, Off };\nstruct P { int x; };");
        fixture.with_ctx(|ctx| {
            let scope = Scope::new(None, 0);
            assert_eq!(
                resolve_enum_type(ctx, "Mode", &scope),
                Some("Mode".to_string())
            );
            assert_eq!(resolve_enum_type(ctx, "Missing", &scope), None);
            // Structs are not enums
            assert_eq!(resolve_enum_type(ctx, "P", &scope), None);
        });
    }
}
