//! Monomorphization of generic structs
//!
//! An instantiation like `List<int>` deep-clones the template's subtree,
//! substitutes every occurrence of the single-letter type parameters, and
//! registers the clone under a mangled name that doubles as its FQN.
//! Instances are allocated in the session's bump arena rather than spliced
//! into the template's compilation unit, so analysis never mutates the tree
//! it is walking; the repository records the template's unit as the
//! instance's defining unit and the fixed-point loop picks new instances up
//! on its next pass.

use crate::ast::{Expression, Statement, StructDefinition, TypeNode};
use crate::context::{Ctx, Scope};
use crate::lexer::{Token, TokenKind};
use crate::resolver;
use crate::types;
use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::HashMap;

/// A monomorphized struct plus the context its template was written in.
/// The instance's own namespace is null; name resolution inside its methods
/// still happens under the template's namespace and unit.
#[derive(Clone)]
pub struct Instance<'p> {
    pub def: &'p StructDefinition,
    pub unit_index: usize,
    pub namespace: Option<String>,
}

pub struct Monomorphizer<'p> {
    arena: &'p Bump,
    /// Mangled name -> instantiated struct (idempotence cache)
    cache: RefCell<HashMap<String, &'p StructDefinition>>,
    /// Instantiation order, for the runner and the code generator
    instances: RefCell<Vec<Instance<'p>>>,
}

impl<'p> Monomorphizer<'p> {
    pub fn new(arena: &'p Bump) -> Self {
        Monomorphizer {
            arena,
            cache: RefCell::new(HashMap::new()),
            instances: RefCell::new(Vec::new()),
        }
    }

    /// Instantiate a generic struct for the given type arguments, returning
    /// the mangled FQN of the concrete instance. Idempotent per mangled
    /// name.
    pub fn instantiate(
        &self,
        ctx: &Ctx<'_, 'p>,
        base: &Token,
        args: &[TypeNode],
        scope: &Scope,
    ) -> Result<String, String> {
        let template_fqn = resolver::resolve_simple_name(ctx, &base.text, scope)?;

        let mut arg_fqns = Vec::with_capacity(args.len());
        for arg in args {
            arg_fqns.push(resolver::resolve_type(ctx, arg, scope)?);
        }

        let mangled = mangle(&template_fqn, &arg_fqns);
        if self.cache.borrow().contains_key(&mangled) {
            return Ok(mangled);
        }

        let template = ctx
            .repository
            .find_struct(&template_fqn)
            .ok_or_else(|| format!("Unknown type '{}'", base.text))?;
        if !template.is_template() {
            return Err(format!("'{}' is not a generic struct", template_fqn));
        }
        if template.generic_parameters.len() != args.len() {
            return Err(format!(
                "'{}' takes {} type argument(s), got {}",
                template_fqn,
                template.generic_parameters.len(),
                args.len()
            ));
        }

        let substitutions: HashMap<&str, TypeNode> = template
            .generic_parameters
            .iter()
            .map(|p| p.as_str())
            .zip(arg_fqns.iter().map(|fqn| fqn_to_type_node(fqn, base)))
            .collect();

        let mut clone = template.clone();
        substitute_struct(&mut clone, &substitutions);

        clone.name = mangled.clone();
        clone.name_token = Token::new(
            TokenKind::Identifier,
            mangled.clone(),
            template.name_token.line,
            template.name_token.column,
        );
        clone.generic_parameters.clear();
        clone.namespace = None;
        for method in &mut clone.methods {
            method.owner = Some(mangled.clone());
            method.namespace = None;
        }
        for ctor in &mut clone.constructors {
            ctor.owner = mangled.clone();
            ctor.namespace = None;
        }
        for dtor in &mut clone.destructors {
            dtor.owner = mangled.clone();
            dtor.namespace = None;
        }

        let unit_index = ctx
            .repository
            .defining_unit_index(&template_fqn)
            .ok_or_else(|| {
                format!("internal: template '{}' has no defining unit", template_fqn)
            })?;

        let instance: &'p StructDefinition = self.arena.alloc(clone);
        self.cache.borrow_mut().insert(mangled.clone(), instance);
        self.instances.borrow_mut().push(Instance {
            def: instance,
            unit_index,
            namespace: template.namespace.clone(),
        });
        ctx.repository
            .register_instance(mangled.clone(), instance, unit_index);

        Ok(mangled)
    }

    /// The cached instance for a mangled name, if already materialized
    pub fn find(&self, mangled: &str) -> Option<&'p StructDefinition> {
        self.cache.borrow().get(mangled).copied()
    }

    /// Snapshot of all instances in instantiation order
    pub fn instances(&self) -> Vec<Instance<'p>> {
        self.instances.borrow().clone()
    }

    /// The namespace the instance's template was written in
    pub fn origin_namespace(&self, fqn: &str) -> Option<String> {
        self.instances
            .borrow()
            .iter()
            .find(|i| i.def.fqn() == fqn)
            .and_then(|i| i.namespace.clone())
    }
}

/// Mangle a template FQN and its argument FQNs into an instance name:
/// `::` becomes `__`, argument FQNs are joined with `__`, and pointer
/// suffixes become the letter `p`.
pub fn mangle(template_fqn: &str, arg_fqns: &[String]) -> String {
    let mut out = sanitize(template_fqn);
    for arg in arg_fqns {
        out.push_str("__");
        out.push_str(&sanitize(arg));
    }
    out
}

fn sanitize(fqn: &str) -> String {
    let depth = types::pointer_depth(fqn);
    let mut out = types::strip_pointers(fqn).replace("::", "__");
    for _ in 0..depth {
        out.push('p');
    }
    out
}

/// Reconstruct a type node from a resolved FQN (fully qualified, so it
/// resolves unambiguously in any scope)
fn fqn_to_type_node(fqn: &str, at: &Token) -> TypeNode {
    let depth = types::pointer_depth(fqn);
    let mut node = TypeNode::Simple(Token::new(
        TokenKind::Identifier,
        types::strip_pointers(fqn),
        at.line,
        at.column,
    ));
    for _ in 0..depth {
        node = TypeNode::Pointer(Box::new(node));
    }
    node
}

// ============================================================================
//                     Type-parameter substitution walk
// ============================================================================

fn substitute_struct(def: &mut StructDefinition, map: &HashMap<&str, TypeNode>) {
    for member in &mut def.members {
        substitute_type(&mut member.ty, map);
    }
    for method in &mut def.methods {
        substitute_type(&mut method.return_type, map);
        for param in &mut method.parameters {
            substitute_type(&mut param.ty, map);
        }
        if let Some(body) = &mut method.body {
            for stmt in body {
                substitute_statement(stmt, map);
            }
        }
    }
    for ctor in &mut def.constructors {
        for param in &mut ctor.parameters {
            substitute_type(&mut param.ty, map);
        }
        if let Some(args) = &mut ctor.base_initializer {
            for arg in args {
                substitute_expression(arg, map);
            }
        }
        for stmt in &mut ctor.body {
            substitute_statement(stmt, map);
        }
    }
    for dtor in &mut def.destructors {
        for stmt in &mut dtor.body {
            substitute_statement(stmt, map);
        }
    }
}

fn substitute_type(ty: &mut TypeNode, map: &HashMap<&str, TypeNode>) {
    match ty {
        TypeNode::Simple(token) => {
            if let Some(replacement) = map.get(token.text.as_str()) {
                *ty = replacement.clone();
            }
        }
        TypeNode::Pointer(inner) => substitute_type(inner, map),
        TypeNode::Generic { args, .. } => {
            for arg in args {
                substitute_type(arg, map);
            }
        }
    }
}

fn substitute_statement(stmt: &mut Statement, map: &HashMap<&str, TypeNode>) {
    match stmt {
        Statement::Block(stmts) => {
            for s in stmts {
                substitute_statement(s, map);
            }
        }
        Statement::Return { value, .. } => {
            if let Some(e) = value {
                substitute_expression(e, map);
            }
        }
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => {
            substitute_expression(condition, map);
            substitute_statement(then_branch, map);
            if let Some(e) = else_branch {
                substitute_statement(e, map);
            }
        }
        Statement::While { condition, body } => {
            substitute_expression(condition, map);
            substitute_statement(body, map);
        }
        Statement::Declaration {
            ty,
            initializer,
            constructor_args,
            ..
        } => {
            substitute_type(ty, map);
            if let Some(e) = initializer {
                substitute_expression(e, map);
            }
            if let Some(args) = constructor_args {
                for a in args {
                    substitute_expression(a, map);
                }
            }
        }
        Statement::Expression(e) => substitute_expression(e, map),
        Statement::Delete { value, .. } => substitute_expression(value, map),
    }
}

fn substitute_expression(expr: &mut Expression, map: &HashMap<&str, TypeNode>) {
    match expr {
        Expression::IntLiteral { .. }
        | Expression::StringLiteral { .. }
        | Expression::Variable { .. }
        | Expression::QualifiedAccess { .. } => {}
        Expression::Unary { operand, .. } => substitute_expression(operand, map),
        Expression::Binary { left, right, .. } => {
            substitute_expression(left, map);
            substitute_expression(right, map);
        }
        Expression::Assignment { target, value, .. } => {
            substitute_expression(target, map);
            substitute_expression(value, map);
        }
        Expression::Call { callee, args, .. } => {
            substitute_expression(callee, map);
            for a in args {
                substitute_expression(a, map);
            }
        }
        Expression::MemberAccess { object, .. } => substitute_expression(object, map),
        Expression::New { ty, args, .. } => {
            substitute_type(ty, map);
            for a in args {
                substitute_expression(a, map);
            }
        }
        Expression::Sizeof { ty, .. } => substitute_type(ty, map),
        Expression::InitializerList { values, .. } => {
            for v in values {
                substitute_expression(v, map);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::SessionFixture;

    fn list_int(ctx: &Ctx<'_, '_>) -> String {
        let base = Token::new(TokenKind::Identifier, "List", 1, 1);
        let args = vec![TypeNode::Simple(Token::new(
            TokenKind::Identifier,
            "int",
            1,
            6,
        ))];
        let scope = Scope::new(None, 0);
        ctx.monomorphizer
            .instantiate(ctx, &base, &args, &scope)
            .unwrap()
    }

    #[test]
    fn test_mangle() {
        assert_eq!(mangle("List", &["int".to_string()]), "List__int");
        assert_eq!(mangle("util::List", &["int*".to_string()]), "util__List__intp");
        assert_eq!(
            mangle("Map", &["char*".to_string(), "gfx::Color".to_string()]),
            "Map__charp__gfx__Color"
        );
    }

    #[test]
    fn test_instantiation_substitutes_parameters() {
        let fixture = SessionFixture::parse(
            "struct List<T> { T* buf; int len; T get(int i) { T* p = buf; return *p; } };",
        );
        fixture.with_ctx(|ctx| {
            let mangled = list_int(ctx);
            assert_eq!(mangled, "List__int");

            let instance = ctx.repository.find_struct("List__int").unwrap();
            assert!(instance.generic_parameters.is_empty());
            assert!(instance.namespace.is_none());
            assert_eq!(instance.fqn(), "List__int");

            // T* buf became int* buf
            match &instance.members[0].ty {
                TypeNode::Pointer(inner) => match inner.as_ref() {
                    TypeNode::Simple(tok) => assert_eq!(tok.text, "int"),
                    other => panic!("expected simple inner type, got {:?}", other),
                },
                other => panic!("expected pointer member type, got {:?}", other),
            }

            // Method owner rewritten to the mangled name
            assert_eq!(instance.methods[0].owner.as_deref(), Some("List__int"));
            match &instance.methods[0].return_type {
                TypeNode::Simple(tok) => assert_eq!(tok.text, "int"),
                other => panic!("expected substituted return type, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_instantiation_is_idempotent() {
        let fixture = SessionFixture::parse("struct List<T> { T* buf; int len; };");
        fixture.with_ctx(|ctx| {
            let first = list_int(ctx);
            let first_def = ctx.repository.find_struct(&first).unwrap();
            let second = list_int(ctx);
            let second_def = ctx.repository.find_struct(&second).unwrap();
            assert_eq!(first, second);
            assert!(std::ptr::eq(first_def, second_def));
            assert_eq!(ctx.monomorphizer.instances().len(), 1);
        });
    }

    #[test]
    fn test_argument_count_mismatch() {
        let fixture = SessionFixture::parse("struct Pair<A, B> { A a; B b; };");
        fixture.with_ctx(|ctx| {
            let base = Token::new(TokenKind::Identifier, "Pair", 1, 1);
            let args = vec![TypeNode::Simple(Token::new(
                TokenKind::Identifier,
                "int",
                1,
                6,
            ))];
            let scope = Scope::new(None, 0);
            let err = ctx
                .monomorphizer
                .instantiate(ctx, &base, &args, &scope)
                .unwrap_err();
            assert!(err.contains("takes 2 type argument(s), got 1"));
        });
    }

    #[test]
    fn test_origin_namespace_survives() {
        let fixture =
            SessionFixture::parse("namespace util { struct Box<T> { T value; }; }");
        fixture.with_ctx(|ctx| {
            let base = Token::new(TokenKind::Identifier, "util::Box", 1, 1);
            let args = vec![TypeNode::Simple(Token::new(
                TokenKind::Identifier,
                "int",
                1,
                6,
            ))];
            let scope = Scope::new(None, 0);
            let mangled = ctx
                .monomorphizer
                .instantiate(ctx, &base, &args, &scope)
                .unwrap();
            assert_eq!(mangled, "util__Box__int");
            assert_eq!(
                ctx.monomorphizer.origin_namespace(&mangled),
                Some("util".to_string())
            );
        });
    }
}
