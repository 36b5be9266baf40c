//! Per-function stack-frame symbol table
//!
//! Parameters live at positive offsets from EBP starting at +8, each
//! consuming at least 4 bytes (arguments are pushed 4-byte aligned);
//! struct-by-value parameters consume their full size rounded up to the
//! next dword. Methods, constructors, and destructors get an implicit
//! `this` parameter prepended, and functions returning a struct by value
//! get a hidden `__ret_ptr` pointer appended after the declared
//! parameters. Locals get negative offsets, each consuming its full size,
//! discovered by walking the body through blocks, ifs, and whiles.
//!
//! Name bindings are lexically scoped. The builder assigns every
//! declaration its own frame slot in body walk order; the analyzer and
//! the code generator repeat that walk, entering a scope per block and
//! binding each declaration as they reach it. A lookup resolves to the
//! innermost live binding, so shadowed locals keep their own slots (and
//! their destructors still run), and only a redeclaration within the same
//! scope supersedes the earlier symbol.

use crate::ast::{
    ConstructorDeclaration, DestructorDeclaration, FunctionDeclaration, Parameter, Statement,
};
use crate::context::{Ctx, Scope};
use crate::functions;
use crate::lexer::Token;
use crate::resolver;
use crate::types;
use std::collections::HashMap;

/// Hidden parameter carrying the caller's result buffer for
/// struct-by-value returns
pub const RET_PTR_NAME: &str = "__ret_ptr";

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub offset: i32,
    pub type_fqn: String,
    pub is_const: bool,
    pub is_read: bool,
    pub is_parameter: bool,
    /// Replaced by a same-name redeclaration in the same lexical scope
    pub superseded: bool,
    pub token: Token,
}

pub struct SymbolTable {
    symbols: Vec<Symbol>,
    /// Innermost-last stack of name -> symbol-index bindings. The first
    /// entry holds the parameters and is never popped.
    scopes: Vec<HashMap<String, usize>>,
    /// Cursor over the locals in body walk order, advanced by
    /// `declare_local`
    next_local: usize,
    total_local_size: u32,
    return_fqn: String,
}

impl SymbolTable {
    pub fn for_function(
        ctx: &Ctx<'_, '_>,
        func: &FunctionDeclaration,
        scope: &Scope,
    ) -> Self {
        let return_fqn = resolver::resolve_type(ctx, &func.return_type, scope)
            .unwrap_or_else(|_| types::UNKNOWN.to_string());
        let body: &[Statement] = func.body.as_deref().unwrap_or(&[]);
        Self::build(
            ctx,
            scope,
            func.owner.as_deref(),
            &func.parameters,
            return_fqn,
            body,
        )
    }

    pub fn for_constructor(
        ctx: &Ctx<'_, '_>,
        ctor: &ConstructorDeclaration,
        scope: &Scope,
    ) -> Self {
        Self::build(
            ctx,
            scope,
            Some(ctor.owner.as_str()),
            &ctor.parameters,
            types::VOID.to_string(),
            &ctor.body,
        )
    }

    pub fn for_destructor(
        ctx: &Ctx<'_, '_>,
        dtor: &DestructorDeclaration,
        scope: &Scope,
    ) -> Self {
        Self::build(
            ctx,
            scope,
            Some(dtor.owner.as_str()),
            &[],
            types::VOID.to_string(),
            &dtor.body,
        )
    }

    fn build(
        ctx: &Ctx<'_, '_>,
        scope: &Scope,
        owner: Option<&str>,
        parameters: &[Parameter],
        return_fqn: String,
        body: &[Statement],
    ) -> Self {
        let mut table = SymbolTable {
            symbols: Vec::new(),
            scopes: vec![HashMap::new()],
            next_local: 0,
            total_local_size: 0,
            return_fqn,
        };

        let mut offset: i32 = 8;
        if let Some(owner_fqn) = owner {
            let this_token = Token::new(crate::lexer::TokenKind::Keyword, "this", 0, 0);
            table.push_parameter(Symbol {
                name: "this".to_string(),
                offset,
                type_fqn: types::pointer_to(owner_fqn),
                is_const: false,
                is_read: false,
                is_parameter: true,
                superseded: false,
                token: this_token,
            });
            offset += 4;
        }
        for param in parameters {
            let fqn = resolver::resolve_type(ctx, &param.ty, scope)
                .unwrap_or_else(|_| types::UNKNOWN.to_string());
            // Arguments are pushed 4-byte aligned, so a struct parameter
            // occupies its size rounded up to the next dword
            let size = ctx
                .layouts
                .size_of(ctx, &fqn)
                .unwrap_or(4)
                .div_ceil(4)
                .max(1)
                * 4;
            table.push_parameter(Symbol {
                name: param.name.clone(),
                offset,
                type_fqn: fqn,
                is_const: false,
                is_read: false,
                is_parameter: true,
                superseded: false,
                token: param.name_token.clone(),
            });
            offset += size as i32;
        }
        if types::is_struct_value(&table.return_fqn) {
            table.push_parameter(Symbol {
                name: RET_PTR_NAME.to_string(),
                offset,
                type_fqn: "void*".to_string(),
                is_const: false,
                is_read: false,
                is_parameter: true,
                superseded: false,
                token: Token::new(crate::lexer::TokenKind::Identifier, RET_PTR_NAME, 0, 0),
            });
        }

        table.next_local = table.symbols.len();
        table.collect_locals(ctx, scope, body);
        table
    }

    fn collect_locals(&mut self, ctx: &Ctx<'_, '_>, scope: &Scope, statements: &[Statement]) {
        for stmt in statements {
            match stmt {
                Statement::Declaration {
                    is_const,
                    ty,
                    name,
                    name_token,
                    ..
                } => {
                    let fqn = resolver::resolve_type(ctx, ty, scope)
                        .unwrap_or_else(|_| types::UNKNOWN.to_string());
                    let size = ctx.layouts.size_of(ctx, &fqn).unwrap_or(4).max(1);
                    self.total_local_size += size;
                    self.symbols.push(Symbol {
                        name: name.clone(),
                        offset: -(self.total_local_size as i32),
                        type_fqn: fqn,
                        is_const: *is_const,
                        is_read: false,
                        is_parameter: false,
                        superseded: false,
                        token: name_token.clone(),
                    });
                }
                Statement::Block(stmts) => self.collect_locals(ctx, scope, stmts),
                Statement::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    self.collect_locals(ctx, scope, std::slice::from_ref(then_branch.as_ref()));
                    if let Some(else_branch) = else_branch {
                        self.collect_locals(ctx, scope, std::slice::from_ref(else_branch.as_ref()));
                    }
                }
                Statement::While { body, .. } => {
                    self.collect_locals(ctx, scope, std::slice::from_ref(body.as_ref()));
                }
                _ => {}
            }
        }
    }

    fn push_parameter(&mut self, symbol: Symbol) {
        self.scopes[0].insert(symbol.name.clone(), self.symbols.len());
        self.symbols.push(symbol);
    }

    // ========================================================================
    //                            Scope tracking
    // ========================================================================
    //
    // The walking consumer mirrors the builder's traversal: one scope per
    // block, one `declare_local` per declaration statement, in order.

    pub fn enter_block(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn exit_block(&mut self) {
        // The parameter scope stays
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Bind the next local (in body walk order) into the current scope.
    /// A same-name binding already in this scope is superseded; bindings
    /// in outer scopes are merely shadowed and stay destructible.
    pub fn declare_local(&mut self, name: &str) {
        let index = self.next_local;
        match self.symbols.get(index) {
            Some(symbol) if !symbol.is_parameter && symbol.name == name => {}
            _ => {
                debug_assert!(false, "declaration walk out of step at '{}'", name);
                return;
            }
        }
        self.next_local += 1;
        if let Some(scope) = self.scopes.last_mut() {
            if let Some(&old) = scope.get(name) {
                self.symbols[old].superseded = true;
            }
            scope.insert(name.to_string(), index);
        }
    }

    /// Resolve a name against the innermost live binding
    pub fn try_get(&self, name: &str) -> Option<&Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(|&index| &self.symbols[index])
    }

    pub fn mark_read(&mut self, name: &str) {
        let index = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .copied();
        if let Some(index) = index {
            self.symbols[index].is_read = true;
        }
    }

    pub fn total_local_size(&self) -> u32 {
        self.total_local_size
    }

    pub fn return_fqn(&self) -> &str {
        &self.return_fqn
    }

    /// Locals whose type declares its own destructor, in declaration
    /// order, skipping only symbols superseded within their own scope.
    /// The epilogue runs them in reverse.
    pub fn destructible_locals(&self, ctx: &Ctx<'_, '_>) -> Vec<&Symbol> {
        self.symbols
            .iter()
            .filter(|s| {
                !s.is_parameter
                    && !s.superseded
                    && types::is_struct_value(&s.type_fqn)
                    && functions::find_destructor(ctx, &s.type_fqn).is_some()
            })
            .collect()
    }

    /// Locals never marked read, for the unused-variable warning
    pub fn unread_locals(&self) -> Vec<&Symbol> {
        self.symbols
            .iter()
            .filter(|s| !s.is_parameter && !s.superseded && !s.is_read)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::SessionFixture;

    fn first_function_table(fixture: &SessionFixture, f: impl FnOnce(&mut SymbolTable)) {
        fixture.with_ctx(|ctx| {
            let func = &ctx.program.units[0].functions[0];
            let scope = Scope::new(func.namespace.clone(), 0);
            let mut table = SymbolTable::for_function(ctx, func, &scope);
            f(&mut table);
        });
    }

    #[test]
    fn test_parameter_offsets() {
        let fixture = SessionFixture::parse("int add(int a, char c, int* p) { return a; }");
        first_function_table(&fixture, |table| {
            // char parameter still consumes 4 bytes
            assert_eq!(table.try_get("a").unwrap().offset, 8);
            assert_eq!(table.try_get("c").unwrap().offset, 12);
            assert_eq!(table.try_get("p").unwrap().offset, 16);
            assert_eq!(table.try_get("p").unwrap().type_fqn, "int*");
        });
    }

    #[test]
    fn test_struct_by_value_parameter_consumes_full_size() {
        let fixture = SessionFixture::parse(
            "struct P { int x; int y; };\nint take(P p, int after) { return after; }",
        );
        first_function_table(&fixture, |table| {
            assert_eq!(table.try_get("p").unwrap().offset, 8);
            assert_eq!(table.try_get("after").unwrap().offset, 16);
        });
    }

    #[test]
    fn test_local_offsets_are_negative_and_full_size() {
        let fixture = SessionFixture::parse(
            "struct P { int x; int y; };\nint main() { P p = {1, 2}; int a = 3; return a; }",
        );
        first_function_table(&fixture, |table| {
            table.enter_block();
            table.declare_local("p");
            table.declare_local("a");
            assert_eq!(table.try_get("p").unwrap().offset, -8);
            assert_eq!(table.try_get("a").unwrap().offset, -12);
            assert_eq!(table.total_local_size(), 12);
            table.exit_block();
        });
    }

    #[test]
    fn test_implicit_this_for_methods() {
        let fixture = SessionFixture::parse("struct S { int v; int get() { return v; } };");
        fixture.with_ctx(|ctx| {
            let method = &ctx.program.units[0].structs[0].methods[0];
            let scope = Scope::new(None, 0);
            let table = SymbolTable::for_function(ctx, method, &scope);
            let this = table.try_get("this").unwrap();
            assert_eq!(this.offset, 8);
            assert_eq!(this.type_fqn, "S*");
        });
    }

    #[test]
    fn test_hidden_return_pointer_appended() {
        let fixture = SessionFixture::parse(
            "struct P { int x; int y; };\nP make(int x) { P p = {1, 2}; return p; }",
        );
        first_function_table(&fixture, |table| {
            assert_eq!(table.return_fqn(), "P");
            // x at +8, __ret_ptr appended after it
            let ret = table.try_get(RET_PTR_NAME).unwrap();
            assert_eq!(ret.offset, 12);
            assert_eq!(ret.type_fqn, "void*");
        });
    }

    #[test]
    fn test_block_locals_bind_only_inside_their_block() {
        let fixture = SessionFixture::parse(
            "int main() { if (1) { int a = 1; } while (0) { int b = 2; } return 0; }",
        );
        first_function_table(&fixture, |table| {
            assert_eq!(table.total_local_size(), 8);
            table.enter_block();
            assert!(table.try_get("a").is_none());

            table.enter_block();
            table.declare_local("a");
            assert_eq!(table.try_get("a").unwrap().offset, -4);
            table.exit_block();
            assert!(table.try_get("a").is_none());

            table.enter_block();
            table.declare_local("b");
            assert_eq!(table.try_get("b").unwrap().offset, -8);
            table.exit_block();
            table.exit_block();
        });
    }

    #[test]
    fn test_shadowing_across_blocks_keeps_both_slots() {
        let fixture = SessionFixture::parse(
            "int main() { int x = 1; if (1) { int x = 2; } return x; }",
        );
        first_function_table(&fixture, |table| {
            table.enter_block();
            table.declare_local("x");
            let outer = table.try_get("x").unwrap().offset;
            assert_eq!(outer, -4);

            table.enter_block();
            table.declare_local("x");
            assert_eq!(table.try_get("x").unwrap().offset, -8);
            table.exit_block();

            // The outer binding is live again, at its own slot
            assert_eq!(table.try_get("x").unwrap().offset, outer);
            table.exit_block();

            // Neither declaration was superseded: both are tracked
            assert_eq!(table.unread_locals().len(), 2);
        });
    }

    #[test]
    fn test_sibling_blocks_may_reuse_a_name() {
        let fixture = SessionFixture::parse(
            "int main() { if (1) { int tmp = 1; } if (1) { int tmp = 2; } return 0; }",
        );
        first_function_table(&fixture, |table| {
            table.enter_block();

            table.enter_block();
            table.declare_local("tmp");
            assert_eq!(table.try_get("tmp").unwrap().offset, -4);
            table.exit_block();

            table.enter_block();
            table.declare_local("tmp");
            assert_eq!(table.try_get("tmp").unwrap().offset, -8);
            table.exit_block();

            table.exit_block();
            assert_eq!(table.unread_locals().len(), 2);
        });
    }

    #[test]
    fn test_same_scope_redeclaration_supersedes() {
        let fixture = SessionFixture::parse("int main() { int v = 1; int v = 2; return v; }");
        first_function_table(&fixture, |table| {
            table.enter_block();
            table.declare_local("v");
            table.declare_local("v");
            // The second declaration owns the binding
            assert_eq!(table.try_get("v").unwrap().offset, -8);
            table.exit_block();
            // Only the live declaration is reported
            assert_eq!(table.unread_locals().len(), 1);
            assert_eq!(table.unread_locals()[0].offset, -8);
        });
    }

    #[test]
    fn test_shadowed_destructible_local_is_still_destroyed() {
        let fixture = SessionFixture::parse(
            "struct H { int fd; ~H() { } };\n\
             int main() { H h; if (1) { int h = 0; } return 0; }",
        );
        fixture.with_ctx(|ctx| {
            let func = &ctx.program.units[0].functions[0];
            let scope = Scope::new(None, 0);
            let mut table = SymbolTable::for_function(ctx, func, &scope);
            table.enter_block();
            table.declare_local("h");
            table.enter_block();
            table.declare_local("h");
            table.exit_block();
            table.exit_block();

            // The struct local lives in an outer scope: shadowed, not
            // superseded, so its destructor still runs
            let destructible = table.destructible_locals(ctx);
            assert_eq!(destructible.len(), 1);
            assert_eq!(destructible[0].type_fqn, "H");
            assert_eq!(destructible[0].offset, -4);
        });
    }

    #[test]
    fn test_destructible_locals_and_read_marks() {
        let fixture = SessionFixture::parse(
            "struct H { ~H() { } };\nint main() { H h; int x = 1; return 0; }",
        );
        fixture.with_ctx(|ctx| {
            let func = &ctx.program.units[0].functions[0];
            let scope = Scope::new(None, 0);
            let mut table = SymbolTable::for_function(ctx, func, &scope);
            table.enter_block();
            table.declare_local("h");
            table.declare_local("x");

            let destructible = table.destructible_locals(ctx);
            assert_eq!(destructible.len(), 1);
            assert_eq!(destructible[0].name, "h");

            assert_eq!(table.unread_locals().len(), 2);
            table.mark_read("x");
            assert_eq!(table.unread_locals().len(), 1);
            table.exit_block();
        });
    }
}
