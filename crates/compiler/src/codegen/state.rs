//! CodeGen state and label mangling
//!
//! The CodeGen struct accumulates the `.text` bodies and the set of called
//! externals; everything else it needs comes from the service context.
//! Label mangling lives here so declaration emission and call sites cannot
//! drift apart.

use crate::ast::FunctionDeclaration;
use crate::context::{Ctx, Scope};
use crate::symbols::SymbolTable;
use crate::types;
use crate::vtable::VTableSlot;
use std::collections::BTreeSet;

pub struct CodeGen<'c, 'p> {
    pub(super) ctx: &'c Ctx<'c, 'p>,
    /// Accumulated function bodies for the `.text` section
    pub(super) text: String,
    /// Counter for `_if_*` / `_while_*` label pairs
    pub(super) label_counter: usize,
    /// External functions referenced by emitted code, for the import table
    pub(super) externals: BTreeSet<String>,
}

/// Per-function emission state: the frame's symbols, the scope names
/// resolve under, and the label the return statements jump to so the
/// epilogue can run destructors first.
pub(super) struct Frame {
    pub symbols: SymbolTable,
    pub scope: Scope,
    pub owner_fqn: Option<String>,
    pub end_label: String,
}

impl<'c, 'p> CodeGen<'c, 'p> {
    pub fn new(ctx: &'c Ctx<'c, 'p>) -> Self {
        CodeGen {
            ctx,
            text: String::new(),
            label_counter: 0,
            externals: BTreeSet::new(),
        }
    }

    pub(super) fn fresh_label(&mut self) -> usize {
        let n = self.label_counter;
        self.label_counter += 1;
        n
    }

    /// Record a call to an external function
    pub(super) fn mark_external(&mut self, name: &str) {
        self.externals.insert(name.to_string());
    }
}

/// `[ebp+8]` / `[ebp-4]` with explicit sign
pub(super) fn ebp(offset: i32) -> String {
    if offset >= 0 {
        format!("[ebp+{}]", offset)
    } else {
        format!("[ebp{}]", offset)
    }
}

// ============================================================================
//                               Label mangling
// ============================================================================
//
// Multi-level namespaces collapse `::` to `__` inside one label part;
// the namespace, owner, and name parts are joined with single underscores.
// `main` is `_main` no matter where it lives.

fn sanitize(part: &str) -> String {
    part.replace("::", "__")
}

fn join_label(parts: &[&str]) -> String {
    let mut label = String::from("_");
    let mut first = true;
    for part in parts {
        if part.is_empty() {
            continue;
        }
        if !first {
            label.push('_');
        }
        label.push_str(&sanitize(part));
        first = false;
    }
    label
}

/// Split an owner FQN into its namespace and simple name
fn split_owner(owner_fqn: &str) -> (Option<&str>, &str) {
    match owner_fqn.rsplit_once("::") {
        Some((ns, simple)) => (Some(ns), simple),
        None => (None, owner_fqn),
    }
}

/// Label of a free function or method declaration
pub(super) fn function_label(func: &FunctionDeclaration) -> String {
    match &func.owner {
        Some(owner) => method_label(owner, &func.name),
        None => {
            if func.name == "main" {
                return "_main".to_string();
            }
            join_label(&[func.namespace.as_deref().unwrap_or(""), &func.name])
        }
    }
}

/// `_<ns>_<Owner>_<name>`
pub(super) fn method_label(owner_fqn: &str, name: &str) -> String {
    let (ns, simple) = split_owner(owner_fqn);
    join_label(&[ns.unwrap_or(""), simple, name])
}

/// Constructor label, including the parameter-type signature:
/// `_NS_Type_Type_ctor_Type_p` for `NS::Type::Type(Type*)`
pub(super) fn ctor_label(owner_fqn: &str, param_fqns: &[String]) -> String {
    let (_, simple) = split_owner(owner_fqn);
    let mut label = method_label(owner_fqn, &format!("{}_ctor", simple));
    for fqn in param_fqns {
        label.push('_');
        label.push_str(&sanitize(types::strip_pointers(fqn)));
        for _ in 0..types::pointer_depth(fqn) {
            label.push_str("_p");
        }
    }
    label
}

/// `_<ns>_<Type>_dtor`
pub(super) fn dtor_label(owner_fqn: &str) -> String {
    let (ns, simple) = split_owner(owner_fqn);
    join_label(&[ns.unwrap_or(""), simple, "dtor"])
}

/// `_vtable_<FQN sanitized>`
pub(super) fn vtable_label(fqn: &str) -> String {
    format!("_vtable_{}", sanitize(fqn))
}

/// The call target a vtable slot dispatches to
pub(super) fn slot_target(slot: &VTableSlot) -> String {
    if slot.is_destructor {
        dtor_label(&slot.owner_fqn)
    } else {
        method_label(&slot.owner_fqn, &slot.method_name)
    }
}
