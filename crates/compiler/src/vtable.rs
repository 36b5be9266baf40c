//! Virtual-table construction
//!
//! A struct has a vtable iff it declares or inherits a virtual method or a
//! virtual destructor. Tables are built recursively from the base class's
//! table: slot 0 holds the destructor when one participates in dynamic
//! dispatch, `override` methods replace the identically-named inherited
//! slot, and `virtual` methods append new slots. Results are memoized per
//! FQN.

use crate::context::Ctx;
use crate::resolver;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct VTableSlot {
    /// Method name, or the owner's destructor when `is_destructor`
    pub method_name: String,
    /// FQN of the struct whose implementation fills the slot
    pub owner_fqn: String,
    pub is_destructor: bool,
}

pub struct VTableManager {
    cache: RefCell<HashMap<String, Vec<VTableSlot>>>,
    in_progress: RefCell<HashSet<String>>,
}

impl Default for VTableManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VTableManager {
    pub fn new() -> Self {
        VTableManager {
            cache: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    /// The vtable of a struct FQN; empty when the struct has none
    pub fn vtable(&self, ctx: &Ctx<'_, '_>, fqn: &str) -> Result<Vec<VTableSlot>, String> {
        if let Some(cached) = self.cache.borrow().get(fqn) {
            return Ok(cached.clone());
        }
        if !self.in_progress.borrow_mut().insert(fqn.to_string()) {
            return Err(format!("cyclic inheritance involving '{}'", fqn));
        }
        let result = self.build(ctx, fqn);
        self.in_progress.borrow_mut().remove(fqn);
        let slots = result?;
        self.cache
            .borrow_mut()
            .insert(fqn.to_string(), slots.clone());
        Ok(slots)
    }

    pub fn has_vtable(&self, ctx: &Ctx<'_, '_>, fqn: &str) -> Result<bool, String> {
        Ok(!self.vtable(ctx, fqn)?.is_empty())
    }

    /// Slot index of a method in the struct's vtable
    pub fn slot_index(
        &self,
        ctx: &Ctx<'_, '_>,
        fqn: &str,
        method: &str,
    ) -> Result<Option<usize>, String> {
        Ok(self
            .vtable(ctx, fqn)?
            .iter()
            .position(|s| !s.is_destructor && s.method_name == method))
    }

    fn build(&self, ctx: &Ctx<'_, '_>, fqn: &str) -> Result<Vec<VTableSlot>, String> {
        let def = ctx
            .repository
            .find_struct(fqn)
            .ok_or_else(|| format!("internal: vtable requested for unknown struct '{}'", fqn))?;

        let mut slots = match resolver::resolve_base(ctx, def)? {
            Some(base_fqn) => self.vtable(ctx, &base_fqn)?,
            None => Vec::new(),
        };

        if let Some(dtor) = def.destructor() {
            let base_slot0_is_dtor = slots.first().is_some_and(|s| s.is_destructor);
            if base_slot0_is_dtor || dtor.is_virtual {
                let slot = VTableSlot {
                    method_name: def.name.clone(),
                    owner_fqn: fqn.to_string(),
                    is_destructor: true,
                };
                if base_slot0_is_dtor {
                    slots[0] = slot;
                } else {
                    slots.insert(0, slot);
                }
            }
        }

        for method in &def.methods {
            if method.is_override {
                let position = slots
                    .iter()
                    .position(|s| !s.is_destructor && s.method_name == method.name);
                match position {
                    Some(index) => {
                        slots[index] = VTableSlot {
                            method_name: method.name.clone(),
                            owner_fqn: fqn.to_string(),
                            is_destructor: false,
                        };
                    }
                    None => {
                        return Err(format!(
                            "method '{}' is marked override but '{}' inherits no virtual method of that name",
                            method.name, fqn
                        ));
                    }
                }
            } else if method.is_virtual {
                let collides = slots
                    .iter()
                    .any(|s| !s.is_destructor && s.method_name == method.name);
                if collides {
                    return Err(format!(
                        "virtual method '{}' collides with a virtual method inherited by '{}'; use override",
                        method.name, fqn
                    ));
                }
                slots.push(VTableSlot {
                    method_name: method.name.clone(),
                    owner_fqn: fqn.to_string(),
                    is_destructor: false,
                });
            }
        }

        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::SessionFixture;

    #[test]
    fn test_no_virtuals_no_vtable() {
        let fixture = SessionFixture::parse("struct P { int x; int f() { return 0; } };");
        fixture.with_ctx(|ctx| {
            assert!(!ctx.vtables.has_vtable(ctx, "P").unwrap());
        });
    }

    #[test]
    fn test_override_keeps_base_slot_index() {
        let fixture = SessionFixture::parse(
            "struct A { virtual int f() { return 1; } virtual int g() { return 2; } };\n\
             struct B : A { override int f() { return 3; } };",
        );
        fixture.with_ctx(|ctx| {
            let a_f = ctx.vtables.slot_index(ctx, "A", "f").unwrap().unwrap();
            let b_f = ctx.vtables.slot_index(ctx, "B", "f").unwrap().unwrap();
            let a_g = ctx.vtables.slot_index(ctx, "A", "g").unwrap().unwrap();
            let b_g = ctx.vtables.slot_index(ctx, "B", "g").unwrap().unwrap();
            assert_eq!(a_f, b_f);
            assert_eq!(a_g, b_g);

            let b = ctx.vtables.vtable(ctx, "B").unwrap();
            assert_eq!(b[b_f].owner_fqn, "B");
            assert_eq!(b[b_g].owner_fqn, "A");
        });
    }

    #[test]
    fn test_virtual_destructor_occupies_slot_zero() {
        let fixture = SessionFixture::parse(
            "struct A { virtual ~A() { } virtual int f() { return 1; } };\n\
             struct B : A { ~B() { } override int f() { return 2; } };",
        );
        fixture.with_ctx(|ctx| {
            let a = ctx.vtables.vtable(ctx, "A").unwrap();
            assert!(a[0].is_destructor);
            assert_eq!(a[0].owner_fqn, "A");

            // B's destructor is not marked virtual but replaces the base's
            // slot 0 because the base slot holds a destructor
            let b = ctx.vtables.vtable(ctx, "B").unwrap();
            assert!(b[0].is_destructor);
            assert_eq!(b[0].owner_fqn, "B");
            assert_eq!(
                ctx.vtables.slot_index(ctx, "B", "f").unwrap(),
                ctx.vtables.slot_index(ctx, "A", "f").unwrap()
            );
        });
    }

    #[test]
    fn test_override_without_base_method_fails() {
        let fixture =
            SessionFixture::parse("struct A { int f() { return 1; } };\nstruct B : A { override int g() { return 2; } };");
        fixture.with_ctx(|ctx| {
            let err = ctx.vtables.vtable(ctx, "B").unwrap_err();
            assert!(err.contains("marked override"));
        });
    }

    #[test]
    fn test_virtual_collision_with_base_fails() {
        let fixture = SessionFixture::parse(
            "struct A { virtual int f() { return 1; } };\n\
             struct B : A { virtual int f() { return 2; } };",
        );
        fixture.with_ctx(|ctx| {
            let err = ctx.vtables.vtable(ctx, "B").unwrap_err();
            assert!(err.contains("collides"));
        });
    }

    #[test]
    fn test_non_virtual_methods_are_ignored() {
        let fixture = SessionFixture::parse(
            "struct A { virtual int f() { return 1; } int helper() { return 0; } };",
        );
        fixture.with_ctx(|ctx| {
            let a = ctx.vtables.vtable(ctx, "A").unwrap();
            assert_eq!(a.len(), 1);
            assert_eq!(a[0].method_name, "f");
        });
    }

    #[test]
    fn test_cyclic_inheritance_reports_error() {
        let fixture = SessionFixture::parse(
            "struct A : B { virtual int f() { return 1; } };\nstruct B : A { int x; };",
        );
        fixture.with_ctx(|ctx| {
            let err = ctx.vtables.vtable(ctx, "A").unwrap_err();
            assert!(err.contains("cyclic inheritance"));
        });
    }
}
