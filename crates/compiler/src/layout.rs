//! Memory layout
//!
//! Sizes, member offsets, and the flattened member list of every struct.
//! Pointers and `int` are 4 bytes, `char` is 1, `void` is 0, and an
//! unresolved single-letter generic parameter is treated as opaque
//! pointer-sized. A struct is its base-class prefix (or a 4-byte vptr slot
//! when it has a vtable and no base) followed by its declared members in
//! order. Results are memoized per FQN.

use crate::context::Ctx;
use crate::resolver;
use crate::types;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// One entry of a flattened member list
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    pub name: String,
    pub type_fqn: String,
    pub offset: u32,
    pub is_const: bool,
}

/// Name of the vtable-pointer slot prepended to vtable-carrying structs
pub const VPTR_NAME: &str = "__vptr";

pub struct MemoryLayoutManager {
    sizes: RefCell<HashMap<String, u32>>,
    members: RefCell<HashMap<String, Vec<MemberInfo>>>,
    in_progress: RefCell<HashSet<String>>,
}

impl Default for MemoryLayoutManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLayoutManager {
    pub fn new() -> Self {
        MemoryLayoutManager {
            sizes: RefCell::new(HashMap::new()),
            members: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    /// Size in bytes of a type FQN
    pub fn size_of(&self, ctx: &Ctx<'_, '_>, fqn: &str) -> Result<u32, String> {
        if types::is_pointer(fqn) {
            return Ok(4);
        }
        match fqn {
            "int" => return Ok(4),
            "char" => return Ok(1),
            "void" => return Ok(0),
            _ => {}
        }
        if types::is_generic_parameter(fqn) {
            return Ok(4);
        }
        if ctx.repository.find_enum(fqn).is_some() {
            return Ok(4);
        }

        if let Some(cached) = self.sizes.borrow().get(fqn) {
            return Ok(*cached);
        }
        if !self.in_progress.borrow_mut().insert(fqn.to_string()) {
            return Err(format!(
                "struct '{}' recursively contains itself by value",
                fqn
            ));
        }
        let result = self.compute_struct_size(ctx, fqn);
        self.in_progress.borrow_mut().remove(fqn);
        let size = result?;
        self.sizes.borrow_mut().insert(fqn.to_string(), size);
        Ok(size)
    }

    fn compute_struct_size(&self, ctx: &Ctx<'_, '_>, fqn: &str) -> Result<u32, String> {
        let def = ctx
            .repository
            .find_struct(fqn)
            .ok_or_else(|| format!("Unknown type '{}'", fqn))?;
        let scope = resolver::scope_for_struct(ctx, def)?;

        let mut size = match resolver::resolve_base(ctx, def)? {
            Some(base_fqn) => self.size_of(ctx, &base_fqn)?,
            None => {
                if ctx.vtables.has_vtable(ctx, fqn)? {
                    4
                } else {
                    0
                }
            }
        };
        for member in &def.members {
            let member_fqn = resolver::resolve_type(ctx, &member.ty, &scope)?;
            size += self.size_of(ctx, &member_fqn)?;
        }
        Ok(size)
    }

    /// The flattened, offset-annotated member list: inherited members
    /// before own, prefixed by the vptr slot when the struct has a vtable
    /// and no base class.
    pub fn members_of(&self, ctx: &Ctx<'_, '_>, fqn: &str) -> Result<Vec<MemberInfo>, String> {
        if let Some(cached) = self.members.borrow().get(fqn) {
            return Ok(cached.clone());
        }
        // Sizing first also rejects inheritance cycles before the
        // base-chain recursion below could run away
        self.size_of(ctx, fqn)?;

        let def = ctx
            .repository
            .find_struct(fqn)
            .ok_or_else(|| format!("Unknown type '{}'", fqn))?;
        let scope = resolver::scope_for_struct(ctx, def)?;

        let mut flattened;
        let mut offset;
        match resolver::resolve_base(ctx, def)? {
            Some(base_fqn) => {
                flattened = self.members_of(ctx, &base_fqn)?;
                offset = self.size_of(ctx, &base_fqn)?;
            }
            None => {
                flattened = Vec::new();
                offset = 0;
                if ctx.vtables.has_vtable(ctx, fqn)? {
                    flattened.push(MemberInfo {
                        name: VPTR_NAME.to_string(),
                        type_fqn: "void*".to_string(),
                        offset: 0,
                        is_const: false,
                    });
                    offset = 4;
                }
            }
        }

        for member in &def.members {
            let member_fqn = resolver::resolve_type(ctx, &member.ty, &scope)?;
            let size = self.size_of(ctx, &member_fqn)?;
            flattened.push(MemberInfo {
                name: member.name.clone(),
                type_fqn: member_fqn,
                offset,
                is_const: member.is_const,
            });
            offset += size;
        }

        self.members
            .borrow_mut()
            .insert(fqn.to_string(), flattened.clone());
        Ok(flattened)
    }

    /// A single member's layout entry, searching inherited members first
    pub fn member_info(
        &self,
        ctx: &Ctx<'_, '_>,
        fqn: &str,
        member: &str,
    ) -> Result<Option<MemberInfo>, String> {
        Ok(self
            .members_of(ctx, fqn)?
            .into_iter()
            .find(|m| m.name == member))
    }
}
