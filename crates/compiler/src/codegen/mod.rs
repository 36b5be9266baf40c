//! x86 code generation
//!
//! Lowers the analyzed program to 32-bit x86 in FASM syntax targeting a PE
//! executable. The generator assumes a clean analyzer pass: any
//! inconsistency it meets is a compiler bug, reported as a `CodeGenError`
//! that aborts emission. Values travel through EAX with a canonical stack
//! discipline; there is no register allocation.

mod declarations;
mod emitter;
mod error;
mod expressions;
mod state;
mod statements;

pub use error::CodeGenError;
pub use state::CodeGen;

use state::Frame;

use crate::context::Scope;
use crate::imports::ImportManifest;

impl<'c, 'p> CodeGen<'c, 'p> {
    /// Emit every function, method, constructor, and destructor of the
    /// program (monomorphized instances included, templates never) and
    /// assemble the final FASM module.
    pub fn generate(&mut self, manifests: &[ImportManifest]) -> Result<String, CodeGenError> {
        for (unit_index, unit) in self.ctx.program.units.iter().enumerate() {
            for func in &unit.functions {
                let scope = Scope::new(func.namespace.clone(), unit_index);
                self.gen_function(func, scope)?;
            }
            for def in &unit.structs {
                if def.is_template() {
                    continue;
                }
                self.gen_struct(def, def.namespace.clone(), unit_index)?;
            }
        }
        for instance in self.ctx.monomorphizer.instances() {
            self.gen_struct(instance.def, instance.namespace.clone(), instance.unit_index)?;
        }

        self.assemble(manifests)
    }

    fn gen_struct(
        &mut self,
        def: &crate::ast::StructDefinition,
        namespace: Option<String>,
        unit_index: usize,
    ) -> Result<(), CodeGenError> {
        for method in &def.methods {
            let scope = Scope::new(namespace.clone(), unit_index);
            self.gen_function(method, scope)?;
        }
        for ctor in &def.constructors {
            let scope = Scope::new(namespace.clone(), unit_index);
            self.gen_constructor(def, ctor, scope)?;
        }
        for dtor in &def.destructors {
            let scope = Scope::new(namespace.clone(), unit_index);
            self.gen_destructor(dtor, scope)?;
        }
        Ok(())
    }
}
