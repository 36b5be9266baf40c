//! Compile session
//!
//! Owns the parsed program and the bump arena that monomorphized instances
//! live in, and wires the analysis services together for a single compile.
//! Services only ever see each other through the `Ctx` handed into each
//! call.

use crate::ast::Program;
use crate::context::Ctx;
use crate::layout::MemoryLayoutManager;
use crate::monomorph::Monomorphizer;
use crate::repository::TypeRepository;
use crate::vtable::VTableManager;
use bumpalo::Bump;

pub struct Session {
    pub program: Program,
    arena: Bump,
}

impl Session {
    pub fn new(program: Program) -> Self {
        Session {
            program,
            arena: Bump::new(),
        }
    }

    /// Build the services for this session and run `f` with the wired
    /// context. Fails if the program's type definitions cannot be indexed
    /// (duplicate FQNs).
    pub fn with_ctx<R>(&self, f: impl FnOnce(&Ctx<'_, '_>) -> R) -> Result<R, String> {
        let repository = TypeRepository::build(&self.program)?;
        let monomorphizer = Monomorphizer::new(&self.arena);
        let vtables = VTableManager::new();
        let layouts = MemoryLayoutManager::new();
        let ctx = Ctx {
            program: &self.program,
            repository: &repository,
            monomorphizer: &monomorphizer,
            vtables: &vtables,
            layouts: &layouts,
        };
        Ok(f(&ctx))
    }
}
