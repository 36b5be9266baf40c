//! Service context
//!
//! The analysis services reference each other (the resolver asks the
//! monomorphizer to instantiate, the monomorphizer asks the resolver for
//! argument FQNs, layout asks both). Instead of wiring peers into each
//! service with late setters, every service keeps only its own caches and
//! receives this immutable context on each call.

use crate::ast::Program;
use crate::layout::MemoryLayoutManager;
use crate::monomorph::Monomorphizer;
use crate::repository::TypeRepository;
use crate::vtable::VTableManager;

pub struct Ctx<'c, 'p> {
    pub program: &'p Program,
    pub repository: &'c TypeRepository<'p>,
    pub monomorphizer: &'c Monomorphizer<'p>,
    pub vtables: &'c VTableManager,
    pub layouts: &'c MemoryLayoutManager,
}

/// Name-resolution scope: the compilation unit whose usings apply, plus the
/// namespace the current code was written in.
#[derive(Debug, Clone)]
pub struct Scope {
    pub namespace: Option<String>,
    pub unit_index: usize,
}

impl Scope {
    pub fn new(namespace: Option<String>, unit_index: usize) -> Self {
        Scope {
            namespace,
            unit_index,
        }
    }
}

impl<'c, 'p> Ctx<'c, 'p> {
    pub fn unit(&self, index: usize) -> &'p crate::ast::CompilationUnit {
        &self.program.units[index]
    }
}
