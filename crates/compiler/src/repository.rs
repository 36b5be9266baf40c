//! Type repository
//!
//! Registry of every known struct and enum definition, keyed by fully
//! qualified name. Built once from the parsed program; monomorphized
//! instances register themselves afterwards, which is why the maps sit
//! behind `RefCell` (the compiler is single threaded, see the concurrency
//! notes in DESIGN.md). References to definitions are `Copy`, so lookups
//! hand out plain `&'p` references with no borrow guards escaping.

use crate::ast::{EnumDefinition, Program, StructDefinition};
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug)]
pub struct TypeRepository<'p> {
    structs: RefCell<HashMap<String, &'p StructDefinition>>,
    enums: HashMap<String, &'p EnumDefinition>,
    /// FQN -> index of the compilation unit the definition appeared in.
    /// Monomorphized instances record their template's unit.
    defining_unit: RefCell<HashMap<String, usize>>,
}

impl<'p> TypeRepository<'p> {
    /// Index all struct and enum definitions of the program. Duplicate
    /// FQNs are definition errors.
    pub fn build(program: &'p Program) -> Result<Self, String> {
        let mut structs: HashMap<String, &'p StructDefinition> = HashMap::new();
        let mut enums: HashMap<String, &'p EnumDefinition> = HashMap::new();
        let mut defining_unit = HashMap::new();

        for (unit_index, unit) in program.units.iter().enumerate() {
            for def in &unit.structs {
                let fqn = def.fqn();
                if structs.insert(fqn.clone(), def).is_some() {
                    return Err(format!(
                        "{}:{}:{}: duplicate definition of struct '{}'",
                        unit.file_path.display(),
                        def.name_token.line,
                        def.name_token.column,
                        fqn
                    ));
                }
                defining_unit.insert(fqn, unit_index);
            }
            for def in &unit.enums {
                let fqn = def.fqn();
                if enums.insert(fqn.clone(), def).is_some() {
                    return Err(format!(
                        "{}:{}:{}: duplicate definition of enum '{}'",
                        unit.file_path.display(),
                        def.name_token.line,
                        def.name_token.column,
                        fqn
                    ));
                }
                defining_unit.insert(fqn, unit_index);
            }
        }

        Ok(TypeRepository {
            structs: RefCell::new(structs),
            enums,
            defining_unit: RefCell::new(defining_unit),
        })
    }

    pub fn find_struct(&self, fqn: &str) -> Option<&'p StructDefinition> {
        self.structs.borrow().get(fqn).copied()
    }

    pub fn find_enum(&self, fqn: &str) -> Option<&'p EnumDefinition> {
        self.enums.get(fqn).copied()
    }

    /// True if the FQN names a known struct or enum
    pub fn contains(&self, fqn: &str) -> bool {
        self.find_struct(fqn).is_some() || self.find_enum(fqn).is_some()
    }

    pub fn defining_unit_index(&self, fqn: &str) -> Option<usize> {
        self.defining_unit.borrow().get(fqn).copied()
    }

    /// Register a monomorphized instance under its mangled FQN, recording
    /// the template's compilation unit as its defining unit.
    pub fn register_instance(&self, fqn: String, def: &'p StructDefinition, unit_index: usize) {
        self.structs.borrow_mut().insert(fqn.clone(), def);
        self.defining_unit.borrow_mut().insert(fqn, unit_index);
    }

    /// Flat count of known structs, templates and instances included. The
    /// semantic runner's fixed-point loop watches this grow.
    pub fn struct_count(&self) -> usize {
        self.structs.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn program(source: &str) -> Program {
        let mut parser = Parser::new(source, "test.td").unwrap();
        let unit = parser.parse_unit().unwrap();
        Program {
            imports: Vec::new(),
            units: vec![unit],
        }
    }

    #[test]
    fn test_build_indexes_by_fqn() {
        let program = program(
            "namespace gfx { struct Color { int r; }; enum Mode { On, Off }; }\n\
             struct Point { int x; };",
        );
        let repo = TypeRepository::build(&program).unwrap();
        assert!(repo.find_struct("gfx::Color").is_some());
        assert!(repo.find_struct("Point").is_some());
        assert!(repo.find_struct("Color").is_none());
        assert!(repo.find_enum("gfx::Mode").is_some());
        assert_eq!(repo.defining_unit_index("Point"), Some(0));
        assert_eq!(repo.struct_count(), 2);
    }

    #[test]
    fn test_duplicate_fqn_is_rejected() {
        let program = program("struct P { int x; };\nstruct P { int y; };");
        let err = TypeRepository::build(&program).unwrap_err();
        assert!(err.contains("duplicate definition of struct 'P'"));
    }

    #[test]
    fn test_identity_of_lookup() {
        // Property: repository.find(fqn(node)) is node
        let program = program("struct P { int x; };");
        let repo = TypeRepository::build(&program).unwrap();
        let node = &program.units[0].structs[0];
        let found = repo.find_struct(&node.fqn()).unwrap();
        assert!(std::ptr::eq(found, node));
    }
}
