//! FQN utilities
//!
//! Types are passed around the analyzer and code generator as fully
//! qualified name strings: `ns1::ns2::Name` with one trailing `*` per level
//! of pointer indirection. This module centralizes the string conventions.

/// Sentinel type propagated by the analyzer when an expression could not be
/// typed. An unknown operand suppresses downstream complaints about the
/// same subtree.
pub const UNKNOWN: &str = "unknown";

pub const INT: &str = "int";
pub const CHAR: &str = "char";
pub const VOID: &str = "void";

/// True for the built-in value types
pub fn is_primitive(name: &str) -> bool {
    matches!(name, "int" | "char" | "void")
}

/// True for an unresolved single-letter generic parameter, treated as
/// opaque pointer-sized wherever a size is needed
pub fn is_generic_parameter(name: &str) -> bool {
    name.len() == 1 && name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

/// True if the FQN has at least one level of pointer indirection
pub fn is_pointer(fqn: &str) -> bool {
    fqn.ends_with('*')
}

/// Add one level of pointer indirection
pub fn pointer_to(fqn: &str) -> String {
    format!("{}*", fqn)
}

/// Remove one level of pointer indirection, if present
pub fn pointee(fqn: &str) -> Option<&str> {
    fqn.strip_suffix('*')
}

/// The FQN with all pointer suffixes removed
pub fn strip_pointers(fqn: &str) -> &str {
    fqn.trim_end_matches('*')
}

/// Number of trailing `*` characters
pub fn pointer_depth(fqn: &str) -> usize {
    fqn.len() - strip_pointers(fqn).len()
}

/// True when `fqn` names a struct value (no pointer suffix, not a
/// primitive, not an unresolved generic parameter)
pub fn is_struct_value(fqn: &str) -> bool {
    !is_pointer(fqn) && !is_primitive(fqn) && !is_generic_parameter(fqn) && fqn != UNKNOWN
}
