//! Import-table classification
//!
//! The emitted PE `.idata` section partitions external functions between
//! `kernel32.dll` (process exit), `msvcrt.dll` (the C runtime calls the
//! code generator leans on), and user-imported libraries from `#import`
//! directives. An optional TOML manifest extends the symbol tables; any
//! external not covered by a table lands in the primary user library, or
//! msvcrt when the program imports none.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Symbols the code generator may call without a source declaration
pub const MSVCRT_SYMBOLS: &[&str] = &["printf", "malloc", "free", "strlen", "strcpy", "memcpy"];

/// A TOML manifest extending the import tables:
///
/// ```toml
/// [libraries]
/// "user32.dll" = ["MessageBoxA", "GetDC"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportManifest {
    #[serde(default)]
    pub libraries: BTreeMap<String, Vec<String>>,
}

impl ImportManifest {
    pub fn parse(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("Failed to parse import manifest: {}", e))
    }
}

/// Classifier from external symbol to owning DLL
pub struct ImportTable {
    /// symbol -> dll name
    known: BTreeMap<String, String>,
    /// user `#import` libraries in first-seen order
    user_libraries: Vec<String>,
}

impl ImportTable {
    pub fn new(user_libraries: &[String], manifests: &[ImportManifest]) -> Self {
        let mut known = BTreeMap::new();
        known.insert("ExitProcess".to_string(), "kernel32.dll".to_string());
        for symbol in MSVCRT_SYMBOLS {
            known.insert(symbol.to_string(), "msvcrt.dll".to_string());
        }
        for manifest in manifests {
            for (dll, symbols) in &manifest.libraries {
                for symbol in symbols {
                    known.insert(symbol.clone(), dll.clone());
                }
            }
        }
        ImportTable {
            known,
            user_libraries: user_libraries.to_vec(),
        }
    }

    /// The DLL an external symbol resolves from
    pub fn classify(&self, symbol: &str) -> String {
        if let Some(dll) = self.known.get(symbol) {
            return dll.clone();
        }
        match self.user_libraries.first() {
            Some(primary) => primary.clone(),
            None => "msvcrt.dll".to_string(),
        }
    }

    /// Group symbols by DLL, sorted for stable emission. `ExitProcess` is
    /// always present since the start stub calls it.
    pub fn partition(&self, externals: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut by_dll: BTreeMap<String, Vec<String>> = BTreeMap::new();
        by_dll
            .entry("kernel32.dll".to_string())
            .or_default()
            .push("ExitProcess".to_string());
        for symbol in externals {
            if symbol == "ExitProcess" {
                continue;
            }
            by_dll
                .entry(self.classify(symbol))
                .or_default()
                .push(symbol.clone());
        }
        for symbols in by_dll.values_mut() {
            symbols.sort();
            symbols.dedup();
        }
        by_dll
    }
}

/// FASM identifier for a DLL: the file stem with non-alphanumerics dropped
pub fn library_identifier(dll: &str) -> String {
    let stem = dll.strip_suffix(".dll").or_else(|| dll.strip_suffix(".DLL")).unwrap_or(dll);
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_classification() {
        let table = ImportTable::new(&[], &[]);
        assert_eq!(table.classify("ExitProcess"), "kernel32.dll");
        assert_eq!(table.classify("printf"), "msvcrt.dll");
        assert_eq!(table.classify("memcpy"), "msvcrt.dll");
    }

    #[test]
    fn test_unclassified_goes_to_primary_user_library() {
        let table = ImportTable::new(&["user32.dll".to_string(), "gdi32.dll".to_string()], &[]);
        assert_eq!(table.classify("MessageBoxA"), "user32.dll");

        let no_user = ImportTable::new(&[], &[]);
        assert_eq!(no_user.classify("MessageBoxA"), "msvcrt.dll");
    }

    #[test]
    fn test_manifest_extends_tables() {
        let manifest = ImportManifest::parse(
            "[libraries]\n\"user32.dll\" = [\"MessageBoxA\"]\n\"winmm.dll\" = [\"timeGetTime\"]\n",
        )
        .unwrap();
        let table = ImportTable::new(&["other.dll".to_string()], &[manifest]);
        assert_eq!(table.classify("MessageBoxA"), "user32.dll");
        assert_eq!(table.classify("timeGetTime"), "winmm.dll");
        assert_eq!(table.classify("Unknown"), "other.dll");
    }

    #[test]
    fn test_partition_always_includes_exit_process() {
        let table = ImportTable::new(&[], &[]);
        let by_dll = table.partition(&["printf".to_string(), "malloc".to_string()]);
        assert_eq!(by_dll["kernel32.dll"], vec!["ExitProcess"]);
        assert_eq!(by_dll["msvcrt.dll"], vec!["malloc", "printf"]);
    }

    #[test]
    fn test_library_identifier() {
        assert_eq!(library_identifier("user32.dll"), "user32");
        assert_eq!(library_identifier("KERNEL32.DLL"), "kernel32");
        assert_eq!(library_identifier("my-lib.dll"), "my_lib");
    }

    #[test]
    fn test_bad_manifest_is_an_error() {
        let err = ImportManifest::parse("libraries = 3").unwrap_err();
        assert!(err.contains("Failed to parse import manifest"));
    }
}
