//! On-disk module catalogs
//!
//! A catalog maps module names to the files that provide them, built by
//! recursively walking a directory and peeking each file's identity section
//! without loading it. Catalogs are rebuilt wholesale on every scan so a
//! reload always reflects the current directory state; nothing is patched
//! incrementally.
//!
//! The library catalog used for dependency resolution is the union of the
//! shared libraries directory and the plugins directory (plugins may export
//! modules consumed by other plugins). Plugin-directory entries override
//! library entries of the same name and version: last writer wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::identity::ModuleIdentity;
use crate::rewrite::peek_identity;

/// One discovered module file.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub identity: ModuleIdentity,
    pub path: PathBuf,
}

/// Enumerate module files under `root` (recursive), sorted for a
/// deterministic load order.
pub fn module_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if !root.exists() {
        return files;
    }
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    files
}

/// Enumerate module files under `root` (recursive) and read their identities.
///
/// Files that cannot be read or parsed are logged and skipped; a broken file
/// never aborts the scan.
pub fn scan_directory(root: &Path, extension: &str) -> Vec<CatalogEntry> {
    let mut entries = Vec::new();

    for path in module_files(root, extension) {
        let path = path.as_path();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read module file");
                continue;
            }
        };
        match peek_identity(&bytes) {
            Ok((identity, _refs)) => {
                debug!(path = %path.display(), identity = %identity, "discovered module");
                entries.push(CatalogEntry {
                    identity,
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable module");
            }
        }
    }

    entries
}

/// Name-keyed catalog of discovered module files.
#[derive(Debug, Default)]
pub struct LibraryCatalog {
    entries: HashMap<String, Vec<CatalogEntry>>,
}

impl LibraryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the resolution catalog: libraries first, then the plugins
    /// directory on top.
    pub fn build(libraries_dir: &Path, plugins_dir: &Path, extension: &str) -> Self {
        let mut catalog = Self::new();
        for entry in scan_directory(libraries_dir, extension) {
            catalog.insert(entry);
        }
        for entry in scan_directory(plugins_dir, extension) {
            catalog.insert(entry);
        }
        catalog
    }

    /// Insert an entry. An existing entry with the same name and version is
    /// replaced, so later directories override earlier ones.
    pub fn insert(&mut self, entry: CatalogEntry) {
        let versions = self.entries.entry(entry.identity.name.clone()).or_default();
        match versions
            .iter_mut()
            .find(|e| e.identity.version == entry.identity.version)
        {
            Some(existing) => *existing = entry,
            None => versions.push(entry),
        }
    }

    /// All entries providing `name`, in no particular version order.
    pub fn candidates(&self, name: &str) -> &[CatalogEntry] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{encode_ident_payload, write_uleb, ModuleVersion};

    fn module_bytes(name: &str, version: ModuleVersion) -> Vec<u8> {
        let identity = ModuleIdentity::new(name, version);
        let payload = encode_ident_payload(&identity, &[]);
        let mut section_payload = Vec::new();
        write_uleb(&mut section_payload, "module-ident".len() as u32);
        section_payload.extend_from_slice(b"module-ident");
        section_payload.extend_from_slice(&payload);

        let mut bytes = b"\0asm\x01\0\0\0".to_vec();
        bytes.push(0);
        write_uleb(&mut bytes, section_payload.len() as u32);
        bytes.extend_from_slice(&section_payload);
        bytes
    }

    #[test]
    fn test_scan_is_recursive_and_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("sub/deeper");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            dir.path().join("good.wasm"),
            module_bytes("good", ModuleVersion::new(1, 0, 0, 0)),
        )
        .unwrap();
        std::fs::write(
            nested.join("nested.wasm"),
            module_bytes("nested", ModuleVersion::new(1, 0, 0, 0)),
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.wasm"), b"garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a module").unwrap();

        let mut names: Vec<String> = scan_directory(dir.path(), "wasm")
            .into_iter()
            .map(|e| e.identity.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["good", "nested"]);
    }

    #[test]
    fn test_missing_root_yields_empty_scan() {
        let dir = tempfile::tempdir().unwrap();
        let entries = scan_directory(&dir.path().join("does-not-exist"), "wasm");
        assert!(entries.is_empty());
    }

    #[test]
    fn test_plugins_dir_overrides_libraries_dir() {
        let libs = tempfile::tempdir().unwrap();
        let plugins = tempfile::tempdir().unwrap();
        let version = ModuleVersion::new(1, 0, 0, 0);
        std::fs::write(libs.path().join("shared.wasm"), module_bytes("shared", version)).unwrap();
        std::fs::write(
            plugins.path().join("shared.wasm"),
            module_bytes("shared", version),
        )
        .unwrap();

        let catalog = LibraryCatalog::build(libs.path(), plugins.path(), "wasm");
        let candidates = catalog.candidates("shared");
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].path.starts_with(plugins.path()));
    }

    #[test]
    fn test_distinct_versions_coexist() {
        let libs = tempfile::tempdir().unwrap();
        let plugins = tempfile::tempdir().unwrap();
        std::fs::write(
            libs.path().join("lib1.wasm"),
            module_bytes("lib", ModuleVersion::new(1, 0, 0, 0)),
        )
        .unwrap();
        std::fs::write(
            plugins.path().join("lib3.wasm"),
            module_bytes("lib", ModuleVersion::new(3, 0, 0, 0)),
        )
        .unwrap();

        let catalog = LibraryCatalog::build(libs.path(), plugins.path(), "wasm");
        assert_eq!(catalog.candidates("lib").len(), 2);
    }
}
