//! Test fixture builders: hand-encoded WASM modules carrying a
//! `module-ident` section, optional plugin entry exports, and optional
//! imports, small enough to assemble byte by byte.

#![allow(dead_code)]

use std::path::Path;

use hotmod::identity::{encode_ident_payload, ModuleIdentity, ModuleRef, ModuleVersion};

fn uleb(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn name(out: &mut Vec<u8>, s: &str) {
    uleb(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn section(out: &mut Vec<u8>, id: u8, payload: &[u8]) {
    out.push(id);
    uleb(out, payload.len() as u32);
    out.extend_from_slice(payload);
}

/// Builds minimal valid modules: every function (imported or local) has type
/// `() -> ()`, and every local function body is a no-op.
pub struct ModuleBuilder {
    identity: ModuleIdentity,
    refs: Vec<ModuleRef>,
    imports: Vec<(String, String)>,
    exports: Vec<String>,
}

impl ModuleBuilder {
    pub fn new(name: &str, version: ModuleVersion) -> Self {
        Self {
            identity: ModuleIdentity::new(name, version),
            refs: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Declare a dependency reference (name + minimum version).
    pub fn with_ref(mut self, name: &str, version: ModuleVersion) -> Self {
        self.refs.push(ModuleRef::new(name, version));
        self
    }

    /// Import a `() -> ()` function from another module's namespace.
    pub fn with_import(mut self, namespace: &str, field: &str) -> Self {
        self.imports.push((namespace.to_string(), field.to_string()));
        self
    }

    /// Export a no-op `() -> ()` function under `export_name`.
    pub fn with_export(mut self, export_name: &str) -> Self {
        self.exports.push(export_name.to_string());
        self
    }

    /// Export a plugin entry point for `plugin_name`.
    pub fn with_plugin_entry(self, plugin_name: &str) -> Self {
        let export = format!("plugin/{plugin_name}");
        self.with_export(&export)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut bytes = b"\0asm\x01\0\0\0".to_vec();

        if !self.imports.is_empty() || !self.exports.is_empty() {
            // Type section: a single () -> () signature.
            section(&mut bytes, 1, &[0x01, 0x60, 0x00, 0x00]);
        }

        if !self.imports.is_empty() {
            let mut payload = Vec::new();
            uleb(&mut payload, self.imports.len() as u32);
            for (namespace, field) in &self.imports {
                name(&mut payload, namespace);
                name(&mut payload, field);
                payload.push(0x00); // function import
                payload.push(0x00); // type index 0
            }
            section(&mut bytes, 2, &payload);
        }

        if !self.exports.is_empty() {
            // Function section: each local function uses type 0.
            let mut payload = Vec::new();
            uleb(&mut payload, self.exports.len() as u32);
            for _ in &self.exports {
                payload.push(0x00);
            }
            section(&mut bytes, 3, &payload);

            // Export section: local function indices follow the imports.
            let mut payload = Vec::new();
            uleb(&mut payload, self.exports.len() as u32);
            for (i, export) in self.exports.iter().enumerate() {
                name(&mut payload, export);
                payload.push(0x00); // function export
                uleb(&mut payload, (self.imports.len() + i) as u32);
            }
            section(&mut bytes, 7, &payload);

            // Code section: empty bodies.
            let mut payload = Vec::new();
            uleb(&mut payload, self.exports.len() as u32);
            for _ in &self.exports {
                payload.extend_from_slice(&[0x02, 0x00, 0x0b]);
            }
            section(&mut bytes, 10, &payload);
        }

        let mut ident_payload = Vec::new();
        name(&mut ident_payload, "module-ident");
        ident_payload.extend_from_slice(&encode_ident_payload(&self.identity, &self.refs));
        section(&mut bytes, 0, &ident_payload);

        bytes
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.build()).unwrap();
    }
}

/// A plain plugin module: identity + one `plugin/<name>` entry.
pub fn plugin_module(name: &str, version: ModuleVersion) -> Vec<u8> {
    ModuleBuilder::new(name, version).with_plugin_entry(name).build()
}

/// A library module exporting one no-op function.
pub fn library_module(name: &str, version: ModuleVersion, export: &str) -> Vec<u8> {
    ModuleBuilder::new(name, version).with_export(export).build()
}
