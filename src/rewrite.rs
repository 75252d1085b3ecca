//! Identity rewriting over raw WASM binaries
//!
//! Hotloading requires loading the same logical module several times without
//! the runtime seeing two modules with the same declared name. The rewriter
//! parses the binary's section stream, finds the single `module-ident` custom
//! section, renames the declared identity to `<name>-<6 hex chars>`, and
//! re-serializes the binary. Every other section, including the debug `name`
//! section, is copied through byte for byte, so the output is a well-formed
//! module whose only difference is its identity.
//!
//! Any structural error makes the output unloadable, so parsing is strict:
//! truncation, oversized section lengths, or a missing or duplicated identity
//! section all fail with `InvalidModuleFormat` instead of producing partial
//! output.

use uuid::Uuid;

use crate::identity::{
    encode_ident_payload, parse_ident_payload, write_uleb, Cursor, ModuleIdentity, ModuleRef,
};
use crate::{HostError, Result};

const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
const WASM_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Name of the custom section carrying the module identity record.
pub const IDENT_SECTION: &str = "module-ident";

/// One section of the binary: its id, the byte range of the whole section
/// (header included), and the byte range of its payload.
struct Section {
    id: u8,
    full: std::ops::Range<usize>,
    payload: std::ops::Range<usize>,
}

/// Result of a successful identity rewrite.
#[derive(Debug)]
pub struct RewriteOutput {
    /// The re-serialized module bytes, declaring the synthetic name.
    pub bytes: Vec<u8>,
    /// The identity the module declared before rewriting.
    pub original: ModuleIdentity,
    /// The synthetic name now declared by `bytes`.
    pub new_name: String,
    /// The module's dependency reference table, unchanged by the rewrite.
    pub refs: Vec<ModuleRef>,
}

fn parse_sections(bytes: &[u8]) -> Result<Vec<Section>> {
    if bytes.len() < 8 || bytes[0..4] != WASM_MAGIC {
        return Err(HostError::InvalidModuleFormat("bad wasm magic".into()));
    }
    if bytes[4..8] != WASM_VERSION {
        return Err(HostError::InvalidModuleFormat("unsupported wasm version".into()));
    }

    let mut cur = Cursor::new(&bytes[8..]);
    let mut sections = Vec::new();
    while !cur.is_empty() {
        let start = 8 + cur.pos();
        let id = cur.read_byte()?;
        if id > 12 {
            return Err(HostError::InvalidModuleFormat(format!(
                "unknown section id {id}"
            )));
        }
        let size = cur.read_uleb()? as usize;
        let payload_start = 8 + cur.pos();
        cur.read_bytes(size)?;
        let payload_end = 8 + cur.pos();
        sections.push(Section {
            id,
            full: start..payload_end,
            payload: payload_start..payload_end,
        });
    }
    Ok(sections)
}

/// Parse the name of a custom section payload; returns the name and the
/// offset of the section contents within the payload.
fn custom_section_name(payload: &[u8]) -> Result<(String, usize)> {
    let mut cur = Cursor::new(payload);
    let len = cur.read_uleb()? as usize;
    let bytes = cur.read_bytes(len)?;
    let name = String::from_utf8(bytes.to_vec())
        .map_err(|_| HostError::InvalidModuleFormat("custom section name is not utf-8".into()))?;
    Ok((name, cur.pos()))
}

/// Locate the single `module-ident` section and parse its record.
fn find_identity(
    bytes: &[u8],
    sections: &[Section],
) -> Result<(usize, ModuleIdentity, Vec<ModuleRef>)> {
    let mut found: Option<(usize, ModuleIdentity, Vec<ModuleRef>)> = None;
    for (index, section) in sections.iter().enumerate() {
        if section.id != 0 {
            continue;
        }
        let payload = &bytes[section.payload.clone()];
        let (name, contents_at) = custom_section_name(payload)?;
        if name != IDENT_SECTION {
            continue;
        }
        if found.is_some() {
            return Err(HostError::InvalidModuleFormat(
                "duplicate module-ident section".into(),
            ));
        }
        let (identity, refs) = parse_ident_payload(&payload[contents_at..])?;
        found = Some((index, identity, refs));
    }
    found.ok_or_else(|| HostError::InvalidModuleFormat("missing module-ident section".into()))
}

fn encode_custom_section(out: &mut Vec<u8>, name: &str, contents: &[u8]) {
    let mut payload = Vec::with_capacity(name.len() + contents.len() + 4);
    write_uleb(&mut payload, name.len() as u32);
    payload.extend_from_slice(name.as_bytes());
    payload.extend_from_slice(contents);
    out.push(0);
    write_uleb(out, payload.len() as u32);
    out.extend_from_slice(&payload);
}

/// Read a module's declared identity and reference table without loading it.
///
/// Used by the directory scanner to build catalogs cheaply.
pub fn peek_identity(bytes: &[u8]) -> Result<(ModuleIdentity, Vec<ModuleRef>)> {
    let sections = parse_sections(bytes)?;
    let (_, identity, refs) = find_identity(bytes, &sections)?;
    Ok((identity, refs))
}

/// Rewrite a module's declared identity to a fresh synthetic name.
///
/// The synthetic name is `<original>-<6 hex chars>`; a collision with an
/// already-registered name is the caller's responsibility to detect and treat
/// as fatal, never to retry.
pub fn rewrite(bytes: &[u8]) -> Result<RewriteOutput> {
    let suffix = Uuid::new_v4().simple().to_string();
    rewrite_with_suffix(bytes, &suffix[..6])
}

fn rewrite_with_suffix(bytes: &[u8], suffix: &str) -> Result<RewriteOutput> {
    let sections = parse_sections(bytes)?;
    let (ident_index, original, refs) = find_identity(bytes, &sections)?;

    let new_name = format!("{}-{}", original.name, suffix);
    let rewritten = ModuleIdentity {
        name: new_name.clone(),
        ..original.clone()
    };
    let new_payload = encode_ident_payload(&rewritten, &refs);

    let mut out = Vec::with_capacity(bytes.len() + new_name.len());
    out.extend_from_slice(&bytes[..8]);
    for (index, section) in sections.iter().enumerate() {
        if index == ident_index {
            encode_custom_section(&mut out, IDENT_SECTION, &new_payload);
        } else {
            out.extend_from_slice(&bytes[section.full.clone()]);
        }
    }

    Ok(RewriteOutput {
        bytes: out,
        original,
        new_name,
        refs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ModuleVersion;

    fn ident_section(identity: &ModuleIdentity, refs: &[ModuleRef]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_custom_section(&mut out, IDENT_SECTION, &encode_ident_payload(identity, refs));
        out
    }

    fn module_with(identity: &ModuleIdentity, extra_sections: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&WASM_MAGIC);
        bytes.extend_from_slice(&WASM_VERSION);
        bytes.extend_from_slice(&ident_section(identity, &[]));
        for section in extra_sections {
            bytes.extend_from_slice(section);
        }
        bytes
    }

    fn custom(name: &str, contents: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_custom_section(&mut out, name, contents);
        out
    }

    #[test]
    fn test_rewrite_renames_and_preserves_everything_else() {
        let identity = ModuleIdentity::new("greeter", ModuleVersion::new(1, 2, 0, 0));
        let debug_names = custom("name", b"debug-data-carrying-greeter");
        let bytes = module_with(&identity, &[debug_names.clone()]);

        let out = rewrite_with_suffix(&bytes, "abc123").unwrap();
        assert_eq!(out.original, identity);
        assert_eq!(out.new_name, "greeter-abc123");

        let (reparsed, refs) = peek_identity(&out.bytes).unwrap();
        assert_eq!(reparsed.name, "greeter-abc123");
        assert_eq!(reparsed.version, identity.version);
        assert!(refs.is_empty());

        // The debug name section passes through untouched and still carries
        // the original name.
        assert!(out
            .bytes
            .windows(debug_names.len())
            .any(|w| w == debug_names.as_slice()));
    }

    #[test]
    fn test_rewrite_twice_yields_distinct_names() {
        let identity = ModuleIdentity::new("greeter", ModuleVersion::new(1, 0, 0, 0));
        let bytes = module_with(&identity, &[]);
        let a = rewrite(&bytes).unwrap();
        let b = rewrite(&bytes).unwrap();
        assert_ne!(a.new_name, b.new_name);
        assert_eq!(a.original, b.original);
    }

    #[test]
    fn test_rewrite_preserves_refs() {
        let identity = ModuleIdentity::new("app", ModuleVersion::new(1, 0, 0, 0));
        let refs = vec![ModuleRef::new("mathlib", ModuleVersion::new(2, 0, 0, 0))];
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&WASM_MAGIC);
        bytes.extend_from_slice(&WASM_VERSION);
        bytes.extend_from_slice(&ident_section(&identity, &refs));

        let out = rewrite_with_suffix(&bytes, "00ff00").unwrap();
        assert_eq!(out.refs, refs);
        let (_, reparsed_refs) = peek_identity(&out.bytes).unwrap();
        assert_eq!(reparsed_refs, refs);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let err = peek_identity(b"not a module").unwrap_err();
        assert!(matches!(err, HostError::InvalidModuleFormat(_)));
    }

    #[test]
    fn test_missing_identity_section_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&WASM_MAGIC);
        bytes.extend_from_slice(&WASM_VERSION);
        bytes.extend_from_slice(&custom("name", b"just-debug-info"));
        let err = rewrite(&bytes).unwrap_err();
        assert!(matches!(err, HostError::InvalidModuleFormat(_)));
    }

    #[test]
    fn test_duplicate_identity_section_rejected() {
        let identity = ModuleIdentity::new("dup", ModuleVersion::ZERO);
        let section = ident_section(&identity, &[]);
        let bytes = module_with(&identity, &[section]);
        let err = rewrite(&bytes).unwrap_err();
        assert!(matches!(err, HostError::InvalidModuleFormat(_)));
    }

    #[test]
    fn test_truncated_section_rejected() {
        let identity = ModuleIdentity::new("trunc", ModuleVersion::ZERO);
        let bytes = module_with(&identity, &[]);
        let err = peek_identity(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, HostError::InvalidModuleFormat(_)));
    }

    #[test]
    fn test_section_size_overrun_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&WASM_MAGIC);
        bytes.extend_from_slice(&WASM_VERSION);
        bytes.push(0); // custom section
        bytes.push(200); // claims 200 payload bytes, provides none
        let err = peek_identity(&bytes).unwrap_err();
        assert!(matches!(err, HostError::InvalidModuleFormat(_)));
    }
}
