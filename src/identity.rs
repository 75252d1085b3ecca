//! Module identity model and its binary encoding
//!
//! Every module declares who it is inside a `module-ident` custom section:
//! a name, a four-part version, an optional culture, an optional public key
//! token, and the list of module references it depends on. This module owns
//! the data types and the byte-level codec for that payload; the section
//! framing around it lives in [`crate::rewrite`].

use std::fmt;
use std::str::FromStr;

use crate::{HostError, Result};

/// Four-part module version: major.minor.build.revision.
///
/// Ordering is lexicographic over the four components, which is exactly the
/// "version >= requested minimum" comparison resolution relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ModuleVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl ModuleVersion {
    pub const ZERO: ModuleVersion = ModuleVersion::new(0, 0, 0, 0);

    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for ModuleVersion {
    type Err = HostError;

    /// Parse `"1.2"` or `"1.2.3.4"`; missing trailing parts default to zero.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = [0u16; 4];
        let mut count = 0;
        for piece in s.split('.') {
            if count == 4 {
                return Err(HostError::Config(format!("invalid version '{s}'")));
            }
            parts[count] = piece
                .parse::<u16>()
                .map_err(|_| HostError::Config(format!("invalid version '{s}'")))?;
            count += 1;
        }
        if count == 0 {
            return Err(HostError::Config(format!("invalid version '{s}'")));
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

/// The identity a module declares about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: ModuleVersion,
    pub culture: Option<String>,
    pub public_key_token: Option<Vec<u8>>,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, version: ModuleVersion) -> Self {
        Self {
            name: name.into(),
            version,
            culture: None,
            public_key_token: None,
        }
    }

    /// Whether this identity can satisfy `request`: same name, and a version
    /// at or above the requested minimum.
    pub fn satisfies(&self, request: &ModuleIdentity) -> bool {
        self.name == request.name && self.version >= request.version
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Version={}, Culture={}, PublicKeyToken={}",
            self.name,
            self.version,
            self.culture.as_deref().unwrap_or("neutral"),
            match &self.public_key_token {
                Some(token) => hex::encode(token),
                None => "null".to_string(),
            }
        )
    }
}

/// A dependency reference carried by a module: the name of a required module
/// and the minimum version that satisfies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    pub name: String,
    pub version: ModuleVersion,
}

impl ModuleRef {
    pub fn new(name: impl Into<String>, version: ModuleVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// The ephemeral identity a resolution request is made with.
    pub fn to_request(&self) -> ModuleIdentity {
        ModuleIdentity::new(self.name.clone(), self.version)
    }
}

// === uleb128 helpers (wasm integer encoding) ===

pub(crate) fn write_uleb(out: &mut Vec<u8>, mut value: u32) {
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

/// Byte cursor over a slice; every read is bounds-checked and a short read is
/// an `InvalidModuleFormat`.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| HostError::InvalidModuleFormat("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| HostError::InvalidModuleFormat("unexpected end of input".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn read_uleb(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_byte()?;
            if shift == 28 && byte > 0x0f {
                return Err(HostError::InvalidModuleFormat("uleb128 overflows u32".into()));
            }
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_uleb()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| HostError::InvalidModuleFormat("identity string is not utf-8".into()))
    }

    fn read_version(&mut self) -> Result<ModuleVersion> {
        let mut parts = [0u16; 4];
        for part in &mut parts {
            let v = self.read_uleb()?;
            *part = u16::try_from(v).map_err(|_| {
                HostError::InvalidModuleFormat("version component exceeds u16".into())
            })?;
        }
        Ok(ModuleVersion::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_uleb(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_version(out: &mut Vec<u8>, v: ModuleVersion) {
    write_uleb(out, u32::from(v.major));
    write_uleb(out, u32::from(v.minor));
    write_uleb(out, u32::from(v.build));
    write_uleb(out, u32::from(v.revision));
}

/// Encode an identity record plus its reference table into a `module-ident`
/// section payload.
pub fn encode_ident_payload(identity: &ModuleIdentity, refs: &[ModuleRef]) -> Vec<u8> {
    let mut out = Vec::new();
    write_string(&mut out, &identity.name);
    write_version(&mut out, identity.version);
    write_string(&mut out, identity.culture.as_deref().unwrap_or(""));
    let token = identity.public_key_token.as_deref().unwrap_or(&[]);
    write_uleb(&mut out, token.len() as u32);
    out.extend_from_slice(token);
    write_uleb(&mut out, refs.len() as u32);
    for r in refs {
        write_string(&mut out, &r.name);
        write_version(&mut out, r.version);
    }
    out
}

/// Parse a `module-ident` section payload. Trailing bytes after the reference
/// table are rejected.
pub fn parse_ident_payload(payload: &[u8]) -> Result<(ModuleIdentity, Vec<ModuleRef>)> {
    let mut cur = Cursor::new(payload);

    let name = cur.read_string()?;
    if name.is_empty() {
        return Err(HostError::InvalidModuleFormat("empty module name".into()));
    }
    let version = cur.read_version()?;
    let culture = cur.read_string()?;
    let token_len = cur.read_uleb()? as usize;
    let token = cur.read_bytes(token_len)?.to_vec();

    let ref_count = cur.read_uleb()? as usize;
    let mut refs = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        let ref_name = cur.read_string()?;
        let ref_version = cur.read_version()?;
        refs.push(ModuleRef::new(ref_name, ref_version));
    }

    if !cur.is_empty() {
        return Err(HostError::InvalidModuleFormat(
            "trailing bytes after identity record".into(),
        ));
    }

    let identity = ModuleIdentity {
        name,
        version,
        culture: if culture.is_empty() { None } else { Some(culture) },
        public_key_token: if token.is_empty() { None } else { Some(token) },
    };
    Ok((identity, refs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        let v1 = ModuleVersion::new(1, 0, 0, 0);
        let v1_5 = ModuleVersion::new(1, 5, 0, 0);
        let v2 = ModuleVersion::new(2, 0, 0, 0);
        assert!(v1 < v1_5);
        assert!(v1_5 < v2);
        assert!(ModuleVersion::new(1, 0, 0, 1) > v1);
    }

    #[test]
    fn test_version_from_str() {
        let v: ModuleVersion = "1.2.3.4".parse().unwrap();
        assert_eq!(v, ModuleVersion::new(1, 2, 3, 4));
        let short: ModuleVersion = "2.1".parse().unwrap();
        assert_eq!(short, ModuleVersion::new(2, 1, 0, 0));
        assert!("1.2.3.4.5".parse::<ModuleVersion>().is_err());
        assert!("one".parse::<ModuleVersion>().is_err());
    }

    #[test]
    fn test_satisfies_requires_name_and_minimum_version() {
        let lib2 = ModuleIdentity::new("Lib", ModuleVersion::new(2, 0, 0, 0));
        let want1 = ModuleIdentity::new("Lib", ModuleVersion::new(1, 0, 0, 0));
        let want3 = ModuleIdentity::new("Lib", ModuleVersion::new(3, 0, 0, 0));
        let other = ModuleIdentity::new("Other", ModuleVersion::new(1, 0, 0, 0));
        assert!(lib2.satisfies(&want1));
        assert!(lib2.satisfies(&lib2.clone()));
        assert!(!lib2.satisfies(&want3));
        assert!(!lib2.satisfies(&other));
    }

    #[test]
    fn test_display_formats() {
        let mut id = ModuleIdentity::new("greeter", ModuleVersion::new(1, 2, 0, 0));
        assert_eq!(
            id.to_string(),
            "greeter, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null"
        );
        id.culture = Some("en-US".to_string());
        id.public_key_token = Some(vec![0xb7, 0x7a, 0x5c]);
        assert_eq!(
            id.to_string(),
            "greeter, Version=1.2.0.0, Culture=en-US, PublicKeyToken=b77a5c"
        );
    }

    #[test]
    fn test_payload_round_trip() {
        let identity = ModuleIdentity {
            name: "mathlib".to_string(),
            version: ModuleVersion::new(2, 3, 1, 9),
            culture: Some("en-US".to_string()),
            public_key_token: Some(vec![1, 2, 3, 4]),
        };
        let refs = vec![
            ModuleRef::new("core", ModuleVersion::new(1, 0, 0, 0)),
            ModuleRef::new("fmt", ModuleVersion::ZERO),
        ];
        let payload = encode_ident_payload(&identity, &refs);
        let (parsed, parsed_refs) = parse_ident_payload(&payload).unwrap();
        assert_eq!(parsed, identity);
        assert_eq!(parsed_refs, refs);
    }

    #[test]
    fn test_payload_rejects_truncation_and_trailing_bytes() {
        let identity = ModuleIdentity::new("m", ModuleVersion::ZERO);
        let mut payload = encode_ident_payload(&identity, &[]);

        let truncated = &payload[..payload.len() - 1];
        assert!(matches!(
            parse_ident_payload(truncated),
            Err(HostError::InvalidModuleFormat(_))
        ));

        payload.push(0xff);
        assert!(matches!(
            parse_ident_payload(&payload),
            Err(HostError::InvalidModuleFormat(_))
        ));
    }

    #[test]
    fn test_payload_rejects_empty_name() {
        let identity = ModuleIdentity::new("", ModuleVersion::ZERO);
        let payload = encode_ident_payload(&identity, &[]);
        assert!(parse_ident_payload(&payload).is_err());
    }

    #[test]
    fn test_uleb_round_trip() {
        for value in [0u32, 1, 127, 128, 300, 16384, u32::MAX] {
            let mut buf = Vec::new();
            write_uleb(&mut buf, value);
            let mut cur = Cursor::new(&buf);
            assert_eq!(cur.read_uleb().unwrap(), value);
            assert!(cur.is_empty());
        }
    }
}
