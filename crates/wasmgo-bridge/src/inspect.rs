//! Static inspection of guest modules before they are instantiated.

use std::fmt::Write as _;

use serde::Serialize;
use sha2::{Digest, Sha256};
use wasmgo_types::{BridgeError, BridgeResult};
use wasmparser::{ExternalKind, Parser, Payload, TypeRef};

use crate::abi::{HOST_IMPORTS, REQUIRED_EXPORTS};

/// Kind of an import or export entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportEntry {
    pub module: String,
    pub name: String,
    pub kind: EntityKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEntry {
    pub name: String,
    pub kind: EntityKind,
}

/// What a guest module needs from the host and what it offers back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    /// Lowercase hex SHA-256 of the module bytes.
    pub digest: String,
    pub size: usize,
    pub imports: Vec<ImportEntry>,
    pub exports: Vec<ExportEntry>,
}

impl ModuleSummary {
    /// Validate `bytes` and collect its imports and exports.
    pub fn parse(bytes: &[u8]) -> BridgeResult<Self> {
        wasmparser::validate(bytes)
            .map_err(|e| BridgeError::Engine(format!("invalid module: {e}")))?;

        let mut imports = Vec::new();
        let mut exports = Vec::new();
        for payload in Parser::new(0).parse_all(bytes) {
            match payload.map_err(parse_error)? {
                Payload::ImportSection(reader) => {
                    for import in reader {
                        let import = import.map_err(parse_error)?;
                        imports.push(ImportEntry {
                            module: import.module.to_string(),
                            name: import.name.to_string(),
                            kind: import_kind(&import.ty),
                        });
                    }
                }
                Payload::ExportSection(reader) => {
                    for export in reader {
                        let export = export.map_err(parse_error)?;
                        exports.push(ExportEntry {
                            name: export.name.to_string(),
                            kind: export_kind(export.kind),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            digest: sha256_hex(bytes),
            size: bytes.len(),
            imports,
            exports,
        })
    }

    /// Function imports the host does not bind.
    pub fn unsupported_imports(&self) -> Vec<&ImportEntry> {
        self.imports
            .iter()
            .filter(|import| import.kind == EntityKind::Func)
            .filter(|import| {
                !HOST_IMPORTS
                    .iter()
                    .any(|(module, name)| *module == import.module && *name == import.name)
            })
            .collect()
    }

    /// Required function exports the module lacks.
    pub fn missing_exports(&self) -> Vec<&'static str> {
        REQUIRED_EXPORTS
            .iter()
            .copied()
            .filter(|required| {
                !self
                    .exports
                    .iter()
                    .any(|export| export.kind == EntityKind::Func && export.name == *required)
            })
            .collect()
    }

    /// Fail early if linking or running the module is bound to fail.
    pub fn preflight(&self) -> BridgeResult<()> {
        if let Some(import) = self.unsupported_imports().first() {
            return Err(BridgeError::Engine(format!(
                "module imports `{}/{}`, which the host does not provide",
                import.module, import.name
            )));
        }
        let missing = self.missing_exports();
        if !missing.is_empty() {
            return Err(BridgeError::Engine(format!(
                "module does not export {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

fn import_kind(ty: &TypeRef) -> EntityKind {
    match ty {
        TypeRef::Func(_) => EntityKind::Func,
        TypeRef::Table(_) => EntityKind::Table,
        TypeRef::Memory(_) => EntityKind::Memory,
        TypeRef::Global(_) => EntityKind::Global,
        TypeRef::Tag(_) => EntityKind::Tag,
    }
}

fn export_kind(kind: ExternalKind) -> EntityKind {
    match kind {
        ExternalKind::Func => EntityKind::Func,
        ExternalKind::Table => EntityKind::Table,
        ExternalKind::Memory => EntityKind::Memory,
        ExternalKind::Global => EntityKind::Global,
        ExternalKind::Tag => EntityKind::Tag,
    }
}

fn parse_error(e: wasmparser::BinaryReaderError) -> BridgeError {
    BridgeError::Engine(format!("malformed module: {e}"))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}
