//! The binding descriptor that defines a module's calling convention.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};

/// The only ABI this host speaks.
pub const ABI_VERSION: &str = "hashlinks-wasm-v1";

/// Named entry points a module may expose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryPoint {
    #[default]
    Get,
    Post,
    Info,
}

impl EntryPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Info => "INFO",
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export names for each entry point.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryExports {
    #[serde(rename = "GET", default, skip_serializing_if = "Option::is_none")]
    pub get: Option<String>,
    #[serde(rename = "POST", default, skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
    #[serde(rename = "INFO", default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

/// Published alongside a module; adapts its raw exports to `GET`, `POST`
/// and `INFO`.
///
/// Strings cross the boundary as `(ptr, len)` pairs in memory obtained from
/// `alloc`. Results come back as one `i64` packing `ptr << 32 | len`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDescriptor {
    pub abi: String,
    #[serde(default)]
    pub exports: EntryExports,
    #[serde(default = "default_alloc")]
    pub alloc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dealloc: Option<String>,
    /// Called once after the last entry-point call, whatever its outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default = "default_memory")]
    pub memory: String,
}

fn default_alloc() -> String {
    "hl_alloc".to_string()
}

fn default_memory() -> String {
    "memory".to_string()
}

impl BindingDescriptor {
    /// Descriptor exporting `get`, `post` and `info` under their own names.
    pub fn standard() -> Self {
        Self {
            abi: ABI_VERSION.to_string(),
            exports: EntryExports {
                get: Some("get".into()),
                post: Some("post".into()),
                info: Some("info".into()),
            },
            alloc: default_alloc(),
            dealloc: None,
            release: None,
            memory: default_memory(),
        }
    }

    /// Parse and validate a published descriptor.
    pub fn parse(bytes: &[u8]) -> SandboxResult<Self> {
        let descriptor: Self = serde_json::from_slice(bytes)
            .map_err(|e| SandboxError::InvalidBinding(e.to_string()))?;
        if descriptor.abi != ABI_VERSION {
            return Err(SandboxError::UnsupportedAbi(descriptor.abi));
        }
        Ok(descriptor)
    }

    /// Export name bound to `entry`.
    pub fn export(&self, entry: EntryPoint) -> SandboxResult<&str> {
        let name = match entry {
            EntryPoint::Get => &self.exports.get,
            EntryPoint::Post => &self.exports.post,
            EntryPoint::Info => &self.exports.info,
        };
        name.as_deref()
            .ok_or_else(|| SandboxError::MissingExport(entry.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_published_descriptor() {
        let json = br#"{
            "abi": "hashlinks-wasm-v1",
            "exports": { "GET": "handle_get", "INFO": "describe" },
            "release": "hl_release"
        }"#;
        let binding = BindingDescriptor::parse(json).unwrap();
        assert_eq!(binding.export(EntryPoint::Get).unwrap(), "handle_get");
        assert_eq!(binding.alloc, "hl_alloc");
        assert_eq!(binding.memory, "memory");
        assert_eq!(binding.release.as_deref(), Some("hl_release"));
        assert_eq!(
            binding.export(EntryPoint::Post).unwrap_err(),
            SandboxError::MissingExport("POST".into())
        );
    }

    #[test]
    fn rejects_other_abis_and_garbage() {
        let other = br#"{ "abi": "wasm-bindgen" }"#;
        assert_eq!(
            BindingDescriptor::parse(other).unwrap_err(),
            SandboxError::UnsupportedAbi("wasm-bindgen".into())
        );
        assert!(matches!(
            BindingDescriptor::parse(b"export function GET() {}"),
            Err(SandboxError::InvalidBinding(_))
        ));
    }

    #[test]
    fn entry_points_serialize_uppercase() {
        assert_eq!(serde_json::to_value(EntryPoint::Post).unwrap(), "POST");
    }
}
