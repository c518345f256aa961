//! HashLink reference URIs: `hcs://<protocolId>/<reference>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// URI scheme prefix for every HashLink.
pub const HASHLINK_SCHEME: &str = "hcs://";

/// Protocol family addressed by a HashLink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// `1`: directly-addressed raw content.
    RawContent,
    /// `2`: two-part `<registryId>/<entryName>` compound reference.
    Registry,
    /// `12`: directly-addressed block definition.
    Block,
    /// Any other numeric id. Parses, but no resolver supports it.
    Other(u32),
}

impl Protocol {
    pub fn from_id(id: u32) -> Self {
        match id {
            1 => Self::RawContent,
            2 => Self::Registry,
            12 => Self::Block,
            other => Self::Other(other),
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Self::RawContent => 1,
            Self::Registry => 2,
            Self::Block => 12,
            Self::Other(id) => *id,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A parsed HashLink.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashLinkUri {
    /// The URI exactly as written.
    pub uri: String,
    pub protocol: Protocol,
    /// Everything after `<protocolId>/`.
    pub reference: String,
    /// Set for [`Protocol::Registry`] only.
    pub registry_id: Option<String>,
    /// Set for [`Protocol::Registry`] only.
    pub entry_name: Option<String>,
}

impl HashLinkUri {
    /// Parse a HashLink.
    ///
    /// The protocol id must be numeric and the reference non-empty. Registry
    /// references must further split into a non-empty registry id and entry
    /// name.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let trimmed = input.trim();
        let rest = trimmed
            .strip_prefix(HASHLINK_SCHEME)
            .ok_or_else(|| TypeError::MissingScheme(trimmed.to_string()))?;

        let (protocol_str, reference) = rest.split_once('/').unwrap_or((rest, ""));
        if protocol_str.is_empty() || !protocol_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TypeError::InvalidProtocol {
                uri: trimmed.to_string(),
                protocol: protocol_str.to_string(),
            });
        }
        let protocol_id: u32 = protocol_str.parse().map_err(|_| TypeError::InvalidProtocol {
            uri: trimmed.to_string(),
            protocol: protocol_str.to_string(),
        })?;
        if reference.is_empty() {
            return Err(TypeError::EmptyReference(trimmed.to_string()));
        }

        let protocol = Protocol::from_id(protocol_id);
        let (registry_id, entry_name) = if protocol == Protocol::Registry {
            match reference.split_once('/') {
                Some((registry, entry)) if !registry.is_empty() && !entry.is_empty() => {
                    (Some(registry.to_string()), Some(entry.to_string()))
                }
                _ => return Err(TypeError::InvalidRegistryReference(trimmed.to_string())),
            }
        } else {
            (None, None)
        };

        Ok(Self {
            uri: trimmed.to_string(),
            protocol,
            reference: reference.to_string(),
            registry_id,
            entry_name,
        })
    }

    /// The protocol id as written in the URI.
    pub fn protocol_id(&self) -> String {
        self.protocol.id().to_string()
    }
}

impl FromStr for HashLinkUri {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HashLinkUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_block_reference() {
        let link = HashLinkUri::parse("hcs://12/0.0.123456").unwrap();
        assert_eq!(link.protocol, Protocol::Block);
        assert_eq!(link.protocol_id(), "12");
        assert_eq!(link.reference, "0.0.123456");
        assert!(link.registry_id.is_none());
    }

    #[test]
    fn parses_registry_reference() {
        let link = HashLinkUri::parse("hcs://2/0.0.500/counter-block").unwrap();
        assert_eq!(link.protocol, Protocol::Registry);
        assert_eq!(link.registry_id.as_deref(), Some("0.0.500"));
        assert_eq!(link.entry_name.as_deref(), Some("counter-block"));
    }

    #[test]
    fn unknown_numeric_protocol_parses_as_other() {
        let link = HashLinkUri::parse("hcs://7/abc").unwrap();
        assert_eq!(link.protocol, Protocol::Other(7));
    }

    #[test]
    fn rejects_non_numeric_protocol() {
        let err = HashLinkUri::parse("hcs://abc/0.0.1").unwrap_err();
        assert!(matches!(err, TypeError::InvalidProtocol { .. }));
    }

    #[test]
    fn rejects_missing_scheme_and_empty_reference() {
        assert!(matches!(
            HashLinkUri::parse("https://12/0.0.1"),
            Err(TypeError::MissingScheme(_))
        ));
        assert!(matches!(
            HashLinkUri::parse("hcs://12/"),
            Err(TypeError::EmptyReference(_))
        ));
        assert!(matches!(
            HashLinkUri::parse("hcs://12"),
            Err(TypeError::EmptyReference(_))
        ));
    }

    #[test]
    fn rejects_malformed_registry_reference() {
        for bad in ["hcs://2/0.0.500", "hcs://2/0.0.500/", "hcs://2//entry"] {
            assert!(
                matches!(
                    HashLinkUri::parse(bad),
                    Err(TypeError::InvalidRegistryReference(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    proptest! {
        #[test]
        fn block_ids_roundtrip(id in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,9}") {
            let uri = format!("hcs://12/{id}");
            let link = HashLinkUri::parse(&uri).unwrap();
            prop_assert_eq!(link.protocol_id(), "12");
            prop_assert_eq!(link.reference, id);
            prop_assert_eq!(link.uri, uri);
        }
    }
}
