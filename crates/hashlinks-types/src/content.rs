use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Ledger network a render or action call targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
    Previewnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Previewnet => "previewnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "previewnet" => Ok(Self::Previewnet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Options for a content resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub network: Network,
    /// Ask for the stored bytes without any decoding by the resolver.
    pub return_raw: bool,
}

impl ResolveOptions {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            return_raw: false,
        }
    }

    pub fn raw(network: Network) -> Self {
        Self {
            network,
            return_raw: true,
        }
    }
}

/// Bytes returned by a [`ContentResolver`](crate::ContentResolver).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedContent {
    pub content: Bytes,
    pub content_type: String,
    pub source_id: String,
    pub is_binary: bool,
}

impl ResolvedContent {
    pub fn text(
        source_id: impl Into<String>,
        content_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            content: Bytes::from(text.into()),
            content_type: content_type.into(),
            source_id: source_id.into(),
            is_binary: false,
        }
    }

    pub fn binary(
        source_id: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            content: data.into(),
            content_type: content_type.into(),
            source_id: source_id.into(),
            is_binary: true,
        }
    }

    /// Content as UTF-8, replacing invalid sequences.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// An executable action as published in the action registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRegistration {
    /// Reference id of this registration.
    pub reference: String,
    /// Content reference of the executable module.
    pub module_reference: String,
    /// Content reference of the binding descriptor that defines the calling
    /// convention. Modules without one cannot be invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_reference: Option<String>,
    /// Expected hex digest of the module bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_hash: Option<String>,
}

impl ActionRegistration {
    pub fn new(reference: impl Into<String>, module_reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            module_reference: module_reference.into(),
            wrapper_reference: None,
            module_hash: None,
        }
    }

    pub fn with_wrapper(mut self, wrapper_reference: impl Into<String>) -> Self {
        self.wrapper_reference = Some(wrapper_reference.into());
        self
    }

    pub fn with_module_hash(mut self, hash: impl Into<String>) -> Self {
        self.module_hash = Some(hash.into());
        self
    }
}
