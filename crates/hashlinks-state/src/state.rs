use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use hashlinks_types::{merge_attributes, Attributes};

use crate::error::{StateError, StateResult};

/// State of one block instance.
///
/// Unknown top-level fields are preserved in `extensions`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub action_results: Map<String, Value>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl BlockState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attributes(attributes: Attributes) -> Self {
        Self {
            attributes,
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Key-wise merge of a partial update; each map in `patch` overrides
    /// the matching keys here.
    pub fn merge(&mut self, patch: &BlockState) {
        merge_attributes(&mut self.attributes, &patch.attributes);
        merge_attributes(&mut self.action_results, &patch.action_results);
        merge_attributes(&mut self.extensions, &patch.extensions);
    }

    pub fn merged(mut self, patch: &BlockState) -> Self {
        self.merge(patch);
        self
    }

    /// The state as one JSON object, as seen by schemas and storage.
    pub fn to_value(&self) -> StateResult<Value> {
        serde_json::to_value(self).map_err(|e| StateError::Serialization(e.to_string()))
    }

    pub fn from_value(value: Value) -> StateResult<Self> {
        serde_json::from_value(value).map_err(|e| StateError::Serialization(e.to_string()))
    }
}
