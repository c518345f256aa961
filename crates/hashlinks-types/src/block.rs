use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::uri::{HashLinkUri, Protocol};

/// Attribute map carried by blocks, contexts and state.
pub type Attributes = Map<String, Value>;

/// Logical action name -> action reference id.
pub type ActionMap = BTreeMap<String, String>;

/// Merge `overlay` into `base`; keys in `overlay` win.
pub fn merge_attributes(base: &mut Attributes, overlay: &Attributes) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

// ---------------------------------------------------------------------------
// Block definitions
// ---------------------------------------------------------------------------

/// Declared type of a block attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

/// Declaration of a single block attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

/// Typed resource a block depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Style,
    Script,
    Template,
    Image,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Style => "style",
            Self::Script => "script",
            Self::Template => "template",
            Self::Image => "image",
        };
        f.write_str(name)
    }
}

/// One node of a resource dependency graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDependency {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<String>,
}

impl ResourceDependency {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// Definition of a block as published on the consensus log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceDependency>,
}

impl BlockDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            category: None,
            description: None,
            attributes: BTreeMap::new(),
            resources: Vec::new(),
        }
    }

    /// Declare an attribute with a default value.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        kind: AttributeType,
        default: Option<Value>,
    ) -> Self {
        self.attributes.insert(
            name.into(),
            AttributeSpec {
                kind,
                default,
                allowed: None,
            },
        );
        self
    }

    /// Declared default values, for attributes that have one.
    pub fn default_attributes(&self) -> Attributes {
        self.attributes
            .iter()
            .filter_map(|(name, spec)| spec.default.clone().map(|v| (name.clone(), v)))
            .collect()
    }
}

/// A block definition together with its template body, as returned by a
/// [`BlockLoader`](crate::BlockLoader).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadedBlock {
    pub definition: BlockDefinition,
    pub template: String,
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Whether a reference is expanded in place or deferred.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingMode {
    #[default]
    Eager,
    Lazy,
}

/// Byte range `[start, end)` of an element inside a template body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One embedded HashLink occurrence inside a template body.
///
/// Occurrences are not deduplicated: the same target can appear twice with
/// different overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockReference {
    pub link: HashLinkUri,
    /// Tag name of the element carrying the marker attribute.
    pub tag_name: String,
    pub inline_attributes: Option<Attributes>,
    pub inline_actions: Option<ActionMap>,
    pub loading: LoadingMode,
    pub span: SourceSpan,
    /// The full element text covered by `span`.
    pub element: String,
}

impl BlockReference {
    pub fn uri(&self) -> &str {
        &self.link.uri
    }

    pub fn protocol(&self) -> Protocol {
        self.link.protocol
    }

    pub fn protocol_id(&self) -> String {
        self.link.protocol_id()
    }

    pub fn reference(&self) -> &str {
        &self.link.reference
    }

    pub fn registry_id(&self) -> Option<&str> {
        self.link.registry_id.as_deref()
    }

    pub fn entry_name(&self) -> Option<&str> {
        self.link.entry_name.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// The outcome of resolving a [`BlockReference`].
///
/// `definition` is `None` when the reference pointed at raw (non-block)
/// content. Failures are carried in `error` rather than raised, so one bad
/// reference never aborts a render.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBlock {
    pub block_id: String,
    pub definition: Option<BlockDefinition>,
    pub template: Option<String>,
    pub attributes: Attributes,
    pub actions: ActionMap,
    pub error: Option<String>,
}

impl ResolvedBlock {
    /// A resolution that failed with `error`.
    pub fn failed(block_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            definition: None,
            template: None,
            attributes: Attributes::new(),
            actions: ActionMap::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Context passed down the render recursion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderContext {
    pub block_id: String,
    pub depth: usize,
    pub max_depth: usize,
    pub attributes: Attributes,
    pub actions: ActionMap,
}

impl RenderContext {
    /// Context for a root block at depth 0.
    pub fn root(block_id: impl Into<String>, max_depth: usize) -> Self {
        Self {
            block_id: block_id.into(),
            depth: 0,
            max_depth,
            attributes: Attributes::new(),
            actions: ActionMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_actions(mut self, actions: ActionMap) -> Self {
        self.actions = actions;
        self
    }

    /// Context for a nested block one level deeper.
    pub fn child(
        &self,
        block_id: impl Into<String>,
        attributes: Attributes,
        actions: ActionMap,
    ) -> Self {
        Self {
            block_id: block_id.into(),
            depth: self.depth + 1,
            max_depth: self.max_depth,
            attributes,
            actions,
        }
    }

    /// `true` once a child of this context would reach `max_depth`.
    pub fn children_exceed_depth(&self) -> bool {
        self.depth + 1 >= self.max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_attributes_skips_undefaulted() {
        let def = BlockDefinition::new("counter")
            .with_attribute("count", AttributeType::Number, Some(json!(0)))
            .with_attribute("label", AttributeType::String, None);
        let defaults = def.default_attributes();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults["count"], json!(0));
    }

    #[test]
    fn definition_deserializes_from_published_json() {
        let def: BlockDefinition = serde_json::from_value(json!({
            "name": "hashlinks/counter",
            "title": "Counter",
            "attributes": {
                "count": { "type": "number", "default": 0 },
                "mode": { "type": "string", "default": "light", "enum": ["light", "dark"] }
            },
            "resources": [
                { "id": "0.0.9", "kind": "style" },
                { "id": "0.0.10", "kind": "script", "dependsOn": ["0.0.9"] }
            ]
        }))
        .unwrap();
        assert_eq!(def.attributes["mode"].allowed.as_ref().unwrap().len(), 2);
        assert_eq!(def.resources[1].depends_on, vec!["0.0.9".to_string()]);
    }

    #[test]
    fn merge_attributes_overlay_wins() {
        let mut base = json!({ "a": 1, "b": 2 }).as_object().cloned().unwrap();
        let overlay = json!({ "b": 3, "c": 4 }).as_object().cloned().unwrap();
        merge_attributes(&mut base, &overlay);
        assert_eq!(Value::Object(base), json!({ "a": 1, "b": 3, "c": 4 }));
    }

    #[test]
    fn child_context_increments_depth() {
        let root = RenderContext::root("root", 2);
        assert!(!root.children_exceed_depth());
        let child = root.child("child", Attributes::new(), ActionMap::new());
        assert_eq!(child.depth, 1);
        assert!(child.children_exceed_depth());
    }

    #[test]
    fn failed_resolution_carries_error() {
        let resolved = ResolvedBlock::failed("0.0.1", "Block not found: 0.0.1");
        assert!(!resolved.is_ok());
        assert!(resolved.definition.is_none());
    }
}
