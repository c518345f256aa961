use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use hashlinks_cache::ResourceCache;
use hashlinks_resolver::{ActiveGuard, ReferenceResolver};
use hashlinks_sandbox::{ActionCall, ExecutionResult, ModuleExecutor, ModuleSandbox, WasmtimeSandbox};
use hashlinks_state::{BlockState, BlockStateStore, StateError, StorageBackend};
use hashlinks_template::{scan, splice, TemplateEngine};
use hashlinks_types::{
    merge_attributes, ActionMap, ActionRegistry, Attributes, BlockDefinition, BlockLoader,
    BlockReference, ContentResolver, LoadingMode, RenderContext, ResolvedBlock, ResourceKind,
    SourceSpan,
};

use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::markup::{action_attributes, error_marker, lazy_container, template_context};

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// The external services a renderer reads from.
#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn BlockLoader>,
    pub content: Arc<dyn ContentResolver>,
    pub actions: Option<Arc<dyn ActionRegistry>>,
    /// Defaults to a [`WasmtimeSandbox`] when `actions` is set.
    pub sandbox: Option<Arc<dyn ModuleSandbox>>,
    pub storage: Option<Arc<dyn StorageBackend>>,
}

impl Collaborators {
    pub fn new(loader: Arc<dyn BlockLoader>, content: Arc<dyn ContentResolver>) -> Self {
        Self {
            loader,
            content,
            actions: None,
            sandbox: None,
            storage: None,
        }
    }

    pub fn with_actions(mut self, registry: Arc<dyn ActionRegistry>) -> Self {
        self.actions = Some(registry);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn ModuleSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }
}

/// Per-call render inputs.
#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
    /// Instance id for the root block; defaults to the block id.
    pub instance_id: Option<String>,
    /// Caller attributes. Declared defaults sit beneath them, state above.
    pub attributes: Attributes,
    pub actions: ActionMap,
    /// Installed only when the instance has no state yet.
    pub initial_state: Option<BlockState>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn action(mut self, name: impl Into<String>, reference: impl Into<String>) -> Self {
        self.actions.insert(name.into(), reference.into());
        self
    }

    pub fn initial_state(mut self, state: BlockState) -> Self {
        self.initial_state = Some(state);
        self
    }
}

/// Sanitized text of a style or script a rendered block depends on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceText {
    pub id: String,
    pub content: String,
}

/// A rendered block subtree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    pub instance_id: String,
    pub html: String,
    /// Styles in load order, each at most once.
    pub styles: Vec<ResourceText>,
    pub scripts: Vec<ResourceText>,
    /// Every fault that was rendered in place, across the subtree.
    pub errors: Vec<String>,
}

impl RenderOutput {
    fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            ..Self::default()
        }
    }

    fn add_resource(&mut self, kind: ResourceKind, id: String, content: String) {
        let list = match kind {
            ResourceKind::Style => &mut self.styles,
            ResourceKind::Script => &mut self.scripts,
            ResourceKind::Template | ResourceKind::Image => return,
        };
        if !list.iter().any(|existing| existing.id == id) {
            list.push(ResourceText { id, content });
        }
    }

    /// Fold a child's resources and errors into this output.
    fn absorb(&mut self, child: RenderOutput) {
        for style in child.styles {
            self.add_resource(ResourceKind::Style, style.id, style.content);
        }
        for script in child.scripts {
            self.add_resource(ResourceKind::Script, script.id, script.content);
        }
        self.errors.extend(child.errors);
    }
}

/// Result of [`BlockRenderer::invoke_action`].
#[derive(Clone, Debug, PartialEq)]
pub struct ActionOutcome {
    pub result: ExecutionResult,
    /// The instance's subtree rendered against the updated state.
    pub output: RenderOutput,
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// One block instance in a render tree.
#[derive(Clone, Debug)]
struct Node {
    instance_id: String,
    resolved: ResolvedBlock,
    depth: usize,
    /// Block ids of every ancestor, root first.
    lineage: Vec<String>,
}

#[derive(Clone, Debug)]
struct Instance {
    node: Node,
    /// Attributes the instance last rendered with.
    attributes: Attributes,
}

type NodeFuture<'a> = Pin<Box<dyn Future<Output = RenderResult<RenderOutput>> + Send + 'a>>;

/// Renders blocks and their embedded HashLinks, and dispatches actions.
///
/// Renders and action invocations on one renderer are serialized: sibling
/// references resolve in document order and cache population never races.
pub struct BlockRenderer {
    resolver: ReferenceResolver,
    templates: TemplateEngine,
    state: Arc<BlockStateStore>,
    resources: ResourceCache,
    executor: Option<ModuleExecutor>,
    config: RenderConfig,
    instances: RwLock<HashMap<String, Instance>>,
    restore_attempted: Mutex<HashSet<String>>,
    serial: tokio::sync::Mutex<()>,
}

impl BlockRenderer {
    pub fn new(collaborators: Collaborators, config: RenderConfig) -> RenderResult<Self> {
        let mut state = BlockStateStore::new(config.state());
        if let Some(storage) = collaborators.storage {
            state = state.with_storage(storage);
        }

        let executor = match collaborators.actions {
            Some(registry) => {
                let sandbox: Arc<dyn ModuleSandbox> = match collaborators.sandbox {
                    Some(sandbox) => sandbox,
                    None => Arc::new(
                        WasmtimeSandbox::new(config.sandbox.clone())
                            .map_err(|e| RenderError::Sandbox(e.to_string()))?,
                    ),
                };
                Some(ModuleExecutor::new(
                    registry,
                    Arc::clone(&collaborators.content),
                    sandbox,
                    config.executor(),
                ))
            }
            None => None,
        };

        info!(
            max_depth = config.max_depth,
            max_nodes = config.max_nodes,
            network = %config.network,
            actions = executor.is_some(),
            "block renderer ready"
        );

        Ok(Self {
            resolver: ReferenceResolver::new(
                collaborators.loader,
                Arc::clone(&collaborators.content),
                config.resolver(),
            ),
            templates: TemplateEngine::new(),
            state: Arc::new(state),
            resources: ResourceCache::with_config(collaborators.content, config.resource_cache()),
            executor,
            config,
            instances: RwLock::new(HashMap::new()),
            restore_attempted: Mutex::new(HashSet::new()),
            serial: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Block state for every rendered instance; register schemas and
    /// listeners here.
    pub fn state(&self) -> &Arc<BlockStateStore> {
        &self.state
    }

    /// Template engine; register helpers here.
    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    pub fn resources(&self) -> &ResourceCache {
        &self.resources
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    /// Render `block_id` and everything it embeds.
    ///
    /// Only a failure of the root block itself is an error; nested faults
    /// are rendered in place.
    pub async fn render(&self, block_id: &str, options: RenderOptions) -> RenderResult<RenderOutput> {
        let _serial = self.serial.lock().await;
        let instance_id = options
            .instance_id
            .unwrap_or_else(|| block_id.to_string());

        let ctx = RenderContext::root(instance_id.clone(), self.config.max_depth)
            .with_attributes(options.attributes)
            .with_actions(options.actions);
        let resolved = self.resolver.resolve_block_id(block_id, &ctx).await;
        if let Some(message) = resolved.error.clone() {
            return Err(RenderError::Resolution {
                id: block_id.to_string(),
                message,
            });
        }

        if let Some(initial) = options.initial_state {
            if !self.state.contains(&instance_id) {
                self.state.create(&instance_id, initial)?;
            }
        }

        let node = Node {
            instance_id,
            resolved,
            depth: 0,
            lineage: Vec::new(),
        };
        self.render_subtree(&node).await
    }

    /// Run a named action of a rendered instance, fold its result into the
    /// instance state, and re-render that instance's subtree.
    pub async fn invoke_action(&self, instance_id: &str, call: ActionCall) -> RenderResult<ActionOutcome> {
        let _serial = self.serial.lock().await;
        let instance = self
            .instances
            .read()
            .expect("lock poisoned")
            .get(instance_id)
            .cloned()
            .ok_or_else(|| RenderError::UnknownInstance(instance_id.to_string()))?;
        let reference = instance
            .node
            .resolved
            .actions
            .get(&call.action)
            .cloned()
            .ok_or_else(|| RenderError::UnknownAction {
                instance: instance_id.to_string(),
                action: call.action.clone(),
            })?;
        let executor = self.executor.as_ref().ok_or(RenderError::ActionsUnavailable)?;

        // State committed since the last render wins over the rendered snapshot.
        let mut attributes = instance.attributes;
        if let Some(current) = self.state.get(instance_id) {
            merge_attributes(&mut attributes, &current.attributes);
        }

        let action_name = call.action.clone();
        let result = executor
            .execute(&reference, &call.with_state(attributes))
            .await;

        let value = result.to_value();
        let mut patch = BlockState::new();
        if result.is_success() {
            patch.attributes = action_attributes(&value);
        }
        patch.action_results.insert(action_name.clone(), value);
        self.state.set(instance_id, patch)?;
        if self.state.has_storage() && !self.state.persist(instance_id).await {
            warn!(instance = %instance_id, "action state was not persisted");
        }
        debug!(instance = %instance_id, action = %action_name, success = result.is_success(), "action applied");

        let output = self.render_subtree(&instance.node).await?;
        Ok(ActionOutcome { result, output })
    }

    /// Re-render one previously rendered instance against its current
    /// state, e.g. after the state was changed through [`Self::state`].
    pub async fn rerender(&self, instance_id: &str) -> RenderResult<RenderOutput> {
        let _serial = self.serial.lock().await;
        let node = self
            .instances
            .read()
            .expect("lock poisoned")
            .get(instance_id)
            .map(|instance| instance.node.clone())
            .ok_or_else(|| RenderError::UnknownInstance(instance_id.to_string()))?;
        self.render_subtree(&node).await
    }

    /// Rendered instance ids, in no particular order.
    pub fn instance_ids(&self) -> Vec<String> {
        self.instances
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Drop `instance_id` and every instance nested under it, together with
    /// their live state. Persisted copies stay in storage and are restored
    /// if the instance is rendered again. Returns how many rendered
    /// instances were dropped.
    pub async fn destroy(&self, instance_id: &str) -> RenderResult<usize> {
        let _serial = self.serial.lock().await;
        let nested = format!("{instance_id}::");
        let owned = |id: &str| id == instance_id || id.starts_with(&nested);

        let dropped = {
            let mut instances = self.instances.write().expect("lock poisoned");
            let before = instances.len();
            instances.retain(|id, _| !owned(id));
            before - instances.len()
        };
        self.restore_attempted
            .lock()
            .expect("lock poisoned")
            .retain(|id| !owned(id));

        for id in self.state.block_ids() {
            if !owned(&id) {
                continue;
            }
            match self.state.destroy(&id) {
                Ok(_) | Err(StateError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(instance = %instance_id, dropped, "destroyed block instances");
        Ok(dropped)
    }

    // -----------------------------------------------------------------------
    // Recursion
    // -----------------------------------------------------------------------

    /// Render `node` with a fresh budget, its ancestors marked active.
    async fn render_subtree(&self, node: &Node) -> RenderResult<RenderOutput> {
        let budget = AtomicUsize::new(self.config.max_nodes);
        let _active = self.enter_lineage(node);
        self.render_node(node, &budget).await
    }

    fn render_node<'a>(&'a self, node: &'a Node, budget: &'a AtomicUsize) -> NodeFuture<'a> {
        Box::pin(async move {
            self.restore_once(&node.instance_id).await;
            let stored = self.state.get(&node.instance_id).unwrap_or_default();

            let mut attributes = node.resolved.attributes.clone();
            merge_attributes(&mut attributes, &stored.attributes);
            let ctx = RenderContext {
                block_id: node.instance_id.clone(),
                depth: node.depth,
                max_depth: self.config.max_depth,
                attributes: attributes.clone(),
                actions: node.resolved.actions.clone(),
            };

            let mut output = RenderOutput::new(&node.instance_id);
            if let Some(definition) = &node.resolved.definition {
                self.load_resources(definition, &mut output).await;
            }

            let template = node.resolved.template.as_deref().unwrap_or_default();
            let context = template_context(
                &node.instance_id,
                &attributes,
                &ctx.actions,
                &stored.action_results,
            );
            let html = self.templates.render(template, &context)?;

            self.instances.write().expect("lock poisoned").insert(
                node.instance_id.clone(),
                Instance {
                    node: node.clone(),
                    attributes,
                },
            );

            let report = scan(&html);
            let mut replacements: Vec<(SourceSpan, String)> =
                Vec::with_capacity(report.references.len() + report.errors.len());
            for bad in &report.errors {
                let message = format!("Invalid HashLink {}: {}", bad.uri, bad.error);
                output.errors.push(message.clone());
                replacements.push((bad.span, error_marker(&message)));
            }
            for (index, reference) in report.references.iter().enumerate() {
                let text = if ctx.children_exceed_depth() {
                    debug!(
                        uri = %reference.uri(),
                        max_depth = ctx.max_depth,
                        "depth limit reached, leaving reference unexpanded"
                    );
                    html[reference.span.start..reference.span.end].to_string()
                } else {
                    self.render_child(node, &ctx, reference, index, budget, &mut output)
                        .await
                };
                replacements.push((reference.span, text));
            }
            replacements.sort_by_key(|(span, _)| span.start);

            output.html = splice(&html, &replacements);
            Ok(output)
        })
    }

    async fn render_child(
        &self,
        parent: &Node,
        ctx: &RenderContext,
        reference: &BlockReference,
        index: usize,
        budget: &AtomicUsize,
        output: &mut RenderOutput,
    ) -> String {
        let uri = reference.uri();
        if budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_err()
        {
            let message = format!("Render budget of {} blocks exhausted", self.config.max_nodes);
            return fail(output, uri, &message);
        }

        let resolved = self.resolver.resolve(reference, ctx).await;
        if let Some(error) = resolved.error.as_deref() {
            return fail(output, uri, error);
        }

        let mut lineage = parent.lineage.clone();
        lineage.push(parent.resolved.block_id.clone());
        let child = Node {
            instance_id: format!("{}::{}:{index}", parent.instance_id, reference.reference()),
            resolved,
            depth: parent.depth + 1,
            lineage,
        };

        let rendered = {
            let _active = self.resolver.enter(child.resolved.block_id.clone());
            self.render_node(&child, budget).await
        };
        match rendered {
            Ok(rendered) => {
                let html = match reference.loading {
                    LoadingMode::Eager => rendered.html.clone(),
                    LoadingMode::Lazy => lazy_container(uri, &child.instance_id, &rendered.html),
                };
                output.absorb(rendered);
                html
            }
            Err(e) => fail(output, uri, &e.to_string()),
        }
    }

    /// Put `node` and its ancestors on the active-resolution stack.
    fn enter_lineage(&self, node: &Node) -> Vec<ActiveGuard<'_>> {
        node.lineage
            .iter()
            .chain(std::iter::once(&node.resolved.block_id))
            .map(|id| self.resolver.enter(id.clone()))
            .collect()
    }

    async fn load_resources(&self, definition: &BlockDefinition, output: &mut RenderOutput) {
        if definition.resources.is_empty() {
            return;
        }
        match self.resources.load_dependencies(&definition.resources).await {
            Ok(loaded) => {
                for resource in loaded {
                    let text = resource.text();
                    output.add_resource(resource.kind, resource.id, text);
                }
            }
            Err(e) => {
                warn!(block = %definition.name, error = %e, "failed to load block resources");
                output
                    .errors
                    .push(format!("Resources for {}: {e}", definition.name));
            }
        }
    }

    async fn restore_once(&self, instance_id: &str) {
        if !self.state.has_storage() || self.state.contains(instance_id) {
            return;
        }
        if !self
            .restore_attempted
            .lock()
            .expect("lock poisoned")
            .insert(instance_id.to_string())
        {
            return;
        }
        if self.state.restore(instance_id).await.is_some() {
            debug!(instance = %instance_id, "restored persisted block state");
        }
    }
}

fn fail(output: &mut RenderOutput, uri: &str, message: &str) -> String {
    warn!(%uri, error = %message, "nested block failed");
    output.errors.push(format!("{uri}: {message}"));
    error_marker(message)
}
