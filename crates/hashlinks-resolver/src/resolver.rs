use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{debug, warn};

use hashlinks_template::escape_html;
use hashlinks_types::{
    merge_attributes, ActionMap, Attributes, BlockLoader, BlockReference, CollaboratorError,
    ContentResolver, HashLinkUri, LoadedBlock, Protocol, RenderContext, ResolveOptions,
    ResolvedBlock, HASHLINK_SCHEME,
};

use crate::config::ResolverConfig;

/// Error carried by a block that is already being resolved further up.
pub const CIRCULAR_REFERENCE: &str = "Circular reference detected";

/// Resolves HashLink references against the block loader and content
/// resolver.
///
/// Successful resolutions are memoized for the life of the resolver, keyed
/// by target and override fingerprint. The active-resolution stack is
/// per instance: one resolver serves one render at a time.
pub struct ReferenceResolver {
    loader: Arc<dyn BlockLoader>,
    content: Arc<dyn ContentResolver>,
    config: ResolverConfig,
    cache: Mutex<HashMap<String, ResolvedBlock>>,
    active: Mutex<Vec<String>>,
}

/// Keeps an id on the active-resolution stack until dropped.
pub struct ActiveGuard<'a> {
    active: &'a Mutex<Vec<String>>,
    id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(pos) = active.iter().rposition(|id| *id == self.id) {
                active.remove(pos);
            }
        }
    }
}

impl ReferenceResolver {
    pub fn new(
        loader: Arc<dyn BlockLoader>,
        content: Arc<dyn ContentResolver>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            loader,
            content,
            config,
            cache: Mutex::new(HashMap::new()),
            active: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve an embedded reference. Never fails: faults are reported in
    /// the returned block's `error`.
    pub async fn resolve(&self, reference: &BlockReference, ctx: &RenderContext) -> ResolvedBlock {
        self.resolve_link(
            &reference.link,
            reference.inline_attributes.as_ref(),
            reference.inline_actions.as_ref(),
            ctx,
        )
        .await
    }

    /// Resolve a block by bare id, as for the root of a render.
    pub async fn resolve_block_id(&self, id: &str, ctx: &RenderContext) -> ResolvedBlock {
        match HashLinkUri::parse(&format!("{HASHLINK_SCHEME}{}/{id}", Protocol::Block)) {
            Ok(link) => self.resolve_link(&link, None, None, ctx).await,
            Err(e) => ResolvedBlock::failed(id, e.to_string()),
        }
    }

    pub async fn resolve_link(
        &self,
        link: &HashLinkUri,
        inline_attributes: Option<&Attributes>,
        inline_actions: Option<&ActionMap>,
        ctx: &RenderContext,
    ) -> ResolvedBlock {
        let id = link.reference.as_str();
        if self.is_active(id) {
            warn!(%id, "circular reference");
            return ResolvedBlock::failed(id, CIRCULAR_REFERENCE);
        }

        let key = cache_key(link, inline_attributes, inline_actions, ctx);
        if let Some(hit) = self.cache.lock().expect("lock poisoned").get(&key).cloned() {
            debug!(%id, "resolution cache hit");
            return hit;
        }

        let overrides = Overrides {
            ctx,
            attributes: inline_attributes,
            actions: inline_actions,
        };
        let resolved = {
            let _active = self.enter(id);
            match link.protocol {
                Protocol::Block => self.resolve_block(id, &overrides).await,
                Protocol::RawContent => self.resolve_raw(id, &overrides).await,
                Protocol::Registry => resolve_registry(link, &overrides),
                Protocol::Other(n) => {
                    ResolvedBlock::failed(id, format!("Unsupported HashLink protocol: {n}"))
                }
            }
        };

        if resolved.is_ok() {
            self.cache
                .lock()
                .expect("lock poisoned")
                .insert(key, resolved.clone());
        } else {
            debug!(%id, error = ?resolved.error, "resolution failed");
        }
        resolved
    }

    /// Push `id` onto the active stack for the lifetime of the guard.
    ///
    /// The renderer holds one of these while a block's subtree renders, so
    /// a descendant referring back to it is reported as circular.
    pub fn enter(&self, id: impl Into<String>) -> ActiveGuard<'_> {
        let id = id.into();
        self.active
            .lock()
            .expect("lock poisoned")
            .push(id.clone());
        ActiveGuard {
            active: &self.active,
            id,
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active
            .lock()
            .expect("lock poisoned")
            .iter()
            .any(|active| active == id)
    }

    /// Ids currently being resolved or rendered, outermost first.
    pub fn active_ids(&self) -> Vec<String> {
        self.active.lock().expect("lock poisoned").clone()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().expect("lock poisoned").len()
    }

    /// Drop every memoized resolution.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("lock poisoned").clear();
    }

    // -----------------------------------------------------------------------
    // Protocol handlers
    // -----------------------------------------------------------------------

    async fn resolve_block(&self, id: &str, overrides: &Overrides<'_>) -> ResolvedBlock {
        match self.bounded(self.loader.load_block(id)).await {
            Ok(Some(block)) => overrides.apply(id, block),
            Ok(None) => ResolvedBlock::failed(id, format!("Block not found: {id}")),
            Err(e) => {
                warn!(%id, error = %e, "block loader failed");
                ResolvedBlock::failed(id, describe(&e, &format!("Failed to load block {id}")))
            }
        }
    }

    async fn resolve_raw(&self, id: &str, overrides: &Overrides<'_>) -> ResolvedBlock {
        // The same id may name a block.
        match self.bounded(self.loader.load_block(id)).await {
            Ok(Some(block)) => return overrides.apply(id, block),
            Ok(None) => {}
            Err(CollaboratorError::Timeout) => return ResolvedBlock::failed(id, "timeout"),
            Err(e) => debug!(%id, error = %e, "block loader failed, trying raw content"),
        }

        let options = ResolveOptions::new(self.config.network);
        match self.bounded(self.content.resolve(id, &options)).await {
            Ok(content) if content.is_binary => ResolvedBlock::failed(
                id,
                format!("Content {id} is binary ({}) and cannot be rendered", content.content_type),
            ),
            Ok(content) => {
                let (attributes, actions) = overrides.merge(Attributes::new());
                ResolvedBlock {
                    block_id: id.to_string(),
                    definition: None,
                    template: Some(content.as_text()),
                    attributes,
                    actions,
                    error: None,
                }
            }
            Err(e) => {
                warn!(%id, error = %e, "content resolution failed");
                ResolvedBlock::failed(id, describe(&e, &format!("Failed to resolve content {id}")))
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        match tokio::time::timeout(self.config.timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout),
        }
    }
}

/// Registry entries resolve to a placeholder until compound-registry lookup
/// exists. The merge contract is already honored.
fn resolve_registry(link: &HashLinkUri, overrides: &Overrides<'_>) -> ResolvedBlock {
    let id = link.reference.as_str();
    let (Some(registry_id), Some(entry_name)) =
        (link.registry_id.as_deref(), link.entry_name.as_deref())
    else {
        return ResolvedBlock::failed(
            id,
            "Registry reference requires both a registry id and an entry name",
        );
    };
    let template = format!(
        "<div class=\"hashlink-registry\" data-registry-id=\"{reg}\" data-entry-name=\"{entry}\">Registry entry {entry} from {reg}</div>",
        reg = escape_html(registry_id),
        entry = escape_html(entry_name),
    );
    let (attributes, actions) = overrides.merge(Attributes::new());
    ResolvedBlock {
        block_id: id.to_string(),
        definition: None,
        template: Some(template),
        attributes,
        actions,
        error: None,
    }
}

struct Overrides<'a> {
    ctx: &'a RenderContext,
    attributes: Option<&'a Attributes>,
    actions: Option<&'a ActionMap>,
}

impl Overrides<'_> {
    /// `defaults`, then the parent context, then the inline overrides.
    fn merge(&self, defaults: Attributes) -> (Attributes, ActionMap) {
        let mut attributes = defaults;
        merge_attributes(&mut attributes, &self.ctx.attributes);
        if let Some(inline) = self.attributes {
            merge_attributes(&mut attributes, inline);
        }

        let mut actions = self.ctx.actions.clone();
        if let Some(inline) = self.actions {
            actions.extend(inline.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        (attributes, actions)
    }

    fn apply(&self, id: &str, block: LoadedBlock) -> ResolvedBlock {
        let (attributes, actions) = self.merge(block.definition.default_attributes());
        ResolvedBlock {
            block_id: id.to_string(),
            definition: Some(block.definition),
            template: Some(block.template),
            attributes,
            actions,
            error: None,
        }
    }
}

fn describe(error: &CollaboratorError, context: &str) -> String {
    match error {
        CollaboratorError::Timeout => "timeout".to_string(),
        other => format!("{context}: {other}"),
    }
}

fn cache_key(
    link: &HashLinkUri,
    inline_attributes: Option<&Attributes>,
    inline_actions: Option<&ActionMap>,
    ctx: &RenderContext,
) -> String {
    let fingerprint = json!([
        inline_attributes,
        inline_actions,
        ctx.attributes,
        ctx.actions
    ]);
    format!("{}/{}#{fingerprint}", link.protocol, link.reference)
}
