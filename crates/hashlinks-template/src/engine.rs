use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::debug;

use hashlinks_crypto::ContentHasher;
use hashlinks_types::ContentHash;

use crate::error::{TemplateError, TemplateResult};
use crate::eval::Template;
use crate::helpers::HelperRegistry;

/// Default number of compiled templates kept in memory.
pub const DEFAULT_TEMPLATE_CACHE_SIZE: usize = 256;

#[derive(Default)]
struct CompiledCache {
    entries: HashMap<ContentHash, Arc<Template>>,
    order: VecDeque<ContentHash>,
}

/// Compiles and renders templates.
///
/// Compiled templates are cached by the structural hash of their source, so
/// rendering the same body with different contexts parses it once.
pub struct TemplateEngine {
    helpers: RwLock<HelperRegistry>,
    compiled: Mutex<CompiledCache>,
    named: RwLock<HashMap<String, Arc<Template>>>,
    capacity: usize,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TEMPLATE_CACHE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            helpers: RwLock::new(HelperRegistry::with_builtins()),
            compiled: Mutex::new(CompiledCache::default()),
            named: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register or replace a helper.
    pub fn register_helper<F>(&self, name: impl Into<String>, helper: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.helpers
            .write()
            .expect("lock poisoned")
            .register(name, helper);
    }

    /// Parse `source`, or return the cached parse of an identical body.
    pub fn compile(&self, source: &str) -> TemplateResult<Arc<Template>> {
        let key = ContentHasher::TEMPLATE.hash(source.as_bytes());
        if let Some(hit) = self
            .compiled
            .lock()
            .expect("lock poisoned")
            .entries
            .get(&key)
        {
            return Ok(Arc::clone(hit));
        }

        let template = Arc::new(Template::compile(source)?);
        let mut cache = self.compiled.lock().expect("lock poisoned");
        if !cache.entries.contains_key(&key) {
            while cache.entries.len() >= self.capacity {
                let Some(oldest) = cache.order.pop_front() else {
                    break;
                };
                cache.entries.remove(&oldest);
            }
            cache.order.push_back(key);
        }
        cache.entries.insert(key, Arc::clone(&template));
        debug!(template = %key.short_hex(), "compiled template");
        Ok(template)
    }

    pub fn render(&self, source: &str, context: &Value) -> TemplateResult<String> {
        let template = self.compile(source)?;
        self.render_template(&template, context)
    }

    pub fn render_template(&self, template: &Template, context: &Value) -> TemplateResult<String> {
        let helpers = self.helpers.read().expect("lock poisoned");
        template.render(context, &helpers)
    }

    /// Compile `source` and keep it under `name`.
    pub fn precompile(&self, name: impl Into<String>, source: &str) -> TemplateResult<()> {
        let template = self.compile(source)?;
        self.named
            .write()
            .expect("lock poisoned")
            .insert(name.into(), template);
        Ok(())
    }

    pub fn render_named(&self, name: &str, context: &Value) -> TemplateResult<String> {
        let template = self
            .named
            .read()
            .expect("lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))?;
        self.render_template(&template, context)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.named.read().expect("lock poisoned").contains_key(name)
    }

    /// Number of compiled bodies in the cache.
    pub fn cached_count(&self) -> usize {
        self.compiled.lock().expect("lock poisoned").entries.len()
    }

    /// Drop all compiled bodies. Precompiled named templates are kept.
    pub fn clear_cache(&self) {
        let mut cache = self.compiled.lock().expect("lock poisoned");
        cache.entries.clear();
        cache.order.clear();
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_uses_cache() {
        let engine = TemplateEngine::new();
        assert_eq!(engine.render("Hi {{name}}", &json!({"name": "a"})).unwrap(), "Hi a");
        assert_eq!(engine.render("Hi {{name}}", &json!({"name": "b"})).unwrap(), "Hi b");
        assert_eq!(engine.cached_count(), 1);
        let first = engine.compile("Hi {{name}}").unwrap();
        let second = engine.compile("Hi {{name}}").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn cache_is_bounded() {
        let engine = TemplateEngine::with_capacity(2);
        for i in 0..5 {
            engine.render(&format!("t{i} {{{{x}}}}"), &json!({})).unwrap();
        }
        assert_eq!(engine.cached_count(), 2);
        engine.clear_cache();
        assert_eq!(engine.cached_count(), 0);
    }

    #[test]
    fn syntax_errors_are_not_cached() {
        let engine = TemplateEngine::new();
        assert!(matches!(
            engine.render("{{#if x}}", &json!({})),
            Err(TemplateError::Syntax { .. })
        ));
        assert_eq!(engine.cached_count(), 0);
    }

    #[test]
    fn precompiled_templates_render_by_name() {
        let engine = TemplateEngine::new();
        engine.precompile("greeting", "Hello {{who}}").unwrap();
        assert!(engine.has_template("greeting"));
        engine.clear_cache();
        assert_eq!(
            engine.render_named("greeting", &json!({"who": "you"})).unwrap(),
            "Hello you"
        );
        assert_eq!(
            engine.render_named("missing", &json!({})).unwrap_err(),
            TemplateError::UnknownTemplate("missing".into())
        );
    }

    #[test]
    fn registered_helpers_are_visible() {
        let engine = TemplateEngine::new();
        engine.register_helper("shout", |args| {
            Ok(json!(format!("{}!", args.first().and_then(Value::as_str).unwrap_or(""))))
        });
        assert_eq!(engine.render("{{shout word}}", &json!({"word": "hey"})).unwrap(), "hey!");
    }
}
