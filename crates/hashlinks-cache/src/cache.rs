use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use hashlinks_crypto::{verify_hash, HashAlgorithm, IntegrityError};
use hashlinks_types::{ContentResolver, ResolveOptions, ResolvedContent, ResourceDependency, ResourceKind};

use crate::config::ResourceCacheConfig;
use crate::deps::load_order;
use crate::error::{CacheError, CacheResult};
use crate::sanitize::{classify, sanitize};

/// A fetched, classified and sanitized resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedResource {
    pub id: String,
    pub kind: ResourceKind,
    pub content: Bytes,
    pub content_type: String,
    pub size: usize,
    /// `true` when served without a fetch.
    pub from_cache: bool,
}

impl LoadedResource {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Counters reported by [`ResourceCache::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheEntry {
    resource: LoadedResource,
    inserted_at: Instant,
    pinned: bool,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.resource.size);
        if let Some(pos) = self.order.iter().position(|existing| existing == id) {
            self.order.remove(pos);
        }
        Some(entry)
    }

    fn insert(&mut self, resource: LoadedResource, max_bytes: usize) {
        let id = resource.id.clone();
        let pinned = self.remove(&id).is_some_and(|old| old.pinned);
        self.total_bytes = self.total_bytes.saturating_add(resource.size);
        self.entries.insert(
            id.clone(),
            CacheEntry {
                resource,
                inserted_at: Instant::now(),
                pinned,
            },
        );
        self.order.push_back(id);
        self.evict_to(max_bytes);
    }

    /// Drop the oldest unpinned entries until the total fits `max_bytes`.
    fn evict_to(&mut self, max_bytes: usize) {
        while self.total_bytes > max_bytes {
            let Some(pos) = self
                .order
                .iter()
                .position(|id| self.entries.get(id).is_some_and(|e| !e.pinned))
            else {
                warn!(
                    bytes = self.total_bytes,
                    max_bytes, "resource cache over budget with only pinned entries"
                );
                break;
            };
            let Some(oldest) = self.order.remove(pos) else {
                break;
            };
            if let Some(old) = self.entries.remove(&oldest) {
                self.total_bytes = self.total_bytes.saturating_sub(old.resource.size);
                self.evictions += 1;
                debug!(id = %oldest, "evicted resource");
            }
        }
    }
}

/// Typed resource loader with a shared, size-bounded, TTL cache.
///
/// All map mutation and eviction happens under one lock; the lock is never
/// held while the content resolver is awaited.
pub struct ResourceCache {
    resolver: Arc<dyn ContentResolver>,
    config: ResourceCacheConfig,
    inner: Mutex<CacheInner>,
}

impl ResourceCache {
    pub fn new(resolver: Arc<dyn ContentResolver>) -> Self {
        Self::with_config(resolver, ResourceCacheConfig::default())
    }

    pub fn with_config(resolver: Arc<dyn ContentResolver>, config: ResourceCacheConfig) -> Self {
        Self {
            resolver,
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn config(&self) -> &ResourceCacheConfig {
        &self.config
    }

    pub async fn load_style(&self, id: &str) -> CacheResult<LoadedResource> {
        self.load(id, ResourceKind::Style).await
    }

    pub async fn load_script(&self, id: &str) -> CacheResult<LoadedResource> {
        self.load(id, ResourceKind::Script).await
    }

    pub async fn load_template(&self, id: &str) -> CacheResult<LoadedResource> {
        self.load(id, ResourceKind::Template).await
    }

    pub async fn load_image(&self, id: &str) -> CacheResult<LoadedResource> {
        self.load(id, ResourceKind::Image).await
    }

    /// Load `id` as a resource of `kind`, from the cache when a fresh entry
    /// exists.
    pub async fn load(&self, id: &str, kind: ResourceKind) -> CacheResult<LoadedResource> {
        if let Some(hit) = self.lookup(id, kind)? {
            return Ok(hit);
        }
        let content = self.fetch(id, kind).await?;
        let resource = self.prepare(id, kind, content)?;
        self.store(&resource);
        Ok(resource)
    }

    /// Fetch `id` fresh and check its bytes against `expected_hex` before
    /// anything else happens to them.
    ///
    /// On mismatch the resource is not returned and any cached copy is
    /// dropped.
    pub async fn load_with_integrity_check(
        &self,
        id: &str,
        kind: ResourceKind,
        expected_hex: &str,
        algorithm: HashAlgorithm,
    ) -> CacheResult<LoadedResource> {
        self.inner.lock().expect("lock poisoned").misses += 1;
        let content = self.fetch(id, kind).await?;
        if !verify_hash(&content.content, expected_hex, algorithm) {
            warn!(%id, "resource failed integrity check");
            self.invalidate(id);
            return Err(IntegrityError::ContentHashMismatch {
                id: id.to_string(),
                expected: expected_hex.to_string(),
            }
            .into());
        }
        let resource = self.prepare(id, kind, content)?;
        self.store(&resource);
        Ok(resource)
    }

    /// Load a set of resources so that each one follows its dependencies.
    ///
    /// The graph is validated before the first fetch. Results come back in
    /// load order, one per input.
    pub async fn load_dependencies(
        &self,
        resources: &[ResourceDependency],
    ) -> CacheResult<Vec<LoadedResource>> {
        let order = load_order(resources)?;
        let mut loaded = Vec::with_capacity(order.len());
        for resource in order {
            loaded.push(self.load(&resource.id, resource.kind).await?);
        }
        Ok(loaded)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("lock poisoned");
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.total_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("lock poisoned")
            .entries
            .contains_key(id)
    }

    /// Drop the cached copy of `id`. Returns whether one existed.
    pub fn invalidate(&self, id: &str) -> bool {
        self.inner.lock().expect("lock poisoned").remove(id).is_some()
    }

    /// Exempt a cached entry from expiry and eviction.
    pub fn pin(&self, id: &str) -> bool {
        self.set_pinned(id, true)
    }

    pub fn unpin(&self, id: &str) -> bool {
        self.set_pinned(id, false)
    }

    /// Drop every entry, pinned or not. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.entries.clear();
        inner.order.clear();
        inner.total_bytes = 0;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn set_pinned(&self, id: &str, pinned: bool) -> bool {
        let mut inner = self.inner.lock().expect("lock poisoned");
        match inner.entries.get_mut(id) {
            Some(entry) => {
                entry.pinned = pinned;
                true
            }
            None => false,
        }
    }

    fn lookup(&self, id: &str, kind: ResourceKind) -> CacheResult<Option<LoadedResource>> {
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let mut inner = self.inner.lock().expect("lock poisoned");

        let expired = inner
            .entries
            .get(id)
            .map(|entry| !entry.pinned && entry.inserted_at.elapsed() >= ttl);
        let Some(expired) = expired else {
            inner.misses += 1;
            return Ok(None);
        };
        if expired {
            debug!(%id, "resource expired");
            inner.remove(id);
            inner.misses += 1;
            return Ok(None);
        }

        let Some(entry) = inner.entries.get(id) else {
            return Ok(None);
        };
        if entry.resource.kind != kind {
            return Err(CacheError::ContentTypeMismatch {
                id: id.to_string(),
                expected: kind,
                content_type: entry.resource.content_type.clone(),
            });
        }
        let mut resource = entry.resource.clone();
        resource.from_cache = true;
        inner.hits += 1;
        debug!(%id, %kind, "resource cache hit");
        Ok(Some(resource))
    }

    async fn fetch(&self, id: &str, kind: ResourceKind) -> CacheResult<ResolvedContent> {
        let options = match kind {
            ResourceKind::Image => ResolveOptions::raw(self.config.network),
            _ => ResolveOptions::new(self.config.network),
        };
        self.resolver
            .resolve(id, &options)
            .await
            .map_err(|source| CacheError::Fetch {
                id: id.to_string(),
                source,
            })
    }

    fn prepare(
        &self,
        id: &str,
        kind: ResourceKind,
        content: ResolvedContent,
    ) -> CacheResult<LoadedResource> {
        if classify(&content.content_type) != Some(kind) {
            return Err(CacheError::ContentTypeMismatch {
                id: id.to_string(),
                expected: kind,
                content_type: content.content_type,
            });
        }
        if kind == ResourceKind::Script && content.len() > self.config.max_script_bytes {
            return Err(CacheError::TooLarge {
                id: id.to_string(),
                size: content.len(),
                max: self.config.max_script_bytes,
            });
        }

        let bytes = match kind {
            ResourceKind::Image => content.content,
            _ => Bytes::from(sanitize(kind, &content.as_text())),
        };
        Ok(LoadedResource {
            id: id.to_string(),
            kind,
            size: bytes.len(),
            content: bytes,
            content_type: content.content_type,
            from_cache: false,
        })
    }

    fn store(&self, resource: &LoadedResource) {
        // A single entry may take at most half the budget.
        if resource.size > self.config.max_bytes / 2 {
            debug!(id = %resource.id, size = resource.size, "resource too large to cache");
            return;
        }
        self.inner
            .lock()
            .expect("lock poisoned")
            .insert(resource.clone(), self.config.max_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashlinks_crypto::hash;
    use hashlinks_types::{CollaboratorError, InMemoryContentResolver};

    fn setup() -> (Arc<InMemoryContentResolver>, ResourceCache) {
        setup_with(ResourceCacheConfig::default())
    }

    fn setup_with(config: ResourceCacheConfig) -> (Arc<InMemoryContentResolver>, ResourceCache) {
        let resolver = Arc::new(InMemoryContentResolver::new());
        let cache = ResourceCache::with_config(resolver.clone(), config);
        (resolver, cache)
    }

    #[tokio::test]
    async fn second_load_is_served_from_cache() {
        let (resolver, cache) = setup();
        resolver.insert_text("0.0.1", "text/css", "p { color: red; }");

        let first = cache.load_style("0.0.1").await.unwrap();
        assert!(!first.from_cache);
        let second = cache.load_style("0.0.1").await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.text(), "p { color: red; }");
        assert_eq!(resolver.resolve_count("0.0.1"), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn content_type_must_match_requested_kind() {
        let (resolver, cache) = setup();
        resolver.insert_text("0.0.2", "text/css", "p {}");
        let err = cache.load_script("0.0.2").await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::ContentTypeMismatch {
                expected: ResourceKind::Script,
                ..
            }
        ));
        assert!(!cache.contains("0.0.2"));
    }

    #[tokio::test]
    async fn scripts_are_sanitized_before_caching() {
        let (resolver, cache) = setup();
        resolver.insert_text("0.0.3", "application/javascript", "eval(input);");
        let script = cache.load_script("0.0.3").await.unwrap();
        assert!(!script.text().contains("eval("));
    }

    #[tokio::test]
    async fn oversized_script_is_rejected() {
        let (resolver, cache) = setup_with(ResourceCacheConfig {
            max_script_bytes: 8,
            ..ResourceCacheConfig::default()
        });
        resolver.insert_text("0.0.4", "text/javascript", "console.log('too long');");
        let err = cache.load_script("0.0.4").await.unwrap_err();
        assert!(matches!(err, CacheError::TooLarge { max: 8, .. }));
    }

    #[tokio::test]
    async fn images_pass_through_unchanged() {
        let (resolver, cache) = setup();
        let png = vec![0x89, b'P', b'N', b'G', 0, 1, 2];
        resolver.insert_binary("0.0.5", "image/png", png.clone());
        let image = cache.load_image("0.0.5").await.unwrap();
        assert_eq!(image.content.as_ref(), png.as_slice());
    }

    #[tokio::test]
    async fn fetch_failure_is_reported() {
        let (resolver, cache) = setup();
        resolver.fail_with("0.0.6", CollaboratorError::Network("down".into()));
        let err = cache.load_template("0.0.6").await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch { .. }));
        assert!(err.to_string().contains("down"));
    }

    #[tokio::test]
    async fn expired_entries_are_fetched_again_unless_pinned() {
        let (resolver, cache) = setup_with(ResourceCacheConfig {
            ttl_secs: 0,
            ..ResourceCacheConfig::default()
        });
        resolver.insert_text("0.0.7", "text/html", "<p>x</p>");
        cache.load_template("0.0.7").await.unwrap();
        cache.load_template("0.0.7").await.unwrap();
        assert_eq!(resolver.resolve_count("0.0.7"), 2);

        assert!(cache.pin("0.0.7"));
        let pinned = cache.load_template("0.0.7").await.unwrap();
        assert!(pinned.from_cache);
        assert_eq!(resolver.resolve_count("0.0.7"), 2);
    }

    #[tokio::test]
    async fn oldest_unpinned_entry_is_evicted() {
        let (resolver, cache) = setup_with(ResourceCacheConfig {
            max_bytes: 20,
            ..ResourceCacheConfig::default()
        });
        for id in ["a", "b", "c"] {
            resolver.insert_text(id, "text/css", "0123456789");
        }
        cache.load_style("a").await.unwrap();
        cache.pin("a");
        cache.load_style("b").await.unwrap();
        cache.load_style("c").await.unwrap();

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.bytes, 20);
    }

    #[tokio::test]
    async fn entries_over_half_the_budget_are_not_cached() {
        let (resolver, cache) = setup_with(ResourceCacheConfig {
            max_bytes: 10,
            ..ResourceCacheConfig::default()
        });
        resolver.insert_text("big", "text/css", "0123456789");
        cache.load_style("big").await.unwrap();
        assert!(!cache.contains("big"));
    }

    #[tokio::test]
    async fn integrity_check_accepts_matching_digest() {
        let (resolver, cache) = setup();
        let body = "body { margin: 0; }";
        resolver.insert_text("0.0.8", "text/css", body);
        let expected = hash(body.as_bytes(), HashAlgorithm::Blake3).to_hex();
        let loaded = cache
            .load_with_integrity_check("0.0.8", ResourceKind::Style, &expected, HashAlgorithm::Blake3)
            .await
            .unwrap();
        assert_eq!(loaded.text(), body);
    }

    #[tokio::test]
    async fn integrity_mismatch_never_returns_content() {
        let (resolver, cache) = setup();
        resolver.insert_text("0.0.9", "text/css", "tampered");
        cache.load_style("0.0.9").await.unwrap();

        let expected = hash(b"original", HashAlgorithm::Blake3).to_hex();
        let err = cache
            .load_with_integrity_check("0.0.9", ResourceKind::Style, &expected, HashAlgorithm::Blake3)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Integrity(IntegrityError::ContentHashMismatch { .. })
        ));
        assert!(!cache.contains("0.0.9"));

        let malformed = cache
            .load_with_integrity_check("0.0.9", ResourceKind::Style, "zz", HashAlgorithm::Blake3)
            .await;
        assert!(malformed.is_err());
    }

    #[tokio::test]
    async fn dependencies_load_in_order() {
        let (resolver, cache) = setup();
        resolver.insert_text("base", "text/css", "a {}");
        resolver.insert_text("app", "text/javascript", "run();");
        let resources = vec![
            ResourceDependency::new("app", ResourceKind::Script).depends_on("base"),
            ResourceDependency::new("base", ResourceKind::Style),
        ];
        let loaded = cache.load_dependencies(&resources).await.unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["base", "app"]);
    }

    #[tokio::test]
    async fn dependency_cycle_fails_before_any_fetch() {
        let (resolver, cache) = setup();
        let resources = vec![
            ResourceDependency::new("x", ResourceKind::Script).depends_on("y"),
            ResourceDependency::new("y", ResourceKind::Script).depends_on("x"),
        ];
        let err = cache.load_dependencies(&resources).await.unwrap_err();
        assert!(matches!(err, CacheError::DependencyCycle { .. }));
        assert_eq!(resolver.total_resolves(), 0);
    }

    #[tokio::test]
    async fn invalidate_and_clear() {
        let (resolver, cache) = setup();
        resolver.insert_text("s", "text/css", "a {}");
        cache.load_style("s").await.unwrap();
        assert!(cache.invalidate("s"));
        assert!(!cache.invalidate("s"));

        cache.load_style("s").await.unwrap();
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().bytes, 0);
    }
}
