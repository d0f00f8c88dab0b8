//! Read-through API client backed by versioned caches.
//!
//! Every lookup tries the cache for its element type first and falls back
//! to the upstream API on a miss, caching what comes back. Upstream
//! errors propagate unchanged; cache misses never error.

use std::sync::Arc;

use meridian_core::{
    ApiClient, ApiError, ApiResult, CacheLimits, Clock, Element, ElementType, GeoItem,
    HistoryLimits, MeridianResult, ObjectId, Path, Point, Relation, SystemClock, Timestamp,
    Upstream, Version,
};
use tracing::debug;

use super::registry::CacheRegistry;
use super::traits::DurableBackend;
use super::versioned::{History, VersionedObjectCache};

/// Configuration for the read-through client's caches.
#[derive(Debug, Clone, Default)]
pub struct ReadThroughConfig {
    /// Prepended to each cache name (`points`, `paths`, `relations`).
    pub name_prefix: String,
    /// Limits shared by the three current-revision caches.
    pub limits: CacheLimits,
    /// Limits shared by the three history tiers.
    pub history_limits: HistoryLimits,
}

impl ReadThroughConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits from `MERIDIAN_CACHE_*` and `MERIDIAN_HISTORY_*`.
    pub fn from_env() -> Self {
        Self {
            name_prefix: String::new(),
            limits: CacheLimits::from_env(),
            history_limits: HistoryLimits::from_env(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn with_limits(mut self, limits: CacheLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_history_limits(mut self, history_limits: HistoryLimits) -> Self {
        self.history_limits = history_limits;
        self
    }

    fn cache_name(&self, element_type: ElementType) -> String {
        let suffix = match element_type {
            ElementType::Point => "points",
            ElementType::Path => "paths",
            ElementType::Relation => "relations",
        };
        format!("{}{}", self.name_prefix, suffix)
    }
}

/// API client that serves from three registered versioned caches.
///
/// # Example
///
/// ```ignore
/// let registry = CacheRegistry::new();
/// let client = ReadThroughClient::new(upstream, &registry, ReadThroughConfig::default())?;
/// let resolver = RelationResolver::new(&client);
/// ```
pub struct ReadThroughClient<U: Upstream> {
    upstream: U,
    points: Arc<VersionedObjectCache<Point>>,
    paths: Arc<VersionedObjectCache<Path>>,
    relations: Arc<VersionedObjectCache<Relation>>,
}

impl<U: Upstream> ReadThroughClient<U> {
    /// Memory-only caches on the system clock.
    pub fn new(upstream: U, registry: &CacheRegistry, config: ReadThroughConfig) -> MeridianResult<Self> {
        Self::build(upstream, registry, config, None, Arc::new(SystemClock))
    }

    /// Caches that overflow into `backend`.
    pub fn with_backend(
        upstream: U,
        registry: &CacheRegistry,
        config: ReadThroughConfig,
        backend: Arc<dyn DurableBackend>,
    ) -> MeridianResult<Self> {
        Self::build(upstream, registry, config, Some(backend), Arc::new(SystemClock))
    }

    /// Validate `config`, create the three caches and register them.
    ///
    /// # Errors
    ///
    /// Invalid limits, or a live durable cache already registered under
    /// one of the three names.
    pub fn build(
        upstream: U,
        registry: &CacheRegistry,
        config: ReadThroughConfig,
        backend: Option<Arc<dyn DurableBackend>>,
        clock: Arc<dyn Clock>,
    ) -> MeridianResult<Self> {
        config.limits.validate()?;

        let points = registry.register(make_cache::<Point>(&config, &backend, &clock))?;
        let paths = registry.register(make_cache::<Path>(&config, &backend, &clock))?;
        let relations = registry.register(make_cache::<Relation>(&config, &backend, &clock))?;

        Ok(Self {
            upstream,
            points,
            paths,
            relations,
        })
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub fn points(&self) -> &VersionedObjectCache<Point> {
        &self.points
    }

    pub fn paths(&self) -> &VersionedObjectCache<Path> {
        &self.paths
    }

    pub fn relations(&self) -> &VersionedObjectCache<Relation> {
        &self.relations
    }

    /// One exact revision.
    pub fn fetch_version(&self, element_type: ElementType, id: ObjectId, version: Version) -> ApiResult<GeoItem> {
        match element_type {
            ElementType::Point => self.version_through(&self.points, id, version),
            ElementType::Path => self.version_through(&self.paths, id, version),
            ElementType::Relation => self.version_through(&self.relations, id, version),
        }
    }

    /// Every revision, oldest first.
    pub fn fetch_history(&self, element_type: ElementType, id: ObjectId) -> ApiResult<Vec<GeoItem>> {
        match element_type {
            ElementType::Point => Ok(flatten(self.history_through(&self.points, id)?)),
            ElementType::Path => Ok(flatten(self.history_through(&self.paths, id)?)),
            ElementType::Relation => Ok(flatten(self.history_through(&self.relations, id)?)),
        }
    }

    fn current_through<E: Element>(&self, cache: &VersionedObjectCache<E>, id: ObjectId) -> ApiResult<GeoItem> {
        if let Some(hit) = cache.get_current(id) {
            return Ok(hit.into_item());
        }
        debug!(element_type = %E::ELEMENT_TYPE, id = %id, "Current revision miss");
        let element = E::from_item(self.upstream.get_current(E::ELEMENT_TYPE, id)?)?;
        cache.cache_current(element.clone());
        Ok(element.into_item())
    }

    fn version_through<E: Element>(
        &self,
        cache: &VersionedObjectCache<E>,
        id: ObjectId,
        version: Version,
    ) -> ApiResult<GeoItem> {
        if let Some(hit) = cache.get_version(id, version) {
            return Ok(hit.into_item());
        }
        debug!(element_type = %E::ELEMENT_TYPE, id = %id, version = %version, "Revision miss");
        let element = E::from_item(self.upstream.get_version(E::ELEMENT_TYPE, id, version)?)?;
        cache.cache_version(element.clone());
        Ok(element.into_item())
    }

    fn history_through<E: Element>(&self, cache: &VersionedObjectCache<E>, id: ObjectId) -> ApiResult<History<E>> {
        if let Some(history) = cache.get_history(id) {
            return Ok(history);
        }
        debug!(element_type = %E::ELEMENT_TYPE, id = %id, "History miss");

        let mut history = History::new();
        for item in self.upstream.get_history(E::ELEMENT_TYPE, id)? {
            let element = E::from_item(item)?;
            if let Some(version) = element.version() {
                history.insert(version, element);
            }
        }
        if history.is_empty() {
            return Err(ApiError::NotFound {
                element_type: E::ELEMENT_TYPE,
                id,
            });
        }

        cache.cache_history(history.clone());
        Ok(history)
    }

    fn at_through<E: Element>(&self, cache: &VersionedObjectCache<E>, id: ObjectId, as_of: Timestamp) -> ApiResult<GeoItem> {
        let history = self.history_through(cache, id)?;
        history
            .into_values()
            .rev()
            .find(|element| element.timestamp() <= as_of)
            .map(Element::into_item)
            .ok_or(ApiError::NotFoundAt {
                element_type: E::ELEMENT_TYPE,
                id,
                as_of,
            })
    }
}

fn make_cache<E: Element>(
    config: &ReadThroughConfig,
    backend: &Option<Arc<dyn DurableBackend>>,
    clock: &Arc<dyn Clock>,
) -> VersionedObjectCache<E> {
    let cache = VersionedObjectCache::new(
        config.cache_name(E::ELEMENT_TYPE),
        config.limits.clone(),
        config.history_limits.clone(),
    )
    .with_clock(Arc::clone(clock));
    match backend {
        Some(backend) => cache.with_backend(Arc::clone(backend)),
        None => cache,
    }
}

fn flatten<E: Element>(history: History<E>) -> Vec<GeoItem> {
    history.into_values().map(Element::into_item).collect()
}

impl<U: Upstream> ApiClient for ReadThroughClient<U> {
    fn fetch(&self, element_type: ElementType, id: ObjectId) -> ApiResult<GeoItem> {
        match element_type {
            ElementType::Point => self.current_through(&self.points, id),
            ElementType::Path => self.current_through(&self.paths, id),
            ElementType::Relation => self.current_through(&self.relations, id),
        }
    }

    fn fetch_at(&self, element_type: ElementType, id: ObjectId, as_of: Timestamp) -> ApiResult<GeoItem> {
        match element_type {
            ElementType::Point => self.at_through(&self.points, id, as_of),
            ElementType::Path => self.at_through(&self.paths, id, as_of),
            ElementType::Relation => self.at_through(&self.relations, id, as_of),
        }
    }

    fn fetch_full(&self, relation_id: ObjectId) -> ApiResult<()> {
        let items = self.upstream.get_full(relation_id)?;
        debug!(relation = %relation_id, items = items.len(), "Caching full relation");
        for item in items {
            match item {
                GeoItem::Point(point) => self.points.cache_current(point),
                GeoItem::Path(path) => self.paths.cache_current(path),
                GeoItem::Relation(relation) => self.relations.cache_current(relation),
            }
        }
        Ok(())
    }
}
