use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::CoreResult;
use crate::model::{field::title_field, Id, OptionRef};
use crate::store::traits::Store;

const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CachedTitles {
    titles: HashMap<Id, String>,
    fetched_at: Instant,
}

/// Produces stable id→display-title maps for a related entity type by
/// locating the type's title field and batch-fetching its instances in one
/// query.
///
/// Results are cached per related-type id with a short TTL. The cache is
/// NOT actively invalidated when instances of the type are written — a
/// title read inside the TTL window may be stale. That window is a stated
/// policy, not an accident; callers that need tighter bounds call
/// [`OptionResolver::invalidate`] from their write hook.
pub struct OptionResolver<S: Store> {
    store: Arc<S>,
    cache: RwLock<HashMap<Id, CachedTitles>>,
    ttl: Duration,
}

impl<S: Store> OptionResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_ttl(store, DEFAULT_TTL)
    }

    pub fn with_ttl(store: Arc<S>, ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Resolve the given instance ids of a type to `{id, title}` pairs,
    /// preserving input order. Ids with no resolvable title fall back to
    /// the raw id string.
    pub async fn resolve_titles(
        &self,
        definition_id: &Id,
        ids: &[Id],
    ) -> CoreResult<Vec<OptionRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let titles = self.titles_for(definition_id).await?;
        Ok(ids
            .iter()
            .map(|id| OptionRef {
                id: id.clone(),
                title: titles.get(id).cloned().unwrap_or_else(|| id.clone()),
            })
            .collect())
    }

    /// The full option list for a type, for selector UIs. Sorted by title
    /// for stable display.
    pub async fn options_for_type(&self, definition_id: &Id) -> CoreResult<Vec<OptionRef>> {
        let titles = self.titles_for(definition_id).await?;
        let mut options: Vec<OptionRef> = titles
            .into_iter()
            .map(|(id, title)| OptionRef { id, title })
            .collect();
        options.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(options)
    }

    /// Drop the cached map for one type. Not called by the core itself;
    /// see the staleness note on the type.
    pub async fn invalidate(&self, definition_id: &Id) {
        self.cache.write().await.remove(definition_id);
    }

    async fn titles_for(&self, definition_id: &Id) -> CoreResult<HashMap<Id, String>> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(definition_id) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.titles.clone());
                }
            }
        }

        let fields = self.store.list_fields_for_definition(definition_id).await?;
        let title = title_field(&fields);

        // One query for the whole type, never per-id
        let instances = self.store.list_instances(definition_id, None).await?;
        let titles: HashMap<Id, String> = instances
            .into_iter()
            .map(|instance| {
                let rendered = title
                    .and_then(|f| instance.attributes.get(&f.name))
                    .map(|v| v.render())
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| instance.id.clone());
                (instance.id, rendered)
            })
            .collect();

        self.cache.write().await.insert(
            definition_id.clone(),
            CachedTitles {
                titles: titles.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(titles)
    }
}
