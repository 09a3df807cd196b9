//! A [`Backend`] decorator memoizing full item reads.
//!
//! Entries are keyed by (run id, session, item kind, item name) and always hold
//! the unfiltered element collection. The session is part of the key because
//! the lock holder reads its working copy while everyone else reads the
//! committed content. Filtered reads are answered from the cached
//! copy and handed out as fresh values, so a caller mutating a result never
//! touches the cache. Every mutation path invalidates before it reports
//! success; an invalidation that fails makes the mutation fail as well.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
// used for hashing cache keys
use seahash::SeaHasher;
use tracing::debug;

use crate::backend::Backend;
use crate::construct::{
    CommitInfo, Identifier, IdentifierKind, ItemData, ItemInfo, ItemKind, RunId, RunInfo,
};
use crate::datatype::{Element, GeoRow, Key, MetaTarget, MetaValue, SeriesKey, TsRow};
use crate::error::Result;
use crate::filter::{Filters, TsFilters};

pub type CacheHasher = BuildHasherDefault<SeaHasher>;

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
struct CacheKey {
    run_id: RunId,
    session: String,
    kind: ItemKind,
    name: String,
}

impl CacheKey {
    fn new(run_id: RunId, session: &str, kind: ItemKind, name: &str) -> Self {
        Self {
            run_id,
            session: session.to_string(),
            kind,
            name: name.to_string(),
        }
    }
    fn names(&self, run_id: RunId, kind: ItemKind, name: &str) -> bool {
        self.run_id == run_id && self.kind == kind && self.name == name
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct CachingBackend {
    inner: Arc<dyn Backend>,
    cache: Mutex<HashMap<CacheKey, Arc<ItemData>, CacheHasher>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachingBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
    pub fn inner(&self) -> &Arc<dyn Backend> {
        &self.inner
    }
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
    /// Number of items currently held.
    pub fn cache_len(&self) -> Result<usize> {
        Ok(self.cache.lock()?.len())
    }
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.lock()?.clear();
        Ok(())
    }

    fn cached(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
    ) -> Result<Arc<ItemData>> {
        let key = CacheKey::new(run_id, session, kind, name);
        if let Some(data) = self.cache.lock()?.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(run_id, item = name, "cache hit");
            return Ok(Arc::clone(data));
        }
        // fetched outside the lock, the inner backend may take its time
        let data = Arc::new(
            self.inner
                .item_get_elements(run_id, session, kind, name, &Filters::new())?,
        );
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(run_id, item = name, elements = data.len(), "cache miss");
        self.cache.lock()?.insert(key, Arc::clone(&data));
        Ok(data)
    }
    /// Drops the item for every session reading it.
    fn invalidate(&self, run_id: RunId, kind: ItemKind, name: &str) -> Result<()> {
        let mut cache = self.cache.lock()?;
        let before = cache.len();
        cache.retain(|key, _| !key.names(run_id, kind, name));
        if cache.len() < before {
            debug!(run_id, item = name, "cache invalidated");
        }
        Ok(())
    }
    fn invalidate_run(&self, run_id: RunId) -> Result<()> {
        let mut cache = self.cache.lock()?;
        let before = cache.len();
        cache.retain(|key, _| key.run_id != run_id);
        let dropped = before - cache.len();
        if dropped > 0 {
            debug!(run_id, dropped, "cache invalidated for run");
        }
        Ok(())
    }
    /// Runs a mutation, then invalidates whatever it may have touched.
    fn mutate<T>(&self, mutation: Result<T>, invalidation: Result<()>) -> Result<T> {
        invalidation?;
        mutation
    }
}

impl Backend for CachingBackend {
    // ------------- Connection -------------
    fn open_db(&self) -> Result<()> {
        self.inner.open_db()
    }
    fn close_db(&self) -> Result<()> {
        self.clear_cache()?;
        self.inner.close_db()
    }
    fn schema_version(&self) -> Result<i64> {
        self.inner.schema_version()
    }

    // ------------- Registries -------------
    fn add_identifier(&self, identifier: &Identifier) -> Result<bool> {
        self.inner.add_identifier(identifier)
    }
    fn list_identifiers(&self, kind: IdentifierKind) -> Result<Vec<Identifier>> {
        self.inner.list_identifiers(kind)
    }
    fn get_identifier(&self, kind: IdentifierKind, name: &str) -> Result<Identifier> {
        self.inner.get_identifier(kind, name)
    }

    // ------------- Runs -------------
    fn init_run(
        &self,
        model: &str,
        scenario: &str,
        scheme: &str,
        annotation: &str,
        session: &str,
    ) -> Result<RunId> {
        self.inner
            .init_run(model, scenario, scheme, annotation, session)
    }
    fn get_run(&self, model: &str, scenario: &str, version: Option<i64>) -> Result<RunInfo> {
        self.inner.get_run(model, scenario, version)
    }
    fn run_info(&self, run_id: RunId) -> Result<RunInfo> {
        self.inner.run_info(run_id)
    }
    fn list_runs(&self) -> Result<Vec<RunInfo>> {
        self.inner.list_runs()
    }
    fn check_out(&self, run_id: RunId, session: &str, timeseries_only: bool) -> Result<()> {
        let result = self.inner.check_out(run_id, session, timeseries_only);
        self.mutate(result, self.invalidate_run(run_id))
    }
    fn commit(&self, run_id: RunId, session: &str, comment: &str) -> Result<i64> {
        let result = self.inner.commit(run_id, session, comment);
        self.mutate(result, self.invalidate_run(run_id))
    }
    fn discard_changes(&self, run_id: RunId, session: &str) -> Result<bool> {
        let result = self.inner.discard_changes(run_id, session);
        self.mutate(result, self.invalidate_run(run_id))
    }
    fn break_lock(&self, run_id: RunId) -> Result<bool> {
        let result = self.inner.break_lock(run_id);
        self.mutate(result, self.invalidate_run(run_id))
    }
    fn set_as_default(&self, run_id: RunId) -> Result<()> {
        self.inner.set_as_default(run_id)
    }
    fn delete_run(&self, run_id: RunId, session: &str) -> Result<()> {
        let result = self.inner.delete_run(run_id, session);
        self.mutate(result, self.invalidate_run(run_id))
    }
    fn last_update(&self, run_id: RunId) -> Result<Option<DateTime<Utc>>> {
        self.inner.last_update(run_id)
    }
    fn run_log(&self, run_id: RunId) -> Result<Vec<CommitInfo>> {
        self.inner.run_log(run_id)
    }

    // ------------- Items -------------
    fn init_item(&self, run_id: RunId, session: &str, info: &ItemInfo) -> Result<()> {
        let result = self.inner.init_item(run_id, session, info);
        self.mutate(result, self.invalidate(run_id, info.kind, &info.name))
    }
    fn list_items(
        &self,
        run_id: RunId,
        session: &str,
        kind: Option<ItemKind>,
    ) -> Result<Vec<ItemInfo>> {
        self.inner.list_items(run_id, session, kind)
    }
    fn item_info(&self, run_id: RunId, session: &str, name: &str) -> Result<ItemInfo> {
        self.inner.item_info(run_id, session, name)
    }
    fn item_get_elements(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        filters: &Filters,
    ) -> Result<ItemData> {
        Ok(self.cached(run_id, session, kind, name)?.filtered(filters))
    }
    fn item_set_elements(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        elements: &[Element],
    ) -> Result<()> {
        let result = self
            .inner
            .item_set_elements(run_id, session, kind, name, elements);
        self.mutate(result, self.invalidate(run_id, kind, name))
    }
    fn item_delete_elements(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        keys: &[Key],
    ) -> Result<()> {
        let result = self
            .inner
            .item_delete_elements(run_id, session, kind, name, keys);
        self.mutate(result, self.invalidate(run_id, kind, name))
    }
    fn delete_item(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
    ) -> Result<()> {
        let result = self.inner.delete_item(run_id, session, kind, name);
        self.mutate(result, self.invalidate(run_id, kind, name))
    }
    fn item_index(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        position: usize,
    ) -> Result<Vec<String>> {
        let key = CacheKey::new(run_id, session, kind, name);
        if let Some(data) = self.cache.lock()?.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(data.index(position));
        }
        match self.inner.item_index(run_id, session, kind, name, position) {
            Err(e) if e.is_not_implemented() => {
                Ok(self.cached(run_id, session, kind, name)?.index(position))
            }
            other => other,
        }
    }
    fn clear_solution(&self, run_id: RunId, session: &str) -> Result<()> {
        let result = self.inner.clear_solution(run_id, session);
        self.mutate(result, self.invalidate_run(run_id))
    }
    fn has_solution(&self, run_id: RunId, session: &str) -> Result<bool> {
        self.inner.has_solution(run_id, session)
    }

    // ------------- Time series -------------
    fn set_data(&self, run_id: RunId, session: &str, rows: &[TsRow]) -> Result<()> {
        self.inner.set_data(run_id, session, rows)
    }
    fn get_data(&self, run_id: RunId, session: &str, filters: &TsFilters) -> Result<Vec<TsRow>> {
        self.inner.get_data(run_id, session, filters)
    }
    fn delete_data(
        &self,
        run_id: RunId,
        session: &str,
        key: &SeriesKey,
        years: &[i32],
    ) -> Result<()> {
        self.inner.delete_data(run_id, session, key, years)
    }
    fn set_geo(&self, run_id: RunId, session: &str, rows: &[GeoRow]) -> Result<()> {
        self.inner.set_geo(run_id, session, rows)
    }
    fn get_geo(&self, run_id: RunId, session: &str, filters: &TsFilters) -> Result<Vec<GeoRow>> {
        self.inner.get_geo(run_id, session, filters)
    }
    fn delete_geo(
        &self,
        run_id: RunId,
        session: &str,
        key: &SeriesKey,
        years: &[i32],
    ) -> Result<()> {
        self.inner.delete_geo(run_id, session, key, years)
    }

    // ------------- Meta -------------
    fn set_meta(&self, target: &MetaTarget, name: &str, value: &MetaValue) -> Result<()> {
        self.inner.set_meta(target, name, value)
    }
    fn get_meta(&self, target: &MetaTarget) -> Result<BTreeMap<String, MetaValue>> {
        self.inner.get_meta(target)
    }
    fn remove_meta(&self, target: &MetaTarget, names: &[String]) -> Result<()> {
        self.inner.remove_meta(target, names)
    }
}
