//! The process-level handle to one storage engine.
//!
//! A [`Platform`] is cheap to clone; clones share the engine. Entities
//! ([`crate::timeseries::TimeSeries`], [`crate::scenario::Scenario`]) are
//! built from a platform and only ever talk to it through [`Backend`].

use std::collections::{BTreeMap, BTreeSet};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

use crate::backend::Backend;
use crate::cache::CachingBackend;
use crate::config::{BackendKind, Settings};
use crate::construct::{Identifier, IdentifierKind, RunId, RunInfo};
use crate::datatype::{MetaTarget, MetaValue};
use crate::error::{IxError, Result};
use crate::filter::RunFilter;
use crate::memory::MemoryBackend;
use crate::persist::{PersistenceMode, SqliteBackend};
use crate::registry::{Identifiers, Region, Registered, Timeslice, Unit};

static SESSIONS: AtomicU64 = AtomicU64::new(1);

/// A token identifying the holder of a check-out, unique within the machine's live processes.
pub(crate) fn new_session() -> String {
    format!(
        "{}-{}",
        process::id(),
        SESSIONS.fetch_add(1, Ordering::Relaxed)
    )
}

#[derive(Clone)]
pub struct Platform {
    name: Arc<str>,
    backend: Arc<dyn Backend>,
}

impl Platform {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::named("default", backend)
    }
    pub fn named(name: &str, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }
    /// Builds the engine a named platform definition asks for.
    pub fn open(settings: &Settings, name: Option<&str>) -> Result<Self> {
        let name = name.unwrap_or(&settings.default_platform);
        let definition = settings.platform(Some(name))?;
        let engine: Arc<dyn Backend> = match definition.backend {
            BackendKind::Sqlite => {
                let mode = match &definition.path {
                    Some(path) => PersistenceMode::File(path.clone()),
                    None => PersistenceMode::InMemory,
                };
                Arc::new(SqliteBackend::with_busy_timeout(
                    mode,
                    Duration::from_millis(definition.busy_timeout_ms),
                )?)
            }
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        let backend: Arc<dyn Backend> = if definition.cache {
            Arc::new(CachingBackend::new(engine))
        } else {
            engine
        };
        info!(
            platform = name,
            backend = ?definition.backend,
            cache = definition.cache,
            "opened platform"
        );
        Ok(Self::named(name, backend))
    }
    /// A private SQLite database behind a cache, mostly for tests and scratch work.
    pub fn in_memory() -> Result<Self> {
        let engine = Arc::new(SqliteBackend::in_memory()?);
        Ok(Self::new(Arc::new(CachingBackend::new(engine))))
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
    /// Whether two handles share the same engine.
    pub fn same_as(&self, other: &Platform) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }

    // ------------- Connection -------------
    pub fn open_db(&self) -> Result<()> {
        self.backend.open_db()
    }
    pub fn close_db(&self) -> Result<()> {
        self.backend.close_db()?;
        info!(platform = %self.name, "closed platform");
        Ok(())
    }

    // ------------- Registries -------------
    /// Registers an entry; `false` when it was already present with the same attributes.
    pub fn add<T: Registered>(&self, entry: &T) -> Result<bool> {
        self.backend.add_identifier(&entry.to_identifier())
    }
    pub fn list<T: Registered>(&self) -> Result<Identifiers<T>> {
        let entries = self
            .backend
            .list_identifiers(T::KIND)?
            .iter()
            .map(T::from_identifier)
            .collect::<Result<Vec<_>>>()?;
        Ok(Identifiers::new(entries))
    }
    pub fn get<T: Registered>(&self, name: &str) -> Result<T> {
        T::from_identifier(&self.backend.get_identifier(T::KIND, name)?)
    }
    pub fn add_unit(&self, name: &str, comment: &str) -> Result<bool> {
        self.add(&Unit::new(name, comment))
    }
    pub fn units(&self) -> Result<Identifiers<Unit>> {
        self.list()
    }
    pub fn add_region(&self, name: &str, hierarchy: &str, parent: Option<&str>) -> Result<bool> {
        let region = Region::new(name, hierarchy);
        match parent {
            Some(parent) => self.add(&region.with_parent(parent)),
            None => self.add(&region),
        }
    }
    pub fn regions(&self) -> Result<Identifiers<Region>> {
        self.list()
    }
    pub fn add_timeslice(&self, name: &str, category: &str, duration: f64) -> Result<bool> {
        self.add(&Timeslice::new(name, category, duration))
    }
    pub fn timeslices(&self) -> Result<Identifiers<Timeslice>> {
        self.list()
    }
    pub fn models(&self) -> Result<Identifiers<String>> {
        self.names(IdentifierKind::Model)
    }
    pub fn scenarios(&self) -> Result<Identifiers<String>> {
        self.names(IdentifierKind::Scenario)
    }
    fn names(&self, kind: IdentifierKind) -> Result<Identifiers<String>> {
        Ok(Identifiers::new(
            self.backend
                .list_identifiers(kind)?
                .into_iter()
                .map(|i| i.name)
                .collect(),
        ))
    }

    /// Fails with `UnknownUnit` for any name not in the unit registry.
    pub(crate) fn check_units<'a>(&self, units: impl IntoIterator<Item = &'a str>) -> Result<()> {
        self.check(IdentifierKind::Unit, units, |u| IxError::UnknownUnit(u.to_string()))
    }
    pub(crate) fn check_regions<'a>(
        &self,
        regions: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        self.check(IdentifierKind::Region, regions, |r| {
            IxError::UnknownRegion(r.to_string())
        })
    }
    pub(crate) fn check_timeslices<'a>(
        &self,
        timeslices: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        self.check(IdentifierKind::Timeslice, timeslices, |t| {
            IxError::NotFound(format!("timeslice '{}'", t))
        })
    }
    fn check<'a>(
        &self,
        kind: IdentifierKind,
        names: impl IntoIterator<Item = &'a str>,
        missing: impl Fn(&str) -> IxError,
    ) -> Result<()> {
        let wanted: BTreeSet<&str> = names.into_iter().collect();
        if wanted.is_empty() {
            return Ok(());
        }
        let known: BTreeSet<String> = self
            .backend
            .list_identifiers(kind)?
            .into_iter()
            .map(|i| i.name)
            .collect();
        match wanted.into_iter().find(|w| !known.contains(*w)) {
            Some(unknown) => Err(missing(unknown)),
            None => Ok(()),
        }
    }
    /// Copies registry entries from another platform, keeping those already present.
    pub(crate) fn import_identifiers<'a>(
        &self,
        source: &Platform,
        kind: IdentifierKind,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let wanted: BTreeSet<&str> = names.into_iter().collect();
        let identifiers: Vec<Identifier> = source
            .backend
            .list_identifiers(kind)?
            .into_iter()
            .filter(|i| wanted.contains(i.name.as_str()))
            .collect();
        for identifier in &identifiers {
            self.backend.add_identifier(identifier)?;
        }
        Ok(())
    }

    // ------------- Runs -------------
    /// Committed runs matching the filter, ordered by model, scenario and version.
    pub fn scenario_list(&self, filter: &RunFilter) -> Result<Vec<RunInfo>> {
        filter.apply(self.backend.list_runs()?)
    }
    /// Releases whatever check-out a run is under; the former holder cannot commit.
    pub fn break_lock(&self, run_id: RunId) -> Result<bool> {
        let broken = self.backend.break_lock(run_id)?;
        if broken {
            info!(run_id, "broke lock");
        }
        Ok(broken)
    }

    // ------------- Meta -------------
    pub fn set_meta(
        &self,
        target: &MetaTarget,
        name: &str,
        value: impl Into<MetaValue>,
    ) -> Result<()> {
        let value = value.into();
        value.validate()?;
        if name.is_empty() {
            return Err(IxError::TypeError("meta names cannot be empty".to_string()));
        }
        self.backend.set_meta(target, name, &value)
    }
    pub fn get_meta(&self, target: &MetaTarget) -> Result<BTreeMap<String, MetaValue>> {
        self.backend.get_meta(target)
    }
    pub fn remove_meta(&self, target: &MetaTarget, names: &[&str]) -> Result<()> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        self.backend.remove_meta(target, &names)
    }
}
