//! A non-relational engine keeping everything in process memory.
//!
//! Runs hold a committed copy of their content and, while checked out, a
//! working copy that replaces it on commit. The optional capabilities
//! (geodata, meta, item index, commit log) are left to the trait defaults.
//! Closing the database keeps the content; operations are refused until it is
//! opened again.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

// used to keep the one-to-one mapping between run ids and (model, scenario, version)
use bimap::BiMap;
use chrono::{DateTime, Utc};

use crate::backend::Backend;
use crate::construct::{Identifier, IdentifierKind, ItemData, ItemInfo, ItemKind, RunId, RunInfo};
use crate::datatype::{Element, Key, Observation, SeriesKey, TsRow};
use crate::error::{IxError, Result};
use crate::filter::{Filters, TsFilters};

type Triple = (String, String, i64);

#[derive(Debug, Clone, Default)]
struct Content {
    items: Vec<ItemData>,
    timeseries: BTreeMap<(SeriesKey, i32), (f64, bool)>,
}

impl Content {
    fn item(&self, kind: ItemKind, name: &str) -> Result<&ItemData> {
        self.items
            .iter()
            .find(|i| i.info.name == name && i.info.kind == kind)
            .ok_or_else(|| IxError::NotFound(format!("{} '{}'", kind, name)))
    }
    fn item_mut(&mut self, kind: ItemKind, name: &str) -> Result<&mut ItemData> {
        self.items
            .iter_mut()
            .find(|i| i.info.name == name && i.info.kind == kind)
            .ok_or_else(|| IxError::NotFound(format!("{} '{}'", kind, name)))
    }
}

#[derive(Debug)]
struct RunLock {
    session: String,
    timeseries_only: bool,
}

#[derive(Debug)]
struct Run {
    model: String,
    scenario: String,
    scheme: String,
    annotation: String,
    committed: Content,
    working: Option<Content>,
    lock: Option<RunLock>,
    last_update: Option<DateTime<Utc>>,
}

impl Run {
    /// Content `session` reads items (`timeseries == false`) or time series from.
    fn view(&self, session: &str, timeseries: bool) -> &Content {
        match (&self.lock, &self.working) {
            (Some(lock), Some(working))
                if lock.session == session && (timeseries || !lock.timeseries_only) =>
            {
                working
            }
            _ => &self.committed,
        }
    }
    fn view_mut(
        &mut self,
        run_id: RunId,
        session: &str,
        timeseries: bool,
    ) -> Result<&mut Content> {
        match &self.lock {
            Some(lock) if lock.session != session => Err(IxError::CommitConflict {
                run_id,
                message: "checked out by another session".to_string(),
            }),
            Some(lock) if timeseries || !lock.timeseries_only => {
                Ok(self.working.get_or_insert_with(Content::default))
            }
            Some(_) => Err(IxError::IllegalState(format!(
                "run {} is checked out for time series only",
                run_id
            ))),
            None => Err(IxError::IllegalState(format!(
                "run {} is not checked out",
                run_id
            ))),
        }
    }
    fn holder(&self) -> Option<&str> {
        self.lock.as_ref().map(|l| l.session.as_str())
    }
}

#[derive(Debug)]
struct Store {
    open: bool,
    registries: BTreeMap<IdentifierKind, Vec<Identifier>>,
    runs: BTreeMap<RunId, Run>,
    identities: BiMap<RunId, Triple>,
    defaults: HashMap<(String, String), RunId>,
    last_run: RunId,
}

impl Store {
    fn new() -> Self {
        let mut registries = BTreeMap::new();
        registries.insert(
            IdentifierKind::Unit,
            vec![Identifier::new(IdentifierKind::Unit, "-").with("comment", "dimensionless")],
        );
        registries.insert(
            IdentifierKind::Region,
            vec![Identifier::new(IdentifierKind::Region, "World").with("hierarchy", "common")],
        );
        registries.insert(
            IdentifierKind::Timeslice,
            vec![
                Identifier::new(IdentifierKind::Timeslice, "Year")
                    .with("category", "Common")
                    .with("duration", "1"),
            ],
        );
        Self {
            open: true,
            registries,
            runs: BTreeMap::new(),
            identities: BiMap::new(),
            defaults: HashMap::new(),
            last_run: 0,
        }
    }
    fn run(&self, run_id: RunId) -> Result<&Run> {
        self.runs
            .get(&run_id)
            .ok_or_else(|| IxError::NotFound(format!("run {}", run_id)))
    }
    fn run_mut(&mut self, run_id: RunId) -> Result<&mut Run> {
        self.runs
            .get_mut(&run_id)
            .ok_or_else(|| IxError::NotFound(format!("run {}", run_id)))
    }
    fn version(&self, run_id: RunId) -> Option<i64> {
        self.identities.get_by_left(&run_id).map(|(_, _, v)| *v)
    }
    fn info(&self, run_id: RunId) -> Result<RunInfo> {
        let run = self.run(run_id)?;
        let pair = (run.model.clone(), run.scenario.clone());
        Ok(RunInfo {
            run_id,
            model: run.model.clone(),
            scenario: run.scenario.clone(),
            version: self.version(run_id),
            scheme: run.scheme.clone(),
            annotation: run.annotation.clone(),
            is_default: self.defaults.get(&pair) == Some(&run_id),
            is_locked: run.lock.is_some(),
        })
    }
    fn register(&mut self, identifier: Identifier) {
        let registry = self.registries.entry(identifier.kind).or_default();
        if !registry.iter().any(|i| i.name == identifier.name) {
            registry.push(identifier);
        }
    }
}

pub struct MemoryBackend {
    store: Mutex<Store>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::new()),
        }
    }
    fn with_store<T>(&self, f: impl FnOnce(&mut Store) -> Result<T>) -> Result<T> {
        let mut store = self.store.lock()?;
        if !store.open {
            return Err(IxError::IllegalState("database is closed".to_string()));
        }
        f(&mut store)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn open_db(&self) -> Result<()> {
        self.store.lock()?.open = true;
        Ok(())
    }
    fn close_db(&self) -> Result<()> {
        self.store.lock()?.open = false;
        Ok(())
    }

    fn add_identifier(&self, identifier: &Identifier) -> Result<bool> {
        self.with_store(|store| {
            let registry = store.registries.entry(identifier.kind).or_default();
            match registry.iter().find(|i| i.name == identifier.name) {
                Some(existing) => {
                    if identifier.kind.has_identity_attributes()
                        && existing.attributes != identifier.attributes
                    {
                        return Err(IxError::AlreadyExists(format!(
                            "{} '{}' with attributes {:?}",
                            identifier.kind, identifier.name, existing.attributes
                        )));
                    }
                    Ok(false)
                }
                None => {
                    registry.push(identifier.clone());
                    Ok(true)
                }
            }
        })
    }
    fn list_identifiers(&self, kind: IdentifierKind) -> Result<Vec<Identifier>> {
        self.with_store(|store| Ok(store.registries.get(&kind).cloned().unwrap_or_default()))
    }

    fn init_run(
        &self,
        model: &str,
        scenario: &str,
        scheme: &str,
        annotation: &str,
        session: &str,
    ) -> Result<RunId> {
        self.with_store(|store| {
            store.register(Identifier::new(IdentifierKind::Model, model));
            store.register(Identifier::new(IdentifierKind::Scenario, scenario));
            store.last_run += 1;
            let run_id = store.last_run;
            store.runs.insert(
                run_id,
                Run {
                    model: model.to_string(),
                    scenario: scenario.to_string(),
                    scheme: scheme.to_string(),
                    annotation: annotation.to_string(),
                    committed: Content::default(),
                    working: Some(Content::default()),
                    lock: Some(RunLock {
                        session: session.to_string(),
                        timeseries_only: false,
                    }),
                    last_update: None,
                },
            );
            Ok(run_id)
        })
    }
    fn get_run(&self, model: &str, scenario: &str, version: Option<i64>) -> Result<RunInfo> {
        self.with_store(|store| {
            let found = match version {
                Some(version) => store
                    .identities
                    .get_by_right(&(model.to_string(), scenario.to_string(), version))
                    .copied(),
                None => store
                    .defaults
                    .get(&(model.to_string(), scenario.to_string()))
                    .copied(),
            };
            match found {
                Some(run_id) => store.info(run_id),
                None => Err(IxError::NotFound(match version {
                    Some(v) => format!("{}/{} version {}", model, scenario, v),
                    None => format!("default version of {}/{}", model, scenario),
                })),
            }
        })
    }
    fn run_info(&self, run_id: RunId) -> Result<RunInfo> {
        self.with_store(|store| store.info(run_id))
    }
    fn list_runs(&self) -> Result<Vec<RunInfo>> {
        self.with_store(|store| store.runs.keys().map(|id| store.info(*id)).collect())
    }
    fn check_out(&self, run_id: RunId, session: &str, timeseries_only: bool) -> Result<()> {
        self.with_store(|store| {
            let run = store.run_mut(run_id)?;
            if let Some(holder) = run.holder() {
                let by = if holder == session { "this" } else { "another" };
                return Err(IxError::IllegalState(format!(
                    "run {} is already checked out by {} session",
                    run_id, by
                )));
            }
            run.lock = Some(RunLock {
                session: session.to_string(),
                timeseries_only,
            });
            run.working = Some(run.committed.clone());
            Ok(())
        })
    }
    fn commit(&self, run_id: RunId, session: &str, _comment: &str) -> Result<i64> {
        self.with_store(|store| {
            let version = store.version(run_id);
            let run = store.run_mut(run_id)?;
            let timeseries_only = match &run.lock {
                Some(lock) if lock.session == session => lock.timeseries_only,
                Some(_) => {
                    return Err(IxError::CommitConflict {
                        run_id,
                        message: "checked out by another session".to_string(),
                    });
                }
                None => {
                    return Err(IxError::CommitConflict {
                        run_id,
                        message: "the check-out was released".to_string(),
                    });
                }
            };
            let working = run.working.take().unwrap_or_default();
            if timeseries_only {
                run.committed.timeseries = working.timeseries;
            } else {
                run.committed = working;
            }
            run.lock = None;
            run.last_update = Some(Utc::now());
            let (model, scenario) = (run.model.clone(), run.scenario.clone());
            let version = match version {
                Some(version) => version,
                None => {
                    let latest = store
                        .identities
                        .right_values()
                        .filter(|(m, s, _)| *m == model && *s == scenario)
                        .map(|(_, _, v)| *v)
                        .max()
                        .unwrap_or(0);
                    store
                        .identities
                        .insert(run_id, (model, scenario, latest + 1));
                    latest + 1
                }
            };
            Ok(version)
        })
    }
    fn discard_changes(&self, run_id: RunId, session: &str) -> Result<bool> {
        self.with_store(|store| {
            let never_committed = store.version(run_id).is_none();
            let run = store.run_mut(run_id)?;
            match run.holder() {
                Some(holder) if holder == session => {}
                Some(_) => {
                    return Err(IxError::CommitConflict {
                        run_id,
                        message: "checked out by another session".to_string(),
                    });
                }
                None => {
                    return Err(IxError::CommitConflict {
                        run_id,
                        message: "the check-out was released".to_string(),
                    });
                }
            }
            if never_committed {
                run.working = Some(Content::default());
            } else {
                run.working = None;
                run.lock = None;
            }
            Ok(never_committed)
        })
    }
    fn break_lock(&self, run_id: RunId) -> Result<bool> {
        self.with_store(|store| {
            let run = store.run_mut(run_id)?;
            run.working = None;
            Ok(run.lock.take().is_some())
        })
    }
    fn set_as_default(&self, run_id: RunId) -> Result<()> {
        self.with_store(|store| {
            if store.version(run_id).is_none() {
                return Err(IxError::IllegalState(format!(
                    "run {} has never been committed",
                    run_id
                )));
            }
            let run = store.run(run_id)?;
            let pair = (run.model.clone(), run.scenario.clone());
            store.defaults.insert(pair, run_id);
            Ok(())
        })
    }
    fn delete_run(&self, run_id: RunId, session: &str) -> Result<()> {
        self.with_store(|store| {
            let run = store.run(run_id)?;
            if let Some(holder) = run.holder() {
                if holder != session {
                    return Err(IxError::IllegalState(format!(
                        "run {} is checked out by another session",
                        run_id
                    )));
                }
            }
            let pair = (run.model.clone(), run.scenario.clone());
            if store.defaults.get(&pair) == Some(&run_id) {
                store.defaults.remove(&pair);
            }
            store.identities.remove_by_left(&run_id);
            store.runs.remove(&run_id);
            Ok(())
        })
    }
    fn last_update(&self, run_id: RunId) -> Result<Option<DateTime<Utc>>> {
        self.with_store(|store| Ok(store.run(run_id)?.last_update))
    }

    fn init_item(&self, run_id: RunId, session: &str, info: &ItemInfo) -> Result<()> {
        self.with_store(|store| {
            let content = store.run_mut(run_id)?.view_mut(run_id, session, false)?;
            if let Some(existing) = content.items.iter().find(|i| i.info.name == info.name) {
                return Err(IxError::ItemExists {
                    name: info.name.clone(),
                    kind: existing.info.kind,
                });
            }
            content.items.push(ItemData::new(info.clone()));
            Ok(())
        })
    }
    fn list_items(
        &self,
        run_id: RunId,
        session: &str,
        kind: Option<ItemKind>,
    ) -> Result<Vec<ItemInfo>> {
        self.with_store(|store| {
            Ok(store
                .run(run_id)?
                .view(session, false)
                .items
                .iter()
                .filter(|i| kind.map(|k| k == i.info.kind).unwrap_or(true))
                .map(|i| i.info.clone())
                .collect())
        })
    }
    fn item_info(&self, run_id: RunId, session: &str, name: &str) -> Result<ItemInfo> {
        self.with_store(|store| {
            store
                .run(run_id)?
                .view(session, false)
                .items
                .iter()
                .find(|i| i.info.name == name)
                .map(|i| i.info.clone())
                .ok_or_else(|| IxError::NotFound(format!("item '{}'", name)))
        })
    }
    fn item_get_elements(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        filters: &Filters,
    ) -> Result<ItemData> {
        self.with_store(|store| {
            Ok(store
                .run(run_id)?
                .view(session, false)
                .item(kind, name)?
                .filtered(filters))
        })
    }
    fn item_set_elements(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        elements: &[Element],
    ) -> Result<()> {
        self.with_store(|store| {
            let item = store
                .run_mut(run_id)?
                .view_mut(run_id, session, false)?
                .item_mut(kind, name)?;
            let mut positions: HashMap<Key, usize> = item
                .elements
                .iter()
                .enumerate()
                .map(|(position, e)| (e.key.clone(), position))
                .collect();
            for element in elements {
                match positions.get(&element.key).copied() {
                    Some(position) => item.elements[position].value = element.value.clone(),
                    None => {
                        positions.insert(element.key.clone(), item.elements.len());
                        item.elements.push(element.clone());
                    }
                }
            }
            Ok(())
        })
    }
    fn item_delete_elements(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        keys: &[Key],
    ) -> Result<()> {
        self.with_store(|store| {
            let item = store
                .run_mut(run_id)?
                .view_mut(run_id, session, false)?
                .item_mut(kind, name)?;
            let doomed: HashSet<&Key> = keys.iter().collect();
            item.elements.retain(|e| !doomed.contains(&e.key));
            Ok(())
        })
    }
    fn delete_item(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
    ) -> Result<()> {
        self.with_store(|store| {
            let content = store.run_mut(run_id)?.view_mut(run_id, session, false)?;
            content.item(kind, name)?;
            content
                .items
                .retain(|i| !(i.info.name == name && i.info.kind == kind));
            Ok(())
        })
    }
    fn clear_solution(&self, run_id: RunId, session: &str) -> Result<()> {
        self.with_store(|store| {
            let content = store.run_mut(run_id)?.view_mut(run_id, session, false)?;
            for item in content.items.iter_mut().filter(|i| i.info.kind.is_solution()) {
                item.elements.clear();
            }
            Ok(())
        })
    }
    fn has_solution(&self, run_id: RunId, session: &str) -> Result<bool> {
        self.with_store(|store| {
            Ok(store
                .run(run_id)?
                .view(session, false)
                .items
                .iter()
                .any(|i| i.info.kind.is_solution() && !i.is_empty()))
        })
    }

    fn set_data(&self, run_id: RunId, session: &str, rows: &[TsRow]) -> Result<()> {
        self.with_store(|store| {
            let content = store.run_mut(run_id)?.view_mut(run_id, session, true)?;
            for row in rows {
                content
                    .timeseries
                    .insert((row.key.clone(), row.year), (row.value, row.meta));
            }
            Ok(())
        })
    }
    fn get_data(&self, run_id: RunId, session: &str, filters: &TsFilters) -> Result<Vec<TsRow>> {
        let matcher = filters.matcher()?;
        self.with_store(|store| {
            Ok(store
                .run(run_id)?
                .view(session, true)
                .timeseries
                .iter()
                .map(|((key, year), (value, meta))| Observation {
                    key: key.clone(),
                    year: *year,
                    value: *value,
                    meta: *meta,
                })
                .filter(|row| matcher.matches(row))
                .collect())
        })
    }
    fn delete_data(
        &self,
        run_id: RunId,
        session: &str,
        key: &SeriesKey,
        years: &[i32],
    ) -> Result<()> {
        self.with_store(|store| {
            let content = store.run_mut(run_id)?.view_mut(run_id, session, true)?;
            if years.is_empty() {
                content.timeseries.retain(|(k, _), _| k != key);
            } else {
                for year in years {
                    content.timeseries.remove(&(key.clone(), *year));
                }
            }
            Ok(())
        })
    }
}
