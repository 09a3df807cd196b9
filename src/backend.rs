//! The contract between the entity layer and a storage engine.
//!
//! Every method takes and returns plain data (strings, numbers, booleans and
//! the structs of [`crate::construct`], [`crate::datatype`] and
//! [`crate::filter`]). Arguments are validated by the entity layer before a
//! backend sees them, so an implementation may assume well-formed input and
//! only reports `NotFound`, `AlreadyExists`/`ItemExists`, `IllegalState`,
//! `CommitConflict` or a wrapped engine failure.
//!
//! Methods with a default body are optional capabilities; the default reports
//! [`IxError::NotImplemented`].
//!
//! Sessions are opaque tokens owned by entity handles. A run checked out by
//! one session cannot be checked out by another until it is committed,
//! discarded or its lock is broken. Only the holder sees or changes the
//! working copy; a former holder whose lock was broken gets `CommitConflict`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::construct::{
    CommitInfo, Identifier, IdentifierKind, ItemData, ItemInfo, ItemKind, RunId, RunInfo,
};
use crate::datatype::{Element, GeoRow, Key, MetaTarget, MetaValue, SeriesKey, TsRow};
use crate::error::{IxError, Result};
use crate::filter::{Filters, TsFilters};

pub trait Backend: Send + Sync {
    // ------------- Connection -------------
    /// Opens the underlying storage; opening an open backend is a no-op.
    fn open_db(&self) -> Result<()>;
    /// Releases the underlying storage; closing twice is a no-op.
    fn close_db(&self) -> Result<()>;
    fn schema_version(&self) -> Result<i64> {
        Err(IxError::NotImplemented("schema_version"))
    }

    // ------------- Registries -------------
    /// Registers an identifier, returning `false` when it was already present.
    fn add_identifier(&self, identifier: &Identifier) -> Result<bool>;
    /// All identifiers of one kind in insertion order.
    fn list_identifiers(&self, kind: IdentifierKind) -> Result<Vec<Identifier>>;
    fn get_identifier(&self, kind: IdentifierKind, name: &str) -> Result<Identifier> {
        self.list_identifiers(kind)?
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| IxError::NotFound(format!("{} '{}'", kind, name)))
    }

    // ------------- Runs -------------
    /// Creates a run without a version, checked out by `session`.
    fn init_run(
        &self,
        model: &str,
        scenario: &str,
        scheme: &str,
        annotation: &str,
        session: &str,
    ) -> Result<RunId>;
    /// Looks up a committed run; `None` selects the default version.
    fn get_run(&self, model: &str, scenario: &str, version: Option<i64>) -> Result<RunInfo>;
    fn run_info(&self, run_id: RunId) -> Result<RunInfo>;
    fn list_runs(&self) -> Result<Vec<RunInfo>>;
    fn check_out(&self, run_id: RunId, session: &str, timeseries_only: bool) -> Result<()>;
    /// Atomically persists the working copy and releases the lock, returning the version.
    fn commit(&self, run_id: RunId, session: &str, comment: &str) -> Result<i64>;
    /// Drops the working copy. Returns `true` when the run stays checked out,
    /// which is the case for a run that was never committed.
    fn discard_changes(&self, run_id: RunId, session: &str) -> Result<bool>;
    /// Removes any lock on a run, returning whether one was held.
    fn break_lock(&self, run_id: RunId) -> Result<bool>;
    fn set_as_default(&self, run_id: RunId) -> Result<()>;
    fn delete_run(&self, run_id: RunId, session: &str) -> Result<()>;
    fn last_update(&self, run_id: RunId) -> Result<Option<DateTime<Utc>>>;
    fn run_log(&self, _run_id: RunId) -> Result<Vec<CommitInfo>> {
        Err(IxError::NotImplemented("run_log"))
    }

    // ------------- Items -------------
    // Reads by the session holding the lock see its working copy, every other
    // session sees the committed content. Writes are refused unless `session`
    // holds the lock.
    fn init_item(&self, run_id: RunId, session: &str, info: &ItemInfo) -> Result<()>;
    /// Item declarations in declaration order, optionally of one kind only.
    fn list_items(
        &self,
        run_id: RunId,
        session: &str,
        kind: Option<ItemKind>,
    ) -> Result<Vec<ItemInfo>>;
    fn item_info(&self, run_id: RunId, session: &str, name: &str) -> Result<ItemInfo>;
    fn item_get_elements(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        filters: &Filters,
    ) -> Result<ItemData>;
    /// Inserts elements, overwriting the values of existing keys.
    fn item_set_elements(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        elements: &[Element],
    ) -> Result<()>;
    fn item_delete_elements(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        keys: &[Key],
    ) -> Result<()>;
    fn delete_item(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
    ) -> Result<()>;
    /// Distinct labels at one key position without reading whole elements.
    fn item_index(
        &self,
        _run_id: RunId,
        _session: &str,
        _kind: ItemKind,
        _name: &str,
        _position: usize,
    ) -> Result<Vec<String>> {
        Err(IxError::NotImplemented("item_index"))
    }
    /// Removes all variable and equation elements; the items stay declared.
    fn clear_solution(&self, run_id: RunId, session: &str) -> Result<()>;
    fn has_solution(&self, run_id: RunId, session: &str) -> Result<bool>;

    // ------------- Time series -------------
    fn set_data(&self, run_id: RunId, session: &str, rows: &[TsRow]) -> Result<()>;
    fn get_data(&self, run_id: RunId, session: &str, filters: &TsFilters) -> Result<Vec<TsRow>>;
    /// Deletes the given years of one series; an empty `years` deletes the series.
    fn delete_data(
        &self,
        run_id: RunId,
        session: &str,
        key: &SeriesKey,
        years: &[i32],
    ) -> Result<()>;
    fn set_geo(&self, _run_id: RunId, _session: &str, _rows: &[GeoRow]) -> Result<()> {
        Err(IxError::NotImplemented("set_geo"))
    }
    fn get_geo(
        &self,
        _run_id: RunId,
        _session: &str,
        _filters: &TsFilters,
    ) -> Result<Vec<GeoRow>> {
        Err(IxError::NotImplemented("get_geo"))
    }
    /// Same contract as [`Backend::delete_data`].
    fn delete_geo(
        &self,
        _run_id: RunId,
        _session: &str,
        _key: &SeriesKey,
        _years: &[i32],
    ) -> Result<()> {
        Err(IxError::NotImplemented("delete_geo"))
    }

    // ------------- Meta -------------
    fn set_meta(&self, _target: &MetaTarget, _name: &str, _value: &MetaValue) -> Result<()> {
        Err(IxError::NotImplemented("set_meta"))
    }
    fn get_meta(&self, _target: &MetaTarget) -> Result<BTreeMap<String, MetaValue>> {
        Err(IxError::NotImplemented("get_meta"))
    }
    fn remove_meta(&self, _target: &MetaTarget, _names: &[String]) -> Result<()> {
        Err(IxError::NotImplemented("remove_meta"))
    }
}
