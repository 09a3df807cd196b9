// used for persistence
use rusqlite::types::{FromSql, ToSql};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::DEFAULT_BUSY_TIMEOUT_MS;
use crate::construct::{
    CommitInfo, Identifier, IdentifierKind, ItemData, ItemInfo, ItemKind, RunId, RunInfo,
};
use crate::datatype::{
    Element, ElementValue, GeoRow, Key, MetaTarget, MetaValue, Observation, SeriesKey, TsRow,
};
use crate::error::{IxError, Result};
use crate::filter::{Filters, TsFilters};
use crate::schema::{self, COMMITTED, WORKING};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    /// A private database that lives as long as the connection.
    InMemory,
    File(PathBuf),
}

// ------------- Persistence -------------
/// Backend storing everything in one SQLite database.
///
/// The connection is guarded by a mutex so a single backend may be shared
/// between threads; separate backends on the same file coordinate through
/// SQLite's own locking and the `RunLock` table.
pub struct SqliteBackend {
    mode: PersistenceMode,
    busy_timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl SqliteBackend {
    pub fn new(mode: PersistenceMode) -> Result<Self> {
        Self::with_busy_timeout(mode, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
    }
    pub fn in_memory() -> Result<Self> {
        Self::new(PersistenceMode::InMemory)
    }
    pub fn with_busy_timeout(mode: PersistenceMode, busy_timeout: Duration) -> Result<Self> {
        let backend = Self {
            mode,
            busy_timeout,
            connection: Mutex::new(None),
        };
        backend.open_db()?;
        Ok(backend)
    }
    pub fn mode(&self) -> &PersistenceMode {
        &self.mode
    }
    fn connect(&self) -> Result<Connection> {
        let mut connection = match &self.mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        connection.busy_timeout(self.busy_timeout)?;
        let found = schema::migrate(&mut connection)?;
        debug!(mode = ?self.mode, found, "opened sqlite database");
        Ok(connection)
    }
    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.connection.lock()?;
        let connection = guard
            .as_mut()
            .ok_or_else(|| IxError::IllegalState("database is closed".to_string()))?;
        f(connection)
    }
}

// ------------- Helpers -------------
fn registry_table(kind: IdentifierKind) -> &'static str {
    match kind {
        IdentifierKind::Model => "Model",
        IdentifierKind::Scenario => "Scenario",
        IdentifierKind::Unit => "Unit",
        IdentifierKind::Region => "Region",
        IdentifierKind::Timeslice => "Timeslice",
    }
}

const RUN_COLUMNS: &str = "
    select r.Run_Identity,
            r.Model,
            r.Scenario,
            r.Version,
            r.Scheme,
            r.Annotation,
            exists(select 1 from DefaultRun d where d.Run_Identity = r.Run_Identity),
            exists(select 1 from RunLock l where l.Run_Identity = r.Run_Identity)
        from Run r
";

fn read_run(row: &Row) -> rusqlite::Result<RunInfo> {
    Ok(RunInfo {
        run_id: row.get(0)?,
        model: row.get(1)?,
        scenario: row.get(2)?,
        version: row.get(3)?,
        scheme: row.get(4)?,
        annotation: row.get(5)?,
        is_default: row.get(6)?,
        is_locked: row.get(7)?,
    })
}

fn run_info(connection: &Connection, run_id: RunId) -> Result<RunInfo> {
    connection
        .query_row(
            &format!("{} where r.Run_Identity = ?", RUN_COLUMNS),
            params![run_id],
            read_run,
        )
        .optional()?
        .ok_or_else(|| IxError::NotFound(format!("run {}", run_id)))
}

/// Session holding the lock on a run and whether it is time series only.
fn lock_of(connection: &Connection, run_id: RunId) -> Result<Option<(String, bool)>> {
    Ok(connection
        .query_row(
            "select Session, TimeseriesOnly from RunLock where Run_Identity = ?",
            params![run_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?)
}

/// Workspace `session` reads items (`timeseries == false`) or time series from.
fn read_workspace(
    connection: &Connection,
    run_id: RunId,
    session: &str,
    timeseries: bool,
) -> Result<i64> {
    Ok(match lock_of(connection, run_id)? {
        Some((holder, timeseries_only))
            if holder == session && (timeseries || !timeseries_only) =>
        {
            WORKING
        }
        _ => COMMITTED,
    })
}

fn write_workspace(
    connection: &Connection,
    run_id: RunId,
    session: &str,
    timeseries: bool,
) -> Result<i64> {
    match lock_of(connection, run_id)? {
        Some((holder, _)) if holder != session => Err(IxError::CommitConflict {
            run_id,
            message: "checked out by another session".to_string(),
        }),
        Some((_, timeseries_only)) if timeseries || !timeseries_only => Ok(WORKING),
        Some(_) => Err(IxError::IllegalState(format!(
            "run {} is checked out for time series only",
            run_id
        ))),
        None => {
            run_info(connection, run_id)?;
            Err(IxError::IllegalState(format!(
                "run {} is not checked out",
                run_id
            )))
        }
    }
}

fn read_item(row: &Row) -> Result<(i64, ItemInfo)> {
    let item_id: i64 = row.get(0)?;
    let kind: String = row.get(2)?;
    let idx_sets: String = row.get(3)?;
    let idx_names: String = row.get(4)?;
    Ok((
        item_id,
        ItemInfo {
            name: row.get(1)?,
            kind: kind.parse()?,
            idx_sets: serde_json::from_str(&idx_sets)?,
            idx_names: serde_json::from_str(&idx_names)?,
        },
    ))
}

fn find_item(
    connection: &Connection,
    run_id: RunId,
    workspace: i64,
    name: &str,
) -> Result<Option<(i64, ItemInfo)>> {
    let mut statement = connection.prepare_cached(
        "
        select Item_Identity, Item, Kind, IndexSets, IndexNames
            from Item
            where Run_Identity = ?
            and Workspace = ?
            and Item = ?
        ",
    )?;
    let mut rows = statement.query(params![run_id, workspace, name])?;
    match rows.next()? {
        Some(row) => Ok(Some(read_item(row)?)),
        None => Ok(None),
    }
}

fn item_of_kind(
    connection: &Connection,
    run_id: RunId,
    workspace: i64,
    kind: ItemKind,
    name: &str,
) -> Result<(i64, ItemInfo)> {
    match find_item(connection, run_id, workspace, name)? {
        Some((item_id, info)) if info.kind == kind => Ok((item_id, info)),
        _ => Err(IxError::NotFound(format!("{} '{}'", kind, name))),
    }
}

fn decode_element(kind: ItemKind, row: &Row) -> Result<Element> {
    let key: String = row.get(0)?;
    let key = Key::from_json(&key)?;
    let value = match kind {
        ItemKind::Set => ElementValue::Member,
        ItemKind::Parameter => {
            let value: Option<f64> = row.get(1)?;
            let unit: Option<String> = row.get(2)?;
            match (value, unit) {
                (Some(value), Some(unit)) => ElementValue::Parameter { value, unit },
                _ => {
                    return Err(IxError::DataCorruption {
                        message: format!("parameter element {} has no value or unit", key),
                    });
                }
            }
        }
        ItemKind::Variable | ItemKind::Equation => ElementValue::Solution {
            level: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            marginal: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
        },
    };
    Ok(Element { key, value })
}

fn delete_items(connection: &Connection, run_id: RunId, workspace: i64) -> Result<()> {
    connection.execute(
        "
        delete from ItemElement
            where Item_Identity in (
                select Item_Identity from Item where Run_Identity = ? and Workspace = ?
            )
        ",
        params![run_id, workspace],
    )?;
    connection.execute(
        "delete from Item where Run_Identity = ? and Workspace = ?",
        params![run_id, workspace],
    )?;
    Ok(())
}

const OBSERVATION_TABLES: [&str; 2] = ["TimeseriesData", "Geodata"];

fn delete_observations(connection: &Connection, run_id: RunId, workspace: i64) -> Result<()> {
    for table in OBSERVATION_TABLES {
        connection.execute(
            &format!(
                "delete from {} where Run_Identity = ? and Workspace = ?",
                table
            ),
            params![run_id, workspace],
        )?;
    }
    Ok(())
}

/// Copies the committed content of a run into its working workspace.
fn copy_to_working(connection: &Connection, run_id: RunId, items: bool) -> Result<()> {
    delete_observations(connection, run_id, WORKING)?;
    for table in OBSERVATION_TABLES {
        connection.execute(
            &format!(
                "
                insert into {table} (
                    Run_Identity, Workspace, Region, Variable, Unit, Subannual, Year, Value, Meta
                )
                select Run_Identity, ?, Region, Variable, Unit, Subannual, Year, Value, Meta
                    from {table}
                    where Run_Identity = ?
                    and Workspace = ?
                ",
                table = table
            ),
            params![WORKING, run_id, COMMITTED],
        )?;
    }
    if !items {
        return Ok(());
    }
    delete_items(connection, run_id, WORKING)?;
    let committed: Vec<i64> = {
        let mut statement = connection.prepare(
            "
            select Item_Identity
                from Item
                where Run_Identity = ?
                and Workspace = ?
                order by Item_Identity
            ",
        )?;
        let ids = statement.query_map(params![run_id, COMMITTED], |r| r.get(0))?;
        ids.collect::<rusqlite::Result<_>>()?
    };
    for item_id in committed {
        connection.execute(
            "
            insert into Item (Run_Identity, Workspace, Item, Kind, IndexSets, IndexNames)
            select Run_Identity, ?, Item, Kind, IndexSets, IndexNames
                from Item
                where Item_Identity = ?
            ",
            params![WORKING, item_id],
        )?;
        let copy = connection.last_insert_rowid();
        connection.execute(
            "
            insert into ItemElement (Item_Identity, ElementKey, Value, Unit, Level, Marginal)
            select ?, ElementKey, Value, Unit, Level, Marginal
                from ItemElement
                where Item_Identity = ?
                order by Element_Identity
            ",
            params![copy, item_id],
        )?;
    }
    Ok(())
}

fn set_observations<V: ToSql>(
    connection: &mut Connection,
    table: &str,
    run_id: RunId,
    session: &str,
    rows: &[Observation<V>],
) -> Result<()> {
    let tx = connection.transaction()?;
    let workspace = write_workspace(&tx, run_id, session, true)?;
    {
        let mut upsert = tx.prepare_cached(&format!(
            "
            insert into {} (
                Run_Identity, Workspace, Region, Variable, Unit, Subannual, Year, Value, Meta
            ) values (?, ?, ?, ?, ?, ?, ?, ?, ?)
            on conflict (Run_Identity, Workspace, Region, Variable, Unit, Subannual, Year)
            do update set Value = excluded.Value, Meta = excluded.Meta
            ",
            table
        ))?;
        for row in rows {
            upsert.execute(params![
                run_id,
                workspace,
                &row.key.region,
                &row.key.variable,
                &row.key.unit,
                &row.key.subannual,
                row.year,
                &row.value,
                row.meta
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn get_observations<V: FromSql>(
    connection: &Connection,
    table: &str,
    run_id: RunId,
    session: &str,
    filters: &TsFilters,
) -> Result<Vec<Observation<V>>> {
    let matcher = filters.matcher()?;
    let workspace = read_workspace(connection, run_id, session, true)?;
    let mut statement = connection.prepare_cached(&format!(
        "
        select Region, Variable, Unit, Subannual, Year, Value, Meta
            from {}
            where Run_Identity = ?
            and Workspace = ?
            order by Region, Variable, Unit, Subannual, Year
        ",
        table
    ))?;
    let rows = statement.query_map(params![run_id, workspace], |r| {
        Ok(Observation {
            key: SeriesKey {
                region: r.get(0)?,
                variable: r.get(1)?,
                unit: r.get(2)?,
                subannual: r.get(3)?,
            },
            year: r.get(4)?,
            value: r.get(5)?,
            meta: r.get(6)?,
        })
    })?;
    let mut observations = Vec::new();
    for observation in rows {
        let observation = observation?;
        if matcher.matches(&observation) {
            observations.push(observation);
        }
    }
    Ok(observations)
}

fn delete_series(
    connection: &mut Connection,
    table: &str,
    run_id: RunId,
    session: &str,
    key: &SeriesKey,
    years: &[i32],
) -> Result<()> {
    let tx = connection.transaction()?;
    let workspace = write_workspace(&tx, run_id, session, true)?;
    let series = format!(
        "
        delete from {}
            where Run_Identity = ?
            and Workspace = ?
            and Region = ?
            and Variable = ?
            and Unit = ?
            and Subannual = ?
        ",
        table
    );
    if years.is_empty() {
        tx.execute(
            &series,
            params![run_id, workspace, &key.region, &key.variable, &key.unit, &key.subannual],
        )?;
    } else {
        let mut delete = tx.prepare_cached(&format!("{} and Year = ?", series))?;
        for year in years {
            delete.execute(params![
                run_id,
                workspace,
                &key.region,
                &key.variable,
                &key.unit,
                &key.subannual,
                year
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

impl Backend for SqliteBackend {
    fn open_db(&self) -> Result<()> {
        let mut guard = self.connection.lock()?;
        if guard.is_none() {
            *guard = Some(self.connect()?);
            info!(mode = ?self.mode, "database opened");
        }
        Ok(())
    }
    fn close_db(&self) -> Result<()> {
        let mut guard = self.connection.lock()?;
        if let Some(connection) = guard.take() {
            connection.close().map_err(|(_, e)| IxError::from(e))?;
            info!(mode = ?self.mode, "database closed");
        }
        Ok(())
    }
    fn schema_version(&self) -> Result<i64> {
        self.with_connection(|connection| schema::current_version(connection))
    }

    fn add_identifier(&self, identifier: &Identifier) -> Result<bool> {
        let table = registry_table(identifier.kind);
        self.with_connection(|connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing: Option<String> = tx
                .query_row(
                    &format!("select Attributes from {table} where {table} = ?"),
                    params![&identifier.name],
                    |r| r.get(0),
                )
                .optional()?;
            let added = match existing {
                Some(attributes) => {
                    let attributes: BTreeMap<String, String> = serde_json::from_str(&attributes)?;
                    if identifier.kind.has_identity_attributes()
                        && attributes != identifier.attributes
                    {
                        return Err(IxError::AlreadyExists(format!(
                            "{} '{}' with attributes {:?}",
                            identifier.kind, identifier.name, attributes
                        )));
                    }
                    false
                }
                None => {
                    tx.execute(
                        &format!("insert into {table} ({table}, Attributes) values (?, ?)"),
                        params![
                            &identifier.name,
                            serde_json::to_string(&identifier.attributes)?
                        ],
                    )?;
                    true
                }
            };
            tx.commit()?;
            Ok(added)
        })
    }
    fn list_identifiers(&self, kind: IdentifierKind) -> Result<Vec<Identifier>> {
        let table = registry_table(kind);
        self.with_connection(|connection| {
            let mut statement = connection.prepare_cached(&format!(
                "select {table}, Attributes from {table} order by {table}_Identity"
            ))?;
            let rows = statement.query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            let mut identifiers = Vec::new();
            for row in rows {
                let (name, attributes) = row?;
                identifiers.push(Identifier {
                    kind,
                    name,
                    attributes: serde_json::from_str(&attributes)?,
                });
            }
            Ok(identifiers)
        })
    }
    fn get_identifier(&self, kind: IdentifierKind, name: &str) -> Result<Identifier> {
        let table = registry_table(kind);
        self.with_connection(|connection| {
            let attributes: Option<String> = connection
                .query_row(
                    &format!("select Attributes from {table} where {table} = ?"),
                    params![name],
                    |r| r.get(0),
                )
                .optional()?;
            match attributes {
                Some(attributes) => Ok(Identifier {
                    kind,
                    name: name.to_string(),
                    attributes: serde_json::from_str(&attributes)?,
                }),
                None => Err(IxError::NotFound(format!("{} '{}'", kind, name))),
            }
        })
    }

    fn init_run(
        &self,
        model: &str,
        scenario: &str,
        scheme: &str,
        annotation: &str,
        session: &str,
    ) -> Result<RunId> {
        self.with_connection(|connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("insert or ignore into Model (Model) values (?)", params![model])?;
            tx.execute(
                "insert or ignore into Scenario (Scenario) values (?)",
                params![scenario],
            )?;
            tx.execute(
                "
                insert into Run (
                    Model, Scenario, Version, Scheme, Annotation, CreatedAt
                ) values (?, ?, null, ?, ?, ?)
                ",
                params![model, scenario, scheme, annotation, Utc::now()],
            )?;
            let run_id = tx.last_insert_rowid();
            tx.execute(
                "
                insert into RunLock (
                    Run_Identity, Session, TimeseriesOnly, LockedAt
                ) values (?, ?, 0, ?)
                ",
                params![run_id, session, Utc::now()],
            )?;
            tx.commit()?;
            Ok(run_id)
        })
    }
    fn get_run(&self, model: &str, scenario: &str, version: Option<i64>) -> Result<RunInfo> {
        self.with_connection(|connection| {
            let found = match version {
                Some(version) => connection
                    .query_row(
                        &format!(
                            "{} where r.Model = ? and r.Scenario = ? and r.Version = ?",
                            RUN_COLUMNS
                        ),
                        params![model, scenario, version],
                        read_run,
                    )
                    .optional()?,
                None => connection
                    .query_row(
                        &format!(
                            "{} join DefaultRun d on d.Run_Identity = r.Run_Identity
                                where d.Model = ? and d.Scenario = ?",
                            RUN_COLUMNS
                        ),
                        params![model, scenario],
                        read_run,
                    )
                    .optional()?,
            };
            found.ok_or_else(|| {
                IxError::NotFound(match version {
                    Some(v) => format!("{}/{} version {}", model, scenario, v),
                    None => format!("default version of {}/{}", model, scenario),
                })
            })
        })
    }
    fn run_info(&self, run_id: RunId) -> Result<RunInfo> {
        self.with_connection(|connection| run_info(connection, run_id))
    }
    fn list_runs(&self) -> Result<Vec<RunInfo>> {
        self.with_connection(|connection| {
            let mut statement =
                connection.prepare_cached(&format!("{} order by r.Run_Identity", RUN_COLUMNS))?;
            let runs = statement.query_map([], read_run)?;
            Ok(runs.collect::<rusqlite::Result<_>>()?)
        })
    }
    fn check_out(&self, run_id: RunId, session: &str, timeseries_only: bool) -> Result<()> {
        self.with_connection(|connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            run_info(&tx, run_id)?;
            if let Some((holder, _)) = lock_of(&tx, run_id)? {
                let by = if holder == session { "this" } else { "another" };
                return Err(IxError::IllegalState(format!(
                    "run {} is already checked out by {} session",
                    run_id, by
                )));
            }
            tx.execute(
                "
                insert into RunLock (
                    Run_Identity, Session, TimeseriesOnly, LockedAt
                ) values (?, ?, ?, ?)
                ",
                params![run_id, session, timeseries_only, Utc::now()],
            )?;
            copy_to_working(&tx, run_id, !timeseries_only)?;
            tx.commit()?;
            Ok(())
        })
    }
    fn commit(&self, run_id: RunId, session: &str, comment: &str) -> Result<i64> {
        self.with_connection(|connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let run = run_info(&tx, run_id)?;
            let timeseries_only = match lock_of(&tx, run_id)? {
                Some((holder, timeseries_only)) if holder == session => timeseries_only,
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
            if !timeseries_only {
                delete_items(&tx, run_id, COMMITTED)?;
                tx.execute(
                    "update Item set Workspace = ? where Run_Identity = ? and Workspace = ?",
                    params![COMMITTED, run_id, WORKING],
                )?;
            }
            delete_observations(&tx, run_id, COMMITTED)?;
            for table in OBSERVATION_TABLES {
                tx.execute(
                    &format!(
                        "update {} set Workspace = ? where Run_Identity = ? and Workspace = ?",
                        table
                    ),
                    params![COMMITTED, run_id, WORKING],
                )?;
            }
            let version = match run.version {
                Some(version) => version,
                None => {
                    let latest: Option<i64> = tx.query_row(
                        "select max(Version) from Run where Model = ? and Scenario = ?",
                        params![&run.model, &run.scenario],
                        |r| r.get(0),
                    )?;
                    let version = latest.unwrap_or(0) + 1;
                    tx.execute(
                        "update Run set Version = ? where Run_Identity = ?",
                        params![version, run_id],
                    )?;
                    version
                }
            };
            let now = Utc::now();
            tx.execute(
                "update Run set LastUpdate = ? where Run_Identity = ?",
                params![now, run_id],
            )?;
            tx.execute(
                "
                insert into RunCommit (
                    Run_Identity, Version, Comment, Session, CommittedAt
                ) values (?, ?, ?, ?, ?)
                ",
                params![run_id, version, comment, session, now],
            )?;
            tx.execute("delete from RunLock where Run_Identity = ?", params![run_id])?;
            tx.commit()?;
            Ok(version)
        })
    }
    fn discard_changes(&self, run_id: RunId, session: &str) -> Result<bool> {
        self.with_connection(|connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let run = run_info(&tx, run_id)?;
            match lock_of(&tx, run_id)? {
                Some((holder, _)) if holder == session => {}
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
            delete_items(&tx, run_id, WORKING)?;
            delete_observations(&tx, run_id, WORKING)?;
            let still_checked_out = run.version.is_none();
            if !still_checked_out {
                tx.execute("delete from RunLock where Run_Identity = ?", params![run_id])?;
            }
            tx.commit()?;
            Ok(still_checked_out)
        })
    }
    fn break_lock(&self, run_id: RunId) -> Result<bool> {
        self.with_connection(|connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            run_info(&tx, run_id)?;
            delete_items(&tx, run_id, WORKING)?;
            delete_observations(&tx, run_id, WORKING)?;
            let removed = tx.execute("delete from RunLock where Run_Identity = ?", params![run_id])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }
    fn set_as_default(&self, run_id: RunId) -> Result<()> {
        self.with_connection(|connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let run = run_info(&tx, run_id)?;
            if run.version.is_none() {
                return Err(IxError::IllegalState(format!(
                    "run {} has never been committed",
                    run_id
                )));
            }
            tx.execute(
                "
                insert into DefaultRun (Model, Scenario, Run_Identity) values (?, ?, ?)
                on conflict (Model, Scenario) do update set Run_Identity = excluded.Run_Identity
                ",
                params![&run.model, &run.scenario, run_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
    fn delete_run(&self, run_id: RunId, session: &str) -> Result<()> {
        self.with_connection(|connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let run = run_info(&tx, run_id)?;
            if let Some((holder, _)) = lock_of(&tx, run_id)? {
                if holder != session {
                    return Err(IxError::IllegalState(format!(
                        "run {} is checked out by another session",
                        run_id
                    )));
                }
            }
            delete_items(&tx, run_id, COMMITTED)?;
            delete_items(&tx, run_id, WORKING)?;
            for table in OBSERVATION_TABLES {
                tx.execute(
                    &format!("delete from {} where Run_Identity = ?", table),
                    params![run_id],
                )?;
            }
            for table in ["RunLock", "DefaultRun", "RunCommit"] {
                tx.execute(
                    &format!("delete from {} where Run_Identity = ?", table),
                    params![run_id],
                )?;
            }
            if let Some(version) = run.version {
                tx.execute(
                    "
                    delete from Meta
                        where Granularity = 'run'
                        and Model = ?
                        and Scenario = ?
                        and Version = ?
                    ",
                    params![&run.model, &run.scenario, version],
                )?;
            }
            tx.execute("delete from Run where Run_Identity = ?", params![run_id])?;
            tx.commit()?;
            Ok(())
        })
    }
    fn last_update(&self, run_id: RunId) -> Result<Option<DateTime<Utc>>> {
        self.with_connection(|connection| {
            run_info(connection, run_id)?;
            Ok(connection.query_row(
                "select LastUpdate from Run where Run_Identity = ?",
                params![run_id],
                |r| r.get(0),
            )?)
        })
    }
    fn run_log(&self, run_id: RunId) -> Result<Vec<CommitInfo>> {
        self.with_connection(|connection| {
            run_info(connection, run_id)?;
            let mut statement = connection.prepare_cached(
                "
                select Version, Comment, Session, CommittedAt
                    from RunCommit
                    where Run_Identity = ?
                    order by Commit_Identity
                ",
            )?;
            let log = statement.query_map(params![run_id], |r| {
                Ok(CommitInfo {
                    version: r.get(0)?,
                    comment: r.get(1)?,
                    session: r.get(2)?,
                    committed_at: r.get(3)?,
                })
            })?;
            Ok(log.collect::<rusqlite::Result<_>>()?)
        })
    }

    fn init_item(&self, run_id: RunId, session: &str, info: &ItemInfo) -> Result<()> {
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let workspace = write_workspace(&tx, run_id, session, false)?;
            if let Some((_, existing)) = find_item(&tx, run_id, workspace, &info.name)? {
                return Err(IxError::ItemExists {
                    name: info.name.clone(),
                    kind: existing.kind,
                });
            }
            tx.execute(
                "
                insert into Item (
                    Run_Identity, Workspace, Item, Kind, IndexSets, IndexNames
                ) values (?, ?, ?, ?, ?, ?)
                ",
                params![
                    run_id,
                    workspace,
                    &info.name,
                    info.kind.as_str(),
                    serde_json::to_string(&info.idx_sets)?,
                    serde_json::to_string(&info.idx_names)?
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
    fn list_items(
        &self,
        run_id: RunId,
        session: &str,
        kind: Option<ItemKind>,
    ) -> Result<Vec<ItemInfo>> {
        self.with_connection(|connection| {
            run_info(connection, run_id)?;
            let workspace = read_workspace(connection, run_id, session, false)?;
            let mut statement = connection.prepare_cached(
                "
                select Item_Identity, Item, Kind, IndexSets, IndexNames
                    from Item
                    where Run_Identity = ?
                    and Workspace = ?
                    order by Item_Identity
                ",
            )?;
            let mut rows = statement.query(params![run_id, workspace])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                let (_, info) = read_item(row)?;
                if kind.map(|k| k == info.kind).unwrap_or(true) {
                    items.push(info);
                }
            }
            Ok(items)
        })
    }
    fn item_info(&self, run_id: RunId, session: &str, name: &str) -> Result<ItemInfo> {
        self.with_connection(|connection| {
            let workspace = read_workspace(connection, run_id, session, false)?;
            find_item(connection, run_id, workspace, name)?
                .map(|(_, info)| info)
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
        self.with_connection(|connection| {
            let workspace = read_workspace(connection, run_id, session, false)?;
            let (item_id, info) = item_of_kind(connection, run_id, workspace, kind, name)?;
            let mut statement = connection.prepare_cached(
                "
                select ElementKey, Value, Unit, Level, Marginal
                    from ItemElement
                    where Item_Identity = ?
                    order by Element_Identity
                ",
            )?;
            let mut rows = statement.query(params![item_id])?;
            let mut data = ItemData::new(info);
            while let Some(row) = rows.next()? {
                data.elements.push(decode_element(kind, row)?);
            }
            Ok(if filters.is_empty() {
                data
            } else {
                data.filtered(filters)
            })
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
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let workspace = write_workspace(&tx, run_id, session, false)?;
            let (item_id, _) = item_of_kind(&tx, run_id, workspace, kind, name)?;
            {
                let mut upsert = tx.prepare_cached(
                    "
                    insert into ItemElement (
                        Item_Identity, ElementKey, Value, Unit, Level, Marginal
                    ) values (?, ?, ?, ?, ?, ?)
                    on conflict (Item_Identity, ElementKey) do update set
                        Value = excluded.Value,
                        Unit = excluded.Unit,
                        Level = excluded.Level,
                        Marginal = excluded.Marginal
                    ",
                )?;
                for element in elements {
                    let (value, unit, level, marginal) = match &element.value {
                        ElementValue::Member => (None, None, None, None),
                        ElementValue::Parameter { value, unit } => {
                            (Some(*value), Some(unit.as_str()), None, None)
                        }
                        ElementValue::Solution { level, marginal } => {
                            (None, None, Some(*level), Some(*marginal))
                        }
                    };
                    upsert.execute(params![
                        item_id,
                        element.key.to_json()?,
                        value,
                        unit,
                        level,
                        marginal
                    ])?;
                }
            }
            tx.commit()?;
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
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let workspace = write_workspace(&tx, run_id, session, false)?;
            let (item_id, _) = item_of_kind(&tx, run_id, workspace, kind, name)?;
            {
                let mut delete = tx.prepare_cached(
                    "delete from ItemElement where Item_Identity = ? and ElementKey = ?",
                )?;
                for key in keys {
                    delete.execute(params![item_id, key.to_json()?])?;
                }
            }
            tx.commit()?;
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
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let workspace = write_workspace(&tx, run_id, session, false)?;
            let (item_id, _) = item_of_kind(&tx, run_id, workspace, kind, name)?;
            tx.execute(
                "delete from ItemElement where Item_Identity = ?",
                params![item_id],
            )?;
            tx.execute("delete from Item where Item_Identity = ?", params![item_id])?;
            tx.commit()?;
            Ok(())
        })
    }
    fn item_index(
        &self,
        run_id: RunId,
        session: &str,
        kind: ItemKind,
        name: &str,
        position: usize,
    ) -> Result<Vec<String>> {
        self.with_connection(|connection| {
            let workspace = read_workspace(connection, run_id, session, false)?;
            let (item_id, _) = item_of_kind(connection, run_id, workspace, kind, name)?;
            let mut statement = connection.prepare_cached(
                "
                select json_extract(ElementKey, ?) as Label,
                        min(Element_Identity) as First
                    from ItemElement
                    where Item_Identity = ?
                    group by Label
                    having Label is not null
                    order by First
                ",
            )?;
            let labels = statement.query_map(
                params![format!("$[{}]", position), item_id],
                |r| r.get::<_, String>(0),
            )?;
            Ok(labels.collect::<rusqlite::Result<_>>()?)
        })
    }
    fn clear_solution(&self, run_id: RunId, session: &str) -> Result<()> {
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let workspace = write_workspace(&tx, run_id, session, false)?;
            tx.execute(
                "
                delete from ItemElement
                    where Item_Identity in (
                        select Item_Identity
                            from Item
                            where Run_Identity = ?
                            and Workspace = ?
                            and Kind in ('var', 'equ')
                    )
                ",
                params![run_id, workspace],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
    fn has_solution(&self, run_id: RunId, session: &str) -> Result<bool> {
        self.with_connection(|connection| {
            let workspace = read_workspace(connection, run_id, session, false)?;
            Ok(connection.query_row(
                "
                select exists(
                    select 1
                        from ItemElement e
                        join Item i
                        on i.Item_Identity = e.Item_Identity
                        where i.Run_Identity = ?
                        and i.Workspace = ?
                        and i.Kind in ('var', 'equ')
                )
                ",
                params![run_id, workspace],
                |r| r.get(0),
            )?)
        })
    }

    fn set_data(&self, run_id: RunId, session: &str, rows: &[TsRow]) -> Result<()> {
        self.with_connection(|connection| {
            set_observations(connection, "TimeseriesData", run_id, session, rows)
        })
    }
    fn get_data(&self, run_id: RunId, session: &str, filters: &TsFilters) -> Result<Vec<TsRow>> {
        self.with_connection(|connection| {
            get_observations(connection, "TimeseriesData", run_id, session, filters)
        })
    }
    fn delete_data(
        &self,
        run_id: RunId,
        session: &str,
        key: &SeriesKey,
        years: &[i32],
    ) -> Result<()> {
        self.with_connection(|connection| {
            delete_series(connection, "TimeseriesData", run_id, session, key, years)
        })
    }
    fn set_geo(&self, run_id: RunId, session: &str, rows: &[GeoRow]) -> Result<()> {
        self.with_connection(|connection| {
            set_observations(connection, "Geodata", run_id, session, rows)
        })
    }
    fn get_geo(&self, run_id: RunId, session: &str, filters: &TsFilters) -> Result<Vec<GeoRow>> {
        self.with_connection(|connection| {
            get_observations(connection, "Geodata", run_id, session, filters)
        })
    }
    fn delete_geo(
        &self,
        run_id: RunId,
        session: &str,
        key: &SeriesKey,
        years: &[i32],
    ) -> Result<()> {
        self.with_connection(|connection| {
            delete_series(connection, "Geodata", run_id, session, key, years)
        })
    }

    fn set_meta(&self, target: &MetaTarget, name: &str, value: &MetaValue) -> Result<()> {
        let (model, scenario, version) = target.columns();
        self.with_connection(|connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let bound: Option<String> = tx
                .query_row(
                    "select Granularity from Meta where Name = ? and Granularity <> ? limit 1",
                    params![name, target.granularity()],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(granularity) = bound {
                return Err(IxError::AlreadyExists(format!(
                    "meta '{}' is already used at {} granularity",
                    name, granularity
                )));
            }
            tx.execute(
                "
                insert into Meta (
                    Granularity, Model, Scenario, Version, Name, Value
                ) values (?, ?, ?, ?, ?, ?)
                on conflict (Granularity, Model, Scenario, Version, Name)
                do update set Value = excluded.Value
                ",
                params![
                    target.granularity(),
                    model,
                    scenario,
                    version,
                    name,
                    serde_json::to_string(value)?
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
    fn get_meta(&self, target: &MetaTarget) -> Result<BTreeMap<String, MetaValue>> {
        let (model, scenario, version) = target.columns();
        self.with_connection(|connection| {
            let mut statement = connection.prepare_cached(
                "
                select Name, Value
                    from Meta
                    where Granularity = ?
                    and Model = ?
                    and Scenario = ?
                    and Version = ?
                ",
            )?;
            let rows = statement.query_map(
                params![target.granularity(), model, scenario, version],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
            )?;
            let mut meta = BTreeMap::new();
            for row in rows {
                let (name, value) = row?;
                meta.insert(name, serde_json::from_str(&value)?);
            }
            Ok(meta)
        })
    }
    fn remove_meta(&self, target: &MetaTarget, names: &[String]) -> Result<()> {
        let (model, scenario, version) = target.columns();
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            {
                let mut delete = tx.prepare_cached(
                    "
                    delete from Meta
                        where Granularity = ?
                        and Model = ?
                        and Scenario = ?
                        and Version = ?
                        and Name = ?
                    ",
                )?;
                for name in names {
                    delete.execute(params![
                        target.granularity(),
                        model,
                        scenario,
                        version,
                        name
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}
