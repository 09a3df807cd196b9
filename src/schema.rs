//! Relational schema and migrations for the SQLite engine.
//!
//! The schema version is recorded in `SchemaVersion`, one row per applied
//! migration. Opening a database applies the missing migrations in order;
//! a database newer than this build is refused.
//!
//! Item and time series rows carry a `Workspace` column: 0 holds committed
//! content, 1 the working copy of a checked out run.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::info;

use crate::error::{IxError, Result};

pub const SCHEMA_VERSION: i64 = 3;

pub const COMMITTED: i64 = 0;
pub const WORKING: i64 = 1;

type Migration = fn(&Connection) -> Result<()>;

const MIGRATIONS: [(i64, Migration); 3] = [
    (1, migrate_v1),
    (2, migrate_v2),
    (3, migrate_v3),
];

pub fn current_version(connection: &Connection) -> Result<i64> {
    connection.execute_batch(
        "
        create table if not exists SchemaVersion (
            Version integer not null,
            AppliedAt text not null,
            constraint referenceable_Version primary key (
                Version
            )
        );
        ",
    )?;
    let version: Option<i64> =
        connection.query_row("select max(Version) from SchemaVersion", [], |r| r.get(0))?;
    Ok(version.unwrap_or(0))
}

/// Brings the database up to [`SCHEMA_VERSION`] and returns the version found before.
pub fn migrate(connection: &mut Connection) -> Result<i64> {
    let found = current_version(connection)?;
    if found > SCHEMA_VERSION {
        return Err(IxError::Persistence(format!(
            "database schema version {} is newer than supported version {}",
            found, SCHEMA_VERSION
        )));
    }
    for (version, migration) in MIGRATIONS.iter().filter(|(v, _)| *v > found) {
        let tx = connection.transaction()?;
        migration(&tx)?;
        tx.execute(
            "insert into SchemaVersion (Version, AppliedAt) values (?, ?)",
            params![version, Utc::now()],
        )?;
        tx.commit()?;
        info!(version, "applied schema migration");
    }
    Ok(found)
}

fn migrate_v1(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        create table if not exists Model (
            Model_Identity integer not null,
            Model text not null,
            Attributes text not null default '{}',
            constraint referenceable_Model_Identity primary key (
                Model_Identity
            ),
            constraint unique_Model unique (
                Model
            )
        );
        create table if not exists Scenario (
            Scenario_Identity integer not null,
            Scenario text not null,
            Attributes text not null default '{}',
            constraint referenceable_Scenario_Identity primary key (
                Scenario_Identity
            ),
            constraint unique_Scenario unique (
                Scenario
            )
        );
        create table if not exists Unit (
            Unit_Identity integer not null,
            Unit text not null,
            Attributes text not null default '{}',
            constraint referenceable_Unit_Identity primary key (
                Unit_Identity
            ),
            constraint unique_Unit unique (
                Unit
            )
        );
        create table if not exists Region (
            Region_Identity integer not null,
            Region text not null,
            Attributes text not null default '{}',
            constraint referenceable_Region_Identity primary key (
                Region_Identity
            ),
            constraint unique_Region unique (
                Region
            )
        );
        create table if not exists Timeslice (
            Timeslice_Identity integer not null,
            Timeslice text not null,
            Attributes text not null default '{}',
            constraint referenceable_Timeslice_Identity primary key (
                Timeslice_Identity
            ),
            constraint unique_Timeslice unique (
                Timeslice
            )
        );
        create table if not exists Run (
            Run_Identity integer not null,
            Model text not null,
            Scenario text not null,
            Version integer null,
            Scheme text not null,
            Annotation text not null,
            CreatedAt text not null,
            constraint referenceable_Run_Identity primary key (
                Run_Identity
            ),
            constraint unique_Run unique (
                Model,
                Scenario,
                Version
            )
        );
        create table if not exists DefaultRun (
            Model text not null,
            Scenario text not null,
            Run_Identity integer not null,
            constraint DefaultRun_is_Run foreign key (
                Run_Identity
            ) references Run(Run_Identity),
            constraint one_DefaultRun_per_Model_Scenario primary key (
                Model,
                Scenario
            )
        );
        create table if not exists RunLock (
            Run_Identity integer not null,
            Session text not null,
            TimeseriesOnly integer not null,
            LockedAt text not null,
            constraint RunLock_is_Run foreign key (
                Run_Identity
            ) references Run(Run_Identity),
            constraint one_RunLock_per_Run primary key (
                Run_Identity
            )
        );
        create table if not exists Item (
            Item_Identity integer not null,
            Run_Identity integer not null,
            Workspace integer not null,
            Item text not null,
            Kind text not null,
            IndexSets text not null,
            IndexNames text not null,
            constraint Item_belongs_to_Run foreign key (
                Run_Identity
            ) references Run(Run_Identity),
            constraint referenceable_Item_Identity primary key (
                Item_Identity
            ),
            constraint unique_Item unique (
                Run_Identity,
                Workspace,
                Item
            )
        );
        create table if not exists ItemElement (
            Element_Identity integer not null,
            Item_Identity integer not null,
            ElementKey text not null,
            Value real null,
            Unit text null,
            Level real null,
            Marginal real null,
            constraint ItemElement_belongs_to_Item foreign key (
                Item_Identity
            ) references Item(Item_Identity),
            constraint referenceable_Element_Identity primary key (
                Element_Identity
            ),
            constraint unique_ItemElement unique (
                Item_Identity,
                ElementKey
            )
        );
        create table if not exists TimeseriesData (
            Run_Identity integer not null,
            Workspace integer not null,
            Region text not null,
            Variable text not null,
            Unit text not null,
            Subannual text not null,
            Year integer not null,
            Value real not null,
            Meta integer not null,
            constraint TimeseriesData_belongs_to_Run foreign key (
                Run_Identity
            ) references Run(Run_Identity),
            constraint unique_TimeseriesData primary key (
                Run_Identity,
                Workspace,
                Region,
                Variable,
                Unit,
                Subannual,
                Year
            )
        );
        insert or ignore into Unit (Unit, Attributes) values ('-', '{\"comment\":\"dimensionless\"}');
        insert or ignore into Region (Region, Attributes) values ('World', '{\"hierarchy\":\"common\"}');
        insert or ignore into Timeslice (Timeslice, Attributes) values ('Year', '{\"category\":\"Common\",\"duration\":\"1\"}');
        ",
    )?;
    Ok(())
}

fn migrate_v2(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        create table if not exists Geodata (
            Run_Identity integer not null,
            Workspace integer not null,
            Region text not null,
            Variable text not null,
            Unit text not null,
            Subannual text not null,
            Year integer not null,
            Value text not null,
            Meta integer not null,
            constraint Geodata_belongs_to_Run foreign key (
                Run_Identity
            ) references Run(Run_Identity),
            constraint unique_Geodata primary key (
                Run_Identity,
                Workspace,
                Region,
                Variable,
                Unit,
                Subannual,
                Year
            )
        );
        create table if not exists RunCommit (
            Commit_Identity integer not null,
            Run_Identity integer not null,
            Version integer not null,
            Comment text not null,
            Session text not null,
            CommittedAt text not null,
            constraint RunCommit_belongs_to_Run foreign key (
                Run_Identity
            ) references Run(Run_Identity),
            constraint referenceable_Commit_Identity primary key (
                Commit_Identity
            )
        );
        create table if not exists Meta (
            Granularity text not null,
            Model text not null,
            Scenario text not null,
            Version integer not null,
            Name text not null,
            Value text not null,
            constraint unique_Meta primary key (
                Granularity,
                Model,
                Scenario,
                Version,
                Name
            )
        );
        ",
    )?;
    Ok(())
}

fn migrate_v3(connection: &Connection) -> Result<()> {
    let columns = columns_of(connection, "Run")?;
    add_column_if_missing(connection, &columns, "Run", "LastUpdate", "text null")?;
    Ok(())
}

fn columns_of(connection: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut statement = connection.prepare(&format!("pragma table_info({})", table))?;
    let rows = statement.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = HashSet::new();
    for column in rows {
        columns.insert(column?);
    }
    Ok(columns)
}

fn add_column_if_missing(
    connection: &Connection,
    columns: &HashSet<String>,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    if !columns.contains(column) {
        connection.execute(
            &format!("alter table {} add column {} {}", table, column, definition),
            [],
        )?;
    }
    Ok(())
}
