//! The versioned identity (model, scenario, version) and its time series data.
//!
//! A handle moves through a small state machine:
//!
//! ```text
//! New ──commit──▶ Committed ──check_out──▶ CheckedOut ──commit/discard──▶ Committed
//!  └──discard──▶ New                                          any ──delete──▶ Deleted
//! ```
//!
//! Data may only change while the handle is `New` or `CheckedOut`. A check-out
//! restricted to time series leaves the items untouchable.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::backend::Backend;
use crate::construct::{CommitInfo, RunId, RunInfo};
use crate::datatype::{GeoRow, MetaTarget, MetaValue, Observation, SeriesKey, TsRow};
use crate::error::{IxError, Result};
use crate::filter::TsFilters;
use crate::platform::{Platform, new_session};

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum RunState {
    /// Created with version 'new' and not committed yet; mutable.
    New,
    CheckedOut { timeseries_only: bool },
    Committed,
    Deleted,
}

/// Which version of a (model, scenario) pair a handle refers to.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum VersionSpec {
    New,
    Default,
    Number(i64),
}

impl From<i64> for VersionSpec {
    fn from(version: i64) -> Self {
        Self::Number(version)
    }
}
impl From<Option<i64>> for VersionSpec {
    fn from(version: Option<i64>) -> Self {
        version.map(Self::Number).unwrap_or(Self::Default)
    }
}

pub struct TimeSeries {
    platform: Platform,
    run_id: RunId,
    model: String,
    scenario: String,
    version: Option<i64>,
    session: String,
    state: RunState,
}

impl TimeSeries {
    pub fn new(
        platform: &Platform,
        model: &str,
        scenario: &str,
        version: impl Into<VersionSpec>,
    ) -> Result<Self> {
        match version.into() {
            VersionSpec::New => Self::create(platform, model, scenario, "", ""),
            VersionSpec::Default => Self::load(platform, model, scenario, None),
            VersionSpec::Number(v) => Self::load(platform, model, scenario, Some(v)),
        }
    }
    pub(crate) fn create(
        platform: &Platform,
        model: &str,
        scenario: &str,
        scheme: &str,
        annotation: &str,
    ) -> Result<Self> {
        if model.is_empty() || scenario.is_empty() {
            return Err(IxError::TypeError(
                "model and scenario names cannot be empty".to_string(),
            ));
        }
        let session = new_session();
        let run_id = platform
            .backend()
            .init_run(model, scenario, scheme, annotation, &session)?;
        info!(run_id, model, scenario, "created run");
        Ok(Self {
            platform: platform.clone(),
            run_id,
            model: model.to_string(),
            scenario: scenario.to_string(),
            version: None,
            session,
            state: RunState::New,
        })
    }
    pub(crate) fn load(
        platform: &Platform,
        model: &str,
        scenario: &str,
        version: Option<i64>,
    ) -> Result<Self> {
        let run = platform.backend().get_run(model, scenario, version)?;
        Ok(Self::from_run(platform, &run))
    }
    pub(crate) fn from_run(platform: &Platform, run: &RunInfo) -> Self {
        Self {
            platform: platform.clone(),
            run_id: run.run_id,
            model: run.model.clone(),
            scenario: run.scenario.clone(),
            version: run.version,
            session: new_session(),
            state: RunState::Committed,
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }
    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        self.platform.backend()
    }
    pub fn run_id(&self) -> RunId {
        self.run_id
    }
    pub fn model(&self) -> &str {
        &self.model
    }
    pub fn scenario(&self) -> &str {
        &self.scenario
    }
    /// `None` until the first commit.
    pub fn version(&self) -> Option<i64> {
        self.version
    }
    /// Token identifying this handle to the backend.
    pub fn session(&self) -> &str {
        &self.session
    }
    pub fn state(&self) -> RunState {
        self.state
    }
    pub fn is_checked_out(&self) -> bool {
        matches!(self.state, RunState::New | RunState::CheckedOut { .. })
    }
    pub fn info(&self) -> Result<RunInfo> {
        self.ensure_alive()?;
        self.backend().run_info(self.run_id)
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        match self.state {
            RunState::Deleted => Err(IxError::IllegalState(format!(
                "run {} has been deleted",
                self.run_id
            ))),
            _ => Ok(()),
        }
    }
    /// Item writes need a full check-out; time series writes accept a restricted one.
    pub(crate) fn ensure_writable(&self, timeseries: bool) -> Result<()> {
        match self.state {
            RunState::New | RunState::CheckedOut { timeseries_only: false } => Ok(()),
            RunState::CheckedOut { timeseries_only: true } if timeseries => Ok(()),
            RunState::CheckedOut { timeseries_only: true } => Err(IxError::IllegalState(
                format!("run {} is checked out for time series only", self.run_id),
            )),
            RunState::Committed => Err(IxError::IllegalState(format!(
                "run {} must be checked out before it is changed",
                self.run_id
            ))),
            RunState::Deleted => self.ensure_alive(),
        }
    }

    // ------------- Lifecycle -------------
    pub fn check_out(&mut self, timeseries_only: bool) -> Result<()> {
        match self.state {
            RunState::Committed => {}
            RunState::New | RunState::CheckedOut { .. } => {
                return Err(IxError::IllegalState(format!(
                    "run {} is already checked out by this handle",
                    self.run_id
                )));
            }
            RunState::Deleted => return self.ensure_alive(),
        }
        self.backend()
            .check_out(self.run_id, &self.session, timeseries_only)?;
        self.state = RunState::CheckedOut { timeseries_only };
        info!(run_id = self.run_id, timeseries_only, "checked out");
        Ok(())
    }
    /// Persists all pending changes as one unit and returns the version.
    pub fn commit(&mut self, comment: &str) -> Result<i64> {
        if !self.is_checked_out() {
            self.ensure_alive()?;
            return Err(IxError::IllegalState(format!(
                "run {} is not checked out",
                self.run_id
            )));
        }
        let version = match self.backend().commit(self.run_id, &self.session, comment) {
            Ok(version) => version,
            Err(e @ IxError::CommitConflict { .. }) => {
                // the check-out is gone, this handle holds nothing any more
                self.state = RunState::Committed;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.version = Some(version);
        self.state = RunState::Committed;
        info!(run_id = self.run_id, version, "committed");
        Ok(version)
    }
    /// Drops pending changes. A run never committed stays checked out, empty.
    /// A handle whose lock was broken gets `CommitConflict` and holds nothing.
    pub fn discard_changes(&mut self) -> Result<()> {
        if !self.is_checked_out() {
            self.ensure_alive()?;
            return Err(IxError::IllegalState(format!(
                "run {} is not checked out",
                self.run_id
            )));
        }
        let still_checked_out = match self.backend().discard_changes(self.run_id, &self.session) {
            Ok(still_checked_out) => still_checked_out,
            Err(e @ IxError::CommitConflict { .. }) => {
                self.state = RunState::Committed;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.state = if still_checked_out {
            RunState::New
        } else {
            RunState::Committed
        };
        info!(run_id = self.run_id, "discarded changes");
        Ok(())
    }
    pub fn set_as_default(&self) -> Result<()> {
        self.ensure_alive()?;
        if self.version.is_none() {
            return Err(IxError::IllegalState(
                "a run must be committed before it becomes the default".to_string(),
            ));
        }
        self.backend().set_as_default(self.run_id)
    }
    pub fn is_default(&self) -> Result<bool> {
        Ok(self.info()?.is_default)
    }
    pub fn last_update(&self) -> Result<Option<DateTime<Utc>>> {
        self.ensure_alive()?;
        self.backend().last_update(self.run_id)
    }
    /// Commits made on this run, oldest first.
    pub fn log(&self) -> Result<Vec<CommitInfo>> {
        self.ensure_alive()?;
        self.backend().run_log(self.run_id)
    }
    /// Removes the run with all its items and data.
    pub fn delete(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.backend().delete_run(self.run_id, &self.session)?;
        self.state = RunState::Deleted;
        info!(run_id = self.run_id, "deleted run");
        Ok(())
    }

    // ------------- Time series -------------
    fn check_observations<V>(&self, rows: &[Observation<V>]) -> Result<()> {
        self.platform
            .check_regions(rows.iter().map(|r| r.key.region.as_str()))?;
        self.platform
            .check_units(rows.iter().map(|r| r.key.unit.as_str()))?;
        self.platform
            .check_timeslices(rows.iter().map(|r| r.key.subannual.as_str()))
    }
    pub fn add_timeseries(&mut self, rows: &[TsRow]) -> Result<()> {
        self.ensure_writable(true)?;
        self.check_observations(rows)?;
        self.backend().set_data(self.run_id, &self.session, rows)
    }
    pub fn timeseries(&self, filters: &TsFilters) -> Result<Vec<TsRow>> {
        self.ensure_alive()?;
        self.backend().get_data(self.run_id, &self.session, filters)
    }
    /// Removes the given years of one series, or the whole series when `years` is empty.
    pub fn remove_timeseries(&mut self, key: &SeriesKey, years: &[i32]) -> Result<()> {
        self.ensure_writable(true)?;
        self.backend()
            .delete_data(self.run_id, &self.session, key, years)
    }
    /// Removes non-meta rows from `first_year` on, or all non-meta rows.
    pub(crate) fn remove_model_timeseries(&mut self, first_year: Option<i32>) -> Result<()> {
        let rows = self.timeseries(&TsFilters::new().meta(false))?;
        let mut doomed: BTreeMap<SeriesKey, BTreeSet<i32>> = BTreeMap::new();
        for row in rows
            .into_iter()
            .filter(|r| first_year.map(|y| r.year >= y).unwrap_or(true))
        {
            doomed.entry(row.key).or_default().insert(row.year);
        }
        for (key, years) in doomed {
            let years: Vec<i32> = years.into_iter().collect();
            self.backend()
                .delete_data(self.run_id, &self.session, &key, &years)?;
        }
        Ok(())
    }
    pub fn add_geodata(&mut self, rows: &[GeoRow]) -> Result<()> {
        self.ensure_writable(true)?;
        self.check_observations(rows)?;
        self.backend().set_geo(self.run_id, &self.session, rows)
    }
    pub fn geodata(&self, filters: &TsFilters) -> Result<Vec<GeoRow>> {
        self.ensure_alive()?;
        self.backend().get_geo(self.run_id, &self.session, filters)
    }
    pub fn remove_geodata(&mut self, key: &SeriesKey, years: &[i32]) -> Result<()> {
        self.ensure_writable(true)?;
        self.backend()
            .delete_geo(self.run_id, &self.session, key, years)
    }

    // ------------- Meta -------------
    fn meta_target(&self) -> Result<MetaTarget> {
        self.ensure_alive()?;
        match self.version {
            Some(version) => Ok(MetaTarget::Run {
                model: self.model.clone(),
                scenario: self.scenario.clone(),
                version,
            }),
            None => Err(IxError::IllegalState(
                "meta can only be attached to a committed run".to_string(),
            )),
        }
    }
    pub fn set_meta(&self, name: &str, value: impl Into<MetaValue>) -> Result<()> {
        self.platform.set_meta(&self.meta_target()?, name, value)
    }
    pub fn meta(&self) -> Result<BTreeMap<String, MetaValue>> {
        self.platform.get_meta(&self.meta_target()?)
    }
    pub fn remove_meta(&self, names: &[&str]) -> Result<()> {
        self.platform.remove_meta(&self.meta_target()?, names)
    }
}

// ------------- Transactions -------------
/// How [`Transactional::transact`] wraps its body.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub comment: String,
    /// When `false` the body runs without any check-out or commit.
    pub condition: bool,
    /// Commit whatever the body managed to do even when it fails.
    pub commit_on_error: bool,
    pub timeseries_only: bool,
}

impl Transaction {
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            condition: true,
            commit_on_error: false,
            timeseries_only: false,
        }
    }
    pub fn condition(mut self, condition: bool) -> Self {
        self.condition = condition;
        self
    }
    pub fn commit_on_error(mut self) -> Self {
        self.commit_on_error = true;
        self
    }
    pub fn timeseries_only(mut self) -> Self {
        self.timeseries_only = true;
        self
    }
}

pub trait Transactional: Sized {
    fn run_mut(&mut self) -> &mut TimeSeries;

    /// Checks out, runs `body` and commits. On an error or a panic the
    /// changes are discarded (or committed, with `commit_on_error`) before the
    /// failure is passed on, so the handle never stays checked out.
    fn transact<T>(
        &mut self,
        transaction: Transaction,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if !transaction.condition {
            return body(self);
        }
        if self.run_mut().state() != RunState::New {
            self.run_mut().check_out(transaction.timeseries_only)?;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut *self)));
        let run = self.run_mut();
        match outcome {
            Ok(Ok(value)) => {
                if run.is_checked_out() {
                    run.commit(&transaction.comment)?;
                }
                Ok(value)
            }
            Ok(Err(e)) => {
                warn!(run_id = run.run_id(), error = %e, "transaction failed");
                if transaction.commit_on_error && run.is_checked_out() {
                    if let Err(failed) = run.commit(&transaction.comment) {
                        warn!(run_id = run.run_id(), error = %failed, "commit on error failed");
                    }
                }
                // a failed commit may already have released the check-out
                if run.is_checked_out() {
                    if let Err(failed) = run.discard_changes() {
                        warn!(run_id = run.run_id(), error = %failed, "discard failed");
                    }
                }
                Err(e)
            }
            Err(payload) => {
                warn!(run_id = run.run_id(), "transaction panicked");
                if run.is_checked_out() {
                    // the panic is what the caller needs to see
                    let _ = run.discard_changes();
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

impl Transactional for TimeSeries {
    fn run_mut(&mut self) -> &mut TimeSeries {
        self
    }
}
