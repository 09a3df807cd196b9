//! ixstore – versioned storage for scenario-based numerical models.
//!
//! A *scenario* is identified by `(model, scenario, version)` and holds
//! *items*: sets, parameters, variables and equations, each a named container
//! of elements keyed by tuples of set labels. Next to the items a scenario
//! carries time series (and string-valued geodata) keyed by region, variable,
//! unit and sub-annual time slice.
//!
//! Changes happen between a *check-out* and a *commit*. A commit persists all
//! pending changes of a run at once and assigns a version the first time; a
//! second concurrent check-out of the same run is refused.
//!
//! ## Modules
//! * [`platform`] – The handle to one storage engine, registries and meta.
//! * [`timeseries`] / [`scenario`] – The entities and their check-out state machine.
//! * [`backend`] – The [`backend::Backend`] trait every storage engine implements.
//! * [`persist`] – SQLite engine, with its schema and migrations in [`schema`].
//! * [`memory`] – An engine keeping everything in process memory.
//! * [`cache`] – A decorator memoizing whole item reads.
//! * [`tabular`] – Flat tables for file import and export.
//! * [`config`] / [`logging`] – Platform definitions and subscriber setup.
//!
//! ## Quick Start
//! ```
//! use ixstore::platform::Platform;
//! use ixstore::scenario::Scenario;
//! use ixstore::filter::Filters;
//! use ixstore::timeseries::VersionSpec;
//!
//! # fn main() -> ixstore::Result<()> {
//! let platform = Platform::in_memory()?;
//! platform.add_unit("cases", "")?;
//! let mut scen = Scenario::new(&platform, "transport", "standard", VersionSpec::New)?;
//! scen.init_set("i", &[], None)?;
//! scen.add_set("i", ["seattle", "san-diego"])?;
//! scen.init_par("a", &["i"], None)?;
//! scen.add_par("a", [("seattle", 350.0, "cases"), ("san-diego", 600.0, "cases")])?;
//! assert_eq!(scen.commit("initial data")?, 1);
//! let a = scen.par("a", &Filters::new())?;
//! assert_eq!(a.value("seattle"), Some((350.0, "cases")));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod construct;
pub mod datatype;
pub mod error;
pub mod filter;
pub mod logging;
pub mod memory;
pub mod persist;
pub mod platform;
pub mod registry;
pub mod scenario;
pub mod schema;
pub mod tabular;
pub mod timeseries;

pub use error::{IxError, Result};
