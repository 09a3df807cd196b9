//! A [`TimeSeries`] that also owns items: sets, parameters, variables and equations.
//!
//! Item names are unique across kinds. Indexed items name one-dimensional sets
//! as their index sets, and every label of a key must be a member of the set
//! at its position. Variables and equations hold solution data, which only
//! [`Scenario::write_solution`] may write.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::{Deref, DerefMut};

use tracing::{debug, info, warn};

use crate::construct::{IdentifierKind, ItemData, ItemInfo, ItemKind};
use crate::datatype::{Element, ElementValue, Key};
use crate::error::{IxError, Result};
use crate::filter::{Filters, TsFilters};
use crate::platform::Platform;
use crate::registry::Unit;
use crate::tabular::{MAX_ROWS, TYPE_MAPPING, Table};
use crate::timeseries::{TimeSeries, Transactional, VersionSpec};

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum WriteAccess {
    Caller,
    Solver,
}

/// Variable and equation elements handed over by a solver, keyed by item name.
#[derive(PartialEq, Clone, Debug, Default)]
pub struct Solution {
    items: BTreeMap<String, Vec<Element>>,
}

impl Solution {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, name: &str, elements: Vec<Element>) -> Self {
        self.insert(name, elements);
        self
    }
    pub fn insert(&mut self, name: &str, elements: Vec<Element>) {
        self.items.entry(name.to_string()).or_default().extend(elements);
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone)]
pub struct CloneOptions {
    pub model: Option<String>,
    pub scenario: Option<String>,
    pub annotation: Option<String>,
    pub keep_solution: bool,
    /// Drops the solution and model time series from this year on.
    pub shift_first_model_year: Option<i32>,
    /// Destination platform; the source platform when absent.
    pub platform: Option<Platform>,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            model: None,
            scenario: None,
            annotation: None,
            keep_solution: true,
            shift_first_model_year: None,
            platform: None,
        }
    }
}

impl CloneOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }
    pub fn scenario(mut self, scenario: &str) -> Self {
        self.scenario = Some(scenario.to_string());
        self
    }
    pub fn annotation(mut self, annotation: &str) -> Self {
        self.annotation = Some(annotation.to_string());
        self
    }
    pub fn keep_solution(mut self, keep: bool) -> Self {
        self.keep_solution = keep;
        self
    }
    pub fn shift_first_model_year(mut self, year: i32) -> Self {
        self.shift_first_model_year = Some(year);
        self
    }
    pub fn to_platform(mut self, platform: &Platform) -> Self {
        self.platform = Some(platform.clone());
        self
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ReadOptions {
    /// Registers units found in parameter tables.
    pub add_units: bool,
    /// Declares items that do not exist yet.
    pub init_items: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            add_units: false,
            init_items: true,
        }
    }
}

pub struct Scenario {
    ts: TimeSeries,
    scheme: String,
    annotation: String,
}

impl Deref for Scenario {
    type Target = TimeSeries;
    fn deref(&self) -> &TimeSeries {
        &self.ts
    }
}
impl DerefMut for Scenario {
    fn deref_mut(&mut self) -> &mut TimeSeries {
        &mut self.ts
    }
}

impl Transactional for Scenario {
    fn run_mut(&mut self) -> &mut TimeSeries {
        &mut self.ts
    }
}

fn not_a_set<'a>(item: &'a str, set: &'a str) -> impl Fn(IxError) -> IxError + 'a {
    move |e| match e {
        IxError::NotFound(_) => IxError::dimensions(item, format!("'{}' is not a set", set)),
        other => other,
    }
}

impl Scenario {
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
    /// Starts a new run, checked out until its first commit.
    pub fn create(
        platform: &Platform,
        model: &str,
        scenario: &str,
        scheme: &str,
        annotation: &str,
    ) -> Result<Self> {
        Ok(Self {
            ts: TimeSeries::create(platform, model, scenario, scheme, annotation)?,
            scheme: scheme.to_string(),
            annotation: annotation.to_string(),
        })
    }
    /// Opens a committed version, or the default one when `version` is `None`.
    pub fn load(
        platform: &Platform,
        model: &str,
        scenario: &str,
        version: Option<i64>,
    ) -> Result<Self> {
        let run = platform.backend().get_run(model, scenario, version)?;
        Ok(Self {
            ts: TimeSeries::from_run(platform, &run),
            scheme: run.scheme,
            annotation: run.annotation,
        })
    }
    pub fn scheme(&self) -> &str {
        &self.scheme
    }
    pub fn annotation(&self) -> &str {
        &self.annotation
    }
    pub fn as_timeseries(&self) -> &TimeSeries {
        &self.ts
    }

    // ------------- Declarations -------------
    fn item(&self, name: &str) -> Result<ItemInfo> {
        self.ensure_alive()?;
        self.backend().item_info(self.run_id(), self.session(), name)
    }
    fn item_of(&self, name: &str, kind: ItemKind) -> Result<ItemInfo> {
        let info = self.item(name)?;
        if info.kind != kind {
            return Err(IxError::TypeError(format!(
                "'{}' is a {}, not a {}",
                name, info.kind, kind
            )));
        }
        Ok(info)
    }

    /// Declares an item. Index names default to the index set names and must
    /// be given when a set indexes more than one dimension.
    pub fn init_item(
        &mut self,
        kind: ItemKind,
        name: &str,
        idx_sets: &[&str],
        idx_names: Option<&[&str]>,
    ) -> Result<()> {
        self.ensure_writable(false)?;
        if name.is_empty() {
            return Err(IxError::TypeError("item names cannot be empty".to_string()));
        }
        match self.item(name) {
            Ok(existing) => {
                return Err(IxError::ItemExists {
                    name: name.to_string(),
                    kind: existing.kind,
                });
            }
            Err(IxError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let names: Vec<String> = match idx_names {
            Some(names) if names.len() != idx_sets.len() => {
                return Err(IxError::dimensions(
                    name,
                    format!(
                        "{} index names given for {} index sets",
                        names.len(),
                        idx_sets.len()
                    ),
                ));
            }
            Some(names) => names.iter().map(|n| n.to_string()).collect(),
            None => idx_sets.iter().map(|s| s.to_string()).collect(),
        };
        let distinct: HashSet<&String> = names.iter().collect();
        if distinct.len() != names.len() {
            return Err(IxError::dimensions(
                name,
                match idx_names {
                    Some(_) => "index names must be distinct",
                    None => "a repeated index set needs distinct index names",
                },
            ));
        }
        for set in idx_sets {
            if *set == name {
                return Err(IxError::dimensions(name, "an item cannot index itself"));
            }
            let index = self.item(set).map_err(not_a_set(name, set))?;
            if index.kind != ItemKind::Set {
                return Err(IxError::dimensions(
                    name,
                    format!("'{}' is a {}, not a set", set, index.kind),
                ));
            }
            if !index.idx_sets.is_empty() {
                return Err(IxError::dimensions(
                    name,
                    format!("index set '{}' is not one-dimensional", set),
                ));
            }
        }
        let info = ItemInfo {
            name: name.to_string(),
            kind,
            idx_sets: idx_sets.iter().map(|s| s.to_string()).collect(),
            idx_names: names,
        };
        self.backend().init_item(self.run_id(), self.session(), &info)?;
        debug!(run_id = self.run_id(), item = name, %kind, "declared item");
        Ok(())
    }
    pub fn init_set(
        &mut self,
        name: &str,
        idx_sets: &[&str],
        idx_names: Option<&[&str]>,
    ) -> Result<()> {
        self.init_item(ItemKind::Set, name, idx_sets, idx_names)
    }
    pub fn init_par(
        &mut self,
        name: &str,
        idx_sets: &[&str],
        idx_names: Option<&[&str]>,
    ) -> Result<()> {
        self.init_item(ItemKind::Parameter, name, idx_sets, idx_names)
    }
    pub fn init_var(
        &mut self,
        name: &str,
        idx_sets: &[&str],
        idx_names: Option<&[&str]>,
    ) -> Result<()> {
        self.init_item(ItemKind::Variable, name, idx_sets, idx_names)
    }
    pub fn init_equ(
        &mut self,
        name: &str,
        idx_sets: &[&str],
        idx_names: Option<&[&str]>,
    ) -> Result<()> {
        self.init_item(ItemKind::Equation, name, idx_sets, idx_names)
    }

    // ------------- Writing -------------
    fn members(&self, set: &str) -> Result<HashSet<String>> {
        Ok(self
            .backend()
            .item_get_elements(self.run_id(), self.session(), ItemKind::Set, set, &Filters::new())?
            .labels()
            .into_iter()
            .collect())
    }
    fn validate_keys<'k>(&self, info: &ItemInfo, keys: impl Iterator<Item = &'k Key>) -> Result<()> {
        let arity = info.dimensions().len();
        let mut members: HashMap<&str, HashSet<String>> = HashMap::new();
        for key in keys {
            if key.len() != arity {
                return Err(IxError::dimensions(
                    &info.name,
                    format!("key {} has {} labels, expected {}", key, key.len(), arity),
                ));
            }
            for (set, label) in info.idx_sets.iter().zip(key.iter()) {
                if !members.contains_key(set.as_str()) {
                    members.insert(set, self.members(set)?);
                }
                let known = members.get(set.as_str()).is_some_and(|m| m.contains(label));
                if !known {
                    return Err(IxError::NotFound(format!(
                        "'{}' is not a member of set '{}'",
                        label, set
                    )));
                }
            }
        }
        Ok(())
    }
    fn write(&self, access: WriteAccess, info: &ItemInfo, elements: Vec<Element>) -> Result<()> {
        if info.kind.is_solution() && access == WriteAccess::Caller {
            return Err(IxError::TypeError(format!(
                "{} '{}' holds solution data written by the solver only",
                info.kind, info.name
            )));
        }
        for element in &elements {
            let fits = matches!(
                (info.kind, &element.value),
                (ItemKind::Set, ElementValue::Member)
                    | (ItemKind::Parameter, ElementValue::Parameter { .. })
                    | (
                        ItemKind::Variable | ItemKind::Equation,
                        ElementValue::Solution { .. }
                    )
            );
            if !fits {
                return Err(IxError::TypeError(format!(
                    "element {} does not fit {} '{}'",
                    element, info.kind, info.name
                )));
            }
        }
        self.validate_keys(info, elements.iter().map(|e| &e.key))?;
        if access == WriteAccess::Caller {
            self.platform()
                .check_units(elements.iter().filter_map(Element::unit))?;
        }
        self.backend()
            .item_set_elements(self.run_id(), self.session(), info.kind, &info.name, &elements)
    }
    /// Adds elements to a set or parameter, overwriting the values of existing keys.
    pub fn add_elements(&mut self, name: &str, elements: Vec<Element>) -> Result<()> {
        self.ensure_writable(false)?;
        let info = self.item(name)?;
        self.write(WriteAccess::Caller, &info, elements)
    }
    pub fn add_set<K: Into<Key>>(
        &mut self,
        name: &str,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<()> {
        self.ensure_writable(false)?;
        let info = self.item_of(name, ItemKind::Set)?;
        let elements = keys.into_iter().map(Element::member).collect();
        self.write(WriteAccess::Caller, &info, elements)
    }
    pub fn add_par<K: Into<Key>, U: Into<String>>(
        &mut self,
        name: &str,
        rows: impl IntoIterator<Item = (K, f64, U)>,
    ) -> Result<()> {
        self.ensure_writable(false)?;
        let info = self.item_of(name, ItemKind::Parameter)?;
        let elements = rows
            .into_iter()
            .map(|(key, value, unit)| Element::parameter(key, value, unit))
            .collect();
        self.write(WriteAccess::Caller, &info, elements)
    }

    // ------------- Scalars -------------
    pub fn init_scalar(&mut self, name: &str, value: f64, unit: &str) -> Result<()> {
        self.ensure_writable(false)?;
        self.platform().check_units([unit])?;
        self.init_item(ItemKind::Parameter, name, &[], None)?;
        self.change_scalar(name, value, unit)
    }
    fn scalar_info(&self, name: &str) -> Result<ItemInfo> {
        let info = self.item_of(name, ItemKind::Parameter)?;
        if !info.is_scalar() {
            return Err(IxError::dimensions(name, "not a scalar"));
        }
        Ok(info)
    }
    pub fn scalar(&self, name: &str) -> Result<(f64, String)> {
        let info = self.scalar_info(name)?;
        let data = self.read(&info, &Filters::new())?;
        data.value(Key::scalar())
            .map(|(value, unit)| (value, unit.to_string()))
            .ok_or_else(|| IxError::NotFound(format!("value of scalar '{}'", name)))
    }
    pub fn change_scalar(&mut self, name: &str, value: f64, unit: &str) -> Result<()> {
        self.ensure_writable(false)?;
        let info = self.scalar_info(name)?;
        self.write(
            WriteAccess::Caller,
            &info,
            vec![Element::parameter(Key::scalar(), value, unit)],
        )
    }

    // ------------- Reading -------------
    fn read(&self, info: &ItemInfo, filters: &Filters) -> Result<ItemData> {
        let dimensions = info.dimensions();
        if let Some(unknown) = filters.dimensions().find(|d| !dimensions.contains(d)) {
            return Err(IxError::dimensions(
                &info.name,
                format!("no dimension named '{}'", unknown),
            ));
        }
        self.backend()
            .item_get_elements(self.run_id(), self.session(), info.kind, &info.name, filters)
    }
    /// Elements of any item, restricted by dimension name.
    pub fn get_elements(&self, name: &str, filters: &Filters) -> Result<ItemData> {
        let info = self.item(name)?;
        self.read(&info, filters)
    }
    pub fn set(&self, name: &str, filters: &Filters) -> Result<ItemData> {
        self.read(&self.item_of(name, ItemKind::Set)?, filters)
    }
    pub fn par(&self, name: &str, filters: &Filters) -> Result<ItemData> {
        self.read(&self.item_of(name, ItemKind::Parameter)?, filters)
    }
    pub fn var(&self, name: &str, filters: &Filters) -> Result<ItemData> {
        self.read(&self.item_of(name, ItemKind::Variable)?, filters)
    }
    pub fn equ(&self, name: &str, filters: &Filters) -> Result<ItemData> {
        self.read(&self.item_of(name, ItemKind::Equation)?, filters)
    }

    // ------------- Removing -------------
    /// Removes the given keys, or the whole item when `keys` is `None`.
    pub fn remove_elements(&mut self, name: &str, keys: Option<&[Key]>) -> Result<()> {
        self.ensure_writable(false)?;
        let info = self.item(name)?;
        self.remove(&info, keys)
    }
    pub fn remove_set(&mut self, name: &str, keys: Option<&[Key]>) -> Result<()> {
        self.ensure_writable(false)?;
        let info = self.item_of(name, ItemKind::Set)?;
        self.remove(&info, keys)
    }
    pub fn remove_par(&mut self, name: &str, keys: Option<&[Key]>) -> Result<()> {
        self.ensure_writable(false)?;
        let info = self.item_of(name, ItemKind::Parameter)?;
        self.remove(&info, keys)
    }
    fn remove(&self, info: &ItemInfo, keys: Option<&[Key]>) -> Result<()> {
        match keys {
            Some(_) if info.kind.is_solution() => Err(IxError::TypeError(format!(
                "{} '{}' holds solution data; use remove_solution",
                info.kind, info.name
            ))),
            Some(keys) => self.backend().item_delete_elements(
                self.run_id(),
                self.session(),
                info.kind,
                &info.name,
                keys,
            ),
            None => {
                if info.kind == ItemKind::Set {
                    let dependents: Vec<String> = self
                        .backend()
                        .list_items(self.run_id(), self.session(), None)?
                        .into_iter()
                        .filter(|i| i.idx_sets.contains(&info.name))
                        .map(|i| i.name)
                        .collect();
                    if !dependents.is_empty() {
                        return Err(IxError::dimensions(
                            &info.name,
                            format!("still an index set of {}", dependents.join(", ")),
                        ));
                    }
                }
                self.backend()
                    .delete_item(self.run_id(), self.session(), info.kind, &info.name)
            }
        }
    }

    // ------------- Queries -------------
    pub fn has_item(&self, name: &str) -> Result<bool> {
        match self.item(name) {
            Ok(_) => Ok(true),
            Err(IxError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
    fn has_kind(&self, name: &str, kind: ItemKind) -> Result<bool> {
        match self.item(name) {
            Ok(info) => Ok(info.kind == kind),
            Err(IxError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
    pub fn has_set(&self, name: &str) -> Result<bool> {
        self.has_kind(name, ItemKind::Set)
    }
    pub fn has_par(&self, name: &str) -> Result<bool> {
        self.has_kind(name, ItemKind::Parameter)
    }
    pub fn has_var(&self, name: &str) -> Result<bool> {
        self.has_kind(name, ItemKind::Variable)
    }
    pub fn has_equ(&self, name: &str) -> Result<bool> {
        self.has_kind(name, ItemKind::Equation)
    }
    /// Names of the items of one kind in declaration order.
    pub fn item_list(&self, kind: ItemKind) -> Result<Vec<String>> {
        self.ensure_alive()?;
        Ok(self
            .backend()
            .list_items(self.run_id(), self.session(), Some(kind))?
            .into_iter()
            .map(|i| i.name)
            .collect())
    }
    pub fn set_list(&self) -> Result<Vec<String>> {
        self.item_list(ItemKind::Set)
    }
    pub fn par_list(&self) -> Result<Vec<String>> {
        self.item_list(ItemKind::Parameter)
    }
    pub fn var_list(&self) -> Result<Vec<String>> {
        self.item_list(ItemKind::Variable)
    }
    pub fn equ_list(&self) -> Result<Vec<String>> {
        self.item_list(ItemKind::Equation)
    }
    pub fn idx_sets(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.item(name)?.idx_sets)
    }
    pub fn idx_names(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.item(name)?.idx_names)
    }
    /// Distinct labels appearing along one dimension of an item.
    pub fn item_index(&self, name: &str, dimension: &str) -> Result<Vec<String>> {
        let info = self.item(name)?;
        let position = info.position(dimension).ok_or_else(|| {
            IxError::dimensions(name, format!("no dimension named '{}'", dimension))
        })?;
        match self
            .backend()
            .item_index(self.run_id(), self.session(), info.kind, name, position)
        {
            Err(e) if e.is_not_implemented() => {
                Ok(self.read(&info, &Filters::new())?.index(position))
            }
            other => other,
        }
    }

    // ------------- Solution -------------
    /// Replaces the elements of the variables and equations in `solution`.
    pub fn write_solution(&mut self, solution: &Solution) -> Result<()> {
        self.ensure_writable(false)?;
        for (name, elements) in &solution.items {
            let info = self.item(name)?;
            if !info.kind.is_solution() {
                return Err(IxError::TypeError(format!(
                    "{} '{}' cannot hold solution data",
                    info.kind, name
                )));
            }
            let existing: Vec<Key> = self
                .backend()
                .item_get_elements(self.run_id(), self.session(), info.kind, name, &Filters::new())?
                .elements
                .into_iter()
                .map(|e| e.key)
                .collect();
            if !existing.is_empty() {
                self.backend().item_delete_elements(
                    self.run_id(),
                    self.session(),
                    info.kind,
                    name,
                    &existing,
                )?;
            }
            self.write(WriteAccess::Solver, &info, elements.clone())?;
        }
        info!(run_id = self.run_id(), items = solution.len(), "wrote solution");
        Ok(())
    }
    pub fn has_solution(&self) -> Result<bool> {
        self.ensure_alive()?;
        self.backend().has_solution(self.run_id(), self.session())
    }
    /// Empties all variables and equations and drops model time series from
    /// `first_model_year` on, or entirely when no year is given.
    pub fn remove_solution(&mut self, first_model_year: Option<i32>) -> Result<()> {
        self.ensure_writable(false)?;
        self.backend().clear_solution(self.run_id(), self.session())?;
        self.ts.remove_model_timeseries(first_model_year)?;
        info!(run_id = self.run_id(), ?first_model_year, "removed solution");
        Ok(())
    }

    // ------------- Cloning -------------
    /// Copies this scenario into a new committed run, possibly on another platform.
    ///
    /// Only the generic backend contract is used, so source and destination
    /// may run different engines. Units, regions and time slices the data
    /// refers to are registered on a foreign destination first.
    pub fn clone_with(&self, options: CloneOptions) -> Result<Scenario> {
        self.ensure_alive()?;
        let source = self.platform();
        let destination = options.platform.clone().unwrap_or_else(|| source.clone());
        let keep_solution = options.keep_solution && options.shift_first_model_year.is_none();

        let mut contents = Vec::new();
        for info in self.backend().list_items(self.run_id(), self.session(), None)? {
            if info.kind.is_solution() && !keep_solution {
                contents.push(ItemData::new(info));
            } else {
                contents.push(self.read(&info, &Filters::new())?);
            }
        }
        let mut rows = self.timeseries(&TsFilters::new())?;
        if !keep_solution {
            let first = options.shift_first_model_year;
            rows.retain(|r| r.meta || first.is_some_and(|y| r.year < y));
        }
        let geodata = match self.geodata(&TsFilters::new()) {
            Ok(geodata) => geodata,
            Err(e) if e.is_not_implemented() => Vec::new(),
            Err(e) => return Err(e),
        };

        if !destination.same_as(source) {
            let units: BTreeSet<&str> = contents
                .iter()
                .flat_map(|d| d.elements.iter().filter_map(Element::unit))
                .chain(rows.iter().map(|r| r.key.unit.as_str()))
                .chain(geodata.iter().map(|r| r.key.unit.as_str()))
                .collect();
            let regions = rows
                .iter()
                .map(|r| &r.key)
                .chain(geodata.iter().map(|r| &r.key));
            let timeslices = regions.clone().map(|k| k.subannual.as_str());
            destination.import_identifiers(source, IdentifierKind::Unit, units)?;
            destination.import_identifiers(
                source,
                IdentifierKind::Region,
                regions.map(|k| k.region.as_str()),
            )?;
            destination.import_identifiers(source, IdentifierKind::Timeslice, timeslices)?;
        }

        let model = options.model.as_deref().unwrap_or(self.model());
        let scenario = options.scenario.as_deref().unwrap_or(self.scenario());
        let annotation = options.annotation.as_deref().unwrap_or(&self.annotation);
        let mut target = Scenario::create(&destination, model, scenario, &self.scheme, annotation)?;
        let copied = (|| -> Result<()> {
            let backend = target.backend();
            for data in &contents {
                backend.init_item(target.run_id(), target.session(), &data.info)?;
                if !data.is_empty() {
                    backend.item_set_elements(
                        target.run_id(),
                        target.session(),
                        data.info.kind,
                        &data.info.name,
                        &data.elements,
                    )?;
                }
            }
            if !rows.is_empty() {
                backend.set_data(target.run_id(), target.session(), &rows)?;
            }
            if !geodata.is_empty() {
                backend.set_geo(target.run_id(), target.session(), &geodata)?;
            }
            Ok(())
        })();
        if let Err(e) = copied {
            // the half-built target is of no use to anyone
            if let Err(failed) = target.delete() {
                warn!(run_id = target.run_id(), error = %failed, "dropping partial clone failed");
            }
            return Err(e);
        }
        let version = self
            .version()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "new".to_string());
        target.commit(&format!(
            "clone of {}/{} version {}",
            self.model(),
            self.scenario(),
            version
        ))?;
        info!(
            source = self.run_id(),
            target = target.run_id(),
            keep_solution,
            "cloned scenario"
        );
        Ok(target)
    }

    // ------------- Tables -------------
    /// Every item as a table, split at [`MAX_ROWS`], after a table of item kinds.
    pub fn to_tables(&self) -> Result<Vec<Table>> {
        self.ensure_alive()?;
        let items = self.backend().list_items(self.run_id(), self.session(), None)?;
        let mut tables = vec![Table::type_mapping(&items)];
        for info in &items {
            let data = self.read(info, &Filters::new())?;
            tables.extend(Table::from_item(&data).split(MAX_ROWS));
        }
        Ok(tables)
    }
    /// Reads tables written by [`Scenario::to_tables`] or shaped like them.
    ///
    /// Sets go first, then parameters, then solution data. An undeclared
    /// item is declared with its columns as index sets, which only works
    /// when every column names an existing set and no set repeats.
    pub fn read_tables(&mut self, tables: &[Table], options: &ReadOptions) -> Result<()> {
        self.ensure_writable(false)?;
        let tables = Table::merge(tables)?;
        let kinds: BTreeMap<String, ItemKind> = match tables.iter().find(|t| t.name == TYPE_MAPPING)
        {
            Some(mapping) => mapping.read_type_mapping()?,
            None => BTreeMap::new(),
        };
        let mut ordered: Vec<(&Table, ItemKind)> = Vec::new();
        for table in tables.iter().filter(|t| t.name != TYPE_MAPPING) {
            let kind = match kinds.get(&table.name) {
                Some(kind) => *kind,
                None => match self.item(&table.name) {
                    Ok(info) => info.kind,
                    Err(IxError::NotFound(_)) => {
                        return Err(IxError::TypeError(format!(
                            "no item kind known for table '{}'",
                            table.name
                        )));
                    }
                    Err(e) => return Err(e),
                },
            };
            ordered.push((table, kind));
        }
        ordered.sort_by_key(|(table, kind)| match kind {
            ItemKind::Set if table.columns == [table.name.clone()] => 0,
            ItemKind::Set => 1,
            ItemKind::Parameter => 2,
            ItemKind::Variable | ItemKind::Equation => 3,
        });

        if options.add_units {
            let known = self.platform().units()?;
            for (table, _) in ordered.iter().filter(|(_, k)| *k == ItemKind::Parameter) {
                if let Some(position) = table.column("unit") {
                    let units: BTreeSet<String> = table
                        .rows
                        .iter()
                        .filter_map(|row| row.get(position).map(|c| c.as_text()))
                        .filter(|unit| !known.contains(unit))
                        .collect();
                    for unit in units {
                        self.platform().add(&Unit::new(unit, ""))?;
                    }
                }
            }
        }

        let mut solution = Solution::new();
        for (table, kind) in ordered {
            let info = match self.item(&table.name) {
                Ok(info) if info.kind != kind => {
                    return Err(IxError::TypeError(format!(
                        "table '{}' holds a {} but the item is a {}",
                        table.name, kind, info.kind
                    )));
                }
                Ok(info) => info,
                Err(IxError::NotFound(_)) if options.init_items => {
                    let dimensions = table.dimension_columns(kind);
                    let idx_sets: Vec<&str> =
                        if kind == ItemKind::Set && dimensions == [table.name.clone()] {
                            Vec::new()
                        } else {
                            dimensions.iter().map(String::as_str).collect()
                        };
                    self.init_item(kind, &table.name, &idx_sets, None)?;
                    self.item(&table.name)?
                }
                Err(e) => return Err(e),
            };
            let elements = table.to_elements(&info)?;
            if elements.is_empty() {
                continue;
            }
            if kind.is_solution() {
                solution.insert(&info.name, elements);
            } else {
                self.write(WriteAccess::Caller, &info, elements)?;
            }
        }
        if !solution.is_empty() {
            self.write_solution(&solution)?;
        }
        info!(run_id = self.run_id(), tables = tables.len(), "read tables");
        Ok(())
    }
}
