use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::construct::RunInfo;
use crate::datatype::Observation;
use crate::error::{IxError, Result};

/// Allow-lists of labels keyed by dimension name. An empty filter allows everything.
#[derive(PartialEq, Eq, Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, Vec<String>>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with<I, S>(mut self, dimension: &str, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .insert(dimension.to_string(), labels.into_iter().map(Into::into).collect());
        self
    }
    pub fn get(&self, dimension: &str) -> Option<&Vec<String>> {
        self.0.get(dimension)
    }
    pub fn dimensions(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Translates a pattern where `*` matches any run of characters.
pub fn glob(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped))
        .map_err(|e| IxError::TypeError(format!("bad pattern '{}': {}", pattern, e)))
}

fn any_glob(patterns: &[Regex], text: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p.is_match(text))
}

fn any_eq<T: PartialEq>(allowed: &[T], value: &T) -> bool {
    allowed.is_empty() || allowed.contains(value)
}

/// Selection over time series or geodata. Empty lists allow everything;
/// `variables` accepts `*` patterns.
#[derive(PartialEq, Eq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct TsFilters {
    pub regions: Vec<String>,
    pub variables: Vec<String>,
    pub units: Vec<String>,
    pub subannual: Vec<String>,
    pub years: Vec<i32>,
    pub meta: Option<bool>,
}

impl TsFilters {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn regions<S: Into<String>>(mut self, regions: impl IntoIterator<Item = S>) -> Self {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }
    pub fn variables<S: Into<String>>(mut self, variables: impl IntoIterator<Item = S>) -> Self {
        self.variables = variables.into_iter().map(Into::into).collect();
        self
    }
    pub fn units<S: Into<String>>(mut self, units: impl IntoIterator<Item = S>) -> Self {
        self.units = units.into_iter().map(Into::into).collect();
        self
    }
    pub fn years(mut self, years: impl IntoIterator<Item = i32>) -> Self {
        self.years = years.into_iter().collect();
        self
    }
    pub fn meta(mut self, meta: bool) -> Self {
        self.meta = Some(meta);
        self
    }
    /// Compiles the filter once for repeated matching.
    pub fn matcher(&self) -> Result<TsMatcher<'_>> {
        Ok(TsMatcher {
            filters: self,
            variables: self
                .variables
                .iter()
                .map(|v| glob(v))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

pub struct TsMatcher<'f> {
    filters: &'f TsFilters,
    variables: Vec<Regex>,
}

impl TsMatcher<'_> {
    pub fn matches<V>(&self, observation: &Observation<V>) -> bool {
        let f = self.filters;
        any_eq(&f.regions, &observation.key.region)
            && any_glob(&self.variables, &observation.key.variable)
            && any_eq(&f.units, &observation.key.unit)
            && any_eq(&f.subannual, &observation.key.subannual)
            && any_eq(&f.years, &observation.year)
            && f.meta.map(|m| m == observation.meta).unwrap_or(true)
    }
}

/// Selection over runs when listing scenarios; `model` and `scenario` accept `*` patterns.
#[derive(PartialEq, Eq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunFilter {
    pub model: Option<String>,
    pub scenario: Option<String>,
    pub default_only: bool,
}

impl RunFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn model(mut self, pattern: impl Into<String>) -> Self {
        self.model = Some(pattern.into());
        self
    }
    pub fn scenario(mut self, pattern: impl Into<String>) -> Self {
        self.scenario = Some(pattern.into());
        self
    }
    pub fn default_only(mut self) -> Self {
        self.default_only = true;
        self
    }
    /// Keeps committed runs that match, ordered by model, scenario and version.
    pub fn apply(&self, runs: impl IntoIterator<Item = RunInfo>) -> Result<Vec<RunInfo>> {
        let model = self.model.as_deref().map(glob).transpose()?;
        let scenario = self.scenario.as_deref().map(glob).transpose()?;
        let mut kept: Vec<RunInfo> = runs
            .into_iter()
            .filter(|r| r.version.is_some())
            .filter(|r| !self.default_only || r.is_default)
            .filter(|r| model.as_ref().map(|m| m.is_match(&r.model)).unwrap_or(true))
            .filter(|r| {
                scenario
                    .as_ref()
                    .map(|s| s.is_match(&r.scenario))
                    .unwrap_or(true)
            })
            .collect();
        kept.sort_by(|a, b| {
            (&a.model, &a.scenario, a.version).cmp(&(&b.model, &b.scenario, b.version))
        });
        Ok(kept)
    }
}
