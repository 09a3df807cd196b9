// used when exchanging values with a backend and when persisting them as JSON
use serde::{Deserialize, Serialize};

// used to print out readable forms of a data type
use std::fmt;
use std::ops;

use crate::error::{IxError, Result};

// ------------- Key -------------
/// The tuple of labels identifying one element of an item, one label per dimension.
/// One-dimensional sets use a single label; scalars use the empty key.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<String>);

impl Key {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }
    pub fn scalar() -> Self {
        Self(Vec::new())
    }
    pub fn labels(&self) -> &[String] {
        &self.0
    }
    pub fn into_labels(self) -> Vec<String> {
        self.0
    }
    /// Text form used as the storage column for keys.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }
}
impl ops::Deref for Key {
    type Target = [String];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl From<&str> for Key {
    fn from(label: &str) -> Self {
        Self(vec![label.to_string()])
    }
}
impl From<String> for Key {
    fn from(label: String) -> Self {
        Self(vec![label])
    }
}
impl From<Vec<String>> for Key {
    fn from(labels: Vec<String>) -> Self {
        Self(labels)
    }
}
impl From<Vec<&str>> for Key {
    fn from(labels: Vec<&str>) -> Self {
        Self(labels.into_iter().map(String::from).collect())
    }
}
impl<const N: usize> From<[&str; N]> for Key {
    fn from(labels: [&str; N]) -> Self {
        Self(labels.iter().map(|l| l.to_string()).collect())
    }
}
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

// ------------- Element -------------
#[derive(PartialEq, Clone, Debug, Serialize, Deserialize)]
pub enum ElementValue {
    /// Set membership carries no value.
    Member,
    Parameter { value: f64, unit: String },
    Solution { level: f64, marginal: f64 },
}

#[derive(PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct Element {
    pub key: Key,
    pub value: ElementValue,
}

impl Element {
    pub fn member(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            value: ElementValue::Member,
        }
    }
    pub fn parameter(key: impl Into<Key>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: ElementValue::Parameter {
                value,
                unit: unit.into(),
            },
        }
    }
    pub fn solution(key: impl Into<Key>, level: f64, marginal: f64) -> Self {
        Self {
            key: key.into(),
            value: ElementValue::Solution { level, marginal },
        }
    }
    pub fn unit(&self) -> Option<&str> {
        match &self.value {
            ElementValue::Parameter { unit, .. } => Some(unit),
            _ => None,
        }
    }
}
impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.value {
            ElementValue::Member => write!(f, "{}", self.key),
            ElementValue::Parameter { value, unit } => {
                write!(f, "{} = {} [{}]", self.key, value, unit)
            }
            ElementValue::Solution { level, marginal } => {
                write!(f, "{} = {} ({})", self.key, level, marginal)
            }
        }
    }
}

// ------------- Time series -------------
/// Identifies one series within the time series data of a run.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct SeriesKey {
    pub region: String,
    pub variable: String,
    pub unit: String,
    pub subannual: String,
}

pub const DEFAULT_SUBANNUAL: &str = "Year";

impl SeriesKey {
    pub fn new(
        region: impl Into<String>,
        variable: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            variable: variable.into(),
            unit: unit.into(),
            subannual: DEFAULT_SUBANNUAL.to_string(),
        }
    }
    pub fn with_subannual(mut self, subannual: impl Into<String>) -> Self {
        self.subannual = subannual.into();
        self
    }
}

/// A single yearly data point; numeric for time series, text for geodata.
#[derive(PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct Observation<V> {
    pub key: SeriesKey,
    pub year: i32,
    pub value: V,
    pub meta: bool,
}

pub type TsRow = Observation<f64>;
pub type GeoRow = Observation<String>;

impl<V> Observation<V> {
    pub fn new(key: SeriesKey, year: i32, value: V) -> Self {
        Self {
            key,
            year,
            value,
            meta: false,
        }
    }
    pub fn as_meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

// ------------- Meta -------------
/// The identity a meta entry is attached to.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug, Serialize, Deserialize)]
pub enum MetaTarget {
    Run {
        model: String,
        scenario: String,
        version: i64,
    },
    ModelScenario {
        model: String,
        scenario: String,
    },
    Model(String),
    Scenario(String),
}

impl MetaTarget {
    pub fn granularity(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::ModelScenario { .. } => "model_scenario",
            Self::Model(_) => "model",
            Self::Scenario(_) => "scenario",
        }
    }
    /// Flattened (model, scenario, version) columns, with empty text and 0 for the unused parts.
    pub fn columns(&self) -> (&str, &str, i64) {
        match self {
            Self::Run {
                model,
                scenario,
                version,
            } => (model, scenario, *version),
            Self::ModelScenario { model, scenario } => (model, scenario, 0),
            Self::Model(model) => (model, "", 0),
            Self::Scenario(scenario) => ("", scenario, 0),
        }
    }
}

#[derive(PartialEq, Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<MetaValue>),
}

impl MetaValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
        }
    }
    /// Lists must be flat and hold values of a single type.
    pub fn validate(&self) -> Result<()> {
        if let Self::List(values) = self {
            if let Some(first) = values.first() {
                for value in values {
                    if matches!(value, Self::List(_)) {
                        return Err(IxError::TypeError(
                            "meta lists cannot be nested".to_string(),
                        ));
                    }
                    if value.type_name() != first.type_name() {
                        return Err(IxError::TypeError(format!(
                            "meta list mixes {} and {}",
                            first.type_name(),
                            value.type_name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}
impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}
impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}
impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}
impl<T: Into<MetaValue>> From<Vec<T>> for MetaValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}
