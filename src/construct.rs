//! Identity constructs shared by the entity layer and every backend.
//!
//! Everything here is plain data: a backend receives and returns these values
//! and never sees a [`crate::platform::Platform`] or a [`crate::scenario::Scenario`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datatype::{Element, ElementValue, Key};
use crate::error::{IxError, Result};
use crate::filter::Filters;

// ------------- Run -------------
/// Storage-assigned identifier, 1:1 with a (model, scenario, version) triple.
pub type RunId = i64;

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub model: String,
    pub scenario: String,
    /// `None` until the first commit of a 'new' instance.
    pub version: Option<i64>,
    pub scheme: String,
    pub annotation: String,
    pub is_default: bool,
    pub is_locked: bool,
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct CommitInfo {
    pub version: i64,
    pub comment: String,
    pub session: String,
    pub committed_at: DateTime<Utc>,
}

// ------------- Item -------------
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Set,
    Parameter,
    Variable,
    Equation,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [Self::Set, Self::Parameter, Self::Variable, Self::Equation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Parameter => "par",
            Self::Variable => "var",
            Self::Equation => "equ",
        }
    }
    /// Variables and equations hold solution data written by the solver path only.
    pub fn is_solution(&self) -> bool {
        matches!(self, Self::Variable | Self::Equation)
    }
}
impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Set => "set",
            Self::Parameter => "parameter",
            Self::Variable => "variable",
            Self::Equation => "equation",
        };
        write!(f, "{}", name)
    }
}
impl FromStr for ItemKind {
    type Err = IxError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "set" => Ok(Self::Set),
            "par" | "parameter" => Ok(Self::Parameter),
            "var" | "variable" => Ok(Self::Variable),
            "equ" | "equation" => Ok(Self::Equation),
            other => Err(IxError::TypeError(format!("unknown item kind '{}'", other))),
        }
    }
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct ItemInfo {
    pub name: String,
    pub kind: ItemKind,
    pub idx_sets: Vec<String>,
    /// Same length as `idx_sets`; preserves declaration order exactly.
    pub idx_names: Vec<String>,
}

impl ItemInfo {
    /// Names of the dimensions an element key is laid out along.
    ///
    /// A set without index sets is a flat collection of labels and has one
    /// dimension named after itself; other arity-0 items are scalars.
    pub fn dimensions(&self) -> Vec<String> {
        if self.idx_sets.is_empty() && self.kind == ItemKind::Set {
            vec![self.name.clone()]
        } else {
            self.idx_names.clone()
        }
    }
    pub fn is_scalar(&self) -> bool {
        self.idx_sets.is_empty() && self.kind != ItemKind::Set
    }
    pub fn position(&self, dimension: &str) -> Option<usize> {
        self.dimensions().iter().position(|d| d == dimension)
    }
}

/// The element collection of one item, in insertion order with unique keys.
#[derive(PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct ItemData {
    pub info: ItemInfo,
    pub elements: Vec<Element>,
}

impl ItemData {
    pub fn new(info: ItemInfo) -> Self {
        Self {
            info,
            elements: Vec::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.elements.len()
    }
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.elements.iter().map(|e| &e.key)
    }
    pub fn get(&self, key: &Key) -> Option<&Element> {
        self.elements.iter().find(|e| &e.key == key)
    }
    pub fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }
    /// Value and unit of a parameter element.
    pub fn value(&self, key: impl Into<Key>) -> Option<(f64, &str)> {
        match self.get(&key.into()).map(|e| &e.value) {
            Some(ElementValue::Parameter { value, unit }) => Some((*value, unit.as_str())),
            _ => None,
        }
    }
    /// Level and marginal of a variable or equation element.
    pub fn level(&self, key: impl Into<Key>) -> Option<(f64, f64)> {
        match self.get(&key.into()).map(|e| &e.value) {
            Some(ElementValue::Solution { level, marginal }) => Some((*level, *marginal)),
            _ => None,
        }
    }
    /// All the labels of one-dimensional set members, in order.
    pub fn labels(&self) -> Vec<String> {
        self.elements
            .iter()
            .filter_map(|e| e.key.first().cloned())
            .collect()
    }
    /// Copy restricted to elements allowed by `filters`.
    pub fn filtered(&self, filters: &Filters) -> ItemData {
        if filters.is_empty() {
            return self.clone();
        }
        let dimensions = self.info.dimensions();
        let allowed: Vec<(usize, HashSet<&str>)> = dimensions
            .iter()
            .enumerate()
            .filter_map(|(position, dimension)| {
                filters
                    .get(dimension)
                    .map(|labels| (position, labels.iter().map(String::as_str).collect()))
            })
            .collect();
        ItemData {
            info: self.info.clone(),
            elements: self
                .elements
                .iter()
                .filter(|e| {
                    allowed.iter().all(|(position, labels)| {
                        e.key
                            .get(*position)
                            .map(|label| labels.contains(label.as_str()))
                            .unwrap_or(false)
                    })
                })
                .cloned()
                .collect(),
        }
    }
    /// Distinct labels observed at one key position, in order of first appearance.
    pub fn index(&self, position: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        self.elements
            .iter()
            .filter_map(|e| e.key.get(position))
            .filter(|label| seen.insert(label.as_str()))
            .cloned()
            .collect()
    }
}

// ------------- Identifier -------------
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Model,
    Scenario,
    Unit,
    Region,
    Timeslice,
}

impl IdentifierKind {
    /// Registries whose attributes take part in identity.
    pub fn has_identity_attributes(&self) -> bool {
        matches!(self, Self::Unit | Self::Region)
    }
}
impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Model => "model",
            Self::Scenario => "scenario",
            Self::Unit => "unit",
            Self::Region => "region",
            Self::Timeslice => "timeslice",
        };
        write!(f, "{}", name)
    }
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl Identifier {
    pub fn new(kind: IdentifierKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }
    pub fn with(mut self, attribute: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(attribute.to_string(), value.into());
        self
    }
    pub fn attribute(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }
}
