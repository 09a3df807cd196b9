//! Typed views over the identifier registries kept by a backend.

use std::fmt;
use std::sync::Arc;

use crate::construct::{Identifier, IdentifierKind};
use crate::error::{IxError, Result};

pub trait Named {
    fn name(&self) -> &str;
}

impl Named for String {
    fn name(&self) -> &str {
        self
    }
}

/// A registry entry that maps to and from an [`Identifier`].
pub trait Registered: Named + Sized {
    const KIND: IdentifierKind;
    fn to_identifier(&self) -> Identifier;
    fn from_identifier(identifier: &Identifier) -> Result<Self>;
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Unit {
    pub name: String,
    pub comment: String,
}

impl Unit {
    pub fn new(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: comment.into(),
        }
    }
}
impl Named for Unit {
    fn name(&self) -> &str {
        &self.name
    }
}
impl Registered for Unit {
    const KIND: IdentifierKind = IdentifierKind::Unit;
    fn to_identifier(&self) -> Identifier {
        Identifier::new(Self::KIND, &self.name).with("comment", &self.comment)
    }
    fn from_identifier(identifier: &Identifier) -> Result<Self> {
        Ok(Self::new(
            &identifier.name,
            identifier.attribute("comment").unwrap_or_default(),
        ))
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Region {
    pub name: String,
    pub hierarchy: String,
    pub parent: Option<String>,
}

impl Region {
    pub fn new(name: impl Into<String>, hierarchy: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hierarchy: hierarchy.into(),
            parent: None,
        }
    }
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}
impl Named for Region {
    fn name(&self) -> &str {
        &self.name
    }
}
impl Registered for Region {
    const KIND: IdentifierKind = IdentifierKind::Region;
    fn to_identifier(&self) -> Identifier {
        let identifier = Identifier::new(Self::KIND, &self.name).with("hierarchy", &self.hierarchy);
        match &self.parent {
            Some(parent) => identifier.with("parent", parent),
            None => identifier,
        }
    }
    fn from_identifier(identifier: &Identifier) -> Result<Self> {
        Ok(Self {
            name: identifier.name.clone(),
            hierarchy: identifier
                .attribute("hierarchy")
                .unwrap_or_default()
                .to_string(),
            parent: identifier.attribute("parent").map(String::from),
        })
    }
}

/// A sub-annual time slice such as a season or a month.
#[derive(PartialEq, Clone, Debug)]
pub struct Timeslice {
    pub name: String,
    pub category: String,
    /// Share of the year covered.
    pub duration: f64,
}

impl Timeslice {
    pub fn new(name: impl Into<String>, category: impl Into<String>, duration: f64) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            duration,
        }
    }
}
impl Named for Timeslice {
    fn name(&self) -> &str {
        &self.name
    }
}
impl Registered for Timeslice {
    const KIND: IdentifierKind = IdentifierKind::Timeslice;
    fn to_identifier(&self) -> Identifier {
        Identifier::new(Self::KIND, &self.name)
            .with("category", &self.category)
            .with("duration", self.duration.to_string())
    }
    fn from_identifier(identifier: &Identifier) -> Result<Self> {
        let duration = identifier.attribute("duration").unwrap_or("1");
        Ok(Self {
            name: identifier.name.clone(),
            category: identifier
                .attribute("category")
                .unwrap_or_default()
                .to_string(),
            duration: duration.parse().map_err(|_| IxError::DataCorruption {
                message: format!("timeslice '{}' has duration '{}'", identifier.name, duration),
            })?,
        })
    }
}

/// A snapshot of one registry in insertion order. Iterating is finite and can
/// be restarted any number of times; clones share the same entries.
#[derive(Clone, Debug)]
pub struct Identifiers<T> {
    entries: Arc<[T]>,
}

impl<T: Named> Identifiers<T> {
    pub fn new(entries: Vec<T>) -> Self {
        Self {
            entries: entries.into(),
        }
    }
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name() == name)
    }
    pub fn get(&self, name: &str) -> Result<&T> {
        self.entries
            .iter()
            .find(|e| e.name() == name)
            .ok_or_else(|| IxError::NotFound(name.to_string()))
    }
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(Named::name).collect()
    }
}

impl<'a, T> IntoIterator for &'a Identifiers<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<T: Named> fmt::Display for Identifiers<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}
