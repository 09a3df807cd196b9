//! Flat tables for exchanging item data with spreadsheet-like files.
//!
//! An item becomes one table whose columns are its dimension names followed by
//! `value`/`unit` (parameters) or `lvl`/`mrg` (variables and equations).
//! Tables longer than a single sheet allows are split into parts named
//! `name`, `name(2)`, `name(3)`, ... and merged again on reading. The kind of
//! every item travels in a separate [`TYPE_MAPPING`] table.
//!
//! When two dimensions share an index set only their names tell them apart,
//! so such an item has to be declared before its table is read back.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::construct::{ItemData, ItemInfo, ItemKind};
use crate::datatype::{Element, ElementValue, Key};
use crate::error::{IxError, Result};

/// Rows of one worksheet, less the header row.
pub const MAX_ROWS: usize = 1_048_575;
pub const TYPE_MAPPING: &str = "ix_type_mapping";

#[derive(PartialEq, Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn as_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(t) => t.clone(),
        }
    }
    pub fn as_number(&self) -> Result<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(t) => t
                .trim()
                .parse()
                .map_err(|_| IxError::TypeError(format!("'{}' is not a number", t))),
        }
    }
}
impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}
impl From<&str> for Cell {
    fn from(t: &str) -> Self {
        Self::Text(t.to_string())
    }
}
impl From<String> for Cell {
    fn from(t: String) -> Self {
        Self::Text(t)
    }
}
impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

fn value_columns(kind: ItemKind) -> &'static [&'static str] {
    match kind {
        ItemKind::Set => &[],
        ItemKind::Parameter => &["value", "unit"],
        ItemKind::Variable | ItemKind::Equation => &["lvl", "mrg"],
    }
}

#[derive(PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<S: Into<String>>(name: &str, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }
    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn from_item(data: &ItemData) -> Self {
        let kind = data.info.kind;
        let mut columns = data.info.dimensions();
        columns.extend(value_columns(kind).iter().map(|c| c.to_string()));
        let mut table = Self::new(&data.info.name, columns);
        for element in &data.elements {
            let mut row: Vec<Cell> = element.key.iter().map(|l| Cell::from(l.as_str())).collect();
            match &element.value {
                ElementValue::Member => {}
                ElementValue::Parameter { value, unit } => {
                    row.push(Cell::Number(*value));
                    row.push(Cell::from(unit.as_str()));
                }
                ElementValue::Solution { level, marginal } => {
                    row.push(Cell::Number(*level));
                    row.push(Cell::Number(*marginal));
                }
            }
            table.push_row(row);
        }
        table
    }

    pub fn type_mapping(items: &[ItemInfo]) -> Self {
        let mut table = Self::new(TYPE_MAPPING, ["item", "ix_type"]);
        for info in items {
            table.push_row(vec![
                Cell::from(info.name.as_str()),
                Cell::from(info.kind.as_str()),
            ]);
        }
        table
    }
    /// Item kinds listed in a type mapping table.
    pub fn read_type_mapping(&self) -> Result<BTreeMap<String, ItemKind>> {
        let (item, kind) = match (self.column("item"), self.column("ix_type")) {
            (Some(item), Some(kind)) => (item, kind),
            _ => {
                return Err(IxError::dimensions(
                    &self.name,
                    "expected columns 'item' and 'ix_type'",
                ));
            }
        };
        let mut kinds = BTreeMap::new();
        for row in &self.rows {
            match (row.get(item), row.get(kind)) {
                (Some(name), Some(k)) => {
                    kinds.insert(name.as_text(), k.as_text().parse()?);
                }
                _ => return Err(IxError::dimensions(&self.name, "short row")),
            }
        }
        Ok(kinds)
    }

    /// Parts of at most `max_rows` rows each; an empty table stays one part.
    pub fn split(&self, max_rows: usize) -> Vec<Table> {
        let max_rows = max_rows.max(1);
        if self.rows.len() <= max_rows {
            return vec![self.clone()];
        }
        self.rows
            .chunks(max_rows)
            .enumerate()
            .map(|(i, rows)| Table {
                name: if i == 0 {
                    self.name.clone()
                } else {
                    format!("{}({})", self.name, i + 1)
                },
                columns: self.columns.clone(),
                rows: rows.to_vec(),
            })
            .collect()
    }
    /// The table name a part belongs to: `name(3)` gives `name`.
    pub fn base_name(part: &str) -> &str {
        if let Some(stripped) = part.strip_suffix(')') {
            if let Some(open) = stripped.rfind('(') {
                let number = &stripped[open + 1..];
                if !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()) {
                    return &stripped[..open];
                }
            }
        }
        part
    }
    /// Joins split parts back together, keeping the order of first appearance.
    pub fn merge(tables: &[Table]) -> Result<Vec<Table>> {
        let mut merged: Vec<Table> = Vec::new();
        for table in tables {
            let base = Self::base_name(&table.name);
            match merged.iter_mut().find(|t| t.name == base) {
                Some(existing) => {
                    if existing.columns != table.columns {
                        return Err(IxError::dimensions(
                            base,
                            format!("part '{}' has different columns", table.name),
                        ));
                    }
                    existing.rows.extend(table.rows.iter().cloned());
                }
                None => merged.push(Table {
                    name: base.to_string(),
                    columns: table.columns.clone(),
                    rows: table.rows.clone(),
                }),
            }
        }
        Ok(merged)
    }

    /// Columns that are not value columns for the given kind.
    pub fn dimension_columns(&self, kind: ItemKind) -> Vec<String> {
        let values = value_columns(kind);
        self.columns
            .iter()
            .filter(|c| !values.contains(&c.as_str()))
            .cloned()
            .collect()
    }

    /// Reads the rows as elements of `info`, matching columns by dimension name.
    pub fn to_elements(&self, info: &ItemInfo) -> Result<Vec<Element>> {
        let dimensions = info.dimensions();
        let values = value_columns(info.kind);
        let expected = dimensions.len() + values.len();
        let find = |column: &str| {
            self.column(column).ok_or_else(|| {
                IxError::dimensions(&info.name, format!("missing column '{}'", column))
            })
        };
        if self.columns.len() != expected {
            return Err(IxError::dimensions(
                &info.name,
                format!(
                    "table has columns {:?}, expected {:?} and {:?}",
                    self.columns, dimensions, values
                ),
            ));
        }
        let key_columns = dimensions
            .iter()
            .map(|d| find(d))
            .collect::<Result<Vec<_>>>()?;
        let value_positions = values
            .iter()
            .map(|v| find(v))
            .collect::<Result<Vec<_>>>()?;
        let mut elements = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let cell = |position: usize| {
                row.get(position).ok_or_else(|| {
                    IxError::dimensions(&info.name, format!("row has {} cells", row.len()))
                })
            };
            let key = Key::new(
                key_columns
                    .iter()
                    .map(|p| cell(*p).map(Cell::as_text))
                    .collect::<Result<Vec<_>>>()?,
            );
            let value = match info.kind {
                ItemKind::Set => ElementValue::Member,
                ItemKind::Parameter => ElementValue::Parameter {
                    value: cell(value_positions[0])?.as_number()?,
                    unit: cell(value_positions[1])?.as_text(),
                },
                ItemKind::Variable | ItemKind::Equation => ElementValue::Solution {
                    level: cell(value_positions[0])?.as_number()?,
                    marginal: cell(value_positions[1])?.as_number()?,
                },
            };
            elements.push(Element { key, value });
        }
        Ok(elements)
    }
}
