use thiserror::Error;

use crate::construct::{ItemKind, RunId};

#[derive(Error, Debug)]
pub enum IxError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Item '{name}' already exists as a {kind}")]
    ItemExists { name: String, kind: ItemKind },
    #[error("Illegal state: {0}")]
    IllegalState(String),
    #[error("Commit conflict on run {run_id}: {message}")]
    CommitConflict { run_id: RunId, message: String },
    #[error("Invalid dimensions for '{item}': {message}")]
    InvalidDimensions { item: String, message: String },
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),
    #[error("Unknown region: {0}")]
    UnknownRegion(String),
    #[error("Not implemented by this backend: {0}")]
    NotImplemented(&'static str),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Data corruption: {message}")]
    DataCorruption { message: String },
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

impl IxError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }
    pub(crate) fn dimensions(item: &str, message: impl Into<String>) -> Self {
        Self::InvalidDimensions {
            item: item.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IxError>;

// Helper conversions
impl From<rusqlite::Error> for IxError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<serde_json::Error> for IxError {
    fn from(e: serde_json::Error) -> Self {
        Self::DataCorruption {
            message: e.to_string(),
        }
    }
}
impl From<config::ConfigError> for IxError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl<T> From<std::sync::PoisonError<T>> for IxError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
