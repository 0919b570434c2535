/// Change-event wire format
///
/// Every committed insert, update or delete on a synchronized table is
/// published as a `RawChange`:
///
/// ```text
/// {
///   "table": "tasks",
///   "kind": "update",
///   "project_id": "0b9c…",
///   "record": { "id": "…", "status": "done", … }
/// }
/// ```
///
/// Inserts and updates carry the full row. Deletes need only `record.id`.
/// Payloads are parsed into `ChangeEvent<T>` at the listener boundary so the
/// entity store never sees malformed data.
///
/// # Channels
///
/// Changes for one project and table are published on
/// `changes:{table}:{project_id}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Change parsing errors
#[derive(Error, Debug)]
pub enum ChangeParseError {
    /// Kind is not insert/update/delete
    #[error("Unknown change kind: {0}")]
    UnknownKind(String),

    /// Payload is for another table than the subscriber expects
    #[error("Change for table {actual} delivered to {expected} subscriber")]
    TableMismatch { expected: Table, actual: String },

    /// Delete payload without a usable id
    #[error("Delete change is missing record.id")]
    MissingId,

    /// Record does not match the entity shape
    #[error("Malformed record: {0}")]
    MalformedRecord(#[from] serde_json::Error),
}

/// Tables that publish changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Tasks,
    Messages,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Tasks => "tasks",
            Table::Messages => "messages",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tasks" => Ok(Table::Tasks),
            "messages" => Ok(Table::Messages),
            other => Err(format!("unknown table: {}", other)),
        }
    }
}

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = ChangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(ChangeKind::Insert),
            "update" => Ok(ChangeKind::Update),
            "delete" => Ok(ChangeKind::Delete),
            _ => Err(ChangeParseError::UnknownKind(s.to_string())),
        }
    }
}

/// Which change kinds a subscriber wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeFilter {
    All,
    Only(ChangeKind),
}

impl ChangeFilter {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        match self {
            ChangeFilter::All => true,
            ChangeFilter::Only(wanted) => *wanted == kind,
        }
    }
}

/// A subscription scope: one table of one project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
    pub table: Table,
    pub project_id: Uuid,
    pub filter: ChangeFilter,
}

impl Topic {
    /// Every change to a project's tasks
    pub fn tasks(project_id: Uuid) -> Self {
        Topic {
            table: Table::Tasks,
            project_id,
            filter: ChangeFilter::All,
        }
    }

    /// New chat messages of a project
    pub fn messages(project_id: Uuid) -> Self {
        Topic {
            table: Table::Messages,
            project_id,
            filter: ChangeFilter::Only(ChangeKind::Insert),
        }
    }

    /// Pub/sub channel carrying this topic's changes
    pub fn channel(&self) -> String {
        change_channel(self.table, self.project_id)
    }

    /// Whether a raw change belongs to this topic
    ///
    /// Payloads with an unknown kind are let through so the listener can log
    /// the parse failure.
    pub fn accepts(&self, raw: &RawChange) -> bool {
        if raw.table != self.table.as_str() || raw.project_id != self.project_id {
            return false;
        }
        match raw.kind.parse::<ChangeKind>() {
            Ok(kind) => self.filter.matches(kind),
            Err(_) => true,
        }
    }
}

/// Channel name for a table of a project
pub fn change_channel(table: Table, project_id: Uuid) -> String {
    format!("changes:{}:{}", table, project_id)
}

/// Untyped change payload as published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: String,
    pub kind: String,
    pub project_id: Uuid,
    pub record: JsonValue,
}

impl RawChange {
    /// Builds a payload from a typed row
    pub fn from_row<T: Serialize>(
        table: Table,
        kind: ChangeKind,
        project_id: Uuid,
        row: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(RawChange {
            table: table.as_str().to_string(),
            kind: kind.as_str().to_string(),
            project_id,
            record: serde_json::to_value(row)?,
        })
    }

    /// Delete payload carrying only the row id
    pub fn deleted(table: Table, project_id: Uuid, id: Uuid) -> Self {
        RawChange {
            table: table.as_str().to_string(),
            kind: ChangeKind::Delete.as_str().to_string(),
            project_id,
            record: serde_json::json!({ "id": id }),
        }
    }
}

/// A validated change ready for a store
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    Delete { id: Uuid },
}

impl<T> ChangeEvent<T> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// The carried row, if any
    pub fn entity(&self) -> Option<&T> {
        match self {
            ChangeEvent::Insert(entity) | ChangeEvent::Update(entity) => Some(entity),
            ChangeEvent::Delete { .. } => None,
        }
    }
}

impl<T: DeserializeOwned> ChangeEvent<T> {
    /// Validates a raw payload for a subscriber of `expected`
    pub fn parse(raw: &RawChange, expected: Table) -> Result<Self, ChangeParseError> {
        if raw.table != expected.as_str() {
            return Err(ChangeParseError::TableMismatch {
                expected,
                actual: raw.table.clone(),
            });
        }

        match raw.kind.parse::<ChangeKind>()? {
            ChangeKind::Insert => Ok(ChangeEvent::Insert(T::deserialize(&raw.record)?)),
            ChangeKind::Update => Ok(ChangeEvent::Update(T::deserialize(&raw.record)?)),
            ChangeKind::Delete => {
                let id = raw
                    .record
                    .get("id")
                    .and_then(JsonValue::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or(ChangeParseError::MissingId)?;
                Ok(ChangeEvent::Delete { id })
            }
        }
    }
}
