//! Entity identifiers
//!
//! Entities created on this device start life with a [`LocalId`] and only
//! receive a server identity once their "add" has been confirmed. The two
//! cases are kept apart at the type level by [`EntityId`].
//!
//! The `local:` prefix only exists in the storage encoding (SQLite keys and
//! queued payloads); code never inspects string prefixes to decide what an id
//! is.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix used when a local id is encoded as a storage key
const LOCAL_PREFIX: &str = "local:";

/// Placeholder identity for an entity the server has not confirmed yet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(String);

impl LocalId {
    /// Generate a new local id: millisecond timestamp plus a random suffix
    ///
    /// The suffix makes ids collision-resistant within a client even when
    /// several entities are created in the same millisecond.
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a pantry item, meal idea or hidden calendar event
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EntityId {
    /// Created on this device, not yet confirmed by the server
    Local(LocalId),
    /// Assigned by the server
    Remote(String),
}

impl EntityId {
    /// Fresh local id for an entity created on this device
    pub fn new_local() -> Self {
        EntityId::Local(LocalId::generate())
    }

    pub fn remote(id: impl Into<String>) -> Self {
        EntityId::Remote(id.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EntityId::Local(_))
    }

    pub fn as_local(&self) -> Option<&LocalId> {
        match self {
            EntityId::Local(id) => Some(id),
            EntityId::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&str> {
        match self {
            EntityId::Remote(id) => Some(id),
            EntityId::Local(_) => None,
        }
    }

    /// Encoding used for SQLite primary keys
    pub fn storage_key(&self) -> String {
        match self {
            EntityId::Local(id) => format!("{}{}", LOCAL_PREFIX, id.0),
            EntityId::Remote(id) => id.clone(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Error parsing an encoded entity id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entity id: {0:?}")]
pub struct InvalidEntityId(String);

impl FromStr for EntityId {
    type Err = InvalidEntityId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(LOCAL_PREFIX) {
            Some("") => Err(InvalidEntityId(s.to_string())),
            Some(local) => Ok(EntityId::Local(LocalId(local.to_string()))),
            None if s.trim().is_empty() => Err(InvalidEntityId(s.to_string())),
            None => Ok(EntityId::Remote(s.to_string())),
        }
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.storage_key()
    }
}

impl TryFrom<String> for EntityId {
    type Error = InvalidEntityId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
