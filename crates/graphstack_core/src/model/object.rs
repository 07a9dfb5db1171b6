//! Managed object representation.
//!
//! # Responsibility
//! - Define attribute values and the object record held by a context.
//! - Provide the stable identity used by stores and relationships.
//!
//! # Invariants
//! - `ObjectId` is stable and never reused for another object.
//! - An object always belongs to exactly one entity of the stack model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use crate::model::schema::AttributeType;

/// Stable identifier of a managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the canonical hyphenated form stored in `objects.id`.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attribute value stored on a managed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns whether this value may be stored in an attribute of `kind`.
    ///
    /// `Null` conforms to every type; requiredness is checked separately.
    /// NaN and infinite reals conform to nothing since JSON payloads cannot
    /// carry them.
    pub fn conforms_to(&self, kind: AttributeType) -> bool {
        match (self, kind) {
            (Self::Null, _) => true,
            (Self::Real(value), AttributeType::Real) => value.is_finite(),
            (Self::Integer(_), AttributeType::Integer)
            | (Self::Text(_), AttributeType::Text)
            | (Self::Boolean(_), AttributeType::Boolean)
            | (Self::Binary(_), AttributeType::Binary) => true,
            _ => false,
        }
    }

    /// Returns whether this is a NaN or infinite real.
    pub fn is_non_finite_real(&self) -> bool {
        matches!(self, Self::Real(value) if !value.is_finite())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Boolean(_) => "boolean",
            Self::Binary(_) => "binary",
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

/// One object of the working set, as seen by callers of a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub id: ObjectId,
    /// Entity name in the owning model.
    pub entity: String,
    /// Attribute values keyed by attribute name.
    pub values: BTreeMap<String, Value>,
    /// Relationship targets keyed by relationship name.
    pub relationships: BTreeMap<String, Vec<ObjectId>>,
}

impl ManagedObject {
    pub fn new(id: ObjectId, entity: impl Into<String>) -> Self {
        Self {
            id,
            entity: entity.into(),
            values: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Returns the attribute value, treating an unset attribute as `Null`.
    pub fn value(&self, attribute: &str) -> &Value {
        self.values.get(attribute).unwrap_or(&Value::Null)
    }

    /// Returns relationship targets; unset relationships are empty.
    pub fn targets(&self, relationship: &str) -> &[ObjectId] {
        self.relationships
            .get(relationship)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Persisted payload of one object row (`objects.payload`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ObjectPayload {
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default)]
    pub relationships: BTreeMap<String, Vec<ObjectId>>,
}

impl ObjectPayload {
    pub(crate) fn from_object(object: &ManagedObject) -> Self {
        Self {
            values: object.values.clone(),
            relationships: object.relationships.clone(),
        }
    }

    pub(crate) fn into_object(self, id: ObjectId, entity: String) -> ManagedObject {
        ManagedObject {
            id,
            entity,
            values: self.values,
            relationships: self.relationships,
        }
    }
}
