//! Immutable schema description for an object graph.
//!
//! # Responsibility
//! - Describe entities, their attributes and relationships.
//! - Validate declarations once, when a model is built or parsed.
//! - Merge several models into one (bundle union).
//!
//! # Invariants
//! - A `Model` value is always valid; there is no mutable access after build.
//! - Entity names are unique inside a model.
//! - Attribute and relationship names are unique inside their entity.
//! - Relationship destinations name an entity of the same model.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use crate::model::object::Value;

static SCHEMA_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid schema name regex"));

pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building, parsing, merging or discovering models.
#[derive(Debug)]
pub enum ModelError {
    InvalidName(String),
    DuplicateEntity(String),
    DuplicateProperty {
        entity: String,
        name: String,
    },
    UnknownDestination {
        entity: String,
        relationship: String,
        destination: String,
    },
    InvalidDefault {
        entity: String,
        attribute: String,
    },
    /// Two models declare the same entity with different shapes.
    MergeConflict(String),
    /// No explicit model was supplied and the bundle holds none.
    NoModelsFound,
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        message: String,
    },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid schema name `{name}`"),
            Self::DuplicateEntity(name) => write!(f, "entity declared twice: {name}"),
            Self::DuplicateProperty { entity, name } => {
                write!(f, "property `{name}` declared twice on entity `{entity}`")
            }
            Self::UnknownDestination {
                entity,
                relationship,
                destination,
            } => write!(
                f,
                "relationship `{entity}.{relationship}` points to unknown entity `{destination}`"
            ),
            Self::InvalidDefault { entity, attribute } => write!(
                f,
                "default value of `{entity}.{attribute}` does not match its type"
            ),
            Self::MergeConflict(name) => {
                write!(f, "models declare conflicting entity `{name}`")
            }
            Self::NoModelsFound => write!(f, "no model supplied and none found in bundle"),
            Self::Io { path, source } => {
                write!(f, "failed to read model `{}`: {source}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "failed to parse model `{}`: {message}", path.display())
            }
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Storage type of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Integer,
    Real,
    Text,
    Boolean,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    /// Saving an object whose value is `Null` fails when set.
    #[serde(default)]
    pub required: bool,
    /// Seed value for newly inserted objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    /// Name of the target entity.
    pub destination: String,
    #[serde(default)]
    pub to_many: bool,
    /// At least one target must be set before saving.
    #[serde(default)]
    pub required: bool,
}

impl Relationship {
    pub fn to_one(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
            to_many: false,
            required: false,
        }
    }

    pub fn to_many(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            to_many: true,
            ..Self::to_one(name, destination)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn find_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn find_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|relationship| relationship.name == name)
    }
}

/// Validated, immutable schema for one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModelDocument", into = "ModelDocument")]
pub struct Model {
    entities: BTreeMap<String, Entity>,
}

/// On-disk/JSON shape of a model file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelDocument {
    entities: Vec<Entity>,
}

impl TryFrom<ModelDocument> for Model {
    type Error = ModelError;

    fn try_from(value: ModelDocument) -> ModelResult<Self> {
        Model::new(value.entities)
    }
}

impl From<Model> for ModelDocument {
    fn from(value: Model) -> Self {
        Self {
            entities: value.entities.into_values().collect(),
        }
    }
}

impl Model {
    /// Builds a model after validating every declaration.
    ///
    /// # Errors
    /// - Returns `InvalidName` for names outside `[A-Za-z][A-Za-z0-9_]*`.
    /// - Returns `DuplicateEntity`/`DuplicateProperty` for repeated names.
    /// - Returns `UnknownDestination` for dangling relationship targets.
    /// - Returns `InvalidDefault` for defaults not matching attribute type.
    pub fn new(entities: Vec<Entity>) -> ModelResult<Self> {
        let mut by_name = BTreeMap::new();
        for entity in entities {
            validate_name(&entity.name)?;
            if by_name.contains_key(&entity.name) {
                return Err(ModelError::DuplicateEntity(entity.name));
            }
            by_name.insert(entity.name.clone(), entity);
        }

        for entity in by_name.values() {
            validate_entity(entity, &by_name)?;
        }

        Ok(Self { entities: by_name })
    }

    /// Merges several models into one union model.
    ///
    /// An entity name declared by more than one model is a `MergeConflict`,
    /// even when the declarations are identical.
    pub fn merge(models: impl IntoIterator<Item = Model>) -> ModelResult<Self> {
        let mut merged: BTreeMap<String, Entity> = BTreeMap::new();
        for model in models {
            for (name, entity) in model.entities {
                match merged.entry(name) {
                    Entry::Occupied(entry) => {
                        return Err(ModelError::MergeConflict(entry.key().clone()))
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(entity);
                    }
                }
            }
        }
        Ok(Self { entities: merged })
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    /// Entities sorted by name.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Canonical JSON form, recorded in store metadata to detect
    /// incompatible stores.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn validate_name(name: &str) -> ModelResult<()> {
    if SCHEMA_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ModelError::InvalidName(name.to_string()))
    }
}

fn validate_entity(entity: &Entity, entities: &BTreeMap<String, Entity>) -> ModelResult<()> {
    let mut seen = BTreeSet::new();

    for attribute in &entity.attributes {
        validate_name(&attribute.name)?;
        if !seen.insert(attribute.name.as_str()) {
            return Err(ModelError::DuplicateProperty {
                entity: entity.name.clone(),
                name: attribute.name.clone(),
            });
        }
        if let Some(default) = &attribute.default {
            if !default.conforms_to(attribute.kind) {
                return Err(ModelError::InvalidDefault {
                    entity: entity.name.clone(),
                    attribute: attribute.name.clone(),
                });
            }
        }
    }

    for relationship in &entity.relationships {
        validate_name(&relationship.name)?;
        if !seen.insert(relationship.name.as_str()) {
            return Err(ModelError::DuplicateProperty {
                entity: entity.name.clone(),
                name: relationship.name.clone(),
            });
        }
        if !entities.contains_key(&relationship.destination) {
            return Err(ModelError::UnknownDestination {
                entity: entity.name.clone(),
                relationship: relationship.name.clone(),
                destination: relationship.destination.clone(),
            });
        }
    }

    Ok(())
}
