//! Object context: the mutable working set of a stack.
//!
//! # Responsibility
//! - Track inserted, updated and deleted objects until they are saved.
//! - Answer reads with pending changes overlaid on the store.
//! - Validate pending objects against the model and save them atomically.
//!
//! # Invariants
//! - A context is bound to exactly one coordinator for its lifetime.
//! - A context is `Send` but not `Sync`: it holds a `rusqlite::Connection`,
//!   so it can be moved to another thread but never used from two at once.
//! - Saving a clean context performs no store I/O.
//! - A failed save writes nothing and keeps pending changes intact.

use log::{debug, info, warn};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::coordinator::{Coordinator, SaveRequest, SaveSummary, StoreError};
use crate::model::object::{ManagedObject, ObjectId, Value};
use crate::model::schema::{AttributeType, Entity, Model};

pub type ContextResult<T> = Result<T, ContextError>;
pub type SaveResult<T> = Result<T, SaveError>;

/// Errors raised by context reads and edits.
#[derive(Debug)]
pub enum ContextError {
    UnknownEntity(String),
    UnknownAttribute { entity: String, attribute: String },
    UnknownRelationship { entity: String, relationship: String },
    ObjectNotFound(ObjectId),
    /// An object with this id is already registered in the context.
    DuplicateObject(ObjectId),
    Store(StoreError),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntity(entity) => write!(f, "unknown entity `{entity}`"),
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "unknown attribute `{entity}.{attribute}`")
            }
            Self::UnknownRelationship {
                entity,
                relationship,
            } => write!(f, "unknown relationship `{entity}.{relationship}`"),
            Self::ObjectNotFound(id) => write!(f, "object not found: {id}"),
            Self::DuplicateObject(id) => write!(f, "object already registered: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ContextError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// One model violation found while validating pending objects.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingRequiredAttribute {
        object: ObjectId,
        entity: String,
        attribute: String,
    },
    TypeMismatch {
        object: ObjectId,
        entity: String,
        attribute: String,
        expected: AttributeType,
        found: &'static str,
    },
    /// A real attribute holds NaN or an infinity.
    NonFiniteReal {
        object: ObjectId,
        entity: String,
        attribute: String,
    },
    UnknownProperty {
        object: ObjectId,
        entity: String,
        name: String,
    },
    MissingRequiredRelationship {
        object: ObjectId,
        entity: String,
        relationship: String,
    },
    TooManyTargets {
        object: ObjectId,
        entity: String,
        relationship: String,
        count: usize,
    },
    DanglingReference {
        object: ObjectId,
        relationship: String,
        target: ObjectId,
    },
    WrongDestination {
        object: ObjectId,
        relationship: String,
        target: ObjectId,
        expected: String,
        found: String,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequiredAttribute {
                object,
                entity,
                attribute,
            } => write!(f, "{entity} {object}: required attribute `{attribute}` is null"),
            Self::TypeMismatch {
                object,
                entity,
                attribute,
                expected,
                found,
            } => write!(
                f,
                "{entity} {object}: attribute `{attribute}` expects {expected:?}, found {found}"
            ),
            Self::NonFiniteReal {
                object,
                entity,
                attribute,
            } => write!(
                f,
                "{entity} {object}: attribute `{attribute}` holds a non-finite real"
            ),
            Self::UnknownProperty {
                object,
                entity,
                name,
            } => write!(f, "{entity} {object}: `{name}` is not declared by the model"),
            Self::MissingRequiredRelationship {
                object,
                entity,
                relationship,
            } => write!(
                f,
                "{entity} {object}: required relationship `{relationship}` is empty"
            ),
            Self::TooManyTargets {
                object,
                entity,
                relationship,
                count,
            } => write!(
                f,
                "{entity} {object}: to-one relationship `{relationship}` has {count} targets"
            ),
            Self::DanglingReference {
                object,
                relationship,
                target,
            } => write!(
                f,
                "object {object}: relationship `{relationship}` points to missing object {target}"
            ),
            Self::WrongDestination {
                object,
                relationship,
                target,
                expected,
                found,
            } => write!(
                f,
                "object {object}: relationship `{relationship}` expects {expected}, target {target} is {found}"
            ),
        }
    }
}

impl Error for ValidationError {}

/// Save failures; nothing was written when one is returned.
#[derive(Debug)]
pub enum SaveError {
    Validation(Vec<ValidationError>),
    Store(StoreError),
}

impl Display for SaveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(errors) => {
                write!(f, "{} validation error(s)", errors.len())?;
                if let Some(first) = errors.first() {
                    write!(f, ": {first}")?;
                }
                Ok(())
            }
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SaveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(errors) => errors.first().map(|err| err as &(dyn Error + 'static)),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for SaveError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ContextError> for SaveError {
    fn from(value: ContextError) -> Self {
        match value {
            ContextError::Store(err) => Self::Store(err),
            other => Self::Store(StoreError::InvalidData(other.to_string())),
        }
    }
}

/// Result of a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The context was clean; the store was not touched.
    NoChanges,
    Saved(SaveSummary),
}

/// Number of pending changes by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Entity query over the context.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub entity: String,
    /// Keeps objects whose attribute equals the value.
    pub filter: Option<(String, Value)>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: None,
            limit: None,
        }
    }

    pub fn with_filter(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some((attribute.into(), value.into()));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Thread-confined working set bound to one coordinator.
#[derive(Debug)]
pub struct Context {
    coordinator: Coordinator,
    inserted: BTreeMap<ObjectId, ManagedObject>,
    updated: BTreeMap<ObjectId, ManagedObject>,
    /// Deleted object ids with their entity names.
    deleted: BTreeMap<ObjectId, String>,
}

impl Context {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            inserted: BTreeMap::new(),
            updated: BTreeMap::new(),
            deleted: BTreeMap::new(),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn model(&self) -> &Model {
        self.coordinator.model()
    }

    /// Registers a new object of `entity`, seeded with attribute defaults.
    pub fn insert(&mut self, entity: &str) -> ContextResult<ObjectId> {
        self.insert_with_id(ObjectId::new(), entity)
    }

    /// Registers a new object under a caller-provided id.
    ///
    /// Used by import paths where identity already exists externally. A
    /// clash with an already persisted id surfaces when saving.
    pub fn insert_with_id(&mut self, id: ObjectId, entity: &str) -> ContextResult<ObjectId> {
        let declaration = self.require_entity(entity)?;
        if self.inserted.contains_key(&id)
            || self.updated.contains_key(&id)
            || self.deleted.contains_key(&id)
        {
            return Err(ContextError::DuplicateObject(id));
        }

        let mut object = ManagedObject::new(id, entity);
        for attribute in &declaration.attributes {
            if let Some(default) = &attribute.default {
                object.values.insert(attribute.name.clone(), default.clone());
            }
        }
        self.inserted.insert(id, object);
        Ok(id)
    }

    /// Returns the object as currently seen by this context.
    pub fn object(&self, id: ObjectId) -> ContextResult<Option<ManagedObject>> {
        if self.deleted.contains_key(&id) {
            return Ok(None);
        }
        if let Some(object) = self.inserted.get(&id).or_else(|| self.updated.get(&id)) {
            return Ok(Some(object.clone()));
        }
        Ok(self.coordinator.fetch_object(id)?)
    }

    /// Reads one attribute value.
    pub fn value(&self, id: ObjectId, attribute: &str) -> ContextResult<Value> {
        let object = self
            .object(id)?
            .ok_or(ContextError::ObjectNotFound(id))?;
        self.require_attribute(&object.entity, attribute)?;
        Ok(object.value(attribute).clone())
    }

    /// Sets one attribute value. Type and requiredness are checked on save.
    pub fn set_value(
        &mut self,
        id: ObjectId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> ContextResult<()> {
        let entity = self.entity_name(id)?;
        self.require_attribute(&entity, attribute)?;
        let object = self.registered_mut(id)?;
        object.values.insert(attribute.to_string(), value.into());
        Ok(())
    }

    /// Replaces the targets of one relationship. Cardinality and target
    /// existence are checked on save.
    pub fn set_relationship(
        &mut self,
        id: ObjectId,
        relationship: &str,
        targets: Vec<ObjectId>,
    ) -> ContextResult<()> {
        let entity = self.entity_name(id)?;
        let declared = self
            .require_entity(&entity)?
            .find_relationship(relationship)
            .is_some();
        if !declared {
            return Err(ContextError::UnknownRelationship {
                entity,
                relationship: relationship.to_string(),
            });
        }
        let object = self.registered_mut(id)?;
        object
            .relationships
            .insert(relationship.to_string(), targets);
        Ok(())
    }

    /// Marks an object for deletion; unsaved inserts are simply dropped.
    pub fn delete(&mut self, id: ObjectId) -> ContextResult<()> {
        if self.inserted.remove(&id).is_some() {
            return Ok(());
        }
        let entity = self.entity_name(id)?;
        self.updated.remove(&id);
        self.deleted.insert(id, entity);
        Ok(())
    }

    /// Fetches objects of one entity, with pending changes applied, ordered
    /// by id.
    pub fn fetch(&self, request: &FetchRequest) -> ContextResult<Vec<ManagedObject>> {
        let entity = self.require_entity(&request.entity)?;
        if let Some((attribute, _)) = &request.filter {
            if entity.find_attribute(attribute).is_none() {
                return Err(ContextError::UnknownAttribute {
                    entity: entity.name.clone(),
                    attribute: attribute.clone(),
                });
            }
        }

        let mut merged: BTreeMap<ObjectId, ManagedObject> = self
            .coordinator
            .fetch_entity(&request.entity)?
            .into_iter()
            .map(|object| (object.id, object))
            .collect();
        for (id, object) in self.updated.iter().chain(self.inserted.iter()) {
            if object.entity == request.entity {
                merged.insert(*id, object.clone());
            }
        }
        for id in self.deleted.keys() {
            merged.remove(id);
        }

        let matches = merged.into_values().filter(|object| match &request.filter {
            Some((attribute, value)) => object.value(attribute) == value,
            None => true,
        });
        Ok(match request.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    pub fn has_changes(&self) -> bool {
        !(self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }

    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            inserted: self.inserted.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
        }
    }

    /// Discards every pending change.
    pub fn rollback(&mut self) {
        let counts = self.pending_counts();
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
        debug!(
            "event=context_rollback module=context status=ok inserted={} updated={} deleted={}",
            counts.inserted, counts.updated, counts.deleted
        );
    }

    /// Persists pending changes.
    ///
    /// Returns `NoChanges` without touching the store when the context is
    /// clean. References to deleted objects are nullified in staged copies,
    /// then every staged object is validated; any violation aborts the save
    /// before the store is written. Pending changes are only cleared once the
    /// store has committed.
    pub fn save(&mut self) -> SaveResult<SaveOutcome> {
        if !self.has_changes() {
            debug!("event=context_save module=context status=ok outcome=no_changes");
            return Ok(SaveOutcome::NoChanges);
        }

        let nullified = self.nullified_references()?;
        let inserted: Vec<&ManagedObject> = self
            .inserted
            .values()
            .map(|object| staged(&nullified, object))
            .collect();
        let mut updated: Vec<&ManagedObject> = self
            .updated
            .values()
            .map(|object| staged(&nullified, object))
            .collect();
        updated.extend(nullified.values().filter(|object| {
            !self.inserted.contains_key(&object.id) && !self.updated.contains_key(&object.id)
        }));

        let mut violations = Vec::new();
        for object in inserted.iter().chain(updated.iter()) {
            self.validate_object(object, &mut violations)?;
        }
        if !violations.is_empty() {
            warn!(
                "event=context_save module=context status=error error_code=validation_failed violations={}",
                violations.len()
            );
            return Err(SaveError::Validation(violations));
        }

        let request = SaveRequest {
            inserted,
            updated,
            deleted: self.deleted.keys().copied().collect(),
        };
        let summary = self.coordinator.execute_save(&request)?;

        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
        info!(
            "event=context_save module=context status=ok inserted={} updated={} deleted={}",
            summary.inserted, summary.updated, summary.deleted
        );
        Ok(SaveOutcome::Saved(summary))
    }

    fn require_entity(&self, entity: &str) -> ContextResult<&Entity> {
        self.coordinator
            .model()
            .entity(entity)
            .ok_or_else(|| ContextError::UnknownEntity(entity.to_string()))
    }

    fn require_attribute(&self, entity: &str, attribute: &str) -> ContextResult<()> {
        match self.require_entity(entity)?.find_attribute(attribute) {
            Some(_) => Ok(()),
            None => Err(ContextError::UnknownAttribute {
                entity: entity.to_string(),
                attribute: attribute.to_string(),
            }),
        }
    }

    fn entity_name(&self, id: ObjectId) -> ContextResult<String> {
        self.object(id)?
            .map(|object| object.entity)
            .ok_or(ContextError::ObjectNotFound(id))
    }

    /// Returns the pending copy of an object, loading it from the store into
    /// the updated set on first edit.
    fn registered_mut(&mut self, id: ObjectId) -> ContextResult<&mut ManagedObject> {
        if self.deleted.contains_key(&id) {
            return Err(ContextError::ObjectNotFound(id));
        }
        if let Some(object) = self.inserted.get_mut(&id) {
            return Ok(object);
        }
        match self.updated.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let object = self
                    .coordinator
                    .fetch_object(id)?
                    .ok_or(ContextError::ObjectNotFound(id))?;
                Ok(entry.insert(object))
            }
        }
    }

    /// Returns copies of objects whose relationships point at deleted ids,
    /// with those targets removed. Pending sets are left untouched.
    fn nullified_references(&self) -> ContextResult<BTreeMap<ObjectId, ManagedObject>> {
        let mut nullified = BTreeMap::new();
        if self.deleted.is_empty() {
            return Ok(nullified);
        }
        let deleted_entities: BTreeSet<&str> =
            self.deleted.values().map(String::as_str).collect();

        let referring = self.coordinator.model().entities().filter(|entity| {
            entity
                .relationships
                .iter()
                .any(|relationship| deleted_entities.contains(relationship.destination.as_str()))
        });
        for entity in referring {
            for mut object in self.fetch(&FetchRequest::new(entity.name.as_str()))? {
                let mut changed = false;
                for targets in object.relationships.values_mut() {
                    let before = targets.len();
                    targets.retain(|target| !self.deleted.contains_key(target));
                    changed |= targets.len() != before;
                }
                if changed {
                    nullified.insert(object.id, object);
                }
            }
        }
        Ok(nullified)
    }

    fn validate_object(
        &self,
        object: &ManagedObject,
        violations: &mut Vec<ValidationError>,
    ) -> ContextResult<()> {
        let entity = self.require_entity(&object.entity)?;

        for attribute in &entity.attributes {
            let value = object.value(&attribute.name);
            if value.is_null() {
                if attribute.required {
                    violations.push(ValidationError::MissingRequiredAttribute {
                        object: object.id,
                        entity: entity.name.clone(),
                        attribute: attribute.name.clone(),
                    });
                }
            } else if value.is_non_finite_real() {
                violations.push(ValidationError::NonFiniteReal {
                    object: object.id,
                    entity: entity.name.clone(),
                    attribute: attribute.name.clone(),
                });
            } else if !value.conforms_to(attribute.kind) {
                violations.push(ValidationError::TypeMismatch {
                    object: object.id,
                    entity: entity.name.clone(),
                    attribute: attribute.name.clone(),
                    expected: attribute.kind,
                    found: value.type_name(),
                });
            }
        }

        let undeclared = object
            .values
            .keys()
            .filter(|name| entity.find_attribute(name).is_none())
            .chain(
                object
                    .relationships
                    .keys()
                    .filter(|name| entity.find_relationship(name).is_none()),
            );
        for name in undeclared {
            violations.push(ValidationError::UnknownProperty {
                object: object.id,
                entity: entity.name.clone(),
                name: name.clone(),
            });
        }

        for relationship in &entity.relationships {
            let targets = object.targets(&relationship.name);
            if relationship.required && targets.is_empty() {
                violations.push(ValidationError::MissingRequiredRelationship {
                    object: object.id,
                    entity: entity.name.clone(),
                    relationship: relationship.name.clone(),
                });
            }
            if !relationship.to_many && targets.len() > 1 {
                violations.push(ValidationError::TooManyTargets {
                    object: object.id,
                    entity: entity.name.clone(),
                    relationship: relationship.name.clone(),
                    count: targets.len(),
                });
            }
            for target in targets {
                match self.object(*target)? {
                    None => violations.push(ValidationError::DanglingReference {
                        object: object.id,
                        relationship: relationship.name.clone(),
                        target: *target,
                    }),
                    Some(found) if found.entity != relationship.destination => {
                        violations.push(ValidationError::WrongDestination {
                            object: object.id,
                            relationship: relationship.name.clone(),
                            target: *target,
                            expected: relationship.destination.clone(),
                            found: found.entity,
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }
}

fn staged<'a>(
    nullified: &'a BTreeMap<ObjectId, ManagedObject>,
    object: &'a ManagedObject,
) -> &'a ManagedObject {
    nullified.get(&object.id).unwrap_or(object)
}
