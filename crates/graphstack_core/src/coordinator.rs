//! Store coordinator: one model bound to one attached store.
//!
//! # Responsibility
//! - Attach exactly one SQLite store (file or memory) for a model.
//! - Refuse stores created with a different model.
//! - Read object rows and write change sets in a single transaction.
//!
//! # Invariants
//! - The attached store and model never change after `attach`.
//! - `execute_save` either applies every change or none of them.

use log::{debug, error, info};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::db::{
    open_db, open_db_in_memory, read_metadata, write_metadata, DbError, MODEL_METADATA_KEY,
};
use crate::model::object::{ManagedObject, ObjectId, ObjectPayload};
use crate::model::schema::Model;

/// Where the coordinator's single store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    InMemory,
    File(PathBuf),
}

impl StoreLocation {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::InMemory => None,
            Self::File(path) => Some(path),
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::InMemory => "memory",
            Self::File(_) => "file",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the attached store while reading or writing objects.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Serialization(serde_json::Error),
    InvalidData(String),
    /// An updated object no longer exists in the store.
    MissingObject(ObjectId),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "failed to encode object payload: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted object data: {message}"),
            Self::MissingObject(id) => write!(f, "object missing from store: {id}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::InvalidData(_) | Self::MissingObject(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Attach failures, surfaced to callers as construction failures.
#[derive(Debug)]
pub enum AttachError {
    Db(DbError),
    /// The store was created with a different model.
    IncompatibleModel(StoreLocation),
}

impl Display for AttachError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::IncompatibleModel(StoreLocation::File(path)) => write!(
                f,
                "store `{}` was created with an incompatible model",
                path.display()
            ),
            Self::IncompatibleModel(StoreLocation::InMemory) => {
                write!(f, "in-memory store was created with an incompatible model")
            }
        }
    }
}

impl Error for AttachError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::IncompatibleModel(_) => None,
        }
    }
}

impl From<DbError> for AttachError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Objects to write in one save transaction.
#[derive(Debug, Default)]
pub struct SaveRequest<'a> {
    pub inserted: Vec<&'a ManagedObject>,
    pub updated: Vec<&'a ManagedObject>,
    pub deleted: Vec<ObjectId>,
}

/// Row counts written by one successful save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Mediates between a context and its single backing store.
pub struct Coordinator {
    model: Arc<Model>,
    location: StoreLocation,
    conn: Connection,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("location", &self.location)
            .field("entities", &self.model.entity_names())
            .finish()
    }
}

impl Coordinator {
    /// Opens the store at `location` and binds it to `model`.
    ///
    /// A new store records the model; an existing store must carry the same
    /// model.
    ///
    /// # Errors
    /// - `AttachError::Db` when the store cannot be opened or migrated.
    /// - `AttachError::IncompatibleModel` when the recorded model differs.
    pub fn attach(model: Arc<Model>, location: StoreLocation) -> Result<Self, AttachError> {
        let conn = match &location {
            StoreLocation::InMemory => open_db_in_memory()?,
            StoreLocation::File(path) => open_db(path)?,
        };

        let expected = model.canonical_json();
        match read_metadata(&conn, MODEL_METADATA_KEY)? {
            Some(recorded) if recorded != expected => {
                error!(
                    "event=store_attach module=coordinator status=error mode={} error_code=incompatible_model",
                    location.mode()
                );
                return Err(AttachError::IncompatibleModel(location));
            }
            Some(_) => {}
            None => write_metadata(&conn, MODEL_METADATA_KEY, &expected)?,
        }

        info!(
            "event=store_attach module=coordinator status=ok mode={} entities={}",
            location.mode(),
            model.entity_names().len()
        );
        Ok(Self {
            model,
            location,
            conn,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Loads one persisted object.
    pub fn fetch_object(&self, id: ObjectId) -> StoreResult<Option<ManagedObject>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, entity, payload FROM objects WHERE id = ?1;")?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_object_row(row)?));
        }
        Ok(None)
    }

    /// Loads every persisted object of `entity`, ordered by id.
    pub fn fetch_entity(&self, entity: &str) -> StoreResult<Vec<ManagedObject>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity, payload FROM objects
             WHERE entity = ?1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([entity])?;
        let mut objects = Vec::new();
        while let Some(row) = rows.next()? {
            objects.push(parse_object_row(row)?);
        }
        Ok(objects)
    }

    /// Number of persisted objects, across all entities.
    pub fn object_count(&self) -> StoreResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM objects;", [], |row| row.get::<_, i64>(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Writes all changes in one transaction.
    ///
    /// Any failure drops the transaction, so the store is left untouched.
    pub fn execute_save(&mut self, request: &SaveRequest<'_>) -> StoreResult<SaveSummary> {
        let started_at = Instant::now();
        let result = write_changes(&mut self.conn, request);
        match &result {
            Ok(summary) => debug!(
                "event=store_save module=coordinator status=ok mode={} inserted={} updated={} deleted={} duration_ms={}",
                self.location.mode(),
                summary.inserted,
                summary.updated,
                summary.deleted,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=store_save module=coordinator status=error mode={} duration_ms={} error={}",
                self.location.mode(),
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }
}

fn write_changes(conn: &mut Connection, request: &SaveRequest<'_>) -> StoreResult<SaveSummary> {
    let tx = conn.transaction()?;

    for object in &request.inserted {
        let payload = serde_json::to_string(&ObjectPayload::from_object(object))?;
        tx.execute(
            "INSERT INTO objects (id, entity, payload) VALUES (?1, ?2, ?3);",
            params![object.id.to_string(), object.entity.as_str(), payload],
        )?;
    }

    for object in &request.updated {
        let payload = serde_json::to_string(&ObjectPayload::from_object(object))?;
        let changed = tx.execute(
            "UPDATE objects
             SET
                payload = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![object.id.to_string(), payload],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingObject(object.id));
        }
    }

    for id in &request.deleted {
        tx.execute("DELETE FROM objects WHERE id = ?1;", [id.to_string()])?;
    }

    tx.commit()?;

    Ok(SaveSummary {
        inserted: request.inserted.len(),
        updated: request.updated.len(),
        deleted: request.deleted.len(),
    })
}

fn parse_object_row(row: &Row<'_>) -> StoreResult<ManagedObject> {
    let id_text: String = row.get("id")?;
    let id = ObjectId::parse(&id_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid object id `{id_text}` in objects.id"))
    })?;
    let entity: String = row.get("entity")?;
    let payload_text: String = row.get("payload")?;
    let payload: ObjectPayload = serde_json::from_str(&payload_text).map_err(|err| {
        StoreError::InvalidData(format!("invalid payload for object {id}: {err}"))
    })?;
    Ok(payload.into_object(id, entity))
}

#[cfg(test)]
mod tests {
    use super::{AttachError, Coordinator, SaveRequest, StoreError, StoreLocation};
    use crate::model::object::{ManagedObject, ObjectId, Value};
    use crate::model::schema::{Attribute, AttributeType, Entity, Model};
    use std::sync::Arc;

    fn model() -> Arc<Model> {
        Arc::new(
            Model::new(vec![
                Entity::new("Note").attribute(Attribute::new("title", AttributeType::Text))
            ])
            .unwrap(),
        )
    }

    fn note(title: &str) -> ManagedObject {
        let mut object = ManagedObject::new(ObjectId::new(), "Note");
        object.values.insert("title".to_string(), Value::from(title));
        object
    }

    #[test]
    fn save_then_fetch_roundtrip() {
        let mut coordinator = Coordinator::attach(model(), StoreLocation::InMemory).unwrap();
        let first = note("first");
        let summary = coordinator
            .execute_save(&SaveRequest {
                inserted: vec![&first],
                ..SaveRequest::default()
            })
            .unwrap();
        assert_eq!(summary.inserted, 1);

        let loaded = coordinator.fetch_object(first.id).unwrap().unwrap();
        assert_eq!(loaded, first);
        assert_eq!(coordinator.fetch_entity("Note").unwrap(), vec![first]);
    }

    #[test]
    fn failed_update_rolls_back_inserts_of_same_transaction() {
        let mut coordinator = Coordinator::attach(model(), StoreLocation::InMemory).unwrap();
        let fresh = note("fresh");
        let ghost = note("never saved");

        let err = coordinator
            .execute_save(&SaveRequest {
                inserted: vec![&fresh],
                updated: vec![&ghost],
                deleted: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingObject(id) if id == ghost.id));
        assert_eq!(coordinator.object_count().unwrap(), 0);
    }

    #[test]
    fn reopening_file_with_other_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        drop(Coordinator::attach(model(), StoreLocation::File(path.clone())).unwrap());

        let other = Arc::new(Model::new(vec![Entity::new("Task")]).unwrap());
        let err = Coordinator::attach(other, StoreLocation::File(path.clone())).unwrap_err();
        assert!(matches!(err, AttachError::IncompatibleModel(StoreLocation::File(p)) if p == path));

        Coordinator::attach(model(), StoreLocation::File(path)).unwrap();
    }
}
