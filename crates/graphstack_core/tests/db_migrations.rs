use graphstack_core::db::migrations::latest_version;
use graphstack_core::db::{
    open_db, open_db_in_memory, read_metadata, write_metadata, DbError, MODEL_METADATA_KEY,
};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "objects");
    assert_table_exists(&conn, "store_metadata");
}

#[test]
fn open_db_creates_missing_file_and_reopens_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.sqlite");
    assert!(!path.exists());

    let conn_first = open_db(&path).unwrap();
    assert!(path.exists());
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "objects");
}

#[test]
fn opening_store_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn objects_table_is_indexed_by_entity_and_stamps_rows() {
    let conn = open_db_in_memory().unwrap();

    let indexed: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'index' AND name = 'idx_objects_entity' AND tbl_name = 'objects'
            );",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(indexed, 1);

    conn.execute(
        "INSERT INTO objects (id, entity, payload) VALUES ('a', 'Note', '{}');",
        [],
    )
    .unwrap();
    let (created_at, updated_at): (i64, i64) = conn
        .query_row(
            "SELECT created_at, updated_at FROM objects WHERE id = 'a';",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert!(created_at > 0);
    assert_eq!(created_at, updated_at);
}

#[test]
fn store_metadata_survives_reopen_and_overwrites_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.sqlite");

    let conn = open_db(&path).unwrap();
    assert_eq!(read_metadata(&conn, MODEL_METADATA_KEY).unwrap(), None);
    write_metadata(&conn, MODEL_METADATA_KEY, "first").unwrap();
    write_metadata(&conn, MODEL_METADATA_KEY, "second").unwrap();
    drop(conn);

    let conn = open_db(&path).unwrap();
    assert_eq!(
        read_metadata(&conn, MODEL_METADATA_KEY).unwrap().as_deref(),
        Some("second")
    );
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM store_metadata;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
