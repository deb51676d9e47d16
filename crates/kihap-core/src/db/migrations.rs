//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, &V1_STATEMENTS).await?;
    }
    if version < 2 {
        apply(conn, 2, &V2_STATEMENTS).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply one migration's statements atomically and record its version.
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(*stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: synchronized tables and the watermark store
const V1_STATEMENTS: [&str; 14] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS sync_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS leads (
        id TEXT PRIMARY KEY,
        name TEXT,
        email TEXT,
        phone TEXT,
        source TEXT,
        status TEXT,
        unit_id TEXT,
        notes TEXT,
        created_at TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_leads_updated ON leads(updated_at)",
    "CREATE TABLE IF NOT EXISTS kihap_events (
        id TEXT PRIMARY KEY,
        title TEXT,
        description TEXT,
        event_date TEXT,
        location TEXT,
        unit_id TEXT,
        price REAL,
        capacity INTEGER,
        is_active INTEGER,
        created_at TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_kihap_events_updated ON kihap_events(updated_at)",
    "CREATE TABLE IF NOT EXISTS event_checkins (
        id TEXT PRIMARY KEY,
        event_id TEXT,
        student_id TEXT,
        user_id TEXT,
        checked_in_at TEXT,
        status TEXT,
        created_at TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_event_checkins_updated ON event_checkins(updated_at)",
    "CREATE TABLE IF NOT EXISTS students (
        id TEXT PRIMARY KEY,
        name TEXT,
        email TEXT,
        phone TEXT,
        birth_date TEXT,
        belt TEXT,
        unit_id TEXT,
        status TEXT,
        enrolled_at TEXT,
        metadata TEXT,
        created_at TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_students_updated ON students(updated_at)",
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT,
        email TEXT,
        role TEXT,
        unit_id TEXT,
        is_active INTEGER,
        created_at TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_users_updated ON users(updated_at)",
    "CREATE TABLE IF NOT EXISTS units (
        id TEXT PRIMARY KEY,
        name TEXT,
        address TEXT,
        city TEXT,
        phone TEXT,
        is_active INTEGER,
        created_at TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_units_updated ON units(updated_at)",
];

/// Version 2: last-write-wins conflict log
const V2_STATEMENTS: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_name TEXT NOT NULL,
        record_id TEXT NOT NULL,
        kept_updated_at TEXT NOT NULL,
        rejected_updated_at TEXT NOT NULL,
        resolved_at TEXT NOT NULL,
        direction TEXT NOT NULL,
        strategy TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(table_name, record_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncTable;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut rows = conn
            .query(&format!("PRAGMA table_info({table})"), ())
            .await
            .unwrap();
        let mut columns = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            columns.push(row.get::<String>(1).unwrap());
        }
        columns
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_registered_table_matches_its_schema() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in SyncTable::ALL {
            let expected: Vec<String> = table
                .schema()
                .columns
                .iter()
                .map(|column| column.name.to_string())
                .collect();
            assert_eq!(table_columns(&conn, table.name()).await, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn creates_sync_meta_and_conflict_tables() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        assert_eq!(table_columns(&conn, "sync_meta").await, vec!["key", "value"]);
        assert!(table_columns(&conn, "sync_conflicts")
            .await
            .contains(&"direction".to_string()));
    }
}
