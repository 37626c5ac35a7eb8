use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    // Checkpoint every ~400KB instead of the default ~4MB
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // In-memory DBs and fresh files legitimately fail this; not fatal.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS topics (
            id              TEXT PRIMARY KEY,
            title           TEXT NOT NULL,
            domain          TEXT,
            keywords        TEXT NOT NULL DEFAULT '[]',
            source_salon_id TEXT,
            metadata        TEXT NOT NULL DEFAULT '{}',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS capsules (
            id              TEXT PRIMARY KEY,
            title           TEXT NOT NULL,
            domain          TEXT,
            keywords        TEXT NOT NULL DEFAULT '[]',
            insight_text    TEXT NOT NULL DEFAULT '',
            source_salon_id TEXT,
            source_topic_id TEXT,
            metadata        TEXT NOT NULL DEFAULT '{}',
            score           REAL NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS relationships (
            id                TEXT PRIMARY KEY,
            source_type       TEXT NOT NULL,
            source_id         TEXT NOT NULL,
            target_type       TEXT NOT NULL,
            target_id         TEXT NOT NULL,
            relationship_type TEXT NOT NULL,
            strength          REAL NOT NULL,
            created_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS insights (
            id               TEXT PRIMARY KEY,
            type             TEXT NOT NULL,
            source_topic_ids TEXT NOT NULL DEFAULT '[]',
            common_keywords  TEXT NOT NULL DEFAULT '[]',
            common_domain    TEXT,
            summary          TEXT NOT NULL DEFAULT '',
            recommendations  TEXT NOT NULL DEFAULT '[]',
            created_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sources (
            salon_id   TEXT PRIMARY KEY,
            kind       TEXT NOT NULL,
            location   TEXT NOT NULL,
            status     TEXT NOT NULL,
            error      TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_topic_created ON topics(created_at);
        CREATE INDEX IF NOT EXISTS idx_topic_domain ON topics(domain);
        CREATE INDEX IF NOT EXISTS idx_topic_source ON topics(source_salon_id);
        CREATE INDEX IF NOT EXISTS idx_capsule_domain ON capsules(domain);
        CREATE INDEX IF NOT EXISTS idx_rel_source ON relationships(source_id);
        CREATE INDEX IF NOT EXISTS idx_rel_target ON relationships(target_id);
        CREATE INDEX IF NOT EXISTS idx_insight_type ON insights(type);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    tracing::info!(version = SCHEMA_VERSION, "schema initialized");
    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}
