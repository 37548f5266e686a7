use anyhow::Result;
use rusqlite::Connection;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if table creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Scalar guard state - session end, display name, PIN, reload marker
    conn.execute(
        "CREATE TABLE IF NOT EXISTS guard_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Incident feed - append-only, ordered by insertion
    conn.execute(
        "CREATE TABLE IF NOT EXISTS incidents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            at TEXT NOT NULL,
            meta TEXT
        )",
        [],
    )?;

    Ok(())
}
