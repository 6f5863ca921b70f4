use rusqlite::{Connection, Result};

/// Initialise store tables. Safe to call on every startup (idempotent).
///
/// One table per value kind plus a shared `expiry` table; a key lives in
/// exactly one kind table at a time, mirroring the type-per-key discipline
/// of the key layout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key    TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS hashes (
            key    TEXT NOT NULL,
            field  TEXT NOT NULL,
            value  TEXT NOT NULL,
            PRIMARY KEY (key, field)
        );
        CREATE TABLE IF NOT EXISTS lists (
            key    TEXT NOT NULL,
            pos    INTEGER NOT NULL,
            value  TEXT NOT NULL,
            PRIMARY KEY (key, pos)
        );
        CREATE INDEX IF NOT EXISTS idx_lists_key ON lists(key);
        CREATE TABLE IF NOT EXISTS sets (
            key     TEXT NOT NULL,
            member  TEXT NOT NULL,
            PRIMARY KEY (key, member)
        );
        CREATE TABLE IF NOT EXISTS expiry (
            key         TEXT PRIMARY KEY,
            expires_at  INTEGER NOT NULL
        );",
    )
}

/// Open a connection with the pragmas every handle needs: WAL so several
/// processes can share the file, and a busy timeout so short write collisions
/// retry instead of erroring.
pub fn open_connection(path: &str) -> Result<Connection> {
    if let Some(dir) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}
