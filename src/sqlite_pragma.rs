//! Shared SQLite PRAGMA configuration
//!
//! Every connection opened by the store goes through `apply_optimized_pragmas`
//! so that the stream consumer and the scheduled jobs see the same journal
//! and checkpoint behaviour.

use rusqlite::Connection;

/// WAL auto-checkpoint threshold (pages)
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// Apply WAL, NORMAL sync, in-memory temp store, mmap, cache size and
/// auto-checkpoint settings.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", WAL_AUTOCHECKPOINT_PAGES)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}
