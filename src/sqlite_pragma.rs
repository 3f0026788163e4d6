//! Shared SQLite PRAGMA tuning for reading-store connections

use rusqlite::Connection;
use std::time::Duration;

/// How long a connection waits on a locked database before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply PRAGMAs for concurrent ingest-while-query access
///
/// - busy_timeout first, so the remaining PRAGMAs also wait out a busy writer
/// - WAL journal: readers never block the writer and vice versa
/// - synchronous=NORMAL: safe under WAL, fewer fsyncs
/// - temp_store=MEMORY, mmap 64MB, cache ~16MB
/// - wal_autocheckpoint=1000 pages
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 67_108_864i64)?;
    conn.pragma_update(None, "cache_size", -16_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000i64)?;
    Ok(())
}
