use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// How long a connection waits on a write lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a SQLite file configured for several connections at once.
///
/// WAL lets readers proceed while the scheduler writes; the busy timeout
/// makes concurrent claimers queue up instead of failing with `SQLITE_BUSY`.
pub fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Initialise the job schema in `conn`.
///
/// Creates the `jobs` table (idempotent) plus the indexes the due-job scan
/// and the booking lookup rely on.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id                      TEXT    NOT NULL PRIMARY KEY,
            job_type                TEXT    NOT NULL,
            run_at                  TEXT    NOT NULL,
            payload                 TEXT    NOT NULL,   -- JSON, shape depends on job_type
            status                  TEXT    NOT NULL DEFAULT 'pending',
            is_recurring            INTEGER NOT NULL DEFAULT 0,
            recurring_interval_secs INTEGER,
            last_run_at             TEXT,
            locked                  INTEGER NOT NULL DEFAULT 0,
            locked_by               TEXT,
            lock_expires_at         TEXT,
            retry_count             INTEGER NOT NULL DEFAULT 0,
            max_retries             INTEGER NOT NULL DEFAULT 3,
            last_error              TEXT,
            metadata                TEXT    NOT NULL DEFAULT '{}',
            created_at              TEXT    NOT NULL,
            updated_at              TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_type   ON jobs (job_type);
        CREATE INDEX IF NOT EXISTS idx_jobs_run_at ON jobs (run_at);
        -- SELECT … WHERE status = 'pending' AND locked = 0 AND run_at <= ? ORDER BY run_at
        CREATE INDEX IF NOT EXISTS idx_jobs_due    ON jobs (status, locked, run_at);
        CREATE INDEX IF NOT EXISTS idx_jobs_booking
            ON jobs (json_extract(payload, '$.bookingId'));
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'jobs'
                 AND name LIKE 'idx_jobs_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(n, 4);
    }
}
