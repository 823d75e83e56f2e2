use rusqlite::Connection;

use crate::error::Result;

/// Initialise the bookings table and its index.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bookings (
            id         TEXT NOT NULL PRIMARY KEY,
            user_id    TEXT NOT NULL,
            status     TEXT NOT NULL DEFAULT 'pending'
                       CHECK (status IN ('pending', 'confirmed', 'cancelled')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_bookings_user
            ON bookings(user_id, created_at DESC);",
    )?;
    Ok(())
}
