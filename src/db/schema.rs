use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- One row per payment attempt at the register.
        -- provider_reference is assigned once at creation and never changes.
        -- external_reference is the POS order reference; callers may reuse
        -- order numbering over time, so it is NOT unique.
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            provider_reference TEXT NOT NULL UNIQUE,
            external_reference TEXT,
            status TEXT NOT NULL CHECK (status IN ('initial', 'pending', 'approved', 'rejected', 'cancelled')),
            amount_cents INTEGER NOT NULL,
            description TEXT,
            raw_payload TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_provider_ref ON transactions(provider_reference);
        CREATE INDEX IF NOT EXISTS idx_transactions_external_ref ON transactions(external_reference);
        "#,
    )
}
