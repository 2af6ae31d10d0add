use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{query_one, TRANSACTION_COLS};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_txn_id() -> String {
    format!("qt_txn_{}", Uuid::new_v4().as_simple())
}

/// Record a newly created payment attempt. Status starts at `initial`
/// ("QR shown, never polled").
pub fn create_transaction(conn: &Connection, input: &CreateTransaction) -> Result<Transaction> {
    let id = gen_txn_id();
    let ts = now();

    conn.execute(
        "INSERT INTO transactions (id, provider_reference, external_reference, status, amount_cents, description, raw_payload, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            input.provider_reference,
            input.external_reference,
            TransactionStatus::Initial.as_str(),
            input.amount_cents,
            input.description,
            input.raw_payload,
            ts,
            ts,
        ],
    )?;

    Ok(Transaction {
        id,
        provider_reference: input.provider_reference.clone(),
        external_reference: input.external_reference.clone(),
        status: TransactionStatus::Initial,
        amount_cents: input.amount_cents,
        description: input.description.clone(),
        raw_payload: input.raw_payload.clone(),
        created_at: ts,
        updated_at: ts,
    })
}

pub fn get_transaction_by_provider_reference(
    conn: &Connection,
    provider_reference: &str,
) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!("SELECT {TRANSACTION_COLS} FROM transactions WHERE provider_reference = ?1"),
        &[&provider_reference],
    )
}

/// Newest match wins: external references may be reused across time, so when
/// several transactions share one, the latest attempt is the relevant one.
pub fn get_transaction_by_external_reference(
    conn: &Connection,
    external_reference: &str,
) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {TRANSACTION_COLS} FROM transactions WHERE external_reference = ?1
             ORDER BY created_at DESC LIMIT 1"
        ),
        &[&external_reference],
    )
}

/// Atomic guarded status write - the CAS primitive every status transition
/// goes through.
///
/// The `WHERE` clause re-checks eligibility at write time so a poll and a
/// webhook racing on the same record cannot lose updates or overwrite a
/// final status:
/// - only `initial`/`pending` rows are eligible (finality is absorbing, and
///   any status outside the known non-final set is left alone);
/// - `not_older_than`, when given, additionally rejects rows created before
///   that instant (the staleness bound for webhook-driven writes).
///
/// Returns whether a row was actually updated.
pub fn compare_and_set_status(
    conn: &Connection,
    transaction_id: &str,
    new_status: TransactionStatus,
    new_raw_payload: Option<&str>,
    not_older_than: Option<i64>,
) -> Result<bool> {
    let ts = now();

    let changed = match not_older_than {
        Some(min_created_at) => conn.execute(
            "UPDATE transactions
             SET status = ?1, raw_payload = COALESCE(?2, raw_payload), updated_at = ?3
             WHERE id = ?4 AND status IN ('initial', 'pending') AND created_at >= ?5",
            params![new_status.as_str(), new_raw_payload, ts, transaction_id, min_created_at],
        )?,
        None => conn.execute(
            "UPDATE transactions
             SET status = ?1, raw_payload = COALESCE(?2, raw_payload), updated_at = ?3
             WHERE id = ?4 AND status IN ('initial', 'pending')",
            params![new_status.as_str(), new_raw_payload, ts, transaction_id],
        )?,
    };

    Ok(changed > 0)
}
