//! Test utilities and fixtures for QRTill integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub use qrtill::db::{init_db, queries, AppState};
pub use qrtill::gateway::{
    CandidatePayment, CreatePaymentRequest, CreatedPayment, GatewayError, PaymentGateway,
};
pub use qrtill::models::*;
pub use qrtill::reconcile::{
    IgnoreReason, NotificationOutcome, PollOutcome, ReconcilePolicy, Reconciler,
};

/// In-memory stand-in for the payment provider. Responses are programmed per
/// test; call counters let tests assert which provider operations ran.
#[derive(Default)]
pub struct MockGateway {
    /// All operations fail with `Unavailable` while set.
    pub unavailable: AtomicBool,
    /// Creation fails with `MissingCredentials` while set.
    pub missing_credentials: AtomicBool,
    /// Creation fails with a 401 `Rejected` while set.
    pub rejected: AtomicBool,
    /// Provider reference handed out by the next create call.
    pub next_reference: Mutex<String>,
    /// Search results, newest first, as the provider would order them.
    pub search_results: Mutex<Vec<CandidatePayment>>,
    /// Point-lookup table keyed by payment id.
    pub payments: Mutex<HashMap<String, CandidatePayment>>,
    pub create_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        let gateway = Self::default();
        *gateway.next_reference.lock().unwrap() = "PREF-1".to_string();
        gateway
    }

    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }

    pub fn set_search_results(&self, results: Vec<CandidatePayment>) {
        *self.search_results.lock().unwrap() = results;
    }

    pub fn insert_payment(&self, candidate: CandidatePayment) {
        self.payments
            .lock()
            .unwrap()
            .insert(candidate.payment_id.clone(), candidate);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment(
        &self,
        _request: &CreatePaymentRequest,
    ) -> Result<CreatedPayment, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.missing_credentials.load(Ordering::SeqCst) {
            return Err(GatewayError::MissingCredentials("no token".to_string()));
        }
        if self.rejected.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 401,
                body: "invalid access token".to_string(),
            });
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        let reference = self.next_reference.lock().unwrap().clone();
        Ok(CreatedPayment {
            provider_reference: reference.clone(),
            qr_payload: format!("00020101021243650016COM.TEST.{}", reference),
            raw: serde_json::json!({"id": reference, "qr_data": "stub"}),
        })
    }

    async fn search_by_external_reference(
        &self,
        _external_reference: &str,
    ) -> Result<Vec<CandidatePayment>, GatewayError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        Ok(self.search_results.lock().unwrap().clone())
    }

    async fn get_payment_by_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<CandidatePayment>, GatewayError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        Ok(self.payments.lock().unwrap().get(payment_id).cloned())
    }
}

/// Build a candidate payment the way the provider's search reports them.
pub fn candidate(
    payment_id: &str,
    preference_reference: Option<&str>,
    external_reference: Option<&str>,
    status: &str,
    date_created: Option<&str>,
) -> CandidatePayment {
    let raw = serde_json::json!({
        "id": payment_id,
        "status": status,
        "status_detail": if status == "approved" { "accredited" } else { status },
        "external_reference": external_reference,
        "date_created": date_created,
    });
    CandidatePayment {
        payment_id: payment_id.to_string(),
        preference_reference: preference_reference.map(String::from),
        external_reference: external_reference.map(String::from),
        status: status.to_string(),
        date_created: date_created.map(String::from),
        raw,
    }
}

/// App state backed by a single shared in-memory database and a mock
/// gateway. Pool size 1 keeps every handle on the same database.
pub fn create_test_state() -> (AppState, Arc<MockGateway>) {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    let gateway = Arc::new(MockGateway::new());
    let reconciler = Reconciler::new(
        pool.clone(),
        gateway.clone(),
        ReconcilePolicy::default(),
    );

    let state = AppState {
        db: pool,
        gateway: gateway.clone(),
        reconciler,
        webhook_secret: None,
    };
    (state, gateway)
}

/// Full router as served in production.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(qrtill::handlers::pos_router())
        .merge(qrtill::handlers::webhook_router())
        .with_state(state)
}

/// Record a payment attempt as the create endpoint would.
pub fn create_test_transaction(
    state: &AppState,
    provider_reference: &str,
    external_reference: Option<&str>,
) -> Transaction {
    let conn = state.db.get().unwrap();
    queries::create_transaction(
        &conn,
        &CreateTransaction {
            provider_reference: provider_reference.to_string(),
            external_reference: external_reference.map(String::from),
            amount_cents: 2500,
            description: Some("test sale".to_string()),
            raw_payload: None,
        },
    )
    .unwrap()
}

/// Shift a transaction's creation time into the past to exercise the
/// staleness guard.
pub fn backdate_transaction(state: &AppState, transaction_id: &str, secs: i64) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "UPDATE transactions SET created_at = created_at - ?1 WHERE id = ?2",
        rusqlite::params![secs, transaction_id],
    )
    .unwrap();
}

pub fn get_transaction(state: &AppState, provider_reference: &str) -> Option<Transaction> {
    let conn = state.db.get().unwrap();
    queries::get_transaction_by_provider_reference(&conn, provider_reference).unwrap()
}
