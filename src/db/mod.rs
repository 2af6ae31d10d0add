mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::gateway::PaymentGateway;
use crate::reconcile::Reconciler;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub gateway: Arc<dyn PaymentGateway>,
    pub reconciler: Reconciler,
    /// Shared secret for webhook signature verification, if configured.
    pub webhook_secret: Option<String>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
