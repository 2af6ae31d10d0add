//! QRTill - QR payments for the point of sale.
//!
//! Creates MercadoPago-style QR payment intents, records one transaction per
//! attempt, and reconciles local status against the provider's ground truth
//! through client polling and inbound webhooks.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod reconcile;
