//! Payment status reconciliation.
//!
//! Two triggers race on the same transaction record: the register polling for
//! a result and the provider pushing webhook notifications (at-least-once,
//! unordered, possibly minutes late). Every status transition goes through
//! the store's compare-and-set, so the invariants hold under any
//! interleaving:
//!
//! - a final status (`approved`/`rejected`/`cancelled`) is never overwritten;
//! - status is never resolved from an unfiltered provider result set;
//! - notifications older than the staleness window never resurrect a
//!   transaction;
//! - provider failures degrade to "no change", never to an error on the
//!   polling path.

use std::sync::Arc;

use chrono::Utc;

use crate::db::{queries, DbPool};
use crate::error::Result;
use crate::gateway::{CandidatePayment, PaymentGateway};
use crate::models::{Transaction, TransactionStatus};

/// Tunables for the reconciliation guards.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilePolicy {
    /// Maximum transaction age for webhook-driven writes. A notification for
    /// anything older is treated as stale or replayed and ignored.
    pub staleness_window_secs: i64,
    /// Tolerance when comparing provider payment timestamps against our
    /// transaction creation time (provider clocks are not ours).
    pub clock_skew_secs: i64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            staleness_window_secs: 30 * 60,
            clock_skew_secs: 60,
        }
    }
}

/// Result of a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Resolved {
        status: TransactionStatus,
        /// Provider-reported detail (e.g. "accredited"), when a candidate
        /// payment was matched this round.
        detail: Option<String>,
    },
    /// No local transaction and nothing resolvable at the provider.
    NotFound,
}

impl PollOutcome {
    fn stored(status: TransactionStatus) -> Self {
        // `initial` is internal bookkeeping; callers only ever see `pending`.
        let status = if status == TransactionStatus::Initial {
            TransactionStatus::Pending
        } else {
            status
        };
        PollOutcome::Resolved {
            status,
            detail: None,
        }
    }
}

/// Why a notification was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Provider unreachable or returned garbage; nothing safe to conclude.
    GatewayFailed,
    /// The provider does not know this payment id.
    UnknownPayment,
    /// Payment resolved fine but correlates to no transaction we track.
    NoMatchingTransaction,
    /// Guard A: the stored status is already final.
    AlreadyFinal,
    /// Guard B: the transaction is older than the staleness window.
    Stale,
    /// Guards passed but the conditional write changed nothing - a
    /// concurrent poll or notification got there first.
    LostWrite,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GatewayFailed => "gateway_failed",
            Self::UnknownPayment => "unknown_payment",
            Self::NoMatchingTransaction => "no_matching_transaction",
            Self::AlreadyFinal => "already_final",
            Self::Stale => "stale",
            Self::LostWrite => "lost_write",
        }
    }
}

/// Result of processing a provider notification.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationOutcome {
    Applied { status: TransactionStatus },
    Ignored { reason: IgnoreReason },
}

/// Converges locally stored transaction statuses to the provider's ground
/// truth. Cheap to clone; handlers share one per process.
#[derive(Clone)]
pub struct Reconciler {
    db: DbPool,
    gateway: Arc<dyn PaymentGateway>,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(db: DbPool, gateway: Arc<dyn PaymentGateway>, policy: ReconcilePolicy) -> Self {
        Self {
            db,
            gateway,
            policy,
        }
    }

    /// Resolve the current status for a transaction, refreshing it from the
    /// provider when that can be done safely.
    ///
    /// `provider_reference` is the reference assigned at creation time (an
    /// order/preference id, not a payment id). `external_reference` is
    /// optional; when absent it is taken from the stored transaction.
    pub async fn poll(
        &self,
        provider_reference: &str,
        external_reference: Option<&str>,
    ) -> Result<PollOutcome> {
        let tx = {
            let conn = self.db.get()?;
            queries::get_transaction_by_provider_reference(&conn, provider_reference)?
        };

        // Idempotent short-circuit: finality is absorbing, no provider call
        // can change the answer.
        if let Some(ref tx) = tx {
            if tx.status.is_final() {
                return Ok(PollOutcome::Resolved {
                    status: tx.status,
                    detail: None,
                });
            }
        }

        let external_reference = external_reference
            .map(String::from)
            .or_else(|| tx.as_ref().and_then(|t| t.external_reference.clone()));

        // Without any correlation key there is no filter to search by, and an
        // unfiltered "recent payments" listing could match someone else's
        // approved payment. Stay pending instead.
        let Some(external_reference) = external_reference else {
            return Ok(match tx {
                Some(tx) => PollOutcome::stored(tx.status),
                None => {
                    tracing::debug!(
                        provider_reference,
                        "Poll without any correlation key, returning pending"
                    );
                    PollOutcome::Resolved {
                        status: TransactionStatus::Pending,
                        detail: None,
                    }
                }
            });
        };

        let candidates = match self
            .gateway
            .search_by_external_reference(&external_reference)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(
                    provider_reference,
                    error = %e,
                    "Payment search failed, falling back to stored status"
                );
                return Ok(match tx {
                    Some(tx) => PollOutcome::stored(tx.status),
                    None => PollOutcome::NotFound,
                });
            }
        };

        match self.select_candidate(&candidates, provider_reference, &external_reference, tx.as_ref())
        {
            Some(candidate) => {
                let status = candidate.local_status();
                let detail = candidate
                    .raw
                    .get("status_detail")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .or_else(|| Some(candidate.status.clone()));

                if let Some(ref tx) = tx {
                    self.apply_poll_result(tx, candidate)?;
                }
                Ok(PollOutcome::Resolved { status, detail })
            }
            None => Ok(match tx {
                Some(tx) => PollOutcome::stored(tx.status),
                None => PollOutcome::NotFound,
            }),
        }
    }

    /// Pick at most one candidate from the provider's search results.
    ///
    /// Precedence:
    /// 1. a candidate whose order/preference reference equals ours exactly -
    ///    the strongest correlation, accepted unconditionally;
    /// 2. a candidate with no order reference at all (older payment shapes)
    ///    whose external reference matches AND whose creation timestamp is at
    ///    or after our transaction's (minus clock skew). External references
    ///    get reused across orders, so without the timestamp check this could
    ///    match a different, older payment.
    ///
    /// A candidate whose timestamp cannot be parsed is skipped, not guessed
    /// at.
    fn select_candidate<'a>(
        &self,
        candidates: &'a [CandidatePayment],
        provider_reference: &str,
        external_reference: &str,
        tx: Option<&Transaction>,
    ) -> Option<&'a CandidatePayment> {
        if let Some(exact) = candidates
            .iter()
            .find(|c| c.preference_reference.as_deref() == Some(provider_reference))
        {
            return Some(exact);
        }

        // Rule 2 needs a local creation time to compare against.
        let tx = tx?;
        let min_created_at = tx.created_at - self.policy.clock_skew_secs;
        candidates.iter().find(|c| {
            c.preference_reference.is_none()
                && c.external_reference.as_deref() == Some(external_reference)
                && c.created_at_utc().is_some_and(|t| t >= min_created_at)
        })
    }

    /// Write a matched candidate's status. The conditional write re-checks
    /// finality, so losing a race against a webhook is harmless.
    fn apply_poll_result(&self, tx: &Transaction, candidate: &CandidatePayment) -> Result<()> {
        let status = candidate.local_status();
        if status == tx.status {
            return Ok(());
        }

        let conn = self.db.get()?;
        let raw = candidate.raw.to_string();
        let applied =
            queries::compare_and_set_status(&conn, &tx.id, status, Some(&raw), None)?;
        if applied {
            tracing::info!(
                transaction_id = %tx.id,
                provider_reference = %tx.provider_reference,
                from = %tx.status,
                to = %status,
                "Poll updated transaction status"
            );
        }
        Ok(())
    }

    /// Process an inbound provider notification naming a payment id.
    ///
    /// Never fails toward the webhook caller: everything that cannot be
    /// applied safely reports `Ignored` with a reason and leaves the store
    /// untouched.
    pub async fn handle_notification(
        &self,
        provider_payment_id: &str,
    ) -> Result<NotificationOutcome> {
        let candidate = match self.gateway.get_payment_by_id(provider_payment_id).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                tracing::info!(provider_payment_id, "Notification for unknown payment");
                return Ok(NotificationOutcome::Ignored {
                    reason: IgnoreReason::UnknownPayment,
                });
            }
            Err(e) => {
                tracing::warn!(provider_payment_id, error = %e, "Payment lookup failed");
                return Ok(NotificationOutcome::Ignored {
                    reason: IgnoreReason::GatewayFailed,
                });
            }
        };

        let conn = self.db.get()?;

        // Correlate: order/preference reference first (exact, unambiguous),
        // external reference as fallback for older payment shapes.
        let tx = match candidate.preference_reference.as_deref() {
            Some(preference) => {
                queries::get_transaction_by_provider_reference(&conn, preference)?
            }
            None => None,
        };
        let tx = match tx {
            Some(tx) => Some(tx),
            None => match candidate.external_reference.as_deref() {
                Some(external) => {
                    queries::get_transaction_by_external_reference(&conn, external)?
                }
                None => None,
            },
        };

        let Some(tx) = tx else {
            // Informational notifications arrive for payments this service
            // never tracked. Not an error.
            tracing::info!(
                provider_payment_id,
                "Notification matches no tracked transaction"
            );
            return Ok(NotificationOutcome::Ignored {
                reason: IgnoreReason::NoMatchingTransaction,
            });
        };

        let now = Utc::now().timestamp();

        // Guard A: finality is absorbing, whatever the event claims.
        if tx.status.is_final() {
            return Ok(NotificationOutcome::Ignored {
                reason: IgnoreReason::AlreadyFinal,
            });
        }

        // Guard B: a notification must not resurrect a transaction past the
        // staleness window (replayed or badly delayed delivery).
        if now - tx.created_at > self.policy.staleness_window_secs {
            tracing::warn!(
                transaction_id = %tx.id,
                age_secs = now - tx.created_at,
                "Stale notification ignored"
            );
            return Ok(NotificationOutcome::Ignored {
                reason: IgnoreReason::Stale,
            });
        }

        // Guard C (state eligibility) plus re-checks of A and B live in the
        // conditional write itself, so a concurrent poll/webhook between the
        // checks above and here cannot slip through.
        let status = candidate.local_status();
        let raw = candidate.raw.to_string();
        let applied = queries::compare_and_set_status(
            &conn,
            &tx.id,
            status,
            Some(&raw),
            Some(now - self.policy.staleness_window_secs),
        )?;

        if applied {
            tracing::info!(
                transaction_id = %tx.id,
                provider_payment_id,
                from = %tx.status,
                to = %status,
                "Notification applied"
            );
            Ok(NotificationOutcome::Applied { status })
        } else {
            Ok(NotificationOutcome::Ignored {
                reason: IgnoreReason::LostWrite,
            })
        }
    }

    /// Cancel a still-pending payment at the register. Returns the updated
    /// transaction, or `None` when it is unknown or no longer cancellable.
    pub fn cancel(&self, provider_reference: &str) -> Result<Option<Transaction>> {
        let conn = self.db.get()?;
        let Some(tx) =
            queries::get_transaction_by_provider_reference(&conn, provider_reference)?
        else {
            return Ok(None);
        };

        let applied = queries::compare_and_set_status(
            &conn,
            &tx.id,
            TransactionStatus::Cancelled,
            None,
            None,
        )?;
        if !applied {
            return Ok(None);
        }

        tracing::info!(
            transaction_id = %tx.id,
            provider_reference,
            "Payment cancelled at the register"
        );
        queries::get_transaction_by_provider_reference(&conn, provider_reference)
    }
}
