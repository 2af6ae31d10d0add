use serde::{Deserialize, Serialize};

/// Lifecycle status of a payment transaction.
///
/// `Initial` and `Pending` both mean "awaiting resolution" — `Initial` only
/// distinguishes "QR shown, never polled" from "polled at least once".
/// External callers never see `Initial`; it is normalized to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Initial,
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl TransactionStatus {
    /// Final statuses are absorbing: once set, no reconciliation event may
    /// overwrite them.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    /// The externally visible status string (never leaks `initial`).
    pub fn public_str(&self) -> &'static str {
        match self {
            Self::Initial | Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payment attempt at the register.
///
/// `provider_reference` is assigned once at creation (the provider's order/
/// preference id) and is the primary correlation key for polling.
/// `external_reference` is the POS order reference the caller supplied; order
/// numbering schemes may be reused over time, so it is only a secondary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub provider_reference: String,
    pub external_reference: Option<String>,
    pub status: TransactionStatus,
    /// Informational only; not used by reconciliation.
    pub amount_cents: i64,
    pub description: Option<String>,
    /// Last-seen raw provider response, stored verbatim for audit.
    pub raw_payload: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Data required to record a newly created payment.
#[derive(Debug, Clone)]
pub struct CreateTransaction {
    pub provider_reference: String,
    pub external_reference: Option<String>,
    pub amount_cents: i64,
    pub description: Option<String>,
    pub raw_payload: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finality() {
        assert!(!TransactionStatus::Initial.is_final());
        assert!(!TransactionStatus::Pending.is_final());
        assert!(TransactionStatus::Approved.is_final());
        assert!(TransactionStatus::Rejected.is_final());
        assert!(TransactionStatus::Cancelled.is_final());
    }

    #[test]
    fn test_initial_never_leaks() {
        assert_eq!(TransactionStatus::Initial.public_str(), "pending");
        assert_eq!(TransactionStatus::Pending.public_str(), "pending");
    }

    #[test]
    fn test_status_roundtrip() {
        for s in ["initial", "pending", "approved", "rejected", "cancelled"] {
            let parsed: TransactionStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("refunded".parse::<TransactionStatus>().is_err());
    }
}
