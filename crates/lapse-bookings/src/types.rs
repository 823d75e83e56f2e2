use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a booking is in its lifecycle.
///
/// `Confirmed` and `Cancelled` are absorbing: nothing leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// A persisted booking record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// UUIDv7 string, primary key.
    pub id: String,
    pub user_id: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of [`crate::BookingStateMachine::cancel`].
///
/// Every variant is a success for the caller; only the first one changed
/// anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(Booking),
    AlreadyCancelled(Booking),
    /// Confirmed bookings are never cancelled automatically.
    RefusedConfirmed(Booking),
}

impl CancelOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            CancelOutcome::Cancelled(b)
            | CancelOutcome::AlreadyCancelled(b)
            | CancelOutcome::RefusedConfirmed(b) => b,
        }
    }
}
