use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::commission::CommissionResult;
use super::domain::{Dossier, DossierId, DossierParties};
use super::notify::{NotificationError, NotificationRequest};
use super::status::DossierStatus;
use super::timeline::{NewTimelineEvent, TimelineEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    /// The precondition status no longer matched at write time. The caller
    /// lost the race and must re-read before retrying.
    #[error("stale write: dossier status changed since it was read")]
    StaleWrite,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence seam for dossiers.
///
/// `update_guarded` is the only write path for transitions: it compares the
/// stored status against `expected` and rejects with `StaleWrite` on
/// mismatch, which is how concurrent transition requests are serialized
/// without holding locks across the computation.
///
/// Reads decode the persisted status through `DossierStatus`'s serde impl,
/// which accepts the legacy aliases. Adapters over a free-text status column
/// must run each row through `StatusRegistry::normalize` instead and hold
/// rows that come back `Unknown` out of the typed flow.
pub trait DossierRepository: Send + Sync {
    fn insert(&self, dossier: Dossier) -> Result<(), RepositoryError>;

    fn fetch(&self, id: &DossierId) -> Result<Dossier, RepositoryError>;

    fn update_guarded(
        &self,
        expected: DossierStatus,
        next: Dossier,
    ) -> Result<Dossier, RepositoryError>;

    /// Dossiers sitting in one of `statuses` with no update since `cutoff`,
    /// for the reminder sweep.
    fn stale_since(
        &self,
        statuses: &[DossierStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Dossier>, RepositoryError>;
}

/// Native timeline event storage. Comments and meetings live in their own
/// stores and are merged in at read time.
pub trait TimelineStore: Send + Sync {
    fn insert(&self, event: NewTimelineEvent) -> Result<TimelineEvent, RepositoryError>;

    fn list(&self, dossier_id: &DossierId) -> Result<Vec<TimelineEvent>, RepositoryError>;

    fn update(&self, event: TimelineEvent) -> Result<TimelineEvent, RepositoryError>;

    fn delete(&self, dossier_id: &DossierId, event_id: &str) -> Result<(), RepositoryError>;
}

/// Read side of the legacy comment table, projected into the timeline.
pub trait CommentStore: Send + Sync {
    fn list(&self, dossier_id: &DossierId) -> Result<Vec<super::timeline::CommentRecord>, RepositoryError>;
}

/// Read side of scheduled meetings, projected into the timeline.
pub trait MeetingStore: Send + Sync {
    fn list(&self, dossier_id: &DossierId) -> Result<Vec<super::timeline::MeetingRecord>, RepositoryError>;
}

/// Platform invoice for one audit cycle of one dossier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Human-readable reference, `PREFIX-YEAR-NNNN`, sequential per year.
    pub reference: String,
    pub dossier_id: DossierId,
    pub base_amount: f64,
    /// Absent when the computation failed and the invoice was persisted
    /// flagged for manual review.
    pub result: Option<CommissionResult>,
    pub flag: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoice {
    pub dossier_id: DossierId,
    pub base_amount: f64,
    pub result: Option<CommissionResult>,
    pub flag: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Invoice persistence. `create` assigns the next sequential reference for
/// the invoice's calendar year; uniqueness of the sequence is the store's
/// responsibility.
pub trait InvoiceStore: Send + Sync {
    /// The invoice already persisted for this dossier and audited amount, if
    /// any. One audit cycle computes at most one commission.
    fn find_for_cycle(
        &self,
        dossier_id: &DossierId,
        base_amount: f64,
    ) -> Result<Option<Invoice>, RepositoryError>;

    fn create(&self, invoice: NewInvoice) -> Result<Invoice, RepositoryError>;
}

/// Resolves the accounts behind a dossier's parties for notification
/// fan-out. Admin accounts are platform-wide, not per dossier.
pub trait ActorDirectory: Send + Sync {
    fn parties(&self, dossier: &Dossier) -> Result<DossierParties, RepositoryError>;
}

/// Delivery seam for notifications. Implementations must not panic on
/// delivery failure; the dispatcher isolates failures per recipient.
pub trait NotificationChannel: Send + Sync {
    fn deliver(&self, request: &NotificationRequest) -> Result<(), NotificationError>;
}
