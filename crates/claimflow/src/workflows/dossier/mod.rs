//! Dossier lifecycle workflow: status machine, waterfall commission
//! settlement, merged timeline, and notification fan-out.

pub mod commission;
pub mod domain;
pub mod notify;
pub mod repository;
pub mod router;
pub mod service;
pub mod status;
pub mod timeline;

#[cfg(test)]
mod tests;

pub use commission::{
    normalize_pct, round_cents, CommissionError, CommissionInputs, CommissionResult,
    WaterfallCommissionEngine, VAT_RATE,
};
pub use domain::{
    snapshot_keys, ActorAccount, ActorContext, ActorRole, ClientRef, Dossier, DossierId,
    DossierParties, ExpertRef, ReferrerRef, TransitionPayload,
};
pub use notify::{
    DispatchReport, DomainEvent, NotificationDispatcher, NotificationError, NotificationRequest,
    Priority,
};
pub use repository::{
    ActorDirectory, CommentStore, DossierRepository, Invoice, InvoiceStore, MeetingStore,
    NewInvoice, NotificationChannel, RepositoryError, TimelineStore,
};
pub use router::{dossier_router, TransitionRequest};
pub use service::{
    DossierLifecycleService, LifecycleError, TransitionReceipt, CLIENT_ACTIONABLE_STATUSES,
};
pub use status::{
    DossierStatus, IllegalTransition, NormalizedStatus, StatusRegistry, TransitionRule,
};
pub use timeline::{
    CommentRecord, EventKind, MeetingRecord, NewTimelineEvent, TimelineError, TimelineEvent,
    TimelineFilter, TimelineLog, TimelinePage,
};
