//! In-memory adapters behind the workflow seams. They stand in for the
//! database and the delivery gateway in local runs and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use claimflow::workflows::dossier::repository::{
    ActorDirectory, CommentStore, DossierRepository, Invoice, InvoiceStore, MeetingStore,
    NewInvoice, NotificationChannel, RepositoryError, TimelineStore,
};
use claimflow::workflows::dossier::timeline::{CommentRecord, MeetingRecord};
use claimflow::workflows::dossier::{
    ActorAccount, ActorRole, Dossier, DossierId, DossierParties, DossierStatus, NewTimelineEvent,
    NotificationError, NotificationRequest, TimelineEvent,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryDossierRepository {
    records: Arc<Mutex<HashMap<DossierId, Dossier>>>,
}

impl DossierRepository for InMemoryDossierRepository {
    fn insert(&self, dossier: Dossier) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&dossier.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(dossier.id.clone(), dossier);
        Ok(())
    }

    fn fetch(&self, id: &DossierId) -> Result<Dossier, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        guard.get(id).cloned().ok_or(RepositoryError::NotFound)
    }

    fn update_guarded(
        &self,
        expected: DossierStatus,
        next: Dossier,
    ) -> Result<Dossier, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let current = guard.get(&next.id).ok_or(RepositoryError::NotFound)?;
        if current.status != expected {
            return Err(RepositoryError::StaleWrite);
        }
        guard.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    fn stale_since(
        &self,
        statuses: &[DossierStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Dossier>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|dossier| statuses.contains(&dossier.status) && dossier.updated_at <= cutoff)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryTimelineStore {
    events: Arc<Mutex<Vec<TimelineEvent>>>,
    sequence: Arc<AtomicU64>,
}

impl TimelineStore for InMemoryTimelineStore {
    fn insert(&self, event: NewTimelineEvent) -> Result<TimelineEvent, RepositoryError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stored = TimelineEvent {
            id: format!("evt-{id:08}"),
            dossier_id: event.dossier_id,
            occurred_at: event.occurred_at,
            kind: event.kind,
            actor_role: event.actor_role,
            actor_id: event.actor_id,
            actor_name: event.actor_name,
            title: event.title,
            description: event.description,
            metadata: event.metadata,
        };
        self.events
            .lock()
            .expect("timeline mutex poisoned")
            .push(stored.clone());
        Ok(stored)
    }

    fn list(&self, dossier_id: &DossierId) -> Result<Vec<TimelineEvent>, RepositoryError> {
        let guard = self.events.lock().expect("timeline mutex poisoned");
        Ok(guard
            .iter()
            .filter(|event| &event.dossier_id == dossier_id)
            .cloned()
            .collect())
    }

    fn update(&self, event: TimelineEvent) -> Result<TimelineEvent, RepositoryError> {
        let mut guard = self.events.lock().expect("timeline mutex poisoned");
        let slot = guard
            .iter_mut()
            .find(|candidate| candidate.id == event.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = event.clone();
        Ok(event)
    }

    fn delete(&self, dossier_id: &DossierId, event_id: &str) -> Result<(), RepositoryError> {
        let mut guard = self.events.lock().expect("timeline mutex poisoned");
        let before = guard.len();
        guard.retain(|event| !(&event.dossier_id == dossier_id && event.id == event_id));
        if guard.len() == before {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryCommentStore {
    records: Arc<Mutex<Vec<CommentRecord>>>,
}

impl CommentStore for InMemoryCommentStore {
    fn list(&self, dossier_id: &DossierId) -> Result<Vec<CommentRecord>, RepositoryError> {
        let guard = self.records.lock().expect("comment mutex poisoned");
        Ok(guard
            .iter()
            .filter(|record| &record.dossier_id == dossier_id)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryMeetingStore {
    records: Arc<Mutex<Vec<MeetingRecord>>>,
}

impl MeetingStore for InMemoryMeetingStore {
    fn list(&self, dossier_id: &DossierId) -> Result<Vec<MeetingRecord>, RepositoryError> {
        let guard = self.records.lock().expect("meeting mutex poisoned");
        Ok(guard
            .iter()
            .filter(|record| &record.dossier_id == dossier_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub(crate) struct InMemoryInvoiceStore {
    prefix: String,
    invoices: Arc<Mutex<Vec<Invoice>>>,
    yearly: Arc<Mutex<HashMap<i32, u64>>>,
}

impl InMemoryInvoiceStore {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            invoices: Arc::new(Mutex::new(Vec::new())),
            yearly: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl InvoiceStore for InMemoryInvoiceStore {
    fn find_for_cycle(
        &self,
        dossier_id: &DossierId,
        base_amount: f64,
    ) -> Result<Option<Invoice>, RepositoryError> {
        let guard = self.invoices.lock().expect("invoice mutex poisoned");
        Ok(guard
            .iter()
            .find(|invoice| {
                &invoice.dossier_id == dossier_id
                    && (invoice.base_amount - base_amount).abs() < f64::EPSILON
            })
            .cloned())
    }

    fn create(&self, invoice: NewInvoice) -> Result<Invoice, RepositoryError> {
        let year = invoice.created_at.year();
        let mut yearly = self.yearly.lock().expect("invoice mutex poisoned");
        let sequence = yearly.entry(year).or_insert(0);
        *sequence += 1;
        let stored = Invoice {
            reference: format!("{}-{year}-{:04}", self.prefix, *sequence),
            dossier_id: invoice.dossier_id,
            base_amount: invoice.base_amount,
            result: invoice.result,
            flag: invoice.flag,
            created_at: invoice.created_at,
        };
        self.invoices
            .lock()
            .expect("invoice mutex poisoned")
            .push(stored.clone());
        Ok(stored)
    }
}

/// Delivery adapter for local runs: notifications land in the log instead
/// of a mail or push gateway.
#[derive(Default, Clone)]
pub(crate) struct LoggingNotificationChannel;

impl NotificationChannel for LoggingNotificationChannel {
    fn deliver(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        info!(
            recipient = %request.recipient.auth_id,
            notification_type = request.notification_type,
            priority = ?request.priority,
            title = %request.title,
            "notification delivered"
        );
        Ok(())
    }
}

/// Resolves recipients straight from the dossier record plus a fixed
/// platform operations account.
#[derive(Default, Clone)]
pub(crate) struct RecordActorDirectory;

impl ActorDirectory for RecordActorDirectory {
    fn parties(&self, dossier: &Dossier) -> Result<DossierParties, RepositoryError> {
        Ok(DossierParties {
            dossier_id: dossier.id.clone(),
            product_label: dossier.product_label.clone(),
            client: ActorAccount {
                auth_id: dossier.client.auth_id.clone(),
                role: ActorRole::Client,
                display_name: dossier.client.display_name.clone(),
            },
            expert: dossier.expert.as_ref().map(|expert| ActorAccount {
                auth_id: expert.auth_id.clone(),
                role: ActorRole::Expert,
                display_name: expert.display_name.clone(),
            }),
            referrer: dossier.referrer.as_ref().map(|referrer| ActorAccount {
                auth_id: referrer.auth_id.clone(),
                role: ActorRole::Referrer,
                display_name: referrer.display_name.clone(),
            }),
            admins: vec![ActorAccount {
                auth_id: "ops@claimflow".to_string(),
                role: ActorRole::Admin,
                display_name: "Operations".to_string(),
            }],
        })
    }
}
