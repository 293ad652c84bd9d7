use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::config::BillingConfig;
use crate::workflows::dossier::repository::{
    ActorDirectory, CommentStore, DossierRepository, Invoice, InvoiceStore, MeetingStore,
    NewInvoice, NotificationChannel, RepositoryError, TimelineStore,
};
use crate::workflows::dossier::timeline::{CommentRecord, MeetingRecord};
use crate::workflows::dossier::{
    ActorAccount, ActorContext, ActorRole, ClientRef, Dossier, DossierId, DossierLifecycleService,
    DossierParties, DossierStatus, ExpertRef, NewTimelineEvent, NotificationError,
    NotificationRequest, ReferrerRef, StatusRegistry, TimelineEvent, TimelineLog,
};

pub(super) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 12, 9, 30, 0).single().expect("valid timestamp")
}

pub(super) fn client_actor() -> ActorContext {
    ActorContext {
        role: ActorRole::Client,
        actor_id: "client-1".to_string(),
        display_name: "Claire Martin".to_string(),
    }
}

pub(super) fn expert_actor() -> ActorContext {
    ActorContext {
        role: ActorRole::Expert,
        actor_id: "expert-1".to_string(),
        display_name: "Marc Petit".to_string(),
    }
}

pub(super) fn admin_actor() -> ActorContext {
    ActorContext {
        role: ActorRole::Admin,
        actor_id: "admin-1".to_string(),
        display_name: "Sophie Blanc".to_string(),
    }
}

pub(super) fn dossier_at(status: DossierStatus) -> Dossier {
    let mut dossier = Dossier::new(
        DossierId("dos-1".to_string()),
        ClientRef {
            id: "client-1".to_string(),
            auth_id: "auth-client-1".to_string(),
            display_name: "Claire Martin".to_string(),
        },
        "TICPE",
        10_000.0,
        fixed_now(),
    );
    dossier.expert = Some(ExpertRef {
        id: "expert-1".to_string(),
        auth_id: "auth-expert-1".to_string(),
        display_name: "Marc Petit".to_string(),
        client_fee_pct: Some(0.30),
        platform_fee_pct: Some(0.30),
    });
    dossier.status = status;
    dossier.advance_progress(status);
    dossier
}

pub(super) fn dossier_with_referrer(status: DossierStatus, share_pct: f64) -> Dossier {
    let mut dossier = dossier_at(status);
    dossier.referrer = Some(ReferrerRef {
        id: "referrer-1".to_string(),
        auth_id: "auth-referrer-1".to_string(),
        display_name: "Apport & Co".to_string(),
        share_pct: Some(share_pct),
    });
    dossier
}

#[derive(Default)]
pub(super) struct MemoryDossierRepository {
    records: Mutex<HashMap<DossierId, Dossier>>,
}

impl DossierRepository for MemoryDossierRepository {
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

#[derive(Default)]
pub(super) struct MemoryTimelineStore {
    events: Mutex<Vec<TimelineEvent>>,
    sequence: AtomicU64,
}

impl MemoryTimelineStore {
    pub(super) fn events(&self) -> Vec<TimelineEvent> {
        self.events.lock().expect("timeline mutex poisoned").clone()
    }
}

impl TimelineStore for MemoryTimelineStore {
    fn insert(&self, event: NewTimelineEvent) -> Result<TimelineEvent, RepositoryError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stored = TimelineEvent {
            id: format!("evt-{id:04}"),
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
        Ok(self
            .events
            .lock()
            .expect("timeline mutex poisoned")
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

#[derive(Default)]
pub(super) struct MemoryCommentStore {
    pub(super) records: Mutex<Vec<CommentRecord>>,
}

impl CommentStore for MemoryCommentStore {
    fn list(&self, dossier_id: &DossierId) -> Result<Vec<CommentRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("comment mutex poisoned")
            .iter()
            .filter(|record| &record.dossier_id == dossier_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(super) struct MemoryMeetingStore {
    pub(super) records: Mutex<Vec<MeetingRecord>>,
}

impl MeetingStore for MemoryMeetingStore {
    fn list(&self, dossier_id: &DossierId) -> Result<Vec<MeetingRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("meeting mutex poisoned")
            .iter()
            .filter(|record| &record.dossier_id == dossier_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(super) struct MemoryInvoiceStore {
    invoices: Mutex<Vec<Invoice>>,
    yearly: Mutex<HashMap<i32, u64>>,
}

impl MemoryInvoiceStore {
    pub(super) fn invoices(&self) -> Vec<Invoice> {
        self.invoices.lock().expect("invoice mutex poisoned").clone()
    }
}

impl InvoiceStore for MemoryInvoiceStore {
    fn find_for_cycle(
        &self,
        dossier_id: &DossierId,
        base_amount: f64,
    ) -> Result<Option<Invoice>, RepositoryError> {
        Ok(self
            .invoices
            .lock()
            .expect("invoice mutex poisoned")
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
            reference: format!("FACT-{year}-{:04}", *sequence),
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

#[derive(Default)]
pub(super) struct MemoryChannel {
    sent: Mutex<Vec<NotificationRequest>>,
    failing_recipients: Mutex<HashSet<String>>,
}

impl MemoryChannel {
    pub(super) fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().expect("channel mutex poisoned").clone()
    }

    pub(super) fn fail_for(&self, auth_id: &str) {
        self.failing_recipients
            .lock()
            .expect("channel mutex poisoned")
            .insert(auth_id.to_string());
    }
}

impl NotificationChannel for MemoryChannel {
    fn deliver(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        let failing = self
            .failing_recipients
            .lock()
            .expect("channel mutex poisoned");
        if failing.contains(&request.recipient.auth_id) {
            return Err(NotificationError {
                recipient: request.recipient.auth_id.clone(),
                detail: "mailbox unreachable".to_string(),
            });
        }
        drop(failing);
        self.sent
            .lock()
            .expect("channel mutex poisoned")
            .push(request.clone());
        Ok(())
    }
}

/// Resolves recipients straight from the dossier record plus one platform
/// admin account.
pub(super) struct RecordDirectory;

impl ActorDirectory for RecordDirectory {
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
                auth_id: "auth-admin-1".to_string(),
                role: ActorRole::Admin,
                display_name: "Sophie Blanc".to_string(),
            }],
        })
    }
}

pub(super) struct Harness {
    pub(super) service:
        Arc<DossierLifecycleService<MemoryDossierRepository, MemoryChannel>>,
    pub(super) repository: Arc<MemoryDossierRepository>,
    pub(super) channel: Arc<MemoryChannel>,
    pub(super) timeline: Arc<MemoryTimelineStore>,
    pub(super) comments: Arc<MemoryCommentStore>,
    pub(super) meetings: Arc<MemoryMeetingStore>,
    pub(super) invoices: Arc<MemoryInvoiceStore>,
}

pub(super) fn billing_config() -> BillingConfig {
    BillingConfig {
        invoice_prefix: "FACT".to_string(),
        reminder_after_days: 7,
    }
}

pub(super) fn harness() -> Harness {
    let repository = Arc::new(MemoryDossierRepository::default());
    let channel = Arc::new(MemoryChannel::default());
    let timeline = Arc::new(MemoryTimelineStore::default());
    let comments = Arc::new(MemoryCommentStore::default());
    let meetings = Arc::new(MemoryMeetingStore::default());
    let invoices = Arc::new(MemoryInvoiceStore::default());

    let log = Arc::new(TimelineLog::new(
        timeline.clone(),
        comments.clone(),
        meetings.clone(),
    ));
    let service = Arc::new(DossierLifecycleService::new(
        repository.clone(),
        channel.clone(),
        Arc::new(StatusRegistry::standard()),
        log,
        invoices.clone(),
        Arc::new(RecordDirectory),
        billing_config(),
    ));

    Harness {
        service,
        repository,
        channel,
        timeline,
        comments,
        meetings,
        invoices,
    }
}

pub(super) fn harness_with(dossier: Dossier) -> Harness {
    let harness = harness();
    harness
        .repository
        .insert(dossier)
        .expect("seed dossier inserts");
    harness
}
