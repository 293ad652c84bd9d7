use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::BillingConfig;

use super::commission::{
    normalize_pct, CommissionError, CommissionInputs, CommissionResult, WaterfallCommissionEngine,
};
use super::domain::{
    snapshot_keys, ActorContext, ActorRole, Dossier, DossierId, TransitionPayload,
};
use super::notify::{DomainEvent, NotificationDispatcher};
use super::repository::{
    ActorDirectory, DossierRepository, Invoice, InvoiceStore, NewInvoice, NotificationChannel,
    RepositoryError,
};
use super::status::{DossierStatus, IllegalTransition, StatusRegistry};
use super::timeline::{
    EventKind, NewTimelineEvent, TimelineError, TimelineFilter, TimelineLog, TimelinePage,
};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    /// The dossier changed under the caller between read and write.
    #[error("dossier was modified concurrently, re-read and retry")]
    StaleWriteConflict,
    #[error("dossier not found")]
    NotFound,
    /// A computation input is absent from the party records. Never papered
    /// over with a default rate.
    #[error("missing computation input: {which}")]
    MissingComputationInput { which: &'static str },
    /// An invoice was already computed from the recorded audited amount.
    #[error("final amount is locked by an existing invoice")]
    FinalAmountLocked,
    #[error(transparent)]
    Timeline(TimelineError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for LifecycleError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => LifecycleError::NotFound,
            RepositoryError::StaleWrite => LifecycleError::StaleWriteConflict,
            other => LifecycleError::Repository(other),
        }
    }
}

impl From<TimelineError> for LifecycleError {
    fn from(err: TimelineError) -> Self {
        match err {
            TimelineError::Repository(inner) => LifecycleError::from(inner),
            other => LifecycleError::Timeline(other),
        }
    }
}

impl From<CommissionError> for LifecycleError {
    fn from(err: CommissionError) -> Self {
        match err {
            CommissionError::NonPositiveAmount => LifecycleError::MissingComputationInput {
                which: "positive audited amount",
            },
            CommissionError::MissingPercentage { which } => {
                LifecycleError::MissingComputationInput { which }
            }
        }
    }
}

/// Outcome of a committed transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionReceipt {
    pub dossier: Dossier,
    pub timeline_event_id: String,
}

/// Orchestrates the dossier workflow: authorizes transitions against the
/// status table, applies their side effects, commits with an optimistic
/// status precondition, records history, and fans notifications out.
///
/// Notification failures never roll back a committed transition.
pub struct DossierLifecycleService<R, N>
where
    R: DossierRepository,
    N: NotificationChannel,
{
    repository: Arc<R>,
    channel: Arc<N>,
    registry: Arc<StatusRegistry>,
    timeline: Arc<TimelineLog>,
    invoices: Arc<dyn InvoiceStore>,
    directory: Arc<dyn ActorDirectory>,
    billing: BillingConfig,
}

impl<R, N> DossierLifecycleService<R, N>
where
    R: DossierRepository,
    N: NotificationChannel,
{
    pub fn new(
        repository: Arc<R>,
        channel: Arc<N>,
        registry: Arc<StatusRegistry>,
        timeline: Arc<TimelineLog>,
        invoices: Arc<dyn InvoiceStore>,
        directory: Arc<dyn ActorDirectory>,
        billing: BillingConfig,
    ) -> Self {
        Self {
            repository,
            channel,
            registry,
            timeline,
            invoices,
            directory,
            billing,
        }
    }

    pub fn dossier(&self, id: &DossierId) -> Result<Dossier, LifecycleError> {
        Ok(self.repository.fetch(id)?)
    }

    /// Drive one status transition end to end.
    ///
    /// The stored status at read time is the precondition for the write;
    /// concurrent requests race on it and exactly one wins.
    pub fn request_transition(
        &self,
        id: &DossierId,
        target: DossierStatus,
        actor: &ActorContext,
        payload: &TransitionPayload,
    ) -> Result<TransitionReceipt, LifecycleError> {
        let dossier = self.repository.fetch(id)?;
        let from = dossier.status;

        self.registry.authorize(from, target, actor.role)?;

        let now = Utc::now();
        let mut next = dossier.clone();
        next.status = target;
        next.advance_progress(target);
        next.updated_at = now;

        let event = self.apply_side_effects(&mut next, from, target, actor, payload, now)?;

        let committed = self.repository.update_guarded(from, next)?;

        let timeline_event = self.timeline.append(NewTimelineEvent {
            dossier_id: committed.id.clone(),
            occurred_at: now,
            kind: EventKind::StatusChange,
            actor_role: actor.role,
            actor_id: Some(actor.actor_id.clone()),
            actor_name: actor.display_name.clone(),
            title: format!("{} -> {}", from.as_str(), target.as_str()),
            description: payload.message.clone(),
            metadata: json!({
                "from": from.as_str(),
                "to": target.as_str(),
            }),
        })?;

        info!(
            dossier = %committed.id.0,
            from = from.as_str(),
            to = target.as_str(),
            actor = %actor.actor_id,
            "dossier transition committed"
        );

        // Billing state is persisted only once the transition has committed;
        // a losing writer must leave no invoice behind.
        let event = match target {
            DossierStatus::PaymentRequested => Some(self.payment_requested_event(&committed)?),
            _ => event,
        };

        if let Some(event) = event {
            self.notify(&committed, &event);
        }

        Ok(TransitionReceipt {
            dossier: committed,
            timeline_event_id: timeline_event.id,
        })
    }

    pub fn timeline(
        &self,
        id: &DossierId,
        filter: &TimelineFilter,
    ) -> Result<TimelinePage, LifecycleError> {
        // Reject reads for dossiers that do not exist rather than returning
        // an empty page.
        self.repository.fetch(id)?;
        Ok(self.timeline.read(id, filter)?)
    }

    /// Non-binding breakdown from the rates currently on the party records.
    /// Nothing is persisted; a later rate change changes the preview.
    pub fn commission_preview(&self, id: &DossierId) -> Result<CommissionResult, LifecycleError> {
        let dossier = self.repository.fetch(id)?;
        let base_amount = dossier.final_amount.unwrap_or(dossier.claimed_amount);
        Ok(WaterfallCommissionEngine::compute(
            live_inputs(&dossier, base_amount),
        )?)
    }

    /// Binding settlement for the current audit cycle. Idempotent per
    /// (dossier, audited amount): repeated calls return the invoice already
    /// persisted, same reference, same breakdown.
    pub fn commission_final(&self, id: &DossierId) -> Result<Invoice, LifecycleError> {
        let dossier = self.repository.fetch(id)?;
        let base_amount =
            dossier
                .final_amount
                .ok_or(LifecycleError::MissingComputationInput {
                    which: "audited final amount",
                })?;
        self.ensure_invoice(&dossier, base_amount)
    }

    /// Flag dossiers idle in a client-actionable status past the configured
    /// threshold. Each flagged dossier gets one reminder notification and
    /// one system timeline event per sweep.
    pub fn sweep_stale_dossiers(&self, now: DateTime<Utc>) -> Result<Vec<DossierId>, LifecycleError> {
        let cutoff = now - Duration::days(self.billing.reminder_after_days);
        let stale = self
            .repository
            .stale_since(CLIENT_ACTIONABLE_STATUSES, cutoff)?;

        let mut flagged = Vec::with_capacity(stale.len());
        for dossier in stale {
            let idle_days = (now - dossier.updated_at).num_days();
            self.notify(&dossier, &DomainEvent::ReminderDue { idle_days });
            self.timeline.append(NewTimelineEvent {
                dossier_id: dossier.id.clone(),
                occurred_at: now,
                kind: EventKind::SystemAction,
                actor_role: ActorRole::System,
                actor_id: None,
                actor_name: "Relance automatique".to_string(),
                title: "Relance client".to_string(),
                description: Some(format!(
                    "Dossier sans action depuis {idle_days} jours en statut {}",
                    dossier.status.as_str()
                )),
                metadata: json!({ "idle_days": idle_days, "status": dossier.status.as_str() }),
            })?;
            flagged.push(dossier.id);
        }
        Ok(flagged)
    }

    fn apply_side_effects(
        &self,
        next: &mut Dossier,
        from: DossierStatus,
        target: DossierStatus,
        actor: &ActorContext,
        payload: &TransitionPayload,
        now: DateTime<Utc>,
    ) -> Result<Option<DomainEvent>, LifecycleError> {
        let event = match target {
            DossierStatus::AdminValidated => Some(DomainEvent::EligibilityValidated),
            DossierStatus::AdminRejected => Some(DomainEvent::EligibilityRejected {
                reason: payload.rejection_reason.clone(),
            }),
            DossierStatus::ExpertPendingValidation => Some(DomainEvent::ExpertProposed),
            DossierStatus::ExpertAssigned if from == DossierStatus::ExpertPendingValidation => {
                Some(DomainEvent::ExpertDeclined)
            }
            DossierStatus::ExpertValidated => {
                next.record_snapshot(
                    snapshot_keys::EXPERT_ACCEPTANCE,
                    json!({
                        "accepted_by": actor.actor_id,
                        "accepted_at": now,
                    }),
                );
                Some(DomainEvent::ExpertAccepted)
            }
            DossierStatus::CharteSigned => {
                next.charter_signed = true;
                next.charter_signed_at = Some(now);
                next.record_snapshot(
                    snapshot_keys::CHARTER_SIGNATURE,
                    json!({
                        "signed_by": actor.actor_id,
                        "signed_at": now,
                    }),
                );
                Some(DomainEvent::CharterSigned)
            }
            DossierStatus::DocumentsRequested => Some(DomainEvent::DocumentsRequested {
                documents: payload.requested_documents.clone(),
                message: payload.message.clone(),
            }),
            DossierStatus::ComplementaryDocumentsSent => Some(DomainEvent::DocumentsSent),
            DossierStatus::ComplementaryDocumentsValidated => Some(DomainEvent::DocumentsValidated),
            DossierStatus::ComplementaryDocumentsRefused => Some(DomainEvent::DocumentsRefused),
            DossierStatus::AuditInProgress => Some(DomainEvent::AuditStarted),
            DossierStatus::AuditCompleted => {
                let final_amount =
                    payload
                        .final_amount
                        .ok_or(LifecycleError::MissingComputationInput {
                            which: "final_amount",
                        })?;
                // An already-invoiced audited amount can never be replaced.
                if let Some(locked) = next.final_amount {
                    let invoiced = self.invoices.find_for_cycle(&next.id, locked)?;
                    if invoiced.is_some() && (locked - final_amount).abs() > f64::EPSILON {
                        return Err(LifecycleError::FinalAmountLocked);
                    }
                }
                next.final_amount = Some(final_amount);
                next.record_snapshot(
                    snapshot_keys::AUDIT_RESULT,
                    json!({
                        "final_amount": final_amount,
                        "audited_by": actor.actor_id,
                        "audited_at": now,
                    }),
                );
                Some(DomainEvent::AuditCompleted { final_amount })
            }
            DossierStatus::Validated => {
                // Freeze the rates in force at acceptance; later changes to
                // the party records must not reprice this dossier.
                let terms = commission_terms_snapshot(next, now);
                next.record_snapshot(snapshot_keys::COMMISSION_TERMS, terms);
                Some(DomainEvent::AuditValidated)
            }
            DossierStatus::AuditRejectedByClient => Some(DomainEvent::AuditRejected {
                reason: payload.rejection_reason.clone(),
            }),
            DossierStatus::ImplementationValidated => {
                if let Some(accorded_amount) = payload.accorded_amount {
                    append_superseding_entry(
                        next,
                        snapshot_keys::ADMINISTRATION_RESULT,
                        json!({
                            "accorded_amount": accorded_amount,
                            "reference": payload.reference,
                            "recorded_by": actor.actor_id,
                            "recorded_at": now,
                        }),
                    );
                    Some(DomainEvent::DecisionRecorded { accorded_amount })
                } else {
                    None
                }
            }
            DossierStatus::PaymentRequested => {
                // Input check only; the invoice is created after the commit.
                next.final_amount
                    .ok_or(LifecycleError::MissingComputationInput {
                        which: "audited final amount",
                    })?;
                None
            }
            DossierStatus::PaymentInProgress => Some(DomainEvent::PaymentInitiated),
            DossierStatus::RefundCompleted => {
                next.record_snapshot(
                    snapshot_keys::PAYMENT,
                    json!({
                        "reference": payload.reference,
                        "settled_at": now,
                    }),
                );
                Some(DomainEvent::DossierCompleted)
            }
            // Remaining edges are intentionally silent: submission, expert
            // selection, charter issuance, ValidationPending, and
            // ImplementationInProgress. The decisive edge around them
            // carries the notification.
            _ => None,
        };
        Ok(event)
    }

    /// Built only after `update_guarded` has committed the transition.
    fn payment_requested_event(&self, dossier: &Dossier) -> Result<DomainEvent, LifecycleError> {
        let base_amount = dossier
            .final_amount
            .ok_or(LifecycleError::MissingComputationInput {
                which: "audited final amount",
            })?;
        let invoice = self.ensure_invoice(dossier, base_amount)?;
        let amount_ttc = invoice
            .result
            .map(|result| result.platform_fee_ttc)
            .unwrap_or(0.0);
        Ok(DomainEvent::PaymentRequested {
            invoice_reference: invoice.reference,
            amount_ttc,
        })
    }

    /// Find or create the invoice for this audit cycle. A computation
    /// failure still persists an invoice, flagged for manual review, so the
    /// cycle is never silently priced with a default rate.
    fn ensure_invoice(
        &self,
        dossier: &Dossier,
        base_amount: f64,
    ) -> Result<Invoice, LifecycleError> {
        if let Some(existing) = self.invoices.find_for_cycle(&dossier.id, base_amount)? {
            return Ok(existing);
        }

        let inputs = frozen_or_live_inputs(dossier, base_amount);
        let (result, flag) = match WaterfallCommissionEngine::compute(inputs) {
            Ok(result) => (Some(result), None),
            Err(err) => {
                warn!(
                    dossier = %dossier.id.0,
                    error = %err,
                    "commission computation failed, invoicing flagged for review"
                );
                (None, Some(err.to_string()))
            }
        };

        Ok(self.invoices.create(NewInvoice {
            dossier_id: dossier.id.clone(),
            base_amount,
            result,
            flag,
            created_at: Utc::now(),
        })?)
    }

    fn notify(&self, dossier: &Dossier, event: &DomainEvent) {
        let parties = match self.directory.parties(dossier) {
            Ok(parties) => parties,
            Err(err) => {
                warn!(
                    dossier = %dossier.id.0,
                    error = %err,
                    "could not resolve notification recipients, skipping fan-out"
                );
                return;
            }
        };
        let requests = NotificationDispatcher::plan(event, &parties);
        let report = NotificationDispatcher::fan_out(self.channel.as_ref(), &requests);
        if report.failed > 0 {
            warn!(
                dossier = %dossier.id.0,
                delivered = report.delivered,
                failed = report.failed,
                "partial notification delivery"
            );
        }
    }
}

/// Statuses where the next move belongs to the client, eligible for the
/// reminder sweep.
pub const CLIENT_ACTIONABLE_STATUSES: &[DossierStatus] = &[
    DossierStatus::PendingUpload,
    DossierStatus::AdminValidated,
    DossierStatus::ChartePending,
    DossierStatus::DocumentsRequested,
    DossierStatus::AuditCompleted,
    DossierStatus::ValidationPending,
    DossierStatus::PaymentRequested,
];

fn live_inputs(dossier: &Dossier, base_amount: f64) -> CommissionInputs {
    CommissionInputs {
        base_amount,
        client_fee_pct: dossier.expert.as_ref().and_then(|e| e.client_fee_pct),
        platform_fee_pct: dossier.expert.as_ref().and_then(|e| e.platform_fee_pct),
        referrer_share_pct: dossier.referrer.as_ref().and_then(|r| r.share_pct),
    }
}

/// Prefer the rates frozen at client validation; fall back to the live
/// party records for dossiers that predate the freeze.
fn frozen_or_live_inputs(dossier: &Dossier, base_amount: f64) -> CommissionInputs {
    match dossier.snapshot(snapshot_keys::COMMISSION_TERMS) {
        Some(terms) => CommissionInputs {
            base_amount,
            client_fee_pct: terms.get("client_fee_pct").and_then(Value::as_f64),
            platform_fee_pct: terms.get("platform_fee_pct").and_then(Value::as_f64),
            referrer_share_pct: terms.get("referrer_share_pct").and_then(Value::as_f64),
        },
        None => live_inputs(dossier, base_amount),
    }
}

fn commission_terms_snapshot(dossier: &Dossier, now: DateTime<Utc>) -> Value {
    json!({
        "client_fee_pct": dossier
            .expert
            .as_ref()
            .and_then(|e| e.client_fee_pct)
            .map(normalize_pct),
        "platform_fee_pct": dossier
            .expert
            .as_ref()
            .and_then(|e| e.platform_fee_pct)
            .map(normalize_pct),
        "referrer_share_pct": dossier
            .referrer
            .as_ref()
            .and_then(|r| r.share_pct)
            .map(normalize_pct),
        "accepted_at": now,
    })
}

/// Later administrative decisions supersede earlier ones; every version is
/// kept, newest last.
fn append_superseding_entry(dossier: &mut Dossier, key: &str, entry: Value) {
    match dossier.metadata.get_mut(key) {
        Some(Value::Array(entries)) => entries.push(entry),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, entry]);
        }
        None => {
            dossier.metadata.insert(key.to_string(), Value::Array(vec![entry]));
        }
    }
}
