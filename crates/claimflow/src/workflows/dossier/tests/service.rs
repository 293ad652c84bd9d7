use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};

use super::common::*;
use crate::workflows::dossier::repository::{DossierRepository, RepositoryError};
use crate::workflows::dossier::{
    snapshot_keys, Dossier, DossierId, DossierLifecycleService, DossierStatus, EventKind,
    LifecycleError, StatusRegistry, TimelineLog, TransitionPayload,
};

/// A dossier store where another writer always commits between this
/// caller's read and its guarded write.
struct ContestedRepository {
    inner: MemoryDossierRepository,
}

impl DossierRepository for ContestedRepository {
    fn insert(&self, dossier: Dossier) -> Result<(), RepositoryError> {
        self.inner.insert(dossier)
    }

    fn fetch(&self, id: &DossierId) -> Result<Dossier, RepositoryError> {
        self.inner.fetch(id)
    }

    fn update_guarded(
        &self,
        _expected: DossierStatus,
        _next: Dossier,
    ) -> Result<Dossier, RepositoryError> {
        Err(RepositoryError::StaleWrite)
    }

    fn stale_since(
        &self,
        statuses: &[DossierStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Dossier>, RepositoryError> {
        self.inner.stale_since(statuses, cutoff)
    }
}

fn contested_harness(
    dossier: Dossier,
) -> (
    DossierLifecycleService<ContestedRepository, MemoryChannel>,
    Arc<MemoryTimelineStore>,
    Arc<MemoryInvoiceStore>,
    Arc<MemoryChannel>,
) {
    let repository = Arc::new(ContestedRepository {
        inner: MemoryDossierRepository::default(),
    });
    repository.insert(dossier).expect("seed dossier inserts");
    let channel = Arc::new(MemoryChannel::default());
    let timeline = Arc::new(MemoryTimelineStore::default());
    let invoices = Arc::new(MemoryInvoiceStore::default());
    let log = Arc::new(TimelineLog::new(
        timeline.clone(),
        Arc::new(MemoryCommentStore::default()),
        Arc::new(MemoryMeetingStore::default()),
    ));
    let service = DossierLifecycleService::new(
        repository,
        channel.clone(),
        Arc::new(StatusRegistry::standard()),
        log,
        invoices.clone(),
        Arc::new(RecordDirectory),
        billing_config(),
    );
    (service, timeline, invoices, channel)
}

#[test]
fn committed_transition_updates_status_history_and_notifications() {
    let harness = harness_with(dossier_at(DossierStatus::ChartePending));

    let receipt = harness
        .service
        .request_transition(
            &dossier_at(DossierStatus::ChartePending).id,
            DossierStatus::CharteSigned,
            &client_actor(),
            &TransitionPayload::default(),
        )
        .expect("client signs the charter");

    assert_eq!(receipt.dossier.status, DossierStatus::CharteSigned);
    assert!(receipt.dossier.charter_signed);
    assert!(receipt.dossier.charter_signed_at.is_some());
    assert!(receipt
        .dossier
        .snapshot(snapshot_keys::CHARTER_SIGNATURE)
        .is_some());

    let events = harness.timeline.events();
    assert_eq!(events.len(), 1, "exactly one event per transition");
    assert_eq!(events[0].id, receipt.timeline_event_id);
    assert_eq!(events[0].kind, EventKind::StatusChange);

    let sent = harness.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].notification_type, "charter_signed");
}

#[test]
fn unauthorized_role_is_rejected_with_allowed_next() {
    let harness = harness_with(dossier_at(DossierStatus::ExpertPendingValidation));

    let error = harness
        .service
        .request_transition(
            &dossier_at(DossierStatus::ExpertPendingValidation).id,
            DossierStatus::ExpertValidated,
            &client_actor(),
            &TransitionPayload::default(),
        )
        .expect_err("only the expert accepts");

    match error {
        LifecycleError::IllegalTransition(detail) => {
            assert!(detail.allowed_next.contains(&DossierStatus::ExpertValidated));
        }
        other => panic!("expected illegal transition, got {other:?}"),
    }
    assert!(harness.timeline.events().is_empty());
    assert!(harness.channel.sent().is_empty());
}

#[test]
fn concurrent_requests_race_and_exactly_one_wins() {
    let harness = harness_with(dossier_at(DossierStatus::AuditCompleted));
    let id = dossier_at(DossierStatus::AuditCompleted).id;

    harness
        .service
        .request_transition(
            &id,
            DossierStatus::Validated,
            &client_actor(),
            &TransitionPayload::default(),
        )
        .expect("first request wins");

    // The second caller re-reads and finds the dossier already moved on.
    let error = harness
        .service
        .request_transition(
            &id,
            DossierStatus::AuditRejectedByClient,
            &client_actor(),
            &TransitionPayload::default(),
        )
        .expect_err("second request loses the race");
    assert!(matches!(error, LifecycleError::IllegalTransition(_)));

    assert_eq!(
        harness.repository.fetch(&id).expect("fetch").status,
        DossierStatus::Validated
    );
    assert_eq!(harness.timeline.events().len(), 1);
}

#[test]
fn guarded_update_rejects_writers_holding_a_stale_precondition() {
    let harness = harness_with(dossier_at(DossierStatus::AuditCompleted));
    let snapshot = harness
        .repository
        .fetch(&dossier_at(DossierStatus::AuditCompleted).id)
        .expect("fetch");

    let mut winner = snapshot.clone();
    winner.status = DossierStatus::Validated;
    harness
        .repository
        .update_guarded(DossierStatus::AuditCompleted, winner)
        .expect("first writer commits");

    // The loser still holds the precondition it read before the race.
    let mut loser = snapshot;
    loser.status = DossierStatus::AuditRejectedByClient;
    match harness
        .repository
        .update_guarded(DossierStatus::AuditCompleted, loser)
    {
        Err(RepositoryError::StaleWrite) => {}
        other => panic!("expected stale write rejection, got {other:?}"),
    }
}

#[test]
fn losing_writer_surfaces_stale_write_and_records_nothing() {
    let (service, timeline, _invoices, channel) =
        contested_harness(dossier_at(DossierStatus::ChartePending));

    let error = service
        .request_transition(
            &dossier_at(DossierStatus::ChartePending).id,
            DossierStatus::CharteSigned,
            &client_actor(),
            &TransitionPayload::default(),
        )
        .expect_err("the contested write must lose");

    assert!(matches!(error, LifecycleError::StaleWriteConflict));
    assert!(timeline.events().is_empty(), "no history for a lost write");
    assert!(channel.sent().is_empty());
}

#[test]
fn lost_payment_race_never_persists_an_invoice() {
    let mut dossier = dossier_at(DossierStatus::ImplementationValidated);
    dossier.final_amount = Some(5_200.0);
    let id = dossier.id.clone();
    let (service, timeline, invoices, _channel) = contested_harness(dossier);

    let error = service
        .request_transition(
            &id,
            DossierStatus::PaymentRequested,
            &expert_actor(),
            &TransitionPayload::default(),
        )
        .expect_err("the contested write must lose");

    assert!(matches!(error, LifecycleError::StaleWriteConflict));
    assert!(
        invoices.invoices().is_empty(),
        "an uncommitted transition must not consume an invoice reference"
    );
    assert!(timeline.events().is_empty());
}

#[test]
fn audit_completion_requires_the_final_amount() {
    let harness = harness_with(dossier_at(DossierStatus::AuditInProgress));
    let id = dossier_at(DossierStatus::AuditInProgress).id;

    let error = harness
        .service
        .request_transition(
            &id,
            DossierStatus::AuditCompleted,
            &expert_actor(),
            &TransitionPayload::default(),
        )
        .expect_err("audit cannot complete without an amount");
    assert!(matches!(
        error,
        LifecycleError::MissingComputationInput {
            which: "final_amount"
        }
    ));

    let receipt = harness
        .service
        .request_transition(
            &id,
            DossierStatus::AuditCompleted,
            &expert_actor(),
            &TransitionPayload {
                final_amount: Some(5_200.0),
                ..TransitionPayload::default()
            },
        )
        .expect("audit completes with an amount");
    assert_eq!(receipt.dossier.final_amount, Some(5_200.0));
    assert!(receipt.dossier.snapshot(snapshot_keys::AUDIT_RESULT).is_some());
}

#[test]
fn validation_freezes_the_commission_terms() {
    let harness = harness_with(dossier_at(DossierStatus::AuditCompleted));
    let id = dossier_at(DossierStatus::AuditCompleted).id;

    let receipt = harness
        .service
        .request_transition(
            &id,
            DossierStatus::Validated,
            &client_actor(),
            &TransitionPayload::default(),
        )
        .expect("client validates the audit");

    let terms = receipt
        .dossier
        .snapshot(snapshot_keys::COMMISSION_TERMS)
        .expect("terms frozen at validation");
    assert_eq!(terms.get("client_fee_pct").and_then(|v| v.as_f64()), Some(0.30));
    assert_eq!(
        terms.get("platform_fee_pct").and_then(|v| v.as_f64()),
        Some(0.30)
    );
}

#[test]
fn payment_request_creates_one_invoice_per_audit_cycle() {
    let mut dossier = dossier_at(DossierStatus::ImplementationValidated);
    dossier.final_amount = Some(5_200.0);
    let id = dossier.id.clone();
    let harness = harness_with(dossier);

    harness
        .service
        .request_transition(
            &id,
            DossierStatus::PaymentRequested,
            &expert_actor(),
            &TransitionPayload::default(),
        )
        .expect("payment request transitions");

    let invoices = harness.invoices.invoices();
    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    let expected_reference = format!("FACT-{}-0001", chrono::Utc::now().year());
    assert_eq!(invoice.reference, expected_reference);
    let result = invoice.result.expect("commission computed");
    assert_eq!(result.platform_fee_ttc, 561.60);

    let sent = harness.channel.sent();
    let payment_note = sent
        .iter()
        .find(|request| request.notification_type == "payment_requested")
        .expect("client is invoiced");
    assert!(payment_note.title.contains(&expected_reference));

    // Re-requesting the settlement never re-prices or re-numbers.
    let again = harness.service.commission_final(&id).expect("idempotent settlement");
    assert_eq!(again.reference, expected_reference);
    assert_eq!(harness.invoices.invoices().len(), 1);
}

#[test]
fn settlement_without_rates_is_flagged_not_defaulted() {
    let mut dossier = dossier_at(DossierStatus::ImplementationValidated);
    dossier.final_amount = Some(5_200.0);
    if let Some(expert) = dossier.expert.as_mut() {
        expert.client_fee_pct = None;
    }
    let id = dossier.id.clone();
    let harness = harness_with(dossier);

    let invoice = harness
        .service
        .commission_final(&id)
        .expect("flagged invoice is still persisted");

    assert!(invoice.result.is_none());
    assert!(invoice
        .flag
        .as_deref()
        .expect("flag explains the gap")
        .contains("client fee"));
    assert_eq!(harness.invoices.invoices().len(), 1);
}

#[test]
fn invoiced_final_amount_cannot_be_replaced() {
    let mut dossier = dossier_at(DossierStatus::AuditInProgress);
    dossier.final_amount = Some(5_200.0);
    let id = dossier.id.clone();
    let harness = harness_with(dossier);

    harness.service.commission_final(&id).expect("invoice persisted");

    let error = harness
        .service
        .request_transition(
            &id,
            DossierStatus::AuditCompleted,
            &expert_actor(),
            &TransitionPayload {
                final_amount: Some(6_000.0),
                ..TransitionPayload::default()
            },
        )
        .expect_err("amount is locked by the invoice");
    assert!(matches!(error, LifecycleError::FinalAmountLocked));
}

#[test]
fn commission_preview_uses_live_rates_and_persists_nothing() {
    let mut dossier = dossier_at(DossierStatus::AuditCompleted);
    dossier.final_amount = Some(5_200.0);
    let id = dossier.id.clone();
    let harness = harness_with(dossier);

    let preview = harness.service.commission_preview(&id).expect("preview computes");
    assert_eq!(preview.expert_total_fee, 1_560.0);
    assert_eq!(preview.platform_fee_ttc, 561.60);
    assert!(harness.invoices.invoices().is_empty());
}

#[test]
fn commission_preview_surfaces_missing_rates() {
    let mut dossier = dossier_at(DossierStatus::AuditCompleted);
    dossier.final_amount = Some(5_200.0);
    dossier.expert = None;
    let id = dossier.id.clone();
    let harness = harness_with(dossier);

    let error = harness
        .service
        .commission_preview(&id)
        .expect_err("no rates without an expert");
    assert!(matches!(
        error,
        LifecycleError::MissingComputationInput { .. }
    ));
}

#[test]
fn notification_failure_never_rolls_back_a_transition() {
    let harness = harness_with(dossier_at(DossierStatus::ChartePending));
    let id = dossier_at(DossierStatus::ChartePending).id;
    harness.channel.fail_for("auth-expert-1");

    let receipt = harness
        .service
        .request_transition(
            &id,
            DossierStatus::CharteSigned,
            &client_actor(),
            &TransitionPayload::default(),
        )
        .expect("transition commits despite delivery failure");

    assert_eq!(receipt.dossier.status, DossierStatus::CharteSigned);
    assert_eq!(
        harness.repository.fetch(&id).expect("fetch").status,
        DossierStatus::CharteSigned
    );
    assert!(harness.channel.sent().is_empty());
}

#[test]
fn rejection_loop_keeps_earned_progress() {
    let harness = harness_with(dossier_at(DossierStatus::AuditCompleted));
    let id = dossier_at(DossierStatus::AuditCompleted).id;
    let before = harness.repository.fetch(&id).expect("fetch").progress;

    let receipt = harness
        .service
        .request_transition(
            &id,
            DossierStatus::AuditRejectedByClient,
            &client_actor(),
            &TransitionPayload {
                rejection_reason: Some("Montant sous-estime".to_string()),
                ..TransitionPayload::default()
            },
        )
        .expect("client contests the audit");

    assert_eq!(receipt.dossier.status, DossierStatus::AuditRejectedByClient);
    assert!(receipt.dossier.progress >= before);
}

#[test]
fn superseding_administrative_decisions_are_all_kept() {
    let mut dossier = dossier_at(DossierStatus::ImplementationInProgress);
    dossier.final_amount = Some(5_200.0);
    let id = dossier.id.clone();
    let harness = harness_with(dossier);

    harness
        .service
        .request_transition(
            &id,
            DossierStatus::ImplementationValidated,
            &expert_actor(),
            &TransitionPayload {
                accorded_amount: Some(5_000.0),
                reference: Some("URSSAF-123".to_string()),
                ..TransitionPayload::default()
            },
        )
        .expect("decision recorded");

    let stored = harness.repository.fetch(&id).expect("fetch");
    let entries = stored
        .snapshot(snapshot_keys::ADMINISTRATION_RESULT)
        .and_then(|value| value.as_array())
        .expect("decision entries are an array");
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].get("accorded_amount").and_then(|v| v.as_f64()),
        Some(5_000.0)
    );
}

#[test]
fn sweep_flags_idle_dossiers_once_per_pass() {
    let mut idle = dossier_at(DossierStatus::ChartePending);
    idle.updated_at = fixed_now() - Duration::days(10);
    let idle_id = idle.id.clone();
    let harness = harness_with(idle);

    let mut fresh = dossier_at(DossierStatus::ChartePending);
    fresh.id = crate::workflows::dossier::DossierId("dos-2".to_string());
    fresh.updated_at = fixed_now() - Duration::days(1);
    harness.repository.insert(fresh).expect("seed second dossier");

    let flagged = harness
        .service
        .sweep_stale_dossiers(fixed_now())
        .expect("sweep runs");

    assert_eq!(flagged, vec![idle_id.clone()]);
    let reminders: Vec<_> = harness
        .channel
        .sent()
        .into_iter()
        .filter(|request| request.notification_type == "reminder_due")
        .collect();
    assert_eq!(reminders.len(), 1);
    assert!(reminders[0].message.contains("10 jours"));

    let events = harness.timeline.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::SystemAction);
    assert_eq!(events[0].dossier_id, idle_id);
}

#[test]
fn missing_dossier_maps_to_not_found() {
    let harness = harness();
    let error = harness
        .service
        .dossier(&crate::workflows::dossier::DossierId("absent".to_string()))
        .expect_err("unknown dossier");
    assert!(matches!(error, LifecycleError::NotFound));
}
