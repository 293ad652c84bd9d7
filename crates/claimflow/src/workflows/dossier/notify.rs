//! Notification planning and fan-out.
//!
//! Planning is pure: a domain event plus the resolved parties yields the
//! exact set of notifications to send. Delivery goes through the
//! [`NotificationChannel`] seam and is isolated per recipient, so one dead
//! mailbox never starves the others and never fails the transition that
//! produced the event.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::domain::{ActorAccount, DossierParties};
use super::repository::NotificationChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Everything that can happen to a dossier and warrants telling someone.
/// Closed set: adding a variant forces every planner arm to be revisited.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    EligibilityValidated,
    EligibilityRejected { reason: Option<String> },
    ExpertProposed,
    ExpertAccepted,
    ExpertDeclined,
    CharterSigned,
    DocumentsRequested { documents: Vec<String>, message: Option<String> },
    DocumentsSent,
    DocumentsValidated,
    DocumentsRefused,
    AuditStarted,
    AuditCompleted { final_amount: f64 },
    AuditValidated,
    AuditRejected { reason: Option<String> },
    DecisionRecorded { accorded_amount: f64 },
    PaymentRequested { invoice_reference: String, amount_ttc: f64 },
    PaymentInitiated,
    DossierCompleted,
    ReminderDue { idle_days: i64 },
}

/// One notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRequest {
    pub recipient: ActorAccount,
    pub notification_type: &'static str,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub action_url: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification delivery failed for {recipient}: {detail}")]
pub struct NotificationError {
    pub recipient: String,
    pub detail: String,
}

/// Tally of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationDispatcher;

impl NotificationDispatcher {
    /// Decide who hears about `event` and with what content. Pure; no
    /// delivery happens here.
    pub fn plan(event: &DomainEvent, parties: &DossierParties) -> Vec<NotificationRequest> {
        let dossier = &parties.dossier_id.0;
        let product = &parties.product_label;
        let url = format!("/dossiers/{dossier}");
        let mut out = Vec::new();

        let mut push = |recipient: &ActorAccount,
                        notification_type: &'static str,
                        title: String,
                        message: String,
                        priority: Priority,
                        metadata: serde_json::Value| {
            out.push(NotificationRequest {
                recipient: recipient.clone(),
                notification_type,
                title,
                message,
                priority,
                action_url: url.clone(),
                metadata,
            });
        };

        match event {
            DomainEvent::EligibilityValidated => {
                push(
                    &parties.client,
                    "eligibility_validated",
                    format!("Dossier {product} eligible"),
                    "Votre dossier a passe la validation d'eligibilite. Vous pouvez maintenant selectionner un expert.".to_string(),
                    Priority::Medium,
                    serde_json::json!({ "dossier_id": dossier }),
                );
            }
            DomainEvent::EligibilityRejected { reason } => {
                push(
                    &parties.client,
                    "eligibility_rejected",
                    format!("Dossier {product} non eligible"),
                    reason
                        .clone()
                        .unwrap_or_else(|| "Votre dossier n'a pas passe la validation d'eligibilite.".to_string()),
                    Priority::High,
                    serde_json::json!({ "dossier_id": dossier, "reason": reason }),
                );
            }
            DomainEvent::ExpertProposed => {
                if let Some(expert) = &parties.expert {
                    push(
                        expert,
                        "expert_proposed",
                        format!("Nouveau dossier {product} propose"),
                        format!(
                            "{} vous propose son dossier {product}. Acceptez ou declinez la mission.",
                            parties.client.display_name
                        ),
                        Priority::High,
                        serde_json::json!({ "dossier_id": dossier }),
                    );
                }
            }
            DomainEvent::ExpertAccepted => {
                push(
                    &parties.client,
                    "expert_accepted",
                    "Expert confirme".to_string(),
                    expert_name(parties, |name| {
                        format!("{name} a accepte de prendre en charge votre dossier {product}.")
                    }),
                    Priority::Medium,
                    serde_json::json!({ "dossier_id": dossier }),
                );
                for admin in &parties.admins {
                    push(
                        admin,
                        "expert_accepted",
                        format!("Expert confirme sur {product}"),
                        format!("Dossier {dossier}: l'expert a accepte la mission."),
                        Priority::Low,
                        serde_json::json!({ "dossier_id": dossier }),
                    );
                }
            }
            DomainEvent::ExpertDeclined => {
                push(
                    &parties.client,
                    "expert_declined",
                    "Expert indisponible".to_string(),
                    format!("L'expert presenti n'est pas disponible pour votre dossier {product}. Selectionnez un autre expert."),
                    Priority::High,
                    serde_json::json!({ "dossier_id": dossier }),
                );
            }
            DomainEvent::CharterSigned => {
                if let Some(expert) = &parties.expert {
                    push(
                        expert,
                        "charter_signed",
                        format!("Charte signee sur {product}"),
                        format!(
                            "{} a signe la charte. Vous pouvez demarrer l'instruction.",
                            parties.client.display_name
                        ),
                        Priority::Medium,
                        serde_json::json!({ "dossier_id": dossier }),
                    );
                }
            }
            DomainEvent::DocumentsRequested { documents, message } => {
                let listing = if documents.is_empty() {
                    "Des pieces complementaires sont demandees.".to_string()
                } else {
                    format!("Pieces demandees: {}.", documents.join(", "))
                };
                let body = match message {
                    Some(note) => format!("{listing} {note}"),
                    None => listing,
                };
                push(
                    &parties.client,
                    "documents_requested",
                    format!("Pieces manquantes sur {product}"),
                    body,
                    Priority::High,
                    serde_json::json!({ "dossier_id": dossier, "documents": documents }),
                );
            }
            DomainEvent::DocumentsSent => {
                if let Some(expert) = &parties.expert {
                    push(
                        expert,
                        "documents_sent",
                        format!("Pieces recues sur {product}"),
                        format!(
                            "{} a transmis les pieces demandees.",
                            parties.client.display_name
                        ),
                        Priority::Medium,
                        serde_json::json!({ "dossier_id": dossier }),
                    );
                }
            }
            DomainEvent::DocumentsValidated => {
                push(
                    &parties.client,
                    "documents_validated",
                    "Pieces validees".to_string(),
                    format!("Les pieces transmises sur votre dossier {product} sont conformes."),
                    Priority::Low,
                    serde_json::json!({ "dossier_id": dossier }),
                );
            }
            DomainEvent::DocumentsRefused => {
                push(
                    &parties.client,
                    "documents_refused",
                    "Pieces refusees".to_string(),
                    format!("Certaines pieces de votre dossier {product} sont illisibles ou incompletes. Une nouvelle demande va suivre."),
                    Priority::High,
                    serde_json::json!({ "dossier_id": dossier }),
                );
            }
            DomainEvent::AuditStarted => {
                push(
                    &parties.client,
                    "audit_started",
                    format!("Instruction de {product} demarree"),
                    expert_name(parties, |name| {
                        format!("{name} a demarre l'instruction de votre dossier.")
                    }),
                    Priority::Medium,
                    serde_json::json!({ "dossier_id": dossier }),
                );
            }
            DomainEvent::AuditCompleted { final_amount } => {
                push(
                    &parties.client,
                    "audit_completed",
                    format!("Instruction de {product} terminee"),
                    format!("Montant recouvrable identifie: {final_amount:.2} EUR. Validez le resultat pour poursuivre."),
                    Priority::High,
                    serde_json::json!({ "dossier_id": dossier, "final_amount": final_amount }),
                );
                for admin in &parties.admins {
                    push(
                        admin,
                        "audit_completed",
                        format!("Audit termine sur {product}"),
                        format!("Dossier {dossier}: audit termine pour {final_amount:.2} EUR."),
                        Priority::Low,
                        serde_json::json!({ "dossier_id": dossier, "final_amount": final_amount }),
                    );
                }
            }
            DomainEvent::AuditValidated => {
                if let Some(expert) = &parties.expert {
                    push(
                        expert,
                        "audit_validated",
                        format!("Resultat valide sur {product}"),
                        format!(
                            "{} a valide le resultat de l'audit. La mise en oeuvre peut commencer.",
                            parties.client.display_name
                        ),
                        Priority::Medium,
                        serde_json::json!({ "dossier_id": dossier }),
                    );
                }
            }
            DomainEvent::AuditRejected { reason } => {
                if let Some(expert) = &parties.expert {
                    push(
                        expert,
                        "audit_rejected",
                        format!("Resultat conteste sur {product}"),
                        reason.clone().unwrap_or_else(|| {
                            format!(
                                "{} conteste le resultat de l'audit.",
                                parties.client.display_name
                            )
                        }),
                        Priority::High,
                        serde_json::json!({ "dossier_id": dossier, "reason": reason }),
                    );
                }
            }
            DomainEvent::DecisionRecorded { accorded_amount } => {
                push(
                    &parties.client,
                    "decision_recorded",
                    format!("Decision administrative sur {product}"),
                    format!("L'administration a accorde {accorded_amount:.2} EUR sur votre dossier."),
                    Priority::Medium,
                    serde_json::json!({ "dossier_id": dossier, "accorded_amount": accorded_amount }),
                );
            }
            DomainEvent::PaymentRequested {
                invoice_reference,
                amount_ttc,
            } => {
                push(
                    &parties.client,
                    "payment_requested",
                    format!("Facture {invoice_reference} emise"),
                    format!("La facture {invoice_reference} de {amount_ttc:.2} EUR TTC est disponible sur votre dossier {product}."),
                    Priority::High,
                    serde_json::json!({
                        "dossier_id": dossier,
                        "invoice_reference": invoice_reference,
                        "amount_ttc": amount_ttc,
                    }),
                );
                if let Some(referrer) = &parties.referrer {
                    push(
                        referrer,
                        "payment_requested",
                        format!("Commission a venir sur {product}"),
                        format!("La facturation du dossier {dossier} est lancee. Votre commission d'apport suivra l'encaissement."),
                        Priority::Low,
                        serde_json::json!({ "dossier_id": dossier }),
                    );
                }
            }
            DomainEvent::PaymentInitiated => {
                for admin in &parties.admins {
                    push(
                        admin,
                        "payment_initiated",
                        format!("Reglement en cours sur {product}"),
                        format!("Dossier {dossier}: le client a initie le reglement."),
                        Priority::Medium,
                        serde_json::json!({ "dossier_id": dossier }),
                    );
                }
            }
            DomainEvent::DossierCompleted => {
                push(
                    &parties.client,
                    "dossier_completed",
                    format!("Dossier {product} clos"),
                    "Le remboursement est finalise. Merci de votre confiance.".to_string(),
                    Priority::Medium,
                    serde_json::json!({ "dossier_id": dossier }),
                );
                if let Some(expert) = &parties.expert {
                    push(
                        expert,
                        "dossier_completed",
                        format!("Dossier {product} clos"),
                        format!("Le dossier {dossier} est finalise et regle."),
                        Priority::Low,
                        serde_json::json!({ "dossier_id": dossier }),
                    );
                }
                if let Some(referrer) = &parties.referrer {
                    push(
                        referrer,
                        "dossier_completed",
                        format!("Dossier {product} clos"),
                        format!("Le dossier {dossier} est finalise; votre commission d'apport est acquise."),
                        Priority::Low,
                        serde_json::json!({ "dossier_id": dossier }),
                    );
                }
            }
            DomainEvent::ReminderDue { idle_days } => {
                push(
                    &parties.client,
                    "reminder_due",
                    format!("Dossier {product} en attente"),
                    format!("Votre dossier attend une action de votre part depuis {idle_days} jours."),
                    Priority::Medium,
                    serde_json::json!({ "dossier_id": dossier, "idle_days": idle_days }),
                );
            }
        }

        out
    }

    /// Deliver every planned notification, isolating failures per recipient.
    pub fn fan_out(
        channel: &dyn NotificationChannel,
        requests: &[NotificationRequest],
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for request in requests {
            match channel.deliver(request) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        recipient = %request.recipient.auth_id,
                        notification_type = request.notification_type,
                        error = %err,
                        "notification delivery failed, continuing fan-out"
                    );
                }
            }
        }
        report
    }
}

fn expert_name(parties: &DossierParties, f: impl Fn(&str) -> String) -> String {
    match &parties.expert {
        Some(expert) => f(&expert.display_name),
        None => f("Votre expert"),
    }
}
