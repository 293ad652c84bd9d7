use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::warn;

use super::domain::ActorRole;

/// Canonical dossier statuses. Terminal states (`AdminRejected`,
/// `RefundCompleted`) have no outgoing edges and are retained for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DossierStatus {
    PendingUpload,
    PendingAdminValidation,
    AdminValidated,
    AdminRejected,
    ExpertAssigned,
    ExpertPendingValidation,
    ExpertValidated,
    ChartePending,
    CharteSigned,
    DocumentsRequested,
    ComplementaryDocumentsSent,
    ComplementaryDocumentsValidated,
    ComplementaryDocumentsRefused,
    AuditInProgress,
    AuditCompleted,
    ValidationPending,
    Validated,
    AuditRejectedByClient,
    ImplementationInProgress,
    ImplementationValidated,
    PaymentRequested,
    PaymentInProgress,
    RefundCompleted,
}

impl DossierStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            DossierStatus::PendingUpload => "pending_upload",
            DossierStatus::PendingAdminValidation => "pending_admin_validation",
            DossierStatus::AdminValidated => "admin_validated",
            DossierStatus::AdminRejected => "admin_rejected",
            DossierStatus::ExpertAssigned => "expert_assigned",
            DossierStatus::ExpertPendingValidation => "expert_pending_validation",
            DossierStatus::ExpertValidated => "expert_validated",
            DossierStatus::ChartePending => "charte_pending",
            DossierStatus::CharteSigned => "charte_signed",
            DossierStatus::DocumentsRequested => "documents_requested",
            DossierStatus::ComplementaryDocumentsSent => "complementary_documents_sent",
            DossierStatus::ComplementaryDocumentsValidated => "complementary_documents_validated",
            DossierStatus::ComplementaryDocumentsRefused => "complementary_documents_refused",
            DossierStatus::AuditInProgress => "audit_in_progress",
            DossierStatus::AuditCompleted => "audit_completed",
            DossierStatus::ValidationPending => "validation_pending",
            DossierStatus::Validated => "validated",
            DossierStatus::AuditRejectedByClient => "audit_rejected_by_client",
            DossierStatus::ImplementationInProgress => "implementation_in_progress",
            DossierStatus::ImplementationValidated => "implementation_validated",
            DossierStatus::PaymentRequested => "payment_requested",
            DossierStatus::PaymentInProgress => "payment_in_progress",
            DossierStatus::RefundCompleted => "refund_completed",
        }
    }

    pub fn from_canonical(value: &str) -> Option<Self> {
        ALL_STATUSES
            .iter()
            .copied()
            .find(|status| status.as_str() == value)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            DossierStatus::AdminRejected | DossierStatus::RefundCompleted
        )
    }

    /// UI step marker (0-8), monotone along the happy path.
    pub const fn step(self) -> u8 {
        match self {
            DossierStatus::PendingUpload => 0,
            DossierStatus::PendingAdminValidation => 1,
            DossierStatus::AdminValidated
            | DossierStatus::AdminRejected
            | DossierStatus::ExpertAssigned => 2,
            DossierStatus::ExpertPendingValidation
            | DossierStatus::ExpertValidated
            | DossierStatus::ChartePending => 3,
            DossierStatus::CharteSigned
            | DossierStatus::DocumentsRequested
            | DossierStatus::ComplementaryDocumentsSent
            | DossierStatus::ComplementaryDocumentsValidated
            | DossierStatus::ComplementaryDocumentsRefused
            | DossierStatus::AuditInProgress
            | DossierStatus::AuditCompleted
            | DossierStatus::AuditRejectedByClient => 4,
            DossierStatus::ValidationPending | DossierStatus::Validated => 5,
            DossierStatus::ImplementationInProgress => 6,
            DossierStatus::ImplementationValidated => 7,
            DossierStatus::PaymentRequested
            | DossierStatus::PaymentInProgress
            | DossierStatus::RefundCompleted => 8,
        }
    }

    /// Percentage shown on the client progress bar.
    pub const fn progress(self) -> u8 {
        match self {
            DossierStatus::PendingUpload => 5,
            DossierStatus::PendingAdminValidation => 10,
            DossierStatus::AdminValidated | DossierStatus::AdminRejected => 20,
            DossierStatus::ExpertAssigned => 25,
            DossierStatus::ExpertPendingValidation => 30,
            DossierStatus::ExpertValidated => 35,
            DossierStatus::ChartePending => 40,
            DossierStatus::CharteSigned => 45,
            DossierStatus::DocumentsRequested
            | DossierStatus::ComplementaryDocumentsRefused => 48,
            DossierStatus::ComplementaryDocumentsSent => 52,
            DossierStatus::ComplementaryDocumentsValidated => 55,
            DossierStatus::AuditInProgress | DossierStatus::AuditRejectedByClient => 50,
            DossierStatus::AuditCompleted => 70,
            DossierStatus::ValidationPending => 72,
            DossierStatus::Validated => 75,
            DossierStatus::ImplementationInProgress => 80,
            DossierStatus::ImplementationValidated => 90,
            DossierStatus::PaymentRequested => 95,
            DossierStatus::PaymentInProgress => 96,
            DossierStatus::RefundCompleted => 100,
        }
    }
}

// Reads accept legacy status strings as well as canonical names, so rows
// persisted before the canonical set hydrate without a migration. Strings
// outside both tables fail the typed decode; free-text sources go through
// `StatusRegistry::normalize` first.
impl<'de> Deserialize<'de> for DossierStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DossierStatus::from_canonical(&raw)
            .or_else(|| legacy_alias(&raw))
            .ok_or_else(|| serde::de::Error::custom(format!("unknown dossier status '{raw}'")))
    }
}

pub const ALL_STATUSES: [DossierStatus; 23] = [
    DossierStatus::PendingUpload,
    DossierStatus::PendingAdminValidation,
    DossierStatus::AdminValidated,
    DossierStatus::AdminRejected,
    DossierStatus::ExpertAssigned,
    DossierStatus::ExpertPendingValidation,
    DossierStatus::ExpertValidated,
    DossierStatus::ChartePending,
    DossierStatus::CharteSigned,
    DossierStatus::DocumentsRequested,
    DossierStatus::ComplementaryDocumentsSent,
    DossierStatus::ComplementaryDocumentsValidated,
    DossierStatus::ComplementaryDocumentsRefused,
    DossierStatus::AuditInProgress,
    DossierStatus::AuditCompleted,
    DossierStatus::ValidationPending,
    DossierStatus::Validated,
    DossierStatus::AuditRejectedByClient,
    DossierStatus::ImplementationInProgress,
    DossierStatus::ImplementationValidated,
    DossierStatus::PaymentRequested,
    DossierStatus::PaymentInProgress,
    DossierStatus::RefundCompleted,
];

/// Outcome of normalizing a persisted status string. Unknown historical
/// strings pass through unchanged (soft failure, logged, never an error) so
/// old rows keep loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedStatus {
    Known(DossierStatus),
    Unknown(String),
}

impl NormalizedStatus {
    pub fn as_known(&self) -> Option<DossierStatus> {
        match self {
            NormalizedStatus::Known(status) => Some(*status),
            NormalizedStatus::Unknown(_) => None,
        }
    }
}

/// One legal edge in the transition table.
#[derive(Debug, Clone)]
pub struct TransitionRule {
    pub from: DossierStatus,
    pub to: DossierStatus,
    pub roles: &'static [ActorRole],
}

/// Rejected transition request, carrying enough structure for the caller to
/// render the allowed-next set.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("transition {from:?} -> {requested:?} not allowed for {role:?}")]
pub struct IllegalTransition {
    pub from: DossierStatus,
    pub requested: DossierStatus,
    pub role: ActorRole,
    /// Statuses reachable from `from` regardless of role, for error surfaces.
    pub allowed_next: Vec<DossierStatus>,
}

/// Immutable transition table, built once at process start and passed by
/// reference. No runtime mutation.
#[derive(Debug)]
pub struct StatusRegistry {
    rules: Vec<TransitionRule>,
}

impl StatusRegistry {
    pub fn standard() -> Self {
        Self {
            rules: standard_rules(),
        }
    }

    /// Check that `requested` is a legal next status for `from` and that
    /// `role` is authorized for that specific edge.
    pub fn authorize(
        &self,
        from: DossierStatus,
        requested: DossierStatus,
        role: ActorRole,
    ) -> Result<&TransitionRule, IllegalTransition> {
        self.rules
            .iter()
            .find(|rule| rule.from == from && rule.to == requested && rule.roles.contains(&role))
            .ok_or_else(|| IllegalTransition {
                from,
                requested,
                role,
                allowed_next: self.allowed_next(from),
            })
    }

    /// Statuses reachable from `from` for any role.
    pub fn allowed_next(&self, from: DossierStatus) -> Vec<DossierStatus> {
        let mut next: Vec<DossierStatus> = self
            .rules
            .iter()
            .filter(|rule| rule.from == from)
            .map(|rule| rule.to)
            .collect();
        next.dedup();
        next
    }

    /// Normalize a persisted status string. Canonical names map to
    /// themselves, historical free-text statuses go through the fixed legacy
    /// table, anything else passes through unchanged with a warning. The
    /// mapping is idempotent: `normalize(normalize(x)) == normalize(x)`.
    ///
    /// Storage adapters with a free-text status column run every row through
    /// this on read; the typed serde decode on [`DossierStatus`] covers
    /// adapters that persist rows as structured documents.
    pub fn normalize(&self, raw: &str) -> NormalizedStatus {
        let trimmed = raw.trim();
        if let Some(status) = DossierStatus::from_canonical(trimmed) {
            return NormalizedStatus::Known(status);
        }
        if let Some(status) = legacy_alias(trimmed) {
            return NormalizedStatus::Known(status);
        }
        warn!(status = %trimmed, "unknown legacy dossier status, passing through");
        NormalizedStatus::Unknown(trimmed.to_string())
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }
}

const CLIENT: &[ActorRole] = &[ActorRole::Client];
const EXPERT: &[ActorRole] = &[ActorRole::Expert];
const ADMIN: &[ActorRole] = &[ActorRole::Admin];
const CLIENT_OR_ADMIN: &[ActorRole] = &[ActorRole::Client, ActorRole::Admin];
const EXPERT_OR_ADMIN: &[ActorRole] = &[ActorRole::Expert, ActorRole::Admin];

fn rule(
    from: DossierStatus,
    to: DossierStatus,
    roles: &'static [ActorRole],
) -> TransitionRule {
    TransitionRule { from, to, roles }
}

fn standard_rules() -> Vec<TransitionRule> {
    use DossierStatus::*;
    vec![
        rule(PendingUpload, PendingAdminValidation, CLIENT),
        rule(PendingAdminValidation, AdminValidated, ADMIN),
        rule(PendingAdminValidation, AdminRejected, ADMIN),
        rule(AdminValidated, ExpertAssigned, CLIENT_OR_ADMIN),
        rule(ExpertAssigned, ExpertPendingValidation, CLIENT_OR_ADMIN),
        rule(ExpertPendingValidation, ExpertValidated, EXPERT),
        // Expert declines; the dossier returns to the selection pool.
        rule(ExpertPendingValidation, ExpertAssigned, EXPERT),
        rule(ExpertValidated, ChartePending, EXPERT_OR_ADMIN),
        rule(ChartePending, CharteSigned, CLIENT),
        rule(CharteSigned, DocumentsRequested, EXPERT),
        // No complementary documents needed: straight to audit.
        rule(CharteSigned, AuditInProgress, EXPERT),
        rule(DocumentsRequested, ComplementaryDocumentsSent, CLIENT),
        rule(ComplementaryDocumentsSent, ComplementaryDocumentsValidated, EXPERT),
        rule(ComplementaryDocumentsSent, ComplementaryDocumentsRefused, EXPERT),
        rule(ComplementaryDocumentsRefused, DocumentsRequested, EXPERT),
        rule(ComplementaryDocumentsValidated, AuditInProgress, EXPERT),
        rule(AuditInProgress, AuditCompleted, EXPERT),
        rule(AuditCompleted, ValidationPending, EXPERT_OR_ADMIN),
        rule(AuditCompleted, Validated, CLIENT),
        rule(AuditCompleted, AuditRejectedByClient, CLIENT),
        rule(ValidationPending, Validated, CLIENT),
        rule(ValidationPending, AuditRejectedByClient, CLIENT),
        rule(AuditRejectedByClient, AuditInProgress, EXPERT),
        rule(Validated, ImplementationInProgress, EXPERT),
        rule(ImplementationInProgress, ImplementationValidated, EXPERT),
        rule(ImplementationValidated, PaymentRequested, EXPERT_OR_ADMIN),
        rule(PaymentRequested, PaymentInProgress, CLIENT),
        rule(PaymentInProgress, RefundCompleted, CLIENT_OR_ADMIN),
    ]
}

/// Historical free-text statuses predating the canonical enum. The table is
/// fixed: every known historical string has exactly one canonical target.
fn legacy_alias(raw: &str) -> Option<DossierStatus> {
    use DossierStatus::*;
    Some(match raw {
        "pending" => PendingUpload,
        "en_attente" | "opportunite" => PendingAdminValidation,
        "eligible" | "eligibility_validated" => AdminValidated,
        "non_eligible" => AdminRejected,
        "charte_signee" | "signed" => CharteSigned,
        "documents_complementaires_requis" | "documents_requis" => DocumentsRequested,
        "en_cours" => AuditInProgress,
        "validation_finale" => Validated,
        "termine" | "completed" => RefundCompleted,
        _ => return None,
    })
}
