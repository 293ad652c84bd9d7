use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::status::DossierStatus;

/// Identifier wrapper for dossiers (one client claim on one product).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DossierId(pub String);

/// Roles able to act on a dossier. `System` only appears on synthesized
/// records (batch jobs, migrations) and never authorizes a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Expert,
    Admin,
    Referrer,
    System,
}

impl ActorRole {
    pub const fn label(self) -> &'static str {
        match self {
            ActorRole::Client => "client",
            ActorRole::Expert => "expert",
            ActorRole::Admin => "admin",
            ActorRole::Referrer => "referrer",
            ActorRole::System => "system",
        }
    }

    /// Tie-break weight when duplicate recording paths collide in the
    /// timeline merge: records from higher-authority actors win.
    pub const fn authority(self) -> u8 {
        match self {
            ActorRole::Admin => 4,
            ActorRole::Expert => 3,
            ActorRole::Referrer => 2,
            ActorRole::System => 1,
            ActorRole::Client => 0,
        }
    }
}

/// Already-authenticated identity handed to the core by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub role: ActorRole,
    pub actor_id: String,
    pub display_name: String,
}

/// Client owning the claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRef {
    pub id: String,
    pub auth_id: String,
    pub display_name: String,
}

/// Assigned expert. Fee percentages live on the expert record, are read at
/// computation time, and are then frozen into the dossier metadata; a later
/// rate change never alters an already-computed dossier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertRef {
    pub id: String,
    pub auth_id: String,
    pub display_name: String,
    /// Share of the recovered amount the client pays the expert.
    pub client_fee_pct: Option<f64>,
    /// Share of the expert fee carved out for the platform.
    pub platform_fee_pct: Option<f64>,
}

/// Referral partner entitled to a share of the platform's retained fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferrerRef {
    pub id: String,
    pub auth_id: String,
    pub display_name: String,
    pub share_pct: Option<f64>,
}

/// One reimbursement claim moving through the workflow. Never physically
/// deleted; terminal states are retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dossier {
    pub id: DossierId,
    pub client: ClientRef,
    pub product_label: String,
    pub status: DossierStatus,
    /// UI progress marker, monotone across the happy path.
    pub current_step: u8,
    /// 0-100.
    pub progress: u8,
    /// Client-side estimate produced by the eligibility simulation.
    pub claimed_amount: f64,
    /// Audited amount; set once per audit cycle, immutable once a commission
    /// has been computed from it.
    pub final_amount: Option<f64>,
    pub charter_signed: bool,
    pub charter_signed_at: Option<DateTime<Utc>>,
    pub expert: Option<ExpertRef>,
    pub referrer: Option<ReferrerRef>,
    /// Open key/value bag of point-in-time snapshots (accepted commission
    /// terms, administrative decisions). Entries are appended, never mutated
    /// retroactively.
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dossier {
    pub fn new(
        id: DossierId,
        client: ClientRef,
        product_label: impl Into<String>,
        claimed_amount: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let status = DossierStatus::PendingUpload;
        Self {
            id,
            client,
            product_label: product_label.into(),
            current_step: status.step(),
            progress: status.progress(),
            status,
            claimed_amount,
            final_amount: None,
            charter_signed: false,
            charter_signed_at: None,
            expert: None,
            referrer: None,
            metadata: Map::new(),
            created_at,
            updated_at: created_at,
        }
    }

    /// Record a point-in-time snapshot under `key`. Returns `false` when the
    /// key already holds a snapshot, which the caller must treat as the
    /// authoritative version.
    pub fn record_snapshot(&mut self, key: &str, value: Value) -> bool {
        if self.metadata.contains_key(key) {
            return false;
        }
        self.metadata.insert(key.to_string(), value);
        true
    }

    pub fn snapshot(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Progress bookkeeping follows the status table but never moves
    /// backwards, matching how rejection loops keep their earned progress.
    pub fn advance_progress(&mut self, status: DossierStatus) {
        self.current_step = self.current_step.max(status.step());
        self.progress = self.progress.max(status.progress());
    }
}

/// Transition-specific input carried alongside a status change request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionPayload {
    /// Audited amount, required when completing an audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_amount: Option<f64>,
    /// Amount granted by the administrative body when it differs from the
    /// audited amount; recorded as a superseding entry, never an overwrite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accorded_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_documents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// External reference (administration submission, refund wire, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Resolved recipients for notification fan-out on one dossier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DossierParties {
    pub dossier_id: DossierId,
    pub product_label: String,
    pub client: ActorAccount,
    pub expert: Option<ActorAccount>,
    pub referrer: Option<ActorAccount>,
    pub admins: Vec<ActorAccount>,
}

/// A deliverable notification target: the auth identity behind an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorAccount {
    pub auth_id: String,
    pub role: ActorRole,
    pub display_name: String,
}

/// Metadata keys for the dossier snapshot bag.
pub mod snapshot_keys {
    pub const EXPERT_ACCEPTANCE: &str = "expert_acceptance";
    pub const CHARTER_SIGNATURE: &str = "charte_signature";
    pub const AUDIT_RESULT: &str = "audit_result";
    pub const COMMISSION_TERMS: &str = "commission_conditions_accepted";
    pub const ADMINISTRATION_RESULT: &str = "administration_result";
    pub const PAYMENT: &str = "payment";
}
