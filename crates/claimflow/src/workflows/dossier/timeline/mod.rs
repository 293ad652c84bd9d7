//! Merged dossier history. Native timeline events, legacy comments, and
//! scheduled meetings are stored separately but read as one ordered stream.

pub mod adapters;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::domain::{ActorContext, ActorRole, DossierId};
use super::repository::{CommentStore, MeetingStore, RepositoryError, TimelineStore};

pub use adapters::{CommentAdapter, CommentRecord, MeetingAdapter, MeetingRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusChange,
    Document,
    Comment,
    ExpertAction,
    ClientAction,
    AdminAction,
    SystemAction,
    Meeting,
}

impl EventKind {
    pub const fn label(self) -> &'static str {
        match self {
            EventKind::StatusChange => "status_change",
            EventKind::Document => "document",
            EventKind::Comment => "comment",
            EventKind::ExpertAction => "expert_action",
            EventKind::ClientAction => "client_action",
            EventKind::AdminAction => "admin_action",
            EventKind::SystemAction => "system_action",
            EventKind::Meeting => "meeting",
        }
    }
}

/// One entry in the merged history. Events from the comment and meeting
/// stores carry synthetic prefixed ids (`comment:`, `meeting:`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: String,
    pub dossier_id: DossierId,
    pub occurred_at: DateTime<Utc>,
    pub kind: EventKind,
    pub actor_role: ActorRole,
    pub actor_id: Option<String>,
    pub actor_name: String,
    pub title: String,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
}

/// Event about to be appended, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTimelineEvent {
    pub dossier_id: DossierId,
    pub occurred_at: DateTime<Utc>,
    pub kind: EventKind,
    pub actor_role: ActorRole,
    pub actor_id: Option<String>,
    pub actor_name: String,
    pub title: String,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
}

/// Read-side filter; all fields optional and combined with AND.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct TimelineFilter {
    pub kind: Option<EventKind>,
    pub actor_role: Option<ActorRole>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// One page of merged history. `total` counts events after merge, dedup and
/// filtering, before pagination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePage {
    pub events: Vec<TimelineEvent>,
    pub total: usize,
}

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("only admins may rewrite history")]
    Forbidden,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Append-only event log with merged reads.
///
/// Writes go to the native store only; comments and meetings are owned by
/// their source systems and folded in at read time. Corrections and
/// deletions exist for admins but the log is append-only for everyone else.
pub struct TimelineLog {
    events: Arc<dyn TimelineStore>,
    comments: Arc<dyn CommentStore>,
    meetings: Arc<dyn MeetingStore>,
}

impl TimelineLog {
    pub fn new(
        events: Arc<dyn TimelineStore>,
        comments: Arc<dyn CommentStore>,
        meetings: Arc<dyn MeetingStore>,
    ) -> Self {
        Self {
            events,
            comments,
            meetings,
        }
    }

    pub fn append(&self, event: NewTimelineEvent) -> Result<TimelineEvent, TimelineError> {
        Ok(self.events.insert(event)?)
    }

    /// Merge the three sources, drop duplicate recordings of the same
    /// occurrence, sort newest first, filter, then paginate.
    pub fn read(
        &self,
        dossier_id: &DossierId,
        filter: &TimelineFilter,
    ) -> Result<TimelinePage, TimelineError> {
        let native = self.events.list(dossier_id)?;
        let comments = self.comments.list(dossier_id)?;
        let meetings = self.meetings.list(dossier_id)?;

        let native_keys: HashSet<String> = native.iter().map(composite_key).collect();

        let mut merged = native;
        let mut synthetic: Vec<TimelineEvent> = comments
            .iter()
            .map(CommentAdapter::project)
            .chain(meetings.iter().map(MeetingAdapter::project))
            // A synthetic record duplicating a native event is the same
            // occurrence recorded twice; the native record wins.
            .filter(|event| !native_keys.contains(&composite_key(event)))
            .collect();

        // Two synthetic records of the same occurrence: keep the one made by
        // the higher-authority actor.
        synthetic.sort_by(|a, b| {
            composite_key(a)
                .cmp(&composite_key(b))
                .then(b.actor_role.authority().cmp(&a.actor_role.authority()))
        });
        synthetic.dedup_by(|a, b| composite_key(a) == composite_key(b));

        merged.extend(synthetic);
        merged.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(a.id.cmp(&b.id)));

        let filtered: Vec<TimelineEvent> = merged
            .into_iter()
            .filter(|event| filter.kind.map_or(true, |kind| event.kind == kind))
            .filter(|event| {
                filter
                    .actor_role
                    .map_or(true, |role| event.actor_role == role)
            })
            .collect();

        let total = filtered.len();
        let offset = filter.offset.unwrap_or(0);
        let events = filtered
            .into_iter()
            .skip(offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(TimelinePage { events, total })
    }

    /// Replace a stored event wholesale. Admin only.
    pub fn correct_event(
        &self,
        actor: &ActorContext,
        event: TimelineEvent,
    ) -> Result<TimelineEvent, TimelineError> {
        if actor.role != ActorRole::Admin {
            return Err(TimelineError::Forbidden);
        }
        Ok(self.events.update(event)?)
    }

    /// Remove a stored event. Admin only. The deletion itself is not
    /// re-logged, which keeps the operation terminal.
    pub fn delete_event(
        &self,
        actor: &ActorContext,
        dossier_id: &DossierId,
        event_id: &str,
    ) -> Result<(), TimelineError> {
        if actor.role != ActorRole::Admin {
            return Err(TimelineError::Forbidden);
        }
        Ok(self.events.delete(dossier_id, event_id)?)
    }
}

/// Identity of an occurrence independent of which system recorded it.
fn composite_key(event: &TimelineEvent) -> String {
    format!(
        "{}|{}|{}",
        event.kind.label(),
        event.occurred_at.timestamp(),
        event.title
    )
}
