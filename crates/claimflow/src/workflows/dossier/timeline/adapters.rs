//! Projections of the legacy comment table and the meeting planner into
//! timeline events. All free-text parsing of historical rows is contained
//! here; nothing outside this module knows the old formats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::super::domain::{ActorRole, DossierId};
use super::{EventKind, TimelineEvent};

/// Row from the historical comment table. `body` may embed the author in
/// free text ("Jeanne Duval - piece manquante" or "Jeanne Duval: ...")
/// because early versions had no author column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    pub dossier_id: DossierId,
    pub author_role: Option<ActorRole>,
    pub author_name: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Scheduled meeting between parties of a dossier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub id: String,
    pub dossier_id: DossierId,
    pub organizer_role: ActorRole,
    pub organizer_name: String,
    pub subject: String,
    pub scheduled_at: DateTime<Utc>,
    pub location: Option<String>,
}

/// Split a legacy comment body into `(author, text)` when the body carries
/// an embedded author prefix. Accepted separators are " - " and ": ", in
/// that order; anything else is treated as plain text.
fn split_embedded_author(body: &str) -> Option<(&str, &str)> {
    for separator in [" - ", ": "] {
        if let Some((head, tail)) = body.split_once(separator) {
            let head = head.trim();
            let tail = tail.trim();
            // An author prefix is a short name, not a sentence.
            if !head.is_empty() && !tail.is_empty() && head.len() <= 60 && !head.contains('\n') {
                return Some((head, tail));
            }
        }
    }
    None
}

/// Comment rows projected as `Comment` events. Synthetic ids are derived
/// from the source row so re-reads are stable.
pub struct CommentAdapter;

impl CommentAdapter {
    pub fn project(record: &CommentRecord) -> TimelineEvent {
        let (actor_name, description) = match (&record.author_name, split_embedded_author(&record.body)) {
            (Some(name), _) => (name.clone(), record.body.clone()),
            (None, Some((name, text))) => (name.to_string(), text.to_string()),
            (None, None) => ("Commentaire".to_string(), record.body.clone()),
        };

        TimelineEvent {
            id: format!("comment:{}", record.id),
            dossier_id: record.dossier_id.clone(),
            occurred_at: record.created_at,
            kind: EventKind::Comment,
            actor_role: record.author_role.unwrap_or(ActorRole::System),
            actor_id: None,
            actor_name,
            title: "Commentaire".to_string(),
            description: Some(description),
            metadata: json!({ "source": "comments", "comment_id": record.id }),
        }
    }
}

/// Meeting rows projected as `Meeting` events.
pub struct MeetingAdapter;

impl MeetingAdapter {
    pub fn project(record: &MeetingRecord) -> TimelineEvent {
        TimelineEvent {
            id: format!("meeting:{}", record.id),
            dossier_id: record.dossier_id.clone(),
            occurred_at: record.scheduled_at,
            kind: EventKind::Meeting,
            actor_role: record.organizer_role,
            actor_id: None,
            actor_name: record.organizer_name.clone(),
            title: record.subject.clone(),
            description: record
                .location
                .as_ref()
                .map(|location| format!("Lieu: {location}")),
            metadata: json!({ "source": "meetings", "meeting_id": record.id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_author_with_dash_separator_is_extracted() {
        let record = CommentRecord {
            id: "c1".to_string(),
            dossier_id: DossierId("d1".to_string()),
            author_role: None,
            author_name: None,
            body: "Jeanne Duval - piece d'identite manquante".to_string(),
            created_at: Utc::now(),
        };
        let event = CommentAdapter::project(&record);
        assert_eq!(event.actor_name, "Jeanne Duval");
        assert_eq!(
            event.description.as_deref(),
            Some("piece d'identite manquante")
        );
    }

    #[test]
    fn explicit_author_column_wins_over_embedded_prefix() {
        let record = CommentRecord {
            id: "c2".to_string(),
            dossier_id: DossierId("d1".to_string()),
            author_role: Some(ActorRole::Expert),
            author_name: Some("Marc Petit".to_string()),
            body: "Jeanne Duval - texte ambigu".to_string(),
            created_at: Utc::now(),
        };
        let event = CommentAdapter::project(&record);
        assert_eq!(event.actor_name, "Marc Petit");
        assert_eq!(event.description.as_deref(), Some("Jeanne Duval - texte ambigu"));
        assert_eq!(event.actor_role, ActorRole::Expert);
    }

    #[test]
    fn plain_text_body_is_kept_whole() {
        let record = CommentRecord {
            id: "c3".to_string(),
            dossier_id: DossierId("d1".to_string()),
            author_role: None,
            author_name: None,
            body: "Relance envoyee au client".to_string(),
            created_at: Utc::now(),
        };
        let event = CommentAdapter::project(&record);
        assert_eq!(event.actor_name, "Commentaire");
        assert_eq!(event.description.as_deref(), Some("Relance envoyee au client"));
    }
}
