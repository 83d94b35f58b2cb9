//! The note entity: a piece of text attached to a page url.
//!
//! Notes are plain records. The id is fixed at construction; every other
//! field may be edited by the owning surface. Deletion comes in two flavours:
//! a soft delete stamps `softDeleted` and leaves the note in the collection
//! as a tombstone, a hard delete removes it from the collection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long a tombstone stays visible to surfaces after a soft delete.
pub const SOFT_DELETE_RETENTION_SECS: i64 = 30;

pub fn soft_delete_retention() -> Duration {
    Duration::seconds(SOFT_DELETE_RETENTION_SECS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid note {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Loosely-typed note record, as found in persisted or relayed JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteLike {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "softDeleted")]
    pub soft_deleted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "NoteLike")]
pub struct Note {
    id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    #[serde(rename = "softDeleted", skip_serializing_if = "Option::is_none")]
    pub soft_deleted: Option<DateTime<Utc>>,
}

impl Note {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let note = Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            url: url.into(),
            soft_deleted: None,
        };
        note.validate()?;
        Ok(note)
    }

    /// Create a fresh note with a random id.
    pub fn create(
        title: impl Into<String>,
        content: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            url: url.into(),
            soft_deleted: None,
        }
    }

    /// Rebuild a note from a stored or relayed record, keeping `softDeleted`.
    pub fn from_note_like(like: NoteLike) -> Result<Self, ValidationError> {
        let soft_deleted = match like.soft_deleted.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|error| {
                        ValidationError::new("softDeleted", format!("{raw:?}: {error}"))
                    })?
                    .with_timezone(&Utc),
            ),
        };
        let note = Self {
            id: like.id.unwrap_or_default(),
            title: like.title.unwrap_or_default(),
            content: like.content.unwrap_or_default(),
            url: like.url.unwrap_or_default(),
            soft_deleted,
        };
        note.validate()?;
        Ok(note)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::new("id", "must not be empty"));
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn soft_deleted(&self) -> Option<DateTime<Utc>> {
        self.soft_deleted
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.soft_deleted.is_some()
    }

    pub fn soft_delete(&mut self, at: DateTime<Utc>) {
        self.soft_deleted = Some(at);
    }

    pub fn restore(&mut self) {
        self.soft_deleted = None;
    }

    /// Whether default views should still show this note at `now`.
    ///
    /// Tombstones stay visible for [`SOFT_DELETE_RETENTION_SECS`] so the
    /// surface can offer an undo. A timestamp in the future counts as fresh.
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        match self.soft_deleted {
            None => true,
            Some(deleted_at) => now.signed_duration_since(deleted_at) < soft_delete_retention(),
        }
    }

    /// A tombstone past its retention window. Surfaces treat it as hard-deleted.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_soft_deleted() && !self.is_visible_at(now)
    }
}

impl TryFrom<NoteLike> for Note {
    type Error = ValidationError;

    fn try_from(like: NoteLike) -> Result<Self, Self::Error> {
        Note::from_note_like(like)
    }
}

pub fn visible_notes(notes: &[Note], now: DateTime<Utc>) -> Vec<&Note> {
    notes.iter().filter(|note| note.is_visible_at(now)).collect()
}

pub fn expired_tombstones(notes: &[Note], now: DateTime<Utc>) -> Vec<&Note> {
    notes.iter().filter(|note| note.is_expired_at(now)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn new_rejects_empty_id() {
        let err = Note::new("", "t", "c", "u").unwrap_err();
        assert_eq!(err.field, "id");
    }

    #[test]
    fn create_assigns_distinct_ids() {
        let a = Note::create("a", "", "https://a.example");
        let b = Note::create("b", "", "https://b.example");
        assert!(!a.id().is_empty());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn from_note_like_defaults_missing_strings() {
        let like: NoteLike = serde_json::from_str(r#"{"id":"n1"}"#).unwrap();
        let note = Note::from_note_like(like).unwrap();
        assert_eq!(note.id(), "n1");
        assert_eq!(note.title, "");
        assert_eq!(note.content, "");
        assert_eq!(note.url, "");
        assert!(!note.is_soft_deleted());
    }

    #[test]
    fn from_note_like_requires_id() {
        let like: NoteLike = serde_json::from_str(r#"{"title":"orphan"}"#).unwrap();
        assert!(Note::from_note_like(like).is_err());
    }

    #[test]
    fn deserialize_preserves_soft_deleted() {
        let json = r#"{"id":"n1","title":"t","content":"c","url":"u","softDeleted":"2025-10-09T08:53:20Z"}"#;
        let note: Note = serde_json::from_str(json).unwrap();
        assert_eq!(note.soft_deleted(), Some(at(0)));

        let back = serde_json::to_value(&note).unwrap();
        assert_eq!(back["softDeleted"], "2025-10-09T08:53:20Z");
    }

    #[test]
    fn deserialize_rejects_bad_timestamp() {
        let json = r#"{"id":"n1","softDeleted":"yesterday"}"#;
        assert!(serde_json::from_str::<Note>(json).is_err());
    }

    #[test]
    fn live_note_omits_soft_deleted_field() {
        let note = Note::new("n1", "t", "c", "u").unwrap();
        let value = serde_json::to_value(&note).unwrap();
        assert!(value.get("softDeleted").is_none());
        assert_eq!(value["id"], "n1");
    }

    #[test]
    fn tombstone_visible_within_retention() {
        let mut note = Note::new("n1", "t", "c", "u").unwrap();
        note.soft_delete(at(0));

        assert!(note.is_visible_at(at(29)));
        assert!(!note.is_expired_at(at(29)));
        assert!(!note.is_visible_at(at(30)));
        assert!(note.is_expired_at(at(31)));
    }

    #[test]
    fn restore_clears_tombstone() {
        let mut note = Note::new("n1", "t", "c", "u").unwrap();
        note.soft_delete(at(0));
        note.restore();
        assert!(note.is_visible_at(at(3600)));
    }

    #[test]
    fn filters_split_visible_and_expired() {
        let live = Note::new("live", "", "", "").unwrap();
        let mut fresh = Note::new("fresh", "", "", "").unwrap();
        fresh.soft_delete(at(50));
        let mut stale = Note::new("stale", "", "", "").unwrap();
        stale.soft_delete(at(0));
        let notes = vec![live, fresh, stale];

        let visible: Vec<&str> = visible_notes(&notes, at(60)).iter().map(|n| n.id()).collect();
        assert_eq!(visible, vec!["live", "fresh"]);

        let expired: Vec<&str> = expired_tombstones(&notes, at(60))
            .iter()
            .map(|n| n.id())
            .collect();
        assert_eq!(expired, vec!["stale"]);
    }
}
