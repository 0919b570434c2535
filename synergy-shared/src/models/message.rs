/// Chat message model and database operations
///
/// Messages form the per-project chat. They are immutable once stored.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE messages (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
///     author UUID NOT NULL REFERENCES profiles(id),
///     content TEXT NOT NULL CHECK (length(btrim(content)) > 0),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use crate::models::profile::ProfileSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Default upper bound on message length, in characters
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,

    pub project_id: Uuid,

    /// Author's user ID
    pub author: Uuid,

    pub content: String,

    pub created_at: DateTime<Utc>,

    /// Author's display data, when it could be resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_profile: Option<ProfileSummary>,
}

impl Message {
    /// Human-readable author: display name, then email, then the raw user ID
    pub fn author_label(&self) -> String {
        match &self.author_profile {
            Some(profile) => profile
                .display_name()
                .map(str::to_string)
                .unwrap_or_else(|| self.author.to_string()),
            None => self.author.to_string(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    project_id: Uuid,
    author: Uuid,
    content: String,
    created_at: DateTime<Utc>,
    author_name: Option<String>,
    author_email: Option<String>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let author_profile = if row.author_name.is_some() || row.author_email.is_some() {
            Some(ProfileSummary {
                name: row.author_name,
                email: row.author_email,
            })
        } else {
            None
        };

        Message {
            id: row.id,
            project_id: row.project_id,
            author: row.author,
            content: row.content,
            created_at: row.created_at,
            author_profile,
        }
    }
}

/// Input for posting a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewMessage {
    pub project_id: Uuid,

    #[validate(custom(function = "not_blank"))]
    pub content: String,
}

fn not_blank(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

impl NewMessage {
    pub fn new(project_id: Uuid, content: impl Into<String>) -> Self {
        NewMessage {
            project_id,
            content: content.into(),
        }
    }

    /// Trims the content and checks it against `max_len` characters
    pub fn checked(&self, max_len: usize) -> Result<NewMessage, String> {
        self.validate().map_err(|_| "message cannot be empty".to_string())?;

        let content = self.content.trim().to_string();
        if content.chars().count() > max_len {
            return Err(format!("message exceeds {} characters", max_len));
        }

        Ok(NewMessage {
            project_id: self.project_id,
            content,
        })
    }
}

impl Message {
    /// Stores a message authored by `author`
    pub async fn create(pool: &PgPool, author: Uuid, data: &NewMessage) -> Result<Self, sqlx::Error> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            WITH inserted AS (
                INSERT INTO messages (project_id, author, content)
                VALUES ($1, $2, $3)
                RETURNING id, project_id, author, content, created_at
            )
            SELECT i.id, i.project_id, i.author, i.content, i.created_at,
                   p.name AS author_name, p.email AS author_email
            FROM inserted i
            LEFT JOIN profiles p ON p.id = i.author
            "#,
        )
        .bind(data.project_id)
        .bind(author)
        .bind(&data.content)
        .fetch_one(pool)
        .await?;

        Ok(row.into())
    }

    /// Lists a project's messages with author profiles, oldest first
    pub async fn list_by_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT m.id, m.project_id, m.author, m.content, m.created_at,
                   p.name AS author_name, p.email AS author_email
            FROM messages m
            LEFT JOIN profiles p ON p.id = m.author
            WHERE m.project_id = $1
            ORDER BY m.created_at ASC, m.id ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(profile: Option<ProfileSummary>) -> Message {
        Message {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            author: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            content: "hello".to_string(),
            created_at: Utc::now(),
            author_profile: profile,
        }
    }

    #[test]
    fn test_author_label_prefers_name() {
        let msg = message(Some(ProfileSummary {
            name: Some("Ada".to_string()),
            email: Some("ada@example.com".to_string()),
        }));
        assert_eq!(msg.author_label(), "Ada");
    }

    #[test]
    fn test_author_label_falls_back_to_email_then_id() {
        let msg = message(Some(ProfileSummary {
            name: None,
            email: Some("ada@example.com".to_string()),
        }));
        assert_eq!(msg.author_label(), "ada@example.com");

        let msg = message(None);
        assert_eq!(msg.author_label(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_checked_trims_content() {
        let draft = NewMessage::new(Uuid::new_v4(), "  hi team  ");
        let checked = draft.checked(DEFAULT_MAX_MESSAGE_LEN).unwrap();
        assert_eq!(checked.content, "hi team");
    }

    #[test]
    fn test_checked_rejects_blank_and_long() {
        assert!(NewMessage::new(Uuid::new_v4(), "   ").checked(10).is_err());
        assert!(NewMessage::new(Uuid::new_v4(), "x".repeat(11)).checked(10).is_err());
        assert!(NewMessage::new(Uuid::new_v4(), "x".repeat(10)).checked(10).is_ok());
    }

    #[test]
    fn test_message_without_profile_omits_field() {
        let json = serde_json::to_value(message(None)).unwrap();
        assert!(json.get("author_profile").is_none());

        let parsed: Message = serde_json::from_value(json).unwrap();
        assert!(parsed.author_profile.is_none());
    }
}
