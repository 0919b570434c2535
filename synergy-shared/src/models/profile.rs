/// User profile model
///
/// A profile carries the human-readable identity shown next to chat messages,
/// task assignees and project members.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE profiles (
///     id UUID PRIMARY KEY,
///     name VARCHAR(255),
///     email VARCHAR(320) NOT NULL UNIQUE,
///     avatar_url TEXT,
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// A user's profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    /// Same ID as the identity provider's user
    pub id: Uuid,

    /// Optional display name
    pub name: Option<String>,

    pub email: String,

    pub avatar_url: Option<String>,

    pub updated_at: DateTime<Utc>,
}

/// The part of a profile needed to label authorship
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl ProfileSummary {
    /// Name if set and non-blank, otherwise email
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.email.as_deref())
    }

    /// Up to two uppercase initials from the name, or the email's first letter
    pub fn initials(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name
                .split_whitespace()
                .filter_map(|part| part.chars().next())
                .flat_map(char::to_uppercase)
                .take(2)
                .collect();
        }

        self.email
            .as_deref()
            .and_then(|e| e.chars().next())
            .map(|c| c.to_uppercase().collect())
            .unwrap_or_else(|| "?".to_string())
    }
}

impl From<&Profile> for ProfileSummary {
    fn from(profile: &Profile) -> Self {
        ProfileSummary {
            name: profile.name.clone(),
            email: Some(profile.email.clone()),
        }
    }
}

impl Profile {
    /// Finds a profile by user ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(
            "SELECT id, name, email, avatar_url, updated_at FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Sets or clears the display name
    pub async fn update_name(
        pool: &PgPool,
        id: Uuid,
        name: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(
            r#"
            UPDATE profiles
            SET name = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, email, avatar_url, updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .fetch_optional(pool)
        .await
    }
}
