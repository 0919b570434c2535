/// Project membership model and database operations
///
/// One row per (project, user) pair. The project creator holds the only
/// owner row.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE member_role AS ENUM ('owner', 'member');
///
/// CREATE TABLE project_members (
///     project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
///     user_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
///     role member_role NOT NULL DEFAULT 'member',
///     joined_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     PRIMARY KEY (project_id, user_id)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Role of a user within a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "member_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Created the project; may add members
    Owner,

    /// Regular collaborator
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Member => "member",
        }
    }

    /// Only the owner can add people to a project
    pub fn can_add_members(&self) -> bool {
        matches!(self, MemberRole::Owner)
    }
}

/// A membership row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// A member joined with their profile, as listed on the members tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MemberProfile {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    /// Adds a user to a project
    ///
    /// Fails with a unique violation if the user is already a member.
    pub async fn create(
        pool: &PgPool,
        project_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Membership>(
            r#"
            INSERT INTO project_members (project_id, user_id, role)
            VALUES ($1, $2, $3)
            RETURNING project_id, user_id, role, joined_at
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .bind(role)
        .fetch_one(pool)
        .await
    }

    /// Finds a user's membership in a project
    pub async fn find(pool: &PgPool, project_id: Uuid, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Membership>(
            "SELECT project_id, user_id, role, joined_at FROM project_members WHERE project_id = $1 AND user_id = $2",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Lists members with their profiles, owner first
    pub async fn list_with_profiles(pool: &PgPool, project_id: Uuid) -> Result<Vec<MemberProfile>, sqlx::Error> {
        sqlx::query_as::<_, MemberProfile>(
            r#"
            SELECT m.user_id, p.name, p.email, m.role, m.joined_at
            FROM project_members m
            LEFT JOIN profiles p ON p.id = m.user_id
            WHERE m.project_id = $1
            ORDER BY (m.role = 'owner') DESC, m.joined_at ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }
}
