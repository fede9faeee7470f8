//! Shared type definitions for the database layer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Invalid contact row: {0}")]
    InvalidRow(String),
}

/// Position of a contact inside its identity cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPrecedence::Primary => "primary",
            LinkPrecedence::Secondary => "secondary",
        }
    }

    /// Strict parse; anything other than the two stored spellings is a bad row.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(LinkPrecedence::Primary),
            "secondary" => Some(LinkPrecedence::Secondary),
            _ => None,
        }
    }
}

/// A row from the `Contact` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContact {
    pub id: i64,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<i64>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Reserved for soft delete. Always `None` today.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DbContact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Ordering key for "oldest wins": `createdAt`, then id for equal timestamps.
    pub fn age_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.id)
    }
}

/// Fields for a contact about to be inserted. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<i64>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewContact {
    /// A fresh primary stamped with `now`.
    pub fn primary(email: Option<&str>, phone_number: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
            created_at: now,
            updated_at: now,
        }
    }

    /// A secondary linked to `primary_id`, stamped with `now`.
    pub fn secondary(
        email: Option<&str>,
        phone_number: Option<&str>,
        primary_id: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Column changes applied by [`super::ContactDb::update_contact`].
///
/// `None` leaves a column untouched. `updated_at` is always written.
#[derive(Debug, Clone)]
pub struct ContactUpdate {
    pub link_precedence: Option<LinkPrecedence>,
    pub linked_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl ContactUpdate {
    /// Demote a former primary under `primary_id`.
    pub fn demote(primary_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            link_precedence: Some(LinkPrecedence::Secondary),
            linked_id: Some(primary_id),
            updated_at: now,
        }
    }

    /// Re-point a secondary at `primary_id` without touching its precedence.
    pub fn relink(primary_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            link_precedence: None,
            linked_id: Some(primary_id),
            updated_at: now,
        }
    }
}

/// Timestamp text as stored in the `Contact` table: RFC 3339, millisecond
/// precision, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Accepts any RFC 3339 offset and normalizes to UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbError::InvalidRow(format!("bad timestamp '{}': {}", raw, e)))
}

/// Current time truncated to the stored precision, so values written and
/// read back compare equal.
pub fn now_utc() -> DateTime<Utc> {
    let now = Utc::now();
    parse_timestamp(&format_timestamp(&now)).unwrap_or(now)
}
