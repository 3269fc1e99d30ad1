use crate::error::ConversationError;
use crate::models::{Conversation, ConversationSummary, Message};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::debug;

pub const DEFAULT_CONVERSATIONS_DB: &str = "conversations.db";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    start_time TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    messages TEXT NOT NULL DEFAULT '[]',
    summary TEXT
)";

const SUMMARY_COLUMNS: &str = "SELECT id, title, last_updated, summary FROM conversations";
const NEWEST_FIRST: &str = "ORDER BY last_updated DESC, id DESC";

type SummaryRow = (i64, String, String, Option<String>);

#[derive(Debug, Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

/// Fixed-width UTC so stored values sort lexically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ConversationError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn into_summary(row: SummaryRow) -> Result<ConversationSummary, ConversationError> {
    let (id, title, last_updated, summary) = row;
    Ok(ConversationSummary {
        id,
        title,
        last_updated: parse_timestamp(&last_updated)?,
        summary,
    })
}

impl ConversationStore {
    /// Opens (or creates) the database at `path`; `":memory:"` gives a
    /// private in-memory database.
    pub async fn open(path: &str) -> Result<Self, ConversationError> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
                }
            }
            format!("sqlite:{path}")
        };

        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        debug!(path, "conversation store ready");
        Ok(Self { pool })
    }

    pub async fn create(&self, title: &str) -> Result<i64, ConversationError> {
        let now = timestamp(Utc::now());
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO conversations (title, start_time, last_updated, messages) \
             VALUES (?, ?, ?, '[]') RETURNING id",
        )
        .bind(title)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        debug!(id, title, "created conversation");
        Ok(id)
    }

    /// Replaces the stored messages and summary wholesale.
    pub async fn update(
        &self,
        id: i64,
        messages: &[Message],
        summary: Option<&str>,
    ) -> Result<(), ConversationError> {
        let encoded = serde_json::to_string(messages)?;
        let result = sqlx::query(
            "UPDATE conversations SET messages = ?, summary = ?, last_updated = ? WHERE id = ?",
        )
        .bind(encoded)
        .bind(summary)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConversationError::NotFound(id));
        }
        debug!(id, messages = messages.len(), "updated conversation");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Conversation>, ConversationError> {
        let row: Option<(i64, String, String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT id, title, start_time, last_updated, messages, summary \
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, title, start_time, last_updated, messages, summary)) = row else {
            return Ok(None);
        };

        Ok(Some(Conversation {
            id,
            title,
            start_time: parse_timestamp(&start_time)?,
            last_updated: parse_timestamp(&last_updated)?,
            messages: serde_json::from_str(&messages)?,
            summary,
        }))
    }

    /// Most recently updated first.
    pub async fn list(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ConversationSummary>, ConversationError> {
        let rows: Vec<SummaryRow> =
            sqlx::query_as(&format!("{SUMMARY_COLUMNS} {NEWEST_FIRST} LIMIT ? OFFSET ?"))
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .bind(i64::try_from(offset).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(into_summary).collect()
    }

    /// Conversations whose title, messages or summary contain `text`,
    /// ignoring ASCII case.
    pub async fn search(&self, text: &str) -> Result<Vec<ConversationSummary>, ConversationError> {
        let pattern = like_pattern(text);
        let rows: Vec<SummaryRow> = sqlx::query_as(&format!(
            "{SUMMARY_COLUMNS} WHERE title LIKE ?1 ESCAPE '\\' \
             OR messages LIKE ?1 ESCAPE '\\' \
             OR summary LIKE ?1 ESCAPE '\\' {NEWEST_FIRST}"
        ))
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_summary).collect()
    }
}
