use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{error, info, warn};

use crate::error::AppError;

/// One result row as delivered by the driver: each value is text or NULL.
pub type TextRow = Vec<Option<String>>;

/// Minimal read-only query interface. `SqlDatabase` implements it over a
/// live connection; tests implement it over canned rows.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    async fn run_rows(&self, sql: &str) -> Result<Vec<TextRow>, AppError>;
}

pub struct SqlDatabase {
    client: tokio_postgres::Client,
    timeout: Duration,
}

impl SqlDatabase {
    /// Connect to PostgreSQL. A connection failure here is fatal to the
    /// session: nothing downstream can work without the database.
    pub async fn connect(database_url: &str, timeout_secs: u64) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| {
                error!("Database connection failed: {}", e);
                AppError::Connection(e.to_string())
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Database connection task ended: {}", e);
            }
        });

        info!("Database connection established");
        Ok(Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Columns and rows for the query tool, all values rendered as text.
    pub async fn run_with_columns(
        &self,
        sql: &str,
    ) -> Result<(Vec<String>, Vec<TextRow>), AppError> {
        let messages = tokio::time::timeout(self.timeout, self.client.simple_query(sql))
            .await
            .map_err(|_| AppError::Database(format!("query timed out after {:?}", self.timeout)))?
            .map_err(AppError::from)?;

        let mut columns = Vec::new();
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                if columns.is_empty() {
                    columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                }
                rows.push(
                    (0..row.len())
                        .map(|i| row.get(i).map(|v| v.to_string()))
                        .collect(),
                );
            }
        }
        Ok((columns, rows))
    }

    /// Names of user tables in the public schema.
    pub async fn list_tables(&self) -> Result<Vec<String>, AppError> {
        let sql = "SELECT table_name FROM information_schema.tables \
                   WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
                   ORDER BY table_name";
        let rows = self.run_rows(sql).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    /// Column names and types for one table, formatted for the model.
    pub async fn describe_table(&self, table: &str) -> Result<String, AppError> {
        validate_identifier(table)?;
        let sql = format!(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = '{}' \
             ORDER BY ordinal_position",
            table
        );
        let rows = self.run_rows(&sql).await?;
        if rows.is_empty() {
            return Ok(format!("Table '{}' not found", table));
        }

        let mut out = format!("Table: {}\nColumns:\n", table);
        for row in rows {
            let name = row.first().cloned().flatten().unwrap_or_default();
            let dtype = row.get(1).cloned().flatten().unwrap_or_default();
            let nullable = row.get(2).cloned().flatten().unwrap_or_default();
            out.push_str(&format!("  {} {}", name, dtype));
            if nullable == "YES" {
                out.push_str(" NULL");
            }
            out.push('\n');
        }
        Ok(out)
    }
}

#[async_trait]
impl SqlRunner for SqlDatabase {
    async fn run_rows(&self, sql: &str) -> Result<Vec<TextRow>, AppError> {
        let (_, rows) = self.run_with_columns(sql).await?;
        Ok(rows)
    }
}

static FORBIDDEN_SQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|create|truncate|grant|revoke|copy|vacuum)\b",
    )
    .unwrap()
});

/// Reject anything that is not a single read-only statement. The agent is
/// told never to issue DML; this guard enforces it regardless.
pub fn ensure_read_only(sql: &str) -> Result<(), String> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err("empty query".to_string());
    }
    if trimmed.contains(';') {
        return Err("only a single statement is allowed".to_string());
    }
    let first_word = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if first_word != "select" && first_word != "with" {
        return Err(format!(
            "only SELECT statements are allowed, got '{}'",
            first_word
        ));
    }
    if let Some(m) = FORBIDDEN_SQL.find(trimmed) {
        return Err(format!("forbidden keyword '{}' in query", m.as_str()));
    }
    Ok(())
}

/// Allow-list check applied before any identifier is interpolated into a
/// query. Extraction specs come from trusted configuration, never user
/// input, but the guard holds either way.
pub fn validate_identifier(name: &str) -> Result<(), AppError> {
    if name.is_empty() || name.len() > 64 {
        warn!("Rejected identifier of length {}", name.len());
        return Err(AppError::InvalidInput(format!(
            "invalid identifier length: {}",
            name.len()
        )));
    }
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidInput(format!(
            "identifier '{}' must not start with a digit",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        warn!("Rejected identifier with invalid characters: {}", name);
        return Err(AppError::InvalidInput(format!(
            "identifier '{}' contains invalid characters",
            name
        )));
    }
    Ok(())
}
