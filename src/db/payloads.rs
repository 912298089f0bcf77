//! Downloaded payload bodies, keyed by canonical link and fetch mode.

use crate::error::DatabaseError;
use crate::types::{FetchMode, Payload};
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::{HashMap, HashSet};

use super::{Database, PayloadRow};

/// Bound parameters per `IN (...)` query, below SQLite's variable limit
const URL_CHUNK: usize = 500;

impl Database {
    /// Insert or replace a payload
    pub async fn upsert_payload(&self, payload: &Payload) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payloads (url, mode, body, corrected_account_id, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url, mode) DO UPDATE SET
                body = excluded.body,
                corrected_account_id = excluded.corrected_account_id,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&payload.url)
        .bind(payload.mode.as_str())
        .bind(&payload.body)
        .bind(payload.corrected_account_id.as_ref())
        .bind(payload.fetched_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to store payload for {}: {}",
                payload.url, e
            )))
        })?;

        Ok(())
    }

    /// Which of `urls` already have a payload of this mode
    ///
    /// One query per 500 urls.
    pub async fn existing_payload_urls(
        &self,
        urls: &[String],
        mode: FetchMode,
    ) -> Result<HashSet<String>> {
        let mut found = HashSet::new();

        for chunk in urls.chunks(URL_CHUNK) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT url FROM payloads WHERE mode = ");
            query.push_bind(mode.as_str());
            query.push(" AND url IN (");
            let mut separated = query.separated(", ");
            for url in chunk {
                separated.push_bind(url);
            }
            separated.push_unseparated(")");

            let rows: Vec<String> = query
                .build_query_scalar()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check payload existence: {}",
                        e
                    )))
                })?;

            found.extend(rows);
        }

        Ok(found)
    }

    /// Payloads of this mode for `urls`, keyed by url
    pub async fn load_payloads(
        &self,
        urls: &[String],
        mode: FetchMode,
    ) -> Result<HashMap<String, Payload>> {
        let mut payloads = HashMap::new();

        for chunk in urls.chunks(URL_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT url, mode, body, corrected_account_id, fetched_at FROM payloads WHERE mode = ",
            );
            query.push_bind(mode.as_str());
            query.push(" AND url IN (");
            let mut separated = query.separated(", ");
            for url in chunk {
                separated.push_bind(url);
            }
            separated.push_unseparated(")");

            let rows: Vec<PayloadRow> = query
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to load payloads: {}",
                        e
                    )))
                })?;

            payloads.extend(
                rows.into_iter()
                    .filter_map(PayloadRow::into_payload)
                    .map(|p| (p.url.clone(), p)),
            );
        }

        Ok(payloads)
    }
}
