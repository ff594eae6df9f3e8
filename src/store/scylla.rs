//! ScyllaDB-backed candidate store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::value::{CqlValue, Row};
use std::sync::Arc;
use tracing::info;

use crate::models::NormalizedPlace;

use super::CandidateStore;

#[derive(Clone)]
pub struct ScyllaCandidateStore {
    session: Arc<Session>,
}

impl ScyllaCandidateStore {
    pub async fn new(uri: &str) -> Result<Self> {
        info!("Connecting to ScyllaDB at {}...", uri);
        let session: Session = SessionBuilder::new()
            .known_node(uri)
            .build()
            .await
            .context("Failed to connect to ScyllaDB")?;

        let store = Self {
            session: Arc::new(session),
        };

        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.session
            .query_unpaged(
                "CREATE KEYSPACE IF NOT EXISTS prospect
                 WITH REPLICATION = {
                    'class' : 'SimpleStrategy',
                    'replication_factor' : 1
                 }",
                &[],
            )
            .await?;

        self.session
            .query_unpaged(
                "CREATE TABLE IF NOT EXISTS prospect.candidates (
                    id text PRIMARY KEY,
                    category text,
                    data text
                )",
                &[],
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl CandidateStore for ScyllaCandidateStore {
    /// Insert-if-absent via a lightweight transaction. The `[applied]`
    /// column of the LWT response tells whether a new row was created;
    /// an existing row is left untouched.
    async fn upsert_candidate(&self, place: &NormalizedPlace) -> Result<bool> {
        let data = serde_json::to_string(place)?;

        let result = self
            .session
            .query_unpaged(
                "INSERT INTO prospect.candidates (id, category, data)
                 VALUES (?, ?, ?) IF NOT EXISTS",
                (&place.id, &place.category, &data),
            )
            .await?;

        // The response row schema differs between applied and rejected
        // inserts, so read the first column generically.
        let rows_result = result.into_rows_result()?;
        for row in rows_result.rows::<Row>()? {
            let row = row?;
            if let Some(Some(CqlValue::Boolean(applied))) = row.columns.first() {
                return Ok(*applied);
            }
        }

        Ok(false)
    }
}
