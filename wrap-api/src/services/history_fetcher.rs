//! History fetcher
//!
//! Fetch-then-archive for listening-history datasets. The default flow runs
//! its three fetches concurrently and fails as a whole if any one fails, so
//! analysis never starts from incomplete data.

use futures::future::try_join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use wrap_common::HistoryDataset;

use crate::archive::{ArchiveError, ArchiveRecord, ArchiveStore};
use crate::services::spotify_client::{FetchError, HistoryQuery, HistorySource};

/// Failure of a fetch-then-archive call
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Upstream fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Archive persist failed: {0}")]
    Archive(#[from] ArchiveError),
}

/// Retrieves listening history and hands it to the archive store
#[derive(Clone)]
pub struct HistoryFetcher {
    source: Arc<dyn HistorySource>,
    archive: Arc<ArchiveStore>,
}

impl HistoryFetcher {
    pub fn new(source: Arc<dyn HistorySource>, archive: Arc<ArchiveStore>) -> Self {
        Self { source, archive }
    }

    /// Fetch one dataset without archiving it
    pub async fn fetch(
        &self,
        access_token: &str,
        query: &HistoryQuery,
    ) -> Result<HistoryDataset, FetchError> {
        self.source.fetch(access_token, query).await
    }

    /// Fetch one dataset and persist it in a new envelope
    pub async fn fetch_and_archive(
        &self,
        access_token: &str,
        query: &HistoryQuery,
    ) -> Result<ArchiveRecord, HistoryError> {
        let dataset = self.source.fetch(access_token, query).await?;
        let data = serde_json::to_value(&dataset).map_err(ArchiveError::Encode)?;
        let record = self
            .archive
            .archive_history(query.kind, query.time_range, query.limit, &data)
            .await?;
        Ok(record)
    }

    /// Run every query concurrently; all must succeed
    ///
    /// Records are returned in query order.
    pub async fn fetch_all(
        &self,
        access_token: &str,
        queries: &[HistoryQuery],
    ) -> Result<Vec<ArchiveRecord>, HistoryError> {
        info!(datasets = queries.len(), "Fetching listening history");

        let records = try_join_all(
            queries
                .iter()
                .map(|query| self.fetch_and_archive(access_token, query)),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "History fetch stage failed");
            e
        })?;

        info!(
            archives = ?records.iter().map(|r| r.filename.as_str()).collect::<Vec<_>>(),
            "Listening history archived"
        );
        Ok(records)
    }
}
