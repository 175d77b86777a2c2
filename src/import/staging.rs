//! Short-lived, per-user holding area for parsed import rows awaiting confirmation.
//!
//! A batch is `Staged` from the moment it is stored until it is taken for commit,
//! cancelled or expires. Taking a batch removes it, so a second confirmation of the
//! same token is stale. A failed commit hands the batch back with [`StagingStore::restore`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::normalize::RowRejection;

pub type RowId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StagingError {
    #[error("this import has expired or was already completed; please start the import again")]
    Stale,
    #[error("staged row {0} not found")]
    RowNotFound(RowId),
}

#[derive(Debug, Clone, Serialize)]
pub struct StagedRow<R> {
    pub row_id: RowId,
    #[serde(flatten)]
    pub data: R,
}

#[derive(Debug, Clone)]
pub struct StagedBatch<C, R> {
    pub token: Uuid,
    pub owner: Uuid,
    pub context: C,
    pub rejected: Vec<RowRejection>,
    pub expires_at: DateTime<Utc>,
    rows: BTreeMap<RowId, R>,
}

impl<C, R: Clone> StagedBatch<C, R> {
    /// Rows in staging order with their ids.
    pub fn rows(&self) -> Vec<StagedRow<R>> {
        self.rows
            .iter()
            .map(|(row_id, data)| StagedRow {
                row_id: *row_id,
                data: data.clone(),
            })
            .collect()
    }
}

impl<C, R> StagedBatch<C, R> {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row_data(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub struct StagingStore<C, R> {
    ttl: Duration,
    batches: Mutex<HashMap<Uuid, StagedBatch<C, R>>>,
}

impl<C: Clone, R: Clone> StagingStore<C, R> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            batches: Mutex::new(HashMap::new()),
        }
    }

    /// Stores a new batch and sweeps expired ones. Row ids are assigned from 0.
    pub async fn stage(
        &self,
        owner: Uuid,
        context: C,
        rows: Vec<R>,
        rejected: Vec<RowRejection>,
    ) -> StagedBatch<C, R> {
        let now = Utc::now();
        let batch = StagedBatch {
            token: Uuid::new_v4(),
            owner,
            context,
            rejected,
            expires_at: now + self.ttl,
            rows: (0..).zip(rows).collect(),
        };

        let mut batches = self.batches.lock().await;
        batches.retain(|_, existing| !existing.is_expired(now));
        batches.insert(batch.token, batch.clone());
        batch
    }

    pub async fn get(&self, owner: Uuid, token: Uuid) -> Result<StagedBatch<C, R>, StagingError> {
        let batches = self.batches.lock().await;
        live_batch(&batches, owner, token).cloned()
    }

    /// Replaces one row with the result of `edit`. A failed edit leaves the row as it was.
    pub async fn update_row<F, E>(
        &self,
        owner: Uuid,
        token: Uuid,
        row_id: RowId,
        edit: F,
    ) -> Result<StagedBatch<C, R>, E>
    where
        F: FnOnce(&R) -> Result<R, E>,
        E: From<StagingError>,
    {
        let mut batches = self.batches.lock().await;
        live_batch(&batches, owner, token)?;
        let batch = batches
            .get_mut(&token)
            .ok_or(StagingError::Stale)?;
        let current = batch
            .rows
            .get(&row_id)
            .ok_or(StagingError::RowNotFound(row_id))?;
        let updated = edit(current)?;
        batch.rows.insert(row_id, updated);
        Ok(batch.clone())
    }

    pub async fn remove_row(
        &self,
        owner: Uuid,
        token: Uuid,
        row_id: RowId,
    ) -> Result<StagedBatch<C, R>, StagingError> {
        let mut batches = self.batches.lock().await;
        live_batch(&batches, owner, token)?;
        let batch = batches.get_mut(&token).ok_or(StagingError::Stale)?;
        batch
            .rows
            .remove(&row_id)
            .ok_or(StagingError::RowNotFound(row_id))?;
        Ok(batch.clone())
    }

    /// Removes the batch for commit. The token is stale from here on unless restored.
    pub async fn take(&self, owner: Uuid, token: Uuid) -> Result<StagedBatch<C, R>, StagingError> {
        let mut batches = self.batches.lock().await;
        live_batch(&batches, owner, token)?;
        batches.remove(&token).ok_or(StagingError::Stale)
    }

    /// Puts a taken batch back after a failed commit.
    pub async fn restore(&self, batch: StagedBatch<C, R>) {
        let mut batches = self.batches.lock().await;
        batches.insert(batch.token, batch);
    }

    pub async fn cancel(&self, owner: Uuid, token: Uuid) -> Result<(), StagingError> {
        self.take(owner, token).await.map(|_| ())
    }

    pub async fn len(&self) -> usize {
        self.batches.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// Tokens owned by someone else look exactly like unknown ones.
fn live_batch<'a, C, R>(
    batches: &'a HashMap<Uuid, StagedBatch<C, R>>,
    owner: Uuid,
    token: Uuid,
) -> Result<&'a StagedBatch<C, R>, StagingError> {
    match batches.get(&token) {
        Some(batch) if batch.owner == owner && !batch.is_expired(Utc::now()) => Ok(batch),
        _ => Err(StagingError::Stale),
    }
}
