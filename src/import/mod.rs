//! Spreadsheet import pipeline: read, normalize, stage, reconcile.

pub mod normalize;
pub mod reconcile;
pub mod sheet;
pub mod staging;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::validation::ValidationError;

pub use normalize::{CustomerRow, ParsedRows, RowRejection, UserRow};
pub use sheet::{read_sheet, SheetGrid};
pub use staging::{RowId, StagedBatch, StagedRow, StagingError, StagingStore};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("column 「{column}」 was not found; fix the file and upload it again")]
    MissingColumn { column: String },
    #[error("file could not be read: {0}")]
    MalformedFile(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// A project that will be created when its customer import is confirmed.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDraft {
    pub name: String,
    pub order_no: Option<String>,
    pub allowed_user_ids: Vec<Uuid>,
}

/// Where a staged customer import lands on confirmation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomerImportTarget {
    NewProject(ProjectDraft),
    ExistingProject { project_id: Uuid },
}

pub type CustomerImportStore = StagingStore<CustomerImportTarget, CustomerRow>;
pub type UserImportStore = StagingStore<(), UserRow>;
