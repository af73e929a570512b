//! Error type for `cohort-store-sqlite`.

use cohort_core::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] cohort_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A mutation referenced a person that does not exist.
  #[error("person not found: {0}")]
  PersonNotFound(uuid::Uuid),

  /// A mutation referenced a segment that does not exist.
  #[error("segment not found: {0}")]
  SegmentNotFound(uuid::Uuid),
}

impl StoreError for Error {
  fn is_unique_violation(&self) -> bool {
    let Error::Database(tokio_rusqlite::Error::Rusqlite(
      rusqlite::Error::SqliteFailure(e, _),
    )) = self
    else {
      return false;
    };
    e.code == rusqlite::ErrorCode::ConstraintViolation
      && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
