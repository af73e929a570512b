//! Error types for `cohort-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("cannot merge a person into itself: {0}")]
  MergeSamePerson(Uuid),

  #[error("unknown identity source: {0:?}")]
  UnknownIdentitySource(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
