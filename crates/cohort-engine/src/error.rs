//! Error type for `cohort-engine`.

use thiserror::Error;
use uuid::Uuid;

use cohort_core::store::StoreError;

/// An error surfaced by the resolver or evaluator.
///
/// Backend failures are boxed so the engine stays generic over store
/// implementations; create races never reach this type (they are recovered
/// by re-reading).
#[derive(Debug, Error)]
pub enum Error {
  #[error("person not found: {0}")]
  PersonNotFound(Uuid),

  #[error("segment not found: {0}")]
  SegmentNotFound(Uuid),

  #[error("cannot merge a person into itself: {0}")]
  MergeSamePerson(Uuid),

  #[error("email must not be empty")]
  EmptyEmail,

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub(crate) fn store<E: StoreError>(e: E) -> Self { Self::Store(Box::new(e)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
