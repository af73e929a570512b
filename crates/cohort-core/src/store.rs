//! The `IdentityStore` trait and supporting types.
//!
//! The trait is implemented by storage backends (e.g.
//! `cohort-store-sqlite`). Higher layers (`cohort-engine`, `cohort-api`)
//! depend on this abstraction, not on any concrete backend.
//!
//! The relational store is the sole arbiter of consistency: every invariant
//! (email uniqueness, one link per `(source, external_id)`, one active
//! membership per `(person, segment)`) is a store-level constraint, and the
//! merge is the single multi-statement transactional boundary. Nothing here
//! relies on in-process locks.

use std::future::Future;

use uuid::Uuid;

use crate::{
  features::PersonFeatures,
  identity::{IdentityLink, IdentitySource},
  person::{NewPerson, Person},
  segment::{NewSegment, Segment, SegmentMember},
};

// ─── Error classification ────────────────────────────────────────────────────

/// Backend error classification the engine needs without depending on a
/// concrete backend.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// `true` when the error is a unique-constraint violation — the signal
  /// that a concurrent caller won a create race and the row should be
  /// re-read instead of the error propagated.
  fn is_unique_violation(&self) -> bool;
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Cohort identity store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait IdentityStore: Send + Sync {
  type Error: StoreError;

  // ── Persons ───────────────────────────────────────────────────────────

  /// Create and persist a new person. Both seen-at timestamps are set by
  /// the store. Creating a second person with an email already present
  /// fails with a unique-violation error (see [`StoreError`]).
  fn create_person(
    &self,
    input: NewPerson,
  ) -> impl Future<Output = Result<Person, Self::Error>> + Send + '_;

  /// Retrieve a person by id. Returns `None` if not found.
  fn get_person(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  /// Exact-match lookup by email. Returns `None` if not found.
  fn find_person_by_email<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + 'a;

  /// Bump `last_seen_at` to now and return the updated row, or `None` if
  /// the person does not exist.
  fn touch_person(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  /// One page of person ids in stable `person_id` order, for batch sweeps.
  fn list_person_ids(
    &self,
    limit: usize,
    offset: usize,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  fn count_persons(
    &self,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Identity links ────────────────────────────────────────────────────

  /// Atomically insert-or-repoint the link for `(source, external_id)` so
  /// it points at `person_id`. An existing row keeps its `link_id`. This is
  /// a single conditional upsert, not a read-then-write, so two concurrent
  /// callers converge on one row.
  fn upsert_link<'a>(
    &'a self,
    source: IdentitySource,
    external_id: &'a str,
    person_id: Uuid,
  ) -> impl Future<Output = Result<IdentityLink, Self::Error>> + Send + 'a;

  /// Pure lookup by `(source, external_id)`. Returns `None` if not found.
  fn find_link<'a>(
    &'a self,
    source: IdentitySource,
    external_id: &'a str,
  ) -> impl Future<Output = Result<Option<IdentityLink>, Self::Error>> + Send + 'a;

  /// All links currently pointing at `person_id`.
  fn links_for_person(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<Vec<IdentityLink>, Self::Error>> + Send + '_;

  // ── Features ──────────────────────────────────────────────────────────

  /// Replace the features snapshot for `features.person_id` wholesale.
  fn put_features(
    &self,
    features: PersonFeatures,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_features(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<Option<PersonFeatures>, Self::Error>> + Send + '_;

  // ── Segments ──────────────────────────────────────────────────────────

  fn create_segment(
    &self,
    input: NewSegment,
  ) -> impl Future<Output = Result<Segment, Self::Error>> + Send + '_;

  fn get_segment(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Segment>, Self::Error>> + Send + '_;

  fn get_segment_by_name<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<Segment>, Self::Error>> + Send + 'a;

  fn list_segments(
    &self,
  ) -> impl Future<Output = Result<Vec<Segment>, Self::Error>> + Send + '_;

  /// Overwrite a segment row in full, keyed by `segment.segment_id`.
  fn update_segment(
    &self,
    segment: Segment,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn delete_segment(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Segment membership ────────────────────────────────────────────────

  /// The active (`left_at IS NULL`) membership row for the pair, if any.
  fn active_membership(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> impl Future<Output = Result<Option<SegmentMember>, Self::Error>> + Send + '_;

  /// Open a new active membership with `joined_at` set by the store.
  fn open_membership(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> impl Future<Output = Result<SegmentMember, Self::Error>> + Send + '_;

  /// Stamp `left_at` on the active membership row for the pair. The row is
  /// kept as churn history, never deleted. A missing active row is a no-op.
  fn close_membership(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// All currently-active members of a segment.
  fn active_members(
    &self,
    segment_id: Uuid,
  ) -> impl Future<Output = Result<Vec<SegmentMember>, Self::Error>> + Send + '_;

  /// Every membership row for the pair, active and historical, oldest
  /// first.
  fn membership_history(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> impl Future<Output = Result<Vec<SegmentMember>, Self::Error>> + Send + '_;

  // ── Merge ─────────────────────────────────────────────────────────────

  /// Merge `source_id` into `target_id` as one all-or-nothing transaction:
  /// repoint links and memberships, move the features snapshot unless the
  /// target already has one, reconcile scalar traits (earliest
  /// `first_seen_at`, latest `last_seen_at`, target-wins string fields,
  /// summed accumulators), and delete the source row. Any failure rolls
  /// the whole transaction back — a half-merged pair is never observable.
  fn merge_persons(
    &self,
    source_id: Uuid,
    target_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Merge trait reconciliation ──────────────────────────────────────────────

/// Field-by-field reconciliation of two person records, applied to the
/// surviving (target) side of a merge. Pure so backends can share it inside
/// their own transaction.
pub fn reconcile_merged_traits(source: &Person, target: &Person) -> Person {
  Person {
    person_id:      target.person_id,
    email:          target.email.clone().or_else(|| source.email.clone()),
    phone:          target.phone.clone().or_else(|| source.phone.clone()),
    first_name:     target
      .first_name
      .clone()
      .or_else(|| source.first_name.clone()),
    last_name:      target
      .last_name
      .clone()
      .or_else(|| source.last_name.clone()),
    first_seen_at:  target.first_seen_at.min(source.first_seen_at),
    last_seen_at:   target.last_seen_at.max(source.last_seen_at),
    active_days:    target.active_days + source.active_days,
    core_actions:   target.core_actions + source.core_actions,
    lifetime_value: target.lifetime_value + source.lifetime_value,
  }
}
