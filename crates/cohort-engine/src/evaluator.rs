//! [`SegmentEvaluator`] — decides segment membership and reconciles it.

use std::sync::Arc;

use cohort_core::{
  rules::EvalContext,
  segment::Segment,
  store::{IdentityStore, StoreError as _},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{Error, Result, automation::AutomationSink};

// ─── Outcome types ───────────────────────────────────────────────────────────

/// What a membership reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipAction {
  Added,
  Removed,
  NoChange,
}

/// Result of [`SegmentEvaluator::update_membership`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MembershipChange {
  pub is_member: bool,
  pub action:    MembershipAction,
}

/// One person that failed during a sweep; the sweep itself continues.
#[derive(Debug, Clone, Serialize)]
pub struct SweepError {
  pub person_id: Uuid,
  pub message:   String,
}

/// Aggregate result of [`SegmentEvaluator::sweep_segment`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
  pub total:   usize,
  pub added:   usize,
  pub removed: usize,
  pub errors:  Vec<SweepError>,
}

/// Result of [`SegmentEvaluator::trigger_automation`]. Dispatch failures are
/// reported here, never raised, so a batch sweep cannot be aborted by a
/// flaky downstream.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerOutcome {
  pub triggered:   bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub action_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:       Option<String>,
}

impl TriggerOutcome {
  fn not_configured() -> Self {
    Self {
      triggered:   false,
      action_type: None,
      error:       Some("no automation configured".to_owned()),
    }
  }
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

/// Evaluates rule trees against person state and keeps membership rows in
/// sync. Deciding membership and firing automation are separate steps:
/// callers trigger automation explicitly after an `Added` outcome.
///
/// Cloning is cheap — both collaborators are reference-counted.
#[derive(Clone)]
pub struct SegmentEvaluator<S, A> {
  store: Arc<S>,
  sink:  Arc<A>,
}

impl<S, A> SegmentEvaluator<S, A>
where
  S: IdentityStore,
  A: AutomationSink,
{
  pub fn new(store: Arc<S>, sink: Arc<A>) -> Self { Self { store, sink } }

  /// The read-only view rules evaluate against, or `None` for an unknown
  /// person.
  pub async fn build_context(
    &self,
    person_id: Uuid,
  ) -> Result<Option<EvalContext>> {
    let Some(person) = self
      .store
      .get_person(person_id)
      .await
      .map_err(Error::store)?
    else {
      return Ok(None);
    };

    let features = self
      .store
      .get_features(person_id)
      .await
      .map_err(Error::store)?;

    Ok(Some(EvalContext::from_person(&person, features.as_ref())))
  }

  /// Whether the person currently matches the segment. Disabled and unknown
  /// segments never match, and neither does an unknown person.
  pub async fn evaluate_person(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> Result<bool> {
    let Some(segment) = self
      .store
      .get_segment(segment_id)
      .await
      .map_err(Error::store)?
    else {
      return Ok(false);
    };

    self.evaluate_with_segment(person_id, &segment).await
  }

  /// Segment-already-loaded variant so sweeps evaluate each person without
  /// re-reading the segment row.
  async fn evaluate_with_segment(
    &self,
    person_id: Uuid,
    segment: &Segment,
  ) -> Result<bool> {
    if !segment.enabled {
      return Ok(false);
    }

    let Some(ctx) = self.build_context(person_id).await? else {
      return Ok(false);
    };

    Ok(segment.rules.evaluate(&ctx))
  }

  /// Reconcile the active membership row against the current match state.
  ///
  /// Idempotent: a second call with no intervening state change always
  /// reports `NoChange`. Churn stamps `left_at` rather than deleting, so
  /// history survives.
  pub async fn update_membership(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> Result<MembershipChange> {
    self
      .store
      .get_person(person_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::PersonNotFound(person_id))?;
    let segment = self
      .store
      .get_segment(segment_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::SegmentNotFound(segment_id))?;

    let matches = self.evaluate_with_segment(person_id, &segment).await?;
    let active = self
      .store
      .active_membership(person_id, segment_id)
      .await
      .map_err(Error::store)?;

    let change = match (matches, active.is_some()) {
      (true, false) => {
        match self.store.open_membership(person_id, segment_id).await {
          Ok(_) => MembershipChange {
            is_member: true,
            action:    MembershipAction::Added,
          },
          // A concurrent reconciler opened the row between our read and
          // write; converge instead of erroring.
          Err(e) if e.is_unique_violation() => MembershipChange {
            is_member: true,
            action:    MembershipAction::NoChange,
          },
          Err(e) => return Err(Error::store(e)),
        }
      }
      (false, true) => {
        self
          .store
          .close_membership(person_id, segment_id)
          .await
          .map_err(Error::store)?;
        MembershipChange {
          is_member: false,
          action:    MembershipAction::Removed,
        }
      }
      (is_member, _) => MembershipChange {
        is_member,
        action: MembershipAction::NoChange,
      },
    };

    Ok(change)
  }

  /// Reconcile every person against one segment, in bounded batches.
  ///
  /// Each person is its own failure domain: an error is recorded in the
  /// report and the sweep moves on. No transaction spans the sweep.
  pub async fn sweep_segment(
    &self,
    segment_id: Uuid,
    batch_size: usize,
  ) -> Result<SweepReport> {
    self
      .store
      .get_segment(segment_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::SegmentNotFound(segment_id))?;

    let batch_size = batch_size.max(1);
    let mut report = SweepReport::default();
    let mut offset = 0;

    loop {
      let ids = self
        .store
        .list_person_ids(batch_size, offset)
        .await
        .map_err(Error::store)?;
      if ids.is_empty() {
        break;
      }
      offset += ids.len();

      for person_id in ids {
        report.total += 1;
        match self.update_membership(person_id, segment_id).await {
          Ok(change) => match change.action {
            MembershipAction::Added => report.added += 1,
            MembershipAction::Removed => report.removed += 1,
            MembershipAction::NoChange => {}
          },
          Err(e) => {
            tracing::warn!(%person_id, %segment_id, error = %e, "sweep item failed");
            report.errors.push(SweepError {
              person_id,
              message: e.to_string(),
            });
          }
        }
      }
    }

    Ok(report)
  }

  /// Fire the segment's configured automation for one person.
  ///
  /// Called by the owner of an `Added` outcome as an explicit second step —
  /// this function does not decide membership. Returns an in-band outcome
  /// in every case except a missing segment.
  pub async fn trigger_automation(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> Result<TriggerOutcome> {
    let segment = self
      .store
      .get_segment(segment_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::SegmentNotFound(segment_id))?;

    let Some(action) = &segment.action else {
      return Ok(TriggerOutcome::not_configured());
    };

    match self.sink.dispatch(action, person_id, segment_id).await {
      Ok(()) => Ok(TriggerOutcome {
        triggered:   true,
        action_type: Some(action.action_type.clone()),
        error:       None,
      }),
      Err(e) => {
        tracing::warn!(
          %person_id,
          %segment_id,
          action_type = %action.action_type,
          error = %e,
          "automation dispatch failed"
        );
        Ok(TriggerOutcome {
          triggered:   false,
          action_type: Some(action.action_type.clone()),
          error:       Some(e.to_string()),
        })
      }
    }
  }
}
