//! Handlers for `/segments` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`    | `/segments` | All segments |
//! | `POST`   | `/segments` | Body: [`cohort_core::segment::NewSegment`]; 201 |
//! | `GET`    | `/segments/:id` | 404 if not found |
//! | `PUT`    | `/segments/:id` | Full overwrite; `created_at` is kept |
//! | `DELETE` | `/segments/:id` | Drops membership rows too |
//! | `GET`    | `/segments/:id/members` | Active members only |
//! | `POST`   | `/segments/:id/sweep` | Optional `?batch_size=` (default 500) |
//! | `POST`   | `/segments/:id/evaluate/:person_id` | Reconciles membership |
//! | `POST`   | `/segments/:id/trigger/:person_id` | Fires the automation |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use cohort_core::{
  segment::{NewSegment, Segment, SegmentMember},
  store::IdentityStore,
};
use cohort_engine::{
  MembershipChange, SweepReport, TriggerOutcome, automation::AutomationSink,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

const DEFAULT_SWEEP_BATCH: usize = 500;

// ─── List / create ────────────────────────────────────────────────────────────

/// `GET /segments`
pub async fn list<S, A>(
  State(state): State<AppState<S, A>>,
) -> Result<Json<Vec<Segment>>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let segments = state
    .store
    .list_segments()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(segments))
}

/// `POST /segments` — returns 201 + the stored segment.
pub async fn create<S, A>(
  State(state): State<AppState<S, A>>,
  Json(body): Json<NewSegment>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let segment = state
    .store
    .create_segment(body)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok((StatusCode::CREATED, Json(segment)))
}

// ─── Get / update / delete ────────────────────────────────────────────────────

/// `GET /segments/:id`
pub async fn get_one<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Segment>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let segment = fetch_segment(&state, id).await?;
  Ok(Json(segment))
}

/// `PUT /segments/:id` — body is the same shape as create; the row is
/// overwritten in full.
pub async fn update<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
  Json(body): Json<NewSegment>,
) -> Result<Json<Segment>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let existing = fetch_segment(&state, id).await?;

  let segment = Segment {
    segment_id:  id,
    name:        body.name,
    description: body.description,
    rules:       body.rules,
    enabled:     body.enabled,
    action:      body.action,
    created_at:  existing.created_at,
  };
  state
    .store
    .update_segment(segment.clone())
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(segment))
}

/// `DELETE /segments/:id`
pub async fn delete_one<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  fetch_segment(&state, id).await?;
  state
    .store
    .delete_segment(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Membership ───────────────────────────────────────────────────────────────

/// `GET /segments/:id/members` — active members only; churned rows stay in
/// the store as history but are not listed here.
pub async fn members<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<SegmentMember>>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  fetch_segment(&state, id).await?;
  let members = state
    .store
    .active_members(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(members))
}

/// `POST /segments/:id/evaluate/:person_id`
pub async fn evaluate<S, A>(
  State(state): State<AppState<S, A>>,
  Path((id, person_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MembershipChange>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let change = state.evaluator.update_membership(person_id, id).await?;
  Ok(Json(change))
}

#[derive(Debug, Deserialize, Default)]
pub struct SweepParams {
  pub batch_size: Option<usize>,
}

/// `POST /segments/:id/sweep[?batch_size=<n>]`
pub async fn sweep<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
  Query(params): Query<SweepParams>,
) -> Result<Json<SweepReport>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let batch_size = params.batch_size.unwrap_or(DEFAULT_SWEEP_BATCH);
  let report = state.evaluator.sweep_segment(id, batch_size).await?;
  Ok(Json(report))
}

/// `POST /segments/:id/trigger/:person_id` — fires the configured
/// automation; dispatch failures come back in the outcome body, not as an
/// error status.
pub async fn trigger<S, A>(
  State(state): State<AppState<S, A>>,
  Path((id, person_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TriggerOutcome>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let outcome = state.evaluator.trigger_automation(person_id, id).await?;
  Ok(Json(outcome))
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

async fn fetch_segment<S, A>(
  state: &AppState<S, A>,
  id: Uuid,
) -> Result<Segment, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  state
    .store
    .get_segment(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("segment {id} not found")))
}
