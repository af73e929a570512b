//! Handlers for `/persons` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/persons/resolve` | Body: `{"email":"..."}`; resolve-or-create |
//! | `GET`  | `/persons/:id` | 404 if not found |
//! | `GET`  | `/persons/:id/links` | All external identities on the person |
//! | `POST` | `/persons/:id/merge` | Body: `{"source_person_id":"..."}` |
//! | `GET`  | `/persons/:id/features` | 404 if no snapshot yet |
//! | `PUT`  | `/persons/:id/features` | Replaces the snapshot wholesale |

use std::collections::BTreeMap;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use cohort_core::{
  features::PersonFeatures,
  identity::IdentityLink,
  person::Person,
  store::IdentityStore,
};
use cohort_engine::automation::AutomationSink;
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

// ─── Resolve ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
  pub email: String,
}

/// `POST /persons/resolve` — body: `{"email":"alice@example.com"}`
pub async fn resolve<S, A>(
  State(state): State<AppState<S, A>>,
  Json(body): Json<ResolveBody>,
) -> Result<Json<Person>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let person = state.resolver.resolve_or_create_by_email(&body.email).await?;
  Ok(Json(person))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /persons/:id`
pub async fn get_one<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Person>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let person = state
    .store
    .get_person(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("person {id} not found")))?;
  Ok(Json(person))
}

// ─── Links ────────────────────────────────────────────────────────────────────

/// `GET /persons/:id/links`
pub async fn links<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<IdentityLink>>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  state
    .store
    .get_person(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("person {id} not found")))?;

  let links = state
    .store
    .links_for_person(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(links))
}

// ─── Merge ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MergeBody {
  /// The losing side; everything it owns moves to the person in the path.
  pub source_person_id: Uuid,
}

/// `POST /persons/:id/merge` — merges `source_person_id` into `:id`.
pub async fn merge<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
  Json(body): Json<MergeBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  state
    .resolver
    .merge_persons(body.source_person_id, id)
    .await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Features ─────────────────────────────────────────────────────────────────

/// `GET /persons/:id/features`
pub async fn get_features<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
) -> Result<Json<PersonFeatures>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let features = state
    .store
    .get_features(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| {
      ApiError::NotFound(format!("no features snapshot for person {id}"))
    })?;
  Ok(Json(features))
}

/// JSON body accepted by `PUT /persons/:id/features`.
/// `computed_at` is set by the server.
#[derive(Debug, Deserialize)]
pub struct FeaturesBody {
  pub active_days:            i64,
  pub core_actions:           i64,
  pub days_since_signup:      i64,
  pub days_since_last_active: i64,
  #[serde(default)]
  pub event_counts:           BTreeMap<String, i64>,
}

/// `PUT /persons/:id/features` — replaces the snapshot wholesale.
pub async fn put_features<S, A>(
  State(state): State<AppState<S, A>>,
  Path(id): Path<Uuid>,
  Json(body): Json<FeaturesBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  state
    .store
    .get_person(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("person {id} not found")))?;

  state
    .store
    .put_features(PersonFeatures {
      person_id:              id,
      active_days:            body.active_days,
      core_actions:           body.core_actions,
      days_since_signup:      body.days_since_signup,
      days_since_last_active: body.days_since_last_active,
      event_counts:           body.event_counts,
      computed_at:            Utc::now(),
    })
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  Ok(StatusCode::NO_CONTENT)
}
