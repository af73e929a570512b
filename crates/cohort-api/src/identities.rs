//! Handlers for external-identity endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/identify` | Resolve-or-create from `(source, external_id, email?, traits?)` |
//! | `GET`  | `/identities/:source/:external_id` | Pure lookup, 404 if unlinked |

use axum::{
  Json,
  extract::{Path, State},
};
use cohort_core::{
  identity::IdentitySource,
  person::{Person, PersonTraits},
  store::IdentityStore,
};
use cohort_engine::automation::AutomationSink;
use serde::Deserialize;

use crate::{AppState, error::ApiError};

// ─── Identify ─────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /identify`. This is the shape webhook and
/// event handlers feed the resolver with.
#[derive(Debug, Deserialize)]
pub struct IdentifyBody {
  pub source:      IdentitySource,
  pub external_id: String,
  pub email:       Option<String>,
  #[serde(default)]
  pub traits:      PersonTraits,
}

/// `POST /identify`
pub async fn identify<S, A>(
  State(state): State<AppState<S, A>>,
  Json(body): Json<IdentifyBody>,
) -> Result<Json<Person>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let person = state
    .resolver
    .resolve_or_create_from_external(
      body.source,
      &body.external_id,
      body.email.as_deref(),
      body.traits,
    )
    .await?;
  Ok(Json(person))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /identities/:source/:external_id`
pub async fn get_one<S, A>(
  State(state): State<AppState<S, A>>,
  Path((source, external_id)): Path<(IdentitySource, String)>,
) -> Result<Json<Person>, ApiError>
where
  S: IdentityStore,
  A: AutomationSink,
{
  let person = state
    .resolver
    .find_person_by_identity(source, &external_id)
    .await?
    .ok_or_else(|| {
      ApiError::NotFound(format!("identity {source}:{external_id} not linked"))
    })?;
  Ok(Json(person))
}
