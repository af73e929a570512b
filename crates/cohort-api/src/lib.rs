//! JSON REST API for Cohort.
//!
//! Exposes an axum [`Router`] backed by any
//! [`cohort_core::store::IdentityStore`] and
//! [`cohort_engine::AutomationSink`]. Auth, TLS, and transport concerns are
//! the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", cohort_api::api_router(store.clone(), sink.clone()))
//! ```

pub mod error;
pub mod identities;
pub mod persons;
pub mod segments;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use cohort_core::store::IdentityStore;
use cohort_engine::{
  IdentityResolver, SegmentEvaluator, automation::AutomationSink,
};

pub use error::ApiError;

/// Shared state threaded through all handlers.
#[derive(Clone)]
pub struct AppState<S, A> {
  pub store:     Arc<S>,
  pub resolver:  IdentityResolver<S>,
  pub evaluator: SegmentEvaluator<S, A>,
}

/// Build a fully-materialised API router for `store` and `sink`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, A>(store: Arc<S>, sink: Arc<A>) -> Router<()>
where
  S: IdentityStore + Clone + Send + Sync + 'static,
  A: AutomationSink + Clone + Send + Sync + 'static,
{
  let state = AppState {
    store:     store.clone(),
    resolver:  IdentityResolver::new(store.clone()),
    evaluator: SegmentEvaluator::new(store, sink),
  };

  Router::new()
    // Identity resolution
    .route("/identify", post(identities::identify::<S, A>))
    .route(
      "/identities/{source}/{external_id}",
      get(identities::get_one::<S, A>),
    )
    // Persons
    .route("/persons/resolve", post(persons::resolve::<S, A>))
    .route("/persons/{id}", get(persons::get_one::<S, A>))
    .route("/persons/{id}/links", get(persons::links::<S, A>))
    .route("/persons/{id}/merge", post(persons::merge::<S, A>))
    .route(
      "/persons/{id}/features",
      get(persons::get_features::<S, A>).put(persons::put_features::<S, A>),
    )
    // Segments
    .route(
      "/segments",
      get(segments::list::<S, A>).post(segments::create::<S, A>),
    )
    .route(
      "/segments/{id}",
      get(segments::get_one::<S, A>)
        .put(segments::update::<S, A>)
        .delete(segments::delete_one::<S, A>),
    )
    .route("/segments/{id}/members", get(segments::members::<S, A>))
    .route("/segments/{id}/sweep", post(segments::sweep::<S, A>))
    .route(
      "/segments/{id}/evaluate/{person_id}",
      post(segments::evaluate::<S, A>),
    )
    .route(
      "/segments/{id}/trigger/{person_id}",
      post(segments::trigger::<S, A>),
    )
    .with_state(state)
}

// ─── Integration tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use cohort_engine::automation::LogSink;
  use cohort_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  use super::api_router;

  async fn make_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().await.unwrap())
  }

  async fn send(
    store: &Arc<SqliteStore>,
    method: &str,
    uri: &str,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let router = api_router(store.clone(), Arc::new(LogSink));
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    let resp = router.oneshot(builder.body(body).unwrap()).await.unwrap();

    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
      .await
      .unwrap();
    let value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
  }

  fn engaged_segment_body() -> Value {
    json!({
      "name": "engaged",
      "rules": {
        "operator": "AND",
        "conditions": [
          { "field": "features.coreActions", "operator": "gte", "value": 2 },
          { "field": "features.daysSinceLastActive", "operator": "lte", "value": 5 }
        ]
      }
    })
  }

  // ── Persons ─────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn resolve_converges_on_one_person() {
    let store = make_store().await;

    let (status, first) = send(
      &store,
      "POST",
      "/persons/resolve",
      Some(json!({ "email": "alice@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, second) = send(
      &store,
      "POST",
      "/persons/resolve",
      Some(json!({ "email": "alice@example.com" })),
    )
    .await;
    assert_eq!(first["person_id"], second["person_id"]);

    let id = first["person_id"].as_str().unwrap();
    let (status, fetched) =
      send(&store, "GET", &format!("/persons/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["email"], "alice@example.com");
  }

  #[tokio::test]
  async fn empty_email_is_a_bad_request() {
    let store = make_store().await;
    let (status, body) = send(
      &store,
      "POST",
      "/persons/resolve",
      Some(json!({ "email": " " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
  }

  #[tokio::test]
  async fn unknown_person_returns_404() {
    let store = make_store().await;
    let id = uuid::Uuid::new_v4();
    let (status, _) =
      send(&store, "GET", &format!("/persons/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  // ── Identities ──────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn identify_links_and_lookup_finds() {
    let store = make_store().await;

    let (status, person) = send(
      &store,
      "POST",
      "/identify",
      Some(json!({
        "source": "stripe",
        "external_id": "cus_42",
        "email": "bob@example.com",
        "traits": { "first_name": "Bob" }
      })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(person["first_name"], "Bob");

    let (status, found) =
      send(&store, "GET", "/identities/stripe/cus_42", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["person_id"], person["person_id"]);

    let id = person["person_id"].as_str().unwrap();
    let (status, links) =
      send(&store, "GET", &format!("/persons/{id}/links"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(links.as_array().unwrap().len(), 1);
    assert_eq!(links[0]["external_id"], "cus_42");
  }

  #[tokio::test]
  async fn unlinked_identity_returns_404() {
    let store = make_store().await;
    let (status, _) =
      send(&store, "GET", "/identities/posthog/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  // ── Merge ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn merge_deletes_source_and_moves_links() {
    let store = make_store().await;

    let (_, source) = send(
      &store,
      "POST",
      "/identify",
      Some(json!({ "source": "posthog", "external_id": "anon-1" })),
    )
    .await;
    let (_, target) = send(
      &store,
      "POST",
      "/persons/resolve",
      Some(json!({ "email": "carol@example.com" })),
    )
    .await;

    let source_id = source["person_id"].as_str().unwrap();
    let target_id = target["person_id"].as_str().unwrap();

    let (status, _) = send(
      &store,
      "POST",
      &format!("/persons/{target_id}/merge"),
      Some(json!({ "source_person_id": source_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) =
      send(&store, "GET", &format!("/persons/{source_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, links) = send(
      &store,
      "GET",
      &format!("/persons/{target_id}/links"),
      None,
    )
    .await;
    assert_eq!(links.as_array().unwrap().len(), 1);
  }

  // ── Segments ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn segment_membership_flow() {
    let store = make_store().await;

    let (status, segment) =
      send(&store, "POST", "/segments", Some(engaged_segment_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    let segment_id = segment["segment_id"].as_str().unwrap().to_owned();

    let (_, person) = send(
      &store,
      "POST",
      "/persons/resolve",
      Some(json!({ "email": "dora@example.com" })),
    )
    .await;
    let person_id = person["person_id"].as_str().unwrap().to_owned();

    let (status, _) = send(
      &store,
      "PUT",
      &format!("/persons/{person_id}/features"),
      Some(json!({
        "active_days": 4,
        "core_actions": 3,
        "days_since_signup": 30,
        "days_since_last_active": 2
      })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let evaluate_uri =
      format!("/segments/{segment_id}/evaluate/{person_id}");
    let (status, change) = send(&store, "POST", &evaluate_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(change["action"], "added");
    assert_eq!(change["is_member"], true);

    let (_, change) = send(&store, "POST", &evaluate_uri, None).await;
    assert_eq!(change["action"], "no_change");

    let (status, members) = send(
      &store,
      "GET",
      &format!("/segments/{segment_id}/members"),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(members.as_array().unwrap().len(), 1);

    // The person goes idle; the sweep churns them out.
    send(
      &store,
      "PUT",
      &format!("/persons/{person_id}/features"),
      Some(json!({
        "active_days": 4,
        "core_actions": 3,
        "days_since_signup": 40,
        "days_since_last_active": 12
      })),
    )
    .await;

    let (status, report) = send(
      &store,
      "POST",
      &format!("/segments/{segment_id}/sweep?batch_size=10"),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["removed"], 1);
    assert_eq!(report["errors"].as_array().unwrap().len(), 0);

    let (_, members) = send(
      &store,
      "GET",
      &format!("/segments/{segment_id}/members"),
      None,
    )
    .await;
    assert_eq!(members.as_array().unwrap().len(), 0);
  }

  #[tokio::test]
  async fn segment_update_and_delete() {
    let store = make_store().await;

    let (_, segment) =
      send(&store, "POST", "/segments", Some(engaged_segment_body())).await;
    let segment_id = segment["segment_id"].as_str().unwrap().to_owned();

    let (status, updated) = send(
      &store,
      "PUT",
      &format!("/segments/{segment_id}"),
      Some(json!({
        "name": "engaged",
        "enabled": false,
        "rules": { "operator": "AND", "conditions": [] }
      })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["enabled"], false);

    let (status, _) = send(
      &store,
      "DELETE",
      &format!("/segments/{segment_id}"),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) =
      send(&store, "GET", &format!("/segments/{segment_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn trigger_reports_outcome_in_band() {
    let store = make_store().await;

    let (_, segment) = send(
      &store,
      "POST",
      "/segments",
      Some(json!({
        "name": "welcome",
        "rules": { "operator": "AND", "conditions": [] },
        "action": {
          "action_type": "campaign_email",
          "config": { "campaign_id": "welcome-1" }
        }
      })),
    )
    .await;
    let segment_id = segment["segment_id"].as_str().unwrap().to_owned();

    let (_, person) = send(
      &store,
      "POST",
      "/persons/resolve",
      Some(json!({ "email": "eli@example.com" })),
    )
    .await;
    let person_id = person["person_id"].as_str().unwrap().to_owned();

    let (status, outcome) = send(
      &store,
      "POST",
      &format!("/segments/{segment_id}/trigger/{person_id}"),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["triggered"], true);
    assert_eq!(outcome["action_type"], "campaign_email");
  }
}
