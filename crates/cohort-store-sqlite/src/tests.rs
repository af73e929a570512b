//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::Utc;
use cohort_core::{
  features::PersonFeatures,
  identity::IdentitySource,
  person::NewPerson,
  rules::RuleNode,
  segment::{AutomationAction, NewSegment},
  store::{IdentityStore, StoreError as _},
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn features_for(person_id: Uuid, core_actions: i64) -> PersonFeatures {
  PersonFeatures {
    person_id,
    active_days: 1,
    core_actions,
    days_since_signup: 10,
    days_since_last_active: 2,
    event_counts: Default::default(),
    computed_at: Utc::now(),
  }
}

fn plain_segment(name: &str) -> NewSegment {
  NewSegment {
    name:        name.to_owned(),
    description: None,
    rules:       RuleNode::always(),
    enabled:     true,
    action:      None,
  }
}

// ─── Persons ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_person() {
  let s = store().await;

  let person = s
    .create_person(NewPerson::with_email("alice@example.com"))
    .await
    .unwrap();
  assert_eq!(person.email.as_deref(), Some("alice@example.com"));
  assert_eq!(person.first_seen_at, person.last_seen_at);

  let fetched = s.get_person(person.person_id).await.unwrap().unwrap();
  assert_eq!(fetched.person_id, person.person_id);
  assert_eq!(fetched.email.as_deref(), Some("alice@example.com"));
}

#[tokio::test]
async fn get_person_missing_returns_none() {
  let s = store().await;
  assert!(s.get_person(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn find_person_by_email_exact_match() {
  let s = store().await;
  let person = s
    .create_person(NewPerson::with_email("bob@example.com"))
    .await
    .unwrap();

  let found = s.find_person_by_email("bob@example.com").await.unwrap();
  assert_eq!(found.unwrap().person_id, person.person_id);

  assert!(s.find_person_by_email("BOB@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_email_is_a_unique_violation() {
  let s = store().await;
  s.create_person(NewPerson::with_email("dup@example.com"))
    .await
    .unwrap();

  let err = s
    .create_person(NewPerson::with_email("dup@example.com"))
    .await
    .unwrap_err();
  assert!(err.is_unique_violation(), "unexpected error: {err}");
}

#[tokio::test]
async fn persons_without_email_can_coexist() {
  let s = store().await;
  s.create_person(NewPerson::default()).await.unwrap();
  s.create_person(NewPerson::default()).await.unwrap();
  assert_eq!(s.count_persons().await.unwrap(), 2);
}

#[tokio::test]
async fn touch_person_bumps_last_seen() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();

  let after = s.touch_person(person.person_id).await.unwrap().unwrap();
  assert!(after.last_seen_at >= person.last_seen_at);
  assert_eq!(after.first_seen_at, person.first_seen_at);

  assert!(s.touch_person(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn list_person_ids_pages_in_stable_order() {
  let s = store().await;
  for _ in 0..5 {
    s.create_person(NewPerson::default()).await.unwrap();
  }

  let first = s.list_person_ids(3, 0).await.unwrap();
  let second = s.list_person_ids(3, 3).await.unwrap();
  assert_eq!(first.len(), 3);
  assert_eq!(second.len(), 2);

  let mut all: Vec<Uuid> = first.into_iter().chain(second).collect();
  let before = all.clone();
  all.sort();
  all.dedup();
  assert_eq!(all.len(), 5);
  assert_eq!(before, all, "pages should already be sorted");
}

// ─── Identity links ──────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_link_twice_yields_one_row_with_same_id() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();

  let first = s
    .upsert_link(IdentitySource::Stripe, "cus_123", person.person_id)
    .await
    .unwrap();
  let second = s
    .upsert_link(IdentitySource::Stripe, "cus_123", person.person_id)
    .await
    .unwrap();

  assert_eq!(first.link_id, second.link_id);
  assert_eq!(s.links_for_person(person.person_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn upsert_link_repoints_existing_row() {
  let s = store().await;
  let a = s.create_person(NewPerson::default()).await.unwrap();
  let b = s.create_person(NewPerson::default()).await.unwrap();

  let original = s
    .upsert_link(IdentitySource::Posthog, "distinct-1", a.person_id)
    .await
    .unwrap();
  let repointed = s
    .upsert_link(IdentitySource::Posthog, "distinct-1", b.person_id)
    .await
    .unwrap();

  assert_eq!(original.link_id, repointed.link_id);
  assert_eq!(repointed.person_id, b.person_id);
  assert!(s.links_for_person(a.person_id).await.unwrap().is_empty());

  let found = s
    .find_link(IdentitySource::Posthog, "distinct-1")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found.person_id, b.person_id);
}

#[tokio::test]
async fn same_external_id_under_different_sources_is_distinct() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();

  s.upsert_link(IdentitySource::User, "42", person.person_id)
    .await
    .unwrap();
  s.upsert_link(IdentitySource::Stripe, "42", person.person_id)
    .await
    .unwrap();

  assert_eq!(s.links_for_person(person.person_id).await.unwrap().len(), 2);
}

// ─── Features ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn put_features_replaces_wholesale() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();

  s.put_features(features_for(person.person_id, 3)).await.unwrap();
  let mut newer = features_for(person.person_id, 8);
  newer.event_counts.insert("letter_sent".into(), 2);
  s.put_features(newer).await.unwrap();

  let got = s.get_features(person.person_id).await.unwrap().unwrap();
  assert_eq!(got.core_actions, 8);
  assert_eq!(got.event_counts.get("letter_sent"), Some(&2));
}

#[tokio::test]
async fn get_features_missing_returns_none() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();
  assert!(s.get_features(person.person_id).await.unwrap().is_none());
}

// ─── Segments ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_segment() {
  let s = store().await;

  let segment = s
    .create_segment(NewSegment {
      name:        "active-senders".into(),
      description: Some("sent recently".into()),
      rules:       RuleNode::always(),
      enabled:     true,
      action:      Some(AutomationAction {
        action_type: "campaign_email".into(),
        config:      serde_json::json!({ "campaign_id": "welcome" }),
      }),
    })
    .await
    .unwrap();

  let got = s.get_segment(segment.segment_id).await.unwrap().unwrap();
  assert_eq!(got.name, "active-senders");
  assert!(got.enabled);
  let action = got.action.unwrap();
  assert_eq!(action.action_type, "campaign_email");
  assert_eq!(action.config["campaign_id"], "welcome");

  let by_name = s.get_segment_by_name("active-senders").await.unwrap();
  assert_eq!(by_name.unwrap().segment_id, segment.segment_id);
}

#[tokio::test]
async fn segment_names_are_unique() {
  let s = store().await;
  s.create_segment(plain_segment("dormant")).await.unwrap();

  let err = s.create_segment(plain_segment("dormant")).await.unwrap_err();
  assert!(err.is_unique_violation(), "unexpected error: {err}");
}

#[tokio::test]
async fn update_segment_overwrites_row() {
  let s = store().await;
  let mut segment = s.create_segment(plain_segment("draft")).await.unwrap();

  segment.enabled = false;
  segment.description = Some("paused for review".into());
  s.update_segment(segment.clone()).await.unwrap();

  let got = s.get_segment(segment.segment_id).await.unwrap().unwrap();
  assert!(!got.enabled);
  assert_eq!(got.description.as_deref(), Some("paused for review"));
}

#[tokio::test]
async fn update_missing_segment_errors() {
  let s = store().await;
  let mut segment = s.create_segment(plain_segment("gone")).await.unwrap();
  s.delete_segment(segment.segment_id).await.unwrap();

  segment.enabled = false;
  let err = s.update_segment(segment).await.unwrap_err();
  assert!(matches!(err, crate::Error::SegmentNotFound(_)));
}

#[tokio::test]
async fn delete_segment_removes_members_too() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();
  let segment = s.create_segment(plain_segment("temp")).await.unwrap();
  s.open_membership(person.person_id, segment.segment_id)
    .await
    .unwrap();

  s.delete_segment(segment.segment_id).await.unwrap();
  assert!(s.get_segment(segment.segment_id).await.unwrap().is_none());

  let err = s.delete_segment(segment.segment_id).await.unwrap_err();
  assert!(matches!(err, crate::Error::SegmentNotFound(_)));
}

#[tokio::test]
async fn malformed_rules_load_as_never_matching() {
  use crate::encode::decode_rules;
  use cohort_core::rules::EvalContext;

  let node = decode_rules("{\"operator\": \"NAND\", \"conditions\": 4}");
  assert!(!node.evaluate(&EvalContext::default()));
}

// ─── Membership ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn open_close_membership_lifecycle() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();
  let segment = s.create_segment(plain_segment("joiners")).await.unwrap();

  assert!(
    s.active_membership(person.person_id, segment.segment_id)
      .await
      .unwrap()
      .is_none()
  );

  let member = s
    .open_membership(person.person_id, segment.segment_id)
    .await
    .unwrap();
  assert!(member.is_active());

  let active = s
    .active_membership(person.person_id, segment.segment_id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(active.member_id, member.member_id);

  s.close_membership(person.person_id, segment.segment_id)
    .await
    .unwrap();
  assert!(
    s.active_membership(person.person_id, segment.segment_id)
      .await
      .unwrap()
      .is_none()
  );

  // The row survives as history with left_at stamped.
  let history = s
    .membership_history(person.person_id, segment.segment_id)
    .await
    .unwrap();
  assert_eq!(history.len(), 1);
  assert!(history[0].left_at.is_some());
}

#[tokio::test]
async fn second_active_membership_violates_unique_index() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();
  let segment = s.create_segment(plain_segment("strict")).await.unwrap();

  s.open_membership(person.person_id, segment.segment_id)
    .await
    .unwrap();
  let err = s
    .open_membership(person.person_id, segment.segment_id)
    .await
    .unwrap_err();
  assert!(err.is_unique_violation(), "unexpected error: {err}");
}

#[tokio::test]
async fn rejoining_after_churn_opens_a_new_row() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();
  let segment = s.create_segment(plain_segment("returners")).await.unwrap();

  s.open_membership(person.person_id, segment.segment_id)
    .await
    .unwrap();
  s.close_membership(person.person_id, segment.segment_id)
    .await
    .unwrap();
  s.open_membership(person.person_id, segment.segment_id)
    .await
    .unwrap();

  let history = s
    .membership_history(person.person_id, segment.segment_id)
    .await
    .unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(
    s.active_members(segment.segment_id).await.unwrap().len(),
    1
  );
}

// ─── Merge ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_preserves_link_cardinality() {
  let s = store().await;
  let source = s.create_person(NewPerson::default()).await.unwrap();
  let target = s.create_person(NewPerson::default()).await.unwrap();

  s.upsert_link(IdentitySource::User, "u-1", source.person_id)
    .await
    .unwrap();
  s.upsert_link(IdentitySource::Posthog, "d-1", source.person_id)
    .await
    .unwrap();
  s.upsert_link(IdentitySource::Stripe, "cus_1", target.person_id)
    .await
    .unwrap();

  s.merge_persons(source.person_id, target.person_id)
    .await
    .unwrap();

  assert!(s.get_person(source.person_id).await.unwrap().is_none());
  assert_eq!(s.links_for_person(target.person_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn merge_reconciles_traits() {
  let s = store().await;
  let source = s
    .create_person(NewPerson {
      email:      Some("old@example.com".into()),
      phone:      Some("+15550001".into()),
      first_name: Some("Alicia".into()),
      last_name:  None,
    })
    .await
    .unwrap();
  // Created after source, so source holds the earlier first_seen_at.
  let target = s
    .create_person(NewPerson {
      email:      Some("new@example.com".into()),
      phone:      None,
      first_name: Some("Alice".into()),
      last_name:  Some("Liddell".into()),
    })
    .await
    .unwrap();

  s.merge_persons(source.person_id, target.person_id)
    .await
    .unwrap();

  let merged = s.get_person(target.person_id).await.unwrap().unwrap();
  assert_eq!(merged.email.as_deref(), Some("new@example.com"));
  assert_eq!(merged.first_name.as_deref(), Some("Alice"));
  assert_eq!(merged.phone.as_deref(), Some("+15550001"));
  assert_eq!(merged.first_seen_at, source.first_seen_at.min(target.first_seen_at));
  assert!(merged.last_seen_at >= source.last_seen_at);
}

#[tokio::test]
async fn merge_target_without_email_inherits_sources() {
  let s = store().await;
  let source = s
    .create_person(NewPerson::with_email("only@example.com"))
    .await
    .unwrap();
  let target = s.create_person(NewPerson::default()).await.unwrap();

  s.merge_persons(source.person_id, target.person_id)
    .await
    .unwrap();

  let merged = s.get_person(target.person_id).await.unwrap().unwrap();
  assert_eq!(merged.email.as_deref(), Some("only@example.com"));
}

#[tokio::test]
async fn merge_keeps_target_features_snapshot() {
  let s = store().await;
  let source = s.create_person(NewPerson::default()).await.unwrap();
  let target = s.create_person(NewPerson::default()).await.unwrap();

  s.put_features(features_for(source.person_id, 3)).await.unwrap();
  s.put_features(features_for(target.person_id, 9)).await.unwrap();

  s.merge_persons(source.person_id, target.person_id)
    .await
    .unwrap();

  let got = s.get_features(target.person_id).await.unwrap().unwrap();
  assert_eq!(got.core_actions, 9, "target's snapshot wins");
}

#[tokio::test]
async fn merge_moves_features_when_target_has_none() {
  let s = store().await;
  let source = s.create_person(NewPerson::default()).await.unwrap();
  let target = s.create_person(NewPerson::default()).await.unwrap();

  s.put_features(features_for(source.person_id, 3)).await.unwrap();

  s.merge_persons(source.person_id, target.person_id)
    .await
    .unwrap();

  let got = s.get_features(target.person_id).await.unwrap().unwrap();
  assert_eq!(got.core_actions, 3);
}

#[tokio::test]
async fn merge_closes_colliding_active_membership() {
  let s = store().await;
  let source = s.create_person(NewPerson::default()).await.unwrap();
  let target = s.create_person(NewPerson::default()).await.unwrap();
  let shared = s.create_segment(plain_segment("shared")).await.unwrap();
  let only_source = s.create_segment(plain_segment("only-source")).await.unwrap();

  s.open_membership(source.person_id, shared.segment_id)
    .await
    .unwrap();
  s.open_membership(target.person_id, shared.segment_id)
    .await
    .unwrap();
  s.open_membership(source.person_id, only_source.segment_id)
    .await
    .unwrap();

  s.merge_persons(source.person_id, target.person_id)
    .await
    .unwrap();

  // Exactly one active row per segment, both owned by the target now.
  assert_eq!(s.active_members(shared.segment_id).await.unwrap().len(), 1);
  let active = s
    .active_membership(target.person_id, only_source.segment_id)
    .await
    .unwrap();
  assert!(active.is_some());

  // The collided source row survives as target history.
  let history = s
    .membership_history(target.person_id, shared.segment_id)
    .await
    .unwrap();
  assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn merge_into_self_errors() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();

  let err = s
    .merge_persons(person.person_id, person.person_id)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(cohort_core::Error::MergeSamePerson(_))
  ));
}

#[tokio::test]
async fn merge_with_missing_person_errors() {
  let s = store().await;
  let person = s.create_person(NewPerson::default()).await.unwrap();

  let err = s
    .merge_persons(Uuid::new_v4(), person.person_id)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::PersonNotFound(_)));

  let err = s
    .merge_persons(person.person_id, Uuid::new_v4())
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::PersonNotFound(_)));
}
