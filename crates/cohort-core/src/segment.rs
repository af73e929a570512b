//! Segments — named cohorts defined by a rule tree — and their membership
//! records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rules::RuleNode;

/// An automation to run when a person enters the segment. The config payload
/// is opaque to this system; the dispatch collaborator interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationAction {
  pub action_type: String,
  pub config:      serde_json::Value,
}

/// A named, declarative cohort definition.
///
/// Disabled segments never match, regardless of their rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
  pub segment_id:  Uuid,
  /// Unique across all segments.
  pub name:        String,
  pub description: Option<String>,
  pub rules:       RuleNode,
  pub enabled:     bool,
  pub action:      Option<AutomationAction>,
  pub created_at:  DateTime<Utc>,
}

/// Input to [`crate::store::IdentityStore::create_segment`].
/// `created_at` is set by the store.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSegment {
  pub name:        String,
  #[serde(default)]
  pub description: Option<String>,
  pub rules:       RuleNode,
  #[serde(default = "default_enabled")]
  pub enabled:     bool,
  #[serde(default)]
  pub action:      Option<AutomationAction>,
}

fn default_enabled() -> bool { true }

/// A person's membership in a segment — current while `left_at` is unset,
/// historical afterwards. Rows are stamped on churn, never deleted, so the
/// table doubles as churn history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMember {
  pub member_id:  Uuid,
  pub person_id:  Uuid,
  pub segment_id: Uuid,
  pub joined_at:  DateTime<Utc>,
  pub left_at:    Option<DateTime<Utc>>,
}

impl SegmentMember {
  pub fn is_active(&self) -> bool { self.left_at.is_none() }
}
