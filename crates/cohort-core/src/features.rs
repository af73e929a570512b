//! Behavioural feature snapshots.
//!
//! Features are computed over a lookback window by an external job and
//! replaced wholesale; every other component treats them as read-only.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Denormalised behavioural aggregates for one person. At most one snapshot
/// exists per person; `put_features` replaces it in full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonFeatures {
  pub person_id:              Uuid,
  pub active_days:            i64,
  pub core_actions:           i64,
  pub days_since_signup:      i64,
  pub days_since_last_active: i64,
  /// Per-feature event counters keyed by feature name.
  #[serde(default)]
  pub event_counts:           BTreeMap<String, i64>,
  pub computed_at:            DateTime<Utc>,
}

impl PersonFeatures {
  /// Whether the snapshot is older than `max_age` as of `now`.
  pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
    now - self.computed_at > max_age
  }
}
