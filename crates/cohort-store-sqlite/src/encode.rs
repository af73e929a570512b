//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Structured fields (rule
//! trees, event counters, automation config) are stored as compact JSON.
//! UUIDs are stored as hyphenated lowercase strings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cohort_core::{
  features::PersonFeatures,
  identity::{IdentityLink, IdentitySource},
  person::Person,
  rules::RuleNode,
  segment::{AutomationAction, Segment, SegmentMember},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── IdentitySource ──────────────────────────────────────────────────────────

pub fn encode_source(s: IdentitySource) -> &'static str { s.as_str() }

pub fn decode_source(s: &str) -> Result<IdentitySource> {
  Ok(IdentitySource::parse(s)?)
}

// ─── Rule trees ──────────────────────────────────────────────────────────────

pub fn encode_rules(node: &RuleNode) -> Result<String> {
  Ok(serde_json::to_string(node)?)
}

/// A rules column that no longer decodes yields the never-matching tree, so
/// a malformed segment simply stops matching instead of failing every read
/// and sweep that touches it.
pub fn decode_rules(s: &str) -> RuleNode {
  serde_json::from_str(s).unwrap_or_else(|_| RuleNode::never())
}

// ─── Event counters ──────────────────────────────────────────────────────────

pub fn encode_event_counts(counts: &BTreeMap<String, i64>) -> Result<String> {
  Ok(serde_json::to_string(counts)?)
}

pub fn decode_event_counts(s: &str) -> Result<BTreeMap<String, i64>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `persons` row.
pub struct RawPerson {
  pub person_id:      String,
  pub email:          Option<String>,
  pub phone:          Option<String>,
  pub first_name:     Option<String>,
  pub last_name:      Option<String>,
  pub first_seen_at:  String,
  pub last_seen_at:   String,
  pub active_days:    i64,
  pub core_actions:   i64,
  pub lifetime_value: f64,
}

impl RawPerson {
  /// Shared column list for every `persons` SELECT.
  pub const COLUMNS: &'static str = "person_id, email, phone, first_name, \
     last_name, first_seen_at, last_seen_at, active_days, core_actions, \
     lifetime_value";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      person_id:      row.get(0)?,
      email:          row.get(1)?,
      phone:          row.get(2)?,
      first_name:     row.get(3)?,
      last_name:      row.get(4)?,
      first_seen_at:  row.get(5)?,
      last_seen_at:   row.get(6)?,
      active_days:    row.get(7)?,
      core_actions:   row.get(8)?,
      lifetime_value: row.get(9)?,
    })
  }

  pub fn into_person(self) -> Result<Person> {
    Ok(Person {
      person_id:      decode_uuid(&self.person_id)?,
      email:          self.email,
      phone:          self.phone,
      first_name:     self.first_name,
      last_name:      self.last_name,
      first_seen_at:  decode_dt(&self.first_seen_at)?,
      last_seen_at:   decode_dt(&self.last_seen_at)?,
      active_days:    self.active_days,
      core_actions:   self.core_actions,
      lifetime_value: self.lifetime_value,
    })
  }
}

/// Raw strings read directly from an `identity_links` row.
pub struct RawLink {
  pub link_id:     String,
  pub source:      String,
  pub external_id: String,
  pub person_id:   String,
  pub created_at:  String,
}

impl RawLink {
  pub const COLUMNS: &'static str =
    "link_id, source, external_id, person_id, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      link_id:     row.get(0)?,
      source:      row.get(1)?,
      external_id: row.get(2)?,
      person_id:   row.get(3)?,
      created_at:  row.get(4)?,
    })
  }

  pub fn into_link(self) -> Result<IdentityLink> {
    Ok(IdentityLink {
      link_id:     decode_uuid(&self.link_id)?,
      source:      decode_source(&self.source)?,
      external_id: self.external_id,
      person_id:   decode_uuid(&self.person_id)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `person_features` row.
pub struct RawFeatures {
  pub person_id:              String,
  pub active_days:            i64,
  pub core_actions:           i64,
  pub days_since_signup:      i64,
  pub days_since_last_active: i64,
  pub event_counts:           String,
  pub computed_at:            String,
}

impl RawFeatures {
  pub const COLUMNS: &'static str = "person_id, active_days, core_actions, \
     days_since_signup, days_since_last_active, event_counts, computed_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      person_id:              row.get(0)?,
      active_days:            row.get(1)?,
      core_actions:           row.get(2)?,
      days_since_signup:      row.get(3)?,
      days_since_last_active: row.get(4)?,
      event_counts:           row.get(5)?,
      computed_at:            row.get(6)?,
    })
  }

  pub fn into_features(self) -> Result<PersonFeatures> {
    Ok(PersonFeatures {
      person_id:              decode_uuid(&self.person_id)?,
      active_days:            self.active_days,
      core_actions:           self.core_actions,
      days_since_signup:      self.days_since_signup,
      days_since_last_active: self.days_since_last_active,
      event_counts:           decode_event_counts(&self.event_counts)?,
      computed_at:            decode_dt(&self.computed_at)?,
    })
  }
}

/// Raw strings read directly from a `segments` row.
pub struct RawSegment {
  pub segment_id:    String,
  pub name:          String,
  pub description:   Option<String>,
  pub rules_json:    String,
  pub enabled:       bool,
  pub action_type:   Option<String>,
  pub action_config: Option<String>,
  pub created_at:    String,
}

impl RawSegment {
  pub const COLUMNS: &'static str = "segment_id, name, description, \
     rules_json, enabled, action_type, action_config, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      segment_id:    row.get(0)?,
      name:          row.get(1)?,
      description:   row.get(2)?,
      rules_json:    row.get(3)?,
      enabled:       row.get(4)?,
      action_type:   row.get(5)?,
      action_config: row.get(6)?,
      created_at:    row.get(7)?,
    })
  }

  pub fn into_segment(self) -> Result<Segment> {
    let action = match self.action_type {
      Some(action_type) => {
        let config = match self.action_config.as_deref() {
          Some(raw) => serde_json::from_str(raw)?,
          None => serde_json::Value::Null,
        };
        Some(AutomationAction { action_type, config })
      }
      None => None,
    };

    Ok(Segment {
      segment_id: decode_uuid(&self.segment_id)?,
      name: self.name,
      description: self.description,
      rules: decode_rules(&self.rules_json),
      enabled: self.enabled,
      action,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `segment_members` row.
pub struct RawMember {
  pub member_id:  String,
  pub person_id:  String,
  pub segment_id: String,
  pub joined_at:  String,
  pub left_at:    Option<String>,
}

impl RawMember {
  pub const COLUMNS: &'static str =
    "member_id, person_id, segment_id, joined_at, left_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      member_id:  row.get(0)?,
      person_id:  row.get(1)?,
      segment_id: row.get(2)?,
      joined_at:  row.get(3)?,
      left_at:    row.get(4)?,
    })
  }

  pub fn into_member(self) -> Result<SegmentMember> {
    Ok(SegmentMember {
      member_id:  decode_uuid(&self.member_id)?,
      person_id:  decode_uuid(&self.person_id)?,
      segment_id: decode_uuid(&self.segment_id)?,
      joined_at:  decode_dt(&self.joined_at)?,
      left_at:    self.left_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}
