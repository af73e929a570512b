//! Person — the canonical identity record.
//!
//! A person unifies every external account belonging to one end user. All
//! external identifiers attach to it via identity links; behavioural
//! aggregates live in a separate features snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The canonical record for one human or organisation using the product.
///
/// At most one person exists per email address at any time (store-level
/// unique constraint); a person created purely from an external identity may
/// carry no email at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
  pub person_id:      Uuid,
  pub email:          Option<String>,
  pub phone:          Option<String>,
  pub first_name:     Option<String>,
  pub last_name:      Option<String>,
  /// Server-assigned on creation; merges take the minimum across both sides.
  pub first_seen_at:  DateTime<Utc>,
  /// Bumped on every resolution; merges take the maximum across both sides.
  pub last_seen_at:   DateTime<Utc>,
  pub active_days:    i64,
  pub core_actions:   i64,
  pub lifetime_value: f64,
}

/// Input to [`crate::store::IdentityStore::create_person`].
/// Both timestamps are set by the store; they are not accepted from callers.
#[derive(Debug, Clone, Default)]
pub struct NewPerson {
  pub email:      Option<String>,
  pub phone:      Option<String>,
  pub first_name: Option<String>,
  pub last_name:  Option<String>,
}

impl NewPerson {
  /// Convenience constructor for the common email-only case.
  pub fn with_email(email: impl Into<String>) -> Self {
    Self { email: Some(email.into()), ..Self::default() }
  }
}

/// Optional trait fields supplied alongside an external identity
/// (e.g. a billing webhook carrying the customer's name).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonTraits {
  pub phone:      Option<String>,
  pub first_name: Option<String>,
  pub last_name:  Option<String>,
}

impl PersonTraits {
  pub fn into_new_person(self, email: Option<String>) -> NewPerson {
    NewPerson {
      email,
      phone: self.phone,
      first_name: self.first_name,
      last_name: self.last_name,
    }
  }
}
