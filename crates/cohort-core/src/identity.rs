//! Identity links — mappings from external identifiers to persons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// The external system an identifier originates from.
///
/// A closed set: every inbound event names one of these. The `external_id`
/// paired with it is opaque to this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
  /// A first-party user account id.
  User,
  /// A payment-processor customer id.
  Stripe,
  /// An analytics-tool distinct id.
  Posthog,
  /// An ad-platform click id.
  Meta,
}

impl IdentitySource {
  /// The tag stored in the `source` column.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::User => "user",
      Self::Stripe => "stripe",
      Self::Posthog => "posthog",
      Self::Meta => "meta",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "user" => Ok(Self::User),
      "stripe" => Ok(Self::Stripe),
      "posthog" => Ok(Self::Posthog),
      "meta" => Ok(Self::Meta),
      other => Err(Error::UnknownIdentitySource(other.to_owned())),
    }
  }
}

impl std::fmt::Display for IdentitySource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A directed mapping from one external identity to a person.
///
/// The pair `(source, external_id)` is globally unique — one external
/// identity maps to exactly one person at a time. Merges repoint links;
/// they never duplicate them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLink {
  pub link_id:     Uuid,
  pub source:      IdentitySource,
  pub external_id: String,
  pub person_id:   Uuid,
  pub created_at:  DateTime<Utc>,
}
