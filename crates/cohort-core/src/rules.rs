//! Rule trees — nested AND/OR nodes terminating in field-operator-value
//! conditions — and their evaluation against a flattened person context.
//!
//! Evaluation is pure and total: a condition over a missing path, a type
//! mismatch, or a tree nested past [`MAX_RULE_DEPTH`] all evaluate to
//! `false` rather than erroring. Segment definitions originate from
//! less-trusted configuration input, so the evaluator fails closed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{features::PersonFeatures, person::Person};

/// Trees nested deeper than this evaluate to `false` from the offending
/// node down.
pub const MAX_RULE_DEPTH: usize = 32;

// ─── Values ──────────────────────────────────────────────────────────────────

/// A comparison literal or context value.
///
/// Comparisons never coerce across variants: `eq` requires the same variant
/// on both sides, ordering operators require numbers, `contains` requires
/// strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
  String(String),
  Number(f64),
  Bool(bool),
}

impl RuleValue {
  pub fn as_number(&self) -> Option<f64> {
    match self {
      Self::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::String(s) => Some(s),
      _ => None,
    }
  }

  /// Same-variant equality; mismatched variants are never equal.
  fn strict_eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Self::String(a), Self::String(b)) => a == b,
      (Self::Number(a), Self::Number(b)) => a == b,
      (Self::Bool(a), Self::Bool(b)) => a == b,
      _ => false,
    }
  }
}

impl From<&str> for RuleValue {
  fn from(s: &str) -> Self { Self::String(s.to_owned()) }
}

impl From<String> for RuleValue {
  fn from(s: String) -> Self { Self::String(s) }
}

impl From<i64> for RuleValue {
  fn from(n: i64) -> Self { Self::Number(n as f64) }
}

impl From<f64> for RuleValue {
  fn from(n: f64) -> Self { Self::Number(n) }
}

// ─── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupOp {
  #[serde(rename = "AND")]
  And,
  #[serde(rename = "OR")]
  Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
  Eq,
  Gt,
  Gte,
  Lt,
  Lte,
  Contains,
}

// ─── Nodes ───────────────────────────────────────────────────────────────────

/// A leaf condition: a dotted path into the evaluation context, a comparison
/// operator, and a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
  pub field:    String,
  pub operator: CompareOp,
  pub value:    RuleValue,
}

/// A conjunction or disjunction over child nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
  pub operator:   GroupOp,
  pub conditions: Vec<RuleNode>,
}

/// A node in a rule tree. The serialised form is shape-discriminated: a
/// group is `{"operator": "AND"|"OR", "conditions": [...]}` and a leaf is
/// `{"field": ..., "operator": ..., "value": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleNode {
  Group(RuleGroup),
  Leaf(Condition),
}

impl RuleNode {
  /// The always-matching tree: an empty conjunction.
  pub fn always() -> Self {
    Self::Group(RuleGroup { operator: GroupOp::And, conditions: Vec::new() })
  }

  /// The never-matching tree: an empty disjunction. Used as the fallback
  /// when persisted rule JSON no longer decodes.
  pub fn never() -> Self {
    Self::Group(RuleGroup { operator: GroupOp::Or, conditions: Vec::new() })
  }

  /// Evaluate the tree against `ctx`.
  ///
  /// An empty AND is `true` (an always-matching segment); an empty OR is
  /// `false`.
  pub fn evaluate(&self, ctx: &EvalContext) -> bool { self.eval_at(ctx, 0) }

  fn eval_at(&self, ctx: &EvalContext, depth: usize) -> bool {
    if depth >= MAX_RULE_DEPTH {
      return false;
    }
    match self {
      Self::Leaf(cond) => cond.evaluate(ctx),
      Self::Group(group) => match group.operator {
        GroupOp::And => {
          group.conditions.iter().all(|c| c.eval_at(ctx, depth + 1))
        }
        GroupOp::Or => {
          group.conditions.iter().any(|c| c.eval_at(ctx, depth + 1))
        }
      },
    }
  }
}

impl Condition {
  /// Apply the operator to the context value at `field`.
  ///
  /// A missing path fails every comparison. `contains` on anything but a
  /// pair of strings is `false`.
  pub fn evaluate(&self, ctx: &EvalContext) -> bool {
    let Some(actual) = ctx.get(&self.field) else {
      return false;
    };

    match self.operator {
      CompareOp::Eq => actual.strict_eq(&self.value),
      CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
        let (Some(a), Some(b)) = (actual.as_number(), self.value.as_number())
        else {
          return false;
        };
        match self.operator {
          CompareOp::Gt => a > b,
          CompareOp::Gte => a >= b,
          CompareOp::Lt => a < b,
          CompareOp::Lte => a <= b,
          _ => unreachable!(),
        }
      }
      CompareOp::Contains => {
        match (actual.as_str(), self.value.as_str()) {
          (Some(haystack), Some(needle)) => haystack.contains(needle),
          _ => false,
        }
      }
    }
  }
}

// ─── Evaluation context ──────────────────────────────────────────────────────

/// The read-only view rule conditions evaluate against: every person scalar
/// under `person.*` and, when a features snapshot exists, every feature
/// scalar under `features.*` (per-feature event counters surface as
/// `features.events.<name>`).
///
/// When no snapshot exists the `features.*` paths are simply absent, so any
/// condition over them fails.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
  values: BTreeMap<String, RuleValue>,
}

impl EvalContext {
  pub fn from_person(
    person: &Person,
    features: Option<&PersonFeatures>,
  ) -> Self {
    let mut ctx = Self::default();

    // Paths use the camelCase names segment definitions are written
    // against.
    ctx.set_opt_str("person.email", person.email.as_deref());
    ctx.set_opt_str("person.phone", person.phone.as_deref());
    ctx.set_opt_str("person.firstName", person.first_name.as_deref());
    ctx.set_opt_str("person.lastName", person.last_name.as_deref());
    ctx.set("person.firstSeenAt", person.first_seen_at.to_rfc3339());
    ctx.set("person.lastSeenAt", person.last_seen_at.to_rfc3339());
    ctx.set("person.activeDays", person.active_days);
    ctx.set("person.coreActions", person.core_actions);
    ctx.set("person.lifetimeValue", person.lifetime_value);

    if let Some(f) = features {
      ctx.set("features.activeDays", f.active_days);
      ctx.set("features.coreActions", f.core_actions);
      ctx.set("features.daysSinceSignup", f.days_since_signup);
      ctx.set("features.daysSinceLastActive", f.days_since_last_active);
      ctx.set("features.computedAt", f.computed_at.to_rfc3339());
      for (name, count) in &f.event_counts {
        ctx.set(format!("features.events.{name}"), *count);
      }
    }

    ctx
  }

  pub fn set(
    &mut self,
    path: impl Into<String>,
    value: impl Into<RuleValue>,
  ) {
    self.values.insert(path.into(), value.into());
  }

  fn set_opt_str(&mut self, path: &str, value: Option<&str>) {
    if let Some(v) = value {
      self.values.insert(path.to_owned(), RuleValue::from(v));
    }
  }

  pub fn get(&self, path: &str) -> Option<&RuleValue> { self.values.get(path) }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
