//! Identity resolution and segment evaluation services for Cohort.
//!
//! Both services are thin, stateless wrappers over an explicitly-injected
//! [`cohort_core::store::IdentityStore`] — there is no ambient global state.
//! [`IdentityResolver`] maps external identifiers onto canonical persons and
//! merges duplicates; [`SegmentEvaluator`] decides cohort membership from
//! rule trees and reconciles it idempotently.

pub mod automation;
pub mod error;
pub mod evaluator;
pub mod resolver;

pub use automation::{AutomationSink, LogSink};
pub use error::{Error, Result};
pub use evaluator::{
  MembershipAction, MembershipChange, SegmentEvaluator, SweepError,
  SweepReport, TriggerOutcome,
};
pub use resolver::IdentityResolver;
