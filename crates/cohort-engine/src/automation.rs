//! The automation dispatch boundary.
//!
//! Campaign sends, webhook pings, and whatever else a segment's action
//! configures all live outside this core. The evaluator only hands the
//! action descriptor across this trait.

use std::future::Future;

use cohort_core::segment::AutomationAction;
use uuid::Uuid;

/// Result of one dispatch attempt. Failures are reported back in-band by
/// the evaluator; they never abort a membership sweep.
pub type DispatchResult =
  std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// An external automation collaborator (e.g. a campaign-email sender).
pub trait AutomationSink: Send + Sync {
  fn dispatch(
    &self,
    action: &AutomationAction,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> impl Future<Output = DispatchResult> + Send;
}

/// A sink that only logs the dispatch. Useful as a default while no real
/// automation backend is wired up, and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AutomationSink for LogSink {
  async fn dispatch(
    &self,
    action: &AutomationAction,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> DispatchResult {
    tracing::info!(
      action_type = %action.action_type,
      %person_id,
      %segment_id,
      "automation dispatched"
    );
    Ok(())
  }
}
