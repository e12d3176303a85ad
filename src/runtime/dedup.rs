/// Deduplication guard for periodically rescanned lifecycle events
///
/// Once a tenant's entity has a guarded completed (or completed_with_errors) run
/// for a trigger, it is suppressed for that trigger permanently, even if the
/// underlying state recurs later. Failed runs do not count, so a later scan
/// retries them; unguarded runs (live events, manual tests) do not count either.

use crate::automation::types::TriggerKind;
use crate::recorder::{EntityKey, ExecutionRecorder, RecorderError};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeduplicationGuard {
    recorder: Arc<dyn ExecutionRecorder>,
}

impl DeduplicationGuard {
    pub fn new(recorder: Arc<dyn ExecutionRecorder>) -> Self {
        Self { recorder }
    }

    /// Candidates with no fired run for `trigger`, in their original order
    pub async fn unfired(
        &self,
        trigger: TriggerKind,
        candidates: &[EntityKey],
    ) -> Result<Vec<EntityKey>, RecorderError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let fired = self.recorder.fired_entities(trigger, candidates).await?;
        let unfired: Vec<EntityKey> = candidates
            .iter()
            .filter(|candidate| !fired.contains(*candidate))
            .cloned()
            .collect();

        tracing::debug!(
            "🔍 {} of {} candidate(s) not yet fired for {}",
            unfired.len(),
            candidates.len(),
            trigger
        );
        Ok(unfired)
    }
}
