/// Event dispatch: one executor task per matching automation
///
/// Runs for the same event proceed concurrently on the tokio runtime. Results are
/// returned in match order (automation id), not completion order.

use crate::automation::types::DomainEvent;
use crate::recorder::ExecutionRun;
use crate::runtime::{executor::WorkflowExecutor, matcher::TriggerMatcher};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Clone)]
pub struct EventDispatcher {
    matcher: TriggerMatcher,
    executor: Arc<WorkflowExecutor>,
}

impl EventDispatcher {
    pub fn new(matcher: TriggerMatcher, executor: Arc<WorkflowExecutor>) -> Self {
        Self { matcher, executor }
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    /// Execute every matching automation for the event
    ///
    /// An event without a correlation id gets one here, shared by all of its runs.
    pub async fn dispatch(&self, mut event: DomainEvent) -> Vec<ExecutionRun> {
        let automations = self.matcher.match_event(&event);
        if automations.is_empty() {
            tracing::debug!(
                "⏭️ No automation listens for {} in tenant '{}'",
                event.trigger_type,
                event.tenant_id
            );
            return Vec::new();
        }

        if event.correlation_id.is_none() {
            event.correlation_id = Some(uuid::Uuid::new_v4().to_string());
        }
        let event = Arc::new(event);

        tracing::info!(
            "📨 Dispatching {} for '{}' to {} automation(s)",
            event.trigger_type,
            event.entity_reference,
            automations.len()
        );

        let mut tasks = JoinSet::new();
        for (position, automation) in automations.into_iter().enumerate() {
            let executor = self.executor.clone();
            let event = event.clone();
            tasks.spawn(async move {
                let run = executor.execute(&automation, &event).await;
                (position, run)
            });
        }

        let mut runs = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => runs.push(result),
                Err(e) => tracing::error!(
                    "💥 Executor task for {} (correlation {}) aborted: {}",
                    event.entity_reference,
                    event.correlation_id.as_deref().unwrap_or_default(),
                    e
                ),
            }
        }

        runs.sort_by_key(|(position, _)| *position);
        runs.into_iter().map(|(_, run)| run).collect()
    }
}
