/// Lifecycle scan-and-fire
///
/// A periodic caller (cron job, admin action, test) asks the scanner to fire one
/// lifecycle trigger. The scanner owns no schedule of its own. Per scan it:
/// checks that some automation listens, asks the entity source for eligible
/// entities, drops entities no runnable automation of their tenant listens for,
/// drops the ones that already fired, keeps the oldest `batch_size` and runs every
/// matching automation for each of them under the at-most-once policy. Entities
/// beyond the batch are picked up by later scans.
///
/// An automation whose graph cannot run for the trigger is left out of the scan
/// entirely, so it neither records a failed run per entity per scan nor lets its
/// tenant's entities occupy the batch.

use crate::automation::{
    graph::CompiledGraph,
    types::{Automation, ContextMap, DomainEvent, TriggerKind},
};
use crate::recorder::{EntityKey, ExecutionRun, RecorderError};
use crate::runtime::{
    dedup::DeduplicationGuard,
    executor::{ExecuteError, WorkflowExecutor},
    matcher::TriggerMatcher,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_SCAN_BATCH_SIZE: usize = 100;

/// An entity currently in a lifecycle state (expired, churned, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEntity {
    pub entity_reference: String,
    pub tenant_id: String,
    /// When the entity entered the state; older entities fire first
    pub eligible_since: DateTime<Utc>,
    pub context: ContextMap,
}

impl LifecycleEntity {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.tenant_id.as_str(), self.entity_reference.as_str())
    }
}

/// Finds entities eligible for a lifecycle trigger (user store, billing, ...)
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn eligible_entities(&self, trigger: TriggerKind) -> anyhow::Result<Vec<LifecycleEntity>>;
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("entity source failed: {0:#}")]
    Source(anyhow::Error),

    #[error("deduplication lookup failed: {0}")]
    Recorder(#[from] RecorderError),
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub trigger: Option<TriggerKind>,
    /// Eligible entities returned by the source
    pub candidates: usize,
    /// Candidates whose tenant has no runnable automation for the trigger
    pub unmatched: usize,
    /// Listening automations left out because their graph cannot run
    pub skipped_automations: Vec<String>,
    /// Candidates dropped because they already fired
    pub already_fired: usize,
    /// Unfired entities left for a later scan by the batch cap
    pub deferred: usize,
    /// Entities processed in this scan
    pub processed: Vec<EntityKey>,
    /// Guarded executions rejected because another run holds the slot
    pub suppressed: usize,
    pub runs: Vec<ExecutionRun>,
}

impl ScanReport {
    /// Runs that reached completed or completed_with_errors
    pub fn fired(&self) -> usize {
        self.runs.iter().filter(|run| run.status.is_fired()).count()
    }
}

pub struct LifecycleScanner {
    matcher: TriggerMatcher,
    guard: DeduplicationGuard,
    executor: Arc<WorkflowExecutor>,
    source: Arc<dyn EntitySource>,
    batch_size: usize,
}

impl LifecycleScanner {
    pub fn new(
        matcher: TriggerMatcher,
        guard: DeduplicationGuard,
        executor: Arc<WorkflowExecutor>,
        source: Arc<dyn EntitySource>,
        batch_size: usize,
    ) -> Self {
        Self {
            matcher,
            guard,
            executor,
            source,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn scan_and_fire(&self, trigger: TriggerKind) -> Result<ScanReport, ScanError> {
        let mut report = ScanReport {
            trigger: Some(trigger),
            ..ScanReport::default()
        };

        if !self.matcher.has_listeners(trigger) {
            tracing::debug!("⏭️ No automation listens for {}, skipping scan", trigger);
            return Ok(report);
        }

        let listeners = self.runnable_listeners(trigger, &mut report);
        if listeners.is_empty() {
            tracing::warn!("⏭️ No runnable automation listens for {}, skipping scan", trigger);
            return Ok(report);
        }

        let mut entities = self
            .source
            .eligible_entities(trigger)
            .await
            .map_err(ScanError::Source)?;
        report.candidates = entities.len();

        entities.retain(|entity| listeners.contains_key(&entity.tenant_id));
        report.unmatched = report.candidates - entities.len();

        entities.sort_by(|a, b| {
            a.eligible_since
                .cmp(&b.eligible_since)
                .then_with(|| a.tenant_id.cmp(&b.tenant_id))
                .then_with(|| a.entity_reference.cmp(&b.entity_reference))
        });
        let mut seen = HashSet::new();
        entities.retain(|entity| seen.insert(entity.key()));

        let keys: Vec<EntityKey> = entities.iter().map(LifecycleEntity::key).collect();
        let unfired: HashSet<EntityKey> = self.guard.unfired(trigger, &keys).await?.into_iter().collect();
        report.already_fired = entities.len() - unfired.len();

        let mut batch: Vec<LifecycleEntity> = entities
            .into_iter()
            .filter(|entity| unfired.contains(&entity.key()))
            .collect();
        if batch.len() > self.batch_size {
            report.deferred = batch.len() - self.batch_size;
            batch.truncate(self.batch_size);
        }

        tracing::info!(
            "🔄 Scanning {}: {} candidate(s), {} unmatched, {} already fired, firing {}, deferring {}",
            trigger,
            report.candidates,
            report.unmatched,
            report.already_fired,
            batch.len(),
            report.deferred
        );

        for entity in batch {
            let automations = listeners.get(&entity.tenant_id).cloned().unwrap_or_default();
            self.fire(trigger, entity, &automations, &mut report).await;
        }

        tracing::info!(
            "✅ Scan of {} done: {} run(s), {} fired, {} suppressed",
            trigger,
            report.runs.len(),
            report.fired(),
            report.suppressed
        );
        Ok(report)
    }

    /// Listening automations per tenant, without those whose graph cannot run
    fn runnable_listeners(
        &self,
        trigger: TriggerKind,
        report: &mut ScanReport,
    ) -> HashMap<String, Vec<Arc<Automation>>> {
        let mut listeners = self.matcher.listeners_by_tenant(trigger);
        for automations in listeners.values_mut() {
            automations.retain(|automation| match CompiledGraph::compile(&automation.graph) {
                Ok(graph) if !graph.trigger_starts(trigger).is_empty() => true,
                Ok(_) => {
                    tracing::warn!("⚠️ Automation '{}' has no {} trigger node, skipping it", automation.id, trigger);
                    report.skipped_automations.push(automation.id.clone());
                    false
                }
                Err(e) => {
                    tracing::warn!("⚠️ Automation '{}' has an invalid graph, skipping it: {}", automation.id, e);
                    report.skipped_automations.push(automation.id.clone());
                    false
                }
            });
        }
        listeners.retain(|_, automations| !automations.is_empty());
        report.skipped_automations.sort();
        listeners
    }

    async fn fire(
        &self,
        trigger: TriggerKind,
        entity: LifecycleEntity,
        automations: &[Arc<Automation>],
        report: &mut ScanReport,
    ) {
        let key = entity.key();
        let mut event = DomainEvent::new(trigger, entity.tenant_id, entity.entity_reference)
            .with_correlation_id(uuid::Uuid::new_v4().to_string());
        event.context = entity.context;
        event.occurred_at = entity.eligible_since;

        for automation in automations {
            match self.executor.execute_guarded(automation, &event).await {
                Ok(run) => report.runs.push(run),
                Err(ExecuteError::AlreadyFired { .. }) => report.suppressed += 1,
            }
        }
        report.processed.push(key);
    }
}
