/// Lock-free automation registry using ArcSwap
///
/// Holds the current snapshot of every known automation plus a trigger index over
/// the active ones. Updates build a new snapshot and swap the pointer, so readers
/// (matcher, scanner, in-flight runs holding an `Arc<Automation>`) never block and
/// never observe a half-applied edit.

use crate::automation::{storage::AutomationStorage, types::{Automation, TriggerKind}};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug)]
pub struct AutomationRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    storage: AutomationStorage,
}

/// Immutable registry contents
#[derive(Debug, Clone, Default)]
struct RegistrySnapshot {
    /// Key: automation id, Value: definition snapshot (active or not)
    automations: HashMap<String, Arc<Automation>>,
    /// Active automation ids per trigger kind, sorted by id
    trigger_index: HashMap<TriggerKind, Vec<String>>,
}

impl RegistrySnapshot {
    fn build(automations: HashMap<String, Arc<Automation>>) -> Self {
        let mut trigger_index: HashMap<TriggerKind, Vec<String>> = HashMap::new();

        for automation in automations.values().filter(|a| a.is_active()) {
            for subtype in automation.trigger_subtypes() {
                match TriggerKind::parse(subtype) {
                    Some(kind) => {
                        let ids = trigger_index.entry(kind).or_default();
                        if !ids.contains(&automation.id) {
                            ids.push(automation.id.clone());
                        }
                    }
                    None => tracing::debug!(
                        "⏭️ Automation '{}' has unknown trigger '{}', skipping",
                        automation.id,
                        subtype
                    ),
                }
            }
        }

        for ids in trigger_index.values_mut() {
            ids.sort();
        }

        Self {
            automations,
            trigger_index,
        }
    }
}

impl AutomationRegistry {
    pub fn new(storage: AutomationStorage) -> Self {
        Self {
            snapshot: ArcSwap::new(Arc::new(RegistrySnapshot::default())),
            storage,
        }
    }

    /// Populate the registry from storage (startup)
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all().await?;
        let automations = stored
            .into_iter()
            .map(|(id, automation)| (id, Arc::new(automation)))
            .collect();

        self.snapshot.store(Arc::new(RegistrySnapshot::build(automations)));

        tracing::info!(
            "📊 Initialized automation registry with {} automations",
            self.snapshot.load().automations.len()
        );
        Ok(())
    }

    /// Re-read one automation from storage; removes it if it no longer exists
    pub async fn reload_automation(&self, automation_id: &str) -> Result<()> {
        match self.storage.get_automation(automation_id).await? {
            Some(automation) => {
                self.upsert(automation);
                tracing::info!("🔥 Hot-reloaded automation: {}", automation_id);
            }
            None => self.remove_automation(automation_id),
        }
        Ok(())
    }

    /// Swap in a new snapshot containing `automation`
    pub fn upsert(&self, automation: Automation) {
        self.snapshot.rcu(|current| {
            let mut automations = current.automations.clone();
            automations.insert(automation.id.clone(), Arc::new(automation.clone()));
            RegistrySnapshot::build(automations)
        });
    }

    pub fn remove_automation(&self, automation_id: &str) {
        let mut removed = false;
        self.snapshot.rcu(|current| {
            let mut automations = current.automations.clone();
            removed = automations.remove(automation_id).is_some();
            RegistrySnapshot::build(automations)
        });
        if removed {
            tracing::info!("🗑️ Removed automation from registry: {}", automation_id);
        }
    }

    /// Snapshot of one automation regardless of status (manual test triggers)
    pub fn get(&self, automation_id: &str) -> Option<Arc<Automation>> {
        self.snapshot.load().automations.get(automation_id).cloned()
    }

    /// Whether any active automation listens for this trigger (O(1))
    pub fn has_listeners(&self, trigger: TriggerKind) -> bool {
        self.snapshot
            .load()
            .trigger_index
            .get(&trigger)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Active automations with a trigger node for `trigger`, ordered by id
    pub fn listeners(&self, trigger: TriggerKind) -> Vec<Arc<Automation>> {
        let snapshot = self.snapshot.load();
        snapshot
            .trigger_index
            .get(&trigger)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| snapshot.automations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().automations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
