/// Trigger matching over the automation registry

use crate::automation::{
    registry::AutomationRegistry,
    types::{Automation, DomainEvent, TriggerKind},
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    registry: Arc<AutomationRegistry>,
}

impl TriggerMatcher {
    pub fn new(registry: Arc<AutomationRegistry>) -> Self {
        Self { registry }
    }

    /// Cheap existence check to make before any entity-heavy work
    pub fn has_listeners(&self, trigger: TriggerKind) -> bool {
        self.registry.has_listeners(trigger)
    }

    /// Active automations listening for `trigger`, grouped by tenant
    pub fn listeners_by_tenant(&self, trigger: TriggerKind) -> HashMap<String, Vec<Arc<Automation>>> {
        let mut by_tenant: HashMap<String, Vec<Arc<Automation>>> = HashMap::new();
        for automation in self.registry.listeners(trigger) {
            by_tenant
                .entry(automation.tenant_id.clone())
                .or_default()
                .push(automation);
        }
        by_tenant
    }

    /// Active automations of the event's tenant with a trigger node for the event
    pub fn match_event(&self, event: &DomainEvent) -> Vec<Arc<Automation>> {
        if !self.has_listeners(event.trigger_type) {
            return Vec::new();
        }

        let matched: Vec<Arc<Automation>> = self
            .registry
            .listeners(event.trigger_type)
            .into_iter()
            .filter(|automation| automation.tenant_id == event.tenant_id)
            .collect();

        tracing::debug!(
            "🎯 {} automation(s) matched {} for tenant '{}'",
            matched.len(),
            event.trigger_type,
            event.tenant_id
        );
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::storage::AutomationStorage;
    use crate::automation::types::{AutomationStatus, GraphDefinition, NodeDefinition, NodeKind};
    use serde_json::Value;

    fn automation(id: &str, tenant: &str, trigger: &str) -> Automation {
        Automation {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            name: id.to_string(),
            trigger_type: trigger.to_string(),
            status: AutomationStatus::Active,
            graph: GraphDefinition {
                nodes: vec![NodeDefinition {
                    id: "start".to_string(),
                    kind: NodeKind::Trigger,
                    subtype: trigger.to_string(),
                    config: Value::Null,
                }],
                edges: Vec::new(),
            },
            version: 1,
        }
    }

    #[tokio::test]
    async fn matches_only_the_event_tenant() {
        let pool = crate::db::connect_in_memory().await.unwrap();
        let registry = Arc::new(AutomationRegistry::new(AutomationStorage::new(pool)));
        registry.upsert(automation("a1", "tenant-a", "user-expired"));
        registry.upsert(automation("b1", "tenant-b", "user-expired"));
        registry.upsert(automation("a2", "tenant-a", "payment-received"));

        let matcher = TriggerMatcher::new(registry);
        let event = DomainEvent::new(TriggerKind::UserExpired, "tenant-a", "u1");
        let ids: Vec<String> = matcher.match_event(&event).iter().map(|a| a.id.clone()).collect();

        assert_eq!(ids, vec!["a1".to_string()]);
        assert!(matcher.has_listeners(TriggerKind::PaymentReceived));
        assert!(!matcher.has_listeners(TriggerKind::UserChurned));
        assert!(matcher
            .match_event(&DomainEvent::new(TriggerKind::UserChurned, "tenant-a", "u1"))
            .is_empty());
    }

    #[tokio::test]
    async fn groups_listeners_by_tenant() {
        let pool = crate::db::connect_in_memory().await.unwrap();
        let registry = Arc::new(AutomationRegistry::new(AutomationStorage::new(pool)));
        registry.upsert(automation("a1", "tenant-a", "user-expired"));
        registry.upsert(automation("a2", "tenant-a", "user-expired"));
        registry.upsert(automation("b1", "tenant-b", "user-expired"));

        let by_tenant = TriggerMatcher::new(registry).listeners_by_tenant(TriggerKind::UserExpired);

        assert_eq!(by_tenant.len(), 2);
        assert_eq!(by_tenant["tenant-a"].len(), 2);
        assert_eq!(by_tenant["tenant-b"][0].id, "b1");
    }
}
