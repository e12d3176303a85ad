/// Typed graph compilation
///
/// Parses a stored `GraphDefinition` once into a petgraph adjacency structure with
/// typed node configs, so traversal never does ad hoc field access on JSON. All
/// structural validation lives here; a graph that compiles is safe to traverse.

use crate::automation::error::GraphError;
use crate::automation::types::{GraphDefinition, NodeDefinition, NodeKind, Scalar, TriggerKind};
use crate::runtime::condition::{Condition, ConditionError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Label carried by an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Unlabelled edge out of a trigger or action
    Default,
    True,
    False,
}

/// Typed view of an HTTP action's config (templates unresolved)
#[derive(Debug, Clone, PartialEq)]
pub struct ActionConfig {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Per-action override of the configured default timeout
    pub timeout: Option<Duration>,
    /// A failed critical action aborts its branch
    pub critical: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    Trigger,
    Condition(Condition),
    Action(ActionConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub subtype: String,
    pub spec: NodeSpec,
}

impl GraphNode {
    pub fn kind(&self) -> NodeKind {
        match self.spec {
            NodeSpec::Trigger => NodeKind::Trigger,
            NodeSpec::Condition(_) => NodeKind::Condition,
            NodeSpec::Action(_) => NodeKind::Action,
        }
    }
}

/// Execution-ready graph
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    graph: DiGraph<GraphNode, Branch>,
    node_id_to_index: HashMap<String, NodeIndex>,
}

impl CompiledGraph {
    /// Build and validate the graph
    pub fn compile(definition: &GraphDefinition) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in &definition.nodes {
            if node_id_to_index.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            let compiled = compile_node(node)?;
            let index = graph.add_node(compiled);
            node_id_to_index.insert(node.id.clone(), index);
        }

        if !graph.node_weights().any(|n: &GraphNode| n.spec == NodeSpec::Trigger) {
            return Err(GraphError::NoTriggerNodes);
        }

        for edge in &definition.edges {
            let (Some(&from), Some(&to)) = (
                node_id_to_index.get(&edge.source),
                node_id_to_index.get(&edge.target),
            ) else {
                return Err(GraphError::DanglingEdge {
                    source_id: edge.source.clone(),
                    target_id: edge.target.clone(),
                });
            };

            let is_condition = matches!(graph[from].spec, NodeSpec::Condition(_));
            let label = edge.label.as_deref().map(str::trim).filter(|l| !l.is_empty());
            let branch = match (is_condition, label) {
                (false, None) => Branch::Default,
                (false, Some(label)) => {
                    return Err(GraphError::UnexpectedBranchLabel {
                        node_id: edge.source.clone(),
                        label: label.to_string(),
                    })
                }
                (true, Some(label)) if label.eq_ignore_ascii_case("true") => Branch::True,
                (true, Some(label)) if label.eq_ignore_ascii_case("false") => Branch::False,
                (true, label) => {
                    return Err(GraphError::InvalidBranchEdge {
                        node_id: edge.source.clone(),
                        label: label.map(str::to_string),
                    })
                }
            };
            graph.add_edge(from, to, branch);
        }

        let compiled = Self {
            graph,
            node_id_to_index,
        };
        compiled.validate_conditions()?;

        tracing::debug!(
            "📊 Compiled graph with {} nodes and {} edges",
            compiled.total_nodes(),
            compiled.total_edges()
        );
        Ok(compiled)
    }

    /// Every condition must have exactly one `true` and one `false` edge
    fn validate_conditions(&self) -> Result<(), GraphError> {
        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            if !matches!(node.spec, NodeSpec::Condition(_)) {
                continue;
            }

            let mut true_edges = 0;
            let mut false_edges = 0;
            for edge in self.graph.edges_directed(index, Direction::Outgoing) {
                match edge.weight() {
                    Branch::True => true_edges += 1,
                    Branch::False => false_edges += 1,
                    Branch::Default => {}
                }
            }

            if true_edges == 0 {
                return Err(GraphError::MissingBranch {
                    node_id: node.id.clone(),
                    branch: "true",
                });
            }
            if false_edges == 0 {
                return Err(GraphError::MissingBranch {
                    node_id: node.id.clone(),
                    branch: "false",
                });
            }
            if true_edges > 1 || false_edges > 1 {
                let label = if true_edges > 1 { "true" } else { "false" };
                return Err(GraphError::InvalidBranchEdge {
                    node_id: node.id.clone(),
                    label: Some(label.to_string()),
                });
            }
        }
        Ok(())
    }

    pub fn total_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn total_edges(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, index: NodeIndex) -> &GraphNode {
        &self.graph[index]
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.node_id_to_index.get(node_id).copied()
    }

    /// Trigger nodes whose subtype equals the trigger string, in declaration order
    pub fn trigger_starts(&self, trigger: TriggerKind) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&index| {
                let node = &self.graph[index];
                node.spec == NodeSpec::Trigger && node.subtype == trigger.as_str()
            })
            .collect()
    }

    /// Outgoing edges in declaration order
    ///
    /// petgraph iterates a node's edges newest-first, so they are re-sorted by edge index.
    pub fn successors(&self, index: NodeIndex) -> Vec<(Branch, NodeIndex)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| (edge.id(), *edge.weight(), edge.target()))
            .collect();
        edges.sort_by_key(|(id, _, _)| id.index());
        edges.into_iter().map(|(_, branch, target)| (branch, target)).collect()
    }

    /// Target of a condition's `true` or `false` edge
    pub fn branch_target(&self, index: NodeIndex, outcome: bool) -> Option<NodeIndex> {
        let wanted = if outcome { Branch::True } else { Branch::False };
        self.successors(index)
            .into_iter()
            .find(|(branch, _)| *branch == wanted)
            .map(|(_, target)| target)
    }
}

fn compile_node(node: &NodeDefinition) -> Result<GraphNode, GraphError> {
    let spec = match node.kind {
        NodeKind::Trigger => NodeSpec::Trigger,
        NodeKind::Condition => NodeSpec::Condition(compile_condition(node)?),
        NodeKind::Action => NodeSpec::Action(compile_action(node)?),
    };
    Ok(GraphNode {
        id: node.id.clone(),
        subtype: node.subtype.clone(),
        spec,
    })
}

/// Accepts `{ "expression": "balance == 0" }` or `{ "field": "balance", "operator": "==", "value": 0 }`
fn compile_condition(node: &NodeDefinition) -> Result<Condition, GraphError> {
    let invalid = |source| GraphError::InvalidCondition {
        node_id: node.id.clone(),
        source,
    };

    if let Some(expression) = node.config.get("expression").and_then(Value::as_str) {
        return Condition::compile(expression).map_err(invalid);
    }

    let field = node
        .config
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(ConditionError::Empty))?;
    let operator = node
        .config
        .get("operator")
        .and_then(Value::as_str)
        .unwrap_or("==");
    let value = node.config.get("value").cloned().unwrap_or(Value::Null);
    Condition::comparison(field, operator, &value).map_err(invalid)
}

fn compile_action(node: &NodeDefinition) -> Result<ActionConfig, GraphError> {
    let invalid = |message: String| GraphError::InvalidActionConfig {
        node_id: node.id.clone(),
        message,
    };

    if !matches!(node.subtype.as_str(), "http-request" | "http" | "webhook") {
        return Err(invalid(format!("unsupported action type '{}'", node.subtype)));
    }

    let config = &node.config;
    let url = config
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| invalid("missing 'url'".to_string()))?
        .to_string();

    let method = config
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_uppercase();

    let mut headers = BTreeMap::new();
    match config.get("headers") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, value) in map {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => Scalar::from_json(other)
                        .map(|s| s.render())
                        .ok_or_else(|| invalid(format!("header '{}' must be a scalar", name)))?,
                };
                headers.insert(name.clone(), value);
            }
        }
        Some(_) => return Err(invalid("'headers' must be an object".to_string())),
    }

    let body = match config.get("body") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    let timeout = match config.get("timeout_ms") {
        None | Some(Value::Null) => None,
        Some(value) => Some(Duration::from_millis(
            value
                .as_u64()
                .ok_or_else(|| invalid("'timeout_ms' must be a positive integer".to_string()))?,
        )),
    };

    let critical = config
        .get("critical")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(ActionConfig {
        method,
        url,
        headers,
        body,
        timeout,
        critical,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::types::EdgeDefinition;
    use serde_json::json;

    fn node(id: &str, kind: NodeKind, subtype: &str, config: Value) -> NodeDefinition {
        NodeDefinition {
            id: id.to_string(),
            kind,
            subtype: subtype.to_string(),
            config,
        }
    }

    fn trigger(id: &str) -> NodeDefinition {
        node(id, NodeKind::Trigger, "user-expired", Value::Null)
    }

    fn action(id: &str) -> NodeDefinition {
        node(id, NodeKind::Action, "http-request", json!({ "url": "https://x/{{event.username}}" }))
    }

    fn condition(id: &str) -> NodeDefinition {
        node(id, NodeKind::Condition, "expression", json!({ "expression": "balance == 0" }))
    }

    #[test]
    fn compiles_condition_graph() {
        let definition = GraphDefinition {
            nodes: vec![trigger("t"), condition("c"), action("yes"), action("no")],
            edges: vec![
                EdgeDefinition::new("t", "c"),
                EdgeDefinition::labelled("c", "yes", "true"),
                EdgeDefinition::labelled("c", "no", "FALSE"),
            ],
        };
        let graph = CompiledGraph::compile(&definition).unwrap();

        assert_eq!(graph.total_nodes(), 4);
        assert_eq!(graph.total_edges(), 3);
        let c = graph.index_of("c").unwrap();
        assert_eq!(graph.branch_target(c, true), graph.index_of("yes"));
        assert_eq!(graph.branch_target(c, false), graph.index_of("no"));
        assert_eq!(graph.trigger_starts(TriggerKind::UserExpired).len(), 1);
        assert!(graph.trigger_starts(TriggerKind::UserCreated).is_empty());
    }

    #[test]
    fn successors_keep_declaration_order() {
        let definition = GraphDefinition {
            nodes: vec![trigger("t"), action("a"), action("b"), action("c")],
            edges: vec![
                EdgeDefinition::new("t", "a"),
                EdgeDefinition::new("t", "b"),
                EdgeDefinition::new("t", "c"),
            ],
        };
        let graph = CompiledGraph::compile(&definition).unwrap();
        let t = graph.index_of("t").unwrap();
        let order: Vec<&str> = graph
            .successors(t)
            .into_iter()
            .map(|(_, idx)| graph.node(idx).id.as_str())
            .collect();

        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_malformed_graphs() {
        let no_trigger = GraphDefinition {
            nodes: vec![action("a")],
            edges: vec![],
        };
        assert_eq!(CompiledGraph::compile(&no_trigger).unwrap_err(), GraphError::NoTriggerNodes);

        let dangling = GraphDefinition {
            nodes: vec![trigger("t")],
            edges: vec![EdgeDefinition::new("t", "ghost")],
        };
        assert!(matches!(
            CompiledGraph::compile(&dangling),
            Err(GraphError::DanglingEdge { .. })
        ));

        let one_branch = GraphDefinition {
            nodes: vec![trigger("t"), condition("c"), action("a")],
            edges: vec![EdgeDefinition::new("t", "c"), EdgeDefinition::labelled("c", "a", "true")],
        };
        assert_eq!(
            CompiledGraph::compile(&one_branch).unwrap_err(),
            GraphError::MissingBranch {
                node_id: "c".to_string(),
                branch: "false"
            }
        );

        let labelled_action = GraphDefinition {
            nodes: vec![trigger("t"), action("a")],
            edges: vec![EdgeDefinition::labelled("t", "a", "true")],
        };
        assert!(matches!(
            CompiledGraph::compile(&labelled_action),
            Err(GraphError::UnexpectedBranchLabel { .. })
        ));

        let duplicate = GraphDefinition {
            nodes: vec![trigger("t"), trigger("t")],
            edges: vec![],
        };
        assert_eq!(
            CompiledGraph::compile(&duplicate).unwrap_err(),
            GraphError::DuplicateNode("t".to_string())
        );
    }

    #[test]
    fn parses_action_config() {
        let definition = node(
            "notify",
            NodeKind::Action,
            "webhook",
            json!({
                "method": "post",
                "url": "https://hooks/{{event.entity_reference}}",
                "headers": { "X-Tenant": "{{event.tenant_id}}", "X-Retry": 0 },
                "body": { "user": "{{event.username}}" },
                "timeout_ms": 1500,
                "critical": true
            }),
        );
        let NodeSpec::Action(config) = compile_node(&definition).unwrap().spec else {
            panic!("expected action");
        };

        assert_eq!(config.method, "POST");
        assert_eq!(config.headers.get("X-Retry").map(String::as_str), Some("0"));
        assert_eq!(config.body.as_deref(), Some(r#"{"user":"{{event.username}}"}"#));
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert!(config.critical);
    }

    #[test]
    fn structured_condition_and_bad_action() {
        let structured = node(
            "c",
            NodeKind::Condition,
            "compare",
            json!({ "field": "event.balance", "operator": "gt", "value": 100 }),
        );
        match compile_node(&structured).unwrap().spec {
            NodeSpec::Condition(condition) => assert_eq!(condition.source(), "event.balance > 100"),
            other => panic!("expected a condition, got {:?}", other),
        }

        let missing_url = node("a", NodeKind::Action, "http-request", json!({}));
        assert!(matches!(
            compile_node(&missing_url),
            Err(GraphError::InvalidActionConfig { .. })
        ));

        let bad_expr = node("c", NodeKind::Condition, "expression", json!({ "expression": "a ==" }));
        assert!(matches!(
            compile_node(&bad_expr),
            Err(GraphError::InvalidCondition { .. })
        ));
    }
}
